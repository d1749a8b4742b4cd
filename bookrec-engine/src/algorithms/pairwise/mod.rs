//! Pairwise similarity scorer.
//!
//! Books co-rated by the same reader form positive pairs; a random pool
//! book paired with one of them forms a negative. A boosted-tree classifier
//! over handcrafted pair features learns which pairs belong together and
//! ranks candidates by that probability at query time.

pub mod boosting;
pub mod features;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};

pub use boosting::{log_loss, roc_auc, stratified_split, BinMapper, GradientBoostedTrees};
pub use features::{pair_features, BookMeta, PairFeatures, FEATURE_NAMES, NUM_FEATURES};

use super::{collect_ranked, sort_by_score_desc, AlgorithmInfo, Recommender, ScoredBook};
use crate::catalog::Catalog;
use crate::config::PairwiseConfig;
use crate::data::TrainingData;
use crate::error::{InitError, RecommendError};

const NAME: &str = "GBDT pairwise recommender";
const NEGATIVE_REDRAWS: usize = 5;

/// Labelled pair features, row-major.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct PairSet {
    pub rows: Vec<f32>,
    pub labels: Vec<f32>,
}

impl PairSet {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    fn push(&mut self, features: PairFeatures, label: f32) {
        self.rows.extend_from_slice(&features);
        self.labels.push(label);
    }

    fn subset(&self, indices: &[usize]) -> Self {
        let mut out = Self::default();
        for &i in indices {
            out.rows
                .extend_from_slice(&self.rows[i * NUM_FEATURES..(i + 1) * NUM_FEATURES]);
            out.labels.push(self.labels[i]);
        }
        out
    }
}

pub struct PairwiseRecommender {
    info: AlgorithmInfo,
    catalog: Arc<Catalog>,
    meta: HashMap<String, BookMeta>,
    candidate_pool: Vec<String>,
    model: GradientBoostedTrees,
}

impl PairwiseRecommender {
    pub fn new(
        catalog: Arc<Catalog>,
        data: &TrainingData,
        config: &PairwiseConfig,
    ) -> Result<Self, InitError> {
        if data.interactions.is_empty() {
            return Err(InitError::NoRatings(NAME));
        }
        let ratings: Vec<_> = data
            .interactions
            .iter()
            .filter(|r| catalog.contains_isbn(&r.isbn))
            .collect();
        if ratings.is_empty() {
            return Err(InitError::NoCatalogOverlap(NAME));
        }

        let stats = features::rating_stats(ratings.iter().copied());
        let meta = features::build_meta(&catalog, &stats);

        let mut by_count: Vec<(&String, usize)> =
            stats.iter().map(|(isbn, s)| (isbn, s.count)).collect();
        by_count.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        let candidate_pool: Vec<String> = by_count
            .into_iter()
            .take(config.candidate_pool_size)
            .map(|(isbn, _)| isbn.clone())
            .collect();
        if candidate_pool.is_empty() {
            return Err(InitError::EmptyCandidatePool(NAME));
        }

        let mut user_books: BTreeMap<u64, Vec<&str>> = BTreeMap::new();
        for r in &ratings {
            user_books.entry(r.user_id).or_default().push(r.isbn.as_str());
        }
        let pairs = build_pairs(&user_books, &candidate_pool, &meta, config);
        if pairs.is_empty() {
            return Err(InitError::NoTrainingSamples(NAME));
        }

        let model = fit_with_validation(&pairs, config);

        Ok(Self {
            info: AlgorithmInfo::new(
                super::PAIRWISE_ID,
                "Gradient-Boosted Pairwise Similarity",
                "Gradient-boosted trees over handcrafted book-pair features",
            ),
            catalog,
            meta,
            candidate_pool,
            model,
        })
    }

    pub fn candidate_pool(&self) -> &[String] {
        &self.candidate_pool
    }

    /// Probability that `a` and `b` are read by the same person.
    pub fn pair_score(&self, a: &str, b: &str) -> Option<f32> {
        let (ma, mb) = (self.meta.get(a)?, self.meta.get(b)?);
        Some(self.model.predict_proba(&pair_features(ma, mb)))
    }
}

impl Recommender for PairwiseRecommender {
    fn info(&self) -> &AlgorithmInfo {
        &self.info
    }

    fn recommend(&self, seed_isbn: &str, k: usize) -> Result<Vec<ScoredBook>, RecommendError> {
        let seed = self.meta.get(seed_isbn).ok_or_else(|| {
            RecommendError::NoContext("Book not available for pairwise scoring".into())
        })?;

        let mut ranked: Vec<(&str, f32)> = self
            .candidate_pool
            .iter()
            .filter(|c| c.as_str() != seed_isbn)
            .filter_map(|c| {
                let m = self.meta.get(c)?;
                Some((c.as_str(), self.model.predict_proba(&pair_features(seed, m))))
            })
            .collect();
        if ranked.is_empty() {
            return Err(RecommendError::EmptyCandidates(
                "No pairwise candidates available".into(),
            ));
        }
        sort_by_score_desc(&mut ranked);

        let results = collect_ranked(&self.catalog, seed_isbn, ranked, k);
        if results.is_empty() {
            return Err(RecommendError::EmptyCandidates(
                "Pairwise recommender returned empty results".into(),
            ));
        }
        Ok(results)
    }
}

/// Positive pairs from each reader's co-rated pool books, each followed by
/// one sampled negative. Users are visited in ascending id.
pub fn build_pairs(
    user_books: &BTreeMap<u64, Vec<&str>>,
    pool: &[String],
    meta: &HashMap<String, BookMeta>,
    config: &PairwiseConfig,
) -> PairSet {
    let in_pool: HashSet<&str> = pool.iter().map(String::as_str).collect();
    let mut rng = StdRng::seed_from_u64(config.random_state);
    let mut out = PairSet::default();

    'users: for books in user_books.values() {
        let mut seen = HashSet::new();
        let mut mine: Vec<&str> = books
            .iter()
            .copied()
            .filter(|isbn| in_pool.contains(isbn) && seen.insert(*isbn))
            .collect();
        if mine.len() < 2 {
            continue;
        }
        mine.truncate(config.max_books_per_user);

        for (i, &a) in mine.iter().enumerate() {
            for &b in &mine[i + 1..] {
                let Some(meta_a) = meta.get(a) else { continue };
                if let Some(meta_b) = meta.get(b) {
                    out.push(pair_features(meta_a, meta_b), 1.0);
                }

                let mut negative = pool[rng.random_range(0..pool.len())].as_str();
                let mut redraws = 0;
                while mine.contains(&negative) && redraws < NEGATIVE_REDRAWS {
                    negative = pool[rng.random_range(0..pool.len())].as_str();
                    redraws += 1;
                }
                if let Some(meta_n) = meta.get(negative) {
                    out.push(pair_features(meta_a, meta_n), 0.0);
                }

                if out.len() >= config.max_pairs {
                    break 'users;
                }
            }
        }
    }

    out
}

/// Fit on a stratified training split, log held-out metrics, and return the
/// model.
fn fit_with_validation(pairs: &PairSet, config: &PairwiseConfig) -> GradientBoostedTrees {
    let (train_idx, valid_idx) =
        stratified_split(&pairs.labels, config.validation_fraction, config.random_state);
    let (train, valid) = if train_idx.is_empty() {
        (pairs.clone(), PairSet::default())
    } else {
        (pairs.subset(&train_idx), pairs.subset(&valid_idx))
    };

    tracing::info!(
        pairs = pairs.len(),
        train = train.len(),
        valid = valid.len(),
        "Training pairwise model"
    );
    let model = GradientBoostedTrees::fit(&train.rows, &train.labels, NUM_FEATURES, config);

    if !valid.is_empty() {
        let probs = model.predict_proba_batch(&valid.rows);
        let loss = log_loss(&valid.labels, &probs);
        match roc_auc(&valid.labels, &probs) {
            Some(auc) => tracing::info!(
                trees = model.n_trees(),
                logloss = loss,
                auc,
                "Pairwise model validated"
            ),
            None => {
                tracing::info!(trees = model.n_trees(), logloss = loss, "Pairwise model validated")
            }
        }
    }
    model
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::test_support::book;
    use crate::data::Interaction;

    fn small_config() -> PairwiseConfig {
        PairwiseConfig {
            n_estimators: 20,
            max_depth: 3,
            min_samples_leaf: 2,
            learning_rate: 0.2,
            ..PairwiseConfig::default()
        }
    }

    /// Three authors; each reader rates books from one author only.
    fn dataset() -> (Catalog, TrainingData) {
        let mut books = Vec::new();
        for a in 0..3 {
            for j in 0..6 {
                let id = a * 6 + j;
                books.push(book(
                    id as u64,
                    &format!("isbn-{id:02}"),
                    &format!("Saga {a} volume {j}"),
                    &format!("Author {a}"),
                ));
            }
        }
        books.push(book(99, "lonely", "Never Rated", "Nobody"));

        let mut interactions = Vec::new();
        for user in 0..30u64 {
            let a = user % 3;
            for j in 0..4 {
                let id = a * 6 + (user / 3 + j) % 6;
                interactions.push(Interaction {
                    user_id: user,
                    isbn: format!("isbn-{id:02}"),
                    rating: 8,
                });
            }
        }
        (Catalog::new(books), TrainingData { interactions, users: Vec::new() })
    }

    #[test]
    fn pool_orders_by_rating_count() {
        let (catalog, data) = dataset();
        let rec = PairwiseRecommender::new(Arc::new(catalog), &data, &small_config()).unwrap();
        assert_eq!(rec.candidate_pool().len(), 18);
        assert!(!rec.candidate_pool().iter().any(|i| i == "lonely"));
    }

    #[test]
    fn pairs_alternate_positive_and_negative() {
        let (catalog, data) = dataset();
        let stats = features::rating_stats(&data.interactions);
        let meta = features::build_meta(&catalog, &stats);
        let pool: Vec<String> = (0..18).map(|i| format!("isbn-{i:02}")).collect();
        let mut users: BTreeMap<u64, Vec<&str>> = BTreeMap::new();
        for r in &data.interactions {
            users.entry(r.user_id).or_default().push(r.isbn.as_str());
        }

        let mut config = small_config();
        config.max_pairs = 25;
        let pairs = build_pairs(&users, &pool, &meta, &config);
        assert!(pairs.len() >= 25 && pairs.len() <= 26);
        assert_eq!(pairs.rows.len(), pairs.len() * NUM_FEATURES);
        assert_eq!(pairs.labels[0], 1.0);
        assert_eq!(pairs.labels[1], 0.0);
        assert_eq!(build_pairs(&users, &pool, &meta, &config), pairs);
    }

    #[test]
    fn same_author_books_rank_first() {
        let (catalog, data) = dataset();
        let rec = PairwiseRecommender::new(Arc::new(catalog), &data, &small_config()).unwrap();
        let results = rec.recommend("isbn-00", 5).unwrap();
        assert_eq!(results.len(), 5);
        assert!(results.iter().all(|r| r.book.author == "Author 0"));
        assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn unknown_seed_is_no_context() {
        let (catalog, data) = dataset();
        let rec = PairwiseRecommender::new(Arc::new(catalog), &data, &small_config()).unwrap();
        let err = rec.recommend("missing", 5).unwrap_err();
        assert_eq!(err.code(), "NO_CONTEXT");

        // In the catalog but never rated: still scorable.
        assert!(rec.recommend("lonely", 3).is_ok());
    }

    #[test]
    fn ratings_outside_catalog_are_fatal() {
        let (catalog, _) = dataset();
        let data = TrainingData {
            interactions: vec![Interaction { user_id: 1, isbn: "nope".into(), rating: 9 }],
            users: Vec::new(),
        };
        let err = PairwiseRecommender::new(Arc::new(catalog), &data, &small_config())
            .err()
            .unwrap();
        assert_eq!(err.code(), "INIT_NO_CATALOG_OVERLAP");
    }
}
