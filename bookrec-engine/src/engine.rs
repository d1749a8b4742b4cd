//! Algorithm registry and fallback routing.

use std::collections::HashMap;
use std::sync::Arc;

use candle_core::Device;
use serde::Serialize;

use crate::algorithms::{
    Algorithm, AlgorithmInfo, FactorizationRecommender, PairwiseRecommender, Recommender,
    ScoredBook, SequentialRecommender, FACTORIZATION_ID, PAIRWISE_ID, SEQUENTIAL_ID,
};
use crate::catalog::{Book, Catalog};
use crate::config::EngineConfig;
use crate::data::TrainingData;
use crate::error::{InitError, RecommendError};

/// Legacy algorithm names: `(alias, target id, display name)`.
pub const ALIASES: &[(&str, &str, &str)] = &[
    ("user_cf", FACTORIZATION_ID, "User-based CF (alias of matrix factorization)"),
    ("item_cf", FACTORIZATION_ID, "Item-based CF (alias of matrix factorization)"),
    ("deepfm", SEQUENTIAL_ID, "DIN content model (alias of DIN)"),
    ("lightgbm", PAIRWISE_ID, "LightGBM pairwise (alias of gradient-boosted pairwise)"),
];

/// Map an alias to its target id; other ids pass through unchanged.
pub fn resolve_alias(id: &str) -> &str {
    ALIASES
        .iter()
        .find(|(alias, _, _)| *alias == id)
        .map_or(id, |(_, target, _)| target)
}

/// How the caller identifies the seed book.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Seed {
    Isbn(String),
    BookId(u64),
}

/// Identity of the scorer that produced a result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlgorithmRef {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Recommendation {
    pub seed_isbn: String,
    pub items: Vec<ScoredBook>,
    pub algorithm: AlgorithmRef,
}

/// Owns every constructed scorer. Immutable after construction, so it can
/// be shared behind an `Arc` across threads.
pub struct RecommendationEngine<R: Recommender = Algorithm> {
    catalog: Arc<Catalog>,
    scorers: Vec<R>,
    by_id: HashMap<String, usize>,
    fallback_order: Vec<String>,
}

impl RecommendationEngine<Algorithm> {
    /// Build every enabled scorer. A scorer whose construction fails is
    /// logged and left out; the engine starts with the rest.
    pub fn initialize(
        catalog: Arc<Catalog>,
        data: &TrainingData,
        config: &EngineConfig,
        device: &Device,
    ) -> Self {
        let mut scorers = Vec::new();

        for id in &config.algorithms {
            let built: Result<Algorithm, InitError> = match id.as_str() {
                PAIRWISE_ID => {
                    PairwiseRecommender::new(catalog.clone(), data, &config.pairwise)
                        .map(Algorithm::Pairwise)
                }
                SEQUENTIAL_ID => {
                    SequentialRecommender::new(catalog.clone(), data, &config.sequential, device)
                        .map(Algorithm::Sequential)
                }
                FACTORIZATION_ID => FactorizationRecommender::new(
                    catalog.clone(),
                    data,
                    &config.factorization,
                    device,
                )
                .map(Algorithm::Factorization),
                other => {
                    tracing::warn!(algorithm = %other, "Unknown algorithm in configuration, skipping");
                    continue;
                }
            };

            match built {
                Ok(scorer) => {
                    tracing::info!(algorithm = %id, "Algorithm initialized");
                    scorers.push(scorer);
                }
                Err(e) => {
                    tracing::warn!(algorithm = %id, code = e.code(), "Algorithm failed to initialize: {}", e);
                }
            }
        }

        Self::new(catalog, scorers, config.fallback_order.clone())
    }
}

impl<R: Recommender> RecommendationEngine<R> {
    /// Register already-built scorers. Later scorers with a duplicate id are
    /// dropped.
    pub fn new(catalog: Arc<Catalog>, scorers: Vec<R>, fallback_order: Vec<String>) -> Self {
        let mut by_id = HashMap::new();
        let mut kept = Vec::with_capacity(scorers.len());
        for scorer in scorers {
            let id = scorer.info().id.clone();
            if by_id.contains_key(&id) {
                tracing::warn!(algorithm = %id, "Duplicate algorithm id, skipping");
                continue;
            }
            by_id.insert(id, kept.len());
            kept.push(scorer);
        }
        Self {
            catalog,
            scorers: kept,
            by_id,
            fallback_order,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn len(&self) -> usize {
        self.scorers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scorers.is_empty()
    }

    /// Ids of the registered scorers, in registration order.
    pub fn algorithm_ids(&self) -> Vec<&str> {
        self.scorers.iter().map(|s| s.info().id.as_str()).collect()
    }

    fn get(&self, id: &str) -> Option<&R> {
        self.by_id.get(id).map(|&i| &self.scorers[i])
    }

    /// Registered scorers, then one entry per alias whose target is
    /// registered.
    pub fn list_algorithms(&self) -> Vec<AlgorithmInfo> {
        let mut out: Vec<AlgorithmInfo> = self.scorers.iter().map(|s| s.info().clone()).collect();
        for (alias, target, display) in ALIASES {
            if let Some(scorer) = self.get(target) {
                out.push(AlgorithmInfo {
                    id: alias.to_string(),
                    name: display.to_string(),
                    description: format!("Alias of {}", scorer.info().name),
                });
            }
        }
        out
    }

    /// Look up the seed entry in the catalog.
    pub fn resolve_seed(&self, seed: &Seed) -> Result<&Book, RecommendError> {
        match seed {
            Seed::Isbn(isbn) => self
                .catalog
                .lookup_by_isbn(isbn)
                .ok_or_else(|| RecommendError::BookNotFound(isbn.clone())),
            Seed::BookId(id) => self
                .catalog
                .lookup_by_id(*id)
                .ok_or_else(|| RecommendError::BookNotFound(id.to_string())),
        }
    }

    /// Scorers tried, in order, when no algorithm is requested.
    fn fallback_chain(&self) -> Vec<&R> {
        let mut chain: Vec<&R> = Vec::new();
        for id in &self.fallback_order {
            if let Some(scorer) = self.get(resolve_alias(id)) {
                if !chain.iter().any(|s| s.info().id == scorer.info().id) {
                    chain.push(scorer);
                }
            }
        }
        chain
    }

    /// Recommend up to `k` books for `seed`.
    ///
    /// With `algorithm`, exactly that scorer (after alias resolution) runs
    /// and its failure is returned as is. Without it, the fallback chain is
    /// walked and the last failure is returned if every scorer fails.
    pub fn recommend(
        &self,
        seed: &Seed,
        k: usize,
        algorithm: Option<&str>,
    ) -> Result<Recommendation, RecommendError> {
        let seed_isbn = match seed {
            Seed::Isbn(isbn) => isbn.clone(),
            Seed::BookId(_) => self.resolve_seed(seed)?.isbn.clone(),
        };

        let chain = match algorithm {
            Some(requested) => {
                let scorer = self
                    .get(resolve_alias(requested))
                    .ok_or_else(|| RecommendError::UnsupportedAlgorithm(requested.to_string()))?;
                vec![scorer]
            }
            None => self.fallback_chain(),
        };

        let mut last_error = None;
        for scorer in chain {
            let info = scorer.info();
            match scorer.recommend(&seed_isbn, k) {
                Ok(items) => {
                    return Ok(Recommendation {
                        seed_isbn,
                        items,
                        algorithm: AlgorithmRef {
                            id: info.id.clone(),
                            name: info.name.clone(),
                        },
                    })
                }
                Err(e) => {
                    if e.is_recoverable() {
                        tracing::debug!(algorithm = %info.id, code = e.code(), "Recommendation failed: {}", e);
                    } else {
                        tracing::warn!(algorithm = %info.id, code = e.code(), "Recommendation failed: {}", e);
                    }
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or(RecommendError::NoAlgorithms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::test_support::book;

    struct Fixed {
        info: AlgorithmInfo,
        outcome: Result<Vec<&'static str>, RecommendError>,
        catalog: Arc<Catalog>,
    }

    impl Recommender for Fixed {
        fn info(&self) -> &AlgorithmInfo {
            &self.info
        }

        fn recommend(&self, seed_isbn: &str, k: usize) -> Result<Vec<ScoredBook>, RecommendError> {
            let isbns = self.outcome.clone()?;
            let ranked = isbns.into_iter().map(|isbn| (isbn, 0.5));
            Ok(crate::algorithms::collect_ranked(&self.catalog, seed_isbn, ranked, k))
        }
    }

    fn catalog() -> Arc<Catalog> {
        Arc::new(Catalog::new(vec![
            book(10, "S", "Seed", "a"),
            book(11, "X", "Other", "b"),
            book(12, "Y", "Third", "c"),
        ]))
    }

    fn fixed(
        catalog: &Arc<Catalog>,
        id: &str,
        outcome: Result<Vec<&'static str>, RecommendError>,
    ) -> Fixed {
        Fixed {
            info: AlgorithmInfo::new(id, &format!("{id} name"), "desc"),
            outcome,
            catalog: catalog.clone(),
        }
    }

    fn order(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn fallback_uses_first_success() {
        let cat = catalog();
        let engine = RecommendationEngine::new(
            cat.clone(),
            vec![
                fixed(&cat, "gbdt_pairwise", Err(RecommendError::NoContext("no pair".into()))),
                fixed(&cat, "din_content", Ok(vec!["X", "Y"])),
            ],
            order(&["gbdt_pairwise", "din_content"]),
        );
        let rec = engine.recommend(&Seed::Isbn("S".into()), 5, None).unwrap();
        assert_eq!(rec.algorithm.id, "din_content");
        assert_eq!(rec.algorithm.name, "din_content name");
        assert_eq!(rec.items.len(), 2);
    }

    #[test]
    fn fallback_returns_last_error() {
        let cat = catalog();
        let engine = RecommendationEngine::new(
            cat.clone(),
            vec![
                fixed(&cat, "gbdt_pairwise", Err(RecommendError::NoContext("first".into()))),
                fixed(&cat, "din_content", Err(RecommendError::EmptyCandidates("second".into()))),
            ],
            order(&["gbdt_pairwise", "din_content"]),
        );
        let err = engine.recommend(&Seed::Isbn("S".into()), 5, None).unwrap_err();
        assert_eq!(err, RecommendError::EmptyCandidates("second".into()));
    }

    #[test]
    fn empty_engine_reports_no_algorithms() {
        let engine: RecommendationEngine<Fixed> =
            RecommendationEngine::new(catalog(), Vec::new(), order(&["gbdt_pairwise"]));
        let err = engine.recommend(&Seed::Isbn("S".into()), 5, None).unwrap_err();
        assert_eq!(err.to_string(), "No algorithms configured");
        assert!(engine.list_algorithms().is_empty());
    }

    #[test]
    fn explicit_algorithm_does_not_fall_back() {
        let cat = catalog();
        let engine = RecommendationEngine::new(
            cat.clone(),
            vec![
                fixed(&cat, "din_content", Err(RecommendError::NoContext("din says no".into()))),
                fixed(&cat, "cf_mf", Ok(vec!["X"])),
            ],
            order(&["din_content", "cf_mf"]),
        );
        let err = engine
            .recommend(&Seed::Isbn("S".into()), 5, Some("deepfm"))
            .unwrap_err();
        assert_eq!(err.to_string(), "din says no");

        let rec = engine.recommend(&Seed::Isbn("S".into()), 5, Some("user_cf")).unwrap();
        assert_eq!(rec.algorithm.id, "cf_mf");
    }

    #[test]
    fn unknown_or_unregistered_algorithm_is_unsupported() {
        let cat = catalog();
        let engine = RecommendationEngine::new(
            cat.clone(),
            vec![fixed(&cat, "cf_mf", Ok(vec!["X"]))],
            order(&["cf_mf"]),
        );
        let err = engine
            .recommend(&Seed::Isbn("S".into()), 5, Some("nonexistent_algo"))
            .unwrap_err();
        assert_eq!(err.to_string(), "Unsupported algorithm: nonexistent_algo");
        assert_eq!(err.code(), "UNSUPPORTED_ALGORITHM");

        let err = engine
            .recommend(&Seed::Isbn("S".into()), 5, Some("lightgbm"))
            .unwrap_err();
        assert_eq!(err.to_string(), "Unsupported algorithm: lightgbm");
    }

    #[test]
    fn listing_includes_aliases_of_registered_targets_only() {
        let cat = catalog();
        let engine = RecommendationEngine::new(
            cat.clone(),
            vec![
                fixed(&cat, "din_content", Ok(vec![])),
                fixed(&cat, "cf_mf", Ok(vec![])),
            ],
            order(&["din_content", "cf_mf"]),
        );
        let ids: Vec<String> = engine.list_algorithms().into_iter().map(|a| a.id).collect();
        assert_eq!(ids, vec!["din_content", "cf_mf", "user_cf", "item_cf", "deepfm"]);

        let listed = engine.list_algorithms();
        let deepfm = listed.iter().find(|a| a.id == "deepfm").unwrap();
        assert_eq!(deepfm.description, "Alias of din_content name");
    }

    #[test]
    fn fallback_order_skips_unknown_and_duplicates() {
        let cat = catalog();
        let engine = RecommendationEngine::new(
            cat.clone(),
            vec![
                fixed(&cat, "cf_mf", Err(RecommendError::NoContext("mf".into()))),
                fixed(&cat, "din_content", Ok(vec!["Y"])),
            ],
            order(&["missing", "user_cf", "cf_mf", "din_content"]),
        );
        let rec = engine.recommend(&Seed::Isbn("S".into()), 5, None).unwrap();
        assert_eq!(rec.algorithm.id, "din_content");
    }

    #[test]
    fn seed_by_book_id_resolves_isbn() {
        let cat = catalog();
        let engine = RecommendationEngine::new(
            cat.clone(),
            vec![fixed(&cat, "cf_mf", Ok(vec!["S", "X"]))],
            order(&["cf_mf"]),
        );
        let rec = engine.recommend(&Seed::BookId(10), 5, None).unwrap();
        assert_eq!(rec.seed_isbn, "S");
        let isbns: Vec<&str> = rec.items.iter().map(|s| s.book.isbn.as_str()).collect();
        assert_eq!(isbns, vec!["X"]);

        let err = engine.recommend(&Seed::BookId(999), 5, None).unwrap_err();
        assert_eq!(err.code(), "BOOK_NOT_FOUND");
    }

    #[test]
    fn duplicate_ids_keep_first() {
        let cat = catalog();
        let engine = RecommendationEngine::new(
            cat.clone(),
            vec![fixed(&cat, "cf_mf", Ok(vec!["X"])), fixed(&cat, "cf_mf", Ok(vec!["Y"]))],
            order(&["cf_mf"]),
        );
        assert_eq!(engine.len(), 1);
        let rec = engine.recommend(&Seed::Isbn("S".into()), 5, None).unwrap();
        assert_eq!(rec.items[0].book.isbn, "X");
    }

    #[test]
    fn aliases_resolve_to_installed_ids() {
        assert_eq!(resolve_alias("user_cf"), "cf_mf");
        assert_eq!(resolve_alias("item_cf"), "cf_mf");
        assert_eq!(resolve_alias("deepfm"), "din_content");
        assert_eq!(resolve_alias("lightgbm"), "gbdt_pairwise");
        assert_eq!(resolve_alias("din_content"), "din_content");
        assert_eq!(resolve_alias("nonexistent_algo"), "nonexistent_algo");
    }

    #[test]
    fn engine_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<RecommendationEngine>();
    }

    fn sparse_dataset() -> (Arc<Catalog>, TrainingData) {
        let isbn = |i: usize| format!("isbn-{i:03}");
        let books = (0..30)
            .map(|i| book(i as u64, &isbn(i), &format!("Volume {i}"), &format!("a{}", i % 4)))
            .collect();
        let mut interactions = Vec::new();
        for u in 0..30usize {
            for j in 0..6 {
                interactions.push(crate::data::Interaction {
                    user_id: u as u64 + 1,
                    isbn: isbn((u + j) % 30),
                    rating: 8,
                });
            }
        }
        let data = TrainingData {
            interactions,
            users: Vec::new(),
        };
        (Arc::new(Catalog::new(books)), data)
    }

    #[test]
    fn failed_scorer_is_left_out_and_others_serve() {
        let (cat, data) = sparse_dataset();
        let mut config = EngineConfig::default();
        config.sequential.epochs = 1;
        config.sequential.embed_dim = 8;
        config.sequential.attention_hidden_units = vec![8, 4];
        config.sequential.mlp_hidden_units = vec![8, 4];
        config.pairwise.n_estimators = 5;
        config.pairwise.max_depth = 3;
        config.pairwise.min_samples_leaf = 5;
        // six ratings per user never reach the default 40/40 thresholds

        let engine = RecommendationEngine::initialize(cat, &data, &config, &Device::Cpu);
        assert_eq!(engine.algorithm_ids(), vec!["gbdt_pairwise", "din_content"]);

        let rec = engine
            .recommend(&Seed::Isbn("isbn-000".into()), 3, None)
            .unwrap();
        assert_eq!(rec.algorithm.id, "gbdt_pairwise");
        assert!(!rec.items.is_empty());
        assert!(rec.items.iter().all(|s| s.book.isbn != "isbn-000"));

        let err = engine
            .recommend(&Seed::Isbn("isbn-000".into()), 3, Some("item_cf"))
            .unwrap_err();
        assert_eq!(err.code(), "UNSUPPORTED_ALGORITHM");
    }
}
