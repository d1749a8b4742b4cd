//! History-aware scorer built on a Deep Interest Network.
//!
//! Construction builds samples from the ratings log, trains the network and
//! caches, per item, the histories in which it was a positive target. At
//! query time every pool candidate is scored against each cached history of
//! the seed and the probabilities are averaged.

mod context;
mod index;
mod model;
mod samples;
mod train;

use std::sync::Arc;

use candle_core::{Device, Tensor};
use rand::rngs::StdRng;
use rand::SeedableRng;

pub use context::{pad_history, ContextStore, HistoryBatch};
pub use index::{ItemIndex, PADDING_INDEX};
pub use model::{masked_softmax, DinModel};
pub use samples::{
    build_training_set, user_feature_map, CapturedContext, TrainingSample, TrainingSet,
};

use super::{collect_ranked, sort_by_score_desc, AlgorithmInfo, Recommender, ScoredBook};
use crate::catalog::Catalog;
use crate::config::SequentialConfig;
use crate::data::TrainingData;
use crate::error::{InitError, RecommendError};

pub(crate) const NAME: &str = "DIN recommender";

/// Counters from the training pass, kept for diagnostics.
#[derive(Debug, Clone, Default)]
pub struct TrainingSummary {
    pub users: usize,
    pub samples: usize,
    pub positives: usize,
    pub items_with_context: usize,
    pub epoch_losses: Vec<f32>,
}

pub struct SequentialRecommender {
    info: AlgorithmInfo,
    catalog: Arc<Catalog>,
    index: ItemIndex,
    model: DinModel,
    contexts: ContextStore,
    candidate_pool: Vec<u32>,
    score_batch_size: usize,
    device: Device,
    summary: TrainingSummary,
}

impl SequentialRecommender {
    /// Build samples, train the network and cache serving contexts.
    pub fn new(
        catalog: Arc<Catalog>,
        data: &TrainingData,
        config: &SequentialConfig,
        device: &Device,
    ) -> Result<Self, InitError> {
        validate(config)?;

        let index = ItemIndex::from_catalog(&catalog);
        let set = build_training_set(&index, data, config)?;

        let mut init_rng = StdRng::seed_from_u64(config.random_state.wrapping_add(1));
        let model = DinModel::new(index.num_items(), config, &mut init_rng, device)?;

        let mut train_rng = StdRng::seed_from_u64(config.random_state.wrapping_add(2));
        let epoch_losses = train::train(&model, &set.samples, config, &mut train_rng, device)?;

        let contexts = ContextStore::build(&set.contexts, config.max_history_length, device)?;
        if contexts.is_empty() {
            return Err(InitError::NoContexts(NAME));
        }

        let summary = TrainingSummary {
            users: set.users,
            samples: set.samples.len(),
            positives: set.positives,
            items_with_context: contexts.len(),
            epoch_losses,
        };
        tracing::info!(
            samples = summary.samples,
            items_with_context = summary.items_with_context,
            pool = set.candidate_pool.len(),
            "DIN recommender ready"
        );

        Ok(Self {
            info: AlgorithmInfo::new(
                super::SEQUENTIAL_ID,
                "DIN Sequential Recommendation",
                "Deep Interest Network scoring candidates against readers' recent histories",
            ),
            catalog,
            index,
            model,
            contexts,
            candidate_pool: set.candidate_pool,
            score_batch_size: config.score_batch_size,
            device: device.clone(),
            summary,
        })
    }

    pub fn summary(&self) -> &TrainingSummary {
        &self.summary
    }

    pub fn candidate_pool_len(&self) -> usize {
        self.candidate_pool.len()
    }

    /// Number of cached serving contexts for `isbn`.
    pub fn context_count(&self, isbn: &str) -> usize {
        self.index
            .index_of(isbn)
            .map_or(0, |idx| self.contexts.context_count(idx))
    }

    /// Mean probability of each candidate across all `contexts` rows,
    /// `batch_size` candidates per forward pass.
    fn score_candidates(
        &self,
        contexts: &HistoryBatch,
        candidates: &[u32],
        batch_size: usize,
    ) -> candle_core::Result<Vec<f32>> {
        let per_candidate = contexts.rows();
        let mut scores = Vec::with_capacity(candidates.len());

        for chunk in candidates.chunks(batch_size.max(1)) {
            let targets: Vec<u32> = chunk
                .iter()
                .flat_map(|&c| std::iter::repeat(c).take(per_candidate))
                .collect();
            let targets = Tensor::from_vec(targets, chunk.len() * per_candidate, &self.device)?;
            let batch = contexts.tile(chunk.len())?;

            let logits = self.model.forward(&targets, &batch, None)?;
            let probs = candle_nn::ops::sigmoid(&logits)?
                .reshape((chunk.len(), per_candidate))?
                .mean(1)?;
            scores.extend(probs.to_vec1::<f32>()?);
        }

        Ok(scores)
    }
}

impl Recommender for SequentialRecommender {
    fn info(&self) -> &AlgorithmInfo {
        &self.info
    }

    fn recommend(&self, seed_isbn: &str, k: usize) -> Result<Vec<ScoredBook>, RecommendError> {
        let seed = self
            .index
            .index_of(seed_isbn)
            .ok_or_else(|| RecommendError::NoContext("Book not found in DIN index".into()))?;
        let contexts = self.contexts.get(seed).ok_or_else(|| {
            RecommendError::NoContext("DIN model has no behavioral context for this book".into())
        })?;

        let candidates: Vec<u32> = self
            .candidate_pool
            .iter()
            .copied()
            .filter(|&c| c != seed)
            .collect();
        if candidates.is_empty() {
            return Err(RecommendError::EmptyCandidates(
                "DIN candidate pool is empty after filtering".into(),
            ));
        }

        let scores = self.score_candidates(contexts, &candidates, self.score_batch_size)?;
        let mut ranked: Vec<(&str, f32)> = candidates
            .iter()
            .zip(scores)
            .filter_map(|(&c, score)| self.index.isbn_of(c).map(|isbn| (isbn, score)))
            .collect();
        sort_by_score_desc(&mut ranked);

        let results = collect_ranked(&self.catalog, seed_isbn, ranked, k);
        if results.is_empty() {
            return Err(RecommendError::EmptyCandidates(
                "DIN recommender returned empty results".into(),
            ));
        }
        Ok(results)
    }
}

fn validate(config: &SequentialConfig) -> Result<(), InitError> {
    let fail = |msg: &str| Err(InitError::Config(format!("sequential: {msg}")));
    if config.max_history_length == 0 {
        return fail("max_history_length must be positive");
    }
    if config.min_history_length > config.max_history_length {
        return fail("min_history_length exceeds max_history_length");
    }
    if config.embed_dim == 0 {
        return fail("embed_dim must be positive");
    }
    if config.batch_size == 0 || config.score_batch_size == 0 {
        return fail("batch sizes must be positive");
    }
    if config.max_contexts_per_item == 0 {
        return fail("max_contexts_per_item must be positive");
    }
    if !(0.0..1.0).contains(&config.dropout) {
        return fail("dropout must be in [0, 1)");
    }
    if config.learning_rate <= 0.0 {
        return fail("learning_rate must be positive");
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::catalog::test_support::book;
    use crate::catalog::Catalog;
    use crate::config::SequentialConfig;
    use crate::data::{Interaction, TrainingData, UserRecord};

    pub fn small_config() -> SequentialConfig {
        SequentialConfig {
            max_history_length: 5,
            min_history_length: 2,
            negative_samples: 2,
            batch_size: 64,
            epochs: 1,
            embed_dim: 8,
            attention_hidden_units: vec![8, 4],
            mlp_hidden_units: vec![8, 4],
            candidate_pool_size: 500,
            score_batch_size: 64,
            ..SequentialConfig::default()
        }
    }

    pub fn isbn(i: usize) -> String {
        format!("isbn-{i:04}")
    }

    fn catalog(num_books: usize) -> Catalog {
        Catalog::new(
            (0..num_books)
                .map(|i| book(i as u64, &isbn(i), &format!("Book {i}"), &format!("Author {}", i % 7)))
                .collect(),
        )
    }

    /// Each user reads eight consecutive books, offset by five per user.
    /// Ages are distinct per user.
    pub fn chain_dataset(num_books: usize, num_users: usize) -> (Catalog, TrainingData) {
        let mut interactions = Vec::new();
        let mut users = Vec::new();
        for u in 0..num_users {
            for j in 0..8 {
                interactions.push(Interaction {
                    user_id: u as u64,
                    isbn: isbn((u * 5 + j) % num_books),
                    rating: 8,
                });
            }
            users.push(UserRecord {
                user_id: u as u64,
                age: Some(20.0 + u as f32),
            });
        }
        (catalog(num_books), TrainingData { interactions, users })
    }

    /// User `u` reads books `2u, 2u + 1, 2u + 2` (wrapping), so every even
    /// book is a positive target with a history of two exactly once.
    pub fn sliding_dataset(num_books: usize) -> (Catalog, TrainingData) {
        let mut interactions = Vec::new();
        for u in 0..num_books / 2 {
            for j in 0..3 {
                interactions.push(Interaction {
                    user_id: u as u64,
                    isbn: isbn((2 * u + j) % num_books),
                    rating: 9,
                });
            }
        }
        (
            catalog(num_books),
            TrainingData {
                interactions,
                users: Vec::new(),
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{chain_dataset, isbn, sliding_dataset, small_config};
    use super::*;
    use std::collections::HashSet;

    fn build(catalog: Catalog, data: &TrainingData) -> SequentialRecommender {
        SequentialRecommender::new(Arc::new(catalog), data, &small_config(), &Device::Cpu).unwrap()
    }

    #[test]
    fn single_context_seed_ranks_the_rest_of_the_pool() {
        let (catalog, data) = sliding_dataset(500);
        let rec = build(catalog, &data);
        let seed = isbn(4);
        assert_eq!(rec.candidate_pool_len(), 500);
        assert_eq!(rec.context_count(&seed), 1);

        let all = rec.recommend(&seed, 1000).unwrap();
        assert_eq!(all.len(), 499);
        assert!(all.windows(2).all(|w| w[0].score >= w[1].score));
        assert!(all.iter().all(|s| s.book.isbn != seed));

        let top = rec.recommend(&seed, 10).unwrap();
        assert_eq!(top.len(), 10);
        assert_eq!(top, all[..10].to_vec());
    }

    #[test]
    fn batching_does_not_change_scores() {
        let (catalog, data) = chain_dataset(60, 12);
        let rec = build(catalog, &data);
        let seed = rec
            .index
            .index_of(&isbn(7))
            .filter(|&idx| rec.contexts.context_count(idx) > 0)
            .unwrap();
        let contexts = rec.contexts.get(seed).unwrap();
        let candidates: Vec<u32> = rec.candidate_pool.clone();

        let one = rec.score_candidates(contexts, &candidates, 1).unwrap();
        let some = rec.score_candidates(contexts, &candidates, 7).unwrap();
        let all = rec.score_candidates(contexts, &candidates, 10_000).unwrap();
        for ((a, b), c) in one.iter().zip(&some).zip(&all) {
            assert!((a - b).abs() < 1e-5);
            assert!((a - c).abs() < 1e-5);
            assert!((0.0..=1.0).contains(a));
        }
    }

    #[test]
    fn serving_is_idempotent_and_deduplicated() {
        let (catalog, data) = chain_dataset(60, 12);
        let rec = build(catalog, &data);
        let first = rec.recommend(&isbn(7), 20).unwrap();
        let second = rec.recommend(&isbn(7), 20).unwrap();
        assert_eq!(first, second);

        let titles: HashSet<String> = first.iter().map(|s| s.book.normalized_title()).collect();
        assert_eq!(titles.len(), first.len());
    }

    #[test]
    fn training_is_reproducible() {
        let (catalog, data) = chain_dataset(60, 12);
        let a = build(catalog, &data);
        let (catalog, data) = chain_dataset(60, 12);
        let b = build(catalog, &data);
        assert_eq!(a.summary().samples, b.summary().samples);
        assert_eq!(a.summary().epoch_losses, b.summary().epoch_losses);
        assert_eq!(a.candidate_pool, b.candidate_pool);
    }

    #[test]
    fn missing_signal_is_no_context() {
        let (catalog, data) = sliding_dataset(40);
        let rec = build(catalog, &data);

        let err = rec.recommend("not-an-isbn", 5).unwrap_err();
        assert_eq!(err, RecommendError::NoContext("Book not found in DIN index".into()));

        // Odd books only ever appear with a one-item history.
        let err = rec.recommend(&isbn(3), 5).unwrap_err();
        assert_eq!(
            err.to_string(),
            "DIN model has no behavioral context for this book"
        );
    }

    #[test]
    fn zero_k_is_empty_candidates() {
        let (catalog, data) = sliding_dataset(40);
        let rec = build(catalog, &data);
        let err = rec.recommend(&isbn(4), 0).unwrap_err();
        assert_eq!(err.code(), "EMPTY_CANDIDATES");
    }

    #[test]
    fn invalid_config_is_rejected() {
        let (catalog, data) = sliding_dataset(40);
        let mut config = small_config();
        config.min_history_length = 10;
        let err = SequentialRecommender::new(Arc::new(catalog), &data, &config, &Device::Cpu)
            .err()
            .unwrap();
        assert_eq!(err.code(), "INIT_CONFIG");
    }

    #[test]
    fn info_uses_din_identity() {
        let (catalog, data) = sliding_dataset(40);
        let rec = build(catalog, &data);
        assert_eq!(rec.info().id, "din_content");
        assert_eq!(rec.info().name, "DIN Sequential Recommendation");
    }
}
