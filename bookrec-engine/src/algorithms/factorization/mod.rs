//! Collaborative filtering by matrix factorization.
//!
//! User and item embeddings are learned from implicit co-rating signal with
//! a BPR ranking loss; recommendations are the items whose embeddings are
//! closest (cosine) to the seed's.

pub mod similarity;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use candle_core::{Device, Tensor, Var};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{RngExt, SeedableRng};

pub use similarity::{cosine_similarity, EmbeddingTable};

use super::neural::{neg_log_sigmoid, normal_var, Trainer};
use super::{collect_ranked, sort_by_score_desc, AlgorithmInfo, Recommender, ScoredBook};
use crate::catalog::Catalog;
use crate::config::{FactorizationConfig, OptimizerKind};
use crate::data::TrainingData;
use crate::error::{InitError, RecommendError};

const NAME: &str = "Matrix factorization recommender";
const INIT_STD: f32 = 0.1;
const NEGATIVE_REDRAWS: usize = 10;

/// Ratings that survive the popularity filters, as dense indices.
#[derive(Debug, Default)]
pub struct InteractionMatrix {
    pub user_ids: Vec<u64>,
    pub isbns: Vec<String>,
    /// `(user index, item index)` in log order.
    pub pairs: Vec<(u32, u32)>,
}

impl InteractionMatrix {
    /// Keep ratings on catalog books with at least `min_book_ratings`
    /// ratings, then users with at least `min_user_ratings` of those.
    pub fn build(catalog: &Catalog, data: &TrainingData, config: &FactorizationConfig) -> Self {
        let in_catalog: Vec<_> = data
            .interactions
            .iter()
            .filter(|r| catalog.contains_isbn(&r.isbn))
            .collect();

        let mut book_counts: HashMap<&str, usize> = HashMap::new();
        for r in &in_catalog {
            *book_counts.entry(r.isbn.as_str()).or_default() += 1;
        }
        let popular: Vec<_> = in_catalog
            .into_iter()
            .filter(|r| book_counts[r.isbn.as_str()] >= config.min_book_ratings)
            .collect();

        let mut user_counts: HashMap<u64, usize> = HashMap::new();
        for r in &popular {
            *user_counts.entry(r.user_id).or_default() += 1;
        }

        let mut out = Self::default();
        let mut user_index: HashMap<u64, u32> = HashMap::new();
        let mut item_index: HashMap<&str, u32> = HashMap::new();
        for r in popular
            .into_iter()
            .filter(|r| user_counts[&r.user_id] >= config.min_user_ratings)
        {
            let u = *user_index.entry(r.user_id).or_insert_with(|| {
                out.user_ids.push(r.user_id);
                (out.user_ids.len() - 1) as u32
            });
            let i = *item_index.entry(r.isbn.as_str()).or_insert_with(|| {
                out.isbns.push(r.isbn.clone());
                (out.isbns.len() - 1) as u32
            });
            out.pairs.push((u, i));
        }
        out
    }

    pub fn num_users(&self) -> usize {
        self.user_ids.len()
    }

    pub fn num_items(&self) -> usize {
        self.isbns.len()
    }
}

pub struct FactorizationRecommender {
    info: AlgorithmInfo,
    catalog: Arc<Catalog>,
    isbn_to_index: HashMap<String, usize>,
    isbns: Vec<String>,
    item_embeddings: EmbeddingTable,
}

impl FactorizationRecommender {
    pub fn new(
        catalog: Arc<Catalog>,
        data: &TrainingData,
        config: &FactorizationConfig,
        device: &Device,
    ) -> Result<Self, InitError> {
        if data.interactions.is_empty() {
            return Err(InitError::NoRatings(NAME));
        }
        if config.components == 0 || config.batch_size == 0 {
            return Err(InitError::Config(
                "factorization: components and batch_size must be positive".into(),
            ));
        }

        let matrix = InteractionMatrix::build(&catalog, data, config);
        if matrix.pairs.is_empty() {
            return Err(InitError::InsufficientHistory(NAME));
        }
        tracing::info!(
            users = matrix.num_users(),
            items = matrix.num_items(),
            ratings = matrix.pairs.len(),
            "Training matrix factorization"
        );

        let item_embeddings = train_bpr(&matrix, config, device)?;
        let isbn_to_index = matrix
            .isbns
            .iter()
            .enumerate()
            .map(|(i, isbn)| (isbn.clone(), i))
            .collect();

        Ok(Self {
            info: AlgorithmInfo::new(
                super::FACTORIZATION_ID,
                "Matrix Factorization Collaborative Filtering",
                "BPR matrix factorization over explicit ratings",
            ),
            catalog,
            isbn_to_index,
            isbns: matrix.isbns,
            item_embeddings,
        })
    }

    pub fn num_items(&self) -> usize {
        self.isbns.len()
    }
}

impl Recommender for FactorizationRecommender {
    fn info(&self) -> &AlgorithmInfo {
        &self.info
    }

    fn recommend(&self, seed_isbn: &str, k: usize) -> Result<Vec<ScoredBook>, RecommendError> {
        let &seed = self.isbn_to_index.get(seed_isbn).ok_or_else(|| {
            RecommendError::NoContext("Book not available in MF training set".into())
        })?;

        let sims = self.item_embeddings.similarities(seed);
        let mut ranked: Vec<(&str, f32)> = self
            .isbns
            .iter()
            .map(String::as_str)
            .zip(sims)
            .enumerate()
            .filter(|(i, _)| *i != seed)
            .map(|(_, pair)| pair)
            .collect();
        sort_by_score_desc(&mut ranked);

        let results = collect_ranked(&self.catalog, seed_isbn, ranked, k);
        if results.is_empty() {
            return Err(RecommendError::EmptyCandidates(
                "No collaborative filtering matches found".into(),
            ));
        }
        Ok(results)
    }
}

/// Bayesian personalized ranking: for each observed `(user, item)` draw an
/// item the user did not rate and push the observed score above it.
fn train_bpr(
    matrix: &InteractionMatrix,
    config: &FactorizationConfig,
    device: &Device,
) -> Result<EmbeddingTable, InitError> {
    let d = config.components;
    let n_items = matrix.num_items();
    let mut rng = StdRng::seed_from_u64(config.random_state);

    let users = normal_var((matrix.num_users(), d), INIT_STD, &mut rng, device)?;
    let items = normal_var((n_items, d), INIT_STD, &mut rng, device)?;
    let item_bias = Var::zeros(n_items, candle_core::DType::F32, device)?;
    let mut trainer = Trainer::new(
        OptimizerKind::Adam,
        vec![users.clone(), items.clone(), item_bias.clone()],
        config.learning_rate,
    )?;

    let mut rated: Vec<HashSet<u32>> = vec![HashSet::new(); matrix.num_users()];
    for &(u, i) in &matrix.pairs {
        rated[u as usize].insert(i);
    }

    let mut order: Vec<usize> = (0..matrix.pairs.len()).collect();
    for epoch in 0..config.epochs {
        order.shuffle(&mut rng);
        let mut total = 0.0f64;
        let mut batches = 0usize;

        for chunk in order.chunks(config.batch_size) {
            let mut u_idx = Vec::with_capacity(chunk.len());
            let mut pos_idx = Vec::with_capacity(chunk.len());
            let mut neg_idx = Vec::with_capacity(chunk.len());
            for &p in chunk {
                let (u, i) = matrix.pairs[p];
                let mut j = rng.random_range(0..n_items) as u32;
                let mut redraws = 0;
                while rated[u as usize].contains(&j) && redraws < NEGATIVE_REDRAWS {
                    j = rng.random_range(0..n_items) as u32;
                    redraws += 1;
                }
                u_idx.push(u);
                pos_idx.push(i);
                neg_idx.push(j);
            }
            let b = chunk.len();
            let u_idx = Tensor::from_vec(u_idx, b, device)?;
            let pos_idx = Tensor::from_vec(pos_idx, b, device)?;
            let neg_idx = Tensor::from_vec(neg_idx, b, device)?;

            let ue = users.as_tensor().index_select(&u_idx, 0)?;
            let pe = items.as_tensor().index_select(&pos_idx, 0)?;
            let ne = items.as_tensor().index_select(&neg_idx, 0)?;
            let pb = item_bias.as_tensor().index_select(&pos_idx, 0)?;
            let nb = item_bias.as_tensor().index_select(&neg_idx, 0)?;

            let pos_score = ((&ue * &pe)?.sum(1)? + pb)?;
            let neg_score = ((&ue * &ne)?.sum(1)? + nb)?;
            let ranking = neg_log_sigmoid(&(pos_score - neg_score)?)?;
            let norms = ((ue.sqr()?.sum_all()? + pe.sqr()?.sum_all()?)? + ne.sqr()?.sum_all()?)?;
            let loss = (ranking + norms.affine(config.l2_regularization / b as f64, 0.0)?)?;

            trainer.backward_step(&loss)?;
            total += loss.to_scalar::<f32>()? as f64;
            batches += 1;
        }
        let mean = total / batches.max(1) as f64;
        tracing::debug!(epoch = epoch + 1, loss = mean, "MF epoch complete");
    }

    let data = items.as_tensor().flatten_all()?.to_vec1::<f32>()?;
    Ok(EmbeddingTable::new(data, d))
}
