pub mod factorization;
pub mod neural;
pub mod pairwise;
pub mod sequential;

use std::collections::HashSet;

use serde::Serialize;

use crate::catalog::{Book, Catalog};
use crate::error::RecommendError;

pub use factorization::FactorizationRecommender;
pub use pairwise::PairwiseRecommender;
pub use sequential::SequentialRecommender;

pub const PAIRWISE_ID: &str = "gbdt_pairwise";
pub const SEQUENTIAL_ID: &str = "din_content";
pub const FACTORIZATION_ID: &str = "cf_mf";

// ── Contract ──────────────────────────────────────────────────────────────

/// Static identity of a scorer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlgorithmInfo {
    pub id: String,
    pub name: String,
    pub description: String,
}

impl AlgorithmInfo {
    pub fn new(id: &str, name: &str, description: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
        }
    }
}

/// A catalog entry with the score that ranked it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredBook {
    #[serde(flatten)]
    pub book: Book,
    pub score: f32,
}

/// Shared interface every scorer implements.
///
/// All training happens at construction; `recommend` is a pure read.
pub trait Recommender: Send + Sync {
    fn info(&self) -> &AlgorithmInfo;

    /// Rank up to `k` books similar to `seed_isbn`, best first, with no two
    /// results sharing a normalized title.
    fn recommend(&self, seed_isbn: &str, k: usize) -> Result<Vec<ScoredBook>, RecommendError>;
}

// ── Installed scorers ────────────────────────────────────────────────────

/// Closed set of scorers the engine can host.
pub enum Algorithm {
    Pairwise(PairwiseRecommender),
    Sequential(SequentialRecommender),
    Factorization(FactorizationRecommender),
}

impl Recommender for Algorithm {
    fn info(&self) -> &AlgorithmInfo {
        match self {
            Self::Pairwise(r) => r.info(),
            Self::Sequential(r) => r.info(),
            Self::Factorization(r) => r.info(),
        }
    }

    fn recommend(&self, seed_isbn: &str, k: usize) -> Result<Vec<ScoredBook>, RecommendError> {
        match self {
            Self::Pairwise(r) => r.recommend(seed_isbn, k),
            Self::Sequential(r) => r.recommend(seed_isbn, k),
            Self::Factorization(r) => r.recommend(seed_isbn, k),
        }
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────

/// Turn `(isbn, score)` pairs that are already sorted best-first into at
/// most `k` catalog results.
///
/// Skips the seed, ISBNs missing from the catalog, and any title already
/// emitted (trimmed, lower-cased).
pub fn collect_ranked<'a, I>(
    catalog: &Catalog,
    seed_isbn: &str,
    ranked: I,
    k: usize,
) -> Vec<ScoredBook>
where
    I: IntoIterator<Item = (&'a str, f32)>,
{
    let mut seen_titles = HashSet::new();
    let mut out = Vec::with_capacity(k.min(64));

    for (isbn, score) in ranked {
        if out.len() >= k {
            break;
        }
        if isbn == seed_isbn {
            continue;
        }
        let Some(book) = catalog.lookup_by_isbn(isbn) else {
            continue;
        };
        if !seen_titles.insert(book.normalized_title()) {
            continue;
        }
        out.push(ScoredBook {
            book: book.clone(),
            score,
        });
    }

    out
}

/// Stable descending sort by score; NaN sorts last.
pub(crate) fn sort_by_score_desc<T>(items: &mut [(T, f32)]) {
    items.sort_by(|a, b| match (a.1.is_nan(), b.1.is_nan()) {
        (false, false) => b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal),
        (true, false) => std::cmp::Ordering::Greater,
        (false, true) => std::cmp::Ordering::Less,
        (true, true) => std::cmp::Ordering::Equal,
    });
}
