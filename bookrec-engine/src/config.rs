use std::path::{Path, PathBuf};

use clap::Parser;
use serde::Deserialize;

use crate::algorithms::{FACTORIZATION_ID, PAIRWISE_ID, SEQUENTIAL_ID};
use crate::error::DataError;

#[derive(Parser, Debug)]
#[command(
    name = "bookrec-engine",
    about = "Book recommendation engine serving JSON-RPC over stdio"
)]
pub struct CliArgs {
    /// Cleaned books CSV (ISBN, Book-Title, Book-Author, ...)
    #[arg(long, default_value = "data/processed/cleaned_books.csv", env = "BOOKREC_BOOKS")]
    pub books: PathBuf,

    /// Ratings CSV (User-ID, ISBN, Book-Rating)
    #[arg(long, default_value = "data/raw/Ratings.csv", env = "BOOKREC_RATINGS")]
    pub ratings: PathBuf,

    /// Users CSV (User-ID, Location, Age)
    #[arg(long, default_value = "data/raw/Users.csv", env = "BOOKREC_USERS")]
    pub users: PathBuf,

    /// JSON file overriding training hyper-parameters
    #[arg(long, env = "BOOKREC_TUNING")]
    pub tuning: Option<PathBuf>,

    /// Comma-separated algorithm ids to build (default: all)
    #[arg(long, value_delimiter = ',')]
    pub algorithms: Vec<String>,

    /// Device: "cpu", "cuda", "metal"
    #[arg(long, default_value = "cpu", env = "BOOKREC_DEVICE")]
    pub device: String,

    /// CUDA device ordinal (when --device cuda)
    #[arg(long, default_value = "0")]
    pub device_id: usize,

    /// Server name in the initialize response
    #[arg(long, default_value = "bookrec-engine")]
    pub server_name: String,

    /// Server version
    #[arg(long, default_value = env!("CARGO_PKG_VERSION"))]
    pub server_version: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "BOOKREC_LOG_LEVEL")]
    pub log_level: String,
}

// ── Hyper-parameters ─────────────────────────────────────────────────────

/// Optimizer used for the neural scorers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerKind {
    Adam,
    Sgd,
}

/// Sequential (DIN) scorer settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SequentialConfig {
    pub max_users: usize,
    pub min_history_length: usize,
    pub max_history_length: usize,
    pub negative_samples: usize,
    pub max_training_samples: usize,
    pub batch_size: usize,
    pub epochs: usize,
    pub learning_rate: f64,
    pub optimizer: OptimizerKind,
    pub embed_dim: usize,
    pub attention_hidden_units: Vec<usize>,
    pub mlp_hidden_units: Vec<usize>,
    pub dropout: f32,
    pub random_state: u64,
    pub min_positive_rating: u8,
    pub max_contexts_per_item: usize,
    pub score_batch_size: usize,
    pub candidate_pool_size: usize,
}

impl Default for SequentialConfig {
    fn default() -> Self {
        Self {
            max_users: 8000,
            min_history_length: 2,
            max_history_length: 20,
            negative_samples: 2,
            max_training_samples: 120_000,
            batch_size: 256,
            epochs: 3,
            learning_rate: 1e-3,
            optimizer: OptimizerKind::Adam,
            embed_dim: 64,
            attention_hidden_units: vec![80, 40],
            mlp_hidden_units: vec![128, 64],
            dropout: 0.1,
            random_state: 42,
            min_positive_rating: 6,
            max_contexts_per_item: 24,
            score_batch_size: 256,
            candidate_pool_size: 1500,
        }
    }
}

/// Pairwise gradient-boosting scorer settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PairwiseConfig {
    pub max_pairs: usize,
    pub max_books_per_user: usize,
    pub candidate_pool_size: usize,
    pub random_state: u64,
    pub validation_fraction: f64,
    pub n_estimators: usize,
    pub learning_rate: f32,
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    pub l2_regularization: f32,
    pub subsample: f64,
    pub feature_fraction: f64,
    pub max_bins: usize,
}

impl Default for PairwiseConfig {
    fn default() -> Self {
        Self {
            max_pairs: 60_000,
            max_books_per_user: 25,
            candidate_pool_size: 2000,
            random_state: 42,
            validation_fraction: 0.2,
            n_estimators: 400,
            learning_rate: 0.08,
            max_depth: 6,
            min_samples_leaf: 20,
            l2_regularization: 1.0,
            subsample: 0.8,
            feature_fraction: 0.9,
            max_bins: 64,
        }
    }
}

/// Matrix-factorization scorer settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FactorizationConfig {
    pub min_book_ratings: usize,
    pub min_user_ratings: usize,
    pub components: usize,
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub l2_regularization: f64,
    pub random_state: u64,
}

impl Default for FactorizationConfig {
    fn default() -> Self {
        Self {
            min_book_ratings: 40,
            min_user_ratings: 40,
            components: 32,
            epochs: 40,
            batch_size: 1024,
            learning_rate: 0.01,
            l2_regularization: 1e-5,
            random_state: 42,
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Algorithms to build, in registration order.
    pub algorithms: Vec<String>,
    /// Order tried when no algorithm is requested explicitly.
    pub fallback_order: Vec<String>,
    pub sequential: SequentialConfig,
    pub pairwise: PairwiseConfig,
    pub factorization: FactorizationConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let all = vec![
            PAIRWISE_ID.to_string(),
            SEQUENTIAL_ID.to_string(),
            FACTORIZATION_ID.to_string(),
        ];
        Self {
            algorithms: all.clone(),
            fallback_order: all,
            sequential: SequentialConfig::default(),
            pairwise: PairwiseConfig::default(),
            factorization: FactorizationConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load a tuning file. Missing keys keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self, DataError> {
        if !path.exists() {
            return Err(DataError::MissingFile(path.display().to_string()));
        }
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Whether the given algorithm id should be constructed.
    pub fn is_enabled(&self, id: &str) -> bool {
        self.algorithms.iter().any(|a| a == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_constants() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.sequential.max_history_length, 20);
        assert_eq!(cfg.sequential.attention_hidden_units, vec![80, 40]);
        assert_eq!(cfg.sequential.candidate_pool_size, 1500);
        assert_eq!(cfg.pairwise.candidate_pool_size, 2000);
        assert_eq!(cfg.factorization.components, 32);
        assert_eq!(
            cfg.fallback_order,
            vec!["gbdt_pairwise", "din_content", "cf_mf"]
        );
    }

    #[test]
    fn partial_tuning_keeps_defaults() {
        let cfg: EngineConfig = serde_json::from_str(
            r#"{"sequential": {"epochs": 1, "optimizer": "sgd"}, "algorithms": ["din_content"]}"#,
        )
        .unwrap();
        assert_eq!(cfg.sequential.epochs, 1);
        assert_eq!(cfg.sequential.optimizer, OptimizerKind::Sgd);
        assert_eq!(cfg.sequential.embed_dim, 64);
        assert!(cfg.is_enabled("din_content"));
        assert!(!cfg.is_enabled("cf_mf"));
        assert_eq!(cfg.fallback_order.len(), 3);
    }

    #[test]
    fn cli_parses_algorithm_list() {
        let args = CliArgs::parse_from([
            "bookrec-engine",
            "--algorithms",
            "din_content,cf_mf",
            "--books",
            "b.csv",
        ]);
        assert_eq!(args.algorithms, vec!["din_content", "cf_mf"]);
        assert_eq!(args.books, PathBuf::from("b.csv"));
    }
}
