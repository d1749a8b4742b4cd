use thiserror::Error;

/// Failures while reading the catalog, ratings or user tables.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("Expected data file is missing: {0}")]
    MissingFile(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DataError {
    /// Return a machine-readable error code string for this error variant.
    pub fn code(&self) -> &str {
        match self {
            Self::MissingFile(_) => "DATA_MISSING_FILE",
            Self::Io(_) => "DATA_IO",
            Self::Csv(_) => "DATA_CSV",
            Self::Json(_) => "DATA_JSON",
        }
    }
}

/// Construction-time failures. Any of these keeps a scorer out of the engine.
#[derive(Debug, Error)]
pub enum InitError {
    #[error("{0} requires positive ratings")]
    NoRatings(&'static str),

    #[error("No overlapping ISBNs between ratings and catalog for {0}")]
    NoCatalogOverlap(&'static str),

    #[error("Not enough users with sufficient histories for {0}")]
    InsufficientHistory(&'static str),

    #[error("{0} candidate pool is empty")]
    EmptyCandidatePool(&'static str),

    #[error("{0} could not create training samples")]
    NoTrainingSamples(&'static str),

    #[error("{0} failed to capture any user contexts")]
    NoContexts(&'static str),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Candle error: {0}")]
    Candle(#[from] candle_core::Error),
}

impl InitError {
    /// Return a machine-readable error code string for this error variant.
    ///
    /// Every variant is fatal for the scorer being built; the code only
    /// distinguishes the cause.
    pub fn code(&self) -> &str {
        match self {
            Self::NoRatings(_) => "INIT_NO_RATINGS",
            Self::NoCatalogOverlap(_) => "INIT_NO_CATALOG_OVERLAP",
            Self::InsufficientHistory(_) => "INIT_INSUFFICIENT_HISTORY",
            Self::EmptyCandidatePool(_) => "INIT_EMPTY_CANDIDATE_POOL",
            Self::NoTrainingSamples(_) => "INIT_NO_TRAINING_SAMPLES",
            Self::NoContexts(_) => "INIT_NO_CONTEXTS",
            Self::Config(_) => "INIT_CONFIG",
            Self::Candle(_) => "INIT_CANDLE",
        }
    }
}

/// Query-time failures surfaced by scorers and the engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecommendError {
    /// The seed has no usable signal in this scorer.
    #[error("{0}")]
    NoContext(String),

    /// Ranking produced nothing after excluding the seed and deduplicating.
    #[error("{0}")]
    EmptyCandidates(String),

    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Book not found: {0}")]
    BookNotFound(String),

    #[error("No algorithms configured")]
    NoAlgorithms,

    /// Scoring backend failure at query time.
    #[error("Inference error: {0}")]
    Inference(String),
}

impl RecommendError {
    /// Return a machine-readable error code string for this error variant.
    pub fn code(&self) -> &str {
        match self {
            Self::NoContext(_) => "NO_CONTEXT",
            Self::EmptyCandidates(_) => "EMPTY_CANDIDATES",
            Self::UnsupportedAlgorithm(_) => "UNSUPPORTED_ALGORITHM",
            Self::BookNotFound(_) => "BOOK_NOT_FOUND",
            Self::NoAlgorithms => "NO_ALGORITHMS",
            Self::Inference(_) => "INFERENCE_ERROR",
        }
    }

    /// Whether the engine's fallback chain may move on to the next scorer.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NoContext(_) | Self::EmptyCandidates(_) | Self::Inference(_)
        )
    }
}

impl From<candle_core::Error> for RecommendError {
    fn from(e: candle_core::Error) -> Self {
        Self::Inference(e.to_string())
    }
}

/// Failures surfaced to JSON-RPC clients.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Invalid params: {0}")]
    InvalidParams(String),

    /// No catalog title matched exactly; `similar_titles` may be empty.
    #[error("No exact title match for '{title}'")]
    TitleNotFound {
        title: String,
        similar_titles: Vec<String>,
    },

    #[error(transparent)]
    Recommend(#[from] RecommendError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Return a machine-readable error code string for this error variant.
    pub fn code(&self) -> &str {
        match self {
            Self::InvalidParams(_) => "INVALID_PARAMS",
            Self::TitleNotFound { .. } => "TITLE_NOT_FOUND",
            Self::Recommend(e) => e.code(),
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Structured `data` member for the JSON-RPC error object.
    pub fn to_json_rpc_error(&self) -> serde_json::Value {
        match self {
            Self::TitleNotFound { similar_titles, .. } => serde_json::json!({
                "code": self.code(),
                "similarTitles": similar_titles,
            }),
            _ => serde_json::json!({ "code": self.code() }),
        }
    }
}
