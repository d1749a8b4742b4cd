// ---------------------------------------------------------------------------
// RecommendServer: JSON-RPC dispatcher
// ---------------------------------------------------------------------------
//
// Routes NDJSON requests from stdin to the recommendation engine. The engine
// is fully trained before the server starts and is only read from here.
// ---------------------------------------------------------------------------

use std::io::{self, BufRead};
use std::sync::Arc;

use anyhow::Result;
use serde::de::DeserializeOwned;

use crate::algorithms::{Algorithm, Recommender};
use crate::engine::{RecommendationEngine, Seed};
use crate::error::ServerError;
use crate::protocol::*;
use crate::transport::NdjsonTransport;

const DEFAULT_K: usize = 5;
const SIMILAR_TITLE_LIMIT: usize = 5;

pub struct ServerConfig {
    pub server_name: String,
    pub server_version: String,
}

pub struct RecommendServer<R: Recommender = Algorithm> {
    config: ServerConfig,
    engine: Arc<RecommendationEngine<R>>,
    transport: NdjsonTransport,
}

impl<R: Recommender> RecommendServer<R> {
    pub fn new(
        config: ServerConfig,
        engine: Arc<RecommendationEngine<R>>,
        transport: NdjsonTransport,
    ) -> Self {
        Self {
            config,
            engine,
            transport,
        }
    }

    /// Main loop: read messages from stdin until EOF, dispatch to handlers.
    pub fn run(&self) -> Result<()> {
        self.transport.write_notification(
            "server/ready",
            serde_json::json!({ "algorithms": self.engine.algorithm_ids() }),
        );

        let stdin = io::stdin();
        for line_result in stdin.lock().lines() {
            let line = match line_result {
                Ok(l) => l,
                Err(e) => {
                    tracing::error!("Failed to read stdin: {}", e);
                    break;
                }
            };

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let msg: JsonRpcIncoming = match serde_json::from_str(trimmed) {
                Ok(m) => m,
                Err(e) => {
                    tracing::warn!("Parse error: {}", e);
                    self.transport.write_error(0, PARSE_ERROR, "Parse error: invalid JSON");
                    continue;
                }
            };

            self.handle_message(msg);
        }

        Ok(())
    }

    // ── Dispatch ──────────────────────────────────────────────────────────

    fn handle_message(&self, msg: JsonRpcIncoming) {
        let id = msg.id.unwrap_or(0);
        let Some(method) = msg.method else {
            self.transport.write_error(id, INVALID_REQUEST, "Missing method");
            return;
        };

        match self.dispatch(&method, msg.params) {
            Some(Ok(value)) => self.transport.write_response(id, value),
            Some(Err(e)) => {
                tracing::debug!(method = %method, code = e.code(), "Request failed: {}", e);
                let code = match &e {
                    ServerError::InvalidParams(_) => INVALID_PARAMS,
                    ServerError::Internal(_) => INTERNAL_ERROR,
                    _ => RECOMMEND_ERROR,
                };
                self.transport
                    .write_error_with_data(id, code, e.to_string(), Some(e.to_json_rpc_error()));
            }
            None => self.transport.write_error(
                id,
                METHOD_NOT_FOUND,
                format!("Method not found: {}", method),
            ),
        }
    }

    /// Route one request. `None` means the method is unknown.
    pub fn dispatch(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Option<Result<serde_json::Value, ServerError>> {
        let result = match method {
            "initialize" => self.handle_initialize(),
            "health" => self.handle_health(),
            "algorithms/list" => self.handle_algorithms_list(),
            "recommend" => self.handle_recommend(params),
            "books/search" => self.handle_books_search(params),
            "books/get" => self.handle_books_get(params),
            _ => return None,
        };
        Some(result)
    }

    // ── Handlers ──────────────────────────────────────────────────────────

    fn handle_initialize(&self) -> Result<serde_json::Value, ServerError> {
        to_value(InitializeResult {
            name: self.config.server_name.clone(),
            version: self.config.server_version.clone(),
            total_books: self.engine.catalog().len(),
        })
    }

    fn handle_health(&self) -> Result<serde_json::Value, ServerError> {
        to_value(HealthResult {
            status: "healthy",
            total_books: self.engine.catalog().len(),
            algorithms: self
                .engine
                .list_algorithms()
                .into_iter()
                .map(|a| a.id)
                .collect(),
        })
    }

    fn handle_algorithms_list(&self) -> Result<serde_json::Value, ServerError> {
        to_value(AlgorithmsListResult {
            algorithms: self.engine.list_algorithms(),
        })
    }

    fn handle_recommend(
        &self,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, ServerError> {
        let p: RecommendParams = parse_params(params)?;
        let k = if p.k == 0 { DEFAULT_K } else { p.k };
        let catalog = self.engine.catalog();

        let seed = if let Some(book_id) = p.book_id {
            Seed::BookId(book_id)
        } else if let Some(isbn) = p.isbn.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            Seed::Isbn(isbn.to_string())
        } else if let Some(title) = p.title.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            match catalog.find_exact_by_title(title) {
                Some(book) => Seed::Isbn(book.isbn.clone()),
                None => {
                    return Err(ServerError::TitleNotFound {
                        title: title.to_string(),
                        similar_titles: catalog.suggest_titles(title, SIMILAR_TITLE_LIMIT),
                    })
                }
            }
        } else {
            return Err(ServerError::InvalidParams(
                "one of isbn, bookId or title is required".into(),
            ));
        };

        let query_book = self.engine.resolve_seed(&seed)?.clone();
        let rec = self.engine.recommend(&seed, k, p.algorithm.as_deref())?;

        to_value(RecommendResult {
            query_book,
            recommendations: rec.items.into_iter().map(RecommendedBook::from).collect(),
            algorithm: rec.algorithm,
        })
    }

    fn handle_books_search(
        &self,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, ServerError> {
        let p: BooksSearchParams = parse_params(params)?;
        if p.query.trim().is_empty() {
            return Err(ServerError::InvalidParams("query must not be empty".into()));
        }
        let limit = if p.limit == 0 { 10 } else { p.limit };
        let books = self
            .engine
            .catalog()
            .search(&p.query, limit)
            .into_iter()
            .cloned()
            .collect();
        to_value(BooksSearchResult { books })
    }

    fn handle_books_get(
        &self,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, ServerError> {
        let p: BooksGetParams = parse_params(params)?;
        let book = self.engine.resolve_seed(&Seed::BookId(p.book_id))?.clone();
        to_value(BooksGetResult { book })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_params<T: DeserializeOwned>(params: Option<serde_json::Value>) -> Result<T, ServerError> {
    let value = params.unwrap_or_else(|| serde_json::json!({}));
    serde_json::from_value(value).map_err(|e| ServerError::InvalidParams(e.to_string()))
}

fn to_value(value: impl serde::Serialize) -> Result<serde_json::Value, ServerError> {
    serde_json::to_value(value).map_err(|e| ServerError::Internal(e.to_string()))
}
