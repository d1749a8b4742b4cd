use serde::{Deserialize, Deserializer, Serialize};

use crate::algorithms::{AlgorithmInfo, ScoredBook};
use crate::catalog::Book;
use crate::engine::AlgorithmRef;

// ── JSON-RPC 2.0 error codes ──────────────────────────────────────────────

pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;

/// Application error: a recommendation or lookup failed. `data.code` carries
/// the typed error code.
pub const RECOMMEND_ERROR: i32 = -32000;

// ── JSON-RPC 2.0 framing ──────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct JsonRpcIncoming {
    #[allow(dead_code)]
    pub jsonrpc: String,
    pub id: Option<u64>,
    pub method: Option<String>,
    pub params: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: &'static str,
    pub id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: &'static str,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

// ── initialize ────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub name: String,
    pub version: String,
    pub total_books: usize,
}

// ── health ────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResult {
    pub status: &'static str,
    pub total_books: usize,
    pub algorithms: Vec<String>,
}

// ── algorithms/list ───────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct AlgorithmsListResult {
    pub algorithms: Vec<AlgorithmInfo>,
}

// ── book ids ──────────────────────────────────────────────────────────────
//
// `Book` keeps the catalog payload shape on the wire (snake_case keys, string
// `book_id`); only the envelopes around it are camelCase. Incoming `bookId`
// accepts the string form echoed back from `books/search` or `queryBook`, as
// well as a plain number.

#[derive(Deserialize)]
#[serde(untagged)]
enum BookIdRepr {
    Number(u64),
    Text(String),
}

impl BookIdRepr {
    fn into_id<E: serde::de::Error>(self) -> Result<u64, E> {
        match self {
            Self::Number(id) => Ok(id),
            Self::Text(text) => text
                .trim()
                .parse()
                .map_err(|_| E::custom(format!("invalid book id: {text:?}"))),
        }
    }
}

fn book_id<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
    BookIdRepr::deserialize(d)?.into_id()
}

fn optional_book_id<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u64>, D::Error> {
    Option::<BookIdRepr>::deserialize(d)?
        .map(BookIdRepr::into_id)
        .transpose()
}

// ── recommend ─────────────────────────────────────────────────────────────

fn default_k() -> usize {
    5
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendParams {
    pub isbn: Option<String>,
    #[serde(default, deserialize_with = "optional_book_id")]
    pub book_id: Option<u64>,
    pub title: Option<String>,
    #[serde(default = "default_k")]
    pub k: usize,
    pub algorithm: Option<String>,
}

/// A recommended book with its score rounded for the wire.
#[derive(Debug, Serialize)]
pub struct RecommendedBook {
    #[serde(flatten)]
    pub book: Book,
    pub score: f64,
}

impl From<ScoredBook> for RecommendedBook {
    fn from(scored: ScoredBook) -> Self {
        Self {
            book: scored.book,
            score: round_score(scored.score),
        }
    }
}

/// Round to four decimal places.
pub fn round_score(score: f32) -> f64 {
    (f64::from(score) * 10_000.0).round() / 10_000.0
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendResult {
    pub query_book: Book,
    pub recommendations: Vec<RecommendedBook>,
    pub algorithm: AlgorithmRef,
}

// ── books/search, books/get ───────────────────────────────────────────────

fn default_limit() -> usize {
    10
}

#[derive(Debug, Deserialize)]
pub struct BooksSearchParams {
    pub query: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

#[derive(Debug, Serialize)]
pub struct BooksSearchResult {
    pub books: Vec<Book>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BooksGetParams {
    #[serde(deserialize_with = "book_id")]
    pub book_id: u64,
}

#[derive(Debug, Serialize)]
pub struct BooksGetResult {
    pub book: Book,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recommend_params_defaults() {
        let p: RecommendParams = serde_json::from_str(r#"{"isbn":"123"}"#).unwrap();
        assert_eq!(p.isbn.as_deref(), Some("123"));
        assert_eq!(p.k, 5);
        assert!(p.book_id.is_none());
        assert!(p.algorithm.is_none());

        let p: RecommendParams =
            serde_json::from_str(r#"{"bookId":7,"k":3,"algorithm":"deepfm"}"#).unwrap();
        assert_eq!(p.book_id, Some(7));
        assert_eq!(p.k, 3);
        assert_eq!(p.algorithm.as_deref(), Some("deepfm"));
    }

    #[test]
    fn scores_round_to_four_places() {
        assert!((round_score(0.123456) - 0.1235).abs() < 1e-12);
        assert!((round_score(1.0) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn error_response_omits_result() {
        let resp = JsonRpcResponse {
            jsonrpc: "2.0",
            id: 4,
            result: None,
            error: Some(JsonRpcError {
                code: RECOMMEND_ERROR,
                message: "nope".into(),
                data: Some(serde_json::json!({"code": "NO_CONTEXT"})),
            }),
        };
        let v = serde_json::to_value(&resp).unwrap();
        assert!(v.get("result").is_none());
        assert_eq!(v["error"]["code"], -32000);
        assert_eq!(v["error"]["data"]["code"], "NO_CONTEXT");
    }

    #[test]
    fn book_id_accepts_string_or_number() {
        let p: BooksGetParams = serde_json::from_str(r#"{"bookId":"42"}"#).unwrap();
        assert_eq!(p.book_id, 42);
        let p: BooksGetParams = serde_json::from_str(r#"{"bookId":42}"#).unwrap();
        assert_eq!(p.book_id, 42);
        assert!(serde_json::from_str::<BooksGetParams>(r#"{"bookId":"forty"}"#).is_err());

        let p: RecommendParams = serde_json::from_str(r#"{"bookId":"7"}"#).unwrap();
        assert_eq!(p.book_id, Some(7));
        let p: RecommendParams = serde_json::from_str(r#"{"bookId":null,"isbn":"1"}"#).unwrap();
        assert_eq!(p.book_id, None);
    }

    #[test]
    fn book_payload_keeps_catalog_keys() {
        let book = crate::catalog::test_support::book(7, "123", "Emma", "Austen");
        let v = serde_json::to_value(RecommendedBook { book, score: 0.5 }).unwrap();
        assert_eq!(v["book_id"], "7");
        assert_eq!(v["year_of_publication"], 2000);
        assert!(v.get("image_url_s").is_some());
        assert!(v.get("bookId").is_none());
        assert_eq!(v["score"], 0.5);
    }

    #[test]
    fn search_limit_defaults_to_ten() {
        let p: BooksSearchParams = serde_json::from_str(r#"{"query":"harry"}"#).unwrap();
        assert_eq!(p.limit, 10);
    }
}
