//! CSV loading for the cleaned catalog, the ratings log and the user table.
//!
//! Column names follow the Book-Crossing dataset
//! (`ISBN`, `Book-Title`, `User-ID`, `Book-Rating`, ...).

use std::collections::HashSet;
use std::io::Read;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::catalog::{Book, Catalog};
use crate::error::DataError;

// ── Records ───────────────────────────────────────────────────────────────

/// One explicit rating, in log order.
#[derive(Debug, Clone, PartialEq)]
pub struct Interaction {
    pub user_id: u64,
    pub isbn: String,
    pub rating: u8,
}

/// Auxiliary per-user attributes used for personalization.
#[derive(Debug, Clone, PartialEq)]
pub struct UserRecord {
    pub user_id: u64,
    pub age: Option<f32>,
}

/// Everything the scorers train on. Read-only once loaded.
#[derive(Debug, Clone, Default)]
pub struct TrainingData {
    pub interactions: Vec<Interaction>,
    pub users: Vec<UserRecord>,
}

/// Locations of the three input tables.
#[derive(Debug, Clone)]
pub struct DataPaths {
    pub books: PathBuf,
    pub ratings: PathBuf,
    pub users: PathBuf,
}

// ── Raw CSV rows ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct BookRow {
    #[serde(rename = "ISBN")]
    isbn: Option<String>,
    #[serde(rename = "Book-Title")]
    title: Option<String>,
    #[serde(rename = "Book-Author")]
    author: Option<String>,
    #[serde(rename = "Year-Of-Publication")]
    year: Option<String>,
    #[serde(rename = "Publisher")]
    publisher: Option<String>,
    #[serde(rename = "Image-URL-S", default)]
    image_url_s: Option<String>,
    #[serde(rename = "Image-URL-M", default)]
    image_url_m: Option<String>,
    #[serde(rename = "Image-URL-L", default)]
    image_url_l: Option<String>,
    #[serde(default)]
    book_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RatingRow {
    #[serde(rename = "User-ID")]
    user_id: u64,
    #[serde(rename = "ISBN")]
    isbn: String,
    #[serde(rename = "Book-Rating")]
    rating: u8,
}

#[derive(Debug, Deserialize)]
struct UserRow {
    #[serde(rename = "User-ID")]
    user_id: u64,
    #[serde(rename = "Age", default)]
    age: Option<String>,
}

// ── Loading ───────────────────────────────────────────────────────────────

/// Load the catalog and the training tables from disk.
pub fn load_dataset(paths: &DataPaths) -> Result<(Catalog, TrainingData), DataError> {
    let catalog = Catalog::new(read_books(open(&paths.books)?)?);
    let interactions = read_ratings(open(&paths.ratings)?)?;
    let users = read_users(open(&paths.users)?)?;

    tracing::info!(
        books = catalog.len(),
        ratings = interactions.len(),
        users = users.len(),
        "Dataset loaded"
    );

    Ok((catalog, TrainingData { interactions, users }))
}

fn open(path: &Path) -> Result<std::fs::File, DataError> {
    if !path.exists() {
        return Err(DataError::MissingFile(path.display().to_string()));
    }
    Ok(std::fs::File::open(path)?)
}

fn reader<R: Read>(source: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_reader(source)
}

fn clean(value: Option<String>) -> String {
    value.map(|v| v.trim().to_string()).unwrap_or_default()
}

fn clean_or_unknown(value: Option<String>) -> String {
    let v = clean(value);
    if v.is_empty() {
        "Unknown".to_string()
    } else {
        v
    }
}

/// Parse a numeric cell that may carry a fractional suffix ("1999", "1999.0").
fn parse_number(value: Option<&str>) -> Option<f64> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .and_then(|v| v.parse::<f64>().ok())
        .filter(|v| v.is_finite())
}

/// Read catalog rows. Rows without a title or ISBN and repeated ISBNs are
/// dropped; `book_id` defaults to the row position when the column is absent.
pub fn read_books<R: Read>(source: R) -> Result<Vec<Book>, DataError> {
    let mut rdr = reader(source);
    let mut books = Vec::new();
    let mut seen = HashSet::new();
    let mut skipped = 0usize;

    for (position, row) in rdr.deserialize::<BookRow>().enumerate() {
        let row = match row {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!(position, "Skipping malformed book row: {}", e);
                skipped += 1;
                continue;
            }
        };

        let isbn = clean(row.isbn);
        let title = clean(row.title);
        if isbn.is_empty() || title.is_empty() || !seen.insert(isbn.clone()) {
            skipped += 1;
            continue;
        }

        let book_id = parse_number(row.book_id.as_deref())
            .map(|v| v as u64)
            .unwrap_or(position as u64);

        books.push(Book {
            book_id,
            isbn,
            title,
            author: clean_or_unknown(row.author),
            publisher: clean_or_unknown(row.publisher),
            year: parse_number(row.year.as_deref()).map(|v| v as i32),
            image_url_s: clean(row.image_url_s),
            image_url_m: clean(row.image_url_m),
            image_url_l: clean(row.image_url_l),
        });
    }

    if skipped > 0 {
        tracing::debug!(skipped, "Catalog rows dropped during load");
    }
    Ok(books)
}

/// Read the ratings log, keeping explicit (non-zero) feedback in file order.
pub fn read_ratings<R: Read>(source: R) -> Result<Vec<Interaction>, DataError> {
    let mut rdr = reader(source);
    let mut out = Vec::new();

    for row in rdr.deserialize::<RatingRow>() {
        let row = match row {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!("Skipping malformed rating row: {}", e);
                continue;
            }
        };
        if row.rating == 0 {
            continue;
        }
        out.push(Interaction {
            user_id: row.user_id,
            isbn: row.isbn.trim().to_string(),
            rating: row.rating,
        });
    }

    Ok(out)
}

/// Read the user table. Empty or non-numeric ages become `None`.
pub fn read_users<R: Read>(source: R) -> Result<Vec<UserRecord>, DataError> {
    let mut rdr = reader(source);
    let mut out = Vec::new();

    for row in rdr.deserialize::<UserRow>() {
        match row {
            Ok(r) => out.push(UserRecord {
                user_id: r.user_id,
                age: parse_number(r.age.as_deref()).map(|a| a as f32),
            }),
            Err(e) => tracing::debug!("Skipping malformed user row: {}", e),
        }
    }

    Ok(out)
}
