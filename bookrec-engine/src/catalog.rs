//! In-memory book catalog.
//!
//! Entries are immutable once loaded. Lookups by ISBN and by book id are
//! O(1); title search is a linear scan over pre-lowercased titles.

use std::collections::HashMap;

use serde::Serialize;

/// One deduplicated catalog entry, keyed by ISBN.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Book {
    #[serde(serialize_with = "serialize_id")]
    pub book_id: u64,
    pub isbn: String,
    pub title: String,
    pub author: String,
    pub publisher: String,
    #[serde(rename = "year_of_publication")]
    pub year: Option<i32>,
    pub image_url_s: String,
    pub image_url_m: String,
    pub image_url_l: String,
}

fn serialize_id<S: serde::Serializer>(id: &u64, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&id.to_string())
}

impl Book {
    /// Title key used for deduplicating result lists.
    pub fn normalized_title(&self) -> String {
        normalize_title(&self.title)
    }
}

/// Trim and lower-case a title.
pub fn normalize_title(title: &str) -> String {
    title.trim().to_lowercase()
}

/// Read-only catalog accessor.
#[derive(Debug, Default)]
pub struct Catalog {
    books: Vec<Book>,
    titles_lower: Vec<String>,
    by_isbn: HashMap<String, usize>,
    by_id: HashMap<u64, usize>,
}

impl Catalog {
    /// Build a catalog from entries in their stable order.
    ///
    /// Later entries with an ISBN or book id already seen are dropped.
    pub fn new(entries: Vec<Book>) -> Self {
        let mut books = Vec::with_capacity(entries.len());
        let mut by_isbn = HashMap::with_capacity(entries.len());
        let mut by_id = HashMap::with_capacity(entries.len());

        for book in entries {
            if by_isbn.contains_key(&book.isbn) || by_id.contains_key(&book.book_id) {
                tracing::debug!(isbn = %book.isbn, "Skipping duplicate catalog entry");
                continue;
            }
            let pos = books.len();
            by_isbn.insert(book.isbn.clone(), pos);
            by_id.insert(book.book_id, pos);
            books.push(book);
        }

        let titles_lower = books.iter().map(|b| b.title.to_lowercase()).collect();

        Self {
            books,
            titles_lower,
            by_isbn,
            by_id,
        }
    }

    pub fn len(&self) -> usize {
        self.books.len()
    }

    pub fn is_empty(&self) -> bool {
        self.books.is_empty()
    }

    pub fn lookup_by_isbn(&self, isbn: &str) -> Option<&Book> {
        self.by_isbn.get(isbn).map(|&pos| &self.books[pos])
    }

    pub fn lookup_by_id(&self, book_id: u64) -> Option<&Book> {
        self.by_id.get(&book_id).map(|&pos| &self.books[pos])
    }

    pub fn contains_isbn(&self, isbn: &str) -> bool {
        self.by_isbn.contains_key(isbn)
    }

    /// All entries in catalog order.
    pub fn all_entries(&self) -> &[Book] {
        &self.books
    }

    /// Case-insensitive substring search over titles, in catalog order.
    pub fn search(&self, query: &str, limit: usize) -> Vec<&Book> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }
        self.titles_lower
            .iter()
            .zip(&self.books)
            .filter(|(title, _)| title.contains(&needle))
            .map(|(_, book)| book)
            .take(limit)
            .collect()
    }

    /// First entry whose lower-cased title equals the trimmed, lower-cased query.
    pub fn find_exact_by_title(&self, title: &str) -> Option<&Book> {
        let needle = title.trim().to_lowercase();
        self.titles_lower
            .iter()
            .position(|t| *t == needle)
            .map(|pos| &self.books[pos])
    }

    /// Titles containing the query, for "did you mean" responses.
    pub fn suggest_titles(&self, query: &str, limit: usize) -> Vec<String> {
        self.search(query, limit)
            .into_iter()
            .map(|b| b.title.clone())
            .collect()
    }
}
