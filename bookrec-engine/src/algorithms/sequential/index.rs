use std::collections::HashMap;

use crate::catalog::Catalog;

/// Index reserved for history padding. Never assigned to a book.
pub const PADDING_INDEX: u32 = 0;

/// Bijection between ISBN and a dense item index in `[1, num_items]`,
/// assigned in catalog order.
#[derive(Debug, Clone, Default)]
pub struct ItemIndex {
    isbn_to_index: HashMap<String, u32>,
    isbns: Vec<String>,
}

impl ItemIndex {
    pub fn from_catalog(catalog: &Catalog) -> Self {
        Self::from_isbns(catalog.all_entries().iter().map(|b| b.isbn.as_str()))
    }

    pub fn from_isbns<'a>(isbns: impl IntoIterator<Item = &'a str>) -> Self {
        let mut out = Self::default();
        for isbn in isbns {
            if out.isbn_to_index.contains_key(isbn) {
                continue;
            }
            out.isbns.push(isbn.to_string());
            out.isbn_to_index
                .insert(isbn.to_string(), out.isbns.len() as u32);
        }
        out
    }

    pub fn index_of(&self, isbn: &str) -> Option<u32> {
        self.isbn_to_index.get(isbn).copied()
    }

    pub fn isbn_of(&self, index: u32) -> Option<&str> {
        if index == PADDING_INDEX {
            return None;
        }
        self.isbns.get(index as usize - 1).map(String::as_str)
    }

    /// Number of real items (the embedding table has one extra padding row).
    pub fn num_items(&self) -> usize {
        self.isbns.len()
    }
}
