use std::collections::{HashMap, HashSet};

use crate::catalog::Catalog;
use crate::data::Interaction;

pub const FEATURE_NAMES: [&str; NUM_FEATURES] = [
    "same_author",
    "same_publisher",
    "year_diff",
    "title_jaccard",
    "rating_count_diff",
    "avg_rating_diff",
    "author_popularity_diff",
    "popularity_mean",
    "year_mean",
];
pub const NUM_FEATURES: usize = 9;

pub type PairFeatures = [f32; NUM_FEATURES];

/// Per-book attributes the pair features are computed from.
#[derive(Debug, Clone, PartialEq)]
pub struct BookMeta {
    pub author: String,
    pub publisher: String,
    /// `None` for unknown or zero years.
    pub year: Option<i32>,
    pub title_tokens: HashSet<String>,
    pub rating_count: f32,
    pub avg_rating: f32,
    pub author_popularity: f32,
}

/// Rating count and mean per ISBN.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RatingStats {
    pub count: usize,
    pub mean: f32,
}

pub fn rating_stats<'a>(
    ratings: impl IntoIterator<Item = &'a Interaction>,
) -> HashMap<String, RatingStats> {
    let mut sums: HashMap<String, (usize, u64)> = HashMap::new();
    for r in ratings {
        let entry = sums.entry(r.isbn.clone()).or_default();
        entry.0 += 1;
        entry.1 += u64::from(r.rating);
    }
    sums.into_iter()
        .map(|(isbn, (count, total))| {
            let mean = total as f32 / count as f32;
            (isbn, RatingStats { count, mean })
        })
        .collect()
}

pub fn tokenize(title: &str) -> HashSet<String> {
    title
        .to_lowercase()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// Metadata for every catalog book; unrated books get zero statistics.
pub fn build_meta(
    catalog: &Catalog,
    stats: &HashMap<String, RatingStats>,
) -> HashMap<String, BookMeta> {
    let mut author_popularity: HashMap<String, f32> = HashMap::new();
    for book in catalog.all_entries() {
        let count = stats.get(&book.isbn).map_or(0, |s| s.count);
        *author_popularity
            .entry(book.author.to_lowercase())
            .or_default() += count as f32;
    }

    catalog
        .all_entries()
        .iter()
        .map(|book| {
            let author = book.author.to_lowercase();
            let s = stats.get(&book.isbn).copied().unwrap_or_default();
            let meta = BookMeta {
                author_popularity: author_popularity.get(&author).copied().unwrap_or(0.0),
                author,
                publisher: book.publisher.to_lowercase(),
                year: book.year.filter(|&y| y != 0),
                title_tokens: tokenize(&book.title),
                rating_count: s.count as f32,
                avg_rating: s.mean,
            };
            (book.isbn.clone(), meta)
        })
        .collect()
}

/// Symmetric similarity features for a book pair. Feature order matches
/// [`FEATURE_NAMES`].
pub fn pair_features(a: &BookMeta, b: &BookMeta) -> PairFeatures {
    let (year_diff, year_mean) = match (a.year, b.year) {
        (Some(x), Some(y)) => {
            let (x, y) = (x as f32, y as f32);
            ((x - y).abs(), (x + y) / 2.0)
        }
        (Some(x), None) | (None, Some(x)) => (0.0, x as f32),
        (None, None) => (0.0, 0.0),
    };

    let intersection = a.title_tokens.intersection(&b.title_tokens).count();
    let union = a.title_tokens.union(&b.title_tokens).count().max(1);

    [
        f32::from(u8::from(a.author == b.author)),
        f32::from(u8::from(a.publisher == b.publisher)),
        year_diff,
        intersection as f32 / union as f32,
        (a.rating_count - b.rating_count).abs(),
        (a.avg_rating - b.avg_rating).abs(),
        (a.author_popularity - b.author_popularity).abs(),
        (a.rating_count + b.rating_count) / 2.0,
        year_mean,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::test_support::book;

    fn meta(author: &str, year: Option<i32>, title: &str, count: f32) -> BookMeta {
        BookMeta {
            author: author.to_string(),
            publisher: "p".to_string(),
            year,
            title_tokens: tokenize(title),
            rating_count: count,
            avg_rating: 7.0,
            author_popularity: count,
        }
    }

    #[test]
    fn features_follow_named_order() {
        let a = meta("rowling", Some(1999), "Harry Potter and the Chamber", 10.0);
        let b = meta("rowling", Some(2003), "Harry Potter and the Phoenix", 4.0);
        let f = pair_features(&a, &b);
        assert_eq!(f[0], 1.0);
        assert_eq!(f[1], 1.0);
        assert_eq!(f[2], 4.0);
        assert!((f[3] - 4.0 / 6.0).abs() < 1e-6);
        assert_eq!(f[4], 6.0);
        assert_eq!(f[5], 0.0);
        assert_eq!(f[6], 6.0);
        assert_eq!(f[7], 7.0);
        assert_eq!(f[8], 2001.0);
    }

    #[test]
    fn missing_years_fall_back() {
        let a = meta("x", None, "a", 0.0);
        let b = meta("y", Some(1980), "b", 0.0);
        let f = pair_features(&a, &b);
        assert_eq!(f[0], 0.0);
        assert_eq!(f[2], 0.0);
        assert_eq!(f[8], 1980.0);
        assert_eq!(pair_features(&a, &a)[8], 0.0);
    }

    #[test]
    fn extreme_years_do_not_overflow() {
        let a = meta("x", Some(i32::MAX), "a", 1.0);
        let b = meta("y", Some(i32::MIN), "b", 1.0);
        let f = pair_features(&a, &b);
        assert!(f[2].is_finite() && f[2] > 4.0e9);
        assert!(f[8].abs() < 1.0);
    }

    #[test]
    fn meta_aggregates_author_popularity() {
        let mut b1 = book(0, "A", "One", "Tolkien");
        b1.year = Some(0);
        let catalog = Catalog::new(vec![
            b1,
            book(1, "B", "Two", "TOLKIEN"),
            book(2, "C", "Three", "Other"),
        ]);
        let ratings = vec![
            Interaction { user_id: 1, isbn: "A".into(), rating: 8 },
            Interaction { user_id: 2, isbn: "A".into(), rating: 6 },
            Interaction { user_id: 1, isbn: "B".into(), rating: 10 },
        ];
        let stats = rating_stats(&ratings);
        assert_eq!(stats["A"], RatingStats { count: 2, mean: 7.0 });

        let meta = build_meta(&catalog, &stats);
        assert_eq!(meta["A"].author_popularity, 3.0);
        assert_eq!(meta["B"].author_popularity, 3.0);
        assert_eq!(meta["C"].rating_count, 0.0);
        assert_eq!(meta["A"].year, None);
    }
}
