use std::collections::{BTreeMap, HashMap, HashSet};

use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};

use super::index::ItemIndex;
use super::NAME;
use crate::config::SequentialConfig;
use crate::data::{TrainingData, UserRecord};
use crate::error::InitError;

const AGE_MIN: f32 = 5.0;
const AGE_MAX: f32 = 90.0;
const UNKNOWN_USER_FEATURE: f32 = 0.5;

/// One labelled `(history, target)` example.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingSample {
    /// Chronological item indices, oldest first, never padded.
    pub history: Vec<u32>,
    pub target: u32,
    pub label: f32,
    pub user_feature: f32,
}

/// A positive observation kept for serving.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedContext {
    pub history: Vec<u32>,
    pub user_feature: f32,
}

/// Output of sample construction.
#[derive(Debug, Default)]
pub struct TrainingSet {
    pub samples: Vec<TrainingSample>,
    /// Contexts keyed by target item index, in capture order.
    pub contexts: HashMap<u32, Vec<CapturedContext>>,
    /// Item indices ordered by popularity among kept users.
    pub candidate_pool: Vec<u32>,
    pub users: usize,
    pub positives: usize,
}

/// Normalized age feature per user.
///
/// Ages are clipped to `[5, 90]`, missing ones take the median, then the
/// values are min-max scaled with the range floored at one year.
pub fn user_feature_map(users: &[UserRecord]) -> HashMap<u64, f32> {
    let mut known: Vec<f32> = users
        .iter()
        .filter_map(|u| u.age)
        .map(|a| a.clamp(AGE_MIN, AGE_MAX))
        .collect();
    if known.is_empty() {
        return users
            .iter()
            .map(|u| (u.user_id, UNKNOWN_USER_FEATURE))
            .collect();
    }
    known.sort_by(f32::total_cmp);
    let mid = known.len() / 2;
    let median = if known.len() % 2 == 0 {
        (known[mid - 1] + known[mid]) / 2.0
    } else {
        known[mid]
    };

    let ages: Vec<(u64, f32)> = users
        .iter()
        .map(|u| {
            let age = u.age.map(|a| a.clamp(AGE_MIN, AGE_MAX)).unwrap_or(median);
            (u.user_id, age)
        })
        .collect();
    let lo = ages.iter().map(|(_, a)| *a).fold(f32::INFINITY, f32::min);
    let hi = ages.iter().map(|(_, a)| *a).fold(f32::NEG_INFINITY, f32::max);
    let range = (hi - lo).max(1.0);

    ages.into_iter()
        .map(|(id, age)| (id, (age - lo) / range))
        .collect()
}

/// Turn the ratings log into training samples, serving contexts and the
/// candidate pool. Deterministic for a fixed `random_state`.
pub fn build_training_set(
    index: &ItemIndex,
    data: &TrainingData,
    config: &SequentialConfig,
) -> Result<TrainingSet, InitError> {
    let positives: Vec<(u64, &str)> = data
        .interactions
        .iter()
        .filter(|i| i.rating >= config.min_positive_rating)
        .map(|i| (i.user_id, i.isbn.as_str()))
        .collect();
    if positives.is_empty() {
        return Err(InitError::NoRatings(NAME));
    }

    let indexed: Vec<(u64, u32)> = positives
        .iter()
        .filter_map(|&(user, isbn)| index.index_of(isbn).map(|idx| (user, idx)))
        .collect();
    if indexed.is_empty() {
        return Err(InitError::NoCatalogOverlap(NAME));
    }

    // Per-user sequences in log order.
    let mut sequences: BTreeMap<u64, Vec<u32>> = BTreeMap::new();
    for &(user, item) in &indexed {
        sequences.entry(user).or_default().push(item);
    }

    let mut ranked: Vec<(u64, usize)> = sequences
        .iter()
        .filter(|(_, seq)| seq.len() > config.min_history_length)
        .map(|(&user, seq)| (user, seq.len()))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    ranked.truncate(config.max_users);
    if ranked.is_empty() {
        return Err(InitError::InsufficientHistory(NAME));
    }
    let kept: HashSet<u64> = ranked.iter().map(|(u, _)| *u).collect();

    let candidate_pool = popularity_pool(
        indexed
            .iter()
            .filter(|(user, _)| kept.contains(user))
            .map(|(_, item)| *item),
        config.candidate_pool_size,
    );
    if candidate_pool.is_empty() {
        return Err(InitError::EmptyCandidatePool(NAME));
    }

    let features = user_feature_map(&data.users);
    let mut rng = StdRng::seed_from_u64(config.random_state);
    let mut out = TrainingSet {
        candidate_pool,
        users: kept.len(),
        ..Default::default()
    };
    let max_draws = config.negative_samples * 4;
    let cap = config.max_training_samples;

    'users: for (user, sequence) in sequences.iter().filter(|(u, _)| kept.contains(u)) {
        let user_feature = features
            .get(user)
            .copied()
            .unwrap_or(UNKNOWN_USER_FEATURE);
        let positive_set: HashSet<u32> = sequence.iter().copied().collect();

        for idx in 1..sequence.len() {
            if out.samples.len() >= cap {
                break 'users;
            }
            let start = idx.saturating_sub(config.max_history_length);
            let history = &sequence[start..idx];
            if history.len() < config.min_history_length {
                continue;
            }
            let target = sequence[idx];

            out.samples.push(TrainingSample {
                history: history.to_vec(),
                target,
                label: 1.0,
                user_feature,
            });
            out.positives += 1;

            let captured = out.contexts.entry(target).or_default();
            if captured.len() < config.max_contexts_per_item {
                captured.push(CapturedContext {
                    history: history.to_vec(),
                    user_feature,
                });
            }

            let mut accepted = 0;
            let mut draws = 0;
            while accepted < config.negative_samples && draws < max_draws {
                if out.samples.len() >= cap {
                    break 'users;
                }
                draws += 1;
                let negative = out.candidate_pool[rng.random_range(0..out.candidate_pool.len())];
                if positive_set.contains(&negative) {
                    continue;
                }
                out.samples.push(TrainingSample {
                    history: history.to_vec(),
                    target: negative,
                    label: 0.0,
                    user_feature,
                });
                accepted += 1;
            }
        }
    }

    if out.samples.is_empty() {
        return Err(InitError::NoTrainingSamples(NAME));
    }
    if out.contexts.is_empty() {
        return Err(InitError::NoContexts(NAME));
    }

    tracing::info!(
        users = out.users,
        samples = out.samples.len(),
        positives = out.positives,
        contexts = out.contexts.len(),
        pool = out.candidate_pool.len(),
        "DIN training set built"
    );
    Ok(out)
}

/// Items ordered by count descending, ties by first appearance, capped.
fn popularity_pool(items: impl Iterator<Item = u32>, cap: usize) -> Vec<u32> {
    let mut counts: HashMap<u32, (usize, usize)> = HashMap::new();
    for (pos, item) in items.enumerate() {
        counts.entry(item).or_insert((0, pos)).0 += 1;
    }
    let mut ordered: Vec<(u32, usize, usize)> = counts
        .into_iter()
        .map(|(item, (count, first))| (item, count, first))
        .collect();
    ordered.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));
    ordered.into_iter().take(cap).map(|(item, _, _)| item).collect()
}
