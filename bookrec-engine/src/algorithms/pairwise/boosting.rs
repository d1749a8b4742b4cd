//! Histogram-based gradient-boosted trees for binary classification.
//!
//! Features are quantized into at most `max_bins` bins once up front. Each
//! round fits a depth-limited regression tree to the gradients of the
//! logistic loss, with Newton leaf values `-G / (H + lambda)`.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::config::PairwiseConfig;

const MIN_HESSIAN: f64 = 1e-6;
const MIN_GAIN: f64 = 1e-9;

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

// ── Binning ──────────────────────────────────────────────────────────────

/// Per-feature cut points. A value `v` falls in the first bin `i` with
/// `v <= edges[i]`, or in the overflow bin `edges.len()`.
#[derive(Debug, Clone)]
pub struct BinMapper {
    edges: Vec<Vec<f32>>,
}

impl BinMapper {
    /// `rows` is row-major with `n_features` columns.
    pub fn fit(rows: &[f32], n_features: usize, max_bins: usize) -> Self {
        let max_edges = max_bins.clamp(2, 256) - 1;
        let n_rows = rows.len() / n_features.max(1);
        let edges = (0..n_features)
            .map(|f| {
                let mut values: Vec<f32> = (0..n_rows).map(|r| rows[r * n_features + f]).collect();
                values.sort_by(f32::total_cmp);
                values.dedup();
                if values.len() <= max_edges + 1 {
                    values.windows(2).map(|w| (w[0] + w[1]) / 2.0).collect()
                } else {
                    let mut cuts: Vec<f32> = (1..=max_edges)
                        .map(|q| values[q * (values.len() - 1) / (max_edges + 1)])
                        .collect();
                    cuts.dedup();
                    cuts
                }
            })
            .collect();
        Self { edges }
    }

    pub fn bin(&self, feature: usize, value: f32) -> u8 {
        let edges = &self.edges[feature];
        edges.partition_point(|&e| e < value) as u8
    }

    pub fn n_bins(&self, feature: usize) -> usize {
        self.edges[feature].len() + 1
    }

    pub fn threshold(&self, feature: usize, bin: u8) -> f32 {
        self.edges[feature][bin as usize]
    }

    fn transform(&self, rows: &[f32], n_features: usize) -> Vec<u8> {
        rows.iter()
            .enumerate()
            .map(|(i, &v)| self.bin(i % n_features, v))
            .collect()
    }
}

// ── Trees ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Node {
    Leaf(f32),
    Split {
        feature: usize,
        bin: u8,
        threshold: f32,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone)]
struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    fn predict(&self, row: &[f32]) -> f32 {
        let mut at = 0;
        loop {
            match &self.nodes[at] {
                Node::Leaf(v) => return *v,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                    ..
                } => at = if row[*feature] <= *threshold { *left } else { *right },
            }
        }
    }

    fn predict_binned(&self, row: &[u8]) -> f32 {
        let mut at = 0;
        loop {
            match &self.nodes[at] {
                Node::Leaf(v) => return *v,
                Node::Split {
                    feature,
                    bin,
                    left,
                    right,
                    ..
                } => at = if row[*feature] <= *bin { *left } else { *right },
            }
        }
    }
}

struct GrowContext<'a> {
    binned: &'a [u8],
    n_features: usize,
    grad: &'a [f32],
    hess: &'a [f32],
    features: &'a [usize],
    mapper: &'a BinMapper,
    max_depth: usize,
    min_samples_leaf: usize,
    lambda: f64,
}

struct BestSplit {
    feature: usize,
    bin: u8,
    gain: f64,
}

impl GrowContext<'_> {
    fn sums(&self, rows: &[usize]) -> (f64, f64) {
        rows.iter().fold((0.0, 0.0), |(g, h), &r| {
            (g + self.grad[r] as f64, h + self.hess[r] as f64)
        })
    }

    fn leaf_value(&self, g: f64, h: f64) -> f32 {
        (-g / (h + self.lambda).max(MIN_HESSIAN)) as f32
    }

    fn score(&self, g: f64, h: f64) -> f64 {
        g * g / (h + self.lambda).max(MIN_HESSIAN)
    }

    fn best_split(&self, rows: &[usize], g_total: f64, h_total: f64) -> Option<BestSplit> {
        let parent = self.score(g_total, h_total);
        let mut best: Option<BestSplit> = None;

        for &feature in self.features {
            let n_bins = self.mapper.n_bins(feature);
            if n_bins < 2 {
                continue;
            }
            let mut hist = vec![(0.0f64, 0.0f64, 0usize); n_bins];
            for &r in rows {
                let b = self.binned[r * self.n_features + feature] as usize;
                hist[b].0 += self.grad[r] as f64;
                hist[b].1 += self.hess[r] as f64;
                hist[b].2 += 1;
            }

            let (mut gl, mut hl, mut nl) = (0.0, 0.0, 0usize);
            for (b, &(g, h, n)) in hist.iter().enumerate().take(n_bins - 1) {
                gl += g;
                hl += h;
                nl += n;
                let nr = rows.len() - nl;
                if nl < self.min_samples_leaf || nr < self.min_samples_leaf {
                    continue;
                }
                let gain = self.score(gl, hl) + self.score(g_total - gl, h_total - hl) - parent;
                if gain > MIN_GAIN && best.as_ref().is_none_or(|s| gain > s.gain) {
                    best = Some(BestSplit {
                        feature,
                        bin: b as u8,
                        gain,
                    });
                }
            }
        }
        best
    }

    fn grow(&self, rows: Vec<usize>, depth: usize, nodes: &mut Vec<Node>) -> usize {
        let (g, h) = self.sums(&rows);
        let id = nodes.len();
        nodes.push(Node::Leaf(self.leaf_value(g, h)));

        if depth >= self.max_depth || rows.len() < 2 * self.min_samples_leaf.max(1) {
            return id;
        }
        let Some(split) = self.best_split(&rows, g, h) else {
            return id;
        };

        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
            .into_iter()
            .partition(|&r| self.binned[r * self.n_features + split.feature] <= split.bin);
        let left = self.grow(left_rows, depth + 1, nodes);
        let right = self.grow(right_rows, depth + 1, nodes);
        nodes[id] = Node::Split {
            feature: split.feature,
            bin: split.bin,
            threshold: self.mapper.threshold(split.feature, split.bin),
            left,
            right,
        };
        id
    }
}

// ── Ensemble ─────────────────────────────────────────────────────────────

/// Boosted ensemble on the logistic loss.
#[derive(Debug, Clone)]
pub struct GradientBoostedTrees {
    init_prediction: f32,
    learning_rate: f32,
    trees: Vec<Tree>,
    n_features: usize,
}

impl GradientBoostedTrees {
    /// Fit on row-major `rows` (`labels.len()` rows of `n_features`).
    pub fn fit(rows: &[f32], labels: &[f32], n_features: usize, config: &PairwiseConfig) -> Self {
        let n = labels.len();
        let mut rng = StdRng::seed_from_u64(config.random_state);

        let positives = labels.iter().filter(|&&y| y > 0.5).count();
        let p = positives as f32 / n.max(1) as f32;
        let init_prediction = if p > 0.0 && p < 1.0 {
            (p / (1.0 - p)).ln()
        } else if p >= 1.0 {
            5.0
        } else {
            -5.0
        };

        let mapper = BinMapper::fit(rows, n_features, config.max_bins);
        let binned = mapper.transform(rows, n_features);
        let mut raw = vec![init_prediction; n];
        let mut grad = vec![0.0f32; n];
        let mut hess = vec![0.0f32; n];
        let mut trees = Vec::with_capacity(config.n_estimators);

        let n_sub = ((n as f64 * config.subsample).round() as usize).clamp(1, n.max(1));
        let n_feat = ((n_features as f64 * config.feature_fraction).round() as usize)
            .clamp(1, n_features.max(1));
        let mut all_rows: Vec<usize> = (0..n).collect();
        let mut all_features: Vec<usize> = (0..n_features).collect();

        for _ in 0..config.n_estimators {
            if n == 0 {
                break;
            }
            for i in 0..n {
                let p = sigmoid(raw[i]);
                grad[i] = p - labels[i];
                hess[i] = p * (1.0 - p);
            }

            all_rows.shuffle(&mut rng);
            let mut rows_in = all_rows[..n_sub].to_vec();
            rows_in.sort_unstable();
            all_features.shuffle(&mut rng);
            let mut features = all_features[..n_feat].to_vec();
            features.sort_unstable();

            let ctx = GrowContext {
                binned: &binned,
                n_features,
                grad: &grad,
                hess: &hess,
                features: &features,
                mapper: &mapper,
                max_depth: config.max_depth,
                min_samples_leaf: config.min_samples_leaf,
                lambda: f64::from(config.l2_regularization),
            };
            let mut nodes = Vec::new();
            ctx.grow(rows_in, 0, &mut nodes);
            let tree = Tree { nodes };

            for (i, r) in raw.iter_mut().enumerate() {
                *r += config.learning_rate
                    * tree.predict_binned(&binned[i * n_features..(i + 1) * n_features]);
            }
            trees.push(tree);
        }

        Self {
            init_prediction,
            learning_rate: config.learning_rate,
            trees,
            n_features,
        }
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn predict_raw(&self, row: &[f32]) -> f32 {
        self.trees
            .iter()
            .fold(self.init_prediction, |acc, t| acc + self.learning_rate * t.predict(row))
    }

    /// Probability of the positive class for one row.
    pub fn predict_proba(&self, row: &[f32]) -> f32 {
        sigmoid(self.predict_raw(row))
    }

    /// Probabilities for row-major `rows`.
    pub fn predict_proba_batch(&self, rows: &[f32]) -> Vec<f32> {
        rows.chunks(self.n_features.max(1))
            .map(|row| self.predict_proba(row))
            .collect()
    }
}

// ── Metrics ──────────────────────────────────────────────────────────────

/// Mean logistic loss with probabilities clipped away from 0 and 1.
pub fn log_loss(labels: &[f32], probs: &[f32]) -> f64 {
    if labels.is_empty() {
        return 0.0;
    }
    let eps = 1e-7;
    let total: f64 = labels
        .iter()
        .zip(probs)
        .map(|(&y, &p)| {
            let p = f64::from(p).clamp(eps, 1.0 - eps);
            let y = f64::from(y);
            -(y * p.ln() + (1.0 - y) * (1.0 - p).ln())
        })
        .sum();
    total / labels.len() as f64
}

/// Area under the ROC curve via the rank-sum statistic, with tied scores
/// sharing their average rank. Returns `None` when one class is absent.
pub fn roc_auc(labels: &[f32], scores: &[f32]) -> Option<f64> {
    let n_pos = labels.iter().filter(|&&y| y > 0.5).count();
    let n_neg = labels.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return None;
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    let mut rank_sum_pos = 0.0f64;
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        let avg_rank = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            if labels[idx] > 0.5 {
                rank_sum_pos += avg_rank;
            }
        }
        i = j + 1;
    }

    let n_pos = n_pos as f64;
    Some((rank_sum_pos - n_pos * (n_pos + 1.0) / 2.0) / (n_pos * n_neg as f64))
}

/// Split indices into `(train, valid)` keeping the class ratio in both.
pub fn stratified_split(
    labels: &[f32],
    valid_fraction: f64,
    seed: u64,
) -> (Vec<usize>, Vec<usize>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut train = Vec::new();
    let mut valid = Vec::new();
    for class in [0.0f32, 1.0] {
        let mut idx: Vec<usize> = labels
            .iter()
            .enumerate()
            .filter(|(_, y)| (**y > 0.5) == (class > 0.5))
            .map(|(i, _)| i)
            .collect();
        idx.shuffle(&mut rng);
        let n_valid = ((idx.len() as f64 * valid_fraction).round() as usize).min(idx.len());
        valid.extend_from_slice(&idx[..n_valid]);
        train.extend_from_slice(&idx[n_valid..]);
    }
    train.sort_unstable();
    valid.sort_unstable();
    (train, valid)
}
