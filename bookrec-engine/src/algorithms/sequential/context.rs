use std::collections::HashMap;

use candle_core::{Device, Result, Tensor};

use super::index::PADDING_INDEX;
use super::samples::CapturedContext;

/// Left-align `history` into a window of `max_len`, padding the tail with
/// index 0. Returns the padded ids and the matching validity mask.
pub fn pad_history(history: &[u32], max_len: usize) -> (Vec<u32>, Vec<f32>) {
    let start = history.len().saturating_sub(max_len);
    let kept = &history[start..];
    let mut ids = Vec::with_capacity(max_len);
    let mut valid = Vec::with_capacity(max_len);
    for pos in 0..max_len {
        match kept.get(pos) {
            Some(&id) => {
                ids.push(id);
                valid.push(1.0);
            }
            None => {
                ids.push(PADDING_INDEX);
                valid.push(0.0);
            }
        }
    }
    (ids, valid)
}

/// Padded histories for a batch of rows, ready for the forward pass.
#[derive(Debug, Clone)]
pub struct HistoryBatch {
    /// `(rows, max_len)` item indices.
    pub histories: Tensor,
    /// `(rows, max_len)` 1.0 where a real item sits, 0.0 on padding.
    pub valid: Tensor,
    /// `(rows, 1)` user feature.
    pub user_features: Tensor,
}

impl HistoryBatch {
    pub fn from_rows<'a>(
        rows: impl ExactSizeIterator<Item = (&'a [u32], f32)>,
        max_len: usize,
        device: &Device,
    ) -> Result<Self> {
        let n = rows.len();
        let mut ids = Vec::with_capacity(n * max_len);
        let mut valid = Vec::with_capacity(n * max_len);
        let mut features = Vec::with_capacity(n);
        for (history, feature) in rows {
            let (row_ids, row_valid) = pad_history(history, max_len);
            ids.extend(row_ids);
            valid.extend(row_valid);
            features.push(feature);
        }
        Ok(Self {
            histories: Tensor::from_vec(ids, (n, max_len), device)?,
            valid: Tensor::from_vec(valid, (n, max_len), device)?,
            user_features: Tensor::from_vec(features, (n, 1), device)?,
        })
    }

    pub fn rows(&self) -> usize {
        self.histories.dims()[0]
    }

    /// Tile every row `times` times: `(C, ..)` becomes `(times * C, ..)`,
    /// block-major, so row `i * C + j` is context `j`.
    pub fn tile(&self, times: usize) -> Result<Self> {
        Ok(Self {
            histories: tile_rows(&self.histories, times)?,
            valid: tile_rows(&self.valid, times)?,
            user_features: tile_rows(&self.user_features, times)?,
        })
    }
}

fn tile_rows(xs: &Tensor, times: usize) -> Result<Tensor> {
    let (rows, cols) = xs.dims2()?;
    xs.unsqueeze(0)?
        .broadcast_as((times, rows, cols))?
        .contiguous()?
        .reshape((times * rows, cols))
}

/// Serving contexts per target item, pre-padded into tensors.
#[derive(Debug, Default)]
pub struct ContextStore {
    batches: HashMap<u32, HistoryBatch>,
}

impl ContextStore {
    pub fn build(
        contexts: &HashMap<u32, Vec<CapturedContext>>,
        max_len: usize,
        device: &Device,
    ) -> Result<Self> {
        let mut batches = HashMap::with_capacity(contexts.len());
        for (&item, captured) in contexts {
            if captured.is_empty() {
                continue;
            }
            let rows = captured
                .iter()
                .map(|c| (c.history.as_slice(), c.user_feature));
            batches.insert(item, HistoryBatch::from_rows(rows, max_len, device)?);
        }
        Ok(Self { batches })
    }

    pub fn get(&self, item: u32) -> Option<&HistoryBatch> {
        self.batches.get(&item)
    }

    pub fn context_count(&self, item: u32) -> usize {
        self.batches.get(&item).map_or(0, HistoryBatch::rows)
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }
}
