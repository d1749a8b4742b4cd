//! Deep Interest Network scorer.
//!
//! A target item attends over the user's history: per-position scores come
//! from a small feed-forward net over `[q, h, q - h, q * h]`, a masked
//! softmax turns them into weights, and the weighted history (the user
//! interest) is scored together with the target and the user feature.

use candle_core::{Device, Result, Tensor, Var};
use rand::rngs::StdRng;

use super::context::HistoryBatch;
use crate::algorithms::neural::{normal_var, FeedForward};
use crate::config::SequentialConfig;

/// Score assigned to masked positions before the softmax.
const MASK_FILL: f64 = -1e30;
const SOFTMAX_EPS: f64 = 1e-12;
const EMBEDDING_STD: f32 = 0.1;

pub struct DinModel {
    /// `(num_items + 1, embed_dim)`; row 0 is the padding vector.
    item_embedding: Var,
    attention: FeedForward,
    scorer: FeedForward,
    embed_dim: usize,
}

impl DinModel {
    pub fn new(
        num_items: usize,
        config: &SequentialConfig,
        rng: &mut StdRng,
        device: &Device,
    ) -> Result<Self> {
        let d = config.embed_dim;
        let item_embedding = normal_var((num_items + 1, d), EMBEDDING_STD, rng, device)?;
        let padding = Tensor::zeros((1, d), candle_core::DType::F32, device)?;
        let real = item_embedding.as_tensor().narrow(0, 1, num_items)?;
        item_embedding.set(&Tensor::cat(&[&padding, &real], 0)?)?;

        let attention = FeedForward::new(
            4 * d,
            &config.attention_hidden_units,
            1,
            config.dropout,
            rng,
            device,
        )?;
        let scorer = FeedForward::new(
            2 * d + 1,
            &config.mlp_hidden_units,
            1,
            config.dropout,
            rng,
            device,
        )?;

        Ok(Self {
            item_embedding,
            attention,
            scorer,
            embed_dim: d,
        })
    }

    /// Every trainable variable, embedding first.
    pub fn vars(&self) -> Vec<Var> {
        let mut vars = vec![self.item_embedding.clone()];
        vars.extend(self.attention.vars());
        vars.extend(self.scorer.vars());
        vars
    }

    fn embed(&self, ids: &Tensor) -> Result<Tensor> {
        let mut dims = ids.dims().to_vec();
        dims.push(self.embed_dim);
        self.item_embedding
            .as_tensor()
            .index_select(&ids.flatten_all()?, 0)?
            .reshape(dims)
    }

    /// Logits for `targets` (shape `(n,)`) against the rows of `batch`.
    ///
    /// Passing `train_rng` enables dropout.
    pub fn forward(
        &self,
        targets: &Tensor,
        batch: &HistoryBatch,
        mut train_rng: Option<&mut StdRng>,
    ) -> Result<Tensor> {
        let (n, len) = batch.histories.dims2()?;
        let d = self.embed_dim;

        let target_emb = self.embed(targets)?;
        let hist_emb = self
            .embed(&batch.histories)?
            .broadcast_mul(&batch.valid.unsqueeze(2)?)?;

        let query = target_emb
            .unsqueeze(1)?
            .broadcast_as((n, len, d))?
            .contiguous()?;
        let diff = (&query - &hist_emb)?;
        let prod = (&query * &hist_emb)?;
        let attention_in = Tensor::cat(&[&query, &hist_emb, &diff, &prod], 2)?;

        let raw = self
            .attention
            .forward(&attention_in, train_rng.as_deref_mut())?
            .squeeze(2)?;
        let weights = masked_softmax(&raw, &batch.valid)?;
        let interest = weights.unsqueeze(2)?.broadcast_mul(&hist_emb)?.sum(1)?;

        let features = Tensor::cat(&[&interest, &target_emb, &batch.user_features], 1)?;
        self.scorer
            .forward(&features, train_rng.as_deref_mut())?
            .squeeze(1)
    }
}

/// Softmax over dim 1 restricted to positions where `valid` is 1.
///
/// Masked scores are replaced by a large finite negative, the exponentials
/// are multiplied by the mask and renormalized with a small epsilon, so a
/// row with no valid position yields all zeros.
pub fn masked_softmax(scores: &Tensor, valid: &Tensor) -> Result<Tensor> {
    let fill = valid.affine(-MASK_FILL, MASK_FILL)?;
    let masked = scores.mul(valid)?.add(&fill)?;
    let row_max = masked.max_keepdim(1)?;
    let exps = masked.broadcast_sub(&row_max)?.exp()?.mul(valid)?;
    let denom = exps.sum_keepdim(1)?.affine(1.0, SOFTMAX_EPS)?;
    exps.broadcast_div(&denom)
}
