use candle_core::{Device, Result, Tensor};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use super::context::HistoryBatch;
use super::model::DinModel;
use super::samples::TrainingSample;
use crate::algorithms::neural::{bce_with_logits, Trainer};
use crate::config::SequentialConfig;

/// Mini-batch training with a fresh shuffle each epoch. Returns the mean
/// batch loss of every epoch.
pub fn train(
    model: &DinModel,
    samples: &[TrainingSample],
    config: &SequentialConfig,
    rng: &mut StdRng,
    device: &Device,
) -> Result<Vec<f32>> {
    let mut trainer = Trainer::new(config.optimizer, model.vars(), config.learning_rate)?;
    let mut order: Vec<usize> = (0..samples.len()).collect();
    let mut epoch_losses = Vec::with_capacity(config.epochs);

    for epoch in 0..config.epochs {
        order.shuffle(rng);
        let mut total = 0.0f64;
        let mut batches = 0usize;

        for chunk in order.chunks(config.batch_size) {
            let batch = HistoryBatch::from_rows(
                chunk
                    .iter()
                    .map(|&i| (samples[i].history.as_slice(), samples[i].user_feature)),
                config.max_history_length,
                device,
            )?;
            let targets: Vec<u32> = chunk.iter().map(|&i| samples[i].target).collect();
            let labels: Vec<f32> = chunk.iter().map(|&i| samples[i].label).collect();
            let targets = Tensor::from_vec(targets, chunk.len(), device)?;
            let labels = Tensor::from_vec(labels, chunk.len(), device)?;

            let logits = model.forward(&targets, &batch, Some(&mut *rng))?;
            let loss = bce_with_logits(&logits, &labels)?;
            trainer.backward_step(&loss)?;

            total += loss.to_scalar::<f32>()? as f64;
            batches += 1;
        }

        let mean = (total / batches.max(1) as f64) as f32;
        tracing::info!(epoch = epoch + 1, loss = mean, "DIN epoch complete");
        epoch_losses.push(mean);
    }

    Ok(epoch_losses)
}
