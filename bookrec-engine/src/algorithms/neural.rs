//! Candle building blocks shared by the neural scorers.
//!
//! Candle's CPU generator cannot be seeded, so every random tensor here is
//! drawn from a caller-provided `StdRng` and uploaded with `Tensor::from_vec`.

use candle_core::{Device, Result, Shape, Tensor, Var};
use candle_nn::optim::{AdamW, Optimizer, ParamsAdamW, SGD};
use candle_nn::{Linear, Module};
use rand::rngs::StdRng;
use rand::RngExt;

use crate::config::OptimizerKind;

// ── Initialization ───────────────────────────────────────────────────────

/// Trainable tensor with entries drawn from `U(-bound, bound)`.
pub fn uniform_var(
    shape: impl Into<Shape>,
    bound: f32,
    rng: &mut StdRng,
    device: &Device,
) -> Result<Var> {
    let shape: Shape = shape.into();
    let data: Vec<f32> = (0..shape.elem_count())
        .map(|_| rng.random_range(-bound..bound))
        .collect();
    Var::from_tensor(&Tensor::from_vec(data, shape, device)?)
}

/// Trainable tensor with entries drawn from `N(0, std_dev^2)` (Box-Muller).
pub fn normal_var(
    shape: impl Into<Shape>,
    std_dev: f32,
    rng: &mut StdRng,
    device: &Device,
) -> Result<Var> {
    let shape: Shape = shape.into();
    let n = shape.elem_count();
    let mut data = Vec::with_capacity(n);
    while data.len() < n {
        let u1: f32 = rng.random_range(f32::EPSILON..1.0);
        let u2: f32 = rng.random_range(0.0..1.0);
        let r = (-2.0 * u1.ln()).sqrt();
        let theta = std::f32::consts::TAU * u2;
        data.push(r * theta.cos() * std_dev);
        if data.len() < n {
            data.push(r * theta.sin() * std_dev);
        }
    }
    Var::from_tensor(&Tensor::from_vec(data, shape, device)?)
}

/// Fully connected layer whose weight and bias are owned by `Var`s so the
/// optimizer can update them in place.
pub struct DenseLayer {
    linear: Linear,
    weight: Var,
    bias: Var,
}

impl DenseLayer {
    /// PyTorch-style default init: `U(-1/sqrt(in), 1/sqrt(in))` for both
    /// weight and bias.
    pub fn new(in_dim: usize, out_dim: usize, rng: &mut StdRng, device: &Device) -> Result<Self> {
        let bound = 1.0 / (in_dim.max(1) as f32).sqrt();
        let weight = uniform_var((out_dim, in_dim), bound, rng, device)?;
        let bias = uniform_var(out_dim, bound, rng, device)?;
        let linear = Linear::new(weight.as_tensor().clone(), Some(bias.as_tensor().clone()));
        Ok(Self {
            linear,
            weight,
            bias,
        })
    }

    pub fn vars(&self) -> [Var; 2] {
        [self.weight.clone(), self.bias.clone()]
    }
}

impl Module for DenseLayer {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        self.linear.forward(xs)
    }
}

/// Stack of dense layers with ReLU and dropout between hidden layers and a
/// linear output layer.
pub struct FeedForward {
    layers: Vec<DenseLayer>,
    dropout: f32,
}

impl FeedForward {
    pub fn new(
        in_dim: usize,
        hidden: &[usize],
        out_dim: usize,
        dropout: f32,
        rng: &mut StdRng,
        device: &Device,
    ) -> Result<Self> {
        let mut layers = Vec::with_capacity(hidden.len() + 1);
        let mut prev = in_dim;
        for &width in hidden.iter().chain(std::iter::once(&out_dim)) {
            layers.push(DenseLayer::new(prev, width, rng, device)?);
            prev = width;
        }
        Ok(Self { layers, dropout })
    }

    /// Dropout is applied only when `train_rng` is provided.
    pub fn forward(&self, xs: &Tensor, mut train_rng: Option<&mut StdRng>) -> Result<Tensor> {
        let last = self.layers.len() - 1;
        let mut h = xs.clone();
        for (i, layer) in self.layers.iter().enumerate() {
            h = layer.forward(&h)?;
            if i < last {
                h = h.relu()?;
                if let Some(rng) = train_rng.as_deref_mut() {
                    h = dropout(&h, self.dropout, rng)?;
                }
            }
        }
        Ok(h)
    }

    pub fn vars(&self) -> Vec<Var> {
        self.layers.iter().flat_map(DenseLayer::vars).collect()
    }
}

/// Inverted dropout with a mask drawn from `rng`.
pub fn dropout(xs: &Tensor, p: f32, rng: &mut StdRng) -> Result<Tensor> {
    if p <= 0.0 {
        return Ok(xs.clone());
    }
    let keep_scale = 1.0 / (1.0 - p);
    let mask: Vec<f32> = (0..xs.elem_count())
        .map(|_| {
            if rng.random::<f32>() < p {
                0.0
            } else {
                keep_scale
            }
        })
        .collect();
    let mask = Tensor::from_vec(mask, xs.shape().clone(), xs.device())?;
    xs.mul(&mask)
}

// ── Losses ───────────────────────────────────────────────────────────────

/// Mean binary cross-entropy on logits:
/// `max(x, 0) - x * y + log(1 + exp(-|x|))`.
pub fn bce_with_logits(logits: &Tensor, labels: &Tensor) -> Result<Tensor> {
    let positive_part = logits.relu()?;
    let xy = (logits * labels)?;
    let soft = logits.abs()?.neg()?.exp()?.affine(1.0, 1.0)?.log()?;
    ((positive_part - xy)? + soft)?.mean_all()
}

/// Mean `-log(sigmoid(x))`, written as `relu(-x) + log(1 + exp(-|x|))`.
pub fn neg_log_sigmoid(xs: &Tensor) -> Result<Tensor> {
    let soft = xs.abs()?.neg()?.exp()?.affine(1.0, 1.0)?.log()?;
    (xs.neg()?.relu()? + soft)?.mean_all()
}

// ── Optimizer ────────────────────────────────────────────────────────────

/// Adam (no weight decay) or plain SGD over a fixed set of variables.
pub enum Trainer {
    Adam(AdamW),
    Sgd(SGD),
}

impl Trainer {
    pub fn new(kind: OptimizerKind, vars: Vec<Var>, learning_rate: f64) -> Result<Self> {
        Ok(match kind {
            OptimizerKind::Adam => Self::Adam(AdamW::new(
                vars,
                ParamsAdamW {
                    lr: learning_rate,
                    weight_decay: 0.0,
                    ..Default::default()
                },
            )?),
            OptimizerKind::Sgd => Self::Sgd(SGD::new(vars, learning_rate)?),
        })
    }

    pub fn backward_step(&mut self, loss: &Tensor) -> Result<()> {
        match self {
            Self::Adam(opt) => opt.backward_step(loss),
            Self::Sgd(opt) => opt.backward_step(loss),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn bce_matches_closed_form() {
        let device = Device::Cpu;
        let logits = Tensor::new(&[0.0f32, 2.0, -3.0], &device).unwrap();
        let labels = Tensor::new(&[1.0f32, 0.0, 0.0], &device).unwrap();
        let loss = bce_with_logits(&logits, &labels)
            .unwrap()
            .to_scalar::<f32>()
            .unwrap();

        let expected = [(0.0f32, 1.0f32), (2.0, 0.0), (-3.0, 0.0)]
            .iter()
            .map(|&(x, y)| {
                let p = 1.0 / (1.0 + (-x).exp());
                -(y * p.ln() + (1.0 - y) * (1.0 - p).ln())
            })
            .sum::<f32>()
            / 3.0;
        assert!((loss - expected).abs() < 1e-5, "{loss} vs {expected}");
    }

    #[test]
    fn bce_is_finite_for_large_logits() {
        let device = Device::Cpu;
        let logits = Tensor::new(&[80.0f32, -80.0], &device).unwrap();
        let labels = Tensor::new(&[0.0f32, 1.0], &device).unwrap();
        let loss = bce_with_logits(&logits, &labels)
            .unwrap()
            .to_scalar::<f32>()
            .unwrap();
        assert!(loss.is_finite());
        assert!((loss - 80.0).abs() < 1e-3);
    }

    #[test]
    fn dropout_is_seeded() {
        let device = Device::Cpu;
        let xs = Tensor::ones((4, 8), candle_core::DType::F32, &device).unwrap();
        let a = dropout(&xs, 0.5, &mut StdRng::seed_from_u64(7))
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1::<f32>()
            .unwrap();
        let b = dropout(&xs, 0.5, &mut StdRng::seed_from_u64(7))
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1::<f32>()
            .unwrap();
        assert_eq!(a, b);
        assert!(a.iter().all(|&v| v == 0.0 || (v - 2.0).abs() < 1e-6));
    }

    #[test]
    fn feed_forward_output_shape() {
        let device = Device::Cpu;
        let mut rng = StdRng::seed_from_u64(1);
        let ff = FeedForward::new(6, &[5, 3], 1, 0.1, &mut rng, &device).unwrap();
        let xs = Tensor::zeros((2, 4, 6), candle_core::DType::F32, &device).unwrap();
        let out = ff.forward(&xs, None).unwrap();
        assert_eq!(out.dims(), &[2, 4, 1]);
        assert_eq!(ff.vars().len(), 6);
    }

    #[test]
    fn sgd_step_reduces_loss() {
        let device = Device::Cpu;
        let w = Var::new(&[2.0f32], &device).unwrap();
        let mut trainer = Trainer::new(OptimizerKind::Sgd, vec![w.clone()], 0.1).unwrap();
        let loss = w.as_tensor().sqr().unwrap().sum_all().unwrap();
        trainer.backward_step(&loss).unwrap();
        let after = w.as_tensor().to_vec1::<f32>().unwrap()[0];
        assert!((after - 1.6).abs() < 1e-6);
    }
}
