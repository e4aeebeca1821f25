//! Shared training loop, optimizer state and loss helpers.

use std::fmt;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use super::NUM_CLASSES;
use crate::error::ModelError;
use crate::forecast::window::{WINDOW_LEN, Window};

/// Hyper-parameters for one fitting pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitConfig {
    /// Passes over the training windows.
    pub epochs: usize,
    /// Windows per optimizer step.
    pub batch_size: usize,
    /// Fraction of windows (taken from the tail) held out for validation.
    pub validation_split: f64,
    /// Adam step size.
    pub learning_rate: f64,
    /// Base seed for weight initialisation and shuffling.
    pub seed: u64,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            epochs: 20,
            batch_size: 16,
            validation_split: 0.1,
            learning_rate: 0.001,
            seed: 42,
        }
    }
}

/// Result of a successful fit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FitReport {
    /// Mean training loss of the final epoch.
    pub loss: f64,
    /// Mean loss on the held-out windows, when any were held out.
    pub validation_loss: Option<f64>,
    pub epochs: usize,
    /// Windows used for gradient steps.
    pub samples: usize,
}

/// A trainable tensor with Adam moment estimates.
#[derive(Debug, Clone)]
pub(crate) struct Param {
    pub(crate) value: Vec<f64>,
    pub(crate) grad: Vec<f64>,
    m: Vec<f64>,
    v: Vec<f64>,
}

impl Param {
    pub(crate) fn zeros(len: usize) -> Self {
        Self::from_values(vec![0.0; len])
    }

    /// Uniform initialisation in `[-limit, limit)`.
    pub(crate) fn uniform(len: usize, limit: f64, rng: &mut StdRng) -> Self {
        use rand::Rng;
        let values = (0..len).map(|_| rng.gen_range(-limit..limit)).collect();
        Self::from_values(values)
    }

    fn from_values(value: Vec<f64>) -> Self {
        let len = value.len();
        Self {
            value,
            grad: vec![0.0; len],
            m: vec![0.0; len],
            v: vec![0.0; len],
        }
    }

    /// Apply one Adam update from the accumulated gradient, then clear it.
    ///
    /// `scale` turns the summed batch gradient into a mean.
    fn adam_step(&mut self, adam: &Adam, step: u64, scale: f64) {
        let t = step.min(i32::MAX as u64) as i32;
        let bias1 = 1.0 - adam.beta1.powi(t);
        let bias2 = 1.0 - adam.beta2.powi(t);
        for i in 0..self.value.len() {
            let g = self.grad[i] * scale;
            self.m[i] = adam.beta1 * self.m[i] + (1.0 - adam.beta1) * g;
            self.v[i] = adam.beta2 * self.v[i] + (1.0 - adam.beta2) * g * g;
            let m_hat = self.m[i] / bias1;
            let v_hat = self.v[i] / bias2;
            self.value[i] -= adam.learning_rate * m_hat / (v_hat.sqrt() + adam.epsilon);
            self.grad[i] = 0.0;
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Adam {
    learning_rate: f64,
    beta1: f64,
    beta2: f64,
    epsilon: f64,
}

impl Adam {
    fn new(learning_rate: f64) -> Self {
        Self {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-7,
        }
    }
}

/// A differentiable classifier over an encoded window.
pub(crate) trait Network: Clone + fmt::Debug + Send + Sync + 'static {
    /// Unnormalised class scores for one encoded window.
    fn logits(&self, input: &[f64]) -> Vec<f64>;

    /// Forward and backward pass for one sample. Adds to parameter
    /// gradients and returns the sample's cross-entropy loss.
    fn accumulate(&mut self, input: &[f64], label: usize) -> f64;

    fn params_mut(&mut self) -> Vec<&mut Param>;
}

/// Numerically stable softmax.
pub(crate) fn softmax(logits: &[f64]) -> Vec<f64> {
    let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = logits.iter().map(|z| (z - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

pub(crate) fn cross_entropy(probs: &[f64], label: usize) -> f64 {
    -probs[label].max(1e-12).ln()
}

/// Softmax cross-entropy: returns the loss and d(loss)/d(logits).
pub(crate) fn softmax_cross_entropy(logits: &[f64], label: usize) -> (f64, Vec<f64>) {
    let mut grad = softmax(logits);
    let loss = cross_entropy(&grad, label);
    grad[label] -= 1.0;
    (loss, grad)
}

/// Validate a raw window and scale it to `[0, 1]`.
pub(crate) fn encode(input: &[u8]) -> Result<Vec<f64>, ModelError> {
    if input.len() != WINDOW_LEN {
        return Err(ModelError::InputLength {
            expected: WINDOW_LEN,
            got: input.len(),
        });
    }
    input
        .iter()
        .map(|&value| {
            if usize::from(value) < NUM_CLASSES {
                Ok(f64::from(value) / 9.0)
            } else {
                Err(ModelError::InputValue { value })
            }
        })
        .collect()
}

fn encode_samples(samples: &[Window]) -> Result<Vec<(Vec<f64>, usize)>, ModelError> {
    if samples.is_empty() {
        return Err(ModelError::EmptyTrainingSet);
    }
    samples
        .iter()
        .enumerate()
        .map(|(index, sample)| {
            let label = usize::from(sample.label);
            if label >= NUM_CLASSES {
                return Err(ModelError::MalformedSample {
                    index,
                    reason: format!("label {} is outside 0-9", sample.label),
                });
            }
            let input = encode(&sample.input).map_err(|e| ModelError::MalformedSample {
                index,
                reason: e.to_string(),
            })?;
            Ok((input, label))
        })
        .collect()
}

/// Fit `net` on `samples`, mutating it in place.
///
/// `steps` is the optimizer step counter carried across calls so warm-started
/// models keep a consistent Adam bias correction.
pub(crate) fn fit<N: Network>(
    net: &mut N,
    steps: &mut u64,
    samples: &[Window],
    config: &FitConfig,
) -> Result<FitReport, ModelError> {
    let encoded = encode_samples(samples)?;

    // Hold out the tail before shuffling, like Keras' validation_split.
    let split = config.validation_split.clamp(0.0, 0.9);
    let split_at = ((encoded.len() as f64) * (1.0 - split)).floor() as usize;
    let split_at = if split_at == 0 { encoded.len() } else { split_at };
    let (train, validation) = encoded.split_at(split_at);

    let adam = Adam::new(config.learning_rate);
    let batch_size = config.batch_size.max(1);
    let epochs = config.epochs.max(1);
    let mut rng = StdRng::seed_from_u64(config.seed ^ *steps);
    let mut order: Vec<usize> = (0..train.len()).collect();
    let mut loss = f64::NAN;

    for epoch in 0..epochs {
        order.shuffle(&mut rng);
        let mut total = 0.0;
        for batch in order.chunks(batch_size) {
            for &i in batch {
                let (input, label) = &train[i];
                total += net.accumulate(input, *label);
            }
            *steps += 1;
            let scale = 1.0 / batch.len() as f64;
            for param in net.params_mut() {
                param.adam_step(&adam, *steps, scale);
            }
        }
        loss = total / train.len() as f64;
        if !loss.is_finite() {
            return Err(ModelError::Diverged { epoch, loss });
        }
    }

    let validation_loss = if validation.is_empty() {
        None
    } else {
        let sum: f64 = validation
            .iter()
            .map(|(input, label)| cross_entropy(&softmax(&net.logits(input)), *label))
            .sum();
        Some(sum / validation.len() as f64)
    };

    Ok(FitReport {
        loss,
        validation_loss,
        epochs,
        samples: train.len(),
    })
}

/// Compare analytic gradients against central differences.
#[cfg(test)]
pub(crate) fn assert_gradients<N: Network>(net: &N, input: &[f64], label: usize) {
    let loss_of = |n: &N| cross_entropy(&softmax(&n.logits(input)), label);

    let mut analytic = net.clone();
    analytic.accumulate(input, label);
    let grads: Vec<Vec<f64>> = analytic
        .params_mut()
        .into_iter()
        .map(|p| p.grad.clone())
        .collect();

    let eps = 1e-5;
    for (pi, grad) in grads.iter().enumerate() {
        let len = grad.len();
        // First, middle and last entries of every tensor.
        for k in [0, len / 2, len.saturating_sub(1)] {
            let mut plus = net.clone();
            plus.params_mut()[pi].value[k] += eps;
            let mut minus = net.clone();
            minus.params_mut()[pi].value[k] -= eps;
            let numeric = (loss_of(&plus) - loss_of(&minus)) / (2.0 * eps);
            let diff = (numeric - grad[k]).abs();
            assert!(
                diff <= 1e-4 + 1e-3 * numeric.abs(),
                "param {} index {}: numeric {} vs analytic {}",
                pi,
                k,
                numeric,
                grad[k]
            );
        }
    }
}
