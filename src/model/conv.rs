//! One-dimensional convolutional classifier.

use rand::SeedableRng;
use rand::rngs::StdRng;

use super::mlp::Mlp;
use super::train::{Network, Param, softmax_cross_entropy};

const KERNEL: usize = 3;
const POOL: usize = 2;

/// Conv1d (valid padding) → ReLU → MaxPool(2) → flatten → MLP head.
///
/// With `skip_input` the raw window is concatenated to the pooled features
/// before the head, giving the head both local motifs and absolute values.
#[derive(Debug, Clone)]
pub(crate) struct ConvNet {
    input_len: usize,
    filters: usize,
    skip_input: bool,
    kernels: Param,
    bias: Param,
    head: Mlp,
}

struct ConvTrace {
    /// Post-ReLU conv outputs, `filters × conv_len`.
    activated: Vec<f64>,
    /// Index into `activated` chosen by each pooled cell.
    argmax: Vec<usize>,
    head_acts: Vec<Vec<f64>>,
}

impl ConvNet {
    pub(crate) fn new(
        input_len: usize,
        filters: usize,
        hidden: &[usize],
        skip_input: bool,
        seed: u64,
    ) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let limit = (6.0 / (KERNEL + KERNEL * filters) as f64).sqrt();
        let kernels = Param::uniform(filters * KERNEL, limit, &mut rng);
        let pooled = (input_len - KERNEL + 1) / POOL;
        let features = filters * pooled + if skip_input { input_len } else { 0 };
        Self {
            input_len,
            filters,
            skip_input,
            kernels,
            bias: Param::zeros(filters),
            head: Mlp::with_rng(features, hidden, &mut rng),
        }
    }

    fn conv_len(&self) -> usize {
        self.input_len - KERNEL + 1
    }

    fn pooled_len(&self) -> usize {
        self.conv_len() / POOL
    }

    fn forward_trace(&self, input: &[f64]) -> ConvTrace {
        let conv_len = self.conv_len();
        let pooled_len = self.pooled_len();
        let mut activated = vec![0.0; self.filters * conv_len];
        for f in 0..self.filters {
            let kernel = &self.kernels.value[f * KERNEL..(f + 1) * KERNEL];
            for t in 0..conv_len {
                let z: f64 = kernel
                    .iter()
                    .zip(&input[t..t + KERNEL])
                    .map(|(k, x)| k * x)
                    .sum::<f64>()
                    + self.bias.value[f];
                activated[f * conv_len + t] = z.max(0.0);
            }
        }

        let mut argmax = Vec::with_capacity(self.filters * pooled_len);
        let mut features = Vec::with_capacity(self.filters * pooled_len + self.input_len);
        for f in 0..self.filters {
            for p in 0..pooled_len {
                let start = f * conv_len + p * POOL;
                let mut best = start;
                for idx in start + 1..start + POOL {
                    if activated[idx] > activated[best] {
                        best = idx;
                    }
                }
                argmax.push(best);
                features.push(activated[best]);
            }
        }
        if self.skip_input {
            features.extend_from_slice(input);
        }

        let head_acts = self.head.forward_trace(&features);
        ConvTrace {
            activated,
            argmax,
            head_acts,
        }
    }
}

impl Network for ConvNet {
    fn logits(&self, input: &[f64]) -> Vec<f64> {
        self.forward_trace(input)
            .head_acts
            .pop()
            .unwrap_or_default()
    }

    fn accumulate(&mut self, input: &[f64], label: usize) -> f64 {
        let trace = self.forward_trace(input);
        let logits = trace.head_acts.last().map(Vec::as_slice).unwrap_or_default();
        let (loss, dlogits) = softmax_cross_entropy(logits, label);
        let dfeatures = self.head.backward_from(&trace.head_acts, dlogits);

        let conv_len = self.conv_len();
        let mut dconv = vec![0.0; self.filters * conv_len];
        for (cell, &idx) in trace.argmax.iter().enumerate() {
            if trace.activated[idx] > 0.0 {
                dconv[idx] += dfeatures[cell];
            }
        }

        for f in 0..self.filters {
            for t in 0..conv_len {
                let g = dconv[f * conv_len + t];
                if g == 0.0 {
                    continue;
                }
                self.bias.grad[f] += g;
                for k in 0..KERNEL {
                    self.kernels.grad[f * KERNEL + k] += g * input[t + k];
                }
            }
        }
        loss
    }

    fn params_mut(&mut self) -> Vec<&mut Param> {
        let mut params = vec![&mut self.kernels, &mut self.bias];
        params.extend(self.head.params_mut());
        params
    }
}
