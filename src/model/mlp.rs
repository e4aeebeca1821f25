//! Multi-layer perceptron with ReLU hidden layers.

use rand::SeedableRng;
use rand::rngs::StdRng;

use super::NUM_CLASSES;
use super::dense::Dense;
use super::train::{Network, Param, softmax_cross_entropy};

/// Dense stack: `inputs → hidden[0] → … → hidden[n] → 10`.
#[derive(Debug, Clone)]
pub(crate) struct Mlp {
    layers: Vec<Dense>,
}

impl Mlp {
    pub(crate) fn new(inputs: usize, hidden: &[usize], seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        Self::with_rng(inputs, hidden, &mut rng)
    }

    pub(crate) fn with_rng(inputs: usize, hidden: &[usize], rng: &mut StdRng) -> Self {
        let mut layers = Vec::with_capacity(hidden.len() + 1);
        let mut width = inputs;
        for &units in hidden.iter().chain(std::iter::once(&NUM_CLASSES)) {
            layers.push(Dense::new(width, units, rng));
            width = units;
        }
        Self { layers }
    }

    /// Activations per layer; `acts[0]` is the input, the last entry the logits.
    pub(crate) fn forward_trace(&self, input: &[f64]) -> Vec<Vec<f64>> {
        let mut acts = Vec::with_capacity(self.layers.len() + 1);
        acts.push(input.to_vec());
        let last = self.layers.len() - 1;
        for (i, layer) in self.layers.iter().enumerate() {
            let mut out = layer.forward(&acts[i]);
            if i < last {
                relu(&mut out);
            }
            acts.push(out);
        }
        acts
    }

    /// Backpropagate `dlogits` through a trace from [`Mlp::forward_trace`];
    /// returns the gradient wrt the input.
    pub(crate) fn backward_from(&mut self, acts: &[Vec<f64>], dlogits: Vec<f64>) -> Vec<f64> {
        let mut delta = dlogits;
        for i in (0..self.layers.len()).rev() {
            delta = self.layers[i].backward(&acts[i], &delta);
            if i > 0 {
                // acts[i] is post-ReLU output of layer i-1.
                for (d, &a) in delta.iter_mut().zip(&acts[i]) {
                    if a <= 0.0 {
                        *d = 0.0;
                    }
                }
            }
        }
        delta
    }
}

pub(crate) fn relu(values: &mut [f64]) {
    for v in values {
        if *v < 0.0 {
            *v = 0.0;
        }
    }
}

impl Network for Mlp {
    fn logits(&self, input: &[f64]) -> Vec<f64> {
        self.forward_trace(input).pop().unwrap_or_default()
    }

    fn accumulate(&mut self, input: &[f64], label: usize) -> f64 {
        let acts = self.forward_trace(input);
        let logits = acts.last().map(Vec::as_slice).unwrap_or_default();
        let (loss, dlogits) = softmax_cross_entropy(logits, label);
        self.backward_from(&acts, dlogits);
        loss
    }

    fn params_mut(&mut self) -> Vec<&mut Param> {
        self.layers
            .iter_mut()
            .flat_map(|layer| layer.params_mut())
            .collect()
    }
}
