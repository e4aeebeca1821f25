//! Elman recurrent classifier trained with full backpropagation through time.

use rand::SeedableRng;
use rand::rngs::StdRng;

use super::mlp::Mlp;
use super::train::{Network, Param, softmax_cross_entropy};

/// `h_t = tanh(w_x·x_t + W_h·h_{t-1} + b)` over the window, then an MLP head on
/// the final hidden state.
#[derive(Debug, Clone)]
pub(crate) struct Recurrent {
    hidden: usize,
    input_weights: Param,
    recurrent_weights: Param,
    bias: Param,
    head: Mlp,
}

impl Recurrent {
    pub(crate) fn new(hidden: usize, head: &[usize], seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let input_limit = (6.0 / (1 + hidden) as f64).sqrt();
        let recurrent_limit = (3.0 / hidden as f64).sqrt();
        Self {
            hidden,
            input_weights: Param::uniform(hidden, input_limit, &mut rng),
            recurrent_weights: Param::uniform(hidden * hidden, recurrent_limit, &mut rng),
            bias: Param::zeros(hidden),
            head: Mlp::with_rng(hidden, head, &mut rng),
        }
    }

    /// Hidden states `h_0..=h_T`, `h_0` being zeros.
    fn states(&self, input: &[f64]) -> Vec<Vec<f64>> {
        let h = self.hidden;
        let mut states = Vec::with_capacity(input.len() + 1);
        states.push(vec![0.0; h]);
        for &x in input {
            let prev = &states[states.len() - 1];
            let next: Vec<f64> = (0..h)
                .map(|i| {
                    let row = &self.recurrent_weights.value[i * h..(i + 1) * h];
                    let z = self.input_weights.value[i] * x
                        + row.iter().zip(prev).map(|(w, p)| w * p).sum::<f64>()
                        + self.bias.value[i];
                    z.tanh()
                })
                .collect();
            states.push(next);
        }
        states
    }
}

impl Network for Recurrent {
    fn logits(&self, input: &[f64]) -> Vec<f64> {
        let states = self.states(input);
        let last = states.last().map(Vec::as_slice).unwrap_or_default();
        self.head.forward_trace(last).pop().unwrap_or_default()
    }

    fn accumulate(&mut self, input: &[f64], label: usize) -> f64 {
        let h = self.hidden;
        let states = self.states(input);
        let last = states.last().map(Vec::as_slice).unwrap_or_default();
        let acts = self.head.forward_trace(last);
        let logits = acts.last().map(Vec::as_slice).unwrap_or_default();
        let (loss, dlogits) = softmax_cross_entropy(logits, label);
        let mut dh = self.head.backward_from(&acts, dlogits);

        for t in (0..input.len()).rev() {
            let current = &states[t + 1];
            let prev = &states[t];
            let dz: Vec<f64> = dh
                .iter()
                .zip(current)
                .map(|(g, hv)| g * (1.0 - hv * hv))
                .collect();
            let mut dprev = vec![0.0; h];
            for i in 0..h {
                let g = dz[i];
                self.input_weights.grad[i] += g * input[t];
                self.bias.grad[i] += g;
                for j in 0..h {
                    self.recurrent_weights.grad[i * h + j] += g * prev[j];
                    dprev[j] += g * self.recurrent_weights.value[i * h + j];
                }
            }
            dh = dprev;
        }
        loss
    }

    fn params_mut(&mut self) -> Vec<&mut Param> {
        let mut params = vec![
            &mut self.input_weights,
            &mut self.recurrent_weights,
            &mut self.bias,
        ];
        params.extend(self.head.params_mut());
        params
    }
}
