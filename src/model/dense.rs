//! Fully connected layer.

use rand::rngs::StdRng;

use super::train::Param;

/// `y = W·x + b` with row-major weights (`outputs × inputs`).
#[derive(Debug, Clone)]
pub(crate) struct Dense {
    inputs: usize,
    outputs: usize,
    weights: Param,
    bias: Param,
}

impl Dense {
    /// Glorot-uniform weights, zero bias.
    pub(crate) fn new(inputs: usize, outputs: usize, rng: &mut StdRng) -> Self {
        let limit = (6.0 / (inputs + outputs) as f64).sqrt();
        Self {
            inputs,
            outputs,
            weights: Param::uniform(inputs * outputs, limit, rng),
            bias: Param::zeros(outputs),
        }
    }

    pub(crate) fn outputs(&self) -> usize {
        self.outputs
    }

    pub(crate) fn forward(&self, x: &[f64]) -> Vec<f64> {
        debug_assert_eq!(x.len(), self.inputs);
        (0..self.outputs)
            .map(|o| {
                let row = &self.weights.value[o * self.inputs..(o + 1) * self.inputs];
                row.iter().zip(x).map(|(w, xi)| w * xi).sum::<f64>() + self.bias.value[o]
            })
            .collect()
    }

    /// Accumulate gradients for input `x` and upstream `dy`; returns `dx`.
    pub(crate) fn backward(&mut self, x: &[f64], dy: &[f64]) -> Vec<f64> {
        let mut dx = vec![0.0; self.inputs];
        for (o, &g) in dy.iter().enumerate() {
            if g == 0.0 {
                continue;
            }
            self.bias.grad[o] += g;
            let base = o * self.inputs;
            for i in 0..self.inputs {
                self.weights.grad[base + i] += g * x[i];
                dx[i] += g * self.weights.value[base + i];
            }
        }
        dx
    }

    pub(crate) fn params_mut(&mut self) -> [&mut Param; 2] {
        [&mut self.weights, &mut self.bias]
    }
}
