//! Trainable sequence classifiers.
//!
//! Every model maps a window of [`WINDOW_LEN`](crate::forecast::window::WINDOW_LEN)
//! past values to a probability distribution over the ten next values.
//! Networks are small enough to train on the CPU inside a blocking task.

mod conv;
mod dense;
mod ensemble;
mod mlp;
mod recurrent;
pub(crate) mod train;

use std::fmt;

use serde::Serialize;

pub use ensemble::Ensemble;
pub use train::{FitConfig, FitReport};

use crate::error::ModelError;
use crate::forecast::window::{WINDOW_LEN, Window};
use train::{Network, encode, softmax};

/// Number of distinct values a draw can take.
pub const NUM_CLASSES: usize = 10;

/// Shape of a model, for logging and reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Architecture {
    Mlp { hidden: Vec<usize> },
    Convolutional { filters: usize, hidden: Vec<usize>, skip_input: bool },
    Recurrent { units: usize, hidden: Vec<usize> },
    Ensemble { members: usize },
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mlp { hidden } => write!(f, "mlp{:?}", hidden),
            Self::Convolutional {
                filters,
                hidden,
                skip_input,
            } => {
                write!(f, "conv{}{:?}", filters, hidden)?;
                if *skip_input {
                    write!(f, "+skip")?;
                }
                Ok(())
            }
            Self::Recurrent { units, hidden } => write!(f, "rnn{}{:?}", units, hidden),
            Self::Ensemble { members } => write!(f, "ensemble×{}", members),
        }
    }
}

/// A classifier the registry can train, clone and query.
pub trait SequenceModel: Send + Sync + fmt::Debug {
    fn architecture(&self) -> Architecture;

    /// Fit on `samples`, updating the model in place.
    fn fit(&mut self, samples: &[Window], config: &FitConfig) -> Result<FitReport, ModelError>;

    /// Class probabilities for a raw window of values 0-9.
    fn predict_proba(&self, input: &[u8]) -> Result<Vec<f64>, ModelError>;

    fn clone_box(&self) -> Box<dyn SequenceModel>;
}

impl Clone for Box<dyn SequenceModel> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Adapts a single [`Network`] to [`SequenceModel`], carrying its optimizer step.
#[derive(Debug, Clone)]
struct NetworkModel<N> {
    architecture: Architecture,
    net: N,
    steps: u64,
}

impl<N: Network> NetworkModel<N> {
    fn boxed(architecture: Architecture, net: N) -> Box<dyn SequenceModel> {
        Box::new(Self {
            architecture,
            net,
            steps: 0,
        })
    }
}

impl<N: Network> SequenceModel for NetworkModel<N> {
    fn architecture(&self) -> Architecture {
        self.architecture.clone()
    }

    fn fit(&mut self, samples: &[Window], config: &FitConfig) -> Result<FitReport, ModelError> {
        train::fit(&mut self.net, &mut self.steps, samples, config)
    }

    fn predict_proba(&self, input: &[u8]) -> Result<Vec<f64>, ModelError> {
        let encoded = encode(input)?;
        Ok(softmax(&self.net.logits(&encoded)))
    }

    fn clone_box(&self) -> Box<dyn SequenceModel> {
        Box::new(self.clone())
    }
}

/// Dense network over the raw window.
pub fn mlp(hidden: &[usize], seed: u64) -> Box<dyn SequenceModel> {
    NetworkModel::boxed(
        Architecture::Mlp {
            hidden: hidden.to_vec(),
        },
        mlp::Mlp::new(WINDOW_LEN, hidden, seed),
    )
}

/// Convolutional feature extractor with an MLP head.
pub fn convolutional(
    filters: usize,
    hidden: &[usize],
    skip_input: bool,
    seed: u64,
) -> Box<dyn SequenceModel> {
    NetworkModel::boxed(
        Architecture::Convolutional {
            filters,
            hidden: hidden.to_vec(),
            skip_input,
        },
        conv::ConvNet::new(WINDOW_LEN, filters, hidden, skip_input, seed),
    )
}

/// Elman recurrent network with an MLP head on the final state.
pub fn recurrent(units: usize, hidden: &[usize], seed: u64) -> Box<dyn SequenceModel> {
    NetworkModel::boxed(
        Architecture::Recurrent {
            units,
            hidden: hidden.to_vec(),
        },
        recurrent::Recurrent::new(units, hidden, seed),
    )
}

/// Averaged ensemble of identically shaped MLPs.
pub fn ensemble(members: usize, hidden: &[usize], seed: u64) -> Box<dyn SequenceModel> {
    Box::new(Ensemble::new(members, WINDOW_LEN, hidden, seed))
}
