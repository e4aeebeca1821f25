//! Bagged ensemble of MLPs.

use super::mlp::Mlp;
use super::train::{FitConfig, FitReport, Network, encode, fit, softmax};
use super::{Architecture, SequenceModel};
use crate::error::ModelError;
use crate::forecast::window::Window;

/// Members share an architecture but start from distinct seeds; the
/// ensemble distribution is the mean of member distributions.
#[derive(Debug, Clone)]
pub struct Ensemble {
    members: Vec<Mlp>,
    steps: Vec<u64>,
}

impl Ensemble {
    pub(crate) fn new(members: usize, inputs: usize, hidden: &[usize], seed: u64) -> Self {
        let members: Vec<Mlp> = (0..members as u64)
            .map(|i| Mlp::new(inputs, hidden, seed.wrapping_add(i.wrapping_mul(7919))))
            .collect();
        let steps = vec![0; members.len()];
        Self { members, steps }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

impl SequenceModel for Ensemble {
    fn architecture(&self) -> Architecture {
        Architecture::Ensemble {
            members: self.members.len(),
        }
    }

    fn fit(&mut self, samples: &[Window], config: &FitConfig) -> Result<FitReport, ModelError> {
        let mut reports = Vec::with_capacity(self.members.len());
        for (i, (member, steps)) in self.members.iter_mut().zip(&mut self.steps).enumerate() {
            let member_config = FitConfig {
                seed: config.seed.wrapping_add(i as u64),
                ..config.clone()
            };
            reports.push(fit(member, steps, samples, &member_config)?);
        }
        let count = reports.len().max(1) as f64;
        let loss = reports.iter().map(|r| r.loss).sum::<f64>() / count;
        let validation_loss = reports
            .iter()
            .map(|r| r.validation_loss)
            .sum::<Option<f64>>()
            .map(|sum| sum / count);
        Ok(FitReport {
            loss,
            validation_loss,
            epochs: reports.first().map_or(config.epochs, |r| r.epochs),
            samples: reports.first().map_or(0, |r| r.samples),
        })
    }

    fn predict_proba(&self, input: &[u8]) -> Result<Vec<f64>, ModelError> {
        let encoded = encode(input)?;
        let mut mean = vec![0.0; super::NUM_CLASSES];
        for member in &self.members {
            for (acc, p) in mean.iter_mut().zip(softmax(&member.logits(&encoded))) {
                *acc += p;
            }
        }
        let count = self.members.len().max(1) as f64;
        Ok(mean.into_iter().map(|p| p / count).collect())
    }

    fn clone_box(&self) -> Box<dyn SequenceModel> {
        Box::new(self.clone())
    }
}
