use std::collections::BTreeSet;

use candle_core::{DType, Device, Tensor, Var, D};
use candle_nn::{AdamW, Optimizer, ParamsAdamW};

use crate::config::ClassifierConfig;
use crate::error::ProbeError;

/// Supervised batch learner over fixed-width feature vectors.
pub trait ProbeClassifier {
    fn fit(&mut self, features: &[Vec<f32>], labels: &[String]) -> Result<(), ProbeError>;

    fn predict(&self, features: &[Vec<f32>]) -> Result<Vec<String>, ProbeError>;
}

/// Builds a fresh, untrained classifier for every (layer, group) probe.
pub trait ProbeFactory {
    fn create(&self) -> Box<dyn ProbeClassifier>;
}

impl<F> ProbeFactory for F
where
    F: Fn() -> Box<dyn ProbeClassifier>,
{
    fn create(&self) -> Box<dyn ProbeClassifier> {
        self()
    }
}

/// Fraction of positions where `predicted` equals `expected`.
pub fn accuracy(predicted: &[String], expected: &[String]) -> Result<f64, ProbeError> {
    if predicted.len() != expected.len() {
        return Err(ProbeError::invalid_input(format!(
            "{} predictions for {} labels",
            predicted.len(),
            expected.len()
        )));
    }
    if expected.is_empty() {
        return Err(ProbeError::invalid_input("accuracy of an empty evaluation set"));
    }
    let hits = predicted.iter().zip(expected).filter(|(p, e)| p == e).count();
    Ok(hits as f64 / expected.len() as f64)
}

struct TrainedState {
    classes: Vec<String>,
    weight: Tensor,
    bias: Tensor,
    /// Per-feature mean and scale from the training set, when standardising.
    scaling: Option<(Tensor, Tensor)>,
}

/// Multinomial logistic regression trained full-batch with AdamW on candle.
///
/// Weights start at zero and every step sees the same batch, so a fit is
/// deterministic for a given input.
pub struct SoftmaxRegressionProbe {
    config: ClassifierConfig,
    device: Device,
    state: Option<TrainedState>,
}

impl SoftmaxRegressionProbe {
    pub fn new(config: ClassifierConfig) -> Self {
        Self::on_device(config, Device::Cpu)
    }

    pub fn on_device(config: ClassifierConfig, device: Device) -> Self {
        Self {
            config,
            device,
            state: None,
        }
    }

    pub fn classes(&self) -> Option<&[String]> {
        self.state.as_ref().map(|s| s.classes.as_slice())
    }

    fn features_tensor(&self, features: &[Vec<f32>]) -> Result<Tensor, ProbeError> {
        let dim = features.first().map_or(0, Vec::len);
        if dim == 0 {
            return Err(ProbeError::invalid_input("feature vectors must be non-empty"));
        }
        let mut flat = Vec::with_capacity(features.len() * dim);
        for (idx, row) in features.iter().enumerate() {
            if row.len() != dim {
                return Err(ProbeError::invalid_input(format!(
                    "feature vector {idx} has width {}, expected {dim}",
                    row.len()
                )));
            }
            flat.extend_from_slice(row);
        }
        Tensor::from_vec(flat, (features.len(), dim), &self.device)
            .map_err(|e| ProbeError::runtime("feature tensor", e))
    }

    fn scale(xs: &Tensor, scaling: &Option<(Tensor, Tensor)>) -> candle_core::Result<Tensor> {
        match scaling {
            Some((mean, std)) => xs.broadcast_sub(mean)?.broadcast_div(std),
            None => Ok(xs.clone()),
        }
    }

    fn train(
        &self,
        xs: &Tensor,
        targets: &Tensor,
        num_classes: usize,
    ) -> candle_core::Result<(Tensor, Tensor, usize, f32)> {
        let (n, dim) = xs.dims2()?;
        let weight = Var::zeros((dim, num_classes), DType::F32, &self.device)?;
        let bias = Var::zeros(num_classes, DType::F32, &self.device)?;
        let params = ParamsAdamW {
            lr: self.config.learning_rate,
            weight_decay: 0.0,
            ..Default::default()
        };
        let mut optimizer = AdamW::new(vec![weight.clone(), bias.clone()], params)?;
        let penalty = self.config.l2_strength / (2.0 * n as f64);

        let mut previous = f32::INFINITY;
        let mut last = f32::INFINITY;
        let mut steps = 0;
        for _ in 0..self.config.max_iter {
            let logits = xs
                .matmul(weight.as_tensor())?
                .broadcast_add(bias.as_tensor())?;
            let data_loss = candle_nn::loss::cross_entropy(&logits, targets)?;
            let l2 = (weight.as_tensor().sqr()?.sum_all()? * penalty)?;
            let loss = (data_loss + l2)?;
            optimizer.backward_step(&loss)?;
            steps += 1;
            last = loss.to_scalar::<f32>()?;
            if ((previous - last).abs() as f64) < self.config.tolerance {
                break;
            }
            previous = last;
        }
        Ok((weight.as_tensor().clone(), bias.as_tensor().clone(), steps, last))
    }
}

impl ProbeClassifier for SoftmaxRegressionProbe {
    fn fit(&mut self, features: &[Vec<f32>], labels: &[String]) -> Result<(), ProbeError> {
        if features.len() != labels.len() {
            return Err(ProbeError::invalid_input(format!(
                "{} feature vectors for {} labels",
                features.len(),
                labels.len()
            )));
        }
        let classes: Vec<String> = labels
            .iter()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if classes.len() < 2 {
            return Err(ProbeError::invalid_input(format!(
                "a classifier needs at least two classes, got {}",
                classes.len()
            )));
        }

        let raw = self.features_tensor(features)?;
        let scaling = if self.config.standardize {
            let stats = || -> candle_core::Result<(Tensor, Tensor)> {
                let mean = raw.mean_keepdim(0)?;
                let var = raw.broadcast_sub(&mean)?.sqr()?.mean_keepdim(0)?;
                // Zero-variance features are centred but not rescaled.
                let std = var.sqrt()?;
                let std = std.ge(1e-6)?.where_cond(&std, &std.ones_like()?)?;
                Ok((mean, std))
            };
            Some(stats().map_err(|e| ProbeError::runtime("feature statistics", e))?)
        } else {
            None
        };
        let xs = Self::scale(&raw, &scaling).map_err(|e| ProbeError::runtime("scale features", e))?;

        let target_ids: Vec<u32> = labels
            .iter()
            .map(|label| classes.binary_search(label).map(|idx| idx as u32))
            .collect::<Result<_, _>>()
            .map_err(|_| ProbeError::invalid_input("label outside the fitted classes"))?;
        let targets = Tensor::from_vec(target_ids, labels.len(), &self.device)
            .map_err(|e| ProbeError::runtime("target tensor", e))?;

        let (weight, bias, steps, loss) = self
            .train(&xs, &targets, classes.len())
            .map_err(|e| ProbeError::runtime("fit linear probe", e))?;
        tracing::debug!(
            samples = labels.len(),
            classes = classes.len(),
            steps,
            loss,
            "linear probe fitted"
        );

        self.state = Some(TrainedState {
            classes,
            weight,
            bias,
            scaling,
        });
        Ok(())
    }

    fn predict(&self, features: &[Vec<f32>]) -> Result<Vec<String>, ProbeError> {
        let state = self
            .state
            .as_ref()
            .ok_or_else(|| ProbeError::invalid_input("predict called before fit"))?;
        if features.is_empty() {
            return Ok(Vec::new());
        }
        let raw = self.features_tensor(features)?;
        let predicted = Self::scale(&raw, &state.scaling)
            .and_then(|xs| xs.matmul(&state.weight))
            .and_then(|logits| logits.broadcast_add(&state.bias))
            .and_then(|logits| logits.argmax(D::Minus1))
            .and_then(|ids| ids.to_vec1::<u32>())
            .map_err(|e| ProbeError::runtime("linear probe predict", e))?;
        Ok(predicted
            .into_iter()
            .map(|idx| state.classes[idx as usize].clone())
            .collect())
    }
}
