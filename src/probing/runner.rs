use serde::Serialize;

use crate::config::CategoryGroup;
use crate::error::ProbeError;
use crate::probing::balance::{build_balanced, ensure_probeable};
use crate::probing::probe::{accuracy, ProbeFactory};
use crate::probing::tables::{PhonemeBuckets, PhonemeStateTable};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LayerResult {
    pub layer: usize,
    pub accuracy: f64,
    pub train_samples: usize,
    pub test_samples: usize,
    pub classes: usize,
}

/// Accuracy per layer for one category group, ordered by layer index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupAccuracy {
    pub group: String,
    pub labels: Vec<String>,
    pub layers: Vec<LayerResult>,
}

impl GroupAccuracy {
    pub fn accuracies(&self) -> Vec<f64> {
        self.layers.iter().map(|r| r.accuracy).collect()
    }

    /// Layer with the highest accuracy; the earliest one wins ties.
    pub fn best_layer(&self) -> Option<&LayerResult> {
        self.layers
            .iter()
            .fold(None, |best: Option<&LayerResult>, r| match best {
                Some(b) if b.accuracy >= r.accuracy => Some(b),
                _ => Some(r),
            })
    }
}

/// Trains and scores one independent probe per (layer, category group).
pub struct LayerwiseProbeRunner<'a> {
    factory: &'a dyn ProbeFactory,
    num_layers: usize,
}

impl<'a> LayerwiseProbeRunner<'a> {
    pub fn new(factory: &'a dyn ProbeFactory, num_layers: usize) -> Self {
        Self {
            factory,
            num_layers,
        }
    }

    pub fn run(
        &self,
        train: &PhonemeStateTable,
        test: &PhonemeStateTable,
        groups: &[CategoryGroup],
    ) -> Result<Vec<GroupAccuracy>, ProbeError> {
        for (split, table) in [("train", train), ("test", test)] {
            if table.num_layers() < self.num_layers {
                return Err(ProbeError::invalid_input(format!(
                    "{split} table has {} layers, {} requested",
                    table.num_layers(),
                    self.num_layers
                )));
            }
        }

        let mut results = Vec::with_capacity(groups.len());
        for group in groups {
            let mut layers = Vec::with_capacity(self.num_layers);
            for layer in 0..self.num_layers {
                let (Some(train_layer), Some(test_layer)) = (train.layer(layer), test.layer(layer))
                else {
                    return Err(ProbeError::invalid_input(format!(
                        "layer {layer} is missing from the phoneme tables"
                    )));
                };
                let result = self.probe_layer(train_layer, test_layer, layer, group)?;
                tracing::info!(
                    group = %group.name,
                    layer,
                    accuracy = result.accuracy,
                    train_samples = result.train_samples,
                    test_samples = result.test_samples,
                    "probe evaluated"
                );
                layers.push(result);
            }
            results.push(GroupAccuracy {
                group: group.name.clone(),
                labels: group.labels.clone(),
                layers,
            });
        }
        Ok(results)
    }

    pub fn probe_layer(
        &self,
        train: &PhonemeBuckets,
        test: &PhonemeBuckets,
        layer: usize,
        group: &CategoryGroup,
    ) -> Result<LayerResult, ProbeError> {
        let train_set = build_balanced(train, Some(&group.labels))?;
        ensure_probeable(&train_set, layer, &group.name)?;
        let test_set = build_balanced(test, Some(&group.labels))?;
        ensure_probeable(&test_set, layer, &group.name)?;

        let mut probe = self.factory.create();
        probe.fit(&train_set.vectors, &train_set.labels)?;
        let predicted = probe.predict(&test_set.vectors)?;
        Ok(LayerResult {
            layer,
            accuracy: accuracy(&predicted, &test_set.labels)?,
            train_samples: train_set.len(),
            test_samples: test_set.len(),
            classes: train_set.num_classes(),
        })
    }
}
