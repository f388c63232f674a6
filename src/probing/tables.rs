use std::collections::HashMap;

use crate::error::ProbeError;
use crate::types::FrameSequence;

/// Hidden vectors indexed by `[layer][utterance]`, one frame sequence per cell.
///
/// Filled one utterance at a time; every push carries all layers of that utterance.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameStateTable {
    layers: Vec<Vec<FrameSequence>>,
}

impl FrameStateTable {
    pub fn new(num_layers: usize) -> Self {
        Self {
            layers: vec![Vec::new(); num_layers],
        }
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn num_utterances(&self) -> usize {
        self.layers.first().map_or(0, Vec::len)
    }

    /// Appends one utterance; `per_layer` must hold exactly one sequence per layer.
    pub fn push_utterance(&mut self, per_layer: Vec<FrameSequence>) -> Result<usize, ProbeError> {
        if per_layer.len() != self.layers.len() {
            return Err(ProbeError::invalid_input(format!(
                "utterance has {} layers of hidden states, table expects {}",
                per_layer.len(),
                self.layers.len()
            )));
        }
        let index = self.num_utterances();
        for (layer, frames) in self.layers.iter_mut().zip(per_layer) {
            layer.push(frames);
        }
        Ok(index)
    }

    pub fn get(&self, layer: usize, utterance: usize) -> Option<&FrameSequence> {
        self.layers.get(layer)?.get(utterance)
    }

    pub fn layer(&self, layer: usize) -> Option<&[FrameSequence]> {
        self.layers.get(layer).map(Vec::as_slice)
    }

    /// Keeps only the first `num_layers` layers.
    pub fn truncate_layers(&mut self, num_layers: usize) {
        self.layers.truncate(num_layers);
    }
}

/// Hidden vectors of one layer grouped by fine-grained phoneme label.
///
/// Labels iterate in the order they were first seen.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PhonemeBuckets {
    index: HashMap<String, usize>,
    buckets: Vec<(String, Vec<Vec<f32>>)>,
}

impl PhonemeBuckets {
    pub fn push(&mut self, label: &str, vector: Vec<f32>) {
        let slot = match self.index.get(label) {
            Some(&slot) => slot,
            None => {
                self.buckets.push((label.to_string(), Vec::new()));
                self.index.insert(label.to_string(), self.buckets.len() - 1);
                self.buckets.len() - 1
            }
        };
        self.buckets[slot].1.push(vector);
    }

    pub fn get(&self, label: &str) -> Option<&[Vec<f32>]> {
        self.index
            .get(label)
            .map(|&slot| self.buckets[slot].1.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Vec<f32>])> + '_ {
        self.buckets
            .iter()
            .map(|(label, vectors)| (label.as_str(), vectors.as_slice()))
    }

    pub fn num_labels(&self) -> usize {
        self.buckets.len()
    }

    pub fn num_vectors(&self) -> usize {
        self.buckets.iter().map(|(_, v)| v.len()).sum()
    }
}

/// `[layer] -> label -> vectors`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PhonemeStateTable {
    layers: Vec<PhonemeBuckets>,
}

impl PhonemeStateTable {
    pub fn new(num_layers: usize) -> Self {
        Self {
            layers: vec![PhonemeBuckets::default(); num_layers],
        }
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn layer(&self, layer: usize) -> Option<&PhonemeBuckets> {
        self.layers.get(layer)
    }

    pub(crate) fn layer_mut(&mut self, layer: usize) -> Option<&mut PhonemeBuckets> {
        self.layers.get_mut(layer)
    }
}
