use crate::error::ProbeError;

/// One corpus entry. Immutable once loaded.
#[derive(Debug, Clone)]
pub struct Utterance {
    pub id: String,
    pub sample_rate_hz: u32,
    pub samples: Vec<f32>,
    pub transcript: String,
    pub phonemes: PhonemeDetail,
}

/// Phoneme-level time alignment as parallel sequences of sample offsets and labels.
///
/// Each segment covers samples `[start, stop)`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhonemeDetail {
    start: Vec<usize>,
    stop: Vec<usize>,
    label: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhonemeSegment<'a> {
    pub start: usize,
    pub stop: usize,
    pub label: &'a str,
}

impl PhonemeDetail {
    pub fn new(start: Vec<usize>, stop: Vec<usize>, label: Vec<String>) -> Result<Self, ProbeError> {
        if start.len() != stop.len() || start.len() != label.len() {
            return Err(ProbeError::invalid_input(format!(
                "phoneme detail sequences differ in length: start={}, stop={}, label={}",
                start.len(),
                stop.len(),
                label.len()
            )));
        }
        Ok(Self { start, stop, label })
    }

    pub fn from_segments<'a>(segments: impl IntoIterator<Item = (usize, usize, &'a str)>) -> Self {
        let mut detail = Self::default();
        for (start, stop, label) in segments {
            detail.start.push(start);
            detail.stop.push(stop);
            detail.label.push(label.to_string());
        }
        detail
    }

    pub fn len(&self) -> usize {
        self.label.len()
    }

    pub fn is_empty(&self) -> bool {
        self.label.is_empty()
    }

    pub fn segments(&self) -> impl Iterator<Item = PhonemeSegment<'_>> + '_ {
        self.start
            .iter()
            .zip(&self.stop)
            .zip(&self.label)
            .map(|((&start, &stop), label)| PhonemeSegment {
                start,
                stop,
                label: label.as_str(),
            })
    }

    pub fn labels(&self) -> &[String] {
        &self.label
    }
}

/// Ordered hidden vectors for one (layer, utterance) pair, one row per frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameSequence {
    dim: usize,
    data: Vec<f32>,
}

impl FrameSequence {
    pub fn empty(dim: usize) -> Self {
        Self {
            dim,
            data: Vec::new(),
        }
    }

    /// Builds a sequence from a row-major `frames x dim` buffer.
    pub fn from_flat(dim: usize, data: Vec<f32>) -> Result<Self, ProbeError> {
        if dim == 0 && !data.is_empty() {
            return Err(ProbeError::invalid_input(
                "frame sequence with zero width cannot hold data",
            ));
        }
        if dim > 0 && data.len() % dim != 0 {
            return Err(ProbeError::invalid_input(format!(
                "frame buffer of {} values is not a multiple of width {dim}",
                data.len()
            )));
        }
        Ok(Self { dim, data })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn len(&self) -> usize {
        if self.dim == 0 {
            0
        } else {
            self.data.len() / self.dim
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn frame(&self, index: usize) -> Option<&[f32]> {
        if index >= self.len() {
            return None;
        }
        let start = index * self.dim;
        Some(&self.data[start..start + self.dim])
    }

    pub fn iter(&self) -> impl Iterator<Item = &[f32]> + '_ {
        // chunks_exact panics on a zero chunk size.
        self.data.chunks_exact(self.dim.max(1)).take(self.len())
    }
}

/// Parallel (vector, coarse label) sequences fed to a probe.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabeledDataset {
    pub vectors: Vec<Vec<f32>>,
    pub labels: Vec<String>,
}

impl LabeledDataset {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn push(&mut self, vector: Vec<f32>, label: impl Into<String>) {
        self.vectors.push(vector);
        self.labels.push(label.into());
    }

    /// Per-class counts in first-encountered label order.
    pub fn class_counts(&self) -> Vec<(String, usize)> {
        let mut counts: Vec<(String, usize)> = Vec::new();
        for label in &self.labels {
            match counts.iter_mut().find(|(seen, _)| seen == label) {
                Some((_, count)) => *count += 1,
                None => counts.push((label.clone(), 1)),
            }
        }
        counts
    }

    pub fn num_classes(&self) -> usize {
        self.class_counts().len()
    }
}
