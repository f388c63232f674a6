use crate::error::ProbeError;
use crate::pipeline::traits::HiddenStateBackend;
use crate::probing::tables::FrameStateTable;
use crate::types::{FrameSequence, Utterance};

/// Runs every utterance through the frozen encoder, one at a time.
pub struct HiddenStateExtractor {
    backend: Box<dyn HiddenStateBackend>,
    expected_sample_rate_hz: u32,
}

impl HiddenStateExtractor {
    pub(crate) fn new(backend: Box<dyn HiddenStateBackend>, expected_sample_rate_hz: u32) -> Self {
        Self {
            backend,
            expected_sample_rate_hz,
        }
    }

    pub fn num_layers(&self) -> usize {
        self.backend.num_layers()
    }

    pub fn hidden_size(&self) -> usize {
        self.backend.hidden_size()
    }

    pub fn samples_per_frame(&self) -> usize {
        self.backend.samples_per_frame()
    }

    pub fn expected_sample_rate_hz(&self) -> u32 {
        self.expected_sample_rate_hz
    }

    pub fn device_label(&self) -> String {
        self.backend.device_label()
    }

    /// Hidden states of one utterance, one [`FrameSequence`] per layer.
    ///
    /// A waveform shorter than the encoder's receptive field yields an empty
    /// sequence on every layer.
    pub fn extract_one(&self, utterance: &Utterance) -> Result<Vec<FrameSequence>, ProbeError> {
        if utterance.sample_rate_hz != self.expected_sample_rate_hz {
            return Err(ProbeError::invalid_input(format!(
                "utterance '{}' is sampled at {} Hz, the encoder expects {} Hz",
                utterance.id, utterance.sample_rate_hz, self.expected_sample_rate_hz
            )));
        }

        let num_layers = self.backend.num_layers();
        if utterance.samples.len() < self.backend.min_input_samples() {
            tracing::warn!(
                id = %utterance.id,
                samples = utterance.samples.len(),
                min_samples = self.backend.min_input_samples(),
                "waveform shorter than the encoder receptive field; no frames"
            );
            return Ok(vec![FrameSequence::empty(self.backend.hidden_size()); num_layers]);
        }

        let normalized = normalize_audio(&utterance.samples);
        let states = self.backend.hidden_states(&normalized)?;
        if states.len() != num_layers {
            return Err(ProbeError::runtime(
                "collect hidden states",
                format!("backend returned {} layers, expected {num_layers}", states.len()),
            ));
        }
        tracing::debug!(
            id = %utterance.id,
            samples = utterance.samples.len(),
            frames = states.first().map_or(0, FrameSequence::len),
            "extracted hidden states"
        );
        Ok(states)
    }

    /// Builds the `[layer][utterance]` table in input order. `on_progress` is
    /// called with `(done, total)` after every utterance.
    pub fn extract(
        &self,
        utterances: &[Utterance],
        mut on_progress: impl FnMut(usize, usize),
    ) -> Result<FrameStateTable, ProbeError> {
        let mut table = FrameStateTable::new(self.backend.num_layers());
        for (idx, utterance) in utterances.iter().enumerate() {
            table.push_utterance(self.extract_one(utterance)?)?;
            on_progress(idx + 1, utterances.len());
        }
        Ok(table)
    }
}

/// Zero mean, unit variance; a silent waveform stays at zero.
pub fn normalize_audio(samples: &[f32]) -> Vec<f32> {
    if samples.is_empty() {
        return Vec::new();
    }
    let n = samples.len() as f64;
    let mean = samples.iter().map(|&x| x as f64).sum::<f64>() / n;
    let var = samples
        .iter()
        .map(|&x| {
            let d = x as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / n;
    let std = (var + 1e-7).sqrt();
    samples
        .iter()
        .map(|&x| ((x as f64 - mean) / std) as f32)
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::types::PhonemeDetail;

    /// One frame per 320 samples; layer `l` fills every value with `l`.
    struct StrideBackend {
        layers: usize,
        calls: AtomicUsize,
    }

    impl HiddenStateBackend for StrideBackend {
        fn hidden_states(&self, normalized_audio: &[f32]) -> Result<Vec<FrameSequence>, ProbeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let frames = normalized_audio.len() / 320;
            (0..self.layers)
                .map(|l| FrameSequence::from_flat(2, vec![l as f32; frames * 2]))
                .collect()
        }

        fn num_layers(&self) -> usize {
            self.layers
        }

        fn hidden_size(&self) -> usize {
            2
        }

        fn samples_per_frame(&self) -> usize {
            320
        }

        fn min_input_samples(&self) -> usize {
            400
        }

        fn device_label(&self) -> String {
            "mock".to_string()
        }
    }

    fn extractor(layers: usize) -> HiddenStateExtractor {
        HiddenStateExtractor::new(
            Box::new(StrideBackend {
                layers,
                calls: AtomicUsize::new(0),
            }),
            16_000,
        )
    }

    fn utterance(id: &str, rate: u32, len: usize) -> Utterance {
        Utterance {
            id: id.to_string(),
            sample_rate_hz: rate,
            samples: (0..len).map(|i| (i % 7) as f32 * 0.1).collect(),
            transcript: String::new(),
            phonemes: PhonemeDetail::default(),
        }
    }

    #[test]
    fn normalization_gives_zero_mean_unit_variance() {
        let out = normalize_audio(&[1.0, 2.0, 3.0, 4.0]);
        let mean: f32 = out.iter().sum::<f32>() / 4.0;
        let var: f32 = out.iter().map(|x| (x - mean).powi(2)).sum::<f32>() / 4.0;
        assert!(mean.abs() < 1e-6);
        assert!((var - 1.0).abs() < 1e-4);
        assert_eq!(normalize_audio(&[0.0; 3]), vec![0.0; 3]);
        assert!(normalize_audio(&[]).is_empty());
    }

    #[test]
    fn table_has_one_sequence_per_layer_and_utterance() {
        let ex = extractor(13);
        let utts = vec![utterance("a", 16_000, 16_000), utterance("b", 16_000, 3_200)];
        let mut seen = Vec::new();
        let table = ex.extract(&utts, |done, total| seen.push((done, total))).unwrap();
        assert_eq!(table.num_layers(), 13);
        assert_eq!(table.num_utterances(), 2);
        assert_eq!(table.get(0, 0).unwrap().len(), 50);
        assert_eq!(table.get(12, 1).unwrap().len(), 10);
        assert_eq!(table.get(12, 1).unwrap().frame(0).unwrap(), &[12.0, 12.0][..]);
        assert_eq!(seen, vec![(1, 2), (2, 2)]);
    }

    #[test]
    fn short_waveform_gives_empty_sequences() {
        let ex = extractor(3);
        let states = ex.extract_one(&utterance("tiny", 16_000, 399)).unwrap();
        assert_eq!(states.len(), 3);
        assert!(states.iter().all(|s| s.is_empty() && s.dim() == 2));
        assert!(ex.extract_one(&utterance("empty", 16_000, 0)).unwrap()[0].is_empty());
    }

    #[test]
    fn wrong_sample_rate_is_fatal() {
        let err = extractor(2)
            .extract(&[utterance("hi", 8_000, 8_000)], |_, _| {})
            .unwrap_err();
        assert!(matches!(err, ProbeError::InvalidInput { .. }));
        assert!(err.to_string().contains("8000 Hz"));
    }
}
