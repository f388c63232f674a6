use crate::error::ProbeError;
use crate::types::FrameSequence;

/// Frozen encoder that maps one normalised waveform to its per-layer hidden states.
pub trait HiddenStateBackend: Send + Sync {
    /// One [`FrameSequence`] per layer, index 0 being the pre-transformer state.
    fn hidden_states(&self, normalized_audio: &[f32]) -> Result<Vec<FrameSequence>, ProbeError>;

    fn num_layers(&self) -> usize;

    fn hidden_size(&self) -> usize;

    /// Waveform samples between consecutive output frames.
    fn samples_per_frame(&self) -> usize;

    /// Shortest waveform that still yields one encoder frame.
    fn min_input_samples(&self) -> usize {
        1
    }

    fn device_label(&self) -> String;
}
