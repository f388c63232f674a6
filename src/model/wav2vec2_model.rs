use candle_core::Tensor;
use candle_nn::VarBuilder;

use crate::config::Wav2Vec2ModelConfig;
use crate::model::encoder::Encoder;
use crate::model::feature_extractor::FeatureExtractor;
use crate::model::feature_projection::FeatureProjection;

/// Headless wav2vec2: conv front end plus transformer encoder, inference only.
pub(crate) struct Wav2Vec2Model {
    feature_extractor: FeatureExtractor,
    feature_projection: FeatureProjection,
    encoder: Encoder,
}

impl Wav2Vec2Model {
    /// Accepts both bare checkpoints and ones saved from a task head, whose
    /// tensors sit under a `wav2vec2.` prefix.
    pub(crate) fn load(cfg: &Wav2Vec2ModelConfig, vb: VarBuilder) -> candle_core::Result<Self> {
        let vb = if vb.contains_tensor("wav2vec2.feature_projection.projection.weight") {
            vb.pp("wav2vec2")
        } else {
            vb
        };
        Ok(Self {
            feature_extractor: FeatureExtractor::load(cfg, vb.pp("feature_extractor"))?,
            feature_projection: FeatureProjection::load(cfg, vb.pp("feature_projection"))?,
            encoder: Encoder::load(cfg, vb.pp("encoder"))?,
        })
    }

    /// `audio` is `(batch, samples)`; returns one `(batch, frames, hidden)` tensor per layer.
    pub(crate) fn forward_hidden_states(&self, audio: &Tensor) -> candle_core::Result<Vec<Tensor>> {
        let features = self.feature_extractor.forward(&audio.unsqueeze(1)?)?;
        let projected = self
            .feature_projection
            .forward(&features.transpose(1, 2)?.contiguous()?)?;
        self.encoder.forward_hidden_states(&projected)
    }
}
