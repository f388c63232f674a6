use std::path::Path;

use crate::config::{Wav2Vec2Config, Wav2Vec2ModelConfig};
use crate::error::ProbeError;
use crate::pipeline::extractor::HiddenStateExtractor;
use crate::pipeline::model_runtime::build_candle_backend;
use crate::pipeline::traits::HiddenStateBackend;

pub struct HiddenStateExtractorBuilder {
    config: Wav2Vec2Config,
    backend: Option<Box<dyn HiddenStateBackend>>,
}

impl HiddenStateExtractorBuilder {
    pub fn new(config: Wav2Vec2Config) -> Self {
        Self {
            config,
            backend: None,
        }
    }

    /// Uses `backend` instead of loading the candle encoder from disk.
    pub fn with_backend(mut self, backend: Box<dyn HiddenStateBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn build(self) -> Result<HiddenStateExtractor, ProbeError> {
        let expected_sample_rate_hz = if self.config.expected_sample_rate_hz == 0 {
            Wav2Vec2Config::DEFAULT_SAMPLE_RATE_HZ
        } else {
            self.config.expected_sample_rate_hz
        };

        let backend = match self.backend {
            Some(backend) => backend,
            None => {
                let model_cfg = Wav2Vec2ModelConfig::load(Path::new(&self.config.config_path))?;
                tracing::info!(
                    frame_stride_ms = model_cfg.frame_stride_ms(expected_sample_rate_hz),
                    min_input_samples = model_cfg.min_input_samples(),
                    "encoder geometry"
                );
                build_candle_backend(&self.config, &model_cfg)?
            }
        };
        if backend.num_layers() == 0 {
            return Err(ProbeError::invalid_input("backend reports zero hidden layers"));
        }
        if backend.samples_per_frame() == 0 {
            return Err(ProbeError::invalid_input("backend reports a zero frame stride"));
        }

        Ok(HiddenStateExtractor::new(backend, expected_sample_rate_hz))
    }
}
