use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;

use crate::config::{Wav2Vec2Config, Wav2Vec2ModelConfig};
use crate::error::ProbeError;
use crate::model::wav2vec2_model::Wav2Vec2Model;
use crate::pipeline::traits::HiddenStateBackend;
use crate::types::FrameSequence;

pub(crate) fn build_candle_backend(
    config: &Wav2Vec2Config,
    model_cfg: &Wav2Vec2ModelConfig,
) -> Result<Box<dyn HiddenStateBackend>, ProbeError> {
    Ok(Box::new(CandleHiddenStateBackend::load(config, model_cfg)?))
}

pub(crate) fn select_device(device: &str) -> Result<Device, ProbeError> {
    match device {
        "cpu" => Ok(Device::Cpu),
        "cuda" => Device::new_cuda(0).map_err(|e| ProbeError::runtime("CUDA init", e)),
        other => Err(ProbeError::invalid_input(format!(
            "unknown device '{other}' (expected 'cpu' or 'cuda')"
        ))),
    }
}

struct CandleHiddenStateBackend {
    model: Wav2Vec2Model,
    device: Device,
    num_layers: usize,
    hidden_size: usize,
    samples_per_frame: usize,
    min_input_samples: usize,
}

impl CandleHiddenStateBackend {
    fn load(config: &Wav2Vec2Config, model_cfg: &Wav2Vec2ModelConfig) -> Result<Self, ProbeError> {
        let device = select_device(&config.device)?;
        let model_data = std::fs::read(&config.model_path)
            .map_err(|e| ProbeError::io("read safetensors", e))?;
        let vb = VarBuilder::from_buffered_safetensors(model_data, DType::F32, &device)
            .map_err(|e| ProbeError::runtime("load safetensors", e))?;
        let model =
            Wav2Vec2Model::load(model_cfg, vb).map_err(|e| ProbeError::runtime("build model", e))?;

        tracing::info!(
            hidden_size = model_cfg.hidden_size,
            layers = model_cfg.num_layers(),
            stable_layer_norm = model_cfg.do_stable_layer_norm,
            ?device,
            "wav2vec2 encoder loaded"
        );

        Ok(Self {
            model,
            device,
            num_layers: model_cfg.num_layers(),
            hidden_size: model_cfg.hidden_size,
            samples_per_frame: model_cfg.samples_per_frame(),
            min_input_samples: model_cfg.min_input_samples(),
        })
    }
}

impl HiddenStateBackend for CandleHiddenStateBackend {
    fn hidden_states(&self, normalized_audio: &[f32]) -> Result<Vec<FrameSequence>, ProbeError> {
        let audio = Tensor::from_vec(
            normalized_audio.to_vec(),
            (1, normalized_audio.len()),
            &self.device,
        )
        .map_err(|e| ProbeError::runtime("tensor creation", e))?;
        let states = self
            .model
            .forward_hidden_states(&audio)
            .map_err(|e| ProbeError::runtime("forward pass", e))?;

        states
            .iter()
            .map(|state| {
                let state = state
                    .squeeze(0)
                    .map_err(|e| ProbeError::runtime("squeeze batch", e))?;
                let (_, dim) = state
                    .dims2()
                    .map_err(|e| ProbeError::runtime("hidden state dims2", e))?;
                let data = state
                    .flatten_all()
                    .and_then(|t| t.to_vec1::<f32>())
                    .map_err(|e| ProbeError::runtime("copy hidden state to host", e))?;
                FrameSequence::from_flat(dim, data)
            })
            .collect()
    }

    fn num_layers(&self) -> usize {
        self.num_layers
    }

    fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    fn samples_per_frame(&self) -> usize {
        self.samples_per_frame
    }

    fn min_input_samples(&self) -> usize {
        self.min_input_samples
    }

    fn device_label(&self) -> String {
        if self.device.is_cuda() {
            "cuda".to_string()
        } else if self.device.is_metal() {
            "metal".to_string()
        } else {
            "cpu".to_string()
        }
    }
}
