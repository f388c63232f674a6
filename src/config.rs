use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ProbeError;

#[derive(Debug, Clone)]
pub struct Wav2Vec2Config {
    pub model_path: String,
    pub config_path: String,
    pub device: String,
    pub expected_sample_rate_hz: u32,
}

impl Wav2Vec2Config {
    pub const DEFAULT_SAMPLE_RATE_HZ: u32 = 16_000;

    /// Paths for a HuggingFace-style model directory holding
    /// `model.safetensors` and `config.json`.
    pub fn from_model_dir(model_dir: &Path, device: &str) -> Self {
        Self {
            model_path: model_dir
                .join("model.safetensors")
                .to_string_lossy()
                .into_owned(),
            config_path: model_dir.join("config.json").to_string_lossy().into_owned(),
            device: device.to_string(),
            expected_sample_rate_hz: Self::DEFAULT_SAMPLE_RATE_HZ,
        }
    }
}

impl Default for Wav2Vec2Config {
    fn default() -> Self {
        Self {
            model_path: String::new(),
            config_path: String::new(),
            device: "cpu".to_string(),
            expected_sample_rate_hz: Self::DEFAULT_SAMPLE_RATE_HZ,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct Wav2Vec2ModelConfig {
    pub hidden_size: usize,
    pub num_hidden_layers: usize,
    pub num_attention_heads: usize,
    pub intermediate_size: usize,
    pub conv_dim: Vec<usize>,
    pub conv_kernel: Vec<usize>,
    pub conv_stride: Vec<usize>,
    pub num_conv_pos_embeddings: usize,
    pub num_conv_pos_embedding_groups: usize,
    #[serde(default)]
    pub do_stable_layer_norm: bool,
    #[serde(default = "default_eps")]
    pub layer_norm_eps: f64,
    #[serde(default = "default_feat_norm")]
    pub feat_extract_norm: String,
    #[serde(default = "default_conv_bias")]
    pub conv_bias: bool,
}

fn default_eps() -> f64 {
    1e-5
}
fn default_feat_norm() -> String {
    "group".to_string()
}
fn default_conv_bias() -> bool {
    false
}

impl Wav2Vec2ModelConfig {
    pub(crate) fn load(path: &Path) -> Result<Self, ProbeError> {
        let data =
            std::fs::read_to_string(path).map_err(|e| ProbeError::io("read config.json", e))?;
        let cfg: Self =
            serde_json::from_str(&data).map_err(|e| ProbeError::json("parse config.json", e))?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), ProbeError> {
        let n = self.conv_dim.len();
        if n == 0 || self.conv_kernel.len() != n || self.conv_stride.len() != n {
            return Err(ProbeError::invalid_input(format!(
                "conv stack is inconsistent: dim={}, kernel={}, stride={}",
                n,
                self.conv_kernel.len(),
                self.conv_stride.len()
            )));
        }
        if self.num_attention_heads == 0 || self.hidden_size % self.num_attention_heads != 0 {
            return Err(ProbeError::invalid_input(format!(
                "hidden_size {} is not divisible by {} attention heads",
                self.hidden_size, self.num_attention_heads
            )));
        }
        Ok(())
    }

    /// Hidden states emitted per forward pass: the embedding output plus one per block.
    pub(crate) fn num_layers(&self) -> usize {
        self.num_hidden_layers + 1
    }

    /// Waveform samples between consecutive encoder frames.
    pub(crate) fn samples_per_frame(&self) -> usize {
        self.conv_stride.iter().product()
    }

    pub(crate) fn frame_stride_ms(&self, sample_rate: u32) -> f64 {
        self.samples_per_frame() as f64 / sample_rate as f64 * 1000.0
    }

    /// Receptive field of the conv feature extractor; shorter inputs produce no frames.
    pub(crate) fn min_input_samples(&self) -> usize {
        self.conv_kernel
            .iter()
            .zip(&self.conv_stride)
            .rev()
            .fold(1, |field, (&kernel, &stride)| (field - 1) * stride + kernel)
    }
}

/// How a frame claimed by several phoneme segments is attributed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributionPolicy {
    /// Append the frame under every segment whose frame range covers it.
    #[default]
    EverySegment,
    /// Give the frame to the one segment overlapping it by the most samples.
    LongestOverlap,
}

impl AttributionPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::EverySegment => "every_segment",
            Self::LongestOverlap => "longest_overlap",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub max_iter: usize,
    pub learning_rate: f64,
    /// Inverse of the usual `C`; the penalty is `l2_strength / (2n) * ||W||^2`.
    pub l2_strength: f64,
    pub tolerance: f64,
    pub standardize: bool,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            max_iter: 300,
            learning_rate: 0.05,
            l2_strength: 1.0,
            tolerance: 1e-6,
            standardize: true,
        }
    }
}

/// A named set of phoneme labels probed together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryGroup {
    pub name: String,
    pub labels: Vec<String>,
}

impl CategoryGroup {
    pub fn new(name: &str, labels: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            labels: labels.iter().map(|label| label.to_string()).collect(),
        }
    }

    pub fn default_groups() -> Vec<Self> {
        vec![
            Self::new("stops", &["p", "t", "k", "b", "d", "g"]),
            Self::new("fricatives", &["f", "th", "s", "sh", "v", "dh", "z"]),
            Self::new("nasals", &["m", "n", "ng"]),
            Self::new("approximants", &["l", "r", "w", "y"]),
            Self::new(
                "vowels",
                &[
                    "iy", "ih", "eh", "ae", "aa", "ah", "uh", "uw", "er", "ey", "ay", "ow", "aw",
                    "oy",
                ],
            ),
        ]
    }
}

/// Experiment constants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub train_size: usize,
    pub test_size: usize,
    pub seed: u64,
    /// Layers to probe; `None` probes every hidden state the encoder emits.
    pub num_layers: Option<usize>,
    pub frame_duration_ms: u32,
    pub attribution: AttributionPolicy,
    pub classifier: ClassifierConfig,
    pub category_groups: Vec<CategoryGroup>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            train_size: 800,
            test_size: 100,
            seed: 42,
            num_layers: None,
            frame_duration_ms: 20,
            attribution: AttributionPolicy::default(),
            classifier: ClassifierConfig::default(),
            category_groups: CategoryGroup::default_groups(),
        }
    }
}

impl ProbeConfig {
    pub fn load(path: &Path) -> Result<Self, ProbeError> {
        let data =
            std::fs::read_to_string(path).map_err(|e| ProbeError::io("read probe config", e))?;
        let cfg: Self =
            serde_json::from_str(&data).map_err(|e| ProbeError::json("parse probe config", e))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ProbeError> {
        if self.frame_duration_ms == 0 {
            return Err(ProbeError::invalid_input("frame_duration_ms must be > 0"));
        }
        if self.num_layers == Some(0) {
            return Err(ProbeError::invalid_input("num_layers must be >= 1"));
        }
        if self.classifier.max_iter == 0 {
            return Err(ProbeError::invalid_input("classifier.max_iter must be >= 1"));
        }
        let lr = self.classifier.learning_rate;
        if lr.is_nan() || lr <= 0.0 {
            return Err(ProbeError::invalid_input(
                "classifier.learning_rate must be > 0",
            ));
        }
        if self.category_groups.is_empty() {
            return Err(ProbeError::invalid_input(
                "at least one category group is required",
            ));
        }
        if let Some(group) = self.category_groups.iter().find(|g| g.labels.is_empty()) {
            return Err(ProbeError::invalid_input(format!(
                "category group '{}' has no labels",
                group.name
            )));
        }
        Ok(())
    }

    /// Keeps only the named groups, in the order given.
    pub fn retain_groups(&mut self, names: &[String]) -> Result<(), ProbeError> {
        let mut selected = Vec::with_capacity(names.len());
        for name in names {
            let group = self
                .category_groups
                .iter()
                .find(|g| &g.name == name)
                .ok_or_else(|| {
                    ProbeError::invalid_input(format!("unknown category group '{name}'"))
                })?;
            selected.push(group.clone());
        }
        self.category_groups = selected;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE_CONFIG_JSON: &str = r#"{
        "hidden_size": 768,
        "num_hidden_layers": 12,
        "num_attention_heads": 12,
        "intermediate_size": 3072,
        "conv_dim": [512, 512, 512, 512, 512, 512, 512],
        "conv_kernel": [10, 3, 3, 3, 3, 2, 2],
        "conv_stride": [5, 2, 2, 2, 2, 2, 2],
        "num_conv_pos_embeddings": 128,
        "num_conv_pos_embedding_groups": 16,
        "feat_extract_norm": "group",
        "pad_token_id": 0,
        "vocab_size": 32
    }"#;

    #[test]
    fn wav2vec2_config_default() {
        let config = Wav2Vec2Config::default();
        assert!(config.model_path.is_empty());
        assert!(config.config_path.is_empty());
        assert_eq!(config.device, "cpu");
        assert_eq!(config.expected_sample_rate_hz, 16_000);
    }

    #[test]
    fn model_config_base_geometry() {
        let cfg: Wav2Vec2ModelConfig = serde_json::from_str(BASE_CONFIG_JSON).expect("valid json");
        cfg.validate().expect("valid config");
        assert_eq!(cfg.num_layers(), 13);
        // stride product = 320, 320 / 16000 * 1000 = 20 ms
        assert!((cfg.frame_stride_ms(16_000) - 20.0).abs() < 1e-9);
        assert_eq!(cfg.samples_per_frame(), 320);
        assert_eq!(cfg.min_input_samples(), 400);
        assert!(!cfg.conv_bias);
    }

    #[test]
    fn model_config_rejects_ragged_conv_stack() {
        let json = BASE_CONFIG_JSON.replace("[10, 3, 3, 3, 3, 2, 2]", "[10, 3]");
        let cfg: Wav2Vec2ModelConfig = serde_json::from_str(&json).expect("valid json");
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn probe_config_defaults_match_experiment() {
        let cfg = ProbeConfig::default();
        assert_eq!(cfg.train_size, 800);
        assert_eq!(cfg.test_size, 100);
        assert_eq!(cfg.seed, 42);
        assert_eq!(cfg.frame_duration_ms, 20);
        assert_eq!(cfg.attribution, AttributionPolicy::EverySegment);
        let nasals = cfg
            .category_groups
            .iter()
            .find(|g| g.name == "nasals")
            .expect("nasals group");
        assert_eq!(nasals.labels, vec!["m", "n", "ng"]);
        cfg.validate().expect("defaults are valid");
    }

    #[test]
    fn probe_config_partial_json_fills_defaults() {
        let cfg: ProbeConfig =
            serde_json::from_str(r#"{"seed": 7, "attribution": "longest_overlap"}"#).unwrap();
        assert_eq!(cfg.seed, 7);
        assert_eq!(cfg.attribution, AttributionPolicy::LongestOverlap);
        assert_eq!(cfg.train_size, 800);
        assert_eq!(cfg.category_groups.len(), 5);
    }

    #[test]
    fn probe_config_load_from_file() {
        let path = std::env::temp_dir().join("wav2vec2_probe_config_load.json");
        std::fs::write(&path, r#"{"train_size": 10, "num_layers": 4}"#).expect("write config");
        let cfg = ProbeConfig::load(&path).expect("load config");
        assert_eq!(cfg.train_size, 10);
        assert_eq!(cfg.num_layers, Some(4));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn retain_groups_rejects_unknown_name() {
        let mut cfg = ProbeConfig::default();
        assert!(cfg.retain_groups(&["clicks".to_string()]).is_err());
        cfg.retain_groups(&["vowels".to_string(), "nasals".to_string()])
            .unwrap();
        let names: Vec<_> = cfg.category_groups.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["vowels", "nasals"]);
    }

    #[test]
    fn validate_rejects_empty_group() {
        let mut cfg = ProbeConfig::default();
        cfg.category_groups.push(CategoryGroup::new("empty", &[]));
        assert!(cfg.validate().is_err());
    }
}
