use candle_core::{Module, Tensor};
use candle_nn::{Conv1d, Conv1dConfig, GroupNorm, LayerNorm, VarBuilder};

use crate::config::Wav2Vec2ModelConfig;

enum ConvNorm {
    None,
    /// Normalizes channels per time step; input is transposed around it.
    Layer(LayerNorm),
    /// One group per channel over time, only on the first layer of "group" models.
    Group(GroupNorm),
}

struct ConvLayer {
    conv: Conv1d,
    norm: ConvNorm,
}

struct ConvSpec {
    in_c: usize,
    out_c: usize,
    kernel: usize,
    stride: usize,
}

impl ConvLayer {
    fn load(
        spec: ConvSpec,
        cfg: &Wav2Vec2ModelConfig,
        index: usize,
        vb: VarBuilder,
    ) -> candle_core::Result<Self> {
        let conv_cfg = Conv1dConfig {
            stride: spec.stride,
            ..Default::default()
        };
        let conv = if cfg.conv_bias {
            candle_nn::conv1d(spec.in_c, spec.out_c, spec.kernel, conv_cfg, vb.pp("conv"))?
        } else {
            candle_nn::conv1d_no_bias(spec.in_c, spec.out_c, spec.kernel, conv_cfg, vb.pp("conv"))?
        };
        let norm = match cfg.feat_extract_norm.as_str() {
            "layer" => ConvNorm::Layer(candle_nn::layer_norm(
                spec.out_c,
                cfg.layer_norm_eps,
                vb.pp("layer_norm"),
            )?),
            "group" if index == 0 => ConvNorm::Group(candle_nn::group_norm(
                spec.out_c,
                spec.out_c,
                cfg.layer_norm_eps,
                vb.pp("layer_norm"),
            )?),
            _ => ConvNorm::None,
        };
        Ok(Self { conv, norm })
    }

    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let xs = self.conv.forward(xs)?;
        let xs = match &self.norm {
            ConvNorm::None => xs,
            ConvNorm::Layer(ln) => ln
                .forward(&xs.transpose(1, 2)?.contiguous()?)?
                .transpose(1, 2)?
                .contiguous()?,
            ConvNorm::Group(gn) => gn.forward(&xs)?,
        };
        xs.gelu()
    }
}

/// Strided conv stack turning raw samples `(batch, 1, samples)` into
/// `(batch, channels, frames)`.
pub(crate) struct FeatureExtractor {
    layers: Vec<ConvLayer>,
}

impl FeatureExtractor {
    pub(crate) fn load(cfg: &Wav2Vec2ModelConfig, vb: VarBuilder) -> candle_core::Result<Self> {
        let mut layers = Vec::with_capacity(cfg.conv_dim.len());
        for i in 0..cfg.conv_dim.len() {
            let spec = ConvSpec {
                in_c: if i == 0 { 1 } else { cfg.conv_dim[i - 1] },
                out_c: cfg.conv_dim[i],
                kernel: cfg.conv_kernel[i],
                stride: cfg.conv_stride[i],
            };
            layers.push(ConvLayer::load(
                spec,
                cfg,
                i,
                vb.pp(format!("conv_layers.{i}")),
            )?);
        }
        Ok(Self { layers })
    }

    pub(crate) fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let mut h = xs.clone();
        for layer in &self.layers {
            h = layer.forward(&h)?;
        }
        Ok(h)
    }
}

/// Loads a grouped conv that may be stored with weight normalisation
/// (`weight_g`/`weight_v`) or as a plain `weight`.
pub(crate) fn load_weight_norm_conv(
    channels: usize,
    kernel: usize,
    cfg: Conv1dConfig,
    vb: VarBuilder,
) -> candle_core::Result<Conv1d> {
    let per_group = channels / cfg.groups;
    let weight = match vb.get((channels, per_group, kernel), "weight_v") {
        Ok(wv) => {
            // Older exports normalise over dim=2 (g is (1, 1, K)), newer ones over dim=0.
            match vb.get((1, 1, kernel), "weight_g") {
                Ok(wg) => {
                    let norm = wv.sqr()?.sum_keepdim(0)?.sum_keepdim(1)?.sqrt()?;
                    wv.broadcast_div(&norm)?.broadcast_mul(&wg)?
                }
                Err(_) => {
                    let wg = vb.get((channels, 1, 1), "weight_g")?;
                    let norm = wv
                        .reshape((channels, per_group * kernel))?
                        .sqr()?
                        .sum_keepdim(1)?
                        .sqrt()?
                        .unsqueeze(2)?;
                    wv.broadcast_div(&norm)?.broadcast_mul(&wg)?
                }
            }
        }
        Err(_) => vb.get((channels, per_group, kernel), "weight")?,
    };
    let bias = vb.get(channels, "bias")?;
    Ok(Conv1d::new(weight, Some(bias), cfg))
}
