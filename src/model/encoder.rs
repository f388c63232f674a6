use candle_core::{Module, Tensor};
use candle_nn::{Conv1d, Conv1dConfig, LayerNorm, Linear, VarBuilder};

use crate::config::Wav2Vec2ModelConfig;
use crate::model::feature_extractor::load_weight_norm_conv;

struct PositionalConv {
    conv: Conv1d,
}

impl PositionalConv {
    fn load(cfg: &Wav2Vec2ModelConfig, vb: VarBuilder) -> candle_core::Result<Self> {
        let conv_cfg = Conv1dConfig {
            padding: cfg.num_conv_pos_embeddings / 2,
            groups: cfg.num_conv_pos_embedding_groups,
            ..Default::default()
        };
        let conv = load_weight_norm_conv(
            cfg.hidden_size,
            cfg.num_conv_pos_embeddings,
            conv_cfg,
            vb.pp("conv"),
        )?;
        Ok(Self { conv })
    }

    /// `(batch, frames, hidden)` in and out. An even kernel yields one extra
    /// output frame, which is dropped.
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let frames = xs.dim(1)?;
        self.conv
            .forward(&xs.transpose(1, 2)?.contiguous()?)?
            .narrow(2, 0, frames)?
            .gelu()?
            .transpose(1, 2)?
            .contiguous()
    }
}

struct Attention {
    q_proj: Linear,
    k_proj: Linear,
    v_proj: Linear,
    out_proj: Linear,
    heads: usize,
    head_dim: usize,
}

impl Attention {
    fn load(cfg: &Wav2Vec2ModelConfig, vb: VarBuilder) -> candle_core::Result<Self> {
        let h = cfg.hidden_size;
        Ok(Self {
            q_proj: candle_nn::linear(h, h, vb.pp("q_proj"))?,
            k_proj: candle_nn::linear(h, h, vb.pp("k_proj"))?,
            v_proj: candle_nn::linear(h, h, vb.pp("v_proj"))?,
            out_proj: candle_nn::linear(h, h, vb.pp("out_proj"))?,
            heads: cfg.num_attention_heads,
            head_dim: h / cfg.num_attention_heads,
        })
    }

    fn split_heads(&self, xs: Tensor, batch: usize, frames: usize) -> candle_core::Result<Tensor> {
        xs.reshape((batch, frames, self.heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()
    }

    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let (batch, frames, hidden) = xs.dims3()?;
        let scale = 1.0 / (self.head_dim as f64).sqrt();
        let q = self.split_heads((self.q_proj.forward(xs)? * scale)?, batch, frames)?;
        let k = self.split_heads(self.k_proj.forward(xs)?, batch, frames)?;
        let v = self.split_heads(self.v_proj.forward(xs)?, batch, frames)?;

        let scores = q.matmul(&k.transpose(2, 3)?.contiguous()?)?;
        let weights = candle_nn::ops::softmax_last_dim(&scores)?;
        let context = weights
            .matmul(&v)?
            .transpose(1, 2)?
            .contiguous()?
            .reshape((batch, frames, hidden))?;
        self.out_proj.forward(&context)
    }
}

struct TransformerBlock {
    attention: Attention,
    attention_norm: LayerNorm,
    intermediate: Linear,
    output: Linear,
    output_norm: LayerNorm,
    pre_norm: bool,
}

impl TransformerBlock {
    fn load(cfg: &Wav2Vec2ModelConfig, vb: VarBuilder) -> candle_core::Result<Self> {
        let ff = vb.pp("feed_forward");
        Ok(Self {
            attention: Attention::load(cfg, vb.pp("attention"))?,
            attention_norm: candle_nn::layer_norm(
                cfg.hidden_size,
                cfg.layer_norm_eps,
                vb.pp("layer_norm"),
            )?,
            intermediate: candle_nn::linear(
                cfg.hidden_size,
                cfg.intermediate_size,
                ff.pp("intermediate_dense"),
            )?,
            output: candle_nn::linear(
                cfg.intermediate_size,
                cfg.hidden_size,
                ff.pp("output_dense"),
            )?,
            output_norm: candle_nn::layer_norm(
                cfg.hidden_size,
                cfg.layer_norm_eps,
                vb.pp("final_layer_norm"),
            )?,
            pre_norm: cfg.do_stable_layer_norm,
        })
    }

    fn feed_forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        self.output.forward(&self.intermediate.forward(xs)?.gelu()?)
    }

    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        if self.pre_norm {
            let h = (xs + self.attention.forward(&self.attention_norm.forward(xs)?)?)?;
            &h + self.feed_forward(&self.output_norm.forward(&h)?)?
        } else {
            let h = self
                .attention_norm
                .forward(&(xs + self.attention.forward(xs)?)?)?;
            self.output_norm.forward(&(&h + self.feed_forward(&h)?)?)
        }
    }
}

pub(crate) struct Encoder {
    pos_conv: PositionalConv,
    layer_norm: LayerNorm,
    blocks: Vec<TransformerBlock>,
    stable_layer_norm: bool,
}

impl Encoder {
    pub(crate) fn load(cfg: &Wav2Vec2ModelConfig, vb: VarBuilder) -> candle_core::Result<Self> {
        let blocks = (0..cfg.num_hidden_layers)
            .map(|i| TransformerBlock::load(cfg, vb.pp(format!("layers.{i}"))))
            .collect::<candle_core::Result<Vec<_>>>()?;
        Ok(Self {
            pos_conv: PositionalConv::load(cfg, vb.pp("pos_conv_embed"))?,
            layer_norm: candle_nn::layer_norm(
                cfg.hidden_size,
                cfg.layer_norm_eps,
                vb.pp("layer_norm"),
            )?,
            blocks,
            stable_layer_norm: cfg.do_stable_layer_norm,
        })
    }

    /// Returns the block input followed by every block output, `1 + blocks` tensors
    /// of shape `(batch, frames, hidden)`.
    ///
    /// Post-norm models normalise before the first block; stable-layer-norm models
    /// normalise only the last entry.
    pub(crate) fn forward_hidden_states(&self, xs: &Tensor) -> candle_core::Result<Vec<Tensor>> {
        let mut h = (xs + self.pos_conv.forward(xs)?)?;
        if !self.stable_layer_norm {
            h = self.layer_norm.forward(&h)?;
        }
        let mut states = Vec::with_capacity(self.blocks.len() + 1);
        for block in &self.blocks {
            let next = block.forward(&h)?;
            states.push(h);
            h = next;
        }
        if self.stable_layer_norm {
            h = self.layer_norm.forward(&h)?;
        }
        states.push(h);
        Ok(states)
    }
}
