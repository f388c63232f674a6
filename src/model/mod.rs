mod encoder;
mod feature_extractor;
mod feature_projection;
pub(crate) mod wav2vec2_model;
