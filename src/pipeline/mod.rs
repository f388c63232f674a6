pub mod builder;
pub mod experiment;
pub mod extractor;
pub(crate) mod model_runtime;
pub mod traits;
