pub mod config;
pub mod corpus;
pub mod error;
mod model;
pub mod pipeline;
pub mod probing;
pub mod report;
pub mod rng;
pub mod types;

pub use config::{AttributionPolicy, CategoryGroup, ClassifierConfig, ProbeConfig, Wav2Vec2Config};
pub use corpus::{select_subset, Split, TimitCorpus, UtteranceEntry};
pub use error::ProbeError;
pub use pipeline::builder::HiddenStateExtractorBuilder;
pub use pipeline::experiment::ProbeExperiment;
pub use pipeline::extractor::HiddenStateExtractor;
pub use pipeline::traits::HiddenStateBackend;
pub use probing::probe::{ProbeClassifier, ProbeFactory, SoftmaxRegressionProbe};
pub use probing::runner::{GroupAccuracy, LayerResult};
pub use report::{format_accuracy_table, AccuracyPlot, ProbeReport};
pub use rng::ProbeRng;
pub use types::{FrameSequence, LabeledDataset, PhonemeDetail, Utterance};
