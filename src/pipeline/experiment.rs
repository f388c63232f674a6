use chrono::Utc;

use crate::config::ProbeConfig;
use crate::corpus::{load_all, select_subset, Split, TimitCorpus, UtteranceEntry};
use crate::error::ProbeError;
use crate::pipeline::extractor::HiddenStateExtractor;
use crate::probing::aligner::PhonemeAligner;
use crate::probing::frames::FrameGeometry;
use crate::probing::probe::{ProbeClassifier, ProbeFactory, SoftmaxRegressionProbe};
use crate::probing::runner::LayerwiseProbeRunner;
use crate::probing::tables::PhonemeStateTable;
use crate::report::{ProbeReport, ReportMeta};
use crate::rng::ProbeRng;
use crate::types::Utterance;

const TRAIN_STREAM: u64 = 0;
const TEST_STREAM: u64 = 1;

/// End-to-end probing run: subset selection, extraction, alignment, probing.
pub struct ProbeExperiment {
    config: ProbeConfig,
    extractor: HiddenStateExtractor,
    geometry: FrameGeometry,
    factory: Box<dyn ProbeFactory>,
}

impl ProbeExperiment {
    pub fn new(config: ProbeConfig, extractor: HiddenStateExtractor) -> Result<Self, ProbeError> {
        config.validate()?;
        if let Some(requested) = config.num_layers {
            if requested > extractor.num_layers() {
                return Err(ProbeError::invalid_input(format!(
                    "{requested} layers requested, the encoder emits {}",
                    extractor.num_layers()
                )));
            }
        }
        let geometry =
            FrameGeometry::new(extractor.expected_sample_rate_hz(), config.frame_duration_ms)?;
        if geometry.samples_per_frame() != extractor.samples_per_frame() {
            return Err(ProbeError::invalid_input(format!(
                "{} ms frames span {} samples at {} Hz, the encoder advances {} samples per frame",
                config.frame_duration_ms,
                geometry.samples_per_frame(),
                extractor.expected_sample_rate_hz(),
                extractor.samples_per_frame()
            )));
        }
        let classifier = config.classifier.clone();
        let factory = move || -> Box<dyn ProbeClassifier> {
            Box::new(SoftmaxRegressionProbe::new(classifier.clone()))
        };
        Ok(Self {
            config,
            extractor,
            geometry,
            factory: Box::new(factory),
        })
    }

    pub fn with_factory(mut self, factory: Box<dyn ProbeFactory>) -> Self {
        self.factory = factory;
        self
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    pub fn num_layers(&self) -> usize {
        self.config
            .num_layers
            .unwrap_or_else(|| self.extractor.num_layers())
    }

    /// Seeded train and test subsets. Each split draws from its own stream, so
    /// changing one size leaves the other selection untouched.
    pub fn select(&self, corpus: &TimitCorpus) -> (Vec<UtteranceEntry>, Vec<UtteranceEntry>) {
        let root = ProbeRng::new(self.config.seed);
        let train = select_subset(
            corpus.entries(Split::Train),
            self.config.train_size,
            &mut root.fork(TRAIN_STREAM),
        );
        let test = select_subset(
            corpus.entries(Split::Test),
            self.config.test_size,
            &mut root.fork(TEST_STREAM),
        );
        (train, test)
    }

    pub fn run_corpus(
        &self,
        corpus: &TimitCorpus,
        on_progress: impl FnMut(Split, usize, usize),
    ) -> Result<ProbeReport, ProbeError> {
        let (train_entries, test_entries) = self.select(corpus);
        let train = load_all(&train_entries)?;
        let test = load_all(&test_entries)?;
        self.run(&train, &test, on_progress)
    }

    /// `on_progress` receives `(split, done, total)` after each utterance is encoded.
    pub fn run(
        &self,
        train: &[Utterance],
        test: &[Utterance],
        mut on_progress: impl FnMut(Split, usize, usize),
    ) -> Result<ProbeReport, ProbeError> {
        let aligner = PhonemeAligner::new(self.geometry, self.config.attribution);
        let num_layers = self.num_layers();

        let train_table = self.phoneme_table(&aligner, train, Split::Train, &mut on_progress)?;
        let test_table = self.phoneme_table(&aligner, test, Split::Test, &mut on_progress)?;

        let runner = LayerwiseProbeRunner::new(self.factory.as_ref(), num_layers);
        let groups = runner.run(&train_table, &test_table, &self.config.category_groups)?;

        Ok(ProbeReport {
            meta: ReportMeta {
                generated_at: Utc::now(),
                seed: self.config.seed,
                train_size: self.config.train_size,
                test_size: self.config.test_size,
                train_utterances: train.len(),
                test_utterances: test.len(),
                num_layers,
                frame_duration_ms: self.config.frame_duration_ms,
                attribution: self.config.attribution,
                device: self.extractor.device_label(),
            },
            groups,
        })
    }

    fn phoneme_table(
        &self,
        aligner: &PhonemeAligner,
        utterances: &[Utterance],
        split: Split,
        on_progress: &mut impl FnMut(Split, usize, usize),
    ) -> Result<PhonemeStateTable, ProbeError> {
        let mut frames = self
            .extractor
            .extract(utterances, |done, total| on_progress(split, done, total))?;
        frames.truncate_layers(self.num_layers());
        let table = aligner.build_table(utterances, &frames)?;
        tracing::info!(
            split = split.dir_name(),
            utterances = utterances.len(),
            layers = table.num_layers(),
            "phoneme state table built"
        );
        Ok(table)
    }
}
