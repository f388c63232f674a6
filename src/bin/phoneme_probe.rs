use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;
use wav2vec2_probe::{
    format_accuracy_table, AttributionPolicy, HiddenStateExtractorBuilder, ProbeConfig,
    ProbeError, ProbeExperiment, Split, TimitCorpus, Wav2Vec2Config,
};

const REPORT_FILE: &str = "probe_report.json";
const PLOT_FILE: &str = "layer_accuracy.svg";
const PLOT_WIDTH: f64 = 800.0;
const PLOT_HEIGHT: f64 = 480.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum AttributionChoice {
    EverySegment,
    LongestOverlap,
}

impl From<AttributionChoice> for AttributionPolicy {
    fn from(choice: AttributionChoice) -> Self {
        match choice {
            AttributionChoice::EverySegment => Self::EverySegment,
            AttributionChoice::LongestOverlap => Self::LongestOverlap,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "phoneme_probe")]
#[command(about = "Layer-wise linear probing of wav2vec2 hidden states for phoneme categories")]
struct Args {
    /// Directory holding `model.safetensors` and `config.json`.
    #[arg(long, env = "PHONEME_PROBE_MODEL_DIR")]
    model_dir: PathBuf,
    /// Corpus root with `TRAIN/` and `TEST/`.
    #[arg(long, env = "PHONEME_PROBE_CORPUS_DIR")]
    corpus_dir: PathBuf,
    /// JSON experiment config; flags below override its fields.
    #[arg(long, env = "PHONEME_PROBE_CONFIG")]
    config: Option<PathBuf>,
    #[arg(long, env = "PHONEME_PROBE_OUT_DIR", default_value = "probe-output")]
    out_dir: PathBuf,
    #[arg(long, env = "PHONEME_PROBE_DEVICE", default_value = "cpu")]
    device: String,
    #[arg(long, env = "PHONEME_PROBE_TRAIN_SIZE")]
    train_size: Option<usize>,
    #[arg(long, env = "PHONEME_PROBE_TEST_SIZE")]
    test_size: Option<usize>,
    #[arg(long, env = "PHONEME_PROBE_SEED")]
    seed: Option<u64>,
    #[arg(long, env = "PHONEME_PROBE_NUM_LAYERS")]
    num_layers: Option<usize>,
    #[arg(long, env = "PHONEME_PROBE_ATTRIBUTION", value_enum)]
    attribution: Option<AttributionChoice>,
    /// Probe only these groups (repeatable).
    #[arg(long = "group", env = "PHONEME_PROBE_GROUPS", value_delimiter = ',')]
    groups: Vec<String>,
}

impl Args {
    fn probe_config(&self) -> Result<ProbeConfig, ProbeError> {
        let mut config = match &self.config {
            Some(path) => ProbeConfig::load(path)?,
            None => ProbeConfig::default(),
        };
        if let Some(train_size) = self.train_size {
            config.train_size = train_size;
        }
        if let Some(test_size) = self.test_size {
            config.test_size = test_size;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if self.num_layers.is_some() {
            config.num_layers = self.num_layers;
        }
        if let Some(attribution) = self.attribution {
            config.attribution = attribution.into();
        }
        if !self.groups.is_empty() {
            config.retain_groups(&self.groups)?;
        }
        config.validate()?;
        Ok(config)
    }
}

/// One bar per split, replaced when extraction moves to the next split.
#[derive(Default)]
struct SplitProgress {
    current: Option<(Split, ProgressBar)>,
}

impl SplitProgress {
    fn update(&mut self, split: Split, done: usize, total: usize) {
        if self.current.as_ref().map(|(s, _)| *s) != Some(split) {
            self.finish();
            let bar = ProgressBar::new(total as u64);
            bar.set_style(
                ProgressStyle::with_template(
                    "[{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} ({eta}) {msg}",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
            );
            bar.set_message(format!("encoding {}", split.dir_name()));
            self.current = Some((split, bar));
        }
        if let Some((_, bar)) = &self.current {
            bar.set_position(done as u64);
        }
    }

    fn finish(&mut self) {
        if let Some((split, bar)) = self.current.take() {
            bar.finish_with_message(format!("{} encoded", split.dir_name()));
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run() {
        tracing::error!(error = %err, "phoneme probe failed");
        std::process::exit(1);
    }
}

fn run() -> Result<(), ProbeError> {
    let args = Args::parse();
    let config = args.probe_config()?;

    let extractor =
        HiddenStateExtractorBuilder::new(Wav2Vec2Config::from_model_dir(&args.model_dir, &args.device))
            .build()?;
    let corpus = TimitCorpus::scan(&args.corpus_dir)?;
    let experiment = ProbeExperiment::new(config, extractor)?;

    let mut progress = SplitProgress::default();
    let report = experiment.run_corpus(&corpus, |split, done, total| {
        progress.update(split, done, total)
    })?;
    progress.finish();

    println!("{}", format_accuracy_table(&report.groups));
    for group in &report.groups {
        if let Some(best) = group.best_layer() {
            println!(
                "{}: best layer {} ({:.3})",
                group.group, best.layer, best.accuracy
            );
        }
    }

    let report_path = args.out_dir.join(REPORT_FILE);
    report.write_json(&report_path)?;
    let plot_path = args.out_dir.join(PLOT_FILE);
    report
        .plot()
        .write_svg(&plot_path, PLOT_WIDTH, PLOT_HEIGHT)?;
    tracing::info!(
        report = %report_path.display(),
        plot = %plot_path.display(),
        "probe outputs written"
    );
    Ok(())
}
