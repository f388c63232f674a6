//! TIMIT-layout corpus discovery and lazy utterance loading.
//!
//! A corpus root holds `TRAIN/` and `TEST/` (any letter case). Every `.PHN` file
//! under a split is one utterance; its waveform is the sibling `.WAV` (NIST SPHERE
//! or RIFF) or `.flac`, and its transcript the optional sibling `.TXT`.

mod audio;

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

pub use audio::{read_audio, DecodedAudio};

use crate::error::ProbeError;
use crate::probing::phone_map::EXCLUDED_LABEL;
use crate::rng::ProbeRng;
use crate::types::{PhonemeDetail, Utterance};

const AUDIO_EXTENSIONS: [&str; 4] = ["WAV", "wav", "flac", "FLAC"];
const TRANSCRIPT_EXTENSIONS: [&str; 2] = ["TXT", "txt"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Split {
    Train,
    Test,
}

impl Split {
    pub fn dir_name(self) -> &'static str {
        match self {
            Self::Train => "TRAIN",
            Self::Test => "TEST",
        }
    }
}

/// Paths of one utterance; nothing is decoded until [`UtteranceEntry::load`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UtteranceEntry {
    pub id: String,
    pub split: Split,
    pub phn_path: PathBuf,
    pub audio_path: PathBuf,
    pub txt_path: Option<PathBuf>,
}

impl UtteranceEntry {
    pub fn load(&self) -> Result<Utterance, ProbeError> {
        let audio = read_audio(&self.audio_path)?;
        let phn = fs::read_to_string(&self.phn_path)
            .map_err(|e| ProbeError::io("read phoneme file", e))?;
        let phonemes = parse_phn(&phn).map_err(|message| ProbeError::corpus(&self.phn_path, message))?;
        let transcript = match &self.txt_path {
            Some(path) => {
                let raw = fs::read_to_string(path).map_err(|e| ProbeError::io("read transcript", e))?;
                parse_txt(&raw)
            }
            None => String::new(),
        };
        tracing::debug!(
            id = %self.id,
            samples = audio.samples.len(),
            phonemes = phonemes.len(),
            "loaded utterance"
        );
        Ok(Utterance {
            id: self.id.clone(),
            sample_rate_hz: audio.sample_rate_hz,
            samples: audio.samples,
            transcript,
            phonemes,
        })
    }
}

#[derive(Debug, Clone)]
pub struct TimitCorpus {
    train: Vec<UtteranceEntry>,
    test: Vec<UtteranceEntry>,
}

impl TimitCorpus {
    pub fn scan(root: impl AsRef<Path>) -> Result<Self, ProbeError> {
        let root = root.as_ref().to_path_buf();
        let train = scan_split(&root, Split::Train)?;
        let test = scan_split(&root, Split::Test)?;
        tracing::info!(
            root = %root.display(),
            train = train.len(),
            test = test.len(),
            "scanned corpus"
        );
        Ok(Self { train, test })
    }

    pub fn entries(&self, split: Split) -> &[UtteranceEntry] {
        match split {
            Split::Train => &self.train,
            Split::Test => &self.test,
        }
    }
}

/// Uniform sample of `count` entries without replacement, in sampled order.
pub fn select_subset(
    entries: &[UtteranceEntry],
    count: usize,
    rng: &mut ProbeRng,
) -> Vec<UtteranceEntry> {
    if count > entries.len() {
        tracing::warn!(
            requested = count,
            available = entries.len(),
            "subset larger than split; using the whole split"
        );
    }
    rng.sample_indices(entries.len(), count)
        .into_iter()
        .map(|idx| entries[idx].clone())
        .collect()
}

pub fn load_all(entries: &[UtteranceEntry]) -> Result<Vec<Utterance>, ProbeError> {
    entries.iter().map(UtteranceEntry::load).collect()
}

fn find_child_dir(dir: &Path, name: &str) -> Result<Option<PathBuf>, ProbeError> {
    let entries = fs::read_dir(dir).map_err(|e| ProbeError::io("read corpus root", e))?;
    for entry in entries {
        let path = entry.map_err(|e| ProbeError::io("read corpus root entry", e))?.path();
        if path.is_dir()
            && path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.eq_ignore_ascii_case(name))
        {
            return Ok(Some(path));
        }
    }
    Ok(None)
}

fn scan_split(root: &Path, split: Split) -> Result<Vec<UtteranceEntry>, ProbeError> {
    let dir = find_child_dir(root, split.dir_name())?.ok_or_else(|| {
        ProbeError::corpus(root, format!("missing {} directory", split.dir_name()))
    })?;
    let mut phn_files = Vec::new();
    collect_phn_files(&dir, &mut phn_files)?;
    phn_files.sort();

    let mut entries = Vec::with_capacity(phn_files.len());
    for phn_path in phn_files {
        let Some(audio_path) = sibling(&phn_path, &AUDIO_EXTENSIONS) else {
            tracing::warn!(path = %phn_path.display(), "no audio next to phoneme file; skipping");
            continue;
        };
        let id = phn_path
            .strip_prefix(root)
            .unwrap_or(&phn_path)
            .with_extension("")
            .to_string_lossy()
            .replace('\\', "/");
        entries.push(UtteranceEntry {
            id,
            split,
            txt_path: sibling(&phn_path, &TRANSCRIPT_EXTENSIONS),
            phn_path,
            audio_path,
        });
    }
    Ok(entries)
}

fn collect_phn_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), ProbeError> {
    let entries = fs::read_dir(dir).map_err(|e| ProbeError::io("read corpus directory", e))?;
    for entry in entries {
        let path = entry
            .map_err(|e| ProbeError::io("read corpus directory entry", e))?
            .path();
        if path.is_dir() {
            collect_phn_files(&path, out)?;
            continue;
        }
        if path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("phn"))
        {
            out.push(path);
        }
    }
    Ok(())
}

fn sibling(path: &Path, extensions: &[&str]) -> Option<PathBuf> {
    extensions
        .iter()
        .map(|ext| path.with_extension(ext))
        .find(|candidate| candidate.is_file())
}

/// `start stop label` per line; `q` segments are dropped.
pub fn parse_phn(contents: &str) -> Result<PhonemeDetail, String> {
    let mut start = Vec::new();
    let mut stop = Vec::new();
    let mut label = Vec::new();
    for (line_no, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        let [s, e, l] = fields.as_slice() else {
            return Err(format!("line {}: expected 'start stop label'", line_no + 1));
        };
        let parse = |raw: &str| {
            raw.parse::<usize>()
                .map_err(|_| format!("line {}: '{raw}' is not a sample offset", line_no + 1))
        };
        let (s, e) = (parse(*s)?, parse(*e)?);
        if *l == EXCLUDED_LABEL {
            continue;
        }
        start.push(s);
        stop.push(e);
        label.push(l.to_string());
    }
    PhonemeDetail::new(start, stop, label).map_err(|e| e.to_string())
}

/// Drops the leading `start stop` sample offsets of a TIMIT `.TXT` line.
pub fn parse_txt(contents: &str) -> String {
    let mut rest = contents.trim();
    for _ in 0..2 {
        match rest.split_once(char::is_whitespace) {
            Some((head, tail)) if head.parse::<usize>().is_ok() => rest = tail.trim_start(),
            _ => break,
        }
    }
    rest.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::audio::tests::{riff_bytes, sphere_bytes};

    fn temp_root(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "wav2vec2_probe_corpus_{name}_{}",
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).expect("create temp root");
        dir
    }

    fn write_utterance(dir: &Path, stem: &str, audio: &[u8], phn: &str, txt: Option<&str>) {
        fs::create_dir_all(dir).unwrap();
        fs::write(dir.join(format!("{stem}.WAV")), audio).unwrap();
        fs::write(dir.join(format!("{stem}.PHN")), phn).unwrap();
        if let Some(txt) = txt {
            fs::write(dir.join(format!("{stem}.TXT")), txt).unwrap();
        }
    }

    #[test]
    fn phn_drops_glottal_stop() {
        let detail = parse_phn("0 2400 h#\n2400 2600 q\n2600 4000 iy\n").unwrap();
        assert_eq!(detail.labels(), &["h#".to_string(), "iy".to_string()]);
        let segments: Vec<_> = detail.segments().collect();
        assert_eq!((segments[1].start, segments[1].stop), (2600, 4000));
    }

    #[test]
    fn phn_rejects_malformed_lines() {
        assert!(parse_phn("0 2400\n").unwrap_err().contains("line 1"));
        assert!(parse_phn("0 2400 h#\nx 10 aa\n").unwrap_err().contains("line 2"));
    }

    #[test]
    fn txt_strips_sample_offsets() {
        assert_eq!(
            parse_txt("0 46797 She had your dark suit in greasy wash water all year.\n"),
            "She had your dark suit in greasy wash water all year."
        );
        assert_eq!(parse_txt("no offsets here"), "no offsets here");
    }

    #[test]
    fn scan_finds_both_splits_and_loads_lazily() {
        let root = temp_root("scan");
        let speaker = root.join("train").join("dr1").join("fcjf0");
        write_utterance(
            &speaker,
            "SA1",
            &sphere_bytes(&[0; 800], 16_000),
            "0 400 h#\n400 800 sh\n",
            Some("0 800 She.\n"),
        );
        write_utterance(
            &speaker,
            "SA2",
            &riff_bytes(&[0; 320], 16_000, 1),
            "0 320 h#\n",
            None,
        );
        let test_dir = root.join("TEST").join("DR2").join("MABC0");
        write_utterance(&test_dir, "SX9", &sphere_bytes(&[0; 320], 16_000), "0 320 aa\n", None);
        // Phoneme file without audio is skipped.
        fs::write(test_dir.join("SX10.PHN"), "0 1 aa\n").unwrap();

        let corpus = TimitCorpus::scan(&root).unwrap();
        let train = corpus.entries(Split::Train);
        assert_eq!(train.len(), 2);
        assert_eq!(train[0].id, "train/dr1/fcjf0/SA1");
        assert!(train[1].txt_path.is_none());
        assert_eq!(corpus.entries(Split::Test).len(), 1);

        let utt = train[0].load().unwrap();
        assert_eq!(utt.sample_rate_hz, 16_000);
        assert_eq!(utt.samples.len(), 800);
        assert_eq!(utt.transcript, "She.");
        assert_eq!(utt.phonemes.len(), 2);
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn scan_without_test_split_fails() {
        let root = temp_root("no_test");
        fs::create_dir_all(root.join("TRAIN")).unwrap();
        let err = TimitCorpus::scan(&root).unwrap_err();
        assert!(err.to_string().contains("TEST"));
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn subset_is_seeded_and_capped() {
        let entries: Vec<UtteranceEntry> = (0..10)
            .map(|i| UtteranceEntry {
                id: format!("u{i}"),
                split: Split::Train,
                phn_path: PathBuf::from(format!("u{i}.PHN")),
                audio_path: PathBuf::from(format!("u{i}.WAV")),
                txt_path: None,
            })
            .collect();
        let a = select_subset(&entries, 4, &mut ProbeRng::new(42));
        let b = select_subset(&entries, 4, &mut ProbeRng::new(42));
        assert_eq!(a, b);
        assert_eq!(a.len(), 4);
        assert_eq!(select_subset(&entries, 50, &mut ProbeRng::new(1)).len(), 10);
    }
}
