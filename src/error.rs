use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("I/O error while {context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("JSON error while {context}: {source}")]
    Json {
        context: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("{context}: {message}")]
    Runtime {
        context: &'static str,
        message: String,
    },
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("malformed corpus file '{}': {message}", path.display())]
    Corpus { path: PathBuf, message: String },
    /// A fine-grained label is missing from the 61 -> 39 table.
    #[error("phoneme label '{label}' is not in the coarse label table")]
    UnknownPhoneme { label: String },
    /// A balanced dataset with fewer than two classes cannot be probed.
    #[error("degenerate dataset for group '{group}' at layer {layer}: {classes} class(es) after balancing")]
    DegenerateDataset {
        layer: usize,
        group: String,
        classes: usize,
    },
}

impl ProbeError {
    pub(crate) fn io(context: &'static str, source: std::io::Error) -> Self {
        Self::Io { context, source }
    }

    pub(crate) fn json(context: &'static str, source: serde_json::Error) -> Self {
        Self::Json { context, source }
    }

    pub(crate) fn runtime(context: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Runtime {
            context,
            message: err.to_string(),
        }
    }

    pub(crate) fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub(crate) fn corpus(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Corpus {
            path: path.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn degenerate_dataset_message_names_group_and_layer() {
        let err = ProbeError::DegenerateDataset {
            layer: 3,
            group: "nasals".to_string(),
            classes: 1,
        };
        let msg = err.to_string();
        assert!(msg.contains("nasals"));
        assert!(msg.contains("layer 3"));
    }

    #[test]
    fn corpus_error_includes_path() {
        let err = ProbeError::corpus("/data/TRAIN/DR1/SA1.PHN", "bad line");
        assert!(err.to_string().contains("SA1.PHN"));
    }
}
