//! Collapses the 61 TIMIT phone labels onto the 39 evaluation categories.

use crate::error::ProbeError;

/// Glottal stop. Dropped at load time and never mapped.
pub const EXCLUDED_LABEL: &str = "q";

const PHONE_MAP: [(&str, &str); 60] = [
    ("aa", "aa"),
    ("ae", "ae"),
    ("ah", "ah"),
    ("ao", "aa"),
    ("aw", "aw"),
    ("ax", "ah"),
    ("ax-h", "ah"),
    ("axr", "er"),
    ("ay", "ay"),
    ("b", "b"),
    ("bcl", "sil"),
    ("ch", "ch"),
    ("d", "d"),
    ("dcl", "sil"),
    ("dh", "dh"),
    ("dx", "dx"),
    ("eh", "eh"),
    ("el", "l"),
    ("em", "m"),
    ("en", "n"),
    ("eng", "ng"),
    ("epi", "sil"),
    ("er", "er"),
    ("ey", "ey"),
    ("f", "f"),
    ("g", "g"),
    ("gcl", "sil"),
    ("h#", "sil"),
    ("hh", "hh"),
    ("hv", "hh"),
    ("ih", "ih"),
    ("ix", "ih"),
    ("iy", "iy"),
    ("jh", "jh"),
    ("k", "k"),
    ("kcl", "sil"),
    ("l", "l"),
    ("m", "m"),
    ("n", "n"),
    ("ng", "ng"),
    ("nx", "n"),
    ("ow", "ow"),
    ("oy", "oy"),
    ("p", "p"),
    ("pau", "sil"),
    ("pcl", "sil"),
    ("r", "r"),
    ("s", "s"),
    ("sh", "sh"),
    ("t", "t"),
    ("tcl", "sil"),
    ("th", "th"),
    ("uh", "uh"),
    ("uw", "uw"),
    ("ux", "uw"),
    ("v", "v"),
    ("w", "w"),
    ("y", "y"),
    ("z", "z"),
    ("zh", "sh"),
];

pub const COARSE_LABELS: [&str; 39] = [
    "aa", "ae", "ah", "aw", "ay", "b", "ch", "d", "dh", "dx", "eh", "er", "ey", "f", "g", "hh",
    "ih", "iy", "jh", "k", "l", "m", "n", "ng", "ow", "oy", "p", "r", "s", "sh", "sil", "t", "th",
    "uh", "uw", "v", "w", "y", "z",
];

/// Every mappable fine-grained label, sorted.
pub fn fine_labels() -> impl Iterator<Item = &'static str> {
    PHONE_MAP.iter().map(|(fine, _)| *fine)
}

/// Fails on labels outside the table, including `q`, so corpus drift is visible.
pub fn collapse(label: &str) -> Result<&'static str, ProbeError> {
    PHONE_MAP
        .binary_search_by(|(fine, _)| (*fine).cmp(label))
        .map(|idx| PHONE_MAP[idx].1)
        .map_err(|_| ProbeError::UnknownPhoneme {
            label: label.to_string(),
        })
}
