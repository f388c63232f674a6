use std::collections::HashMap;

use crate::error::ProbeError;
use crate::probing::phone_map::{collapse, EXCLUDED_LABEL};
use crate::probing::tables::PhonemeBuckets;
use crate::types::LabeledDataset;

/// Flattens one layer's buckets into (vector, coarse label) pairs and balances them.
///
/// `q` is always skipped. With `targets`, only those fine-grained labels are kept.
/// Any other label missing from the coarse table is an error.
pub fn build_balanced(
    buckets: &PhonemeBuckets,
    targets: Option<&[String]>,
) -> Result<LabeledDataset, ProbeError> {
    let mut dataset = LabeledDataset::default();
    for (label, vectors) in buckets.iter() {
        if label == EXCLUDED_LABEL {
            continue;
        }
        if targets.is_some_and(|targets| !targets.iter().any(|t| t == label)) {
            continue;
        }
        let coarse = collapse(label)?;
        for vector in vectors {
            dataset.push(vector.clone(), coarse);
        }
    }
    Ok(balance(dataset))
}

/// Downsamples every class to the smallest class count, keeping the earliest
/// examples of each class in their original order.
pub fn balance(dataset: LabeledDataset) -> LabeledDataset {
    let Some(min_count) = dataset.class_counts().iter().map(|(_, n)| *n).min() else {
        return dataset;
    };
    let mut kept: HashMap<String, usize> = HashMap::new();
    let mut out = LabeledDataset::default();
    for (vector, label) in dataset.vectors.into_iter().zip(dataset.labels) {
        let seen = kept.entry(label.clone()).or_insert(0);
        if *seen < min_count {
            *seen += 1;
            out.push(vector, label);
        }
    }
    out
}

/// A probe needs at least two classes; anything less has no meaningful accuracy.
pub fn ensure_probeable(
    dataset: &LabeledDataset,
    layer: usize,
    group: &str,
) -> Result<(), ProbeError> {
    let classes = dataset.num_classes();
    if classes < 2 {
        return Err(ProbeError::DegenerateDataset {
            layer,
            group: group.to_string(),
            classes,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buckets(entries: &[(&str, usize)]) -> PhonemeBuckets {
        let mut b = PhonemeBuckets::default();
        for &(label, count) in entries {
            for i in 0..count {
                b.push(label, vec![i as f32]);
            }
        }
        b
    }

    fn targets(labels: &[&str]) -> Vec<String> {
        labels.iter().map(|l| l.to_string()).collect()
    }

    #[test]
    fn every_class_is_cut_to_the_minimum_count() {
        let ds = build_balanced(&buckets(&[("m", 7), ("n", 3), ("ng", 5)]), None).unwrap();
        assert_eq!(
            ds.class_counts(),
            vec![("m".into(), 3), ("n".into(), 3), ("ng".into(), 3)]
        );
    }

    #[test]
    fn balancing_keeps_earliest_examples() {
        let ds = build_balanced(&buckets(&[("m", 4), ("n", 2)]), None).unwrap();
        let m_values: Vec<f32> = ds
            .vectors
            .iter()
            .zip(&ds.labels)
            .filter(|(_, l)| l.as_str() == "m")
            .map(|(v, _)| v[0])
            .collect();
        assert_eq!(m_values, vec![0.0, 1.0]);
    }

    #[test]
    fn balancing_is_idempotent() {
        let once = build_balanced(&buckets(&[("s", 9), ("sh", 4), ("z", 6)]), None).unwrap();
        let twice = balance(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn fine_labels_merge_into_their_coarse_class() {
        let b = buckets(&[("n", 2), ("nx", 2), ("m", 3)]);
        let ds = build_balanced(&b, None).unwrap();
        assert_eq!(ds.class_counts(), vec![("n".into(), 3), ("m".into(), 3)]);
    }

    #[test]
    fn glottal_stop_is_always_skipped() {
        let ds = build_balanced(&buckets(&[("q", 10), ("t", 2), ("d", 2)]), None).unwrap();
        assert_eq!(ds.len(), 4);
        assert!(!ds.labels.iter().any(|l| l == "q"));
        let restricted =
            build_balanced(&buckets(&[("q", 10), ("t", 2)]), Some(&targets(&["q", "t"]))).unwrap();
        assert_eq!(restricted.num_classes(), 1);
    }

    #[test]
    fn targets_restrict_by_fine_label() {
        let b = buckets(&[("m", 3), ("em", 3), ("n", 4), ("aa", 9)]);
        let ds = build_balanced(&b, Some(&targets(&["m", "n", "ng"]))).unwrap();
        assert_eq!(ds.class_counts(), vec![("m".into(), 3), ("n".into(), 3)]);
    }

    #[test]
    fn unknown_label_is_schema_drift() {
        let err = build_balanced(&buckets(&[("m", 1), ("xyz", 1)]), None).unwrap_err();
        assert!(matches!(err, ProbeError::UnknownPhoneme { label } if label == "xyz"));
    }

    #[test]
    fn single_class_is_reported_as_degenerate() {
        let ds = build_balanced(&buckets(&[("m", 5), ("aa", 5)]), Some(&targets(&["m"]))).unwrap();
        let err = ensure_probeable(&ds, 4, "nasals").unwrap_err();
        assert!(matches!(
            err,
            ProbeError::DegenerateDataset { layer: 4, classes: 1, .. }
        ));
        let empty = build_balanced(&PhonemeBuckets::default(), None).unwrap();
        assert!(ensure_probeable(&empty, 0, "stops").is_err());
    }
}
