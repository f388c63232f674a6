//! Result reporting: JSON report, console table and the layer-accuracy SVG plot.

use std::fmt::Write as _;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::AttributionPolicy;
use crate::error::ProbeError;
use crate::probing::runner::GroupAccuracy;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportMeta {
    pub generated_at: DateTime<Utc>,
    pub seed: u64,
    /// Requested subset sizes.
    pub train_size: usize,
    pub test_size: usize,
    /// Utterances actually probed; smaller than requested when a split is short.
    pub train_utterances: usize,
    pub test_utterances: usize,
    pub num_layers: usize,
    pub frame_duration_ms: u32,
    pub attribution: AttributionPolicy,
    pub device: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeReport {
    pub meta: ReportMeta,
    pub groups: Vec<GroupAccuracy>,
}

impl ProbeReport {
    pub fn group(&self, name: &str) -> Option<&GroupAccuracy> {
        self.groups.iter().find(|g| g.group == name)
    }

    pub fn write_json(&self, path: &Path) -> Result<(), ProbeError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ProbeError::io("create report directory", e))?;
        }
        let mut file = File::create(path).map_err(|e| ProbeError::io("create report file", e))?;
        serde_json::to_writer_pretty(&mut file, self)
            .map_err(|e| ProbeError::json("serialize report", e))?;
        file.write_all(b"\n")
            .map_err(|e| ProbeError::io("finalize report file", e))?;
        Ok(())
    }

    pub fn plot(&self) -> AccuracyPlot {
        AccuracyPlot::from_groups(&self.groups)
    }
}

/// One row per layer, one column per group, accuracies to three decimals.
pub fn format_accuracy_table(groups: &[GroupAccuracy]) -> String {
    let num_layers = groups.iter().map(|g| g.layers.len()).max().unwrap_or(0);
    let widths: Vec<usize> = groups.iter().map(|g| g.group.len().max(5)).collect();

    let mut out = String::from("layer");
    for (group, &width) in groups.iter().zip(&widths) {
        let _ = write!(out, "  {:>width$}", group.group);
    }
    out.push('\n');
    for layer in 0..num_layers {
        let _ = write!(out, "{layer:>5}");
        for (group, &width) in groups.iter().zip(&widths) {
            match group.layers.get(layer) {
                Some(result) => {
                    let _ = write!(out, "  {:>width$.3}", result.accuracy);
                }
                None => {
                    let _ = write!(out, "  {:>width$}", "-");
                }
            }
        }
        out.push('\n');
    }
    out
}

const COLORS: &[&str] = &[
    "#3b82f6", "#ef4444", "#22c55e", "#f97316", "#8b5cf6", "#ec4899", "#06b6d4", "#eab308",
];

/// Line chart of probe accuracy against layer index.
#[derive(Debug, Clone, PartialEq)]
pub struct AccuracyPlot {
    pub series: Vec<(String, Vec<f64>)>,
}

impl AccuracyPlot {
    /// Fixed accuracy axis; chance level for the default groups sits below it.
    pub const Y_MIN: f64 = 0.5;
    pub const Y_MAX: f64 = 1.0;

    pub fn from_groups(groups: &[GroupAccuracy]) -> Self {
        Self {
            series: groups
                .iter()
                .map(|g| (g.group.clone(), g.accuracies()))
                .collect(),
        }
    }

    fn num_layers(&self) -> usize {
        self.series.iter().map(|(_, v)| v.len()).max().unwrap_or(0)
    }

    pub fn to_svg(&self, width: f64, height: f64) -> String {
        let (left, right, top, bottom) = (60.0, 130.0, 30.0, 50.0);
        let plot_w = (width - left - right).max(1.0);
        let plot_h = (height - top - bottom).max(1.0);
        let num_layers = self.num_layers();

        let x_of = |layer: usize| {
            if num_layers <= 1 {
                left + plot_w / 2.0
            } else {
                left + layer as f64 / (num_layers - 1) as f64 * plot_w
            }
        };
        let y_of = |acc: f64| {
            let clamped = acc.clamp(Self::Y_MIN, Self::Y_MAX);
            top + (Self::Y_MAX - clamped) / (Self::Y_MAX - Self::Y_MIN) * plot_h
        };

        let mut svg = String::new();
        svg.push_str(&format!(
            r#"<svg viewBox="0 0 {width} {height}" width="{width}" height="{height}" xmlns="http://www.w3.org/2000/svg">"#
        ));
        svg.push_str(&format!(
            r#"<rect x="0" y="0" width="{width}" height="{height}" fill="white"/>"#
        ));

        // Horizontal grid every 0.1 accuracy.
        for step in 0..=5 {
            let acc = Self::Y_MIN + step as f64 * 0.1;
            let y = y_of(acc);
            svg.push_str(&format!(
                r##"<line x1="{left:.1}" y1="{y:.1}" x2="{:.1}" y2="{y:.1}" stroke="#e5e7eb" stroke-width="1"/>"##,
                left + plot_w
            ));
            svg.push_str(&format!(
                r##"<text x="{:.1}" y="{:.1}" text-anchor="end" font-size="11" fill="#4b5563" font-family="sans-serif">{acc:.1}</text>"##,
                left - 8.0,
                y + 4.0
            ));
        }

        for layer in 0..num_layers {
            let x = x_of(layer);
            svg.push_str(&format!(
                r##"<line x1="{x:.1}" y1="{top:.1}" x2="{x:.1}" y2="{:.1}" stroke="#f3f4f6" stroke-width="1"/>"##,
                top + plot_h
            ));
            svg.push_str(&format!(
                r##"<text x="{x:.1}" y="{:.1}" text-anchor="middle" font-size="11" fill="#4b5563" font-family="sans-serif">{layer}</text>"##,
                top + plot_h + 16.0
            ));
        }

        // Axes
        svg.push_str(&format!(
            r##"<path d="M {left:.1} {top:.1} L {left:.1} {:.1} L {:.1} {:.1}" stroke="#111827" stroke-width="1.5" fill="none"/>"##,
            top + plot_h,
            left + plot_w,
            top + plot_h
        ));
        svg.push_str(&format!(
            r##"<text x="{:.1}" y="{:.1}" text-anchor="middle" font-size="12" fill="#111827" font-family="sans-serif">layer</text>"##,
            left + plot_w / 2.0,
            height - 12.0
        ));
        svg.push_str(&format!(
            r##"<text x="14" y="{:.1}" text-anchor="middle" font-size="12" fill="#111827" font-family="sans-serif" transform="rotate(-90 14 {:.1})">accuracy</text>"##,
            top + plot_h / 2.0,
            top + plot_h / 2.0
        ));

        for (idx, (name, accuracies)) in self.series.iter().enumerate() {
            let color = COLORS[idx % COLORS.len()];
            let mut path = String::new();
            for (layer, &acc) in accuracies.iter().enumerate() {
                let cmd = if layer == 0 { "M" } else { " L" };
                path.push_str(&format!("{cmd} {:.1} {:.1}", x_of(layer), y_of(acc)));
            }
            if !path.is_empty() {
                svg.push_str(&format!(
                    r#"<path d="{path}" fill="none" stroke="{color}" stroke-width="2"/>"#
                ));
            }
            for (layer, &acc) in accuracies.iter().enumerate() {
                svg.push_str(&format!(
                    r#"<circle cx="{:.1}" cy="{:.1}" r="3" fill="{color}"/>"#,
                    x_of(layer),
                    y_of(acc)
                ));
            }

            // Legend
            let ly = top + idx as f64 * 20.0;
            svg.push_str(&format!(
                r#"<g transform="translate({:.1}, {ly:.1})">"#,
                left + plot_w + 15.0
            ));
            svg.push_str(&format!(
                r#"<rect x="0" y="0" width="14" height="4" fill="{color}"/>"#
            ));
            svg.push_str(&format!(
                r##"<text x="20" y="6" font-size="12" fill="#111827" font-family="sans-serif">{}</text>"##,
                escape_xml(name)
            ));
            svg.push_str("</g>");
        }

        svg.push_str("</svg>");
        svg
    }

    pub fn write_svg(&self, path: &Path, width: f64, height: f64) -> Result<(), ProbeError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ProbeError::io("create plot directory", e))?;
        }
        fs::write(path, self.to_svg(width, height)).map_err(|e| ProbeError::io("write plot", e))
    }
}

fn escape_xml(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probing::runner::LayerResult;

    fn group(name: &str, accuracies: &[f64]) -> GroupAccuracy {
        GroupAccuracy {
            group: name.to_string(),
            labels: vec!["m".to_string(), "n".to_string()],
            layers: accuracies
                .iter()
                .enumerate()
                .map(|(layer, &accuracy)| LayerResult {
                    layer,
                    accuracy,
                    train_samples: 10,
                    test_samples: 4,
                    classes: 2,
                })
                .collect(),
        }
    }

    fn report() -> ProbeReport {
        ProbeReport {
            meta: ReportMeta {
                generated_at: Utc::now(),
                seed: 42,
                train_size: 800,
                test_size: 100,
                train_utterances: 800,
                test_utterances: 100,
                num_layers: 3,
                frame_duration_ms: 20,
                attribution: AttributionPolicy::EverySegment,
                device: "cpu".to_string(),
            },
            groups: vec![group("nasals", &[0.6, 0.9, 0.85]), group("stops", &[0.55, 0.7, 0.8])],
        }
    }

    #[test]
    fn table_has_a_row_per_layer() {
        let table = format_accuracy_table(&report().groups);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].contains("nasals") && lines[0].contains("stops"));
        assert!(lines[2].contains("0.900"));
    }

    #[test]
    fn svg_has_one_path_per_group_and_clamps_to_frame() {
        let mut plot = report().plot();
        plot.series.push(("chance & below".to_string(), vec![0.1, 1.2, 0.5]));
        let svg = plot.to_svg(640.0, 400.0);
        assert!(svg.starts_with("<svg"));
        assert!(svg.ends_with("</svg>"));
        assert_eq!(svg.matches(r##"fill="none" stroke="#"##).count(), 3);
        assert!(svg.contains("chance &amp; below"));
        // Plot frame spans y = 30 (1.0) to y = 350 (0.5).
        assert!(svg.contains("M 60.0 350.0 L 285.0 30.0 L 510.0 350.0"));
        assert!(svg.contains(">0.5</text>") && svg.contains(">1.0</text>"));
    }

    #[test]
    fn json_report_round_trips_through_serde_json() {
        let path = std::env::temp_dir()
            .join(format!("wav2vec2_probe_report_{}", std::process::id()))
            .join("probe_report.json");
        report().write_json(&path).expect("write report");
        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["meta"]["seed"], 42);
        assert_eq!(value["meta"]["attribution"], "every_segment");
        assert_eq!(value["groups"][0]["group"], "nasals");
        assert_eq!(value["groups"][0]["layers"].as_array().unwrap().len(), 3);
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn group_lookup_by_name() {
        let report = report();
        assert_eq!(report.group("stops").unwrap().layers.len(), 3);
        assert!(report.group("vowels").is_none());
    }
}
