use std::ops::Range;

use crate::error::ProbeError;

/// Sample-to-frame conversion for a fixed frame duration.
///
/// Kept in integer samples so segment starts always floor and segment stops always
/// ceil, without float drift at frame boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameGeometry {
    sample_rate_hz: u32,
    samples_per_frame: usize,
}

impl FrameGeometry {
    pub fn new(sample_rate_hz: u32, frame_duration_ms: u32) -> Result<Self, ProbeError> {
        let samples = sample_rate_hz as u64 * frame_duration_ms as u64;
        if samples == 0 || samples % 1000 != 0 {
            return Err(ProbeError::invalid_input(format!(
                "{frame_duration_ms} ms frames do not span a whole number of samples at {sample_rate_hz} Hz"
            )));
        }
        Ok(Self {
            sample_rate_hz,
            samples_per_frame: (samples / 1000) as usize,
        })
    }

    pub fn sample_rate_hz(&self) -> u32 {
        self.sample_rate_hz
    }

    pub fn samples_per_frame(&self) -> usize {
        self.samples_per_frame
    }

    pub fn start_frame(&self, start_sample: usize) -> usize {
        start_sample / self.samples_per_frame
    }

    pub fn stop_frame(&self, stop_sample: usize) -> usize {
        stop_sample.div_ceil(self.samples_per_frame)
    }

    /// Frames touched by samples `[start, stop)`. Empty when `stop <= start`.
    pub fn frame_range(&self, start_sample: usize, stop_sample: usize) -> Range<usize> {
        if stop_sample <= start_sample {
            return 0..0;
        }
        self.start_frame(start_sample)..self.stop_frame(stop_sample)
    }

    /// Samples covered by one frame.
    pub fn frame_span(&self, frame: usize) -> Range<usize> {
        let start = frame * self.samples_per_frame;
        start..start + self.samples_per_frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry() -> FrameGeometry {
        FrameGeometry::new(16_000, 20).expect("20 ms at 16 kHz")
    }

    #[test]
    fn one_second_phoneme_spans_fifty_frames() {
        let g = geometry();
        assert_eq!(g.samples_per_frame(), 320);
        assert_eq!(g.start_frame(0), 0);
        assert_eq!(g.stop_frame(16_000), 50);
        assert_eq!(g.frame_range(0, 16_000), 0..50);
    }

    #[test]
    fn boundaries_floor_start_and_ceil_stop() {
        let g = geometry();
        assert_eq!(g.frame_range(319, 321), 0..2);
        assert_eq!(g.frame_range(320, 640), 1..2);
        assert_eq!(g.frame_range(321, 639), 1..2);
    }

    #[test]
    fn zero_length_segment_has_no_frames() {
        let g = geometry();
        assert!(g.frame_range(100, 100).is_empty());
        assert!(g.frame_range(640, 640).is_empty());
        assert!(g.frame_range(700, 600).is_empty());
    }

    #[test]
    fn rejects_fractional_frame_size() {
        assert!(FrameGeometry::new(16_000, 0).is_err());
        assert!(FrameGeometry::new(11_025, 20).is_err());
    }

    #[test]
    fn frame_span_matches_frame_size() {
        assert_eq!(geometry().frame_span(2), 640..960);
    }
}
