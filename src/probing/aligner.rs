use crate::config::AttributionPolicy;
use crate::error::ProbeError;
use crate::probing::frames::FrameGeometry;
use crate::probing::tables::{FrameStateTable, PhonemeBuckets, PhonemeStateTable};
use crate::types::{FrameSequence, PhonemeDetail, Utterance};

/// Attributes encoder frames to the phoneme segments whose time span they overlap.
///
/// The alignment is approximate: segment boundaries rarely coincide with frame
/// boundaries, and the encoder may emit fewer frames than the raw sample count
/// suggests. Frames past the end of the encoder output are dropped.
#[derive(Debug, Clone, Copy)]
pub struct PhonemeAligner {
    geometry: FrameGeometry,
    policy: AttributionPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameAttribution {
    pub frame: usize,
    pub segment: usize,
}

impl PhonemeAligner {
    pub fn new(geometry: FrameGeometry, policy: AttributionPolicy) -> Self {
        Self { geometry, policy }
    }

    /// (frame, segment) pairs for an utterance with `num_frames` encoder frames.
    pub fn attributions(&self, detail: &PhonemeDetail, num_frames: usize) -> Vec<FrameAttribution> {
        match self.policy {
            AttributionPolicy::EverySegment => self.every_segment(detail, num_frames),
            AttributionPolicy::LongestOverlap => self.longest_overlap(detail, num_frames),
        }
    }

    fn every_segment(&self, detail: &PhonemeDetail, num_frames: usize) -> Vec<FrameAttribution> {
        let mut out = Vec::new();
        for (segment, seg) in detail.segments().enumerate() {
            let range = self.geometry.frame_range(seg.start, seg.stop);
            let end = range.end.min(num_frames);
            out.extend((range.start..end).map(|frame| FrameAttribution { frame, segment }));
        }
        out
    }

    fn longest_overlap(&self, detail: &PhonemeDetail, num_frames: usize) -> Vec<FrameAttribution> {
        // (overlap in samples, segment); strict comparison keeps the earlier segment on ties.
        let mut best: Vec<Option<(usize, usize)>> = vec![None; num_frames];
        for (segment, seg) in detail.segments().enumerate() {
            let range = self.geometry.frame_range(seg.start, seg.stop);
            for frame in range.start..range.end.min(num_frames) {
                let span = self.geometry.frame_span(frame);
                let overlap = seg.stop.min(span.end).saturating_sub(seg.start.max(span.start));
                if best[frame].map_or(true, |(current, _)| overlap > current) {
                    best[frame] = Some((overlap, segment));
                }
            }
        }
        best.into_iter()
            .enumerate()
            .filter_map(|(frame, slot)| slot.map(|(_, segment)| FrameAttribution { frame, segment }))
            .collect()
    }

    /// Frames claimed by more than one segment; always zero under `LongestOverlap`.
    pub fn shared_frames(&self, detail: &PhonemeDetail, num_frames: usize) -> usize {
        let mut claims = vec![0usize; num_frames];
        for FrameAttribution { frame, .. } in self.attributions(detail, num_frames) {
            claims[frame] += 1;
        }
        claims.iter().filter(|&&n| n > 1).count()
    }

    /// Buckets one layer of one utterance by fine-grained label.
    pub fn align(&self, detail: &PhonemeDetail, frames: &FrameSequence) -> PhonemeBuckets {
        let mut buckets = PhonemeBuckets::default();
        self.align_into(detail, frames, &mut buckets);
        buckets
    }

    fn align_into(&self, detail: &PhonemeDetail, frames: &FrameSequence, out: &mut PhonemeBuckets) {
        let labels = detail.labels();
        for FrameAttribution { frame, segment } in self.attributions(detail, frames.len()) {
            if let Some(vector) = frames.frame(frame) {
                out.push(&labels[segment], vector.to_vec());
            }
        }
    }

    /// Re-buckets a whole frame-state table. `utterances[i]` must be the utterance
    /// stored at index `i` of `frames`.
    pub fn build_table(
        &self,
        utterances: &[Utterance],
        frames: &FrameStateTable,
    ) -> Result<PhonemeStateTable, ProbeError> {
        if utterances.len() != frames.num_utterances() {
            return Err(ProbeError::invalid_input(format!(
                "{} utterances given for a frame table of {}",
                utterances.len(),
                frames.num_utterances()
            )));
        }
        if let Some(utt) = utterances
            .iter()
            .find(|utt| utt.sample_rate_hz != self.geometry.sample_rate_hz())
        {
            return Err(ProbeError::invalid_input(format!(
                "utterance '{}' is sampled at {} Hz, alignment expects {} Hz",
                utt.id,
                utt.sample_rate_hz,
                self.geometry.sample_rate_hz()
            )));
        }

        if let Some(first_layer) = frames.layer(0) {
            let shared: usize = utterances
                .iter()
                .zip(first_layer)
                .map(|(utt, seq)| self.shared_frames(&utt.phonemes, seq.len()))
                .sum();
            if shared > 0 {
                tracing::warn!(
                    shared_frames = shared,
                    policy = self.policy.as_str(),
                    "frames attributed to more than one phoneme segment"
                );
            }
        }

        let mut table = PhonemeStateTable::new(frames.num_layers());
        for layer in 0..frames.num_layers() {
            let (Some(sequences), Some(buckets)) = (frames.layer(layer), table.layer_mut(layer))
            else {
                continue;
            };
            for (utt, sequence) in utterances.iter().zip(sequences) {
                self.align_into(&utt.phonemes, sequence, buckets);
            }
            tracing::debug!(
                layer,
                labels = buckets.num_labels(),
                vectors = buckets.num_vectors(),
                "bucketed hidden states by phoneme"
            );
        }
        Ok(table)
    }
}
