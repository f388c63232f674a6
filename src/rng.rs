use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Deterministic random source handed to every stage that shuffles or samples.
#[derive(Debug, Clone)]
pub struct ProbeRng {
    seed: u64,
    inner: StdRng,
}

impl ProbeRng {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            inner: StdRng::seed_from_u64(seed),
        }
    }

    /// Independent child source; the same `(seed, stream)` always gives the same sequence.
    pub fn fork(&self, stream: u64) -> Self {
        let derived = self
            .seed
            .wrapping_mul(0x9E37_79B9_7F4A_7C15)
            .wrapping_add(stream.wrapping_add(1).wrapping_mul(0xBF58_476D_1CE4_E5B9));
        Self::new(derived)
    }

    pub fn shuffle<T>(&mut self, items: &mut [T]) {
        items.shuffle(&mut self.inner);
    }

    /// `count` distinct indices from `0..len`, uniformly without replacement.
    /// Returns every index (shuffled) when `count >= len`.
    pub fn sample_indices(&mut self, len: usize, count: usize) -> Vec<usize> {
        let mut indices: Vec<usize> = (0..len).collect();
        self.shuffle(&mut indices);
        indices.truncate(count);
        indices
    }
}
