use std::hash::{BuildHasher, Hasher};

use hashbrown::hash_map::DefaultHashBuilder;

pub type EdgeId = u32;

/// Count all bits (i.e. ones) within an array.
#[must_use]
pub(crate) fn count_all_bits(array: &[u64]) -> u64 {
    array.iter().map(|x| x.count_ones() as u64).sum()
}

/// Returns an iterator over the bit index of all the set bits in `array`.
pub(crate) fn bit_iter(array: &[u64]) -> impl Iterator<Item = usize> + '_ {
    array.iter().enumerate().flat_map(move |(word_offset, &word)| {
        (0..u64::BITS)
            .filter(move |bit| (word & (1 << bit)) != 0)
            .map(move |bit| word_offset * 64 + (bit as usize))
    })
}

pub(crate) fn is_bit_set(array: &[u64], bit: u32) -> bool {
    let (index, bit) = (bit / 64, bit % 64);
    match array.get(index as usize) {
        Some(word) => (word & (1 << bit)) != 0,
        None => false,
    }
}

fn words_for(map_size: usize) -> usize {
    (map_size + 63) / 64
}

/// Global "have we ever seen this edge" map, plus the trace checksum used to
/// compare executions. The checksum keying is per-instance: it only needs to
/// be stable within one fuzzing process.
pub struct CoverageMap {
    seen: Vec<u64>,
    count: u64,
    hasher: DefaultHashBuilder,
}

impl CoverageMap {
    pub fn new(map_size: usize) -> Self {
        Self {
            seen: vec![0; words_for(map_size)],
            count: 0,
            hasher: DefaultHashBuilder::default(),
        }
    }

    /// Hash of a coverage trace, used to detect whether a mutation changed
    /// the execution path at all.
    pub fn exec_cksum(&self, trace: &[u8]) -> u64 {
        let mut hasher = self.hasher.build_hasher();
        hasher.write(trace);
        hasher.finish()
    }

    /// Whether `trace` touches any edge never seen before.
    pub fn has_new_edges(&self, trace: &[u8]) -> bool {
        trace
            .iter()
            .enumerate()
            .any(|(edge, count)| *count != 0 && !is_bit_set(&self.seen, edge as u32))
    }

    /// Merge `trace` into the global map. Returns true if coverage grew.
    pub fn merge(&mut self, trace: &[u8]) -> bool {
        if !self.has_new_edges(trace) {
            return false;
        }
        for (edge, count) in trace.iter().enumerate() {
            if *count != 0 {
                self.seen[edge / 64] |= 1 << (edge % 64);
            }
        }
        self.count = count_all_bits(&self.seen);
        true
    }

    /// Number of distinct edges seen so far.
    pub fn count(&self) -> u64 {
        self.count
    }

    pub(crate) fn snapshot(&self) -> (Vec<u64>, u64) {
        (self.seen.clone(), self.count)
    }

    pub(crate) fn restore(&mut self, snapshot: (Vec<u64>, u64)) {
        (self.seen, self.count) = snapshot;
    }
}

/// Compressed per-seed coverage footprint: one bit per edge.
#[derive(Clone, Default)]
pub struct MiniMap {
    bits: Vec<u64>,
}

impl MiniMap {
    pub fn from_trace(trace: &[u8]) -> Self {
        let mut bits = vec![0_u64; words_for(trace.len())];
        for (edge, count) in trace.iter().enumerate() {
            if *count != 0 {
                bits[edge / 64] |= 1 << (edge % 64);
            }
        }
        Self { bits }
    }

    pub fn contains(&self, edge: EdgeId) -> bool {
        is_bit_set(&self.bits, edge)
    }

    pub fn edges(&self) -> impl Iterator<Item = EdgeId> + '_ {
        bit_iter(&self.bits).map(|edge| edge as EdgeId)
    }
}

/// For every edge, the number of executed inputs that touched it. This is
/// the raw signal behind rare-branch selection: a low count means few inputs
/// ever reach the edge.
pub struct HitBits {
    counts: Vec<u32>,
}

impl HitBits {
    pub fn new(map_size: usize) -> Self {
        Self { counts: vec![0; map_size] }
    }

    /// Credit every edge hit by `trace` with one more input.
    pub fn record(&mut self, trace: &[u8]) {
        for (count, hit) in self.counts.iter_mut().zip(trace) {
            if *hit != 0 {
                *count = count.saturating_add(1);
            }
        }
    }

    pub fn get(&self, edge: EdgeId) -> u32 {
        self.counts[edge as usize]
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub(crate) fn snapshot(&self) -> Vec<u32> {
        self.counts.clone()
    }

    pub(crate) fn restore(&mut self, snapshot: Vec<u32>) {
        self.counts = snapshot;
    }

    #[cfg(test)]
    pub(crate) fn set(&mut self, edge: EdgeId, count: u32) {
        self.counts[edge as usize] = count;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_reports_growth_once() {
        let mut map = CoverageMap::new(8);
        let mut trace = [0_u8; 8];
        trace[3] = 1;
        assert!(map.merge(&trace));
        assert!(!map.merge(&trace));
        assert_eq!(map.count(), 1);

        trace[5] = 7;
        assert!(map.merge(&trace));
        assert_eq!(map.count(), 2);
    }

    #[test]
    fn cksum_stable_within_instance() {
        let map = CoverageMap::new(8);
        let trace = [0, 1, 0, 2, 0, 0, 0, 0];
        assert_eq!(map.exec_cksum(&trace), map.exec_cksum(&trace));
        assert_ne!(map.exec_cksum(&trace), map.exec_cksum(&[0; 8]));
    }

    #[test]
    fn mini_map_round_trips_edges() {
        let mut trace = [0_u8; 130];
        trace[0] = 1;
        trace[64] = 3;
        trace[129] = 200;
        let mini = MiniMap::from_trace(&trace);
        assert_eq!(mini.edges().collect::<Vec<_>>(), vec![0, 64, 129]);
        assert!(mini.contains(64));
        assert!(!mini.contains(65));
    }

    #[test]
    fn hit_bits_monotone() {
        let mut hits = HitBits::new(4);
        let trace = [1, 0, 0, 9];
        hits.record(&trace);
        hits.record(&trace);
        assert_eq!(hits.get(0), 2);
        assert_eq!(hits.get(1), 0);
        assert_eq!(hits.get(3), 2);
    }
}
