use rand::Rng;

use crate::coverage::{is_bit_set, EdgeId, MiniMap};

pub type InputId = usize;

/// One stored test case plus the per-seed state the mutation engine needs.
pub struct QueueEntry {
    /// The input bytes.
    pub data: Vec<u8>,
    /// Compressed coverage footprint of the seed (one bit per edge).
    pub footprint: MiniMap,
    /// Trace checksum recorded when the seed was saved; the deterministic
    /// stages compare against this to spot path changes.
    pub exec_cksum: u64,
    /// Edges already used as a rare-branch target for this seed.
    fuzzed_branches: Vec<u64>,
    /// Mutation energy assigned by the outer scheduler (100 = baseline).
    pub perf_score: u32,
    /// Length of the derivation chain behind this seed.
    pub depth: u64,
    /// Prioritized by the queue culling pass.
    pub favored: bool,
    /// Has gone through at least one full fuzz_one call.
    pub was_fuzzed: bool,
    /// Number of fuzz_one calls that picked this seed.
    pub fuzz_level: u32,
    /// The branch-preserving trimmer already ran for this seed.
    pub trim_done: bool,
    /// Deterministic stages completed; never re-enter them.
    pub passed_det: bool,
}

impl QueueEntry {
    pub fn has_fuzzed_branch(&self, edge: EdgeId) -> bool {
        is_bit_set(&self.fuzzed_branches, edge)
    }

    pub fn any_fuzzed_branch(&self) -> bool {
        self.fuzzed_branches.iter().any(|word| *word != 0)
    }

    pub fn mark_fuzzed_branch(&mut self, edge: EdgeId) {
        let word = edge as usize / 64;
        if self.fuzzed_branches.len() <= word {
            self.fuzzed_branches.resize(word + 1, 0);
        }
        self.fuzzed_branches[word] |= 1 << (edge % 64);
    }
}

/// Storage for all saved test cases. Queue scheduling (which seed to fuzz
/// next) belongs to the embedder; the store only hands out entries and
/// tracks the favored/pending bookkeeping the skip logic reads.
#[derive(Default)]
pub struct CorpusStore {
    entries: Vec<QueueEntry>,
}

impl CorpusStore {
    pub fn add(&mut self, data: Vec<u8>, footprint: MiniMap, exec_cksum: u64, depth: u64) -> InputId {
        let id = self.entries.len();
        self.entries.push(QueueEntry {
            data,
            footprint,
            exec_cksum,
            fuzzed_branches: vec![],
            perf_score: 100,
            depth,
            // New entries covered something no other input did, so they
            // start out favored.
            favored: true,
            was_fuzzed: false,
            fuzz_level: 0,
            trim_done: false,
            passed_det: false,
        });
        id
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Discard entries added after `len` was the store size. Only the
    /// shadow-mode rollback uses this; ids below `len` stay stable.
    pub(crate) fn truncate(&mut self, len: usize) {
        self.entries.truncate(len);
    }

    /// Number of favored entries that have never been fuzzed.
    pub fn pending_favored(&self) -> usize {
        self.entries.iter().filter(|entry| entry.favored && !entry.was_fuzzed).count()
    }

    /// Pick a random entry other than `exclude` with at least `min_len`
    /// bytes. Used by the splice stages.
    pub fn random_other<R: Rng>(
        &self,
        rng: &mut R,
        exclude: InputId,
        min_len: usize,
    ) -> Option<InputId> {
        let eligible =
            self.entries.iter().enumerate().filter(|(id, entry)| {
                *id != exclude && entry.data.len() >= min_len
            });
        let count = eligible.clone().count();
        if count == 0 {
            return None;
        }
        let pick = rng.gen_range(0..count);
        eligible.map(|(id, _)| id).nth(pick)
    }

    /// Number of entries long enough to act as a splice partner.
    pub fn splice_candidates(&self, exclude: InputId, min_len: usize) -> usize {
        self.entries
            .iter()
            .enumerate()
            .filter(|(id, entry)| *id != exclude && entry.data.len() >= min_len)
            .count()
    }
}

impl std::ops::Index<InputId> for CorpusStore {
    type Output = QueueEntry;

    fn index(&self, index: InputId) -> &Self::Output {
        &self.entries[index]
    }
}

impl std::ops::IndexMut<InputId> for CorpusStore {
    fn index_mut(&mut self, index: InputId) -> &mut Self::Output {
        &mut self.entries[index]
    }
}
