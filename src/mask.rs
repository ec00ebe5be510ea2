use rand::Rng;

/// Branch-mask bit meanings: which mutation kinds at a position keep the
/// target edge reachable.
pub const OVERWRITE: u8 = 1;
pub const DELETE: u8 = 2;
pub const INSERT: u8 = 4;

/// Per-position mutation classification for the current input. One byte per
/// input position plus one trailing slot so insertion-at-end has a home.
#[derive(Clone)]
pub struct BranchMask {
    bytes: Vec<u8>,
}

impl BranchMask {
    /// The default mask: everything allowed, the end-of-input slot only
    /// accepts insertion.
    pub fn unrestricted(input_len: usize) -> Self {
        let mut bytes = vec![OVERWRITE | DELETE | INSERT; input_len + 1];
        bytes[input_len] = INSERT;
        Self { bytes }
    }

    /// An all-forbidden mask, the starting point for probing.
    pub fn cleared(input_len: usize) -> Self {
        Self { bytes: vec![0; input_len + 1] }
    }

    /// The input length this mask covers.
    pub fn input_len(&self) -> usize {
        self.bytes.len() - 1
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn allow(&mut self, pos: usize, kind: u8) {
        self.bytes[pos] |= kind;
    }

    pub fn allows(&self, pos: usize, kind: u8) -> bool {
        self.bytes[pos] & kind != 0
    }

    /// Number of input bytes that may be overwritten. Zero after probing
    /// means the target edge is unfuzzable and belongs on the blacklist.
    pub fn overwrite_safe_count(&self) -> usize {
        self.bytes[..self.input_len()].iter().filter(|b| **b & OVERWRITE != 0).count()
    }

    /// Account for `amount` bytes inserted at `at`: the new positions are
    /// fully unrestricted (they did not exist when the edge was probed).
    pub fn grow(&mut self, at: usize, amount: usize) {
        let fresh = std::iter::repeat(OVERWRITE | DELETE | INSERT).take(amount);
        self.bytes.splice(at..at, fresh);
    }

    /// Account for `amount` bytes deleted at `at`.
    pub fn shrink(&mut self, at: usize, amount: usize) {
        self.bytes.drain(at..at + amount);
    }
}

/// Collect every offset where a `num_bytes`-sized modification fits inside a
/// contiguous run of positions whose `kind` bit is set.
fn collect_block_offsets(mask: &BranchMask, kind: u8, num_bytes: usize, out: &mut Vec<usize>) {
    out.clear();
    let len = mask.input_len();

    let mut block_start = None;
    for i in 0..=len {
        let in_block = i < len && mask.allows(i, kind);
        match (block_start, in_block) {
            (None, true) => block_start = Some(i),
            (Some(start), false) => {
                // i is one past the last set position of the block.
                for offset in start..(i + 1).saturating_sub(num_bytes) {
                    out.push(offset);
                }
                block_start = None;
            }
            _ => {}
        }
    }
}

/// A byte offset where `num_bytes` bytes can be modified under `kind`, or
/// `None` when no run of set positions is long enough. A `None` means the
/// caller must skip the mutation, not retry.
pub fn modifiable_byte_pos<R: Rng>(
    mask: &BranchMask,
    rng: &mut R,
    num_bytes: usize,
    kind: u8,
    scratch: &mut Vec<usize>,
) -> Option<usize> {
    collect_block_offsets(mask, kind, num_bytes.max(1), scratch);
    if scratch.is_empty() {
        return None;
    }
    Some(scratch[rng.gen_range(0..scratch.len())])
}

/// A bit offset for sub-byte modifications: a random overwrite-safe byte
/// start plus a uniform bit offset within it.
pub fn modifiable_bit_pos<R: Rng>(
    mask: &BranchMask,
    rng: &mut R,
    scratch: &mut Vec<usize>,
) -> Option<usize> {
    let byte = modifiable_byte_pos(mask, rng, 1, OVERWRITE, scratch)?;
    Some(byte * 8 + rng.gen_range(0..8))
}

/// A position (0..=len) where insertion keeps the target edge, or `None`.
pub fn insert_pos<R: Rng>(
    mask: &BranchMask,
    rng: &mut R,
    scratch: &mut Vec<usize>,
) -> Option<usize> {
    scratch.clear();
    for i in 0..mask.len() {
        if mask.allows(i, INSERT) {
            scratch.push(i);
        }
    }
    if scratch.is_empty() {
        return None;
    }
    Some(scratch[rng.gen_range(0..scratch.len())])
}
