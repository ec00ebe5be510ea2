use rand::Rng;
use rand_distr::Distribution;

/// Insert `x` into `input` at `offset`, shifting the tail right.
pub fn insert_slice(input: &mut Vec<u8>, x: &[u8], offset: usize) {
    input.splice(offset..offset, x.iter().copied());
}

/// Draw from a Beta(a, b) distribution. Both parameters are >= 1 everywhere
/// the bandits call this, so construction cannot fail.
pub fn beta_sample<R: Rng>(rng: &mut R, a: f64, b: f64) -> f64 {
    rand_distr::Beta::new(a, b).unwrap().sample(rng)
}

/// First and last offset at which `a` and `b` differ (within the shorter
/// length), used to find reasonable splice locations.
pub fn locate_diffs(a: &[u8], b: &[u8]) -> (Option<usize>, Option<usize>) {
    let mut first = None;
    let mut last = None;
    for (pos, (x, y)) in a.iter().zip(b).enumerate() {
        if x != y {
            if first.is_none() {
                first = Some(pos);
            }
            last = Some(pos);
        }
    }
    (first, last)
}

/// The position of the highest set bit of `x`, i.e. `floor(log2(x))`.
/// Callers guarantee `x > 0`.
pub fn highest_order_bit(x: u32) -> u32 {
    31 - x.leading_zeros()
}
