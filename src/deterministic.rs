use crate::{
    config::Config,
    exec::Executor,
    mask::{DELETE, INSERT, OVERWRITE},
    stats::Stage,
    Exit, Fuzzer, RawOutcome, SeedCtx,
};

/// Scale factor of the effector map: one flag per 8-byte chunk.
const EFF_MAP_SCALE2: usize = 3;

fn eff_apos(pos: usize) -> usize {
    pos >> EFF_MAP_SCALE2
}

fn eff_alen(len: usize) -> usize {
    eff_apos(len) + ((len & ((1 << EFF_MAP_SCALE2) - 1)) != 0) as usize
}

/// Marks the 8-byte chunks where byte flips changed the coverage checksum.
/// The expensive deterministic stages skip unmarked chunks.
pub(crate) struct EffectorMap {
    flags: Vec<bool>,
    count: usize,
}

impl EffectorMap {
    pub fn new(len: usize) -> Self {
        let mut map = Self { flags: vec![false; eff_alen(len)], count: 0 };
        // First and last chunk always count as doing something.
        map.mark(0);
        if eff_apos(len - 1) != 0 {
            map.mark(len - 1);
        }
        map
    }

    /// An all-marked map for paths that skip the flip8 probe.
    pub fn saturated(len: usize) -> Self {
        Self { flags: vec![true; eff_alen(len)], count: eff_alen(len) }
    }

    pub fn mark(&mut self, pos: usize) {
        let chunk = eff_apos(pos);
        if !self.flags[chunk] {
            self.flags[chunk] = true;
            self.count += 1;
        }
    }

    pub fn is_marked(&self, pos: usize) -> bool {
        self.flags[eff_apos(pos)]
    }

    /// Whether any chunk covering `[pos, pos + len)` is marked.
    pub fn span_marked(&self, pos: usize, len: usize) -> bool {
        (eff_apos(pos)..=eff_apos(pos + len - 1)).any(|chunk| self.flags[chunk])
    }

    /// If the map got denser than `max_perc` percent, flag everything:
    /// skipping the rest would not save enough executions to matter.
    pub fn maybe_saturate(&mut self, max_perc: usize) {
        let total = self.flags.len();
        if self.count != total && self.count * 100 / total > max_perc {
            self.flags.fill(true);
            self.count = total;
        }
    }
}

pub(crate) fn flip_bit(buf: &mut [u8], bit: usize) {
    buf[bit >> 3] ^= 128 >> (bit & 7);
}

/// True iff `xor_val` (old ^ new) is reachable by the walking bit flips:
/// 1/2/4-bit runs anywhere, full 8/16/32-bit flips at byte alignment. Zero
/// means the values are identical and the execution would be wasted.
pub(crate) fn could_be_bitflip(mut xor_val: u32) -> bool {
    if xor_val == 0 {
        return true;
    }

    let mut sh = 0;
    while xor_val & 1 == 0 {
        sh += 1;
        xor_val >>= 1;
    }

    if xor_val == 1 || xor_val == 3 || xor_val == 15 {
        return true;
    }
    if sh % 8 != 0 {
        return false;
    }
    xor_val == 0xff || xor_val == 0xffff || xor_val == 0xffff_ffff
}

/// True iff `new_val` is reachable from `old_val` by the arithmetic stages:
/// adding or subtracting up to `arith_max` at any byte, word or dword
/// position, in either endianness.
pub(crate) fn could_be_arith(old_val: u32, new_val: u32, blen: u8, arith_max: u32) -> bool {
    if old_val == new_val {
        return true;
    }

    // Single-byte adjustments.
    let mut diffs = 0;
    let (mut ov, mut nv) = (0u8, 0u8);
    for i in 0..blen {
        let a = (old_val >> (8 * i)) as u8;
        let b = (new_val >> (8 * i)) as u8;
        if a != b {
            diffs += 1;
            ov = a;
            nv = b;
        }
    }
    if diffs == 1
        && (ov.wrapping_sub(nv) as u32 <= arith_max || nv.wrapping_sub(ov) as u32 <= arith_max)
    {
        return true;
    }
    if blen == 1 {
        return false;
    }

    // Word adjustments, both endians.
    let mut diffs = 0;
    let (mut ov, mut nv) = (0u16, 0u16);
    for i in 0..blen / 2 {
        let a = (old_val >> (16 * i)) as u16;
        let b = (new_val >> (16 * i)) as u16;
        if a != b {
            diffs += 1;
            ov = a;
            nv = b;
        }
    }
    if diffs == 1 {
        if ov.wrapping_sub(nv) as u32 <= arith_max || nv.wrapping_sub(ov) as u32 <= arith_max {
            return true;
        }
        let (ov, nv) = (ov.swap_bytes(), nv.swap_bytes());
        if ov.wrapping_sub(nv) as u32 <= arith_max || nv.wrapping_sub(ov) as u32 <= arith_max {
            return true;
        }
    }

    // Dword adjustments, both endians.
    if blen == 4 {
        if old_val.wrapping_sub(new_val) <= arith_max || new_val.wrapping_sub(old_val) <= arith_max
        {
            return true;
        }
        let (old_val, new_val) = (old_val.swap_bytes(), new_val.swap_bytes());
        if old_val.wrapping_sub(new_val) <= arith_max || new_val.wrapping_sub(old_val) <= arith_max
        {
            return true;
        }
    }

    false
}

/// True iff `new_val` is reachable by pasting an interesting value over
/// `old_val` at any position already covered by a narrower stage. With
/// `check_le` set the caller already executed the LE variant for this width
/// and asks about the BE one.
pub(crate) fn could_be_interest(
    old_val: u32,
    new_val: u32,
    blen: u8,
    check_le: bool,
    config: &Config,
) -> bool {
    if old_val == new_val {
        return true;
    }

    for i in 0..blen as u32 {
        for value in &config.interesting_8 {
            let tval = (old_val & !(0xff << (i * 8))) | ((*value as u8 as u32) << (i * 8));
            if new_val == tval {
                return true;
            }
        }
    }

    if blen == 2 && !check_le {
        return false;
    }

    for i in 0..(blen - 1) as u32 {
        for value in &config.interesting_16 {
            let tval = (old_val & !(0xffff << (i * 8))) | ((*value as u16 as u32) << (i * 8));
            if new_val == tval {
                return true;
            }
            if blen > 2 {
                let tval = (old_val & !(0xffff << (i * 8)))
                    | (((*value as u16).swap_bytes() as u32) << (i * 8));
                if new_val == tval {
                    return true;
                }
            }
        }
    }

    if blen == 4 && check_le {
        for value in &config.interesting_32 {
            if new_val == *value as u32 {
                return true;
            }
        }
    }

    false
}

struct StageGuard {
    stage: Stage,
    orig_hit: u64,
}

impl StageGuard {
    fn enter<E: Executor>(fuzzer: &mut Fuzzer<E>, stage: Stage) -> Self {
        fuzzer.state.stage = stage;
        Self { stage, orig_hit: fuzzer.hit_count() }
    }

    fn leave<E: Executor>(self, fuzzer: &mut Fuzzer<E>, cycles: u64) {
        let index = self.stage.index();
        fuzzer.stats.stage_finds[index] += fuzzer.hit_count() - self.orig_hit;
        fuzzer.stats.stage_cycles[index] += cycles;
    }
}

macro_rules! run_or_abort {
    ($fuzzer:expr, $buf:expr) => {
        match $fuzzer.run_candidate($buf)? {
            RawOutcome::Stopped => return Ok(Exit::Abort),
            RawOutcome::Done(_) => {}
        }
    };
}

/// Walking single-bit flips. Doubles as the auto-dictionary miner: runs of
/// bytes whose low-bit flips keep producing the same changed trace checksum
/// behave like an atomically-checked token and get recorded.
pub(crate) fn flip1<E: Executor>(fuzzer: &mut Fuzzer<E>, ctx: &mut SeedCtx) -> anyhow::Result<Exit> {
    let len = ctx.buf.len();
    let stage_max = len * 8;
    let guard = StageGuard::enter(fuzzer, Stage::Flip1);

    let min_auto = fuzzer.config.min_auto_extra;
    let max_auto = fuzzer.config.max_auto_extra;
    let auto_cap = fuzzer.config.max_auto_extras;

    let mut prev_cksum = ctx.base_cksum;
    let mut collect: Vec<u8> = vec![];
    let mut run_len = 0usize;

    for cur in 0..stage_max {
        flip_bit(&mut ctx.buf, cur);
        run_or_abort!(fuzzer, &ctx.buf);
        flip_bit(&mut ctx.buf, cur);

        // Token detection happens while flipping the least significant bit
        // of each byte, where path changes are least violent.
        if cur & 7 != 7 {
            continue;
        }
        let cksum = fuzzer.coverage.exec_cksum(fuzzer.exec.trace());

        if cur == stage_max - 1 && cksum == prev_cksum {
            // End of input while still collecting: grab the final byte.
            if collect.len() < max_auto {
                collect.push(ctx.buf[cur >> 3]);
            }
            run_len += 1;
            if run_len >= min_auto && run_len <= max_auto {
                fuzzer.auto_dict.maybe_add(&collect, auto_cap);
            }
        }
        else if cksum != prev_cksum {
            if run_len >= min_auto && run_len <= max_auto {
                fuzzer.auto_dict.maybe_add(&collect, auto_cap);
            }
            collect.clear();
            run_len = 0;
            prev_cksum = cksum;
        }

        // Keep collecting only while the flip makes an actual difference.
        if cksum != ctx.base_cksum {
            if collect.len() < max_auto {
                collect.push(ctx.buf[cur >> 3]);
            }
            run_len += 1;
        }
    }

    guard.leave(fuzzer, stage_max as u64);
    Ok(Exit::Continue)
}

/// Walking byte flips. Populates the effector map, and in rare-branch mode
/// the overwrite bit of the branch mask.
pub(crate) fn flip8<E: Executor>(fuzzer: &mut Fuzzer<E>, ctx: &mut SeedCtx) -> anyhow::Result<Exit> {
    let len = ctx.buf.len();
    let guard = StageGuard::enter(fuzzer, Stage::Flip8);
    ctx.eff = EffectorMap::new(len);

    let eff_min_len = fuzzer.config.eff_min_len;
    let eff_max_perc = fuzzer.config.eff_max_perc;

    for i in 0..len {
        ctx.buf[i] ^= 0xFF;
        run_or_abort!(fuzzer, &ctx.buf);

        if ctx.use_mask && fuzzer.hits_target() {
            ctx.mask.allow(i, OVERWRITE);
        }

        if !ctx.eff.is_marked(i) {
            // Very short inputs skip the checksum and flag everything.
            let cksum = match len >= eff_min_len {
                true => fuzzer.coverage.exec_cksum(fuzzer.exec.trace()),
                false => !ctx.base_cksum,
            };
            if cksum != ctx.base_cksum {
                ctx.eff.mark(i);
            }
        }

        ctx.buf[i] ^= 0xFF;
    }

    ctx.eff.maybe_saturate(eff_max_perc);
    guard.leave(fuzzer, len as u64);
    Ok(Exit::Continue)
}

/// The delete and insert probe sweeps that fill in the remaining two bits of
/// the branch mask.
pub(crate) fn probe_mask<E: Executor>(
    fuzzer: &mut Fuzzer<E>,
    ctx: &mut SeedCtx,
) -> anyhow::Result<Exit> {
    let len = ctx.buf.len();
    let guard = StageGuard::enter(fuzzer, Stage::BranchProbe);
    let mut tmp = Vec::with_capacity(len + 1);

    // Deleting byte i.
    for i in 0..len {
        tmp.clear();
        tmp.extend_from_slice(&ctx.buf[..i]);
        tmp.extend_from_slice(&ctx.buf[i + 1..]);
        run_or_abort!(fuzzer, &tmp);
        if fuzzer.hits_target() {
            ctx.mask.allow(i, DELETE);
        }
    }

    // Inserting a random byte before position i.
    for i in 0..=len {
        tmp.clear();
        tmp.extend_from_slice(&ctx.buf[..i]);
        tmp.push(fuzzer.rng_byte());
        tmp.extend_from_slice(&ctx.buf[i..]);
        run_or_abort!(fuzzer, &tmp);
        if fuzzer.hits_target() {
            ctx.mask.allow(i, INSERT);
        }
    }

    guard.leave(fuzzer, (2 * len + 1) as u64);
    Ok(Exit::Continue)
}

/// Walking two- and four-bit flips.
pub(crate) fn flip2<E: Executor>(fuzzer: &mut Fuzzer<E>, ctx: &mut SeedCtx) -> anyhow::Result<Exit> {
    let len = ctx.buf.len();
    let stage_max = len * 8 - 1;
    let guard = StageGuard::enter(fuzzer, Stage::Flip2);

    for cur in 0..stage_max {
        flip_bit(&mut ctx.buf, cur);
        flip_bit(&mut ctx.buf, cur + 1);
        run_or_abort!(fuzzer, &ctx.buf);
        flip_bit(&mut ctx.buf, cur);
        flip_bit(&mut ctx.buf, cur + 1);
    }

    guard.leave(fuzzer, stage_max as u64);
    Ok(Exit::Continue)
}

pub(crate) fn flip4<E: Executor>(fuzzer: &mut Fuzzer<E>, ctx: &mut SeedCtx) -> anyhow::Result<Exit> {
    let len = ctx.buf.len();
    if len * 8 < 3 {
        return Ok(Exit::Continue);
    }
    let stage_max = len * 8 - 3;
    let guard = StageGuard::enter(fuzzer, Stage::Flip4);

    for cur in 0..stage_max {
        for k in 0..4 {
            flip_bit(&mut ctx.buf, cur + k);
        }
        run_or_abort!(fuzzer, &ctx.buf);
        for k in 0..4 {
            flip_bit(&mut ctx.buf, cur + k);
        }
    }

    guard.leave(fuzzer, stage_max as u64);
    Ok(Exit::Continue)
}

/// Walking word flips, gated on the effector map and (in rare-branch mode)
/// on every involved byte being overwrite-safe.
pub(crate) fn flip16<E: Executor>(fuzzer: &mut Fuzzer<E>, ctx: &mut SeedCtx) -> anyhow::Result<Exit> {
    let len = ctx.buf.len();
    if len < 2 {
        return Ok(Exit::Continue);
    }
    let guard = StageGuard::enter(fuzzer, Stage::Flip16);
    let mut stage_max = (len - 1) as u64;

    for i in 0..len - 1 {
        if !ctx.eff.span_marked(i, 2) {
            stage_max -= 1;
            continue;
        }
        if ctx.use_mask && !(ctx.mask.allows(i, OVERWRITE) && ctx.mask.allows(i + 1, OVERWRITE)) {
            stage_max -= 1;
            continue;
        }

        ctx.buf[i] ^= 0xFF;
        ctx.buf[i + 1] ^= 0xFF;
        run_or_abort!(fuzzer, &ctx.buf);
        ctx.buf[i] ^= 0xFF;
        ctx.buf[i + 1] ^= 0xFF;
    }

    guard.leave(fuzzer, stage_max);
    Ok(Exit::Continue)
}

pub(crate) fn flip32<E: Executor>(fuzzer: &mut Fuzzer<E>, ctx: &mut SeedCtx) -> anyhow::Result<Exit> {
    let len = ctx.buf.len();
    if len < 4 {
        return Ok(Exit::Continue);
    }
    let guard = StageGuard::enter(fuzzer, Stage::Flip32);
    let mut stage_max = (len - 3) as u64;

    for i in 0..len - 3 {
        if !ctx.eff.span_marked(i, 4) {
            stage_max -= 1;
            continue;
        }
        if ctx.use_mask && !(0..4).all(|k| ctx.mask.allows(i + k, OVERWRITE)) {
            stage_max -= 1;
            continue;
        }

        for k in 0..4 {
            ctx.buf[i + k] ^= 0xFF;
        }
        run_or_abort!(fuzzer, &ctx.buf);
        for k in 0..4 {
            ctx.buf[i + k] ^= 0xFF;
        }
    }

    guard.leave(fuzzer, stage_max);
    Ok(Exit::Continue)
}

pub(crate) fn arith8<E: Executor>(fuzzer: &mut Fuzzer<E>, ctx: &mut SeedCtx) -> anyhow::Result<Exit> {
    let len = ctx.buf.len();
    let arith_max = fuzzer.config.arith_max;
    let guard = StageGuard::enter(fuzzer, Stage::Arith8);
    let mut stage_max = 2 * len as u64 * arith_max as u64;

    for i in 0..len {
        if !ctx.eff.is_marked(i) {
            stage_max -= 2 * arith_max as u64;
            continue;
        }
        if ctx.use_mask && !ctx.mask.allows(i, OVERWRITE) {
            stage_max -= 2 * arith_max as u64;
            continue;
        }

        let orig = ctx.buf[i];
        for j in 1..=arith_max as u8 {
            // Only try values a bit flip could not have produced.
            if !could_be_bitflip((orig ^ orig.wrapping_add(j)) as u32) {
                ctx.buf[i] = orig.wrapping_add(j);
                run_or_abort!(fuzzer, &ctx.buf);
            }
            else {
                stage_max -= 1;
            }

            if !could_be_bitflip((orig ^ orig.wrapping_sub(j)) as u32) {
                ctx.buf[i] = orig.wrapping_sub(j);
                run_or_abort!(fuzzer, &ctx.buf);
            }
            else {
                stage_max -= 1;
            }

            ctx.buf[i] = orig;
        }
    }

    guard.leave(fuzzer, stage_max);
    Ok(Exit::Continue)
}

pub(crate) fn arith16<E: Executor>(fuzzer: &mut Fuzzer<E>, ctx: &mut SeedCtx) -> anyhow::Result<Exit> {
    let len = ctx.buf.len();
    if len < 2 {
        return Ok(Exit::Continue);
    }
    let arith_max = fuzzer.config.arith_max;
    let guard = StageGuard::enter(fuzzer, Stage::Arith16);
    let mut stage_max = 4 * (len - 1) as u64 * arith_max as u64;

    for i in 0..len - 1 {
        if !ctx.eff.span_marked(i, 2) {
            stage_max -= 4 * arith_max as u64;
            continue;
        }
        if ctx.use_mask && !(ctx.mask.allows(i, OVERWRITE) && ctx.mask.allows(i + 1, OVERWRITE)) {
            stage_max -= 4 * arith_max as u64;
            continue;
        }

        let orig = u16::from_le_bytes([ctx.buf[i], ctx.buf[i + 1]]);
        for j in 1..=arith_max as u16 {
            // Little endian first, but only when the carry crosses a byte
            // boundary (arith8 covered the rest).
            if (orig & 0xff) + j > 0xff && !could_be_bitflip((orig ^ orig.wrapping_add(j)) as u32) {
                ctx.buf[i..i + 2].copy_from_slice(&orig.wrapping_add(j).to_le_bytes());
                run_or_abort!(fuzzer, &ctx.buf);
            }
            else {
                stage_max -= 1;
            }

            if (orig & 0xff) < j && !could_be_bitflip((orig ^ orig.wrapping_sub(j)) as u32) {
                ctx.buf[i..i + 2].copy_from_slice(&orig.wrapping_sub(j).to_le_bytes());
                run_or_abort!(fuzzer, &ctx.buf);
            }
            else {
                stage_max -= 1;
            }

            // Big endian.
            let be = orig.swap_bytes();
            if (orig >> 8) + j > 0xff
                && !could_be_bitflip((orig ^ be.wrapping_add(j).swap_bytes()) as u32)
            {
                ctx.buf[i..i + 2].copy_from_slice(&be.wrapping_add(j).swap_bytes().to_le_bytes());
                run_or_abort!(fuzzer, &ctx.buf);
            }
            else {
                stage_max -= 1;
            }

            if (orig >> 8) < j && !could_be_bitflip((orig ^ be.wrapping_sub(j).swap_bytes()) as u32)
            {
                ctx.buf[i..i + 2].copy_from_slice(&be.wrapping_sub(j).swap_bytes().to_le_bytes());
                run_or_abort!(fuzzer, &ctx.buf);
            }
            else {
                stage_max -= 1;
            }

            ctx.buf[i..i + 2].copy_from_slice(&orig.to_le_bytes());
        }
    }

    guard.leave(fuzzer, stage_max);
    Ok(Exit::Continue)
}

pub(crate) fn arith32<E: Executor>(fuzzer: &mut Fuzzer<E>, ctx: &mut SeedCtx) -> anyhow::Result<Exit> {
    let len = ctx.buf.len();
    if len < 4 {
        return Ok(Exit::Continue);
    }
    let arith_max = fuzzer.config.arith_max;
    let guard = StageGuard::enter(fuzzer, Stage::Arith32);
    let mut stage_max = 4 * (len - 3) as u64 * arith_max as u64;

    for i in 0..len - 3 {
        if !ctx.eff.span_marked(i, 4) {
            stage_max -= 4 * arith_max as u64;
            continue;
        }
        if ctx.use_mask && !(0..4).all(|k| ctx.mask.allows(i + k, OVERWRITE)) {
            stage_max -= 4 * arith_max as u64;
            continue;
        }

        let orig = u32::from_le_bytes(ctx.buf[i..i + 4].try_into().unwrap());
        for j in 1..=arith_max {
            if (orig & 0xffff) + j > 0xffff && !could_be_bitflip(orig ^ orig.wrapping_add(j)) {
                ctx.buf[i..i + 4].copy_from_slice(&orig.wrapping_add(j).to_le_bytes());
                run_or_abort!(fuzzer, &ctx.buf);
            }
            else {
                stage_max -= 1;
            }

            if (orig & 0xffff) < j && !could_be_bitflip(orig ^ orig.wrapping_sub(j)) {
                ctx.buf[i..i + 4].copy_from_slice(&orig.wrapping_sub(j).to_le_bytes());
                run_or_abort!(fuzzer, &ctx.buf);
            }
            else {
                stage_max -= 1;
            }

            let be = orig.swap_bytes();
            if (be & 0xffff) + j > 0xffff
                && !could_be_bitflip(orig ^ be.wrapping_add(j).swap_bytes())
            {
                ctx.buf[i..i + 4].copy_from_slice(&be.wrapping_add(j).swap_bytes().to_le_bytes());
                run_or_abort!(fuzzer, &ctx.buf);
            }
            else {
                stage_max -= 1;
            }

            if (be & 0xffff) < j && !could_be_bitflip(orig ^ be.wrapping_sub(j).swap_bytes()) {
                ctx.buf[i..i + 4].copy_from_slice(&be.wrapping_sub(j).swap_bytes().to_le_bytes());
                run_or_abort!(fuzzer, &ctx.buf);
            }
            else {
                stage_max -= 1;
            }

            ctx.buf[i..i + 4].copy_from_slice(&orig.to_le_bytes());
        }
    }

    guard.leave(fuzzer, stage_max);
    Ok(Exit::Continue)
}

pub(crate) fn interest8<E: Executor>(
    fuzzer: &mut Fuzzer<E>,
    ctx: &mut SeedCtx,
) -> anyhow::Result<Exit> {
    let len = ctx.buf.len();
    let values = fuzzer.config.interesting_8.clone();
    let arith_max = fuzzer.config.arith_max;
    let guard = StageGuard::enter(fuzzer, Stage::Interest8);
    let mut stage_max = (len * values.len()) as u64;

    for i in 0..len {
        if !ctx.eff.is_marked(i) {
            stage_max -= values.len() as u64;
            continue;
        }
        if ctx.use_mask && !ctx.mask.allows(i, OVERWRITE) {
            stage_max -= values.len() as u64;
            continue;
        }

        let orig = ctx.buf[i];
        for value in &values {
            let value = *value as u8;
            if could_be_bitflip((orig ^ value) as u32)
                || could_be_arith(orig as u32, value as u32, 1, arith_max)
            {
                stage_max -= 1;
                continue;
            }

            ctx.buf[i] = value;
            run_or_abort!(fuzzer, &ctx.buf);
            ctx.buf[i] = orig;
        }
    }

    guard.leave(fuzzer, stage_max);
    Ok(Exit::Continue)
}

pub(crate) fn interest16<E: Executor>(
    fuzzer: &mut Fuzzer<E>,
    ctx: &mut SeedCtx,
) -> anyhow::Result<Exit> {
    let len = ctx.buf.len();
    if len < 2 {
        return Ok(Exit::Continue);
    }
    let values = fuzzer.config.interesting_16.clone();
    let arith_max = fuzzer.config.arith_max;
    let guard = StageGuard::enter(fuzzer, Stage::Interest16);
    let mut stage_max = (2 * (len - 1) * values.len()) as u64;

    for i in 0..len - 1 {
        if !ctx.eff.span_marked(i, 2) {
            stage_max -= 2 * values.len() as u64;
            continue;
        }
        if ctx.use_mask && !(ctx.mask.allows(i, OVERWRITE) && ctx.mask.allows(i + 1, OVERWRITE)) {
            stage_max -= 2 * values.len() as u64;
            continue;
        }

        let orig = u16::from_le_bytes([ctx.buf[i], ctx.buf[i + 1]]);
        for value in &values {
            let value = *value as u16;

            if !could_be_bitflip((orig ^ value) as u32)
                && !could_be_arith(orig as u32, value as u32, 2, arith_max)
                && !could_be_interest(orig as u32, value as u32, 2, false, &fuzzer.config)
            {
                ctx.buf[i..i + 2].copy_from_slice(&value.to_le_bytes());
                run_or_abort!(fuzzer, &ctx.buf);
            }
            else {
                stage_max -= 1;
            }

            let swapped = value.swap_bytes();
            if value != swapped
                && !could_be_bitflip((orig ^ swapped) as u32)
                && !could_be_arith(orig as u32, swapped as u32, 2, arith_max)
                && !could_be_interest(orig as u32, swapped as u32, 2, true, &fuzzer.config)
            {
                ctx.buf[i..i + 2].copy_from_slice(&swapped.to_le_bytes());
                run_or_abort!(fuzzer, &ctx.buf);
            }
            else {
                stage_max -= 1;
            }
        }
        ctx.buf[i..i + 2].copy_from_slice(&orig.to_le_bytes());
    }

    guard.leave(fuzzer, stage_max);
    Ok(Exit::Continue)
}

pub(crate) fn interest32<E: Executor>(
    fuzzer: &mut Fuzzer<E>,
    ctx: &mut SeedCtx,
) -> anyhow::Result<Exit> {
    let len = ctx.buf.len();
    if len < 4 {
        return Ok(Exit::Continue);
    }
    let values = fuzzer.config.interesting_32.clone();
    let arith_max = fuzzer.config.arith_max;
    let guard = StageGuard::enter(fuzzer, Stage::Interest32);
    let mut stage_max = (2 * (len - 3) * values.len()) as u64;

    for i in 0..len - 3 {
        if !ctx.eff.span_marked(i, 4) {
            stage_max -= 2 * values.len() as u64;
            continue;
        }
        if ctx.use_mask && !(0..4).all(|k| ctx.mask.allows(i + k, OVERWRITE)) {
            stage_max -= 2 * values.len() as u64;
            continue;
        }

        let orig = u32::from_le_bytes(ctx.buf[i..i + 4].try_into().unwrap());
        for value in &values {
            let value = *value as u32;

            if !could_be_bitflip(orig ^ value)
                && !could_be_arith(orig, value, 4, arith_max)
                && !could_be_interest(orig, value, 4, false, &fuzzer.config)
            {
                ctx.buf[i..i + 4].copy_from_slice(&value.to_le_bytes());
                run_or_abort!(fuzzer, &ctx.buf);
            }
            else {
                stage_max -= 1;
            }

            let swapped = value.swap_bytes();
            if value != swapped
                && !could_be_bitflip(orig ^ swapped)
                && !could_be_arith(orig, swapped, 4, arith_max)
                && !could_be_interest(orig, swapped, 4, true, &fuzzer.config)
            {
                ctx.buf[i..i + 4].copy_from_slice(&swapped.to_le_bytes());
                run_or_abort!(fuzzer, &ctx.buf);
            }
            else {
                stage_max -= 1;
            }
        }
        ctx.buf[i..i + 4].copy_from_slice(&orig.to_le_bytes());
    }

    guard.leave(fuzzer, stage_max);
    Ok(Exit::Continue)
}

/// Overwrite each position with every user dictionary token.
pub(crate) fn extras_overwrite<E: Executor>(
    fuzzer: &mut Fuzzer<E>,
    ctx: &mut SeedCtx,
) -> anyhow::Result<Exit> {
    if fuzzer.dict.is_empty() {
        return Ok(Exit::Continue);
    }
    let len = ctx.buf.len();
    let guard = StageGuard::enter(fuzzer, Stage::ExtrasUo);
    let mut stage_max = (fuzzer.dict.len() * len) as u64;

    for i in 0..len {
        let mut last_len = 0;

        for t in 0..fuzzer.dict.len() {
            let token = &fuzzer.dict.tokens()[t];

            // Skip tokens that do not fit, match the buffer already, or only
            // touch dead chunks.
            if token.len() > len - i
                || *token == ctx.buf[i..i + token.len()]
                || !ctx.eff.span_marked(i, token.len())
            {
                stage_max -= 1;
                continue;
            }
            if ctx.use_mask && !(0..token.len()).all(|k| ctx.mask.allows(i + k, OVERWRITE)) {
                stage_max -= 1;
                continue;
            }

            last_len = token.len();
            let token = token.clone();
            ctx.buf[i..i + last_len].copy_from_slice(&token);
            run_or_abort!(fuzzer, &ctx.buf);
        }

        ctx.buf[i..i + last_len].copy_from_slice(&ctx.input[i..i + last_len]);
    }

    guard.leave(fuzzer, stage_max);
    Ok(Exit::Continue)
}

/// Insert every user dictionary token before each position.
pub(crate) fn extras_insert<E: Executor>(
    fuzzer: &mut Fuzzer<E>,
    ctx: &mut SeedCtx,
) -> anyhow::Result<Exit> {
    if fuzzer.dict.is_empty() {
        return Ok(Exit::Continue);
    }
    let len = ctx.buf.len();
    let max_file = fuzzer.config.max_file;
    let guard = StageGuard::enter(fuzzer, Stage::ExtrasUi);
    let mut stage_max = (fuzzer.dict.len() * (len + 1)) as u64;
    let mut tmp = Vec::with_capacity(len + fuzzer.config.max_dict_file);

    for i in 0..=len {
        if ctx.use_mask && !ctx.mask.allows(i, INSERT) {
            stage_max -= fuzzer.dict.len() as u64;
            continue;
        }

        for t in 0..fuzzer.dict.len() {
            let token = &fuzzer.dict.tokens()[t];
            if len + token.len() > max_file {
                stage_max -= 1;
                continue;
            }

            tmp.clear();
            tmp.extend_from_slice(&ctx.buf[..i]);
            tmp.extend_from_slice(token);
            tmp.extend_from_slice(&ctx.buf[i..]);
            run_or_abort!(fuzzer, &tmp);
        }
    }

    guard.leave(fuzzer, stage_max);
    Ok(Exit::Continue)
}

/// Overwrite each position with the most popular auto-dictionary tokens.
pub(crate) fn extras_auto<E: Executor>(
    fuzzer: &mut Fuzzer<E>,
    ctx: &mut SeedCtx,
) -> anyhow::Result<Exit> {
    if fuzzer.auto_dict.is_empty() {
        return Ok(Exit::Continue);
    }
    let len = ctx.buf.len();
    let tokens: Vec<Vec<u8>> = fuzzer
        .auto_dict
        .top(fuzzer.config.use_auto_extras)
        .into_iter()
        .map(|token| token.to_vec())
        .collect();
    let guard = StageGuard::enter(fuzzer, Stage::ExtrasAo);
    let mut stage_max = (tokens.len() * len) as u64;

    for i in 0..len {
        let mut last_len = 0;

        for token in &tokens {
            if token.len() > len - i
                || *token == ctx.buf[i..i + token.len()]
                || !ctx.eff.span_marked(i, token.len())
            {
                stage_max -= 1;
                continue;
            }
            if ctx.use_mask && !(0..token.len()).all(|k| ctx.mask.allows(i + k, OVERWRITE)) {
                stage_max -= 1;
                continue;
            }

            last_len = token.len();
            ctx.buf[i..i + last_len].copy_from_slice(token);
            run_or_abort!(fuzzer, &ctx.buf);
        }

        ctx.buf[i..i + last_len].copy_from_slice(&ctx.input[i..i + last_len]);
    }

    guard.leave(fuzzer, stage_max);
    Ok(Exit::Continue)
}

/// The post-probe deterministic battery in pipeline order.
pub(crate) fn run_all<E: Executor>(
    fuzzer: &mut Fuzzer<E>,
    ctx: &mut SeedCtx,
) -> anyhow::Result<Exit> {
    let stages: [fn(&mut Fuzzer<E>, &mut SeedCtx) -> anyhow::Result<Exit>; 13] = [
        flip2::<E>,
        flip4::<E>,
        flip16::<E>,
        flip32::<E>,
        arith8::<E>,
        arith16::<E>,
        arith32::<E>,
        interest8::<E>,
        interest16::<E>,
        interest32::<E>,
        extras_overwrite::<E>,
        extras_insert::<E>,
        extras_auto::<E>,
    ];
    for stage in stages {
        if let Exit::Abort = stage(fuzzer, ctx)? {
            return Ok(Exit::Abort);
        }
    }
    Ok(Exit::Continue)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Config,
        exec::{testing::TestTarget, ExecStatus},
        Fuzzer,
    };

    #[test]
    fn bitflip_predicate_matches_walking_patterns() {
        assert!(could_be_bitflip(0));
        assert!(could_be_bitflip(1));
        assert!(could_be_bitflip(3 << 5));
        assert!(could_be_bitflip(15 << 12));
        assert!(could_be_bitflip(0xff << 8));
        assert!(could_be_bitflip(0xffff_ffff));

        assert!(!could_be_bitflip(5));
        assert!(!could_be_bitflip(0xff << 3));
        assert!(!could_be_bitflip(0x1234));
    }

    #[test]
    fn arith_predicate_is_reflexive_and_endian_aware() {
        assert!(could_be_arith(42, 42, 4, 35));
        assert!(could_be_arith(100, 135, 1, 35));
        assert!(could_be_arith(100, 65, 1, 35));
        assert!(!could_be_arith(100, 180, 1, 35));

        // 0x0100 -> 0x00ff is LE word subtraction by 1.
        assert!(could_be_arith(0x0100, 0x00ff, 2, 35));
        // 0xFF00 viewed big-endian is 0x00FF; adding 1 gives 0x0100, which
        // reads back as 0x0001.
        assert!(could_be_arith(0xFF00, 0x0001, 2, 35));
    }

    #[test]
    fn interest_predicate_is_reflexive_and_sees_pastes() {
        let config = Config::default();
        assert!(could_be_interest(7, 7, 4, false, &config));
        // Pasting interesting_8 value 16 into the low byte.
        assert!(could_be_interest(0xAABB, 0xAA10, 2, false, &config));
        // Word pastes only count once the LE pass for this width ran.
        assert!(!could_be_interest(0, 0x7fff, 2, false, &config));
        assert!(could_be_interest(0, 0x7fff, 2, true, &config));
        assert!(!could_be_interest(0, 0x1234_5678, 4, true, &config));
    }

    fn fixed_target() -> TestTarget<impl FnMut(&[u8], &mut [u8]) -> ExecStatus> {
        TestTarget::new(16, |_input, trace| {
            trace[0] = 1;
            ExecStatus::Ok
        })
    }

    #[test]
    fn arith8_skips_bitflip_shadowed_values() {
        let mut fuzzer = Fuzzer::with_seed(fixed_target(), Config::default(), 3).unwrap();
        let mut ctx = fuzzer.test_ctx(vec![0u8]);
        ctx.eff = EffectorMap::saturated(1);

        // +1 over zero is a single-bit flip, so it must not execute.
        assert!(could_be_bitflip(0 ^ 1));

        let expected: u64 = (1..=35u8)
            .map(|j| {
                !could_be_bitflip(j as u32) as u64
                    + !could_be_bitflip(0u8.wrapping_sub(j) as u32) as u64
            })
            .sum();

        arith8(&mut fuzzer, &mut ctx).unwrap();
        assert_eq!(fuzzer.exec.execs, expected);
        assert_eq!(fuzzer.stats.stage_cycles[Stage::Arith8.index()], expected);
    }

    #[test]
    fn word_stages_skip_single_byte_inputs() {
        let mut fuzzer = Fuzzer::with_seed(fixed_target(), Config::default(), 3).unwrap();
        let mut ctx = fuzzer.test_ctx(vec![0x41]);
        ctx.eff = EffectorMap::saturated(1);

        flip16(&mut fuzzer, &mut ctx).unwrap();
        flip32(&mut fuzzer, &mut ctx).unwrap();
        arith16(&mut fuzzer, &mut ctx).unwrap();
        arith32(&mut fuzzer, &mut ctx).unwrap();
        interest16(&mut fuzzer, &mut ctx).unwrap();
        interest32(&mut fuzzer, &mut ctx).unwrap();
        assert_eq!(fuzzer.exec.execs, 0);
    }

    #[test]
    fn every_deterministic_mutation_restores_the_buffer() {
        let mut fuzzer = Fuzzer::with_seed(fixed_target(), Config::default(), 3).unwrap();
        fuzzer.dict.add_token(b"tok", 128);
        let original = b"deterministic!".to_vec();
        let mut ctx = fuzzer.test_ctx(original.clone());
        ctx.eff = EffectorMap::saturated(original.len());

        flip1(&mut fuzzer, &mut ctx).unwrap();
        assert_eq!(ctx.buf, original);
        run_all(&mut fuzzer, &mut ctx).unwrap();
        assert_eq!(ctx.buf, original);
    }

    #[test]
    fn flip8_builds_the_overwrite_mask() {
        // The target edge fires iff input[3] == 'X'; flipping that byte must
        // clear its overwrite bit while every other position stays safe.
        let target = TestTarget::new(16, |input, trace| {
            trace[0] = 1;
            if input.get(3) == Some(&b'X') {
                trace[5] = 1;
            }
            ExecStatus::Ok
        });
        let mut fuzzer = Fuzzer::with_seed(target, Config::default(), 3).unwrap();

        let mut ctx = fuzzer.test_ctx(b"AAAXA".to_vec());
        ctx.target = Some(5);
        ctx.use_mask = true;
        ctx.mask = crate::mask::BranchMask::cleared(5);
        fuzzer.state.target = Some(5);

        flip8(&mut fuzzer, &mut ctx).unwrap();

        for i in 0..5 {
            assert_eq!(ctx.mask.allows(i, OVERWRITE), i != 3, "position {i}");
        }
    }

    #[test]
    fn effector_map_saturates_when_dense() {
        // 30 of 32 chunks marked crosses the 90% density rule, so the two
        // holes get flagged as well.
        let mut eff = EffectorMap::new(256);
        for i in (0..240).step_by(8) {
            eff.mark(i);
        }
        assert!(!eff.is_marked(242));
        eff.maybe_saturate(90);
        assert!(eff.is_marked(242));

        let mut sparse = EffectorMap::new(256);
        sparse.mark(64);
        sparse.maybe_saturate(90);
        assert!(!sparse.is_marked(128));
    }
}
