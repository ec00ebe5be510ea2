use rand::{seq::SliceRandom, Rng};

use crate::{
    config::Config,
    deterministic::flip_bit,
    exec::Executor,
    mask::{insert_pos, modifiable_bit_pos, modifiable_byte_pos, DELETE, OVERWRITE},
    stats::Stage,
    utils::insert_slice,
    Exit, Fuzzer, RawOutcome, SeedCtx,
};

/// The atomic mutation operator classes the operator bandit chooses among.
/// Arith classes pick add or subtract with a coin flip.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HavocOp {
    FlipBit,
    Interesting8,
    Interesting16Le,
    Interesting16Be,
    Interesting32Le,
    Interesting32Be,
    Arith8,
    Arith16Le,
    Arith16Be,
    Arith32Le,
    Arith32Be,
    Rand8,
    CloneBytes,
    InsertSameByte,
    OverwriteChunk,
    OverwriteSameByte,
    DeleteBytes,
    OverwriteExtra,
    InsertExtra,
    OverwriteAutoExtra,
    InsertAutoExtra,
    SpliceOverwrite,
    SpliceInsert,
}

pub const ALL_OPS: [HavocOp; 23] = [
    HavocOp::FlipBit,
    HavocOp::Interesting8,
    HavocOp::Interesting16Le,
    HavocOp::Interesting16Be,
    HavocOp::Interesting32Le,
    HavocOp::Interesting32Be,
    HavocOp::Arith8,
    HavocOp::Arith16Le,
    HavocOp::Arith16Be,
    HavocOp::Arith32Le,
    HavocOp::Arith32Be,
    HavocOp::Rand8,
    HavocOp::CloneBytes,
    HavocOp::InsertSameByte,
    HavocOp::OverwriteChunk,
    HavocOp::OverwriteSameByte,
    HavocOp::DeleteBytes,
    HavocOp::OverwriteExtra,
    HavocOp::InsertExtra,
    HavocOp::OverwriteAutoExtra,
    HavocOp::InsertAutoExtra,
    HavocOp::SpliceOverwrite,
    HavocOp::SpliceInsert,
];

impl HavocOp {
    pub fn index(self) -> usize {
        ALL_OPS.iter().position(|op| *op == self).unwrap()
    }
}

/// How to undo one havoc iteration. Fine-grained batches remember their
/// before-images and unwind in reverse; structural batches copy the whole
/// pre-havoc state back.
enum Revert {
    Bits(Vec<usize>),
    Bytes(Vec<(usize, u8)>),
    Words(Vec<(usize, [u8; 2])>),
    Dwords(Vec<(usize, [u8; 4])>),
    Full,
}

/// Random block length for structural mutations, widening as the fuzzer
/// settles in (more queue cycles unlock the larger buckets).
fn block_len<R: Rng>(rng: &mut R, config: &Config, queue_cycles: u64, limit: usize) -> usize {
    let rlim = queue_cycles.clamp(1, 3);
    let (mut min_value, max_value) = match rng.gen_range(0..rlim) {
        0 => (1, config.havoc_blk_small),
        1 => (config.havoc_blk_small, config.havoc_blk_medium),
        _ => match rng.gen_range(0..10) {
            0 => (config.havoc_blk_large, config.havoc_blk_xl),
            _ => (config.havoc_blk_medium, config.havoc_blk_large),
        },
    };
    if min_value >= limit {
        min_value = 1;
    }
    min_value + rng.gen_range(0..=max_value.min(limit) - min_value)
}

/// Disallowed operator classes for the current iteration: dictionary ops
/// without a dictionary, splice ops without partners or headroom.
fn op_mask<E: Executor>(fuzzer: &Fuzzer<E>, ctx: &SeedCtx) -> Vec<bool> {
    let mut mask = vec![false; ALL_OPS.len()];

    if fuzzer.dict.is_empty() {
        mask[HavocOp::OverwriteExtra.index()] = true;
        mask[HavocOp::InsertExtra.index()] = true;
    }
    if fuzzer.auto_dict.is_empty() {
        mask[HavocOp::OverwriteAutoExtra.index()] = true;
        mask[HavocOp::InsertAutoExtra.index()] = true;
    }
    if fuzzer.corpus.splice_candidates(ctx.id, 4) == 0 {
        mask[HavocOp::SpliceOverwrite.index()] = true;
        mask[HavocOp::SpliceInsert.index()] = true;
    }
    if ctx.buf.len() + fuzzer.config.havoc_blk_xl >= fuzzer.config.max_file {
        mask[HavocOp::SpliceInsert.index()] = true;
    }
    if ctx.buf.len() < 2 {
        mask[HavocOp::SpliceOverwrite.index()] = true;
    }

    mask
}

/// Apply `op` up to `batch` times to the working buffer. A position-pool
/// sentinel ends the batch early; whatever was applied stays recorded so the
/// buffer can still be reverted.
fn apply_batch<E: Executor>(
    fuzzer: &mut Fuzzer<E>,
    ctx: &mut SeedCtx,
    op: HavocOp,
    batch: u32,
) -> Revert {
    let queue_cycles = fuzzer.queue_cycles;
    let Fuzzer { rng, config, dict, auto_dict, corpus, .. } = fuzzer;

    match op {
        HavocOp::FlipBit => {
            let mut bits = vec![];
            for _ in 0..batch {
                let Some(bit) = modifiable_bit_pos(&ctx.mask, rng, &mut ctx.pool)
                else {
                    break;
                };
                flip_bit(&mut ctx.buf, bit);
                bits.push(bit);
            }
            Revert::Bits(bits)
        }

        HavocOp::Interesting8 | HavocOp::Arith8 | HavocOp::Rand8 => {
            let mut bytes = vec![];
            for _ in 0..batch {
                let Some(pos) = modifiable_byte_pos(&ctx.mask, rng, 1, OVERWRITE, &mut ctx.pool)
                else {
                    break;
                };
                bytes.push((pos, ctx.buf[pos]));
                match op {
                    HavocOp::Interesting8 => {
                        let Some(value) = config.interesting_8.choose(rng)
                        else {
                            break;
                        };
                        ctx.buf[pos] = *value as u8;
                    }
                    HavocOp::Arith8 => {
                        let delta = 1 + rng.gen_range(0..config.arith_max) as u8;
                        ctx.buf[pos] = match rng.gen::<bool>() {
                            true => ctx.buf[pos].wrapping_add(delta),
                            false => ctx.buf[pos].wrapping_sub(delta),
                        };
                    }
                    _ => ctx.buf[pos] ^= 1 + rng.gen_range(0..255) as u8,
                }
            }
            Revert::Bytes(bytes)
        }

        HavocOp::Interesting16Le
        | HavocOp::Interesting16Be
        | HavocOp::Arith16Le
        | HavocOp::Arith16Be => {
            let mut words = vec![];
            if ctx.buf.len() >= 2 {
                for _ in 0..batch {
                    let Some(pos) = modifiable_byte_pos(&ctx.mask, rng, 2, OVERWRITE, &mut ctx.pool)
                    else {
                        break;
                    };
                    words.push((pos, [ctx.buf[pos], ctx.buf[pos + 1]]));

                    let new = match op {
                        HavocOp::Interesting16Le | HavocOp::Interesting16Be => {
                            let Some(value) = config.interesting_16.choose(rng)
                            else {
                                break;
                            };
                            match op {
                                HavocOp::Interesting16Le => *value as u16,
                                _ => (*value as u16).swap_bytes(),
                            }
                        }
                        _ => {
                            let delta = 1 + rng.gen_range(0..config.arith_max) as u16;
                            let le = op == HavocOp::Arith16Le;
                            let old = match le {
                                true => u16::from_le_bytes([ctx.buf[pos], ctx.buf[pos + 1]]),
                                false => u16::from_be_bytes([ctx.buf[pos], ctx.buf[pos + 1]]),
                            };
                            let new = match rng.gen::<bool>() {
                                true => old.wrapping_add(delta),
                                false => old.wrapping_sub(delta),
                            };
                            match le {
                                true => new,
                                false => new.swap_bytes(),
                            }
                        }
                    };
                    ctx.buf[pos..pos + 2].copy_from_slice(&new.to_le_bytes());
                }
            }
            Revert::Words(words)
        }

        HavocOp::Interesting32Le
        | HavocOp::Interesting32Be
        | HavocOp::Arith32Le
        | HavocOp::Arith32Be => {
            let mut dwords = vec![];
            if ctx.buf.len() >= 4 {
                for _ in 0..batch {
                    let Some(pos) = modifiable_byte_pos(&ctx.mask, rng, 4, OVERWRITE, &mut ctx.pool)
                    else {
                        break;
                    };
                    let old_bytes: [u8; 4] = ctx.buf[pos..pos + 4].try_into().unwrap();
                    dwords.push((pos, old_bytes));

                    let new = match op {
                        HavocOp::Interesting32Le | HavocOp::Interesting32Be => {
                            let Some(value) = config.interesting_32.choose(rng)
                            else {
                                break;
                            };
                            match op {
                                HavocOp::Interesting32Le => *value as u32,
                                _ => (*value as u32).swap_bytes(),
                            }
                        }
                        _ => {
                            let delta = 1 + rng.gen_range(0..config.arith_max);
                            let le = op == HavocOp::Arith32Le;
                            let old = match le {
                                true => u32::from_le_bytes(old_bytes),
                                false => u32::from_be_bytes(old_bytes),
                            };
                            let new = match rng.gen::<bool>() {
                                true => old.wrapping_add(delta),
                                false => old.wrapping_sub(delta),
                            };
                            match le {
                                true => new,
                                false => new.swap_bytes(),
                            }
                        }
                    };
                    ctx.buf[pos..pos + 4].copy_from_slice(&new.to_le_bytes());
                }
            }
            Revert::Dwords(dwords)
        }

        HavocOp::CloneBytes => {
            for _ in 0..batch {
                if ctx.buf.len() + config.havoc_blk_xl >= config.max_file {
                    break;
                }
                let clone_len = block_len(rng, config, queue_cycles, ctx.buf.len());
                let clone_from = rng.gen_range(0..=ctx.buf.len() - clone_len);
                let Some(clone_to) = insert_pos(&ctx.mask, rng, &mut ctx.pool)
                else {
                    break;
                };
                let chunk = ctx.buf[clone_from..clone_from + clone_len].to_vec();
                insert_slice(&mut ctx.buf, &chunk, clone_to);
                ctx.mask.grow(clone_to, clone_len);
            }
            Revert::Full
        }

        HavocOp::InsertSameByte => {
            for _ in 0..batch {
                if ctx.buf.len() + config.havoc_blk_xl >= config.max_file {
                    break;
                }
                let clone_len = block_len(rng, config, queue_cycles, config.havoc_blk_xl);
                let Some(clone_to) = insert_pos(&ctx.mask, rng, &mut ctx.pool)
                else {
                    break;
                };
                let byte = match rng.gen::<bool>() {
                    true => rng.gen(),
                    false => ctx.buf[rng.gen_range(0..ctx.buf.len())],
                };
                insert_slice(&mut ctx.buf, &vec![byte; clone_len], clone_to);
                ctx.mask.grow(clone_to, clone_len);
            }
            Revert::Full
        }

        HavocOp::OverwriteChunk => {
            for _ in 0..batch {
                if ctx.buf.len() < 2 {
                    break;
                }
                let copy_len = block_len(rng, config, queue_cycles, ctx.buf.len() - 1);
                let copy_from = rng.gen_range(0..=ctx.buf.len() - copy_len);
                let Some(copy_to) =
                    modifiable_byte_pos(&ctx.mask, rng, copy_len, OVERWRITE, &mut ctx.pool)
                else {
                    break;
                };
                if copy_from != copy_to {
                    ctx.buf.copy_within(copy_from..copy_from + copy_len, copy_to);
                }
            }
            Revert::Full
        }

        HavocOp::OverwriteSameByte => {
            for _ in 0..batch {
                if ctx.buf.len() < 2 {
                    break;
                }
                let copy_len = block_len(rng, config, queue_cycles, ctx.buf.len() - 1);
                let Some(copy_to) =
                    modifiable_byte_pos(&ctx.mask, rng, copy_len, OVERWRITE, &mut ctx.pool)
                else {
                    break;
                };
                let byte = match rng.gen::<bool>() {
                    true => rng.gen(),
                    false => ctx.buf[rng.gen_range(0..ctx.buf.len())],
                };
                ctx.buf[copy_to..copy_to + copy_len].fill(byte);
            }
            Revert::Full
        }

        HavocOp::DeleteBytes => {
            for _ in 0..batch {
                if ctx.buf.len() < 2 {
                    break;
                }
                let del_len = block_len(rng, config, queue_cycles, ctx.buf.len() - 1);
                let Some(del_from) =
                    modifiable_byte_pos(&ctx.mask, rng, del_len, DELETE, &mut ctx.pool)
                else {
                    break;
                };
                ctx.buf.drain(del_from..del_from + del_len);
                ctx.mask.shrink(del_from, del_len);
            }
            Revert::Full
        }

        HavocOp::OverwriteExtra | HavocOp::OverwriteAutoExtra => {
            for _ in 0..batch {
                let token = match op {
                    HavocOp::OverwriteExtra => dict.choose(rng),
                    _ => auto_dict.choose(rng),
                };
                let Some(token) = token
                else {
                    break;
                };
                if token.len() > ctx.buf.len() {
                    break;
                }
                let Some(at) =
                    modifiable_byte_pos(&ctx.mask, rng, token.len(), OVERWRITE, &mut ctx.pool)
                else {
                    break;
                };
                ctx.buf[at..at + token.len()].copy_from_slice(token);
            }
            Revert::Full
        }

        HavocOp::InsertExtra | HavocOp::InsertAutoExtra => {
            for _ in 0..batch {
                let token = match op {
                    HavocOp::InsertExtra => dict.choose(rng),
                    _ => auto_dict.choose(rng),
                };
                let Some(token) = token
                else {
                    break;
                };
                if ctx.buf.len() + token.len() >= config.max_file {
                    break;
                }
                let Some(at) = insert_pos(&ctx.mask, rng, &mut ctx.pool)
                else {
                    break;
                };
                insert_slice(&mut ctx.buf, token, at);
                ctx.mask.grow(at, token.len());
            }
            Revert::Full
        }

        HavocOp::SpliceOverwrite => {
            for _ in 0..batch {
                if ctx.buf.len() < 2 {
                    break;
                }
                let Some(other_id) = corpus.random_other(rng, ctx.id, 4)
                else {
                    break;
                };
                let other = &corpus[other_id].data;
                let copy_len =
                    block_len(rng, config, queue_cycles, other.len() - 1).min(ctx.buf.len());
                let copy_from = rng.gen_range(0..=other.len() - copy_len);
                let Some(copy_to) =
                    modifiable_byte_pos(&ctx.mask, rng, copy_len, OVERWRITE, &mut ctx.pool)
                else {
                    break;
                };
                let chunk = other[copy_from..copy_from + copy_len].to_vec();
                ctx.buf[copy_to..copy_to + copy_len].copy_from_slice(&chunk);
            }
            Revert::Full
        }

        HavocOp::SpliceInsert => {
            for _ in 0..batch {
                let Some(other_id) = corpus.random_other(rng, ctx.id, 4)
                else {
                    break;
                };
                let other = &corpus[other_id].data;
                let clone_len = block_len(rng, config, queue_cycles, other.len());
                if ctx.buf.len() + clone_len >= config.max_file {
                    break;
                }
                let clone_from = rng.gen_range(0..=other.len() - clone_len);
                let Some(clone_to) = insert_pos(&ctx.mask, rng, &mut ctx.pool)
                else {
                    break;
                };
                let chunk = other[clone_from..clone_from + clone_len].to_vec();
                insert_slice(&mut ctx.buf, &chunk, clone_to);
                ctx.mask.grow(clone_to, clone_len);
            }
            Revert::Full
        }
    }
}

fn restore(ctx: &mut SeedCtx, revert: Revert) {
    match revert {
        Revert::Bits(bits) => {
            for bit in bits.into_iter().rev() {
                flip_bit(&mut ctx.buf, bit);
            }
        }
        Revert::Bytes(bytes) => {
            for (pos, byte) in bytes.into_iter().rev() {
                ctx.buf[pos] = byte;
            }
        }
        Revert::Words(words) => {
            for (pos, word) in words.into_iter().rev() {
                ctx.buf[pos..pos + 2].copy_from_slice(&word);
            }
        }
        Revert::Dwords(dwords) => {
            for (pos, dword) in dwords.into_iter().rev() {
                ctx.buf[pos..pos + 4].copy_from_slice(&dword);
            }
        }
        Revert::Full => {
            ctx.buf.clear();
            ctx.buf.extend_from_slice(&ctx.input);
            ctx.mask.clone_from(&ctx.orig_mask);
        }
    }
}

/// The stacked random mutation stage. Each iteration asks the operator
/// bandit for an op class and the batch bandit for a stacking size, applies
/// the batch, executes, feeds the {0,1} reward back to both bandits and
/// restores the working state. A rewarded iteration doubles the remaining
/// stage length, up to the configured cap.
pub(crate) fn run<E: Executor>(
    fuzzer: &mut Fuzzer<E>,
    ctx: &mut SeedCtx,
    splice: bool,
) -> anyhow::Result<Exit> {
    let stage = match splice {
        false => Stage::Havoc,
        true => Stage::Splice,
    };
    fuzzer.state.stage = stage;
    let orig_hit = fuzzer.hit_count();

    let cycles_base = match splice {
        false => fuzzer.config.havoc_cycles,
        true => fuzzer.config.splice_havoc,
    };
    let mut perf_score = ctx.perf_score as u64;
    let mut stage_max = (cycles_base as u64 * perf_score
        / fuzzer.config.havoc_div as u64
        / 100)
        .max(fuzzer.config.havoc_min as u64);

    let bucket = fuzzer.config.batch_bucket(ctx.input.len());
    let mut havoc_queued = fuzzer.queued_paths();

    let mut cur = 0;
    while cur < stage_max {
        cur += 1;

        let mask = op_mask(fuzzer, ctx);
        let op_idx = fuzzer.bandits.op_bandit(bucket).select_arm(&mut fuzzer.rng, Some(&mask));
        let t = fuzzer.bandits.batch_bandit(bucket, op_idx).select_arm(&mut fuzzer.rng, None);
        let batch = match fuzzer.config.batch_pow2 {
            true => 1_u32 << t,
            false => 1 + t as u32,
        };

        let revert = apply_batch(fuzzer, ctx, ALL_OPS[op_idx], batch);

        let stopped = matches!(fuzzer.run_candidate(&ctx.buf)?, RawOutcome::Stopped);
        let new_find = !stopped && fuzzer.queued_paths() != havoc_queued;
        let reward = new_find as u64 as f64;

        fuzzer.bandits.batch_bandit(bucket, op_idx).add_reward(t, reward);
        fuzzer.bandits.op_bandit(bucket).add_reward(op_idx, reward);

        if stopped {
            let index = stage.index();
            fuzzer.stats.stage_finds[index] += fuzzer.hit_count() - orig_hit;
            fuzzer.stats.stage_cycles[index] += cur;
            return Ok(Exit::Abort);
        }

        if new_find {
            if perf_score <= (fuzzer.config.havoc_max_mult * 100) as u64 {
                stage_max *= 2;
                perf_score *= 2;
            }
            havoc_queued = fuzzer.queued_paths();
        }

        restore(ctx, revert);
    }

    let index = stage.index();
    fuzzer.stats.stage_finds[index] += fuzzer.hit_count() - orig_hit;
    fuzzer.stats.stage_cycles[index] += stage_max;
    Ok(Exit::Continue)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Config,
        exec::{testing::TestTarget, ExecStatus},
        mask::BranchMask,
        Fuzzer,
    };
    use rand::{rngs::SmallRng, SeedableRng};

    #[test]
    fn op_table_has_23_classes() {
        assert_eq!(ALL_OPS.len(), 23);
        for (i, op) in ALL_OPS.iter().enumerate() {
            assert_eq!(op.index(), i);
        }
    }

    fn plain_target() -> TestTarget<impl FnMut(&[u8], &mut [u8]) -> ExecStatus> {
        TestTarget::new(16, |_input, trace| {
            trace[0] = 1;
            ExecStatus::Ok
        })
    }

    #[test]
    fn splice_ops_masked_with_single_corpus_entry() {
        let mut fuzzer = Fuzzer::with_seed(plain_target(), Config::default(), 5).unwrap();
        fuzzer.add_seed(b"only one".to_vec()).unwrap();
        let ctx = fuzzer.test_ctx(b"only one".to_vec());

        let mask = op_mask(&fuzzer, &ctx);
        assert!(mask[HavocOp::SpliceOverwrite.index()]);
        assert!(mask[HavocOp::SpliceInsert.index()]);
        assert!(mask[HavocOp::OverwriteExtra.index()]);
        assert!(mask[HavocOp::OverwriteAutoExtra.index()]);
        assert!(!mask[HavocOp::FlipBit.index()]);
    }

    #[test]
    fn fine_batches_revert_in_reverse_order() {
        let mut fuzzer = Fuzzer::with_seed(plain_target(), Config::default(), 7).unwrap();
        let original = b"revert me please".to_vec();
        let mut ctx = fuzzer.test_ctx(original.clone());

        for op in [
            HavocOp::FlipBit,
            HavocOp::Interesting8,
            HavocOp::Interesting16Le,
            HavocOp::Interesting32Be,
            HavocOp::Arith8,
            HavocOp::Arith16Be,
            HavocOp::Arith32Le,
            HavocOp::Rand8,
        ] {
            let revert = apply_batch(&mut fuzzer, &mut ctx, op, 8);
            restore(&mut ctx, revert);
            assert_eq!(ctx.buf, original, "{op:?} did not revert");
        }
    }

    #[test]
    fn structural_batches_restore_buffer_and_mask() {
        let mut fuzzer = Fuzzer::with_seed(plain_target(), Config::default(), 7).unwrap();
        fuzzer.add_seed(b"partner entry".to_vec()).unwrap();
        fuzzer.add_seed(b"second partner".to_vec()).unwrap();
        fuzzer.dict.add_token(b"tok", 128);
        fuzzer.auto_dict.maybe_add(b"auto", 16);

        let original = b"structural".to_vec();
        let mut ctx = fuzzer.test_ctx(original.clone());
        ctx.id = 99;

        for op in [
            HavocOp::CloneBytes,
            HavocOp::InsertSameByte,
            HavocOp::OverwriteChunk,
            HavocOp::OverwriteSameByte,
            HavocOp::DeleteBytes,
            HavocOp::OverwriteExtra,
            HavocOp::InsertExtra,
            HavocOp::OverwriteAutoExtra,
            HavocOp::InsertAutoExtra,
            HavocOp::SpliceOverwrite,
            HavocOp::SpliceInsert,
        ] {
            let revert = apply_batch(&mut fuzzer, &mut ctx, op, 4);
            assert_eq!(ctx.mask.input_len(), ctx.buf.len(), "{op:?} broke the mask invariant");
            restore(&mut ctx, revert);
            assert_eq!(ctx.buf, original, "{op:?} did not restore");
            assert_eq!(ctx.mask.input_len(), original.len());
        }
    }

    #[test]
    fn empty_mask_still_executes_the_unchanged_buffer() {
        let mut config = Config::default();
        config.havoc_min = 8;
        config.havoc_cycles = 8;
        let mut fuzzer = Fuzzer::with_seed(plain_target(), config, 7).unwrap();
        fuzzer.add_seed(b"seedling".to_vec()).unwrap();
        let execs_before = fuzzer.exec.execs;

        let mut ctx = fuzzer.test_ctx(b"seedling".to_vec());
        ctx.mask = BranchMask::cleared(8);
        ctx.orig_mask = BranchMask::cleared(8);
        ctx.use_mask = true;

        run(&mut fuzzer, &mut ctx, false).unwrap();

        assert_eq!(fuzzer.exec.execs - execs_before, 8);
        assert_eq!(ctx.buf, b"seedling".to_vec());
    }

    #[test]
    fn finding_doubles_the_stage_length() {
        let mut config = Config::default();
        config.havoc_min = 4;
        config.havoc_cycles = 4;

        let mut calls = 0_u64;
        let target = TestTarget::new(16, move |_input, trace: &mut [u8]| {
            trace[0] = 1;
            calls += 1;
            // The second execution overall (first havoc iteration) uncovers
            // a brand new edge exactly once.
            if calls == 2 {
                trace[9] = 1;
            }
            ExecStatus::Ok
        });

        let mut fuzzer = Fuzzer::with_seed(target, config, 7).unwrap();
        fuzzer.add_seed(b"base".to_vec()).unwrap();
        let execs_before = fuzzer.exec.execs;

        let mut ctx = fuzzer.test_ctx(b"base".to_vec());
        run(&mut fuzzer, &mut ctx, false).unwrap();

        // stage_max started at 4 and doubled once on the rewarded iteration.
        assert_eq!(fuzzer.exec.execs - execs_before, 8);
    }

    #[test]
    fn block_len_stays_within_limit() {
        let config = Config::default();
        let mut rng = SmallRng::seed_from_u64(13);
        for cycles in [0, 1, 5] {
            for limit in [1, 2, 10, 5000] {
                for _ in 0..200 {
                    let len = block_len(&mut rng, &config, cycles, limit);
                    assert!(len >= 1 && len <= limit.max(1), "len={len} limit={limit}");
                }
            }
        }
    }
}
