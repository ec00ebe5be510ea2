//! The per-seed mutation engine of a coverage-guided fuzzer: deterministic
//! and havoc mutation stages whose operators and stacking sizes are chosen
//! by multi-armed bandits, with mutation effort focused on preserving a
//! rarely-hit control-flow edge.
//!
//! The crate deliberately stops at the executor boundary: running the
//! instrumented target is the embedder's job (see [`exec::Executor`]), as is
//! scheduling which queue entry to hand to [`Fuzzer::fuzz_one`] next.

pub mod adwin;
pub mod bandit;
pub mod config;
pub mod coverage;
mod deterministic;
pub mod dictionary;
pub mod exec;
pub mod havoc;
pub mod mask;
pub mod queue;
pub mod rare;
pub mod stats;
mod trim;
mod utils;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use hashbrown::HashSet;
use rand::{rngs::SmallRng, Rng, SeedableRng};

use crate::{
    bandit::BanditGrid,
    config::Config,
    coverage::{CoverageMap, EdgeId, HitBits, MiniMap},
    deterministic::EffectorMap,
    dictionary::{AutoDictionary, Dictionary},
    exec::{ExecStatus, Executor},
    mask::BranchMask,
    queue::{CorpusStore, InputId},
    rare::RareBranchSelector,
    stats::{Stage, Stats},
    utils::locate_diffs,
};

/// Outcome of one [`Fuzzer::fuzz_one`] call.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FuzzOneStatus {
    /// The seed went through the full pipeline.
    Fuzzed,
    /// The seed was skipped or abandoned early; global state is intact.
    Skipped,
}

/// Stage-level control flow: abort unwinds the current seed only.
pub(crate) enum Exit {
    Continue,
    Abort,
}

/// Result of one candidate execution.
pub(crate) enum RawOutcome {
    Done(ExecStatus),
    Stopped,
}

/// Mutable bookkeeping about the execution currently in flight.
pub(crate) struct State {
    pub stage: Stage,
    pub target: Option<EdgeId>,
    pub depth: u64,
}

impl Default for State {
    fn default() -> Self {
        Self { stage: Stage::Calibrate, target: None, depth: 0 }
    }
}

/// Per-seed working state owned by one `fuzz_one` call. Buffer, branch mask
/// and position-pool scratch travel together so growth ops can keep them in
/// sync.
pub(crate) struct SeedCtx {
    pub id: InputId,
    /// The base input of the current (possibly spliced) round.
    pub input: Vec<u8>,
    /// The mutation working buffer.
    pub buf: Vec<u8>,
    pub mask: BranchMask,
    /// Mask to fall back to on full restores.
    pub orig_mask: BranchMask,
    /// Reusable offset scratch for the position pools.
    pub pool: Vec<usize>,
    pub eff: EffectorMap,
    pub target: Option<EdgeId>,
    /// Whether the branch mask actually constrains mutations this round.
    pub use_mask: bool,
    pub perf_score: u32,
    /// Trace checksum of the unmutated input.
    pub base_cksum: u64,
}

/// Snapshot of all global effects a shadow pass must roll back.
struct GlobalSnapshot {
    coverage: (Vec<u64>, u64),
    hit_bits: Vec<u32>,
    corpus_len: usize,
    stats: Stats,
    crash_cksums: HashSet<u64>,
}

/// The mutation engine. Owns every piece of process-lifetime state: corpus,
/// coverage, hit counts, bandit grids, dictionaries and the rare-branch
/// selector. One instance drives one executor.
pub struct Fuzzer<E: Executor> {
    pub exec: E,
    pub config: Config,
    pub rng: SmallRng,
    pub corpus: CorpusStore,
    pub coverage: CoverageMap,
    pub hit_bits: HitBits,
    pub rare: RareBranchSelector,
    pub dict: Dictionary,
    pub auto_dict: AutoDictionary,
    pub stats: Stats,
    /// Cooperative cancellation, polled between executions.
    pub stop: Arc<AtomicBool>,
    /// Full passes over the queue, reported by the embedder via
    /// [`Fuzzer::note_queue_cycle`].
    pub queue_cycles: u64,
    pub(crate) bandits: BanditGrid,
    pub(crate) state: State,
    crash_cksums: HashSet<u64>,
    /// Rare-branch targeting currently suspended (configured off, or
    /// bootstrap fallback kicked in).
    vanilla_mode: bool,
    cycle_wo_new: bool,
    prev_cycle_wo_new: bool,
    skip_det_bootstrap: bool,
}

impl<E: Executor> Fuzzer<E> {
    pub fn new(exec: E, config: Config) -> anyhow::Result<Self> {
        let rng = SmallRng::from_entropy();
        Self::init(exec, config, rng)
    }

    /// Construct with a fixed seed: with the same executor behaviour the
    /// whole mutation trace is reproducible.
    pub fn with_seed(exec: E, config: Config, seed: u64) -> anyhow::Result<Self> {
        let rng = SmallRng::seed_from_u64(seed);
        Self::init(exec, config, rng)
    }

    fn init(exec: E, config: Config, rng: SmallRng) -> anyhow::Result<Self> {
        let map_size = exec.map_size();
        anyhow::ensure!(map_size > 0, "executor reports an empty coverage map");
        anyhow::ensure!(
            config.num_batch_arms >= 7,
            "need at least 7 batch arms to cover stacking sizes up to 128"
        );

        Ok(Self {
            coverage: CoverageMap::new(map_size),
            hit_bits: HitBits::new(map_size),
            rare: RareBranchSelector::new(config.max_rare_branches),
            bandits: BanditGrid::new(&config, havoc::ALL_OPS.len()),
            corpus: CorpusStore::default(),
            dict: Dictionary::default(),
            auto_dict: AutoDictionary::default(),
            stats: Stats::default(),
            stop: Arc::new(AtomicBool::new(false)),
            queue_cycles: 0,
            state: State::default(),
            crash_cksums: HashSet::new(),
            vanilla_mode: config.vanilla,
            cycle_wo_new: false,
            prev_cycle_wo_new: false,
            skip_det_bootstrap: false,
            rng,
            config,
            exec,
        })
    }

    /// Import a seed unconditionally: execute it once to learn its footprint
    /// and merge its coverage.
    pub fn add_seed(&mut self, data: Vec<u8>) -> anyhow::Result<InputId> {
        let _ = self.exec.run(&data)?;
        self.stats.total_execs += 1;

        let trace = self.exec.trace();
        self.hit_bits.record(trace);
        let footprint = MiniMap::from_trace(trace);
        let cksum = self.coverage.exec_cksum(trace);
        self.coverage.merge(trace);

        Ok(self.corpus.add(data, footprint, cksum, 0))
    }

    /// The embedder calls this once per full pass over its queue. Drives the
    /// bootstrap fallback and the block-length widening in havoc.
    pub fn note_queue_cycle(&mut self) {
        self.queue_cycles += 1;
        self.prev_cycle_wo_new = self.cycle_wo_new;
        self.cycle_wo_new = true;
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    pub(crate) fn queued_paths(&self) -> u64 {
        self.corpus.len() as u64
    }

    /// Queued paths plus unique crashes, the quantity stage finds are
    /// attributed against.
    pub(crate) fn hit_count(&self) -> u64 {
        self.queued_paths() + self.stats.unique_crashes
    }

    pub(crate) fn hits_target(&self) -> bool {
        self.state.target.is_some_and(|edge| self.exec.hits_edge(edge))
    }

    pub(crate) fn rng_byte(&mut self) -> u8 {
        self.rng.gen()
    }

    /// Execute a buffer without treating the result as a finding candidate
    /// (trimming and calibration use this).
    pub(crate) fn run_raw(&mut self, buf: &[u8]) -> anyhow::Result<RawOutcome> {
        if self.stop.load(Ordering::Relaxed) {
            return Ok(RawOutcome::Stopped);
        }

        let status = self.exec.run(buf)?;
        self.stats.total_execs += 1;
        self.hit_bits.record(self.exec.trace());

        if self.state.target.is_some() {
            self.stats.total_branch_tries += 1;
            if self.hits_target() {
                self.stats.successful_branch_tries += 1;
            }
        }

        Ok(RawOutcome::Done(status))
    }

    /// Execute a mutated candidate and fold the outcome into global state:
    /// new coverage enqueues the input, crashes are deduplicated by trace
    /// checksum, timeouts are counted and otherwise ignored.
    pub(crate) fn run_candidate(&mut self, buf: &[u8]) -> anyhow::Result<RawOutcome> {
        let outcome = self.run_raw(buf)?;
        let RawOutcome::Done(status) = outcome
        else {
            return Ok(outcome);
        };

        match status {
            ExecStatus::Ok => {
                let trace = self.exec.trace();
                if self.coverage.has_new_edges(trace) {
                    let footprint = MiniMap::from_trace(trace);
                    let cksum = self.coverage.exec_cksum(trace);
                    self.coverage.merge(trace);
                    let id = self.corpus.add(buf.to_vec(), footprint, cksum, self.state.depth + 1);
                    self.cycle_wo_new = false;
                    tracing::trace!("saved input {id} ({} bytes)", buf.len());
                }
            }
            ExecStatus::Crash => {
                let cksum = self.coverage.exec_cksum(self.exec.trace());
                if self.crash_cksums.insert(cksum) {
                    self.stats.unique_crashes += 1;
                }
            }
            ExecStatus::Timeout => self.stats.timeouts += 1,
        }

        Ok(RawOutcome::Done(status))
    }

    fn snapshot_global(&self) -> GlobalSnapshot {
        GlobalSnapshot {
            coverage: self.coverage.snapshot(),
            hit_bits: self.hit_bits.snapshot(),
            corpus_len: self.corpus.len(),
            stats: self.stats.clone(),
            crash_cksums: self.crash_cksums.clone(),
        }
    }

    fn rollback_global(&mut self, snapshot: GlobalSnapshot) {
        self.coverage.restore(snapshot.coverage);
        self.hit_bits.restore(snapshot.hit_bits);
        self.corpus.truncate(snapshot.corpus_len);
        self.stats = snapshot.stats;
        self.crash_cksums = snapshot.crash_cksums;
    }

    /// Probabilistic seed skipping for untargeted mode: prefer pending
    /// favored entries, and mostly ignore non-favored ones.
    fn should_skip(&mut self, id: InputId) -> bool {
        let pending_favored = self.corpus.pending_favored();
        let entry = &self.corpus[id];

        if pending_favored > 0 {
            if (entry.was_fuzzed || entry.fuzz_level > 0 || !entry.favored)
                && self.rng.gen_range(0..100) < self.config.skip_to_new_prob
            {
                return true;
            }
        }
        else if !entry.favored && self.corpus.len() > 10 {
            if self.queue_cycles > 1 && (entry.fuzz_level == 0 || entry.was_fuzzed) {
                if self.rng.gen_range(0..100) < self.config.skip_nfav_new_prob {
                    return true;
                }
            }
            else if self.rng.gen_range(0..100) < self.config.skip_nfav_old_prob {
                return true;
            }
        }

        false
    }

    /// Take one seed through the pipeline: target selection, calibration,
    /// branch trim, mask probing, deterministic stages, havoc and splicing.
    pub fn fuzz_one(&mut self, id: InputId) -> anyhow::Result<FuzzOneStatus> {
        if self.stop.load(Ordering::Relaxed) {
            return Ok(FuzzOneStatus::Skipped);
        }

        // A full cycle without finds optionally drops back to plain fuzzing.
        if !self.vanilla_mode && self.config.bootstrap > 0 && self.prev_cycle_wo_new {
            tracing::debug!("bootstrap: suspending rare-branch targeting");
            self.vanilla_mode = true;
            if self.config.bootstrap == 2 {
                self.skip_det_bootstrap = true;
            }
        }

        if self.vanilla_mode && self.should_skip(id) {
            return Ok(FuzzOneStatus::Skipped);
        }

        let mut target = None;
        let mut skip_det_rb = false;
        if !self.vanilla_mode {
            self.skip_det_bootstrap = false;
            let Some(choice) = self.rare.select_target(&self.hit_bits, &mut self.corpus[id])
            else {
                // The seed reaches no rare edge; not worth fuzzing now.
                return Ok(FuzzOneStatus::Skipped);
            };
            tracing::debug!(
                "[{id}] targeting edge {} (hit by {} inputs)",
                choice.edge,
                self.hit_bits.get(choice.edge)
            );
            target = Some(choice.edge);
            skip_det_rb = choice.skip_deterministic;
        }

        self.state.target = target;
        self.state.depth = self.corpus[id].depth;
        let orig_hit = self.hit_count();

        // Calibration: one clean run of the seed for the baseline checksum.
        self.state.stage = Stage::Calibrate;
        let mut input = self.corpus[id].data.clone();
        if input.is_empty() {
            return Ok(FuzzOneStatus::Skipped);
        }
        match self.run_raw(&input)? {
            RawOutcome::Stopped => return Ok(FuzzOneStatus::Skipped),
            RawOutcome::Done(ExecStatus::Ok) => {}
            RawOutcome::Done(_) => {
                tracing::debug!("[{id}] calibration failed, abandoning seed");
                return Ok(FuzzOneStatus::Skipped);
            }
        }
        let base_cksum = self.coverage.exec_cksum(self.exec.trace());
        self.corpus[id].exec_cksum = base_cksum;

        if let Some(edge) = target {
            if self.config.trim_for_branch {
                trim::trim_for_branch(self, &mut input, edge)?;
            }
        }

        let perf_score = self.corpus[id].perf_score;
        if perf_score == 0 {
            return Ok(FuzzOneStatus::Skipped);
        }

        // Shadow mode runs the whole pipeline untargeted first and rolls its
        // global effects back, to measure what targeting contributes.
        let shadow_passes: &[bool] = match target.is_some() && self.config.run_with_shadow {
            true => &[true, false],
            false => &[false],
        };

        let mut det_completed = false;
        let mut aborted = false;
        for &shadow in shadow_passes {
            if shadow {
                tracing::debug!("[{id}] shadow pass (untargeted, effects rolled back)");
            }
            let snapshot = shadow.then(|| self.snapshot_global());

            let exit = self.fuzz_pipeline(
                id,
                &input,
                target,
                skip_det_rb,
                perf_score,
                base_cksum,
                shadow,
                &mut det_completed,
            )?;

            if let Some(snapshot) = snapshot {
                self.rollback_global(snapshot);
            }

            if matches!(exit, Exit::Abort) {
                aborted = true;
                break;
            }
        }

        let entry = &mut self.corpus[id];
        entry.was_fuzzed = true;
        entry.fuzz_level += 1;
        if det_completed {
            entry.passed_det = true;
        }

        if self.hit_count() > orig_hit {
            // Finds re-arm rare-branch targeting after a bootstrap fallback.
            self.vanilla_mode = self.config.vanilla;
            self.prev_cycle_wo_new = false;
            self.cycle_wo_new = false;
        }

        self.state.target = None;
        match aborted {
            true => Ok(FuzzOneStatus::Skipped),
            false => Ok(FuzzOneStatus::Fuzzed),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn fuzz_pipeline(
        &mut self,
        id: InputId,
        input: &[u8],
        target: Option<EdgeId>,
        skip_det_rb: bool,
        perf_score: u32,
        base_cksum: u64,
        shadow: bool,
        det_completed: &mut bool,
    ) -> anyhow::Result<Exit> {
        let use_mask = target.is_some() && !shadow && self.config.use_branch_mask;
        let len = input.len();

        let mut ctx = SeedCtx {
            id,
            input: input.to_vec(),
            buf: input.to_vec(),
            mask: match use_mask {
                true => BranchMask::cleared(len),
                false => BranchMask::unrestricted(len),
            },
            orig_mask: BranchMask::unrestricted(len),
            pool: Vec::with_capacity(len + 1),
            eff: EffectorMap::saturated(len),
            target,
            use_mask,
            perf_score,
            base_cksum,
        };

        // In untargeted mode, low-energy seeds also skip the deterministic
        // stages: below `depth * 30` (capped at the havoc doubling limit)
        // the stage cost outweighs the seed's budget.
        let det_score_floor =
            (self.state.depth * 30).min(self.config.havoc_max_mult as u64 * 100);
        let skip_all_det = self.config.skip_deterministic
            || self.skip_det_bootstrap
            || (self.vanilla_mode && (self.corpus[id].was_fuzzed || self.corpus[id].passed_det))
            || (self.vanilla_mode && (perf_score as u64) < det_score_floor);
        let run_det = !(skip_all_det || skip_det_rb);

        if run_det {
            if let Exit::Abort = deterministic::flip1(self, &mut ctx)? {
                return Ok(Exit::Abort);
            }
        }

        self.stats.reset_branch_tries();

        // flip8 feeds the effector map and, when targeting, the overwrite
        // bit of the branch mask; the delete/insert sweeps fill in the rest.
        if run_det || use_mask {
            if let Exit::Abort = deterministic::flip8(self, &mut ctx)? {
                return Ok(Exit::Abort);
            }
            if use_mask {
                if let Exit::Abort = deterministic::probe_mask(self, &mut ctx)? {
                    return Ok(Exit::Abort);
                }
            }
        }

        if use_mask {
            if ctx.mask.overwrite_safe_count() == 0 {
                // Nothing preserves the edge: give up on it for good and
                // fall back to untargeted fuzzing for this seed.
                if let Some(edge) = ctx.target {
                    self.rare.blacklist_edge(edge);
                }
                ctx.mask = BranchMask::unrestricted(ctx.buf.len());
                ctx.use_mask = false;
            }
            ctx.orig_mask = ctx.mask.clone();
        }
        self.stats.reset_branch_tries();

        if run_det {
            match deterministic::run_all(self, &mut ctx)? {
                Exit::Abort => return Ok(Exit::Abort),
                Exit::Continue => {
                    if !shadow {
                        *det_completed = true;
                    }
                }
            }
        }

        if let Exit::Abort = havoc::run(self, &mut ctx, false)? {
            return Ok(Exit::Abort);
        }

        // Splice retries: build a new base from this input and a random
        // partner, then hand it back to havoc with a fresh default mask.
        if self.config.use_splicing && input.len() >= 4 {
            let mut splice_cycle = 0;
            while splice_cycle < self.config.splice_cycles {
                splice_cycle += 1;

                let Some(other_id) = self.corpus.random_other(&mut self.rng, id, 4)
                else {
                    break;
                };
                let other = self.corpus[other_id].data.clone();

                let (Some(first), Some(last)) = locate_diffs(input, &other)
                else {
                    continue;
                };
                if last < 2 || first == last {
                    continue;
                }

                let split_at = first + self.rng.gen_range(0..last - first);
                let mut spliced = Vec::with_capacity(other.len());
                spliced.extend_from_slice(&input[..split_at]);
                spliced.extend_from_slice(&other[split_at..]);

                let spliced_len = spliced.len();
                ctx.input.clone_from(&spliced);
                ctx.buf = spliced;
                ctx.mask = BranchMask::unrestricted(spliced_len);
                ctx.orig_mask = BranchMask::unrestricted(spliced_len);

                if let Exit::Abort = havoc::run(self, &mut ctx, true)? {
                    return Ok(Exit::Abort);
                }
            }
        }

        Ok(Exit::Continue)
    }

    #[cfg(test)]
    pub(crate) fn test_ctx(&mut self, data: Vec<u8>) -> SeedCtx {
        let len = data.len();
        SeedCtx {
            id: 0,
            input: data.clone(),
            buf: data,
            mask: BranchMask::unrestricted(len),
            orig_mask: BranchMask::unrestricted(len),
            pool: vec![],
            eff: EffectorMap::new(len.max(1)),
            target: None,
            use_mask: false,
            perf_score: 100,
            base_cksum: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::testing::TestTarget;

    fn small_config() -> Config {
        let mut config = Config::default();
        config.havoc_min = 8;
        config.havoc_cycles = 8;
        config.splice_cycles = 2;
        config.trim_for_branch = false;
        config
    }

    /// Edge 0 fires always; edge 5 fires iff `input[3] == 'X'`.
    fn guarded_target() -> TestTarget<impl FnMut(&[u8], &mut [u8]) -> ExecStatus> {
        TestTarget::new(16, |input, trace| {
            trace[0] = 1;
            if input.get(3) == Some(&b'X') {
                trace[5] = 1;
            }
            ExecStatus::Ok
        })
    }

    #[test]
    fn fuzz_one_targets_the_rare_edge() {
        let mut config = small_config();
        config.skip_deterministic = true;
        let mut fuzzer = Fuzzer::with_seed(guarded_target(), config, 11).unwrap();

        // Two seeds touch edge 0, only one reaches edge 5, so edge 5 is the
        // rare one.
        fuzzer.add_seed(b"AAAAA".to_vec()).unwrap();
        let id = fuzzer.add_seed(b"AAAXA".to_vec()).unwrap();

        let status = fuzzer.fuzz_one(id).unwrap();
        assert_eq!(status, FuzzOneStatus::Fuzzed);
        assert!(fuzzer.corpus[id].has_fuzzed_branch(5));
        assert!(!fuzzer.corpus[id].has_fuzzed_branch(0));
        assert!(fuzzer.corpus[id].was_fuzzed);
    }

    #[test]
    fn seed_without_rare_edges_is_skipped() {
        let mut fuzzer = Fuzzer::with_seed(guarded_target(), small_config(), 11).unwrap();
        fuzzer.add_seed(b"AAAAA".to_vec()).unwrap();
        fuzzer.add_seed(b"AAAXA".to_vec()).unwrap();

        // Edge 5 defines the rare tier; the plain seed only reaches the
        // common edge and is not worth fuzzing.
        fuzzer.hit_bits.set(0, 1000);
        fuzzer.hit_bits.set(5, 2);
        let status = fuzzer.fuzz_one(0).unwrap();
        assert_eq!(status, FuzzOneStatus::Skipped);
        assert!(!fuzzer.corpus[0].was_fuzzed);
    }

    #[test]
    fn unpreservable_edge_gets_blacklisted() {
        // Edge 7 requires the exact input "SECRET!!": every probe loses it.
        let target = TestTarget::new(16, |input, trace: &mut [u8]| {
            trace[0] = 1;
            if input == b"SECRET!!" {
                trace[7] = 1;
            }
            ExecStatus::Ok
        });

        let mut config = small_config();
        config.skip_deterministic = true;
        let mut fuzzer = Fuzzer::with_seed(target, config, 13).unwrap();
        fuzzer.add_seed(b"AAAAAAAA".to_vec()).unwrap();
        let id = fuzzer.add_seed(b"SECRET!!".to_vec()).unwrap();

        let status = fuzzer.fuzz_one(id).unwrap();
        assert_eq!(status, FuzzOneStatus::Fuzzed);
        assert_eq!(fuzzer.rare.blacklist_len(), 1);
        assert!(fuzzer.rare.is_blacklisted(7));
    }

    #[test]
    fn vanilla_mode_discovers_new_paths() {
        // One edge per high nibble of the first byte: plenty to find.
        let target = TestTarget::new(32, |input, trace: &mut [u8]| {
            trace[1 + (input.first().copied().unwrap_or(0) >> 4) as usize] = 1;
            ExecStatus::Ok
        });

        let mut config = small_config();
        config.vanilla = true;
        config.havoc_cycles = 64;
        config.havoc_min = 64;
        let mut fuzzer = Fuzzer::with_seed(target, config, 17).unwrap();

        let id = fuzzer.add_seed(b"seed bytes here".to_vec()).unwrap();
        let status = fuzzer.fuzz_one(id).unwrap();

        assert_eq!(status, FuzzOneStatus::Fuzzed);
        assert!(fuzzer.corpus.len() > 1, "no new paths found");
        assert!(fuzzer.stats.total_execs > 64);
    }

    #[test]
    fn crashes_are_deduplicated_by_trace() {
        let target = TestTarget::new(16, |input, trace: &mut [u8]| {
            trace[0] = 1;
            match input.first() {
                Some(&b) if b & 1 == 1 => {
                    trace[3] = 1;
                    ExecStatus::Crash
                }
                _ => ExecStatus::Ok,
            }
        });

        let mut config = small_config();
        config.vanilla = true;
        config.havoc_cycles = 64;
        config.havoc_min = 64;
        let mut fuzzer = Fuzzer::with_seed(target, config, 19).unwrap();
        let id = fuzzer.add_seed(b"\x00plenty of data".to_vec()).unwrap();

        fuzzer.fuzz_one(id).unwrap();
        assert_eq!(fuzzer.stats.unique_crashes, 1);
    }

    #[test]
    fn stop_flag_short_circuits() {
        let mut fuzzer = Fuzzer::with_seed(guarded_target(), small_config(), 3).unwrap();
        let id = fuzzer.add_seed(b"AAAXA".to_vec()).unwrap();

        fuzzer.stop.store(true, Ordering::Relaxed);
        let status = fuzzer.fuzz_one(id).unwrap();
        assert_eq!(status, FuzzOneStatus::Skipped);
        assert_eq!(fuzzer.stats.total_execs, 1);
    }

    #[test]
    fn shadow_pass_rolls_back_global_state() {
        // Edge 9 appears whenever byte 0 deviates from 'A', so both passes
        // would find it; the rollback makes the targeted pass re-find it.
        let target = TestTarget::new(16, |input, trace: &mut [u8]| {
            trace[0] = 1;
            if input.get(3) == Some(&b'X') {
                trace[5] = 1;
            }
            if input.first().is_some_and(|b| *b != b'A') {
                trace[9] = 1;
            }
            ExecStatus::Ok
        });

        let mut config = small_config();
        config.run_with_shadow = true;
        config.skip_deterministic = true;
        let mut fuzzer = Fuzzer::with_seed(target, config, 23).unwrap();

        fuzzer.add_seed(b"AAAAA".to_vec()).unwrap();
        let id = fuzzer.add_seed(b"AAAXA".to_vec()).unwrap();
        let status = fuzzer.fuzz_one(id).unwrap();

        assert_eq!(status, FuzzOneStatus::Fuzzed);
        // Exactly one copy of the edge-9 discovery survives.
        let discoveries = (0..fuzzer.corpus.len())
            .filter(|i| fuzzer.corpus[*i].footprint.contains(9))
            .count();
        assert_eq!(discoveries, 1);
    }

    #[test]
    fn snapshot_rollback_restores_everything() {
        let mut fuzzer = Fuzzer::with_seed(guarded_target(), small_config(), 29).unwrap();
        fuzzer.add_seed(b"AAAXA".to_vec()).unwrap();

        let snapshot = fuzzer.snapshot_global();
        let coverage_before = fuzzer.coverage.count();
        let execs_before = fuzzer.stats.total_execs;

        fuzzer.add_seed(b"BBBXB".to_vec()).unwrap();
        let mut trace = vec![0_u8; 16];
        trace[12] = 1;
        fuzzer.coverage.merge(&trace);
        assert!(fuzzer.coverage.count() > coverage_before);

        fuzzer.rollback_global(snapshot);
        assert_eq!(fuzzer.coverage.count(), coverage_before);
        assert_eq!(fuzzer.corpus.len(), 1);
        assert_eq!(fuzzer.stats.total_execs, execs_before);
    }

    #[test]
    fn bootstrap_falls_back_after_a_dry_cycle() {
        let mut config = small_config();
        config.bootstrap = 1;
        config.skip_deterministic = true;
        let mut fuzzer = Fuzzer::with_seed(guarded_target(), config, 31).unwrap();
        fuzzer.add_seed(b"AAAAA".to_vec()).unwrap();
        let id = fuzzer.add_seed(b"AAAXA".to_vec()).unwrap();

        // Two dry cycles leave prev_cycle_wo_new set.
        fuzzer.note_queue_cycle();
        fuzzer.note_queue_cycle();
        assert!(fuzzer.prev_cycle_wo_new);

        let _ = fuzzer.fuzz_one(id).unwrap();
        // Rare-branch targeting was suspended for this call.
        assert!(fuzzer.vanilla_mode || fuzzer.corpus.len() > 2);
    }

    #[test]
    fn empty_seed_is_skipped() {
        let mut fuzzer = Fuzzer::with_seed(guarded_target(), small_config(), 37).unwrap();
        let id = fuzzer.corpus.add(vec![], crate::coverage::MiniMap::default(), 0, 0);
        assert_eq!(fuzzer.fuzz_one(id).unwrap(), FuzzOneStatus::Skipped);
    }
}
