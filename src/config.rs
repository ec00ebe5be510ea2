use serde::{Deserialize, Serialize};

/// Strategies available for the operator and batch-size bandits.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StrategyKind {
    Uniform,
    Ucb1,
    KlUcb,
    Thompson,
    AdwinThompson,
    DiscountedThompson,
    DiscountedBoltzmann,
    Exp3Ix,
    Exp3Pp,
}

/// Every tunable of the mutation engine. Defaults follow the values the
/// fuzzer was tuned with; tests override individual fields.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Maximum value for the arithmetic add/subtract stages.
    pub arith_max: u32,
    /// Lower bound for havoc stage length.
    pub havoc_min: u32,
    /// Baseline number of havoc iterations at a performance score of 100.
    pub havoc_cycles: u32,
    /// Divisor applied to the havoc iteration count (for slow targets).
    pub havoc_div: u32,
    /// Cap for havoc stage-length doubling, as a multiple of 100 score.
    pub havoc_max_mult: u32,
    /// Block size buckets for structural havoc mutations.
    pub havoc_blk_small: usize,
    pub havoc_blk_medium: usize,
    pub havoc_blk_large: usize,
    pub havoc_blk_xl: usize,
    /// Number of stacking-size arms for the batch bandit.
    pub num_batch_arms: usize,
    /// Batch arm `t` maps to `1 << t` mutations when set, `1 + t` otherwise.
    pub batch_pow2: bool,
    /// Input-length thresholds partitioning havoc learning into buckets.
    pub batch_bucket_limits: [usize; 4],
    /// Bandit strategy used to pick the mutation operator.
    pub op_strategy: StrategyKind,
    /// Bandit strategy used to pick the stacking size.
    pub batch_strategy: StrategyKind,

    /// Trimmer geometry: initial and final step divisors plus the minimum
    /// number of bytes removed per attempt.
    pub trim_start_steps: usize,
    pub trim_end_steps: usize,
    pub trim_min_bytes: usize,
    /// Whether to run the branch-preserving trimmer before mutating.
    pub trim_for_branch: bool,

    /// Inputs shorter than this skip effector-map checksums entirely.
    pub eff_min_len: usize,
    /// Density (percent) above which the whole effector map is marked.
    pub eff_max_perc: usize,

    /// Number of top auto-dictionary tokens used by the auto-extra stages.
    pub use_auto_extras: usize,
    /// Accepted auto-dictionary token length range.
    pub min_auto_extra: usize,
    pub max_auto_extra: usize,
    /// Maximum stored auto-dictionary tokens.
    pub max_auto_extras: usize,
    /// Maximum length of a user dictionary token.
    pub max_dict_file: usize,

    /// Maximum input length any mutation is allowed to produce.
    pub max_file: usize,

    /// Number of splice retries after havoc.
    pub splice_cycles: u32,
    /// Havoc iteration baseline while splicing.
    pub splice_havoc: u32,
    /// Whether the splice stage runs at all.
    pub use_splicing: bool,

    /// Probabilities (in percent) of skipping a seed in vanilla mode.
    pub skip_to_new_prob: u32,
    pub skip_nfav_new_prob: u32,
    pub skip_nfav_old_prob: u32,

    /// ADWIN parameters: max buckets per node, confidence, minimum side
    /// sizes, and how many inserts go between drop checks.
    pub adwin_m: usize,
    pub adwin_delta: f64,
    pub adwin_min_elem_to_check: u64,
    pub adwin_min_elem_to_start_drop: u64,
    pub adwin_drop_interval: u32,
    /// Reset the whole window on a detected change instead of shedding
    /// buckets one at a time.
    pub adwin_adaptive_reset: bool,

    /// Discount factors for the discounted Thompson/Boltzmann strategies.
    pub dts_gamma: f64,
    pub dbe_gamma: f64,
    /// Clamp Thompson samples to the posterior mean (optimistic dTS).
    pub dts_optimistic: bool,

    /// KL-UCB Newton iteration clamping and convergence threshold.
    pub klucb_delta: f64,
    pub klucb_eps: f64,

    /// EXP3++ exploration constants and reward rescaling range.
    pub exp_alpha: f64,
    pub exp_beta: f64,
    pub exp_lower: f64,
    pub exp_amplitude: f64,

    /// Upper bound on the rare-branch candidate list.
    pub max_rare_branches: usize,
    /// Disable rare-branch targeting entirely (plain fuzzing).
    pub vanilla: bool,
    /// Probe and honor the branch mask (otherwise the default mask is used
    /// even when a target edge is selected).
    pub use_branch_mask: bool,
    /// Run every seed twice, once untargeted, to measure the contribution of
    /// targeting. The untargeted pass rolls back queue, hit-bit and virgin
    /// map effects; crash reports already handed to the executor are not
    /// recalled.
    pub run_with_shadow: bool,
    /// Fall back to vanilla fuzzing after a full queue cycle without finds.
    /// Level 2 additionally skips deterministic stages while bootstrapped.
    pub bootstrap: u8,
    /// Skip all deterministic stages (the `-d` switch of the original).
    pub skip_deterministic: bool,

    /// Interesting-value substitution tables.
    pub interesting_8: Vec<i8>,
    pub interesting_16: Vec<i16>,
    pub interesting_32: Vec<i32>,
}

pub const INTERESTING_8: [i8; 9] = [-128, -1, 0, 1, 16, 32, 64, 100, 127];

pub const INTERESTING_16: [i16; 10] =
    [-32768, -129, 128, 255, 256, 512, 1000, 1024, 4096, 32767];

pub const INTERESTING_32: [i32; 8] = [
    i32::MIN,
    -100663046,
    -32769,
    32768,
    65535,
    65536,
    100663045,
    i32::MAX,
];

impl Default for Config {
    fn default() -> Self {
        // The 16/32-bit tables include the narrower entries, mirroring the
        // way the deterministic stages walk them.
        let interesting_8 = INTERESTING_8.to_vec();
        let mut interesting_16: Vec<i16> =
            INTERESTING_8.iter().map(|x| *x as i16).collect();
        interesting_16.extend_from_slice(&INTERESTING_16);
        let mut interesting_32: Vec<i32> =
            interesting_16.iter().map(|x| *x as i32).collect();
        interesting_32.extend_from_slice(&INTERESTING_32);

        Self {
            arith_max: 35,
            havoc_min: 16,
            havoc_cycles: 256,
            havoc_div: 1,
            havoc_max_mult: 16,
            havoc_blk_small: 32,
            havoc_blk_medium: 128,
            havoc_blk_large: 1500,
            havoc_blk_xl: 32768,
            num_batch_arms: 8,
            batch_pow2: true,
            batch_bucket_limits: [100, 1000, 10_000, 100_000],
            op_strategy: StrategyKind::DiscountedThompson,
            batch_strategy: StrategyKind::Thompson,
            trim_start_steps: 16,
            trim_end_steps: 1024,
            trim_min_bytes: 4,
            trim_for_branch: true,
            eff_min_len: 128,
            eff_max_perc: 90,
            use_auto_extras: 128,
            min_auto_extra: 3,
            max_auto_extra: 32,
            max_auto_extras: 1024,
            max_dict_file: 128,
            max_file: 1024 * 1024,
            splice_cycles: 15,
            splice_havoc: 32,
            use_splicing: true,
            skip_to_new_prob: 99,
            skip_nfav_new_prob: 75,
            skip_nfav_old_prob: 95,
            adwin_m: 5,
            adwin_delta: 0.01,
            adwin_min_elem_to_check: 5,
            adwin_min_elem_to_start_drop: 32,
            adwin_drop_interval: 8,
            adwin_adaptive_reset: false,
            dts_gamma: 0.99,
            dbe_gamma: 0.99,
            dts_optimistic: false,
            klucb_delta: 1e-4,
            klucb_eps: 1e-6,
            exp_alpha: 3.0,
            exp_beta: 256.0,
            exp_lower: 0.0,
            exp_amplitude: 1.0,
            max_rare_branches: 256,
            vanilla: false,
            use_branch_mask: true,
            run_with_shadow: false,
            bootstrap: 0,
            skip_deterministic: false,
            interesting_8,
            interesting_16,
            interesting_32,
        }
    }
}

impl Config {
    /// Map an input length to its havoc learning bucket.
    pub fn batch_bucket(&self, len: usize) -> usize {
        self.batch_bucket_limits
            .iter()
            .position(|limit| len <= *limit)
            .unwrap_or(self.batch_bucket_limits.len())
    }

    pub fn num_batch_buckets(&self) -> usize {
        self.batch_bucket_limits.len() + 1
    }

    /// The largest stacking size the batch bandit can select.
    pub fn max_batch(&self) -> u32 {
        match self.batch_pow2 {
            true => 1 << (self.num_batch_arms - 1),
            false => self.num_batch_arms as u32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_buckets_partition_lengths() {
        let config = Config::default();
        assert_eq!(config.batch_bucket(1), 0);
        assert_eq!(config.batch_bucket(100), 0);
        assert_eq!(config.batch_bucket(101), 1);
        assert_eq!(config.batch_bucket(10_000), 2);
        assert_eq!(config.batch_bucket(100_001), 4);
        assert_eq!(config.num_batch_buckets(), 5);
    }

    #[test]
    fn batch_arms_cover_1_to_128() {
        let config = Config::default();
        assert_eq!(config.max_batch(), 128);
    }
}
