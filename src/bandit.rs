use rand::Rng;

use crate::{
    adwin::{Adwin, AdwinConfig},
    config::{Config, StrategyKind},
    utils::beta_sample,
};

/// Sufficient statistics for the stationary strategies.
#[derive(Clone, Default)]
pub struct PlainArm {
    pub num_selected: u64,
    pub total_rewards: f64,
    pub sample_mean: f64,
}

impl PlainArm {
    fn record(&mut self, reward: f64) {
        self.num_selected += 1;
        self.total_rewards += reward;
        self.sample_mean = self.total_rewards / self.num_selected as f64;
    }
}

/// Arm statistics backed by an adaptive window: the reward count and pull
/// count both derive from the window contents, so old observations age out.
pub struct AdwinArm {
    pub num_selected: u64,
    window: Adwin,
}

impl AdwinArm {
    fn total_rewards(&self) -> u64 {
        self.window.total()
    }

    fn windowed_pulls(&self) -> u64 {
        self.window.window()
    }
}

/// Arm statistics with exponentially discounted reward/loss totals.
#[derive(Clone, Default)]
pub struct DiscountedArm {
    pub num_selected: u64,
    pub num_rewarded: u64,
    total_rewards: f64,
    total_losses: f64,
    dis_num_selected: f64,
    sample_mean: f64,
}

fn div_inf(x: f64, y: f64) -> f64 {
    if y == 0.0 {
        return f64::INFINITY;
    }
    x / y
}

fn kl(p: f64, q: f64) -> f64 {
    p * (p / q).ln() + (1.0 - p) * ((1.0 - p) / (1.0 - q)).ln()
}

fn dkl(p: f64, q: f64) -> f64 {
    (q - p) / (q * (1.0 - q))
}

/// One multi-armed bandit. All strategies share the same two-method surface:
/// [`Strategy::select_arm`] never returns a masked arm, and every selection
/// is followed by exactly one [`Strategy::add_reward`] for the chosen arm.
///
/// Dispatch is a tagged enum rather than trait objects: selection sits on the
/// havoc hot path and the strategy set is closed.
pub enum Strategy {
    Uniform {
        arms: Vec<PlainArm>,
    },
    Ucb1 {
        time_step: u64,
        arms: Vec<PlainArm>,
    },
    KlUcb {
        time_step: u64,
        arms: Vec<PlainArm>,
        delta: f64,
        eps: f64,
    },
    Thompson {
        arms: Vec<PlainArm>,
    },
    AdwinThompson {
        arms: Vec<AdwinArm>,
    },
    DiscountedThompson {
        arms: Vec<DiscountedArm>,
        gamma: f64,
        optimistic: bool,
    },
    DiscountedBoltzmann {
        arms: Vec<DiscountedArm>,
        gamma: f64,
    },
    Exp3Ix {
        time_step: u64,
        arms: Vec<PlainArm>,
        weights: Vec<f64>,
        losses: Vec<f64>,
    },
    Exp3Pp {
        time_step: u64,
        arms: Vec<PlainArm>,
        weights: Vec<f64>,
        trusts: Vec<f64>,
        losses: Vec<f64>,
        unweighted_losses: Vec<f64>,
        alpha: f64,
        beta: f64,
        lower: f64,
        amplitude: f64,
    },
}

impl Strategy {
    pub fn new(kind: StrategyKind, n_arms: usize, config: &Config) -> Self {
        assert!(n_arms > 0);
        match kind {
            StrategyKind::Uniform => Strategy::Uniform { arms: vec![PlainArm::default(); n_arms] },
            StrategyKind::Ucb1 => {
                Strategy::Ucb1 { time_step: 0, arms: vec![PlainArm::default(); n_arms] }
            }
            StrategyKind::KlUcb => Strategy::KlUcb {
                time_step: 0,
                arms: vec![PlainArm::default(); n_arms],
                delta: config.klucb_delta,
                eps: config.klucb_eps,
            },
            StrategyKind::Thompson => {
                Strategy::Thompson { arms: vec![PlainArm::default(); n_arms] }
            }
            StrategyKind::AdwinThompson => Strategy::AdwinThompson {
                arms: (0..n_arms)
                    .map(|_| AdwinArm {
                        num_selected: 0,
                        window: Adwin::new(AdwinConfig::from(config)),
                    })
                    .collect(),
            },
            StrategyKind::DiscountedThompson => Strategy::DiscountedThompson {
                arms: vec![DiscountedArm::default(); n_arms],
                gamma: config.dts_gamma,
                optimistic: config.dts_optimistic,
            },
            StrategyKind::DiscountedBoltzmann => Strategy::DiscountedBoltzmann {
                arms: vec![DiscountedArm::default(); n_arms],
                gamma: config.dbe_gamma,
            },
            StrategyKind::Exp3Ix => Strategy::Exp3Ix {
                time_step: 0,
                arms: vec![PlainArm::default(); n_arms],
                weights: vec![1.0 / n_arms as f64; n_arms],
                losses: vec![0.0; n_arms],
            },
            StrategyKind::Exp3Pp => Strategy::Exp3Pp {
                time_step: 0,
                arms: vec![PlainArm::default(); n_arms],
                weights: vec![1.0 / n_arms as f64; n_arms],
                trusts: vec![1.0 / n_arms as f64; n_arms],
                losses: vec![0.0; n_arms],
                unweighted_losses: vec![0.0; n_arms],
                alpha: config.exp_alpha,
                beta: config.exp_beta,
                lower: config.exp_lower,
                amplitude: config.exp_amplitude,
            },
        }
    }

    pub fn n_arms(&self) -> usize {
        match self {
            Strategy::Uniform { arms }
            | Strategy::Ucb1 { arms, .. }
            | Strategy::KlUcb { arms, .. }
            | Strategy::Thompson { arms }
            | Strategy::Exp3Ix { arms, .. }
            | Strategy::Exp3Pp { arms, .. } => arms.len(),
            Strategy::AdwinThompson { arms } => arms.len(),
            Strategy::DiscountedThompson { arms, .. }
            | Strategy::DiscountedBoltzmann { arms, .. } => arms.len(),
        }
    }

    /// Number of times `arm` was pulled.
    pub fn pulls(&self, arm: usize) -> u64 {
        match self {
            Strategy::Uniform { arms }
            | Strategy::Ucb1 { arms, .. }
            | Strategy::KlUcb { arms, .. }
            | Strategy::Thompson { arms }
            | Strategy::Exp3Ix { arms, .. }
            | Strategy::Exp3Pp { arms, .. } => arms[arm].num_selected,
            Strategy::AdwinThompson { arms } => arms[arm].num_selected,
            Strategy::DiscountedThompson { arms, .. }
            | Strategy::DiscountedBoltzmann { arms, .. } => arms[arm].num_selected,
        }
    }

    /// Pick an arm. `mask[i] == true` marks arm `i` as currently disallowed;
    /// a masked arm is never returned. At least one arm must stay unmasked.
    pub fn select_arm<R: Rng>(&mut self, rng: &mut R, mask: Option<&[bool]>) -> usize {
        let allowed = |i: usize| mask.map_or(true, |mask| !mask[i]);
        debug_assert!((0..self.n_arms()).any(allowed), "all arms masked");

        match self {
            Strategy::Uniform { arms } => {
                let count = (0..arms.len()).filter(|i| allowed(*i)).count();
                let pick = rng.gen_range(0..count);
                (0..arms.len()).filter(|i| allowed(*i)).nth(pick).unwrap()
            }

            Strategy::Ucb1 { time_step, arms } => {
                let mut best = None;
                let mut max_ucb = -1.0;
                for (i, arm) in arms.iter().enumerate() {
                    if !allowed(i) {
                        continue;
                    }
                    if arm.num_selected == 0 {
                        return i;
                    }
                    let ucb = arm.sample_mean
                        + (2.0 * (*time_step as f64).ln() / arm.num_selected as f64).sqrt();
                    if ucb > max_ucb {
                        max_ucb = ucb;
                        best = Some(i);
                    }
                }
                best.unwrap()
            }

            Strategy::KlUcb { time_step, arms, delta, eps } => {
                let mut best = None;
                let mut max_ucb = -1.0;
                for (i, arm) in arms.iter().enumerate() {
                    if !allowed(i) {
                        continue;
                    }
                    if arm.num_selected == 0 {
                        return i;
                    }
                    let ucb = klucb_index(*time_step, arm, *delta, *eps);
                    if ucb > max_ucb {
                        max_ucb = ucb;
                        best = Some(i);
                    }
                }
                best.unwrap()
            }

            Strategy::Thompson { arms } => {
                let mut best = None;
                let mut max_sampled = -1.0;
                for (i, arm) in arms.iter().enumerate() {
                    if !allowed(i) {
                        continue;
                    }
                    let a = arm.total_rewards + 1.0;
                    let b = arm.num_selected as f64 - arm.total_rewards + 1.0;
                    let sampled = beta_sample(rng, a, b);
                    if sampled > max_sampled {
                        max_sampled = sampled;
                        best = Some(i);
                    }
                }
                best.unwrap()
            }

            Strategy::AdwinThompson { arms } => {
                let mut best = None;
                let mut max_sampled = -1.0;
                for (i, arm) in arms.iter().enumerate() {
                    if !allowed(i) {
                        continue;
                    }
                    let rewards = arm.total_rewards() as f64;
                    let a = rewards + 1.0;
                    let b = arm.windowed_pulls() as f64 - rewards + 1.0;
                    let sampled = beta_sample(rng, a, b);
                    if sampled > max_sampled {
                        max_sampled = sampled;
                        best = Some(i);
                    }
                }
                best.unwrap()
            }

            Strategy::DiscountedThompson { arms, gamma, optimistic } => {
                let mut best = None;
                let mut max_sampled = -1.0;
                for (i, arm) in arms.iter().enumerate() {
                    if !allowed(i) {
                        continue;
                    }
                    let a = arm.total_rewards + 1.0;
                    let b = arm.total_losses + 1.0;
                    let mut sampled = beta_sample(rng, a, b);
                    if *optimistic {
                        sampled = sampled.max(a / (a + b));
                    }
                    if sampled > max_sampled {
                        max_sampled = sampled;
                        best = Some(i);
                    }
                }
                // Rewards decay even on arms that were skipped.
                for arm in arms.iter_mut() {
                    arm.total_rewards *= *gamma;
                    arm.total_losses *= *gamma;
                }
                best.unwrap()
            }

            Strategy::DiscountedBoltzmann { arms, gamma } => {
                let active = (0..arms.len()).filter(|i| allowed(*i)).count();
                let max_avg = arms
                    .iter()
                    .enumerate()
                    .filter(|(i, arm)| allowed(*i) && arm.dis_num_selected > 0.0)
                    .map(|(_, arm)| arm.sample_mean)
                    .fold(0.0, f64::max);

                let redcoef = match max_avg > 0.0 {
                    true => 1.0 / (2.0 * max_avg),
                    false => 1.0,
                };
                if redcoef > (1 << 30) as f64 {
                    for arm in arms.iter_mut() {
                        arm.total_rewards = 1.0;
                        arm.dis_num_selected = 1.0;
                        arm.sample_mean = 1.0;
                    }
                }

                // Unsampled arms first.
                let unsampled: Vec<usize> = (0..arms.len())
                    .filter(|i| allowed(*i) && arms[*i].dis_num_selected <= 0.0)
                    .collect();
                if !unsampled.is_empty() {
                    return unsampled[rng.gen_range(0..unsampled.len())];
                }

                let beta = 4.0 + 2.0 * active as f64;
                let weights: Vec<(usize, f64)> = (0..arms.len())
                    .filter(|i| allowed(*i))
                    .map(|i| (i, (beta * redcoef * arms[i].sample_mean).exp2()))
                    .collect();

                let index = sample_from_weights(rng, &weights);

                for arm in arms.iter_mut() {
                    arm.total_rewards *= *gamma;
                    arm.dis_num_selected *= *gamma;
                }
                index
            }

            Strategy::Exp3Ix { time_step, arms, weights, .. } => {
                *time_step += 1;
                let masked_weights: Vec<(usize, f64)> = (0..arms.len())
                    .filter(|i| allowed(*i))
                    .map(|i| (i, weights[i]))
                    .collect();
                let choice = sample_from_weights(rng, &masked_weights);
                arms[choice].num_selected += 1;
                choice
            }

            Strategy::Exp3Pp { time_step, arms, weights, trusts, unweighted_losses, alpha, beta, .. } => {
                *time_step += 1;
                let n_arms = arms.len();

                let choice = if *time_step <= n_arms as u64 {
                    // Pull each arm once to start, stepping past masked ones.
                    let start = (*time_step - 1) as usize;
                    (0..n_arms).map(|i| (start + i) % n_arms).find(|i| allowed(*i)).unwrap()
                }
                else {
                    exppp_update_trusts(
                        *time_step,
                        n_arms,
                        unweighted_losses,
                        weights,
                        trusts,
                        *alpha,
                        *beta,
                        |i| arms[i].num_selected,
                    );
                    let masked_trusts: Vec<(usize, f64)> = (0..n_arms)
                        .filter(|i| allowed(*i))
                        .map(|i| (i, trusts[i]))
                        .collect();
                    sample_from_weights(rng, &masked_trusts)
                };

                arms[choice].num_selected += 1;
                choice
            }
        }
    }

    /// Record the reward for the most recent selection of `arm`.
    pub fn add_reward(&mut self, arm: usize, reward: f64) {
        match self {
            Strategy::Uniform { arms } | Strategy::Thompson { arms } => arms[arm].record(reward),

            Strategy::Ucb1 { time_step, arms } | Strategy::KlUcb { time_step, arms, .. } => {
                *time_step += 1;
                arms[arm].record(reward);
            }

            Strategy::AdwinThompson { arms } => {
                let slot = &mut arms[arm];
                slot.num_selected += 1;
                slot.window.add(reward >= 0.5);
            }

            Strategy::DiscountedThompson { arms, .. } => {
                // Discounting already happened during selection.
                let slot = &mut arms[arm];
                slot.num_selected += 1;
                slot.num_rewarded += (reward >= 0.5) as u64;
                slot.total_rewards += reward;
                slot.total_losses += 1.0 - reward;
            }

            Strategy::DiscountedBoltzmann { arms, .. } => {
                let slot = &mut arms[arm];
                slot.num_selected += 1;
                slot.num_rewarded += (reward >= 0.5) as u64;
                slot.total_rewards += reward;
                slot.dis_num_selected += 1.0;
                slot.sample_mean = slot.total_rewards / slot.dis_num_selected;
            }

            Strategy::Exp3Ix { time_step, arms, weights, losses } => {
                arms[arm].total_rewards += reward;

                let n_arms = arms.len() as f64;
                let eta = (2.0 * n_arms.ln() / n_arms / *time_step as f64).sqrt();
                let gamma = eta / 2.0;

                losses[arm] += (1.0 - reward) / (weights[arm] + gamma);

                let min_loss = losses.iter().copied().fold(f64::INFINITY, f64::min);
                let mut denom = 0.0;
                for (weight, loss) in weights.iter_mut().zip(losses.iter()) {
                    *weight = (-eta * (loss - min_loss)).exp();
                    denom += *weight;
                }
                for weight in weights.iter_mut() {
                    *weight /= denom;
                }
            }

            Strategy::Exp3Pp { time_step, arms, weights, trusts, losses, unweighted_losses, lower, amplitude, .. } => {
                arms[arm].total_rewards += reward;

                let reward = (reward - *lower) / *amplitude;
                let loss = 1.0 - reward;
                unweighted_losses[arm] += loss;
                losses[arm] += loss / trusts[arm];

                let n_arms = arms.len() as f64;
                let eta = 0.5 * (n_arms.ln() / n_arms / (*time_step + 1) as f64).sqrt();

                let min_loss_eta =
                    losses.iter().map(|loss| -eta * loss).fold(f64::INFINITY, f64::min);
                let mut denom = 0.0;
                for (weight, loss) in weights.iter_mut().zip(losses.iter()) {
                    *weight = (-eta * loss - min_loss_eta).exp();
                    denom += *weight;
                }
                for weight in weights.iter_mut() {
                    *weight /= denom;
                }
            }
        }
    }
}

/// The KL-UCB index: the largest `q` with `n_a KL(mean, q) <= ln t`, found by
/// Newton iteration clipped to `[p + delta, 1 - delta]`.
fn klucb_index(time_step: u64, arm: &PlainArm, delta: f64, eps: f64) -> f64 {
    let logndn = (time_step as f64).ln() / arm.num_selected as f64;
    let p = arm.sample_mean.max(delta);
    if p >= 1.0 {
        return 1.0;
    }

    let mut q = p + delta;
    for _ in 0..25 {
        let f = logndn - kl(p, q);
        if f * f < eps {
            break;
        }
        let df = -dkl(p, q);
        q -= f / df;
        q = q.clamp(p + delta, 1.0 - delta);
    }
    q
}

/// Draw one of the `(arm, weight)` entries with probability proportional to
/// its weight. Callers pass only the unmasked arms, so renormalization over
/// the allowed set happens implicitly. Zero total weight degenerates to a
/// uniform draw over the entries.
fn sample_from_weights<R: Rng>(rng: &mut R, entries: &[(usize, f64)]) -> usize {
    let total: f64 = entries.iter().map(|(_, weight)| weight).sum();
    if total <= 0.0 {
        return entries[rng.gen_range(0..entries.len())].0;
    }

    let target = rng.gen::<f64>() * total;
    let mut cumulative = 0.0;
    for (arm, weight) in entries {
        cumulative += weight;
        if target < cumulative {
            return *arm;
        }
    }
    entries[entries.len() - 1].0
}

#[allow(clippy::too_many_arguments)]
fn exppp_update_trusts(
    time_step: u64,
    n_arms: usize,
    unweighted_losses: &[f64],
    weights: &[f64],
    trusts: &mut [f64],
    alpha: f64,
    beta: f64,
    pulls: impl Fn(usize) -> u64,
) {
    let t = time_step as f64;
    let k = n_arms as f64;

    // Gap estimation from per-arm confidence bounds on the average loss.
    let mut ucb = vec![0.0; n_arms];
    let mut lcb = vec![0.0; n_arms];
    let mut min_ucb = f64::INFINITY;
    for i in 0..n_arms {
        let pulls_i = pulls(i) as f64;
        let average_loss = div_inf(unweighted_losses[i], pulls_i);
        let exploration = div_inf(alpha * t.ln() + k.ln(), 2.0 * pulls_i).sqrt();
        ucb[i] = (average_loss + exploration).min(1.0);
        lcb[i] = (average_loss - exploration).max(0.0);
        min_ucb = min_ucb.min(ucb[i]);
    }

    let mut sum_of_epsilons = 0.0;
    let mut epsilons = vec![0.0; n_arms];
    for i in 0..n_arms {
        let gap = (lcb[i] - min_ucb).max(0.0);
        let xi = div_inf(beta * t.ln(), t * gap * gap);
        epsilons[i] = (0.5 / k).min(0.5 * (k.ln() / t / k).sqrt()).min(xi);
        sum_of_epsilons += epsilons[i];
    }

    let mut sum_of_trusts = 0.0;
    for i in 0..n_arms {
        trusts[i] = (1.0 - sum_of_epsilons) * weights[i] + epsilons[i];
        sum_of_trusts += trusts[i];
    }
    if sum_of_trusts < 1e-8 {
        trusts.fill(1.0 / k);
        sum_of_trusts = 1.0;
    }
    for trust in trusts.iter_mut() {
        *trust /= sum_of_trusts;
    }
}

/// The operator and batch-size bandits, conditioned on input-size bucket.
/// Operator selection learns one strategy per bucket; stacking size learns
/// one strategy per (bucket, operator) cell of a flat grid.
pub struct BanditGrid {
    ops: Vec<Strategy>,
    batches: Vec<Strategy>,
    n_ops: usize,
}

impl BanditGrid {
    pub fn new(config: &Config, n_ops: usize) -> Self {
        let buckets = config.num_batch_buckets();
        Self {
            ops: (0..buckets).map(|_| Strategy::new(config.op_strategy, n_ops, config)).collect(),
            batches: (0..buckets * n_ops)
                .map(|_| Strategy::new(config.batch_strategy, config.num_batch_arms, config))
                .collect(),
            n_ops,
        }
    }

    pub fn op_bandit(&mut self, bucket: usize) -> &mut Strategy {
        &mut self.ops[bucket]
    }

    pub fn batch_bandit(&mut self, bucket: usize, op: usize) -> &mut Strategy {
        &mut self.batches[bucket * self.n_ops + op]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::SmallRng, SeedableRng};

    const ALL_KINDS: [StrategyKind; 9] = [
        StrategyKind::Uniform,
        StrategyKind::Ucb1,
        StrategyKind::KlUcb,
        StrategyKind::Thompson,
        StrategyKind::AdwinThompson,
        StrategyKind::DiscountedThompson,
        StrategyKind::DiscountedBoltzmann,
        StrategyKind::Exp3Ix,
        StrategyKind::Exp3Pp,
    ];

    #[test]
    fn uniform_spreads_selections_evenly() {
        let config = Config::default();
        let mut rng = SmallRng::seed_from_u64(17);
        let mut bandit = Strategy::new(StrategyKind::Uniform, 3, &config);

        const PULLS: u64 = 30_000;
        for _ in 0..PULLS {
            let arm = bandit.select_arm(&mut rng, None);
            bandit.add_reward(arm, 0.0);
        }

        // Three-sigma band around the expected 10000 per arm.
        let sigma = ((PULLS as f64) * (1.0 / 3.0) * (2.0 / 3.0)).sqrt();
        for arm in 0..3 {
            let count = bandit.pulls(arm) as f64;
            assert!(
                (count - 10_000.0).abs() < 3.0 * sigma,
                "arm {arm} selected {count} times"
            );
        }
    }

    #[test]
    fn ucb_prefers_the_better_arm() {
        let config = Config::default();
        let mut rng = SmallRng::seed_from_u64(23);
        let mut bandit = Strategy::new(StrategyKind::Ucb1, 2, &config);

        for _ in 0..10_000 {
            let arm = bandit.select_arm(&mut rng, None);
            let p = if arm == 0 { 0.2 } else { 0.8 };
            let reward = rng.gen_bool(p) as u64 as f64;
            bandit.add_reward(arm, reward);
        }

        assert!(bandit.pulls(1) > 8000, "good arm pulled {} times", bandit.pulls(1));
    }

    #[test]
    fn masked_arms_are_never_selected() {
        let config = Config::default();
        for kind in ALL_KINDS {
            let mut rng = SmallRng::seed_from_u64(31);
            let mut bandit = Strategy::new(kind, 5, &config);
            let mask = [false, true, false, true, true];

            for step in 0..500 {
                let arm = bandit.select_arm(&mut rng, Some(&mask));
                assert!(!mask[arm], "{kind:?} selected masked arm {arm} at step {step}");
                bandit.add_reward(arm, (step % 2) as f64);
            }
        }
    }

    #[test]
    fn exponential_weights_stay_normalized() {
        let config = Config::default();
        for kind in [StrategyKind::Exp3Ix, StrategyKind::Exp3Pp] {
            let mut rng = SmallRng::seed_from_u64(47);
            let mut bandit = Strategy::new(kind, 4, &config);

            for step in 0..2000 {
                let arm = bandit.select_arm(&mut rng, None);
                bandit.add_reward(arm, rng.gen_bool(0.3) as u64 as f64);

                let weights = match &bandit {
                    Strategy::Exp3Ix { weights, .. } | Strategy::Exp3Pp { weights, .. } => weights,
                    _ => unreachable!(),
                };
                let sum: f64 = weights.iter().sum();
                assert!((sum - 1.0).abs() < 1e-8, "{kind:?} weight sum {sum} at step {step}");
            }
        }
    }

    #[test]
    fn nonstationary_strategies_follow_a_flip() {
        // After the arms swap qualities, the discounted and windowed
        // strategies should switch their preference.
        let config = Config::default();
        for kind in [StrategyKind::DiscountedThompson, StrategyKind::AdwinThompson] {
            let mut rng = SmallRng::seed_from_u64(59);
            let mut bandit = Strategy::new(kind, 2, &config);

            for _ in 0..3000 {
                let arm = bandit.select_arm(&mut rng, None);
                let p = if arm == 0 { 0.7 } else { 0.1 };
                bandit.add_reward(arm, rng.gen_bool(p) as u64 as f64);
            }

            let pulls_before = bandit.pulls(1);
            for _ in 0..6000 {
                let arm = bandit.select_arm(&mut rng, None);
                let p = if arm == 0 { 0.1 } else { 0.7 };
                bandit.add_reward(arm, rng.gen_bool(p) as u64 as f64);
            }

            let pulls_after = bandit.pulls(1) - pulls_before;
            assert!(pulls_after > 4000, "{kind:?} pulled new best arm only {pulls_after} times");
        }
    }

    #[test]
    fn klucb_index_brackets_the_mean() {
        let arm = PlainArm { num_selected: 50, total_rewards: 20.0, sample_mean: 0.4 };
        let q = klucb_index(1000, &arm, 1e-4, 1e-6);
        assert!(q > 0.4 && q < 1.0, "index {q}");
    }

    #[test]
    fn grid_is_indexed_per_bucket_and_op() {
        let config = Config::default();
        let mut grid = BanditGrid::new(&config, 23);
        let mut rng = SmallRng::seed_from_u64(3);

        let arm = grid.op_bandit(2).select_arm(&mut rng, None);
        grid.op_bandit(2).add_reward(arm, 1.0);
        assert_eq!(grid.op_bandit(2).pulls(arm), 1);
        assert_eq!(grid.op_bandit(0).pulls(arm), 0);

        let t = grid.batch_bandit(1, 7).select_arm(&mut rng, None);
        grid.batch_bandit(1, 7).add_reward(t, 0.0);
        assert_eq!(grid.batch_bandit(1, 7).pulls(t), 1);
        assert_eq!(grid.batch_bandit(1, 8).pulls(t), 0);
    }
}
