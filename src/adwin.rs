use crate::config::Config;

/// The subset of [`Config`] the window needs, copied so each bandit arm can
/// own its detector without borrowing the full configuration.
#[derive(Copy, Clone, Debug)]
pub struct AdwinConfig {
    /// Maximum buckets per node before two collapse into the next node.
    pub m: usize,
    /// Confidence parameter of the Hoeffding cut test.
    pub delta: f64,
    /// Minimum observations a side needs before it is compared.
    pub min_elem_to_check: u64,
    /// Minimum window size before any drop is considered.
    pub min_elem_to_start_drop: u64,
    /// Number of inserts between drop checks.
    pub drop_interval: u32,
    /// Reset the whole window on a cut instead of shedding the oldest bucket.
    pub adaptive_reset: bool,
}

impl From<&Config> for AdwinConfig {
    fn from(config: &Config) -> Self {
        Self {
            m: config.adwin_m,
            delta: config.adwin_delta,
            min_elem_to_check: config.adwin_min_elem_to_check,
            min_elem_to_start_drop: config.adwin_min_elem_to_start_drop,
            drop_interval: config.adwin_drop_interval,
            adaptive_reset: config.adwin_adaptive_reset,
        }
    }
}

/// One level of the exponential histogram. `sums[i]` summarizes `2^k`
/// consecutive observations where `k` is the node's index; oldest first.
#[derive(Default)]
struct Node {
    sums: Vec<u64>,
}

/// Adaptive windowing over a binary reward stream.
///
/// The window tracks `w` observations with total `sum` in logarithmically
/// many buckets. When the mean of the oldest part of the window differs from
/// the rest by more than the Hoeffding bound, the oldest bucket is expired
/// (or the window reset, depending on configuration) until both sides agree.
pub struct Adwin {
    config: AdwinConfig,
    /// `nodes[k]` holds buckets of weight `2^k`; the last node is the tail.
    nodes: Vec<Node>,
    w: u64,
    sum: u64,
    num_add: u32,
}

impl Adwin {
    pub fn new(config: AdwinConfig) -> Self {
        Self { config, nodes: vec![Node::default()], w: 0, sum: 0, num_add: 0 }
    }

    pub fn window(&self) -> u64 {
        self.w
    }

    pub fn total(&self) -> u64 {
        self.sum
    }

    /// Best-effort estimate of the current stream mean.
    pub fn estimate(&self) -> f64 {
        match self.w {
            0 => 0.0,
            w => self.sum as f64 / w as f64,
        }
    }

    pub fn reset(&mut self) {
        self.nodes.clear();
        self.nodes.push(Node::default());
        self.w = 0;
        self.sum = 0;
        self.num_add = 0;
    }

    /// Append one observation and occasionally re-check for a cut.
    pub fn add(&mut self, reward: bool) {
        let reward = reward as u64;
        self.w += 1;
        self.sum += reward;
        self.nodes[0].sums.push(reward);

        self.normalize_buckets();

        self.num_add += 1;
        if self.num_add < self.config.drop_interval {
            return;
        }
        self.num_add = 0;
        self.drop_until_identical();
    }

    /// Collapse overflowing nodes: the two oldest buckets of a node merge
    /// into one bucket of the next (doubling the observation weight).
    fn normalize_buckets(&mut self) {
        let mut k = 0;
        while k < self.nodes.len() {
            if self.nodes[k].sums.len() <= self.config.m {
                break;
            }
            if k + 1 == self.nodes.len() {
                self.nodes.push(Node::default());
            }
            let merged = self.nodes[k].sums[0] + self.nodes[k].sums[1];
            self.nodes[k].sums.drain(0..2);
            self.nodes[k + 1].sums.push(merged);
            k += 1;
        }
    }

    /// Drop the oldest bucket from the window.
    fn expire_oldest(&mut self) {
        let tail = self.nodes.len() - 1;
        self.w -= 1 << tail;
        self.sum -= self.nodes[tail].sums.remove(0);

        if self.nodes[tail].sums.is_empty() && tail != 0 {
            self.nodes.pop();
        }
    }

    fn drop_until_identical(&mut self) {
        if self.w < self.config.min_elem_to_start_drop {
            return;
        }

        loop {
            let mut dropped = false;

            let mut n0: u64 = 0;
            let mut s0: u64 = 0;
            let mut n1: u64 = self.w;
            let mut s1: u64 = self.sum;

            let n = self.w as f64;
            let dd2 = (2.0 * n.ln() / self.config.delta).ln() * 2.0;
            let u = self.sum as f64 / n;
            let ddv2 = u * (1.0 - u) * dd2;
            let dd2_3 = dd2 / 3.0;

            'check: for k in (0..self.nodes.len()).rev() {
                for i in 0..self.nodes[k].sums.len() {
                    let bucket = self.nodes[k].sums[i];
                    n0 += 1 << k;
                    n1 -= 1 << k;
                    s0 += bucket;
                    s1 -= bucket;

                    if n1 < self.config.min_elem_to_check {
                        break 'check;
                    }
                    if n0 < self.config.min_elem_to_check {
                        continue;
                    }

                    if self.should_drop(s0, n0, s1, n1, ddv2, dd2_3) {
                        if self.config.adaptive_reset {
                            self.reset();
                        }
                        else {
                            dropped = true;
                            self.expire_oldest();
                        }
                        break 'check;
                    }
                }
            }

            if !dropped {
                break;
            }
        }
    }

    fn should_drop(&self, s0: u64, n0: u64, s1: u64, n1: u64, ddv2: f64, dd2_3: f64) -> bool {
        let u0 = s0 as f64 / n0 as f64;
        let u1 = s1 as f64 / n1 as f64;

        let k = self.config.min_elem_to_check as f64;
        let inv_m = 1.0 / (1.0 + n0 as f64 - k) + 1.0 / (1.0 + n1 as f64 - k);
        let eps = (ddv2 * inv_m).sqrt() + dd2_3 * inv_m;

        (u0 - u1).abs() > eps
    }

    #[cfg(test)]
    fn check_invariants(&self) {
        let w: u64 =
            self.nodes.iter().enumerate().map(|(k, node)| (node.sums.len() as u64) << k).sum();
        let sum: u64 = self.nodes.iter().flat_map(|node| &node.sums).sum();
        assert_eq!(self.w, w, "window size must match bucket weights");
        assert_eq!(self.sum, sum, "sum must match bucket totals");
        for node in &self.nodes {
            assert!(node.sums.len() <= self.config.m, "no node may exceed M buckets");
        }
    }
}
