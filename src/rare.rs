use crate::{
    coverage::{EdgeId, HitBits, MiniMap},
    queue::QueueEntry,
    utils::highest_order_bit,
};

/// The rare edge chosen for one seed, plus whether the expensive
/// deterministic stages should be skipped for it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TargetChoice {
    pub edge: EdgeId,
    pub skip_deterministic: bool,
}

/// Finds the edges with the lowest hit-count order of magnitude and selects
/// which of them to attack for a given seed.
///
/// `rare_branch_exp` is the moving acceptance threshold: an edge is rare iff
/// the highest set bit of its hit count is strictly below it. The threshold
/// only tightens as rarer tiers appear; edges that repeatedly fail to be
/// preserved by any mutation land on the blacklist and stop qualifying.
pub struct RareBranchSelector {
    pub rare_branch_exp: u32,
    blacklist: Vec<EdgeId>,
    max_rare_branches: usize,
}

impl RareBranchSelector {
    pub fn new(max_rare_branches: usize) -> Self {
        Self { rare_branch_exp: 0, blacklist: vec![], max_rare_branches }
    }

    pub fn blacklist_edge(&mut self, edge: EdgeId) {
        if !self.is_blacklisted(edge) {
            tracing::debug!("blacklisting edge {edge}");
            self.blacklist.push(edge);
        }
    }

    pub fn is_blacklisted(&self, edge: EdgeId) -> bool {
        self.blacklist.contains(&edge)
    }

    pub fn blacklist_len(&self) -> usize {
        self.blacklist.len()
    }

    /// The globally rarest seen-and-not-blacklisted edges. When a tier more
    /// than one exponent below the accepted one shows up, the threshold
    /// tightens and everything collected so far is discarded. An empty scan
    /// raises the threshold just above the rarest exponent seen and retries.
    pub fn rarest_edges(&mut self, hits: &HitBits) -> Vec<EdgeId> {
        loop {
            let mut lowest_hob = None;
            let mut out: Vec<EdgeId> = vec![];

            for edge in 0..hits.len() as EdgeId {
                if out.len() + 1 >= self.max_rare_branches {
                    break;
                }
                let count = hits.get(edge);
                if count == 0 || self.is_blacklisted(edge) {
                    continue;
                }

                let hob = highest_order_bit(count);
                lowest_hob = Some(lowest_hob.map_or(hob, |low: u32| low.min(hob)));

                if hob < self.rare_branch_exp {
                    if hob + 1 < self.rare_branch_exp {
                        // An order of magnitude rarer than anything accepted
                        // so far: restart the list at the tighter tier.
                        self.rare_branch_exp = hob + 1;
                        out.clear();
                    }
                    out.push(edge);
                }
            }

            if !out.is_empty() {
                return out;
            }
            match lowest_hob {
                Some(low) => {
                    self.rare_branch_exp = low + 1;
                    tracing::trace!("raised rare branch exponent to {}", self.rare_branch_exp);
                }
                None => return vec![],
            }
        }
    }

    /// The rare edges this seed's footprint reaches, rarest first.
    pub fn rare_edges_hit_by(&mut self, hits: &HitBits, footprint: &MiniMap) -> Vec<EdgeId> {
        let rare = self.rarest_edges(hits);
        if rare.is_empty() {
            return vec![];
        }

        let mut out: Vec<EdgeId> = vec![];
        for edge in footprint.edges() {
            if !rare.contains(&edge) {
                continue;
            }
            let count = hits.get(edge);
            let at = out.partition_point(|existing| hits.get(*existing) <= count);
            out.insert(at, edge);
            if out.len() >= self.max_rare_branches {
                break;
            }
        }
        out
    }

    /// Choose the target edge for `entry`: the rarest edge it hits that has
    /// not been fuzzed yet. If every candidate was already fuzzed, re-attack
    /// the rarest one but skip the deterministic stages.
    pub fn select_target(
        &mut self,
        hits: &HitBits,
        entry: &mut QueueEntry,
    ) -> Option<TargetChoice> {
        let candidates = self.rare_edges_hit_by(hits, &entry.footprint);
        let first = *candidates.first()?;

        for edge in candidates {
            if entry.has_fuzzed_branch(edge) {
                continue;
            }
            // Deterministic stages only pay off the first time a seed gets
            // branch-targeted attention.
            let skip_deterministic = entry.any_fuzzed_branch();
            entry.mark_fuzzed_branch(edge);
            return Some(TargetChoice { edge, skip_deterministic });
        }

        Some(TargetChoice { edge: first, skip_deterministic: true })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{coverage::MiniMap, queue::CorpusStore};

    fn hits_with(counts: &[(EdgeId, u32)]) -> HitBits {
        let mut hits = HitBits::new(64);
        for (edge, count) in counts {
            hits.set(*edge, *count);
        }
        hits
    }

    #[test]
    fn returned_edges_sit_below_the_exponent() {
        let mut selector = RareBranchSelector::new(16);
        let hits = hits_with(&[(1, 100), (2, 3), (3, 900), (4, 2)]);

        let rare = selector.rarest_edges(&hits);
        assert_eq!(rare, vec![2, 4]);
        for edge in &rare {
            assert!(highest_order_bit(hits.get(*edge)) < selector.rare_branch_exp);
        }
    }

    #[test]
    fn tightening_discards_commoner_tiers() {
        let mut selector = RareBranchSelector::new(16);
        // First scan accepts the 100-hit tier.
        let hits = hits_with(&[(1, 100), (2, 120)]);
        assert_eq!(selector.rarest_edges(&hits), vec![1, 2]);

        // A far rarer edge appears: the old tier no longer qualifies.
        let hits = hits_with(&[(1, 100), (2, 120), (9, 1)]);
        assert_eq!(selector.rarest_edges(&hits), vec![9]);
    }

    #[test]
    fn empty_scan_raises_exponent_and_retries() {
        let mut selector = RareBranchSelector::new(16);
        selector.rare_branch_exp = 0;
        let hits = hits_with(&[(5, 64)]);
        assert_eq!(selector.rarest_edges(&hits), vec![5]);
        assert_eq!(selector.rare_branch_exp, 7);
    }

    #[test]
    fn blacklisted_edges_never_qualify() {
        let mut selector = RareBranchSelector::new(16);
        selector.blacklist_edge(4);
        selector.blacklist_edge(4);
        assert_eq!(selector.blacklist_len(), 1);

        let hits = hits_with(&[(4, 1), (7, 2)]);
        assert_eq!(selector.rarest_edges(&hits), vec![7]);
    }

    #[test]
    fn no_seen_edges_yields_empty() {
        let mut selector = RareBranchSelector::new(16);
        let hits = HitBits::new(64);
        assert!(selector.rarest_edges(&hits).is_empty());
    }

    #[test]
    fn hit_list_sorted_by_rarity() {
        let mut selector = RareBranchSelector::new(16);
        let hits = hits_with(&[(1, 3), (2, 2), (3, 3), (40, 500)]);

        let mut trace = vec![0_u8; 64];
        for edge in [1, 2, 3, 40] {
            trace[edge] = 1;
        }
        let footprint = MiniMap::from_trace(&trace);

        let list = selector.rare_edges_hit_by(&hits, &footprint);
        assert_eq!(list, vec![2, 1, 3]);
    }

    #[test]
    fn target_selection_skips_fuzzed_edges() {
        let mut selector = RareBranchSelector::new(16);
        let hits = hits_with(&[(1, 1), (2, 1)]);

        let mut trace = vec![0_u8; 64];
        trace[1] = 1;
        trace[2] = 1;
        let footprint = MiniMap::from_trace(&trace);

        let mut store = CorpusStore::default();
        let id = store.add(vec![0; 4], footprint, 0, 0);

        let first = selector.select_target(&hits, &mut store[id]).unwrap();
        assert_eq!(first, TargetChoice { edge: 1, skip_deterministic: false });

        let second = selector.select_target(&hits, &mut store[id]).unwrap();
        assert_eq!(second, TargetChoice { edge: 2, skip_deterministic: true });

        // Everything fuzzed: fall back to the rarest with det skipped.
        let third = selector.select_target(&hits, &mut store[id]).unwrap();
        assert_eq!(third, TargetChoice { edge: 1, skip_deterministic: true });
    }
}
