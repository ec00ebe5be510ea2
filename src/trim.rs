use crate::{coverage::EdgeId, exec::Executor, stats::Stage, Fuzzer, RawOutcome};

/// Shrink `input` while preserving reachability of `target`.
///
/// Works in non-overlapping windows with a geometrically shrinking step:
/// each window that can be removed without losing the edge is committed and
/// the cursor stays put (the tail shifted into place); otherwise the cursor
/// advances. Crashes and timeouts during trimming are not treated as
/// findings and do not stop the walk.
pub(crate) fn trim_for_branch<E: Executor>(
    fuzzer: &mut Fuzzer<E>,
    input: &mut Vec<u8>,
    target: EdgeId,
) -> anyhow::Result<()> {
    if input.len() < 5 {
        return Ok(());
    }

    fuzzer.state.stage = Stage::BranchTrim;
    let initial_len = input.len();

    let mut len_p2 = input.len().next_power_of_two();
    let mut remove_len = (len_p2 / fuzzer.config.trim_start_steps).max(fuzzer.config.trim_min_bytes);
    let mut scratch = Vec::with_capacity(input.len());

    'trim: while remove_len >= (len_p2 / fuzzer.config.trim_end_steps).max(fuzzer.config.trim_min_bytes)
    {
        let mut remove_pos = 0;

        while remove_pos < input.len() {
            let trim_avail = remove_len.min(input.len() - remove_pos);

            scratch.clear();
            scratch.extend_from_slice(&input[..remove_pos]);
            scratch.extend_from_slice(&input[remove_pos + trim_avail..]);

            match fuzzer.run_raw(&scratch)? {
                RawOutcome::Stopped => break 'trim,
                RawOutcome::Done(_) => {}
            }

            if fuzzer.exec.hits_edge(target) {
                std::mem::swap(input, &mut scratch);
                len_p2 = input.len().next_power_of_two();
            }
            else {
                remove_pos += remove_len;
            }
        }

        remove_len >>= 1;
    }

    if input.len() != initial_len {
        tracing::debug!(
            "branch trim: {initial_len} -> {} bytes for edge {target}",
            input.len()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::{
        config::Config,
        exec::{testing::TestTarget, ExecStatus},
        Fuzzer,
    };

    fn hits_key(input: &[u8], trace: &mut [u8]) -> ExecStatus {
        trace[0] = 1;
        if input.windows(3).any(|w| w == b"KEY") {
            trace[3] = 1;
        }
        ExecStatus::Ok
    }

    #[test]
    fn trims_to_the_preserving_core() {
        let mut config = Config::default();
        config.trim_min_bytes = 1;
        let mut fuzzer =
            Fuzzer::with_seed(TestTarget::new(8, hits_key), config, 1).unwrap();

        let mut input = b"AAAAKEYBBBB".to_vec();
        super::trim_for_branch(&mut fuzzer, &mut input, 3).unwrap();

        assert_eq!(input, b"KEY".to_vec());
    }

    #[test]
    fn short_inputs_are_left_alone() {
        let mut fuzzer =
            Fuzzer::with_seed(TestTarget::new(8, hits_key), Config::default(), 1).unwrap();
        let mut input = b"KEYS".to_vec();
        super::trim_for_branch(&mut fuzzer, &mut input, 3).unwrap();
        assert_eq!(input, b"KEYS".to_vec());
    }

    #[test]
    fn unreachable_edge_changes_nothing() {
        let mut fuzzer =
            Fuzzer::with_seed(TestTarget::new(8, hits_key), Config::default(), 1).unwrap();
        let mut input = b"AAAABBBBCCCC".to_vec();
        super::trim_for_branch(&mut fuzzer, &mut input, 7).unwrap();
        assert_eq!(input, b"AAAABBBBCCCC".to_vec());
    }
}
