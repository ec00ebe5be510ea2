use serde::Serialize;

/// Identifies which part of the pipeline an execution belongs to, for
/// attribution of finds and cycles.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub enum Stage {
    Calibrate,
    BranchTrim,
    Flip1,
    Flip8,
    BranchProbe,
    Flip2,
    Flip4,
    Flip16,
    Flip32,
    Arith8,
    Arith16,
    Arith32,
    Interest8,
    Interest16,
    Interest32,
    ExtrasUo,
    ExtrasUi,
    ExtrasAo,
    Havoc,
    Splice,
}

impl Stage {
    pub const COUNT: usize = 20;

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn short_name(self) -> &'static str {
        match self {
            Stage::Calibrate => "calib",
            Stage::BranchTrim => "rbtrim",
            Stage::Flip1 => "flip1",
            Stage::Flip8 => "flip8",
            Stage::BranchProbe => "rbprobe",
            Stage::Flip2 => "flip2",
            Stage::Flip4 => "flip4",
            Stage::Flip16 => "flip16",
            Stage::Flip32 => "flip32",
            Stage::Arith8 => "arith8",
            Stage::Arith16 => "arith16",
            Stage::Arith32 => "arith32",
            Stage::Interest8 => "int8",
            Stage::Interest16 => "int16",
            Stage::Interest32 => "int32",
            Stage::ExtrasUo => "ext_UO",
            Stage::ExtrasUi => "ext_UI",
            Stage::ExtrasAo => "ext_AO",
            Stage::Havoc => "havoc",
            Stage::Splice => "splice",
        }
    }
}

/// Counters the embedding fuzzer renders. The core never formats output; it
/// only keeps these up to date.
#[derive(Clone, Serialize)]
pub struct Stats {
    pub total_execs: u64,
    pub unique_crashes: u64,
    pub timeouts: u64,
    /// Finds attributed to each stage (queued paths + unique crashes delta).
    pub stage_finds: [u64; Stage::COUNT],
    /// Executions attempted by each stage.
    pub stage_cycles: [u64; Stage::COUNT],
    /// Executions (since the last stage boundary) that still hit the target
    /// edge, and how many were tried.
    pub successful_branch_tries: u64,
    pub total_branch_tries: u64,
}

impl Default for Stats {
    fn default() -> Self {
        Self {
            total_execs: 0,
            unique_crashes: 0,
            timeouts: 0,
            stage_finds: [0; Stage::COUNT],
            stage_cycles: [0; Stage::COUNT],
            successful_branch_tries: 0,
            total_branch_tries: 0,
        }
    }
}

impl Stats {
    pub(crate) fn reset_branch_tries(&mut self) {
        self.successful_branch_tries = 0;
        self.total_branch_tries = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_indices_are_dense() {
        assert_eq!(Stage::Calibrate.index(), 0);
        assert_eq!(Stage::Splice.index(), Stage::COUNT - 1);
    }
}
