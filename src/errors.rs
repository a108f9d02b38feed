use snafu::Snafu;

/// Errors that prevent a tabulation from completing.
///
/// Configuration and input problems are detected before round 1 and surface
/// as an `Err` from [`crate::run_tabulation`]. In-round failures abort the
/// round loop and are reported through the partial
/// [`crate::TabulationRecord`] instead (see its `abnormal_termination`
/// field).
#[derive(Debug, Snafu, Clone, PartialEq, Eq)]
#[snafu(visibility(pub(crate)))]
pub enum TabulationError {
    /// The rule set is malformed or self-contradictory.
    #[snafu(display("invalid configuration: {message}"))]
    ConfigInvalid { message: String },

    /// Ballots mark candidate codes that are not declared in the contest.
    /// Each entry carries the unrecognized code and the number of marks.
    #[snafu(display("ballots mark {} unrecognized candidate code(s): {codes:?}", codes.len()))]
    UnrecognizedCandidate { codes: Vec<(String, u64)> },

    /// No declared, non-excluded candidate remains at the start.
    #[snafu(display("no declared, non-excluded candidate at the start of tabulation"))]
    NoCandidates,

    /// A round could neither elect nor eliminate anyone.
    #[snafu(display("round {round} could neither elect nor eliminate any candidate"))]
    NoProgress { round: u32 },

    /// The external tie-break oracle cancelled the tabulation.
    #[snafu(display("tie-break cancelled by the external oracle in round {round}"))]
    TieBreakCancelled { round: u32 },

    /// The configured scale cannot represent a required intermediate value.
    #[snafu(display("vote arithmetic out of range at scale {scale}"))]
    ArithmeticOutOfRange { scale: u32 },
}

impl TabulationError {
    /// Stable machine-readable tag, used when a partial record is marked
    /// as abnormally terminated.
    pub fn kind(&self) -> &'static str {
        match self {
            TabulationError::ConfigInvalid { .. } => "config_invalid",
            TabulationError::UnrecognizedCandidate { .. } => "unrecognized_candidate",
            TabulationError::NoCandidates => "no_candidates",
            TabulationError::NoProgress { .. } => "no_progress",
            TabulationError::TieBreakCancelled { .. } => "tie_break_cancelled",
            TabulationError::ArithmeticOutOfRange { .. } => "arithmetic_out_of_range",
        }
    }
}

pub type TabResult<T> = Result<T, TabulationError>;
