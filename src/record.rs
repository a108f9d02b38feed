//! The immutable tabulation record.
//!
//! The record is the complete round-by-round history of a tabulation,
//! append-only while the engine runs and frozen at termination. Report
//! writers serialize it (all weights serialize as decimal strings); the
//! engine never mutates a committed round.

use serde::Serialize;

use crate::arithmetic::FixedWeight;
use crate::tiebreak::{TieBreakDirection, TieBreakReason};

/// Exhausted weight split by reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExhaustionBreakdown {
    pub overvote: FixedWeight,
    pub skipped_ranks: FixedWeight,
    pub duplicate: FixedWeight,
    pub no_continuing: FixedWeight,
    pub total: FixedWeight,
}

impl ExhaustionBreakdown {
    pub const ZERO: ExhaustionBreakdown = ExhaustionBreakdown {
        overvote: FixedWeight::ZERO,
        skipped_ranks: FixedWeight::ZERO,
        duplicate: FixedWeight::ZERO,
        no_continuing: FixedWeight::ZERO,
        total: FixedWeight::ZERO,
    };
}

/// How the ballots of one candidate left them in a round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum TransferKind {
    /// Whole-weight transfer from an eliminated candidate.
    Elimination,
    /// Fractional surplus transfer from an elected candidate.
    #[serde(rename_all = "camelCase")]
    Surplus { fraction: FixedWeight },
}

/// Destination map of one candidate's transferred ballots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferDetail {
    pub from: String,
    #[serde(flatten)]
    pub kind: TransferKind,
    /// Receiving candidate name -> transferred weight, in report order.
    pub transfers: Vec<(String, FixedWeight)>,
    /// Weight that found no continuing destination.
    pub exhausted: FixedWeight,
}

/// One tie-break decision, recorded for audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TieBreakEvent {
    pub direction: TieBreakDirection,
    /// Names of the tied candidates, in report order.
    pub tied: Vec<String>,
    pub selected: String,
    pub reason: TieBreakReason,
}

/// The committed state of one round.
///
/// The tally lists continuing candidates at their round totals and
/// already-elected candidates at the weight they hold, so that
/// `tally + cumulative exhausted + cumulative residual` always accounts for
/// the full initial weight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundSnapshot {
    /// Restart index for sequential contests; 1 otherwise.
    pub pass: u32,
    /// 1-based round number within the pass.
    pub round: u32,
    pub threshold: FixedWeight,
    pub tally: Vec<(String, FixedWeight)>,
    pub elected: Vec<String>,
    pub eliminated: Vec<String>,
    pub transfers: Vec<TransferDetail>,
    /// Weight newly exhausted this round.
    pub exhausted: ExhaustionBreakdown,
    /// Exhausted weight accumulated over the pass so far.
    pub cumulative_exhausted: ExhaustionBreakdown,
    /// Truncation residue produced this round.
    pub residual: FixedWeight,
    /// Truncation residue accumulated over the pass so far.
    pub cumulative_residual: FixedWeight,
    /// Surplus weight won in earlier rounds whose transfer was still
    /// pending at this round's tally. Non-zero only under
    /// `allowOnlyOneWinnerPerRound`, which staggers surplus transfers one
    /// per round.
    pub pending_surplus: FixedWeight,
    pub tie_breaks: Vec<TieBreakEvent>,
}

/// Why and where a tabulation stopped early.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AbnormalTermination {
    pub round: u32,
    /// Machine-readable error tag (`no_progress`, `tie_break_cancelled`, ...).
    pub kind: String,
    pub message: String,
}

/// The completed (or abnormally terminated) history of a tabulation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TabulationRecord {
    /// Winner names in election order (pass order for sequential contests).
    pub winners: Vec<String>,
    pub random_seed: Option<u64>,
    /// The audit permutation (candidate codes) when a permutation-based
    /// tie-break mode is in effect.
    pub candidate_permutation: Option<Vec<String>>,
    pub total_initial_weight: FixedWeight,
    pub rounds: Vec<RoundSnapshot>,
    pub abnormal_termination: Option<AbnormalTermination>,
}

impl TabulationRecord {
    pub fn is_complete(&self) -> bool {
        self.abnormal_termination.is_none()
    }

    pub fn final_round(&self) -> Option<&RoundSnapshot> {
        self.rounds.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_serializes_weights_as_strings() {
        let record = TabulationRecord {
            winners: vec!["Alice".to_string()],
            random_seed: Some(1234),
            candidate_permutation: None,
            total_initial_weight: FixedWeight::from_count(5),
            rounds: vec![RoundSnapshot {
                pass: 1,
                round: 1,
                threshold: FixedWeight::from_count(3),
                tally: vec![("Alice".to_string(), FixedWeight::from_count(5))],
                elected: vec!["Alice".to_string()],
                eliminated: vec![],
                transfers: vec![TransferDetail {
                    from: "Alice".to_string(),
                    kind: TransferKind::Surplus { fraction: "0.4".parse().unwrap() },
                    transfers: vec![("Bob".to_string(), "0.8".parse().unwrap())],
                    exhausted: FixedWeight::ZERO,
                }],
                exhausted: ExhaustionBreakdown::ZERO,
                cumulative_exhausted: ExhaustionBreakdown::ZERO,
                residual: FixedWeight::ZERO,
                cumulative_residual: FixedWeight::ZERO,
                pending_surplus: FixedWeight::ZERO,
                tie_breaks: vec![],
            }],
            abnormal_termination: None,
        };
        let js = serde_json::to_value(&record).unwrap();
        assert_eq!(js["totalInitialWeight"], "5");
        assert_eq!(js["rounds"][0]["threshold"], "3");
        assert_eq!(js["rounds"][0]["tally"][0][1], "5");
        assert_eq!(js["rounds"][0]["transfers"][0]["kind"], "surplus");
        assert_eq!(js["rounds"][0]["transfers"][0]["fraction"], "0.4");
        assert_eq!(js["rounds"][0]["exhausted"]["skippedRanks"], "0");
        assert!(record.is_complete());
    }
}
