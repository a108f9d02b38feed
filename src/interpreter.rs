//! Per-round ballot interpretation.
//!
//! Interpretation is recomputed every round from the original ranks and the
//! current continuing set; it is pure over its inputs. A live ballot either
//! produces a vote for exactly one continuing candidate or exhausts with a
//! reason.

use serde::Serialize;

use crate::ballot::{NormalizedBallot, RankCell};
use crate::config::{MaxRankings, MaxSkippedRanks, OvervoteRule, TabulationRules};
use crate::registry::{CandidateIndex, ContinuingSet};

/// Why a ballot stopped counting toward any continuing candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustReason {
    Overvote,
    SkippedRanks,
    Duplicate,
    NoContinuing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Interpretation {
    Vote(CandidateIndex),
    Exhaust(ExhaustReason),
}

/// Rule-derived inputs of interpretation, fixed for a whole tabulation.
#[derive(Debug, Clone, Copy)]
pub(crate) struct InterpretContext {
    pub(crate) overvote_rule: OvervoteRule,
    pub(crate) max_skipped_ranks: MaxSkippedRanks,
    pub(crate) exhaust_on_duplicate: bool,
    /// Resolved from `MaxRankings` against the declared candidate count.
    pub(crate) max_ranks: usize,
}

impl InterpretContext {
    pub(crate) fn new(rules: &TabulationRules, num_declared_candidates: usize) -> InterpretContext {
        let max_ranks = match rules.max_rankings_allowed {
            MaxRankings::NumCandidates => num_declared_candidates,
            MaxRankings::Limit(n) => n as usize,
        };
        InterpretContext {
            overvote_rule: rules.overvote_rule,
            max_skipped_ranks: rules.max_skipped_ranks_allowed,
            exhaust_on_duplicate: rules.exhaust_on_duplicate_candidate,
            max_ranks,
        }
    }
}

/// Interprets one ballot against the continuing set.
///
/// Ranks are scanned in ascending order; each rank is checked for skipped
/// ranks, then duplicates, then overvotes, before a mark can become a vote.
/// With `exhaustOnDuplicateCandidate` on, a ballot that repeats a candidate
/// within the scanned ranks never produces a vote: it exhausts at the rank
/// of the repeat, unless a skip or overvote defect at an earlier rank
/// exhausts it first. With the flag off, a repeated mark is passed over.
pub(crate) fn interpret(
    ballot: &NormalizedBallot,
    continuing: &ContinuingSet,
    cx: &InterpretContext,
) -> Interpretation {
    // A duplicate beyond the scanned ranks never comes into play.
    let duplicate_rank = if cx.exhaust_on_duplicate {
        ballot.first_duplicate_rank.filter(|&rank| rank < cx.max_ranks)
    } else {
        None
    };

    let mut consecutive_empty: u32 = 0;
    let mut seen: Vec<CandidateIndex> = Vec::new();
    for (rank, cell) in ballot.ranks.iter().take(cx.max_ranks).enumerate() {
        if duplicate_rank == Some(rank) {
            return Interpretation::Exhaust(ExhaustReason::Duplicate);
        }
        match cell {
            RankCell::Empty => {
                consecutive_empty += 1;
                if let MaxSkippedRanks::Limit(max) = cx.max_skipped_ranks {
                    if consecutive_empty > max {
                        return Interpretation::Exhaust(ExhaustReason::SkippedRanks);
                    }
                }
            }
            RankCell::Overvote => {
                consecutive_empty = 0;
                match cx.overvote_rule {
                    OvervoteRule::ExhaustImmediately => {
                        return Interpretation::Exhaust(ExhaustReason::Overvote)
                    }
                    // An explicit overvote sentinel carries no mark
                    // identities; configuration validation forbids pairing
                    // it with ExhaustIfMultipleContinuing.
                    OvervoteRule::AlwaysSkipToNextRank
                    | OvervoteRule::ExhaustIfMultipleContinuing => {}
                }
            }
            RankCell::Marks(marks) if marks.len() > 1 => {
                consecutive_empty = 0;
                match cx.overvote_rule {
                    OvervoteRule::ExhaustImmediately => {
                        return Interpretation::Exhaust(ExhaustReason::Overvote)
                    }
                    OvervoteRule::AlwaysSkipToNextRank => {}
                    OvervoteRule::ExhaustIfMultipleContinuing => {
                        let mut continuing_marks =
                            marks.iter().copied().filter(|&m| continuing.contains(m));
                        match (continuing_marks.next(), continuing_marks.next()) {
                            (Some(only), None) if duplicate_rank.is_none() => {
                                return Interpretation::Vote(only)
                            }
                            (Some(_), Some(_)) => {
                                return Interpretation::Exhaust(ExhaustReason::Overvote)
                            }
                            _ => {}
                        }
                    }
                }
            }
            RankCell::Marks(marks) => {
                consecutive_empty = 0;
                let mark = marks[0];
                if seen.contains(&mark) {
                    // Repeated ranking of a candidate already passed over.
                    continue;
                }
                seen.push(mark);
                if duplicate_rank.is_none() && continuing.contains(mark) {
                    return Interpretation::Vote(mark);
                }
                // Eliminated, elected, excluded, or a vote suppressed by a
                // later duplicate: move to the next rank.
            }
        }
    }
    Interpretation::Exhaust(ExhaustReason::NoContinuing)
}
