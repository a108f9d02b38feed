//! Vote transfer planning.
//!
//! Eliminated candidates transfer whole ballot weights; elected candidates
//! transfer a truncated fraction of each ballot. Truncation residue is
//! returned to the engine's residual bucket, never assigned to a candidate
//! and never lost from the accounting.

use std::collections::BTreeMap;

use crate::arithmetic::{FixedWeight, VoteArithmetic};
use crate::ballot::NormalizedBallot;
use crate::errors::TabResult;
use crate::interpreter::{interpret, InterpretContext, Interpretation};
use crate::record::{TransferDetail, TransferKind};
use crate::registry::{CandidateIndex, CandidateRegistry, ContinuingSet};

pub(crate) struct TransferPlanner<'a> {
    pub(crate) arith: &'a VoteArithmetic,
    pub(crate) registry: &'a CandidateRegistry,
    pub(crate) report_order: &'a [CandidateIndex],
    pub(crate) cx: &'a InterpretContext,
}

pub(crate) struct SurplusOutcome {
    pub(crate) detail: TransferDetail,
    pub(crate) residual: FixedWeight,
}

impl TransferPlanner<'_> {
    /// Plans the whole-weight reassignment of an eliminated candidate's
    /// ballots against the next round's continuing set. Weights are not
    /// touched; the next tally pass re-counts the same ballots.
    pub(crate) fn plan_elimination(
        &self,
        from: CandidateIndex,
        ballot_ids: &[usize],
        ballots: &[NormalizedBallot],
        weights: &[FixedWeight],
        next_continuing: &ContinuingSet,
    ) -> TabResult<TransferDetail> {
        let mut destinations: BTreeMap<CandidateIndex, FixedWeight> = BTreeMap::new();
        let mut exhausted = FixedWeight::ZERO;
        for &b in ballot_ids {
            let weight = weights[b];
            if weight.is_zero() {
                continue;
            }
            match interpret(&ballots[b], next_continuing, self.cx) {
                Interpretation::Vote(c) => {
                    let entry = destinations.entry(c).or_insert(FixedWeight::ZERO);
                    *entry = self.arith.add(*entry, weight)?;
                }
                Interpretation::Exhaust(_) => exhausted = self.arith.add(exhausted, weight)?,
            }
        }
        Ok(TransferDetail {
            from: self.registry.name_of(from).to_string(),
            kind: TransferKind::Elimination,
            transfers: self.ordered_destinations(&destinations),
            exhausted,
        })
    }

    /// Transfers the surplus of an elected candidate: every ballot that
    /// counted for them is rescaled by `surplus / tally` (truncated at the
    /// configured scale) and re-aimed at its next continuing preference.
    /// Ballot weights are updated in place.
    pub(crate) fn transfer_surplus(
        &self,
        from: CandidateIndex,
        tally: FixedWeight,
        threshold: FixedWeight,
        ballot_ids: &[usize],
        ballots: &[NormalizedBallot],
        weights: &mut [FixedWeight],
        next_continuing: &ContinuingSet,
    ) -> TabResult<SurplusOutcome> {
        let surplus = self.arith.sub(tally, threshold)?;
        let fraction = if tally.is_zero() {
            FixedWeight::ZERO
        } else {
            self.arith.div(surplus, tally)?
        };

        let mut destinations: BTreeMap<CandidateIndex, FixedWeight> = BTreeMap::new();
        let mut exhausted = FixedWeight::ZERO;
        let mut moved = FixedWeight::ZERO;
        for &b in ballot_ids {
            let next_weight = self.arith.mul(weights[b], fraction)?;
            weights[b] = next_weight;
            if next_weight.is_zero() {
                continue;
            }
            moved = self.arith.add(moved, next_weight)?;
            match interpret(&ballots[b], next_continuing, self.cx) {
                Interpretation::Vote(c) => {
                    let entry = destinations.entry(c).or_insert(FixedWeight::ZERO);
                    *entry = self.arith.add(*entry, next_weight)?;
                }
                Interpretation::Exhaust(_) => {
                    exhausted = self.arith.add(exhausted, next_weight)?
                }
            }
        }

        Ok(SurplusOutcome {
            detail: TransferDetail {
                from: self.registry.name_of(from).to_string(),
                kind: TransferKind::Surplus { fraction },
                transfers: self.ordered_destinations(&destinations),
                exhausted,
            },
            residual: self.arith.sub(surplus, moved)?,
        })
    }

    fn ordered_destinations(
        &self,
        destinations: &BTreeMap<CandidateIndex, FixedWeight>,
    ) -> Vec<(String, FixedWeight)> {
        self.report_order
            .iter()
            .filter_map(|c| {
                destinations
                    .get(c)
                    .map(|&w| (self.registry.name_of(*c).to_string(), w))
            })
            .collect()
    }
}
