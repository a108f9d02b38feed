//! The round engine.
//!
//! Rounds execute strictly in order: tally, elect or eliminate, transfer,
//! advance. All candidate traversals that affect decisions or reports follow
//! the fixed report order (audit permutation, or candidate code
//! lexicographic), so equal inputs produce bit-identical records.

use std::collections::BTreeMap;

use log::debug;

use crate::arithmetic::{FixedWeight, VoteArithmetic};
use crate::ballot::{normalize_ballots, Builder, NormalizedBallot, ParsedBallot};
use crate::config::{Candidate, TabulationRules, WinnerElectionMode};
use crate::errors::{ConfigInvalidSnafu, TabResult, TabulationError};
use crate::events::{EventSink, NullSink, TabulationEvent};
use crate::interpreter::{interpret, ExhaustReason, InterpretContext, Interpretation};
use crate::record::{
    AbnormalTermination, ExhaustionBreakdown, RoundSnapshot, TabulationRecord, TieBreakEvent,
};
use crate::registry::{CandidateIndex, CandidateRegistry, ContinuingSet};
use crate::threshold::ThresholdPolicy;
use crate::tiebreak::{SplitMix64, TieBreakDirection, TieBreakOracle, TieBreaker};
use crate::transfer::TransferPlanner;

/// Runs a complete tabulation over normalized ballots.
///
/// Configuration and input errors surface as `Err` before round 1. Failures
/// inside the round loop freeze the partial record instead and mark it with
/// an [`AbnormalTermination`].
pub fn run_tabulation(
    ballots: &[ParsedBallot],
    candidates: &[Candidate],
    rules: &TabulationRules,
    mut oracle: Option<&mut dyn TieBreakOracle>,
    sink: Option<&mut dyn EventSink>,
) -> TabResult<TabulationRecord> {
    let registry = CandidateRegistry::build(candidates, rules)?;
    rules.validate(registry.num_declared())?;
    if rules.tie_break_mode.is_interactive() && oracle.is_none() {
        return ConfigInvalidSnafu {
            message: "interactive tie-break modes require an external oracle".to_string(),
        }
        .fail();
    }

    let normalized = normalize_ballots(ballots, &registry, rules)?;
    let arith = VoteArithmetic::new(rules.decimal_places_for_vote_arithmetic);
    let cx = InterpretContext::new(rules, registry.num_declared());

    let permutation = match rules.tie_break_mode {
        crate::config::TieBreakMode::UsePermutationInConfig => {
            if rules.candidate_permutation.is_empty() {
                Some(registry.declaration_order())
            } else {
                Some(registry.resolve_permutation(&rules.candidate_permutation)?)
            }
        }
        crate::config::TieBreakMode::GeneratePermutation => {
            let mut order = registry.lexicographic_order();
            // The seed is validated present for this mode.
            let mut rng = SplitMix64::new(rules.random_seed.unwrap_or(0));
            rng.shuffle(&mut order);
            Some(order)
        }
        _ => None,
    };
    let report_order = permutation
        .clone()
        .unwrap_or_else(|| registry.lexicographic_order());
    let mut tie_breaker = TieBreaker::new(
        rules.tie_break_mode,
        rules.random_seed,
        permutation.as_deref(),
        registry.len(),
    );

    let total_initial_weight =
        arith.sum(normalized.iter().map(|b| FixedWeight::from_count(b.count)))?;

    let mut null_sink = NullSink;
    let sink: &mut dyn EventSink = match sink {
        Some(sink) => sink,
        None => &mut null_sink,
    };
    sink.emit(&TabulationEvent::TabulationBegan {
        candidates: registry.num_declared(),
        ballots: normalized.len(),
        total_weight: total_initial_weight,
    });

    let policy = ThresholdPolicy {
        seats: match rules.winner_election_mode {
            WinnerElectionMode::StandardStv | WinnerElectionMode::BottomsUp => {
                rules.number_of_winners
            }
            _ => 1,
        },
        hare_quota: rules.hare_quota,
        non_integer: rules.non_integer_winning_threshold,
    };

    let passes = match rules.winner_election_mode {
        WinnerElectionMode::Sequential => rules.number_of_winners,
        _ => 1,
    };

    let mut winners: Vec<CandidateIndex> = Vec::new();
    let mut rounds: Vec<RoundSnapshot> = Vec::new();
    let mut abnormal: Option<AbnormalTermination> = None;

    for pass in 1..=passes {
        if passes > 1 {
            sink.emit(&TabulationEvent::PassBegan { pass });
        }
        let continuing: Vec<CandidateIndex> = registry
            .initial_continuing()
            .into_iter()
            .filter(|c| !winners.contains(c))
            .collect();
        let mut engine = PassEngine {
            pass,
            rules,
            registry: &registry,
            arith: &arith,
            cx: &cx,
            report_order: &report_order,
            policy,
            tie_breaker: &mut tie_breaker,
            oracle: &mut oracle,
            sink: &mut *sink,
            ballots: &normalized,
            weights: normalized
                .iter()
                .map(|b| FixedWeight::from_count(b.count))
                .collect(),
            dead: vec![false; normalized.len()],
            continuing: ContinuingSet::from_indices(registry.len(), &continuing),
            tally_history: Vec::new(),
            elected_held: BTreeMap::new(),
            pending_surplus: Vec::new(),
            pass_winners: Vec::new(),
            cum_exhausted: Buckets::default(),
            cum_residual: FixedWeight::ZERO,
            rounds: Vec::new(),
            round: 0,
        };
        let outcome = engine.run();
        let failing_round = engine.round;
        winners.extend(engine.pass_winners.iter().copied());
        rounds.append(&mut engine.rounds);
        if let Err(error) = outcome {
            abnormal = Some(AbnormalTermination {
                round: failing_round,
                kind: error.kind().to_string(),
                message: error.to_string(),
            });
            break;
        }
    }

    let winner_names: Vec<String> = winners
        .iter()
        .map(|&c| registry.name_of(c).to_string())
        .collect();
    sink.emit(&TabulationEvent::TabulationEnded {
        rounds: rounds.len() as u32,
        winners: winner_names.clone(),
    });

    Ok(TabulationRecord {
        winners: winner_names,
        random_seed: rules.random_seed,
        candidate_permutation: permutation.map(|order| {
            order.iter().map(|&c| registry.code_of(c).to_string()).collect()
        }),
        total_initial_weight,
        rounds,
        abnormal_termination: abnormal,
    })
}

impl Builder {
    /// Tabulates the assembled contest with no oracle and no event sink.
    pub fn tabulate(&self) -> TabResult<TabulationRecord> {
        run_tabulation(&self.ballots, &self.candidates, &self.rules, None, None)
    }
}

/// Per-reason exhaustion accumulator.
#[derive(Debug, Clone, Copy, Default)]
struct Buckets {
    overvote: FixedWeight,
    skipped_ranks: FixedWeight,
    duplicate: FixedWeight,
    no_continuing: FixedWeight,
    total: FixedWeight,
}

impl Buckets {
    fn add(&mut self, arith: &VoteArithmetic, reason: ExhaustReason, w: FixedWeight) -> TabResult<()> {
        let slot = match reason {
            ExhaustReason::Overvote => &mut self.overvote,
            ExhaustReason::SkippedRanks => &mut self.skipped_ranks,
            ExhaustReason::Duplicate => &mut self.duplicate,
            ExhaustReason::NoContinuing => &mut self.no_continuing,
        };
        *slot = arith.add(*slot, w)?;
        self.total = arith.add(self.total, w)?;
        Ok(())
    }

    fn merge(&mut self, arith: &VoteArithmetic, other: &Buckets) -> TabResult<()> {
        self.overvote = arith.add(self.overvote, other.overvote)?;
        self.skipped_ranks = arith.add(self.skipped_ranks, other.skipped_ranks)?;
        self.duplicate = arith.add(self.duplicate, other.duplicate)?;
        self.no_continuing = arith.add(self.no_continuing, other.no_continuing)?;
        self.total = arith.add(self.total, other.total)?;
        Ok(())
    }

    fn breakdown(&self) -> ExhaustionBreakdown {
        ExhaustionBreakdown {
            overvote: self.overvote,
            skipped_ranks: self.skipped_ranks,
            duplicate: self.duplicate,
            no_continuing: self.no_continuing,
            total: self.total,
        }
    }
}

struct RoundDecision {
    elected: Vec<CandidateIndex>,
    /// Whether elected candidates transfer their surplus this round.
    surplus: bool,
    eliminated: Vec<CandidateIndex>,
    terminal: bool,
}

/// A surplus won in an earlier round and not yet transferred. Under
/// `allowOnlyOneWinnerPerRound` one queued surplus transfers per round; the
/// winner's ballots sit out every tally until their transfer round.
struct PendingSurplus {
    candidate: CandidateIndex,
    won_with: FixedWeight,
    threshold: FixedWeight,
    ballot_ids: Vec<usize>,
}

struct PassEngine<'s, 'o> {
    pass: u32,
    rules: &'s TabulationRules,
    registry: &'s CandidateRegistry,
    arith: &'s VoteArithmetic,
    cx: &'s InterpretContext,
    report_order: &'s [CandidateIndex],
    policy: ThresholdPolicy,
    tie_breaker: &'s mut TieBreaker,
    oracle: &'s mut Option<&'o mut dyn TieBreakOracle>,
    sink: &'s mut dyn EventSink,
    ballots: &'s [NormalizedBallot],
    weights: Vec<FixedWeight>,
    dead: Vec<bool>,
    continuing: ContinuingSet,
    tally_history: Vec<BTreeMap<CandidateIndex, FixedWeight>>,
    /// Weight retained by candidates elected in earlier rounds of this pass.
    elected_held: BTreeMap<CandidateIndex, FixedWeight>,
    /// Surplus transfers awaiting their round, in election order.
    pending_surplus: Vec<PendingSurplus>,
    pass_winners: Vec<CandidateIndex>,
    cum_exhausted: Buckets,
    cum_residual: FixedWeight,
    rounds: Vec<RoundSnapshot>,
    round: u32,
}

impl PassEngine<'_, '_> {
    fn run(&mut self) -> TabResult<()> {
        loop {
            self.round += 1;
            let round = self.round;

            // 1. Tally: interpret every live ballot against the continuing
            // set; exhausted ballots leave the count for good.
            let mut tally: BTreeMap<CandidateIndex, FixedWeight> = self
                .continuing
                .members_in(self.report_order)
                .map(|c| (c, FixedWeight::ZERO))
                .collect();
            let mut assigned: BTreeMap<CandidateIndex, Vec<usize>> = BTreeMap::new();
            let mut exhausted_now = Buckets::default();
            for b in 0..self.ballots.len() {
                if self.dead[b] {
                    continue;
                }
                let w = self.weights[b];
                if w.is_zero() {
                    self.dead[b] = true;
                    continue;
                }
                match interpret(&self.ballots[b], &self.continuing, self.cx) {
                    Interpretation::Vote(c) => {
                        let entry = tally.entry(c).or_insert(FixedWeight::ZERO);
                        *entry = self.arith.add(*entry, w)?;
                        assigned.entry(c).or_default().push(b);
                    }
                    Interpretation::Exhaust(reason) => {
                        exhausted_now.add(self.arith, reason, w)?;
                        self.dead[b] = true;
                    }
                }
            }
            self.cum_exhausted.merge(self.arith, &exhausted_now)?;
            self.tally_history.push(tally.clone());

            // 2. Threshold from the active weight. Ballots parked behind a
            // pending surplus transfer are not active.
            let active = self.arith.sum(tally.values().copied())?;
            let threshold = self.policy.winning_threshold(self.arith, active)?;
            let mut pending_at_tally = FixedWeight::ZERO;
            for pending in &self.pending_surplus {
                let surplus = self.arith.sub(pending.won_with, pending.threshold)?;
                pending_at_tally = self.arith.add(pending_at_tally, surplus)?;
            }
            self.sink.emit(&TabulationEvent::RoundTallied { round, active, threshold });
            debug!("pass {} round {}: active {} threshold {}", self.pass, round, active, threshold);

            // 3. Elect or eliminate.
            let mut tie_breaks: Vec<TieBreakEvent> = Vec::new();
            let decision = self.decide(round, &tally, threshold, &mut tie_breaks)?;
            if !decision.terminal
                && decision.elected.is_empty()
                && decision.eliminated.is_empty()
                && self.pending_surplus.is_empty()
            {
                return Err(TabulationError::NoProgress { round });
            }

            let mut next_continuing = self.continuing.clone();
            for &c in decision.elected.iter().chain(decision.eliminated.iter()) {
                next_continuing.remove(c);
            }

            // 4. Transfers.
            let planner = TransferPlanner {
                arith: self.arith,
                registry: self.registry,
                report_order: self.report_order,
                cx: self.cx,
            };
            let mut transfers = Vec::new();
            let mut residual_now = FixedWeight::ZERO;
            for &c in &decision.elected {
                let won_with = tally.get(&c).copied().unwrap_or(FixedWeight::ZERO);
                self.sink.emit(&TabulationEvent::CandidateElected {
                    round,
                    name: self.registry.name_of(c).to_string(),
                    tally: won_with,
                });
                if decision.surplus && won_with > threshold {
                    if self.rules.allow_only_one_winner_per_round {
                        // Won but not yet transferred: hold the threshold
                        // and park the ballots until this surplus reaches
                        // the head of the queue.
                        let ballot_ids = assigned.remove(&c).unwrap_or_default();
                        for &b in &ballot_ids {
                            self.dead[b] = true;
                        }
                        self.elected_held.insert(c, threshold);
                        self.pending_surplus.push(PendingSurplus {
                            candidate: c,
                            won_with,
                            threshold,
                            ballot_ids,
                        });
                    } else {
                        let ids = assigned.get(&c).map(Vec::as_slice).unwrap_or(&[]);
                        let outcome = planner.transfer_surplus(
                            c,
                            won_with,
                            threshold,
                            ids,
                            self.ballots,
                            &mut self.weights,
                            &next_continuing,
                        )?;
                        residual_now = self.arith.add(residual_now, outcome.residual)?;
                        transfers.push(outcome.detail);
                        self.elected_held.insert(c, threshold);
                    }
                } else if decision.surplus {
                    // Elected at exactly the threshold: the whole ballot
                    // weight stays with the winner.
                    for &b in assigned.get(&c).map(Vec::as_slice).unwrap_or(&[]) {
                        self.weights[b] = FixedWeight::ZERO;
                    }
                    self.elected_held.insert(c, won_with);
                } else {
                    self.elected_held.insert(c, won_with);
                }
                self.pass_winners.push(c);
            }
            // One queued surplus transfers per round, oldest first.
            if self.rules.allow_only_one_winner_per_round && !self.pending_surplus.is_empty() {
                let pending = self.pending_surplus.remove(0);
                for &b in &pending.ballot_ids {
                    self.dead[b] = false;
                }
                let outcome = planner.transfer_surplus(
                    pending.candidate,
                    pending.won_with,
                    pending.threshold,
                    &pending.ballot_ids,
                    self.ballots,
                    &mut self.weights,
                    &next_continuing,
                )?;
                residual_now = self.arith.add(residual_now, outcome.residual)?;
                transfers.push(outcome.detail);
            }
            for &c in &decision.eliminated {
                let lost_with = tally.get(&c).copied().unwrap_or(FixedWeight::ZERO);
                self.sink.emit(&TabulationEvent::CandidateEliminated {
                    round,
                    name: self.registry.name_of(c).to_string(),
                    tally: lost_with,
                });
                let ids = assigned.get(&c).map(Vec::as_slice).unwrap_or(&[]);
                transfers.push(planner.plan_elimination(
                    c,
                    ids,
                    self.ballots,
                    &self.weights,
                    &next_continuing,
                )?);
            }
            self.cum_residual = self.arith.add(self.cum_residual, residual_now)?;

            // 5. Commit the round.
            let snapshot_tally: Vec<(String, FixedWeight)> = self
                .report_order
                .iter()
                .filter_map(|c| {
                    tally
                        .get(c)
                        .or_else(|| self.elected_held.get(c))
                        .map(|&w| (self.registry.name_of(*c).to_string(), w))
                })
                .collect();
            self.rounds.push(RoundSnapshot {
                pass: self.pass,
                round,
                threshold,
                tally: snapshot_tally,
                elected: decision
                    .elected
                    .iter()
                    .map(|&c| self.registry.name_of(c).to_string())
                    .collect(),
                eliminated: decision
                    .eliminated
                    .iter()
                    .map(|&c| self.registry.name_of(c).to_string())
                    .collect(),
                transfers,
                exhausted: exhausted_now.breakdown(),
                cumulative_exhausted: self.cum_exhausted.breakdown(),
                residual: residual_now,
                cumulative_residual: self.cum_residual,
                pending_surplus: pending_at_tally,
                tie_breaks,
            });

            // 6. Advance.
            self.continuing = next_continuing;
            if decision.terminal {
                return Ok(());
            }
        }
    }

    fn decide(
        &mut self,
        round: u32,
        tally: &BTreeMap<CandidateIndex, FixedWeight>,
        threshold: FixedWeight,
        tie_breaks: &mut Vec<TieBreakEvent>,
    ) -> TabResult<RoundDecision> {
        let elected_so_far = self.pass_winners.len() as u32;
        match self.rules.winner_election_mode {
            WinnerElectionMode::SingleWinner | WinnerElectionMode::Sequential => {
                if self.continuing.len() <= 2 {
                    return self.elect_final(round, tally, tie_breaks);
                }
                let any_winner = self
                    .eligible(true)
                    .into_iter()
                    .any(|c| self.policy.meets(tally_of(tally, c), threshold));
                if any_winner {
                    self.elect_final(round, tally, tie_breaks)
                } else {
                    self.eliminate(round, tally, tie_breaks)
                }
            }
            WinnerElectionMode::ContinueUntilTwoRemain => {
                if self.continuing.len() <= 2 {
                    self.elect_final(round, tally, tie_breaks)
                } else {
                    self.eliminate(round, tally, tie_breaks)
                }
            }
            WinnerElectionMode::StandardStv => {
                let needed = (self.rules.number_of_winners - elected_so_far) as usize;
                let mut meeting: Vec<CandidateIndex> = self
                    .eligible(true)
                    .into_iter()
                    .filter(|&c| self.policy.meets(tally_of(tally, c), threshold))
                    .collect();
                if !meeting.is_empty() {
                    meeting.sort_by(|a, b| tally_of(tally, *b).cmp(&tally_of(tally, *a)));
                    meeting.truncate(needed);
                    let terminal = meeting.len() == needed;
                    Ok(RoundDecision {
                        elected: meeting,
                        surplus: true,
                        eliminated: Vec::new(),
                        terminal,
                    })
                } else if !self.pending_surplus.is_empty() {
                    // No new quota winners: this round's action is the next
                    // queued surplus transfer, not an elimination.
                    Ok(RoundDecision {
                        elected: Vec::new(),
                        surplus: false,
                        eliminated: Vec::new(),
                        terminal: false,
                    })
                } else if self.continuing.len() <= needed {
                    self.elect_remaining(tally)
                } else {
                    self.eliminate(round, tally, tie_breaks)
                }
            }
            WinnerElectionMode::BottomsUp => {
                if self.continuing.len() <= self.rules.number_of_winners as usize {
                    self.elect_remaining(tally)
                } else {
                    self.eliminate(round, tally, tie_breaks)
                }
            }
        }
    }

    /// Elects the single best continuing candidate and terminates the pass.
    fn elect_final(
        &mut self,
        round: u32,
        tally: &BTreeMap<CandidateIndex, FixedWeight>,
        tie_breaks: &mut Vec<TieBreakEvent>,
    ) -> TabResult<RoundDecision> {
        let eligible = self.eligible(true);
        if eligible.is_empty() {
            return Err(TabulationError::NoProgress { round });
        }
        let winner =
            self.pick_extreme(&eligible, tally, TieBreakDirection::SelectHighest, round, tie_breaks)?;
        Ok(RoundDecision {
            elected: vec![winner],
            surplus: false,
            eliminated: Vec::new(),
            terminal: true,
        })
    }

    /// Declares every remaining continuing candidate elected, without
    /// transfer, highest tally first.
    fn elect_remaining(
        &mut self,
        tally: &BTreeMap<CandidateIndex, FixedWeight>,
    ) -> TabResult<RoundDecision> {
        let mut remaining = self.eligible(true);
        remaining.sort_by(|a, b| tally_of(tally, *b).cmp(&tally_of(tally, *a)));
        Ok(RoundDecision {
            elected: remaining,
            surplus: false,
            eliminated: Vec::new(),
            terminal: true,
        })
    }

    fn eliminate(
        &mut self,
        round: u32,
        tally: &BTreeMap<CandidateIndex, FixedWeight>,
        tie_breaks: &mut Vec<TieBreakEvent>,
    ) -> TabResult<RoundDecision> {
        let eliminated = self.choose_eliminations(round, tally, tie_breaks)?;
        Ok(RoundDecision {
            elected: Vec::new(),
            surplus: false,
            eliminated,
            terminal: false,
        })
    }

    fn choose_eliminations(
        &mut self,
        round: u32,
        tally: &BTreeMap<CandidateIndex, FixedWeight>,
        tie_breaks: &mut Vec<TieBreakEvent>,
    ) -> TabResult<Vec<CandidateIndex>> {
        let members = self.eligible(false);
        if members.is_empty() {
            return Err(TabulationError::NoProgress { round });
        }

        // Candidates under the minimum vote threshold go first, as a batch.
        if self.rules.minimum_vote_threshold > 0
            && self.rules.winner_election_mode != WinnerElectionMode::BottomsUp
        {
            let floor = FixedWeight::from_count(self.rules.minimum_vote_threshold);
            let below: Vec<CandidateIndex> = members
                .iter()
                .copied()
                .filter(|&c| tally_of(tally, c) < floor)
                .collect();
            if below.len() == members.len() {
                return Err(TabulationError::NoProgress { round });
            }
            if !below.is_empty() {
                return Ok(below);
            }
        }

        // Batch elimination: the largest k whose k smallest tallies sum to
        // strictly less than the (k+1)-th smallest tally.
        if self.rules.batch_elimination && self.rules.winner_election_mode.single_winner_rounds() {
            let mut ascending = members.clone();
            ascending.sort_by(|a, b| tally_of(tally, *a).cmp(&tally_of(tally, *b)));
            let mut prefix = FixedWeight::ZERO;
            let mut best_k = 0usize;
            for k in 1..ascending.len() {
                prefix = self.arith.add(prefix, tally_of(tally, ascending[k - 1]))?;
                if prefix < tally_of(tally, ascending[k]) {
                    best_k = k;
                }
            }
            if best_k >= 1 {
                ascending.truncate(best_k);
                return Ok(ascending);
            }
        }

        // Single lowest, ties resolved toward elimination.
        let loser =
            self.pick_extreme(&members, tally, TieBreakDirection::SelectLowest, round, tie_breaks)?;
        Ok(vec![loser])
    }

    /// Continuing candidates in report order, optionally without the
    /// undeclared write-in (which is never elected).
    fn eligible(&self, exclude_uwi: bool) -> Vec<CandidateIndex> {
        self.continuing
            .members_in(self.report_order)
            .filter(|&c| !(exclude_uwi && self.registry.is_uwi(c)))
            .collect()
    }

    /// Picks the highest- or lowest-tally candidate from `candidates`,
    /// resolving ties with the tie breaker and recording the decision.
    fn pick_extreme(
        &mut self,
        candidates: &[CandidateIndex],
        tally: &BTreeMap<CandidateIndex, FixedWeight>,
        direction: TieBreakDirection,
        round: u32,
        tie_breaks: &mut Vec<TieBreakEvent>,
    ) -> TabResult<CandidateIndex> {
        let extreme = match direction {
            TieBreakDirection::SelectHighest => {
                candidates.iter().map(|&c| tally_of(tally, c)).max()
            }
            TieBreakDirection::SelectLowest => {
                candidates.iter().map(|&c| tally_of(tally, c)).min()
            }
        };
        let extreme = match extreme {
            Some(x) => x,
            None => return Err(TabulationError::NoProgress { round }),
        };
        let tied: Vec<CandidateIndex> = candidates
            .iter()
            .copied()
            .filter(|&c| tally_of(tally, c) == extreme)
            .collect();
        if tied.len() == 1 {
            return Ok(tied[0]);
        }
        let (chosen, reason) = self.tie_breaker.break_tie(
            &tied,
            direction,
            round,
            &self.tally_history,
            self.registry,
            self.oracle,
        )?;
        tie_breaks.push(TieBreakEvent {
            direction,
            tied: tied
                .iter()
                .map(|&c| self.registry.name_of(c).to_string())
                .collect(),
            selected: self.registry.name_of(chosen).to_string(),
            reason,
        });
        self.sink.emit(&TabulationEvent::TieBreakResolved {
            round,
            selected: self.registry.name_of(chosen).to_string(),
        });
        Ok(chosen)
    }
}

fn tally_of(tally: &BTreeMap<CandidateIndex, FixedWeight>, c: CandidateIndex) -> FixedWeight {
    tally.get(&c).copied().unwrap_or(FixedWeight::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MaxRankings, MaxSkippedRanks, OvervoteRule, TieBreakMode};
    use crate::record::{TransferKind, TabulationRecord};
    use crate::tiebreak::{TieBreakReason, TieBreakRequest};

    fn w(s: &str) -> FixedWeight {
        s.parse().unwrap()
    }

    fn n(x: u64) -> FixedWeight {
        FixedWeight::from_count(x)
    }

    fn candidates(names: &[&str]) -> Vec<Candidate> {
        names.iter().map(|s| Candidate::new(s)).collect()
    }

    fn ballots(lines: &[(&[&str], u64)]) -> Vec<ParsedBallot> {
        lines
            .iter()
            .map(|(choices, count)| ParsedBallot {
                count: Some(*count),
                choices: choices
                    .iter()
                    .map(|c| if c.is_empty() { vec![] } else { vec![c.to_string()] })
                    .collect(),
                ..ParsedBallot::default()
            })
            .collect()
    }

    fn run(
        lines: &[(&[&str], u64)],
        names: &[&str],
        rules: &TabulationRules,
    ) -> TabulationRecord {
        let record =
            run_tabulation(&ballots(lines), &candidates(names), rules, None, None).unwrap();
        assert_invariants(&record);
        record
    }

    /// Conservation and monotonicity over every committed round. The
    /// residue produced by a round's own surplus transfers is still inside
    /// the tallies displayed for that round, so the conservation sum uses
    /// the residue accumulated through the previous round; surplus weight
    /// parked behind a staggered transfer is accounted by the round's
    /// `pending_surplus`.
    fn assert_invariants(record: &TabulationRecord) {
        let arith = VoteArithmetic::new(20);
        let total = record.total_initial_weight;
        let mut prev_pass = 0;
        let mut prev_residual = FixedWeight::ZERO;
        let mut prev_exhausted = FixedWeight::ZERO;
        for round in &record.rounds {
            if round.pass != prev_pass {
                prev_pass = round.pass;
                prev_residual = FixedWeight::ZERO;
                prev_exhausted = FixedWeight::ZERO;
            }
            let tally_sum = arith.sum(round.tally.iter().map(|(_, w)| *w)).unwrap();
            let accounted = arith
                .add(
                    arith.add(tally_sum, round.cumulative_exhausted.total).unwrap(),
                    arith.add(prev_residual, round.pending_surplus).unwrap(),
                )
                .unwrap();
            assert_eq!(
                accounted, total,
                "conservation failed at pass {} round {}",
                round.pass, round.round
            );
            assert!(round.cumulative_exhausted.total >= prev_exhausted);
            assert!(round.cumulative_residual >= prev_residual);
            prev_residual = round.cumulative_residual;
            prev_exhausted = round.cumulative_exhausted.total;
        }
    }

    #[test]
    fn majority_winner_in_round_one() {
        let mut rules = TabulationRules::DEFAULT_RULES;
        rules.overvote_rule = OvervoteRule::ExhaustImmediately;
        let record = run(&[(&["A"], 5)], &["A", "B", "C"], &rules);
        assert_eq!(record.rounds.len(), 1);
        let round = &record.rounds[0];
        assert_eq!(round.threshold, n(3));
        assert_eq!(round.elected, vec!["A".to_string()]);
        assert_eq!(round.tally, vec![("A".to_string(), n(5)), ("B".to_string(), n(0)), ("C".to_string(), n(0))]);
        assert_eq!(record.winners, vec!["A".to_string()]);
    }

    #[test]
    fn two_round_elimination_with_transfer() {
        let mut rules = TabulationRules::DEFAULT_RULES;
        rules.candidate_permutation = vec!["A".to_string(), "B".to_string(), "C".to_string()];
        let record = run(
            &[(&["A", "C"], 3), (&["B", "C"], 2), (&["C", "A"], 2)],
            &["A", "B", "C"],
            &rules,
        );
        assert_eq!(record.rounds.len(), 2);

        let first = &record.rounds[0];
        assert_eq!(first.threshold, n(4));
        assert!(first.elected.is_empty());
        assert_eq!(first.eliminated, vec!["B".to_string()]);
        assert_eq!(first.tie_breaks.len(), 1);
        assert_eq!(first.tie_breaks[0].selected, "B");
        assert_eq!(first.tie_breaks[0].direction, TieBreakDirection::SelectLowest);
        assert_eq!(first.tie_breaks[0].reason, TieBreakReason::Permutation);
        assert_eq!(first.transfers.len(), 1);
        assert_eq!(first.transfers[0].from, "B");
        assert_eq!(first.transfers[0].kind, TransferKind::Elimination);
        assert_eq!(first.transfers[0].transfers, vec![("C".to_string(), n(2))]);
        assert_eq!(first.transfers[0].exhausted, FixedWeight::ZERO);

        let second = &record.rounds[1];
        assert_eq!(second.tally, vec![("A".to_string(), n(3)), ("C".to_string(), n(4))]);
        assert_eq!(second.elected, vec!["C".to_string()]);
        assert_eq!(record.winners, vec!["C".to_string()]);
    }

    #[test]
    fn standard_stv_surplus_transfer() {
        let mut rules = TabulationRules::DEFAULT_RULES;
        rules.winner_election_mode = WinnerElectionMode::StandardStv;
        rules.number_of_winners = 2;
        let record = run(&[(&["A", "B"], 6), (&["B", "A"], 4)], &["A", "B"], &rules);
        assert_eq!(record.rounds.len(), 1);

        let round = &record.rounds[0];
        assert_eq!(round.threshold, n(4));
        assert_eq!(round.elected, vec!["A".to_string(), "B".to_string()]);
        assert_eq!(record.winners, vec!["A".to_string(), "B".to_string()]);
        // Only A carries a surplus; 2/6 truncates to 0.3333 at scale 4.
        assert_eq!(round.transfers.len(), 1);
        assert_eq!(round.transfers[0].from, "A");
        assert_eq!(round.transfers[0].kind, TransferKind::Surplus { fraction: w("0.3333") });
        assert_eq!(round.transfers[0].exhausted, w("1.9998"));
        assert_eq!(round.residual, w("0.0002"));
        assert_eq!(round.cumulative_residual, w("0.0002"));
    }

    #[test]
    fn skipped_ranks_exhaust_in_round_one() {
        let mut rules = TabulationRules::DEFAULT_RULES;
        rules.max_skipped_ranks_allowed = MaxSkippedRanks::Limit(1);
        rules.max_rankings_allowed = MaxRankings::Limit(3);
        let record = run(
            &[(&["", "", "A"], 1), (&["A"], 2), (&["B"], 1)],
            &["A", "B"],
            &rules,
        );
        let round = &record.rounds[0];
        assert_eq!(round.exhausted.skipped_ranks, n(1));
        assert_eq!(round.exhausted.total, n(1));
        assert_eq!(round.tally, vec![("A".to_string(), n(2)), ("B".to_string(), n(1))]);
        assert_eq!(record.winners, vec!["A".to_string()]);
    }

    #[test]
    fn duplicate_ranking_exhausts_in_round_one() {
        let mut rules = TabulationRules::DEFAULT_RULES;
        rules.exhaust_on_duplicate_candidate = true;
        let record = run(
            &[(&["A", "A", "B"], 1), (&["A"], 2), (&["B"], 1)],
            &["A", "B"],
            &rules,
        );
        let round = &record.rounds[0];
        assert_eq!(round.exhausted.duplicate, n(1));
        assert_eq!(round.tally, vec![("A".to_string(), n(2)), ("B".to_string(), n(1))]);
    }

    #[test]
    fn continue_until_two_remain_keeps_eliminating() {
        let mut rules = TabulationRules::DEFAULT_RULES;
        rules.winner_election_mode = WinnerElectionMode::ContinueUntilTwoRemain;
        let record = run(&[(&["A"], 5), (&["B"], 1), (&["C"], 2)], &["A", "B", "C"], &rules);
        // A holds a majority in round 1, but tabulation still narrows the
        // field to two before declaring the winner.
        assert_eq!(record.rounds.len(), 2);
        assert_eq!(record.rounds[0].eliminated, vec!["B".to_string()]);
        assert!(record.rounds[0].elected.is_empty());
        assert_eq!(
            record.rounds[1].tally,
            vec![("A".to_string(), n(5)), ("C".to_string(), n(2))]
        );
        assert_eq!(record.rounds[1].exhausted.no_continuing, n(1));
        assert_eq!(record.winners, vec!["A".to_string()]);
    }

    #[test]
    fn undeclared_write_ins_never_win() {
        let mut rules = TabulationRules::DEFAULT_RULES;
        rules.undeclared_write_in_label = Some("UWI".to_string());
        let record = run(&[(&["UWI"], 4), (&["A"], 3), (&["B"], 2)], &["A", "B"], &rules);
        // The write-in bucket tops every round but cannot be elected.
        assert_eq!(record.rounds[0].eliminated, vec!["B".to_string()]);
        let last = record.final_round().unwrap();
        assert_eq!(
            last.tally,
            vec![("A".to_string(), n(3)), ("Undeclared Write-ins".to_string(), n(4))]
        );
        assert_eq!(record.winners, vec!["A".to_string()]);
    }

    #[test]
    fn minimum_vote_threshold_eliminates_as_a_batch() {
        let mut rules = TabulationRules::DEFAULT_RULES;
        rules.minimum_vote_threshold = 2;
        let record = run(
            &[(&["A"], 5), (&["B"], 4), (&["C"], 1), (&["D"], 1)],
            &["A", "B", "C", "D"],
            &rules,
        );
        assert_eq!(record.rounds[0].eliminated, vec!["C".to_string(), "D".to_string()]);
        assert_eq!(record.winners, vec!["A".to_string()]);
    }

    #[test]
    fn batch_elimination_removes_hopeless_candidates() {
        let mut rules = TabulationRules::DEFAULT_RULES;
        rules.batch_elimination = true;
        let record = run(
            &[(&["A"], 15), (&["B"], 8), (&["C"], 4), (&["D"], 2), (&["E"], 1)],
            &["A", "B", "C", "D", "E"],
            &rules,
        );
        // 1 < 2, 1+2 < 4, 1+2+4 < 8, but 1+2+4+8 = 15 is not < 15.
        assert_eq!(record.rounds.len(), 2);
        assert_eq!(
            record.rounds[0].eliminated,
            vec!["E".to_string(), "D".to_string(), "C".to_string()]
        );
        assert_eq!(record.winners, vec!["A".to_string()]);
    }

    #[test]
    fn bottoms_up_elects_the_survivors() {
        let mut rules = TabulationRules::DEFAULT_RULES;
        rules.winner_election_mode = WinnerElectionMode::BottomsUp;
        rules.number_of_winners = 2;
        let record = run(
            &[(&["A"], 4), (&["B"], 3), (&["C"], 2), (&["D"], 1)],
            &["A", "B", "C", "D"],
            &rules,
        );
        assert_eq!(record.rounds.len(), 3);
        assert_eq!(record.rounds[0].eliminated, vec!["D".to_string()]);
        assert_eq!(record.rounds[1].eliminated, vec!["C".to_string()]);
        assert_eq!(record.rounds[2].elected, vec!["A".to_string(), "B".to_string()]);
        assert!(record.rounds[2].transfers.is_empty());
        assert_eq!(record.winners, vec!["A".to_string(), "B".to_string()]);
    }

    #[test]
    fn sequential_passes_restart_without_prior_winners() {
        let mut rules = TabulationRules::DEFAULT_RULES;
        rules.winner_election_mode = WinnerElectionMode::Sequential;
        rules.number_of_winners = 2;
        let record = run(
            &[(&["A", "B"], 3), (&["B"], 2), (&["C"], 1)],
            &["A", "B", "C"],
            &rules,
        );
        assert_eq!(record.winners, vec!["A".to_string(), "B".to_string()]);
        let passes: Vec<(u32, u32)> = record.rounds.iter().map(|r| (r.pass, r.round)).collect();
        assert_eq!(passes, vec![(1, 1), (1, 2), (2, 1)]);
        // In pass 2 the ballots preferring A now count for B.
        assert_eq!(
            record.rounds[2].tally,
            vec![("B".to_string(), n(5)), ("C".to_string(), n(1))]
        );
    }

    #[test]
    fn overvote_at_first_rank_fills_the_overvote_bucket() {
        let mut rules = TabulationRules::DEFAULT_RULES;
        rules.overvote_rule = OvervoteRule::ExhaustImmediately;
        let mut lines = ballots(&[(&["A"], 2), (&["B"], 1)]);
        lines.push(ParsedBallot {
            count: Some(1),
            choices: vec![vec!["A".to_string(), "B".to_string()]],
            ..ParsedBallot::default()
        });
        let record =
            run_tabulation(&lines, &candidates(&["A", "B"]), &rules, None, None).unwrap();
        assert_invariants(&record);
        assert_eq!(record.rounds[0].exhausted.overvote, n(1));
    }

    #[test]
    fn one_winner_per_round_holds_winners_and_staggers_surpluses() {
        let mut rules = TabulationRules::DEFAULT_RULES;
        rules.winner_election_mode = WinnerElectionMode::StandardStv;
        rules.number_of_winners = 3;
        rules.allow_only_one_winner_per_round = true;
        let record = run(
            &[
                (&["A", "C"], 10),
                (&["B", "C"], 9),
                (&["C"], 3),
                (&["D", "C"], 2),
                (&["E"], 1),
            ],
            &["A", "B", "C", "D", "E"],
            &rules,
        );
        assert_eq!(record.rounds.len(), 2);

        // Round 1: threshold 7; A and B both reach quota and are both
        // elected in this round, but only A's surplus transfers now.
        let first = &record.rounds[0];
        assert_eq!(first.threshold, n(7));
        assert_eq!(first.elected, vec!["A".to_string(), "B".to_string()]);
        assert_eq!(first.transfers.len(), 1);
        assert_eq!(first.transfers[0].from, "A");
        assert_eq!(first.transfers[0].kind, TransferKind::Surplus { fraction: w("0.3") });
        assert_eq!(first.transfers[0].transfers, vec![("C".to_string(), n(3))]);
        assert!(first.pending_surplus.is_zero());

        // Round 2: B holds the threshold, its ballots sit out the tally,
        // and its surplus is the round's one transfer.
        let second = &record.rounds[1];
        assert_eq!(second.pending_surplus, n(2));
        assert_eq!(
            second.tally,
            vec![
                ("A".to_string(), n(7)),
                ("B".to_string(), n(7)),
                ("C".to_string(), n(6)),
                ("D".to_string(), n(2)),
                ("E".to_string(), n(1)),
            ]
        );
        assert_eq!(second.elected, vec!["C".to_string()]);
        assert_eq!(second.transfers.len(), 1);
        assert_eq!(second.transfers[0].from, "B");
        assert_eq!(record.winners, vec!["A".to_string(), "B".to_string(), "C".to_string()]);
    }

    #[test]
    fn multi_round_stv_conserves_weight_through_surpluses() {
        let mut rules = TabulationRules::DEFAULT_RULES;
        rules.winner_election_mode = WinnerElectionMode::StandardStv;
        rules.number_of_winners = 2;
        let record = run(
            &[(&["A", "B"], 7), (&["B"], 3), (&["C"], 4), (&["D"], 3)],
            &["A", "B", "C", "D"],
            &rules,
        );
        let first = &record.rounds[0];
        assert_eq!(first.threshold, n(6));
        assert_eq!(first.elected, vec!["A".to_string()]);
        assert_eq!(first.transfers[0].kind, TransferKind::Surplus { fraction: w("0.1428") });
        assert_eq!(first.transfers[0].transfers, vec![("B".to_string(), w("0.9996"))]);
        assert_eq!(first.residual, w("0.0004"));

        let second = &record.rounds[1];
        // A holds the threshold it was elected with.
        assert_eq!(second.tally[0], ("A".to_string(), n(6)));
        assert_eq!(record.winners[0], "A".to_string());
        assert_eq!(record.winners.len(), 2);
    }

    #[test]
    fn identical_inputs_yield_identical_records() {
        let mut rules = TabulationRules::DEFAULT_RULES;
        rules.tie_break_mode = TieBreakMode::Random;
        rules.random_seed = Some(1234);
        let lines: &[(&[&str], u64)] = &[(&["A"], 2), (&["B"], 2), (&["C"], 2), (&["D"], 2)];
        let names = &["A", "B", "C", "D"];
        let first = run(lines, names, &rules);
        let second = run(lines, names, &rules);
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
        assert!(!first.rounds.is_empty());
    }

    #[test]
    fn generated_permutation_replays_as_configured_permutation() {
        let mut generated = TabulationRules::DEFAULT_RULES;
        generated.tie_break_mode = TieBreakMode::GeneratePermutation;
        generated.random_seed = Some(98);
        let lines: &[(&[&str], u64)] = &[(&["Alice"], 2), (&["Bob"], 2), (&["Carol"], 1)];
        let names = &["Alice", "Bob", "Carol"];
        let first = run(lines, names, &generated);
        let permutation = first.candidate_permutation.clone().unwrap();

        let mut replay = TabulationRules::DEFAULT_RULES;
        replay.tie_break_mode = TieBreakMode::UsePermutationInConfig;
        replay.candidate_permutation = permutation.clone();
        let second = run(lines, names, &replay);
        assert_eq!(second.candidate_permutation, Some(permutation));
        assert_eq!(first.rounds, second.rounds);
        assert_eq!(first.winners, second.winners);
    }

    struct ScriptedOracle(Option<&'static str>);

    impl TieBreakOracle for ScriptedOracle {
        fn pick(&mut self, request: &TieBreakRequest) -> Option<String> {
            assert!(!request.tied.is_empty());
            self.0.map(str::to_string)
        }
    }

    #[test]
    fn oracle_decision_is_recorded() {
        let mut rules = TabulationRules::DEFAULT_RULES;
        rules.tie_break_mode = TieBreakMode::StopCountingAndAsk;
        let mut oracle = ScriptedOracle(Some("B"));
        let record = run_tabulation(
            &ballots(&[(&["A"], 1), (&["B"], 1)]),
            &candidates(&["A", "B"]),
            &rules,
            Some(&mut oracle),
            None,
        )
        .unwrap();
        assert_eq!(record.winners, vec!["B".to_string()]);
        assert_eq!(record.rounds[0].tie_breaks[0].reason, TieBreakReason::Oracle);
    }

    #[test]
    fn cancelled_oracle_terminates_abnormally() {
        let mut rules = TabulationRules::DEFAULT_RULES;
        rules.tie_break_mode = TieBreakMode::Interactive;
        let mut oracle = ScriptedOracle(None);
        let record = run_tabulation(
            &ballots(&[(&["A"], 1), (&["B"], 1)]),
            &candidates(&["A", "B"]),
            &rules,
            Some(&mut oracle),
            None,
        )
        .unwrap();
        assert!(!record.is_complete());
        let abnormal = record.abnormal_termination.unwrap();
        assert_eq!(abnormal.kind, "tie_break_cancelled");
        assert_eq!(abnormal.round, 1);
        assert!(record.winners.is_empty());
    }

    #[test]
    fn configuration_errors_abort_before_round_one() {
        let mut sequential = TabulationRules::DEFAULT_RULES;
        sequential.winner_election_mode = WinnerElectionMode::Sequential;
        sequential.number_of_winners = 1;
        let err = run_tabulation(
            &ballots(&[(&["A"], 1)]),
            &candidates(&["A", "B"]),
            &sequential,
            None,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, TabulationError::ConfigInvalid { .. }));

        let mut interactive = TabulationRules::DEFAULT_RULES;
        interactive.tie_break_mode = TieBreakMode::Interactive;
        let err = run_tabulation(
            &ballots(&[(&["A"], 1)]),
            &candidates(&["A", "B"]),
            &interactive,
            None,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, TabulationError::ConfigInvalid { .. }));

        let err = run_tabulation(
            &ballots(&[(&["Mystery"], 1)]),
            &candidates(&["A", "B"]),
            &TabulationRules::DEFAULT_RULES,
            None,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, TabulationError::UnrecognizedCandidate { .. }));
    }

    #[test]
    fn builder_assembles_and_tabulates() {
        let mut builder = Builder::new(&TabulationRules::DEFAULT_RULES)
            .candidates(&["Anna".to_string(), "Bob".to_string()]);
        builder.add_ballot_simple(&["Anna".to_string(), "Bob".to_string()]);
        builder.add_ballot_simple(&["Anna".to_string()]);
        builder.add_ballot_simple(&["Bob".to_string()]);
        let record = builder.tabulate().unwrap();
        assert_eq!(record.winners, vec!["Anna".to_string()]);
        assert_eq!(record.total_initial_weight, n(3));
    }
}
