//! Tie-break resolution.
//!
//! Ties among high candidates (winner selection) or low candidates
//! (elimination) are resolved by the configured mode. The pseudo-random
//! source is SplitMix64 seeded with `randomSeed`, consumed through rejection
//! sampling, so that every implementation of these rules draws identical
//! sequences. Every decision is reported back to the caller for the
//! tabulation record.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::arithmetic::FixedWeight;
use crate::config::TieBreakMode;
use crate::errors::{TabResult, TabulationError};
use crate::registry::{CandidateIndex, CandidateRegistry};

/// SplitMix64 (Steele, Lea & Flood), the audit-reproducible PRNG used for
/// random tie-breaks and permutation generation.
#[derive(Debug, Clone)]
pub(crate) struct SplitMix64 {
    state: u64,
}

impl SplitMix64 {
    pub(crate) fn new(seed: u64) -> SplitMix64 {
        SplitMix64 { state: seed }
    }

    pub(crate) fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }

    /// Uniform draw from `0..n` by rejection sampling.
    pub(crate) fn pick(&mut self, n: u64) -> u64 {
        debug_assert!(n > 0);
        let limit = u64::MAX - (u64::MAX % n);
        loop {
            let x = self.next_u64();
            if x < limit {
                return x % n;
            }
        }
    }

    /// Fisher-Yates shuffle driven by rejection-sampled draws.
    pub(crate) fn shuffle(&mut self, items: &mut [CandidateIndex]) {
        for i in (1..items.len()).rev() {
            let j = self.pick((i + 1) as u64) as usize;
            items.swap(i, j);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreakDirection {
    /// Winner ties: pick the candidate to elect.
    SelectHighest,
    /// Elimination ties: pick the candidate to eliminate.
    SelectLowest,
}

/// How a tie-break decision was reached, reported for audit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreakReason {
    Oracle,
    Random,
    /// Resolved by the tallies of an earlier round.
    PreviousRoundCounts { round: u32 },
    Permutation,
}

/// The question posed to an external oracle in interactive modes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TieBreakRequest {
    pub round: u32,
    pub direction: TieBreakDirection,
    /// Codes of the tied candidates, in report order.
    pub tied: Vec<String>,
    /// Current-round tallies of the tied candidates.
    pub tallies: Vec<(String, FixedWeight)>,
}

/// External decision point for interactive tie-break modes. The engine
/// blocks on this call; answering with `None` (or with a code outside the
/// tied set) cancels the whole tabulation.
pub trait TieBreakOracle {
    fn pick(&mut self, request: &TieBreakRequest) -> Option<String>;
}

pub(crate) struct TieBreaker {
    mode: TieBreakMode,
    rng: SplitMix64,
    /// Candidate index -> position in the audit permutation, for the
    /// permutation-based modes.
    permutation_rank: Option<Vec<u32>>,
}

impl TieBreaker {
    pub(crate) fn new(
        mode: TieBreakMode,
        random_seed: Option<u64>,
        permutation: Option<&[CandidateIndex]>,
        universe: usize,
    ) -> TieBreaker {
        let permutation_rank = permutation.map(|order| {
            let mut rank = vec![0u32; universe];
            for (pos, &CandidateIndex(i)) in order.iter().enumerate() {
                rank[i as usize] = pos as u32;
            }
            rank
        });
        TieBreaker {
            mode,
            rng: SplitMix64::new(random_seed.unwrap_or(0)),
            permutation_rank,
        }
    }

    /// Resolves a tie among `tied` (report order, at least two entries).
    pub(crate) fn break_tie(
        &mut self,
        tied: &[CandidateIndex],
        direction: TieBreakDirection,
        round: u32,
        tally_history: &[BTreeMap<CandidateIndex, FixedWeight>],
        registry: &CandidateRegistry,
        oracle: &mut Option<&mut dyn TieBreakOracle>,
    ) -> TabResult<(CandidateIndex, TieBreakReason)> {
        debug_assert!(tied.len() >= 2);
        match self.mode {
            TieBreakMode::Interactive | TieBreakMode::StopCountingAndAsk => {
                self.ask_oracle(tied, direction, round, tally_history, registry, oracle)
            }
            TieBreakMode::UsePermutationInConfig | TieBreakMode::GeneratePermutation => {
                Ok((self.pick_by_permutation(tied, direction), TieBreakReason::Permutation))
            }
            TieBreakMode::Random => {
                let choice = tied[self.rng.pick(tied.len() as u64) as usize];
                Ok((choice, TieBreakReason::Random))
            }
            TieBreakMode::PreviousRoundCountsThenRandom => {
                Ok(self.walk_previous_rounds(tied, direction, round, tally_history))
            }
        }
    }

    fn pick_by_permutation(
        &self,
        tied: &[CandidateIndex],
        direction: TieBreakDirection,
    ) -> CandidateIndex {
        let rank = match &self.permutation_rank {
            Some(rank) => rank,
            None => unreachable!("permutation tie-break mode without a permutation"),
        };
        let choice = match direction {
            TieBreakDirection::SelectLowest => {
                tied.iter().copied().min_by_key(|c| rank[c.0 as usize])
            }
            TieBreakDirection::SelectHighest => {
                tied.iter().copied().max_by_key(|c| rank[c.0 as usize])
            }
        };
        match choice {
            Some(c) => c,
            None => unreachable!("tie-break invoked with an empty tied set"),
        }
    }

    /// Walks back through earlier rounds, keeping only the extrema of the
    /// tied set at the first round that separates them, then narrowing
    /// further round by round; candidates tied all the way back to round 1
    /// fall to a random pick.
    fn walk_previous_rounds(
        &mut self,
        tied: &[CandidateIndex],
        direction: TieBreakDirection,
        round: u32,
        tally_history: &[BTreeMap<CandidateIndex, FixedWeight>],
    ) -> (CandidateIndex, TieBreakReason) {
        let mut set: Vec<CandidateIndex> = tied.to_vec();
        for prior in (1..round).rev() {
            let tallies = &tally_history[(prior - 1) as usize];
            let value = |c: &CandidateIndex| tallies.get(c).copied().unwrap_or(FixedWeight::ZERO);
            let extremum = match direction {
                TieBreakDirection::SelectLowest => set.iter().map(value).min(),
                TieBreakDirection::SelectHighest => set.iter().map(value).max(),
            };
            let extremum = match extremum {
                Some(x) => x,
                None => unreachable!("tie-break invoked with an empty tied set"),
            };
            set.retain(|c| value(c) == extremum);
            if set.len() == 1 {
                return (set[0], TieBreakReason::PreviousRoundCounts { round: prior });
            }
        }
        let choice = set[self.rng.pick(set.len() as u64) as usize];
        (choice, TieBreakReason::Random)
    }

    fn ask_oracle(
        &self,
        tied: &[CandidateIndex],
        direction: TieBreakDirection,
        round: u32,
        tally_history: &[BTreeMap<CandidateIndex, FixedWeight>],
        registry: &CandidateRegistry,
        oracle: &mut Option<&mut dyn TieBreakOracle>,
    ) -> TabResult<(CandidateIndex, TieBreakReason)> {
        let oracle = match oracle {
            Some(oracle) => oracle,
            None => return Err(TabulationError::TieBreakCancelled { round }),
        };
        let current = tally_history.last();
        let request = TieBreakRequest {
            round,
            direction,
            tied: tied.iter().map(|&c| registry.code_of(c).to_string()).collect(),
            tallies: tied
                .iter()
                .map(|&c| {
                    let tally = current
                        .and_then(|t| t.get(&c).copied())
                        .unwrap_or(FixedWeight::ZERO);
                    (registry.code_of(c).to_string(), tally)
                })
                .collect(),
        };
        let answer = oracle.pick(&request);
        let chosen = answer.and_then(|code| {
            tied.iter().copied().find(|&c| registry.code_of(c) == code)
        });
        match chosen {
            Some(c) => Ok((c, TieBreakReason::Oracle)),
            None => Err(TabulationError::TieBreakCancelled { round }),
        }
    }
}
