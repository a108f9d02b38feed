//! Structured progress events.
//!
//! The engine reports progress through a sink owned by the caller instead of
//! writing to a global logger; the default sink discards everything, and
//! [`LogSink`] forwards to the `log` facade for callers that just want the
//! classic textual trace.

use log::info;

use crate::arithmetic::FixedWeight;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TabulationEvent {
    TabulationBegan {
        candidates: usize,
        ballots: usize,
        total_weight: FixedWeight,
    },
    /// Emitted once per sequential restart; not emitted otherwise.
    PassBegan { pass: u32 },
    RoundTallied {
        round: u32,
        active: FixedWeight,
        threshold: FixedWeight,
    },
    CandidateElected {
        round: u32,
        name: String,
        tally: FixedWeight,
    },
    CandidateEliminated {
        round: u32,
        name: String,
        tally: FixedWeight,
    },
    TieBreakResolved {
        round: u32,
        selected: String,
    },
    TabulationEnded {
        rounds: u32,
        winners: Vec<String>,
    },
}

pub trait EventSink {
    fn emit(&mut self, event: &TabulationEvent);
}

/// Discards every event.
#[derive(Debug, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&mut self, _event: &TabulationEvent) {}
}

/// Forwards events to the `log` facade.
#[derive(Debug, Default)]
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&mut self, event: &TabulationEvent) {
        match event {
            TabulationEvent::TabulationBegan { candidates, ballots, total_weight } => {
                info!(
                    "Tabulating {} ballots (weight {}) over {} candidates",
                    ballots, total_weight, candidates
                );
            }
            TabulationEvent::PassBegan { pass } => info!("Starting pass {}", pass),
            TabulationEvent::RoundTallied { round, active, threshold } => {
                info!("Round {} (active votes: {}, winning threshold: {})", round, active, threshold);
            }
            TabulationEvent::CandidateElected { round, name, tally } => {
                info!("Round {}: {} elected with {}", round, name, tally);
            }
            TabulationEvent::CandidateEliminated { round, name, tally } => {
                info!("Round {}: {} eliminated with {}", round, name, tally);
            }
            TabulationEvent::TieBreakResolved { round, selected } => {
                info!("Round {}: tie resolved in favor of {}", round, selected);
            }
            TabulationEvent::TabulationEnded { rounds, winners } => {
                info!("Tabulation complete after {} rounds, winners: {:?}", rounds, winners);
            }
        }
    }
}
