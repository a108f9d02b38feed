//! Deterministic tabulation of ranked choice voting contests.
//!
//! This crate is the tabulation core of an RCV system: given normalized
//! ballots and a rule set, it runs the round-by-round elimination and
//! election procedure (single-winner IRV and the multi-winner STV variants)
//! and produces an immutable [`TabulationRecord`] naming one or more
//! winners. Cast vote record readers, configuration files, and report
//! rendering are external collaborators; the crate itself performs no I/O
//! and two runs over equal inputs produce bit-identical records.
//!
//! The quickest way in is the [`Builder`]:
//!
//! ```
//! use ranked_tabulation::{Builder, TabulationRules};
//!
//! let mut builder = Builder::new(&TabulationRules::DEFAULT_RULES)
//!     .candidates(&["Alice".to_string(), "Bob".to_string(), "Carol".to_string()]);
//! builder.add_ballot_simple(&["Alice".to_string(), "Bob".to_string()]);
//! builder.add_ballot_simple(&["Alice".to_string()]);
//! builder.add_ballot_simple(&["Bob".to_string(), "Carol".to_string()]);
//!
//! let record = builder.tabulate()?;
//! assert_eq!(record.winners, vec!["Alice".to_string()]);
//! # Ok::<(), ranked_tabulation::TabulationError>(())
//! ```
//!
//! Readers with their own ballot model call [`run_tabulation`] directly
//! with [`ParsedBallot`] values and a full [`TabulationRules`].

mod arithmetic;
mod ballot;
mod config;
mod engine;
mod errors;
mod events;
mod interpreter;
pub mod manual;
mod record;
mod registry;
mod threshold;
mod tiebreak;
mod transfer;

pub use arithmetic::FixedWeight;
pub use ballot::{assemble_ranks, BallotChoice, Builder, ParsedBallot};
pub use config::{
    Candidate, MaxRankings, MaxSkippedRanks, OvervoteRule, TabulationRules, TieBreakMode,
    WinnerElectionMode, MAX_DECIMAL_PLACES_FOR_VOTE_ARITHMETIC,
    MAX_MINIMUM_VOTE_THRESHOLD, MIN_DECIMAL_PLACES_FOR_VOTE_ARITHMETIC,
};
pub use engine::run_tabulation;
pub use errors::{TabResult, TabulationError};
pub use events::{EventSink, LogSink, NullSink, TabulationEvent};
pub use interpreter::ExhaustReason;
pub use record::{
    AbnormalTermination, ExhaustionBreakdown, RoundSnapshot, TabulationRecord, TieBreakEvent,
    TransferDetail, TransferKind,
};
pub use registry::UNDECLARED_WRITE_IN_NAME;
pub use tiebreak::{TieBreakDirection, TieBreakOracle, TieBreakReason, TieBreakRequest};
