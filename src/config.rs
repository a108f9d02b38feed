//! Contest rules and candidate declarations.
//!
//! The rule vocabulary follows the configuration options defined by the
//! RCTab contest configuration format:
//! <https://github.com/BrightSpots/rcv/blob/develop/config_file_documentation.txt>
//!
//! String labels from configuration files are resolved to the closed
//! enumerations below through an explicit parse step; an unknown label is a
//! configuration error, never a runtime fallback.

use crate::errors::{ConfigInvalidSnafu, TabResult};
use snafu::ensure;

pub const MIN_DECIMAL_PLACES_FOR_VOTE_ARITHMETIC: u32 = 1;
pub const MAX_DECIMAL_PLACES_FOR_VOTE_ARITHMETIC: u32 = 20;
pub const MAX_MINIMUM_VOTE_THRESHOLD: u64 = 1_000_000;

/// How a rank holding more than one mark is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OvervoteRule {
    ExhaustImmediately,
    AlwaysSkipToNextRank,
    ExhaustIfMultipleContinuing,
}

impl OvervoteRule {
    pub fn parse_label(label: &str) -> TabResult<OvervoteRule> {
        match label {
            "exhaustImmediately" => Ok(OvervoteRule::ExhaustImmediately),
            "alwaysSkipToNextRank" => Ok(OvervoteRule::AlwaysSkipToNextRank),
            "exhaustIfMultipleContinuing" => Ok(OvervoteRule::ExhaustIfMultipleContinuing),
            other => ConfigInvalidSnafu {
                message: format!("unknown overvote rule: {}", other),
            }
            .fail(),
        }
    }
}

/// How ties among high candidates (winner selection) or low candidates
/// (elimination) are resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TieBreakMode {
    /// Delegate to an external oracle and wait for its decision.
    Interactive,
    /// Uniform pick from the tied set, seeded by `random_seed`.
    Random,
    /// Walk back through earlier round tallies, falling back to a random
    /// pick if the candidates were tied in every round.
    PreviousRoundCountsThenRandom,
    /// Pick by position in the permutation supplied in the rules.
    UsePermutationInConfig,
    /// Pick by position in a permutation generated once, by seeded shuffle,
    /// at the start of tabulation.
    GeneratePermutation,
    /// Same contract as `Interactive`.
    StopCountingAndAsk,
}

impl TieBreakMode {
    pub fn parse_label(label: &str) -> TabResult<TieBreakMode> {
        match label {
            "interactive" => Ok(TieBreakMode::Interactive),
            "random" => Ok(TieBreakMode::Random),
            "previousRoundCountsThenRandom" => Ok(TieBreakMode::PreviousRoundCountsThenRandom),
            "usePermutationInConfig" => Ok(TieBreakMode::UsePermutationInConfig),
            "generatePermutation" => Ok(TieBreakMode::GeneratePermutation),
            "stopCountingAndAsk" => Ok(TieBreakMode::StopCountingAndAsk),
            other => ConfigInvalidSnafu {
                message: format!("unknown tie-break mode: {}", other),
            }
            .fail(),
        }
    }

    /// Whether the mode consumes the seeded pseudo-random source.
    pub fn needs_random_seed(&self) -> bool {
        matches!(
            self,
            TieBreakMode::Random
                | TieBreakMode::PreviousRoundCountsThenRandom
                | TieBreakMode::GeneratePermutation
        )
    }

    /// Whether candidate ordering (and reporting) follows a permutation.
    pub fn uses_permutation(&self) -> bool {
        matches!(
            self,
            TieBreakMode::UsePermutationInConfig | TieBreakMode::GeneratePermutation
        )
    }

    pub fn is_interactive(&self) -> bool {
        matches!(self, TieBreakMode::Interactive | TieBreakMode::StopCountingAndAsk)
    }
}

/// The winner selection variant of the contest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WinnerElectionMode {
    /// Instant-runoff to a single majority winner.
    SingleWinner,
    /// Multi-winner STV with fractional surplus transfer.
    StandardStv,
    /// Repeated single-winner passes, removing each winner before the next.
    Sequential,
    /// Eliminate from the bottom until only `number_of_winners` remain.
    BottomsUp,
    /// Single winner, but keep eliminating until two candidates remain.
    ContinueUntilTwoRemain,
}

impl WinnerElectionMode {
    pub fn parse_label(label: &str) -> TabResult<WinnerElectionMode> {
        match label {
            "singleWinner" => Ok(WinnerElectionMode::SingleWinner),
            "standardSTV" => Ok(WinnerElectionMode::StandardStv),
            "sequential" => Ok(WinnerElectionMode::Sequential),
            "bottomsUp" => Ok(WinnerElectionMode::BottomsUp),
            "continueUntilTwoRemain" => Ok(WinnerElectionMode::ContinueUntilTwoRemain),
            other => ConfigInvalidSnafu {
                message: format!("unknown winner election mode: {}", other),
            }
            .fail(),
        }
    }

    /// True for the modes whose rounds follow single-winner semantics
    /// (including each pass of a sequential contest).
    pub fn single_winner_rounds(&self) -> bool {
        matches!(
            self,
            WinnerElectionMode::SingleWinner
                | WinnerElectionMode::Sequential
                | WinnerElectionMode::ContinueUntilTwoRemain
        )
    }
}

/// Bound on how many rank positions of a ballot are considered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaxRankings {
    /// As many ranks as there are declared candidates.
    NumCandidates,
    Limit(u32),
}

impl MaxRankings {
    pub fn parse_label(label: &str) -> TabResult<MaxRankings> {
        if label == "max" {
            return Ok(MaxRankings::NumCandidates);
        }
        match label.parse::<u32>() {
            Ok(n) => Ok(MaxRankings::Limit(n)),
            Err(_) => ConfigInvalidSnafu {
                message: format!("maxRankingsAllowed must be \"max\" or an integer: {}", label),
            }
            .fail(),
        }
    }
}

/// Bound on consecutive skipped ranks before a ballot exhausts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaxSkippedRanks {
    Unlimited,
    Limit(u32),
}

impl MaxSkippedRanks {
    pub fn parse_label(label: &str) -> TabResult<MaxSkippedRanks> {
        if label == "unlimited" {
            return Ok(MaxSkippedRanks::Unlimited);
        }
        match label.parse::<u32>() {
            Ok(n) => Ok(MaxSkippedRanks::Limit(n)),
            Err(_) => ConfigInvalidSnafu {
                message: format!(
                    "maxSkippedRanksAllowed must be \"unlimited\" or an integer: {}",
                    label
                ),
            }
            .fail(),
        }
    }
}

/// A declared candidate. The code is the stable identifier used on ballots;
/// it defaults to the display name when absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub name: String,
    pub code: Option<String>,
    pub excluded: bool,
}

impl Candidate {
    pub fn new(name: &str) -> Candidate {
        Candidate {
            name: name.to_string(),
            code: None,
            excluded: false,
        }
    }
}

/// The complete rule set for one contest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabulationRules {
    pub overvote_rule: OvervoteRule,
    pub tie_break_mode: TieBreakMode,
    pub winner_election_mode: WinnerElectionMode,
    pub number_of_winners: u32,
    pub decimal_places_for_vote_arithmetic: u32,
    /// Candidates below this tally are batch-eliminated. Zero disables.
    pub minimum_vote_threshold: u64,
    pub max_rankings_allowed: MaxRankings,
    pub max_skipped_ranks_allowed: MaxSkippedRanks,
    /// Required whenever the tie-break mode has a random element.
    pub random_seed: Option<u64>,
    /// Candidate codes in tie-break order, for `UsePermutationInConfig`.
    /// Empty means the declaration order of the candidates.
    pub candidate_permutation: Vec<String>,
    pub batch_elimination: bool,
    pub hare_quota: bool,
    pub non_integer_winning_threshold: bool,
    pub allow_only_one_winner_per_round: bool,
    pub exhaust_on_duplicate_candidate: bool,
    pub treat_blank_as_undeclared_write_in: bool,
    /// Map ballot marks that resolve to no declared candidate to the
    /// undeclared write-in instead of rejecting the tabulation.
    pub treat_unrecognized_as_undeclared_write_in: bool,
    /// Labels are matched case-sensitively against raw ballot marks.
    pub undeclared_write_in_label: Option<String>,
    pub overvote_label: Option<String>,
    pub undervote_label: Option<String>,
    pub rules_description: Option<String>,
}

impl TabulationRules {
    pub const DEFAULT_RULES: TabulationRules = TabulationRules {
        overvote_rule: OvervoteRule::AlwaysSkipToNextRank,
        tie_break_mode: TieBreakMode::UsePermutationInConfig,
        winner_election_mode: WinnerElectionMode::SingleWinner,
        number_of_winners: 1,
        decimal_places_for_vote_arithmetic: 4,
        minimum_vote_threshold: 0,
        max_rankings_allowed: MaxRankings::NumCandidates,
        max_skipped_ranks_allowed: MaxSkippedRanks::Unlimited,
        random_seed: None,
        candidate_permutation: Vec::new(),
        batch_elimination: false,
        hare_quota: false,
        non_integer_winning_threshold: false,
        allow_only_one_winner_per_round: false,
        exhaust_on_duplicate_candidate: false,
        treat_blank_as_undeclared_write_in: false,
        treat_unrecognized_as_undeclared_write_in: false,
        undeclared_write_in_label: None,
        overvote_label: None,
        undervote_label: None,
        rules_description: None,
    };

    /// Whether the rules call for an undeclared write-in tally bucket.
    pub fn uses_undeclared_write_in(&self) -> bool {
        self.undeclared_write_in_label.is_some()
            || self.treat_blank_as_undeclared_write_in
            || self.treat_unrecognized_as_undeclared_write_in
    }

    /// Cross-field validation, performed before round 1.
    pub fn validate(&self, num_declared_candidates: usize) -> TabResult<()> {
        ensure!(
            (MIN_DECIMAL_PLACES_FOR_VOTE_ARITHMETIC..=MAX_DECIMAL_PLACES_FOR_VOTE_ARITHMETIC)
                .contains(&self.decimal_places_for_vote_arithmetic),
            ConfigInvalidSnafu {
                message: format!(
                    "decimalPlacesForVoteArithmetic must be from {} to {}",
                    MIN_DECIMAL_PLACES_FOR_VOTE_ARITHMETIC, MAX_DECIMAL_PLACES_FOR_VOTE_ARITHMETIC
                ),
            }
        );
        ensure!(
            self.minimum_vote_threshold <= MAX_MINIMUM_VOTE_THRESHOLD,
            ConfigInvalidSnafu {
                message: format!(
                    "minimumVoteThreshold must be at most {}",
                    MAX_MINIMUM_VOTE_THRESHOLD
                ),
            }
        );
        ensure!(
            self.number_of_winners >= 1
                && self.number_of_winners as usize <= num_declared_candidates,
            ConfigInvalidSnafu {
                message:
                    "numberOfWinners must be at least 1 and no more than the number of declared candidates"
                        .to_string(),
            }
        );
        if let MaxRankings::Limit(n) = self.max_rankings_allowed {
            ensure!(
                n >= 1,
                ConfigInvalidSnafu {
                    message: "maxRankingsAllowed must be 1 or higher".to_string(),
                }
            );
        }

        let multi_seat = matches!(
            self.winner_election_mode,
            WinnerElectionMode::StandardStv
                | WinnerElectionMode::Sequential
                | WinnerElectionMode::BottomsUp
        );
        if multi_seat {
            ensure!(
                self.number_of_winners >= 2,
                ConfigInvalidSnafu {
                    message: "multi-seat winner election modes require at least 2 winners"
                        .to_string(),
                }
            );
        } else {
            ensure!(
                self.number_of_winners == 1,
                ConfigInvalidSnafu {
                    message: "single-winner election modes require exactly 1 winner".to_string(),
                }
            );
        }

        if self.batch_elimination {
            ensure!(
                self.winner_election_mode.single_winner_rounds(),
                ConfigInvalidSnafu {
                    message: "batchElimination requires single-winner round semantics".to_string(),
                }
            );
        }
        for (flag, name) in [
            (self.hare_quota, "hareQuota"),
            (self.non_integer_winning_threshold, "nonIntegerWinningThreshold"),
            (self.allow_only_one_winner_per_round, "allowOnlyOneWinnerPerRound"),
        ] {
            if flag {
                ensure!(
                    self.winner_election_mode == WinnerElectionMode::StandardStv,
                    ConfigInvalidSnafu {
                        message: format!("{} is only valid with standardSTV", name),
                    }
                );
            }
        }

        if self.tie_break_mode.needs_random_seed() {
            ensure!(
                self.random_seed.is_some(),
                ConfigInvalidSnafu {
                    message:
                        "randomSeed must be supplied when the tie-break mode involves a random element"
                            .to_string(),
                }
            );
        }
        if self.overvote_label.is_some() {
            ensure!(
                matches!(
                    self.overvote_rule,
                    OvervoteRule::ExhaustImmediately | OvervoteRule::AlwaysSkipToNextRank
                ),
                ConfigInvalidSnafu {
                    message:
                        "overvoteLabel requires overvoteRule exhaustImmediately or alwaysSkipToNextRank"
                            .to_string(),
                }
            );
        }

        Ok(())
    }
}
