//! Ballot input model and normalization.
//!
//! External CVR readers deliver [`ParsedBallot`] values: raw mark strings
//! grouped by rank position, plus source identifiers. Normalization resolves
//! every mark against the candidate registry and the configured sentinel
//! labels, producing the compact indexed form the interpreter works on.

use std::collections::BTreeMap;

use log::debug;

use crate::config::TabulationRules;
use crate::errors::{TabResult, TabulationError};
use crate::registry::{CandidateIndex, CandidateRegistry};

/// One resolved mark on a ballot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BallotChoice {
    /// A mark for a declared candidate, by code or display name.
    Candidate(String),
    UndeclaredWriteIn,
    /// An explicit overvote sentinel recorded by the reader.
    Overvote,
    /// An explicit undervote sentinel; the rank counts as skipped.
    Undervote,
    /// An empty cell. Distinct from `Undervote` because rules may map
    /// blanks to the undeclared write-in.
    Blank,
}

impl BallotChoice {
    /// Classifies a raw mark against the configured sentinel labels.
    /// Labels are matched case-sensitively.
    pub fn classify(mark: &str, rules: &TabulationRules) -> BallotChoice {
        if mark.is_empty() {
            BallotChoice::Blank
        } else if rules.overvote_label.as_deref() == Some(mark) {
            BallotChoice::Overvote
        } else if rules.undervote_label.as_deref() == Some(mark) {
            BallotChoice::Undervote
        } else if rules.undeclared_write_in_label.as_deref() == Some(mark) {
            BallotChoice::UndeclaredWriteIn
        } else {
            BallotChoice::Candidate(mark.to_string())
        }
    }
}

/// A ballot as delivered by a CVR reader: raw mark strings per rank, in
/// ascending rank order. A rank with several marks is an overvote.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParsedBallot {
    /// Opaque source identifier (tabulator/batch/record composite).
    pub id: Option<String>,
    /// Ballot multiplicity; `None` means 1.
    pub count: Option<u64>,
    pub choices: Vec<Vec<String>>,
    /// Precinct label, carried for report writers.
    pub precinct: Option<String>,
    pub ballot_style: Option<String>,
}

/// Turns `(mark, rank)` pairs into dense rank cells. Rank positions are
/// 1-based and need not be contiguous; unmentioned positions become empty
/// cells.
pub fn assemble_ranks(marks: &[(String, u32)]) -> Vec<Vec<String>> {
    let max_rank = marks.iter().map(|(_, rank)| *rank).max().unwrap_or(0);
    let mut choices: Vec<Vec<String>> = vec![Vec::new(); max_rank as usize];
    for (mark, rank) in marks {
        if let Some(cell) = choices.get_mut((*rank - 1) as usize) {
            cell.push(mark.clone());
        }
    }
    choices
}

/// A builder for assembling a contest from raw strings.
///
/// ```
/// use ranked_tabulation::{Builder, TabulationRules};
///
/// let mut builder = Builder::new(&TabulationRules::DEFAULT_RULES)
///     .candidates(&["Anna".to_string(), "Bob".to_string()]);
/// builder.add_ballot_simple(&["Anna".to_string(), "Bob".to_string()]);
/// ```
pub struct Builder {
    pub(crate) rules: TabulationRules,
    pub(crate) candidates: Vec<crate::config::Candidate>,
    pub(crate) ballots: Vec<ParsedBallot>,
}

impl Builder {
    pub fn new(rules: &TabulationRules) -> Builder {
        Builder {
            rules: rules.clone(),
            candidates: Vec::new(),
            ballots: Vec::new(),
        }
    }

    /// Declares candidates by name, replacing any prior declaration.
    pub fn candidates(mut self, names: &[String]) -> Builder {
        self.candidates = names
            .iter()
            .map(|name| crate::config::Candidate::new(name))
            .collect();
        self
    }

    pub fn declare_candidate(&mut self, candidate: crate::config::Candidate) {
        self.candidates.push(candidate);
    }

    /// Adds one ballot with one mark per rank, the simplest case.
    pub fn add_ballot_simple(&mut self, choices: &[String]) {
        let cells = choices.iter().map(|c| vec![c.clone()]).collect();
        self.add_ballot(cells, 1);
    }

    /// Adds a ballot with arbitrary rank cells and a multiplicity.
    pub fn add_ballot(&mut self, choices: Vec<Vec<String>>, count: u64) {
        self.ballots.push(ParsedBallot {
            id: None,
            count: Some(count),
            choices,
            precinct: None,
            ballot_style: None,
        });
    }

    pub fn add_parsed(&mut self, ballot: ParsedBallot) {
        self.ballots.push(ballot);
    }
}

// ---- normalized form ----

/// One rank position after mark resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RankCell {
    /// No mark (undervote, blank, or skipped position).
    Empty,
    /// An explicit overvote sentinel; the mark identities are unknown.
    Overvote,
    /// One or more distinct candidate marks. More than one is an overvote
    /// whose members are known.
    Marks(Vec<CandidateIndex>),
}

#[derive(Debug, Clone)]
pub(crate) struct NormalizedBallot {
    pub(crate) id: String,
    pub(crate) count: u64,
    pub(crate) ranks: Vec<RankCell>,
    /// Rank index of the first cell that repeats an earlier-ranked
    /// candidate, if any.
    pub(crate) first_duplicate_rank: Option<usize>,
}

/// Resolves every parsed ballot against the registry and the sentinel
/// labels. Unrecognized codes reject the tabulation unless the rules remap
/// them to the undeclared write-in.
pub(crate) fn normalize_ballots(
    parsed: &[ParsedBallot],
    registry: &CandidateRegistry,
    rules: &TabulationRules,
) -> TabResult<Vec<NormalizedBallot>> {
    let mut ballots = Vec::with_capacity(parsed.len());
    let mut unrecognized: BTreeMap<String, u64> = BTreeMap::new();

    for (idx, pb) in parsed.iter().enumerate() {
        let count = pb.count.unwrap_or(1);
        let mut ranks = Vec::with_capacity(pb.choices.len());
        for cell_marks in &pb.choices {
            ranks.push(resolve_cell(cell_marks, registry, rules, count, &mut unrecognized));
        }
        let ballot = NormalizedBallot {
            id: pb
                .id
                .clone()
                .unwrap_or_else(|| format!("ballot-{:08}", idx + 1)),
            count,
            first_duplicate_rank: first_duplicate_rank(&ranks),
            ranks,
        };
        debug!("normalized ballot {}: {:?}", ballot.id, ballot.ranks);
        ballots.push(ballot);
    }

    if !unrecognized.is_empty() {
        return Err(TabulationError::UnrecognizedCandidate {
            codes: unrecognized.into_iter().collect(),
        });
    }
    Ok(ballots)
}

fn resolve_cell(
    marks: &[String],
    registry: &CandidateRegistry,
    rules: &TabulationRules,
    count: u64,
    unrecognized: &mut BTreeMap<String, u64>,
) -> RankCell {
    let mut resolved: Vec<CandidateIndex> = Vec::new();
    for mark in marks {
        match BallotChoice::classify(mark, rules) {
            BallotChoice::Undervote => {}
            BallotChoice::Blank => {
                if rules.treat_blank_as_undeclared_write_in {
                    if let Some(uwi) = registry.uwi() {
                        push_unique(&mut resolved, uwi);
                    }
                }
            }
            BallotChoice::Overvote => return RankCell::Overvote,
            BallotChoice::UndeclaredWriteIn => {
                // The registry carries a write-in slot whenever the label
                // is configured.
                if let Some(uwi) = registry.uwi() {
                    push_unique(&mut resolved, uwi);
                }
            }
            BallotChoice::Candidate(raw) => match registry.resolve(&raw) {
                Some(index) => push_unique(&mut resolved, index),
                None => match registry.uwi() {
                    Some(uwi) if rules.treat_unrecognized_as_undeclared_write_in => {
                        push_unique(&mut resolved, uwi)
                    }
                    _ => *unrecognized.entry(raw).or_insert(0) += count,
                },
            },
        }
    }
    if resolved.is_empty() {
        RankCell::Empty
    } else {
        RankCell::Marks(resolved)
    }
}

fn push_unique(resolved: &mut Vec<CandidateIndex>, index: CandidateIndex) {
    if !resolved.contains(&index) {
        resolved.push(index);
    }
}

fn first_duplicate_rank(ranks: &[RankCell]) -> Option<usize> {
    let mut seen: Vec<CandidateIndex> = Vec::new();
    for (rank, cell) in ranks.iter().enumerate() {
        if let RankCell::Marks(marks) = cell {
            if marks.iter().any(|m| seen.contains(m)) {
                return Some(rank);
            }
            seen.extend(marks.iter().copied());
        }
    }
    None
}
