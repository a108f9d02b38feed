//! Candidate registry.
//!
//! The engine works on compact candidate indices; the bijection between
//! index, stable code, and display name lives here and is used only at the
//! boundary (ballot resolution, tie-break requests, report snapshots).

use std::collections::{HashMap, HashSet};

use crate::config::{Candidate, TabulationRules};
use crate::errors::{ConfigInvalidSnafu, TabResult, TabulationError};

/// Display name reported for the undeclared write-in bucket.
pub const UNDECLARED_WRITE_IN_NAME: &str = "Undeclared Write-ins";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct CandidateIndex(pub(crate) u32);

#[derive(Debug, Clone)]
struct Entry {
    code: String,
    name: String,
    excluded: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct CandidateRegistry {
    entries: Vec<Entry>,
    by_code: HashMap<String, CandidateIndex>,
    uwi: Option<CandidateIndex>,
}

impl CandidateRegistry {
    pub(crate) fn build(
        candidates: &[Candidate],
        rules: &TabulationRules,
    ) -> TabResult<CandidateRegistry> {
        let mut entries: Vec<Entry> = Vec::with_capacity(candidates.len() + 1);
        let mut by_code: HashMap<String, CandidateIndex> = HashMap::new();
        let mut names_seen: HashSet<&str> = HashSet::new();

        for candidate in candidates {
            if candidate.name.is_empty() {
                return ConfigInvalidSnafu {
                    message: "a name is required for each candidate".to_string(),
                }
                .fail();
            }
            if !names_seen.insert(candidate.name.as_str()) {
                return ConfigInvalidSnafu {
                    message: format!("duplicate candidate name: {}", candidate.name),
                }
                .fail();
            }
            let code = candidate
                .code
                .as_deref()
                .filter(|c| !c.is_empty())
                .unwrap_or(candidate.name.as_str())
                .to_string();
            let index = CandidateIndex(entries.len() as u32);
            if by_code.insert(code.clone(), index).is_some() {
                return ConfigInvalidSnafu {
                    message: format!("duplicate candidate code: {}", code),
                }
                .fail();
            }
            entries.push(Entry {
                code,
                name: candidate.name.clone(),
                excluded: candidate.excluded,
            });
        }

        let mut uwi = None;
        if rules.uses_undeclared_write_in() {
            let label = rules
                .undeclared_write_in_label
                .clone()
                .unwrap_or_else(|| UNDECLARED_WRITE_IN_NAME.to_string());
            let index = CandidateIndex(entries.len() as u32);
            // The label may collide with a declared code; the declared
            // candidate wins and the label stops denoting a write-in.
            by_code.entry(label.clone()).or_insert(index);
            entries.push(Entry {
                code: label,
                name: UNDECLARED_WRITE_IN_NAME.to_string(),
                excluded: false,
            });
            uwi = Some(index);
        }

        let registry = CandidateRegistry { entries, by_code, uwi };
        let any_electable = registry
            .indices()
            .any(|i| !registry.is_excluded(i) && !registry.is_uwi(i));
        if !any_electable {
            return Err(TabulationError::NoCandidates);
        }
        Ok(registry)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Declared candidates, excluding the write-in sentinel.
    pub(crate) fn num_declared(&self) -> usize {
        self.entries.len() - usize::from(self.uwi.is_some())
    }

    pub(crate) fn uwi(&self) -> Option<CandidateIndex> {
        self.uwi
    }

    pub(crate) fn is_uwi(&self, index: CandidateIndex) -> bool {
        self.uwi == Some(index)
    }

    pub(crate) fn is_excluded(&self, index: CandidateIndex) -> bool {
        self.entries[index.0 as usize].excluded
    }

    pub(crate) fn code_of(&self, index: CandidateIndex) -> &str {
        &self.entries[index.0 as usize].code
    }

    pub(crate) fn name_of(&self, index: CandidateIndex) -> &str {
        &self.entries[index.0 as usize].name
    }

    pub(crate) fn resolve(&self, mark: &str) -> Option<CandidateIndex> {
        self.by_code.get(mark).copied().or_else(|| {
            self.entries
                .iter()
                .position(|e| e.name == mark)
                .map(|i| CandidateIndex(i as u32))
        })
    }

    pub(crate) fn indices(&self) -> impl Iterator<Item = CandidateIndex> + '_ {
        (0..self.entries.len() as u32).map(CandidateIndex)
    }

    /// Non-excluded candidates (including the write-in sentinel), the
    /// continuing set before round 1.
    pub(crate) fn initial_continuing(&self) -> Vec<CandidateIndex> {
        self.indices().filter(|&i| !self.is_excluded(i)).collect()
    }

    /// Candidates in declaration order (write-in sentinel last).
    pub(crate) fn declaration_order(&self) -> Vec<CandidateIndex> {
        self.indices().collect()
    }

    /// The fixed candidate traversal order for reports and decisions:
    /// lexicographic by code, write-in sentinel last.
    pub(crate) fn lexicographic_order(&self) -> Vec<CandidateIndex> {
        let mut order: Vec<CandidateIndex> = self.indices().collect();
        order.sort_by_key(|&i| (self.is_uwi(i), self.code_of(i).to_string()));
        order
    }

    /// Resolve a configured permutation of candidate codes. Every declared
    /// candidate must appear exactly once; the write-in sentinel is
    /// appended when absent.
    pub(crate) fn resolve_permutation(&self, codes: &[String]) -> TabResult<Vec<CandidateIndex>> {
        let mut order: Vec<CandidateIndex> = Vec::with_capacity(self.entries.len());
        for code in codes {
            match self.by_code.get(code) {
                Some(&index) if !order.contains(&index) => order.push(index),
                Some(_) => {
                    return ConfigInvalidSnafu {
                        message: format!("candidate appears twice in the permutation: {}", code),
                    }
                    .fail()
                }
                None => {
                    return ConfigInvalidSnafu {
                        message: format!("unknown candidate in permutation: {}", code),
                    }
                    .fail()
                }
            }
        }
        if let Some(uwi) = self.uwi {
            if !order.contains(&uwi) {
                order.push(uwi);
            }
        }
        if order.len() != self.entries.len() {
            return ConfigInvalidSnafu {
                message: "the permutation must list every declared candidate".to_string(),
            }
            .fail();
        }
        Ok(order)
    }
}

/// The set of continuing candidates for one round, with membership lookups
/// in O(1).
#[derive(Debug, Clone)]
pub(crate) struct ContinuingSet {
    members: Vec<bool>,
    count: usize,
}

impl ContinuingSet {
    pub(crate) fn from_indices(universe: usize, indices: &[CandidateIndex]) -> ContinuingSet {
        let mut members = vec![false; universe];
        for &CandidateIndex(i) in indices {
            members[i as usize] = true;
        }
        ContinuingSet {
            members,
            count: indices.len(),
        }
    }

    pub(crate) fn contains(&self, index: CandidateIndex) -> bool {
        self.members[index.0 as usize]
    }

    pub(crate) fn len(&self) -> usize {
        self.count
    }

    pub(crate) fn remove(&mut self, index: CandidateIndex) {
        if self.members[index.0 as usize] {
            self.members[index.0 as usize] = false;
            self.count -= 1;
        }
    }

    /// Members of the set, traversed in the supplied order.
    pub(crate) fn members_in<'a>(
        &'a self,
        order: &'a [CandidateIndex],
    ) -> impl Iterator<Item = CandidateIndex> + 'a {
        order.iter().copied().filter(|&i| self.contains(i))
    }
}
