// Dotlanth
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Differencing a unit's scope graph against its previous run.
//!
//! Scopes are matched starting from known pairs (root scopes, shared
//! scopes) and following edges: a target is matched when it keeps its
//! identity or when a fresh scope of this unit takes the place of a
//! previous one with the same datum.

pub mod env;

use std::collections::{BTreeSet, HashMap, VecDeque};

use tracing::trace;

use dotscope_common::UnitId;

use crate::scopegraph::{Datum, Label, Patch, ScopeGraph, ScopeId};

pub use env::{DifferContext, EnvChange, EnvDiff, EnvDiffer};

/// Difference between a current scope and its previous counterpart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeDiff<S, L> {
    pub current: S,
    pub previous: S,
    /// Edges without a previous counterpart, by current target.
    pub added: Vec<(L, S)>,
    /// Previous edges without a current counterpart, by previous target.
    pub removed: Vec<(L, S)>,
    /// Edges present in both runs, by current target.
    pub matched: Vec<(L, S)>,
    pub datum_changed: bool,
    pub had_datum: bool,
    pub has_datum: bool,
}

impl<S, L> ScopeDiff<S, L> {
    pub fn is_unchanged(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && !self.datum_changed
    }

    /// Every edge of the previous scope carried over unchanged.
    pub fn identical(current: S, previous: S, matched: Vec<(L, S)>, has_datum: bool) -> Self {
        Self {
            current,
            previous,
            added: Vec::new(),
            removed: Vec::new(),
            matched,
            datum_changed: false,
            had_datum: has_datum,
            has_datum,
        }
    }
}

pub struct ScopeGraphDiffer<S: Ord, L, D> {
    owner: UnitId,
    previous: ScopeGraph<S, L, D>,
    previous_scopes: BTreeSet<S>,
    seeds: BTreeSet<S>,
    /// previous ↦ current
    matches: Patch<S>,
    diffs: HashMap<S, ScopeDiff<S, L>>,
    frontier: VecDeque<S>,
}

impl<S, L, D> ScopeGraphDiffer<S, L, D>
where
    S: ScopeId,
    L: Label,
    D: Datum<S>,
{
    pub fn new(owner: UnitId, previous: ScopeGraph<S, L, D>, matches: Patch<S>) -> Self {
        let seeds: BTreeSet<S> = matches.iter().map(|(_, current)| current.clone()).collect();
        Self {
            owner,
            previous_scopes: previous.scopes(),
            previous,
            frontier: seeds.iter().cloned().collect(),
            seeds,
            matches,
            diffs: HashMap::new(),
        }
    }

    pub fn owner(&self) -> &UnitId {
        &self.owner
    }

    pub fn matches(&self) -> &Patch<S> {
        &self.matches
    }

    pub fn match_of(&self, previous: &S) -> Option<&S> {
        self.matches.get(previous)
    }

    /// Previous counterpart of a current scope, if it has one.
    pub fn previous_of(&self, current: &S) -> Option<S> {
        if let Some(previous) = self.matches.get_inverse(current) {
            return Some(previous.clone());
        }
        (!self.matches.contains_old(current) && self.previous_scopes.contains(current)).then(|| current.clone())
    }

    /// Declare `current` the counterpart of `previous`, e.g. a root scope
    /// handed to a sub-unit under a new name. Fails on a conflicting match.
    pub fn match_scopes(&mut self, previous: S, current: S) -> bool {
        self.record(previous, current)
    }

    fn record(&mut self, previous: S, current: S) -> bool {
        let known = self.matches.contains_new(&current);
        if !self.matches.put(previous, current.clone()) {
            return false;
        }
        if !known {
            self.frontier.push_back(current);
        }
        true
    }

    fn same_datum(&self, previous: &S, current: &S, graph: &ScopeGraph<S, L, D>) -> bool {
        let before = self.previous.get_datum(previous).map(|d| d.substitute(&self.matches));
        before.as_ref() == graph.get_datum(current)
    }

    /// Matched scope whose diff has not been computed yet.
    pub fn next_unexplored(&mut self) -> Option<S> {
        while let Some(scope) = self.frontier.pop_front() {
            let relevant = scope.owner() == &self.owner || self.seeds.contains(&scope);
            if relevant && !self.diffs.contains_key(&scope) {
                return Some(scope);
            }
        }
        None
    }

    pub fn diff_of(&self, current: &S) -> Option<&ScopeDiff<S, L>> {
        self.diffs.get(current)
    }

    /// Diff `scope` of `current` against its previous counterpart. All
    /// labels of `scope` must be closed. Returns `None` for new scopes.
    pub fn diff(&mut self, scope: &S, current: &ScopeGraph<S, L, D>, edge_labels: &[L]) -> Option<ScopeDiff<S, L>> {
        if let Some(diff) = self.diffs.get(scope) {
            return Some(diff.clone());
        }
        let previous_scope = self.previous_of(scope)?;
        self.record(previous_scope.clone(), scope.clone());

        let mut diff = ScopeDiff {
            current: scope.clone(),
            previous: previous_scope.clone(),
            added: Vec::new(),
            removed: Vec::new(),
            matched: Vec::new(),
            datum_changed: false,
            had_datum: false,
            has_datum: false,
        };
        for label in edge_labels {
            let mut before = self.previous.get_edges(&previous_scope, label);
            let mut fresh = Vec::new();
            for target in current.get_edges(scope, label) {
                let counterpart = match self.matches.get_inverse(&target) {
                    Some(previous) => Some(previous.clone()),
                    None if !self.matches.contains_old(&target) && before.contains(&target) => Some(target.clone()),
                    None => None,
                };
                match counterpart.and_then(|p| before.iter().position(|b| *b == p)) {
                    Some(pos) => {
                        let previous = before.remove(pos);
                        self.record(previous, target.clone());
                        diff.matched.push((label.clone(), target));
                    }
                    None => fresh.push(target),
                }
            }
            for previous in before {
                let candidate = (!self.matches.contains_old(&previous) && previous.owner() == &self.owner)
                    .then(|| {
                        fresh.iter().position(|t| {
                            t.owner() == &self.owner
                                && !self.matches.contains_new(t)
                                && self.same_datum(&previous, t, current)
                        })
                    })
                    .flatten();
                match candidate {
                    Some(pos) => {
                        let target = fresh.remove(pos);
                        trace!("matched {:?} with previous {:?}", target, previous);
                        self.record(previous, target.clone());
                        diff.matched.push((label.clone(), target));
                    }
                    None => diff.removed.push((label.clone(), previous)),
                }
            }
            diff.added
                .extend(fresh.into_iter().map(|target| (label.clone(), target)));
        }

        let before = self
            .previous
            .get_datum(&previous_scope)
            .map(|d| d.substitute(&self.matches));
        let now = current.get_datum(scope);
        diff.had_datum = before.is_some();
        diff.has_datum = now.is_some();
        diff.datum_changed = before.as_ref() != now;

        self.diffs.insert(scope.clone(), diff.clone());
        Some(diff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dotscope_common::Scope;

    fn scope(owner: &UnitId, name: &str) -> Scope {
        Scope::new(owner.clone(), name)
    }

    #[test]
    fn test_unchanged_graph_matches_by_identity() {
        let unit = UnitId::new("a");
        let (s, d) = (scope(&unit, "s-0"), scope(&unit, "d-0"));
        let mut graph: ScopeGraph<Scope, char, String> = ScopeGraph::new();
        graph.add_edge(s.clone(), 'E', d.clone());
        graph.set_datum(d.clone(), "x".to_string());

        let mut differ = ScopeGraphDiffer::new(unit.clone(), graph.clone(), Patch::of([(s.clone(), s.clone())]).unwrap());
        assert_eq!(differ.next_unexplored(), Some(s.clone()));
        let diff = differ.diff(&s, &graph, &['E']).unwrap();
        assert!(diff.is_unchanged());
        assert_eq!(diff.matched, vec![('E', d.clone())]);
        assert_eq!(differ.next_unexplored(), Some(d.clone()));
        assert!(differ.diff(&d, &graph, &['E']).unwrap().is_unchanged());
        assert_eq!(differ.next_unexplored(), None);
    }

    #[test]
    fn test_added_and_removed_edges() {
        let unit = UnitId::new("a");
        let other = UnitId::new("b");
        let s = scope(&unit, "s-0");
        let mut previous: ScopeGraph<Scope, char, String> = ScopeGraph::new();
        previous.add_edge(s.clone(), 'E', scope(&other, "x-0"));
        let mut current = ScopeGraph::new();
        current.add_edge(s.clone(), 'E', scope(&other, "y-0"));

        let mut differ = ScopeGraphDiffer::new(unit, previous, Patch::identity());
        let diff = differ.diff(&s, &current, &['E']).unwrap();
        assert_eq!(diff.added, vec![('E', scope(&other, "y-0"))]);
        assert_eq!(diff.removed, vec![('E', scope(&other, "x-0"))]);
    }

    #[test]
    fn test_renamed_scope_matched_by_datum() {
        let unit = UnitId::new("a");
        let s = scope(&unit, "s-0");
        let mut previous: ScopeGraph<Scope, char, String> = ScopeGraph::new();
        previous.add_edge(s.clone(), 'E', scope(&unit, "d-0"));
        previous.set_datum(scope(&unit, "d-0"), "x".into());
        let mut current = ScopeGraph::new();
        current.add_edge(s.clone(), 'E', scope(&unit, "d-1"));
        current.set_datum(scope(&unit, "d-1"), "x".into());

        let mut differ = ScopeGraphDiffer::new(unit.clone(), previous, Patch::identity());
        let diff = differ.diff(&s, &current, &['E']).unwrap();
        assert!(diff.is_unchanged());
        assert_eq!(differ.match_of(&scope(&unit, "d-0")), Some(&scope(&unit, "d-1")));
    }

    #[test]
    fn test_declared_match_for_renamed_root() {
        let unit = UnitId::new("a");
        let d = scope(&unit, "d-0");
        let mut previous: ScopeGraph<Scope, char, String> = ScopeGraph::new();
        previous.add_edge(scope(&unit, "r-0"), 'E', d.clone());
        previous.set_datum(d.clone(), "x".into());
        let mut current = ScopeGraph::new();
        current.add_edge(scope(&unit, "r-1"), 'E', d.clone());
        current.set_datum(d.clone(), "x".into());

        let mut differ = ScopeGraphDiffer::new(unit.clone(), previous, Patch::identity());
        assert!(differ.match_scopes(scope(&unit, "r-0"), scope(&unit, "r-1")));
        assert!(!differ.match_scopes(scope(&unit, "r-0"), scope(&unit, "r-2")));
        assert_eq!(differ.next_unexplored(), Some(scope(&unit, "r-1")));
        let diff = differ.diff(&scope(&unit, "r-1"), &current, &['E']).unwrap();
        assert!(diff.is_unchanged());
        assert_eq!(diff.previous, scope(&unit, "r-0"));
    }

    #[test]
    fn test_changed_datum() {
        let unit = UnitId::new("a");
        let d = scope(&unit, "d-0");
        let mut previous: ScopeGraph<Scope, char, String> = ScopeGraph::new();
        previous.set_datum(d.clone(), "x".into());
        let mut current = ScopeGraph::new();
        current.set_datum(d.clone(), "y".into());

        let mut differ = ScopeGraphDiffer::new(unit, previous, Patch::identity());
        let diff = differ.diff(&d, &current, &['E']).unwrap();
        assert!(diff.datum_changed && diff.had_datum && diff.has_datum);
    }

    #[test]
    fn test_new_scope_has_no_diff() {
        let unit = UnitId::new("a");
        let mut differ: ScopeGraphDiffer<Scope, char, String> =
            ScopeGraphDiffer::new(unit.clone(), ScopeGraph::new(), Patch::identity());
        assert!(differ.diff(&scope(&unit, "n-0"), &ScopeGraph::new(), &['E']).is_none());
    }
}
