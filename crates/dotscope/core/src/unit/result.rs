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

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use dotscope_common::UnitId;

use crate::checker::CheckpointState;
use crate::resolution::{Env, QueryParams};
use crate::scopegraph::{EdgeOrData, ScopeGraph, ScopeId, ScopePath};

/// How a unit arrived at its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransitionTrace {
    /// Ran from scratch without attempting reuse.
    InitiallyStarted,
    /// Attempted reuse, was denied and ran again.
    Restarted,
    /// Reused its previous result.
    Released,
}

/// A query together with the answer it produced, kept for confirming the
/// answer in a later run.
#[derive(Debug, Clone)]
pub struct RecordedQuery<S, L, D> {
    pub path: ScopePath<S, L>,
    pub params: QueryParams<S, L, D>,
    pub env: Env<S, L, D>,
    /// Queries forwarded to other units while answering this one.
    pub transitive: Vec<RecordedQuery<S, L, D>>,
    /// Queries issued by predicates while answering this one.
    pub predicate: Vec<RecordedQuery<S, L, D>>,
}

impl<S, L, D> RecordedQuery<S, L, D>
where
    S: Clone + Eq + std::hash::Hash,
    L: Clone + Eq + std::hash::Hash,
    D: Clone + Eq + std::hash::Hash,
{
    pub fn new(path: ScopePath<S, L>, params: QueryParams<S, L, D>, answer: QueryAnswer<S, L, D>) -> Self {
        Self {
            path,
            params,
            env: answer.env,
            transitive: answer.transitive,
            predicate: answer.predicate,
        }
    }

    /// The query had no accepted answer.
    pub fn is_empty(&self) -> bool {
        self.env.is_empty()
    }
}

/// Answer to a query as it travels between units.
#[derive(Debug, Clone)]
pub struct QueryAnswer<S, L, D> {
    pub env: Env<S, L, D>,
    pub transitive: Vec<RecordedQuery<S, L, D>>,
    pub predicate: Vec<RecordedQuery<S, L, D>>,
}

/// State of a unit at the end of its local phase.
#[derive(Debug, Clone)]
pub struct StateCapture<S, L, D> {
    pub scopes: BTreeSet<S>,
    pub scope_graph: ScopeGraph<S, L, D>,
    pub uninitialized_scopes: Vec<S>,
    pub open_scopes: Vec<S>,
    /// Labels not yet closed, including labels on shared scopes of others.
    pub open_edges: Vec<(S, EdgeOrData<L>)>,
    pub scope_name_counters: BTreeMap<String, usize>,
    pub checker_state: Option<CheckpointState>,
}

#[derive(Debug, Clone)]
pub struct UnitResult<S, L, D, R> {
    pub id: UnitId,
    pub root_scopes: Vec<S>,
    /// The fragment of the scope graph owned by this unit.
    pub scope_graph: ScopeGraph<S, L, D>,
    /// Edges and data asserted by this unit's own checker.
    pub local_scope_graph: ScopeGraph<S, L, D>,
    pub result: Option<R>,
    pub sub_unit_results: BTreeMap<String, UnitResult<S, L, D, R>>,
    pub queries: Vec<RecordedQuery<S, L, D>>,
    pub local_state: Option<StateCapture<S, L, D>>,
    pub transition_trace: TransitionTrace,
    pub failures: Vec<String>,
}

impl<S, L, D, R> UnitResult<S, L, D, R>
where
    S: ScopeId,
    L: Clone + Ord,
    D: Clone,
{
    /// Failures of this unit and all its sub-units.
    pub fn all_failures(&self) -> Vec<String> {
        let mut failures: Vec<String> = self.failures.iter().map(|f| format!("{}: {}", self.id, f)).collect();
        for sub in self.sub_unit_results.values() {
            failures.extend(sub.all_failures());
        }
        failures
    }

    pub fn is_ok(&self) -> bool {
        self.failures.is_empty() && self.sub_unit_results.values().all(UnitResult::is_ok)
    }

    /// The scope graph of this unit and all its sub-units.
    pub fn total_scope_graph(&self) -> ScopeGraph<S, L, D> {
        let mut graph = self.scope_graph.clone();
        for sub in self.sub_unit_results.values() {
            graph.extend(&sub.total_scope_graph());
        }
        graph
    }

    /// Sub-unit result by path of local names, e.g. `["pkg", "mod"]`.
    pub fn find(&self, names: &[&str]) -> Option<&UnitResult<S, L, D, R>> {
        match names.split_first() {
            None => Some(self),
            Some((first, rest)) => self.sub_unit_results.get(*first)?.find(rest),
        }
    }
}
