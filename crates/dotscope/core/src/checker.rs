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

//! Interfaces between the engine and the local checkers it runs.

use std::fmt::Debug;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use dotscope_common::{EngineError, EngineResult, UnitId};

use crate::scopegraph::{Datum, Label, Patch, ScopeGraph, ScopeId};
use crate::unit::context::UnitContext;

/// Externally visible result of a checker.
pub trait UnitOutput<S: ScopeId>: Clone + Debug + Send + Sync + 'static {
    /// The result after scopes of a previous run were renamed by `patch`.
    fn patch(&self, patch: &Patch<S>) -> Self;
}

macro_rules! scope_free_output {
    ($($ty:ty),* $(,)?) => {
        $(
            impl<S: ScopeId> UnitOutput<S> for $ty {
                fn patch(&self, _patch: &Patch<S>) -> Self {
                    self.clone()
                }
            }
        )*
    };
}

scope_free_output!((), String, bool, i32, i64, u32, u64, usize);

impl<S: ScopeId, T: UnitOutput<S>> UnitOutput<S> for Vec<T> {
    fn patch(&self, patch: &Patch<S>) -> Self {
        self.iter().map(|t| t.patch(patch)).collect()
    }
}

impl<S: ScopeId, T: UnitOutput<S>> UnitOutput<S> for Option<T> {
    fn patch(&self, patch: &Patch<S>) -> Self {
        self.as_ref().map(|t| t.patch(patch))
    }
}

/// Opaque, serialized checker state used to resume a checker after its
/// local phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointState(Vec<u8>);

impl CheckpointState {
    pub fn encode<T: Serialize>(value: &T) -> EngineResult<Self> {
        bincode::serde::encode_to_vec(value, bincode::config::standard())
            .map(CheckpointState)
            .map_err(|e| EngineError::Checkpoint(e.to_string()))
    }

    pub fn decode<T: DeserializeOwned>(&self) -> EngineResult<T> {
        bincode::serde::decode_from_slice(&self.0, bincode::config::standard())
            .map(|(value, _)| value)
            .map_err(|e| EngineError::Checkpoint(e.to_string()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Outcome of [`UnitContext::run_incremental`].
#[derive(Debug, Clone)]
pub enum Incremental<S: Ord, R> {
    /// The previous result still holds, under `patch`.
    Reuse { result: R, patch: Patch<S> },
    /// The checker has to run, optionally resuming from a captured state.
    Restart { previous_state: Option<CheckpointState> },
}

/// The local checker of a unit.
#[async_trait]
pub trait TypeChecker<S, L, D, R>: Send + Sync
where
    S: ScopeId,
    L: Label,
    D: Datum<S>,
    R: UnitOutput<S>,
{
    async fn run(&self, ctx: UnitContext<S, L, D, R>, root_scopes: Vec<S>) -> anyhow::Result<R>;

    /// Form of an internal datum that is safe to hand to other units.
    async fn external_datum(&self, datum: D) -> anyhow::Result<D> {
        Ok(datum)
    }

    fn snapshot(&self) -> Option<CheckpointState> {
        None
    }
}

/// A pre-built scope graph attached as a unit of its own.
///
/// The library's root scopes are placeholders, bound positionally to the
/// root scopes the library is added with. All other scopes become scopes
/// of the library unit.
#[derive(Debug, Clone)]
pub struct ScopeGraphLibrary<S, L, D> {
    root_scopes: Vec<S>,
    scope_graph: ScopeGraph<S, L, D>,
}

impl<S, L, D> ScopeGraphLibrary<S, L, D>
where
    S: ScopeId,
    L: Label,
    D: Datum<S>,
{
    pub fn new(root_scopes: Vec<S>, scope_graph: ScopeGraph<S, L, D>) -> Self {
        Self { root_scopes, scope_graph }
    }

    pub fn root_scopes(&self) -> &[S] {
        &self.root_scopes
    }

    pub fn scope_graph(&self) -> &ScopeGraph<S, L, D> {
        &self.scope_graph
    }

    /// Bind the library into `owner` with the given roots. Returns the new
    /// scopes and the graph over live identities.
    pub fn instantiate(&self, owner: &UnitId, roots: &[S]) -> EngineResult<(Vec<S>, ScopeGraph<S, L, D>)> {
        if roots.len() != self.root_scopes.len() {
            return Err(EngineError::illegal_state(format!(
                "library expects {} root scopes, got {}",
                self.root_scopes.len(),
                roots.len()
            )));
        }
        let mut mapping = Patch::identity();
        for (lib_root, root) in self.root_scopes.iter().zip(roots) {
            if !mapping.put(lib_root.clone(), root.clone()) {
                return Err(EngineError::illegal_state("library root scopes must be distinct"));
            }
        }
        let mut own_scopes = Vec::new();
        for scope in self.scope_graph.scopes() {
            if mapping.contains_old(&scope) {
                continue;
            }
            let fresh = S::new_scope(owner, &format!("lib-{}", own_scopes.len()));
            mapping.put(scope, fresh.clone());
            own_scopes.push(fresh);
        }

        let mut graph = ScopeGraph::new();
        for (source, label, target) in self.scope_graph.edges() {
            graph.add_edge(mapping.apply(source), label.clone(), mapping.apply(target));
        }
        for (scope, datum) in self.scope_graph.data() {
            graph.set_datum(mapping.apply(scope), datum.substitute(&mapping));
        }
        Ok((own_scopes, graph))
    }
}
