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

//! The handle a checker uses to talk to its unit.
//!
//! Every operation takes effect synchronously in the unit (tokens are
//! raised, edges recorded, messages queued) before any returned future is
//! polled.

use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, ready};
use tracing::debug;

use dotscope_common::{EngineError, EngineResult, UnitId};

use super::confirm_context::confirm_own_queries;
use super::query::do_query;
use super::result::{RecordedQuery, TransitionTrace, UnitResult};
use super::{UnitKind, UnitState};
use crate::checker::{Incremental, ScopeGraphLibrary, TypeChecker, UnitOutput};
use crate::engine::Engine;
use crate::resolution::{Env, QueryParams};
use crate::runtime::Completable;
use crate::scopegraph::{Datum, EdgeOrData, Label, ScopeId, ScopePath};
use crate::wait_for::{WaitFor, next_request_id};

pub struct UnitContext<S, L, D, R>
where
    S: ScopeId,
    L: Label,
    D: Datum<S>,
    R: UnitOutput<S>,
{
    engine: Arc<Engine<S, L, D, R>>,
    unit: UnitId,
}

impl<S, L, D, R> Clone for UnitContext<S, L, D, R>
where
    S: ScopeId,
    L: Label,
    D: Datum<S>,
    R: UnitOutput<S>,
{
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            unit: self.unit.clone(),
        }
    }
}

impl<S, L, D, R> UnitContext<S, L, D, R>
where
    S: ScopeId,
    L: Label,
    D: Datum<S>,
    R: UnitOutput<S>,
{
    pub(crate) fn new(engine: Arc<Engine<S, L, D, R>>, unit: UnitId) -> Self {
        Self { engine, unit }
    }

    pub fn id(&self) -> &UnitId {
        &self.unit
    }

    pub fn edge_labels(&self) -> &[L] {
        self.engine.edge_labels.as_slice()
    }

    /// Create a scope owned by this unit. Edges for `edge_labels` (and the
    /// datum, with `has_data`) stay open until closed explicitly; `sharing`
    /// keeps the scope open for sharing with sub-units.
    pub fn fresh_scope(&self, base: &str, edge_labels: &[L], has_data: bool, sharing: bool) -> EngineResult<S> {
        self.engine
            .with_unit(&self.unit, |u, fx| u.fresh_scope(base, edge_labels, has_data, sharing, fx))?
    }

    /// Declare the labels this unit will still add edges for on a scope
    /// it was handed.
    pub fn init_scope(&self, scope: &S, labels: &[L], sharing: bool) -> EngineResult<()> {
        self.engine
            .with_unit(&self.unit, |u, fx| u.init_scope(scope, labels, sharing, fx))?
    }

    /// Announce that `scope` will be handed to a sub-unit.
    pub fn share_local(&self, scope: &S) -> EngineResult<()> {
        self.engine.with_unit(&self.unit, |u, fx| u.share_local(scope, fx))?
    }

    pub fn set_datum(&self, scope: &S, datum: D) -> EngineResult<()> {
        self.engine
            .with_unit(&self.unit, |u, fx| u.set_datum(scope, datum, fx))?
    }

    pub fn add_edge(&self, source: &S, label: L, target: &S) -> EngineResult<()> {
        self.engine
            .with_unit(&self.unit, |u, fx| u.add_edge(source, label, target, fx))?
    }

    pub fn close_edge(&self, scope: &S, label: L) -> EngineResult<()> {
        self.engine
            .with_unit(&self.unit, |u, fx| u.close_edge(scope, EdgeOrData::Edge(label), fx))?
    }

    pub fn close_scope(&self, scope: &S) -> EngineResult<()> {
        self.engine.with_unit(&self.unit, |u, fx| u.close_scope(scope, fx))?
    }

    /// Resolve a query from `scope`. Querying activates a unit that has not
    /// decided about reuse yet. During the local phase of an incremental
    /// run the answer is held back until the phase ends.
    pub fn query(&self, scope: &S, params: QueryParams<S, L, D>) -> BoxFuture<'static, EngineResult<Env<S, L, D>>> {
        let path = ScopePath::new(scope.clone());
        let token = WaitFor::Query {
            path: path.clone(),
            request: next_request_id(),
        };
        let raised = self.engine.with_unit(&self.unit, |u, fx| {
            u.assert_active()?;
            u.implicit_activate(fx)?;
            u.wait_for(token.clone(), u.id.clone(), fx);
            Ok::<_, EngineError>(u.context_activated.clone())
        });
        let activated = match raised {
            Ok(Ok(activated)) => activated,
            Ok(Err(e)) | Err(e) => return ready(Err(e)).boxed(),
        };
        let engine = Arc::clone(&self.engine);
        let unit = self.unit.clone();
        async move {
            let answer = do_query(Arc::clone(&engine), unit.clone(), unit.clone(), path.clone(), params.clone()).await;
            let env = answer.as_ref().map(|a| a.env.clone()).map_err(Clone::clone);
            engine.with_unit(&unit, |u, fx| {
                if let Ok(answer) = answer {
                    u.recorded_queries.push(RecordedQuery::new(path, params, answer));
                }
                let me = u.id.clone();
                u.granted(&token, &me, fx);
            })?;
            activated.wait().await;
            env
        }
        .boxed()
    }

    /// Add a sub-unit running `checker` on `roots`. Resolves to the
    /// sub-unit's result once it, and all its sub-units, are done.
    pub fn add(
        &self,
        name: &str,
        checker: Arc<dyn TypeChecker<S, L, D, R>>,
        roots: Vec<S>,
        changed: bool,
    ) -> BoxFuture<'static, EngineResult<UnitResult<S, L, D, R>>> {
        self.add_unit(name, UnitKind::TypeChecker(checker), roots, changed)
    }

    /// Attach a pre-built scope graph as a sub-unit.
    pub fn add_library(
        &self,
        name: &str,
        library: ScopeGraphLibrary<S, L, D>,
        roots: Vec<S>,
    ) -> BoxFuture<'static, EngineResult<UnitResult<S, L, D, R>>> {
        self.add_unit(name, UnitKind::Library(Arc::new(library)), roots, false)
    }

    fn add_unit(
        &self,
        name: &str,
        kind: UnitKind<S, L, D, R>,
        roots: Vec<S>,
        changed: bool,
    ) -> BoxFuture<'static, EngineResult<UnitResult<S, L, D, R>>> {
        let added = self.engine.with_unit(&self.unit, |u, fx| {
            u.assert_active()?;
            let result = u.add_sub_unit(name, kind, roots, changed, fx)?;
            Ok::<_, EngineError>((result, u.context_activated.clone()))
        });
        let (result, activated): (Completable<_>, Completable<()>) = match added {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) | Err(e) => return ready(Err(e)).boxed(),
        };
        let child = self.unit.child(name);
        async move {
            let result = result.wait().await;
            activated.wait().await;
            result.ok_or(EngineError::UnitUnavailable(child))
        }
        .boxed()
    }

    /// Decide between reusing the previous result and running again.
    ///
    /// Without a usable previous result, or when the unit is marked as
    /// changed, the unit is activated immediately and the answer is
    /// `Restart` without a previous state.
    pub fn run_incremental(&self) -> BoxFuture<'static, EngineResult<Incremental<S, R>>> {
        let engine = Arc::clone(&self.engine);
        let decided = self.engine.with_unit(&self.unit, |u, fx| {
            if u.state != UnitState::InitTc {
                return Err(EngineError::illegal_state(format!(
                    "run_incremental called on {} in state {:?}",
                    u.id, u.state
                )));
            }
            let reusable = engine.settings.incremental
                && !u.changed
                && u
                    .previous
                    .as_ref()
                    .is_some_and(|p| p.result.is_some() && p.failures.is_empty());
            if !reusable {
                u.restart(TransitionTrace::InitiallyStarted, fx);
                return Ok(None);
            }
            debug!("unit {} waits for its reuse decision", u.id);
            u.state = UnitState::Unknown;
            if let Some(capture) = u.previous.as_ref().and_then(|p| p.local_state.clone()) {
                u.restore(capture, fx);
            }
            fx.spawn(Box::pin(confirm_own_queries(Arc::clone(&fx.engine), u.id.clone())));
            Ok(Some((u.confirmation_result.clone(), u.previous.clone())))
        });
        let (confirmation, previous) = match decided {
            Ok(Ok(Some(pending))) => pending,
            Ok(Ok(None)) => {
                return ready(Ok(Incremental::Restart { previous_state: None })).boxed();
            }
            Ok(Err(e)) | Err(e) => return ready(Err(e)).boxed(),
        };
        let unit = self.unit.clone();
        async move {
            let Some(outcome) = confirmation.wait().await else {
                return Err(EngineError::UnitUnavailable(unit));
            };
            let previous = previous.ok_or_else(|| EngineError::illegal_state("reuse without a previous result"))?;
            Ok(match (outcome, previous.result) {
                (Some(patch), Some(result)) => Incremental::Reuse {
                    result: result.patch(&patch),
                    patch,
                },
                _ => Incremental::Restart {
                    previous_state: previous.local_state.and_then(|c| c.checker_state),
                },
            })
        }
        .boxed()
    }

    /// Result of this unit in the previous run, if any.
    pub fn previous_result(&self) -> Option<R> {
        self.engine
            .with_unit(&self.unit, |u, _| u.previous.as_ref().and_then(|p| p.result.clone()))
            .ok()
            .flatten()
    }
}
