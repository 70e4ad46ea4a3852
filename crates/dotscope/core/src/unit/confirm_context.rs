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

//! Confirmation as run by a unit: matching previous scopes, diffing its
//! own fragment, and confirming on behalf of other units.

use std::sync::Arc;

use async_trait::async_trait;
use futures::channel::oneshot;
use tracing::{debug, info, warn};

use dotscope_common::{EngineError, EngineResult, UnitId};

use super::protocol::Message;
use super::query::{do_query, query_previous, wait_activation, wait_closed};
use super::result::TransitionTrace;
use super::{UnitKind, UnitState};
use crate::checker::UnitOutput;
use crate::confirm::{ConfirmResult, ConfirmationContext, confirmation_for};
use crate::diff::{DifferContext, EnvDiff, EnvDiffer, ScopeDiff};
use crate::engine::Engine;
use crate::resolution::{DataWfRef, Env, LabelWfRef, QueryParams};
use crate::scopegraph::{Datum, EdgeOrData, Label, ScopeId, ScopePath};
use crate::wait_for::{WaitFor, next_request_id};

enum MatchStep<S> {
    Done(Option<S>),
    Explore(S),
}

/// Current counterpart of a previous scope owned by `unit`.
pub(crate) async fn match_local<S, L, D, R>(engine: &Arc<Engine<S, L, D, R>>, unit: &UnitId, previous: &S) -> EngineResult<Option<S>>
where
    S: ScopeId,
    L: Label,
    D: Datum<S>,
    R: UnitOutput<S>,
{
    loop {
        let step = engine.with_unit(unit, |u, _| {
            if let Some(current) = u.matched_by_sharing.get(previous) {
                return MatchStep::Done(Some(current.clone()));
            }
            if u.is_removed_phantom() {
                return MatchStep::Done(None);
            }
            if let Some(differ) = u.differ.as_mut() {
                if let Some(current) = differ.match_of(previous) {
                    return MatchStep::Done(Some(current.clone()));
                }
                return match differ.next_unexplored() {
                    Some(scope) => MatchStep::Explore(scope),
                    None => MatchStep::Done(None),
                };
            }
            match (&u.release_patch, u.state) {
                (Some(patch), _) => MatchStep::Done(Some(patch.apply(previous))),
                (None, UnitState::Unknown) => MatchStep::Done(Some(previous.clone())),
                (None, _) => MatchStep::Done(u.scopes.contains(previous).then(|| previous.clone())),
            }
        })?;
        match step {
            MatchStep::Done(current) => return Ok(current),
            MatchStep::Explore(scope) => {
                explore(engine, unit, &scope).await?;
            }
        }
    }
}

/// Diff `scope` with the live differ once it is closed.
async fn explore<S, L, D, R>(engine: &Arc<Engine<S, L, D, R>>, unit: &UnitId, scope: &S) -> EngineResult<Option<ScopeDiff<S, L>>>
where
    S: ScopeId,
    L: Label,
    D: Datum<S>,
    R: UnitOutput<S>,
{
    let mut labels: Vec<EdgeOrData<L>> = engine.edge_labels.iter().cloned().map(EdgeOrData::Edge).collect();
    labels.push(EdgeOrData::Data);
    for label in &labels {
        wait_closed(engine, unit, scope, label).await?;
    }
    engine.with_unit(unit, |u, _| {
        let current = u.scope_graph.add_all(&u.local_scope_graph);
        let edge_labels = engine.edge_labels.as_slice();
        u.differ.as_mut().and_then(|differ| differ.diff(scope, &current, edge_labels))
    })
}

pub(crate) async fn answer_match<S, L, D, R>(
    engine: Arc<Engine<S, L, D, R>>,
    unit: UnitId,
    previous: S,
    reply: oneshot::Sender<EngineResult<Option<S>>>,
) where
    S: ScopeId,
    L: Label,
    D: Datum<S>,
    R: UnitOutput<S>,
{
    let answer = match wait_activation(&engine, &unit).await {
        Ok(()) => match_local(&engine, &unit, &previous).await,
        Err(e) => Err(e),
    };
    let _ = reply.send(answer);
}

#[allow(clippy::too_many_arguments)]
pub(crate) async fn answer_confirm<S, L, D, R>(
    engine: Arc<Engine<S, L, D, R>>,
    unit: UnitId,
    sender: UnitId,
    path: ScopePath<S, L>,
    label_wf: LabelWfRef<L>,
    data_wf: DataWfRef<S, L, D>,
    prev_env_empty: bool,
    reply: oneshot::Sender<EngineResult<ConfirmResult<S>>>,
) where
    S: ScopeId,
    L: Label,
    D: Datum<S>,
    R: UnitOutput<S>,
{
    let answer = confirm_here(&engine, &unit, sender, path, label_wf, data_wf, prev_env_empty).await;
    let _ = reply.send(answer);
}

async fn confirm_here<S, L, D, R>(
    engine: &Arc<Engine<S, L, D, R>>,
    unit: &UnitId,
    sender: UnitId,
    path: ScopePath<S, L>,
    label_wf: LabelWfRef<L>,
    data_wf: DataWfRef<S, L, D>,
    prev_env_empty: bool,
) -> EngineResult<ConfirmResult<S>>
where
    S: ScopeId,
    L: Label,
    D: Datum<S>,
    R: UnitOutput<S>,
{
    let removed = engine.with_unit(unit, |u, _| u.is_removed_phantom())?;
    if removed {
        // Everything the unit contributed is gone: only an answer that was
        // empty before stays the same.
        if prev_env_empty {
            return Ok(ConfirmResult::confirm());
        }
        let env = query_previous(Arc::clone(engine), unit.clone(), path, QueryParams::unordered(label_wf, data_wf)).await?;
        return Ok(if env.is_empty() { ConfirmResult::confirm() } else { ConfirmResult::Deny });
    }
    wait_activation(engine, unit).await?;
    let context = Arc::new(UnitConfirmationContext {
        engine: Arc::clone(engine),
        unit: unit.clone(),
        sender,
    });
    let confirmation = confirmation_for(engine.settings.confirmation_mode, context);
    confirmation.confirm(path, label_wf, data_wf, prev_env_empty).await
}

/// Decide reuse for `unit` by confirming the queries of its previous run.
pub(crate) async fn confirm_own_queries<S, L, D, R>(engine: Arc<Engine<S, L, D, R>>, unit: UnitId)
where
    S: ScopeId,
    L: Label,
    D: Datum<S>,
    R: UnitOutput<S>,
{
    let queries = match engine.with_unit(&unit, |u, _| {
        u.previous.as_ref().map(|p| p.queries.clone()).unwrap_or_default()
    }) {
        Ok(queries) => queries,
        Err(e) => {
            warn!("cannot confirm {}: {}", unit, e);
            return;
        }
    };
    let verdict = if queries.is_empty() {
        ConfirmResult::confirm()
    } else {
        let context = Arc::new(UnitConfirmationContext {
            engine: Arc::clone(&engine),
            unit: unit.clone(),
            sender: unit.clone(),
        });
        let confirmation = confirmation_for(engine.settings.confirmation_mode, context);
        confirmation.confirm_all(&queries).await.unwrap_or_else(|e| {
            warn!("confirmation of {} failed: {}", unit, e);
            ConfirmResult::Deny
        })
    };
    let applied = engine.with_unit(&unit, |u, fx| match verdict {
        ConfirmResult::Confirm(patch) => u.release(patch, fx),
        ConfirmResult::Deny => {
            info!("unit {} must run again", u.id);
            u.restart(TransitionTrace::Restarted, fx)
        }
    });
    if let Ok(false) = applied {
        debug!("reuse of {} was decided elsewhere", unit);
    }
}

struct UnitConfirmationContext<S, L, D, R>
where
    S: ScopeId,
    L: Label,
    D: Datum<S>,
    R: UnitOutput<S>,
{
    engine: Arc<Engine<S, L, D, R>>,
    unit: UnitId,
    sender: UnitId,
}

#[async_trait]
impl<S, L, D, R> ConfirmationContext<S, L, D> for UnitConfirmationContext<S, L, D, R>
where
    S: ScopeId,
    L: Label,
    D: Datum<S>,
    R: UnitOutput<S>,
{
    async fn query(&self, path: ScopePath<S, L>, params: QueryParams<S, L, D>) -> EngineResult<Env<S, L, D>> {
        let answer = do_query(Arc::clone(&self.engine), self.unit.clone(), self.sender.clone(), path, params).await?;
        Ok(answer.env)
    }

    async fn query_previous(&self, path: ScopePath<S, L>, params: QueryParams<S, L, D>) -> EngineResult<Env<S, L, D>> {
        query_previous(Arc::clone(&self.engine), self.unit.clone(), path, params).await
    }

    async fn external_confirm(
        &self,
        path: &ScopePath<S, L>,
        label_wf: &LabelWfRef<L>,
        data_wf: &DataWfRef<S, L, D>,
        prev_env_empty: bool,
    ) -> Option<EngineResult<ConfirmResult<S>>> {
        let owner = path.target().owner().clone();
        if owner == self.unit {
            return None;
        }
        let token = WaitFor::Confirm {
            scope: path.target().clone(),
            request: next_request_id(),
        };
        let (reply, answer) = oneshot::channel();
        let sent = self.engine.with_unit(&self.unit, |u, fx| {
            u.wait_for(token.clone(), owner.clone(), fx);
            fx.send(
                owner.clone(),
                Message::Confirm {
                    from: self.unit.clone(),
                    path: path.clone(),
                    label_wf: Arc::clone(label_wf),
                    data_wf: Arc::clone(data_wf),
                    prev_env_empty,
                    reply,
                },
            );
        });
        if let Err(e) = sent {
            return Some(Err(e));
        }
        let result = answer.await.unwrap_or_else(|_| Err(EngineError::UnitUnavailable(owner.clone())));
        if let Err(e) = self.engine.with_unit(&self.unit, |u, fx| {
            u.granted(&token, &owner, fx);
        }) {
            return Some(Err(e));
        }
        Some(result)
    }

    async fn env_diff(
        &self,
        path: &ScopePath<S, L>,
        label_wf: &LabelWfRef<L>,
        data_wf: &DataWfRef<S, L, D>,
    ) -> EngineResult<EnvDiff<S, L, D>> {
        let context = Arc::new(UnitDifferContext {
            engine: Arc::clone(&self.engine),
            unit: self.unit.clone(),
        });
        EnvDiffer::new(context)
            .diff(path.clone(), Arc::clone(label_wf), Arc::clone(data_wf))
            .await
    }

    async fn matches(&self, previous: &S) -> EngineResult<Option<S>> {
        let owner = previous.owner().clone();
        if owner == self.unit {
            return match_local(&self.engine, &self.unit, previous).await;
        }
        let token = WaitFor::Match {
            scope: previous.clone(),
            request: next_request_id(),
        };
        let (reply, answer) = oneshot::channel();
        self.engine.with_unit(&self.unit, |u, fx| {
            u.wait_for(token.clone(), owner.clone(), fx);
            fx.send(
                owner.clone(),
                Message::Match {
                    from: self.unit.clone(),
                    scope: previous.clone(),
                    reply,
                },
            );
        })?;
        let result = answer.await.unwrap_or_else(|_| Err(EngineError::UnitUnavailable(owner.clone())));
        self.engine.with_unit(&self.unit, |u, fx| {
            u.granted(&token, &owner, fx);
        })?;
        result
    }
}

/// Scope diffs of a unit. A running unit diffs live against its previous
/// graph; a unit that reuses, or is still deciding, reports its previous
/// fragment under its patch.
struct UnitDifferContext<S, L, D, R>
where
    S: ScopeId,
    L: Label,
    D: Datum<S>,
    R: UnitOutput<S>,
{
    engine: Arc<Engine<S, L, D, R>>,
    unit: UnitId,
}

#[async_trait]
impl<S, L, D, R> DifferContext<S, L, D> for UnitDifferContext<S, L, D, R>
where
    S: ScopeId,
    L: Label,
    D: Datum<S>,
    R: UnitOutput<S>,
{
    fn owner(&self) -> &UnitId {
        &self.unit
    }

    async fn scope_diff(&self, scope: &S) -> EngineResult<Option<ScopeDiff<S, L>>> {
        let live = self.engine.with_unit(&self.unit, |u, _| u.differ.is_some())?;
        if live {
            return explore(&self.engine, &self.unit, scope).await;
        }
        let edge_labels = Arc::clone(&self.engine.edge_labels);
        self.engine.with_unit(&self.unit, |u, _| {
            let reusing = matches!(u.state, UnitState::Unknown | UnitState::Released)
                || u.transition_trace == TransitionTrace::Released
                || matches!(u.kind, UnitKind::Phantom { .. });
            let Some(previous) = u.previous.as_ref().filter(|_| reusing) else {
                return None;
            };
            let patch = u.release_patch.clone().unwrap_or_default();
            let previous_scope = patch.inverse_apply(scope);
            let graph = previous.scope_graph.add_all(&previous.local_scope_graph);
            let matched = edge_labels
                .iter()
                .flat_map(|label| {
                    graph
                        .get_edges(&previous_scope, label)
                        .into_iter()
                        .map(|target| (label.clone(), patch.apply(&target)))
                })
                .collect();
            let has_datum = graph.get_datum(&previous_scope).is_some();
            Some(ScopeDiff::identical(scope.clone(), previous_scope, matched, has_datum))
        })
    }
}
