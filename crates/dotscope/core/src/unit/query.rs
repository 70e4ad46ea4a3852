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

//! Query answering inside the engine.
//!
//! A query runs the generic resolution against a unit's fragment. Paths
//! leaving the fragment are forwarded to the owning unit, edge and datum
//! reads wait until the label is closed, and every forwarded or predicate
//! query is recorded with its answer.

use std::sync::Arc;

use async_trait::async_trait;
use futures::channel::oneshot;
use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use tracing::{debug, trace};

use dotscope_common::{EngineError, EngineResult, UnitId};

use super::UnitState;
use super::protocol::Message;
use super::result::{QueryAnswer, RecordedQuery};
use crate::checker::UnitOutput;
use crate::engine::Engine;
use crate::resolution::{Env, LabelWfRef, NameResolution, NoQueries, PredicateContext, QueryParams, ResolutionContext};
use crate::scopegraph::{Datum, EdgeOrData, Label, ScopeGraph, ScopeId, ScopePath};
use crate::wait_for::{WaitFor, next_request_id};

struct Recorder<S, L, D> {
    transitive: Vec<RecordedQuery<S, L, D>>,
    predicate: Vec<RecordedQuery<S, L, D>>,
}

impl<S, L, D> Default for Recorder<S, L, D> {
    fn default() -> Self {
        Self {
            transitive: Vec::new(),
            predicate: Vec::new(),
        }
    }
}

/// Suspend until the unit has decided between reuse and running.
pub(crate) async fn wait_activation<S, L, D, R>(engine: &Arc<Engine<S, L, D, R>>, unit: &UnitId) -> EngineResult<()>
where
    S: ScopeId,
    L: Label,
    D: Datum<S>,
    R: UnitOutput<S>,
{
    let pending = engine.with_unit(unit, |u, _| {
        matches!(u.state, UnitState::InitUnit | UnitState::InitTc | UnitState::Unknown).then(|| u.when_active.wait())
    })?;
    if let Some(activation) = pending {
        activation.await;
    }
    Ok(())
}

/// Suspend until `label` of `scope` can no longer change in `unit`.
pub(crate) async fn wait_closed<S, L, D, R>(
    engine: &Arc<Engine<S, L, D, R>>,
    unit: &UnitId,
    scope: &S,
    label: &EdgeOrData<L>,
) -> EngineResult<()>
where
    S: ScopeId,
    L: Label,
    D: Datum<S>,
    R: UnitOutput<S>,
{
    let delay = engine.with_unit(unit, |u, _| u.delay_until_closed(scope, label))?;
    if let Some(delay) = delay {
        trace!("{} delays on {:?} of {:?}", unit, label, scope);
        // A dropped sender means the unit gave up; read whatever is there.
        let _ = delay.await;
    }
    Ok(())
}

/// Resolve `path` in `unit` on behalf of `sender`.
pub(crate) fn do_query<S, L, D, R>(
    engine: Arc<Engine<S, L, D, R>>,
    unit: UnitId,
    sender: UnitId,
    path: ScopePath<S, L>,
    params: QueryParams<S, L, D>,
) -> BoxFuture<'static, EngineResult<QueryAnswer<S, L, D>>>
where
    S: ScopeId,
    L: Label,
    D: Datum<S>,
    R: UnitOutput<S>,
{
    async move {
        let recorder = Arc::new(Mutex::new(Recorder::default()));
        let predicates: Arc<dyn PredicateContext<S, L, D>> = Arc::new(UnitPredicates {
            engine: Arc::clone(&engine),
            unit: unit.clone(),
            recorder: Arc::clone(&recorder),
        });
        let context = Arc::new(UnitResolution {
            engine: Arc::clone(&engine),
            unit,
            sender,
            params: params.clone(),
            predicates,
            recorder: Arc::clone(&recorder),
        });
        let resolution = NameResolution::new(Arc::clone(&engine.edge_labels), Arc::clone(&params.label_order), context);
        let env = resolution.env(path, Arc::clone(&params.label_wf)).await?;
        let recorded = std::mem::take(&mut *recorder.lock());
        Ok(QueryAnswer {
            env,
            transitive: recorded.transitive,
            predicate: recorded.predicate,
        })
    }
    .boxed()
}

/// Send a query to the unit owning the target of `path`, holding a query
/// token on `from` for its duration.
pub(crate) async fn forward_query<S, L, D, R>(
    engine: &Arc<Engine<S, L, D, R>>,
    from: &UnitId,
    path: ScopePath<S, L>,
    params: QueryParams<S, L, D>,
) -> EngineResult<QueryAnswer<S, L, D>>
where
    S: ScopeId,
    L: Label,
    D: Datum<S>,
    R: UnitOutput<S>,
{
    let owner = path.target().owner().clone();
    let token = WaitFor::Query {
        path: path.clone(),
        request: next_request_id(),
    };
    let (reply, answer) = oneshot::channel();
    engine.with_unit(from, |u, fx| {
        u.wait_for(token.clone(), owner.clone(), fx);
        fx.send(
            owner.clone(),
            Message::Query {
                from: from.clone(),
                path,
                params,
                reply,
            },
        );
    })?;
    let answer = answer.await.unwrap_or_else(|_| Err(EngineError::UnitUnavailable(owner.clone())));
    engine.with_unit(from, |u, fx| {
        u.granted(&token, &owner, fx);
    })?;
    answer
}

pub(crate) async fn answer_query<S, L, D, R>(
    engine: Arc<Engine<S, L, D, R>>,
    unit: UnitId,
    sender: UnitId,
    path: ScopePath<S, L>,
    params: QueryParams<S, L, D>,
    reply: oneshot::Sender<EngineResult<QueryAnswer<S, L, D>>>,
) where
    S: ScopeId,
    L: Label,
    D: Datum<S>,
    R: UnitOutput<S>,
{
    let answer = match wait_activation(&engine, &unit).await {
        Ok(()) => do_query(Arc::clone(&engine), unit, sender, path, params).await,
        Err(e) => Err(e),
    };
    let _ = reply.send(answer);
}

struct UnitResolution<S, L, D, R>
where
    S: ScopeId,
    L: Label,
    D: Datum<S>,
    R: UnitOutput<S>,
{
    engine: Arc<Engine<S, L, D, R>>,
    unit: UnitId,
    sender: UnitId,
    params: QueryParams<S, L, D>,
    predicates: Arc<dyn PredicateContext<S, L, D>>,
    recorder: Arc<Mutex<Recorder<S, L, D>>>,
}

#[async_trait]
impl<S, L, D, R> ResolutionContext<S, L, D> for UnitResolution<S, L, D, R>
where
    S: ScopeId,
    L: Label,
    D: Datum<S>,
    R: UnitOutput<S>,
{
    async fn external_env(&self, path: &ScopePath<S, L>, re: &LabelWfRef<L>) -> Option<EngineResult<Env<S, L, D>>> {
        if path.target().owner() == &self.unit {
            return None;
        }
        let params = self.params.with_label_wf(Arc::clone(re));
        let answer = forward_query(&self.engine, &self.unit, path.clone(), params.clone()).await;
        Some(answer.map(|answer| {
            let env = answer.env.clone();
            self.recorder
                .lock()
                .transitive
                .push(RecordedQuery::new(path.clone(), params, answer));
            env
        }))
    }

    async fn get_edges(&self, scope: &S, label: &L) -> EngineResult<Vec<S>> {
        wait_closed(&self.engine, &self.unit, scope, &EdgeOrData::Edge(label.clone())).await?;
        self.engine
            .with_unit(&self.unit, |u, _| u.scope_graph.get_edges(scope, label))
    }

    async fn get_datum(&self, scope: &S) -> EngineResult<Option<D>> {
        wait_closed(&self.engine, &self.unit, scope, &EdgeOrData::Data).await?;
        let (datum, checker) = self
            .engine
            .with_unit(&self.unit, |u, _| (u.scope_graph.get_datum(scope).cloned(), u.checker()))?;
        match (datum, checker) {
            (Some(datum), Some(checker)) if self.sender != self.unit => checker
                .external_datum(datum)
                .await
                .map(Some)
                .map_err(|e| EngineError::Checker(format!("{:#}", e))),
            (datum, _) => Ok(datum),
        }
    }

    async fn data_wf(&self, datum: &D) -> EngineResult<bool> {
        self.params.data_wf.wf(datum, self.predicates.as_ref()).await
    }

    async fn data_leq(&self, d1: &D, d2: &D) -> EngineResult<bool> {
        self.params.data_leq.leq(d1, d2, self.predicates.as_ref()).await
    }

    fn data_leq_always_true(&self) -> bool {
        self.params.data_leq.always_true()
    }
}

/// Queries issued by predicates run in the unit that evaluates the
/// predicate and are recorded apart from the main query.
struct UnitPredicates<S, L, D, R>
where
    S: ScopeId,
    L: Label,
    D: Datum<S>,
    R: UnitOutput<S>,
{
    engine: Arc<Engine<S, L, D, R>>,
    unit: UnitId,
    recorder: Arc<Mutex<Recorder<S, L, D>>>,
}

#[async_trait]
impl<S, L, D, R> PredicateContext<S, L, D> for UnitPredicates<S, L, D, R>
where
    S: ScopeId,
    L: Label,
    D: Datum<S>,
    R: UnitOutput<S>,
{
    async fn query(&self, scope: S, params: QueryParams<S, L, D>) -> EngineResult<Env<S, L, D>> {
        let path = ScopePath::new(scope);
        let answer = do_query(
            Arc::clone(&self.engine),
            self.unit.clone(),
            self.unit.clone(),
            path.clone(),
            params.clone(),
        )
        .await?;
        let env = answer.env.clone();
        self.recorder
            .lock()
            .predicate
            .push(RecordedQuery::new(path, params, answer));
        Ok(env)
    }
}

/// Resolve `path` in the previous scope graph, as seen from `unit`.
pub(crate) fn query_previous<S, L, D, R>(
    engine: Arc<Engine<S, L, D, R>>,
    unit: UnitId,
    path: ScopePath<S, L>,
    params: QueryParams<S, L, D>,
) -> BoxFuture<'static, EngineResult<Env<S, L, D>>>
where
    S: ScopeId,
    L: Label,
    D: Datum<S>,
    R: UnitOutput<S>,
{
    async move {
        let graph = engine.with_unit(&unit, |u, _| {
            u.previous
                .as_ref()
                .map(|p| p.scope_graph.clone())
                .unwrap_or_default()
        })?;
        let context = Arc::new(PreviousResolution {
            engine: Arc::clone(&engine),
            unit,
            graph,
            params: params.clone(),
        });
        let resolution = NameResolution::new(Arc::clone(&engine.edge_labels), Arc::clone(&params.label_order), context);
        resolution.env(path, Arc::clone(&params.label_wf)).await
    }
    .boxed()
}

pub(crate) async fn answer_previous_query<S, L, D, R>(
    engine: Arc<Engine<S, L, D, R>>,
    unit: UnitId,
    path: ScopePath<S, L>,
    params: QueryParams<S, L, D>,
    reply: oneshot::Sender<EngineResult<Env<S, L, D>>>,
) where
    S: ScopeId,
    L: Label,
    D: Datum<S>,
    R: UnitOutput<S>,
{
    let _ = reply.send(query_previous(engine, unit, path, params).await);
}

struct PreviousResolution<S, L, D, R>
where
    S: ScopeId,
    L: Label,
    D: Datum<S>,
    R: UnitOutput<S>,
{
    engine: Arc<Engine<S, L, D, R>>,
    unit: UnitId,
    graph: ScopeGraph<S, L, D>,
    params: QueryParams<S, L, D>,
}

#[async_trait]
impl<S, L, D, R> ResolutionContext<S, L, D> for PreviousResolution<S, L, D, R>
where
    S: ScopeId,
    L: Label,
    D: Datum<S>,
    R: UnitOutput<S>,
{
    async fn external_env(&self, path: &ScopePath<S, L>, re: &LabelWfRef<L>) -> Option<EngineResult<Env<S, L, D>>> {
        let owner = path.target().owner().clone();
        if owner == self.unit {
            return None;
        }
        debug!("{} forwards a previous query to {}", self.unit, owner);
        let token = WaitFor::Query {
            path: path.clone(),
            request: next_request_id(),
        };
        let (reply, answer) = oneshot::channel();
        let sent = self.engine.with_unit(&self.unit, |u, fx| {
            u.wait_for(token.clone(), owner.clone(), fx);
            fx.send(
                owner.clone(),
                Message::QueryPrevious {
                    from: self.unit.clone(),
                    path: path.clone(),
                    params: self.params.with_label_wf(Arc::clone(re)),
                    reply,
                },
            );
        });
        if let Err(e) = sent {
            return Some(Err(e));
        }
        let env = answer.await.unwrap_or_else(|_| Err(EngineError::UnitUnavailable(owner.clone())));
        if let Err(e) = self.engine.with_unit(&self.unit, |u, fx| {
            u.granted(&token, &owner, fx);
        }) {
            return Some(Err(e));
        }
        Some(env)
    }

    async fn get_edges(&self, scope: &S, label: &L) -> EngineResult<Vec<S>> {
        Ok(self.graph.get_edges(scope, label))
    }

    async fn get_datum(&self, scope: &S) -> EngineResult<Option<D>> {
        Ok(self.graph.get_datum(scope).cloned())
    }

    async fn data_wf(&self, datum: &D) -> EngineResult<bool> {
        self.params.data_wf.wf(datum, &NoQueries).await
    }

    async fn data_leq(&self, d1: &D, d2: &D) -> EngineResult<bool> {
        self.params.data_leq.leq(d1, d2, &NoQueries).await
    }

    fn data_leq_always_true(&self) -> bool {
        self.params.data_leq.always_true()
    }
}
