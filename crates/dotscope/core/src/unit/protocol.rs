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

//! Messages exchanged between units.
//!
//! Delivery is FIFO per receiving unit. Requests carry a oneshot reply
//! channel; the requesting side raises and grants the matching wait-for
//! token itself.

use std::fmt;
use std::sync::Arc;

use futures::channel::oneshot;
use tracing::{trace, warn};

use dotscope_common::{EngineResult, UnitId};

use super::Unit;
use super::confirm_context::{answer_confirm, answer_match};
use super::query::{answer_previous_query, answer_query};
use super::result::QueryAnswer;
use crate::checker::UnitOutput;
use crate::confirm::ConfirmResult;
use crate::engine::Effects;
use crate::resolution::{DataWfRef, Env, LabelWfRef, QueryParams};
use crate::scopegraph::{Datum, EdgeOrData, Label, ScopeId, ScopePath};
use crate::wait_for::WaitFor;

pub(crate) enum Message<S: Ord, L, D> {
    Start {
        roots: Vec<S>,
    },
    UnitStarted {
        from: UnitId,
    },
    InitShare {
        from: UnitId,
        scope: S,
        labels: Vec<EdgeOrData<L>>,
        sharing: bool,
    },
    AddShare {
        from: UnitId,
        scope: S,
    },
    AddEdge {
        from: UnitId,
        source: S,
        label: L,
        target: S,
    },
    CloseEdge {
        from: UnitId,
        scope: S,
        label: EdgeOrData<L>,
    },
    CloseScope {
        from: UnitId,
        scope: S,
    },
    Query {
        from: UnitId,
        path: ScopePath<S, L>,
        params: QueryParams<S, L, D>,
        reply: oneshot::Sender<EngineResult<QueryAnswer<S, L, D>>>,
    },
    QueryPrevious {
        from: UnitId,
        path: ScopePath<S, L>,
        params: QueryParams<S, L, D>,
        reply: oneshot::Sender<EngineResult<Env<S, L, D>>>,
    },
    Confirm {
        from: UnitId,
        path: ScopePath<S, L>,
        label_wf: LabelWfRef<L>,
        data_wf: DataWfRef<S, L, D>,
        prev_env_empty: bool,
        reply: oneshot::Sender<EngineResult<ConfirmResult<S>>>,
    },
    Match {
        from: UnitId,
        scope: S,
        reply: oneshot::Sender<EngineResult<Option<S>>>,
    },
}

impl<S: Ord, L, D> Message<S, L, D> {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Message::Start { .. } => "start",
            Message::UnitStarted { .. } => "unit-started",
            Message::InitShare { .. } => "init-share",
            Message::AddShare { .. } => "add-share",
            Message::AddEdge { .. } => "add-edge",
            Message::CloseEdge { .. } => "close-edge",
            Message::CloseScope { .. } => "close-scope",
            Message::Query { .. } => "query",
            Message::QueryPrevious { .. } => "query-previous",
            Message::Confirm { .. } => "confirm",
            Message::Match { .. } => "match",
        }
    }
}

impl<S: Ord, L, D> fmt::Debug for Message<S, L, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Message::{}", self.name())
    }
}

impl<S, L, D, R> Unit<S, L, D, R>
where
    S: ScopeId,
    L: Label,
    D: Datum<S>,
    R: UnitOutput<S>,
{
    pub(crate) fn handle(&mut self, message: Message<S, L, D>, fx: &mut Effects<S, L, D, R>) {
        trace!("{} handles {:?}", self.id, message);
        let engine = Arc::clone(&fx.engine);
        match message {
            Message::Start { roots } => self.start(roots, fx),
            Message::UnitStarted { from } => self.on_sub_unit_started(&from, fx),
            Message::InitShare {
                from,
                scope,
                labels,
                sharing,
            } => self.do_init_share(&from, &scope, &labels, sharing, fx),
            Message::AddShare { from, scope } => self.do_add_share(&from, &scope, fx),
            Message::AddEdge {
                from,
                source,
                label,
                target,
            } => {
                if !self.owns(&source) {
                    warn!("{} received an edge for foreign scope {:?} from {}", self.id, source, from);
                    return;
                }
                if !self.is_open(&source, &EdgeOrData::Edge(label.clone())) {
                    warn!("{} received a late {:?} edge on {:?} from {}", self.id, label, source, from);
                }
                self.scope_graph.add_edge(source, label, target);
            }
            Message::CloseEdge { from, scope, label } => {
                self.granted(&WaitFor::CloseLabel(scope, label), &from, fx);
            }
            Message::CloseScope { from, scope } => {
                self.granted(&WaitFor::CloseScope(scope), &from, fx);
            }
            Message::Query {
                from,
                path,
                params,
                reply,
            } => fx.spawn(Box::pin(answer_query(engine, self.id.clone(), from, path, params, reply))),
            Message::QueryPrevious {
                from: _,
                path,
                params,
                reply,
            } => fx.spawn(Box::pin(answer_previous_query(engine, self.id.clone(), path, params, reply))),
            Message::Confirm {
                from,
                path,
                label_wf,
                data_wf,
                prev_env_empty,
                reply,
            } => fx.spawn(Box::pin(answer_confirm(
                engine,
                self.id.clone(),
                from,
                path,
                label_wf,
                data_wf,
                prev_env_empty,
                reply,
            ))),
            Message::Match { from: _, scope, reply } => fx.spawn(Box::pin(answer_match(engine, self.id.clone(), scope, reply))),
        }
    }
}
