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

//! Resolution over a complete, immutable scope graph.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;

use dotscope_common::EngineResult;

use super::algorithm::{NameResolution, ResolutionContext};
use super::env::Env;
use super::predicates::{LabelWfRef, NoQueries, PredicateContext, QueryParams};
use crate::scopegraph::{Datum, Label, ScopeGraph, ScopeId, ScopePath};

pub struct StaticContext<S, L, D> {
    graph: ScopeGraph<S, L, D>,
    params: QueryParams<S, L, D>,
    predicates: Arc<dyn PredicateContext<S, L, D>>,
}

impl<S, L, D> StaticContext<S, L, D>
where
    S: ScopeId,
    L: Label,
    D: Datum<S>,
{
    pub fn new(graph: ScopeGraph<S, L, D>, params: QueryParams<S, L, D>) -> Self {
        Self {
            graph,
            params,
            predicates: Arc::new(NoQueries),
        }
    }

    pub fn with_predicate_context(mut self, predicates: Arc<dyn PredicateContext<S, L, D>>) -> Self {
        self.predicates = predicates;
        self
    }
}

#[async_trait]
impl<S, L, D> ResolutionContext<S, L, D> for StaticContext<S, L, D>
where
    S: ScopeId,
    L: Label,
    D: Datum<S>,
{
    async fn external_env(&self, _path: &ScopePath<S, L>, _re: &LabelWfRef<L>) -> Option<EngineResult<Env<S, L, D>>> {
        None
    }

    async fn get_edges(&self, scope: &S, label: &L) -> EngineResult<Vec<S>> {
        Ok(self.graph.get_edges(scope, label))
    }

    async fn get_datum(&self, scope: &S) -> EngineResult<Option<D>> {
        Ok(self.graph.get_datum(scope).cloned())
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

/// Resolve `params` from `source` in `graph`.
pub fn resolve_in<S, L, D>(
    graph: ScopeGraph<S, L, D>,
    edge_labels: Arc<Vec<L>>,
    source: S,
    params: QueryParams<S, L, D>,
) -> BoxFuture<'static, EngineResult<Env<S, L, D>>>
where
    S: ScopeId,
    L: Label,
    D: Datum<S>,
{
    let label_order = Arc::clone(&params.label_order);
    let label_wf = Arc::clone(&params.label_wf);
    let context = Arc::new(StaticContext::new(graph, params));
    NameResolution::new(edge_labels, label_order, context).env(ScopePath::new(source), label_wf)
}

/// Blocking variant of [`resolve_in`].
pub fn resolve_blocking<S, L, D>(
    graph: ScopeGraph<S, L, D>,
    edge_labels: Arc<Vec<L>>,
    source: S,
    params: QueryParams<S, L, D>,
) -> EngineResult<Env<S, L, D>>
where
    S: ScopeId,
    L: Label,
    D: Datum<S>,
{
    futures::executor::block_on(resolve_in(graph, edge_labels, source, params))
}
