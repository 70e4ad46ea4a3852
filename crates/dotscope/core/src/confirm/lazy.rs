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

//! Confirmation by environment differencing.
//!
//! Instead of re-running a query, walk what changed in the part of the
//! scope graph the query could see. An added edge is harmless if nothing
//! the query accepts is reachable through it; a removed edge is harmless
//! if nothing was reachable through it before. Edges into other units are
//! confirmed by those units.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use tracing::debug;

use dotscope_common::EngineResult;

use super::{ConfirmResult, Confirmation, ConfirmationContext};
use crate::diff::{EnvChange, EnvDiff};
use crate::resolution::{DataWfRef, LabelWfRef, QueryParams};
use crate::scopegraph::{Datum, Label, ScopeId, ScopePath};
use crate::unit::result::RecordedQuery;

pub struct LazyConfirmation<S, L, D> {
    context: Arc<dyn ConfirmationContext<S, L, D>>,
}

impl<S, L, D> LazyConfirmation<S, L, D>
where
    S: ScopeId,
    L: Label,
    D: Datum<S>,
{
    pub fn new(context: Arc<dyn ConfirmationContext<S, L, D>>) -> Self {
        Self { context }
    }

    /// Confirm a recorded query with the queries it caused. Renamings found
    /// while confirming predicate queries do not carry over.
    fn confirm_query<'a>(
        &'a self,
        query: &'a RecordedQuery<S, L, D>,
        include_patches: bool,
    ) -> BoxFuture<'a, EngineResult<ConfirmResult<S>>> {
        async move {
            let Some(current) = self.context.matches(query.path.target()).await? else {
                debug!("{:?} has no counterpart", query.path.target());
                return Ok(ConfirmResult::Deny);
            };
            let mut result = self
                .confirm(
                    ScopePath::new(current),
                    Arc::clone(&query.params.label_wf),
                    Arc::clone(&query.params.data_wf),
                    query.is_empty(),
                )
                .await?;
            for transitive in &query.transitive {
                if !result.is_confirmed() {
                    break;
                }
                result = result.and(self.confirm_query(transitive, true).await?);
            }
            for predicate in &query.predicate {
                if !result.is_confirmed() {
                    break;
                }
                result = result.and(self.confirm_query(predicate, false).await?);
            }
            Ok(if include_patches { result } else { result.without_patch() })
        }
        .boxed()
    }

    async fn confirm_change(&self, change: EnvChange<S, L, D>, prev_env_empty: bool) -> EngineResult<ConfirmResult<S>> {
        let verdict = |empty: bool| if empty { ConfirmResult::confirm() } else { ConfirmResult::Deny };
        match change {
            EnvChange::AddedEdge { path, label_wf, data_wf } => {
                let env = self.context.query(path, QueryParams::unordered(label_wf, data_wf)).await?;
                Ok(verdict(env.is_empty()))
            }
            EnvChange::RemovedEdge { path, label_wf, data_wf } => {
                if prev_env_empty {
                    return Ok(ConfirmResult::confirm());
                }
                let env = self
                    .context
                    .query_previous(path, QueryParams::unordered(label_wf, data_wf))
                    .await?;
                Ok(verdict(env.is_empty()))
            }
            EnvChange::External { path, label_wf, data_wf } => self.confirm(path, label_wf, data_wf, prev_env_empty).await,
        }
    }
}

#[async_trait]
impl<S, L, D> Confirmation<S, L, D> for LazyConfirmation<S, L, D>
where
    S: ScopeId,
    L: Label,
    D: Datum<S>,
{
    async fn confirm_all(&self, queries: &[RecordedQuery<S, L, D>]) -> EngineResult<ConfirmResult<S>> {
        let mut result = ConfirmResult::confirm();
        for query in queries {
            result = result.and(self.confirm_query(query, true).await?);
            if !result.is_confirmed() {
                debug!("query from {:?} denied", query.path.source());
                break;
            }
        }
        Ok(result)
    }

    async fn confirm(
        &self,
        path: ScopePath<S, L>,
        label_wf: LabelWfRef<L>,
        data_wf: DataWfRef<S, L, D>,
        prev_env_empty: bool,
    ) -> EngineResult<ConfirmResult<S>> {
        if let Some(result) = self
            .context
            .external_confirm(&path, &label_wf, &data_wf, prev_env_empty)
            .await
        {
            return result;
        }
        let EnvDiff { patches, changes } = self.context.env_diff(&path, &label_wf, &data_wf).await?;
        let mut result = ConfirmResult::Confirm(patches);
        for change in changes {
            result = result.and(self.confirm_change(change, prev_env_empty).await?);
            if !result.is_confirmed() {
                break;
            }
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::confirm::testing::{FixedContext, FixedGraphs};
    use crate::resolution::{DataWfFn, LabelAutomaton, resolve_blocking};
    use crate::scopegraph::ScopeGraph;
    use crate::unit::result::QueryAnswer;
    use dotscope_common::{Scope, UnitId};

    type Graph = ScopeGraph<Scope, char, String>;

    fn params() -> QueryParams<Scope, char, String> {
        QueryParams::all(LabelAutomaton::builder().transition(0, 'E', 0).accept(0).build())
    }

    fn record(graph: &Graph, source: &Scope, params: QueryParams<Scope, char, String>) -> RecordedQuery<Scope, char, String> {
        let env = resolve_blocking(graph.clone(), Arc::new(vec!['E', 'P']), source.clone(), params.clone()).unwrap();
        RecordedQuery::new(
            ScopePath::new(source.clone()),
            params,
            QueryAnswer {
                env,
                transitive: Vec::new(),
                predicate: Vec::new(),
            },
        )
    }

    fn confirm(previous: Graph, current: Graph, query: RecordedQuery<Scope, char, String>) -> ConfirmResult<Scope> {
        let unit = UnitId::new("u");
        let confirmation = LazyConfirmation::new(Arc::new(FixedContext(FixedGraphs::new(unit, previous, current))));
        futures::executor::block_on(confirmation.confirm_all(&[query])).unwrap()
    }

    struct Fixture {
        s: Scope,
        d: Scope,
        e: Scope,
        previous: Graph,
    }

    fn fixture() -> Fixture {
        let unit = UnitId::new("u");
        let s = Scope::new(unit.clone(), "s-0");
        let d = Scope::new(unit.clone(), "d-0");
        let e = Scope::new(unit, "e-0");
        let mut previous = Graph::new();
        previous.add_edge(s.clone(), 'E', d.clone());
        previous.set_datum(d.clone(), "x".to_string());
        Fixture { s, d, e, previous }
    }

    #[test]
    fn test_unchanged_graph_confirms() {
        let f = fixture();
        let query = record(&f.previous, &f.s, params());
        assert!(confirm(f.previous.clone(), f.previous, query).is_confirmed());
    }

    #[test]
    fn test_added_edge_without_data_confirms() {
        let f = fixture();
        let query = record(&f.previous, &f.s, params());
        let mut current = f.previous.clone();
        current.add_edge(f.s.clone(), 'E', f.e.clone());
        assert!(confirm(f.previous, current, query).is_confirmed());
    }

    #[test]
    fn test_added_edge_with_data_denies() {
        let f = fixture();
        let query = record(&f.previous, &f.s, params());
        let mut current = f.previous.clone();
        current.add_edge(f.s.clone(), 'E', f.e.clone());
        current.set_datum(f.e.clone(), "y".to_string());
        assert_eq!(confirm(f.previous, current, query), ConfirmResult::Deny);
    }

    #[test]
    fn test_removed_edge_denies_unless_previously_empty() {
        let f = fixture();
        let query = record(&f.previous, &f.s, params());
        let mut current = Graph::new();
        current.set_datum(f.d.clone(), "x".to_string());
        assert_eq!(confirm(f.previous.clone(), current.clone(), query), ConfirmResult::Deny);

        let only_z = QueryParams::unordered(
            LabelAutomaton::builder().transition(0, 'E', 0).accept(0).build(),
            Arc::new(DataWfFn::new("only-z", |d: &String| d == "z")),
        );
        let empty_query = record(&f.previous, &f.s, only_z);
        assert!(empty_query.is_empty());
        assert!(confirm(f.previous, current, empty_query).is_confirmed());
    }

    #[test]
    fn test_changed_datum_denies() {
        let f = fixture();
        let query = record(&f.previous, &f.s, params());
        let mut current = f.previous.clone();
        current.set_datum(f.d.clone(), "y".to_string());
        assert_eq!(confirm(f.previous, current, query), ConfirmResult::Deny);
    }
}
