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

//! Confirmation: deciding whether the queries of a previous run still
//! have the same answers, and under which renaming of scopes.

pub mod lazy;
pub mod trivial;

use std::sync::Arc;

use async_trait::async_trait;

use dotscope_common::{ConfirmationMode, EngineResult};

use crate::diff::EnvDiff;
use crate::resolution::{DataWfRef, Env, LabelWfRef, QueryParams};
use crate::scopegraph::{Datum, Label, Patch, ScopeId, ScopePath};
use crate::unit::result::RecordedQuery;

pub use lazy::LazyConfirmation;
pub use trivial::TrivialConfirmation;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmResult<S: Ord> {
    /// Answers are unchanged up to this renaming of previous scopes.
    Confirm(Patch<S>),
    Deny,
}

impl<S: Ord + Clone> ConfirmResult<S> {
    pub fn confirm() -> Self {
        ConfirmResult::Confirm(Patch::identity())
    }

    pub fn is_confirmed(&self) -> bool {
        matches!(self, ConfirmResult::Confirm(_))
    }

    /// Both hold, with compatible renamings.
    pub fn and(self, other: ConfirmResult<S>) -> Self {
        match (self, other) {
            (ConfirmResult::Confirm(p1), ConfirmResult::Confirm(p2)) => match p1.merge(&p2) {
                Some(patch) => ConfirmResult::Confirm(patch),
                None => ConfirmResult::Deny,
            },
            _ => ConfirmResult::Deny,
        }
    }

    /// Keep the verdict, drop the renaming.
    pub fn without_patch(self) -> Self {
        match self {
            ConfirmResult::Confirm(_) => ConfirmResult::confirm(),
            ConfirmResult::Deny => ConfirmResult::Deny,
        }
    }
}

/// What confirmation needs from the unit it runs in.
#[async_trait]
pub trait ConfirmationContext<S, L, D>: Send + Sync
where
    S: ScopeId,
{
    /// Resolve in the current scope graph.
    async fn query(&self, path: ScopePath<S, L>, params: QueryParams<S, L, D>) -> EngineResult<Env<S, L, D>>;

    /// Resolve in the previous scope graph.
    async fn query_previous(&self, path: ScopePath<S, L>, params: QueryParams<S, L, D>) -> EngineResult<Env<S, L, D>>;

    /// Confirm at the unit owning the target of `path`, or `None` if that
    /// is this unit.
    async fn external_confirm(
        &self,
        path: &ScopePath<S, L>,
        label_wf: &LabelWfRef<L>,
        data_wf: &DataWfRef<S, L, D>,
        prev_env_empty: bool,
    ) -> Option<EngineResult<ConfirmResult<S>>>;

    async fn env_diff(
        &self,
        path: &ScopePath<S, L>,
        label_wf: &LabelWfRef<L>,
        data_wf: &DataWfRef<S, L, D>,
    ) -> EngineResult<EnvDiff<S, L, D>>;

    /// Current counterpart of a previous scope.
    async fn matches(&self, previous: &S) -> EngineResult<Option<S>>;
}

#[async_trait]
pub trait Confirmation<S, L, D>: Send + Sync
where
    S: ScopeId,
{
    /// Confirm every recorded query of a unit.
    async fn confirm_all(&self, queries: &[RecordedQuery<S, L, D>]) -> EngineResult<ConfirmResult<S>>;

    /// Confirm that the environment at `path` is unchanged.
    async fn confirm(
        &self,
        path: ScopePath<S, L>,
        label_wf: LabelWfRef<L>,
        data_wf: DataWfRef<S, L, D>,
        prev_env_empty: bool,
    ) -> EngineResult<ConfirmResult<S>>;
}

pub fn confirmation_for<S, L, D>(
    mode: ConfirmationMode,
    context: Arc<dyn ConfirmationContext<S, L, D>>,
) -> Arc<dyn Confirmation<S, L, D>>
where
    S: ScopeId,
    L: Label,
    D: Datum<S>,
{
    match mode {
        ConfirmationMode::Trivial => Arc::new(TrivialConfirmation::new(context)),
        ConfirmationMode::SimpleEnvironment => Arc::new(LazyConfirmation::new(context)),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Confirmation context over two fixed scope graphs of a single unit.

    use std::sync::Arc;

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use dotscope_common::{EngineResult, Scope, UnitId};

    use super::{ConfirmResult, ConfirmationContext};
    use crate::diff::{DifferContext, EnvDiff, EnvDiffer, ScopeDiff, ScopeGraphDiffer};
    use crate::resolution::{DataWfRef, Env, LabelWfRef, QueryParams, resolve_in};
    use crate::scopegraph::{Patch, ScopeGraph, ScopePath};

    pub(crate) struct FixedGraphs {
        pub(crate) owner: UnitId,
        pub(crate) previous: ScopeGraph<Scope, char, String>,
        pub(crate) current: ScopeGraph<Scope, char, String>,
        pub(crate) differ: Mutex<ScopeGraphDiffer<Scope, char, String>>,
    }

    impl FixedGraphs {
        pub(crate) fn new(
            owner: UnitId,
            previous: ScopeGraph<Scope, char, String>,
            current: ScopeGraph<Scope, char, String>,
        ) -> Arc<Self> {
            let differ = ScopeGraphDiffer::new(owner.clone(), previous.clone(), Patch::identity());
            Arc::new(Self {
                owner,
                previous,
                current,
                differ: Mutex::new(differ),
            })
        }
    }

    fn labels() -> Arc<Vec<char>> {
        Arc::new(vec!['E', 'P'])
    }

    #[async_trait]
    impl DifferContext<Scope, char, String> for FixedGraphs {
        fn owner(&self) -> &UnitId {
            &self.owner
        }

        async fn scope_diff(&self, scope: &Scope) -> EngineResult<Option<ScopeDiff<Scope, char>>> {
            Ok(self.differ.lock().diff(scope, &self.current, &['E', 'P']))
        }
    }

    pub(crate) struct FixedContext(pub(crate) Arc<FixedGraphs>);

    #[async_trait]
    impl ConfirmationContext<Scope, char, String> for FixedContext {
        async fn query(
            &self,
            path: ScopePath<Scope, char>,
            params: QueryParams<Scope, char, String>,
        ) -> EngineResult<Env<Scope, char, String>> {
            resolve_in(self.0.current.clone(), labels(), path.target().clone(), params).await
        }

        async fn query_previous(
            &self,
            path: ScopePath<Scope, char>,
            params: QueryParams<Scope, char, String>,
        ) -> EngineResult<Env<Scope, char, String>> {
            resolve_in(self.0.previous.clone(), labels(), path.target().clone(), params).await
        }

        async fn external_confirm(
            &self,
            _path: &ScopePath<Scope, char>,
            _label_wf: &LabelWfRef<char>,
            _data_wf: &DataWfRef<Scope, char, String>,
            _prev_env_empty: bool,
        ) -> Option<EngineResult<ConfirmResult<Scope>>> {
            None
        }

        async fn env_diff(
            &self,
            path: &ScopePath<Scope, char>,
            label_wf: &LabelWfRef<char>,
            data_wf: &DataWfRef<Scope, char, String>,
        ) -> EngineResult<EnvDiff<Scope, char, String>> {
            EnvDiffer::new(Arc::clone(&self.0))
                .diff(path.clone(), Arc::clone(label_wf), Arc::clone(data_wf))
                .await
        }

        async fn matches(&self, previous: &Scope) -> EngineResult<Option<Scope>> {
            Ok(Some(previous.clone()))
        }
    }
}
