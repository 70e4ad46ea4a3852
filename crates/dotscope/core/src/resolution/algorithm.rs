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

//! Environment computation
//!
//! `env(p, re)` collects every datum reachable from the target of `p` along
//! a path accepted by `re`, preferring labels according to the label order
//! and dropping less preferred data that add nothing under data
//! equivalence. Cycles are cut by refusing to revisit a scope.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, try_join_all};
use tracing::trace;

use dotscope_common::EngineResult;

use super::env::Env;
use super::predicates::{LabelOrderRef, LabelWfRef};
use crate::scopegraph::{Datum, EdgeOrData, Label, ResolutionPath, ScopeId, ScopePath};

/// The graph access and predicate evaluation a resolution runs against.
#[async_trait]
pub trait ResolutionContext<S, L, D>: Send + Sync {
    /// Answer for a path that is resolved elsewhere, typically because the
    /// target scope belongs to another unit. `None` resolves locally.
    async fn external_env(&self, path: &ScopePath<S, L>, re: &LabelWfRef<L>) -> Option<EngineResult<Env<S, L, D>>>;

    /// Targets of `scope -label->`. Completes once no more such edges can
    /// appear.
    async fn get_edges(&self, scope: &S, label: &L) -> EngineResult<Vec<S>>;

    async fn get_datum(&self, scope: &S) -> EngineResult<Option<D>>;

    async fn data_wf(&self, datum: &D) -> EngineResult<bool>;

    async fn data_leq(&self, d1: &D, d2: &D) -> EngineResult<bool>;

    fn data_leq_always_true(&self) -> bool;
}

pub struct NameResolution<S, L, D, C> {
    edge_labels: Arc<Vec<L>>,
    label_order: LabelOrderRef<L>,
    context: Arc<C>,
    _marker: PhantomData<fn() -> (S, D)>,
}

impl<S, L, D, C> NameResolution<S, L, D, C>
where
    S: ScopeId,
    L: Label,
    D: Datum<S>,
    C: ResolutionContext<S, L, D> + 'static,
{
    pub fn new(edge_labels: Arc<Vec<L>>, label_order: LabelOrderRef<L>, context: Arc<C>) -> Arc<Self> {
        Arc::new(Self {
            edge_labels,
            label_order,
            context,
            _marker: PhantomData,
        })
    }

    pub fn env(self: &Arc<Self>, path: ScopePath<S, L>, re: LabelWfRef<L>) -> BoxFuture<'static, EngineResult<Env<S, L, D>>> {
        let this = Arc::clone(self);
        async move {
            trace!("env {:?} in {:?}", path, re);
            if let Some(env) = this.context.external_env(&path, &re).await {
                return env;
            }
            let mut labels = Vec::new();
            if re.accepting() {
                labels.push(EdgeOrData::Data);
            }
            for label in this.edge_labels.iter() {
                if re.step(label).is_some() {
                    labels.push(EdgeOrData::Edge(label.clone()));
                }
            }
            this.env_labels(path, re, labels).await
        }
        .boxed()
    }

    fn env_labels(
        self: &Arc<Self>,
        path: ScopePath<S, L>,
        re: LabelWfRef<L>,
        labels: Vec<EdgeOrData<L>>,
    ) -> BoxFuture<'static, EngineResult<Env<S, L, D>>> {
        let this = Arc::clone(self);
        async move {
            let order = &this.label_order;
            let max: Vec<_> = labels
                .iter()
                .filter(|l1| !labels.iter().any(|l2| order.lt(l1, l2)))
                .cloned()
                .collect();
            let per_label = max.into_iter().map(|label| {
                let smaller: Vec<_> = labels.iter().filter(|l2| order.lt(l2, &label)).cloned().collect();
                this.env_label_under(path.clone(), Arc::clone(&re), label, smaller)
            });
            let mut env = Env::empty();
            for part in try_join_all(per_label).await? {
                env.union(part);
            }
            Ok(env)
        }
        .boxed()
    }

    /// Environment of `label` shadowed by the environment of the labels
    /// preferred over it.
    fn env_label_under(
        self: &Arc<Self>,
        path: ScopePath<S, L>,
        re: LabelWfRef<L>,
        label: EdgeOrData<L>,
        smaller: Vec<EdgeOrData<L>>,
    ) -> BoxFuture<'static, EngineResult<Env<S, L, D>>> {
        let this = Arc::clone(self);
        async move {
            let preferred = this.env_labels(path.clone(), Arc::clone(&re), smaller).await?;
            if !preferred.is_empty() && this.context.data_leq_always_true() {
                return Ok(preferred);
            }
            let own = this.env_label(path, re, label).await?;
            this.shadow(preferred, own).await
        }
        .boxed()
    }

    fn env_label(
        self: &Arc<Self>,
        path: ScopePath<S, L>,
        re: LabelWfRef<L>,
        label: EdgeOrData<L>,
    ) -> BoxFuture<'static, EngineResult<Env<S, L, D>>> {
        match label {
            EdgeOrData::Data => self.env_data(path),
            EdgeOrData::Edge(label) => self.env_edges(path, re, label),
        }
    }

    fn env_data(self: &Arc<Self>, path: ScopePath<S, L>) -> BoxFuture<'static, EngineResult<Env<S, L, D>>> {
        let this = Arc::clone(self);
        async move {
            let Some(datum) = this.context.get_datum(path.target()).await? else {
                return Ok(Env::empty());
            };
            if !this.context.data_wf(&datum).await? {
                return Ok(Env::empty());
            }
            Ok(Env::of(path.resolve(datum)))
        }
        .boxed()
    }

    fn env_edges(
        self: &Arc<Self>,
        path: ScopePath<S, L>,
        re: LabelWfRef<L>,
        label: L,
    ) -> BoxFuture<'static, EngineResult<Env<S, L, D>>> {
        let this = Arc::clone(self);
        async move {
            let Some(next) = re.step(&label) else {
                return Ok(Env::empty());
            };
            let targets = this.context.get_edges(path.target(), &label).await?;
            let sub_envs = targets
                .into_iter()
                .filter_map(|target| path.step(label.clone(), target))
                .map(|step| this.env(step, Arc::clone(&next)));
            let mut env = Env::empty();
            for part in try_join_all(sub_envs).await? {
                env.union(part);
            }
            Ok(env)
        }
        .boxed()
    }

    /// Keep every preferred path; keep a less preferred path only if no
    /// preferred datum covers it.
    async fn shadow(&self, preferred: Env<S, L, D>, candidates: Env<S, L, D>) -> EngineResult<Env<S, L, D>> {
        let mut env = preferred.clone();
        for rejected in candidates.rejected() {
            env.reject(rejected.clone());
        }
        for candidate in candidates.accepted() {
            if self.is_shadowed(candidate, &preferred).await? {
                if !preferred.accepted().contains(candidate) {
                    env.reject(candidate.clone());
                }
            } else {
                env.accept(candidate.clone());
            }
        }
        Ok(env)
    }

    async fn is_shadowed(&self, candidate: &ResolutionPath<S, L, D>, preferred: &Env<S, L, D>) -> EngineResult<bool> {
        for winner in preferred.accepted() {
            if self.context.data_leq(candidate.datum(), winner.datum()).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// `shadow` exposed for environments computed elsewhere.
    pub async fn shadow_envs(&self, preferred: Env<S, L, D>, candidates: Env<S, L, D>) -> EngineResult<Env<S, L, D>> {
        self.shadow(preferred, candidates).await
    }
}
