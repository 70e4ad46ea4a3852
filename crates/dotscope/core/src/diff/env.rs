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

//! Environment differencing
//!
//! Walks the part of the scope graph a query could have visited and
//! reports, per edge, whether it was added, removed, or leads into another
//! unit. Matched edges inside the unit are followed; everything else is
//! left to the caller to check.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use tracing::trace;

use dotscope_common::{EngineResult, UnitId};

use super::ScopeDiff;
use crate::resolution::{DataWfRef, EpsilonWf, LabelWfRef};
use crate::scopegraph::{Datum, Label, Patch, ScopeId, ScopePath};

pub enum EnvChange<S, L, D> {
    /// A current path with no previous counterpart.
    AddedEdge {
        path: ScopePath<S, L>,
        label_wf: LabelWfRef<L>,
        data_wf: DataWfRef<S, L, D>,
    },
    /// A previous path, in previous identities, that no longer exists.
    RemovedEdge {
        path: ScopePath<S, L>,
        label_wf: LabelWfRef<L>,
        data_wf: DataWfRef<S, L, D>,
    },
    /// A path continuing in another unit.
    External {
        path: ScopePath<S, L>,
        label_wf: LabelWfRef<L>,
        data_wf: DataWfRef<S, L, D>,
    },
}

impl<S: fmt::Debug, L: fmt::Debug, D> fmt::Debug for EnvChange<S, L, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (kind, path, label_wf) = match self {
            EnvChange::AddedEdge { path, label_wf, .. } => ("added", path, label_wf),
            EnvChange::RemovedEdge { path, label_wf, .. } => ("removed", path, label_wf),
            EnvChange::External { path, label_wf, .. } => ("external", path, label_wf),
        };
        write!(f, "{} {:?} under {:?}", kind, path, label_wf)
    }
}

#[derive(Debug)]
pub struct EnvDiff<S: Ord, L, D> {
    /// Previous ↦ current for every scope the walk matched.
    pub patches: Patch<S>,
    pub changes: Vec<EnvChange<S, L, D>>,
}

impl<S: Ord + Clone, L, D> EnvDiff<S, L, D> {
    pub fn empty() -> Self {
        Self {
            patches: Patch::identity(),
            changes: Vec::new(),
        }
    }

    pub fn is_unchanged(&self) -> bool {
        self.changes.is_empty()
    }

    fn absorb(&mut self, other: EnvDiff<S, L, D>) {
        for (previous, current) in other.patches.iter() {
            self.patches.put(previous.clone(), current.clone());
        }
        self.changes.extend(other.changes);
    }
}

/// Scope-level diffs of the unit the walk runs in.
#[async_trait]
pub trait DifferContext<S, L, D>: Send + Sync {
    fn owner(&self) -> &UnitId;

    /// Diff of an owned scope, once it is closed. `None` if the scope did
    /// not exist in the previous run.
    async fn scope_diff(&self, scope: &S) -> EngineResult<Option<ScopeDiff<S, L>>>;
}

pub struct EnvDiffer<C> {
    context: Arc<C>,
}

impl<C> EnvDiffer<C> {
    pub fn new(context: Arc<C>) -> Self {
        Self { context }
    }

    pub fn diff<S, L, D>(
        &self,
        path: ScopePath<S, L>,
        label_wf: LabelWfRef<L>,
        data_wf: DataWfRef<S, L, D>,
    ) -> BoxFuture<'static, EngineResult<EnvDiff<S, L, D>>>
    where
        S: ScopeId,
        L: Label,
        D: Datum<S>,
        C: DifferContext<S, L, D> + 'static,
    {
        walk(Arc::clone(&self.context), path, label_wf, data_wf)
    }
}

fn walk<S, L, D, C>(
    context: Arc<C>,
    path: ScopePath<S, L>,
    label_wf: LabelWfRef<L>,
    data_wf: DataWfRef<S, L, D>,
) -> BoxFuture<'static, EngineResult<EnvDiff<S, L, D>>>
where
    S: ScopeId,
    L: Label,
    D: Datum<S>,
    C: DifferContext<S, L, D> + 'static,
{
    async move {
        let mut out = EnvDiff::empty();
        let scope = path.target().clone();
        if scope.owner() != context.owner() {
            out.changes.push(EnvChange::External { path, label_wf, data_wf });
            return Ok(out);
        }
        let Some(diff) = context.scope_diff(&scope).await? else {
            trace!("{:?} is new", scope);
            out.changes.push(EnvChange::AddedEdge { path, label_wf, data_wf });
            return Ok(out);
        };
        out.patches.put(diff.previous.clone(), diff.current.clone());

        if label_wf.accepting() && diff.datum_changed {
            let epsilon: LabelWfRef<L> = Arc::new(EpsilonWf);
            if diff.has_datum {
                out.changes.push(EnvChange::AddedEdge {
                    path: path.clone(),
                    label_wf: Arc::clone(&epsilon),
                    data_wf: Arc::clone(&data_wf),
                });
            }
            if diff.had_datum {
                out.changes.push(EnvChange::RemovedEdge {
                    path: ScopePath::new(diff.previous.clone()),
                    label_wf: epsilon,
                    data_wf: Arc::clone(&data_wf),
                });
            }
        }
        for (label, target) in diff.added {
            let (Some(next), Some(step)) = (label_wf.step(&label), path.step(label, target)) else {
                continue;
            };
            out.changes.push(EnvChange::AddedEdge {
                path: step,
                label_wf: next,
                data_wf: Arc::clone(&data_wf),
            });
        }
        for (label, target) in diff.removed {
            let previous_path = ScopePath::new(diff.previous.clone());
            let (Some(next), Some(step)) = (label_wf.step(&label), previous_path.step(label, target)) else {
                continue;
            };
            out.changes.push(EnvChange::RemovedEdge {
                path: step,
                label_wf: next,
                data_wf: Arc::clone(&data_wf),
            });
        }
        for (label, target) in diff.matched {
            let (Some(next), Some(step)) = (label_wf.step(&label), path.step(label, target)) else {
                continue;
            };
            let sub = walk(Arc::clone(&context), step, next, Arc::clone(&data_wf)).await?;
            out.absorb(sub);
        }
        Ok(out)
    }
    .boxed()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::diff::ScopeGraphDiffer;
    use crate::resolution::{AnyData, LabelAutomaton};
    use crate::scopegraph::ScopeGraph;
    use dotscope_common::Scope;
    use parking_lot::Mutex;

    struct FixedContext {
        owner: UnitId,
        current: ScopeGraph<Scope, char, String>,
        differ: Mutex<ScopeGraphDiffer<Scope, char, String>>,
    }

    #[async_trait]
    impl DifferContext<Scope, char, String> for FixedContext {
        fn owner(&self) -> &UnitId {
            &self.owner
        }

        async fn scope_diff(&self, scope: &Scope) -> EngineResult<Option<ScopeDiff<Scope, char>>> {
            Ok(self.differ.lock().diff(scope, &self.current, &['E']))
        }
    }

    fn star() -> LabelWfRef<char> {
        LabelAutomaton::builder().transition(0, 'E', 0).accept(0).build()
    }

    fn kinds(diff: &EnvDiff<Scope, char, String>) -> HashMap<&'static str, usize> {
        let mut counts = HashMap::new();
        for change in &diff.changes {
            let kind = match change {
                EnvChange::AddedEdge { .. } => "added",
                EnvChange::RemovedEdge { .. } => "removed",
                EnvChange::External { .. } => "external",
            };
            *counts.entry(kind).or_insert(0) += 1;
        }
        counts
    }

    #[test]
    fn test_walk_reports_changes_and_external_edges() {
        let a = UnitId::new("a");
        let b = UnitId::new("b");
        let s = Scope::new(a.clone(), "s-0");
        let kept = Scope::new(a.clone(), "k-0");
        let gone = Scope::new(a.clone(), "g-0");
        let new = Scope::new(a.clone(), "n-0");
        let foreign = Scope::new(b, "f-0");

        let mut previous = ScopeGraph::new();
        previous.add_edge(s.clone(), 'E', kept.clone());
        previous.add_edge(s.clone(), 'E', gone.clone());
        previous.add_edge(kept.clone(), 'E', foreign.clone());
        previous.set_datum(gone.clone(), "g".to_string());
        let mut current = ScopeGraph::new();
        current.add_edge(s.clone(), 'E', kept.clone());
        current.add_edge(s.clone(), 'E', new.clone());
        current.add_edge(kept.clone(), 'E', foreign.clone());
        current.set_datum(new.clone(), "n".to_string());

        let context = Arc::new(FixedContext {
            owner: a.clone(),
            current,
            differ: Mutex::new(ScopeGraphDiffer::new(a, previous, Patch::identity())),
        });
        let data_wf: DataWfRef<Scope, char, String> = Arc::new(AnyData);
        let diff = futures::executor::block_on(EnvDiffer::new(context).diff(ScopePath::new(s.clone()), star(), data_wf)).unwrap();
        let counts = kinds(&diff);
        assert_eq!(counts.get("added"), Some(&1));
        assert_eq!(counts.get("removed"), Some(&1));
        assert_eq!(counts.get("external"), Some(&1));
        assert_eq!(diff.patches.get(&kept), Some(&kept));
    }
}
