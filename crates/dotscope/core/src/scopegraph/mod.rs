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

//! Scope graph values
//!
//! The scope graph is a labelled multi-graph over scopes plus a partial map
//! from scopes to data. Each unit owns a fragment; fragments of disjoint
//! scope sets merge commutatively with [`ScopeGraph::add_all`].
//!
//! Graphs are copy-on-write: cloning shares the underlying maps and the
//! first mutation of a clone copies them once, so snapshots are cheap while
//! a unit builds its fragment in place.

pub mod patch;
pub mod path;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

use dotscope_common::{Scope, UnitId};

pub use patch::Patch;
pub use path::{ResolutionPath, ScopePath};

/// Identity of a scope. Every scope is owned by the unit that created it.
pub trait ScopeId: Clone + Eq + Hash + Ord + Debug + Send + Sync + 'static {
    /// Create the scope `name` owned by `owner`.
    fn new_scope(owner: &UnitId, name: &str) -> Self;

    fn owner(&self) -> &UnitId;
}

impl ScopeId for Scope {
    fn new_scope(owner: &UnitId, name: &str) -> Self {
        Scope::new(owner.clone(), name)
    }

    fn owner(&self) -> &UnitId {
        Scope::owner(self)
    }
}

/// Edge labels. Any small, ordered, hashable value qualifies.
pub trait Label: Clone + Eq + Hash + Ord + Debug + Send + Sync + 'static {}

impl<T> Label for T where T: Clone + Eq + Hash + Ord + Debug + Send + Sync + 'static {}

/// Data attached to scopes. Data may mention scopes, which must follow
/// identity patches when a previous result is reused.
pub trait Datum<S: ScopeId>: Clone + Eq + Hash + Debug + Send + Sync + 'static {
    fn substitute(&self, patch: &Patch<S>) -> Self;
}

macro_rules! scope_free_datum {
    ($($ty:ty),* $(,)?) => {
        $(
            impl<S: ScopeId> Datum<S> for $ty {
                fn substitute(&self, _patch: &Patch<S>) -> Self {
                    self.clone()
                }
            }
        )*
    };
}

scope_free_datum!(String, &'static str, (), bool, i32, i64, u32, u64, usize);

impl Datum<Scope> for Scope {
    fn substitute(&self, patch: &Patch<Scope>) -> Self {
        patch.apply(self)
    }
}

impl<S: ScopeId, D: Datum<S>> Datum<S> for Vec<D> {
    fn substitute(&self, patch: &Patch<S>) -> Self {
        self.iter().map(|d| d.substitute(patch)).collect()
    }
}

impl<S: ScopeId, A: Datum<S>, B: Datum<S>> Datum<S> for (A, B) {
    fn substitute(&self, patch: &Patch<S>) -> Self {
        (self.0.substitute(patch), self.1.substitute(patch))
    }
}

/// A label extended with the pseudo-label standing for "the datum here".
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EdgeOrData<L> {
    Data,
    Edge(L),
}

impl<L> EdgeOrData<L> {
    pub fn label(&self) -> Option<&L> {
        match self {
            EdgeOrData::Edge(l) => Some(l),
            EdgeOrData::Data => None,
        }
    }

    pub fn is_data(&self) -> bool {
        matches!(self, EdgeOrData::Data)
    }
}

type EdgeMap<S, L> = BTreeMap<S, BTreeMap<L, BTreeSet<S>>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeGraph<S, L, D> {
    edges: Arc<EdgeMap<S, L>>,
    data: Arc<BTreeMap<S, D>>,
}

impl<S: Ord, L: Ord, D> Default for ScopeGraph<S, L, D> {
    fn default() -> Self {
        Self {
            edges: Arc::new(BTreeMap::new()),
            data: Arc::new(BTreeMap::new()),
        }
    }
}

impl<S, L, D> ScopeGraph<S, L, D>
where
    S: Clone + Ord,
    L: Clone + Ord,
    D: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `source -label-> target`. Returns false if the edge was present.
    pub fn add_edge(&mut self, source: S, label: L, target: S) -> bool {
        Arc::make_mut(&mut self.edges)
            .entry(source)
            .or_default()
            .entry(label)
            .or_default()
            .insert(target)
    }

    /// Set the datum of `scope`, returning the datum it replaces.
    pub fn set_datum(&mut self, scope: S, datum: D) -> Option<D> {
        Arc::make_mut(&mut self.data).insert(scope, datum)
    }

    pub fn get_edges(&self, scope: &S, label: &L) -> Vec<S> {
        self.edges
            .get(scope)
            .and_then(|labels| labels.get(label))
            .map(|targets| targets.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Labels with at least one outgoing edge from `scope`.
    pub fn get_labels(&self, scope: &S) -> Vec<L> {
        self.edges
            .get(scope)
            .map(|labels| labels.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn get_datum(&self, scope: &S) -> Option<&D> {
        self.data.get(scope)
    }

    pub fn edges(&self) -> impl Iterator<Item = (&S, &L, &S)> {
        self.edges.iter().flat_map(|(source, labels)| {
            labels
                .iter()
                .flat_map(move |(label, targets)| targets.iter().map(move |target| (source, label, target)))
        })
    }

    pub fn data(&self) -> impl Iterator<Item = (&S, &D)> {
        self.data.iter()
    }

    /// Every scope that has an edge, is an edge target, or has a datum.
    pub fn scopes(&self) -> BTreeSet<S> {
        let mut scopes = BTreeSet::new();
        for (source, _, target) in self.edges() {
            scopes.insert(source.clone());
            scopes.insert(target.clone());
        }
        scopes.extend(self.data.keys().cloned());
        scopes
    }

    pub fn edge_count(&self) -> usize {
        self.edges().count()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty() && self.data.is_empty()
    }

    /// Merge `other` into a new graph. For scope-disjoint operands this is
    /// commutative and associative.
    pub fn add_all(&self, other: &ScopeGraph<S, L, D>) -> ScopeGraph<S, L, D> {
        let mut merged = self.clone();
        merged.extend(other);
        merged
    }

    /// In-place variant of [`ScopeGraph::add_all`].
    pub fn extend(&mut self, other: &ScopeGraph<S, L, D>) {
        if other.is_empty() {
            return;
        }
        for (source, label, target) in other.edges() {
            self.add_edge(source.clone(), label.clone(), target.clone());
        }
        for (scope, datum) in other.data() {
            self.set_datum(scope.clone(), datum.clone());
        }
    }
}
