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

//! Path and data predicates parameterising a query.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use dotscope_common::{EngineError, EngineResult};

use super::env::Env;
use crate::scopegraph::{Datum, EdgeOrData, Label, ScopeId};

pub type LabelWfRef<L> = Arc<dyn LabelWf<L>>;
pub type LabelOrderRef<L> = Arc<dyn LabelOrder<L>>;
pub type DataWfRef<S, L, D> = Arc<dyn DataWf<S, L, D>>;
pub type DataLeqRef<S, L, D> = Arc<dyn DataLeq<S, L, D>>;

/// State of a path well-formedness automaton.
pub trait LabelWf<L>: fmt::Debug + Send + Sync {
    /// The state after reading `label`, or `None` if no word with the
    /// current prefix followed by `label` is accepted.
    fn step(&self, label: &L) -> Option<LabelWfRef<L>>;

    /// Whether the path read so far may end here.
    fn accepting(&self) -> bool;
}

/// Strict partial order on labels; `lt(a, b)` means results via `a` shadow
/// results via `b`.
pub trait LabelOrder<L>: fmt::Debug + Send + Sync {
    fn lt(&self, l1: &EdgeOrData<L>, l2: &EdgeOrData<L>) -> bool;
}

/// Issues queries on behalf of a predicate. Such queries are recorded
/// separately so their outcome never leaks into reuse patches.
#[async_trait]
pub trait PredicateContext<S, L, D>: Send + Sync {
    async fn query(&self, scope: S, params: QueryParams<S, L, D>) -> EngineResult<Env<S, L, D>>;
}

#[async_trait]
pub trait DataWf<S, L, D>: fmt::Debug + Send + Sync {
    async fn wf(&self, datum: &D, ctx: &dyn PredicateContext<S, L, D>) -> EngineResult<bool>;
}

/// Data equivalence: `leq(d1, d2)` holds when `d1` adds nothing over `d2`,
/// so a path to `d1` is shadowed by a preferred path to `d2`.
#[async_trait]
pub trait DataLeq<S, L, D>: fmt::Debug + Send + Sync {
    async fn leq(&self, d1: &D, d2: &D, ctx: &dyn PredicateContext<S, L, D>) -> EngineResult<bool>;

    /// True if `leq` holds for every pair of data.
    fn always_true(&self) -> bool {
        false
    }
}

/// Predicate context for resolutions that must not issue queries, such as
/// lookups in a previous scope graph.
pub struct NoQueries;

#[async_trait]
impl<S, L, D> PredicateContext<S, L, D> for NoQueries
where
    S: ScopeId,
    L: Label,
    D: Datum<S>,
{
    async fn query(&self, _scope: S, _params: QueryParams<S, L, D>) -> EngineResult<Env<S, L, D>> {
        Err(EngineError::Predicate("queries are not available in this context".into()))
    }
}

/// Explicit deterministic automaton over labels with initial state 0.
#[derive(Debug)]
pub struct LabelAutomaton<L> {
    transitions: BTreeMap<(usize, L), usize>,
    accepting: BTreeSet<usize>,
}

impl<L: Label> LabelAutomaton<L> {
    pub fn builder() -> LabelAutomatonBuilder<L> {
        LabelAutomatonBuilder {
            transitions: BTreeMap::new(),
            accepting: BTreeSet::new(),
        }
    }
}

pub struct LabelAutomatonBuilder<L> {
    transitions: BTreeMap<(usize, L), usize>,
    accepting: BTreeSet<usize>,
}

impl<L: Label> LabelAutomatonBuilder<L> {
    pub fn transition(mut self, from: usize, label: L, to: usize) -> Self {
        self.transitions.insert((from, label), to);
        self
    }

    pub fn accept(mut self, state: usize) -> Self {
        self.accepting.insert(state);
        self
    }

    /// Initial state of the finished automaton.
    pub fn build(self) -> LabelWfRef<L> {
        let automaton = Arc::new(LabelAutomaton {
            transitions: self.transitions,
            accepting: self.accepting,
        });
        Arc::new(AutomatonState { automaton, state: 0 })
    }
}

struct AutomatonState<L> {
    automaton: Arc<LabelAutomaton<L>>,
    state: usize,
}

impl<L: fmt::Debug> fmt::Debug for AutomatonState<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "q{}", self.state)
    }
}

impl<L: Label> LabelWf<L> for AutomatonState<L> {
    fn step(&self, label: &L) -> Option<LabelWfRef<L>> {
        let next = *self.automaton.transitions.get(&(self.state, label.clone()))?;
        Some(Arc::new(AutomatonState {
            automaton: Arc::clone(&self.automaton),
            state: next,
        }))
    }

    fn accepting(&self) -> bool {
        self.automaton.accepting.contains(&self.state)
    }
}

/// Accepts exactly the empty path.
#[derive(Debug, Clone, Copy, Default)]
pub struct EpsilonWf;

impl<L> LabelWf<L> for EpsilonWf {
    fn step(&self, _label: &L) -> Option<LabelWfRef<L>> {
        None
    }

    fn accepting(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoLabelOrder;

impl<L> LabelOrder<L> for NoLabelOrder {
    fn lt(&self, _l1: &EdgeOrData<L>, _l2: &EdgeOrData<L>) -> bool {
        false
    }
}

/// Label order from a plain function.
pub struct LabelOrderFn<F> {
    name: &'static str,
    f: F,
}

impl<F> LabelOrderFn<F> {
    pub fn new(name: &'static str, f: F) -> Self {
        Self { name, f }
    }
}

impl<F> fmt::Debug for LabelOrderFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LabelOrder({})", self.name)
    }
}

impl<L, F> LabelOrder<L> for LabelOrderFn<F>
where
    F: Fn(&EdgeOrData<L>, &EdgeOrData<L>) -> bool + Send + Sync,
{
    fn lt(&self, l1: &EdgeOrData<L>, l2: &EdgeOrData<L>) -> bool {
        (self.f)(l1, l2)
    }
}

/// Order given by explicit `(preferred, shadowed)` pairs, closed
/// transitively.
#[derive(Debug, Clone)]
pub struct ExplicitOrder<L: Ord> {
    less: BTreeSet<(EdgeOrData<L>, EdgeOrData<L>)>,
}

impl<L: Label> ExplicitOrder<L> {
    pub fn new(pairs: impl IntoIterator<Item = (EdgeOrData<L>, EdgeOrData<L>)>) -> Self {
        let mut less: BTreeSet<_> = pairs.into_iter().collect();
        loop {
            let mut added = Vec::new();
            for (a, b) in &less {
                for (c, d) in &less {
                    if b == c && !less.contains(&(a.clone(), d.clone())) {
                        added.push((a.clone(), d.clone()));
                    }
                }
            }
            if added.is_empty() {
                break;
            }
            less.extend(added);
        }
        Self { less }
    }
}

impl<L: Label> LabelOrder<L> for ExplicitOrder<L> {
    fn lt(&self, l1: &EdgeOrData<L>, l2: &EdgeOrData<L>) -> bool {
        self.less.contains(&(l1.clone(), l2.clone()))
    }
}

/// Accepts every datum.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnyData;

#[async_trait]
impl<S, L, D> DataWf<S, L, D> for AnyData
where
    S: ScopeId,
    L: Label,
    D: Datum<S>,
{
    async fn wf(&self, _datum: &D, _ctx: &dyn PredicateContext<S, L, D>) -> EngineResult<bool> {
        Ok(true)
    }
}

/// Data well-formedness from a plain function of the datum.
pub struct DataWfFn<F> {
    name: &'static str,
    f: F,
}

impl<F> DataWfFn<F> {
    pub fn new(name: &'static str, f: F) -> Self {
        Self { name, f }
    }
}

impl<F> fmt::Debug for DataWfFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DataWf({})", self.name)
    }
}

#[async_trait]
impl<S, L, D, F> DataWf<S, L, D> for DataWfFn<F>
where
    S: ScopeId,
    L: Label,
    D: Datum<S>,
    F: Fn(&D) -> bool + Send + Sync,
{
    async fn wf(&self, datum: &D, _ctx: &dyn PredicateContext<S, L, D>) -> EngineResult<bool> {
        Ok((self.f)(datum))
    }
}

/// Every datum is covered by every other one: any preferred result hides
/// all less preferred ones.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysLeq;

#[async_trait]
impl<S, L, D> DataLeq<S, L, D> for AlwaysLeq
where
    S: ScopeId,
    L: Label,
    D: Datum<S>,
{
    async fn leq(&self, _d1: &D, _d2: &D, _ctx: &dyn PredicateContext<S, L, D>) -> EngineResult<bool> {
        Ok(true)
    }

    fn always_true(&self) -> bool {
        true
    }
}

/// No shadowing at all.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverLeq;

#[async_trait]
impl<S, L, D> DataLeq<S, L, D> for NeverLeq
where
    S: ScopeId,
    L: Label,
    D: Datum<S>,
{
    async fn leq(&self, _d1: &D, _d2: &D, _ctx: &dyn PredicateContext<S, L, D>) -> EngineResult<bool> {
        Ok(false)
    }
}

pub struct DataLeqFn<F> {
    name: &'static str,
    f: F,
}

impl<F> DataLeqFn<F> {
    pub fn new(name: &'static str, f: F) -> Self {
        Self { name, f }
    }
}

impl<F> fmt::Debug for DataLeqFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DataLeq({})", self.name)
    }
}

#[async_trait]
impl<S, L, D, F> DataLeq<S, L, D> for DataLeqFn<F>
where
    S: ScopeId,
    L: Label,
    D: Datum<S>,
    F: Fn(&D, &D) -> bool + Send + Sync,
{
    async fn leq(&self, d1: &D, d2: &D, _ctx: &dyn PredicateContext<S, L, D>) -> EngineResult<bool> {
        Ok((self.f)(d1, d2))
    }
}

/// Everything a query needs besides its starting point.
pub struct QueryParams<S, L, D> {
    pub label_wf: LabelWfRef<L>,
    pub label_order: LabelOrderRef<L>,
    pub data_wf: DataWfRef<S, L, D>,
    pub data_leq: DataLeqRef<S, L, D>,
}

impl<S, L, D> Clone for QueryParams<S, L, D> {
    fn clone(&self) -> Self {
        Self {
            label_wf: Arc::clone(&self.label_wf),
            label_order: Arc::clone(&self.label_order),
            data_wf: Arc::clone(&self.data_wf),
            data_leq: Arc::clone(&self.data_leq),
        }
    }
}

impl<S, L: fmt::Debug, D> fmt::Debug for QueryParams<S, L, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryParams")
            .field("label_wf", &self.label_wf)
            .field("label_order", &self.label_order)
            .field("data_wf", &self.data_wf)
            .field("data_leq", &self.data_leq)
            .finish()
    }
}

impl<S, L, D> QueryParams<S, L, D>
where
    S: ScopeId,
    L: Label,
    D: Datum<S>,
{
    pub fn new(
        label_wf: LabelWfRef<L>,
        label_order: LabelOrderRef<L>,
        data_wf: DataWfRef<S, L, D>,
        data_leq: DataLeqRef<S, L, D>,
    ) -> Self {
        Self {
            label_wf,
            label_order,
            data_wf,
            data_leq,
        }
    }

    /// Query without shadowing: no label order and no data equivalence.
    pub fn unordered(label_wf: LabelWfRef<L>, data_wf: DataWfRef<S, L, D>) -> Self {
        Self::new(label_wf, Arc::new(NoLabelOrder), data_wf, Arc::new(NeverLeq))
    }

    /// Every datum reachable through `label_wf`.
    pub fn all(label_wf: LabelWfRef<L>) -> Self {
        Self::unordered(label_wf, Arc::new(AnyData))
    }

    pub fn with_label_wf(&self, label_wf: LabelWfRef<L>) -> Self {
        Self {
            label_wf,
            ..self.clone()
        }
    }
}
