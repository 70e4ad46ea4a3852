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

//! Units
//!
//! A unit owns a fragment of the scope graph and runs one local checker (or
//! replays a previous result, or serves a static library). Units only talk
//! to each other through [`protocol::Message`]s; all cross-unit waiting is
//! expressed as wait-for tokens so the deadlock detector can see it.

pub mod context;
pub(crate) mod confirm_context;
pub(crate) mod lifecycle;
pub(crate) mod protocol;
pub(crate) mod query;
pub mod result;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use futures::channel::oneshot;
use tracing::{debug, trace};

use dotscope_common::{EngineError, EngineResult, UnitId};

use crate::checker::{ScopeGraphLibrary, TypeChecker, UnitOutput};
use crate::diff::ScopeGraphDiffer;
use crate::engine::Effects;
use crate::runtime::Completable;
use crate::scopegraph::{Datum, EdgeOrData, Label, Patch, ScopeGraph, ScopeId};
use crate::wait_for::{WaitFor, WaitForSet};
use protocol::Message;
use result::{RecordedQuery, StateCapture, TransitionTrace, UnitResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitState {
    InitUnit,
    InitTc,
    /// Waiting for the reuse decision.
    Unknown,
    Active,
    Released,
    Done,
}

impl UnitState {
    /// States in which the checker may use its context.
    pub fn is_active(self) -> bool {
        matches!(self, UnitState::InitTc | UnitState::Unknown | UnitState::Active | UnitState::Released)
    }
}

/// How a unit became active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Active,
    /// The previous result was reused instead.
    Released,
}

/// Verdict a unit contributes when its deadlocked cluster contains units
/// whose reuse decision is still open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateSummary<S: Ord> {
    /// The unit is running; undecided units cannot rely on it.
    Restart,
    /// The unit reused its result under this patch.
    Released(Patch<S>),
    /// The unit is undecided and would reuse under this patch.
    Release(Patch<S>),
}

pub(crate) enum UnitKind<S, L, D, R>
where
    S: ScopeId,
    L: Label,
    D: Datum<S>,
    R: UnitOutput<S>,
{
    TypeChecker(Arc<dyn TypeChecker<S, L, D, R>>),
    /// Stands in for a sub-unit of a previous run. Replaying phantoms
    /// rebuild their previous fragment; the others only answer questions
    /// about the previous run.
    Phantom { replay: bool },
    Library(Arc<ScopeGraphLibrary<S, L, D>>),
}

struct Delay<S, L> {
    scope: S,
    label: EdgeOrData<L>,
    notify: oneshot::Sender<()>,
}

pub(crate) struct Unit<S, L, D, R>
where
    S: ScopeId,
    L: Label,
    D: Datum<S>,
    R: UnitOutput<S>,
{
    pub(crate) id: UnitId,
    pub(crate) parent: Option<UnitId>,
    pub(crate) kind: UnitKind<S, L, D, R>,
    pub(crate) state: UnitState,
    pub(crate) root_scopes: Vec<S>,
    pub(crate) scopes: BTreeSet<S>,
    pub(crate) scope_name_counters: BTreeMap<String, usize>,
    /// Owned fragment, including edges other units added to owned scopes.
    pub(crate) scope_graph: ScopeGraph<S, L, D>,
    /// Everything this unit asserted, on owned and shared scopes.
    pub(crate) local_scope_graph: ScopeGraph<S, L, D>,
    /// Open labels on scopes of other units this unit initialised.
    pub(crate) shared_labels: BTreeMap<S, BTreeSet<EdgeOrData<L>>>,
    pub(crate) initialized_shares: BTreeSet<S>,
    pub(crate) waits: WaitForSet<S, L>,
    delays: Vec<Delay<S, L>>,
    pub(crate) previous: Option<UnitResult<S, L, D, R>>,
    pub(crate) changed: bool,
    /// Previous root scopes owned here, mapped to the roots handed out now.
    pub(crate) matched_by_sharing: Patch<S>,
    pub(crate) recorded_queries: Vec<RecordedQuery<S, L, D>>,
    pub(crate) sub_units: BTreeMap<String, UnitId>,
    pub(crate) sub_results: BTreeMap<String, UnitResult<S, L, D, R>>,
    pub(crate) checker_result: Option<Option<R>>,
    pub(crate) failures: Vec<String>,
    pub(crate) transition_trace: TransitionTrace,
    pub(crate) when_active: Completable<Activation>,
    pub(crate) context_activated: Completable<()>,
    pub(crate) in_local_phase: bool,
    pub(crate) confirmation_result: Completable<Option<Patch<S>>>,
    pub(crate) release_patch: Option<Patch<S>>,
    pub(crate) differ: Option<ScopeGraphDiffer<S, L, D>>,
    pub(crate) local_capture: Option<StateCapture<S, L, D>>,
    pub(crate) result: Completable<UnitResult<S, L, D, R>>,
    pub(crate) finished: bool,
}

impl<S, L, D, R> Unit<S, L, D, R>
where
    S: ScopeId,
    L: Label,
    D: Datum<S>,
    R: UnitOutput<S>,
{
    pub(crate) fn new(
        id: UnitId,
        parent: Option<UnitId>,
        kind: UnitKind<S, L, D, R>,
        previous: Option<UnitResult<S, L, D, R>>,
        changed: bool,
        local_phase: bool,
    ) -> Self {
        let context_activated = Completable::new();
        if !local_phase {
            context_activated.complete(());
        }
        Self {
            id,
            parent,
            kind,
            state: UnitState::InitUnit,
            root_scopes: Vec::new(),
            scopes: BTreeSet::new(),
            scope_name_counters: BTreeMap::new(),
            scope_graph: ScopeGraph::new(),
            local_scope_graph: ScopeGraph::new(),
            shared_labels: BTreeMap::new(),
            initialized_shares: BTreeSet::new(),
            waits: WaitForSet::new(),
            delays: Vec::new(),
            previous,
            changed,
            matched_by_sharing: Patch::identity(),
            recorded_queries: Vec::new(),
            sub_units: BTreeMap::new(),
            sub_results: BTreeMap::new(),
            checker_result: None,
            failures: Vec::new(),
            transition_trace: TransitionTrace::InitiallyStarted,
            when_active: Completable::new(),
            context_activated,
            in_local_phase: local_phase,
            confirmation_result: Completable::new(),
            release_patch: None,
            differ: None,
            local_capture: None,
            result: Completable::new(),
            finished: false,
        }
    }

    pub(crate) fn owns(&self, scope: &S) -> bool {
        scope.owner() == &self.id
    }

    /// Owned scopes must have been created by this unit.
    fn assert_known(&self, scope: &S) -> EngineResult<()> {
        if self.owns(scope) && !self.scopes.contains(scope) {
            return Err(EngineError::UnknownScope(format!("{:?}", scope)));
        }
        Ok(())
    }

    pub(crate) fn checker(&self) -> Option<Arc<dyn TypeChecker<S, L, D, R>>> {
        match &self.kind {
            UnitKind::TypeChecker(checker) => Some(Arc::clone(checker)),
            _ => None,
        }
    }

    pub(crate) fn is_removed_phantom(&self) -> bool {
        matches!(self.kind, UnitKind::Phantom { replay: false })
    }

    // Wait-for bookkeeping

    pub(crate) fn wait_for(&mut self, token: WaitFor<S, L>, target: UnitId, fx: &mut Effects<S, L, D, R>) {
        trace!("{} waits for {:?} on {}", self.id, token, target);
        self.waits.add(token.clone(), target.clone());
        fx.wait_added(token, target);
    }

    /// Grant `token` raised towards `target`. Granting an absent token is a
    /// no-op.
    pub(crate) fn granted(&mut self, token: &WaitFor<S, L>, target: &UnitId, fx: &mut Effects<S, L, D, R>) -> bool {
        if !self.waits.remove(token, target) {
            trace!("{} ignores grant of {:?} from {}", self.id, token, target);
            return false;
        }
        trace!("{} granted {:?} by {}", self.id, token, target);
        fx.wait_removed(token.clone(), target.clone());
        self.fire_delays();
        self.try_finish(fx);
        true
    }

    pub(crate) fn is_open(&self, scope: &S, label: &EdgeOrData<L>) -> bool {
        self.waits.is_open(scope, label)
    }

    /// No more edges for `label` of `scope` can come from, or through, this
    /// unit. For scopes of other units only this unit's own share counts.
    pub(crate) fn is_closed(&self, scope: &S, label: &EdgeOrData<L>) -> bool {
        if self.owns(scope) {
            !self.waits.is_open(scope, label)
        } else {
            !self
                .shared_labels
                .get(scope)
                .is_some_and(|labels| labels.contains(label))
        }
    }

    /// Receiver completing once `label` of `scope` is closed, or `None` if
    /// it already is.
    pub(crate) fn delay_until_closed(&mut self, scope: &S, label: &EdgeOrData<L>) -> Option<oneshot::Receiver<()>> {
        if self.is_closed(scope, label) {
            return None;
        }
        let (notify, rx) = oneshot::channel();
        self.delays.push(Delay {
            scope: scope.clone(),
            label: label.clone(),
            notify,
        });
        Some(rx)
    }

    pub(crate) fn fire_delays(&mut self) {
        if self.delays.is_empty() {
            return;
        }
        let (closed, open): (Vec<_>, Vec<_>) = std::mem::take(&mut self.delays)
            .into_iter()
            .partition(|d| self.is_closed(&d.scope, &d.label));
        self.delays = open;
        for delay in closed {
            let _ = delay.notify.send(());
        }
    }

    pub(crate) fn drop_delays(&mut self) {
        self.delays.clear();
    }

    /// Grant every closure token this unit holds. Used when deadlock
    /// resolution establishes that no more input can arrive.
    pub(crate) fn grant_closure_tokens(&mut self, fx: &mut Effects<S, L, D, R>) -> usize {
        let closures: Vec<_> = self
            .waits
            .entries()
            .into_iter()
            .filter(|(token, _)| token.is_closure())
            .collect();
        let shared: usize = self.shared_labels.values().map(BTreeSet::len).sum();
        let count = closures.len() + shared;
        for (token, target) in closures {
            self.granted(&token, &target, fx);
        }
        self.shared_labels.clear();
        self.fire_delays();
        if count > 0 {
            debug!("{} force-closed {} token(s)", self.id, count);
        }
        count
    }

    /// Only the unit's own `Activate` token is outstanding.
    pub(crate) fn waits_only_for_activation(&self) -> bool {
        let entries = self.waits.entries();
        !entries.is_empty()
            && entries
                .iter()
                .all(|(token, target)| matches!(token, WaitFor::Activate) && target == &self.id)
    }

    // Checker-facing operations

    pub(crate) fn assert_active(&self) -> EngineResult<()> {
        if self.state.is_active() && !self.finished {
            Ok(())
        } else {
            Err(EngineError::illegal_state(format!(
                "unit {} is not active (state {:?})",
                self.id, self.state
            )))
        }
    }

    /// Mutations decide the pending reuse question: the unit is restarted.
    pub(crate) fn implicit_activate(&mut self, fx: &mut Effects<S, L, D, R>) -> EngineResult<()> {
        match self.state {
            UnitState::InitTc => {
                self.restart(TransitionTrace::InitiallyStarted, fx);
                Ok(())
            }
            UnitState::Unknown => Err(EngineError::illegal_state(format!(
                "unit {} cannot mutate the scope graph while its reuse is undecided",
                self.id
            ))),
            _ => Ok(()),
        }
    }

    fn fresh_name(&mut self, base: &str) -> String {
        let counter = self.scope_name_counters.entry(base.to_string()).or_insert(0);
        let name = format!("{}-{}", base, counter);
        *counter += 1;
        name
    }

    pub(crate) fn fresh_scope(
        &mut self,
        base: &str,
        edge_labels: &[L],
        has_data: bool,
        sharing: bool,
        fx: &mut Effects<S, L, D, R>,
    ) -> EngineResult<S> {
        self.assert_active()?;
        if !sharing {
            self.implicit_activate(fx)?;
        }
        let name = self.fresh_name(base);
        let scope = S::new_scope(&self.id, &name);
        self.scopes.insert(scope.clone());
        for label in edge_labels {
            self.wait_for(WaitFor::CloseLabel(scope.clone(), EdgeOrData::Edge(label.clone())), self.id.clone(), fx);
        }
        if has_data {
            self.wait_for(WaitFor::CloseLabel(scope.clone(), EdgeOrData::Data), self.id.clone(), fx);
        }
        if sharing {
            self.wait_for(WaitFor::CloseScope(scope.clone()), self.id.clone(), fx);
        }
        Ok(scope)
    }

    /// Initialise a scope handed to this unit: declare which labels it will
    /// still add edges for.
    pub(crate) fn init_scope(
        &mut self,
        scope: &S,
        labels: &[L],
        sharing: bool,
        fx: &mut Effects<S, L, D, R>,
    ) -> EngineResult<()> {
        self.assert_active()?;
        let labels: Vec<EdgeOrData<L>> = labels.iter().cloned().map(EdgeOrData::Edge).collect();
        if self.owns(scope) {
            let me = self.id.clone();
            self.do_init_share(&me, scope, &labels, sharing, fx);
        } else {
            self.initialized_shares.insert(scope.clone());
            self.shared_labels
                .entry(scope.clone())
                .or_default()
                .extend(labels.iter().cloned());
            fx.send(
                scope.owner().clone(),
                Message::InitShare {
                    from: self.id.clone(),
                    scope: scope.clone(),
                    labels,
                    sharing,
                },
            );
        }
        Ok(())
    }

    /// `sender` initialised the owned `scope`.
    pub(crate) fn do_init_share(
        &mut self,
        sender: &UnitId,
        scope: &S,
        labels: &[EdgeOrData<L>],
        sharing: bool,
        fx: &mut Effects<S, L, D, R>,
    ) {
        for label in labels {
            self.wait_for(WaitFor::CloseLabel(scope.clone(), label.clone()), sender.clone(), fx);
        }
        if sharing {
            self.wait_for(WaitFor::CloseScope(scope.clone()), sender.clone(), fx);
        }
        self.granted(&WaitFor::InitScope(scope.clone()), sender, fx);
    }

    /// `sharer` will initialise the owned `scope`.
    pub(crate) fn do_add_share(&mut self, sharer: &UnitId, scope: &S, fx: &mut Effects<S, L, D, R>) {
        self.wait_for(WaitFor::InitScope(scope.clone()), sharer.clone(), fx);
    }

    pub(crate) fn share_local(&mut self, scope: &S, fx: &mut Effects<S, L, D, R>) -> EngineResult<()> {
        self.assert_active()?;
        if self.owns(scope) {
            let me = self.id.clone();
            self.do_add_share(&me, scope, fx);
        } else {
            fx.send(
                scope.owner().clone(),
                Message::AddShare {
                    from: self.id.clone(),
                    scope: scope.clone(),
                },
            );
        }
        Ok(())
    }

    pub(crate) fn set_datum(&mut self, scope: &S, datum: D, fx: &mut Effects<S, L, D, R>) -> EngineResult<()> {
        self.assert_active()?;
        if !self.owns(scope) {
            return Err(EngineError::illegal_state(format!(
                "unit {} cannot set the datum of {:?}",
                self.id, scope
            )));
        }
        self.assert_known(scope)?;
        let token = WaitFor::CloseLabel(scope.clone(), EdgeOrData::Data);
        if !self.waits.contains(&token) {
            return Err(EngineError::illegal_state(format!("datum of {:?} is closed", scope)));
        }
        self.scope_graph.set_datum(scope.clone(), datum.clone());
        self.local_scope_graph.set_datum(scope.clone(), datum);
        let me = self.id.clone();
        self.granted(&token, &me, fx);
        Ok(())
    }

    pub(crate) fn add_edge(&mut self, source: &S, label: L, target: &S, fx: &mut Effects<S, L, D, R>) -> EngineResult<()> {
        self.assert_active()?;
        self.implicit_activate(fx)?;
        let edge_label = EdgeOrData::Edge(label.clone());
        if self.owns(source) {
            self.assert_known(source)?;
            if !self.is_open(source, &edge_label) {
                return Err(EngineError::illegal_state(format!(
                    "label {:?} of {:?} is closed",
                    label, source
                )));
            }
            self.scope_graph.add_edge(source.clone(), label.clone(), target.clone());
        } else {
            let open = self
                .shared_labels
                .get(source)
                .is_some_and(|labels| labels.contains(&edge_label));
            if !open {
                return Err(EngineError::illegal_state(format!(
                    "unit {} has no open label {:?} on {:?}",
                    self.id, label, source
                )));
            }
            fx.send(
                source.owner().clone(),
                Message::AddEdge {
                    from: self.id.clone(),
                    source: source.clone(),
                    label: label.clone(),
                    target: target.clone(),
                },
            );
        }
        self.local_scope_graph.add_edge(source.clone(), label, target.clone());
        Ok(())
    }

    /// Close `label` of `scope` on behalf of this unit. Closing twice is a
    /// no-op.
    pub(crate) fn close_edge(&mut self, scope: &S, label: EdgeOrData<L>, fx: &mut Effects<S, L, D, R>) -> EngineResult<()> {
        self.assert_active()?;
        if self.owns(scope) {
            let me = self.id.clone();
            self.granted(&WaitFor::CloseLabel(scope.clone(), label), &me, fx);
        } else if self
            .shared_labels
            .get_mut(scope)
            .is_some_and(|labels| labels.remove(&label))
        {
            self.fire_delays();
            fx.send(
                scope.owner().clone(),
                Message::CloseEdge {
                    from: self.id.clone(),
                    scope: scope.clone(),
                    label,
                },
            );
        }
        Ok(())
    }

    pub(crate) fn close_scope(&mut self, scope: &S, fx: &mut Effects<S, L, D, R>) -> EngineResult<()> {
        self.assert_active()?;
        if self.owns(scope) {
            let me = self.id.clone();
            self.granted(&WaitFor::CloseScope(scope.clone()), &me, fx);
        } else {
            fx.send(
                scope.owner().clone(),
                Message::CloseScope {
                    from: self.id.clone(),
                    scope: scope.clone(),
                },
            );
        }
        Ok(())
    }
}
