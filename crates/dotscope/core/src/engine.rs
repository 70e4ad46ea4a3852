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

//! The engine: unit table, mailboxes, the drive loop and deadlock
//! handling at quiescence.
//!
//! All unit state lives behind one lock. Unit code runs inside
//! [`Engine::with_unit`] and reports what it wants to happen next through
//! [`Effects`]; the engine applies those after the unit code returns, so
//! unit code never re-enters the engine.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use dotscope_common::{EngineError, EngineResult, Settings, UnitId};

use crate::checker::{TypeChecker, UnitOutput};
use crate::deadlock::{DeadlockCluster, DeadlockDetector, DeadlockStatistics};
use crate::runtime::{ExecutionStats, Executor};
use crate::scopegraph::{Datum, Label, Patch, ScopeId};
use crate::unit::protocol::Message;
use crate::unit::result::{TransitionTrace, UnitResult};
use crate::unit::{StateSummary, Unit, UnitKind, UnitState};
use crate::wait_for::WaitFor;

enum WaitEvent<S, L> {
    Added(WaitFor<S, L>, UnitId),
    Removed(WaitFor<S, L>, UnitId),
}

/// Consequences of running unit code, applied by the engine afterwards.
pub(crate) struct Effects<S, L, D, R>
where
    S: ScopeId,
    L: Label,
    D: Datum<S>,
    R: UnitOutput<S>,
{
    pub(crate) engine: Arc<Engine<S, L, D, R>>,
    messages: Vec<(UnitId, Message<S, L, D>)>,
    tasks: Vec<BoxFuture<'static, ()>>,
    waits: Vec<WaitEvent<S, L>>,
    new_units: Vec<Unit<S, L, D, R>>,
    finished: Option<UnitResult<S, L, D, R>>,
}

impl<S, L, D, R> Effects<S, L, D, R>
where
    S: ScopeId,
    L: Label,
    D: Datum<S>,
    R: UnitOutput<S>,
{
    fn new(engine: Arc<Engine<S, L, D, R>>) -> Self {
        Self {
            engine,
            messages: Vec::new(),
            tasks: Vec::new(),
            waits: Vec::new(),
            new_units: Vec::new(),
            finished: None,
        }
    }

    pub(crate) fn send(&mut self, to: UnitId, message: Message<S, L, D>) {
        self.messages.push((to, message));
    }

    pub(crate) fn spawn(&mut self, task: BoxFuture<'static, ()>) {
        self.tasks.push(task);
    }

    pub(crate) fn wait_added(&mut self, token: WaitFor<S, L>, target: UnitId) {
        self.waits.push(WaitEvent::Added(token, target));
    }

    pub(crate) fn wait_removed(&mut self, token: WaitFor<S, L>, target: UnitId) {
        self.waits.push(WaitEvent::Removed(token, target));
    }

    pub(crate) fn add_unit(&mut self, unit: Unit<S, L, D, R>) {
        self.new_units.push(unit);
    }

    pub(crate) fn finish(&mut self, result: UnitResult<S, L, D, R>) {
        self.finished = Some(result);
    }
}

/// Counters for one engine run.
#[derive(Debug, Clone, Default)]
pub struct EngineStatistics {
    pub units: usize,
    pub messages_delivered: u64,
    pub messages_dropped: u64,
    pub execution: ExecutionStats,
    pub deadlock: DeadlockStatistics,
}

struct EngineState<S, L, D, R>
where
    S: ScopeId,
    L: Label,
    D: Datum<S>,
    R: UnitOutput<S>,
{
    units: HashMap<UnitId, Unit<S, L, D, R>>,
    mailboxes: HashMap<UnitId, VecDeque<Message<S, L, D>>>,
    runnable: VecDeque<UnitId>,
    scheduled: HashSet<UnitId>,
    /// Messages for units that do not exist yet.
    parked: HashMap<UnitId, Vec<Message<S, L, D>>>,
    detector: DeadlockDetector<WaitFor<S, L>>,
    root: Option<UnitId>,
    root_result: Option<UnitResult<S, L, D, R>>,
    messages_delivered: u64,
    messages_dropped: u64,
}

impl<S, L, D, R> EngineState<S, L, D, R>
where
    S: ScopeId,
    L: Label,
    D: Datum<S>,
    R: UnitOutput<S>,
{
    fn new() -> Self {
        Self {
            units: HashMap::new(),
            mailboxes: HashMap::new(),
            runnable: VecDeque::new(),
            scheduled: HashSet::new(),
            parked: HashMap::new(),
            detector: DeadlockDetector::new(),
            root: None,
            root_result: None,
            messages_delivered: 0,
            messages_dropped: 0,
        }
    }

    fn enqueue(&mut self, to: UnitId, message: Message<S, L, D>) {
        self.mailboxes.entry(to.clone()).or_default().push_back(message);
        if self.scheduled.insert(to.clone()) {
            self.runnable.push_back(to);
        }
    }

    fn next_message(&mut self) -> Option<(UnitId, Message<S, L, D>)> {
        while let Some(unit) = self.runnable.pop_front() {
            let Some(mailbox) = self.mailboxes.get_mut(&unit) else {
                self.scheduled.remove(&unit);
                continue;
            };
            let Some(message) = mailbox.pop_front() else {
                self.scheduled.remove(&unit);
                continue;
            };
            if mailbox.is_empty() {
                self.scheduled.remove(&unit);
            } else {
                self.runnable.push_back(unit.clone());
            }
            self.messages_delivered += 1;
            return Some((unit, message));
        }
        None
    }
}

pub(crate) struct Engine<S, L, D, R>
where
    S: ScopeId,
    L: Label,
    D: Datum<S>,
    R: UnitOutput<S>,
{
    pub(crate) settings: Settings,
    pub(crate) edge_labels: Arc<Vec<L>>,
    state: Mutex<EngineState<S, L, D, R>>,
    executor: Executor,
}

impl<S, L, D, R> Engine<S, L, D, R>
where
    S: ScopeId,
    L: Label,
    D: Datum<S>,
    R: UnitOutput<S>,
{
    pub(crate) fn new(settings: Settings, edge_labels: Arc<Vec<L>>) -> Arc<Self> {
        Arc::new(Self {
            settings,
            edge_labels,
            state: Mutex::new(EngineState::new()),
            executor: Executor::new(),
        })
    }

    /// Run unit code against unit `id` and apply its effects.
    pub(crate) fn with_unit<T>(
        self: &Arc<Self>,
        id: &UnitId,
        f: impl FnOnce(&mut Unit<S, L, D, R>, &mut Effects<S, L, D, R>) -> T,
    ) -> EngineResult<T> {
        let mut fx = Effects::new(Arc::clone(self));
        let (out, tasks) = {
            let mut state = self.state.lock();
            let unit = state
                .units
                .get_mut(id)
                .ok_or_else(|| EngineError::UnknownUnit(id.clone()))?;
            let out = f(unit, &mut fx);
            let tasks = self.apply(&mut state, id.clone(), fx);
            (out, tasks)
        };
        for task in tasks {
            self.executor.spawn(task);
        }
        Ok(out)
    }

    fn apply(
        self: &Arc<Self>,
        state: &mut EngineState<S, L, D, R>,
        origin: UnitId,
        fx: Effects<S, L, D, R>,
    ) -> Vec<BoxFuture<'static, ()>> {
        let mut tasks = Vec::new();
        let mut work = VecDeque::from([(origin, fx)]);
        while let Some((unit, fx)) = work.pop_front() {
            let Effects {
                messages,
                tasks: spawned,
                waits,
                new_units,
                finished,
                ..
            } = fx;
            for event in waits {
                match event {
                    WaitEvent::Added(token, target) => state.detector.add_wait(unit.clone(), target, token),
                    WaitEvent::Removed(token, target) => {
                        state.detector.remove_wait(&unit, &target, &token);
                    }
                }
            }
            for new_unit in new_units {
                let id = new_unit.id.clone();
                if state.units.contains_key(&id) {
                    warn!("unit {} already exists", id);
                    continue;
                }
                state.units.insert(id.clone(), new_unit);
                for message in state.parked.remove(&id).unwrap_or_default() {
                    state.enqueue(id.clone(), message);
                }
            }
            for (to, message) in messages {
                if state.units.contains_key(&to) {
                    state.enqueue(to, message);
                } else {
                    trace!("parking {:?} for {}", message, to);
                    state.parked.entry(to).or_default().push(message);
                }
            }
            tasks.extend(spawned);
            if let Some(result) = finished {
                let parent = state.units.get(&unit).and_then(|u| u.parent.clone());
                match parent {
                    Some(parent) => {
                        let mut parent_fx = Effects::new(Arc::clone(self));
                        if let Some(parent_unit) = state.units.get_mut(&parent) {
                            parent_unit.on_sub_unit_finished(result, &mut parent_fx);
                        }
                        work.push_back((parent, parent_fx));
                    }
                    None if state.root.as_ref() == Some(&unit) => state.root_result = Some(result),
                    None => {}
                }
            }
        }
        tasks
    }

    pub(crate) fn add_root(
        self: &Arc<Self>,
        id: UnitId,
        checker: Arc<dyn TypeChecker<S, L, D, R>>,
        previous: Option<UnitResult<S, L, D, R>>,
    ) {
        let unit = Unit::new(
            id.clone(),
            None,
            UnitKind::TypeChecker(checker),
            previous,
            false,
            self.settings.incremental,
        );
        let mut state = self.state.lock();
        state.root = Some(id.clone());
        state.units.insert(id.clone(), unit);
        state.enqueue(id, Message::Start { roots: Vec::new() });
    }

    /// Run until the root unit has finished and nothing is left to do.
    pub(crate) fn drive(self: &Arc<Self>) -> EngineResult<UnitResult<S, L, D, R>> {
        loop {
            if self.deliver_next() || self.executor.poll_next() {
                continue;
            }
            if let Some(result) = self.state.lock().root_result.clone() {
                return Ok(result);
            }
            if self.resolve_quiescence() {
                continue;
            }
            if self.fail_stuck_units() {
                continue;
            }
            return Err(EngineError::Stuck("the root unit did not finish".into()));
        }
    }

    fn deliver_next(self: &Arc<Self>) -> bool {
        let Some((unit, message)) = self.state.lock().next_message() else {
            return false;
        };
        if let Err(e) = self.with_unit(&unit, |u, fx| u.handle(message, fx)) {
            warn!("cannot deliver to {}: {}", unit, e);
        }
        true
    }

    fn has_work(&self) -> bool {
        self.executor.has_ready() || !self.state.lock().runnable.is_empty()
    }

    /// Deadlock handling, run only once every unit has gone quiet: no
    /// message is queued and no task is ready. A deadlocked cluster is
    /// therefore not detected while unrelated units are still busy.
    /// Returns whether anything changed.
    fn resolve_quiescence(self: &Arc<Self>) -> bool {
        let parked = std::mem::take(&mut self.state.lock().parked);
        if !parked.is_empty() {
            let dropped: usize = parked.values().map(Vec::len).sum();
            for (unit, messages) in &parked {
                warn!("dropping {} message(s) for non-existent unit {}", messages.len(), unit);
            }
            self.state.lock().messages_dropped += dropped as u64;
            drop(parked);
            return true;
        }

        let local: Vec<UnitId> = self
            .state
            .lock()
            .units
            .values()
            .filter(|u| {
                u.in_local_phase
                    && !u.finished
                    && u.state != UnitState::InitUnit
                    && matches!(u.kind, UnitKind::TypeChecker(_))
            })
            .map(|u| u.id.clone())
            .collect();
        if !local.is_empty() {
            for unit in local {
                debug!("local phase of {} ends", unit);
                let _ = self.with_unit(&unit, |u, _| {
                    u.capture();
                    u.end_local_phase();
                });
            }
            return true;
        }

        let clusters = self.state.lock().detector.detect();
        let mut actions = 0;
        for cluster in clusters {
            actions += self.resolve_cluster(&cluster);
        }
        actions > 0 || self.has_work()
    }

    fn resolve_cluster(self: &Arc<Self>, cluster: &DeadlockCluster) -> usize {
        let members: Vec<(UnitId, UnitState, bool, StateSummary<S>)> = {
            let state = self.state.lock();
            cluster
                .units
                .iter()
                .filter_map(|id| state.units.get(id))
                .map(|u| (u.id.clone(), u.state, u.waits_only_for_activation(), u.state_summary()))
                .collect()
        };
        let unknown: Vec<UnitId> = members
            .iter()
            .filter(|(_, state, _, _)| *state == UnitState::Unknown)
            .map(|(id, _, _, _)| id.clone())
            .collect();

        if members.len() == 1 && unknown.len() == 1 && members[0].2 {
            info!("releasing {}: nothing but its own activation is pending", unknown[0]);
            return self.release_all(&unknown, Patch::identity());
        }
        if !unknown.is_empty() {
            let mut merged = Some(Patch::identity());
            let mut restart = false;
            for (_, _, _, summary) in &members {
                match summary {
                    StateSummary::Restart => restart = true,
                    StateSummary::Released(patch) | StateSummary::Release(patch) => {
                        merged = merged.and_then(|m| m.merge(patch));
                    }
                }
            }
            return match merged {
                Some(patch) if !restart => {
                    info!("releasing {} undecided unit(s) in a deadlock", unknown.len());
                    self.release_all(&unknown, patch)
                }
                _ => {
                    info!("restarting {} undecided unit(s) in a deadlock", unknown.len());
                    self.restart_all(&unknown)
                }
            };
        }

        let mut granted = 0;
        for (id, _, _, _) in &members {
            granted += self
                .with_unit(id, |u, fx| u.grant_closure_tokens(fx))
                .unwrap_or(0);
        }
        if granted > 0 {
            info!("force-closed {} token(s) in a cluster of {} unit(s)", granted, members.len());
            self.state.lock().detector.record_grants(granted);
        }
        granted
    }

    fn release_all(self: &Arc<Self>, units: &[UnitId], patch: Patch<S>) -> usize {
        let mut released = 0;
        for unit in units {
            if let Ok(true) = self.with_unit(unit, |u, fx| u.release(patch.clone(), fx)) {
                self.state.lock().detector.record_release();
                released += 1;
            }
        }
        released
    }

    fn restart_all(self: &Arc<Self>, units: &[UnitId]) -> usize {
        let mut restarted = 0;
        for unit in units {
            if let Ok(true) = self.with_unit(unit, |u, fx| u.restart(TransitionTrace::Restarted, fx)) {
                self.state.lock().detector.record_restart();
                restarted += 1;
            }
        }
        restarted
    }

    /// Fail the innermost unfinished units. Their parents get a result and
    /// may still finish on their own.
    fn fail_stuck_units(self: &Arc<Self>) -> bool {
        let stuck: Vec<UnitId> = {
            let state = self.state.lock();
            let unfinished: HashSet<&UnitId> = state.units.values().filter(|u| !u.finished).map(|u| &u.id).collect();
            state
                .units
                .values()
                .filter(|u| unfinished.contains(&u.id))
                .filter(|u| !u.sub_units.values().any(|child| unfinished.contains(child)))
                .map(|u| u.id.clone())
                .collect()
        };
        if stuck.is_empty() {
            return false;
        }
        warn!("{} unit(s) cannot make progress", stuck.len());
        for unit in stuck {
            let _ = self.with_unit(&unit, |u, fx| u.fail_stuck(fx));
        }
        true
    }

    pub(crate) fn statistics(&self) -> EngineStatistics {
        let state = self.state.lock();
        EngineStatistics {
            units: state.units.len(),
            messages_delivered: state.messages_delivered,
            messages_dropped: state.messages_dropped,
            execution: self.executor.stats(),
            deadlock: state.detector.statistics(),
        }
    }

    /// Drop all tasks and units. Tasks hold the engine, so this is needed
    /// to free it.
    pub(crate) fn shutdown(&self) {
        self.executor.clear();
        let mut state = self.state.lock();
        state.units.clear();
        state.mailboxes.clear();
        state.parked.clear();
        state.runnable.clear();
        state.scheduled.clear();
    }
}
