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

//! Unit lifecycle: start, activation, reuse, phantoms and completion.

use std::sync::Arc;
use std::task::Poll;

use tracing::{debug, error, info, warn};

use dotscope_common::UnitId;

use super::context::UnitContext;
use super::protocol::Message;
use super::result::{StateCapture, TransitionTrace, UnitResult};
use super::{Activation, StateSummary, Unit, UnitKind, UnitState};
use crate::checker::{ScopeGraphLibrary, TypeChecker, UnitOutput};
use crate::diff::ScopeGraphDiffer;
use crate::engine::{Effects, Engine};
use crate::runtime::Completable;
use crate::scopegraph::{Datum, EdgeOrData, Label, Patch, ScopeGraph, ScopeId};
use crate::wait_for::WaitFor;

/// Drive a checker to completion. A checker that suspends before deciding
/// about reuse is started eagerly.
pub(crate) async fn run_checker<S, L, D, R>(
    engine: Arc<Engine<S, L, D, R>>,
    id: UnitId,
    checker: Arc<dyn TypeChecker<S, L, D, R>>,
    roots: Vec<S>,
) where
    S: ScopeId,
    L: Label,
    D: Datum<S>,
    R: UnitOutput<S>,
{
    let ctx = UnitContext::new(Arc::clone(&engine), id.clone());
    let mut run = checker.run(ctx, roots);
    let result = match futures::poll!(&mut run) {
        Poll::Ready(result) => result,
        Poll::Pending => {
            if let Err(e) = engine.with_unit(&id, |unit, fx| unit.eager_start(fx)) {
                warn!("eager start of {} failed: {}", id, e);
            }
            run.await
        }
    };
    if let Err(e) = engine.with_unit(&id, |unit, fx| unit.checker_finished(result, fx)) {
        warn!("completion of {} failed: {}", id, e);
    }
}

impl<S, L, D, R> Unit<S, L, D, R>
where
    S: ScopeId,
    L: Label,
    D: Datum<S>,
    R: UnitOutput<S>,
{
    pub(crate) fn start(&mut self, roots: Vec<S>, fx: &mut Effects<S, L, D, R>) {
        if self.state != UnitState::InitUnit {
            warn!("unit {} started twice", self.id);
            return;
        }
        debug!("starting unit {} with {} root scope(s)", self.id, roots.len());
        self.root_scopes = roots.clone();
        self.state = UnitState::InitTc;
        if let Some(parent) = &self.parent {
            fx.send(parent.clone(), Message::UnitStarted { from: self.id.clone() });
        }
        match &self.kind {
            UnitKind::TypeChecker(checker) => {
                let checker = Arc::clone(checker);
                self.wait_for(WaitFor::Activate, self.id.clone(), fx);
                let engine = Arc::clone(&fx.engine);
                fx.spawn(Box::pin(run_checker(engine, self.id.clone(), checker, roots)));
            }
            UnitKind::Phantom { replay: true } => self.start_replaying_phantom(fx),
            UnitKind::Phantom { replay: false } => self.start_removed_phantom(fx),
            UnitKind::Library(library) => {
                let library = Arc::clone(library);
                self.start_library(&library, fx);
            }
        }
    }

    pub(crate) fn eager_start(&mut self, fx: &mut Effects<S, L, D, R>) {
        if self.state == UnitState::InitTc {
            self.restart(TransitionTrace::InitiallyStarted, fx);
        }
    }

    /// Activate the unit so that its checker runs for real. Only acts on
    /// units that have not been activated yet.
    pub(crate) fn restart(&mut self, trace: TransitionTrace, fx: &mut Effects<S, L, D, R>) -> bool {
        if !matches!(self.state, UnitState::InitTc | UnitState::Unknown) {
            return false;
        }
        debug!("unit {} activated ({:?})", self.id, trace);
        self.state = UnitState::Active;
        self.transition_trace = trace;
        self.when_active.complete(Activation::Active);
        self.confirmation_result.complete(None);
        if fx.engine.settings.uses_differ() {
            if let Some(previous) = &self.previous {
                let previous_graph = previous.scope_graph.add_all(&previous.local_scope_graph);
                let mut matches = self.matched_by_sharing.clone();
                for (prev_root, root) in previous.root_scopes.iter().zip(&self.root_scopes) {
                    matches.put(prev_root.clone(), root.clone());
                }
                self.differ = Some(ScopeGraphDiffer::new(self.id.clone(), previous_graph, matches));
            }
        }
        let me = self.id.clone();
        self.granted(&WaitFor::Activate, &me, fx);
        true
    }

    /// Reuse the previous result under `patch`. Only acts on units whose
    /// reuse is still undecided.
    pub(crate) fn release(&mut self, patch: Patch<S>, fx: &mut Effects<S, L, D, R>) -> bool {
        if self.state != UnitState::Unknown {
            return false;
        }
        let Some(previous) = self.previous.clone() else {
            return false;
        };
        info!("unit {} reuses its previous result", self.id);
        self.release_patch = Some(patch.clone());
        self.replay_previous(&previous, &patch, fx);
        self.recorded_queries = previous.queries.clone();
        if self.local_capture.is_none() {
            self.local_capture = previous.local_state.clone();
        }
        self.transition_trace = TransitionTrace::Released;
        self.state = UnitState::Released;
        self.when_active.complete(Activation::Released);
        self.confirmation_result.complete(Some(patch));
        self.end_local_phase();
        let me = self.id.clone();
        self.granted(&WaitFor::Activate, &me, fx);
        self.add_phantoms(true, fx);
        true
    }

    pub(crate) fn checker_finished(&mut self, result: anyhow::Result<R>, fx: &mut Effects<S, L, D, R>) {
        if self.finished {
            return;
        }
        match result {
            Ok(output) => self.checker_result = Some(Some(output)),
            Err(e) => {
                error!("checker of {} failed: {:#}", self.id, e);
                self.failures.push(format!("{:#}", e));
                self.checker_result = Some(None);
            }
        }
        if self.in_local_phase {
            self.capture();
            self.end_local_phase();
        }
        let released = self.state == UnitState::Released;
        self.state = UnitState::Done;
        self.when_active.complete(Activation::Active);
        self.confirmation_result.complete(None);
        let me = self.id.clone();
        self.granted(&WaitFor::Activate, &me, fx);
        if !released {
            self.add_phantoms(false, fx);
        }
        self.try_finish(fx);
    }

    pub(crate) fn end_local_phase(&mut self) {
        self.in_local_phase = false;
        self.context_activated.complete(());
    }

    /// Snapshot the local state, for resuming in a later run.
    pub(crate) fn capture(&mut self) {
        let mut capture = StateCapture {
            scopes: self.scopes.clone(),
            scope_graph: self.local_scope_graph.clone(),
            uninitialized_scopes: Vec::new(),
            open_scopes: Vec::new(),
            open_edges: Vec::new(),
            scope_name_counters: self.scope_name_counters.clone(),
            checker_state: self.checker().and_then(|checker| checker.snapshot()),
        };
        for (token, target) in self.waits.entries() {
            if target != self.id {
                continue;
            }
            match token {
                WaitFor::InitScope(scope) => capture.uninitialized_scopes.push(scope),
                WaitFor::CloseScope(scope) => capture.open_scopes.push(scope),
                WaitFor::CloseLabel(scope, label) => capture.open_edges.push((scope, label)),
                _ => {}
            }
        }
        for (scope, labels) in &self.shared_labels {
            capture
                .open_edges
                .extend(labels.iter().map(|label| (scope.clone(), label.clone())));
        }
        debug!(
            "captured {} scope(s) and {} open label(s) of {}",
            capture.scopes.len(),
            capture.open_edges.len(),
            self.id
        );
        self.local_capture = Some(capture);
    }

    /// Resume from a capture of the previous run.
    pub(crate) fn restore(&mut self, capture: StateCapture<S, L, D>, fx: &mut Effects<S, L, D, R>) {
        debug!("restoring {} scope(s) of {}", capture.scopes.len(), self.id);
        let me = self.id.clone();
        self.scopes.extend(capture.scopes.iter().cloned());
        self.scope_name_counters = capture.scope_name_counters.clone();
        for scope in &capture.uninitialized_scopes {
            self.wait_for(WaitFor::InitScope(scope.clone()), me.clone(), fx);
        }
        for scope in &capture.open_scopes {
            self.wait_for(WaitFor::CloseScope(scope.clone()), me.clone(), fx);
        }
        for (scope, label) in &capture.open_edges {
            if self.owns(scope) {
                self.wait_for(WaitFor::CloseLabel(scope.clone(), label.clone()), me.clone(), fx);
            }
        }

        let previous_roots = self
            .previous
            .as_ref()
            .map(|p| p.root_scopes.clone())
            .unwrap_or_default();
        let mut roots = Patch::identity();
        for (prev_root, root) in previous_roots.iter().zip(&self.root_scopes) {
            roots.put(prev_root.clone(), root.clone());
        }
        self.assert_graph(&capture.scope_graph, &roots, fx);

        for (prev_root, root) in previous_roots.iter().zip(self.root_scopes.clone()) {
            if self.owns(&root) || self.initialized_shares.contains(&root) {
                continue;
            }
            let open: Vec<EdgeOrData<L>> = capture
                .open_edges
                .iter()
                .filter(|(scope, _)| scope == prev_root)
                .map(|(_, label)| label.clone())
                .collect();
            self.initialized_shares.insert(root.clone());
            self.shared_labels
                .insert(root.clone(), open.iter().cloned().collect());
            fx.send(
                root.owner().clone(),
                Message::InitShare {
                    from: me.clone(),
                    scope: root,
                    labels: open,
                    sharing: false,
                },
            );
        }
        self.local_capture = Some(capture);
        self.end_local_phase();
    }

    /// Add every edge and datum of `graph`, renamed by `patch`, as if the
    /// checker asserted them. Edges on scopes of other units are sent to
    /// their owners.
    fn assert_graph(&mut self, graph: &ScopeGraph<S, L, D>, patch: &Patch<S>, fx: &mut Effects<S, L, D, R>) {
        for (source, label, target) in graph.edges() {
            let (source, target) = (patch.apply(source), patch.apply(target));
            if self.owns(&source) {
                self.scope_graph.add_edge(source.clone(), label.clone(), target.clone());
            } else {
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
            self.local_scope_graph.add_edge(source, label.clone(), target);
        }
        for (scope, datum) in graph.data() {
            let scope = patch.apply(scope);
            let datum = datum.substitute(patch);
            if self.owns(&scope) {
                self.scope_graph.set_datum(scope.clone(), datum.clone());
            }
            self.local_scope_graph.set_datum(scope, datum);
        }
    }

    /// Rebuild the previous fragment under `patch` and close everything
    /// this unit still holds open.
    fn replay_previous(&mut self, previous: &UnitResult<S, L, D, R>, patch: &Patch<S>, fx: &mut Effects<S, L, D, R>) {
        let own_scopes = previous
            .scope_graph
            .scopes()
            .into_iter()
            .chain(previous.local_scope_graph.scopes())
            .chain(previous.local_state.iter().flat_map(|c| c.scopes.iter().cloned()))
            .map(|scope| patch.apply(&scope))
            .filter(|scope| self.owns(scope))
            .collect::<Vec<_>>();
        self.scopes.extend(own_scopes);
        if let Some(capture) = &previous.local_state {
            for (base, counter) in &capture.scope_name_counters {
                let current = self.scope_name_counters.entry(base.clone()).or_insert(0);
                *current = (*current).max(*counter);
            }
        }
        self.assert_graph(&previous.local_scope_graph, patch, fx);

        let me = self.id.clone();
        let own_closures: Vec<_> = self
            .waits
            .entries()
            .into_iter()
            .filter(|(token, target)| token.is_closure() && target == &me)
            .collect();
        for (token, target) in own_closures {
            self.granted(&token, &target, fx);
        }
        self.close_shares(fx);
    }

    /// Initialise and close every scope of another unit this unit was
    /// handed or has shared.
    fn close_shares(&mut self, fx: &mut Effects<S, L, D, R>) {
        let me = self.id.clone();
        for (scope, labels) in std::mem::take(&mut self.shared_labels) {
            let owner = scope.owner().clone();
            for label in labels {
                fx.send(
                    owner.clone(),
                    Message::CloseEdge {
                        from: me.clone(),
                        scope: scope.clone(),
                        label,
                    },
                );
            }
            fx.send(owner, Message::CloseScope { from: me.clone(), scope });
        }
        for root in self.root_scopes.clone() {
            if self.owns(&root) || !self.initialized_shares.insert(root.clone()) {
                continue;
            }
            fx.send(
                root.owner().clone(),
                Message::InitShare {
                    from: me.clone(),
                    scope: root,
                    labels: Vec::new(),
                    sharing: false,
                },
            );
        }
        self.fire_delays();
    }

    fn start_replaying_phantom(&mut self, fx: &mut Effects<S, L, D, R>) {
        let Some(previous) = self.previous.clone() else {
            self.fail("phantom unit without a previous result", fx);
            return;
        };
        let mut patch = self.release_patch.clone().unwrap_or_default();
        for (prev_root, root) in previous.root_scopes.iter().zip(&self.root_scopes) {
            patch.put(prev_root.clone(), root.clone());
        }
        self.release_patch = Some(patch.clone());
        self.replay_previous(&previous, &patch, fx);
        self.recorded_queries = previous.queries.clone();
        self.local_capture = previous.local_state.clone();
        self.transition_trace = TransitionTrace::Released;
        self.state = UnitState::Released;
        self.when_active.complete(Activation::Released);
        self.confirmation_result.complete(Some(patch.clone()));
        self.add_phantoms(true, fx);
        self.checker_result = Some(previous.result.as_ref().map(|r| r.patch(&patch)));
        self.try_finish(fx);
    }

    /// A unit that no longer exists keeps answering questions about the
    /// previous run, but contributes nothing to the current one.
    fn start_removed_phantom(&mut self, fx: &mut Effects<S, L, D, R>) {
        self.transition_trace = TransitionTrace::Released;
        self.when_active.complete(Activation::Released);
        self.confirmation_result.complete(None);
        self.checker_result = Some(None);
        self.add_phantoms(false, fx);
        self.try_finish(fx);
    }

    fn start_library(&mut self, library: &ScopeGraphLibrary<S, L, D>, fx: &mut Effects<S, L, D, R>) {
        match library.instantiate(&self.id, &self.root_scopes) {
            Ok((own_scopes, graph)) => {
                self.scopes.extend(own_scopes);
                self.assert_graph(&graph, &Patch::identity(), fx);
            }
            Err(e) => self.failures.push(e.to_string()),
        }
        self.state = UnitState::Active;
        self.when_active.complete(Activation::Active);
        self.confirmation_result.complete(None);
        self.close_shares(fx);
        self.checker_result = Some(None);
        self.try_finish(fx);
    }

    /// Add a sub-unit. Roots owned here are awaited until the child
    /// initialises them; other roots are announced to their owners.
    pub(crate) fn add_sub_unit(
        &mut self,
        name: &str,
        kind: UnitKind<S, L, D, R>,
        roots: Vec<S>,
        changed: bool,
        fx: &mut Effects<S, L, D, R>,
    ) -> dotscope_common::EngineResult<Completable<UnitResult<S, L, D, R>>> {
        if self.sub_units.contains_key(name) {
            return Err(dotscope_common::EngineError::illegal_state(format!(
                "unit {} already has a sub-unit named {}",
                self.id, name
            )));
        }
        let child_id = self.id.child(name);
        let previous = self
            .previous
            .as_ref()
            .and_then(|p| p.sub_unit_results.get(name))
            .cloned();
        if let Some(prev) = &previous {
            if matches!(kind, UnitKind::TypeChecker(_)) && prev.root_scopes.len() != roots.len() {
                return Err(dotscope_common::EngineError::illegal_state(format!(
                    "sub-unit {} had {} root scope(s), got {}",
                    child_id,
                    prev.root_scopes.len(),
                    roots.len()
                )));
            }
            for (prev_root, root) in prev.root_scopes.iter().zip(&roots) {
                if !self.owns(root) {
                    continue;
                }
                if !self.matched_by_sharing.put(prev_root.clone(), root.clone()) {
                    warn!("root {:?} of {} conflicts with an earlier match", root, child_id);
                }
                if let Some(differ) = self.differ.as_mut() {
                    if !differ.match_scopes(prev_root.clone(), root.clone()) {
                        warn!("root {:?} of {} conflicts with a diffed scope", root, child_id);
                    }
                }
            }
        }

        let replay_patch = matches!(kind, UnitKind::Phantom { replay: true })
            .then(|| self.release_patch.clone().unwrap_or_default());
        let local_phase = fx.engine.settings.incremental && matches!(kind, UnitKind::TypeChecker(_));
        let mut child = Unit::new(child_id.clone(), Some(self.id.clone()), kind, previous, changed, local_phase);
        child.release_patch = replay_patch;

        for root in &roots {
            if self.owns(root) {
                self.wait_for(WaitFor::InitScope(root.clone()), child_id.clone(), fx);
            } else {
                fx.send(
                    root.owner().clone(),
                    Message::AddShare {
                        from: child_id.clone(),
                        scope: root.clone(),
                    },
                );
            }
        }
        self.wait_for(WaitFor::UnitAdd(child_id.clone()), child_id.clone(), fx);
        let result = child.result.clone();
        fx.add_unit(child);
        fx.send(child_id.clone(), Message::Start { roots });
        self.sub_units.insert(name.to_string(), child_id);
        Ok(result)
    }

    /// Stand-ins for sub-units of the previous run that were not added in
    /// this one.
    fn add_phantoms(&mut self, replay: bool, fx: &mut Effects<S, L, D, R>) {
        let Some(previous) = &self.previous else {
            return;
        };
        let missing: Vec<_> = previous
            .sub_unit_results
            .iter()
            .filter(|(name, _)| !self.sub_units.contains_key(*name))
            .map(|(name, result)| (name.clone(), result.clone()))
            .collect();
        for (name, previous_sub) in missing {
            if replay {
                let patch = self.release_patch.clone().unwrap_or_default();
                let roots = previous_sub.root_scopes.iter().map(|r| patch.apply(r)).collect();
                if let Err(e) = self.add_sub_unit(&name, UnitKind::Phantom { replay: true }, roots, false, fx) {
                    warn!("cannot replay sub-unit {}: {}", name, e);
                }
            } else {
                debug!("sub-unit {} of {} was removed", name, self.id);
                let roots = previous_sub.root_scopes.clone();
                let phantom = Unit::new(
                    self.id.child(&name),
                    None,
                    UnitKind::Phantom { replay: false },
                    Some(previous_sub),
                    false,
                    false,
                );
                let phantom_id = phantom.id.clone();
                fx.add_unit(phantom);
                fx.send(phantom_id, Message::Start { roots });
            }
        }
    }

    pub(crate) fn on_sub_unit_started(&mut self, child: &UnitId, fx: &mut Effects<S, L, D, R>) {
        self.granted(&WaitFor::UnitAdd(child.clone()), child, fx);
    }

    pub(crate) fn on_sub_unit_finished(&mut self, result: UnitResult<S, L, D, R>, fx: &mut Effects<S, L, D, R>) {
        let name = result.id.local_name().to_string();
        self.sub_results.insert(name, result);
        self.try_finish(fx);
    }

    /// Finish once the checker is done, nothing is awaited and every
    /// sub-unit has reported.
    pub(crate) fn try_finish(&mut self, fx: &mut Effects<S, L, D, R>) {
        if self.finished || self.checker_result.is_none() || !self.waits.is_empty() {
            return;
        }
        if self.sub_units.keys().any(|name| !self.sub_results.contains_key(name)) {
            return;
        }
        self.finished = true;
        self.state = UnitState::Done;
        let result = UnitResult {
            id: self.id.clone(),
            root_scopes: self.root_scopes.clone(),
            scope_graph: self.scope_graph.clone(),
            local_scope_graph: self.local_scope_graph.clone(),
            result: self.checker_result.clone().flatten(),
            sub_unit_results: self.sub_results.clone(),
            queries: self.recorded_queries.clone(),
            local_state: self.local_capture.clone(),
            transition_trace: self.transition_trace,
            failures: self.failures.clone(),
        };
        debug!("unit {} finished ({:?})", self.id, self.transition_trace);
        self.result.complete(result.clone());
        fx.finish(result);
    }

    fn fail(&mut self, reason: &str, fx: &mut Effects<S, L, D, R>) {
        error!("unit {}: {}", self.id, reason);
        self.failures.push(reason.to_string());
        self.checker_result.get_or_insert(None);
        self.when_active.complete(Activation::Active);
        self.confirmation_result.complete(None);
        self.try_finish(fx);
    }

    /// Give up on a unit that cannot make progress.
    pub(crate) fn fail_stuck(&mut self, fx: &mut Effects<S, L, D, R>) {
        if self.finished {
            return;
        }
        warn!("unit {} is stuck with {} open token(s)", self.id, self.waits.len());
        for (token, target) in self.waits.entries() {
            self.waits.remove(&token, &target);
            fx.wait_removed(token, target);
        }
        self.shared_labels.clear();
        self.drop_delays();
        self.end_local_phase();
        self.state = UnitState::Done;
        self.fail("stuck: no further progress possible", fx);
    }

    /// Verdict for resolving a cluster that contains undecided units.
    pub(crate) fn state_summary(&self) -> StateSummary<S> {
        let patch = || self.release_patch.clone().unwrap_or_default();
        match self.state {
            UnitState::InitUnit | UnitState::Unknown => StateSummary::Release(Patch::identity()),
            UnitState::Released => StateSummary::Released(patch()),
            UnitState::Done if self.transition_trace == TransitionTrace::Released => StateSummary::Released(patch()),
            UnitState::InitTc | UnitState::Active | UnitState::Done => StateSummary::Restart,
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::checker::Incremental;
    use dotscope_common::{ConfirmationMode, Scope, Settings};

    struct ReusingChecker;

    #[async_trait]
    impl TypeChecker<Scope, char, String, String> for ReusingChecker {
        async fn run(&self, ctx: UnitContext<Scope, char, String, String>, _roots: Vec<Scope>) -> anyhow::Result<String> {
            if let Incremental::Reuse { result, .. } = ctx.run_incremental().await? {
                return Ok(result);
            }
            let s = ctx.fresh_scope("s", &[], true, false)?;
            ctx.set_datum(&s, "x".to_string())?;
            Ok("ran".to_string())
        }
    }

    fn run(
        previous: Option<UnitResult<Scope, char, String, String>>,
    ) -> (Arc<Engine<Scope, char, String, String>>, UnitResult<Scope, char, String, String>) {
        let engine = Engine::new(Settings::incremental(ConfirmationMode::Trivial), Arc::new(vec!['E']));
        engine.add_root(UnitId::new("root"), Arc::new(ReusingChecker), previous);
        let result = engine.drive().unwrap();
        (engine, result)
    }

    fn try_leave_finished_state(engine: &Arc<Engine<Scope, char, String, String>>) -> (bool, bool, UnitState, TransitionTrace) {
        engine
            .with_unit(&UnitId::new("root"), |u, fx| {
                let restarted = u.restart(TransitionTrace::Restarted, fx);
                let released = u.release(Patch::identity(), fx);
                (restarted, released, u.state, u.transition_trace)
            })
            .unwrap()
    }

    #[test]
    fn test_done_unit_cannot_be_restarted_or_released() {
        let (engine, result) = run(None);
        assert_eq!(result.result, Some("ran".to_string()));
        let (restarted, released, state, trace) = try_leave_finished_state(&engine);
        assert!(!restarted && !released);
        assert_eq!(state, UnitState::Done);
        assert_eq!(trace, TransitionTrace::InitiallyStarted);
        engine.shutdown();
    }

    #[test]
    fn test_released_unit_stays_released() {
        let (first_engine, first) = run(None);
        first_engine.shutdown();
        let (engine, second) = run(Some(first));
        assert_eq!(second.transition_trace, TransitionTrace::Released);
        let (restarted, released, state, trace) = try_leave_finished_state(&engine);
        assert!(!restarted && !released);
        assert_eq!(state, UnitState::Done);
        assert_eq!(trace, TransitionTrace::Released);
        engine.shutdown();
    }
}
