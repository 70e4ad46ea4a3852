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

//! Entry point for running a root type checker.

use std::sync::Arc;
use std::time::Instant;

use tracing::{info, instrument};

use dotscope_common::{EngineError, EngineResult, Settings, UnitId};

use crate::checker::{TypeChecker, UnitOutput};
use crate::engine::{Engine, EngineStatistics};
use crate::scopegraph::{Datum, Label, ScopeId};
use crate::unit::result::UnitResult;

/// Runs a tree of units to completion.
///
/// A broker holds configuration only; every call to [`Broker::run`] builds
/// a fresh engine, so one broker can serve many runs.
#[derive(Debug, Clone)]
pub struct Broker<L> {
    settings: Settings,
    edge_labels: Arc<Vec<L>>,
}

impl<L: Label> Broker<L> {
    /// `edge_labels` lists every edge label the checkers may use.
    pub fn new(settings: Settings, edge_labels: Vec<L>) -> Self {
        Self {
            settings,
            edge_labels: Arc::new(edge_labels),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn edge_labels(&self) -> &[L] {
        &self.edge_labels
    }

    /// Run `checker` as the root unit `id`. With a `previous` result and
    /// incremental settings, units whose inputs did not change reuse their
    /// previous results.
    pub fn run<S, D, R>(
        &self,
        id: impl Into<UnitId>,
        checker: Arc<dyn TypeChecker<S, L, D, R>>,
        previous: Option<UnitResult<S, L, D, R>>,
    ) -> EngineResult<UnitResult<S, L, D, R>>
    where
        S: ScopeId,
        D: Datum<S>,
        R: UnitOutput<S>,
    {
        self.run_with_statistics(id, checker, previous).map(|(result, _)| result)
    }

    #[instrument(skip_all, fields(unit = tracing::field::Empty))]
    pub fn run_with_statistics<S, D, R>(
        &self,
        id: impl Into<UnitId>,
        checker: Arc<dyn TypeChecker<S, L, D, R>>,
        previous: Option<UnitResult<S, L, D, R>>,
    ) -> EngineResult<(UnitResult<S, L, D, R>, EngineStatistics)>
    where
        S: ScopeId,
        D: Datum<S>,
        R: UnitOutput<S>,
    {
        let id = id.into();
        tracing::Span::current().record("unit", tracing::field::display(&id));
        if let Some(previous) = &previous {
            if previous.id != id {
                return Err(EngineError::illegal_state(format!(
                    "previous result belongs to {}, not {}",
                    previous.id, id
                )));
            }
        }

        let started = Instant::now();
        let engine = Engine::new(self.settings.clone(), Arc::clone(&self.edge_labels));
        engine.add_root(id, checker, previous);
        let outcome = engine.drive();
        let statistics = engine.statistics();
        engine.shutdown();

        let result = outcome?;
        info!(
            elapsed = ?started.elapsed(),
            units = statistics.units,
            messages = statistics.messages_delivered,
            failures = result.all_failures().len(),
            "run finished"
        );
        Ok((result, statistics))
    }

    /// [`Broker::run`] on tokio's blocking pool.
    pub async fn run_async<S, D, R>(
        &self,
        id: impl Into<UnitId>,
        checker: Arc<dyn TypeChecker<S, L, D, R>>,
        previous: Option<UnitResult<S, L, D, R>>,
    ) -> EngineResult<UnitResult<S, L, D, R>>
    where
        S: ScopeId,
        D: Datum<S>,
        R: UnitOutput<S>,
    {
        let broker = self.clone();
        let id = id.into();
        tokio::task::spawn_blocking(move || broker.run(id, checker, previous))
            .await
            .map_err(|e| EngineError::Checker(format!("engine task failed: {e}")))?
    }
}
