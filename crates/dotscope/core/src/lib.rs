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

//! Concurrent, incremental name resolution over scope graphs.
//!
//! A type checker is split into units. Each unit owns a fragment of a
//! shared scope graph and may resolve queries against the whole graph;
//! queries into fragments owned by other units are answered by those
//! units through message passing. The [`Broker`] runs a root unit and
//! everything it spawns, resolves deadlocks, and returns a [`UnitResult`]
//! tree that can be fed back into a later run to reuse unchanged units.

pub mod broker;
pub mod checker;
pub mod confirm;
pub mod deadlock;
pub mod diff;
pub(crate) mod engine;
pub mod resolution;
pub mod runtime;
pub mod scopegraph;
pub mod unit;
pub mod wait_for;

pub use broker::Broker;
pub use checker::{CheckpointState, Incremental, ScopeGraphLibrary, TypeChecker, UnitOutput};
pub use engine::EngineStatistics;
pub use resolution::{
    AlwaysLeq, AnyData, DataLeq, DataLeqFn, DataWf, DataWfFn, EpsilonWf, Env, ExplicitOrder, LabelAutomaton,
    LabelOrder, LabelOrderFn, LabelWf, NeverLeq, NoLabelOrder, PredicateContext, QueryParams,
};
pub use scopegraph::{Datum, EdgeOrData, Label, Patch, ResolutionPath, ScopeGraph, ScopeId, ScopePath};
pub use unit::context::UnitContext;
pub use unit::result::{RecordedQuery, StateCapture, TransitionTrace, UnitResult};
pub use unit::{Activation, StateSummary, UnitState};

pub use dotscope_common::{ConfirmationMode, EngineError, EngineResult, Scope, Settings, UnitId};
