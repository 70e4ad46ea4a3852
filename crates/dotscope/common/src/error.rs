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

//! Error taxonomy of the engine.
//!
//! Only genuine failures are errors. Resolution that cannot proceed yet
//! suspends instead, and a deadlock-forced release is reported as a regular
//! outcome by the engine, so neither appears here.

use thiserror::Error;

use crate::ids::UnitId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("Illegal state: {0}")]
    IllegalState(String),

    #[error("Unknown unit: {0}")]
    UnknownUnit(UnitId),

    #[error("Unknown scope: {0}")]
    UnknownScope(String),

    #[error("Unit {0} is unavailable")]
    UnitUnavailable(UnitId),

    #[error("Checker failed: {0}")]
    Checker(String),

    #[error("Engine stuck: {0}")]
    Stuck(String),

    #[error("Predicate error: {0}")]
    Predicate(String),

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl EngineError {
    pub fn illegal_state(msg: impl Into<String>) -> Self {
        EngineError::IllegalState(msg.into())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
