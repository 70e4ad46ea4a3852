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

//! Shared building blocks for the dotscope engine: unit and scope
//! identifiers, the engine error type, settings and logging bootstrap.

pub mod config;
pub mod error;
pub mod ids;
pub mod logging;

pub use config::{ConfirmationMode, Settings};
pub use error::{EngineError, EngineResult};
pub use ids::{Scope, UnitId};
