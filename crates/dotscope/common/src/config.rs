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

//! Engine settings

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{EngineError, EngineResult};

/// How a unit in the UNKNOWN state proves its previous result still holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationMode {
    /// Re-run every recorded query and compare environments.
    Trivial,
    /// Diff the reachable sub-graph and only check what changed.
    SimpleEnvironment,
}

impl FromStr for ConfirmationMode {
    type Err = EngineError;

    fn from_str(s: &str) -> EngineResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "trivial" => Ok(ConfirmationMode::Trivial),
            "simple_environment" | "simple-environment" => Ok(ConfirmationMode::SimpleEnvironment),
            other => Err(EngineError::Config(format!("unknown confirmation mode '{}'", other))),
        }
    }
}

impl fmt::Display for ConfirmationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfirmationMode::Trivial => f.write_str("trivial"),
            ConfirmationMode::SimpleEnvironment => f.write_str("simple_environment"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Whether units may reuse previous results.
    pub incremental: bool,
    pub confirmation_mode: ConfirmationMode,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            incremental: false,
            confirmation_mode: ConfirmationMode::SimpleEnvironment,
        }
    }
}

impl Settings {
    pub fn incremental(confirmation_mode: ConfirmationMode) -> Self {
        Self { incremental: true, confirmation_mode }
    }

    pub fn non_incremental() -> Self {
        Self::default()
    }

    pub fn from_env() -> Self {
        let mut settings = Self::default();

        if let Ok(value) = std::env::var("DOTSCOPE_INCREMENTAL") {
            match value.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => settings.incremental = true,
                "0" | "false" | "no" | "off" => settings.incremental = false,
                _ => warn!("Invalid DOTSCOPE_INCREMENTAL '{}', using default", value),
            }
        }

        if let Ok(value) = std::env::var("DOTSCOPE_CONFIRMATION_MODE") {
            match value.parse() {
                Ok(mode) => settings.confirmation_mode = mode,
                Err(e) => warn!("{}, using default", e),
            }
        }

        settings
    }

    pub fn from_json(json: &str) -> EngineResult<Self> {
        serde_json::from_str(json).map_err(|e| EngineError::Config(e.to_string()))
    }

    /// Lazy confirmation needs the scope graph differ.
    pub fn uses_differ(&self) -> bool {
        self.incremental && self.confirmation_mode == ConfirmationMode::SimpleEnvironment
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert!(!settings.incremental);
        assert_eq!(settings.confirmation_mode, ConfirmationMode::SimpleEnvironment);
        assert!(!settings.uses_differ());
    }

    #[test]
    fn test_parse_confirmation_mode() {
        assert_eq!("TRIVIAL".parse::<ConfirmationMode>().unwrap(), ConfirmationMode::Trivial);
        assert_eq!(
            "simple_environment".parse::<ConfirmationMode>().unwrap(),
            ConfirmationMode::SimpleEnvironment
        );
        assert!(matches!("eager".parse::<ConfirmationMode>(), Err(EngineError::Config(_))));
    }

    #[test]
    fn test_from_json() {
        let settings = Settings::from_json(r#"{"incremental": true, "confirmation_mode": "trivial"}"#).unwrap();
        assert_eq!(settings, Settings::incremental(ConfirmationMode::Trivial));

        let partial = Settings::from_json(r#"{"incremental": true}"#).unwrap();
        assert!(partial.uses_differ());

        assert!(Settings::from_json(r#"{"confirmation_mode": "bogus"}"#).is_err());
    }
}
