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

//! Re-run every recorded query and compare answers.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use dotscope_common::{EngineError, EngineResult};

use super::{ConfirmResult, Confirmation, ConfirmationContext};
use crate::resolution::{DataWfRef, LabelWfRef};
use crate::scopegraph::{Datum, Label, Patch, ScopeId, ScopePath};
use crate::unit::result::RecordedQuery;

pub struct TrivialConfirmation<S, L, D> {
    context: Arc<dyn ConfirmationContext<S, L, D>>,
}

impl<S, L, D> TrivialConfirmation<S, L, D> {
    pub fn new(context: Arc<dyn ConfirmationContext<S, L, D>>) -> Self {
        Self { context }
    }
}

#[async_trait]
impl<S, L, D> Confirmation<S, L, D> for TrivialConfirmation<S, L, D>
where
    S: ScopeId,
    L: Label,
    D: Datum<S>,
{
    async fn confirm_all(&self, queries: &[RecordedQuery<S, L, D>]) -> EngineResult<ConfirmResult<S>> {
        let mut patch = Patch::identity();
        for query in queries {
            let source = query.path.target();
            let Some(current) = self.context.matches(source).await? else {
                debug!("{:?} has no counterpart", source);
                return Ok(ConfirmResult::Deny);
            };
            if !patch.put(source.clone(), current.clone()) {
                return Ok(ConfirmResult::Deny);
            }
            let env = self.context.query(ScopePath::new(current), query.params.clone()).await?;
            if env.accepted() != query.env.patch(&patch).accepted() {
                debug!("answer from {:?} changed", source);
                return Ok(ConfirmResult::Deny);
            }
        }
        Ok(ConfirmResult::Confirm(patch))
    }

    async fn confirm(
        &self,
        _path: ScopePath<S, L>,
        _label_wf: LabelWfRef<L>,
        _data_wf: DataWfRef<S, L, D>,
        _prev_env_empty: bool,
    ) -> EngineResult<ConfirmResult<S>> {
        Err(EngineError::illegal_state(
            "trivial confirmation only confirms whole queries",
        ))
    }
}
