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

//! Shared helpers for the engine integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;

use dotscope_core::resolution::LabelWfRef;
use dotscope_core::{Env, LabelAutomaton, Scope, TypeChecker, UnitContext, UnitOutput};

pub type Ctx<R> = UnitContext<Scope, char, String, R>;
pub type Checker<R> = Arc<dyn TypeChecker<Scope, char, String, R>>;

struct FnChecker<F, R> {
    run: F,
    _output: PhantomData<fn() -> R>,
}

#[async_trait]
impl<F, Fut, R> TypeChecker<Scope, char, String, R> for FnChecker<F, R>
where
    F: Fn(Ctx<R>, Vec<Scope>) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    R: UnitOutput<Scope>,
{
    async fn run(&self, ctx: Ctx<R>, root_scopes: Vec<Scope>) -> anyhow::Result<R> {
        (self.run)(ctx, root_scopes).await
    }
}

/// A checker from an async closure.
pub fn checker<F, Fut, R>(run: F) -> Checker<R>
where
    F: Fn(Ctx<R>, Vec<Scope>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    R: UnitOutput<Scope>,
{
    Arc::new(FnChecker {
        run,
        _output: PhantomData,
    })
}

/// `label data`: one step over `label`, then the datum.
pub fn one_step(label: char) -> LabelWfRef<char> {
    LabelAutomaton::builder().transition(0, label, 1).accept(1).build()
}

/// `label* data`.
pub fn any_steps(label: char) -> LabelWfRef<char> {
    LabelAutomaton::builder().transition(0, label, 0).accept(0).build()
}

/// Data of the accepted paths, sorted.
pub fn data_of(env: &Env<Scope, char, String>) -> Vec<String> {
    let mut data: Vec<String> = env.data().cloned().collect();
    data.sort();
    data
}

pub fn init() {
    dotscope_common::logging::init_test_tracing();
}
