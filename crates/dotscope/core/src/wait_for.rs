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

//! Wait-for tokens
//!
//! A unit raises a token when it cannot make progress until another unit
//! (possibly itself) acts. Tokens are kept as a multiset per unit, keyed by
//! the unit expected to grant them.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};

use dotscope_common::UnitId;

use crate::scopegraph::{EdgeOrData, ScopePath};

static NEXT_REQUEST: AtomicU64 = AtomicU64::new(1);

/// Fresh id distinguishing otherwise identical request tokens.
pub fn next_request_id() -> u64 {
    NEXT_REQUEST.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum WaitFor<S, L> {
    /// Waiting for the reuse decision of the unit itself.
    Activate,
    /// A shared scope has not been initialised by the sharing unit yet.
    InitScope(S),
    /// More sharing of a scope may still happen.
    CloseScope(S),
    /// More edges (or the datum) of a scope may still be added.
    CloseLabel(S, EdgeOrData<L>),
    Query { path: ScopePath<S, L>, request: u64 },
    Confirm { scope: S, request: u64 },
    Match { scope: S, request: u64 },
    /// A sub-unit has been added but not started.
    UnitAdd(UnitId),
}

impl<S, L> WaitFor<S, L> {
    /// Closure tokens are the ones deadlock resolution may grant outright.
    pub fn is_closure(&self) -> bool {
        matches!(self, WaitFor::InitScope(_) | WaitFor::CloseScope(_) | WaitFor::CloseLabel(_, _))
    }
}

/// Multiset of tokens a unit waits on, keyed by token and granting unit.
#[derive(Debug, Clone)]
pub struct WaitForSet<S, L> {
    counts: HashMap<(WaitFor<S, L>, UnitId), usize>,
}

impl<S, L> Default for WaitForSet<S, L> {
    fn default() -> Self {
        Self { counts: HashMap::new() }
    }
}

impl<S, L> WaitForSet<S, L>
where
    S: Clone + Eq + Hash,
    L: Clone + Eq + Hash,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, token: WaitFor<S, L>, target: UnitId) {
        *self.counts.entry((token, target)).or_insert(0) += 1;
    }

    /// Remove one occurrence. Returns false if the token was not present.
    pub fn remove(&mut self, token: &WaitFor<S, L>, target: &UnitId) -> bool {
        let key = (token.clone(), target.clone());
        match self.counts.get_mut(&key) {
            Some(count) if *count > 1 => {
                *count -= 1;
                true
            }
            Some(_) => {
                self.counts.remove(&key);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, token: &WaitFor<S, L>) -> bool {
        self.counts.keys().any(|(t, _)| t == token)
    }

    pub fn contains_where(&self, mut pred: impl FnMut(&WaitFor<S, L>) -> bool) -> bool {
        self.counts.keys().any(|(t, _)| pred(t))
    }

    /// Whether `label` of `scope` may still change.
    pub fn is_open(&self, scope: &S, label: &EdgeOrData<L>) -> bool {
        self.contains_where(|token| match token {
            WaitFor::InitScope(s) | WaitFor::CloseScope(s) => s == scope,
            WaitFor::CloseLabel(s, l) => s == scope && l == label,
            _ => false,
        })
    }

    /// Every `(token, target)` pair, one entry per occurrence.
    pub fn entries(&self) -> Vec<(WaitFor<S, L>, UnitId)> {
        self.counts
            .iter()
            .flat_map(|((token, target), count)| std::iter::repeat_n((token.clone(), target.clone()), *count))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.counts.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}
