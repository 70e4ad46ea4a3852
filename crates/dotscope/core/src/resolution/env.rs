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

use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;

use crate::scopegraph::{Datum, Patch, ResolutionPath, ScopeId};

/// Result of a query: the accepted resolution paths plus the candidates that
/// were shadowed away.
#[derive(Clone)]
pub struct Env<S, L, D> {
    accepted: HashSet<ResolutionPath<S, L, D>>,
    rejected: HashSet<ResolutionPath<S, L, D>>,
}

impl<S: Eq + Hash, L: Eq + Hash, D: Eq + Hash> PartialEq for Env<S, L, D> {
    fn eq(&self, other: &Self) -> bool {
        self.accepted == other.accepted && self.rejected == other.rejected
    }
}

impl<S: Eq + Hash, L: Eq + Hash, D: Eq + Hash> Eq for Env<S, L, D> {}

impl<S, L, D> Default for Env<S, L, D> {
    fn default() -> Self {
        Self {
            accepted: HashSet::new(),
            rejected: HashSet::new(),
        }
    }
}

impl<S, L, D> Env<S, L, D>
where
    S: Clone + Eq + Hash,
    L: Clone + Eq + Hash,
    D: Clone + Eq + Hash,
{
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn of(path: ResolutionPath<S, L, D>) -> Self {
        let mut env = Self::empty();
        env.accepted.insert(path);
        env
    }

    pub fn from_paths(paths: impl IntoIterator<Item = ResolutionPath<S, L, D>>) -> Self {
        Self {
            accepted: paths.into_iter().collect(),
            rejected: HashSet::new(),
        }
    }

    pub fn accepted(&self) -> &HashSet<ResolutionPath<S, L, D>> {
        &self.accepted
    }

    pub fn rejected(&self) -> &HashSet<ResolutionPath<S, L, D>> {
        &self.rejected
    }

    /// No accepted paths.
    pub fn is_empty(&self) -> bool {
        self.accepted.is_empty()
    }

    pub fn len(&self) -> usize {
        self.accepted.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResolutionPath<S, L, D>> {
        self.accepted.iter()
    }

    pub fn data(&self) -> impl Iterator<Item = &D> {
        self.accepted.iter().map(|p| p.datum())
    }

    pub fn union(&mut self, other: Env<S, L, D>) {
        self.accepted.extend(other.accepted);
        self.rejected.extend(other.rejected);
    }

    pub fn accept(&mut self, path: ResolutionPath<S, L, D>) {
        self.accepted.insert(path);
    }

    pub fn reject(&mut self, path: ResolutionPath<S, L, D>) {
        self.rejected.insert(path);
    }

    pub fn into_paths(self) -> HashSet<ResolutionPath<S, L, D>> {
        self.accepted
    }
}

impl<S, L, D> Env<S, L, D>
where
    S: ScopeId,
    L: Clone + Eq + Hash,
    D: Datum<S>,
{
    pub fn patch(&self, patch: &Patch<S>) -> Self {
        if patch.is_empty() {
            return self.clone();
        }
        Self {
            accepted: self.accepted.iter().map(|p| p.patch(patch)).collect(),
            rejected: self.rejected.iter().map(|p| p.patch(patch)).collect(),
        }
    }
}

impl<S: fmt::Debug, L: fmt::Debug, D: fmt::Debug> fmt::Debug for Env<S, L, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Env")
            .field("accepted", &self.accepted)
            .field("rejected", &self.rejected)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use dotscope_common::{Scope, UnitId};

    use super::*;
    use crate::scopegraph::ScopePath;

    fn path(name: &str, datum: &str) -> ResolutionPath<Scope, char, String> {
        ScopePath::new(Scope::new(UnitId::new("u"), name)).resolve(datum.to_string())
    }

    #[test]
    fn test_equality_ignores_order() {
        let left = Env::from_paths([path("a", "x"), path("b", "y")]);
        let right = Env::from_paths([path("b", "y"), path("a", "x")]);
        assert_eq!(left, right);

        let mut shadowed = right.clone();
        shadowed.reject(path("c", "z"));
        assert_ne!(left, shadowed);
        assert_eq!(left.accepted(), shadowed.accepted());
    }
}
