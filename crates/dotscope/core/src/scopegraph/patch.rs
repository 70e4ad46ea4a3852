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

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Bijective mapping between scope identities of a previous run (old) and
/// the current run (new).
///
/// Scopes without an entry map to themselves, so the empty patch is the
/// identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patch<S: Ord> {
    forward: BTreeMap<S, S>,
    backward: BTreeMap<S, S>,
}

impl<S: Ord> Default for Patch<S> {
    fn default() -> Self {
        Self {
            forward: BTreeMap::new(),
            backward: BTreeMap::new(),
        }
    }
}

impl<S: Ord + Clone> Patch<S> {
    pub fn identity() -> Self {
        Self::default()
    }

    pub fn of(pairs: impl IntoIterator<Item = (S, S)>) -> Option<Self> {
        let mut patch = Self::identity();
        for (old, new) in pairs {
            if !patch.put(old, new) {
                return None;
            }
        }
        Some(patch)
    }

    /// Record `old ↦ new`. Returns false, leaving the patch untouched, when
    /// either side is already bound to something else.
    pub fn put(&mut self, old: S, new: S) -> bool {
        match (self.forward.get(&old), self.backward.get(&new)) {
            (Some(n), Some(o)) => return *n == new && *o == old,
            (Some(_), None) | (None, Some(_)) => return false,
            (None, None) => {}
        }
        self.forward.insert(old.clone(), new.clone());
        self.backward.insert(new, old);
        true
    }

    pub fn get(&self, old: &S) -> Option<&S> {
        self.forward.get(old)
    }

    pub fn get_inverse(&self, new: &S) -> Option<&S> {
        self.backward.get(new)
    }

    pub fn contains_old(&self, old: &S) -> bool {
        self.forward.contains_key(old)
    }

    pub fn contains_new(&self, new: &S) -> bool {
        self.backward.contains_key(new)
    }

    /// Map an old scope to its current identity.
    pub fn apply(&self, old: &S) -> S {
        self.forward.get(old).cloned().unwrap_or_else(|| old.clone())
    }

    /// Map a current scope back to its previous identity.
    pub fn inverse_apply(&self, new: &S) -> S {
        self.backward.get(new).cloned().unwrap_or_else(|| new.clone())
    }

    /// Union of two patches, or `None` if the union is not a bijection.
    pub fn merge(&self, other: &Patch<S>) -> Option<Patch<S>> {
        let mut merged = self.clone();
        for (old, new) in other.iter() {
            if !merged.put(old.clone(), new.clone()) {
                return None;
            }
        }
        Some(merged)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&S, &S)> {
        self.forward.iter()
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    /// True if every entry maps a scope to itself.
    pub fn is_identity(&self) -> bool {
        self.forward.iter().all(|(old, new)| old == new)
    }
}
