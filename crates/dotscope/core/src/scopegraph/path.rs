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

//! Scope paths with structural sharing.
//!
//! A path is a cons-list of steps ending at the most recent one. Extending a
//! path allocates a single step and shares the whole prefix.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use super::patch::Patch;
use super::{Datum, ScopeId};

struct PathStep<S, L> {
    prev: Option<Arc<PathStep<S, L>>>,
    label: L,
    target: S,
}

/// A walk through the scope graph, starting at `source`.
pub struct ScopePath<S, L> {
    source: S,
    last: Option<Arc<PathStep<S, L>>>,
    len: usize,
}

impl<S: Clone, L: Clone> Clone for ScopePath<S, L> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
            last: self.last.clone(),
            len: self.len,
        }
    }
}

impl<S, L> ScopePath<S, L>
where
    S: Clone + Eq,
    L: Clone,
{
    pub fn new(source: S) -> Self {
        Self { source, last: None, len: 0 }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn target(&self) -> &S {
        match &self.last {
            Some(step) => &step.target,
            None => &self.source,
        }
    }

    /// Number of edges in the path.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn contains(&self, scope: &S) -> bool {
        let mut cursor = self.last.as_ref();
        while let Some(step) = cursor {
            if step.target == *scope {
                return true;
            }
            cursor = step.prev.as_ref();
        }
        self.source == *scope
    }

    /// Extend the path with `label` to `target`, or `None` if `target` was
    /// already visited.
    pub fn step(&self, label: L, target: S) -> Option<Self> {
        if self.contains(&target) {
            return None;
        }
        Some(Self {
            source: self.source.clone(),
            last: Some(Arc::new(PathStep {
                prev: self.last.clone(),
                label,
                target,
            })),
            len: self.len + 1,
        })
    }

    /// Steps in walk order.
    pub fn steps(&self) -> Vec<(L, S)> {
        let mut steps = Vec::with_capacity(self.len);
        let mut cursor = self.last.as_ref();
        while let Some(step) = cursor {
            steps.push((step.label.clone(), step.target.clone()));
            cursor = step.prev.as_ref();
        }
        steps.reverse();
        steps
    }

    /// Every visited scope, source first.
    pub fn scopes(&self) -> Vec<S> {
        std::iter::once(self.source.clone())
            .chain(self.steps().into_iter().map(|(_, s)| s))
            .collect()
    }

    pub fn labels(&self) -> Vec<L> {
        self.steps().into_iter().map(|(l, _)| l).collect()
    }

    pub fn resolve<D>(self, datum: D) -> ResolutionPath<S, L, D> {
        ResolutionPath { path: self, datum }
    }
}

impl<S: ScopeId, L: Clone> ScopePath<S, L> {
    /// Rebuild the path with every scope mapped through `patch`.
    pub fn patch(&self, patch: &Patch<S>) -> Self {
        if patch.is_empty() {
            return self.clone();
        }
        let mut path = ScopePath::new(patch.apply(&self.source));
        for (label, target) in self.steps() {
            let target = patch.apply(&target);
            path = Self {
                source: path.source.clone(),
                last: Some(Arc::new(PathStep {
                    prev: path.last.clone(),
                    label,
                    target,
                })),
                len: path.len + 1,
            };
        }
        path
    }
}

impl<S: PartialEq, L: PartialEq> PartialEq for ScopePath<S, L> {
    fn eq(&self, other: &Self) -> bool {
        if self.len != other.len || self.source != other.source {
            return false;
        }
        let mut left = self.last.as_ref();
        let mut right = other.last.as_ref();
        loop {
            match (left, right) {
                (None, None) => return true,
                (Some(l), Some(r)) => {
                    if Arc::ptr_eq(l, r) {
                        return true;
                    }
                    if l.label != r.label || l.target != r.target {
                        return false;
                    }
                    left = l.prev.as_ref();
                    right = r.prev.as_ref();
                }
                _ => return false,
            }
        }
    }
}

impl<S: Eq, L: Eq> Eq for ScopePath<S, L> {}

impl<S: Hash, L: Hash> Hash for ScopePath<S, L> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.source.hash(state);
        self.len.hash(state);
        let mut cursor = self.last.as_ref();
        while let Some(step) = cursor {
            step.label.hash(state);
            step.target.hash(state);
            cursor = step.prev.as_ref();
        }
    }
}

impl<S: fmt::Debug, L: fmt::Debug> fmt::Debug for ScopePath<S, L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut steps = Vec::new();
        let mut cursor = self.last.as_ref();
        while let Some(step) = cursor {
            steps.push(step);
            cursor = step.prev.as_ref();
        }
        write!(f, "{:?}", self.source)?;
        for step in steps.iter().rev() {
            write!(f, " -{:?}-> {:?}", step.label, step.target)?;
        }
        Ok(())
    }
}

/// A scope path terminated by the datum found at its target.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ResolutionPath<S, L, D> {
    path: ScopePath<S, L>,
    datum: D,
}

impl<S, L, D> ResolutionPath<S, L, D>
where
    S: Clone + Eq,
    L: Clone,
{
    pub fn path(&self) -> &ScopePath<S, L> {
        &self.path
    }

    pub fn datum(&self) -> &D {
        &self.datum
    }

    pub fn into_parts(self) -> (ScopePath<S, L>, D) {
        (self.path, self.datum)
    }
}

impl<S: ScopeId, L: Clone, D: Datum<S>> ResolutionPath<S, L, D> {
    pub fn patch(&self, patch: &Patch<S>) -> Self {
        Self {
            path: self.path.patch(patch),
            datum: self.datum.substitute(patch),
        }
    }
}

impl<S: fmt::Debug, L: fmt::Debug, D: fmt::Debug> fmt::Debug for ResolutionPath<S, L, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} : {:?}", self.path, self.datum)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_rejects_cycles() {
        let path = ScopePath::new(1u32);
        let path = path.step('P', 2).unwrap();
        let path = path.step('P', 3).unwrap();
        assert!(path.step('P', 1).is_none());
        assert!(path.step('P', 2).is_none());
        assert_eq!(path.len(), 2);
        assert_eq!(path.scopes(), vec![1, 2, 3]);
        assert_eq!(path.labels(), vec!['P', 'P']);
        assert_eq!(*path.target(), 3);
    }

    #[test]
    fn test_prefix_is_shared_and_untouched() {
        let base = ScopePath::new(1u32).step('E', 2).unwrap();
        let left = base.step('E', 3).unwrap();
        let right = base.step('F', 4).unwrap();
        assert_eq!(base.len(), 1);
        assert_eq!(*base.target(), 2);
        assert_ne!(left, right);
        assert_eq!(left.steps()[0], right.steps()[0]);
    }

    #[test]
    fn test_structural_equality() {
        let a = ScopePath::new(1u32).step('E', 2).unwrap();
        let b = ScopePath::new(1u32).step('E', 2).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, ScopePath::new(1u32).step('F', 2).unwrap());
        assert_ne!(a, ScopePath::new(1u32));
    }
}
