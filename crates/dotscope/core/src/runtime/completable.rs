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

use std::sync::Arc;

use futures::channel::oneshot;
use futures::future::{self, BoxFuture, FutureExt};
use parking_lot::Mutex;

enum State<T> {
    Pending(Vec<oneshot::Sender<T>>),
    Done(T),
}

/// A value that is completed once and awaited by any number of waiters.
pub struct Completable<T> {
    state: Arc<Mutex<State<T>>>,
}

impl<T> Clone for Completable<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T: Clone + Send + 'static> Default for Completable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> Completable<T> {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::Pending(Vec::new()))),
        }
    }

    /// Complete with `value`. Returns false if already completed.
    pub fn complete(&self, value: T) -> bool {
        let waiters = {
            let mut state = self.state.lock();
            match &mut *state {
                State::Done(_) => return false,
                State::Pending(waiters) => {
                    let waiters = std::mem::take(waiters);
                    *state = State::Done(value.clone());
                    waiters
                }
            }
        };
        for waiter in waiters {
            let _ = waiter.send(value.clone());
        }
        true
    }

    pub fn is_done(&self) -> bool {
        matches!(&*self.state.lock(), State::Done(_))
    }

    pub fn get(&self) -> Option<T> {
        match &*self.state.lock() {
            State::Done(value) => Some(value.clone()),
            State::Pending(_) => None,
        }
    }

    /// Resolves to the value, or `None` if every handle was dropped before
    /// completion.
    pub fn wait(&self) -> BoxFuture<'static, Option<T>> {
        let mut state = self.state.lock();
        match &mut *state {
            State::Done(value) => future::ready(Some(value.clone())).boxed(),
            State::Pending(waiters) => {
                let (tx, rx) = oneshot::channel();
                waiters.push(tx);
                rx.map(|r| r.ok()).boxed()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_complete_once() {
        let c = Completable::new();
        assert!(!c.is_done());
        assert!(c.complete(1));
        assert!(!c.complete(2));
        assert_eq!(c.get(), Some(1));
    }

    #[test]
    fn test_waiters_see_value() {
        let c = Completable::new();
        let early = c.wait();
        c.complete("done");
        let late = c.wait();
        assert_eq!(futures::executor::block_on(early), Some("done"));
        assert_eq!(futures::executor::block_on(late), Some("done"));
    }
}
