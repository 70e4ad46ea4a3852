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

//! Cooperative single-threaded executor driving unit tasks.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use futures::task::{ArcWake, waker};
use parking_lot::Mutex;
use tracing::trace;

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    fn next() -> Self {
        TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Aggregate execution statistics
#[derive(Debug, Clone, Default)]
pub struct ExecutionStats {
    /// Tasks handed to the executor
    pub spawned: usize,
    /// Tasks that ran to completion
    pub completed: usize,
    /// Tasks dropped before completion
    pub dropped: usize,
    /// Total number of polls
    pub polls: usize,
}

#[derive(Default)]
struct ReadyQueue {
    order: VecDeque<TaskId>,
    queued: HashSet<TaskId>,
}

impl ReadyQueue {
    fn push(&mut self, task_id: TaskId) {
        if self.queued.insert(task_id) {
            self.order.push_back(task_id);
        }
    }

    fn pop(&mut self) -> Option<TaskId> {
        let task_id = self.order.pop_front()?;
        self.queued.remove(&task_id);
        Some(task_id)
    }
}

/// Waker pushing its task back onto the ready queue.
struct TaskWaker {
    task_id: TaskId,
    ready: Arc<Mutex<ReadyQueue>>,
}

impl ArcWake for TaskWaker {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.ready.lock().push(arc_self.task_id);
    }
}

/// Executor polling boxed futures on the calling thread.
///
/// Tasks are only polled from [`Executor::poll_next`]; waking a task from
/// any thread merely re-queues it.
pub struct Executor {
    tasks: Mutex<HashMap<TaskId, BoxFuture<'static, ()>>>,
    ready: Arc<Mutex<ReadyQueue>>,
    stats: Mutex<ExecutionStats>,
}

impl Default for Executor {
    fn default() -> Self {
        Self::new()
    }
}

impl Executor {
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
            ready: Arc::new(Mutex::new(ReadyQueue::default())),
            stats: Mutex::new(ExecutionStats::default()),
        }
    }

    pub fn spawn(&self, future: BoxFuture<'static, ()>) -> TaskId {
        let task_id = TaskId::next();
        self.tasks.lock().insert(task_id, future);
        self.ready.lock().push(task_id);
        self.stats.lock().spawned += 1;
        task_id
    }

    pub fn has_ready(&self) -> bool {
        !self.ready.lock().order.is_empty()
    }

    pub fn pending_tasks(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Poll one ready task. Returns false if nothing was ready.
    pub fn poll_next(&self) -> bool {
        loop {
            let Some(task_id) = self.ready.lock().pop() else {
                return false;
            };
            // The task is taken out while polling so it can spawn or wake
            // without contending for the task table.
            let Some(mut task) = self.tasks.lock().remove(&task_id) else {
                continue;
            };
            let waker = waker(Arc::new(TaskWaker {
                task_id,
                ready: Arc::clone(&self.ready),
            }));
            let mut cx = Context::from_waker(&waker);
            self.stats.lock().polls += 1;
            match task.as_mut().poll(&mut cx) {
                Poll::Ready(()) => {
                    trace!("task {:?} completed", task_id);
                    self.stats.lock().completed += 1;
                }
                Poll::Pending => {
                    self.tasks.lock().insert(task_id, task);
                }
            }
            return true;
        }
    }

    /// Drop every remaining task.
    pub fn clear(&self) {
        let dropped: Vec<_> = self.tasks.lock().drain().map(|(_, task)| task).collect();
        self.stats.lock().dropped += dropped.len();
        *self.ready.lock() = ReadyQueue::default();
        drop(dropped);
    }

    pub fn stats(&self) -> ExecutionStats {
        self.stats.lock().clone()
    }
}
