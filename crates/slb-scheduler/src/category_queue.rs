//! Per-category dispatch queues.
//!
//! Each configured category owns a FIFO `CategoryQueue` and a
//! `CategoryWorker` that drains it on a fixed tick, picks a server for each
//! task with its private `WeightedSelector`, and replies to the caller.
//! The queue lock only covers queue mutation; selection runs after the
//! batch has been taken out.

use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use slb_core::{Category, ReqMode};

use crate::selector::{ServerSnapshot, WeightedSelector};
use crate::task::{Selection, Task};

/// FIFO of tasks waiting for a server in one category.
pub struct CategoryQueue {
    category: Category,
    tasks: Mutex<VecDeque<Task>>,
}

impl CategoryQueue {
    pub fn new(category: Category) -> Self {
        Self {
            category,
            tasks: Mutex::new(VecDeque::new()),
        }
    }

    pub fn category(&self) -> &Category {
        &self.category
    }

    /// Append a task to the back of the queue.
    pub fn push(&self, task: Task) {
        debug!(category = %self.category, priority = %task.priority, "task queued for selection");
        self.lock().push_back(task);
    }

    /// Remove up to `limit` tasks from the front, in FIFO order.
    pub fn take_batch(&self, limit: usize) -> Vec<Task> {
        let mut tasks = self.lock();
        let n = tasks.len().min(limit);
        tasks.drain(..n).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // A panic while holding the lock cannot leave a VecDeque half-updated.
    fn lock(&self) -> MutexGuard<'_, VecDeque<Task>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Drains one `CategoryQueue` and resolves its tasks.
pub struct CategoryWorker {
    queue: Arc<CategoryQueue>,
    snapshots: watch::Receiver<ServerSnapshot>,
    selector: WeightedSelector,
    cpu_threshold: u32,
    batch_limit: usize,
}

impl CategoryWorker {
    /// Create a worker. The selector is built from the snapshot currently
    /// published on `snapshots`.
    pub fn new(
        queue: Arc<CategoryQueue>,
        mut snapshots: watch::Receiver<ServerSnapshot>,
        cpu_threshold: u32,
        batch_limit: usize,
    ) -> Self {
        let snapshot = snapshots.borrow_and_update().clone();
        let selector = WeightedSelector::new(queue.category().clone(), snapshot, cpu_threshold);
        Self {
            queue,
            snapshots,
            selector,
            cpu_threshold,
            batch_limit,
        }
    }

    /// Run one drain pass. Returns the number of tasks resolved.
    ///
    /// A snapshot published since the previous pass replaces the selector
    /// before any task in this pass is resolved.
    pub fn tick(&mut self) -> usize {
        if self.snapshots.has_changed().unwrap_or(false) {
            self.rebuild_selector();
        }

        let batch = self.queue.take_batch(self.batch_limit);
        let count = batch.len();
        for task in batch {
            self.resolve(task);
        }
        count
    }

    /// Drain on every `tick` until `shutdown` flips.
    pub async fn run(mut self, tick: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(category = %self.queue.category(), "category worker started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick();
                }
                _ = shutdown.changed() => {
                    debug!(category = %self.queue.category(), "category worker shutting down");
                    break;
                }
            }
        }
    }

    fn rebuild_selector(&mut self) {
        let snapshot = self.snapshots.borrow_and_update().clone();
        self.selector = WeightedSelector::new(
            self.queue.category().clone(),
            snapshot,
            self.cpu_threshold,
        );
        debug!(
            category = %self.queue.category(),
            servers = self.selector.servers().len(),
            eligible = self.selector.eligible_count(),
            "selector rebuilt"
        );
    }

    fn resolve(&mut self, task: Task) {
        let picked = catch_unwind(AssertUnwindSafe(|| {
            self.selector.pick().map(|server| server.endpoint())
        }));

        let selection: Selection = match picked {
            Ok(Ok(endpoint)) => Some(endpoint),
            Ok(Err(e)) => {
                debug!(category = %task.category, error = %e, "no server selected");
                None
            }
            Err(_) => {
                error!(category = %task.category, "selector panicked, rebuilding");
                let snapshot = self.snapshots.borrow().clone();
                self.selector = WeightedSelector::new(
                    self.queue.category().clone(),
                    snapshot,
                    self.cpu_threshold,
                );
                None
            }
        };

        match task.mode {
            ReqMode::SelectServer => {
                debug!(session = %task.session_id, target = ?selection, "server selected");
            }
            ReqMode::DoWork => {
                debug!(session = %task.session_id, target = ?selection, "target handed to work executor");
            }
        }

        task.resolve(selection);
    }
}
