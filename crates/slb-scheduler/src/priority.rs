//! Priority admission queue.
//!
//! Ten FIFO queues, one per priority level. On every tick the worker moves
//! tasks to their category queues, highest level first, until the levels
//! are empty or the per-tick cap is reached. A lower level is only touched
//! once every higher level is empty, so sustained high-priority load can
//! starve low priorities. An optional [`PriorityAging`] hook runs before
//! each pass and may reorder or promote waiting tasks; none is installed
//! by default.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use slb_core::{Category, PRIORITY_LEVELS};

use crate::category_queue::CategoryQueue;
use crate::task::Task;

/// The per-level queues, indexed by `Priority::index()`.
pub type PriorityQueues = [VecDeque<Task>; PRIORITY_LEVELS];

/// Hook for starvation mitigation.
///
/// Called under the queue lock at the start of every tick. Implementations
/// that move a task to another level should update `task.priority` to match.
pub trait PriorityAging: Send + Sync {
    fn adjust(&self, queues: &mut PriorityQueues);
}

/// Priority-leveled admission queue feeding the category queues.
pub struct PriorityScheduler {
    queues: Mutex<PriorityQueues>,
    categories: HashMap<Category, Arc<CategoryQueue>>,
    aging: Option<Arc<dyn PriorityAging>>,
    batch_limit: usize,
}

impl PriorityScheduler {
    /// Create a scheduler forwarding into `categories`. The category set is
    /// fixed for the scheduler's lifetime.
    pub fn new(categories: impl IntoIterator<Item = Arc<CategoryQueue>>, batch_limit: usize) -> Self {
        let categories = categories
            .into_iter()
            .map(|q| (q.category().clone(), q))
            .collect();
        Self {
            queues: Mutex::new(std::array::from_fn(|_| VecDeque::new())),
            categories,
            aging: None,
            batch_limit,
        }
    }

    /// Install a starvation-mitigation hook.
    pub fn with_aging(mut self, aging: Arc<dyn PriorityAging>) -> Self {
        self.aging = Some(aging);
        self
    }

    /// True if tasks of `category` have a queue to go to.
    pub fn accepts(&self, category: &Category) -> bool {
        self.categories.contains_key(category)
    }

    pub fn category_queue(&self, category: &Category) -> Option<&Arc<CategoryQueue>> {
        self.categories.get(category)
    }

    /// Append a task to the queue for its priority.
    pub fn push(&self, task: Task) {
        debug!(priority = %task.priority, category = %task.category, "task admitted");
        let level = task.priority.index();
        self.lock()[level].push_back(task);
    }

    /// Tasks waiting in the priority levels.
    pub fn len(&self) -> usize {
        self.lock().iter().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tasks waiting in each category queue, sorted by category.
    pub fn pending_by_category(&self) -> Vec<(Category, usize)> {
        let mut pending: Vec<(Category, usize)> = self
            .categories
            .iter()
            .map(|(category, queue)| (category.clone(), queue.len()))
            .collect();
        pending.sort();
        pending
    }

    /// Run one pass. Returns the number of tasks drained from the levels;
    /// tasks whose caller already gave up are dropped instead of forwarded.
    pub fn tick(&self) -> usize {
        let batch = {
            let mut queues = self.lock();
            if let Some(aging) = &self.aging {
                aging.adjust(&mut queues);
            }

            let mut batch = Vec::new();
            for level in (0..PRIORITY_LEVELS).rev() {
                let queue = &mut queues[level];
                while batch.len() < self.batch_limit {
                    match queue.pop_front() {
                        Some(task) => batch.push(task),
                        None => break,
                    }
                }
                if batch.len() >= self.batch_limit {
                    break;
                }
            }
            batch
        };

        let count = batch.len();
        for task in batch {
            self.forward(task);
        }
        count
    }

    /// Forward on every `tick` until `shutdown` flips.
    pub async fn run(self: Arc<Self>, tick: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            categories = self.categories.len(),
            batch_limit = self.batch_limit,
            aging = self.aging.is_some(),
            "priority scheduler started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick();
                }
                _ = shutdown.changed() => {
                    debug!("priority scheduler shutting down");
                    break;
                }
            }
        }
    }

    fn forward(&self, task: Task) {
        if task.is_abandoned() {
            debug!(session = %task.session_id, "caller gone, task dropped before selection");
            return;
        }
        match self.categories.get(&task.category) {
            Some(queue) => queue.push(task),
            None => {
                warn!(category = %task.category, "no dispatch queue for task type");
                task.resolve(None);
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, PriorityQueues> {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
