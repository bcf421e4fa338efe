//! Engine — wires the dispatcher, the priority scheduler, and one worker
//! per category, and owns their shutdown.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use slb_core::SchedulerConfig;
use slb_state::PolicyStore;

use crate::category_queue::{CategoryQueue, CategoryWorker};
use crate::dispatcher::{Dispatcher, DispatcherHandle};
use crate::error::{SchedulerError, SchedulerResult};
use crate::priority::{PriorityAging, PriorityScheduler};

/// A running dispatch engine.
pub struct Engine {
    handle: DispatcherHandle,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Engine {
    /// Validate `config` and spawn every worker. Must be called inside a
    /// tokio runtime.
    pub fn start(config: &SchedulerConfig, store: Arc<dyn PolicyStore>) -> SchedulerResult<Self> {
        Self::start_with_aging(config, store, None)
    }

    /// Like [`Engine::start`], with a starvation-mitigation hook installed
    /// on the priority scheduler.
    pub fn start_with_aging(
        config: &SchedulerConfig,
        store: Arc<dyn PolicyStore>,
        aging: Option<Arc<dyn PriorityAging>>,
    ) -> SchedulerResult<Self> {
        config
            .validate()
            .map_err(|e| SchedulerError::Validation(e.to_string()))?;

        let queues: Vec<Arc<CategoryQueue>> = config
            .categories()
            .into_iter()
            .map(|category| Arc::new(CategoryQueue::new(category)))
            .collect();

        let mut scheduler = PriorityScheduler::new(queues.iter().cloned(), config.batch_limit);
        if let Some(aging) = aging {
            scheduler = scheduler.with_aging(aging);
        }
        let scheduler = Arc::new(scheduler);

        let (dispatcher, handle) = Dispatcher::new(config, scheduler.clone(), store)?;
        let (shutdown, shutdown_rx) = watch::channel(false);
        let tick = config.tick();

        let mut tasks = Vec::with_capacity(queues.len() + 2);
        for queue in queues {
            let category = queue.category().clone();
            let snapshots = dispatcher
                .subscribe(&category)
                .ok_or_else(|| SchedulerError::UnknownCategory(category))?;
            let worker = CategoryWorker::new(
                queue,
                snapshots,
                config.overload_cpu_threshold,
                config.batch_limit,
            );
            tasks.push(tokio::spawn(worker.run(tick, shutdown_rx.clone())));
        }
        tasks.push(tokio::spawn(scheduler.run(tick, shutdown_rx.clone())));
        tasks.push(tokio::spawn(dispatcher.run(shutdown_rx)));

        info!(
            categories = ?config.categories(),
            tick_ms = config.tick_ms,
            batch_limit = config.batch_limit,
            "dispatch engine started"
        );

        Ok(Self {
            handle,
            shutdown,
            tasks,
        })
    }

    pub fn handle(&self) -> DispatcherHandle {
        self.handle.clone()
    }

    /// Signal every worker to stop and wait for them to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                error!(error = %e, "engine worker exited abnormally");
            }
        }
        info!("dispatch engine stopped");
    }
}
