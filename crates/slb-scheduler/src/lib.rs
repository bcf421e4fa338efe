//! slb-scheduler — request admission, prioritisation, and server selection.
//!
//! A request enters through the [`DispatcherHandle`], is checked against
//! the sticky-policy table by the [`Dispatcher`], waits in the
//! [`PriorityScheduler`] until its level is drained, then waits in its
//! category's [`CategoryQueue`] until that category's worker picks a server
//! with its [`WeightedSelector`]. The result comes back on a single-use
//! reply channel.
//!
//! # Architecture
//!
//! ```text
//! Engine
//!   ├── Dispatcher (owns registry + policies, one task)
//!   │     └── PolicyStore (seed at start, upsert on policy change)
//!   ├── PriorityScheduler (10 FIFO levels, one tick task)
//!   └── per category
//!       ├── CategoryQueue (FIFO)
//!       └── CategoryWorker (tick task, private WeightedSelector)
//! ```

pub mod category_queue;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod priority;
pub mod reply;
pub mod selector;
pub mod task;

pub use category_queue::{CategoryQueue, CategoryWorker};
pub use dispatcher::{Dispatcher, DispatcherHandle, DispatcherStatus};
pub use engine::Engine;
pub use error::{SchedulerError, SchedulerResult};
pub use priority::{PriorityAging, PriorityQueues, PriorityScheduler};
pub use reply::{ReplyReceiver, ReplySender, reply_channel};
pub use selector::{ServerSnapshot, WeightedSelector};
pub use task::{Selection, Task};
