//! Admission tasks.

use std::time::Instant;

use slb_core::{Category, Priority, ReqMode, SlbRequest};

use crate::reply::{ReplyReceiver, ReplySender, reply_channel};

/// Result of a selection: the chosen `ip:port`, or `None` when no server
/// could be picked. Ingress turns `None` into an empty/failed response.
pub type Selection = Option<String>;

/// One admission request travelling through the queues.
///
/// A task sits in exactly one queue at a time and is consumed when it is
/// resolved, so it can reply at most once.
#[derive(Debug)]
pub struct Task {
    pub user_id: Option<String>,
    pub session_id: String,
    pub category: Category,
    pub priority: Priority,
    pub mode: ReqMode,
    /// When the task was admitted. Read by priority aging hooks.
    pub enqueued_at: Instant,
    reply: ReplySender<Selection>,
}

impl Task {
    /// Build a task from an ingress request. Out-of-range priorities are
    /// clamped; a missing priority falls back to `default_priority`.
    pub fn new(request: &SlbRequest, default_priority: Priority) -> (Self, ReplyReceiver<Selection>) {
        let (reply, rx) = reply_channel();
        let task = Self {
            user_id: request.user().map(str::to_string),
            session_id: request.session_id.clone(),
            category: request.category(),
            priority: request
                .priority
                .map(Priority::saturating)
                .unwrap_or(default_priority),
            mode: request.mode,
            enqueued_at: Instant::now(),
            reply,
        };
        (task, rx)
    }

    /// Deliver the selection to the caller. Returns false if the caller
    /// already stopped waiting.
    pub fn resolve(self, selection: Selection) -> bool {
        self.reply.send(selection)
    }

    /// True once the caller has stopped waiting.
    pub fn is_abandoned(&self) -> bool {
        self.reply.is_abandoned()
    }
}
