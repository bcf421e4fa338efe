//! Dispatcher — the single owner of routing state.
//!
//! The dispatcher owns the server registry and the sticky-policy table and
//! is the only component that mutates either. It runs as one task that
//! consumes five bounded streams (requests, health reports, policy updates,
//! config updates, status queries), so every mutation is serialized without
//! a registry lock. Order within one stream is FIFO; no order is implied
//! across streams.
//!
//! Category workers never see the registry. After a change that affects
//! selection the dispatcher publishes a fresh per-category snapshot on a
//! `watch` channel and the worker rebuilds its selector from it.
//!
//! ```text
//! DispatcherHandle ──mpsc──▶ Dispatcher ──push──▶ PriorityScheduler
//!                              │                        │
//!                              └─watch(snapshot)─▶ CategoryWorker
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use slb_core::{
    Category, ClusterConfig, ConfigSummary, HealthReport, PolicyReply, PolicyUpdate, Priority,
    SchedulerConfig, Server, ServerHealth, SlbRequest, UserPolicy,
};
use slb_state::PolicyStore;

use crate::error::{SchedulerError, SchedulerResult};
use crate::priority::PriorityScheduler;
use crate::reply::{ReplyReceiver, ReplySender, reply_channel};
use crate::selector::ServerSnapshot;
use crate::task::{Selection, Task};

/// Dotted-quad IPv4 with no leading zeros. The first octet may not be 0.
const IPV4_PATTERN: &str = concat!(
    r"^(1\d{2}|2[0-4]\d|25[0-5]|[1-9]\d|[1-9])\.",
    r"(1\d{2}|2[0-4]\d|25[0-5]|[1-9]\d|\d)\.",
    r"(1\d{2}|2[0-4]\d|25[0-5]|[1-9]\d|\d)\.",
    r"(1\d{2}|2[0-4]\d|25[0-5]|[1-9]\d|\d)$",
);

// ── Commands ───────────────────────────────────────────────────────

struct PolicyCommand {
    update: PolicyUpdate,
    reply: ReplySender<PolicyReply>,
}

struct ConfigCommand {
    config: ClusterConfig,
    reply: ReplySender<ConfigSummary>,
}

struct StatusCommand {
    reply: ReplySender<DispatcherStatus>,
}

struct Inbox {
    requests: mpsc::Receiver<Task>,
    states: mpsc::Receiver<HealthReport>,
    policies: mpsc::Receiver<PolicyCommand>,
    configs: mpsc::Receiver<ConfigCommand>,
    status: mpsc::Receiver<StatusCommand>,
}

/// Read-only view of the dispatcher's state.
#[derive(Debug, Clone, Serialize)]
pub struct DispatcherStatus {
    /// Registered servers, ordered by IP.
    pub servers: Vec<Server>,
    /// Sticky policies, ordered by user id.
    pub policies: Vec<UserPolicy>,
    /// Tasks waiting in the priority levels.
    pub pending_priority: usize,
    /// Tasks waiting for a server, per category.
    pub pending_by_category: BTreeMap<Category, usize>,
}

// ── Dispatcher ─────────────────────────────────────────────────────

/// The state-owning event loop. Created with [`Dispatcher::new`] and
/// driven by [`Dispatcher::run`].
pub struct Dispatcher {
    registry: BTreeMap<String, Server>,
    policies: HashMap<String, UserPolicy>,
    store: Arc<dyn PolicyStore>,
    scheduler: Arc<PriorityScheduler>,
    snapshots: HashMap<Category, watch::Sender<ServerSnapshot>>,
    ipv4: Regex,
    cpu_threshold: u32,
    inbox: Inbox,
}

impl Dispatcher {
    /// Create the dispatcher and the handle used to talk to it.
    ///
    /// Fails with `Validation` if `config` is invalid. One snapshot channel
    /// is created per configured category. The policy
    /// table is seeded from `store`; if loading fails the dispatcher starts
    /// with no policies.
    pub fn new(
        config: &SchedulerConfig,
        scheduler: Arc<PriorityScheduler>,
        store: Arc<dyn PolicyStore>,
    ) -> SchedulerResult<(Self, DispatcherHandle)> {
        config
            .validate()
            .map_err(|e| SchedulerError::Validation(e.to_string()))?;

        let ipv4 = Regex::new(IPV4_PATTERN)
            .map_err(|e| SchedulerError::Internal(format!("ipv4 pattern: {e}")))?;

        let capacity = config.channel_capacity;
        let (requests_tx, requests) = mpsc::channel(capacity);
        let (states_tx, states) = mpsc::channel(capacity);
        let (policies_tx, policies_rx) = mpsc::channel(capacity);
        let (configs_tx, configs) = mpsc::channel(capacity);
        let (status_tx, status) = mpsc::channel(capacity);

        let snapshots = config
            .categories()
            .into_iter()
            .map(|category| {
                let (tx, _) = watch::channel(ServerSnapshot::from(Vec::new()));
                (category, tx)
            })
            .collect();

        let mut policies = HashMap::new();
        match store.load_policies() {
            Ok(loaded) => {
                info!(count = loaded.len(), "sticky policies loaded");
                for policy in loaded {
                    policies.insert(policy.user_id.clone(), policy);
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to load sticky policies, starting empty");
            }
        }

        let dispatcher = Self {
            registry: BTreeMap::new(),
            policies,
            store,
            scheduler,
            snapshots,
            ipv4,
            cpu_threshold: config.overload_cpu_threshold,
            inbox: Inbox {
                requests,
                states,
                policies: policies_rx,
                configs,
                status,
            },
        };

        let handle = DispatcherHandle {
            requests: requests_tx,
            states: states_tx,
            policies: policies_tx,
            configs: configs_tx,
            status: status_tx,
            default_priority: config.default_priority(),
            request_timeout: config.request_timeout(),
            policy_timeout: config.policy_timeout(),
        };

        Ok((dispatcher, handle))
    }

    /// A receiver for `category`'s server snapshots, or `None` if the
    /// category is not configured.
    pub fn subscribe(&self, category: &Category) -> Option<watch::Receiver<ServerSnapshot>> {
        self.snapshots.get(category).map(watch::Sender::subscribe)
    }

    /// Process commands until `shutdown` flips or every handle is dropped.
    ///
    /// Each command runs behind its own panic barrier. A command that panics
    /// is logged and its reply sender is dropped, which the caller sees as
    /// an internal error; the loop keeps going.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            categories = self.snapshots.len(),
            policies = self.policies.len(),
            "dispatcher started"
        );

        loop {
            tokio::select! {
                Some(task) = self.inbox.requests.recv() => {
                    self.guarded("submit", |d| d.submit(task));
                }
                Some(report) = self.inbox.states.recv() => {
                    self.guarded("server state", |d| d.update_server_state(report));
                }
                Some(cmd) = self.inbox.policies.recv() => {
                    self.guarded("user policy", |d| {
                        let reply = d.update_user_policy(cmd.update);
                        cmd.reply.send(reply);
                    });
                }
                Some(cmd) = self.inbox.configs.recv() => {
                    self.guarded("config", |d| {
                        let summary = d.update_config(cmd.config);
                        cmd.reply.send(summary);
                    });
                }
                Some(cmd) = self.inbox.status.recv() => {
                    self.guarded("status", |d| {
                        cmd.reply.send(d.status());
                    });
                }
                _ = shutdown.changed() => {
                    debug!("dispatcher shutting down");
                    break;
                }
                else => {
                    debug!("all dispatcher handles dropped");
                    break;
                }
            }
        }
    }

    fn guarded(&mut self, op: &'static str, f: impl FnOnce(&mut Self)) {
        if catch_unwind(AssertUnwindSafe(|| f(self))).is_err() {
            error!(op, "dispatcher command panicked");
        }
    }

    // ── Operations ─────────────────────────────────────────────────

    /// Route one task: pinned users are answered directly, everyone else
    /// goes through the priority scheduler.
    fn submit(&mut self, mut task: Task) {
        let policy = task
            .user_id
            .as_deref()
            .and_then(|user| self.policies.get(user));

        if let Some(policy) = policy {
            match policy.pinned_ip.as_deref() {
                Some(ip) => {
                    let selection: Selection = self
                        .registry
                        .get(ip)
                        .filter(|server| !server.health.down)
                        .map(Server::endpoint);
                    debug!(
                        user = %policy.user_id,
                        pinned_ip = ip,
                        target = ?selection,
                        "sticky policy hit"
                    );
                    task.resolve(selection);
                    return;
                }
                None => task.priority = policy.priority,
            }
        }

        if !self.scheduler.accepts(&task.category) {
            let e = SchedulerError::UnknownCategory(task.category.clone());
            warn!(error = %e, session = %task.session_id, "request rejected");
            task.resolve(None);
            return;
        }

        self.scheduler.push(task);
    }

    /// Replace the health of a registered server.
    fn update_server_state(&mut self, report: HealthReport) {
        let Some(server) = self.registry.get_mut(&report.ip) else {
            warn!(ip = %report.ip, "health report for unknown server dropped");
            return;
        };

        let was_eligible = server.health.is_eligible(self.cpu_threshold);
        server.health = report.health();
        let now_eligible = server.health.is_eligible(self.cpu_threshold);

        if was_eligible != now_eligible {
            let category = server.category.clone();
            info!(
                ip = %report.ip,
                category = %category,
                eligible = now_eligible,
                cpu_util = report.cpu_util,
                down = report.down,
                "server eligibility changed"
            );
            self.publish(&category);
        }
    }

    fn update_user_policy(&mut self, update: PolicyUpdate) -> PolicyReply {
        let policy = match self.validate_policy(update) {
            Ok(policy) => policy,
            Err(SchedulerError::Validation(message)) => {
                debug!(reason = %message, "policy update rejected");
                return PolicyReply::fail(message);
            }
            Err(e) => return PolicyReply::fail(e.to_string()),
        };

        if let Err(e) = self.store.upsert_policy(&policy) {
            let e = SchedulerError::from(e);
            warn!(user = %policy.user_id, error = %e, "policy applied in memory only");
        }

        info!(
            user = %policy.user_id,
            priority = %policy.priority,
            pinned_ip = ?policy.pinned_ip,
            "sticky policy updated"
        );
        self.policies.insert(policy.user_id.clone(), policy);
        PolicyReply::success()
    }

    fn validate_policy(&self, update: PolicyUpdate) -> SchedulerResult<UserPolicy> {
        let user_id = update.user_id.trim();
        if user_id.is_empty() {
            return Err(SchedulerError::Validation("userId is empty".to_string()));
        }

        let priority = Priority::new(update.priority)
            .map_err(|e| SchedulerError::Validation(e.to_string()))?;

        let pinned_ip = update.pinned_ip.trim();
        let pinned_ip = if pinned_ip.is_empty() {
            None
        } else if !self.ipv4.is_match(pinned_ip) {
            return Err(SchedulerError::Validation(format!(
                "pinned ip {pinned_ip} is not a valid IPv4 address"
            )));
        } else if !self.registry.contains_key(pinned_ip) {
            return Err(SchedulerError::Validation(format!(
                "pinned ip {pinned_ip} is not a registered server"
            )));
        } else {
            Some(pinned_ip.to_string())
        };

        Ok(UserPolicy {
            user_id: user_id.to_string(),
            priority,
            pinned_ip,
        })
    }

    /// Apply a backend list: update known hosts in place, register new ones
    /// as down, drop hosts that are no longer listed, then rebuild every
    /// category.
    fn update_config(&mut self, config: ClusterConfig) -> ConfigSummary {
        info!(
            timeout = config.global.timeout,
            status_listen_addr = %config.global.status_listen_addr,
            "global settings received, not applied"
        );

        let mut summary = ConfigSummary::default();
        let mut listed = HashSet::with_capacity(config.backends.len());

        for backend in config.backends {
            let category = Category::new(&backend.category);
            listed.insert(backend.host.clone());

            match self.registry.get_mut(&backend.host) {
                Some(server) => {
                    server.category = category;
                    server.weight = backend.weight;
                    server.port = backend.server_port;
                    summary.updated += 1;
                }
                None => {
                    debug!(name = %backend.name, host = %backend.host, "backend registered");
                    self.registry.insert(
                        backend.host.clone(),
                        Server {
                            ip: backend.host,
                            port: backend.server_port,
                            weight: backend.weight,
                            category,
                            health: ServerHealth::pending(),
                        },
                    );
                    summary.added += 1;
                }
            }
        }

        let before = self.registry.len();
        self.registry.retain(|ip, _| listed.contains(ip));
        summary.removed = before - self.registry.len();

        self.publish_all();

        info!(
            added = summary.added,
            updated = summary.updated,
            removed = summary.removed,
            servers = self.registry.len(),
            "backend config applied"
        );
        summary
    }

    fn status(&self) -> DispatcherStatus {
        let mut policies: Vec<UserPolicy> = self.policies.values().cloned().collect();
        policies.sort_by(|a, b| a.user_id.cmp(&b.user_id));

        DispatcherStatus {
            servers: self.registry.values().cloned().collect(),
            policies,
            pending_priority: self.scheduler.len(),
            pending_by_category: self.scheduler.pending_by_category().into_iter().collect(),
        }
    }

    // ── Snapshots ──────────────────────────────────────────────────

    fn snapshot(&self, category: &Category) -> ServerSnapshot {
        self.registry
            .values()
            .filter(|server| &server.category == category)
            .cloned()
            .collect::<Vec<_>>()
            .into()
    }

    fn publish(&self, category: &Category) {
        match self.snapshots.get(category) {
            Some(tx) => {
                let snapshot = self.snapshot(category);
                debug!(category = %category, servers = snapshot.len(), "snapshot published");
                tx.send_replace(snapshot);
            }
            None => {
                warn!(category = %category, "servers registered for a category with no dispatch queue");
            }
        }
    }

    fn publish_all(&self) {
        for category in self.snapshots.keys() {
            self.publish(category);
        }

        let unrouted: BTreeSet<&Category> = self
            .registry
            .values()
            .map(|server| &server.category)
            .filter(|category| !self.snapshots.contains_key(*category))
            .collect();
        for category in unrouted {
            self.publish(category);
        }
    }
}

// ── Handle ─────────────────────────────────────────────────────────

/// Cloneable front door to the dispatcher.
#[derive(Clone)]
pub struct DispatcherHandle {
    requests: mpsc::Sender<Task>,
    states: mpsc::Sender<HealthReport>,
    policies: mpsc::Sender<PolicyCommand>,
    configs: mpsc::Sender<ConfigCommand>,
    status: mpsc::Sender<StatusCommand>,
    default_priority: Priority,
    request_timeout: Duration,
    policy_timeout: Duration,
}

impl DispatcherHandle {
    /// Enqueue a request and return the receiver its selection arrives on.
    pub async fn submit_request(
        &self,
        request: &SlbRequest,
    ) -> SchedulerResult<ReplyReceiver<Selection>> {
        let (task, rx) = Task::new(request, self.default_priority);
        self.requests
            .send(task)
            .await
            .map_err(|_| SchedulerError::ChannelClosed)?;
        Ok(rx)
    }

    /// Submit a request and wait up to the request timeout for a selection.
    pub async fn select_server(&self, request: &SlbRequest) -> SchedulerResult<Selection> {
        self.submit_request(request)
            .await?
            .wait(self.request_timeout)
            .await
    }

    /// Queue a health report. Returns once the report is enqueued.
    pub async fn update_server_state(&self, report: HealthReport) -> SchedulerResult<()> {
        self.states
            .send(report)
            .await
            .map_err(|_| SchedulerError::ChannelClosed)
    }

    /// Validate and apply a sticky policy, waiting up to the policy timeout.
    pub async fn update_user_policy(&self, update: PolicyUpdate) -> SchedulerResult<PolicyReply> {
        let (reply, rx) = reply_channel();
        self.policies
            .send(PolicyCommand { update, reply })
            .await
            .map_err(|_| SchedulerError::ChannelClosed)?;
        rx.wait(self.policy_timeout).await
    }

    /// Apply a backend list and wait until every selector has been rebuilt.
    pub async fn update_config(&self, config: ClusterConfig) -> SchedulerResult<ConfigSummary> {
        let (reply, rx) = reply_channel();
        self.configs
            .send(ConfigCommand { config, reply })
            .await
            .map_err(|_| SchedulerError::ChannelClosed)?;
        rx.wait(self.request_timeout).await
    }

    pub async fn status(&self) -> SchedulerResult<DispatcherStatus> {
        let (reply, rx) = reply_channel();
        self.status
            .send(StatusCommand { reply })
            .await
            .map_err(|_| SchedulerError::ChannelClosed)?;
        rx.wait(self.policy_timeout).await
    }
}
