//! Weighted round-robin selector.
//!
//! Interleaved weighted round robin over a fixed server snapshot. Each
//! pass over the list lowers a weight threshold by the gcd of the eligible
//! weights; a server is picked when its weight reaches the threshold. Over
//! one full cycle every eligible server is picked in proportion to its
//! weight, and heavy servers are spread across the cycle instead of being
//! picked in a burst.
//!
//! A selector never observes registry changes. The dispatcher publishes a
//! new snapshot and the owning worker builds a fresh selector from it.

use std::sync::Arc;

use slb_core::{Category, Server};

use crate::error::{SchedulerError, SchedulerResult};

/// Snapshot of one category's servers, shared between the dispatcher and
/// the category worker.
pub type ServerSnapshot = Arc<[Server]>;

/// Picks servers from a fixed snapshot in weighted round-robin order.
///
/// Not shared: each category worker owns its selector, so `pick` takes
/// `&mut self` and needs no locking.
pub struct WeightedSelector {
    category: Category,
    servers: ServerSnapshot,
    /// Eligibility per server, fixed for the lifetime of the snapshot.
    eligible: Vec<bool>,
    /// gcd of the eligible weights, 0 when there are none.
    gcd: i64,
    /// Largest eligible weight, 0 when there are none.
    max_weight: i64,
    last_index: Option<usize>,
    current_weight: i64,
}

impl WeightedSelector {
    /// Build a selector over `servers`.
    ///
    /// Servers that are down or whose CPU utilisation exceeds
    /// `cpu_threshold` stay in the rotation but are never picked.
    pub fn new(category: Category, servers: ServerSnapshot, cpu_threshold: u32) -> Self {
        let eligible: Vec<bool> = servers
            .iter()
            .map(|s| s.health.is_eligible(cpu_threshold))
            .collect();

        let eligible_weights = servers
            .iter()
            .zip(&eligible)
            .filter(|(_, ok)| **ok)
            .map(|(s, _)| s.weight as i64);

        let (gcd, max_weight) =
            eligible_weights.fold((0, 0), |(g, m), w| (gcd(g, w), m.max(w)));

        Self {
            category,
            servers,
            eligible,
            gcd,
            max_weight,
            last_index: None,
            current_weight: 0,
        }
    }

    /// An empty selector; every pick fails with `NoServer`.
    pub fn empty(category: Category) -> Self {
        Self::new(category, Arc::from(Vec::new()), 0)
    }

    /// Pick the next server.
    ///
    /// Scans at most one full pass of the snapshot. With a static snapshot
    /// that is always enough to reach an eligible server, so exhausting the
    /// scan means there is none.
    pub fn pick(&mut self) -> SchedulerResult<&Server> {
        let n = self.servers.len();
        if n == 0 {
            return Err(SchedulerError::NoServer(self.category.clone()));
        }

        for _ in 0..n {
            let idx = match self.last_index {
                Some(last) => (last + 1) % n,
                None => 0,
            };
            self.last_index = Some(idx);

            if idx == 0 {
                self.current_weight -= self.step();
                if self.current_weight <= 0 {
                    self.current_weight = self.max_weight;
                    if self.current_weight == 0 {
                        return Err(SchedulerError::NoServer(self.category.clone()));
                    }
                }
            }

            if !self.eligible[idx] {
                continue;
            }

            if self.servers[idx].weight as i64 >= self.current_weight {
                return Ok(&self.servers[idx]);
            }
        }

        Err(SchedulerError::NoServer(self.category.clone()))
    }

    pub fn category(&self) -> &Category {
        &self.category
    }

    /// The snapshot this selector was built from.
    pub fn servers(&self) -> &[Server] {
        &self.servers
    }

    /// Number of servers that can currently be picked.
    pub fn eligible_count(&self) -> usize {
        self.eligible.iter().filter(|ok| **ok).count()
    }

    /// Amount the threshold drops on each wrap. With no eligible weights the
    /// current threshold itself is used, which sends it straight to a reset.
    fn step(&self) -> i64 {
        if self.gcd == 0 {
            self.current_weight
        } else {
            self.gcd
        }
    }
}

/// Euclid's algorithm; `gcd(0, w) == w`.
fn gcd(mut a: i64, mut b: i64) -> i64 {
    while b != 0 {
        let r = a % b;
        a = b;
        b = r;
    }
    a
}
