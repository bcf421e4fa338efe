//! The persistence seam used by the dispatcher.

use slb_core::UserPolicy;

use crate::error::StateResult;
use crate::store::StateStore;

/// Durable storage for sticky user policies.
///
/// Calls are synchronous and made from the dispatcher loop, so
/// implementations should be fast (an embedded database, not a network
/// round trip).
pub trait PolicyStore: Send + Sync {
    /// Every stored policy, used to seed the dispatcher at start-up.
    fn load_policies(&self) -> StateResult<Vec<UserPolicy>>;

    /// Insert or replace the policy for `policy.user_id`.
    fn upsert_policy(&self, policy: &UserPolicy) -> StateResult<()>;
}

impl PolicyStore for StateStore {
    fn load_policies(&self) -> StateResult<Vec<UserPolicy>> {
        self.list_policies()
    }

    fn upsert_policy(&self, policy: &UserPolicy) -> StateResult<()> {
        self.put_policy(policy)
    }
}
