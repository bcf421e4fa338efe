//! StateStore — the redb-backed sticky-policy table.
//!
//! One table, `policies`, maps a user id to the JSON encoding of its
//! [`UserPolicy`]. Each upsert is its own write transaction, so a policy is
//! either fully stored or not at all. `open_in_memory` backs the store with
//! redb's in-memory backend for tests.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, ReadableTableMetadata};
use tracing::debug;

use slb_core::UserPolicy;

use crate::error::{StateError, StateResult};
use crate::tables::POLICIES;

/// Wrap a redb error in a single-field `StateError` variant.
macro_rules! redb_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Shared handle to the policy database.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open the policy database at `path`, creating the file and the
    /// `policies` table on first use.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(redb_err!(Open))?;
        let store = Self::with_schema(db)?;
        debug!(?path, policies = store.count()?, "policy store opened");
        Ok(store)
    }

    /// A fresh, empty store that lives only as long as the process.
    pub fn open_in_memory() -> StateResult<Self> {
        let db = Database::builder()
            .create_with_backend(redb::backends::InMemoryBackend::new())
            .map_err(redb_err!(Open))?;
        Self::with_schema(db)
    }

    fn with_schema(db: Database) -> StateResult<Self> {
        let txn = db.begin_write().map_err(redb_err!(Transaction))?;
        txn.open_table(POLICIES).map_err(redb_err!(Schema))?;
        txn.commit().map_err(redb_err!(Transaction))?;
        Ok(Self { db: Arc::new(db) })
    }

    fn count(&self) -> StateResult<u64> {
        let txn = self.db.begin_read().map_err(redb_err!(Transaction))?;
        let table = txn.open_table(POLICIES).map_err(redb_err!(Schema))?;
        table.len().map_err(redb_err!(Scan))
    }

    /// Insert or replace the policy stored under `policy.user_id`.
    pub fn put_policy(&self, policy: &UserPolicy) -> StateResult<()> {
        let user_id = policy.user_id.as_str();
        let value = serde_json::to_vec(policy).map_err(|e| StateError::Encode {
            user_id: user_id.to_string(),
            reason: e.to_string(),
        })?;
        let upsert_err = |e: redb::StorageError| StateError::Upsert {
            user_id: user_id.to_string(),
            reason: e.to_string(),
        };

        let txn = self.db.begin_write().map_err(redb_err!(Transaction))?;
        {
            let mut table = txn.open_table(POLICIES).map_err(redb_err!(Schema))?;
            table
                .insert(user_id, value.as_slice())
                .map_err(upsert_err)?;
        }
        txn.commit().map_err(redb_err!(Transaction))?;
        debug!(%user_id, "policy stored");
        Ok(())
    }

    pub fn get_policy(&self, user_id: &str) -> StateResult<Option<UserPolicy>> {
        let txn = self.db.begin_read().map_err(redb_err!(Transaction))?;
        let table = txn.open_table(POLICIES).map_err(redb_err!(Schema))?;
        table
            .get(user_id)
            .map_err(redb_err!(Scan))?
            .map(|row| decode(user_id, row.value()))
            .transpose()
    }

    /// Every stored policy, ordered by user id.
    pub fn list_policies(&self) -> StateResult<Vec<UserPolicy>> {
        let txn = self.db.begin_read().map_err(redb_err!(Transaction))?;
        let table = txn.open_table(POLICIES).map_err(redb_err!(Schema))?;
        table
            .iter()
            .map_err(redb_err!(Scan))?
            .map(|row| {
                let (key, value) = row.map_err(redb_err!(Scan))?;
                decode(key.value(), value.value())
            })
            .collect()
    }
}

fn decode(user_id: &str, bytes: &[u8]) -> StateResult<UserPolicy> {
    serde_json::from_slice(bytes).map_err(|e| StateError::Decode {
        user_id: user_id.to_string(),
        reason: e.to_string(),
    })
}
