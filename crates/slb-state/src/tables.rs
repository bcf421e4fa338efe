//! redb table definitions for the SLB policy store.
//!
//! Tables use `&str` keys and `&[u8]` values (JSON-serialized domain types).

use redb::TableDefinition;

/// User policies keyed by `{user_id}`.
pub const POLICIES: TableDefinition<&str, &[u8]> = TableDefinition::new("policies");
