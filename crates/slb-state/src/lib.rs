//! slb-state — durable store for sticky user policies.
//!
//! Backed by [redb](https://docs.rs/redb). Policies are JSON-serialized
//! into a single table keyed by user id. The dispatcher only talks to the
//! [`PolicyStore`] trait, so a failing or remote store can be swapped in
//! without touching scheduling code.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod policy;
pub mod store;
pub mod tables;

pub use error::{StateError, StateResult};
pub use policy::PolicyStore;
pub use store::StateStore;
