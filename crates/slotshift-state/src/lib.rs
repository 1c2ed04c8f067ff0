//! slotshift-state: the rollout ledger.
//!
//! Backed by [redb](https://docs.rs/redb), records what each deploy did so a
//! later rollback invocation can rebuild its `RollbackContext` without
//! re-deriving deploy-time facts from the provider.
//!
//! # Architecture
//!
//! Values are JSON-serialized into redb's `&[u8]` value columns, except
//! scaling snapshots which are stored as the same YAML the migrator replays.
//! Composite keys (`{prefix}:{rollout_id}`, `{rollout_id}/{service}`) keep
//! related records adjacent for prefix scans.
//!
//! The `RolloutLedger` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`).

pub mod error;
pub mod store;
pub mod tables;

pub use error::{StateError, StateResult};
pub use store::RolloutLedger;
