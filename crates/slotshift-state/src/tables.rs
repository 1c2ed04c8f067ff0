//! redb table definitions for the rollout ledger.

use redb::TableDefinition;

/// Deploy records keyed by `{service_prefix}:{rollout_id}`.
pub const ROLLOUTS: TableDefinition<&str, &[u8]> = TableDefinition::new("rollouts");

/// Scaling snapshot YAML keyed by `{rollout_id}/{service_name}`.
pub const SNAPSHOTS: TableDefinition<&str, &[u8]> = TableDefinition::new("snapshots");

pub fn snapshot_key(rollout_id: &str, service_name: &str) -> String {
    format!("{rollout_id}/{service_name}")
}
