//! RolloutLedger: redb-backed persistence of deploy records.
//!
//! A deploy writes one [`DeployRecord`] plus the scaling snapshots it
//! captured; a rollback reads them back, runs, and writes the record again
//! with its final status.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use slotshift_core::{DeployRecord, RecordStatus, ScalingSnapshot};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

#[derive(Clone)]
pub struct RolloutLedger {
    db: Arc<Database>,
}

impl RolloutLedger {
    /// Open (or create) a ledger file at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let ledger = Self { db: Arc::new(db) };
        ledger.ensure_tables()?;
        debug!(?path, "rollout ledger opened");
        Ok(ledger)
    }

    /// Ephemeral in-memory ledger.
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let ledger = Self { db: Arc::new(db) };
        ledger.ensure_tables()?;
        debug!("in-memory rollout ledger opened");
        Ok(ledger)
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(ROLLOUTS).map_err(map_err!(Table))?;
        txn.open_table(SNAPSHOTS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn put_bytes(
        &self,
        table: TableDefinition<'static, &'static str, &'static [u8]>,
        key: &str,
        value: &[u8],
    ) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut t = txn.open_table(table).map_err(map_err!(Table))?;
            t.insert(key, value).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Rollouts ───────────────────────────────────────────────────

    /// Insert or replace a deploy record.
    pub fn put_record(&self, record: &DeployRecord) -> StateResult<()> {
        let key = record.table_key();
        let value = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
        self.put_bytes(ROLLOUTS, &key, &value)?;
        debug!(%key, status = ?record.status, "deploy record stored");
        Ok(())
    }

    pub fn get_record(&self, prefix: &str, rollout_id: &str) -> StateResult<Option<DeployRecord>> {
        let key = format!("{prefix}:{rollout_id}");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ROLLOUTS).map_err(map_err!(Table))?;
        match table.get(key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => {
                let record: DeployRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// All records for a service prefix, oldest first.
    pub fn list_records(&self, prefix: &str) -> StateResult<Vec<DeployRecord>> {
        let key_prefix = format!("{prefix}:");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ROLLOUTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(&key_prefix) {
                let record: DeployRecord =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(record);
            }
        }
        results.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.rollout_id.cmp(&b.rollout_id))
        });
        Ok(results)
    }

    /// Most recent record for a prefix.
    pub fn latest_record(&self, prefix: &str) -> StateResult<Option<DeployRecord>> {
        Ok(self.list_records(prefix)?.pop())
    }

    /// Rewrite only the status of an existing record.
    pub fn set_status(
        &self,
        prefix: &str,
        rollout_id: &str,
        status: RecordStatus,
    ) -> StateResult<DeployRecord> {
        let mut record = self
            .get_record(prefix, rollout_id)?
            .ok_or_else(|| StateError::NotFound(format!("{prefix}:{rollout_id}")))?;
        record.status = status;
        self.put_record(&record)?;
        Ok(record)
    }

    // ── Snapshots ──────────────────────────────────────────────────

    pub fn put_snapshot(
        &self,
        rollout_id: &str,
        service_name: &str,
        snapshot: &ScalingSnapshot,
    ) -> StateResult<()> {
        let key = snapshot_key(rollout_id, service_name);
        let yaml = snapshot.to_yaml().map_err(map_err!(Serialize))?;
        self.put_bytes(SNAPSHOTS, &key, yaml.as_bytes())?;
        debug!(%key, entries = snapshot.entries.len(), "scaling snapshot stored");
        Ok(())
    }

    pub fn get_snapshot(
        &self,
        rollout_id: &str,
        service_name: &str,
    ) -> StateResult<Option<ScalingSnapshot>> {
        let key = snapshot_key(rollout_id, service_name);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SNAPSHOTS).map_err(map_err!(Table))?;
        match table.get(key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => {
                let yaml = std::str::from_utf8(guard.value()).map_err(map_err!(Deserialize))?;
                let snapshot = ScalingSnapshot::from_yaml(yaml).map_err(map_err!(Deserialize))?;
                Ok(Some(snapshot))
            }
            None => Ok(None),
        }
    }
}
