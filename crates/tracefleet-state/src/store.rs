//! Tracepoint store — the durable state contract and its redb backend.
//!
//! `TracepointStore` is the seam between the lifecycle manager and
//! persistence: deployment records by id, a name index, per-agent statuses,
//! and a TTL index with absolute expiries. `RedbStore` implements it over
//! redb with JSON-serialized values. Backend errors surface verbatim; there
//! is no retry or silent recovery at this layer.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use redb::{Database, ReadableTable};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Durable mapping from tracepoint identity to deployment state.
///
/// Every operation is synchronous and atomic with respect to its key group.
/// Implementations must be shareable across tasks; the manager holds the
/// store as `Arc<dyn TracepointStore>`.
pub trait TracepointStore: Send + Sync {
    /// Write-or-replace a tracepoint record.
    fn upsert_tracepoint(&self, id: TracepointId, record: &TracepointRecord) -> StateResult<()>;

    /// Fetch a tracepoint record by id.
    fn get_tracepoint(&self, id: TracepointId) -> StateResult<Option<TracepointRecord>>;

    /// List every tracepoint record.
    fn list_tracepoints(&self) -> StateResult<Vec<TracepointRecord>>;

    /// Write a per-agent status, keyed by `(tracepoint, agent)`.
    /// Last writer wins.
    fn update_agent_status(&self, status: &AgentTracepointStatus) -> StateResult<()>;

    /// List all per-agent statuses for a tracepoint.
    fn list_agent_statuses(&self, id: TracepointId) -> StateResult<Vec<AgentTracepointStatus>>;

    /// Bind a deployment name to a tracepoint id, replacing any prior binding.
    fn bind_name(&self, name: &str, id: TracepointId) -> StateResult<()>;

    /// Resolve names to ids, preserving input order. Unbound names yield
    /// `None` at their position.
    fn lookup_names(&self, names: &[String]) -> StateResult<Vec<Option<TracepointId>>>;

    /// Fetch the records for the given ids; absent ids are skipped.
    fn lookup_by_ids(&self, ids: &[TracepointId]) -> StateResult<Vec<TracepointRecord>>;

    /// Set the lease for a tracepoint to `now + ttl`, replacing any prior lease.
    fn set_ttl(&self, id: TracepointId, ttl: Duration) -> StateResult<()>;

    /// Drop the leases for the given ids, making them immediately eligible
    /// for termination.
    fn delete_ttls(&self, ids: &[TracepointId]) -> StateResult<()>;

    /// List all leases as parallel (ids, unix-millis expiries) vectors.
    fn list_ttls(&self) -> StateResult<(Vec<TracepointId>, Vec<u64>)>;

    /// Delete a tracepoint record. Deleting an absent id is a no-op.
    fn delete_tracepoint(&self, id: TracepointId) -> StateResult<()>;

    /// Delete every agent-status record written by the given agent.
    fn delete_all_for_agent(&self, agent_id: AgentId) -> StateResult<()>;
}

/// Thread-safe tracepoint store backed by redb.
#[derive(Clone)]
pub struct RedbStore {
    db: Arc<Database>,
}

impl RedbStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "tracepoint store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory tracepoint store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(TRACEPOINTS).map_err(map_err!(Table))?;
        txn.open_table(NAMES).map_err(map_err!(Table))?;
        txn.open_table(AGENT_STATUSES).map_err(map_err!(Table))?;
        txn.open_table(TTLS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }
}

impl TracepointStore for RedbStore {
    fn upsert_tracepoint(&self, id: TracepointId, record: &TracepointRecord) -> StateResult<()> {
        let value = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(TRACEPOINTS).map_err(map_err!(Table))?;
            table
                .insert(id.as_bytes().as_slice(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%id, name = %record.name, "tracepoint stored");
        Ok(())
    }

    fn get_tracepoint(&self, id: TracepointId) -> StateResult<Option<TracepointRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(TRACEPOINTS).map_err(map_err!(Table))?;
        match table.get(id.as_bytes().as_slice()).map_err(map_err!(Read))? {
            Some(guard) => {
                let record: TracepointRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    fn list_tracepoints(&self) -> StateResult<Vec<TracepointRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(TRACEPOINTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let record: TracepointRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(record);
        }
        Ok(results)
    }

    fn update_agent_status(&self, status: &AgentTracepointStatus) -> StateResult<()> {
        let key = status.table_key();
        let value = serde_json::to_vec(status).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(AGENT_STATUSES).map_err(map_err!(Table))?;
            table
                .insert(key.as_slice(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn list_agent_statuses(&self, id: TracepointId) -> StateResult<Vec<AgentTracepointStatus>> {
        let prefix = *id.as_bytes();
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(AGENT_STATUSES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(&prefix) {
                let status: AgentTracepointStatus =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(status);
            }
        }
        Ok(results)
    }

    fn bind_name(&self, name: &str, id: TracepointId) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(NAMES).map_err(map_err!(Table))?;
            table
                .insert(name, id.as_bytes().as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%name, %id, "name bound");
        Ok(())
    }

    fn lookup_names(&self, names: &[String]) -> StateResult<Vec<Option<TracepointId>>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(NAMES).map_err(map_err!(Table))?;
        let mut results = Vec::with_capacity(names.len());
        for name in names {
            match table.get(name.as_str()).map_err(map_err!(Read))? {
                Some(guard) => {
                    let id = TracepointId::from_slice(guard.value())
                        .map_err(map_err!(Deserialize))?;
                    results.push(Some(id));
                }
                None => results.push(None),
            }
        }
        Ok(results)
    }

    fn lookup_by_ids(&self, ids: &[TracepointId]) -> StateResult<Vec<TracepointRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(TRACEPOINTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for id in ids {
            if let Some(guard) = table.get(id.as_bytes().as_slice()).map_err(map_err!(Read))? {
                let record: TracepointRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                results.push(record);
            }
        }
        Ok(results)
    }

    fn set_ttl(&self, id: TracepointId, ttl: Duration) -> StateResult<()> {
        let expiry = now_millis().saturating_add(ttl.as_millis() as u64);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(TTLS).map_err(map_err!(Table))?;
            table
                .insert(id.as_bytes().as_slice(), expiry)
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%id, expiry, "lease set");
        Ok(())
    }

    fn delete_ttls(&self, ids: &[TracepointId]) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(TTLS).map_err(map_err!(Table))?;
            for id in ids {
                table
                    .remove(id.as_bytes().as_slice())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn list_ttls(&self) -> StateResult<(Vec<TracepointId>, Vec<u64>)> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(TTLS).map_err(map_err!(Table))?;
        let mut ids = Vec::new();
        let mut expiries = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            let id = TracepointId::from_slice(key.value()).map_err(map_err!(Deserialize))?;
            ids.push(id);
            expiries.push(value.value());
        }
        Ok((ids, expiries))
    }

    fn delete_tracepoint(&self, id: TracepointId) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(TRACEPOINTS).map_err(map_err!(Table))?;
            table
                .remove(id.as_bytes().as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%id, "tracepoint deleted");
        Ok(())
    }

    fn delete_all_for_agent(&self, agent_id: AgentId) -> StateResult<()> {
        let suffix = *agent_id.as_bytes();
        // Collect matching keys in a read transaction first.
        let keys: Vec<Vec<u8>> = {
            let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
            let table = txn.open_table(AGENT_STATUSES).map_err(map_err!(Table))?;
            table
                .iter()
                .map_err(map_err!(Read))?
                .filter_map(|entry| {
                    let (key, _) = entry.ok()?;
                    let k = key.value().to_vec();
                    k.ends_with(&suffix).then_some(k)
                })
                .collect()
        };
        // Delete in a write transaction.
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(AGENT_STATUSES).map_err(map_err!(Table))?;
            for key in &keys {
                table.remove(key.as_slice()).map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%agent_id, removed = keys.len(), "agent statuses deleted");
        Ok(())
    }
}

/// Current unix time in milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn test_program(name: &str) -> TracepointProgram {
        TracepointProgram {
            name: name.to_string(),
            ir: format!("probe {name} {{ emit() }}"),
            selectors: vec![],
        }
    }

    fn test_record(id: TracepointId, name: &str) -> TracepointRecord {
        TracepointRecord {
            id,
            name: name.to_string(),
            deployment: TracepointDeployment {
                name: name.to_string(),
                ttl_secs: 600,
                deployment_spec: DeploymentSpec::default(),
                programs: vec![test_program("p0")],
            },
            expected_state: LifecycleState::Running,
        }
    }

    fn test_status(tp: TracepointId, agent: AgentId, state: LifecycleState) -> AgentTracepointStatus {
        AgentTracepointStatus {
            tracepoint_id: tp,
            agent_id: agent,
            state,
            status: None,
        }
    }

    // ── Tracepoint CRUD ────────────────────────────────────────────

    #[test]
    fn tracepoint_upsert_and_get() {
        let store = RedbStore::open_in_memory().unwrap();
        let id = Uuid::new_v4();
        let record = test_record(id, "http-latency");

        store.upsert_tracepoint(id, &record).unwrap();
        let retrieved = store.get_tracepoint(id).unwrap();

        assert_eq!(retrieved, Some(record));
    }

    #[test]
    fn tracepoint_get_nonexistent_returns_none() {
        let store = RedbStore::open_in_memory().unwrap();
        assert!(store.get_tracepoint(Uuid::new_v4()).unwrap().is_none());
    }

    #[test]
    fn tracepoint_list_all() {
        let store = RedbStore::open_in_memory().unwrap();
        for name in ["a", "b", "c"] {
            let id = Uuid::new_v4();
            store.upsert_tracepoint(id, &test_record(id, name)).unwrap();
        }
        assert_eq!(store.list_tracepoints().unwrap().len(), 3);
    }

    #[test]
    fn tracepoint_upsert_replaces() {
        let store = RedbStore::open_in_memory().unwrap();
        let id = Uuid::new_v4();
        let mut record = test_record(id, "probe");
        store.upsert_tracepoint(id, &record).unwrap();

        record.expected_state = LifecycleState::Terminated;
        store.upsert_tracepoint(id, &record).unwrap();

        let retrieved = store.get_tracepoint(id).unwrap().unwrap();
        assert_eq!(retrieved.expected_state, LifecycleState::Terminated);
        assert_eq!(store.list_tracepoints().unwrap().len(), 1);
    }

    #[test]
    fn tracepoint_delete_is_idempotent() {
        let store = RedbStore::open_in_memory().unwrap();
        let id = Uuid::new_v4();
        store.upsert_tracepoint(id, &test_record(id, "probe")).unwrap();

        store.delete_tracepoint(id).unwrap();
        assert!(store.get_tracepoint(id).unwrap().is_none());
        // Second delete of the same id must be a no-op.
        store.delete_tracepoint(id).unwrap();
    }

    #[test]
    fn lookup_by_ids_skips_absent() {
        let store = RedbStore::open_in_memory().unwrap();
        let id = Uuid::new_v4();
        store.upsert_tracepoint(id, &test_record(id, "probe")).unwrap();

        let records = store.lookup_by_ids(&[id, Uuid::new_v4()]).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, id);
    }

    // ── Name index ─────────────────────────────────────────────────

    #[test]
    fn lookup_names_preserves_order() {
        let store = RedbStore::open_in_memory().unwrap();
        let id_a = Uuid::new_v4();
        let id_c = Uuid::new_v4();
        store.bind_name("alpha", id_a).unwrap();
        store.bind_name("gamma", id_c).unwrap();

        let names = vec![
            "gamma".to_string(),
            "missing".to_string(),
            "alpha".to_string(),
        ];
        let resolved = store.lookup_names(&names).unwrap();
        assert_eq!(resolved, vec![Some(id_c), None, Some(id_a)]);
    }

    #[test]
    fn bind_name_rebinds() {
        let store = RedbStore::open_in_memory().unwrap();
        let old_id = Uuid::new_v4();
        let new_id = Uuid::new_v4();
        store.bind_name("probe", old_id).unwrap();
        store.bind_name("probe", new_id).unwrap();

        let resolved = store.lookup_names(&["probe".to_string()]).unwrap();
        assert_eq!(resolved, vec![Some(new_id)]);
    }

    // ── Agent statuses ─────────────────────────────────────────────

    #[test]
    fn agent_status_last_writer_wins() {
        let store = RedbStore::open_in_memory().unwrap();
        let tp = Uuid::new_v4();
        let agent = Uuid::new_v4();

        store
            .update_agent_status(&test_status(tp, agent, LifecycleState::Running))
            .unwrap();
        store
            .update_agent_status(&test_status(tp, agent, LifecycleState::Terminated))
            .unwrap();

        let statuses = store.list_agent_statuses(tp).unwrap();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].state, LifecycleState::Terminated);
    }

    #[test]
    fn agent_statuses_scoped_to_tracepoint() {
        let store = RedbStore::open_in_memory().unwrap();
        let tp_a = Uuid::new_v4();
        let tp_b = Uuid::new_v4();
        let agent = Uuid::new_v4();

        store
            .update_agent_status(&test_status(tp_a, agent, LifecycleState::Running))
            .unwrap();
        store
            .update_agent_status(&test_status(tp_b, agent, LifecycleState::Running))
            .unwrap();

        assert_eq!(store.list_agent_statuses(tp_a).unwrap().len(), 1);
        assert_eq!(store.list_agent_statuses(tp_b).unwrap().len(), 1);
    }

    #[test]
    fn delete_all_for_agent_leaves_other_agents() {
        let store = RedbStore::open_in_memory().unwrap();
        let tp = Uuid::new_v4();
        let leaving = Uuid::new_v4();
        let staying = Uuid::new_v4();

        store
            .update_agent_status(&test_status(tp, leaving, LifecycleState::Running))
            .unwrap();
        store
            .update_agent_status(&test_status(Uuid::new_v4(), leaving, LifecycleState::Running))
            .unwrap();
        store
            .update_agent_status(&test_status(tp, staying, LifecycleState::Running))
            .unwrap();

        store.delete_all_for_agent(leaving).unwrap();

        let statuses = store.list_agent_statuses(tp).unwrap();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].agent_id, staying);
    }

    // ── TTL index ──────────────────────────────────────────────────

    #[test]
    fn ttl_set_and_list() {
        let store = RedbStore::open_in_memory().unwrap();
        let id = Uuid::new_v4();
        let before = now_millis();
        store.set_ttl(id, Duration::from_secs(600)).unwrap();

        let (ids, expiries) = store.list_ttls().unwrap();
        assert_eq!(ids, vec![id]);
        assert!(expiries[0] >= before + 600_000);
    }

    #[test]
    fn ttl_replace_shortens_lease() {
        let store = RedbStore::open_in_memory().unwrap();
        let id = Uuid::new_v4();
        store.set_ttl(id, Duration::from_secs(600)).unwrap();
        store.set_ttl(id, Duration::from_secs(1)).unwrap();

        let (ids, expiries) = store.list_ttls().unwrap();
        assert_eq!(ids.len(), 1);
        assert!(expiries[0] < now_millis() + 2_000);
    }

    #[test]
    fn ttl_delete_many() {
        let store = RedbStore::open_in_memory().unwrap();
        let id_a = Uuid::new_v4();
        let id_b = Uuid::new_v4();
        let id_c = Uuid::new_v4();
        for id in [id_a, id_b, id_c] {
            store.set_ttl(id, Duration::from_secs(600)).unwrap();
        }

        store.delete_ttls(&[id_a, id_c]).unwrap();

        let (ids, _) = store.list_ttls().unwrap();
        assert_eq!(ids, vec![id_b]);
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.redb");
        let id = Uuid::new_v4();

        {
            let store = RedbStore::open(&db_path).unwrap();
            store.upsert_tracepoint(id, &test_record(id, "probe")).unwrap();
            store.bind_name("probe", id).unwrap();
        }

        let store = RedbStore::open(&db_path).unwrap();
        assert!(store.get_tracepoint(id).unwrap().is_some());
        assert_eq!(
            store.lookup_names(&["probe".to_string()]).unwrap(),
            vec![Some(id)]
        );
    }

    // ── Edge cases ─────────────────────────────────────────────────

    #[test]
    fn empty_store_operations() {
        let store = RedbStore::open_in_memory().unwrap();

        assert!(store.list_tracepoints().unwrap().is_empty());
        assert!(store.list_agent_statuses(Uuid::new_v4()).unwrap().is_empty());
        assert!(store.list_ttls().unwrap().0.is_empty());
        assert!(store.lookup_by_ids(&[Uuid::new_v4()]).unwrap().is_empty());
        store.delete_ttls(&[Uuid::new_v4()]).unwrap();
        store.delete_all_for_agent(Uuid::new_v4()).unwrap();
    }
}
