//! StateStore: redb-backed persistence of workload instances.
//!
//! Read-modify-write operations run inside a single redb write
//! transaction, so concurrent writers (controller, idle manager, API)
//! never lose each other's updates.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Turn a redb error into `StateError::Storage` tagged with the operation.
macro_rules! storage_err {
    ($op:literal) => {
        |e| StateError::Storage {
            op: $op,
            reason: e.to_string(),
        }
    };
}

fn decode(key: &str, bytes: &[u8]) -> StateResult<WorkloadInstance> {
    serde_json::from_slice(bytes).map_err(|e| StateError::Corrupt {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

fn encode(instance: &WorkloadInstance) -> StateResult<Vec<u8>> {
    serde_json::to_vec(instance).map_err(|e| StateError::Encode {
        key: instance.table_key(),
        reason: e.to_string(),
    })
}

/// Thread-safe instance store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(storage_err!("open"))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (standalone mode and tests).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(storage_err!("open"))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(storage_err!("begin"))?;
        txn.open_table(INSTANCES).map_err(storage_err!("open table"))?;
        txn.open_table(META).map_err(storage_err!("open table"))?;
        txn.commit().map_err(storage_err!("commit"))?;
        Ok(())
    }

    // ── Writes ─────────────────────────────────────────────────────

    /// Create an instance or replace the spec of an existing one.
    ///
    /// New instances get a fresh uid and `generation = 1`. An existing
    /// instance keeps its uid and status; its generation is bumped only
    /// when the spec actually differs. Changing the kind of a stored
    /// instance is refused.
    pub fn upsert_instance(
        &self,
        namespace: &str,
        name: &str,
        kind: WorkloadKind,
        spec: WorkloadSpec,
    ) -> StateResult<WorkloadInstance> {
        let key = instance_key(namespace, name);
        let txn = self.db.begin_write().map_err(storage_err!("begin"))?;
        let instance;
        {
            let mut table = txn.open_table(INSTANCES).map_err(storage_err!("open table"))?;
            let existing = match table.get(key.as_str()).map_err(storage_err!("read"))? {
                Some(guard) => Some(decode(&key, guard.value())?),
                None => None,
            };

            instance = match existing {
                Some(mut current) => {
                    if current.kind != kind {
                        return Err(StateError::KindMismatch {
                            key,
                            existing: current.kind,
                            requested: kind,
                        });
                    }
                    if current.spec == spec {
                        return Ok(current);
                    }
                    current.spec = spec;
                    current.generation += 1;
                    current.resource_version += 1;
                    current
                }
                None => {
                    let mut meta = txn.open_table(META).map_err(storage_err!("open table"))?;
                    let seq = meta
                        .get(UID_SEQUENCE)
                        .map_err(storage_err!("read"))?
                        .map(|g| g.value())
                        .unwrap_or(0)
                        + 1;
                    meta.insert(UID_SEQUENCE, seq).map_err(storage_err!("write"))?;
                    WorkloadInstance {
                        namespace: namespace.to_string(),
                        name: name.to_string(),
                        uid: format!("{seq:08x}-{namespace}-{name}"),
                        kind,
                        generation: 1,
                        resource_version: 1,
                        spec,
                        status: None,
                    }
                }
            };

            let value = encode(&instance)?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(storage_err!("write"))?;
        }
        txn.commit().map_err(storage_err!("commit"))?;
        debug!(%key, generation = instance.generation, "instance stored");
        Ok(instance)
    }

    /// Replace the status fields set in `patch`. An absent status is
    /// initialised from defaults first.
    pub fn patch_status(&self, key: &str, patch: &StatusPatch) -> StateResult<WorkloadInstance> {
        self.update(key, |instance| {
            let status = instance.status.get_or_insert_with(WorkloadStatus::default);
            patch.apply(status);
            true
        })
    }

    /// Apply a spec patch; bumps `generation` when the spec changes.
    pub fn patch_spec(&self, key: &str, patch: &SpecPatch) -> StateResult<WorkloadInstance> {
        self.update(key, |instance| {
            let changed = patch.apply(&mut instance.spec);
            if changed {
                instance.generation += 1;
            }
            changed
        })
    }

    /// Delete an instance by key. Returns true if it existed.
    pub fn delete_instance(&self, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(storage_err!("begin"))?;
        let existed;
        {
            let mut table = txn.open_table(INSTANCES).map_err(storage_err!("open table"))?;
            existed = table.remove(key).map_err(storage_err!("write"))?.is_some();
        }
        txn.commit().map_err(storage_err!("commit"))?;
        debug!(%key, existed, "instance deleted");
        Ok(existed)
    }

    /// Read-modify-write in one transaction. `f` returns whether it changed
    /// anything; unchanged instances are not rewritten.
    fn update<F>(&self, key: &str, f: F) -> StateResult<WorkloadInstance>
    where
        F: FnOnce(&mut WorkloadInstance) -> bool,
    {
        let txn = self.db.begin_write().map_err(storage_err!("begin"))?;
        let mut instance: WorkloadInstance;
        {
            let mut table = txn.open_table(INSTANCES).map_err(storage_err!("open table"))?;
            instance = match table.get(key).map_err(storage_err!("read"))? {
                Some(guard) => decode(key, guard.value())?,
                None => return Err(StateError::NotFound(key.to_string())),
            };

            if !f(&mut instance) {
                return Ok(instance);
            }
            instance.resource_version += 1;

            let value = encode(&instance)?;
            table.insert(key, value.as_slice()).map_err(storage_err!("write"))?;
        }
        txn.commit().map_err(storage_err!("commit"))?;
        Ok(instance)
    }

    // ── Reads ──────────────────────────────────────────────────────

    pub fn get_instance(&self, key: &str) -> StateResult<Option<WorkloadInstance>> {
        let txn = self.db.begin_read().map_err(storage_err!("begin"))?;
        let table = txn.open_table(INSTANCES).map_err(storage_err!("open table"))?;
        match table.get(key).map_err(storage_err!("read"))? {
            Some(guard) => Ok(Some(decode(key, guard.value())?)),
            None => Ok(None),
        }
    }

    /// List every instance, ordered by key.
    pub fn list_instances(&self) -> StateResult<Vec<WorkloadInstance>> {
        self.scan(|_| true)
    }

    pub fn list_by_kind(&self, kind: WorkloadKind) -> StateResult<Vec<WorkloadInstance>> {
        Ok(self
            .list_instances()?
            .into_iter()
            .filter(|i| i.kind == kind)
            .collect())
    }

    /// List instances in one namespace; only matching records are decoded.
    pub fn list_namespace(&self, namespace: &str) -> StateResult<Vec<WorkloadInstance>> {
        let prefix = format!("{namespace}/");
        self.scan(|key| key.starts_with(&prefix))
    }

    fn scan(&self, keep: impl Fn(&str) -> bool) -> StateResult<Vec<WorkloadInstance>> {
        let txn = self.db.begin_read().map_err(storage_err!("begin"))?;
        let table = txn.open_table(INSTANCES).map_err(storage_err!("open table"))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(storage_err!("read"))? {
            let (key, value) = entry.map_err(storage_err!("read"))?;
            if keep(key.value()) {
                results.push(decode(key.value(), value.value())?);
            }
        }
        Ok(results)
    }
}
