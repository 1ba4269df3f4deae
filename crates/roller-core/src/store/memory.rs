//! In-memory config store with conflict injection.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex, MutexGuard,
    },
};

use jiff::Timestamp;

use super::{version_conflict, ConfigRecord, ConfigStore};
use crate::error::{Result, RollerError};

type Key = (String, String);

/// Process-local config store.
///
/// [`MemoryConfigStore::inject_conflicts`] makes the next `n` conditional
/// updates fail as if another writer had won the race: the stored version is
/// bumped and the caller gets a conflict. [`MemoryConfigStore::inject_removals`]
/// instead deletes the record under the writer, as a concurrent delete would.
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    records: Mutex<HashMap<Key, ConfigRecord>>,
    pending_conflicts: AtomicUsize,
    pending_removals: AtomicUsize,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forces the next `count` updates to conflict.
    pub fn inject_conflicts(&self, count: usize) {
        self.pending_conflicts.fetch_add(count, Ordering::SeqCst);
    }

    /// Makes the next `count` updates find their record deleted.
    pub fn inject_removals(&self, count: usize) {
        self.pending_removals.fetch_add(count, Ordering::SeqCst);
    }

    /// Stores raw data under a record, bypassing version checks. Used to seed
    /// malformed or foreign records.
    pub fn put_raw(&self, namespace: &str, name: &str, data: BTreeMap<String, String>) {
        let mut records = self.lock();
        let version = records
            .get(&key(namespace, name))
            .map_or(1, |r| r.version + 1);
        records.insert(
            key(namespace, name),
            ConfigRecord {
                namespace: namespace.to_string(),
                name: name.to_string(),
                data,
                version,
                updated_at: Timestamp::now(),
            },
        );
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Key, ConfigRecord>> {
        // A panic while holding the lock cannot leave a record half-written.
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn take_injected_conflict(&self) -> bool {
        take_one(&self.pending_conflicts)
    }

    fn take_injected_removal(&self) -> bool {
        take_one(&self.pending_removals)
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

impl ConfigStore for MemoryConfigStore {
    fn get(&self, namespace: &str, name: &str) -> Result<Option<ConfigRecord>> {
        Ok(self.lock().get(&key(namespace, name)).cloned())
    }

    fn create(
        &self,
        namespace: &str,
        name: &str,
        data: BTreeMap<String, String>,
    ) -> Result<ConfigRecord> {
        let mut records = self.lock();
        if records.contains_key(&key(namespace, name)) {
            return Err(version_conflict(name));
        }
        let record = ConfigRecord {
            namespace: namespace.to_string(),
            name: name.to_string(),
            data,
            version: 1,
            updated_at: Timestamp::now(),
        };
        records.insert(key(namespace, name), record.clone());
        Ok(record)
    }

    fn update(
        &self,
        namespace: &str,
        name: &str,
        data: BTreeMap<String, String>,
        expected_version: u64,
    ) -> Result<ConfigRecord> {
        let mut records = self.lock();
        if self.take_injected_removal() {
            records.remove(&key(namespace, name));
        }
        let record = records
            .get_mut(&key(namespace, name))
            .ok_or_else(|| RollerError::NotFound {
                kind: "Record",
                name: name.to_string(),
            })?;

        if self.take_injected_conflict() {
            record.version += 1;
            return Err(version_conflict(name));
        }
        if record.version != expected_version {
            return Err(version_conflict(name));
        }

        record.data = data;
        record.version += 1;
        record.updated_at = Timestamp::now();
        Ok(record.clone())
    }
}
