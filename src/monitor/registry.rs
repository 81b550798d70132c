// =============================================================================
// Registry — the set of monitored accounts
// =============================================================================
//
// One coarse parking_lot::Mutex guards the whole map. Every operation
// holds the guard only for its data access; broker RPCs never run under
// it (the engine fetches first, then re-acquires to apply).
// =============================================================================

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::info;

use super::account::AccountRecord;

/// Mapping from login id to [`AccountRecord`]. Keys are unique; at most
/// one record exists per id.
pub struct Registry {
    inner: Mutex<HashMap<u64, AccountRecord>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Insert an empty record if absent. Idempotent; performs no broker
    /// I/O. Returns true when a record was actually created.
    pub fn add(&self, login_id: u64) -> bool {
        let mut map = self.inner.lock();
        if map.contains_key(&login_id) {
            return false;
        }
        map.insert(login_id, AccountRecord::new(login_id));
        info!(login_id, monitored = map.len(), "account added to monitoring");
        true
    }

    /// Delete the record if present. Idempotent. Returns true when a
    /// record was actually removed.
    pub fn remove(&self, login_id: u64) -> bool {
        let mut map = self.inner.lock();
        if map.remove(&login_id).is_some() {
            info!(login_id, monitored = map.len(), "account removed from monitoring");
            true
        } else {
            false
        }
    }

    pub fn contains(&self, login_id: u64) -> bool {
        self.inner.lock().contains_key(&login_id)
    }

    pub fn count(&self) -> usize {
        self.inner.lock().len()
    }

    /// Copy the current key set under the guard and release. Ascending
    /// order, so tick iteration and aggregation rows are deterministic.
    pub fn snapshot_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.inner.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Run `op` against the record under the registry's exclusion. Returns
    /// `None` when the id is not monitored (e.g. removed mid-tick).
    pub fn with_record<R>(&self, login_id: u64, op: impl FnOnce(&mut AccountRecord) -> R) -> Option<R> {
        let mut map = self.inner.lock();
        map.get_mut(&login_id).map(op)
    }

    /// Clone all records in ascending login order. Aggregations copy under
    /// the guard, release, then compute on the copy.
    pub fn snapshot_records(&self) -> Vec<AccountRecord> {
        let mut records: Vec<AccountRecord> = self.inner.lock().values().cloned().collect();
        records.sort_unstable_by_key(AccountRecord::login_id);
        records
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_is_idempotent() {
        let registry = Registry::new();
        assert!(registry.add(1001));
        assert!(!registry.add(1001));
        assert_eq!(registry.count(), 1);
        assert!(registry.contains(1001));
    }

    #[test]
    fn remove_absent_is_noop() {
        let registry = Registry::new();
        assert!(!registry.remove(42));
        registry.add(42);
        assert!(registry.remove(42));
        assert!(!registry.remove(42));
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn snapshot_ids_sorted() {
        let registry = Registry::new();
        for id in [300, 100, 200] {
            registry.add(id);
        }
        assert_eq!(registry.snapshot_ids(), vec![100, 200, 300]);
    }

    #[test]
    fn with_record_on_unknown_id() {
        let registry = Registry::new();
        assert!(registry.with_record(1, |_| ()).is_none());

        registry.add(1);
        let login = registry.with_record(1, |r| r.login_id());
        assert_eq!(login, Some(1));
    }
}
