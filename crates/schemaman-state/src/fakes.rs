//! In-memory storage driver
//!
//! `MemoryDriver` satisfies the `StorageDriver` contract without any external
//! dependencies. It backs the "memory" engine type and the test suites.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::error::StorageError;
use crate::storage_traits::*;

#[derive(Debug, Default)]
struct MemoryState {
    rows: BTreeMap<RowKey, Value>,
    sequences: HashMap<String, u64>,
    /// One-shot failure: fail the next batch when reaching this op index
    fail_batch_at: Option<usize>,
    batches_applied: u64,
}

/// In-memory driver backed by a `BTreeMap<RowKey, Value>`.
#[derive(Debug, Default)]
pub struct MemoryDriver {
    state: Mutex<MemoryState>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `apply_batch` fail when it reaches operation `index`.
    ///
    /// Operations before `index` are evaluated but, as with any failed batch,
    /// none of them become visible.
    pub fn fail_next_batch_at(&self, index: usize) -> StorageResult<()> {
        self.lock()?.fail_batch_at = Some(index);
        Ok(())
    }

    /// Number of rows currently stored on a surface.
    pub fn count(&self, surface: Surface) -> StorageResult<usize> {
        Ok(self
            .lock()?
            .rows
            .keys()
            .filter(|k| k.surface == surface)
            .count())
    }

    /// Number of batches successfully applied so far.
    pub fn batches_applied(&self) -> StorageResult<u64> {
        Ok(self.lock()?.batches_applied)
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|e| StorageError::Backend(format!("memory driver lock poisoned: {e}")))
    }
}

#[async_trait]
impl StorageDriver for MemoryDriver {
    fn engine(&self) -> &str {
        "memory"
    }

    async fn test_connection(&self) -> StorageResult<()> {
        self.lock().map(|_| ())
    }

    async fn raw_get(&self, key: &RowKey) -> StorageResult<Option<Value>> {
        Ok(self.lock()?.rows.get(key).cloned())
    }

    async fn raw_set(&self, key: &RowKey, value: Value) -> StorageResult<()> {
        self.lock()?.rows.insert(key.clone(), value);
        Ok(())
    }

    async fn raw_delete(&self, key: &RowKey) -> StorageResult<()> {
        self.lock()?.rows.remove(key);
        Ok(())
    }

    async fn raw_filter(&self, filter: &KeyFilter) -> StorageResult<Vec<Row>> {
        let state = self.lock()?;
        Ok(state
            .rows
            .iter()
            .filter(|(k, _)| filter.matches(k))
            .map(|(k, v)| Row {
                key: k.clone(),
                value: v.clone(),
            })
            .collect())
    }

    async fn next_sequence(&self, name: &str) -> StorageResult<u64> {
        let mut state = self.lock()?;
        let next = state.sequences.entry(name.to_string()).or_insert(0);
        *next += 1;
        Ok(*next)
    }

    async fn apply_batch(&self, ops: Vec<Operation>) -> StorageResult<()> {
        let mut state = self.lock()?;
        let fail_at = state.fail_batch_at.take();

        // Apply to a scratch copy; only a fully successful batch is swapped in.
        let mut scratch = state.rows.clone();
        for (index, op) in ops.iter().enumerate() {
            if fail_at == Some(index) {
                debug!(index, "injected batch failure");
                return Err(StorageError::Backend(format!(
                    "injected failure at batch operation {index}"
                )));
            }
            match op {
                Operation::Put { key, value } => {
                    scratch.insert(key.clone(), value.clone());
                }
                Operation::Delete { key } => {
                    scratch.remove(key);
                }
                Operation::Expect { key, value } => {
                    if scratch.get(key) != value.as_ref() {
                        return Err(StorageError::Conflict {
                            key: key.to_string(),
                            reason: "row changed since it was read".to_string(),
                        });
                    }
                }
            }
        }

        state.rows = scratch;
        state.batches_applied += 1;
        Ok(())
    }
}
