//! Transaction scope over a `StorageDriver`
//!
//! Writes are buffered as `Operation`s and submitted with a single
//! `apply_batch` call on commit. Reads through the scope see the buffered
//! writes layered over committed state.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::storage_traits::{
    encode, KeyFilter, Operation, Row, RowKey, StorageDriver, StorageResult,
};

/// A buffered, all-or-nothing unit of work.
///
/// Dropping a scope without calling [`Transaction::commit`] discards it.
pub struct Transaction {
    driver: Arc<dyn StorageDriver>,
    staged: Vec<Operation>,
    overlay: BTreeMap<RowKey, Option<Value>>,
    finished: bool,
}

impl Transaction {
    pub fn begin(driver: Arc<dyn StorageDriver>) -> Self {
        Self {
            driver,
            staged: Vec::new(),
            overlay: BTreeMap::new(),
            finished: false,
        }
    }

    pub fn driver(&self) -> &Arc<dyn StorageDriver> {
        &self.driver
    }

    /// Number of buffered operations, guards included.
    pub fn len(&self) -> usize {
        self.staged.len()
    }

    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    /// Read a row, preferring this scope's own writes.
    pub async fn get(&self, key: &RowKey) -> StorageResult<Option<Value>> {
        if let Some(staged) = self.overlay.get(key) {
            return Ok(staged.clone());
        }
        self.driver.raw_get(key).await
    }

    /// Read a row and decode it.
    pub async fn get_as<T: DeserializeOwned>(&self, key: &RowKey) -> StorageResult<Option<T>> {
        match self.get(key).await? {
            Some(value) => Row {
                key: key.clone(),
                value,
            }
            .decode()
            .map(Some),
            None => Ok(None),
        }
    }

    /// Read a row that this scope is about to change.
    ///
    /// When the value comes from committed state, a guard is staged so the
    /// commit fails if another writer changes the row first.
    pub async fn get_for_update(&mut self, key: &RowKey) -> StorageResult<Option<Value>> {
        if let Some(staged) = self.overlay.get(key) {
            return Ok(staged.clone());
        }
        let current = self.driver.raw_get(key).await?;
        self.expect(key.clone(), current.clone());
        Ok(current)
    }

    /// Typed form of [`Transaction::get_for_update`].
    pub async fn get_for_update_as<T: DeserializeOwned>(
        &mut self,
        key: &RowKey,
    ) -> StorageResult<Option<T>> {
        match self.get_for_update(key).await? {
            Some(value) => Row {
                key: key.clone(),
                value,
            }
            .decode()
            .map(Some),
            None => Ok(None),
        }
    }

    /// Scan rows, with this scope's writes applied on top.
    pub async fn filter(&self, filter: &KeyFilter) -> StorageResult<Vec<Row>> {
        let mut rows: BTreeMap<RowKey, Value> = self
            .driver
            .raw_filter(filter)
            .await?
            .into_iter()
            .map(|row| (row.key, row.value))
            .collect();

        for (key, staged) in self.overlay.iter().filter(|(k, _)| filter.matches(k)) {
            match staged {
                Some(value) => {
                    rows.insert(key.clone(), value.clone());
                }
                None => {
                    rows.remove(key);
                }
            }
        }

        Ok(rows
            .into_iter()
            .map(|(key, value)| Row { key, value })
            .collect())
    }

    pub fn put(&mut self, key: RowKey, value: Value) {
        self.overlay.insert(key.clone(), Some(value.clone()));
        self.staged.push(Operation::Put { key, value });
    }

    /// Encode and stage a typed row.
    pub fn put_row<T: Serialize>(&mut self, key: RowKey, row: &T) -> StorageResult<()> {
        let value = encode(row)?;
        self.put(key, value);
        Ok(())
    }

    pub fn delete(&mut self, key: RowKey) {
        self.overlay.insert(key.clone(), None);
        self.staged.push(Operation::Delete { key });
    }

    /// Stage a guard on the current value of `key`.
    pub fn expect(&mut self, key: RowKey, value: Option<Value>) {
        self.staged.push(Operation::Expect { key, value });
    }

    /// Submit every buffered operation as one atomic batch.
    pub async fn commit(mut self) -> StorageResult<()> {
        self.finished = true;
        let ops = std::mem::take(&mut self.staged);
        if ops.is_empty() {
            return Ok(());
        }
        debug!(
            engine = self.driver.engine(),
            ops = ops.len(),
            "committing transaction"
        );
        self.driver.apply_batch(ops).await
    }

    /// Discard every buffered operation.
    pub fn rollback(mut self) {
        self.finished = true;
        debug!(discarded = self.staged.len(), "transaction rolled back");
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.finished && !self.staged.is_empty() {
            debug!(
                discarded = self.staged.len(),
                "transaction dropped before commit, rolled back"
            );
        }
    }
}
