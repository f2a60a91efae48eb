//! Storage trait definitions for SchemaMan
//!
//! Every version state of a logical record is stored under a tagged key:
//! `(surface, table, record_id, qualifier)`. The surfaces are:
//! - `Head`: published values
//! - `Working`: per-user drafts, qualified by user
//! - `ChangeList`: staged drafts, qualified by change list
//! - `CommitLog`: immutable history, qualified by version number
//! - `Registry`: one entry per change list
//!
//! `StorageDriver` is the capability interface each backing engine
//! implements. An in-memory driver is provided in the `fakes` module.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StorageError;
use crate::schema::{ChangeListId, RecordId, UserId, VersionNumber};

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Reserved table name holding change-list registry entries.
pub const REGISTRY_TABLE: &str = "_change_lists";

/// Physical partition a row lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Surface {
    Head,
    Working,
    ChangeList,
    CommitLog,
    /// Per-record marker of the newest commit, tombstones included
    Latest,
    Registry,
}

impl Surface {
    pub fn as_str(self) -> &'static str {
        match self {
            Surface::Head => "head",
            Surface::Working => "working",
            Surface::ChangeList => "change_list",
            Surface::CommitLog => "commit_log",
            Surface::Latest => "latest",
            Surface::Registry => "registry",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "head" => Some(Surface::Head),
            "working" => Some(Surface::Working),
            "change_list" => Some(Surface::ChangeList),
            "commit_log" => Some(Surface::CommitLog),
            "latest" => Some(Surface::Latest),
            "registry" => Some(Surface::Registry),
            _ => None,
        }
    }
}

impl std::fmt::Display for Surface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Extra key component distinguishing rows of the same record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Qualifier {
    None,
    User(UserId),
    ChangeList(ChangeListId),
    Version(VersionNumber),
}

impl Qualifier {
    /// Split into a `(kind, value)` pair for engines with flat columns.
    pub fn to_parts(self) -> (&'static str, u64) {
        match self {
            Qualifier::None => ("none", 0),
            Qualifier::User(u) => ("user", u.0),
            Qualifier::ChangeList(c) => ("change_list", c.0),
            Qualifier::Version(v) => ("version", v.0),
        }
    }

    pub fn from_parts(kind: &str, value: u64) -> Option<Self> {
        match kind {
            "none" => Some(Qualifier::None),
            "user" => Some(Qualifier::User(UserId(value))),
            "change_list" => Some(Qualifier::ChangeList(ChangeListId(value))),
            "version" => Some(Qualifier::Version(VersionNumber(value))),
            _ => None,
        }
    }
}

/// Tagged storage key.
///
/// Ordering is (surface, table, record, qualifier), so commit-log scans of
/// one record come back oldest first.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RowKey {
    pub surface: Surface,
    pub table: String,
    pub record_id: RecordId,
    pub qualifier: Qualifier,
}

impl RowKey {
    pub fn new(
        surface: Surface,
        table: impl Into<String>,
        record_id: RecordId,
        qualifier: Qualifier,
    ) -> Self {
        Self {
            surface,
            table: table.into(),
            record_id,
            qualifier,
        }
    }

    pub fn head(table: &str, record_id: RecordId) -> Self {
        Self::new(Surface::Head, table, record_id, Qualifier::None)
    }

    pub fn working(table: &str, record_id: RecordId, user_id: UserId) -> Self {
        Self::new(Surface::Working, table, record_id, Qualifier::User(user_id))
    }

    pub fn change_list_entry(table: &str, record_id: RecordId, change_list: ChangeListId) -> Self {
        Self::new(
            Surface::ChangeList,
            table,
            record_id,
            Qualifier::ChangeList(change_list),
        )
    }

    pub fn commit(table: &str, record_id: RecordId, version: VersionNumber) -> Self {
        Self::new(Surface::CommitLog, table, record_id, Qualifier::Version(version))
    }

    pub fn latest(table: &str, record_id: RecordId) -> Self {
        Self::new(Surface::Latest, table, record_id, Qualifier::None)
    }

    pub fn registry(change_list: ChangeListId) -> Self {
        Self::new(
            Surface::Registry,
            REGISTRY_TABLE,
            RecordId(change_list.0),
            Qualifier::None,
        )
    }
}

impl std::fmt::Display for RowKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.surface, self.table, self.record_id)?;
        match self.qualifier {
            Qualifier::None => Ok(()),
            Qualifier::User(u) => write!(f, "@user:{u}"),
            Qualifier::ChangeList(c) => write!(f, "@change_list:{c}"),
            Qualifier::Version(v) => write!(f, "@version:{v}"),
        }
    }
}

/// Row selector for `raw_filter`. Unset components match anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyFilter {
    pub surface: Surface,
    pub table: Option<String>,
    pub record_id: Option<RecordId>,
    pub qualifier: Option<Qualifier>,
}

impl KeyFilter {
    pub fn surface(surface: Surface) -> Self {
        Self {
            surface,
            table: None,
            record_id: None,
            qualifier: None,
        }
    }

    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn record(mut self, record_id: RecordId) -> Self {
        self.record_id = Some(record_id);
        self
    }

    pub fn qualifier(mut self, qualifier: Qualifier) -> Self {
        self.qualifier = Some(qualifier);
        self
    }

    pub fn matches(&self, key: &RowKey) -> bool {
        key.surface == self.surface
            && self.table.as_deref().map_or(true, |t| key.table == t)
            && self.record_id.map_or(true, |r| key.record_id == r)
            && self.qualifier.map_or(true, |q| key.qualifier == q)
    }
}

/// A stored row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub key: RowKey,
    pub value: Value,
}

impl Row {
    /// Decode the row value into a typed row.
    pub fn decode<T: DeserializeOwned>(&self) -> StorageResult<T> {
        serde_json::from_value(self.value.clone()).map_err(|e| {
            StorageError::Serialization(format!("decoding {}: {}", self.key, e))
        })
    }
}

/// Encode a typed row into a stored value.
pub fn encode<T: Serialize>(row: &T) -> StorageResult<Value> {
    Ok(serde_json::to_value(row)?)
}

/// A single operation in an atomic batch.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// Insert or replace a row
    Put { key: RowKey, value: Value },

    /// Remove a row; no-op if absent
    Delete { key: RowKey },

    /// Guard: the current value must equal `value` (`None` = absent),
    /// otherwise the whole batch fails with `StorageError::Conflict`
    Expect { key: RowKey, value: Option<Value> },
}

impl Operation {
    pub fn key(&self) -> &RowKey {
        match self {
            Operation::Put { key, .. } | Operation::Delete { key } | Operation::Expect { key, .. } => {
                key
            }
        }
    }
}

/// Capability interface of a backing storage engine.
///
/// Guarantees:
/// - `raw_filter` returns rows ordered by `RowKey`.
/// - `raw_delete` is a no-op for absent rows.
/// - `next_sequence` is atomic across callers and strictly increasing per
///   name; numbers are never handed out twice, gaps are allowed.
/// - `apply_batch` applies all operations or none of them.
#[async_trait]
pub trait StorageDriver: Send + Sync {
    /// Engine-type tag this driver was registered under (e.g. "memory").
    fn engine(&self) -> &str;

    /// Verify the store is reachable and readable.
    async fn test_connection(&self) -> StorageResult<()>;

    async fn raw_get(&self, key: &RowKey) -> StorageResult<Option<Value>>;

    async fn raw_set(&self, key: &RowKey, value: Value) -> StorageResult<()>;

    async fn raw_delete(&self, key: &RowKey) -> StorageResult<()>;

    async fn raw_filter(&self, filter: &KeyFilter) -> StorageResult<Vec<Row>>;

    /// Allocate the next number of a named sequence, starting at 1.
    async fn next_sequence(&self, name: &str) -> StorageResult<u64>;

    /// Apply a batch atomically.
    async fn apply_batch(&self, ops: Vec<Operation>) -> StorageResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_keys_order_by_version() {
        let a = RowKey::commit("hosts", RecordId(1), VersionNumber(2));
        let b = RowKey::commit("hosts", RecordId(1), VersionNumber(10));
        assert!(a < b);
    }

    #[test]
    fn filter_matches_partial_keys() {
        let key = RowKey::working("hosts", RecordId(5), UserId(9));
        assert!(KeyFilter::surface(Surface::Working).matches(&key));
        assert!(KeyFilter::surface(Surface::Working)
            .qualifier(Qualifier::User(UserId(9)))
            .matches(&key));
        assert!(!KeyFilter::surface(Surface::Working)
            .table("services")
            .matches(&key));
        assert!(!KeyFilter::surface(Surface::Head).matches(&key));
    }

    #[test]
    fn qualifier_parts_round_trip() {
        for q in [
            Qualifier::None,
            Qualifier::User(UserId(3)),
            Qualifier::ChangeList(ChangeListId(4)),
            Qualifier::Version(VersionNumber(5)),
        ] {
            let (kind, value) = q.to_parts();
            assert_eq!(Qualifier::from_parts(kind, value), Some(q));
        }
        assert_eq!(Qualifier::from_parts("bogus", 1), None);
    }

    #[test]
    fn row_key_display() {
        let key = RowKey::commit("hosts", RecordId(1), VersionNumber(3));
        assert_eq!(key.to_string(), "commit_log/hosts/1@version:3");
        assert_eq!(
            RowKey::registry(ChangeListId(8)).to_string(),
            "registry/_change_lists/8"
        );
    }
}
