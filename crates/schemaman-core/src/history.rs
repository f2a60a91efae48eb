//! Per-record version history.
//!
//! Versions are listed committed first (oldest to newest), then entries
//! pending in open change lists, then the user's working draft. Each
//! surface is read only when the stream reaches it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, Stream, StreamExt, TryStreamExt};
use schemaman_state::{
    ChangeListEntry, ChangeListId, CommitVersion, KeyFilter, Record, RecordId, Row, RowKey,
    StorageDriver, StorageResult, Surface, UserId, VersionNumber, WorkingVersion,
};
use serde::Serialize;

use crate::error::{Result, VcmError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionState {
    Committed,
    Pending,
    Working,
}

const LISTING_ORDER: [VersionState; 3] = [
    VersionState::Committed,
    VersionState::Pending,
    VersionState::Working,
];

/// One version of a record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VersionEntry {
    pub state: VersionState,
    pub table: String,
    pub record_id: RecordId,
    /// `None` for working drafts
    pub version_number: Option<VersionNumber>,
    pub change_list_id: Option<ChangeListId>,
    /// Author of the commit, or owner of the pending entry or draft
    pub user_id: UserId,
    /// `None` for deletions
    pub data: Option<Record>,
    pub timestamp: DateTime<Utc>,
}

impl From<CommitVersion> for VersionEntry {
    fn from(c: CommitVersion) -> Self {
        Self {
            state: VersionState::Committed,
            table: c.table,
            record_id: c.record_id,
            version_number: Some(c.version_number),
            change_list_id: c.change_list_id,
            user_id: c.author,
            data: c.data,
            timestamp: c.committed_at,
        }
    }
}

impl From<ChangeListEntry> for VersionEntry {
    fn from(e: ChangeListEntry) -> Self {
        Self {
            state: VersionState::Pending,
            table: e.table,
            record_id: e.record_id,
            version_number: Some(e.version_number),
            change_list_id: Some(e.change_list_id),
            user_id: e.user_id,
            data: e.data,
            timestamp: e.staged_at,
        }
    }
}

impl From<WorkingVersion> for VersionEntry {
    fn from(w: WorkingVersion) -> Self {
        Self {
            state: VersionState::Working,
            table: w.table,
            record_id: w.record_id,
            version_number: None,
            change_list_id: None,
            user_id: w.user_id,
            data: w.data,
            timestamp: w.updated_at,
        }
    }
}

/// Restartable listing of a record's versions as seen by one user.
///
/// Every call to [`RecordVersions::stream`] starts a fresh pass.
pub struct RecordVersions {
    driver: Arc<dyn StorageDriver>,
    table: String,
    record_id: RecordId,
    user_id: UserId,
}

impl RecordVersions {
    pub(crate) fn new(
        driver: Arc<dyn StorageDriver>,
        table: &str,
        record_id: RecordId,
        user_id: UserId,
    ) -> Self {
        Self {
            driver,
            table: table.to_string(),
            record_id,
            user_id,
        }
    }

    pub fn stream(&self) -> impl Stream<Item = Result<VersionEntry>> + '_ {
        stream::iter(LISTING_ORDER)
            .then(move |state| self.load(state))
            .map_ok(|entries| stream::iter(entries.into_iter().map(Ok::<_, VcmError>)))
            .try_flatten()
    }

    pub async fn collect(&self) -> Result<Vec<VersionEntry>> {
        self.stream().try_collect().await
    }

    async fn load(&self, state: VersionState) -> Result<Vec<VersionEntry>> {
        match state {
            VersionState::Committed => {
                let rows = self.scan(Surface::CommitLog).await?;
                let mut commits = rows
                    .iter()
                    .map(|row| row.decode::<CommitVersion>())
                    .collect::<StorageResult<Vec<_>>>()?;
                commits.sort_by_key(|c| c.version_number);
                Ok(commits.into_iter().map(VersionEntry::from).collect())
            }
            VersionState::Pending => {
                let rows = self.scan(Surface::ChangeList).await?;
                let mut entries = rows
                    .iter()
                    .map(|row| row.decode::<ChangeListEntry>())
                    .collect::<StorageResult<Vec<_>>>()?;
                entries.sort_by_key(|e| e.version_number);
                Ok(entries.into_iter().map(VersionEntry::from).collect())
            }
            VersionState::Working => {
                let key = RowKey::working(&self.table, self.record_id, self.user_id);
                let draft = self
                    .driver
                    .raw_get(&key)
                    .await?
                    .map(serde_json::from_value::<WorkingVersion>)
                    .transpose()?;
                Ok(draft.into_iter().map(VersionEntry::from).collect())
            }
        }
    }

    async fn scan(&self, surface: Surface) -> Result<Vec<Row>> {
        let filter = KeyFilter::surface(surface)
            .table(self.table.as_str())
            .record(self.record_id);
        Ok(self.driver.raw_filter(&filter).await?)
    }
}
