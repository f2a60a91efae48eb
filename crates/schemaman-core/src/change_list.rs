//! Change lists: reviewable bundles of working drafts.
//!
//! Creating a change list moves drafts out of the owner's working set
//! into pending entries, each with a version number taken from its
//! record's sequence. Committing promotes every entry in one transaction;
//! abandoning discards them. Both close the change list for good.

use chrono::Utc;
use schemaman_state::{
    ChangeListEntry, ChangeListId, ChangeListMember, ChangeListRecord, ChangeListState,
    KeyFilter, Qualifier, RecordId, Row, RowKey, Surface, Transaction, VersionNumber,
    WorkingVersion,
};
use serde::Serialize;
use tracing::instrument;

use crate::commit_log::{self, CHANGE_LIST_SEQUENCE};
use crate::context::RequestContext;
use crate::error::{Result, VcmError};
use crate::obs;

/// A version created by committing a change list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommittedVersion {
    pub table: String,
    pub record_id: RecordId,
    pub version: VersionNumber,
}

/// Outcome of [`ChangeListManager::commit`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitSummary {
    pub change_list_id: ChangeListId,
    pub versions: Vec<CommittedVersion>,
}

pub struct ChangeListManager<'a> {
    ctx: &'a RequestContext,
}

impl<'a> ChangeListManager<'a> {
    pub(crate) fn new(ctx: &'a RequestContext) -> Self {
        Self { ctx }
    }

    /// Stage the caller's draft of one record in a new change list.
    #[instrument(skip(self), fields(user = %self.ctx.user_id()))]
    pub async fn create_change_list(
        &self,
        table: &str,
        record_id: RecordId,
    ) -> Result<ChangeListId> {
        let user = self.ctx.user_id();
        let key = RowKey::working(table, record_id, user);
        let mut tx = self.ctx.begin();
        let value = tx.get_for_update(&key).await?.ok_or_else(|| {
            VcmError::NotFound(format!(
                "working version of {table}/{record_id} for user {user}"
            ))
        })?;
        self.stage(tx, vec![Row { key, value }]).await
    }

    /// Stage every draft in the caller's working set in a new change list.
    #[instrument(skip(self), fields(user = %self.ctx.user_id()))]
    pub async fn create_change_list_from_working_set(&self) -> Result<ChangeListId> {
        let user = self.ctx.user_id();
        let mut tx = self.ctx.begin();
        let rows = tx
            .filter(&KeyFilter::surface(Surface::Working).qualifier(Qualifier::User(user)))
            .await?;
        if rows.is_empty() {
            return Err(VcmError::NoWorkingChanges(user.to_string()));
        }
        for row in &rows {
            tx.expect(row.key.clone(), Some(row.value.clone()));
        }
        self.stage(tx, rows).await
    }

    /// Abandon an open change list, discarding its pending entries.
    #[instrument(skip(self), fields(user = %self.ctx.user_id()))]
    pub async fn abandon_change_list(&self, id: ChangeListId) -> Result<()> {
        let mut tx = self.ctx.begin();
        let record = self.load_open(&mut tx, id).await?;
        for member in &record.members {
            tx.delete(RowKey::change_list_entry(&member.table, member.record_id, id));
        }
        let members = record.members.len();
        tx.put_row(RowKey::registry(id), &record.close(ChangeListState::Abandoned))?;
        commit_log::apply(tx).await?;

        obs::emit_change_list_abandoned(id, members);
        Ok(())
    }

    /// Commit every entry of an open change list, all or nothing.
    ///
    /// Each entry becomes a new commit with a freshly allocated version
    /// number and the change list moves to COMMITTED. If any part fails
    /// the change list stays OPEN and no commit is recorded.
    #[instrument(skip(self), fields(user = %self.ctx.user_id()))]
    pub async fn commit(&self, id: ChangeListId) -> Result<CommitSummary> {
        let mut tx = self.ctx.begin();
        let mut record = self.load_open(&mut tx, id).await?;

        let mut versions = Vec::with_capacity(record.members.len());
        for member in &mut record.members {
            let key = RowKey::change_list_entry(&member.table, member.record_id, id);
            let entry: ChangeListEntry = tx.get_for_update_as(&key).await?.ok_or_else(|| {
                VcmError::NotFound(format!(
                    "entry {}/{} of change list {id}",
                    member.table, member.record_id
                ))
            })?;
            tx.delete(key);

            let commit = commit_log::stage_commit(
                &mut tx,
                &entry.table,
                entry.record_id,
                entry.data,
                entry.user_id,
                Some(id),
            )
            .await?;
            member.committed_version = Some(commit.version_number);
            versions.push(CommittedVersion {
                table: commit.table,
                record_id: commit.record_id,
                version: commit.version_number,
            });
        }

        tx.put_row(RowKey::registry(id), &record.close(ChangeListState::Committed))?;
        commit_log::apply(tx).await?;

        for v in &versions {
            obs::emit_version_committed(&v.table, v.record_id, v.version, Some(id));
        }
        obs::emit_change_list_committed(id, versions.len());
        Ok(CommitSummary {
            change_list_id: id,
            versions,
        })
    }

    /// Registry entry of a change list, in any state.
    pub async fn change_list(&self, id: ChangeListId) -> Result<ChangeListRecord> {
        let row = self
            .ctx
            .driver()
            .raw_get(&RowKey::registry(id))
            .await?
            .ok_or_else(|| VcmError::NotFound(format!("change list {id}")))?;
        Ok(serde_json::from_value(row)?)
    }

    /// Every change list, optionally only those in `state`, ordered by id.
    pub async fn list_change_lists(
        &self,
        state: Option<ChangeListState>,
    ) -> Result<Vec<ChangeListRecord>> {
        let rows = self
            .ctx
            .driver()
            .raw_filter(&KeyFilter::surface(Surface::Registry))
            .await?;
        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let record: ChangeListRecord = row.decode()?;
            if state.map_or(true, |s| record.state == s) {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Move guarded draft rows into pending entries of a new change list.
    async fn stage(&self, mut tx: Transaction, drafts: Vec<Row>) -> Result<ChangeListId> {
        let owner = self.ctx.user_id();
        let id = ChangeListId(
            self.ctx
                .driver()
                .next_sequence(CHANGE_LIST_SEQUENCE)
                .await?,
        );

        let now = Utc::now();
        let mut members = Vec::with_capacity(drafts.len());
        for row in drafts {
            let draft: WorkingVersion = row.decode()?;
            let version_number =
                commit_log::allocate_version(&tx, &draft.table, draft.record_id).await?;
            let entry = ChangeListEntry {
                change_list_id: id,
                table: draft.table.clone(),
                record_id: draft.record_id,
                user_id: draft.user_id,
                version_number,
                data: draft.data,
                staged_at: now,
            };
            tx.put_row(
                RowKey::change_list_entry(&draft.table, draft.record_id, id),
                &entry,
            )?;
            tx.delete(row.key);
            members.push(ChangeListMember {
                table: draft.table,
                record_id: draft.record_id,
                pending_version: version_number,
                committed_version: None,
            });
        }

        let registry_key = RowKey::registry(id);
        tx.expect(registry_key.clone(), None);
        let count = members.len();
        tx.put_row(registry_key, &ChangeListRecord::open(id, owner, members))?;
        commit_log::apply(tx).await?;

        obs::emit_change_list_created(id, owner, count);
        Ok(id)
    }

    /// Read and guard a registry entry, requiring it to be OPEN.
    async fn load_open(&self, tx: &mut Transaction, id: ChangeListId) -> Result<ChangeListRecord> {
        let record: ChangeListRecord = tx
            .get_for_update_as(&RowKey::registry(id))
            .await?
            .ok_or_else(|| VcmError::NotFound(format!("change list {id}")))?;
        if record.state.is_terminal() {
            return Err(VcmError::InvalidState {
                subject: format!("change list {id}"),
                state: record.state.to_string(),
                expected: ChangeListState::Open.to_string(),
            });
        }
        Ok(record)
    }
}
