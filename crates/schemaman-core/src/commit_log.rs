//! The single path that appends to the commit log.
//!
//! Every commit, direct or through a change list, stages its writes here:
//! guards on the head row and latest-commit marker it replaces, a freshly
//! allocated version number, the immutable commit entry, the new head row
//! and the new marker.

use chrono::Utc;
use schemaman_state::{
    ChangeListId, CommitVersion, HeadRow, LatestCommit, Record, RecordId, RowKey, Transaction,
    UserId, VersionNumber, WorkingVersion,
};

use crate::error::{Result, VcmError};

/// Sequence that change-list ids are drawn from.
pub(crate) const CHANGE_LIST_SEQUENCE: &str = "change_list";

/// Sequence shared by pending entries and commits of one record.
pub(crate) fn version_sequence(table: &str, record_id: RecordId) -> String {
    format!("version:{table}:{record_id}")
}

/// Sequence that new record ids in `table` are drawn from.
pub(crate) fn record_sequence(table: &str) -> String {
    format!("record:{table}")
}

pub(crate) async fn allocate_version(
    tx: &Transaction,
    table: &str,
    record_id: RecordId,
) -> Result<VersionNumber> {
    let next = tx
        .driver()
        .next_sequence(&version_sequence(table, record_id))
        .await?;
    Ok(VersionNumber(next))
}

/// Stage a new commit of `record_id` and the matching head update.
///
/// `data == None` commits a deletion and removes the head row. The
/// latest-commit marker is written either way, so a commit staged against a
/// record that another writer has since committed (or deleted) conflicts.
pub(crate) async fn stage_commit(
    tx: &mut Transaction,
    table: &str,
    record_id: RecordId,
    data: Option<Record>,
    author: UserId,
    change_list_id: Option<ChangeListId>,
) -> Result<CommitVersion> {
    let head_key = RowKey::head(table, record_id);
    tx.get_for_update(&head_key).await?;
    let latest_key = RowKey::latest(table, record_id);
    tx.get_for_update(&latest_key).await?;

    let version_number = allocate_version(tx, table, record_id).await?;
    let commit_key = RowKey::commit(table, record_id, version_number);
    tx.expect(commit_key.clone(), None);

    let now = Utc::now();
    let commit = CommitVersion {
        table: table.to_string(),
        record_id,
        version_number,
        data: data.clone(),
        author,
        change_list_id,
        committed_at: now,
    };
    tx.put_row(commit_key, &commit)?;
    tx.put_row(
        latest_key,
        &LatestCommit {
            version: version_number,
            deleted: data.is_none(),
            committed_at: now,
        },
    )?;

    match data {
        Some(data) => tx.put_row(
            head_key,
            &HeadRow {
                version: Some(version_number),
                data,
                updated_at: now,
            },
        )?,
        None => tx.delete(head_key),
    }
    Ok(commit)
}

/// Stage the promotion of a user's working draft into a commit.
///
/// The draft is consumed; fails `NotFound` when there is none.
pub(crate) async fn promote_working(
    tx: &mut Transaction,
    table: &str,
    record_id: RecordId,
    user: UserId,
) -> Result<CommitVersion> {
    let key = RowKey::working(table, record_id, user);
    let draft: WorkingVersion = tx.get_for_update_as(&key).await?.ok_or_else(|| {
        VcmError::NotFound(format!(
            "working version of {table}/{record_id} for user {user}"
        ))
    })?;
    tx.delete(key);
    stage_commit(tx, table, record_id, draft.data, user, None).await
}

/// Apply a transaction that creates commits.
pub(crate) async fn apply(tx: Transaction) -> Result<()> {
    tx.commit().await.map_err(VcmError::commit_failed)
}
