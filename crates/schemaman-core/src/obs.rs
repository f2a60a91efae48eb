//! Structured lifecycle events for record versions and change lists.
//!
//! Events are emitted at `info!` level with an `event` field naming the
//! transition, so they can be filtered or shipped as JSON lines.

use schemaman_state::{ChangeListId, RecordId, UserId, VersionNumber};
use tracing::info;

/// Span tagging every log line of one request with its user and server.
///
/// ```ignore
/// run(&ctx).instrument(obs::request_span("alice", 1)).await
/// ```
pub fn request_span(username: &str, server_id: u32) -> tracing::Span {
    tracing::info_span!("schemaman.request", user = %username, server_id)
}

/// A working draft was written (or replaced).
pub fn emit_working_saved(table: &str, record_id: RecordId, user_id: UserId, deletion: bool) {
    info!(
        event = "working.saved",
        table = %table,
        record_id = %record_id,
        user_id = %user_id,
        deletion = deletion,
    );
}

/// A working draft was discarded.
pub fn emit_working_abandoned(table: &str, record_id: RecordId, user_id: UserId) {
    info!(event = "working.abandoned", table = %table, record_id = %record_id, user_id = %user_id);
}

/// A commit-log entry was created.
pub fn emit_version_committed(
    table: &str,
    record_id: RecordId,
    version: VersionNumber,
    change_list: Option<ChangeListId>,
) {
    info!(
        event = "version.committed",
        table = %table,
        record_id = %record_id,
        version = %version,
        change_list = ?change_list.map(|c| c.0),
    );
}

pub fn emit_change_list_created(change_list: ChangeListId, owner: UserId, members: usize) {
    info!(event = "change_list.created", change_list = %change_list, owner = %owner, members = members);
}

pub fn emit_change_list_committed(change_list: ChangeListId, versions: usize) {
    info!(event = "change_list.committed", change_list = %change_list, versions = versions);
}

pub fn emit_change_list_abandoned(change_list: ChangeListId, members: usize) {
    info!(event = "change_list.abandoned", change_list = %change_list, members = members);
}
