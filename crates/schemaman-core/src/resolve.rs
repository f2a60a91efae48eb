//! Read resolution.
//!
//! A read walks an ordered chain of lookup steps and stops at the first
//! step that finds a row. Point reads fetch one row per step; scans load
//! every surface up front and resolve each record against the same chain.

use schemaman_state::{
    ChangeListEntry, ChangeListId, CommitVersion, HeadRow, Record, RecordId, UserId,
    VersionNumber, WorkingVersion,
};
use serde::Serialize;

/// Where a resolved value was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VersionSource {
    /// Published row; `version` is `None` for unversioned writes
    Head { version: Option<VersionNumber> },
    /// The caller's own working draft
    Working,
    /// An entry staged in an open change list
    PendingChange {
        change_list: ChangeListId,
        version: VersionNumber,
    },
    /// A commit-log entry
    Commit { version: VersionNumber },
}

impl VersionSource {
    pub fn version(&self) -> Option<VersionNumber> {
        match *self {
            VersionSource::Head { version } => version,
            VersionSource::Working => None,
            VersionSource::PendingChange { version, .. } | VersionSource::Commit { version } => {
                Some(version)
            }
        }
    }
}

/// A record value together with the surface it resolved from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedRecord {
    pub table: String,
    pub record_id: RecordId,
    pub source: VersionSource,
    pub data: Record,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    PendingEntry(VersionNumber),
    Commit(VersionNumber),
    Working(UserId),
    Head,
}

/// Lookup order for a read.
///
/// An explicit version is looked up among pending change-list entries and
/// then the commit log, and never consults working drafts. Otherwise the
/// caller's draft (when enabled) shadows the head.
pub(crate) fn lookup_chain(
    version: Option<VersionNumber>,
    use_working: bool,
    user: UserId,
) -> Vec<Step> {
    match version {
        Some(v) => vec![Step::PendingEntry(v), Step::Commit(v)],
        None if use_working => vec![Step::Working(user), Step::Head],
        None => vec![Step::Head],
    }
}

/// A row found by a lookup step. `data == None` is a deletion.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Hit {
    pub data: Option<Record>,
    pub source: VersionSource,
}

impl Hit {
    pub fn head(row: HeadRow) -> Self {
        Self {
            data: Some(row.data),
            source: VersionSource::Head {
                version: row.version,
            },
        }
    }

    pub fn working(draft: WorkingVersion) -> Self {
        Self {
            data: draft.data,
            source: VersionSource::Working,
        }
    }

    pub fn pending(entry: ChangeListEntry) -> Self {
        Self {
            data: entry.data,
            source: VersionSource::PendingChange {
                change_list: entry.change_list_id,
                version: entry.version_number,
            },
        }
    }

    pub fn commit(commit: CommitVersion) -> Self {
        Self {
            data: commit.data,
            source: VersionSource::Commit {
                version: commit.version_number,
            },
        }
    }

    /// `None` when the hit is a deletion.
    pub fn into_resolved(self, table: &str, record_id: RecordId) -> Option<ResolvedRecord> {
        let source = self.source;
        self.data.map(|data| ResolvedRecord {
            table: table.to_string(),
            record_id,
            source,
            data,
        })
    }
}

/// Everything a scan loaded for one record.
#[derive(Debug, Default)]
pub(crate) struct Candidates {
    pub head: Option<HeadRow>,
    pub working: Option<WorkingVersion>,
    pub pending: Option<ChangeListEntry>,
    pub commit: Option<CommitVersion>,
}

impl Candidates {
    fn lookup(&self, step: Step) -> Option<Hit> {
        match step {
            Step::PendingEntry(v) => self
                .pending
                .clone()
                .filter(|e| e.version_number == v)
                .map(Hit::pending),
            Step::Commit(v) => self
                .commit
                .clone()
                .filter(|c| c.version_number == v)
                .map(Hit::commit),
            Step::Working(user) => self
                .working
                .clone()
                .filter(|d| d.user_id == user)
                .map(Hit::working),
            Step::Head => self.head.clone().map(Hit::head),
        }
    }

    /// Resolve against `chain`; the first step with a row wins.
    pub fn resolve(&self, chain: &[Step]) -> Option<Hit> {
        chain.iter().find_map(|step| self.lookup(*step))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn data(v: serde_json::Value) -> Record {
        v.as_object().cloned().unwrap()
    }

    fn head(version: u64, v: serde_json::Value) -> HeadRow {
        HeadRow {
            version: Some(VersionNumber(version)),
            data: data(v),
            updated_at: Utc::now(),
        }
    }

    fn draft(user: u64, v: Option<serde_json::Value>) -> WorkingVersion {
        WorkingVersion {
            table: "hosts".to_string(),
            record_id: RecordId(1),
            user_id: UserId(user),
            data: v.map(data),
            base_version: None,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn chain_for_explicit_version_skips_working() {
        let chain = lookup_chain(Some(VersionNumber(4)), true, UserId(1));
        assert_eq!(
            chain,
            vec![
                Step::PendingEntry(VersionNumber(4)),
                Step::Commit(VersionNumber(4))
            ]
        );
    }

    #[test]
    fn chain_without_working() {
        assert_eq!(lookup_chain(None, false, UserId(1)), vec![Step::Head]);
        assert_eq!(
            lookup_chain(None, true, UserId(1)),
            vec![Step::Working(UserId(1)), Step::Head]
        );
    }

    #[test]
    fn working_draft_shadows_head_for_its_owner_only() {
        let candidates = Candidates {
            head: Some(head(1, json!({"port": 80}))),
            working: Some(draft(7, Some(json!({"port": 8080})))),
            ..Default::default()
        };

        let own = candidates
            .resolve(&lookup_chain(None, true, UserId(7)))
            .unwrap();
        assert_eq!(own.source, VersionSource::Working);
        assert_eq!(own.data, Some(data(json!({"port": 8080}))));

        let other = candidates
            .resolve(&lookup_chain(None, true, UserId(8)))
            .unwrap();
        assert_eq!(
            other.source,
            VersionSource::Head {
                version: Some(VersionNumber(1))
            }
        );
    }

    #[test]
    fn deletion_draft_resolves_to_absent() {
        let candidates = Candidates {
            head: Some(head(1, json!({"port": 80}))),
            working: Some(draft(7, None)),
            ..Default::default()
        };
        let hit = candidates
            .resolve(&lookup_chain(None, true, UserId(7)))
            .unwrap();
        assert_eq!(hit.into_resolved("hosts", RecordId(1)), None);
    }

    #[test]
    fn version_source_reports_version() {
        assert_eq!(VersionSource::Working.version(), None);
        assert_eq!(
            VersionSource::Commit {
                version: VersionNumber(3)
            }
            .version(),
            Some(VersionNumber(3))
        );
    }
}
