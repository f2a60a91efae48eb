//! Persisted row types for the version-managed surfaces
//!
//! Rows:
//! - `HeadRow`: the published value of a record
//! - `WorkingVersion`: a per-user draft
//! - `ChangeListEntry`: a draft staged inside an open change list
//! - `CommitVersion`: an immutable commit-log entry
//! - `LatestCommit`: the newest commit of a record, kept even after deletion
//! - `ChangeListRecord`: the registry entry of a change list

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A record payload: field name to JSON value.
pub type Record = serde_json::Map<String, serde_json::Value>;

macro_rules! id_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                $name(value)
            }
        }
    };
}

id_newtype!(
    /// Primary key of a record within its table
    RecordId
);
id_newtype!(
    /// Stable identifier of a user, as produced by identity resolution
    UserId
);
id_newtype!(
    /// Identifier of a change list
    ChangeListId
);
id_newtype!(
    /// Handle addressing one version of one record
    VersionNumber
);

/// Published value of a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeadRow {
    /// Commit this row was published from; `None` for unversioned writes
    pub version: Option<VersionNumber>,
    pub data: Record,
    pub updated_at: DateTime<Utc>,
}

/// Newest commit of a record. Rewritten by every commit, so racing
/// commits of one record conflict even when neither sees a head row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatestCommit {
    pub version: VersionNumber,
    pub deleted: bool,
    pub committed_at: DateTime<Utc>,
}

/// A user's uncommitted draft of a record.
///
/// `data == None` marks a deletion draft.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkingVersion {
    pub table: String,
    pub record_id: RecordId,
    pub user_id: UserId,
    pub data: Option<Record>,
    /// Head version the draft was started from, if any
    pub base_version: Option<VersionNumber>,
    pub updated_at: DateTime<Utc>,
}

/// A draft staged for review inside an open change list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeListEntry {
    pub change_list_id: ChangeListId,
    pub table: String,
    pub record_id: RecordId,
    pub user_id: UserId,
    /// Pending version handle, allocated from the record's version sequence
    pub version_number: VersionNumber,
    pub data: Option<Record>,
    pub staged_at: DateTime<Utc>,
}

/// An accepted, immutable revision of a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitVersion {
    pub table: String,
    pub record_id: RecordId,
    pub version_number: VersionNumber,
    /// `None` records a deletion
    pub data: Option<Record>,
    pub author: UserId,
    pub change_list_id: Option<ChangeListId>,
    pub committed_at: DateTime<Utc>,
}

/// Lifecycle state of a change list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeListState {
    Open,
    Committed,
    Abandoned,
}

impl ChangeListState {
    /// Committed and abandoned change lists accept no further transitions.
    pub fn is_terminal(self) -> bool {
        !matches!(self, ChangeListState::Open)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ChangeListState::Open => "open",
            ChangeListState::Committed => "committed",
            ChangeListState::Abandoned => "abandoned",
        }
    }
}

impl std::fmt::Display for ChangeListState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One record staged in a change list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeListMember {
    pub table: String,
    pub record_id: RecordId,
    pub pending_version: VersionNumber,
    /// Filled in when the change list commits
    pub committed_version: Option<VersionNumber>,
}

/// Registry entry of a change list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeListRecord {
    pub id: ChangeListId,
    pub owner: UserId,
    pub state: ChangeListState,
    pub members: Vec<ChangeListMember>,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl ChangeListRecord {
    /// Create an open change list over the given members.
    pub fn open(id: ChangeListId, owner: UserId, members: Vec<ChangeListMember>) -> Self {
        Self {
            id,
            owner,
            state: ChangeListState::Open,
            members,
            created_at: Utc::now(),
            closed_at: None,
        }
    }

    /// Transition to a terminal state. The member set is left untouched.
    pub fn close(mut self, state: ChangeListState) -> Self {
        self.state = state;
        self.closed_at = Some(Utc::now());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_serialize_transparently() {
        let json = serde_json::to_value(VersionNumber(7)).unwrap();
        assert_eq!(json, serde_json::json!(7));
        let back: RecordId = serde_json::from_value(serde_json::json!(42)).unwrap();
        assert_eq!(back, RecordId(42));
    }

    #[test]
    fn change_list_state_terminality() {
        assert!(!ChangeListState::Open.is_terminal());
        assert!(ChangeListState::Committed.is_terminal());
        assert!(ChangeListState::Abandoned.is_terminal());
        assert_eq!(ChangeListState::Abandoned.to_string(), "abandoned");
    }

    #[test]
    fn close_keeps_members() {
        let member = ChangeListMember {
            table: "hosts".to_string(),
            record_id: RecordId(1),
            pending_version: VersionNumber(2),
            committed_version: None,
        };
        let record = ChangeListRecord::open(ChangeListId(3), UserId(4), vec![member.clone()]);
        let closed = record.close(ChangeListState::Abandoned);

        assert_eq!(closed.state, ChangeListState::Abandoned);
        assert!(closed.closed_at.is_some());
        assert_eq!(closed.members, vec![member]);
    }
}
