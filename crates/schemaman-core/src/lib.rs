//! SchemaMan Core Library
//!
//! Three-tier version control for table records: per-user working
//! drafts, reviewable change lists, and an immutable commit log whose
//! latest entry is mirrored into the head row every reader sees.
//!
//! Everything runs through a [`RequestContext`], which binds a resolved
//! user to one server's storage driver.

pub mod change_list;
mod commit_log;
pub mod config;
pub mod context;
pub mod error;
pub mod history;
pub mod identity;
pub mod obs;
pub mod predicate;
pub mod registry;
pub mod resolve;
pub mod telemetry;
pub mod version_store;

pub use change_list::{ChangeListManager, CommitSummary, CommittedVersion};
pub use config::{ConnectionSpec, DatasourceSpec, RunOptions, ServerSpec};
pub use context::RequestContext;
pub use error::{Result, VcmError};
pub use history::{RecordVersions, VersionEntry, VersionState};
pub use identity::{IdentityResolver, StaticIdentityResolver};
pub use predicate::Predicate;
pub use registry::{DriverFactory, DriverRegistry, MemoryDriverFactory, SurrealDriverFactory};
pub use resolve::{ResolvedRecord, VersionSource};
pub use telemetry::{init_tracing, level_for};
pub use version_store::{DeleteOptions, GetOptions, SetOptions, VersionStore};

pub use schemaman_state::{
    ChangeListEntry, ChangeListId, ChangeListMember, ChangeListRecord, ChangeListState,
    CommitVersion, HeadRow, Record, RecordId, UserId, VersionNumber, WorkingVersion,
};
