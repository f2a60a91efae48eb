//! SchemaMan-State: storage layer for record version management
//!
//! This crate owns everything the version-management engine persists and
//! the capability interface backing engines implement.
//!
//! ## Layer 0 - Data/Persistence
//!
//! Focus: tagged storage keys, atomic batches, and transaction scoping.
//!
//! ## Key Components
//!
//! - `StorageDriver`: raw get/set/delete/filter over the record surfaces
//! - `Transaction`: buffered all-or-nothing unit of work
//! - `MemoryDriver`: in-process driver ("memory" engine)
//! - `SurrealDriver`: SurrealDB driver ("surrealdb" engine)

mod error;
pub mod fakes;
pub mod migrations;
mod schema;
pub mod storage_traits;
pub mod surreal_driver;
mod transaction;

pub use error::StorageError;
pub use schema::{
    ChangeListEntry, ChangeListId, ChangeListMember, ChangeListRecord, ChangeListState,
    CommitVersion, HeadRow, LatestCommit, Record, RecordId, UserId, VersionNumber, WorkingVersion,
};
pub use storage_traits::{
    encode, KeyFilter, Operation, Qualifier, Row, RowKey, StorageDriver, StorageResult, Surface,
    REGISTRY_TABLE,
};
pub use surreal_driver::{SurrealConfig, SurrealDriver};
pub use transaction::Transaction;
