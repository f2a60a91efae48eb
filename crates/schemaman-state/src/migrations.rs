//! SurrealDB schema migrations and initialization
//!
//! All surfaces share one row table; the surface tag and key components are
//! plain columns so a single indexed scan serves every `KeyFilter`.

use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

use crate::storage_traits::StorageResult;

/// Row table name
pub const ROWS_TABLE: &str = "vcm_rows";

/// Sequence table name
pub const SEQUENCES_TABLE: &str = "vcm_sequences";

/// Initialize all SchemaMan tables in SurrealDB.
///
/// Safe to call multiple times (idempotent).
pub async fn init_schema(db: &Surreal<Any>) -> StorageResult<()> {
    info!("Initializing SchemaMan SurrealDB schema");

    init_rows_table(db).await?;
    init_sequences_table(db).await?;

    info!("SchemaMan schema initialization complete");
    Ok(())
}

/// Initialize `vcm_rows`
///
/// Schema:
/// ```text
/// TABLE vcm_rows {
///   id:               [surface, tbl, record_id, qualifier_kind, qualifier_value]
///   surface:          STRING (head | working | change_list | commit_log | latest | registry)
///   tbl:              STRING
///   record_id:        INT
///   qualifier_kind:   STRING (none | user | change_list | version)
///   qualifier_value:  INT
///   body:             STRING (JSON-encoded row value)
/// }
/// ```
///
/// The body is stored as encoded text so batch guards compare exact bytes.
async fn init_rows_table(db: &Surreal<Any>) -> StorageResult<()> {
    debug!("Initializing vcm_rows table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS vcm_rows SCHEMALESS;

        -- Per-record scans (head, commit log, pending entries)
        DEFINE INDEX IF NOT EXISTS idx_rows_record ON TABLE vcm_rows COLUMNS surface, tbl, record_id;

        -- Working-set and change-list membership scans
        DEFINE INDEX IF NOT EXISTS idx_rows_qualifier ON TABLE vcm_rows COLUMNS surface, qualifier_kind, qualifier_value;
    "#;

    db.query(sql).await?.check()?;
    info!("✓ vcm_rows table initialized");
    Ok(())
}

/// Initialize `vcm_sequences`
///
/// One row per named sequence holding the last value handed out.
async fn init_sequences_table(db: &Surreal<Any>) -> StorageResult<()> {
    debug!("Initializing vcm_sequences table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS vcm_sequences SCHEMALESS
            PERMISSIONS
                FOR select, create, update FULL
                FOR delete NONE;
    "#;

    db.query(sql).await?.check()?;
    info!("✓ vcm_sequences table initialized");
    Ok(())
}
