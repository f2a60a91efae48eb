//! SurrealDB-backed StorageDriver implementation
//!
//! Every `RowKey` maps to a deterministic array record id in `vcm_rows`, so
//! gets, puts and deletes address one record directly. Batches run as a
//! single `BEGIN TRANSACTION … COMMIT TRANSACTION` query; failed guards
//! `THROW`, which aborts the whole transaction.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use surrealdb::engine::any::Any;
use surrealdb::opt::auth::{Database, Root};
use surrealdb::Surreal;
use tracing::{debug, info, instrument};

use crate::error::StorageError;
use crate::migrations::{self, ROWS_TABLE, SEQUENCES_TABLE};
use crate::storage_traits::{
    KeyFilter, Operation, Qualifier, Row, RowKey, StorageDriver, StorageResult, Surface,
};

/// Prefix of the error text thrown by a failed batch guard.
const CONFLICT_MARKER: &str = "schemaman-conflict:";

/// Connection settings for a SurrealDB server.
#[derive(Debug, Clone)]
pub struct SurrealConfig {
    /// Endpoint URL (`mem://`, `surrealkv://path`, `ws://host:port`, `wss://…`)
    pub endpoint: String,
    /// Namespace (default: "schemaman")
    pub namespace: String,
    /// Database name (default: "main")
    pub database: String,
    /// Optional credentials; no sign-in when absent
    pub username: Option<String>,
    pub password: Option<String>,
    /// Whether the credentials belong to a root user (true) or database user (false)
    pub is_root: bool,
}

impl SurrealConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            namespace: "schemaman".to_string(),
            database: "main".to_string(),
            username: None,
            password: None,
            is_root: false,
        }
    }

    /// Set custom namespace
    pub fn with_namespace(mut self, ns: impl Into<String>) -> Self {
        self.namespace = ns.into();
        self
    }

    /// Set custom database
    pub fn with_database(mut self, db: impl Into<String>) -> Self {
        self.database = db.into();
        self
    }

    /// Sign in with these credentials after connecting
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
        is_root: bool,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self.is_root = is_root;
        self
    }
}

/// Row as stored in `vcm_rows`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct DbRow {
    surface: String,
    tbl: String,
    record_id: u64,
    qualifier_kind: String,
    qualifier_value: u64,
    body: String,
}

impl DbRow {
    fn from_key(key: &RowKey, value: &Value) -> StorageResult<Self> {
        let (qualifier_kind, qualifier_value) = key.qualifier.to_parts();
        Ok(Self {
            surface: key.surface.as_str().to_string(),
            tbl: key.table.clone(),
            record_id: key.record_id.0,
            qualifier_kind: qualifier_kind.to_string(),
            qualifier_value,
            body: serde_json::to_string(value)?,
        })
    }

    fn into_row(self) -> StorageResult<Row> {
        let surface = Surface::parse(&self.surface)
            .ok_or_else(|| StorageError::Backend(format!("unknown surface: {}", self.surface)))?;
        let qualifier = Qualifier::from_parts(&self.qualifier_kind, self.qualifier_value)
            .ok_or_else(|| {
                StorageError::Backend(format!("unknown qualifier: {}", self.qualifier_kind))
            })?;
        let key = RowKey::new(surface, self.tbl, self.record_id.into(), qualifier);
        let value = serde_json::from_str(&self.body)?;
        Ok(Row { key, value })
    }
}

/// Array record id for a key.
fn record_key(key: &RowKey) -> Value {
    let (kind, value) = key.qualifier.to_parts();
    json!([key.surface.as_str(), key.table, key.record_id.0, kind, value])
}

/// SurrealDB-backed implementation of [`StorageDriver`].
#[derive(Clone)]
pub struct SurrealDriver {
    db: Surreal<Any>,
}

impl SurrealDriver {
    /// Create an in-memory instance for testing.
    pub async fn in_memory() -> StorageResult<Self> {
        Self::connect(&SurrealConfig::new("mem://")).await
    }

    /// Connect, sign in when credentials are configured, select the
    /// namespace/database and run `init_schema`.
    #[instrument(skip(config), fields(endpoint = %config.endpoint, namespace = %config.namespace, database = %config.database))]
    pub async fn connect(config: &SurrealConfig) -> StorageResult<Self> {
        let db = surrealdb::engine::any::connect(config.endpoint.as_str())
            .await
            .map_err(|e| {
                StorageError::Connection(format!("Failed to connect to {}: {}", config.endpoint, e))
            })?;

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            if config.is_root {
                db.signin(Root { username, password })
                    .await
                    .map_err(|e| StorageError::Connection(format!("Root auth failed: {e}")))?;
            } else {
                db.signin(Database {
                    namespace: &config.namespace,
                    database: &config.database,
                    username,
                    password,
                })
                .await
                .map_err(|e| StorageError::Connection(format!("DB auth failed: {e}")))?;
            }
        }

        db.use_ns(&config.namespace)
            .use_db(&config.database)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        migrations::init_schema(&db).await?;

        info!("SurrealDriver connected ({})", config.endpoint);
        Ok(Self { db })
    }

    /// Render one batch operation as a statement, binding its parameters.
    fn batch_statement(
        index: usize,
        op: &Operation,
        binds: &mut Vec<(String, Value)>,
    ) -> StorageResult<String> {
        let k = format!("k{index}");
        binds.push((k.clone(), record_key(op.key())));

        let statement = match op {
            Operation::Put { key, value } => {
                let c = format!("c{index}");
                binds.push((c.clone(), serde_json::to_value(DbRow::from_key(key, value)?)?));
                format!("UPSERT type::thing('{ROWS_TABLE}', ${k}) CONTENT ${c};")
            }
            Operation::Delete { .. } => {
                format!("DELETE type::thing('{ROWS_TABLE}', ${k});")
            }
            Operation::Expect { key, value } => {
                let m = format!("m{index}");
                binds.push((m.clone(), Value::String(format!("{CONFLICT_MARKER}{key}"))));
                let current =
                    format!("(SELECT VALUE body FROM type::thing('{ROWS_TABLE}', ${k}))[0]");
                match value {
                    Some(expected) => {
                        let e = format!("e{index}");
                        binds.push((e.clone(), Value::String(serde_json::to_string(expected)?)));
                        format!("IF {current} != ${e} {{ THROW ${m} }};")
                    }
                    None => format!("IF {current} != NONE {{ THROW ${m} }};"),
                }
            }
        };
        Ok(statement)
    }
}

#[async_trait]
impl StorageDriver for SurrealDriver {
    fn engine(&self) -> &str {
        "surrealdb"
    }

    async fn test_connection(&self) -> StorageResult<()> {
        self.db
            .query(format!("SELECT * FROM {ROWS_TABLE} LIMIT 1"))
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?
            .check()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(())
    }

    async fn raw_get(&self, key: &RowKey) -> StorageResult<Option<Value>> {
        let mut res = self
            .db
            .query(format!(
                "SELECT VALUE body FROM type::thing('{ROWS_TABLE}', $id)"
            ))
            .bind(("id", record_key(key)))
            .await?;
        let bodies: Vec<String> = res.take(0)?;

        bodies
            .into_iter()
            .next()
            .map(|body| serde_json::from_str(&body).map_err(StorageError::from))
            .transpose()
    }

    async fn raw_set(&self, key: &RowKey, value: Value) -> StorageResult<()> {
        debug!(%key, "raw_set");
        let row = DbRow::from_key(key, &value)?;
        self.db
            .query(format!(
                "UPSERT type::thing('{ROWS_TABLE}', $id) CONTENT $row"
            ))
            .bind(("id", record_key(key)))
            .bind(("row", row))
            .await?
            .check()?;
        Ok(())
    }

    async fn raw_delete(&self, key: &RowKey) -> StorageResult<()> {
        debug!(%key, "raw_delete");
        self.db
            .query(format!("DELETE type::thing('{ROWS_TABLE}', $id)"))
            .bind(("id", record_key(key)))
            .await?
            .check()?;
        Ok(())
    }

    async fn raw_filter(&self, filter: &KeyFilter) -> StorageResult<Vec<Row>> {
        let mut sql = format!(
            "SELECT surface, tbl, record_id, qualifier_kind, qualifier_value, body \
             FROM {ROWS_TABLE} WHERE surface = $surface"
        );
        if filter.table.is_some() {
            sql.push_str(" AND tbl = $tbl");
        }
        if filter.record_id.is_some() {
            sql.push_str(" AND record_id = $record_id");
        }
        if filter.qualifier.is_some() {
            sql.push_str(" AND qualifier_kind = $qualifier_kind AND qualifier_value = $qualifier_value");
        }

        let (qualifier_kind, qualifier_value) =
            filter.qualifier.unwrap_or(Qualifier::None).to_parts();
        let mut res = self
            .db
            .query(sql)
            .bind(("surface", filter.surface.as_str().to_string()))
            .bind(("tbl", filter.table.clone().unwrap_or_default()))
            .bind(("record_id", filter.record_id.map(|r| r.0).unwrap_or_default()))
            .bind(("qualifier_kind", qualifier_kind.to_string()))
            .bind(("qualifier_value", qualifier_value))
            .await?;

        let rows: Vec<DbRow> = res.take(0)?;
        let mut rows = rows
            .into_iter()
            .map(DbRow::into_row)
            .collect::<StorageResult<Vec<_>>>()?;
        rows.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(rows)
    }

    async fn next_sequence(&self, name: &str) -> StorageResult<u64> {
        let mut res = self
            .db
            .query(format!(
                "UPSERT type::thing('{SEQUENCES_TABLE}', $name) SET value = (value OR 0) + 1 RETURN VALUE value"
            ))
            .bind(("name", name.to_string()))
            .await?;
        let values: Vec<u64> = res.take(0)?;

        values
            .into_iter()
            .next()
            .ok_or_else(|| StorageError::Backend(format!("sequence {name} returned no value")))
    }

    async fn apply_batch(&self, ops: Vec<Operation>) -> StorageResult<()> {
        if ops.is_empty() {
            return Ok(());
        }

        let mut binds = Vec::new();
        let mut sql = String::from("BEGIN TRANSACTION;\n");
        for (index, op) in ops.iter().enumerate() {
            sql.push_str(&Self::batch_statement(index, op, &mut binds)?);
            sql.push('\n');
        }
        sql.push_str("COMMIT TRANSACTION;");

        debug!(ops = ops.len(), "applying batch");

        let mut query = self.db.query(sql);
        for bind in binds {
            query = query.bind(bind);
        }
        let mut res = query.await?;

        let errors = res.take_errors();
        if errors.is_empty() {
            return Ok(());
        }

        let messages: Vec<String> = errors.values().map(|e| e.to_string()).collect();
        if let Some(message) = messages.iter().find(|m| m.contains(CONFLICT_MARKER)) {
            let key = message
                .split(CONFLICT_MARKER)
                .nth(1)
                .unwrap_or_default()
                .trim_matches(|c: char| c == '\'' || c == '"' || c.is_whitespace())
                .to_string();
            return Err(StorageError::Conflict {
                key,
                reason: "row changed since it was read".to_string(),
            });
        }
        Err(StorageError::Backend(messages.join("; ")))
    }
}
