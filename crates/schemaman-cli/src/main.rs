//! SchemaMan CLI
//!
//! The `schemaman` command reads and writes version-managed records of a
//! data set described by a connection spec.
//!
//! ## Commands
//!
//! - `put` / `get` / `filter` / `delete`: record access
//! - `versions`: list every version of a record
//! - `commit` / `abandon`: settle a working draft directly
//! - `changelist`: bundle drafts for review, then commit or abandon them

use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use schemaman_core::{
    ChangeListId, ChangeListState, ConnectionSpec, DeleteOptions, DriverRegistry, GetOptions,
    Predicate, Record, RecordId, RequestContext, RunOptions, SetOptions, StaticIdentityResolver,
    VersionNumber,
};
use serde::Serialize;
use tracing::{info, Instrument};

#[derive(Parser)]
#[command(name = "schemaman")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Record version control across database engines", long_about = None)]
struct Cli {
    /// Connection spec (TOML)
    #[arg(short, long, env = "SCHEMAMAN_SPEC", global = true, default_value = "schemaman.toml")]
    spec: PathBuf,

    /// User to act as
    #[arg(short, long, env = "SCHEMAMAN_USER", global = true, default_value = "admin")]
    user: String,

    /// Server id to bind (default: the spec's master server)
    #[arg(long, global = true)]
    server: Option<u32>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Answer yes to confirmation prompts
    #[arg(short = 'y', long, global = true)]
    yes: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the bound server and user, and test the connection
    Info,

    /// Write a record (a working draft unless --commit or --unversioned)
    Put {
        table: String,

        /// Record payload as a JSON object
        data: String,

        /// Record id to update (omit to insert)
        #[arg(long)]
        id: Option<u64>,

        /// Commit the write immediately
        #[arg(long, conflicts_with = "unversioned")]
        commit: bool,

        /// Write the head row directly, without history
        #[arg(long)]
        unversioned: bool,

        /// Rewrite this pending change-list version instead of drafting
        #[arg(long, requires = "id", conflicts_with_all = ["commit", "unversioned"])]
        at_version: Option<u64>,
    },

    /// Read one record
    Get {
        table: String,
        id: u64,

        /// Read exactly this version
        #[arg(long, conflicts_with = "head")]
        at_version: Option<u64>,

        /// Ignore your own working draft
        #[arg(long)]
        head: bool,
    },

    /// Read every record matching a field-equality predicate
    Filter {
        table: String,

        /// Predicate as a JSON object of field values (default: match all)
        #[arg(long = "where")]
        predicate: Option<String>,

        #[arg(long, conflicts_with = "head")]
        at_version: Option<u64>,

        #[arg(long)]
        head: bool,
    },

    /// Delete one record, or every record matching --where
    Delete {
        table: String,

        #[arg(required_unless_present = "predicate", conflicts_with = "predicate")]
        id: Option<u64>,

        #[arg(long = "where")]
        predicate: Option<String>,

        #[arg(long, conflicts_with = "unversioned")]
        commit: bool,

        #[arg(long)]
        unversioned: bool,
    },

    /// List every version of a record
    Versions {
        table: String,
        id: u64,

        /// Whose working draft to include (default: you)
        #[arg(long)]
        for_user: Option<String>,
    },

    /// Commit your working draft of a record
    Commit { table: String, id: u64 },

    /// Discard your working draft of a record
    Abandon { table: String, id: u64 },

    /// Change-list operations
    Changelist {
        #[command(subcommand)]
        action: ChangeListAction,
    },
}

#[derive(Subcommand)]
enum ChangeListAction {
    /// Stage your draft of one record in a new change list
    Create { table: String, id: u64 },

    /// Stage your whole working set in a new change list
    CreateAll,

    /// Commit an open change list
    Commit { id: u64 },

    /// Abandon an open change list
    Abandon { id: u64 },

    /// Show one change list
    Show { id: u64 },

    /// List change lists
    List {
        #[arg(long, value_enum)]
        state: Option<StateArg>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum StateArg {
    Open,
    Committed,
    Abandoned,
}

impl From<StateArg> for ChangeListState {
    fn from(arg: StateArg) -> Self {
        match arg {
            StateArg::Open => ChangeListState::Open,
            StateArg::Committed => ChangeListState::Committed,
            StateArg::Abandoned => ChangeListState::Abandoned,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let options = RunOptions {
        verbose: cli.verbose,
        always_yes: cli.yes,
    };
    schemaman_core::init_tracing(cli.json, schemaman_core::level_for(options));

    let spec = ConnectionSpec::load(&cli.spec)
        .with_context(|| format!("Failed to load connection spec {}", cli.spec.display()))?;
    let registry = DriverRegistry::with_builtin();
    let identity = Arc::new(StaticIdentityResolver::from_spec(&spec));

    let ctx = RequestContext::open(&spec, &registry, identity, &cli.user, cli.server, options)
        .await
        .with_context(|| format!("Failed to open {} as {}", spec.alias, cli.user))?;

    let span = ctx.span();
    run(&ctx, &spec, cli.command).instrument(span).await
}

async fn run(ctx: &RequestContext, spec: &ConnectionSpec, command: Commands) -> Result<()> {
    match command {
        Commands::Info => cmd_info(ctx, spec).await,
        Commands::Put {
            table,
            data,
            id,
            commit,
            unversioned,
            at_version,
        } => {
            let options = SetOptions {
                commit_version: commit,
                version_management: !unversioned,
                version_number: at_version.map(VersionNumber),
            };
            cmd_put(ctx, &table, &data, id, options).await
        }
        Commands::Get {
            table,
            id,
            at_version,
            head,
        } => cmd_get(ctx, &table, id, read_options(at_version, head)).await,
        Commands::Filter {
            table,
            predicate,
            at_version,
            head,
        } => cmd_filter(ctx, &table, predicate.as_deref(), read_options(at_version, head)).await,
        Commands::Delete {
            table,
            id,
            predicate,
            commit,
            unversioned,
        } => {
            let options = DeleteOptions {
                commit_version: commit,
                version_management: !unversioned,
            };
            cmd_delete(ctx, &table, id, predicate.as_deref(), options).await
        }
        Commands::Versions {
            table,
            id,
            for_user,
        } => cmd_versions(ctx, &table, id, for_user.as_deref()).await,
        Commands::Commit { table, id } => {
            let version = ctx
                .versions()
                .commit_working_version(&table, RecordId(id))
                .await
                .with_context(|| format!("Failed to commit {table}/{id}"))?;
            print_json(&serde_json::json!({ "table": table, "id": id, "version": version }))
        }
        Commands::Abandon { table, id } => {
            let removed = ctx
                .versions()
                .abandon_working_version(&table, RecordId(id))
                .await?;
            print_json(&serde_json::json!({ "table": table, "id": id, "abandoned": removed }))
        }
        Commands::Changelist { action } => cmd_changelist(ctx, action).await,
    }
}

fn read_options(at_version: Option<u64>, head: bool) -> GetOptions {
    GetOptions {
        version_number: at_version.map(VersionNumber),
        use_working_version: !head,
    }
}

fn parse_record(text: &str) -> Result<Record> {
    serde_json::from_str(text).context("Record data must be a JSON object")
}

fn parse_predicate(text: Option<&str>) -> Result<Predicate> {
    match text {
        Some(text) => Ok(Predicate::from_record(
            serde_json::from_str(text).context("Predicate must be a JSON object")?,
        )),
        None => Ok(Predicate::all()),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Ask for confirmation on stdin unless `--yes` was given.
fn confirm(ctx: &RequestContext, prompt: &str) -> Result<bool> {
    if ctx.options().always_yes {
        return Ok(true);
    }
    eprint!("{prompt} [y/N] ");
    std::io::stderr().flush()?;
    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}

async fn cmd_info(ctx: &RequestContext, spec: &ConnectionSpec) -> Result<()> {
    ctx.test_connection()
        .await
        .context("Connection test failed")?;
    print_json(&serde_json::json!({
        "alias": spec.alias,
        "name": spec.name,
        "server": ctx.server(),
        "user": ctx.username(),
        "user_id": ctx.user_id(),
    }))
}

async fn cmd_put(
    ctx: &RequestContext,
    table: &str,
    data: &str,
    id: Option<u64>,
    options: SetOptions,
) -> Result<()> {
    let record = parse_record(data)?;
    let inserted = ctx
        .versions()
        .set(table, id.map(RecordId), record, options)
        .await
        .with_context(|| format!("Failed to write to {table}"))?;

    let id = inserted.or(id.map(RecordId));
    info!(table, id = ?id, "record written");
    print_json(&serde_json::json!({ "table": table, "id": id, "inserted": inserted.is_some() }))
}

async fn cmd_get(ctx: &RequestContext, table: &str, id: u64, options: GetOptions) -> Result<()> {
    match ctx.versions().get_resolved(table, RecordId(id), options).await? {
        Some(record) => print_json(&record),
        None => bail!("{table}/{id} does not exist"),
    }
}

async fn cmd_filter(
    ctx: &RequestContext,
    table: &str,
    predicate: Option<&str>,
    options: GetOptions,
) -> Result<()> {
    let predicate = parse_predicate(predicate)?;
    let records = ctx.versions().filter(table, &predicate, options).await?;
    print_json(&records)
}

async fn cmd_delete(
    ctx: &RequestContext,
    table: &str,
    id: Option<u64>,
    predicate: Option<&str>,
    options: DeleteOptions,
) -> Result<()> {
    let store = ctx.versions();
    if let Some(id) = id {
        store
            .delete(table, RecordId(id), options)
            .await
            .with_context(|| format!("Failed to delete {table}/{id}"))?;
        return print_json(&serde_json::json!({ "table": table, "deleted": 1 }));
    }

    let predicate = parse_predicate(predicate)?;
    if predicate.is_empty() && !confirm(ctx, &format!("Delete every record in {table}?"))? {
        bail!("aborted");
    }
    let deleted = store.delete_filter(table, &predicate, options).await?;
    print_json(&serde_json::json!({ "table": table, "deleted": deleted }))
}

async fn cmd_versions(
    ctx: &RequestContext,
    table: &str,
    id: u64,
    for_user: Option<&str>,
) -> Result<()> {
    let user = match for_user {
        Some(name) => ctx.resolve_user(name).await?,
        None => ctx.user_id(),
    };
    let versions = ctx
        .versions()
        .record_versions_available(table, RecordId(id), user)
        .collect()
        .await?;
    print_json(&versions)
}

async fn cmd_changelist(ctx: &RequestContext, action: ChangeListAction) -> Result<()> {
    let manager = ctx.change_lists();
    match action {
        ChangeListAction::Create { table, id } => {
            let cl = manager
                .create_change_list(&table, RecordId(id))
                .await
                .with_context(|| format!("No working draft of {table}/{id} to stage"))?;
            print_json(&manager.change_list(cl).await?)
        }
        ChangeListAction::CreateAll => {
            let cl = manager.create_change_list_from_working_set().await?;
            print_json(&manager.change_list(cl).await?)
        }
        ChangeListAction::Commit { id } => {
            let summary = manager
                .commit(ChangeListId(id))
                .await
                .with_context(|| format!("Failed to commit change list {id}"))?;
            print_json(&summary)
        }
        ChangeListAction::Abandon { id } => {
            if !confirm(ctx, &format!("Abandon change list {id}?"))? {
                bail!("aborted");
            }
            manager.abandon_change_list(ChangeListId(id)).await?;
            print_json(&manager.change_list(ChangeListId(id)).await?)
        }
        ChangeListAction::Show { id } => print_json(&manager.change_list(ChangeListId(id)).await?),
        ChangeListAction::List { state } => {
            print_json(&manager.list_change_lists(state.map(Into::into)).await?)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn put_parses_flags() {
        let cli = Cli::try_parse_from([
            "schemaman",
            "-u",
            "alice",
            "put",
            "hosts",
            r#"{"name": "web-1"}"#,
            "--id",
            "4",
            "--commit",
        ])
        .unwrap();
        assert_eq!(cli.user, "alice");
        match cli.command {
            Commands::Put {
                table, id, commit, ..
            } => {
                assert_eq!(table, "hosts");
                assert_eq!(id, Some(4));
                assert!(commit);
            }
            _ => panic!("expected put"),
        }
    }

    #[test]
    fn delete_needs_id_or_predicate() {
        assert!(Cli::try_parse_from(["schemaman", "delete", "hosts"]).is_err());
        assert!(Cli::try_parse_from(["schemaman", "delete", "hosts", "3"]).is_ok());
        assert!(
            Cli::try_parse_from(["schemaman", "delete", "hosts", "--where", r#"{"a": 1}"#]).is_ok()
        );
    }

    #[test]
    fn record_and_predicate_must_be_objects() {
        assert!(parse_record(r#"{"a": 1}"#).is_ok());
        assert!(parse_record("[1, 2]").is_err());
        assert!(parse_predicate(None).unwrap().is_empty());
        assert!(parse_predicate(Some("3")).is_err());
    }

    #[tokio::test]
    async fn run_against_memory_spec() {
        use schemaman_core::{DatasourceSpec, ServerSpec};
        use std::collections::BTreeMap;

        let spec = ConnectionSpec {
            alias: "cli".to_string(),
            name: "CLI".to_string(),
            owner_user: None,
            owner_group: None,
            datasource: DatasourceSpec {
                database: "cli".to_string(),
                user: None,
                password_path: None,
                master_server_id: 1,
                servers: vec![ServerSpec {
                    id: 1,
                    engine: "memory".to_string(),
                    host: None,
                    port: None,
                    url: None,
                    namespace: None,
                }],
            },
            users: BTreeMap::from([("alice".to_string(), 1)]),
        };
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cli.toml");
        spec.save(&path).unwrap();
        let spec = ConnectionSpec::load(&path).unwrap();

        let registry = DriverRegistry::with_builtin();
        let ctx = RequestContext::open(
            &spec,
            &registry,
            Arc::new(StaticIdentityResolver::from_spec(&spec)),
            "alice",
            None,
            RunOptions {
                verbose: false,
                always_yes: true,
            },
        )
        .await
        .unwrap();

        let put = Cli::try_parse_from(["schemaman", "put", "hosts", r#"{"n": 1}"#, "--id", "1"])
            .unwrap();
        run(&ctx, &spec, put.command).await.unwrap();
        let create = Cli::try_parse_from(["schemaman", "changelist", "create-all"]).unwrap();
        run(&ctx, &spec, create.command).await.unwrap();
        let commit = Cli::try_parse_from(["schemaman", "changelist", "commit", "1"]).unwrap();
        run(&ctx, &spec, commit.command).await.unwrap();

        let head = ctx
            .versions()
            .get("hosts", RecordId(1), GetOptions::head())
            .await
            .unwrap();
        assert!(head.is_some());
    }
}
