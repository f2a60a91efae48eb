//! Opening request contexts from connection specs.

use std::collections::BTreeMap;
use std::sync::Arc;

use schemaman_core::*;
use serde_json::json;

fn server(id: u32, engine: &str, url: Option<&str>) -> ServerSpec {
    ServerSpec {
        id,
        engine: engine.to_string(),
        host: None,
        port: None,
        url: url.map(str::to_string),
        namespace: None,
    }
}

fn spec(servers: Vec<ServerSpec>) -> ConnectionSpec {
    ConnectionSpec {
        alias: "opsdb".to_string(),
        name: "Operations".to_string(),
        owner_user: None,
        owner_group: None,
        datasource: DatasourceSpec {
            database: "opsdb".to_string(),
            user: None,
            password_path: None,
            master_server_id: 1,
            servers,
        },
        users: BTreeMap::from([("alice".to_string(), 1), ("bob".to_string(), 2)]),
    }
}

async fn open(
    spec: &ConnectionSpec,
    registry: &DriverRegistry,
    username: &str,
    server_id: Option<u32>,
) -> Result<RequestContext> {
    RequestContext::open(
        spec,
        registry,
        Arc::new(StaticIdentityResolver::from_spec(spec)),
        username,
        server_id,
        RunOptions::default(),
    )
    .await
}

#[tokio::test]
async fn contexts_on_the_same_server_share_data() {
    let spec = spec(vec![server(1, "memory", None), server(2, "memory", None)]);
    let registry = DriverRegistry::with_builtin();

    let alice = open(&spec, &registry, "alice", None).await.unwrap();
    assert_eq!(alice.user_id(), UserId(1));
    assert_eq!(alice.server().id, 1);
    alice
        .versions()
        .set(
            "hosts",
            Some(RecordId(1)),
            json!({"name": "web-1"}).as_object().cloned().unwrap(),
            SetOptions::commit(),
        )
        .await
        .unwrap();

    let bob = open(&spec, &registry, "bob", Some(1)).await.unwrap();
    assert!(bob
        .versions()
        .get("hosts", RecordId(1), GetOptions::default())
        .await
        .unwrap()
        .is_some());

    let elsewhere = open(&spec, &registry, "bob", Some(2)).await.unwrap();
    assert!(elsewhere
        .versions()
        .get("hosts", RecordId(1), GetOptions::default())
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn unknown_user_fails_identity() {
    let spec = spec(vec![server(1, "memory", None)]);
    let err = open(&spec, &DriverRegistry::with_builtin(), "mallory", None)
        .await
        .unwrap_err();
    assert!(matches!(err, VcmError::Identity(_)));
}

#[tokio::test]
async fn unknown_server_or_engine_fails_configuration() {
    let registry = DriverRegistry::with_builtin();

    let spec_a = spec(vec![server(1, "memory", None)]);
    let err = open(&spec_a, &registry, "alice", Some(7)).await.unwrap_err();
    assert!(matches!(err, VcmError::Configuration(_)));

    let spec_b = spec(vec![server(1, "oracle", None)]);
    let err = open(&spec_b, &registry, "alice", None).await.unwrap_err();
    assert!(matches!(err, VcmError::Configuration(_)), "got {err:?}");
}

#[tokio::test]
async fn surreal_engine_runs_full_workflow() {
    let spec = spec(vec![server(1, "surrealdb", Some("mem://"))]);
    let registry = DriverRegistry::with_builtin();
    let alice = open(&spec, &registry, "alice", None).await.unwrap();
    alice.test_connection().await.unwrap();
    assert_eq!(alice.driver().engine(), "surrealdb");

    let id = alice
        .versions()
        .set(
            "hosts",
            None,
            json!({"name": "web-1"}).as_object().cloned().unwrap(),
            SetOptions::default(),
        )
        .await
        .unwrap()
        .unwrap();
    let cl = alice
        .change_lists()
        .create_change_list_from_working_set()
        .await
        .unwrap();
    let summary = alice.change_lists().commit(cl).await.unwrap();
    assert_eq!(summary.versions.len(), 1);

    let head = alice
        .versions()
        .get_resolved("hosts", id, GetOptions::head())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(head.source.version(), Some(summary.versions[0].version));

    let history = alice
        .versions()
        .record_versions_available("hosts", id, alice.user_id())
        .collect()
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].change_list_id, Some(cl));
}

#[tokio::test]
async fn resolve_user_uses_the_context_resolver() {
    let spec = spec(vec![server(1, "memory", None)]);
    let ctx = open(&spec, &DriverRegistry::with_builtin(), "alice", None)
        .await
        .unwrap();
    assert_eq!(ctx.resolve_user("bob").await.unwrap(), UserId(2));
    assert_eq!(ctx.username(), "alice");
}
