//! Working drafts, direct commits and unversioned writes.

use std::sync::Arc;

use schemaman_core::*;
use schemaman_state::fakes::MemoryDriver;
use schemaman_state::{KeyFilter, Qualifier, RowKey, StorageDriver, Surface};
use serde_json::{json, Value};

fn record(value: Value) -> Record {
    value.as_object().cloned().expect("test records are objects")
}

fn setup() -> (Arc<MemoryDriver>, RequestContext, RequestContext) {
    let driver = Arc::new(MemoryDriver::new());
    let alice = RequestContext::from_driver(driver.clone(), "alice", UserId(1));
    let bob = RequestContext::from_driver(driver.clone(), "bob", UserId(2));
    (driver, alice, bob)
}

#[tokio::test]
async fn insert_allocates_id_and_stays_private_until_committed() {
    let (driver, alice, bob) = setup();

    let id = alice
        .versions()
        .set("hosts", None, record(json!({"name": "web-1"})), SetOptions::default())
        .await
        .unwrap()
        .expect("insert returns the new id");

    let own = alice.versions().get("hosts", id, GetOptions::default()).await.unwrap();
    assert_eq!(own, Some(record(json!({"name": "web-1"}))));
    assert_eq!(bob.versions().get("hosts", id, GetOptions::default()).await.unwrap(), None);
    assert_eq!(driver.count(Surface::CommitLog).unwrap(), 0);

    let version = alice.versions().commit_working_version("hosts", id).await.unwrap();

    let published = bob
        .versions()
        .get_resolved("hosts", id, GetOptions::default())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(published.data, record(json!({"name": "web-1"})));
    assert_eq!(published.source, VersionSource::Head { version: Some(version) });
    assert_eq!(driver.count(Surface::Working).unwrap(), 0);
}

#[tokio::test]
async fn second_insert_gets_a_new_id() {
    let (_driver, alice, _bob) = setup();
    let store = alice.versions();
    let a = store.set("hosts", None, Record::new(), SetOptions::default()).await.unwrap();
    let b = store.set("hosts", None, Record::new(), SetOptions::default()).await.unwrap();
    assert_ne!(a, b);

    let update = store
        .set("hosts", a, record(json!({"x": 1})), SetOptions::default())
        .await
        .unwrap();
    assert_eq!(update, None);
}

#[tokio::test]
async fn commit_versions_strictly_increase() {
    let (driver, alice, _bob) = setup();
    let store = alice.versions();
    let id = RecordId(10);

    let mut seen = Vec::new();
    for port in [80, 81, 82] {
        store
            .set("hosts", Some(id), record(json!({ "port": port })), SetOptions::commit())
            .await
            .unwrap();
        let head: HeadRow = serde_json::from_value(
            driver.raw_get(&RowKey::head("hosts", id)).await.unwrap().unwrap(),
        )
        .unwrap();
        seen.push(head.version.unwrap());
    }

    assert!(seen.windows(2).all(|w| w[0] < w[1]), "versions {seen:?}");
    assert_eq!(driver.count(Surface::CommitLog).unwrap(), 3);
}

#[tokio::test]
async fn head_matches_latest_commit() {
    let (driver, alice, _bob) = setup();
    let store = alice.versions();
    let id = RecordId(1);
    store
        .set("hosts", Some(id), record(json!({"v": 1})), SetOptions::commit())
        .await
        .unwrap();
    store
        .set("hosts", Some(id), record(json!({"v": 2})), SetOptions::commit())
        .await
        .unwrap();

    let commits = driver
        .raw_filter(&KeyFilter::surface(Surface::CommitLog).table("hosts").record(id))
        .await
        .unwrap();
    let latest: CommitVersion = commits.last().unwrap().decode().unwrap();
    let head = store.get("hosts", id, GetOptions::head()).await.unwrap();
    assert_eq!(head, latest.data);
}

#[tokio::test]
async fn unversioned_write_goes_straight_to_head() {
    let (driver, alice, bob) = setup();
    let id = alice
        .versions()
        .set("settings", None, record(json!({"motd": "hi"})), SetOptions::unversioned())
        .await
        .unwrap()
        .unwrap();

    let seen = bob
        .versions()
        .get_resolved("settings", id, GetOptions::default())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(seen.source, VersionSource::Head { version: None });
    assert_eq!(driver.count(Surface::CommitLog).unwrap(), 0);
    assert_eq!(driver.count(Surface::Working).unwrap(), 0);
}

#[tokio::test]
async fn abandon_working_version_is_idempotent() {
    let (_driver, alice, _bob) = setup();
    let store = alice.versions();
    store
        .set("hosts", Some(RecordId(1)), record(json!({"draft": true})), SetOptions::default())
        .await
        .unwrap();

    assert!(store.abandon_working_version("hosts", RecordId(1)).await.unwrap());
    assert!(!store.abandon_working_version("hosts", RecordId(1)).await.unwrap());
    assert_eq!(store.get("hosts", RecordId(1), GetOptions::default()).await.unwrap(), None);
}

#[tokio::test]
async fn commit_without_draft_is_not_found() {
    let (driver, alice, _bob) = setup();
    let err = alice
        .versions()
        .commit_working_version("hosts", RecordId(1))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(driver.count(Surface::CommitLog).unwrap(), 0);
}

#[tokio::test]
async fn failed_commit_keeps_draft_and_records_nothing() {
    let (driver, alice, _bob) = setup();
    let store = alice.versions();
    store
        .set("hosts", Some(RecordId(1)), record(json!({"v": 1})), SetOptions::default())
        .await
        .unwrap();

    driver.fail_next_batch_at(3).unwrap();
    let err = store.commit_working_version("hosts", RecordId(1)).await.unwrap_err();
    assert!(matches!(err, VcmError::ConflictOnCommit(_)), "got {err:?}");

    assert_eq!(driver.count(Surface::CommitLog).unwrap(), 0);
    assert_eq!(driver.count(Surface::Head).unwrap(), 0);
    assert_eq!(driver.count(Surface::Working).unwrap(), 1);

    store.commit_working_version("hosts", RecordId(1)).await.unwrap();
    assert_eq!(driver.count(Surface::CommitLog).unwrap(), 1);
}

#[tokio::test]
async fn deletion_draft_hides_record_from_owner_only() {
    let (driver, alice, bob) = setup();
    let id = RecordId(3);
    alice
        .versions()
        .set("hosts", Some(id), record(json!({"name": "db"})), SetOptions::commit())
        .await
        .unwrap();

    alice.versions().delete("hosts", id, DeleteOptions::default()).await.unwrap();

    assert_eq!(alice.versions().get("hosts", id, GetOptions::default()).await.unwrap(), None);
    assert!(bob.versions().get("hosts", id, GetOptions::default()).await.unwrap().is_some());

    alice.versions().commit_working_version("hosts", id).await.unwrap();
    assert_eq!(bob.versions().get("hosts", id, GetOptions::default()).await.unwrap(), None);
    assert_eq!(driver.count(Surface::Head).unwrap(), 0);

    let commits = driver
        .raw_filter(&KeyFilter::surface(Surface::CommitLog).record(id))
        .await
        .unwrap();
    let tombstone: CommitVersion = commits.last().unwrap().decode().unwrap();
    assert_eq!(tombstone.data, None);
}

#[tokio::test]
async fn delete_of_unknown_record_is_not_found() {
    let (_driver, alice, _bob) = setup();
    let store = alice.versions();
    let err = store
        .delete("hosts", RecordId(99), DeleteOptions::default())
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    let err = store
        .delete("hosts", RecordId(99), DeleteOptions::unversioned())
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn delete_filter_removes_matching_records_in_one_commit() {
    let (driver, alice, bob) = setup();
    let store = alice.versions();
    for (id, role) in [(1, "web"), (2, "db"), (3, "web")] {
        store
            .set("hosts", Some(RecordId(id)), record(json!({ "role": role })), SetOptions::commit())
            .await
            .unwrap();
    }
    let batches_before = driver.batches_applied().unwrap();

    let deleted = store
        .delete_filter("hosts", &Predicate::eq("role", "web"), DeleteOptions::commit())
        .await
        .unwrap();
    assert_eq!(deleted, 2);
    assert_eq!(driver.batches_applied().unwrap(), batches_before + 1);

    let remaining = bob
        .versions()
        .filter("hosts", &Predicate::all(), GetOptions::default())
        .await
        .unwrap();
    let ids: Vec<_> = remaining.iter().map(|r| r.record_id).collect();
    assert_eq!(ids, vec![RecordId(2)]);
}

#[tokio::test]
async fn delete_filter_with_no_match_is_zero() {
    let (_driver, alice, _bob) = setup();
    let deleted = alice
        .versions()
        .delete_filter("hosts", &Predicate::eq("role", "none"), DeleteOptions::default())
        .await
        .unwrap();
    assert_eq!(deleted, 0);
}

#[tokio::test]
async fn drafts_are_keyed_per_user() {
    let (driver, alice, bob) = setup();
    let id = RecordId(5);
    alice
        .versions()
        .set("hosts", Some(id), record(json!({"by": "alice"})), SetOptions::default())
        .await
        .unwrap();
    bob.versions()
        .set("hosts", Some(id), record(json!({"by": "bob"})), SetOptions::default())
        .await
        .unwrap();

    let drafts = driver
        .raw_filter(&KeyFilter::surface(Surface::Working).record(id))
        .await
        .unwrap();
    let owners: Vec<_> = drafts.iter().map(|r| r.key.qualifier).collect();
    assert_eq!(
        owners,
        vec![Qualifier::User(UserId(1)), Qualifier::User(UserId(2))]
    );
}

#[tokio::test]
async fn repeated_sets_keep_only_latest_draft() {
    let (driver, alice, _bob) = setup();
    let store = alice.versions();
    for rev in 1..=3 {
        store
            .set("hosts", Some(RecordId(1)), record(json!({ "rev": rev })), SetOptions::default())
            .await
            .unwrap();
    }
    assert_eq!(driver.count(Surface::Working).unwrap(), 1);
    assert_eq!(
        store.get("hosts", RecordId(1), GetOptions::default()).await.unwrap(),
        Some(record(json!({"rev": 3})))
    );
}

#[tokio::test]
async fn committed_version_reads_back_exactly() {
    let (_driver, alice, _bob) = setup();
    let data = record(json!({"name": "web-1", "tags": ["a", "b"], "weight": 0.25, "spare": null}));
    let store = alice.versions();
    let id = store
        .set("hosts", None, data.clone(), SetOptions::default())
        .await
        .unwrap()
        .unwrap();
    let version = store.commit_working_version("hosts", id).await.unwrap();

    let read = store
        .get("hosts", id, GetOptions::version(version))
        .await
        .unwrap();
    assert_eq!(read, Some(data));
}

#[tokio::test]
async fn insert_skips_ids_loaded_without_versioning() {
    let (_driver, alice, _bob) = setup();
    let store = alice.versions();
    store
        .set("hosts", Some(RecordId(1)), record(json!({"name": "existing"})), SetOptions::unversioned())
        .await
        .unwrap();

    let id = store
        .set("hosts", None, record(json!({"name": "new"})), SetOptions::commit())
        .await
        .unwrap()
        .expect("insert returns the new id");
    assert_ne!(id, RecordId(1));

    assert_eq!(
        store.get("hosts", RecordId(1), GetOptions::head()).await.unwrap(),
        Some(record(json!({"name": "existing"})))
    );
    assert_eq!(
        store.get("hosts", id, GetOptions::head()).await.unwrap(),
        Some(record(json!({"name": "new"})))
    );
}

#[tokio::test]
async fn insert_skips_ids_held_by_another_users_draft() {
    let (_driver, alice, bob) = setup();
    for n in 1..=2 {
        alice
            .versions()
            .set("hosts", Some(RecordId(n)), record(json!({"owner": "alice"})), SetOptions::default())
            .await
            .unwrap();
    }

    let id = bob
        .versions()
        .set("hosts", None, record(json!({"owner": "bob"})), SetOptions::default())
        .await
        .unwrap()
        .expect("insert returns the new id");
    assert_eq!(id, RecordId(3));

    for n in 1..=2 {
        assert_eq!(
            alice.versions().get("hosts", RecordId(n), GetOptions::default()).await.unwrap(),
            Some(record(json!({"owner": "alice"})))
        );
    }
}
