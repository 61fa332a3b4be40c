mod common;

use common::FakeRemote;
use landmark_core::db;
use landmark_core::reconcile::{ReconcileError, ReconcileOutcome, Reconciler};
use landmark_core::remote::LandmarkRemote;
use landmark_core::repo::landmark_repo::{LandmarkRepository, SqliteLandmarkRepository};
use landmark_core::{Landmark, OperationKind, OperationQueue, ProtectedSet};
use std::sync::Arc;
use std::time::Duration;

fn reconciler(remote: &Arc<FakeRemote>, conn: &db::SharedConnection) -> Reconciler {
    let remote: Arc<dyn LandmarkRemote> = remote.clone();
    Reconciler::new(conn.clone(), remote, Duration::from_secs(1))
}

fn insert_local(conn: &db::SharedConnection, landmark: &Landmark) {
    let guard = db::lock(conn).unwrap();
    SqliteLandmarkRepository::new(&guard).insert(landmark).unwrap();
}

#[tokio::test]
async fn reconciling_twice_with_unchanged_remote_changes_nothing() {
    let remote = FakeRemote::new();
    remote.seed("Machu Picchu", -13.1631, -72.5450, 2_000);
    remote.seed("Taj Mahal", 27.1751, 78.0421, 1_000);
    let conn = common::memory_conn();
    let reconciler = reconciler(&remote, &conn);

    let first = reconciler
        .fetch_and_merge(&ProtectedSet::default())
        .await
        .unwrap();
    let second = reconciler
        .fetch_and_merge(&ProtectedSet::default())
        .await
        .unwrap();

    let ReconcileOutcome::Replaced(after_first) = first else {
        panic!("empty cache must be replaced");
    };
    assert_eq!(second, ReconcileOutcome::Unchanged(after_first.clone()));
    assert_eq!(reconciler.cached().unwrap(), after_first);
    let titles: Vec<_> = after_first.iter().map(|l| l.title.as_str()).collect();
    assert_eq!(titles, vec!["Machu Picchu", "Taj Mahal"]);
    assert!(after_first.iter().all(|landmark| landmark.is_synced));
}

#[tokio::test]
async fn remote_changes_replace_but_keep_local_keys() {
    let remote = FakeRemote::new();
    let seeded = remote.seed("Big Ben", 51.5007, -0.1246, 1_000);
    let conn = common::memory_conn();
    let reconciler = reconciler(&remote, &conn);
    reconciler
        .fetch_and_merge(&ProtectedSet::default())
        .await
        .unwrap();
    let local_key = reconciler.cached().unwrap()[0].local_key;

    remote.remove(seeded.id.unwrap());
    remote.seed("Elizabeth Tower", 51.5007, -0.1246, 500);
    remote.seed("London Eye", 51.5033, -0.1196, 3_000);
    let outcome = reconciler
        .fetch_and_merge(&ProtectedSet::default())
        .await
        .unwrap();

    let ReconcileOutcome::Replaced(landmarks) = outcome else {
        panic!("changed remote list must replace");
    };
    let titles: Vec<_> = landmarks.iter().map(|l| l.title.as_str()).collect();
    assert_eq!(titles, vec!["London Eye", "Elizabeth Tower"]);
    assert!(landmarks.iter().all(|landmark| landmark.local_key != local_key));
}

#[tokio::test]
async fn unsynced_records_with_queue_entries_survive_replace() {
    let remote = FakeRemote::new();
    remote.seed("Server", 1.0, 1.0, 1_000);
    let conn = common::memory_conn();
    let queue = OperationQueue::new(conn.clone());
    let reconciler = reconciler(&remote, &conn);

    let offline = Landmark::new("Offline", 2.0, 2.0).unwrap();
    insert_local(&conn, &offline);
    queue
        .enqueue_snapshot(OperationKind::Create, &offline)
        .unwrap();
    let orphan = Landmark::new("Orphan", 3.0, 3.0).unwrap();
    insert_local(&conn, &orphan);

    let outcome = reconciler
        .fetch_and_merge(&queue.protected_set().unwrap())
        .await
        .unwrap();

    let landmarks = outcome.into_landmarks();
    let titles: Vec<_> = landmarks.iter().map(|l| l.title.as_str()).collect();
    assert_eq!(titles.len(), 2);
    assert!(titles.contains(&"Offline"));
    assert!(titles.contains(&"Server"));
    let kept = landmarks
        .iter()
        .find(|landmark| landmark.local_key == offline.local_key)
        .unwrap();
    assert!(!kept.is_synced);
}

#[tokio::test]
async fn local_edit_wins_over_remote_copy_while_queued() {
    let remote = FakeRemote::new();
    remote.seed("Original", 1.0, 1.0, 1_000);
    let conn = common::memory_conn();
    let queue = OperationQueue::new(conn.clone());
    let reconciler = reconciler(&remote, &conn);
    reconciler
        .fetch_and_merge(&ProtectedSet::default())
        .await
        .unwrap();

    let mut edited = reconciler.cached().unwrap().remove(0);
    edited.title = "Edited offline".to_string();
    edited.is_synced = false;
    edited.touch();
    insert_local(&conn, &edited);
    queue
        .enqueue_snapshot(OperationKind::Update, &edited)
        .unwrap();

    let outcome = reconciler
        .fetch_and_merge(&queue.protected_set().unwrap())
        .await
        .unwrap();

    assert_eq!(outcome, ReconcileOutcome::Unchanged(vec![edited]));
}

#[tokio::test]
async fn remote_failure_leaves_cache_untouched() {
    let remote = FakeRemote::new();
    remote.seed("Cached", 1.0, 1.0, 1_000);
    let conn = common::memory_conn();
    let reconciler = reconciler(&remote, &conn);
    reconciler
        .fetch_and_merge(&ProtectedSet::default())
        .await
        .unwrap();
    let before = reconciler.cached().unwrap();

    remote.set_offline(true);
    let err = reconciler
        .fetch_and_merge(&ProtectedSet::default())
        .await
        .unwrap_err();

    assert!(matches!(err, ReconcileError::Remote(ref remote_err) if remote_err.is_transient()));
    assert_eq!(reconciler.cached().unwrap(), before);
}
