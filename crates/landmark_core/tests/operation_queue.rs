mod common;

use landmark_core::db::{open_db, share};
use landmark_core::model::wire::landmark_from_json_str;
use landmark_core::{
    Landmark, OperationKind, OperationQueue, OperationStatus, QueueError, MAX_RETRY_COUNT,
};
use uuid::Uuid;

#[test]
fn enqueue_creates_pending_entry_with_zero_retries() {
    let queue = OperationQueue::new(common::memory_conn());
    let landmark = Landmark::new("Angkor Wat", 13.4125, 103.8670).unwrap();

    let entry = queue
        .enqueue_snapshot(OperationKind::Create, &landmark)
        .unwrap();

    assert!(entry.id.is_some());
    assert_eq!(entry.status, OperationStatus::Pending);
    assert_eq!(entry.retry_count, 0);
    assert_eq!(entry.landmark_id, None);
    assert!(entry.error_message.is_none());
    assert_eq!(landmark_from_json_str(&entry.payload).unwrap(), landmark);
    assert_eq!(queue.get(entry.id.unwrap()).unwrap(), Some(entry));
}

#[test]
fn status_transitions_are_persisted() {
    let queue = OperationQueue::new(common::memory_conn());
    let mut entry = queue
        .enqueue(OperationKind::Update, Uuid::new_v4(), Some(3), "{}")
        .unwrap();

    queue.mark_processing(&mut entry).unwrap();
    queue.mark_failed(&mut entry, "timeout").unwrap();

    let stored = queue.get(entry.id.unwrap()).unwrap().unwrap();
    assert_eq!(stored.status, OperationStatus::Failed);
    assert_eq!(stored.retry_count, 1);
    assert_eq!(stored.error_message.as_deref(), Some("timeout"));
    assert!(stored.last_retry_at.is_some());
    assert!(stored.can_retry());

    queue.mark_processing(&mut entry).unwrap();
    queue.mark_completed(&mut entry).unwrap();
    let stored = queue.get(entry.id.unwrap()).unwrap().unwrap();
    assert_eq!(stored.status, OperationStatus::Completed);
    assert!(queue.mark_processing(&mut entry).is_err());
}

#[test]
fn five_failures_move_entry_to_dead_letters() {
    let queue = OperationQueue::new(common::memory_conn());
    let mut entry = queue
        .enqueue(OperationKind::Delete, Uuid::new_v4(), Some(9), "{}")
        .unwrap();

    for _ in 0..MAX_RETRY_COUNT {
        assert!(queue.drainable().unwrap().iter().any(|e| e.id == entry.id));
        queue.mark_processing(&mut entry).unwrap();
        queue.mark_failed(&mut entry, "503").unwrap();
    }

    assert!(!entry.can_retry());
    assert!(queue.drainable().unwrap().is_empty());
    let dead = queue.dead_letters().unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].retry_count, MAX_RETRY_COUNT);
}

#[test]
fn rejected_entry_is_dead_lettered_immediately() {
    let queue = OperationQueue::new(common::memory_conn());
    let mut entry = queue
        .enqueue(OperationKind::Create, Uuid::new_v4(), None, "{}")
        .unwrap();

    queue.mark_processing(&mut entry).unwrap();
    queue.mark_rejected(&mut entry, "422").unwrap();

    let counts = queue.counts().unwrap();
    assert_eq!(counts.dead_lettered, 1);
    assert_eq!(counts.live(), 0);
}

#[test]
fn listings_are_fifo() {
    let queue = OperationQueue::new(common::memory_conn());
    let key = Uuid::new_v4();
    let kinds = [
        OperationKind::Create,
        OperationKind::Update,
        OperationKind::Update,
        OperationKind::Delete,
    ];
    for kind in kinds {
        queue.enqueue(kind, key, None, "{}").unwrap();
    }

    let listed: Vec<_> = queue
        .drainable()
        .unwrap()
        .into_iter()
        .map(|entry| entry.kind)
        .collect();

    assert_eq!(listed, kinds.to_vec());
}

#[test]
fn purge_removes_only_completed_entries() {
    let queue = OperationQueue::new(common::memory_conn());
    let mut done = queue
        .enqueue(OperationKind::Create, Uuid::new_v4(), None, "{}")
        .unwrap();
    queue
        .enqueue(OperationKind::Create, Uuid::new_v4(), None, "{}")
        .unwrap();
    queue.mark_processing(&mut done).unwrap();
    queue.mark_completed(&mut done).unwrap();

    assert_eq!(queue.purge_completed().unwrap(), 1);
    let remaining = queue.list_all().unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].status, OperationStatus::Pending);
}

#[test]
fn protected_set_separates_live_entries_from_dead_letters() {
    let queue = OperationQueue::new(common::memory_conn());
    let live_key = Uuid::new_v4();
    let dead_key = Uuid::new_v4();
    queue
        .enqueue(OperationKind::Delete, live_key, Some(4), "{}")
        .unwrap();
    let mut dead = queue
        .enqueue(OperationKind::Update, dead_key, Some(5), "{}")
        .unwrap();
    queue.mark_processing(&mut dead).unwrap();
    queue.mark_rejected(&mut dead, "400").unwrap();

    let protected = queue.protected_set().unwrap();

    assert!(protected.local_keys.contains(&live_key));
    assert!(!protected.local_keys.contains(&dead_key));
    assert!(protected.dead_letter_keys.contains(&dead_key));
    assert!(protected.pending_delete_ids.contains(&4));
    assert!(!protected.pending_delete_ids.contains(&5));
    assert!(queue.has_live_entries(live_key).unwrap());
    assert!(!queue.has_live_entries(dead_key).unwrap());
}

#[test]
fn entries_survive_restart_and_interrupted_ones_recover() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("queue.db");

    {
        let queue = OperationQueue::new(share(open_db(&path).unwrap()));
        let mut entry = queue
            .enqueue(OperationKind::Create, Uuid::new_v4(), None, "{}")
            .unwrap();
        queue.mark_processing(&mut entry).unwrap();
    }

    let queue = OperationQueue::new(share(open_db(&path).unwrap()));
    assert_eq!(queue.counts().unwrap().processing, 1);
    assert_eq!(queue.recover_interrupted().unwrap(), 1);

    let entries = queue.list_all().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].status, OperationStatus::Pending);
    assert_eq!(entries[0].retry_count, 0);
}

#[test]
fn dead_letters_can_be_retried_or_discarded() {
    let queue = OperationQueue::new(common::memory_conn());
    let mut retried = queue
        .enqueue(OperationKind::Create, Uuid::new_v4(), None, "{}")
        .unwrap();
    queue.mark_processing(&mut retried).unwrap();
    queue.mark_rejected(&mut retried, "422").unwrap();
    let mut discarded = queue
        .enqueue(OperationKind::Update, Uuid::new_v4(), Some(3), "{}")
        .unwrap();
    queue.mark_processing(&mut discarded).unwrap();
    queue.mark_rejected(&mut discarded, "409").unwrap();
    let live = queue
        .enqueue(OperationKind::Delete, Uuid::new_v4(), Some(9), "{}")
        .unwrap();

    let revived = queue.retry_dead_letter(retried.id.unwrap()).unwrap();
    assert_eq!(revived.status, OperationStatus::Pending);
    assert_eq!(revived.retry_count, 0);
    queue.discard_dead_letter(discarded.id.unwrap()).unwrap();

    assert!(queue.dead_letters().unwrap().is_empty());
    assert!(queue.get(discarded.id.unwrap()).unwrap().is_none());
    assert_eq!(queue.drainable().unwrap().len(), 2);
    assert!(matches!(
        queue.retry_dead_letter(live.id.unwrap()),
        Err(QueueError::NotDeadLettered(_))
    ));
    assert!(queue.discard_dead_letter(999).is_err());
}
