use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing_test::traced_test;

use super::*;
use crate::Error;
use crate::ErrorKind;
use crate::MemStore;
use crate::MockKvStore;
use crate::StorageError;
use crate::Target;

fn holder(event_id: &str) -> LockHolder {
    LockHolder {
        event_id: event_id.to_string(),
        kind: "app.update".to_string(),
        owner: "user:admin@example.com".to_string(),
        since: Utc::now(),
    }
}

fn manager() -> LockManager {
    LockManager::new(Arc::new(MemStore::new()), None)
}

fn locks(targets: &[Target]) -> Vec<LockRequest> {
    targets.iter().cloned().map(LockRequest::exclusive).collect()
}

#[test]
#[traced_test]
fn second_acquire_of_held_target_conflicts_with_holder_details() {
    let manager = manager();
    let _h1 = manager.acquire(&locks(&[Target::app("foo")]), &holder("e1")).unwrap();

    let err = manager.acquire(&locks(&[Target::app("foo")]), &holder("e2")).unwrap_err();
    match err {
        Error::LockConflict(conflict) => {
            assert_eq!(conflict.target, Target::app("foo"));
            assert_eq!(conflict.holder_event_id, "e1");
            assert_eq!(conflict.holder_kind, "app.update");
            assert!(conflict.holder_since <= Utc::now());
        }
        other => panic!("expected lock conflict, got {other:?}"),
    }
}

#[test]
fn release_frees_target_for_next_acquire() {
    let manager = manager();
    let h1 = manager.acquire(&locks(&[Target::app("foo")]), &holder("e1")).unwrap();
    manager.release(&h1).unwrap();
    assert!(h1.is_released());

    let h2 = manager.acquire(&locks(&[Target::app("foo")]), &holder("e2")).unwrap();
    assert_eq!(manager.holder(&Target::app("foo")).unwrap().unwrap().event_id, "e2");
    assert_eq!(h2.event_id(), "e2");
}

#[test]
fn release_is_idempotent() {
    let manager = manager();
    let h1 = manager.acquire(&locks(&[Target::app("foo")]), &holder("e1")).unwrap();
    manager.release(&h1).unwrap();
    manager.release(&h1).unwrap();

    // a second release must not free a lock taken by someone else meanwhile
    let _h2 = manager.acquire(&locks(&[Target::app("foo")]), &holder("e2")).unwrap();
    manager.release(&h1).unwrap();
    assert_eq!(manager.holder(&Target::app("foo")).unwrap().unwrap().event_id, "e2");
}

#[test]
fn multi_target_acquire_is_all_or_nothing() {
    let manager = manager();
    let _held_b = manager.acquire(&locks(&[Target::app("b")]), &holder("other")).unwrap();

    let err = manager
        .acquire(&locks(&[Target::app("a"), Target::app("b"), Target::app("c")]), &holder("swap"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyLocked);

    assert!(manager.holder(&Target::app("a")).unwrap().is_none());
    assert!(manager.holder(&Target::app("c")).unwrap().is_none());
    let _a = manager.acquire(&locks(&[Target::app("a")]), &holder("next")).unwrap();
}

#[test]
fn non_exclusive_requests_are_not_locked() {
    let manager = manager();
    let requests = vec![
        LockRequest::exclusive(Target::app("a")),
        LockRequest {
            target: Target::pool("p1"),
            exclusive: false,
        },
    ];
    let handle = manager.acquire(&requests, &holder("e1")).unwrap();
    assert_eq!(handle.targets(), vec![Target::app("a")]);
    assert!(manager.holder(&Target::pool("p1")).unwrap().is_none());
}

#[test]
fn duplicate_targets_are_rejected() {
    let manager = manager();
    let err = manager
        .acquire(&locks(&[Target::app("a"), Target::app("a")]), &holder("e1"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Invalid);
    assert!(manager.locked_targets().unwrap().is_empty());
}

#[test]
fn targets_are_acquired_in_sorted_order() {
    let manager = manager();
    let handle = manager
        .acquire(
            &locks(&[Target::pool("p"), Target::app("z"), Target::app("a")]),
            &holder("e1"),
        )
        .unwrap();
    assert_eq!(
        handle.targets(),
        vec![Target::app("a"), Target::app("z"), Target::pool("p")]
    );
}

#[test]
fn crossing_multi_target_requests_never_both_win() {
    let manager = Arc::new(manager());
    let mut joins = Vec::new();
    for i in 0..8 {
        let manager = manager.clone();
        joins.push(std::thread::spawn(move || {
            let order = if i % 2 == 0 {
                [Target::app("a"), Target::app("b")]
            } else {
                [Target::app("b"), Target::app("a")]
            };
            manager.acquire(&locks(&order), &holder(&format!("e{i}")))
        }));
    }
    let results: Vec<_> = joins.into_iter().map(|j| j.join().unwrap()).collect();
    let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(winners.len(), 1);

    let winner = winners[0].event_id().to_string();
    for target in [Target::app("a"), Target::app("b")] {
        assert_eq!(manager.holder(&target).unwrap().unwrap().event_id, winner);
    }
}

#[test]
#[traced_test]
fn stale_holder_is_reclaimed_on_conflicting_acquire() {
    let manager = LockManager::new(Arc::new(MemStore::new()), Some(Duration::from_millis(20)));
    let _abandoned = manager.acquire(&locks(&[Target::app("foo")]), &holder("crashed")).unwrap();

    std::thread::sleep(Duration::from_millis(40));

    let handle = manager.acquire(&locks(&[Target::app("foo")]), &holder("e2")).unwrap();
    assert_eq!(handle.event_id(), "e2");
    assert!(logs_contain("reclaimed stale lock"));
}

#[test]
fn fresh_holder_is_not_reclaimed() {
    let manager = LockManager::new(Arc::new(MemStore::new()), Some(Duration::from_secs(3600)));
    let _h1 = manager.acquire(&locks(&[Target::app("foo")]), &holder("e1")).unwrap();
    assert!(manager.acquire(&locks(&[Target::app("foo")]), &holder("e2")).is_err());
    assert_eq!(manager.reclaim_stale().unwrap(), 0);
}

#[test]
fn reclaim_stale_at_only_removes_old_locks() {
    let manager = LockManager::new(Arc::new(MemStore::new()), Some(Duration::from_secs(60)));
    let _h1 = manager.acquire(&locks(&[Target::app("old")]), &holder("e1")).unwrap();

    let later = Utc::now() + chrono::Duration::seconds(120);
    assert_eq!(manager.reclaim_stale_at(later).unwrap(), 1);
    assert!(manager.holder(&Target::app("old")).unwrap().is_none());
}

#[test]
fn reclaim_without_threshold_is_noop() {
    let manager = manager();
    let _h1 = manager.acquire(&locks(&[Target::app("foo")]), &holder("e1")).unwrap();
    let much_later = Utc::now() + chrono::Duration::days(365);
    assert_eq!(manager.reclaim_stale_at(much_later).unwrap(), 0);
    assert_eq!(manager.locked_targets().unwrap().len(), 1);
}

#[test]
fn locked_targets_lists_every_holder() {
    let manager = manager();
    let _h = manager
        .acquire(&locks(&[Target::app("a"), Target::node("10.0.0.1")]), &holder("e1"))
        .unwrap();
    let locked = manager.locked_targets().unwrap();
    let targets: Vec<Target> = locked.iter().map(|(t, _)| t.clone()).collect();
    assert_eq!(targets, vec![Target::app("a"), Target::node("10.0.0.1")]);
    assert!(locked.iter().all(|(_, r)| r.event_id == "e1"));
}

#[test]
fn force_unlock_is_gone() {
    let manager = manager();
    let _h = manager.acquire(&locks(&[Target::app("foo")]), &holder("e1")).unwrap();

    let err = manager.force_unlock(&Target::app("foo")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Gone);
    assert!(err.to_string().contains("deprecated"));
    assert!(manager.holder(&Target::app("foo")).unwrap().is_some());
}

#[test]
fn storage_failure_rolls_back_earlier_targets() {
    let mut store = MockKvStore::new();
    store
        .expect_insert_if_absent()
        .withf(|key, _| key == b"app/a")
        .times(1)
        .returning(|_, _| Ok(None));
    store
        .expect_insert_if_absent()
        .withf(|key, _| key == b"app/b")
        .times(1)
        .returning(|_, _| Err(StorageError::DataCorruption { location: "disk".into() }.into()));
    store
        .expect_remove_if_eq()
        .withf(|key, _| key == b"app/a")
        .times(1)
        .returning(|_, _| Ok(true));

    let manager = LockManager::new(Arc::new(store), None);
    let err = manager
        .acquire(&locks(&[Target::app("a"), Target::app("b")]), &holder("e1"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Storage);
}

#[test]
fn node_target_with_url_value_can_be_locked() {
    let manager = manager();
    let node = Target::node("http://10.0.0.1:2375");
    let handle = manager.acquire(&locks(&[node.clone()]), &holder("e1")).unwrap();

    assert!(manager.acquire(&locks(&[node.clone()]), &holder("e2")).unwrap_err().is_lock_conflict());
    let locked = manager.locked_targets().unwrap();
    assert_eq!(locked.len(), 1);
    assert_eq!(locked[0].0, node);

    manager.release(&handle).unwrap();
    assert!(manager.holder(&node).unwrap().is_none());
}

#[test]
fn conflict_reports_holder_start_time() {
    let manager = manager();
    let mut first = holder("e1");
    first.since = Utc::now() - chrono::Duration::minutes(5);
    let _h = manager.acquire(&locks(&[Target::app("foo")]), &first).unwrap();

    match manager.acquire(&locks(&[Target::app("foo")]), &holder("e2")).unwrap_err() {
        Error::LockConflict(conflict) => assert_eq!(conflict.holder_since, first.since),
        other => panic!("expected lock conflict, got {other:?}"),
    }
}
