use std::sync::Arc;

use tracing_test::traced_test;

use super::*;
use crate::ErrorKind;
use crate::LogHubConfig;
use crate::MemStore;
use crate::MockPermissionChecker;
use crate::Principal;
use crate::PERM_APP_READ_LOG;

fn allow_all() -> MockPermissionChecker {
    let mut checker = MockPermissionChecker::new();
    checker.expect_check().returning(|_, _, _| true);
    checker
}

fn hub_with(
    checker: MockPermissionChecker,
    config: LogHubConfig,
) -> LogHub {
    LogHub::new(Arc::new(MemStore::new()), Arc::new(checker), config)
}

fn hub() -> LogHub {
    hub_with(allow_all(), LogHubConfig::default())
}

fn reader() -> Principal {
    Principal::user("reader@example.com")
}

fn messages(watcher: &mut Watcher) -> Vec<String> {
    let mut out = Vec::new();
    while let Some(entry) = watcher.try_recv() {
        out.push(entry.message);
    }
    out
}

#[test]
fn add_delivers_only_to_matching_source() {
    let hub = hub();
    let mut web = hub.watch("foo", "web", "", &reader()).unwrap();
    let mut worker = hub.watch("foo", "worker", "", &reader()).unwrap();

    hub.add("foo", "m1", "web", "u1").unwrap();

    assert_eq!(messages(&mut web), vec!["m1"]);
    assert!(messages(&mut worker).is_empty());
}

#[test]
fn unit_filter_keeps_ingestion_order() {
    let hub = hub();
    let mut watcher = hub.watch("foo", "", "web", &reader()).unwrap();

    hub.add("foo", "first", "app", "web").unwrap();
    hub.add("foo", "second", "app", "worker").unwrap();
    hub.add("foo", "third", "app", "web").unwrap();

    assert_eq!(messages(&mut watcher), vec!["first", "third"]);
}

#[test]
fn entries_for_other_apps_are_not_delivered() {
    let hub = hub();
    let mut watcher = hub.watch("foo", "", "", &reader()).unwrap();
    hub.add("bar", "elsewhere", "app", "").unwrap();
    assert!(messages(&mut watcher).is_empty());
}

#[test]
fn closed_watcher_receives_nothing_and_add_still_succeeds() {
    let hub = hub();
    let mut watcher = hub.watch("foo", "", "", &reader()).unwrap();
    assert_eq!(hub.watcher_count("foo"), 1);

    hub.close(&watcher);
    hub.close(&watcher);
    assert!(!watcher.is_alive());
    assert_eq!(hub.watcher_count("foo"), 0);

    hub.add("foo", "after close", "app", "").unwrap();
    assert!(messages(&mut watcher).is_empty());
}

#[test]
fn dropping_watcher_unregisters_it() {
    let hub = hub();
    {
        let _watcher = hub.watch("foo", "", "", &reader()).unwrap();
        let _other = hub.watch("foo", "web", "", &reader()).unwrap();
        assert_eq!(hub.watcher_count("foo"), 2);
    }
    assert_eq!(hub.watcher_count("foo"), 0);
}

#[test]
#[traced_test]
fn full_queue_drops_entries_without_blocking() {
    let config = LogHubConfig {
        watcher_buffer_size: 2,
        enable_metrics: true,
        ..Default::default()
    };
    let hub = hub_with(allow_all(), config);
    let mut slow = hub.watch("dropper", "", "", &reader()).unwrap();

    hub.add_many("dropper", &["a", "b", "c", "d"], "app", "").unwrap();

    assert_eq!(messages(&mut slow), vec!["a", "b"]);
    assert_eq!(hub.dropped(), 2);
    assert!(logs_contain("watcher queue full"));
    // Everything is still stored even though delivery was dropped.
    assert_eq!(hub.last_logs("dropper", 10, &LogFilter::default(), false).unwrap().len(), 4);
}

#[test]
fn watch_requires_read_log_permission() {
    let mut checker = MockPermissionChecker::new();
    checker
        .expect_check()
        .withf(|principal, capability, contexts| {
            principal.name == "admin" && capability == PERM_APP_READ_LOG && contexts[0].value == "foo"
        })
        .returning(|_, _, _| true);
    checker.expect_check().returning(|_, _, _| false);
    let hub = hub_with(checker, LogHubConfig::default());

    assert!(hub.watch("foo", "", "", &Principal::user("admin")).is_ok());
    let err = hub.watch("foo", "", "", &Principal::user("mallory")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);
    assert_eq!(hub.watcher_count("foo"), 0);
}

#[test]
fn empty_source_defaults_to_app() {
    let hub = hub();
    hub.add("foo", "hello", "", "u1").unwrap();
    let logs = hub.last_logs("foo", 1, &LogFilter::default(), false).unwrap();
    assert_eq!(logs[0].source, "app");
    assert_eq!(logs[0].app_name, "foo");
}

#[test]
fn last_logs_returns_tail_in_order() {
    let hub = hub();
    hub.add_many("foo", &["1", "2", "3", "4", "5"], "web", "").unwrap();
    hub.add("foo-bar", "other app", "web", "").unwrap();

    let logs = hub.last_logs("foo", 3, &LogFilter::default(), false).unwrap();
    let got: Vec<_> = logs.iter().map(|l| l.message.as_str()).collect();
    assert_eq!(got, vec!["3", "4", "5"]);
}

#[test]
fn last_logs_filters_and_inverts() {
    let hub = hub();
    hub.add("foo", "w1", "web", "").unwrap();
    hub.add("foo", "k1", "worker", "").unwrap();
    hub.add("foo", "w2", "web", "").unwrap();

    let web = LogFilter::new("web", "");
    let selected = hub.last_logs("foo", 10, &web, false).unwrap();
    let excluded = hub.last_logs("foo", 10, &web, true).unwrap();

    assert_eq!(selected.iter().map(|l| l.message.as_str()).collect::<Vec<_>>(), vec!["w1", "w2"]);
    assert_eq!(excluded.iter().map(|l| l.message.as_str()).collect::<Vec<_>>(), vec!["k1"]);
}

#[test]
fn last_logs_is_capped_by_max_lines() {
    let config = LogHubConfig {
        max_lines: 2,
        ..Default::default()
    };
    let hub = hub_with(allow_all(), config);
    hub.add_many("foo", &["1", "2", "3"], "", "").unwrap();
    assert_eq!(hub.last_logs("foo", 100, &LogFilter::default(), false).unwrap().len(), 2);
}

#[test]
fn zero_lines_and_bad_app_names_are_invalid() {
    let hub = hub();
    assert_eq!(
        hub.last_logs("foo", 0, &LogFilter::default(), false).unwrap_err().kind(),
        ErrorKind::Invalid
    );
    assert_eq!(hub.add("", "m", "", "").unwrap_err().kind(), ErrorKind::Invalid);
    assert_eq!(hub.add("a\0b", "m", "", "").unwrap_err().kind(), ErrorKind::Invalid);
}

#[test]
fn open_rejects_follow_with_invert() {
    let hub = hub();
    let query = LogQuery {
        lines: 10,
        invert: true,
        follow: true,
        ..Default::default()
    };
    assert_eq!(hub.open("foo", &query, &reader()).unwrap_err().kind(), ErrorKind::Invalid);
}

#[test]
fn open_returns_history_and_follow_watcher() {
    let hub = hub();
    hub.add("foo", "old", "web", "").unwrap();
    let query = LogQuery {
        lines: 10,
        filter: LogFilter::new("web", ""),
        follow: true,
        ..Default::default()
    };

    let (history, watcher) = hub.open("foo", &query, &reader()).unwrap();
    let mut watcher = watcher.unwrap();
    assert_eq!(history.len(), 1);

    hub.add("foo", "new", "web", "").unwrap();
    hub.add("foo", "ignored", "worker", "").unwrap();
    assert_eq!(messages(&mut watcher), vec!["new"]);
    assert_eq!(watcher.filter(), &LogFilter::new("web", ""));
}

#[test]
fn shutdown_closes_all_watchers() {
    let hub = hub();
    let w1 = hub.watch("foo", "", "", &reader()).unwrap();
    let w2 = hub.watch("bar", "", "", &reader()).unwrap();

    hub.shutdown();
    hub.shutdown();

    assert!(!w1.is_alive());
    assert!(!w2.is_alive());
    assert_eq!(hub.watcher_count("foo"), 0);
    assert_eq!(hub.watch("foo", "", "", &reader()).unwrap_err().kind(), ErrorKind::Gone);
    hub.add("foo", "still stored", "", "").unwrap();
}

#[tokio::test]
async fn closed_watcher_queue_ends_after_buffered_entries() {
    let hub = hub();
    let mut watcher = hub.watch("foo", "", "", &reader()).unwrap();
    hub.add("foo", "buffered", "", "").unwrap();
    watcher.close();

    assert_eq!(watcher.recv().await.unwrap().message, "buffered");
    assert!(watcher.recv().await.is_none());
}

#[test]
fn last_logs_reads_only_the_newest_page() {
    let newest: Vec<(Vec<u8>, Vec<u8>)> = ["m9", "m8"]
        .iter()
        .enumerate()
        .map(|(i, message)| {
            let entry = Applog {
                timestamp: chrono::Utc::now(),
                app_name: "foo".to_string(),
                message: message.to_string(),
                source: "app".to_string(),
                unit: String::new(),
            };
            (vec![b'k', 9 - i as u8], serde_json::to_vec(&entry).unwrap())
        })
        .collect();

    let mut store = crate::MockKvStore::new();
    store
        .expect_scan_prefix_rev()
        .withf(|prefix, before, limit| prefix == b"foo\0" && before.is_empty() && *limit == 2)
        .times(1)
        .returning(move |_, _, _| Ok(newest.clone()));
    let hub = LogHub::new(Arc::new(store), Arc::new(allow_all()), LogHubConfig::default());

    let logs = hub.last_logs("foo", 2, &LogFilter::default(), false).unwrap();
    assert_eq!(logs.iter().map(|l| l.message.as_str()).collect::<Vec<_>>(), vec!["m8", "m9"]);
}

#[test]
fn last_logs_pages_past_non_matching_entries() {
    let hub = hub();
    hub.add("foo", "w1", "web", "").unwrap();
    hub.add_many("foo", &["k1", "k2", "k3", "k4", "k5"], "worker", "").unwrap();
    hub.add("foo", "w2", "web", "").unwrap();
    hub.add_many("foo", &["k6", "k7"], "worker", "").unwrap();

    let logs = hub.last_logs("foo", 2, &LogFilter::new("web", ""), false).unwrap();
    assert_eq!(logs.iter().map(|l| l.message.as_str()).collect::<Vec<_>>(), vec!["w1", "w2"]);
}

#[test]
fn watch_racing_shutdown_never_leaves_a_live_watcher() {
    for _ in 0..20 {
        let hub = hub();
        let barrier = Arc::new(std::sync::Barrier::new(5));
        let watchers: Vec<_> = (0..4)
            .map(|i| {
                let hub = hub.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    hub.watch(&format!("app{}", i % 2), "", "", &reader())
                })
            })
            .collect();
        barrier.wait();
        hub.shutdown();

        for handle in watchers {
            if let Ok(watcher) = handle.join().unwrap() {
                assert!(!watcher.is_alive());
            }
        }
        assert_eq!(hub.watched_app_count(), 0);
    }
}
