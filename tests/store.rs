use serde::Deserialize;
use serde::Serialize;
use serde_json::json;
use serde_json::Value;
use std::io;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use wb_store::bootstrap::legacy_skip_warning;
use wb_store::bootstrap::WARN_DATA_RESET;
use wb_store::bootstrap::WARN_DEGRADED;
use wb_store::prelude::*;
use wb_store::sanitize::IMAGE_PLACEHOLDER;
use wb_store::store::WARN_QUOTA_RESET;
use wb_store::test::FaultyStore;
use wb_store::unload::TEARDOWN_EXIT_CODE;

const KEYS: [&str; 4] = ["clients", "rates", "notes", "chat_history"];

fn new_store(records: &Arc<FaultyStore>, legacy: &Arc<MemoryLegacyStore>) -> Store {
    let config = StoreConfig::builder().keys(KEYS).try_build().expect("config");
    Store::new(config, records.clone(), legacy.clone())
}

fn fixture() -> (Store, Arc<FaultyStore>, Arc<MemoryLegacyStore>) {
    let records = Arc::new(FaultyStore::new());
    let legacy = Arc::new(MemoryLegacyStore::new());
    (new_store(&records, &legacy), records, legacy)
}

// Comfortably past the default 300ms quiet interval.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(350)).await;
}

// Let spawned tasks run without getting anywhere near a debounce deadline.
async fn yield_to_tasks() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

fn inline_image(len: usize) -> String {
    let mut s = "data:image/jpeg;base64,".to_string();
    s.push_str(&"A".repeat(len - s.len()));
    s
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Client {
    name: String,
    rate: f64,
}

#[tokio::test(start_paused = true)]
async fn test_read_after_write_sees_value_before_commit() {
    let (store, records, _) = fixture();
    store.initialize().await;

    let clients = vec![Client {
        name: "Acme".into(),
        rate: 120.0,
    }];
    store.save("clients", &clients);

    assert_eq!(store.load("clients", Vec::<Client>::new()), clients);
    assert!(store.is_scheduled("clients"));
    assert_eq!(records.puts(), 0);

    settle().await;
    assert_eq!(records.puts(), 1);
    assert_eq!(store.pending_count(), 0);
    assert_eq!(store.load("clients", Vec::<Client>::new()), clients);
}

#[tokio::test(start_paused = true)]
async fn test_burst_is_coalesced_into_one_write() {
    let (store, records, _) = fixture();
    store.initialize().await;

    for i in 0..10 {
        store.save("notes", &format!("draft {i}"));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(records.puts(), 0, "write #{i} must still be waiting");
    }

    settle().await;
    assert_eq!(records.puts(), 1);
    assert_eq!(records.value_of("notes").as_deref(), Some(r#""draft 9""#));
}

#[tokio::test(start_paused = true)]
async fn test_unchanged_value_is_not_written_again() {
    let (store, records, _) = fixture();
    store.initialize().await;

    store.save("rates", &json!({"hourly": 90}));
    settle().await;
    assert_eq!(records.puts(), 1);

    store.save("rates", &json!({"hourly": 90}));
    settle().await;
    assert_eq!(records.puts(), 1);
    assert_eq!(store.pending_count(), 0);

    let outcome = store.persist("rates", &json!({"hourly": 90})).await.unwrap();
    assert_eq!(outcome, WriteOutcome::Unchanged);
    assert_eq!(records.puts(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_superseded_value_compares_against_committed_baseline() {
    let (store, records, _) = fixture();
    store.initialize().await;

    store.save("notes", "A");
    settle().await;
    assert_eq!(records.puts(), 1);

    // A, B, A within one window: the final value equals the committed one.
    store.save("notes", "B");
    assert_eq!(store.load("notes", String::new()), "B");
    store.save("notes", "A");
    settle().await;

    assert_eq!(records.puts(), 1);
    assert_eq!(store.load("notes", String::new()), "A");
}

#[tokio::test(start_paused = true)]
async fn test_notes_scenario() {
    let (store, records, _) = fixture();

    store.save("notes", "draft v1");
    settle().await;
    let record = records.records().into_iter().find(|r| r.key == "notes").expect("notes record");
    assert_eq!(record.value, r#""draft v1""#);

    let outcome = store.persist("notes", "draft v2").await.unwrap();
    assert_eq!(outcome, WriteOutcome::Written);
    assert_eq!(records.value_of("notes").as_deref(), Some(r#""draft v2""#));
    assert_eq!(store.load("notes", String::new()), "draft v2");
    assert!(!store.is_scheduled("notes"));
}

#[tokio::test(start_paused = true)]
async fn test_immediate_save_cancels_pending_timer() {
    let (store, records, _) = fixture();
    store.initialize().await;

    store.save("notes", "debounced");
    assert!(store.is_scheduled("notes"));

    store.save_immediate("notes", "immediate");
    assert!(!store.is_scheduled("notes"));
    yield_to_tasks().await;
    assert_eq!(records.value_of("notes").as_deref(), Some(r#""immediate""#));

    settle().await;
    assert_eq!(records.puts(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_legacy_migration_scenario() {
    let records = Arc::new(FaultyStore::new());
    let legacy = Arc::new(MemoryLegacyStore::from_entries([
        ("clients", "[invalid json"),
        ("rates", r#"{"a":1}"#),
    ]));
    let store = new_store(&records, &legacy);

    let status = store.initialize().await;

    assert_eq!(records.value_of("rates").as_deref(), Some(r#"{"a":1}"#));
    assert_eq!(store.load_value("rates"), Some(json!({"a": 1})));

    assert!(records.value_of("clients").is_none());
    assert!(legacy.get("clients").unwrap().is_none());
    assert!(legacy.get("rates").unwrap().is_none());
    assert!(status.recovered);
    assert_eq!(status.warnings, vec![legacy_skip_warning("clients")]);
    assert_eq!(records.bulk_puts(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_migration_runs_once() {
    let records = Arc::new(FaultyStore::new());
    let legacy = Arc::new(MemoryLegacyStore::from_entries([
        ("clients", "[invalid json"),
        ("rates", r#"{"a":1}"#),
    ]));

    let first = new_store(&records, &legacy);
    first.initialize().await;
    let again = first.initialize().await;
    assert_eq!(again.warnings.len(), 1);
    assert_eq!(records.bulk_puts(), 1);

    // A new process over the same storage.
    let second = new_store(&records, &legacy);
    let status = second.initialize().await;
    assert!(!status.recovered);
    assert!(status.warnings.is_empty());
    assert_eq!(records.bulk_puts(), 1);
    assert_eq!(second.load_value("rates"), Some(json!({"a": 1})));
}

#[tokio::test(start_paused = true)]
async fn test_durable_record_wins_over_legacy_entry() {
    let records = Arc::new(FaultyStore::new());
    records.seed("rates", r#"{"a":2}"#).await;
    let legacy = Arc::new(MemoryLegacyStore::from_entries([("rates", r#"{"a":1}"#)]));
    let store = new_store(&records, &legacy);

    store.initialize().await;
    assert_eq!(store.load_value("rates"), Some(json!({"a": 2})));
    assert!(legacy.get("rates").unwrap().is_none());
    assert_eq!(records.bulk_puts(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_failed_bulk_migration_falls_back_to_single_writes() {
    let records = Arc::new(FaultyStore::new());
    let legacy = Arc::new(MemoryLegacyStore::from_entries([("rates", r#"{"a":1}"#)]));
    let store = new_store(&records, &legacy);

    records.fail_puts_with_io(1);
    store.initialize().await;
    assert_eq!(records.bulk_puts(), 0);
    assert_eq!(store.load_value("rates"), Some(json!({"a": 1})));
    assert_eq!(store.pending_count(), 1);

    settle().await;
    assert_eq!(records.value_of("rates").as_deref(), Some(r#"{"a":1}"#));
    assert_eq!(store.pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_quota_recovery_round_trip() {
    let (store, records, _) = fixture();
    store.initialize().await;

    store.persist("chat_history", &json!(["hi"])).await.unwrap();

    records.fail_puts_with_quota(1);
    let outcome = store.persist("notes", "big draft").await.unwrap();
    assert_eq!(outcome, WriteOutcome::WrittenAfterReset);
    assert_eq!(records.value_of("notes").as_deref(), Some(r#""big draft""#));
    assert_eq!(records.resets(), 1);

    // The reset wiped everything else.
    assert!(records.value_of("chat_history").is_none());
    assert_eq!(store.load_value("chat_history"), None);

    let status = store.status();
    assert!(status.recovered);
    assert_eq!(status.warnings.iter().filter(|w| *w == WARN_QUOTA_RESET).count(), 1);

    records.fail_puts_with_quota(1);
    store.persist("rates", &json!({"a": 1})).await.unwrap();
    assert_eq!(records.resets(), 2);
    assert_eq!(store.status().warnings, vec![WARN_QUOTA_RESET.to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_newer_write_survives_quota_recovery_of_older_one() {
    let (store, records, _) = fixture();
    store.initialize().await;

    records.delay_puts(Duration::from_millis(10));
    records.fail_puts_with_quota(1);

    let persisting = tokio::spawn({
        let store = store.clone();
        async move { store.persist("notes", "v1").await }
    });
    // The put of v1 is in flight now.
    tokio::time::sleep(Duration::from_millis(5)).await;
    store.save("notes", "v2");

    let outcome = persisting.await.unwrap().unwrap();
    assert_eq!(outcome, WriteOutcome::WrittenAfterReset);
    assert_eq!(store.load("notes", String::new()), "v2");
    assert!(store.is_scheduled("notes"));

    settle().await;
    assert_eq!(records.value_of("notes").as_deref(), Some(r#""v2""#));
    assert_eq!(store.load("notes", String::new()), "v2");
    assert_eq!(store.pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_quota_recovery_keeps_other_pending_writes() {
    let (store, records, _) = fixture();
    store.initialize().await;

    store.persist("clients", &json!([])).await.unwrap();
    store.save("notes", "typed just now");

    records.fail_puts_with_quota(1);
    let outcome = store.persist("rates", &json!({"a": 1})).await.unwrap();
    assert_eq!(outcome, WriteOutcome::WrittenAfterReset);

    assert!(store.is_scheduled("notes"));
    assert_eq!(store.load("notes", String::new()), "typed just now");

    settle().await;
    assert_eq!(records.value_of("notes").as_deref(), Some(r#""typed just now""#));
    assert_eq!(records.value_of("rates").as_deref(), Some(r#"{"a":1}"#));
    // Only what was already committed goes away with the reset.
    assert!(records.value_of("clients").is_none());
    assert_eq!(store.pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_quota_retry_failure_keeps_value_in_memory() {
    let (store, records, _) = fixture();
    store.initialize().await;

    records.fail_puts_with_quota(2);
    let err = store.persist("notes", "unsaved").await.unwrap_err();
    assert!(err.is_quota_exceeded());
    assert_eq!(records.resets(), 1);
    assert_eq!(store.load("notes", String::new()), "unsaved");
    assert_eq!(store.pending_count(), 1);

    assert_eq!(store.flush().await, 1);
    assert_eq!(records.value_of("notes").as_deref(), Some(r#""unsaved""#));
    assert_eq!(store.pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_io_failure_is_absorbed() {
    let (store, records, _) = fixture();
    store.initialize().await;

    records.fail_puts_with_io(1);
    store.save("notes", "offline");
    settle().await;

    assert_eq!(records.puts(), 0);
    assert_eq!(records.resets(), 0);
    assert_eq!(store.load("notes", String::new()), "offline");
    assert!(!store.status().recovered);

    store.flush().await;
    assert_eq!(records.value_of("notes").as_deref(), Some(r#""offline""#));
}

#[tokio::test(start_paused = true)]
async fn test_corrupt_record_resets_store() {
    let records = Arc::new(FaultyStore::new());
    records.seed("rates", r#"{"a":1}"#).await;
    records.seed("notes", "{not json").await;
    let legacy = Arc::new(MemoryLegacyStore::new());
    let store = new_store(&records, &legacy);

    let status = store.initialize().await;
    assert!(status.recovered);
    assert_eq!(status.warnings, vec![WARN_DATA_RESET.to_string()]);
    assert_eq!(records.resets(), 1);
    assert!(records.records().is_empty());
    // Nothing from a partial hydration survives.
    assert_eq!(store.load_value("rates"), None);
}

#[tokio::test(start_paused = true)]
async fn test_degraded_mode_drops_only_unreadable_legacy_entries() {
    let records = Arc::new(FaultyStore::new());
    records.fail_get_all(2);
    let legacy = Arc::new(MemoryLegacyStore::from_entries([
        ("clients", "[invalid json"),
        ("rates", r#"{"a":1}"#),
    ]));
    let store = new_store(&records, &legacy);

    let status = store.initialize().await;
    assert!(status.warnings.contains(&legacy_skip_warning("clients")));
    assert!(legacy.get("clients").unwrap().is_none());
    assert!(legacy.get("rates").unwrap().is_some());

    // The next start has a working store: the readable entry migrates, the skip isn't reported again.
    let store = new_store(&records, &legacy);
    let status = store.initialize().await;
    assert!(status.warnings.is_empty());
    assert_eq!(records.value_of("rates").as_deref(), Some(r#"{"a":1}"#));
    assert!(legacy.keys().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_unusable_storage_degrades_to_memory() {
    let records = Arc::new(FaultyStore::new());
    records.fail_get_all(2);
    let legacy = Arc::new(MemoryLegacyStore::from_entries([("rates", r#"{"a":1}"#)]));
    let store = new_store(&records, &legacy);

    let status = store.initialize().await;
    assert_eq!(status.warnings, vec![WARN_DATA_RESET.to_string(), WARN_DEGRADED.to_string()]);

    // Legacy data is adopted in memory but left in place for the next start.
    assert_eq!(store.load_value("rates"), Some(json!({"a": 1})));
    assert!(legacy.get("rates").unwrap().is_some());

    store.save("notes", "still works");
    assert_eq!(store.load("notes", String::new()), "still works");
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_initialize_shares_one_bootstrap() {
    let records = Arc::new(FaultyStore::new());
    records.seed("notes", r#""saved""#).await;
    records.delay_reads(Duration::from_millis(20));
    let legacy = Arc::new(MemoryLegacyStore::from_entries([("rates", r#"{"a":1}"#)]));
    let store = new_store(&records, &legacy);

    let (first, second, third, during) = tokio::join!(
        store.initialize(),
        store.initialize(),
        store.initialize(),
        async { store.load("notes", "fallback".to_string()) }
    );
    assert_eq!(during, "fallback");
    let late = store.initialize().await;

    assert_eq!(records.opens(), 1);
    assert_eq!(records.get_alls(), 1);
    assert_eq!(records.bulk_puts(), 1);
    assert_eq!(first, second);
    assert_eq!(second, third);
    assert_eq!(third, late);
    assert_eq!(store.bootstrap_phase(), BootstrapPhase::Done);
    assert_eq!(store.load("notes", "fallback".to_string()), "saved");
    assert_eq!(store.load_value("rates"), Some(json!({"a": 1})));
}

#[tokio::test(start_paused = true)]
async fn test_load_triggers_bootstrap() {
    let (store, records, _) = fixture();
    records.seed("notes", r#""from disk""#).await;

    assert_eq!(store.bootstrap_phase(), BootstrapPhase::NotStarted);
    assert_eq!(store.load("notes", "fallback".to_string()), "fallback");
    assert_ne!(store.bootstrap_phase(), BootstrapPhase::NotStarted);

    yield_to_tasks().await;
    assert_eq!(store.bootstrap_phase(), BootstrapPhase::Done);
    assert_eq!(store.load("notes", "fallback".to_string()), "from disk");
}

#[tokio::test(start_paused = true)]
async fn test_mismatched_type_yields_fallback() {
    let (store, _, _) = fixture();
    store.initialize().await;

    store.save("rates", &json!({"a": 1}));
    assert_eq!(store.load("rates", 7u32), 7);
}

#[tokio::test(start_paused = true)]
async fn test_inline_images_are_stripped_before_storage() {
    let (store, records, _) = fixture();
    store.initialize().await;

    let big = inline_image(600);
    let small = inline_image(100);
    let value = json!({ "avatar": big, "thumb": small, "deep": [[[[[[[big]]]]]]] });
    store.save("clients", &value);

    // The pending copy is the raw value.
    assert_eq!(store.load_value("clients"), Some(value.clone()));

    settle().await;
    let stored: Value = serde_json::from_str(&records.value_of("clients").unwrap()).unwrap();
    assert_eq!(stored["avatar"], json!(IMAGE_PLACEHOLDER));
    assert_eq!(stored["thumb"], json!(small));
    // Eight levels down is past the sanitizer's reach.
    assert_eq!(stored["deep"], value["deep"]);
    assert_eq!(store.load_value("clients"), Some(stored));
}

#[tokio::test(start_paused = true)]
async fn test_flush_writes_everything_pending() {
    let (store, records, _) = fixture();
    store.initialize().await;

    store.save("clients", &json!([]));
    store.save("rates", &json!({}));
    store.save("notes", "n");
    assert_eq!(store.flush().await, 3);
    assert_eq!(records.puts(), 3);
    assert!(!store.is_scheduled("notes"));

    settle().await;
    assert_eq!(records.puts(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_unload_guard() {
    let (store, records, _) = fixture();
    store.initialize().await;

    let guard = store.register_unload_guard().expect("first registration");
    assert!(store.register_unload_guard().is_none());

    store.save("notes", "on exit");
    let flushed = guard.fire().expect("runtime").await.unwrap();
    assert_eq!(flushed, 1);
    assert_eq!(records.value_of("notes").as_deref(), Some(r#""on exit""#));

    store.save("notes", "dropped");
    drop(guard);
    yield_to_tasks().await;
    assert_eq!(records.value_of("notes").as_deref(), Some(r#""dropped""#));
}

#[tokio::test(start_paused = true)]
async fn test_teardown_signal_flushes_then_exits() {
    let (store, records, _) = fixture();
    store.initialize().await;

    let (signal_tx, signal_rx) = tokio::sync::oneshot::channel::<()>();
    let (exit_tx, exit_rx) = tokio::sync::oneshot::channel::<i32>();
    let _guard = store
        .register_unload_guard_with(async move { signal_rx.await.map_err(io::Error::other) }, move |code| {
            let _ = exit_tx.send(code);
        })
        .expect("first registration");
    assert!(store.register_unload_guard().is_none());

    store.save("notes", "before exit");
    signal_tx.send(()).unwrap();

    let code = exit_rx.await.expect("exit requested");
    assert_eq!(code, TEARDOWN_EXIT_CODE);
    assert_eq!(records.value_of("notes").as_deref(), Some(r#""before exit""#));
    assert_eq!(store.pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_teardown_listener_failure_keeps_running() {
    let (store, records, _) = fixture();
    store.initialize().await;

    let exited = Arc::new(AtomicBool::new(false));
    let _guard = store
        .register_unload_guard_with(async { Err(io::Error::other("no signal support")) }, {
            let exited = exited.clone();
            move |_| exited.store(true, Ordering::SeqCst)
        })
        .expect("first registration");

    store.save("notes", "still debounced");
    yield_to_tasks().await;
    assert!(!exited.load(Ordering::SeqCst));
    assert!(store.is_scheduled("notes"));

    settle().await;
    assert_eq!(records.value_of("notes").as_deref(), Some(r#""still debounced""#));
    assert!(!exited.load(Ordering::SeqCst));
}
