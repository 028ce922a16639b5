//! Cross-context synchronization scenarios.
//!
//! Each test opens engines over separate contexts of one shared in-memory
//! store, drives them with explicit timestamps, and checks the end-to-end
//! behavior: coalescing, foreign propagation, foreign precedence over
//! pending local writes, error recovery, and teardown durability.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use plotsync_core::domain::{AllotmentRecord, Bed, BedStatus};
use plotsync_core::engine::RecordEngine;
use plotsync_core::store::{DurableStore, MemoryStore};
use plotsync_core::validate::SchemaValidator;
use plotsync_core::{EngineConfig, FlushError, SaveStatus};

const KEY: &str = "allotment";
const WINDOW: Duration = Duration::from_millis(500);

fn open(store: &MemoryStore) -> RecordEngine<AllotmentRecord> {
    let (engine, _) = RecordEngine::open(
        KEY,
        Arc::new(store.new_context()),
        Box::new(AllotmentRecord::validator()),
        AllotmentRecord::empty("Shared Plot"),
        EngineConfig::default(),
    );
    engine
}

fn named(name: &str) -> AllotmentRecord {
    let mut record = AllotmentRecord::empty("Shared Plot");
    record.meta.location = Some(name.to_string());
    record
}

#[test]
fn rapid_edits_coalesce_into_one_durable_write() {
    let store = MemoryStore::new();
    let mut engine = open(&store);
    let t0 = Instant::now();

    // Rename a bed three times within the quiet window.
    for (offset_ms, name) in [(0, "Bed A"), (120, "Bed A (sunny)"), (240, "Bed A south")] {
        engine
            .set_with_at(
                |prev| {
                    let mut next = prev.clone();
                    next.layout.beds = vec![Bed {
                        id: "A".into(),
                        name: name.into(),
                        status: BedStatus::Rotation,
                    }];
                    next
                },
                t0 + Duration::from_millis(offset_ms),
            )
            .unwrap();
    }

    engine.pump(t0 + Duration::from_millis(240) + WINDOW);

    assert_eq!(store.save_count(), 1);
    let stored: AllotmentRecord =
        serde_json::from_str(&store.load(KEY).unwrap().unwrap()).unwrap();
    assert_eq!(stored.layout.beds[0].name, "Bed A south");
}

#[test]
fn foreign_write_propagates_and_sync_flag_decays() {
    let store = MemoryStore::new();
    let mut alpha = open(&store);
    let mut beta = open(&store);
    let t0 = Instant::now();

    alpha.set_at(named("written by alpha"), t0).unwrap();
    alpha.pump(t0 + WINDOW);
    assert_eq!(store.save_count(), 1);

    // Beta hears about it on its next pump.
    beta.pump(t0 + WINDOW + Duration::from_millis(10));
    assert_eq!(
        beta.get().meta.location.as_deref(),
        Some("written by alpha")
    );
    assert!(beta.synced_externally());
    assert_eq!(beta.status(), SaveStatus::Idle);

    // Alpha never sees its own write as foreign.
    alpha.pump(t0 + WINDOW + Duration::from_millis(10));
    assert!(!alpha.synced_externally());

    // The sync flag is display-only and lapses.
    beta.pump(t0 + WINDOW + Duration::from_millis(3_010));
    assert!(!beta.synced_externally());
}

#[test]
fn foreign_update_supersedes_pending_local_write() {
    let store = MemoryStore::new();
    let mut alpha = open(&store);
    let mut beta = open(&store);
    let t0 = Instant::now();

    // Alpha has Y pending; beta flushes Z first.
    alpha.set_at(named("Y"), t0).unwrap();
    beta.set_at(named("Z"), t0 + Duration::from_millis(50)).unwrap();
    beta.flush_at(t0 + Duration::from_millis(60)).unwrap();

    alpha.pump(t0 + Duration::from_millis(70));
    assert_eq!(alpha.get().meta.location.as_deref(), Some("Z"));
    assert!(!alpha.has_pending_write());

    // Y is never written, even past its original deadline.
    alpha.pump(t0 + WINDOW + Duration::from_millis(100));
    assert_eq!(store.save_count(), 1);
    let stored: AllotmentRecord =
        serde_json::from_str(&store.load(KEY).unwrap().unwrap()).unwrap();
    assert_eq!(stored.meta.location.as_deref(), Some("Z"));
}

#[test]
fn engines_converge_after_alternating_writes() {
    let store = MemoryStore::new();
    let mut alpha = open(&store);
    let mut beta = open(&store);
    let mut now = Instant::now();

    for round in 0..4 {
        let writer = if round % 2 == 0 { &mut alpha } else { &mut beta };
        writer
            .set_at(named(&format!("round {round}")), now)
            .unwrap();
        now += WINDOW;
        alpha.pump(now);
        beta.pump(now);
        now += Duration::from_millis(10);
        alpha.pump(now);
        beta.pump(now);
    }

    assert_eq!(alpha.get(), beta.get());
    assert_eq!(alpha.get().meta.location.as_deref(), Some("round 3"));
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct TinyDoc {
    version: u64,
    body: String,
}

#[test]
fn save_error_surfaces_then_successful_flush_recovers() {
    // Capacity small enough to reject a long body but accept a short one.
    let store = MemoryStore::with_capacity(Some(40));
    let (mut engine, _) = RecordEngine::open(
        KEY,
        Arc::new(store.new_context()),
        Box::new(SchemaValidator::<TinyDoc>::new(1, 1)),
        TinyDoc {
            version: 1,
            body: String::new(),
        },
        EngineConfig::default(),
    );
    let t0 = Instant::now();

    engine
        .set_at(
            TinyDoc {
                version: 1,
                body: "this body pushes the value over the quota".into(),
            },
            t0,
        )
        .unwrap();
    engine.pump(t0 + WINDOW);

    assert_eq!(engine.status(), SaveStatus::Error);
    assert!(engine.last_error().is_some());
    // The rejected mutation stays visible locally.
    assert!(engine.get().body.starts_with("this body"));

    // The user trims the record; the explicit flush lands and clears the
    // error.
    engine
        .set_at(
            TinyDoc {
                version: 1,
                body: "short".into(),
            },
            t0 + Duration::from_secs(1),
        )
        .unwrap();
    assert!(engine.flush_at(t0 + Duration::from_secs(1)).unwrap());
    assert_eq!(engine.status(), SaveStatus::Saved);
    assert_eq!(engine.last_error(), None);
}

#[test]
fn verification_failure_is_distinct_from_save_failure() {
    let store = MemoryStore::new();
    let mut engine = open(&store);
    let t0 = Instant::now();

    store.truncate_writes(true);
    engine.set_at(named("to verify"), t0).unwrap();
    let err = engine.flush_at(t0 + Duration::from_millis(1)).unwrap_err();
    assert!(matches!(err, FlushError::VerificationFailed { .. }));

    // Recovery path: reload resolves from the durable value.
    store.truncate_writes(false);
    store
        .save(KEY, &serde_json::to_string(&named("authoritative")).unwrap())
        .unwrap();
    engine.reload().unwrap();
    assert_eq!(engine.get().meta.location.as_deref(), Some("authoritative"));
    assert_eq!(engine.status(), SaveStatus::Idle);
}

#[test]
fn teardown_flushes_pending_write_exactly_once() {
    let store = MemoryStore::new();
    let mut alpha = open(&store);
    let mut beta = open(&store);
    let t0 = Instant::now();

    alpha.set_at(named("W"), t0).unwrap();

    // Alpha has a pending write; beta does not.
    assert!(alpha.teardown().unwrap());
    assert!(!beta.teardown().unwrap());
    // Second teardown of the same engine is a no-op.
    assert!(!alpha.teardown().unwrap());

    assert_eq!(store.save_count(), 1);
    let stored: AllotmentRecord =
        serde_json::from_str(&store.load(KEY).unwrap().unwrap()).unwrap();
    assert_eq!(stored.meta.location.as_deref(), Some("W"));
}

#[test]
fn teardown_never_overwrites_a_newer_foreign_value() {
    let store = MemoryStore::new();
    let mut alpha = open(&store);
    let mut beta = open(&store);
    let t0 = Instant::now();

    // Alpha's Y is pending when beta's Z becomes durable; alpha tears down
    // without ever pumping the queued notification.
    alpha.set_at(named("Y"), t0).unwrap();
    beta.set_at(named("Z"), t0 + Duration::from_millis(10)).unwrap();
    beta.flush_at(t0 + Duration::from_millis(20)).unwrap();

    assert!(!alpha.teardown().unwrap());

    let stored: AllotmentRecord =
        serde_json::from_str(&store.load(KEY).unwrap().unwrap()).unwrap();
    assert_eq!(stored.meta.location.as_deref(), Some("Z"));
    assert_eq!(store.save_count(), 1);
}

#[test]
fn torn_down_engine_no_longer_hears_changes() {
    let store = MemoryStore::new();
    let mut alpha = open(&store);
    let mut beta = open(&store);
    let t0 = Instant::now();

    beta.teardown().unwrap();

    alpha.set_at(named("after beta left"), t0).unwrap();
    alpha.pump(t0 + WINDOW);
    beta.pump(t0 + WINDOW + Duration::from_millis(10));

    // Beta kept its pre-teardown record.
    assert_eq!(beta.get().meta.location, None);
}

#[tokio::test]
async fn driven_engines_converge_in_real_time() {
    // One real-time test with short windows and generous margins; everything
    // else in this suite is deterministic.
    let config = EngineConfig {
        debounce_window_ms: 30,
        saved_decay_ms: 100,
        sync_flag_window_ms: 100,
        echo_ttl_ms: 200,
    };
    let store = MemoryStore::new();
    let (mut alpha, _) = RecordEngine::open(
        KEY,
        Arc::new(store.new_context()),
        Box::new(AllotmentRecord::validator()),
        AllotmentRecord::empty("Shared Plot"),
        config.clone(),
    );
    let (mut beta, _) = RecordEngine::open(
        KEY,
        Arc::new(store.new_context()),
        Box::new(AllotmentRecord::validator()),
        AllotmentRecord::empty("Shared Plot"),
        config,
    );

    alpha.set(named("driven write")).unwrap();

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let alpha_task = tokio::spawn(async move { alpha.drive(shutdown_rx).await });

    // Give the debounced write and beta's pump ample real time.
    tokio::time::sleep(Duration::from_millis(300)).await;
    beta.pump(Instant::now());

    assert_eq!(
        beta.get().meta.location.as_deref(),
        Some("driven write")
    );

    shutdown_tx.send(true).unwrap();
    let driven = tokio::time::timeout(Duration::from_secs(5), alpha_task)
        .await
        .expect("drive did not shut down")
        .expect("drive task panicked")
        .expect("teardown failed");
    // The write already fired during the debounce window, so teardown had
    // nothing left to flush.
    assert!(!driven);
    assert_eq!(store.save_count(), 1);
}
