//! End-to-end scenarios through the engine

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use tempfile::TempDir;
use tokio::sync::mpsc;

use vitalis_core::{
    CoreError, DayKey, LocalCalendar, ManualClock, Metric, MockHealthProvider, QuestCompletion,
    SleepSession,
};
use vitalis_crypto::{KeyOrigin, MemoryCredentialStore};
use vitalis_node::{EngineConfig, EngineError, WellnessEngine};
use vitalis_storage::StorageError;
use vitalis_sync::{SyncConfig, SyncError};

fn at(d: u32, h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, d, h, m, 0).unwrap()
}

fn day(d: u32) -> DayKey {
    DayKey::from_ymd(2024, 5, d).unwrap()
}

struct Harness {
    engine: WellnessEngine,
    clock: Arc<ManualClock>,
    mock: Arc<MockHealthProvider>,
}

fn harness(temp: &TempDir, now: DateTime<Utc>, mock: MockHealthProvider) -> Harness {
    harness_with(temp, now, mock, Arc::new(MemoryCredentialStore::new()))
}

fn harness_with(
    temp: &TempDir,
    now: DateTime<Utc>,
    mock: MockHealthProvider,
    credentials: Arc<MemoryCredentialStore>,
) -> Harness {
    vitalis_logging::init_testing();
    let clock = Arc::new(ManualClock::new(now));
    let mock = Arc::new(mock);
    let config = EngineConfig::with_data_dir(temp.path())
        .with_sync(SyncConfig::default().with_periodic_interval(None));
    let engine = WellnessEngine::builder(config)
        .with_clock(clock.clone())
        .with_calendar(LocalCalendar::utc())
        .with_mock_provider(mock.clone())
        .with_credentials(credentials)
        .build()
        .unwrap();
    Harness {
        engine,
        clock,
        mock,
    }
}

fn mock() -> MockHealthProvider {
    MockHealthProvider::new(LocalCalendar::utc())
}

#[tokio::test]
async fn window_backfill_finalizes_past_days() {
    let temp = TempDir::new().unwrap();
    let h = harness(&temp, at(20, 15, 30), mock());

    let report = h.engine.sync_needed(14).await.unwrap();
    assert_eq!(report.days_synced.len(), 14);
    assert_eq!(report.days_synced.first(), Some(&day(7)));
    assert_eq!(report.days_synced.last(), Some(&day(20)));

    let history = h.engine.history(100).await.unwrap();
    assert_eq!(history.len(), 14);
    for snapshot in &history {
        if snapshot.date == day(20) {
            assert!(!snapshot.finalized);
        } else {
            assert!(snapshot.finalized, "{} should be finalized", snapshot.date);
        }
    }
}

#[tokio::test]
async fn repeated_sync_is_idempotent() {
    let temp = TempDir::new().unwrap();
    let h = harness(&temp, at(20, 15, 30), mock());

    h.engine.sync_needed(14).await.unwrap();
    let first = h.engine.history(14).await.unwrap();

    let report = h.engine.sync_needed(14).await.unwrap();
    // Only today is stale once the past is finalized
    assert_eq!(report.days_synced, vec![day(20)]);

    let second = h.engine.history(14).await.unwrap();
    assert_eq!(first.len(), second.len());
    for (a, b) in first.iter().zip(&second) {
        assert!(a.same_values(b), "{} changed between passes", a.date);
    }
}

#[tokio::test]
async fn failing_hrv_leaves_one_unknown() {
    let temp = TempDir::new().unwrap();
    let h = harness(&temp, at(20, 15, 30), mock());
    h.mock.fail_metric_on(Metric::Hrv, day(12));

    let report = h.engine.sync_needed(14).await.unwrap();
    assert_eq!(report.failed_metrics, vec![(day(12), Metric::Hrv)]);

    let broken = h.engine.snapshot_for(day(12)).await.unwrap().unwrap();
    assert_eq!(broken.metrics.hrv_ms, None);
    assert!(broken.metrics.resting_heart_rate_bpm.is_some());
    assert!(broken.metrics.active_energy_kcal.is_some());
    assert!(broken.steps > 0);
    assert!(broken.sleep_minutes > 0);
    assert!(broken.finalized);

    let neighbour = h.engine.snapshot_for(day(13)).await.unwrap().unwrap();
    assert!(neighbour.metrics.hrv_ms.is_some());
}

#[tokio::test]
async fn snapshot_callbacks_stop_when_dropped() {
    let temp = TempDir::new().unwrap();
    let h = harness(&temp, at(20, 9, 0), mock());

    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscription = h
        .engine
        .on_snapshot_update(move |snapshot| {
            let _ = tx.send(snapshot.date);
        })
        .await
        .unwrap();

    h.engine.sync_latest().await.unwrap();
    let received = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap();
    assert_eq!(received, Some(day(20)));
    assert!(subscription.is_active());

    drop(subscription);
    h.engine.sync_latest().await.unwrap();
    let after = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await;
    assert!(!matches!(after, Ok(Some(_))));
}

#[tokio::test]
async fn oversized_window_is_an_error() {
    let temp = TempDir::new().unwrap();
    let h = harness(&temp, at(20, 15, 30), mock());

    let result = h.engine.sync_needed(u32::MAX).await;
    assert!(matches!(
        result,
        Err(EngineError::Sync(SyncError::Calendar(CoreError::WindowTooLarge { .. })))
    ));
    assert!(h.engine.latest_snapshot().await.unwrap().is_none());
}

#[tokio::test]
async fn energy_from_full_night_then_nap() {
    let temp = TempDir::new().unwrap();
    let sessions = vec![SleepSession::new(at(10, 0, 0), 480)];
    let h = harness(&temp, at(10, 8, 0), mock().with_sleep_sessions(sessions));

    assert_eq!(h.engine.energy_pct().await.unwrap(), None);

    h.engine.sync_latest().await.unwrap();
    assert_eq!(h.engine.energy_pct().await.unwrap(), Some(100.0));
    assert_eq!(h.engine.last_night_sleep_minutes().await.unwrap(), 480);

    h.clock.advance_minutes(60);
    let pct = h.engine.refresh_energy().await.unwrap().unwrap();
    assert!((pct - 97.0).abs() < 1e-9, "got {pct}");

    let crossing = h.engine.predict_energy_crossing(50.0).await.unwrap().unwrap();
    assert_eq!(crossing, at(10, 9, 0) + chrono::Duration::minutes(940));

    // A 48 minute nap is worth 10 points on top of the drained value
    h.clock.set(at(10, 14, 0));
    h.mock.add_sleep_session(SleepSession::new(at(10, 13, 0), 48));
    let pct = h.engine.refresh_energy().await.unwrap().unwrap();
    assert!((pct - 92.0).abs() < 1e-9, "got {pct}");
    assert_eq!(h.engine.energy_state().await.unwrap().accounted_nap_minutes, 48);
}

#[tokio::test]
async fn energy_resets_at_midnight() {
    let temp = TempDir::new().unwrap();
    let sessions = vec![SleepSession::new(at(10, 0, 0), 480)];
    let h = harness(&temp, at(10, 8, 0), mock().with_sleep_sessions(sessions));

    h.engine.sync_latest().await.unwrap();
    assert!(h.engine.energy_pct().await.unwrap().is_some());

    h.clock.set(at(11, 0, 30));
    assert_eq!(h.engine.refresh_energy().await.unwrap(), None);
    assert_eq!(h.engine.energy_state().await.unwrap().current_day, day(11));
}

#[tokio::test]
async fn seven_day_hydration_streak() {
    let temp = TempDir::new().unwrap();
    let h = harness(&temp, at(1, 9, 0), mock());
    let request = QuestCompletion::new("drink_2l", "Drink 2L", 2.0, 10, "hydration");

    let mut awarded_on = Vec::new();
    for d in 1..=7 {
        h.clock.set(at(d, 9, 0));
        let outcome = h.engine.complete_quest(&request).await.unwrap();
        assert_eq!(outcome.streak.count, d);
        if !outcome.badges_awarded.is_empty() {
            awarded_on.push((d, outcome.badges_awarded.clone()));
        }
    }
    assert_eq!(awarded_on, vec![(7, vec!["streak7_drink".to_string()])]);

    // Days 3-6 earn +2, day 7 earns +5
    assert_eq!(h.engine.points_for("hydration").await.unwrap(), 7 * 10 + 4 * 2 + 5);

    // Same day again: no new badge, streak unchanged
    let again = h.engine.complete_quest(&request).await.unwrap();
    assert_eq!(again.streak.count, 7);
    assert!(again.badges_awarded.is_empty());

    let badges = h.engine.badges().await.unwrap();
    assert_eq!(badges.iter().filter(|b| b.id == "streak7_drink").count(), 1);

    let log = h.engine.history_log(3).await.unwrap();
    assert_eq!(log[0].reward_points, 15);
    assert_eq!(log[1].reward_points, 15);
    assert_eq!(log[2].title, "Badge unlocked: streak7_drink");
    assert_eq!(log[2].reward_points, 0);

    let progress = h.engine.quest_progress("drink_2l", day(7)).await.unwrap().unwrap();
    assert!(progress.done);
    assert_eq!(progress.value, 2.0);
}

#[tokio::test]
async fn streak_restarts_after_gap() {
    let temp = TempDir::new().unwrap();
    let h = harness(&temp, at(1, 9, 0), mock());
    let request = QuestCompletion::new("walk", "Walk 5k", 5.0, 4, "movement");

    for d in 1..=6 {
        h.clock.set(at(d, 20, 0));
        h.engine.complete_quest(&request).await.unwrap();
    }
    assert_eq!(h.engine.streak("walk").await.unwrap().unwrap().count, 6);

    h.clock.set(at(7, 8, 0));
    assert_eq!(h.engine.complete_quest(&request).await.unwrap().streak.count, 7);
    assert_eq!(h.engine.complete_quest(&request).await.unwrap().streak.count, 7);

    h.clock.set(at(9, 8, 0));
    assert_eq!(h.engine.complete_quest(&request).await.unwrap().streak.count, 1);
}

#[tokio::test]
async fn invalid_completion_changes_nothing() {
    let temp = TempDir::new().unwrap();
    let h = harness(&temp, at(1, 9, 0), mock());

    let bad = QuestCompletion::new("drink_2l", "Drink 2L", f64::NAN, 10, "hydration");
    let err = h.engine.complete_quest(&bad).await.unwrap_err();
    assert!(matches!(err, EngineError::Storage(StorageError::Invalid(_))));

    assert!(h.engine.streaks().await.unwrap().is_empty());
    assert!(h.engine.points().await.unwrap().is_empty());
    assert!(h.engine.history_log(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn lost_key_is_reported_and_old_store_kept() {
    let temp = TempDir::new().unwrap();
    let credentials = Arc::new(MemoryCredentialStore::new());
    let request = QuestCompletion::new("drink_2l", "Drink 2L", 2.0, 10, "hydration");

    {
        let h = harness_with(&temp, at(1, 9, 0), mock(), credentials.clone());
        assert_eq!(h.engine.open_report().await.unwrap().key_origin, KeyOrigin::Created);
        h.engine.complete_quest(&request).await.unwrap();
    }

    credentials.fail_reads(true);
    {
        let h = harness_with(&temp, at(1, 10, 0), mock(), credentials.clone());
        let report = h.engine.open_report().await.unwrap();
        assert!(report.key_origin.is_data_loss());
        let moved = report.quarantined_file.expect("old database moved aside");
        assert!(moved.exists());
        assert!(h.engine.points().await.unwrap().is_empty());
        h.engine.complete_quest(&request).await.unwrap();
    }

    credentials.fail_reads(false);
    let h = harness_with(&temp, at(1, 11, 0), mock(), credentials);
    let report = h.engine.open_report().await.unwrap();
    assert_eq!(report.key_origin, KeyOrigin::Loaded);
    assert!(report.quarantined_file.is_none());
    assert_eq!(h.engine.points_for("hydration").await.unwrap(), 10);
}

#[tokio::test]
async fn start_and_stop_with_background_tasks() {
    let temp = TempDir::new().unwrap();
    let sessions = vec![SleepSession::new(at(10, 0, 0), 480)];
    let h = harness(&temp, at(10, 8, 0), mock().with_sleep_sessions(sessions));

    h.engine.start().await.unwrap();
    assert!(h.engine.is_started());
    assert_eq!(h.engine.history(14).await.unwrap().len(), 14);
    assert_eq!(h.engine.energy_pct().await.unwrap(), Some(100.0));

    h.engine.stop().await.unwrap();
    assert!(!h.engine.is_started());
}
