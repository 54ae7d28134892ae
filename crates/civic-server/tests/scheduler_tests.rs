//! Scheduler tick tests
//!
//! Ticks are driven with explicit timestamps so due windows are exact.

mod common;

use chrono::{DateTime, TimeZone, Utc};
use civic_common::JobMode;
use civic_server::admin::{AdminError, RunNowRequest};
use civic_server::ingest::{Adapter, JobPhase};
use civic_server::models::{RunStatus, TriggeredBy};
use common::*;
use std::sync::Arc;

fn at(hour: u32, minute: u32, second: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, hour, minute, second).unwrap()
}

#[tokio::test]
async fn test_first_tick_only_opens_the_window() {
    let h = harness(
        config_with(vec![job("ca_on", "scripted", JobMode::Daily, Some("* * * * *"))]),
        vec![scripted("scripted", vec![])],
    )
    .await;
    let mut scheduler = h.services.scheduler();

    let report = scheduler.tick(at(6, 0, 30)).await;
    assert_eq!(report.evaluated, 1);
    assert!(report.dispatched.is_empty());

    let report = scheduler.tick(at(6, 1, 30)).await;
    assert_eq!(report.dispatched.len(), 1);
    assert_eq!(report.dispatched[0].0, "ca_on");
    assert_eq!(h.services.metrics.scheduler_ticks(), 2);
}

#[tokio::test]
async fn test_due_job_is_dispatched_once_per_window() {
    let h = harness(
        config_with(vec![job("ca_on", "scripted", JobMode::Daily, Some("0 6 * * *"))]),
        vec![scripted("scripted", vec![Ok(politician("a", "A"))])],
    )
    .await;
    let mut scheduler = h.services.scheduler();

    scheduler.tick(at(5, 59, 0)).await;
    let report = scheduler.tick(at(6, 0, 0)).await;
    assert_eq!(report.dispatched.len(), 1);
    let run_id = report.dispatched[0].1;

    eventually(|| {
        let journal = h.services.journal.clone();
        async move {
            journal
                .get_run(run_id)
                .await
                .unwrap()
                .map(|run| run.status.is_terminal())
                .unwrap_or(false)
        }
    })
    .await;

    let run = h.services.journal.get_run(run_id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Success);
    assert_eq!(run.triggered_by, TriggeredBy::Scheduler);

    // The same due time is never acted on twice.
    let report = scheduler.tick(at(6, 1, 0)).await;
    assert!(report.dispatched.is_empty());
    assert_eq!(scheduler.phase("ca_on"), JobPhase::Idle);
}

#[tokio::test]
async fn test_missed_windows_are_not_backfilled() {
    let h = harness(
        config_with(vec![job("ca_on", "scripted", JobMode::Daily, Some("*/5 * * * *"))]),
        vec![scripted("scripted", vec![])],
    )
    .await;
    let mut scheduler = h.services.scheduler();

    scheduler.tick(at(6, 0, 30)).await;
    // Several due times fall into one long window; one run covers them.
    let report = scheduler.tick(at(7, 0, 30)).await;
    assert_eq!(report.dispatched.len(), 1);
}

#[tokio::test]
async fn test_active_run_skips_the_due_tick() {
    let h = harness(
        config_with(vec![job("ca_on", "stalled", JobMode::Daily, Some("* * * * *"))]),
        vec![stalled("stalled", vec![])],
    )
    .await;
    let run_id = h
        .services
        .admin
        .run_now("alice", "ca_on", RunNowRequest::default())
        .await
        .unwrap();
    let mut scheduler = h.services.scheduler();

    scheduler.tick(at(6, 0, 30)).await;
    let report = scheduler.tick(at(6, 1, 30)).await;
    assert!(report.dispatched.is_empty());
    assert_eq!(report.skipped_locked, vec!["ca_on".to_string()]);
    assert_eq!(scheduler.phase("ca_on"), JobPhase::Due);

    h.services.dispatcher.cancel(run_id);
    eventually(|| {
        let journal = h.services.journal.clone();
        async move { journal.active_run("ca_on").await.unwrap().is_none() }
    })
    .await;

    let report = scheduler.tick(at(6, 2, 30)).await;
    assert_eq!(report.dispatched.len(), 1);
    assert_eq!(scheduler.phase("ca_on"), JobPhase::Dispatched);

    let scheduled = report.dispatched[0].1;
    h.services.dispatcher.cancel(scheduled);
}

#[tokio::test]
async fn test_bootstrap_and_disabled_jobs_are_never_scheduled() {
    let mut bootstrap = job("ca_on_bootstrap", "scripted", JobMode::Bootstrap, None);
    // Even a stray schedule does not make a bootstrap job schedulable.
    bootstrap.schedule = Some("* * * * *".to_string());
    let mut disabled = job("ca_bc", "scripted", JobMode::Daily, Some("* * * * *"));
    disabled.enabled = false;

    let adapter = Arc::new(ScriptedAdapter::new("scripted", vec![]));
    let h = harness(
        config_with(vec![bootstrap, disabled]),
        vec![adapter.clone() as Arc<dyn Adapter>],
    )
    .await;
    let mut scheduler = h.services.scheduler();

    scheduler.tick(at(6, 0, 30)).await;
    let report = scheduler.tick(at(6, 1, 30)).await;
    assert_eq!(report.evaluated, 0);
    assert!(report.dispatched.is_empty());
    assert_eq!(adapter.fetches(), 0);
}

#[tokio::test]
async fn test_toggle_is_picked_up_on_next_tick() {
    let h = harness(
        config_with(vec![job("ca_on", "scripted", JobMode::Daily, Some("* * * * *"))]),
        vec![scripted("scripted", vec![])],
    )
    .await;
    let mut scheduler = h.services.scheduler();

    scheduler.tick(at(6, 0, 30)).await;
    h.services
        .admin
        .toggle_job("alice", "ca_on", false)
        .await
        .unwrap();

    let report = scheduler.tick(at(6, 1, 30)).await;
    assert_eq!(report.evaluated, 0);
    assert!(report.dispatched.is_empty());
}

#[tokio::test]
async fn test_invalid_schedule_is_reported_not_fatal() {
    let h = harness(
        config_with(vec![
            job("broken", "scripted", JobMode::Daily, Some("not a cron")),
            job("ca_on", "scripted", JobMode::Daily, Some("* * * * *")),
        ]),
        vec![scripted("scripted", vec![])],
    )
    .await;
    let mut scheduler = h.services.scheduler();

    scheduler.tick(at(6, 0, 30)).await;
    let report = scheduler.tick(at(6, 1, 30)).await;
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].0, "broken");
    assert_eq!(report.dispatched.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_tick_and_run_now_race_for_one_lock() {
    for _ in 0..20 {
        let h = harness(
            config_with(vec![job("ca_on", "stalled", JobMode::Daily, Some("0 6 * * *"))]),
            vec![stalled("stalled", vec![politician("a", "A")])],
        )
        .await;
        let mut scheduler = h.services.scheduler();
        scheduler.tick(at(5, 59, 0)).await;

        let admin = h.services.admin.clone();
        let manual = tokio::spawn(async move {
            admin.run_now("alice", "ca_on", RunNowRequest::default()).await
        });
        let report = scheduler.tick(at(6, 0, 0)).await;
        let manual = manual.await.unwrap();

        let winners = report.dispatched.len() + usize::from(manual.is_ok());
        assert_eq!(winners, 1, "tick {report:?}, run_now {manual:?}");
        if manual.is_err() {
            assert!(matches!(manual, Err(AdminError::JobLocked { .. })));
        } else {
            assert_eq!(report.skipped_locked, vec!["ca_on".to_string()]);
        }

        let (_, total) = h.services.journal.list_runs("ca_on", 10, 0).await.unwrap();
        assert_eq!(total, 1);
        h.services.dispatcher.shutdown(std::time::Duration::from_millis(10)).await;
    }
}
