//! Schedule planning tests across a running cluster.
//!
//! Only the leader turns due schedules into jobs, so a due schedule yields one
//! job per occurrence no matter how many coordinators are running.


use std::sync::Arc;
use std::time::Duration;

use baton::scheduler::{CronSchedule, IntervalSchedule, Job, JobStatus, ScheduleType};
use baton::store::{CronScheduleStore, IntervalScheduleStore, JobStore};
use baton::transport::messages::JobDispatchMessage;
use baton::transport::Transport;
use chrono::Utc;
use test_harness::{wait_until, TestCluster};
use uuid::Uuid;

/// Jobs produced by one schedule, in any live status.
async fn jobs_for_schedule(jobs: &Arc<dyn JobStore>, schedule_id: Uuid) -> Vec<Job> {
    let mut found = Vec::new();
    for status in [
        JobStatus::Pending,
        JobStatus::Dispatched,
        JobStatus::Running,
        JobStatus::Completed,
    ] {
        let batch = jobs.get_by_status(status, 1000).await.unwrap();
        found.extend(batch.into_iter().filter(|j| j.schedule_id == Some(schedule_id)));
    }
    found
}

/// Test 1: A due interval schedule is planned once and advanced
#[tokio::test]
async fn test_interval_schedule_planned_once_per_period() {
    let cluster = TestCluster::new(3).await;
    cluster
        .wait_for_leader(Duration::from_secs(5))
        .await
        .expect("Leader should be elected");

    let schedule = IntervalSchedule::new("hourly-report", Duration::from_secs(3600), "report", "default")
        .with_next_run(Utc::now());
    let schedule_id = schedule.id;
    cluster.stores.interval_schedules.add(schedule).await.unwrap();

    let jobs = &cluster.stores.jobs;
    let planned = wait_until(Duration::from_secs(5), || async move {
        !jobs_for_schedule(jobs, schedule_id).await.is_empty()
    })
    .await;
    assert!(planned, "Due schedule should produce a job");

    // Several more scan rounds must not plan the same period again.
    tokio::time::sleep(Duration::from_millis(500)).await;
    let planned = jobs_for_schedule(jobs, schedule_id).await;
    assert_eq!(planned.len(), 1, "One job per period");
    assert_eq!(planned[0].schedule_type, Some(ScheduleType::Interval));
    assert_eq!(planned[0].job_type, "report");

    let stored = IntervalScheduleStore::get(cluster.stores.interval_schedules.as_ref(), schedule_id)
        .await
        .unwrap()
        .unwrap();
    assert!(stored.last_run_time.is_some());
    let next = stored.next_run_time.expect("Schedule should have a next run");
    assert!(next > Utc::now() + chrono::Duration::minutes(59));

    cluster.shutdown().await;
}

/// Test 2: A per-second cron schedule keeps producing jobs
#[tokio::test]
async fn test_cron_schedule_produces_jobs() {
    let cluster = TestCluster::new(2).await;
    cluster
        .wait_for_leader(Duration::from_secs(5))
        .await
        .expect("Leader should be elected");

    let schedule = CronSchedule::new("ticker", "* * * * * *", "tick", "default")
        .with_next_run(Utc::now());
    let schedule_id = schedule.id;
    cluster.stores.cron_schedules.add(schedule).await.unwrap();

    let jobs = &cluster.stores.jobs;
    let produced = wait_until(Duration::from_secs(5), || async move {
        jobs_for_schedule(jobs, schedule_id).await.len() >= 2
    })
    .await;
    assert!(produced, "Cron schedule should fire repeatedly");

    let planned = jobs_for_schedule(jobs, schedule_id).await;
    assert!(planned
        .iter()
        .all(|j| j.schedule_type == Some(ScheduleType::Cron)));

    let stored = CronScheduleStore::get(cluster.stores.cron_schedules.as_ref(), schedule_id)
        .await
        .unwrap()
        .unwrap();
    assert!(stored.next_run_time.unwrap() > stored.last_run_time.unwrap());

    cluster.shutdown().await;
}

/// Test 3: Disabled schedules are never planned
#[tokio::test]
async fn test_disabled_schedule_is_skipped() {
    let cluster = TestCluster::new(2).await;
    cluster
        .wait_for_leader(Duration::from_secs(5))
        .await
        .expect("Leader should be elected");

    let mut schedule = IntervalSchedule::new("paused", Duration::from_secs(1), "noop", "default")
        .with_next_run(Utc::now());
    schedule.enabled = false;
    let schedule_id = schedule.id;
    cluster.stores.interval_schedules.add(schedule).await.unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(jobs_for_schedule(&cluster.stores.jobs, schedule_id)
        .await
        .is_empty());

    cluster.shutdown().await;
}

/// Test 4: Planned jobs reach workers with the schedule's payload
#[tokio::test]
async fn test_planned_job_dispatched_to_queue() {
    let cluster = TestCluster::new(2).await;
    cluster
        .wait_for_leader(Duration::from_secs(5))
        .await
        .expect("Leader should be elected");

    let worker = cluster.client();
    let mut dispatches = worker
        .subscribe_with_group(&cluster.channels.job_dispatch("reports"), "workers", "worker-1")
        .await
        .unwrap();

    let schedule = CronSchedule::new("nightly", "0 0 * * *", "export", "reports")
        .with_arguments(r#"{"format":"csv"}"#)
        .with_next_run(Utc::now());
    cluster.stores.cron_schedules.add(schedule).await.unwrap();

    let envelope = tokio::time::timeout(Duration::from_secs(5), dispatches.recv())
        .await
        .expect("Dispatch should arrive")
        .expect("Subscription should stay open");
    let message: JobDispatchMessage = serde_json::from_str(&envelope.payload).unwrap();
    assert_eq!(message.job_type, "export");
    assert_eq!(message.arguments_json, r#"{"format":"csv"}"#);
    assert_eq!(message.retry_count, 0);

    let job = cluster.stores.jobs.get(message.job_id).await.unwrap().unwrap();
    assert_eq!(job.execution_id, Some(message.execution_id));
    assert_eq!(job.queue, "reports");

    cluster.shutdown().await;
}
