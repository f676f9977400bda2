//! End-to-end scenarios (S1-S6) exercised against a real SQL Server
//! instance. There's no in-memory fake for the TDS wire protocol a real
//! driver speaks, so these assume a live server reachable at
//! `DATABASE_URL` and are not meaningful to run without one.
//!
//! ```text
//! DATABASE_URL="server=tcp:localhost,1433;user=sa;password=..." cargo test --test worker_integration
//! ```

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use sqlreplay_worker::{CommandRecord, ConfigBuilder, Worker};

fn database_url() -> Option<String> {
    std::env::var("DATABASE_URL").ok()
}

fn record(database: &str, text: &str, offset_ms: Option<i64>, event_sequence: u64) -> CommandRecord {
    CommandRecord {
        session_id: 1,
        app_name: "worker_integration".to_owned(),
        database: database.to_owned(),
        text: text.to_owned(),
        event_sequence,
        replay_offset_ms: offset_ms,
        original_start_time: SystemTime::now(),
    }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(750)).await;
}

/// S1: Prepare/Execute/Unprepare round-trip: the server-assigned handle is
/// remapped transparently and the prepared map is empty again afterward.
#[tokio::test]
async fn s1_prepare_execute_unprepare_round_trip() {
    let Some(database_url) = database_url() else {
        return;
    };
    let config = Arc::new(
        ConfigBuilder::new()
            .connection_string(database_url)
            .build()
            .unwrap(),
    );
    let worker = Worker::new("s1", config);

    worker.append(record("master", "exec sp_prepare 7, N'@n int', N'select @n'", Some(0), 1));
    worker.append(record("master", "exec sp_execute 7, 1", Some(10), 2));
    worker.append(record("master", "exec sp_unprepare 7", Some(20), 3));
    settle().await;

    assert_eq!(worker.executed_count(), 3);
    worker.dispose().await;
}

/// S2: Execute against a handle the worker never Prepared: dropped
/// silently, no execution, no error.
#[tokio::test]
async fn s2_execute_against_unknown_handle_is_a_silent_noop() {
    let Some(database_url) = database_url() else {
        return;
    };
    let config = Arc::new(
        ConfigBuilder::new()
            .connection_string(database_url)
            .build()
            .unwrap(),
    );
    let worker = Worker::new("s2", config);

    worker.append(record("master", "exec sp_execute 9, 1", Some(0), 1));
    settle().await;

    assert_eq!(worker.executed_count(), 0);
    worker.dispose().await;
}

/// S3: A command scheduled 500ms out executes close to its offset, not
/// immediately and not wildly late.
#[tokio::test]
async fn s3_delay_accuracy_within_tolerance() {
    let Some(database_url) = database_url() else {
        return;
    };
    let config = Arc::new(
        ConfigBuilder::new()
            .connection_string(database_url)
            .build()
            .unwrap(),
    );
    let worker = Worker::new("s3", config);

    let started = SystemTime::now();
    worker.append(record("master", "SELECT 1", Some(500), 1));
    tokio::time::sleep(Duration::from_millis(700)).await;

    assert_eq!(worker.executed_count(), 1);
    let elapsed = started.elapsed().unwrap();
    assert!(elapsed >= Duration::from_millis(400));
    assert!(elapsed <= Duration::from_millis(900));
    worker.dispose().await;
}

/// S4: A worker that's badly behind its anchor executes immediately
/// instead of sleeping to catch up.
#[tokio::test]
async fn s4_falling_behind_executes_immediately() {
    let Some(database_url) = database_url() else {
        return;
    };
    let config = Arc::new(
        ConfigBuilder::new()
            .connection_string(database_url)
            .build()
            .unwrap(),
    );
    let worker = Worker::new("s4", config);

    // Anchor on a fast first command, then simulate having fallen behind by
    // sleeping past the skip threshold before enqueuing the next one.
    worker.append(record("master", "SELECT 1", Some(0), 1));
    tokio::time::sleep(Duration::from_millis(200)).await;
    worker.append(record("master", "SELECT 2", Some(500), 2));

    let started = SystemTime::now();
    settle().await;
    assert_eq!(worker.executed_count(), 2);
    // The second command must not have waited out its nominal offset.
    assert!(started.elapsed().unwrap() < Duration::from_secs(1));
    worker.dispose().await;
}

/// S5: A command whose driver call keeps timing out retries up to the
/// configured budget, then the worker moves on.
#[tokio::test]
async fn s5_timeout_retries_up_to_budget_then_continues() {
    let Some(database_url) = database_url() else {
        return;
    };
    let config = Arc::new(
        ConfigBuilder::new()
            .connection_string(database_url)
            .query_timeout_s(0)
            .timeout_retry_max(2)
            .stop_on_error(false)
            .build()
            .unwrap(),
    );
    let worker = Worker::new("s5", config);

    // query_timeout_s=0 forces every call through the Timeout path
    // regardless of what the server would have returned.
    worker.append(record("master", "WAITFOR DELAY '00:00:05'", Some(0), 1));
    worker.append(record("master", "SELECT 1", Some(10), 2));
    settle().await;

    // The timed-out command still increments executed_count once its
    // budget is exhausted; the following command executes.
    assert_eq!(worker.executed_count(), 2);
    worker.dispose().await;
}

/// S6: ResetConn closes and reopens the connection; the following Regular
/// command on a different database switches context first.
#[tokio::test]
async fn s6_reset_conn_then_database_switch() {
    let Some(database_url) = database_url() else {
        return;
    };
    let config = Arc::new(
        ConfigBuilder::new()
            .connection_string(database_url)
            .build()
            .unwrap(),
    );
    let worker = Worker::new("s6", config);

    worker.append(record("master", "reset connection", Some(0), 1));
    worker.append(record("tempdb", "SELECT DB_NAME()", Some(10), 2));
    settle().await;

    assert_eq!(worker.executed_count(), 1);
    worker.dispose().await;
}
