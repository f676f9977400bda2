//! Replays a small, hand-written capture for a single session against a
//! live target. Point `DATABASE_URL` at a real SQL Server instance before
//! running: this talks to a real connection, it's not a unit test.
//!
//! ```text
//! DATABASE_URL="server=tcp:localhost,1433;user=sa;password=..." \
//!     cargo run --example replay_session
//! ```

use std::sync::Arc;
use std::time::SystemTime;

use sqlreplay_worker::{CommandRecord, ConfigBuilder, Worker};

#[tokio::main]
async fn main() {
    pretty_env_logger::init();

    let connection_string =
        std::env::var("DATABASE_URL").expect("DATABASE_URL must point at a SQL Server instance");

    let config = Arc::new(
        ConfigBuilder::new()
            .connection_string(connection_string)
            .display_worker_stats(true)
            .worker_stats_command_count(1)
            .build()
            .expect("valid configuration"),
    );

    let worker = Worker::new("demo-session-1", config);

    let commands = [
        ("master", "SELECT 1", Some(0)),
        ("master", "exec sp_prepare 1, N'@n int', N'SELECT @n'", Some(50)),
        ("master", "exec sp_execute 1, 42", Some(100)),
        ("master", "exec sp_unprepare 1", Some(150)),
        ("master", "reset connection", Some(200)),
    ];

    for (database, text, offset_ms) in commands {
        worker.append(CommandRecord {
            session_id: 1,
            app_name: "replay_session demo".to_owned(),
            database: database.to_owned(),
            text: text.to_owned(),
            event_sequence: worker.executed_count(),
            replay_offset_ms: offset_ms,
            original_start_time: SystemTime::now(),
        });
    }

    // Give the background task time to drain the queue before tearing it
    // down; a real dispatcher instead tracks completion via its own
    // bookkeeping (e.g. the capture's last event per session).
    tokio::time::sleep(std::time::Duration::from_millis(500)).await;

    worker.dispose().await;
    log::info!("executed {} commands", worker.executed_count());
}
