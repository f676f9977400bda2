//! The worker loop: one per replayed session, each owning exactly one
//! connection and a FIFO queue of the commands captured for that session.
//!
//! The background task that drains the queue self-parks when it runs dry
//! and is restarted by the next [`Worker::append`], holding at most one
//! live resource (the connection) and rebuilding the task on demand rather
//! than leaving it scheduled with nothing to do.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::classifier::{self, ErrorClass};
use crate::config::EngineConfig;
use crate::connection::{ConnectionManager, DEFAULT_APP_NAME};
use crate::errors::{Error, Result};
use crate::prepared::PreparedStatementMap;
use crate::record::{substitute_handle, CommandKind, CommandRecord, NormalizedCommand};
use crate::scheduler::DelayScheduler;
use crate::stats::ThroughputSampler;
use crate::tracing_event::{self, TraceEventKind};

/// The state only ever touched by whichever task currently owns the loop
/// (the running background task, or nobody while parked). Kept between the
/// two as an owned value behind a [`Mutex`] purely to move it safely across
/// task spawns; there is never real contention on it.
struct LoopState {
    scheduler: DelayScheduler,
    connections: ConnectionManager,
    prepared: PreparedStatementMap,
    stats: ThroughputSampler,
}

impl LoopState {
    fn new(config: &EngineConfig) -> Self {
        Self {
            scheduler: DelayScheduler::new(),
            connections: ConnectionManager::new(config),
            prepared: PreparedStatementMap::new(),
            stats: ThroughputSampler::new(),
        }
    }
}

struct WorkerInner {
    name: String,
    config: Arc<EngineConfig>,
    sender: mpsc::UnboundedSender<CommandRecord>,
    receiver: Mutex<mpsc::UnboundedReceiver<CommandRecord>>,
    state: Mutex<Option<LoopState>>,
    task: Mutex<Option<JoinHandle<()>>>,
    running: AtomicBool,
    stopped: AtomicBool,
    disposed: AtomicBool,
    queue_len: AtomicUsize,
    executed_count: AtomicU64,
}

/// A single session's replay worker: a FIFO queue plus the self-parking
/// task that drains it.
pub struct Worker {
    inner: Arc<WorkerInner>,
}

impl Worker {
    pub fn new(name: impl Into<String>, config: Arc<EngineConfig>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let state = LoopState::new(&config);
        let inner = Arc::new(WorkerInner {
            name: name.into(),
            config,
            sender,
            receiver: Mutex::new(receiver),
            state: Mutex::new(Some(state)),
            task: Mutex::new(None),
            running: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            queue_len: AtomicUsize::new(0),
            executed_count: AtomicU64::new(0),
        });
        Self { inner }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Number of commands that completed a driver round trip without an
    /// unclassified failure.
    pub fn executed_count(&self) -> u64 {
        self.inner.executed_count.load(Ordering::SeqCst)
    }

    pub fn queue_depth(&self) -> usize {
        self.inner.queue_len.load(Ordering::SeqCst)
    }

    /// Enqueues `command` and, if no background task is currently alive,
    /// spawns one. Never blocks: the queue is unbounded, matching the
    /// "append, don't replay inline" contract the dispatcher relies on.
    pub fn append(&self, command: CommandRecord) {
        if self.inner.stopped.load(Ordering::SeqCst) {
            log::warn!("worker {}: dropping command, already stopped", self.inner.name);
            return;
        }
        self.inner.queue_len.fetch_add(1, Ordering::SeqCst);
        if self.inner.sender.send(command).is_err() {
            // Receiver only disappears once `dispose` has torn the worker
            // down; an append racing that is a caller bug, not ours to fix.
            log::warn!("worker {}: append after receiver dropped", self.inner.name);
            return;
        }
        self.spawn_if_idle();
    }

    /// Ensures the background task is running even with nothing freshly
    /// enqueued, e.g. after a dispatcher reattaches a previously idle
    /// worker. Idempotent.
    pub fn start(&self) {
        self.spawn_if_idle();
    }

    fn spawn_if_idle(&self) {
        if !self.inner.running.swap(true, Ordering::SeqCst) {
            let inner = self.inner.clone();
            let handle = tokio::spawn(async move { run_loop(inner).await });
            // `task` is only ever written here, and only read back by
            // `dispose`, so a blocking-free try_lock always succeeds.
            if let Ok(mut slot) = self.inner.task.try_lock() {
                *slot = Some(handle);
            }
        }
    }

    /// Signals the worker to stop after its current command. Idempotent;
    /// does not wait for the task to actually exit (see [`Worker::dispose`]).
    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
    }

    /// Orderly shutdown: stop, let the task drain out, close the
    /// connection, and release the queue. Safe to call more than once.
    pub async fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.stop();

        let handle = self.inner.task.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                log::warn!("worker {}: background task panicked: {e}", self.inner.name);
            }
        }

        if let Some(mut state) = self.inner.state.lock().await.take() {
            state.connections.clear_pool().await;
        }
    }
}

/// What a dispatched command did, for the purposes of counting and
/// stats-sampling. `Skipped` covers reset commands (no row ever sent) and
/// `Execute`/`Unprepare` against a handle the worker never saw prepared.
enum DispatchOutcome {
    Executed,
    Skipped,
}

async fn run_loop(worker: Arc<WorkerInner>) {
    let Some(mut state) = worker.state.lock().await.take() else {
        // Another task already owns the state; this shouldn't happen since
        // `running` gates spawns, but fail safe rather than double-run.
        worker.running.store(false, Ordering::SeqCst);
        return;
    };

    loop {
        if worker.stopped.load(Ordering::SeqCst) {
            break;
        }

        let next = { worker.receiver.lock().await.try_recv() };
        match next {
            Ok(command) => {
                worker.queue_len.fetch_sub(1, Ordering::SeqCst);
                execute_with_retries(&worker, &mut state, command).await;
            }
            Err(mpsc::error::TryRecvError::Disconnected) => break,
            Err(mpsc::error::TryRecvError::Empty) => {
                worker.running.store(false, Ordering::SeqCst);
                // An `append` that ran concurrently with the store above may
                // have observed `running == true` (stale) and skipped
                // spawning a replacement task, trusting us to pick its
                // command up. Re-check before actually parking, and if we
                // find work, reclaim `running` ourselves rather than exit.
                let mut receiver = worker.receiver.lock().await;
                match receiver.try_recv() {
                    Ok(command) => {
                        worker.running.store(true, Ordering::SeqCst);
                        drop(receiver);
                        worker.queue_len.fetch_sub(1, Ordering::SeqCst);
                        execute_with_retries(&worker, &mut state, command).await;
                    }
                    Err(_) => {
                        drop(receiver);
                        break;
                    }
                }
            }
        }
    }

    *worker.state.lock().await = Some(state);
}

/// Runs one command through the delay scheduler, dispatch, and the
/// retry/classification policy. Retries are expressed as recursion on this
/// same async fn; boxed because an `async fn` can't otherwise recurse.
fn execute_with_retries<'a>(
    worker: &'a WorkerInner,
    state: &'a mut LoopState,
    command: CommandRecord,
) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
    Box::pin(async move { execute_attempt(worker, state, &command, 0, 0).await })
}

fn execute_attempt<'a>(
    worker: &'a WorkerInner,
    state: &'a mut LoopState,
    command: &'a CommandRecord,
    timeout_retry_count: u32,
    fail_retry_count: u32,
) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
    Box::pin(async move {
        state
            .scheduler
            .wait_for_offset(command.replay_offset_ms, &worker.stopped)
            .await;

        if worker.stopped.load(Ordering::SeqCst) {
            return;
        }

        let normalized = worker.config.normalizer.normalize(&command.text);

        match dispatch(worker, state, command, &normalized).await {
            Ok(DispatchOutcome::Executed) => {
                worker.executed_count.fetch_add(1, Ordering::SeqCst);
                if worker.config.display_worker_stats {
                    if let Some(avg) = state
                        .stats
                        .record_success(worker.config.worker_stats_command_count)
                    {
                        log::info!(
                            "worker {}: {:.1} cmd/s avg, queue_depth={}, event_sequence={}",
                            worker.name,
                            avg,
                            worker.queue_len.load(Ordering::SeqCst),
                            command.event_sequence
                        );
                    }
                }
            }
            Ok(DispatchOutcome::Skipped) => {}
            Err(error) => {
                handle_error(
                    worker,
                    state,
                    command,
                    error,
                    timeout_retry_count,
                    fail_retry_count,
                )
                .await;
            }
        }
    })
}

async fn handle_error(
    worker: &WorkerInner,
    state: &mut LoopState,
    command: &CommandRecord,
    error: Error,
    timeout_retry_count: u32,
    fail_retry_count: u32,
) {
    let verdict = classifier::classify(&worker.config, &error, timeout_retry_count, fail_retry_count);
    let class = *verdict.inner();
    let kind = match class {
        ErrorClass::Timeout => Some(TraceEventKind::Timeout),
        ErrorClass::DatabaseError => Some(TraceEventKind::Error),
        ErrorClass::Unclassified => None,
    };

    if let Some(kind) = kind {
        if worker.config.raise_errors_to_tracing {
            tracing_event::raise(
                &worker.config,
                kind,
                &command.database,
                command.event_sequence,
                &error.to_string(),
                &command.text,
            )
            .await;
        }
    }

    if class == ErrorClass::Unclassified {
        log::log!(
            worker.config.command_error_log_level,
            "worker {}: unclassified failure executing command {}: {error}",
            worker.name,
            command.event_sequence
        );
        state.connections.clear_pool().await;
        if worker.config.stop_on_error {
            worker.stopped.store(true, Ordering::SeqCst);
        }
        return;
    }

    if worker.config.stop_on_error {
        log::log!(
            worker.config.command_error_log_level,
            "worker {}: command {} failed, stopping ({error})",
            worker.name,
            command.event_sequence
        );
        state.connections.clear_pool().await;
        worker.stopped.store(true, Ordering::SeqCst);
        return;
    }

    if verdict.should_retry() {
        let (timeout_retry_count, fail_retry_count) = match class {
            ErrorClass::Timeout => (timeout_retry_count + 1, fail_retry_count),
            ErrorClass::DatabaseError => (timeout_retry_count, fail_retry_count + 1),
            ErrorClass::Unclassified => unreachable!("handled above"),
        };
        execute_attempt(worker, state, command, timeout_retry_count, fail_retry_count).await;
    } else {
        log::log!(
            worker.config.command_error_log_level,
            "worker {}: command {} failed, retries exhausted ({error})",
            worker.name,
            command.event_sequence
        );
        worker.executed_count.fetch_add(1, Ordering::SeqCst);
    }
}

async fn dispatch(
    worker: &WorkerInner,
    state: &mut LoopState,
    command: &CommandRecord,
    normalized: &NormalizedCommand,
) -> Result<DispatchOutcome> {
    let app_name = if worker.config.mimic_application_name && !command.app_name.is_empty() {
        command.app_name.as_str()
    } else {
        DEFAULT_APP_NAME
    };

    match normalized.kind {
        CommandKind::ResetConn => {
            state.connections.reset(app_name, &worker.stopped).await?;
            Ok(DispatchOutcome::Skipped)
        }
        CommandKind::ResetConnNonpooled => {
            state.connections.clear_pool().await;
            Ok(DispatchOutcome::Skipped)
        }
        CommandKind::Prepare => {
            let target_database = worker.config.target_database(&command.database).to_owned();
            state
                .connections
                .switch_database(&target_database, app_name, &worker.stopped)
                .await?;
            let timeout = Duration::from_secs(worker.config.query_timeout_s);
            let conn = state.connections.connection(app_name, &worker.stopped).await?;
            let row = tokio::time::timeout(timeout, async {
                let params: &[&dyn tiberius::ToSql] = &[];
                conn.query(&normalized.normalized_text, params).await?.into_row().await
            })
            .await
            .map_err(|_| Error::Timeout)??;

            if let (Some(row), Some(source_handle)) = (row, normalized.source_handle_id) {
                if let Some(server_handle) = row.get::<i32, _>(0) {
                    state.prepared.insert_if_absent(source_handle, server_handle);
                }
            }
            Ok(DispatchOutcome::Executed)
        }
        CommandKind::Execute | CommandKind::Unprepare => {
            let Some(source_handle) = normalized.source_handle_id else {
                return Ok(DispatchOutcome::Skipped);
            };
            let Some(server_handle) = state.prepared.get(source_handle) else {
                // Never prepared on this worker (or already unprepared): the
                // protocol has no recovery for this, so the command is
                // dropped rather than sent with a bogus handle.
                return Ok(DispatchOutcome::Skipped);
            };
            let text = substitute_handle(&normalized.normalized_text, server_handle);
            let target_database = worker.config.target_database(&command.database).to_owned();
            state
                .connections
                .switch_database(&target_database, app_name, &worker.stopped)
                .await?;
            run_command(worker, state, app_name, &text).await?;

            if normalized.kind == CommandKind::Unprepare {
                state.prepared.remove(source_handle);
            }
            Ok(DispatchOutcome::Executed)
        }
        CommandKind::Regular => {
            let target_database = worker.config.target_database(&command.database).to_owned();
            state
                .connections
                .switch_database(&target_database, app_name, &worker.stopped)
                .await?;
            run_command(worker, state, app_name, &normalized.normalized_text).await?;
            Ok(DispatchOutcome::Executed)
        }
    }
}

/// Runs `text` against the worker's connection. When `consume_results` is
/// set, drains every row of every result set (mirroring `ExecuteReader`
/// against a capture that expects rows back); otherwise fires it as a
/// non-query, discarding row counts.
async fn run_command(
    worker: &WorkerInner,
    state: &mut LoopState,
    app_name: &str,
    text: &str,
) -> Result<()> {
    let timeout = Duration::from_secs(worker.config.query_timeout_s);
    let conn = state.connections.connection(app_name, &worker.stopped).await?;

    if worker.config.consume_results {
        tokio::time::timeout(timeout, async {
            conn.simple_query(text).await?.into_results().await?;
            Ok::<_, Error>(())
        })
        .await
        .map_err(|_| Error::Timeout)??;
    } else {
        let params: &[&dyn tiberius::ToSql] = &[];
        tokio::time::timeout(timeout, conn.execute(text, params))
            .await
            .map_err(|_| Error::Timeout)??;
    }
    Ok(())
}
