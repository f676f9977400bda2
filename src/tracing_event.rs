//! The out-of-band tracing event: on a replay-side failure, raises a user
//! trace event in the target database from a *fresh* connection, never the
//! worker's own (a same-connection call after a failure risks contaminating
//! transaction/session state).

use crate::config::EngineConfig;
use crate::errors::Result;
use crate::pool::create_pool;

const MAX_PAYLOAD_BYTES: usize = 8000;

#[derive(Debug, Clone, Copy)]
pub(crate) enum TraceEventKind {
    Timeout = 82,
    Error = 83,
}

/// Opens a throwaway connection, raises the event, and pool-clears the
/// connection afterward. Failures of the tracing call itself are logged
/// and swallowed; they must never affect the replay.
pub(crate) async fn raise(
    config: &EngineConfig,
    kind: TraceEventKind,
    database: &str,
    event_sequence: u64,
    error_message: &str,
    command_text: &str,
) {
    if let Err(e) = try_raise(
        config,
        kind,
        database,
        event_sequence,
        error_message,
        command_text,
    )
    .await
    {
        log::warn!("failed to raise out-of-band trace event: {e}");
    }
}

async fn try_raise(
    config: &EngineConfig,
    kind: TraceEventKind,
    database: &str,
    event_sequence: u64,
    error_message: &str,
    command_text: &str,
) -> Result<()> {
    let pool = create_pool(&config.connection_string, None)?;
    let mut conn = pool.get().await?;

    let userinfo = format!("{:?}", kind);
    let userinfo = &userinfo[..userinfo.len().min(128)];
    let userdata = build_payload(database, event_sequence, error_message, command_text);

    conn.execute(
        "EXEC sp_trace_generateevent @eventid = @P1, @userinfo = @P2, @userdata = @P3",
        &[&(kind as i32), &userinfo, &userdata.as_slice()],
    )
    .await?;

    drop(deadpool::managed::Object::take(conn));
    Ok(())
}

/// UTF-16LE-encodes the event payload and truncates it to at most 8000
/// bytes, always on a code-unit boundary.
fn build_payload(
    database: &str,
    event_sequence: u64,
    error_message: &str,
    command_text: &str,
) -> Vec<u8> {
    let text = format!(
        "database={database};event_sequence={event_sequence};error={error_message};command={command_text}"
    );
    let mut bytes: Vec<u8> = text
        .encode_utf16()
        .flat_map(|unit| unit.to_le_bytes())
        .collect();
    let truncate_to = MAX_PAYLOAD_BYTES - (MAX_PAYLOAD_BYTES % 2);
    bytes.truncate(truncate_to);
    bytes
}
