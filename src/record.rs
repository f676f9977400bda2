//! The immutable values that flow from the (external) dispatcher into a
//! [`crate::worker::Worker`], and the pure classification the normalizer
//! derives from them.

use std::time::SystemTime;

/// A single captured command, as delivered by the dispatcher.
///
/// The engine reads no fields beyond these; it never mutates a record after
/// construction.
#[derive(Debug, Clone)]
pub struct CommandRecord {
    pub session_id: u64,
    pub app_name: String,
    pub database: String,
    pub text: String,
    /// Monotonic within a session.
    pub event_sequence: u64,
    /// Milliseconds from the worker's anchor time to the moment this
    /// command should be re-executed. `None` means "as soon as possible".
    pub replay_offset_ms: Option<i64>,
    pub original_start_time: SystemTime,
}

/// The six command kinds the normalizer must recognize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Regular,
    Prepare,
    Execute,
    Unprepare,
    ResetConn,
    ResetConnNonpooled,
}

/// The pure-function result of classifying a [`CommandRecord`]'s text.
///
/// For [`CommandKind::Prepare`], [`CommandKind::Execute`], and
/// [`CommandKind::Unprepare`], `normalized_text` contains the sentinel `§`
/// at the single position where the server-assigned handle must be
/// substituted, and `source_handle_id` carries the source-side handle
/// observed in the capture.
#[derive(Debug, Clone)]
pub struct NormalizedCommand {
    pub kind: CommandKind,
    pub normalized_text: String,
    pub source_handle_id: Option<i32>,
}

impl NormalizedCommand {
    pub fn regular(text: impl Into<String>) -> Self {
        Self {
            kind: CommandKind::Regular,
            normalized_text: text.into(),
            source_handle_id: None,
        }
    }
}

/// The sentinel substituted with the server-assigned handle, as a decimal
/// string, at the single position the normalizer marks. Only the first
/// occurrence is ever substituted.
pub const HANDLE_SENTINEL: char = '§';

/// Substitutes [`HANDLE_SENTINEL`] with `handle`, replacing only the first
/// occurrence as spec'd.
pub(crate) fn substitute_handle(normalized_text: &str, handle: i32) -> String {
    match normalized_text.find(HANDLE_SENTINEL) {
        Some(pos) => {
            let mut out = String::with_capacity(normalized_text.len() + 8);
            out.push_str(&normalized_text[..pos]);
            out.push_str(&handle.to_string());
            out.push_str(&normalized_text[pos + HANDLE_SENTINEL.len_utf8()..]);
            out
        }
        None => normalized_text.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_only_first_sentinel() {
        let text = "EXEC § params § more";
        assert_eq!(substitute_handle(text, 42), "EXEC 42 params § more");
    }

    #[test]
    fn leaves_text_unchanged_when_no_sentinel() {
        let text = "SELECT 1";
        assert_eq!(substitute_handle(text, 42), "SELECT 1");
    }
}
