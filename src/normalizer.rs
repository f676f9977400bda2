//! The command-text normalizer.
//!
//! The real normalizer is an external collaborator: a production deployment
//! has its own, tuned to the exact shape of the capture it's replaying.
//! This module only defines the contract the worker loop depends on, plus a
//! reference implementation good enough to drive this crate's own tests.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::record::{CommandKind, NormalizedCommand};

/// A pure function from captured command text to its [`NormalizedCommand`].
pub trait Normalizer: Send + Sync {
    fn normalize(&self, text: &str) -> NormalizedCommand;
}

static PREPARE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)^\s*exec(?:ute)?\s+sp_prepare\s+(\d+)\s*,(.*)$").unwrap());
static EXECUTE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)^\s*exec(?:ute)?\s+sp_execute\s+(\d+)\s*(,(.*))?$").unwrap());
static UNPREPARE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)^\s*exec(?:ute)?\s+sp_unprepare\s+(\d+)\s*$").unwrap());
static RESET_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)^\s*reset\s+connection\s*$").unwrap());
static RESET_NONPOOLED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)^\s*reset\s+connection\s+nonpooled\s*$").unwrap());

/// A regex-based reference [`Normalizer`] that recognizes the
/// `sp_prepare`/`sp_execute`/`sp_unprepare` family and the two
/// reset-connection forms emitted by SQL Server trace captures; everything
/// else is [`CommandKind::Regular`].
#[derive(Debug, Default, Clone, Copy)]
pub struct RegexNormalizer;

impl Normalizer for RegexNormalizer {
    fn normalize(&self, text: &str) -> NormalizedCommand {
        if RESET_NONPOOLED_RE.is_match(text) {
            return NormalizedCommand {
                kind: CommandKind::ResetConnNonpooled,
                normalized_text: text.to_owned(),
                source_handle_id: None,
            };
        }
        if RESET_RE.is_match(text) {
            return NormalizedCommand {
                kind: CommandKind::ResetConn,
                normalized_text: text.to_owned(),
                source_handle_id: None,
            };
        }
        if let Some(caps) = PREPARE_RE.captures(text) {
            let handle = caps[1].parse().unwrap_or_default();
            // sp_prepare returns its handle through an OUTPUT parameter, not
            // a result row; capture it into a local and select it back so
            // the call is scalar-returning like the other dispatch kinds.
            let rest = &caps[2];
            return NormalizedCommand {
                kind: CommandKind::Prepare,
                normalized_text: format!(
                    "DECLARE @sqlreplay_handle int; EXEC sp_prepare @sqlreplay_handle OUTPUT,{rest}; SELECT @sqlreplay_handle;"
                ),
                source_handle_id: Some(handle),
            };
        }
        if let Some(caps) = EXECUTE_RE.captures(text) {
            let handle = caps[1].parse().unwrap_or_default();
            let rest = caps.get(3).map(|m| m.as_str()).unwrap_or_default();
            return NormalizedCommand {
                kind: CommandKind::Execute,
                normalized_text: format!("EXEC sp_execute §{}", rest),
                source_handle_id: Some(handle),
            };
        }
        if let Some(caps) = UNPREPARE_RE.captures(text) {
            let handle = caps[1].parse().unwrap_or_default();
            return NormalizedCommand {
                kind: CommandKind::Unprepare,
                normalized_text: "EXEC sp_unprepare §".to_owned(),
                source_handle_id: Some(handle),
            };
        }
        NormalizedCommand::regular(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("SELECT 1", CommandKind::Regular; "regular select")]
    #[test_case("reset connection", CommandKind::ResetConn; "reset connection")]
    #[test_case("reset connection nonpooled", CommandKind::ResetConnNonpooled; "reset connection nonpooled")]
    #[test_case("exec sp_prepare 7, N'@p int', N'select @p'", CommandKind::Prepare; "prepare")]
    #[test_case("exec sp_execute 7, 1", CommandKind::Execute; "execute")]
    #[test_case("exec sp_unprepare 7", CommandKind::Unprepare; "unprepare")]
    fn classifies_kind(text: &str, expected: CommandKind) {
        let normalized = RegexNormalizer.normalize(text);
        assert_eq!(normalized.kind, expected);
    }

    #[test]
    fn prepare_carries_source_handle() {
        let normalized = RegexNormalizer.normalize("exec sp_prepare 7, N'@p int', N'select @p'");
        assert_eq!(normalized.source_handle_id, Some(7));
    }

    #[test]
    fn prepare_normalizes_to_a_scalar_returning_select() {
        let normalized = RegexNormalizer.normalize("exec sp_prepare 7, N'@p int', N'select @p'");
        assert!(normalized.normalized_text.contains("OUTPUT"));
        assert!(normalized.normalized_text.trim_end().ends_with("SELECT @sqlreplay_handle;"));
    }
}
