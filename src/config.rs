//! The recognized configuration surface and its builder.
//!
//! A two-struct split: required fields are validated once, in
//! [`ConfigBuilder::build`]; everything else carries a documented default.

use std::collections::HashMap;
use std::sync::Arc;

use crate::errors::{Error, Result};
use crate::normalizer::{Normalizer, RegexNormalizer};

pub(crate) const DEFAULT_QUERY_TIMEOUT_S: u64 = 30;
pub(crate) const DEFAULT_FAIL_RETRY_MAX: u32 = 3;
pub(crate) const DEFAULT_TIMEOUT_RETRY_MAX: u32 = 3;
pub(crate) const DEFAULT_WORKER_STATS_COMMAND_COUNT: u64 = 1000;
/// The original implementation treats -2 as the sole timeout signal; other
/// drivers may reuse a different code, so this list is configurable but
/// defaults to exactly this.
pub(crate) const DEFAULT_TIMEOUT_CODES: &[i32] = &[-2];

/// The per-worker configuration surface: policy flags, retry budgets, and
/// the database-name translation table, shared (read-only) across every
/// worker a dispatcher spins up.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub(crate) connection_string: String,
    pub(crate) database_map: HashMap<String, String>,
    pub(crate) query_timeout_s: u64,
    pub(crate) fail_retry_max: u32,
    pub(crate) timeout_retry_max: u32,
    pub(crate) stop_on_error: bool,
    pub(crate) mimic_application_name: bool,
    pub(crate) consume_results: bool,
    pub(crate) raise_errors_to_tracing: bool,
    pub(crate) display_worker_stats: bool,
    pub(crate) worker_stats_command_count: u64,
    pub(crate) command_error_log_level: log::Level,
    pub(crate) timeout_codes: Vec<i32>,
    pub(crate) normalizer: Arc<dyn Normalizer>,
}

impl EngineConfig {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }

    /// Translates a source database name through [`ConfigBuilder::database_map`],
    /// falling back to the source name when no mapping exists.
    pub(crate) fn target_database<'a>(&'a self, source: &'a str) -> &'a str {
        self.database_map
            .get(source)
            .map(String::as_str)
            .unwrap_or(source)
    }
}

pub struct ConfigBuilder {
    connection_string: Option<String>,
    database_map: HashMap<String, String>,
    query_timeout_s: u64,
    fail_retry_max: u32,
    timeout_retry_max: u32,
    stop_on_error: bool,
    mimic_application_name: bool,
    consume_results: bool,
    raise_errors_to_tracing: bool,
    display_worker_stats: bool,
    worker_stats_command_count: u64,
    command_error_log_level: log::Level,
    timeout_codes: Vec<i32>,
    normalizer: Arc<dyn Normalizer>,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self {
            connection_string: None,
            database_map: HashMap::new(),
            query_timeout_s: DEFAULT_QUERY_TIMEOUT_S,
            fail_retry_max: DEFAULT_FAIL_RETRY_MAX,
            timeout_retry_max: DEFAULT_TIMEOUT_RETRY_MAX,
            stop_on_error: false,
            mimic_application_name: false,
            consume_results: false,
            raise_errors_to_tracing: false,
            display_worker_stats: false,
            worker_stats_command_count: DEFAULT_WORKER_STATS_COMMAND_COUNT,
            command_error_log_level: log::Level::Warn,
            timeout_codes: DEFAULT_TIMEOUT_CODES.to_vec(),
            normalizer: Arc::new(RegexNormalizer),
        }
    }
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_string(mut self, connection_string: impl Into<String>) -> Self {
        self.connection_string = Some(connection_string.into());
        self
    }

    /// Adds a source-database → target-database translation. Commands for
    /// `source` will execute against `target` instead.
    pub fn map_database(mut self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.database_map.insert(source.into(), target.into());
        self
    }

    pub fn query_timeout_s(mut self, seconds: u64) -> Self {
        self.query_timeout_s = seconds;
        self
    }

    pub fn fail_retry_max(mut self, max: u32) -> Self {
        self.fail_retry_max = max;
        self
    }

    pub fn timeout_retry_max(mut self, max: u32) -> Self {
        self.timeout_retry_max = max;
        self
    }

    pub fn stop_on_error(mut self, stop: bool) -> Self {
        self.stop_on_error = stop;
        self
    }

    pub fn mimic_application_name(mut self, mimic: bool) -> Self {
        self.mimic_application_name = mimic;
        self
    }

    pub fn consume_results(mut self, consume: bool) -> Self {
        self.consume_results = consume;
        self
    }

    pub fn raise_errors_to_tracing(mut self, raise: bool) -> Self {
        self.raise_errors_to_tracing = raise;
        self
    }

    pub fn display_worker_stats(mut self, display: bool) -> Self {
        self.display_worker_stats = display;
        self
    }

    pub fn worker_stats_command_count(mut self, count: u64) -> Self {
        self.worker_stats_command_count = count;
        self
    }

    pub fn command_error_log_level(mut self, level: log::Level) -> Self {
        self.command_error_log_level = level;
        self
    }

    /// Overrides the driver error codes the classifier treats as a timeout.
    /// Defaults to `[-2]`.
    pub fn timeout_codes(mut self, codes: Vec<i32>) -> Self {
        self.timeout_codes = codes;
        self
    }

    pub fn normalizer(mut self, normalizer: Arc<dyn Normalizer>) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn build(self) -> Result<EngineConfig> {
        let connection_string = self
            .connection_string
            .ok_or(Error::InvalidConfig("connection_string is required"))?;
        Ok(EngineConfig {
            connection_string,
            database_map: self.database_map,
            query_timeout_s: self.query_timeout_s,
            fail_retry_max: self.fail_retry_max,
            timeout_retry_max: self.timeout_retry_max,
            stop_on_error: self.stop_on_error,
            mimic_application_name: self.mimic_application_name,
            consume_results: self.consume_results,
            raise_errors_to_tracing: self.raise_errors_to_tracing,
            display_worker_stats: self.display_worker_stats,
            worker_stats_command_count: self.worker_stats_command_count,
            command_error_log_level: self.command_error_log_level,
            timeout_codes: self.timeout_codes,
            normalizer: self.normalizer,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_build_with_defaults() {
        let config = ConfigBuilder::new()
            .connection_string("server=tcp:localhost,1433")
            .build()
            .unwrap();
        assert_eq!(config.connection_string, "server=tcp:localhost,1433");
        assert_eq!(config.query_timeout_s, DEFAULT_QUERY_TIMEOUT_S);
        assert_eq!(config.fail_retry_max, DEFAULT_FAIL_RETRY_MAX);
        assert_eq!(config.timeout_codes, vec![-2]);
        assert!(!config.stop_on_error);
    }

    #[test]
    fn should_reject_missing_connection_string() {
        assert!(ConfigBuilder::new().build().is_err());
    }

    #[test]
    fn translates_database_through_map() {
        let config = ConfigBuilder::new()
            .connection_string("server=tcp:localhost,1433")
            .map_database("prod", "bench")
            .build()
            .unwrap();
        assert_eq!(config.target_database("prod"), "bench");
        assert_eq!(config.target_database("other"), "other");
    }
}
