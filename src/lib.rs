//! Per-session replay engine for a captured SQL Server workload.
//!
//! A capture is a sequence of commands, each stamped with the session that
//! issued it and the offset (relative to replay start) it should be
//! re-issued at. This crate owns the piece that runs *after* that capture
//! has been read and split by session: given a per-session stream of
//! [`CommandRecord`]s, a [`Worker`] reopens that session's command history
//! against a live target, preserving both per-session order and (as
//! closely as scheduling allows) the original timing between commands.
//!
//! What this crate does not do: read trace files, decide how to bucket
//! commands into sessions, or normalize command text beyond the
//! [`Normalizer`] contract (those are a dispatcher's job, external to this
//! crate).

mod classifier;
mod config;
mod connection;
mod errors;
mod normalizer;
mod pool;
mod prepared;
mod record;
mod scheduler;
mod stats;
mod tracing_event;
mod worker;

pub use config::{ConfigBuilder, EngineConfig};
pub use errors::{Error, Result};
pub use normalizer::{Normalizer, RegexNormalizer};
pub use record::{CommandKind, CommandRecord, NormalizedCommand, HANDLE_SENTINEL};
pub use worker::Worker;
