//! The crate's unified error type.
//!
//! Mirrors the shape of a driver-facing `Error` enum: one variant per
//! failure origin, `#[from]` conversions at the seams where a dependency's
//! own error type crosses into ours, and a `Result` alias so call sites
//! read the same way throughout the crate.

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("invalid connection string: {0}")]
    InvalidConnectionString(String),

    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),

    #[error("database driver error")]
    Driver(#[from] tiberius::error::Error),

    #[error("connection pool error")]
    Pool(String),

    #[error("i/o error")]
    Io(#[from] std::io::Error),

    #[error("the worker has been stopped")]
    Stopped,

    #[error("command timed out")]
    Timeout,
}

impl<E: std::fmt::Display> From<deadpool::managed::PoolError<E>> for Error {
    fn from(e: deadpool::managed::PoolError<E>) -> Self {
        Error::Pool(e.to_string())
    }
}

impl Error {
    /// The numeric code the classifier would see from the driver, when this
    /// error originated from one. Non-driver errors have no code.
    pub(crate) fn driver_code(&self) -> Option<i32> {
        match self {
            Error::Driver(tiberius::error::Error::Server(token)) => Some(token.code() as i32),
            Error::Timeout => Some(-2),
            _ => None,
        }
    }
}
