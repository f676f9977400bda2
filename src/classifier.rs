//! The error classifier and retrier.

use crate::config::EngineConfig;
use crate::errors::Error;

/// One of the three outcomes the driver's numeric error code maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ErrorClass {
    Timeout,
    DatabaseError,
    Unclassified,
}

/// A classification that also carries whether, given the worker's current
/// retry counters, this failure should be retried.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Retry<E> {
    Yes(E),
    No(E),
}

impl<E> Retry<E> {
    pub(crate) fn inner(&self) -> &E {
        match self {
            Retry::Yes(e) | Retry::No(e) => e,
        }
    }

    pub(crate) fn should_retry(&self) -> bool {
        matches!(self, Retry::Yes(_))
    }
}

/// Classifies `error` by the driver's numeric code, then checks it against
/// the retry budget for its class. Does not consider `stop_on_error`
/// (that overrides the verdict unconditionally at the call site, since it
/// means "never retry" regardless of budget).
pub(crate) fn classify(
    config: &EngineConfig,
    error: &Error,
    timeout_retry_count: u32,
    fail_retry_count: u32,
) -> Retry<ErrorClass> {
    let class = match error.driver_code() {
        Some(code) if config.timeout_codes.contains(&code) => ErrorClass::Timeout,
        Some(_) => ErrorClass::DatabaseError,
        None => ErrorClass::Unclassified,
    };

    let budget_remains = match class {
        ErrorClass::Timeout => timeout_retry_count < config.timeout_retry_max,
        ErrorClass::DatabaseError => fail_retry_count < config.fail_retry_max,
        ErrorClass::Unclassified => false,
    };

    if budget_remains {
        Retry::Yes(class)
    } else {
        Retry::No(class)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> EngineConfig {
        EngineConfig::builder()
            .connection_string("server=tcp:localhost,1433")
            .timeout_retry_max(2)
            .fail_retry_max(1)
            .build()
            .unwrap()
    }

    #[test]
    fn timeout_code_classifies_as_timeout() {
        let verdict = classify(&config(), &Error::Timeout, 0, 0);
        assert_eq!(*verdict.inner(), ErrorClass::Timeout);
        assert!(verdict.should_retry());
    }

    #[test]
    fn timeout_retry_budget_is_exhausted() {
        let verdict = classify(&config(), &Error::Timeout, 2, 0);
        assert!(!verdict.should_retry());
    }

    #[test]
    fn unclassified_error_never_retries() {
        let verdict = classify(&config(), &Error::Stopped, 0, 0);
        assert_eq!(*verdict.inner(), ErrorClass::Unclassified);
        assert!(!verdict.should_retry());
    }
}
