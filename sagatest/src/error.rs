use std::sync::Arc;

/// The single error type for all sagatest operations.
///
/// Every fallible sagatest API returns `sagatest::Result<T>` (alias for
/// `Result<T, sagatest::Error>`). Two of the variants are test verdicts —
/// [`Expectation`](Error::Expectation) for a violated outbound-message rule
/// and [`Assertion`](Error::Assertion) for a completion-state mismatch —
/// and both are fatal to the current test. Errors returned by the saga's
/// own handlers are carried through [`Handler`](Error::Handler) unmodified.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// A required outbound operation was missing, or a forbidden one was
    /// recorded. The message names the expected type and what went wrong.
    #[error("expectation failed: {0}")]
    Expectation(String),

    /// A completion-state check failed.
    #[error("assertion failed: {0}")]
    Assertion(String),

    /// An error returned by the saga's own handler.
    #[error("handler error: {0}")]
    Handler(#[source] Arc<dyn std::error::Error + Send + Sync>),
}

impl Error {
    /// Wrap an error produced by the saga under test.
    ///
    /// Saga handlers that fail should return this so the failure propagates
    /// out of the driving `when*` call untouched.
    pub fn handler(e: impl std::error::Error + Send + Sync + 'static) -> Self {
        Error::Handler(Arc::new(e))
    }

    pub(crate) fn expectation(message: impl Into<String>) -> Self {
        Error::Expectation(message.into())
    }

    pub(crate) fn assertion(message: impl Into<String>) -> Self {
        Error::Assertion(message.into())
    }
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Expectation(a), Self::Expectation(b)) => a == b,
            (Self::Assertion(a), Self::Assertion(b)) => a == b,
            (Self::Handler(a), Self::Handler(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Eq for Error {}
