use thiserror::Error;

/// How the scheduler should react to a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Retryable with backoff (network trouble, upstream rate limits).
    Transient,
    /// Retryable after local remediation (partial data discarded, storage freed).
    Remediable,
    /// Requires external input or a configuration change; retrying is useless.
    NonRetryable,
}

/// Failure taxonomy of the engine. `Clone` on purpose: deduplicated download
/// callers all observe the same terminal error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UpdateError {
    #[error("network failure: {0}")]
    Network(String),

    #[error("upstream rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("update check strategy failed: {0}")]
    Strategy(String),

    #[error("artifact failed integrity check: {0}")]
    Integrity(String),

    #[error("not enough storage: {0}")]
    Storage(String),

    #[error("I/O failure: {0}")]
    Io(String),
}

impl UpdateError {
    pub fn classification(&self) -> FailureClass {
        match self {
            Self::Network(_) | Self::RateLimit(_) => FailureClass::Transient,
            Self::Integrity(_) | Self::Storage(_) => FailureClass::Remediable,
            Self::Strategy(_) | Self::Io(_) => FailureClass::NonRetryable,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.classification() == FailureClass::Transient
    }
}

impl From<reqwest::Error> for UpdateError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) if status.as_u16() == 403 || status.as_u16() == 429 => {
                Self::RateLimit(format!("HTTP {status}"))
            }
            Some(status) => Self::Network(format!("HTTP {status}")),
            None => Self::Network(format!("{e:#}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_matches_taxonomy() {
        assert_eq!(UpdateError::Network("x".into()).classification(), FailureClass::Transient);
        assert_eq!(UpdateError::RateLimit("x".into()).classification(), FailureClass::Transient);
        assert_eq!(UpdateError::Integrity("x".into()).classification(), FailureClass::Remediable);
        assert_eq!(UpdateError::Storage("x".into()).classification(), FailureClass::Remediable);
        assert_eq!(UpdateError::Strategy("x".into()).classification(), FailureClass::NonRetryable);
        assert_eq!(UpdateError::Io("x".into()).classification(), FailureClass::NonRetryable);
    }

    #[test]
    fn only_transient_failures_report_transient() {
        assert!(UpdateError::Network("x".into()).is_transient());
        assert!(!UpdateError::Strategy("x".into()).is_transient());
    }
}
