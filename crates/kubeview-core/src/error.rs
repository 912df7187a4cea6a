//! Cross-crate error taxonomy.
//!
//! `spec.md` §7 names six error categories: Configuration, Auth, Transport,
//! Protocol, Data, Storage. `CoreError` realizes that taxonomy as a single
//! `thiserror` enum so every crate in the workspace can propagate with `?`
//! and the reconnect/backoff logic in [`crate::retry`] can ask a uniform
//! question — "is this worth retrying?" — without matching on strings.

use std::fmt;

/// The six error categories from `spec.md` §7, plus `NotFound` for the
/// "context unknown to the registry" case that doesn't fit cleanly under
/// Configuration (it's a caller error, not a malformed config file).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ErrorCategory {
    Configuration,
    Auth,
    Transport,
    Protocol,
    Data,
    Storage,
    NotFound,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCategory::Configuration => "configuration",
            ErrorCategory::Auth => "auth",
            ErrorCategory::Transport => "transport",
            ErrorCategory::Protocol => "protocol",
            ErrorCategory::Data => "data",
            ErrorCategory::Storage => "storage",
            ErrorCategory::NotFound => "not_found",
        };
        f.write_str(s)
    }
}

/// The error type shared by every crate in this workspace.
///
/// Contract: Auth errors are never retryable. Transport errors are always
/// retryable (the reconnect loop in `kubeview-transport` is what decides
/// whether to keep trying). Configuration, Protocol and Data errors are
/// caller/cluster mistakes and are not retried automatically. Storage
/// errors (favorites file I/O) are surfaced to the UI but never crash the
/// process, per §7.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("authentication rejected for context `{context}`: {reason}")]
    Auth { context: String, reason: String },

    #[error("transport error for context `{context}`: {message}")]
    Transport {
        context: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
    },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("data error: {0}")]
    Data(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("unknown context `{0}`")]
    NotFound(String),
}

impl CoreError {
    pub fn transport(
        context: impl Into<String>,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        CoreError::Transport {
            context: context.into(),
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn transport_message(context: impl Into<String>, message: impl Into<String>) -> Self {
        CoreError::Transport {
            context: context.into(),
            message: message.into(),
            source: None,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            CoreError::Configuration(_) => ErrorCategory::Configuration,
            CoreError::Auth { .. } => ErrorCategory::Auth,
            CoreError::Transport { .. } => ErrorCategory::Transport,
            CoreError::Protocol(_) => ErrorCategory::Protocol,
            CoreError::Data(_) => ErrorCategory::Data,
            CoreError::Storage(_) => ErrorCategory::Storage,
            CoreError::NotFound(_) => ErrorCategory::NotFound,
        }
    }

    /// Whether a reconnect/backoff loop should keep trying after this error.
    /// Only transport-category failures are retryable; auth rejections and
    /// malformed configuration are not (spec.md §7: "Auth: ... Non-retryable").
    pub fn retryable(&self) -> bool {
        matches!(self.category(), ErrorCategory::Transport)
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_errors_are_never_retryable() {
        let err = CoreError::Auth {
            context: "prod".into(),
            reason: "token expired".into(),
        };
        assert!(!err.retryable());
        assert_eq!(err.category(), ErrorCategory::Auth);
    }

    #[test]
    fn transport_errors_are_retryable() {
        let err = CoreError::transport_message("prod", "connection reset");
        assert!(err.retryable());
    }

    #[test]
    fn configuration_errors_are_not_retryable() {
        let err = CoreError::Configuration("missing context `prod`".into());
        assert!(!err.retryable());
    }
}
