use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Failures that may clear up on their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransientKind {
    /// Connection refused, reset or dropped mid-query
    Connection,
    Timeout,
    /// Deadlock or lock wait on the source side
    Deadlock,
}

/// Failures that retrying cannot fix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermanentKind {
    Authentication,
    MalformedQuery,
    /// Source rows do not have the expected shape or values
    SchemaMismatch,
    Configuration,
    /// Any other error reported by the database
    Database,
}

impl fmt::Display for TransientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Connection => "connection",
            Self::Timeout => "timeout",
            Self::Deadlock => "deadlock",
        })
    }
}

impl fmt::Display for PermanentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Authentication => "authentication",
            Self::MalformedQuery => "malformed query",
            Self::SchemaMismatch => "schema mismatch",
            Self::Configuration => "configuration",
            Self::Database => "database",
        })
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    #[error("Transient source failure ({kind}): {message}")]
    Transient { kind: TransientKind, message: String },
    #[error("Permanent source failure ({kind}): {message}")]
    Permanent { kind: PermanentKind, message: String },
    #[error("Connection pool exhausted after waiting {waited:?}")]
    PoolExhausted { waited: Duration },
}

impl GatewayError {
    pub fn transient(kind: TransientKind, message: impl Into<String>) -> Self {
        Self::Transient {
            kind,
            message: message.into(),
        }
    }

    pub fn permanent(kind: PermanentKind, message: impl Into<String>) -> Self {
        Self::Permanent {
            kind,
            message: message.into(),
        }
    }

    /// Only transient failures are worth another attempt.
    ///
    /// Pool exhaustion is local back-pressure, not a source fault, and is
    /// surfaced to the caller immediately.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Short label for logs and metrics.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Transient { .. } => "transient",
            Self::Permanent { .. } => "permanent",
            Self::PoolExhausted { .. } => "pool_exhausted",
        }
    }
}
