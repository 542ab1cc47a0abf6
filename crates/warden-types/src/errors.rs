use thiserror::Error;

/// Result type shared across the Warden crates.
pub type WardenResult<T> = Result<T, WardenError>;

/// Error taxonomy for the controller.
///
/// The kinds map to recovery behavior: configuration errors are fatal at
/// startup, discovery and transport errors fail one tick and are retried on
/// the next, conflicts are retried with backoff inside the same operation,
/// parse errors skip the offending source, and budget/blast conditions are
/// recoverable signals that feed enforcement rather than failures.
#[derive(Error, Debug)]
pub enum WardenError {
    /// Invalid or missing configuration. Fatal at startup.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Neither a configured endpoint nor discovered endpoints are available.
    #[error("no metrics sources available")]
    NoSources,

    /// HTTP or document I/O failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// Optimistic-concurrency write conflict on a shared document.
    #[error("write conflict on {resource}")]
    Conflict { resource: String },

    /// Requested document does not exist.
    #[error("document not found: {0}")]
    NotFound(String),

    /// Malformed response or document content.
    #[error("parse error: {0}")]
    Parse(String),

    /// A tenant exceeded its configured budget.
    #[error("budget violation for tenant {tenant}: {detail}")]
    Budget { tenant: String, detail: String },

    /// A traffic blast was detected for a tenant resource.
    #[error("blast detected for tenant {tenant} on {resource}")]
    Blast { tenant: String, resource: String },

    /// The surrounding context was cancelled; shut down cleanly.
    #[error("operation cancelled")]
    Cancelled,

    /// Serialization failure while round-tripping a shared document.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl WardenError {
    /// Short stable label for metrics and audit records.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::NoSources => "discovery",
            Self::Transport(_) => "transport",
            Self::Conflict { .. } => "conflict",
            Self::NotFound(_) => "not_found",
            Self::Parse(_) => "parse",
            Self::Budget { .. } => "budget",
            Self::Blast { .. } => "blast",
            Self::Cancelled => "cancelled",
            Self::Serialization(_) => "serialization",
        }
    }

    /// Whether the operation may be retried as-is (next tick or next attempt).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NoSources | Self::Transport(_) | Self::Conflict { .. }
        )
    }
}

impl From<serde_json::Error> for WardenError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for WardenError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
