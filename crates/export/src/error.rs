//! The export error taxonomy. Per-record failures never appear here; they are
//! recovered locally and surfaced as in-band error/warning records. Everything
//! in this enum aborts the export (after retries, where retrying applies).

use crate::client::ClientError;
use crate::paginate::Entity;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("authentication rejected: {0}")]
    Authentication(String),

    #[error("connection failure: {0}")]
    Connection(String),

    #[error("query failure: {0}")]
    Query(String),

    #[error("query exceeded the {:?} timeout", .0)]
    Timeout(Duration),

    #[error(
        "{entity} pagination cannot advance: batch of {batch_size} rows yielded no usable cursor \
         ({unusable} unprocessable rows)"
    )]
    Pagination {
        entity: Entity,
        batch_size: u64,
        unusable: u64,
    },

    #[error("filesystem failure: {context}")]
    FileSystem {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("resource limit breached: {0}")]
    Resource(String),

    #[error("export cancelled")]
    Cancelled,
}

impl ExportError {
    pub fn filesystem(context: impl Into<String>, source: std::io::Error) -> Self {
        ExportError::FileSystem {
            context: context.into(),
            source,
        }
    }

    /// Whether another attempt of the same operation can succeed. Everything
    /// else is fatal on first sight.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ExportError::Connection(_) | ExportError::Timeout(_))
    }

    /// Process exit code contract: 0 success, 1 unknown, 2 connection,
    /// 3 resource, 5 export, 6 config, 7 query, 130 cancelled.
    pub fn exit_code(&self) -> i32 {
        match self {
            ExportError::Config(_) => 6,
            ExportError::Authentication(_) | ExportError::Connection(_) => 2,
            ExportError::Query(_) | ExportError::Timeout(_) => 7,
            ExportError::Pagination { .. } | ExportError::FileSystem { .. } => 5,
            ExportError::Resource(_) => 3,
            ExportError::Cancelled => 130,
        }
    }
}

impl From<ClientError> for ExportError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Authentication(m) => ExportError::Authentication(m),
            ClientError::Connection(m) => ExportError::Connection(m),
            ClientError::Query(m) => ExportError::Query(m),
            ClientError::Malformed(m) => ExportError::Query(m),
        }
    }
}

/// Configuration problems, gathered across all fields before reporting.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{field}: {problem}")]
    Invalid {
        field: &'static str,
        problem: String,
    },

    #[error("{}", .0.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; "))]
    Aggregate(Vec<ConfigError>),
}

impl ConfigError {
    pub fn invalid(field: &'static str, problem: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            problem: problem.into(),
        }
    }
}
