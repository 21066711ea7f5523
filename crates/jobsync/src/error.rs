//! Error types for each layer of the client.

use contrax_core::job::JobStatus;
use contrax_core::types::JobId;
use contrax_core::CoreError;

/// Errors from the real-time channel. Never returned to consumers; they are
/// surfaced as `connection_error` text and trigger a scheduled reconnect.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// Failed to establish the WebSocket connection.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Opening the connection took longer than the configured timeout.
    #[error("Connection attempt timed out after {0} ms")]
    Timeout(u64),

    /// A protocol-level error on an already-established connection.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Errors from the job control REST API.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The request was rejected locally before being sent.
    #[error(transparent)]
    Validation(#[from] CoreError),

    /// The HTTP request itself failed (network, DNS, TLS, decoding).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The configured base URL cannot carry API paths.
    #[error("Invalid job service URL: {0}")]
    InvalidUrl(String),

    /// The server returned a non-2xx status code.
    #[error("Job service error ({status}): {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },
}

impl ApiError {
    /// HTTP status of a server-side rejection, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::Request(e) => e.status().map(|s| s.as_u16()),
            Self::Validation(_) | Self::InvalidUrl(_) => None,
        }
    }
}

/// Reasons a registry update was refused. The registry is left untouched.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RegistryError {
    #[error("Job {0} is not tracked")]
    UnknownJob(JobId),

    #[error("Job {job_id} is already {status}")]
    Terminal { job_id: JobId, status: JobStatus },

    #[error("Invalid transition for job {job_id}: {from} -> {to}")]
    InvalidTransition {
        job_id: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    /// Completion is only applied together with its result payload.
    #[error("Job {0} reported completed without a result")]
    CompletionWithoutResult(JobId),

    #[error("Snapshot for job {0} lacks status or job type")]
    IncompleteSnapshot(JobId),
}

/// Invalid or missing configuration values.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    Missing(&'static str),

    #[error("{var} has an invalid value: {value:?}")]
    Invalid { var: &'static str, value: String },
}
