//! Job channel message types and parser.
//!
//! Every frame is a JSON object with a `"type"` discriminator and its
//! fields alongside, e.g. `{"type": "job_progress", "job_id": "...", ...}`.
//! Inbound frames deserialize into [`ServerMessage`]; outbound frames are
//! built from [`ClientMessage`].

use contrax_core::job::{Job, JobStatus, JobUpdate};
use contrax_core::types::{JobId, Timestamp};
use serde::{Deserialize, Serialize};

/// All server-to-client message kinds.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Sent once after the server accepts the connection.
    ConnectionEstablished(ConnectionEstablishedData),

    /// Partial progress for one job.
    JobProgress(JobProgressData),

    /// A job changed status (optionally with an error).
    JobStatusChanged(JobStatusChangedData),

    /// A job finished and its result is attached.
    JobCompleted(JobCompletedData),

    /// Full snapshot of the user's jobs, answering `get_active_jobs`.
    ActiveJobs(ActiveJobsData),

    /// Authoritative state of a job, answering `subscribe_job`.
    JobSubscribed(JobSubscribedData),

    /// Application-level error not tied to a specific job.
    Error(ErrorData),

    /// Reply to a heartbeat `ping`.
    Pong(PongData),
}

impl ServerMessage {
    /// Wire name of the message kind, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConnectionEstablished(_) => "connection_established",
            Self::JobProgress(_) => "job_progress",
            Self::JobStatusChanged(_) => "job_status_changed",
            Self::JobCompleted(_) => "job_completed",
            Self::ActiveJobs(_) => "active_jobs",
            Self::JobSubscribed(_) => "job_subscribed",
            Self::Error(_) => "error",
            Self::Pong(_) => "pong",
        }
    }
}

/// Payload for `connection_established` messages.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionEstablishedData {
    #[serde(default)]
    pub user_id: Option<String>,
}

/// Payload for `job_progress` messages.
///
/// Only the fields present are merged into the job.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobProgressData {
    pub job_id: JobId,
    pub stage: Option<String>,
    /// Completion fraction in `[0.0, 1.0]`.
    pub progress: Option<f64>,
    pub message: Option<String>,
    pub estimated_completion: Option<Timestamp>,
}

/// Payload for `job_status_changed` messages.
#[derive(Debug, Clone, Deserialize)]
pub struct JobStatusChangedData {
    pub job_id: JobId,
    pub status: JobStatus,
    /// Failure reason when `status` is `failed`.
    #[serde(default, alias = "error_message")]
    pub error: Option<String>,
}

/// Payload for `job_completed` messages.
#[derive(Debug, Clone, Deserialize)]
pub struct JobCompletedData {
    pub job_id: JobId,
    /// Opaque result payload. A missing or `null` result is `None`.
    #[serde(default)]
    pub result: Option<serde_json::Value>,
}

/// Payload for `active_jobs` messages.
#[derive(Debug, Clone, Deserialize)]
pub struct ActiveJobsData {
    /// Raw entries, decoded one by one with [`decode_jobs`].
    #[serde(default)]
    pub jobs: Vec<serde_json::Value>,
}

/// Payload for `job_subscribed` messages.
#[derive(Debug, Clone, Deserialize)]
pub struct JobSubscribedData {
    pub job_id: JobId,
    #[serde(default)]
    pub job: JobUpdate,
}

/// Payload for `error` messages.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorData {
    pub message: String,
}

/// Payload for `pong` messages.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PongData {
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// All client-to-server message kinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Heartbeat.
    Ping,
    /// Ask for a full `active_jobs` snapshot.
    GetActiveJobs,
    /// Ask for pushed updates about one job.
    SubscribeJob { job_id: JobId },
}

impl ClientMessage {
    /// Encode as a JSON text frame body.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Parse a channel text frame into a typed message.
///
/// Returns `Err` for malformed JSON or unknown `type` values.
/// Callers should log and continue.
pub fn parse_message(text: &str) -> Result<ServerMessage, serde_json::Error> {
    serde_json::from_str(text)
}

/// Decode each job entry of a snapshot on its own.
///
/// Entries that do not form a valid [`Job`] are logged and skipped so one
/// bad row cannot discard the rest of the snapshot.
pub fn decode_jobs(entries: Vec<serde_json::Value>) -> Vec<Job> {
    entries
        .into_iter()
        .filter_map(|entry| {
            let job_id = entry
                .get("id")
                .or_else(|| entry.get("job_id"))
                .and_then(serde_json::Value::as_str)
                .map(str::to_string);
            match serde_json::from_value::<Job>(entry) {
                Ok(job) => Some(job),
                Err(e) => {
                    tracing::warn!(job_id = ?job_id, error = %e, "Skipping undecodable job entry");
                    None
                }
            }
        })
        .collect()
}
