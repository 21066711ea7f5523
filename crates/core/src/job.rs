//! Job model and the job status state machine.
//!
//! [`Job`] is the full snapshot the server returns from the REST API and
//! inside `active_jobs` channel messages. [`JobUpdate`] is the partial
//! form carried by `job_subscribed`, where any field may be omitted.

use serde::{Deserialize, Serialize};

use crate::types::{JobId, Timestamp};

/// Stage text given to a placeholder before the server reports one.
pub const PLACEHOLDER_STAGE: &str = "queued";

/// Error text used when a job fails without a server-provided reason.
pub const DEFAULT_FAILURE_MESSAGE: &str = "Job failed";

// ---------------------------------------------------------------------------
// Job status
// ---------------------------------------------------------------------------

/// Lifecycle status of a background job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Accepted by the server, not yet started.
    Pending,
    /// Work is in progress.
    Processing,
    /// Finished successfully; a result payload is available.
    Completed,
    /// Finished with an error.
    Failed,
    /// Cancelled by the user or the system.
    Cancelled,
}

impl JobStatus {
    /// Return the wire representation of a status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Completed, failed and cancelled jobs never change status again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Returns the statuses reachable from `self` in one step.
    ///
    /// `Pending -> Completed` is allowed: a server may finish a short job
    /// without ever reporting `processing`.
    pub fn valid_transitions(&self) -> &'static [JobStatus] {
        match self {
            Self::Pending => &[
                Self::Processing,
                Self::Completed,
                Self::Failed,
                Self::Cancelled,
            ],
            Self::Processing => &[Self::Completed, Self::Failed, Self::Cancelled],
            Self::Completed | Self::Failed | Self::Cancelled => &[],
        }
    }

    /// Check whether moving from `self` to `next` is a forward transition.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        self.valid_transitions().contains(&next)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Job type
// ---------------------------------------------------------------------------

/// Kind of pipeline a job runs on the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    ContractAnalysis,
    ImageProcessing,
    DocumentOcr,
    FullPipeline,
}

impl JobType {
    /// Return the wire representation of a job type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ContractAnalysis => "contract_analysis",
            Self::ImageProcessing => "image_processing",
            Self::DocumentOcr => "document_ocr",
            Self::FullPipeline => "full_pipeline",
        }
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Job snapshot
// ---------------------------------------------------------------------------

/// Full snapshot of a background job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    #[serde(alias = "job_id")]
    pub id: JobId,
    pub status: JobStatus,
    pub job_type: JobType,
    #[serde(default, alias = "contract_title")]
    pub title: String,
    #[serde(default = "chrono::Utc::now")]
    pub created_at: Timestamp,
    /// Free-text name of the pipeline stage currently running.
    #[serde(default)]
    pub current_stage: String,
    /// Completion fraction in `[0.0, 1.0]`.
    pub progress: Option<f64>,
    pub message: Option<String>,
    pub estimated_completion: Option<Timestamp>,
    /// Present iff `status == Failed`.
    pub error_message: Option<String>,
    /// Opaque result payload, present iff `status == Completed`.
    pub result: Option<serde_json::Value>,
}

impl Job {
    /// Build the local placeholder shown between a successful create call
    /// and the first server message about the job.
    pub fn placeholder(id: impl Into<JobId>, job_type: JobType, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: JobStatus::Pending,
            job_type,
            title: title.into(),
            created_at: chrono::Utc::now(),
            current_stage: PLACEHOLDER_STAGE.to_string(),
            progress: None,
            message: None,
            estimated_completion: None,
            error_message: None,
            result: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Overlay every field present in `update` onto this snapshot.
    ///
    /// The id never changes. An empty title from the server does not
    /// replace a known one.
    pub fn merge_update(&mut self, update: JobUpdate) {
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(job_type) = update.job_type {
            self.job_type = job_type;
        }
        if let Some(title) = update.title.filter(|t| !t.is_empty()) {
            self.title = title;
        }
        if let Some(created_at) = update.created_at {
            self.created_at = created_at;
        }
        if let Some(stage) = update.current_stage {
            self.current_stage = stage;
        }
        if let Some(progress) = update.progress {
            self.progress = Some(clamp_progress(progress));
        }
        if update.message.is_some() {
            self.message = update.message;
        }
        if update.estimated_completion.is_some() {
            self.estimated_completion = update.estimated_completion;
        }
        if update.error_message.is_some() {
            self.error_message = update.error_message;
        }
        if update.result.is_some() {
            self.result = update.result;
        }
        self.normalize_outcome();
    }

    /// Enforce the outcome invariants: a result only on completed jobs, an
    /// error message exactly on failed ones.
    pub fn normalize_outcome(&mut self) {
        if self.status != JobStatus::Completed {
            self.result = None;
        }
        match self.status {
            JobStatus::Failed => {
                if self.error_message.is_none() {
                    self.error_message = Some(DEFAULT_FAILURE_MESSAGE.to_string());
                }
            }
            _ => self.error_message = None,
        }
    }
}

/// Clamp a progress value into `[0.0, 1.0]`, mapping NaN to zero.
pub fn clamp_progress(progress: f64) -> f64 {
    if progress.is_nan() {
        0.0
    } else {
        progress.clamp(0.0, 1.0)
    }
}

// ---------------------------------------------------------------------------
// Partial update
// ---------------------------------------------------------------------------

/// Partial job snapshot; absent fields leave the local value untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub job_type: Option<JobType>,
    #[serde(alias = "contract_title")]
    pub title: Option<String>,
    pub created_at: Option<Timestamp>,
    #[serde(alias = "stage")]
    pub current_stage: Option<String>,
    pub progress: Option<f64>,
    pub message: Option<String>,
    pub estimated_completion: Option<Timestamp>,
    #[serde(alias = "error")]
    pub error_message: Option<String>,
    pub result: Option<serde_json::Value>,
}

impl JobUpdate {
    /// Build a full [`Job`] from this update when no local entry exists.
    ///
    /// Returns `None` unless both `status` and `job_type` are present.
    pub fn into_job(self, id: impl Into<JobId>) -> Option<Job> {
        let status = self.status?;
        let job_type = self.job_type?;
        let mut job = Job {
            id: id.into(),
            status,
            job_type,
            title: String::new(),
            created_at: chrono::Utc::now(),
            current_stage: String::new(),
            progress: None,
            message: None,
            estimated_completion: None,
            error_message: None,
            result: None,
        };
        job.merge_update(self);
        Some(job)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
