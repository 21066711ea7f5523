//! Job creation request and its validation.

use serde::Serialize;

use crate::error::CoreError;
use crate::job::JobType;

/// Maximum number of file references accepted in one create request.
pub const MAX_FILES_PER_JOB: usize = 20;

/// Maximum length of a contract title, in characters.
pub const MAX_TITLE_LEN: usize = 200;

/// Body of the remote job-creation call.
///
/// Each request value carries its own idempotency key, generated at
/// construction. Retrying the same value reuses the key so the server
/// can collapse duplicates; building a new request yields a new key.
#[derive(Debug, Clone, Serialize)]
pub struct CreateJobRequest {
    pub job_type: JobType,
    /// Server-side references to previously uploaded files.
    pub files: Vec<String>,
    pub contract_title: String,
    pub user_email: String,
    pub options: serde_json::Map<String, serde_json::Value>,
    #[serde(skip)]
    idempotency_key: uuid::Uuid,
}

impl CreateJobRequest {
    pub fn new(
        job_type: JobType,
        files: Vec<String>,
        contract_title: impl Into<String>,
        user_email: impl Into<String>,
    ) -> Self {
        Self {
            job_type,
            files,
            contract_title: contract_title.into(),
            user_email: user_email.into(),
            options: serde_json::Map::new(),
            idempotency_key: uuid::Uuid::new_v4(),
        }
    }

    /// Set a pipeline option forwarded verbatim to the server.
    pub fn with_option(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.options.insert(key.into(), value);
        self
    }

    pub fn idempotency_key(&self) -> uuid::Uuid {
        self.idempotency_key
    }

    /// Check the request before it is sent.
    pub fn validate(&self) -> Result<(), CoreError> {
        let title = self.contract_title.trim();
        if title.is_empty() {
            return Err(CoreError::Validation(
                "contract_title must not be empty".into(),
            ));
        }
        if title.chars().count() > MAX_TITLE_LEN {
            return Err(CoreError::Validation(format!(
                "contract_title must be at most {MAX_TITLE_LEN} characters"
            )));
        }
        if self.files.is_empty() {
            return Err(CoreError::Validation(
                "at least one file reference is required".into(),
            ));
        }
        if self.files.len() > MAX_FILES_PER_JOB {
            return Err(CoreError::Validation(format!(
                "at most {MAX_FILES_PER_JOB} files per job, got {}",
                self.files.len()
            )));
        }
        if self.files.iter().any(|f| f.trim().is_empty()) {
            return Err(CoreError::Validation(
                "file references must not be blank".into(),
            ));
        }
        if !looks_like_email(&self.user_email) {
            return Err(CoreError::Validation(format!(
                "user_email is not a valid address: {}",
                self.user_email
            )));
        }
        Ok(())
    }
}

/// Minimal shape check: one `@` with a non-empty local part and a dotted domain.
fn looks_like_email(value: &str) -> bool {
    match value.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        }
        None => false,
    }
}
