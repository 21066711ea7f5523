//! REST client for the job service.
//!
//! Wraps job creation, lookup, listing, cancellation, and result
//! retrieval using [`reqwest`]. None of these calls touch the registry;
//! [`JobSyncClient`](crate::client::JobSyncClient) applies their outcomes.

use std::time::Duration;

use contrax_core::job::Job;
use contrax_core::types::JobId;
use contrax_core::CreateJobRequest;
use reqwest::{StatusCode, Url};
use serde::Deserialize;

use crate::error::ApiError;
use crate::messages::decode_jobs;

/// Header carrying the per-request idempotency key on job creation.
pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

/// HTTP client for the job service.
#[derive(Clone)]
pub struct JobApi {
    client: reqwest::Client,
    api_url: String,
    base: Url,
}

/// Response returned by the create endpoint.
#[derive(Debug, Deserialize)]
pub struct CreateJobResponse {
    /// Server-assigned identifier for the new job.
    pub job_id: JobId,
}

/// Response returned by the cancel endpoint.
#[derive(Debug, Deserialize)]
struct CancelResponse {
    #[serde(alias = "cancelled")]
    success: bool,
}

/// The listing endpoint may return a bare array or a `{"jobs": [...]}`
/// envelope. Entries are decoded one by one.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum JobList {
    Bare(Vec<serde_json::Value>),
    Wrapped { jobs: Vec<serde_json::Value> },
}

impl JobList {
    fn into_jobs(self) -> Vec<Job> {
        match self {
            Self::Bare(entries) | Self::Wrapped { jobs: entries } => decode_jobs(entries),
        }
    }
}

impl JobApi {
    /// Create an API client with a request timeout.
    ///
    /// * `api_url` - Base HTTP URL, e.g. `http://host:8000`.
    pub fn new(api_url: impl Into<String>, timeout: Duration) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Self::with_client(client, api_url)
    }

    /// Create an API client reusing an existing [`reqwest::Client`].
    ///
    /// Fails if `api_url` is not an absolute base URL.
    pub fn with_client(
        client: reqwest::Client,
        api_url: impl Into<String>,
    ) -> Result<Self, ApiError> {
        let api_url = api_url.into().trim_end_matches('/').to_string();
        let base = Url::parse(&api_url)
            .ok()
            .filter(|url| !url.cannot_be_a_base())
            .ok_or_else(|| ApiError::InvalidUrl(api_url.clone()))?;
        Ok(Self {
            client,
            api_url,
            base,
        })
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Submit a new job.
    ///
    /// Sends `POST /api/jobs` with the request's idempotency key.
    pub async fn create_job(
        &self,
        request: &CreateJobRequest,
    ) -> Result<CreateJobResponse, ApiError> {
        request.validate()?;

        let response = self
            .client
            .post(self.endpoint(&["api", "jobs"])?)
            .header(
                IDEMPOTENCY_KEY_HEADER,
                request.idempotency_key().to_string(),
            )
            .json(request)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Fetch one job. Returns `Ok(None)` on 404.
    pub async fn get_job(&self, job_id: &str) -> Result<Option<Job>, ApiError> {
        let response = self
            .client
            .get(self.endpoint(&["api", "jobs", job_id])?)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Self::parse_response(response).await.map(Some)
    }

    /// List every job belonging to `user_id`.
    pub async fn list_user_jobs(&self, user_id: &str) -> Result<Vec<Job>, ApiError> {
        let response = self
            .client
            .get(self.endpoint(&["api", "users", user_id, "jobs"])?)
            .send()
            .await?;

        Self::parse_response::<JobList>(response)
            .await
            .map(JobList::into_jobs)
    }

    /// Ask the server to cancel a job.
    ///
    /// Returns `Ok(false)` when the server does not know the job or
    /// declines to cancel it.
    pub async fn cancel_job(&self, job_id: &str) -> Result<bool, ApiError> {
        let response = self
            .client
            .post(self.endpoint(&["api", "jobs", job_id, "cancel"])?)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        let body: CancelResponse = Self::parse_response(response).await?;
        Ok(body.success)
    }

    /// Fetch the result payload of a completed job.
    ///
    /// Any non-success status, including a job that is not completed yet,
    /// is an error.
    pub async fn get_job_result(&self, job_id: &str) -> Result<serde_json::Value, ApiError> {
        let response = self
            .client
            .get(self.endpoint(&["api", "jobs", job_id, "result"])?)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    // ---- private helpers ----

    /// Append path segments to the base URL, percent-encoding each one so
    /// opaque ids cannot change the route.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| ApiError::InvalidUrl(self.api_url.clone()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Return the response unchanged on success, or an
    /// [`ApiError::Api`] with the status and body text on failure.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ApiError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}
