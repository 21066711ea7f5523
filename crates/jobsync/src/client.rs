//! Job synchronization client.
//!
//! [`JobSyncClient`] composes the registry store, the connection task,
//! the subscription manager and the REST API into the surface the
//! presentation layer consumes. Control operations work regardless of the
//! channel state.

use std::sync::Arc;
use std::time::Duration;

use contrax_core::job::Job;
use contrax_core::types::JobId;
use contrax_core::CreateJobRequest;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;

use crate::api::JobApi;
use crate::config::SyncConfig;
use crate::connection::{run_connection_loop, ChannelContext, ChannelLink, ConnectionState};
use crate::error::ApiError;
use crate::registry::JobRegistry;
use crate::store::JobStore;
use crate::subscriptions::SubscriptionManager;

/// How long [`JobSyncClient::disconnect`] waits for the connection task.
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Client for one user's background jobs.
pub struct JobSyncClient {
    ctx: ChannelContext,
    api: JobApi,
    task: Mutex<Option<ConnectionTask>>,
}

/// Bookkeeping for the spawned connection task.
struct ConnectionTask {
    handle: tokio::task::JoinHandle<()>,
    cancel: CancellationToken,
}

impl JobSyncClient {
    /// Build a client with its own HTTP client.
    pub fn new(config: SyncConfig) -> Result<Self, ApiError> {
        let api = JobApi::new(config.api_url.clone(), config.request_timeout)?;
        Ok(Self::with_api(config, api))
    }

    /// Build a client around an existing [`JobApi`].
    pub fn with_api(config: SyncConfig, api: JobApi) -> Self {
        let link = Arc::new(ChannelLink::new());
        let ctx = ChannelContext {
            store: JobStore::new(config.max_terminal_jobs),
            subscriptions: SubscriptionManager::new(Arc::clone(&link)),
            config: Arc::new(config),
            link,
        };
        Self {
            ctx,
            api,
            task: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.ctx.config
    }

    // ---- connection ----

    /// Start the connection task. Does nothing if it is already running.
    ///
    /// Returns immediately; watch [`watch_connection`](Self::watch_connection)
    /// to observe the channel coming up.
    pub async fn connect(&self) {
        let mut task = self.task.lock().await;
        if task.as_ref().is_some_and(|t| !t.handle.is_finished()) {
            tracing::debug!("Job channel already running");
            return;
        }

        let cancel = CancellationToken::new();
        let ctx = self.ctx.clone();
        let task_cancel = cancel.clone();
        let user_id = self.ctx.config.user_id.clone();

        let handle = tokio::spawn(async move {
            tracing::info!(user_id = %user_id, "Starting job channel task");
            run_connection_loop(ctx, task_cancel).await;
            tracing::info!(user_id = %user_id, "Job channel task exited");
        });

        *task = Some(ConnectionTask { handle, cancel });
    }

    /// Close the channel deliberately. No reconnect follows.
    pub async fn disconnect(&self) {
        let Some(task) = self.task.lock().await.take() else {
            return;
        };

        tracing::info!("Disconnecting job channel");
        task.cancel.cancel();

        let abort = task.handle.abort_handle();
        if tokio::time::timeout(DISCONNECT_TIMEOUT, task.handle)
            .await
            .is_err()
        {
            tracing::warn!("Job channel task did not stop in time, aborting");
            abort.abort();
        }
        self.ctx.link.mark_disconnected();
    }

    pub fn is_connected(&self) -> bool {
        self.ctx.link.is_connected()
    }

    /// Reason the channel is down, while a reconnect is pending.
    pub fn connection_error(&self) -> Option<String> {
        self.ctx.link.state().error
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.ctx.link.state()
    }

    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.ctx.link.subscribe()
    }

    // ---- registry ----

    /// All tracked jobs, newest first.
    pub fn jobs(&self) -> Vec<Job> {
        self.ctx.store.jobs()
    }

    pub fn job(&self, job_id: &str) -> Option<Job> {
        self.ctx.store.job(job_id)
    }

    /// Receive the registry every time it changes.
    pub fn watch_jobs(&self) -> watch::Receiver<JobRegistry> {
        self.ctx.store.subscribe()
    }

    /// Latest application-level error pushed by the server.
    pub fn server_notice(&self) -> Option<String> {
        self.ctx.store.notice()
    }

    pub fn watch_notice(&self) -> watch::Receiver<Option<String>> {
        self.ctx.store.subscribe_notice()
    }

    pub fn clear_server_notice(&self) {
        self.ctx.store.clear_notice();
    }

    /// Stop tracking a job locally.
    pub fn evict(&self, job_id: &str) -> Option<Job> {
        self.ctx.subscriptions.unsubscribe(job_id);
        self.ctx.store.evict(job_id)
    }

    pub fn store(&self) -> &JobStore {
        &self.ctx.store
    }

    // ---- subscriptions ----

    /// Request live updates for a job. See [`SubscriptionManager::subscribe`].
    pub fn subscribe(&self, job_id: &str) -> bool {
        self.ctx.subscriptions.subscribe(job_id)
    }

    pub fn unsubscribe(&self, job_id: &str) -> bool {
        self.ctx.subscriptions.unsubscribe(job_id)
    }

    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.ctx.subscriptions
    }

    // ---- control API ----

    /// Create a job, track a pending placeholder for it and subscribe.
    ///
    /// On failure nothing is tracked.
    pub async fn create_job(&self, request: &CreateJobRequest) -> Result<JobId, ApiError> {
        let response = self.api.create_job(request).await.map_err(|e| {
            tracing::warn!(error = %e, job_type = %request.job_type, "Job creation failed");
            e
        })?;
        let job_id = response.job_id;

        self.ctx.store.insert_placeholder(Job::placeholder(
            job_id.clone(),
            request.job_type,
            request.contract_title.clone(),
        ));
        let live = self.ctx.subscriptions.subscribe(&job_id);

        tracing::info!(
            job_id = %job_id,
            job_type = %request.job_type,
            subscribed = live,
            "Job created",
        );
        Ok(job_id)
    }

    /// Fetch a job's authoritative state directly, bypassing the channel.
    pub async fn get_job(&self, job_id: &str) -> Result<Option<Job>, ApiError> {
        self.api.get_job(job_id).await
    }

    /// Fetch all of the user's jobs and replace the registry with them.
    pub async fn get_user_jobs(&self) -> Result<Vec<Job>, ApiError> {
        let jobs = self.api.list_user_jobs(&self.ctx.config.user_id).await?;
        let count = self.ctx.store.replace_all(jobs.clone());
        tracing::info!(count, "Registry reconciled from job listing");
        Ok(jobs)
    }

    /// Cancel a job remotely, then mark it cancelled locally without
    /// waiting for the channel to confirm.
    ///
    /// Returns `Ok(false)` with no local change if the server declined.
    pub async fn cancel_job(&self, job_id: &str) -> Result<bool, ApiError> {
        if !self.api.cancel_job(job_id).await? {
            tracing::info!(job_id, "Cancel declined by job service");
            return Ok(false);
        }

        let tracked = self.ctx.store.mark_cancelled(job_id);
        tracing::info!(job_id, tracked, "Job cancelled");
        Ok(true)
    }

    /// Fetch a completed job's result payload.
    pub async fn get_job_result(&self, job_id: &str) -> Result<serde_json::Value, ApiError> {
        self.api.get_job_result(job_id).await
    }
}

impl Drop for JobSyncClient {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.cancel.cancel();
        }
    }
}
