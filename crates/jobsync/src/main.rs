//! `contrax-jobsync` -- follow one user's background jobs from a terminal.
//!
//! Connects the job channel, loads the user's job list, and logs every
//! status, stage, and connection change until interrupted. Configuration
//! comes from the `JOBSYNC_*` environment variables documented on
//! [`SyncConfig::from_env`].

use std::collections::HashMap;

use contrax_core::job::{Job, JobStatus};
use contrax_core::types::JobId;
use contrax_jobsync::{JobSyncClient, SyncConfig};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "contrax_jobsync=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = SyncConfig::from_env().unwrap_or_else(|e| {
        tracing::error!(error = %e, "Invalid configuration");
        std::process::exit(1);
    });

    tracing::info!(
        user_id = %config.user_id,
        api_url = %config.api_url,
        channel_url = %config.channel_url(),
        "Starting contrax-jobsync",
    );

    let client = JobSyncClient::new(config).unwrap_or_else(|e| {
        tracing::error!(error = %e, "Failed to build HTTP client");
        std::process::exit(1);
    });

    client.connect().await;

    match client.get_user_jobs().await {
        Ok(jobs) => tracing::info!(count = jobs.len(), "Loaded job list"),
        Err(e) => tracing::warn!(error = %e, "Failed to load job list, waiting for channel snapshot"),
    }

    let mut jobs_rx = client.watch_jobs();
    let mut conn_rx = client.watch_connection();
    let mut notice_rx = client.watch_notice();
    let mut seen: HashMap<JobId, (JobStatus, String)> = HashMap::new();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupt received, shutting down");
                break;
            }
            changed = jobs_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let jobs: Vec<Job> = jobs_rx
                    .borrow_and_update()
                    .jobs()
                    .into_iter()
                    .cloned()
                    .collect();
                report_job_changes(&jobs, &mut seen);
            }
            changed = conn_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = conn_rx.borrow_and_update().clone();
                tracing::info!(
                    status = ?state.status,
                    error = ?state.error,
                    attempt = state.attempt,
                    "Connection state changed",
                );
            }
            changed = notice_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                if let Some(message) = notice_rx.borrow_and_update().clone() {
                    tracing::warn!(message = %message, "Server notice");
                }
            }
        }
    }

    client.disconnect().await;
}

/// Log jobs whose status or stage differs from the last report.
fn report_job_changes(jobs: &[Job], seen: &mut HashMap<JobId, (JobStatus, String)>) {
    for job in jobs {
        let current = (job.status, job.current_stage.clone());
        if seen.get(&job.id) == Some(&current) {
            continue;
        }
        tracing::info!(
            job_id = %job.id,
            job_type = %job.job_type,
            title = %job.title,
            status = %job.status,
            stage = %job.current_stage,
            progress = ?job.progress,
            error = ?job.error_message,
            "Job updated",
        );
        seen.insert(job.id.clone(), current);
    }
    seen.retain(|id, _| jobs.iter().any(|job| &job.id == id));
}
