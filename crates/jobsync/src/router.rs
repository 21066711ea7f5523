//! Inbound message dispatch.
//!
//! Decodes channel text frames into [`ServerMessage`] variants and maps
//! each kind to exactly one [`JobStore`] mutation. Rejected updates are
//! logged and dropped; they never reach the consumer as failures.

use crate::error::RegistryError;
use crate::messages::{decode_jobs, parse_message, ServerMessage};
use crate::store::JobStore;

/// What routing a single frame did.
#[derive(Debug, Clone, PartialEq)]
pub enum RouteOutcome {
    /// The registry changed.
    Applied,
    /// The message was valid but matched the current state.
    Unchanged,
    /// The registry refused the update.
    Rejected(RegistryError),
    /// A server notice was recorded.
    Notice,
    /// Heartbeat reply.
    Pong,
    /// Informational message with no state effect.
    Ignored,
    /// The frame could not be parsed.
    Malformed,
}

/// Parse and dispatch one text frame.
pub fn route_text(text: &str, store: &JobStore) -> RouteOutcome {
    match parse_message(text) {
        Ok(message) => route_message(message, store),
        Err(e) => {
            tracing::warn!(
                error = %e,
                raw_message = %text,
                "Failed to parse job channel message",
            );
            RouteOutcome::Malformed
        }
    }
}

/// Dispatch one decoded message.
pub fn route_message(message: ServerMessage, store: &JobStore) -> RouteOutcome {
    let kind = message.kind();
    tracing::trace!(kind, "Routing job channel message");

    let result = match message {
        ServerMessage::ConnectionEstablished(data) => {
            tracing::info!(user_id = ?data.user_id, "Job channel established");
            return RouteOutcome::Ignored;
        }
        ServerMessage::ActiveJobs(data) => {
            let count = store.replace_all(decode_jobs(data.jobs));
            tracing::info!(count, "Registry reconciled from active jobs snapshot");
            return RouteOutcome::Applied;
        }
        ServerMessage::JobSubscribed(data) => {
            tracing::debug!(job_id = %data.job_id, "Subscribed to job");
            store.update(|reg| reg.merge_subscribed(&data.job_id, data.job))
        }
        ServerMessage::JobProgress(data) => {
            tracing::debug!(
                job_id = %data.job_id,
                stage = ?data.stage,
                progress = ?data.progress,
                "Job progress",
            );
            store.update(|reg| reg.apply_progress(data))
        }
        ServerMessage::JobStatusChanged(data) => {
            tracing::info!(job_id = %data.job_id, status = %data.status, "Job status changed");
            store.update(|reg| reg.apply_status_change(data))
        }
        ServerMessage::JobCompleted(data) => {
            tracing::info!(job_id = %data.job_id, "Job completed");
            store.update(|reg| reg.apply_completed(data))
        }
        ServerMessage::Error(data) => {
            tracing::warn!(message = %data.message, "Job service reported an error");
            store.set_notice(data.message);
            return RouteOutcome::Notice;
        }
        ServerMessage::Pong(_) => {
            tracing::trace!("Pong received");
            return RouteOutcome::Pong;
        }
    };

    match result {
        Ok(true) => RouteOutcome::Applied,
        Ok(false) => RouteOutcome::Unchanged,
        Err(e) => {
            match &e {
                RegistryError::CompletionWithoutResult(_) if kind == "job_status_changed" => {
                    tracing::debug!(kind, reason = %e, "Waiting for job_completed");
                }
                _ => tracing::warn!(kind, reason = %e, "Ignoring job update"),
            }
            RouteOutcome::Rejected(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use contrax_core::job::{Job, JobStatus, JobType};

    use super::*;

    fn store_with_placeholder() -> JobStore {
        let store = JobStore::new(50);
        store.insert_placeholder(Job::placeholder("j-1", JobType::ContractAnalysis, "Contrato A"));
        store
    }

    #[test]
    fn create_progress_complete_scenario() {
        let store = store_with_placeholder();
        assert_eq!(store.jobs().len(), 1);
        assert_eq!(store.job("j-1").unwrap().status, JobStatus::Pending);

        let outcome = route_text(
            r#"{"type":"job_progress","job_id":"j-1","stage":"ocr","progress":0.4}"#,
            &store,
        );
        assert_eq!(outcome, RouteOutcome::Applied);
        let job = store.job("j-1").unwrap();
        assert_eq!(job.current_stage, "ocr");
        assert_eq!(job.progress, Some(0.4));
        assert_eq!(job.status, JobStatus::Pending);

        let outcome = route_text(
            r#"{"type":"job_completed","job_id":"j-1","result":{"summary":"ok","clauses":7}}"#,
            &store,
        );
        assert_eq!(outcome, RouteOutcome::Applied);
        let job = store.job("j-1").unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.result.as_ref().unwrap()["clauses"], 7);
        assert_eq!(job.progress, Some(0.4));
    }

    #[test]
    fn subscribed_message_unites_placeholder_and_server_fields() {
        let store = store_with_placeholder();

        route_text(
            r#"{"type":"job_subscribed","job_id":"j-1","job":{"status":"processing","current_stage":"extract"}}"#,
            &store,
        );

        let job = store.job("j-1").unwrap();
        assert_eq!(job.job_type, JobType::ContractAnalysis);
        assert_eq!(job.title, "Contrato A");
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.current_stage, "extract");
    }

    #[test]
    fn active_jobs_replaces_everything() {
        let store = store_with_placeholder();

        let outcome = route_text(
            r#"{"type":"active_jobs","jobs":[{"id":"j-2","status":"processing",
                "job_type":"document_ocr","title":"Scan","created_at":"2026-03-01T09:00:00Z",
                "current_stage":"ocr","progress":0.7}]}"#,
            &store,
        );

        assert_eq!(outcome, RouteOutcome::Applied);
        let jobs = store.jobs();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, "j-2");
    }

    #[test]
    fn snapshot_keeps_valid_entries_when_one_is_bad() {
        let store = store_with_placeholder();

        let outcome = route_text(
            r#"{"type":"active_jobs","jobs":[
                {"id":"good","status":"processing","job_type":"document_ocr","title":"Scan"},
                {"id":"odd","status":"processing","job_type":"risk_assessment","title":"?"}
            ]}"#,
            &store,
        );

        assert_eq!(outcome, RouteOutcome::Applied);
        let ids: Vec<String> = store.jobs().into_iter().map(|j| j.id).collect();
        assert_eq!(ids, vec!["good".to_string()]);
    }

    #[test]
    fn completed_frame_without_result_is_rejected() {
        let store = store_with_placeholder();

        let outcome = route_text(r#"{"type":"job_completed","job_id":"j-1"}"#, &store);

        assert_matches!(
            outcome,
            RouteOutcome::Rejected(RegistryError::CompletionWithoutResult(_))
        );
        assert_eq!(store.job("j-1").unwrap().status, JobStatus::Pending);
    }

    #[test]
    fn error_message_sets_notice_only() {
        let store = store_with_placeholder();
        let before = store.jobs();

        let outcome = route_text(r#"{"type":"error","message":"Plan limit reached"}"#, &store);

        assert_eq!(outcome, RouteOutcome::Notice);
        assert_eq!(store.notice().as_deref(), Some("Plan limit reached"));
        assert_eq!(store.jobs(), before);
    }

    #[test]
    fn unknown_job_update_is_rejected_without_panicking() {
        let store = JobStore::new(50);
        let outcome = route_text(
            r#"{"type":"job_status_changed","job_id":"ghost","status":"processing"}"#,
            &store,
        );
        assert_matches!(outcome, RouteOutcome::Rejected(RegistryError::UnknownJob(_)));
        assert!(store.jobs().is_empty());
    }

    #[test]
    fn terminal_job_is_not_moved_again() {
        let store = store_with_placeholder();
        route_text(r#"{"type":"job_completed","job_id":"j-1","result":{}}"#, &store);

        let outcome = route_text(
            r#"{"type":"job_status_changed","job_id":"j-1","status":"failed","error":"late"}"#,
            &store,
        );

        assert_matches!(outcome, RouteOutcome::Rejected(RegistryError::Terminal { .. }));
        assert_eq!(store.job("j-1").unwrap().status, JobStatus::Completed);
    }

    #[test]
    fn pong_and_connection_established_leave_registry_alone() {
        let store = store_with_placeholder();
        assert_eq!(route_text(r#"{"type":"pong"}"#, &store), RouteOutcome::Pong);
        assert_eq!(
            route_text(r#"{"type":"connection_established","user_id":"u-1"}"#, &store),
            RouteOutcome::Ignored
        );
        assert_eq!(store.jobs().len(), 1);
    }

    #[test]
    fn malformed_frame_is_reported() {
        let store = JobStore::new(50);
        assert_eq!(route_text("{oops", &store), RouteOutcome::Malformed);
        assert_eq!(
            route_text(r#"{"type":"mystery"}"#, &store),
            RouteOutcome::Malformed
        );
    }
}
