//! In-memory job registry.
//!
//! [`JobRegistry`] maps job ids to [`TrackedJob`] entries and implements
//! every mutation the router and the control API are allowed to make.
//! It is plain synchronous data; serialization of writers and change
//! notification live in [`JobStore`](crate::store::JobStore).
//!
//! Local optimistic changes are recorded as a [`PendingOverride`] on the
//! entry and cleared by the next authoritative state for that job.

use std::collections::HashMap;

use contrax_core::job::{clamp_progress, Job, JobStatus, JobUpdate};
use contrax_core::types::JobId;

use crate::error::RegistryError;
use crate::messages::{JobCompletedData, JobProgressData, JobStatusChangedData};

/// A local change not yet confirmed by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingOverride {
    /// Placeholder inserted after a successful create call; no server
    /// message about the job has been seen yet.
    Created,
    /// Status forced to cancelled after a successful cancel call.
    /// `confirmed` is the last status the server reported.
    Cancelled { confirmed: JobStatus },
}

/// Registry entry: the effective job view plus override bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedJob {
    job: Job,
    pending: Option<PendingOverride>,
    /// Order in which the job reached a terminal status; `Some` iff the
    /// effective status is terminal.
    finished_seq: Option<u64>,
}

impl TrackedJob {
    fn new(job: Job) -> Self {
        Self {
            job,
            pending: None,
            finished_seq: None,
        }
    }

    /// Effective job state, overrides included.
    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn pending(&self) -> Option<PendingOverride> {
        self.pending
    }

    /// Last status the server reported, ignoring an optimistic cancel.
    pub fn confirmed_status(&self) -> JobStatus {
        match self.pending {
            Some(PendingOverride::Cancelled { confirmed }) => confirmed,
            _ => self.job.status,
        }
    }

    fn refresh_finished(&mut self, counter: &mut u64) {
        if self.job.is_terminal() {
            if self.finished_seq.is_none() {
                *counter += 1;
                self.finished_seq = Some(*counter);
            }
        } else {
            self.finished_seq = None;
        }
    }
}

/// Job id to job state mapping.
#[derive(Debug, Clone, Default)]
pub struct JobRegistry {
    jobs: HashMap<JobId, TrackedJob>,
    finish_counter: u64,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn contains(&self, job_id: &str) -> bool {
        self.jobs.contains_key(job_id)
    }

    pub fn get(&self, job_id: &str) -> Option<&Job> {
        self.jobs.get(job_id).map(TrackedJob::job)
    }

    pub fn tracked(&self, job_id: &str) -> Option<&TrackedJob> {
        self.jobs.get(job_id)
    }

    /// All jobs, newest first.
    pub fn jobs(&self) -> Vec<&Job> {
        let mut jobs: Vec<&Job> = self.jobs.values().map(TrackedJob::job).collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        jobs
    }

    // ---- authoritative state ----

    /// Replace the whole registry with a server snapshot.
    ///
    /// Jobs missing from `jobs` are dropped and every override is
    /// discarded. Returns the number of jobs now tracked.
    pub fn replace_all(&mut self, jobs: Vec<Job>) -> usize {
        let previous = std::mem::take(&mut self.jobs);

        for mut job in jobs {
            job.progress = job.progress.map(clamp_progress);
            job.normalize_outcome();

            let mut tracked = TrackedJob::new(job);
            tracked.finished_seq = previous
                .get(&tracked.job.id)
                .and_then(|prev| prev.finished_seq);
            tracked.refresh_finished(&mut self.finish_counter);
            self.jobs.insert(tracked.job.id.clone(), tracked);
        }

        self.jobs.len()
    }

    /// Upsert the server's view of one job over any local entry.
    ///
    /// A status carried by the update is checked against the state machine
    /// from the last confirmed status, and a completion must come with a
    /// result. An unknown job is only inserted when the update carries
    /// enough to build a full snapshot.
    pub fn merge_subscribed(
        &mut self,
        job_id: &str,
        update: JobUpdate,
    ) -> Result<bool, RegistryError> {
        match self.jobs.get_mut(job_id) {
            Some(tracked) => {
                let confirmed = tracked.confirmed_status();
                if let Some(next) = update.status.filter(|next| *next != confirmed) {
                    if confirmed.is_terminal() {
                        return Err(RegistryError::Terminal {
                            job_id: job_id.to_string(),
                            status: confirmed,
                        });
                    }
                    if !confirmed.can_transition_to(next) {
                        return Err(RegistryError::InvalidTransition {
                            job_id: job_id.to_string(),
                            from: confirmed,
                            to: next,
                        });
                    }
                }

                let next = update.status.unwrap_or(confirmed);
                let known_result = confirmed == JobStatus::Completed && tracked.job.result.is_some();
                if next == JobStatus::Completed && update.result.is_none() && !known_result {
                    return Err(RegistryError::CompletionWithoutResult(job_id.to_string()));
                }

                let before = tracked.clone();
                // Without a status the update cannot settle an optimistic cancel.
                if update.status.is_some() || tracked.pending == Some(PendingOverride::Created) {
                    tracked.pending = None;
                }
                tracked.job.merge_update(update);
                tracked.refresh_finished(&mut self.finish_counter);
                Ok(*tracked != before)
            }
            None => {
                if update.status == Some(JobStatus::Completed) && update.result.is_none() {
                    return Err(RegistryError::CompletionWithoutResult(job_id.to_string()));
                }
                let job = update
                    .into_job(job_id)
                    .ok_or_else(|| RegistryError::IncompleteSnapshot(job_id.to_string()))?;
                let mut tracked = TrackedJob::new(job);
                tracked.refresh_finished(&mut self.finish_counter);
                self.jobs.insert(job_id.to_string(), tracked);
                Ok(true)
            }
        }
    }

    // ---- incremental server events ----

    /// Merge stage, progress, message, and ETA. Status is never touched.
    ///
    /// A progress value lower than the current one is dropped while the
    /// job is processing.
    pub fn apply_progress(&mut self, data: JobProgressData) -> Result<bool, RegistryError> {
        let tracked = self
            .jobs
            .get_mut(&data.job_id)
            .ok_or_else(|| RegistryError::UnknownJob(data.job_id.clone()))?;

        if tracked.job.is_terminal() {
            return Err(RegistryError::Terminal {
                job_id: data.job_id,
                status: tracked.job.status,
            });
        }

        let job = &mut tracked.job;
        let mut changed = false;

        if let Some(stage) = data.stage {
            if job.current_stage != stage {
                job.current_stage = stage;
                changed = true;
            }
        }
        if let Some(progress) = data.progress.map(clamp_progress) {
            let regresses = job.status == JobStatus::Processing
                && job.progress.is_some_and(|current| progress < current);
            if regresses {
                tracing::debug!(
                    job_id = %job.id,
                    progress,
                    current = ?job.progress,
                    "Dropping progress regression",
                );
            } else if job.progress != Some(progress) {
                job.progress = Some(progress);
                changed = true;
            }
        }
        if data.message.is_some() && job.message != data.message {
            job.message = data.message;
            changed = true;
        }
        if data.estimated_completion.is_some()
            && job.estimated_completion != data.estimated_completion
        {
            job.estimated_completion = data.estimated_completion;
            changed = true;
        }

        if tracked.pending == Some(PendingOverride::Created) {
            tracked.pending = None;
            changed = true;
        }
        Ok(changed)
    }

    /// Apply a status change reported by the server.
    ///
    /// Completion is not applied here: it arrives with its result through
    /// [`apply_completed`](Self::apply_completed) or a snapshot. While a
    /// cancel is pending, non-terminal changes only update the confirmed
    /// status.
    pub fn apply_status_change(
        &mut self,
        data: JobStatusChangedData,
    ) -> Result<bool, RegistryError> {
        let tracked = self
            .jobs
            .get_mut(&data.job_id)
            .ok_or_else(|| RegistryError::UnknownJob(data.job_id.clone()))?;

        let confirmed = tracked.confirmed_status();
        let next = data.status;

        if next == confirmed {
            let was_created = tracked.pending == Some(PendingOverride::Created);
            if was_created {
                tracked.pending = None;
            }
            return Ok(was_created);
        }
        if confirmed.is_terminal() {
            return Err(RegistryError::Terminal {
                job_id: data.job_id,
                status: confirmed,
            });
        }
        if !confirmed.can_transition_to(next) {
            return Err(RegistryError::InvalidTransition {
                job_id: data.job_id,
                from: confirmed,
                to: next,
            });
        }
        if next == JobStatus::Completed {
            return Err(RegistryError::CompletionWithoutResult(data.job_id));
        }

        if let Some(PendingOverride::Cancelled { .. }) = tracked.pending {
            if !next.is_terminal() {
                tracked.pending = Some(PendingOverride::Cancelled { confirmed: next });
                return Ok(true);
            }
        }

        tracked.pending = None;
        tracked.job.status = next;
        tracked.job.error_message = if next == JobStatus::Failed {
            data.error
        } else {
            None
        };
        tracked.job.normalize_outcome();
        tracked.refresh_finished(&mut self.finish_counter);
        Ok(true)
    }

    /// Mark a job completed and attach its result.
    ///
    /// Accepted from any non-terminal confirmed status, including while a
    /// local cancel is pending: the server outcome wins.
    pub fn apply_completed(&mut self, data: JobCompletedData) -> Result<bool, RegistryError> {
        let tracked = self
            .jobs
            .get_mut(&data.job_id)
            .ok_or_else(|| RegistryError::UnknownJob(data.job_id.clone()))?;

        let confirmed = tracked.confirmed_status();
        if confirmed.is_terminal() {
            return Err(RegistryError::Terminal {
                job_id: data.job_id,
                status: confirmed,
            });
        }

        let Some(result) = data.result else {
            return Err(RegistryError::CompletionWithoutResult(data.job_id));
        };

        tracked.pending = None;
        tracked.job.status = JobStatus::Completed;
        tracked.job.result = Some(result);
        tracked.job.error_message = None;
        tracked.refresh_finished(&mut self.finish_counter);
        Ok(true)
    }

    // ---- optimistic local changes ----

    /// Insert a pending placeholder for a freshly created job.
    ///
    /// Does nothing if the server already told us about the job.
    pub fn insert_placeholder(&mut self, job: Job) -> bool {
        if self.jobs.contains_key(&job.id) {
            return false;
        }
        let mut tracked = TrackedJob::new(job);
        tracked.pending = Some(PendingOverride::Created);
        self.jobs.insert(tracked.job.id.clone(), tracked);
        true
    }

    /// Force a job to cancelled after the server accepted a cancel call.
    ///
    /// Applies regardless of the current status, terminal ones included.
    /// Returns `false` if the job is not tracked.
    pub fn mark_cancelled(&mut self, job_id: &str) -> bool {
        let Some(tracked) = self.jobs.get_mut(job_id) else {
            return false;
        };

        let confirmed = tracked.confirmed_status();
        tracked.pending = if confirmed == JobStatus::Cancelled {
            None
        } else {
            Some(PendingOverride::Cancelled { confirmed })
        };
        tracked.job.status = JobStatus::Cancelled;
        tracked.job.normalize_outcome();
        tracked.refresh_finished(&mut self.finish_counter);
        true
    }

    // ---- eviction ----

    /// Remove a job from the registry.
    pub fn evict(&mut self, job_id: &str) -> Option<Job> {
        self.jobs.remove(job_id).map(|tracked| tracked.job)
    }

    /// Keep at most `max_terminal` terminal jobs, evicting the ones that
    /// finished first. Returns the evicted ids.
    pub fn enforce_retention(&mut self, max_terminal: usize) -> Vec<JobId> {
        let mut finished: Vec<(u64, JobId)> = self
            .jobs
            .iter()
            .filter_map(|(id, t)| t.finished_seq.map(|seq| (seq, id.clone())))
            .collect();

        if finished.len() <= max_terminal {
            return Vec::new();
        }

        finished.sort_unstable();
        let excess = finished.len() - max_terminal;
        finished
            .into_iter()
            .take(excess)
            .map(|(_, id)| {
                self.jobs.remove(&id);
                id
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use contrax_core::job::{JobType, DEFAULT_FAILURE_MESSAGE};

    use super::*;

    fn server_job(id: &str, status: JobStatus) -> Job {
        let mut job = Job::placeholder(id, JobType::ContractAnalysis, format!("Contract {id}"));
        job.status = status;
        job.current_stage = "server".into();
        if status == JobStatus::Completed {
            job.result = Some(serde_json::json!({"ok": true}));
        }
        job
    }

    fn progress(id: &str, stage: &str, value: f64) -> JobProgressData {
        JobProgressData {
            job_id: id.into(),
            stage: Some(stage.into()),
            progress: Some(value),
            ..Default::default()
        }
    }

    fn status(id: &str, status: JobStatus, error: Option<&str>) -> JobStatusChangedData {
        JobStatusChangedData {
            job_id: id.into(),
            status,
            error: error.map(String::from),
        }
    }

    fn completed(id: &str) -> JobCompletedData {
        JobCompletedData {
            job_id: id.into(),
            result: Some(serde_json::json!({"clauses": 12})),
        }
    }

    // -----------------------------------------------------------------------
    // Snapshots
    // -----------------------------------------------------------------------

    #[test]
    fn snapshot_fully_replaces_registry() {
        let mut reg = JobRegistry::new();
        reg.replace_all(vec![
            server_job("a", JobStatus::Processing),
            server_job("b", JobStatus::Pending),
        ]);
        reg.insert_placeholder(Job::placeholder("c", JobType::DocumentOcr, "local"));

        let count = reg.replace_all(vec![server_job("b", JobStatus::Processing)]);

        assert_eq!(count, 1);
        assert!(!reg.contains("a"));
        assert!(!reg.contains("c"));
        assert_eq!(reg.get("b").unwrap().status, JobStatus::Processing);
    }

    #[test]
    fn empty_snapshot_clears_registry() {
        let mut reg = JobRegistry::new();
        reg.replace_all(vec![server_job("a", JobStatus::Pending)]);
        assert_eq!(reg.replace_all(Vec::new()), 0);
        assert!(reg.is_empty());
    }

    #[test]
    fn snapshot_clears_pending_overrides() {
        let mut reg = JobRegistry::new();
        reg.replace_all(vec![server_job("a", JobStatus::Processing)]);
        reg.mark_cancelled("a");

        reg.replace_all(vec![server_job("a", JobStatus::Processing)]);

        let tracked = reg.tracked("a").unwrap();
        assert!(tracked.pending().is_none());
        assert_eq!(tracked.job().status, JobStatus::Processing);
    }

    #[test]
    fn jobs_are_listed_newest_first() {
        let mut reg = JobRegistry::new();
        let mut old = server_job("old", JobStatus::Pending);
        old.created_at = "2026-01-01T00:00:00Z".parse().unwrap();
        let mut new = server_job("new", JobStatus::Pending);
        new.created_at = "2026-02-01T00:00:00Z".parse().unwrap();
        reg.replace_all(vec![old, new]);

        let ids: Vec<&str> = reg.jobs().iter().map(|j| j.id.as_str()).collect();
        assert_eq!(ids, ["new", "old"]);
    }

    // -----------------------------------------------------------------------
    // Subscribed merge
    // -----------------------------------------------------------------------

    #[test]
    fn subscribed_merges_over_placeholder() {
        let mut reg = JobRegistry::new();
        reg.insert_placeholder(Job::placeholder("j", JobType::ContractAnalysis, "Contrato A"));

        let changed = reg
            .merge_subscribed(
                "j",
                JobUpdate {
                    status: Some(JobStatus::Processing),
                    current_stage: Some("ocr".into()),
                    ..Default::default()
                },
            )
            .unwrap();

        assert!(changed);
        let tracked = reg.tracked("j").unwrap();
        assert!(tracked.pending().is_none());
        let job = tracked.job();
        assert_eq!(job.job_type, JobType::ContractAnalysis);
        assert_eq!(job.title, "Contrato A");
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.current_stage, "ocr");
    }

    #[test]
    fn subscribed_unknown_job_needs_full_fields() {
        let mut reg = JobRegistry::new();
        let err = reg
            .merge_subscribed(
                "j",
                JobUpdate {
                    current_stage: Some("ocr".into()),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert_eq!(err, RegistryError::IncompleteSnapshot("j".into()));
        assert!(reg.is_empty());

        reg.merge_subscribed(
            "j",
            JobUpdate {
                status: Some(JobStatus::Pending),
                job_type: Some(JobType::FullPipeline),
                title: Some("Contrato C".into()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(reg.get("j").unwrap().title, "Contrato C");
    }

    #[test]
    fn subscribed_cannot_reopen_terminal_job() {
        let mut reg = JobRegistry::new();
        reg.insert_placeholder(Job::placeholder("j", JobType::ContractAnalysis, "A"));
        reg.apply_completed(completed("j")).unwrap();

        let err = reg
            .merge_subscribed(
                "j",
                JobUpdate {
                    status: Some(JobStatus::Processing),
                    ..Default::default()
                },
            )
            .unwrap_err();

        assert_eq!(
            err,
            RegistryError::Terminal {
                job_id: "j".into(),
                status: JobStatus::Completed,
            }
        );
        let job = reg.get("j").unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.result.as_ref().unwrap()["clauses"], 12);
    }

    #[test]
    fn subscribed_cannot_move_processing_back_to_pending() {
        let mut reg = JobRegistry::new();
        reg.replace_all(vec![server_job("j", JobStatus::Processing)]);

        let err = reg
            .merge_subscribed(
                "j",
                JobUpdate {
                    status: Some(JobStatus::Pending),
                    ..Default::default()
                },
            )
            .unwrap_err();

        assert_eq!(
            err,
            RegistryError::InvalidTransition {
                job_id: "j".into(),
                from: JobStatus::Processing,
                to: JobStatus::Pending,
            }
        );
        assert_eq!(reg.get("j").unwrap().status, JobStatus::Processing);
    }

    #[test]
    fn subscribed_same_terminal_status_still_merges() {
        let mut reg = JobRegistry::new();
        reg.insert_placeholder(Job::placeholder("j", JobType::ContractAnalysis, "A"));
        reg.apply_completed(completed("j")).unwrap();

        let changed = reg
            .merge_subscribed(
                "j",
                JobUpdate {
                    status: Some(JobStatus::Completed),
                    current_stage: Some("done".into()),
                    ..Default::default()
                },
            )
            .unwrap();

        assert!(changed);
        let job = reg.get("j").unwrap();
        assert_eq!(job.current_stage, "done");
        assert!(job.result.is_some());
    }

    #[test]
    fn subscribed_completion_needs_result() {
        let mut reg = JobRegistry::new();
        reg.insert_placeholder(Job::placeholder("j", JobType::ContractAnalysis, "A"));
        let completion = JobUpdate {
            status: Some(JobStatus::Completed),
            job_type: Some(JobType::ContractAnalysis),
            ..Default::default()
        };

        assert_eq!(
            reg.merge_subscribed("j", completion.clone()).unwrap_err(),
            RegistryError::CompletionWithoutResult("j".into())
        );
        assert_eq!(reg.get("j").unwrap().status, JobStatus::Pending);

        assert_eq!(
            reg.merge_subscribed("new", completion.clone()).unwrap_err(),
            RegistryError::CompletionWithoutResult("new".into())
        );
        assert!(!reg.contains("new"));

        let with_result = JobUpdate {
            result: Some(serde_json::json!({"clauses": 3})),
            ..completion
        };
        reg.merge_subscribed("j", with_result).unwrap();
        let job = reg.get("j").unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.result.as_ref().unwrap()["clauses"], 3);
    }

    #[test]
    fn subscribed_without_status_keeps_pending_cancel() {
        let mut reg = JobRegistry::new();
        reg.replace_all(vec![server_job("j", JobStatus::Processing)]);
        reg.mark_cancelled("j");

        reg.merge_subscribed(
            "j",
            JobUpdate {
                current_stage: Some("llm".into()),
                ..Default::default()
            },
        )
        .unwrap();

        let tracked = reg.tracked("j").unwrap();
        assert_eq!(tracked.job().status, JobStatus::Cancelled);
        assert_eq!(
            tracked.pending(),
            Some(PendingOverride::Cancelled {
                confirmed: JobStatus::Processing,
            })
        );
    }

    #[test]
    fn completion_without_result_is_rejected() {
        let mut reg = JobRegistry::new();
        reg.insert_placeholder(Job::placeholder("j", JobType::ContractAnalysis, "A"));

        let err = reg
            .apply_completed(JobCompletedData {
                job_id: "j".into(),
                result: None,
            })
            .unwrap_err();

        assert_eq!(err, RegistryError::CompletionWithoutResult("j".into()));
        assert_eq!(reg.get("j").unwrap().status, JobStatus::Pending);
    }

    // -----------------------------------------------------------------------
    // Progress
    // -----------------------------------------------------------------------

    #[test]
    fn progress_sequence_keeps_last_value_and_status() {
        let mut reg = JobRegistry::new();
        reg.replace_all(vec![server_job("j", JobStatus::Processing)]);

        for (i, value) in [0.1, 0.25, 0.25, 0.5, 0.9].into_iter().enumerate() {
            reg.apply_progress(progress("j", &format!("step-{i}"), value))
                .unwrap();
        }

        let job = reg.get("j").unwrap();
        assert_eq!(job.progress, Some(0.9));
        assert_eq!(job.current_stage, "step-4");
        assert_eq!(job.status, JobStatus::Processing);
    }

    #[test]
    fn progress_only_touches_its_fields() {
        let mut reg = JobRegistry::new();
        reg.replace_all(vec![server_job("j", JobStatus::Pending)]);
        let before = reg.get("j").unwrap().clone();

        reg.apply_progress(JobProgressData {
            job_id: "j".into(),
            message: Some("Reading page 3".into()),
            ..Default::default()
        })
        .unwrap();

        let after = reg.get("j").unwrap();
        assert_eq!(after.message.as_deref(), Some("Reading page 3"));
        assert_eq!(after.current_stage, before.current_stage);
        assert_eq!(after.progress, before.progress);
        assert_eq!(after.title, before.title);
        assert_eq!(after.status, before.status);
    }

    #[test]
    fn progress_regression_is_dropped_while_processing() {
        let mut reg = JobRegistry::new();
        reg.replace_all(vec![server_job("j", JobStatus::Processing)]);
        reg.apply_progress(progress("j", "llm", 0.6)).unwrap();

        reg.apply_progress(progress("j", "llm", 0.3)).unwrap();

        assert_eq!(reg.get("j").unwrap().progress, Some(0.6));
    }

    #[test]
    fn progress_is_clamped() {
        let mut reg = JobRegistry::new();
        reg.replace_all(vec![server_job("j", JobStatus::Processing)]);
        reg.apply_progress(progress("j", "llm", 1.4)).unwrap();
        assert_eq!(reg.get("j").unwrap().progress, Some(1.0));
    }

    #[test]
    fn progress_for_unknown_job_is_rejected() {
        let mut reg = JobRegistry::new();
        assert_matches!(
            reg.apply_progress(progress("ghost", "ocr", 0.1)),
            Err(RegistryError::UnknownJob(id)) if id == "ghost"
        );
        assert!(reg.is_empty());
    }

    #[test]
    fn progress_for_terminal_job_is_rejected() {
        let mut reg = JobRegistry::new();
        reg.replace_all(vec![server_job("j", JobStatus::Completed)]);
        assert_matches!(
            reg.apply_progress(progress("j", "ocr", 0.1)),
            Err(RegistryError::Terminal { status: JobStatus::Completed, .. })
        );
    }

    #[test]
    fn identical_progress_reports_no_change() {
        let mut reg = JobRegistry::new();
        reg.replace_all(vec![server_job("j", JobStatus::Processing)]);
        assert!(reg.apply_progress(progress("j", "ocr", 0.2)).unwrap());
        assert!(!reg.apply_progress(progress("j", "ocr", 0.2)).unwrap());
    }

    // -----------------------------------------------------------------------
    // Status changes
    // -----------------------------------------------------------------------

    #[test]
    fn status_change_to_failed_sets_error() {
        let mut reg = JobRegistry::new();
        reg.replace_all(vec![server_job("j", JobStatus::Processing)]);

        reg.apply_status_change(status("j", JobStatus::Failed, Some("unreadable pdf")))
            .unwrap();

        let job = reg.get("j").unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_message.as_deref(), Some("unreadable pdf"));
        assert!(job.result.is_none());
    }

    #[test]
    fn failure_without_reason_gets_default_message() {
        let mut reg = JobRegistry::new();
        reg.replace_all(vec![server_job("j", JobStatus::Pending)]);
        reg.apply_status_change(status("j", JobStatus::Failed, None))
            .unwrap();
        assert_eq!(
            reg.get("j").unwrap().error_message.as_deref(),
            Some(DEFAULT_FAILURE_MESSAGE)
        );
    }

    #[test]
    fn status_cannot_leave_terminal_state() {
        let mut reg = JobRegistry::new();
        reg.replace_all(vec![server_job("j", JobStatus::Failed)]);
        assert_matches!(
            reg.apply_status_change(status("j", JobStatus::Processing, None)),
            Err(RegistryError::Terminal { status: JobStatus::Failed, .. })
        );
        assert_eq!(reg.get("j").unwrap().status, JobStatus::Failed);
    }

    #[test]
    fn status_cannot_move_backwards() {
        let mut reg = JobRegistry::new();
        reg.replace_all(vec![server_job("j", JobStatus::Processing)]);
        assert_matches!(
            reg.apply_status_change(status("j", JobStatus::Pending, None)),
            Err(RegistryError::InvalidTransition {
                from: JobStatus::Processing,
                to: JobStatus::Pending,
                ..
            })
        );
    }

    #[test]
    fn completion_requires_result_message() {
        let mut reg = JobRegistry::new();
        reg.replace_all(vec![server_job("j", JobStatus::Processing)]);
        assert_matches!(
            reg.apply_status_change(status("j", JobStatus::Completed, None)),
            Err(RegistryError::CompletionWithoutResult(_))
        );
        assert_eq!(reg.get("j").unwrap().status, JobStatus::Processing);
    }

    // -----------------------------------------------------------------------
    // Completion
    // -----------------------------------------------------------------------

    #[test]
    fn completed_attaches_result_and_keeps_progress() {
        let mut reg = JobRegistry::new();
        reg.insert_placeholder(Job::placeholder("j", JobType::ContractAnalysis, "Contrato A"));
        reg.apply_progress(progress("j", "ocr", 0.4)).unwrap();

        reg.apply_completed(completed("j")).unwrap();

        let job = reg.get("j").unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.result.as_ref().unwrap()["clauses"], 12);
        assert_eq!(job.progress, Some(0.4));
        assert_eq!(job.current_stage, "ocr");
    }

    #[test]
    fn completed_twice_is_rejected() {
        let mut reg = JobRegistry::new();
        reg.replace_all(vec![server_job("j", JobStatus::Processing)]);
        reg.apply_completed(completed("j")).unwrap();
        assert_matches!(
            reg.apply_completed(completed("j")),
            Err(RegistryError::Terminal { .. })
        );
    }

    // -----------------------------------------------------------------------
    // Optimistic create and cancel
    // -----------------------------------------------------------------------

    #[test]
    fn placeholder_is_pending_with_created_override() {
        let mut reg = JobRegistry::new();
        assert!(reg.insert_placeholder(Job::placeholder("j", JobType::ContractAnalysis, "A")));

        let tracked = reg.tracked("j").unwrap();
        assert_eq!(tracked.pending(), Some(PendingOverride::Created));
        assert_eq!(tracked.job().status, JobStatus::Pending);
    }

    #[test]
    fn placeholder_does_not_overwrite_server_state() {
        let mut reg = JobRegistry::new();
        reg.replace_all(vec![server_job("j", JobStatus::Processing)]);
        assert!(!reg.insert_placeholder(Job::placeholder("j", JobType::DocumentOcr, "late")));
        assert_eq!(reg.get("j").unwrap().status, JobStatus::Processing);
    }

    #[test]
    fn first_server_event_clears_created_override() {
        let mut reg = JobRegistry::new();
        reg.insert_placeholder(Job::placeholder("j", JobType::ContractAnalysis, "A"));
        reg.apply_progress(progress("j", "ocr", 0.1)).unwrap();
        assert!(reg.tracked("j").unwrap().pending().is_none());
    }

    #[test]
    fn cancel_unknown_job_is_noop() {
        let mut reg = JobRegistry::new();
        reg.replace_all(vec![server_job("a", JobStatus::Processing)]);
        assert!(!reg.mark_cancelled("ghost"));
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.get("a").unwrap().status, JobStatus::Processing);
    }

    #[test]
    fn cancel_applies_regardless_of_prior_status() {
        for prior in [
            JobStatus::Pending,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            let mut reg = JobRegistry::new();
            reg.replace_all(vec![server_job("j", prior)]);

            assert!(reg.mark_cancelled("j"));

            let tracked = reg.tracked("j").unwrap();
            assert_eq!(tracked.job().status, JobStatus::Cancelled, "from {prior}");
            assert_eq!(
                tracked.pending(),
                Some(PendingOverride::Cancelled { confirmed: prior })
            );
            assert!(tracked.job().result.is_none());
            assert!(tracked.job().error_message.is_none());
        }
    }

    #[test]
    fn pending_cancel_tracks_non_terminal_server_status() {
        let mut reg = JobRegistry::new();
        reg.replace_all(vec![server_job("j", JobStatus::Pending)]);
        reg.mark_cancelled("j");

        reg.apply_status_change(status("j", JobStatus::Processing, None))
            .unwrap();

        let tracked = reg.tracked("j").unwrap();
        assert_eq!(tracked.job().status, JobStatus::Cancelled);
        assert_eq!(tracked.confirmed_status(), JobStatus::Processing);
    }

    #[test]
    fn server_terminal_status_resolves_pending_cancel() {
        let mut reg = JobRegistry::new();
        reg.replace_all(vec![server_job("j", JobStatus::Processing)]);
        reg.mark_cancelled("j");

        reg.apply_status_change(status("j", JobStatus::Cancelled, None))
            .unwrap();

        let tracked = reg.tracked("j").unwrap();
        assert!(tracked.pending().is_none());
        assert_eq!(tracked.job().status, JobStatus::Cancelled);
    }

    #[test]
    fn server_completion_wins_over_pending_cancel() {
        let mut reg = JobRegistry::new();
        reg.replace_all(vec![server_job("j", JobStatus::Processing)]);
        reg.mark_cancelled("j");

        reg.apply_completed(completed("j")).unwrap();

        let tracked = reg.tracked("j").unwrap();
        assert!(tracked.pending().is_none());
        assert_eq!(tracked.job().status, JobStatus::Completed);
        assert!(tracked.job().result.is_some());
    }

    // -----------------------------------------------------------------------
    // Retention
    // -----------------------------------------------------------------------

    #[test]
    fn retention_evicts_earliest_finished_jobs() {
        let mut reg = JobRegistry::new();
        reg.replace_all(vec![
            server_job("a", JobStatus::Processing),
            server_job("b", JobStatus::Processing),
            server_job("c", JobStatus::Processing),
            server_job("live", JobStatus::Processing),
        ]);
        reg.apply_completed(completed("b")).unwrap();
        reg.apply_status_change(status("a", JobStatus::Failed, None))
            .unwrap();
        reg.mark_cancelled("c");

        let evicted = reg.enforce_retention(1);

        assert_eq!(evicted, vec!["b".to_string(), "a".to_string()]);
        assert!(reg.contains("c"));
        assert!(reg.contains("live"));
    }

    #[test]
    fn retention_never_evicts_active_jobs() {
        let mut reg = JobRegistry::new();
        reg.replace_all(vec![
            server_job("a", JobStatus::Pending),
            server_job("b", JobStatus::Processing),
        ]);
        assert!(reg.enforce_retention(0).is_empty());
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn snapshot_preserves_finish_order() {
        let mut reg = JobRegistry::new();
        reg.replace_all(vec![
            server_job("a", JobStatus::Processing),
            server_job("b", JobStatus::Processing),
        ]);
        reg.apply_completed(completed("a")).unwrap();
        reg.apply_completed(completed("b")).unwrap();

        reg.replace_all(vec![
            server_job("b", JobStatus::Completed),
            server_job("a", JobStatus::Completed),
        ]);

        assert_eq!(reg.enforce_retention(1), vec!["a".to_string()]);
    }

    #[test]
    fn evict_removes_entry() {
        let mut reg = JobRegistry::new();
        reg.replace_all(vec![server_job("a", JobStatus::Completed)]);
        assert_eq!(reg.evict("a").map(|j| j.id), Some("a".to_string()));
        assert!(reg.evict("a").is_none());
    }
}
