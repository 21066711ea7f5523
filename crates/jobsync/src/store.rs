//! Single-writer reactive store around the [`JobRegistry`].
//!
//! Every mutation goes through [`JobStore::update`] or one of the thin
//! helpers built on it. Writes are serialized by the underlying
//! [`watch::Sender`] and receivers are woken only when something actually
//! changed, so "apply then notify" holds without further locking.

use std::sync::Arc;

use contrax_core::job::Job;
use contrax_core::types::JobId;
use tokio::sync::watch;

use crate::error::RegistryError;
use crate::registry::JobRegistry;

/// Shared handle to the registry. Cheap to clone.
#[derive(Clone)]
pub struct JobStore {
    registry: Arc<watch::Sender<JobRegistry>>,
    /// Latest application-level error pushed by the server.
    notice: Arc<watch::Sender<Option<String>>>,
    max_terminal_jobs: usize,
}

impl JobStore {
    pub fn new(max_terminal_jobs: usize) -> Self {
        let (registry, _) = watch::channel(JobRegistry::new());
        let (notice, _) = watch::channel(None);
        Self {
            registry: Arc::new(registry),
            notice: Arc::new(notice),
            max_terminal_jobs,
        }
    }

    /// Receive the registry every time it changes.
    pub fn subscribe(&self) -> watch::Receiver<JobRegistry> {
        self.registry.subscribe()
    }

    /// Receive the server notice every time it changes.
    pub fn subscribe_notice(&self) -> watch::Receiver<Option<String>> {
        self.notice.subscribe()
    }

    /// Snapshot of all jobs, newest first.
    pub fn jobs(&self) -> Vec<Job> {
        self.registry.borrow().jobs().into_iter().cloned().collect()
    }

    pub fn job(&self, job_id: &str) -> Option<Job> {
        self.registry.borrow().get(job_id).cloned()
    }

    /// Read the registry without cloning it.
    pub fn read<R>(&self, f: impl FnOnce(&JobRegistry) -> R) -> R {
        f(&self.registry.borrow())
    }

    /// Run one registry mutation returning `Ok(changed)`.
    ///
    /// Receivers are notified only on `Ok(true)`. Terminal-job retention is
    /// enforced after every successful change.
    pub fn update(
        &self,
        f: impl FnOnce(&mut JobRegistry) -> Result<bool, RegistryError>,
    ) -> Result<bool, RegistryError> {
        self.modify(f, |outcome| matches!(outcome, Ok(true)))
    }

    /// Run a mutation; `changed` decides from its output whether receivers
    /// are notified.
    pub fn modify<R>(
        &self,
        f: impl FnOnce(&mut JobRegistry) -> R,
        changed: impl FnOnce(&R) -> bool,
    ) -> R {
        let max_terminal = self.max_terminal_jobs;
        let mut output = None;
        self.registry.send_if_modified(|registry| {
            let result = f(registry);
            let modified = changed(&result);
            if modified {
                let evicted = registry.enforce_retention(max_terminal);
                if !evicted.is_empty() {
                    tracing::debug!(count = evicted.len(), "Evicted finished jobs");
                }
            }
            output = Some(result);
            modified
        });
        // `send_if_modified` calls its closure exactly once, even with no
        // receivers, so `output` is always set here.
        output.expect("send_if_modified runs its closure exactly once")
    }

    // ---- convenience mutations ----

    pub fn replace_all(&self, jobs: Vec<Job>) -> usize {
        self.modify(|reg| reg.replace_all(jobs), |_| true)
    }

    pub fn insert_placeholder(&self, job: Job) -> bool {
        self.modify(|reg| reg.insert_placeholder(job), |inserted| *inserted)
    }

    pub fn mark_cancelled(&self, job_id: &str) -> bool {
        self.modify(|reg| reg.mark_cancelled(job_id), |marked| *marked)
    }

    pub fn evict(&self, job_id: &str) -> Option<Job> {
        self.modify(|reg| reg.evict(job_id), Option::is_some)
    }

    /// Ids of tracked jobs whose effective status is terminal.
    pub fn terminal_ids(&self) -> Vec<JobId> {
        self.read(|reg| {
            reg.jobs()
                .into_iter()
                .filter(|job| job.is_terminal())
                .map(|job| job.id.clone())
                .collect()
        })
    }

    // ---- server notice ----

    pub fn set_notice(&self, message: impl Into<String>) {
        self.notice.send_replace(Some(message.into()));
    }

    pub fn clear_notice(&self) {
        self.notice.send_if_modified(|notice| notice.take().is_some());
    }

    pub fn notice(&self) -> Option<String> {
        self.notice.borrow().clone()
    }
}
