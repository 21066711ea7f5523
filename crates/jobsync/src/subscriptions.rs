//! Subscription manager.
//!
//! Remembers which jobs the consumer wants pushed updates for. A
//! `subscribe_job` is sent immediately when the channel is connected;
//! either way the id is kept and replayed after every (re)connect, right
//! after the `get_active_jobs` snapshot request.

use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use contrax_core::types::JobId;

use crate::connection::ChannelLink;
use crate::messages::ClientMessage;
use crate::store::JobStore;

/// Shared subscription set. Cheap to clone.
#[derive(Clone)]
pub struct SubscriptionManager {
    wanted: Arc<Mutex<BTreeSet<JobId>>>,
    link: Arc<ChannelLink>,
}

impl SubscriptionManager {
    pub fn new(link: Arc<ChannelLink>) -> Self {
        Self {
            wanted: Arc::new(Mutex::new(BTreeSet::new())),
            link,
        }
    }

    /// Ask for live updates about `job_id`.
    ///
    /// Returns `true` when the request went out on the live channel, and
    /// `false` when it was only recorded for the next connect.
    pub fn subscribe(&self, job_id: &str) -> bool {
        self.lock().insert(job_id.to_string());

        let sent = self.link.send(ClientMessage::SubscribeJob {
            job_id: job_id.to_string(),
        });
        if sent {
            tracing::debug!(job_id, "Subscription requested");
        } else {
            tracing::debug!(job_id, "Channel offline, subscription deferred to next connect");
        }
        sent
    }

    /// Stop replaying `job_id` on reconnect. The server has no matching
    /// message, so pushes already flowing on this connection continue.
    pub fn unsubscribe(&self, job_id: &str) -> bool {
        self.lock().remove(job_id)
    }

    /// Currently remembered job ids, sorted.
    pub fn subscribed(&self) -> Vec<JobId> {
        self.lock().iter().cloned().collect()
    }

    /// Messages to send right after a connection opens: one snapshot
    /// request, then one subscribe per remembered non-terminal job.
    ///
    /// Ids whose registry entry is terminal are forgotten.
    pub fn resync_messages(&self, store: &JobStore) -> Vec<ClientMessage> {
        let terminal: HashSet<JobId> = store.terminal_ids().into_iter().collect();
        let mut wanted = self.lock();
        wanted.retain(|id| !terminal.contains(id));

        std::iter::once(ClientMessage::GetActiveJobs)
            .chain(wanted.iter().map(|job_id| ClientMessage::SubscribeJob {
                job_id: job_id.clone(),
            }))
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeSet<JobId>> {
        self.wanted.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
