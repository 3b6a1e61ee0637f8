//! Job progress broadcast for live subscribers.
//!
//! Polling the job store is the source of truth; these events are a
//! best-effort mirror for dashboards and tests.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::state::JobStatus;

/// Progress event for a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobProgressEvent {
    pub job_id: String,
    pub message_id: String,
    pub status: JobStatus,
    /// Progress in [0, 100].
    pub progress: u8,
    /// Human-readable description of the current step.
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl JobProgressEvent {
    pub fn new(
        job_id: &str,
        message_id: &str,
        status: JobStatus,
        progress: u8,
        message: &str,
    ) -> Self {
        Self {
            job_id: job_id.to_string(),
            message_id: message_id.to_string(),
            status,
            progress,
            message: message.to_string(),
            timestamp: Utc::now(),
        }
    }
}

/// Broadcasts job progress events to any number of subscribers.
#[derive(Clone)]
pub struct ProgressBroadcaster {
    sender: Arc<broadcast::Sender<JobProgressEvent>>,
}

impl ProgressBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Sends an event. No active receivers is fine; the error is ignored.
    pub fn send(&self, event: JobProgressEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobProgressEvent> {
        self.sender.subscribe()
    }
}

impl Default for ProgressBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}
