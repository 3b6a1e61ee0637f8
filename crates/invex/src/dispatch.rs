//! Job dispatcher.
//!
//! Turns operator-selected message ids into queued job records and work
//! items. Idempotent per message id: an existing success-status job is
//! returned as-is and nothing is enqueued. The success-lookup-then-insert
//! here is race-safe because new jobs are always inserted as `queued`
//! (never touching the success uniqueness index); two dispatches racing
//! before either succeeds may both enqueue, and the store's unique index
//! decides the winner at success-write time.

use crossbeam_channel::Sender;
use serde::Serialize;

use crate::error::{InvexError, Result, WorkerError};
use crate::jobs::{JobStatus, JobStore};

/// A unit of work handed to the extraction worker pool.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub job_id: String,
    pub message_id: String,
    pub label_after: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DispatchedJob {
    pub job_id: String,
    pub message_id: String,
    pub status: JobStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct DispatchOutcome {
    pub jobs: Vec<DispatchedJob>,
    pub queued_count: usize,
}

pub struct Dispatcher {
    jobs: JobStore,
    queue: Sender<WorkItem>,
}

impl Dispatcher {
    pub fn new(jobs: JobStore, queue: Sender<WorkItem>) -> Self {
        Self { jobs, queue }
    }

    /// Dispatches the given message ids. Duplicates within the request are
    /// collapsed to their first occurrence. Does not consult the message
    /// source.
    pub fn dispatch(&self, message_ids: &[String], label_after: bool) -> Result<DispatchOutcome> {
        if message_ids.is_empty() {
            return Err(InvexError::Validation(
                "message_ids cannot be empty".to_string(),
            ));
        }
        if message_ids.iter().any(|id| id.trim().is_empty()) {
            return Err(InvexError::Validation(
                "message_ids must not contain blank ids".to_string(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        let mut jobs = Vec::new();
        let mut queued_count = 0;

        for message_id in message_ids {
            if !seen.insert(message_id.as_str()) {
                log::warn!("Duplicate message id in request: {}", message_id);
                continue;
            }

            if let Some(job_id) = self.jobs.find_success_for_message(message_id)? {
                log::info!(
                    "Message {} already processed by job {}, skipping",
                    message_id,
                    job_id
                );
                jobs.push(DispatchedJob {
                    job_id,
                    message_id: message_id.clone(),
                    status: JobStatus::Success,
                });
                continue;
            }

            let job_id = self.jobs.create_queued(message_id)?;
            self.queue
                .send(WorkItem {
                    job_id: job_id.clone(),
                    message_id: message_id.clone(),
                    label_after,
                })
                .map_err(|_| InvexError::Worker(WorkerError::ChannelClosed))?;

            jobs.push(DispatchedJob {
                job_id,
                message_id: message_id.clone(),
                status: JobStatus::Queued,
            });
            queued_count += 1;
        }

        Ok(DispatchOutcome { jobs, queued_count })
    }
}
