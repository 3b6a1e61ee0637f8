//! Persistent job store.
//!
//! Owns the ProcessingJob lifecycle: every status change goes through
//! `validate_transition`, progress only moves forward, and each persisted
//! change is mirrored onto the progress broadcast channel.

use chrono::Utc;

use crate::db::job_repo::{self, JobRow};
use crate::db::Database;
use crate::model::JobResultPayload;

use super::progress::{JobProgressEvent, ProgressBroadcaster};
use super::state::{validate_transition, JobStatus};
use super::JobError;

/// Status snapshot returned to pollers.
#[derive(Debug, Clone, serde::Serialize)]
pub struct JobStatusReport {
    pub job_id: String,
    pub message_id: String,
    pub status: JobStatus,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResultPayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Persistent, state-machine-enforcing job store.
#[derive(Clone)]
pub struct JobStore {
    db: Database,
    broadcaster: ProgressBroadcaster,
}

impl JobStore {
    pub fn new(db: Database, broadcaster: ProgressBroadcaster) -> Self {
        Self { db, broadcaster }
    }

    pub fn broadcaster(&self) -> &ProgressBroadcaster {
        &self.broadcaster
    }

    /// Creates a new queued job for a message and returns its id.
    pub fn create_queued(&self, message_id: &str) -> Result<String, JobError> {
        let job_id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        let row = JobRow {
            id: job_id.clone(),
            message_id: message_id.to_string(),
            status: JobStatus::Queued.as_str().to_string(),
            progress: 0,
            result: None,
            error_message: None,
            queued_at: now.clone(),
            started_at: None,
            finished_at: None,
            updated_at: now,
        };
        job_repo::insert(&self.db, &row)?;

        self.broadcaster.send(JobProgressEvent::new(
            &job_id,
            message_id,
            JobStatus::Queued,
            0,
            "Job queued for processing",
        ));
        Ok(job_id)
    }

    /// Returns the id of the success-status job for a message, if any.
    pub fn find_success_for_message(&self, message_id: &str) -> Result<Option<String>, JobError> {
        Ok(job_repo::find_success_for_message(&self.db, message_id)?.map(|row| row.id))
    }

    /// queued -> processing. Sets `started_at`.
    pub fn start(&self, job_id: &str) -> Result<(), JobError> {
        let row = self.load(job_id)?;
        let from = parse_status(&row)?;
        validate_transition(from, JobStatus::Processing)?;

        let now = Utc::now().to_rfc3339();
        job_repo::update_status(
            &self.db,
            job_id,
            JobStatus::Processing.as_str(),
            Some(&now),
            None,
            None,
            None,
            &now,
        )?;

        self.broadcaster.send(JobProgressEvent::new(
            job_id,
            &row.message_id,
            JobStatus::Processing,
            row.progress,
            "Processing started",
        ));
        Ok(())
    }

    /// Raises progress toward `progress`. Monotonic: a lower value never
    /// overwrites a higher one.
    pub fn set_progress(&self, job_id: &str, progress: u8, message: &str) -> Result<(), JobError> {
        let row = self.load(job_id)?;
        let now = Utc::now().to_rfc3339();
        job_repo::raise_progress(&self.db, job_id, progress.min(100), &now)?;

        let status = parse_status(&row)?;
        self.broadcaster.send(JobProgressEvent::new(
            job_id,
            &row.message_id,
            status,
            progress.max(row.progress).min(100),
            message,
        ));
        Ok(())
    }

    /// processing -> success with the result payload; progress becomes 100.
    ///
    /// When another job already holds the success slot for this message id
    /// (two dispatches raced past the idempotency check), the write fails
    /// on the partial unique index and `SuccessExists` is returned; the
    /// caller resolves the job as superseded.
    pub fn complete_success(
        &self,
        job_id: &str,
        result: &JobResultPayload,
    ) -> Result<(), JobError> {
        let row = self.load(job_id)?;
        let from = parse_status(&row)?;
        validate_transition(from, JobStatus::Success)?;

        let result_json = serde_json::to_string(result).map_err(|e| {
            JobError::Database(crate::db::DatabaseError::CorruptColumn {
                column: "result",
                id: job_id.to_string(),
                reason: e.to_string(),
            })
        })?;

        let now = Utc::now().to_rfc3339();
        let update = job_repo::update_status(
            &self.db,
            job_id,
            JobStatus::Success.as_str(),
            None,
            Some(&now),
            Some(&result_json),
            None,
            &now,
        );
        match update {
            Ok(()) => {}
            Err(e) if e.is_constraint_violation() => {
                return Err(JobError::SuccessExists(row.message_id));
            }
            Err(e) => return Err(e.into()),
        }
        job_repo::raise_progress(&self.db, job_id, 100, &now)?;

        self.broadcaster.send(JobProgressEvent::new(
            job_id,
            &row.message_id,
            JobStatus::Success,
            100,
            "Processing completed successfully",
        ));
        Ok(())
    }

    /// processing -> failed with a descriptive error message.
    pub fn complete_failed(&self, job_id: &str, error_message: &str) -> Result<(), JobError> {
        let row = self.load(job_id)?;
        let from = parse_status(&row)?;
        validate_transition(from, JobStatus::Failed)?;

        let now = Utc::now().to_rfc3339();
        job_repo::update_status(
            &self.db,
            job_id,
            JobStatus::Failed.as_str(),
            None,
            Some(&now),
            None,
            Some(error_message),
            &now,
        )?;

        self.broadcaster.send(JobProgressEvent::new(
            job_id,
            &row.message_id,
            JobStatus::Failed,
            row.progress,
            error_message,
        ));
        Ok(())
    }

    /// Pure read for polling. Safe to call repeatedly.
    pub fn get_status(&self, job_id: &str) -> Result<JobStatusReport, JobError> {
        let row = self.load(job_id)?;
        let status = parse_status(&row)?;

        let result = match &row.result {
            Some(json) => Some(serde_json::from_str(json).map_err(|e| {
                JobError::Database(crate::db::DatabaseError::CorruptColumn {
                    column: "result",
                    id: row.id.clone(),
                    reason: e.to_string(),
                })
            })?),
            None => None,
        };

        Ok(JobStatusReport {
            job_id: row.id,
            message_id: row.message_id,
            status,
            progress: row.progress,
            result,
            error_message: row.error_message,
        })
    }

    fn load(&self, job_id: &str) -> Result<JobRow, JobError> {
        job_repo::find_by_id(&self.db, job_id)?
            .ok_or_else(|| JobError::NotFound(job_id.to_string()))
    }
}

fn parse_status(row: &JobRow) -> Result<JobStatus, JobError> {
    JobStatus::parse(&row.status).ok_or_else(|| {
        JobError::Database(crate::db::DatabaseError::CorruptColumn {
            column: "status",
            id: row.id.clone(),
            reason: format!("unknown status '{}'", row.status),
        })
    })
}
