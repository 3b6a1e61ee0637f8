//! Job state machine.
//!
//! `queued -> processing -> {success | failed}`. Success and failed are
//! terminal. The validator is pure; persistence lives in `store`.

use serde::{Deserialize, Serialize};

use super::JobError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Success,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Success => "success",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(JobStatus::Queued),
            "processing" => Some(JobStatus::Processing),
            "success" => Some(JobStatus::Success),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    /// Terminal states admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validates a status transition. The only legal edges are
/// queued->processing, processing->success and processing->failed.
pub fn validate_transition(from: JobStatus, to: JobStatus) -> Result<(), JobError> {
    use JobStatus::*;
    match (from, to) {
        (Queued, Processing) | (Processing, Success) | (Processing, Failed) => Ok(()),
        _ => Err(JobError::InvalidTransition { from, to }),
    }
}
