pub mod progress;
pub mod state;
pub mod store;

pub use progress::{JobProgressEvent, ProgressBroadcaster};
pub use state::{validate_transition, JobStatus};
pub use store::{JobStatusReport, JobStore};

use thiserror::Error;

/// Errors from job lifecycle operations.
#[derive(Error, Debug)]
pub enum JobError {
    #[error("Job '{0}' not found")]
    NotFound(String),

    #[error("Invalid job transition: {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    /// A success-status job already exists for this message id. Raised
    /// when a success-write loses the dispatch race.
    #[error("A successful job already exists for message '{0}'")]
    SuccessExists(String),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),
}
