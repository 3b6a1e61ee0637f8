pub mod candidates;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod extract;
pub mod jobs;
pub mod logging;
pub mod model;
pub mod processor;
pub mod reconcile;
pub mod service;
pub mod source;
pub mod storage;
pub mod worker;

pub use candidates::CandidateSelector;
pub use config::{load_config, Config, ReconcileConfig, RetryConfig};
pub use dispatch::{DispatchOutcome, DispatchedJob, Dispatcher, WorkItem};
pub use error::{ConfigError, InvexError, ProcessError, Result, StorageError, WorkerError};
pub use jobs::{JobError, JobProgressEvent, JobStatus, JobStatusReport, JobStore};
pub use model::{InvoiceRecord, JobResultPayload, ReconciliationStatus, RegistryEntry};
pub use service::PipelineService;
pub use source::{FetchedMessage, MessagePreview, MessageSource, SourceError};
pub use storage::{FsObjectStore, ObjectStore};
