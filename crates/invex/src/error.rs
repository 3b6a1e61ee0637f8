use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum InvexError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Message source error: {0}")]
    Source(#[from] crate::source::SourceError),

    #[error("Processing error: {0}")]
    Process(#[from] ProcessError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Job error: {0}")]
    Job(#[from] crate::jobs::JobError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },
}

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Unsupported document type: {0}")]
    UnsupportedType(String),

    #[error("Failed to process PDF: {0}")]
    PdfProcessing(String),

    #[error("Failed to process image: {0}")]
    ImageProcessing(String),

    #[error("OCR failed: {0}")]
    OcrFailed(String),

    #[error("Text extraction failed: {0}")]
    TextExtraction(String),
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Invalid object key '{0}'")]
    InvalidKey(String),

    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write object '{path}': {source}")]
    WriteObject {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read object '{path}': {source}")]
    ReadObject {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StorageError {
    /// Whether the failure is worth retrying. Interrupted and timed-out
    /// I/O may succeed on a later attempt; everything else is permanent.
    pub fn is_transient(&self) -> bool {
        use std::io::ErrorKind;
        let source = match self {
            StorageError::CreateDirectory { source, .. } => source,
            StorageError::WriteObject { source, .. } => source,
            StorageError::ReadObject { source, .. } => source,
            StorageError::InvalidKey(_) => return false,
        };
        matches!(
            source.kind(),
            ErrorKind::Interrupted | ErrorKind::TimedOut | ErrorKind::WouldBlock
        )
    }
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Failed to spawn worker: {0}")]
    SpawnFailed(String),

    #[error("Worker channel closed unexpectedly")]
    ChannelClosed,
}

pub type Result<T> = std::result::Result<T, InvexError>;
