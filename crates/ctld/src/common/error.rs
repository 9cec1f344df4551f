use thiserror::Error;

use crate::JobId;

#[derive(Debug, Error)]
pub enum CtldError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Deserialization error: {0}")]
    DeserializationError(String),
    #[error("Job {0} not found")]
    JobNotFound(JobId),
    #[error("Job {0} already exists")]
    DuplicateJob(JobId),
}

impl From<serde_json::error::Error> for CtldError {
    fn from(e: serde_json::error::Error) -> Self {
        Self::DeserializationError(e.to_string())
    }
}
