//! Error types for pagefan.

use thiserror::Error;

use crate::model::JobStatus;

#[derive(Debug, Error)]
pub enum Error {
    /// The first, synchronous page fetch failed. Fatal to the whole fetch.
    #[error("probe call for {source_label} failed: {error:#}")]
    Probe {
        source_label: String,
        error: anyhow::Error,
    },

    #[error("invalid job status transition: {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("dispatcher is shutting down")]
    Cancelled,

    #[error("job queue is full")]
    QueueFull,

    #[error("config error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
