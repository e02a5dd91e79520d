//! Scan errors
//!
//! Uses thiserror so hosts can match on the kind. A scanner failing is an ordinary
//! outcome of a job and is recorded on the `JobOutcome`; these variants only surface
//! where the caller must react synchronously.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Scanner {scanner} failed on {target}: {source}")]
    ScannerFailure {
        scanner: String,
        target: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("No open project contains {path}")]
    NoProjectContext { path: PathBuf },

    #[error("No scanner registered for provider {provider}")]
    UnknownProvider { provider: String },

    #[error("Scan queue {queue} is shut down")]
    QueueClosed { queue: String },

    #[error("Failed to start scan worker {queue}: {source}")]
    WorkerSpawn {
        queue: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Session {session} has been released")]
    SessionReleased { session: String },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },
}

pub type ScanResult<T> = std::result::Result<T, ScanError>;
