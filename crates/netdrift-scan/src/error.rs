//! Error types for the netdrift-scan crate.

use thiserror::Error;
use uuid::Uuid;

use netdrift_diff::DiffError;
use netdrift_store::StoreError;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Invalid scan target: {0}")]
    InvalidTarget(String),

    #[error("Scan already queued or running: {0}")]
    DuplicateJob(String),

    #[error("Profile not found in store or config: {0}")]
    ProfileNotFound(String),

    #[error("Scanner not found at path: {path}")]
    ScannerNotFound { path: String },

    #[error("Scanner exited with code {code}: {stderr}")]
    ScannerFailed { code: i32, stderr: String },

    #[error("Failed to parse scanner XML output: {0}")]
    XmlParse(String),

    #[error("Snapshot not found: {0}")]
    SnapshotNotFound(Uuid),

    #[error("Snapshots describe different hosts: {0} vs {1}")]
    HostMismatch(String, String),

    #[error("File diff requires at least two result sets")]
    NotEnoughInputs,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Diff error: {0}")]
    Diff(#[from] DiffError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ScanError>;
