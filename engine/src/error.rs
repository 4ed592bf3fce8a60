//! Error types for the transfer engine.
//!
//! There are two layers of errors:
//! - `EngineError` covers job-level problems: a root that cannot be used, a
//!   control signal sent in the wrong state, a worker that died. These are
//!   returned to the caller.
//! - `ItemError` covers a single work item failing to transfer. These never
//!   stop the job; they are recorded on the job and attached to the item's
//!   progress event.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::model::{ItemErrorKind, ItemFailure, JobStatus};

/// Errors that can occur at the job level (preventing execution or control).
#[derive(Debug, Error)]
pub enum EngineError {
    /// Source root does not exist
    #[error("Source directory not found: {}", path.display())]
    SourceNotFound { path: PathBuf },

    /// Source root exists but cannot be read
    #[error("Source directory access denied: {}", path.display())]
    SourceAccessDenied { path: PathBuf, source: io::Error },

    /// Destination root cannot be created or written
    #[error("Destination directory access denied: {}", path.display())]
    DestinationAccessDenied { path: PathBuf, source: io::Error },

    /// Path is empty, not a directory, or otherwise unusable as a root
    #[error("Invalid path: {} ({reason})", path.display())]
    InvalidPath { path: PathBuf, reason: String },

    /// A directory below the source root could not be listed
    #[error("Failed to enumerate directory: {}", path.display())]
    EnumerationFailed { path: PathBuf, source: io::Error },

    /// A control operation was requested in a state that does not allow it
    #[error("Cannot {operation} while job is {status}")]
    InvalidState {
        operation: &'static str,
        status: JobStatus,
    },

    /// The background worker could not be spawned
    #[error("Failed to spawn transfer worker")]
    WorkerSpawn { source: io::Error },

    /// The background worker panicked before handing the job back
    #[error("Transfer worker terminated unexpectedly")]
    WorkerPanicked,
}

impl EngineError {
    /// Extract the OS error code from this error, if available.
    pub fn raw_os_error(&self) -> Option<u32> {
        match self {
            Self::SourceAccessDenied { source, .. }
            | Self::DestinationAccessDenied { source, .. }
            | Self::EnumerationFailed { source, .. }
            | Self::WorkerSpawn { source } => source.raw_os_error().map(|e| e as u32),
            _ => None,
        }
    }

    pub(crate) fn invalid_state(operation: &'static str, status: JobStatus) -> Self {
        Self::InvalidState { operation, status }
    }
}

/// Errors that can occur while transferring a single work item.
#[derive(Debug, Error)]
pub enum ItemError {
    /// The source item vanished between enumeration and transfer
    #[error("Source item no longer exists: {}", path.display())]
    SourceMissing { path: PathBuf },

    /// The destination could not be written (disk full, permission denied, path too long)
    #[error("Failed to write {}: {source}", path.display())]
    DestinationWrite { path: PathBuf, source: io::Error },

    /// Any other copy failure
    #[error("I/O error on {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },
}

impl ItemError {
    pub fn kind(&self) -> ItemErrorKind {
        match self {
            Self::SourceMissing { .. } => ItemErrorKind::SourceMissing,
            Self::DestinationWrite { .. } => ItemErrorKind::DestinationWrite,
            Self::Io { .. } => ItemErrorKind::Io,
        }
    }

    /// Extract the OS error code from this error, if available.
    pub fn raw_os_error(&self) -> Option<u32> {
        match self {
            Self::SourceMissing { .. } => None,
            Self::DestinationWrite { source, .. } | Self::Io { source, .. } => {
                source.raw_os_error().map(|e| e as u32)
            }
        }
    }

    /// Cloneable summary of this error, suitable for progress events.
    pub fn to_failure(&self) -> ItemFailure {
        ItemFailure {
            kind: self.kind(),
            message: self.to_string(),
            os_error: self.raw_os_error(),
        }
    }
}
