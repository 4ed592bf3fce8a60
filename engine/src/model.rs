//! Core data model for transfer jobs.
//!
//! This module defines the main data structures for representing a transfer:
//! - WorkItem: one entry of the enumerated work list
//! - TransferJob: the work list plus the cursor that makes it resumable
//! - ProgressEvent: what the engine reports after each item
//! - Throttle, JobStatus, Terminal: enums controlling and describing a run

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{Duration, SystemTime};

use serde::Serialize;
use uuid::Uuid;

/// A single file or directory to transfer, relative to the job's roots.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct WorkItem {
    /// Path relative to both the source and destination roots
    pub relative_path: PathBuf,

    /// True if this item represents a directory
    pub is_dir: bool,
}

impl WorkItem {
    pub fn file(relative_path: impl Into<PathBuf>) -> Self {
        WorkItem {
            relative_path: relative_path.into(),
            is_dir: false,
        }
    }

    pub fn dir(relative_path: impl Into<PathBuf>) -> Self {
        WorkItem {
            relative_path: relative_path.into(),
            is_dir: true,
        }
    }

    /// Where this item lives under `source_root`.
    pub fn source_path(&self, source_root: &Path) -> PathBuf {
        source_root.join(&self.relative_path)
    }

    /// Where this item is written under `destination_root`.
    pub fn destination_path(&self, destination_root: &Path) -> PathBuf {
        destination_root.join(&self.relative_path)
    }
}

/// Inter-item delay controlling the pace of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum Throttle {
    /// No delay between items
    #[default]
    Normal,
    /// 50ms between items
    Fast,
    /// 10ms between items
    VeryFast,
}

impl Throttle {
    pub fn delay(&self) -> Duration {
        match self {
            Throttle::Normal => Duration::ZERO,
            Throttle::Fast => Duration::from_millis(50),
            Throttle::VeryFast => Duration::from_millis(10),
        }
    }
}

impl fmt::Display for Throttle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Throttle::Normal => write!(f, "Normal"),
            Throttle::Fast => write!(f, "Fast"),
            Throttle::VeryFast => write!(f, "Very Fast"),
        }
    }
}

impl FromStr for Throttle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "normal" => Ok(Throttle::Normal),
            "fast" => Ok(Throttle::Fast),
            "very-fast" | "very_fast" | "veryfast" | "very fast" => Ok(Throttle::VeryFast),
            _ => Err(format!(
                "Invalid throttle '{}'. Must be 'normal', 'fast', or 'very-fast'",
                s
            )),
        }
    }
}

/// The state of a transfer job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JobStatus {
    /// Created, not yet started
    Idle,
    /// Worker is consuming the work list
    Running,
    /// Worker is parked at an item boundary
    Paused,
    /// Every item was processed (some may have failed)
    Completed,
    /// Stopped by the user; copied items stay on disk
    Cancelled,
    /// Aborted because continuing was impossible
    Failed,
}

impl JobStatus {
    /// Running or Paused: a worker owns the job.
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Running | JobStatus::Paused)
    }

    /// Returns true if no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Cancelled | JobStatus::Failed
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobStatus::Idle => "idle",
            JobStatus::Running => "running",
            JobStatus::Paused => "paused",
            JobStatus::Completed => "completed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Outcome carried by a progress event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Terminal {
    None,
    Completed,
    Cancelled,
    Failed,
}

impl Terminal {
    pub(crate) fn from_status(status: JobStatus) -> Self {
        match status {
            JobStatus::Completed => Terminal::Completed,
            JobStatus::Cancelled => Terminal::Cancelled,
            JobStatus::Failed => Terminal::Failed,
            JobStatus::Idle | JobStatus::Running | JobStatus::Paused => Terminal::None,
        }
    }
}

/// Category of a per-item failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ItemErrorKind {
    SourceMissing,
    DestinationWrite,
    Io,
}

/// Cloneable record of why an item failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemFailure {
    pub kind: ItemErrorKind,

    /// Human-readable error message
    pub message: String,

    /// OS error code, when the platform reported one
    pub os_error: Option<u32>,
}

/// A progress notification produced by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    /// Items processed so far (equals the cursor after the item)
    pub completed_count: usize,
    pub total_count: usize,

    /// Item this event reports on; None for terminal events
    pub last_item: Option<WorkItem>,

    /// Set when `last_item` failed, or when the job aborted
    pub error: Option<ItemFailure>,
    pub terminal: Terminal,
}

impl ProgressEvent {
    pub(crate) fn item(
        completed_count: usize,
        total_count: usize,
        item: WorkItem,
        error: Option<ItemFailure>,
    ) -> Self {
        ProgressEvent {
            completed_count,
            total_count,
            last_item: Some(item),
            error,
            terminal: Terminal::None,
        }
    }

    pub(crate) fn finished(
        completed_count: usize,
        total_count: usize,
        terminal: Terminal,
        error: Option<ItemFailure>,
    ) -> Self {
        ProgressEvent {
            completed_count,
            total_count,
            last_item: None,
            error,
            terminal,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal != Terminal::None
    }
}

/// A work item that failed, with its position in the work list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedItem {
    pub index: usize,
    pub item: WorkItem,
    pub failure: ItemFailure,
}

/// Represents a single transfer job.
///
/// The job exclusively owns the work list and the cursor. The cursor is the
/// index of the next unprocessed item and is all that is needed to continue a
/// paused job: items below it are never transferred again.
#[derive(Debug)]
pub struct TransferJob {
    /// Unique identifier for this job
    pub id: Uuid,

    /// Root source directory
    pub source_root: PathBuf,

    /// Root destination directory
    pub destination_root: PathBuf,

    /// Work list in creation order
    pub items: Vec<WorkItem>,

    /// Index of the next unprocessed item
    pub cursor: usize,

    pub throttle: Throttle,

    pub status: JobStatus,

    /// Items that failed without stopping the job
    pub failures: Vec<FailedItem>,

    /// Why the job moved to Failed, if it did
    pub abort_reason: Option<String>,

    /// Bytes written to the destination so far
    pub bytes_copied: u64,

    /// When job execution started
    pub started_at: Option<SystemTime>,

    /// When job execution reached a terminal state
    pub finished_at: Option<SystemTime>,
}

impl TransferJob {
    /// Items not yet processed.
    pub fn remaining(&self) -> &[WorkItem] {
        &self.items[self.cursor.min(self.items.len())..]
    }

    /// Wall-clock time between start and the terminal state.
    ///
    /// None until the job has both started and finished.
    pub fn elapsed(&self) -> Option<Duration> {
        let started = self.started_at?;
        let finished = self.finished_at?;
        Some(finished.duration_since(started).unwrap_or_default())
    }

    pub fn outcome(&self) -> JobOutcome {
        match self.status {
            JobStatus::Completed => JobOutcome::Finished {
                failed: self.failures.len(),
            },
            JobStatus::Cancelled => JobOutcome::Cancelled {
                completed: self.cursor,
            },
            JobStatus::Failed => JobOutcome::Aborted {
                reason: self
                    .abort_reason
                    .clone()
                    .unwrap_or_else(|| "unknown error".to_string()),
            },
            JobStatus::Idle | JobStatus::Running | JobStatus::Paused => JobOutcome::Unfinished,
        }
    }
}

/// How a job ended, from the shell's point of view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Every item was processed; `failed` of them did not transfer
    Finished { failed: usize },
    /// The user cancelled after `completed` items
    Cancelled { completed: usize },
    /// The engine gave up
    Aborted { reason: String },
    /// The job has not reached a terminal state
    Unfinished,
}
