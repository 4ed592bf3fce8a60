//! Job orchestration module.
//!
//! This module provides the job lifecycle functions:
//! - Creating a job from roots and an enumerated work list
//! - Planning a job (enumerate + create in one step)
//! - Running a job: the per-item loop executed by the engine's worker

use std::fs;
use std::path::Path;
use std::time::SystemTime;

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::engine::{Checkpoint, JobControl};
use crate::error::{EngineError, ItemError};
use crate::fs_ops;
use crate::model::{
    FailedItem, ItemErrorKind, ItemFailure, JobStatus, ProgressEvent, Terminal, Throttle,
    TransferJob, WorkItem,
};
use crate::progress::ProgressSink;

/// Create a new transfer job over an already enumerated work list.
///
/// Validates that the source root exists and is a readable directory. The
/// destination root may not exist yet; it is created when the job starts.
///
/// # Returns
/// A new TransferJob in Idle state with its cursor at 0
///
/// # Errors
/// Returns EngineError if the source is unusable or the destination is empty
pub fn create_job<P: AsRef<Path>, Q: AsRef<Path>>(
    source_root: P,
    destination_root: Q,
    items: Vec<WorkItem>,
    throttle: Throttle,
) -> Result<TransferJob, EngineError> {
    let source_root = source_root.as_ref();
    let destination_root = destination_root.as_ref();

    fs_ops::validate_root(source_root)?;

    if destination_root.as_os_str().is_empty() {
        return Err(EngineError::InvalidPath {
            path: destination_root.to_path_buf(),
            reason: "Destination path is empty".to_string(),
        });
    }

    Ok(TransferJob {
        id: Uuid::new_v4(),
        source_root: source_root.to_path_buf(),
        destination_root: destination_root.to_path_buf(),
        items,
        cursor: 0,
        throttle,
        status: JobStatus::Idle,
        failures: Vec::new(),
        abort_reason: None,
        bytes_copied: 0,
        started_at: None,
        finished_at: None,
    })
}

/// Enumerate `source_root` and create a job over the result.
pub fn plan_job<P: AsRef<Path>, Q: AsRef<Path>>(
    source_root: P,
    destination_root: Q,
    throttle: Throttle,
) -> Result<TransferJob, EngineError> {
    let items = fs_ops::enumerate(source_root.as_ref())?;
    create_job(source_root, destination_root, items, throttle)
}

/// Process `job.items[job.cursor..]`, honoring control signals between items.
///
/// Per-item errors are recorded on the job and attached to that item's event;
/// they never stop the loop. The loop ends when the list is exhausted, when
/// the job is cancelled, or when the destination becomes unusable. Exactly one
/// terminal event is emitted, last.
pub(crate) fn run_job(
    job: &mut TransferJob,
    control: &JobControl,
    sink: &mut dyn ProgressSink,
    config: &EngineConfig,
) {
    let total = job.items.len();
    job.status = JobStatus::Running;
    job.started_at = Some(SystemTime::now());

    info!(
        job_id = %job.id,
        source = %job.source_root.display(),
        destination = %job.destination_root.display(),
        items = total,
        throttle = %job.throttle,
        "transfer started"
    );

    let mut fatal = fs::create_dir_all(&job.destination_root)
        .err()
        .map(|e| {
            ItemError::DestinationWrite {
                path: job.destination_root.clone(),
                source: e,
            }
            .to_failure()
        });
    let mut consecutive_destination_errors = 0;

    while fatal.is_none() && job.cursor < total {
        if control.checkpoint() == Checkpoint::Stop {
            break;
        }

        // Item copies recreate missing parents, so a vanished root must be caught here
        if !job.destination_root.is_dir() {
            fatal = Some(root_unavailable(&job.destination_root));
            break;
        }

        let index = job.cursor;
        let item = job.items[index].clone();

        let error = match fs_ops::transfer_item(&item, &job.source_root, &job.destination_root) {
            Ok(bytes) => {
                debug!(job_id = %job.id, index, path = %item.relative_path.display(), bytes, "item transferred");
                job.bytes_copied += bytes;
                consecutive_destination_errors = 0;
                None
            }
            Err(e) => {
                warn!(job_id = %job.id, index, path = %item.relative_path.display(), error = %e, "item failed");
                if e.kind() == ItemErrorKind::DestinationWrite {
                    consecutive_destination_errors += 1;
                    fatal = destination_lost(
                        &job.destination_root,
                        consecutive_destination_errors,
                        config.max_consecutive_destination_errors,
                    );
                } else {
                    consecutive_destination_errors = 0;
                }

                let failure = e.to_failure();
                job.failures.push(FailedItem {
                    index,
                    item: item.clone(),
                    failure: failure.clone(),
                });
                Some(failure)
            }
        };

        job.cursor += 1;
        control.record_cursor(job.cursor);
        sink.emit(ProgressEvent::item(job.cursor, total, item, error));

        if fatal.is_none() && job.cursor < total {
            control.throttle(job.throttle.delay());
        }
    }

    let requested = if fatal.is_some() {
        JobStatus::Failed
    } else if job.cursor >= total {
        JobStatus::Completed
    } else {
        JobStatus::Cancelled
    };
    let status = control.finish(job.cursor, requested);

    job.status = status;
    job.finished_at = Some(SystemTime::now());
    job.abort_reason = fatal.as_ref().map(|f| f.message.clone());

    match status {
        JobStatus::Failed => error!(
            job_id = %job.id,
            completed = job.cursor,
            reason = job.abort_reason.as_deref().unwrap_or_default(),
            "transfer aborted"
        ),
        _ => info!(
            job_id = %job.id,
            %status,
            completed = job.cursor,
            failed = job.failures.len(),
            bytes = job.bytes_copied,
            "transfer finished"
        ),
    }

    sink.emit(ProgressEvent::finished(
        job.cursor,
        total,
        Terminal::from_status(status),
        fatal,
    ));
}

/// Decide whether a destination write failure means the job cannot go on.
fn destination_lost(destination_root: &Path, consecutive: u32, limit: u32) -> Option<ItemFailure> {
    if !destination_root.is_dir() {
        return Some(root_unavailable(destination_root));
    }
    if consecutive < limit {
        return None;
    }

    Some(ItemFailure {
        kind: ItemErrorKind::DestinationWrite,
        message: format!("{} consecutive destination write failures", consecutive),
        os_error: None,
    })
}

fn root_unavailable(destination_root: &Path) -> ItemFailure {
    ItemFailure {
        kind: ItemErrorKind::DestinationWrite,
        message: format!(
            "Destination root is no longer available: {}",
            destination_root.display()
        ),
        os_error: None,
    }
}
