//! # Transfer Engine - resumable file transfer library
//!
//! A headless engine that copies a directory tree while reporting progress,
//! and that can be paused, resumed, cancelled and throttled mid-flight.
//! Designed as the foundation for multiple UIs (CLI, GUI, automation).
//!
//! ## Overview
//!
//! - The source tree is enumerated once into an ordered work list
//! - A background worker transfers the list item by item, advancing a cursor
//! - Pause/resume/cancel take effect between items; resume continues from the
//!   cursor without re-walking or re-copying anything
//! - A failing item is recorded and skipped; it does not stop the job
//! - Progress is delivered as events over a channel (decoupled from UI technology)
//!
//! ## Basic Usage
//!
//! ```no_run
//! use std::path::Path;
//! use transfer_engine::{enumerate, Terminal, Throttle, TransferEngine};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let items = enumerate(Path::new("C:\\source"))?;
//!
//! let engine = TransferEngine::new();
//! let handle = engine.create_job("C:\\source", "D:\\destination", items, Throttle::Normal)?;
//! let events = handle.subscribe();
//! engine.start(&handle)?;
//!
//! for event in events {
//!     println!("{}/{}", event.completed_count, event.total_count);
//!     if event.terminal == Terminal::Completed {
//!         println!("done");
//!     }
//! }
//!
//! let job = handle.wait()?;
//! println!("{} items failed", job.failures.len());
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - **model**: Core data structures (WorkItem, TransferJob, ProgressEvent, enums)
//! - **error**: Job-level and item-level error types
//! - **fs_ops**: Enumeration and the per-item transfer operation
//! - **job**: Job creation and the per-item processing loop
//! - **engine**: State machine, background worker, job handles
//! - **progress**: Progress channel (reporter and subscription)
//! - **config**: Engine-wide settings

pub mod config;
pub mod engine;
pub mod error;
pub mod fs_ops;
pub mod job;
pub mod model;
pub mod progress;

// Re-export main types and functions
pub use config::EngineConfig;
pub use engine::{JobHandle, TransferEngine};
pub use error::{EngineError, ItemError};
pub use fs_ops::{enumerate, transfer_item, validate_root};
pub use job::{create_job, plan_job};
pub use model::{
    FailedItem, ItemErrorKind, ItemFailure, JobOutcome, JobStatus, ProgressEvent, Terminal,
    Throttle, TransferJob, WorkItem,
};
pub use progress::{ProgressReporter, ProgressSink, Subscription};
