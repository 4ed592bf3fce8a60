//! Transfer engine: the job state machine and its background worker.
//!
//! ```text
//! Idle --start--> Running --pause--> Paused --resume--> Running
//!                    |                  |
//!                    +------cancel------+--> Cancelled
//! Running --(list exhausted)--> Completed
//! Running --(destination unusable)--> Failed
//! ```
//!
//! The controlling side (`TransferEngine`, `JobHandle`) and the worker thread
//! share a single `JobControl` block. The worker only consults it at item
//! boundaries, so a copy in flight always runs to completion before a pause
//! or cancel takes effect.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::job;
use crate::model::{
    ItemErrorKind, ItemFailure, JobStatus, ProgressEvent, Terminal, Throttle, TransferJob,
    WorkItem,
};
use crate::progress::{self, ProgressReporter, ProgressSink, Subscription};

/// What the worker should do after an item boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Checkpoint {
    Continue,
    Stop,
}

#[derive(Debug)]
struct ControlState {
    status: JobStatus,
    pause_requested: bool,
    cursor: usize,
    worker_alive: bool,
}

/// Status, cursor and pending signals of one job.
#[derive(Debug)]
pub(crate) struct JobControl {
    state: Mutex<ControlState>,
    signal: Condvar,
}

impl JobControl {
    pub(crate) fn new() -> Self {
        JobControl {
            state: Mutex::new(ControlState {
                status: JobStatus::Idle,
                pause_requested: false,
                cursor: 0,
                worker_alive: false,
            }),
            signal: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ControlState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn status(&self) -> JobStatus {
        self.lock().status
    }

    pub(crate) fn cursor(&self) -> usize {
        self.lock().cursor
    }

    /// True while the job is Running/Paused or its worker has not exited yet.
    pub(crate) fn is_busy(&self) -> bool {
        let state = self.lock();
        state.status.is_active() || state.worker_alive
    }

    pub(crate) fn begin(&self) -> Result<(), EngineError> {
        let mut state = self.lock();
        if state.status != JobStatus::Idle {
            return Err(EngineError::invalid_state("start", state.status));
        }
        state.status = JobStatus::Running;
        Ok(())
    }

    pub(crate) fn pause(&self) -> Result<(), EngineError> {
        let mut state = self.lock();
        if state.status != JobStatus::Running {
            return Err(EngineError::invalid_state("pause", state.status));
        }
        state.pause_requested = true;
        self.signal.notify_all();
        Ok(())
    }

    pub(crate) fn resume(&self) -> Result<(), EngineError> {
        let mut state = self.lock();
        match state.status {
            JobStatus::Paused => state.status = JobStatus::Running,
            // Not yet honored; withdraw it
            JobStatus::Running if state.pause_requested => state.pause_requested = false,
            status => return Err(EngineError::invalid_state("resume", status)),
        }
        self.signal.notify_all();
        Ok(())
    }

    pub(crate) fn cancel(&self) -> Result<(), EngineError> {
        let mut state = self.lock();
        if !state.status.is_active() {
            return Err(EngineError::invalid_state("cancel", state.status));
        }
        state.status = JobStatus::Cancelled;
        state.pause_requested = false;
        self.signal.notify_all();
        Ok(())
    }

    /// Worker side: publish the cursor after an item.
    pub(crate) fn record_cursor(&self, cursor: usize) {
        self.lock().cursor = cursor;
    }

    /// Worker side: honor pending signals before the next item.
    ///
    /// Parks the calling thread while the job is paused.
    pub(crate) fn checkpoint(&self) -> Checkpoint {
        let mut state = self.lock();
        if state.pause_requested && state.status == JobStatus::Running {
            state.pause_requested = false;
            state.status = JobStatus::Paused;
            debug!(cursor = state.cursor, "paused at item boundary");
            self.signal.notify_all();
        }

        while state.status == JobStatus::Paused {
            state = self
                .signal
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }

        if state.status == JobStatus::Cancelled {
            Checkpoint::Stop
        } else {
            Checkpoint::Continue
        }
    }

    /// Worker side: sleep between items, waking early on any signal.
    pub(crate) fn throttle(&self, delay: Duration) {
        if delay.is_zero() {
            return;
        }
        let state = self.lock();
        let _ = self
            .signal
            .wait_timeout_while(state, delay, |s| {
                s.status == JobStatus::Running && !s.pause_requested
            })
            .unwrap_or_else(PoisonError::into_inner);
    }

    /// Mark a worker as attached until the returned guard is dropped.
    pub(crate) fn attach_worker(self: &Arc<Self>) -> WorkerGuard {
        self.lock().worker_alive = true;
        WorkerGuard(Arc::clone(self))
    }

    /// Worker side: move to a terminal state and return the one reached.
    ///
    /// A cancel that raced with the last item wins over Completed.
    pub(crate) fn finish(&self, cursor: usize, requested: JobStatus) -> JobStatus {
        let mut state = self.lock();
        state.cursor = cursor;
        state.pause_requested = false;
        if !(state.status == JobStatus::Cancelled && requested == JobStatus::Completed) {
            state.status = requested;
        }
        self.signal.notify_all();
        state.status
    }
}

/// Clears `worker_alive` when the worker exits, including by panic or a
/// failed spawn.
pub(crate) struct WorkerGuard(Arc<JobControl>);

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        self.0.lock().worker_alive = false;
        self.0.signal.notify_all();
    }
}

/// Runs transfer jobs, one at a time.
#[derive(Debug, Default)]
pub struct TransferEngine {
    config: EngineConfig,
    active: Mutex<Option<Arc<JobControl>>>,
}

impl TransferEngine {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        TransferEngine {
            config,
            active: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Create an Idle job over an enumerated work list.
    ///
    /// # Errors
    /// Returns EngineError if the source root is unusable or the destination is empty
    pub fn create_job(
        &self,
        source_root: impl AsRef<std::path::Path>,
        destination_root: impl AsRef<std::path::Path>,
        items: Vec<WorkItem>,
        throttle: Throttle,
    ) -> Result<JobHandle, EngineError> {
        let job = job::create_job(source_root, destination_root, items, throttle)?;
        let (reporter, subscription) = progress::channel(self.config.event_buffer);
        debug!(job_id = %job.id, items = job.items.len(), "job created");

        Ok(JobHandle {
            id: job.id,
            total: job.items.len(),
            control: Arc::new(JobControl::new()),
            pending: Mutex::new(Some(PendingJob { job, reporter })),
            subscription: Mutex::new(Some(subscription)),
            worker: Mutex::new(None),
        })
    }

    /// Start `handle` on a background worker.
    ///
    /// # Errors
    /// `InvalidState` if the job is not Idle, or if another job of this
    /// engine is still Running, Paused, or finishing its in-flight item.
    /// `WorkerSpawn` if no thread could be started; the job is then Failed
    /// and its terminal event has been emitted.
    pub fn start(&self, handle: &JobHandle) -> Result<(), EngineError> {
        let mut active = lock(&self.active);
        if let Some(current) = active.as_ref() {
            if !Arc::ptr_eq(current, &handle.control) && current.is_busy() {
                return Err(EngineError::invalid_state(
                    "start another job",
                    current.status(),
                ));
            }
        }

        let mut pending = lock(&handle.pending);
        handle.control.begin()?;
        let Some(next) = pending.take() else {
            return Err(EngineError::invalid_state("start", handle.control.status()));
        };

        // The job travels over a handoff channel so a failed spawn leaves it here
        let (handoff, inbox) = crossbeam_channel::bounded::<PendingJob>(1);
        let guard = handle.control.attach_worker();
        let control = Arc::clone(&handle.control);
        let config = self.config;
        let spawned = thread::Builder::new()
            .name(format!("transfer-{}", next.job.id))
            .spawn(move || {
                let _guard = guard;
                let PendingJob {
                    mut job,
                    mut reporter,
                } = inbox.recv().ok()?;
                job::run_job(&mut job, &control, &mut reporter, &config);
                Some(job)
            });

        *active = Some(Arc::clone(&handle.control));
        match spawned {
            Ok(worker) => {
                *lock(&handle.worker) = Some(worker);
                handoff.send(next).map_err(|undelivered| {
                    fail_to_start(&handle.control, undelivered.0, EngineError::WorkerPanicked)
                })
            }
            Err(e) => Err(fail_to_start(
                &handle.control,
                next,
                EngineError::WorkerSpawn { source: e },
            )),
        }
    }
}

/// Fail a job whose worker never received it, closing its event stream.
fn fail_to_start(control: &JobControl, pending: PendingJob, cause: EngineError) -> EngineError {
    let PendingJob { job, mut reporter } = pending;
    let status = control.finish(0, JobStatus::Failed);
    error!(job_id = %job.id, error = %cause, "transfer worker could not be started");

    reporter.emit(ProgressEvent::finished(
        0,
        job.items.len(),
        Terminal::from_status(status),
        Some(ItemFailure {
            kind: ItemErrorKind::Io,
            message: cause.to_string(),
            os_error: cause.raw_os_error(),
        }),
    ));
    cause
}

struct PendingJob {
    job: TransferJob,
    reporter: ProgressReporter,
}

/// Controller-side handle on one job.
pub struct JobHandle {
    id: Uuid,
    total: usize,
    control: Arc<JobControl>,
    pending: Mutex<Option<PendingJob>>,
    subscription: Mutex<Option<Subscription>>,
    worker: Mutex<Option<JoinHandle<Option<TransferJob>>>>,
}

impl std::fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandle")
            .field("id", &self.id)
            .field("total", &self.total)
            .field("status", &self.status())
            .field("cursor", &self.cursor())
            .finish()
    }
}

impl JobHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Number of items in the work list.
    pub fn total(&self) -> usize {
        self.total
    }

    pub fn status(&self) -> JobStatus {
        self.control.status()
    }

    /// Index of the next unprocessed item.
    pub fn cursor(&self) -> usize {
        self.control.cursor()
    }

    /// Change the throttle. Only allowed before the job starts.
    pub fn set_throttle(&self, throttle: Throttle) -> Result<(), EngineError> {
        let mut pending = lock(&self.pending);
        match pending.as_mut() {
            Some(PendingJob { job, .. }) if self.control.status() == JobStatus::Idle => {
                job.throttle = throttle;
                Ok(())
            }
            _ => Err(EngineError::invalid_state(
                "change throttle",
                self.control.status(),
            )),
        }
    }

    /// Stop after the item in flight. Valid while Running.
    pub fn pause(&self) -> Result<(), EngineError> {
        self.control.pause()?;
        info!(job_id = %self.id, "pause requested");
        Ok(())
    }

    /// Continue from the cursor. Valid while Paused.
    pub fn resume(&self) -> Result<(), EngineError> {
        self.control.resume()?;
        info!(job_id = %self.id, cursor = self.cursor(), "resume requested");
        Ok(())
    }

    /// Stop for good. Valid while Running or Paused.
    pub fn cancel(&self) -> Result<(), EngineError> {
        self.control.cancel()?;
        info!(job_id = %self.id, "cancel requested");
        Ok(())
    }

    /// Take the job's progress events.
    ///
    /// Only the first call receives events, and only if the job has not yet
    /// reached a terminal state; any other call gets a closed subscription.
    pub fn subscribe(&self) -> Subscription {
        let mut slot = lock(&self.subscription);
        if self.status().is_terminal() {
            slot.take();
            return Subscription::closed();
        }
        slot.take().unwrap_or_else(Subscription::closed)
    }

    /// Block until the worker finishes and return the processed job.
    ///
    /// # Errors
    /// `InvalidState` if the job was never started or was already collected,
    /// `WorkerPanicked` if the worker died.
    pub fn wait(&self) -> Result<TransferJob, EngineError> {
        let worker = lock(&self.worker)
            .take()
            .ok_or_else(|| EngineError::invalid_state("wait", self.status()))?;
        worker
            .join()
            .ok()
            .flatten()
            .ok_or(EngineError::WorkerPanicked)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_signals_follow_state_machine() {
        let control = JobControl::new();

        assert!(control.pause().is_err());
        assert!(control.resume().is_err());
        assert!(control.cancel().is_err());

        control.begin().expect("Idle job should start");
        assert!(control.begin().is_err());
        assert!(control.resume().is_err());

        control.pause().expect("Running job should pause");
        // Honored only at the next item boundary
        assert_eq!(control.status(), JobStatus::Running);
        control.pause().expect("Repeated pause request is accepted");

        control.cancel().expect("Running job should cancel");
        assert_eq!(control.status(), JobStatus::Cancelled);
        assert!(control.pause().is_err());
        assert!(control.cancel().is_err());
    }

    #[test]
    fn test_resume_withdraws_unhonored_pause() {
        let control = JobControl::new();
        control.begin().expect("Idle job should start");

        control.pause().expect("Running job should pause");
        control.resume().expect("Pending pause should be withdrawn");

        assert_eq!(control.checkpoint(), Checkpoint::Continue);
        assert_eq!(control.status(), JobStatus::Running);
    }

    #[test]
    fn test_checkpoint_parks_until_resume() {
        let control = Arc::new(JobControl::new());
        control.begin().expect("Idle job should start");
        control.pause().expect("Running job should pause");

        let worker = {
            let control = Arc::clone(&control);
            thread::spawn(move || control.checkpoint())
        };

        let deadline = Instant::now() + Duration::from_secs(5);
        while control.status() != JobStatus::Paused {
            assert!(Instant::now() < deadline, "worker never paused");
            thread::sleep(Duration::from_millis(1));
        }
        control.resume().expect("Paused job should resume");

        assert_eq!(worker.join().expect("worker panicked"), Checkpoint::Continue);
    }

    #[test]
    fn test_cancel_wakes_paused_worker() {
        let control = Arc::new(JobControl::new());
        control.begin().expect("Idle job should start");
        control.pause().expect("Running job should pause");

        let worker = {
            let control = Arc::clone(&control);
            thread::spawn(move || control.checkpoint())
        };

        let deadline = Instant::now() + Duration::from_secs(5);
        while control.status() != JobStatus::Paused {
            assert!(Instant::now() < deadline, "worker never paused");
            thread::sleep(Duration::from_millis(1));
        }
        control.cancel().expect("Paused job should cancel");

        assert_eq!(worker.join().expect("worker panicked"), Checkpoint::Stop);
    }

    #[test]
    fn test_throttle_is_cut_short_by_cancel() {
        let control = Arc::new(JobControl::new());
        control.begin().expect("Idle job should start");

        let canceller = {
            let control = Arc::clone(&control);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                control.cancel()
            })
        };

        let started = Instant::now();
        control.throttle(Duration::from_secs(10));
        assert!(started.elapsed() < Duration::from_secs(5));
        canceller
            .join()
            .expect("canceller panicked")
            .expect("cancel failed");
    }

    #[test]
    fn test_finish_keeps_cancel_over_completed() {
        let control = JobControl::new();
        control.begin().expect("Idle job should start");
        control.cancel().expect("Running job should cancel");

        assert_eq!(control.finish(3, JobStatus::Completed), JobStatus::Cancelled);
        assert_eq!(control.cursor(), 3);
    }

    fn idle_handle(engine: &TransferEngine, temp_dir: &tempfile::TempDir) -> JobHandle {
        let src = temp_dir.path().join("src");
        std::fs::create_dir_all(&src).expect("Failed to create src");
        std::fs::write(src.join("a.txt"), b"alpha").expect("Failed to write a.txt");
        engine
            .create_job(
                &src,
                temp_dir.path().join("dst"),
                vec![WorkItem::file("a.txt")],
                Throttle::Normal,
            )
            .expect("Failed to create job")
    }

    #[test]
    fn test_engine_keeps_its_config() {
        let config = EngineConfig::default()
            .with_event_buffer(8)
            .with_max_consecutive_destination_errors(2);
        let engine = TransferEngine::with_config(config);
        assert_eq!(engine.config().event_buffer, 8);
        assert_eq!(engine.config().max_consecutive_destination_errors, 2);
    }

    #[test]
    fn test_worker_guard_keeps_cancelled_job_busy() {
        let control = Arc::new(JobControl::new());
        control.begin().expect("Idle job should start");
        let guard = control.attach_worker();

        control.cancel().expect("Running job should cancel");
        assert!(control.is_busy(), "worker still finishing its item");

        drop(guard);
        assert!(!control.is_busy());
    }

    #[test]
    fn test_start_waits_for_cancelled_worker_to_exit() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let engine = TransferEngine::new();
        let first = idle_handle(&engine, &temp_dir);
        let second = idle_handle(&engine, &temp_dir);

        // First job cancelled while its worker is still mid-item
        first.control.begin().expect("Idle job should start");
        let guard = first.control.attach_worker();
        first.cancel().expect("Running job should cancel");
        *lock(&engine.active) = Some(Arc::clone(&first.control));

        let err = engine.start(&second).expect_err("Previous worker still alive");
        assert!(matches!(err, EngineError::InvalidState { .. }));
        assert_eq!(second.status(), JobStatus::Idle);

        drop(guard);
        engine.start(&second).expect("Previous worker has exited");
        let job = second.wait().expect("Worker failed");
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[test]
    fn test_failed_start_still_ends_event_stream() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let engine = TransferEngine::new();
        let handle = idle_handle(&engine, &temp_dir);
        let events = handle.subscribe();

        handle.control.begin().expect("Idle job should start");
        let pending = lock(&handle.pending).take().expect("Job already taken");
        let spawn_error = std::io::Error::new(std::io::ErrorKind::Other, "no threads left");
        let err = fail_to_start(
            &handle.control,
            pending,
            EngineError::WorkerSpawn {
                source: spawn_error,
            },
        );

        assert!(matches!(err, EngineError::WorkerSpawn { .. }));
        assert_eq!(handle.status(), JobStatus::Failed);

        let events: Vec<_> = events.collect();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].terminal, Terminal::Failed);
        assert_eq!(events[0].total_count, 1);
        assert!(events[0].error.is_some());
    }
}
