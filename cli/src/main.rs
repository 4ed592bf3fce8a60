//! transfer - Command-line shell for the transfer engine.
//!
//! Enumerates a source directory, copies it to a destination with progress
//! on stderr, and optionally accepts pause/resume/cancel commands on stdin.

use clap::Parser;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;
use transfer_engine::{
    enumerate, validate_root, EngineConfig, JobHandle, JobOutcome, ProgressEvent, Throttle,
    TransferEngine, TransferJob,
};

/// transfer - copy a directory tree with pause, resume and throttling
#[derive(Parser, Debug)]
#[command(name = "transfer")]
#[command(version = "0.1.0")]
#[command(about = "Copy files and directories with progress tracking")]
struct Args {
    /// Source directory
    #[arg(long, value_name = "PATH")]
    src: PathBuf,

    /// Destination directory
    #[arg(long, value_name = "PATH")]
    dst: PathBuf,

    /// Pace of the transfer: normal, fast, or very-fast
    #[arg(long, value_name = "SPEED", default_value = "normal")]
    throttle: String,

    /// Copy into DST/<source folder name> instead of directly into DST
    #[arg(long)]
    nest: bool,

    /// Print progress events to stdout as JSON lines
    #[arg(long)]
    json: bool,

    /// Read commands from stdin: p (pause), r (resume), c (cancel)
    #[arg(long)]
    interactive: bool,

    /// Number of progress events buffered for the display
    #[arg(long, value_name = "N", default_value_t = 1024)]
    buffer: usize,

    /// Abort after this many destination write failures in a row
    #[arg(long, value_name = "N", default_value_t = 5)]
    max_destination_errors: u32,

    /// Enable verbose output
    #[arg(long)]
    verbose: bool,
}

/// Why the CLI exits unsuccessfully.
#[derive(Debug, Error)]
enum CliError {
    /// Bad arguments or a job that could not be started
    #[error("{0}")]
    Setup(String),

    /// The job ran but did not finish cleanly
    #[error("{0}")]
    Transfer(String),
}

impl CliError {
    fn exit_code(&self) -> i32 {
        match self {
            CliError::Setup(_) => 2,
            CliError::Transfer(_) => 1,
        }
    }
}

/// Commands accepted on stdin in interactive mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Pause,
    Resume,
    Cancel,
}

fn parse_command(line: &str) -> Option<Command> {
    match line.trim().to_lowercase().as_str() {
        "p" | "pause" | "stop" => Some(Command::Pause),
        "r" | "resume" | "continue" => Some(Command::Resume),
        "c" | "cancel" | "q" | "quit" => Some(Command::Cancel),
        _ => None,
    }
}

/// Console display of transfer progress
struct ConsoleProgress {
    verbose: bool,
    json: bool,
    last_progress_update: Option<Instant>,
}

impl ConsoleProgress {
    fn new(verbose: bool, json: bool) -> Self {
        ConsoleProgress {
            verbose,
            json,
            last_progress_update: None,
        }
    }

    fn format_bytes(bytes: u64) -> String {
        const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
        let mut size = bytes as f64;
        let mut unit_idx = 0;

        while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
            size /= 1024.0;
            unit_idx += 1;
        }

        format!("{:.2} {}", size, UNITS[unit_idx])
    }

    fn format_duration(elapsed: Duration) -> String {
        let secs = elapsed.as_secs();
        let hours = secs / 3600;
        let mins = (secs % 3600) / 60;
        let secs = secs % 60;

        if hours > 0 {
            format!("{}h {}m {}s", hours, mins, secs)
        } else if mins > 0 {
            format!("{}m {}s", mins, secs)
        } else {
            format!("{}s", secs)
        }
    }

    fn progress_bar(completed: usize, total: usize) -> String {
        let percent = if total == 0 {
            100
        } else {
            (completed * 100 / total) as u32
        };
        let filled = (percent / 5) as usize;
        let empty = 20 - filled;
        format!("[{}{}] {}%", "=".repeat(filled), " ".repeat(empty), percent)
    }

    fn on_job_started(&self, source: &Path, destination: &Path, throttle: Throttle, total: usize) {
        if self.json {
            return;
        }
        eprintln!("Preparing transfer...");
        eprintln!("  Source: {}", source.display());
        eprintln!("  Destination: {}", destination.display());
        eprintln!("  Speed: {}", throttle);
        eprintln!("  Total: {} items", total);
        eprintln!();
    }

    fn on_event(&mut self, event: &ProgressEvent) -> Result<(), CliError> {
        if self.json {
            let line = serde_json::to_string(event)
                .map_err(|e| CliError::Transfer(format!("Failed to encode event: {}", e)))?;
            println!("{}", line);
            return Ok(());
        }

        if let (Some(item), Some(error)) = (&event.last_item, &event.error) {
            eprintln!(
                "\r[{:3}] Failed: {}: {}",
                event.completed_count,
                item.relative_path.display(),
                error.message
            );
        } else if let (true, Some(item)) = (self.verbose, &event.last_item) {
            eprintln!(
                "\r[{:3}] Done: {}",
                event.completed_count,
                item.relative_path.display()
            );
        }

        // Throttle redraws to avoid spam (max once per 200ms)
        let due = self
            .last_progress_update
            .map_or(true, |last| last.elapsed().as_millis() >= 200);
        if due || event.is_terminal() {
            eprint!(
                "\rProgress: {} | {}/{} items",
                Self::progress_bar(event.completed_count, event.total_count),
                event.completed_count,
                event.total_count
            );
            let _ = io::stderr().flush();
            self.last_progress_update = Some(Instant::now());
        }
        Ok(())
    }

    fn on_job_completed(&self, job: &TransferJob) {
        if self.json {
            return;
        }
        eprintln!();
        match job.outcome() {
            JobOutcome::Finished { .. } => eprintln!("Transfer complete!"),
            JobOutcome::Cancelled { .. } => eprintln!("Transfer cancelled."),
            JobOutcome::Aborted { .. } => eprintln!("Transfer aborted!"),
            JobOutcome::Unfinished => {}
        }

        eprintln!(
            "Summary: {} done, {} failed, {} not processed",
            job.cursor - job.failures.len(),
            job.failures.len(),
            job.remaining().len()
        );
        eprintln!("Bytes copied: {}", Self::format_bytes(job.bytes_copied));
        if let Some(elapsed) = job.elapsed() {
            eprintln!("Elapsed: {}", Self::format_duration(elapsed));
        }

        if !job.failures.is_empty() {
            eprintln!();
            eprintln!("Failed items:");
            for failed in &job.failures {
                eprintln!(
                    "  {}: {}",
                    failed.item.relative_path.display(),
                    failed.failure.message
                );
            }
        }
    }
}

/// Forward stdin commands to the running job until stdin closes.
fn spawn_command_reader(handle: Arc<JobHandle>) {
    thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            let Some(command) = parse_command(&line) else {
                eprintln!("\rUnknown command '{}'. Use p (pause), r (resume), c (cancel)", line.trim());
                continue;
            };
            let result = match command {
                Command::Pause => handle.pause(),
                Command::Resume => handle.resume(),
                Command::Cancel => handle.cancel(),
            };
            match result {
                Ok(()) => eprintln!("\r{:?} requested", command),
                Err(e) => eprintln!("\r{}", e),
            }
            if handle.status().is_terminal() {
                break;
            }
        }
    });
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let default_filter = if verbose {
        "warn,transfer_engine=debug,transfer=debug"
    } else {
        "warn,transfer_engine=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr).with_target(false))
        .with(filter)
        .init();
}

/// Parse and validate command-line arguments, then run the job
fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    let exit_code = match run_cli(&args) {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("Error: {}", err);
            err.exit_code()
        }
    };

    std::process::exit(exit_code);
}

/// Main CLI logic - separated for testability
fn run_cli(args: &Args) -> Result<(), CliError> {
    validate_root(&args.src).map_err(|e| CliError::Setup(e.to_string()))?;

    let throttle: Throttle = args.throttle.parse().map_err(CliError::Setup)?;

    let destination = if args.nest {
        match args.src.file_name() {
            Some(name) => args.dst.join(name),
            None => {
                return Err(CliError::Setup(format!(
                    "Cannot nest: source has no folder name: {}",
                    args.src.display()
                )))
            }
        }
    } else {
        args.dst.clone()
    };

    let items = enumerate(&args.src).map_err(|e| CliError::Setup(format!("Enumeration failed: {}", e)))?;
    if items.is_empty() {
        return Err(CliError::Setup("No files or folders to transfer".to_string()));
    }

    let config = EngineConfig::default()
        .with_event_buffer(args.buffer)
        .with_max_consecutive_destination_errors(args.max_destination_errors);
    let engine = TransferEngine::with_config(config);

    let handle = engine
        .create_job(&args.src, &destination, items, throttle)
        .map_err(|e| CliError::Setup(format!("Job creation failed: {}", e)))?;
    let handle = Arc::new(handle);
    debug!(
        job_id = %handle.id(),
        event_buffer = engine.config().event_buffer,
        max_destination_errors = engine.config().max_consecutive_destination_errors,
        "job created"
    );

    let mut progress = ConsoleProgress::new(args.verbose, args.json);
    progress.on_job_started(&args.src, &destination, throttle, handle.total());

    let events = handle.subscribe();
    engine
        .start(&handle)
        .map_err(|e| CliError::Setup(format!("Job start failed: {}", e)))?;

    if args.interactive {
        spawn_command_reader(Arc::clone(&handle));
    }

    for event in events {
        progress.on_event(&event)?;
    }

    let job = handle
        .wait()
        .map_err(|e| CliError::Transfer(format!("Job execution failed: {}", e)))?;
    progress.on_job_completed(&job);

    match job.outcome() {
        JobOutcome::Finished { failed: 0 } => Ok(()),
        JobOutcome::Finished { failed } => Err(CliError::Transfer(format!(
            "{} item(s) failed to transfer",
            failed
        ))),
        JobOutcome::Cancelled { completed } => Err(CliError::Transfer(format!(
            "Transfer cancelled after {} of {} items",
            completed,
            job.items.len()
        ))),
        JobOutcome::Aborted { reason } => Err(CliError::Transfer(format!(
            "Transfer aborted: {}",
            reason
        ))),
        JobOutcome::Unfinished => Err(CliError::Transfer(
            "Transfer ended without a final state".to_string(),
        )),
    }
}
