//! drivedupe - concurrent content hashing and duplicate grouping
//!
//! The core of the crate hashes the files of a catalog on a bounded worker
//! pool, groups identical content, and tracks every long-running step as an
//! observable, pausable, cancellable operation.
//!
//! - [`catalog`]: the file record
//! - [`storage`]: reading file content ([`storage::StorageReader`])
//! - [`hasher`]: digests, retries, the worker pool
//! - [`duplicates`]: filters, groups, keep recommendations
//! - [`progress`]: the operation tracker and its progress streams
//! - [`gateway`]: where catalog, groups and progress records are stored
//! - [`service`]: tracked hashing, search and folder comparison runs
//! - [`statistics`]: catalog breakdowns by category, size and extension
//!
//! The `drivedupe` binary wires these to a local directory; see [`run_app`].

pub mod catalog;
pub mod cli;
pub mod config;
pub mod duplicates;
pub mod error;
pub mod gateway;
pub mod hasher;
pub mod logging;
pub mod output;
pub mod progress;
pub mod service;
pub mod signal;
pub mod statistics;
pub mod storage;

use std::io::{self, Write};
use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::{Context, Result};

use crate::cli::{Cli, Commands, OutputFormat, ScanArgs};
use crate::config::Config;
use crate::error::{DedupeError, ExitCode};
use crate::gateway::{MemoryGateway, PersistenceGateway};
use crate::hasher::{supported_algorithms, HashEngine};
use crate::output::{JsonOutput, ScanReport, TextOutput};
use crate::progress::{
    operation_types, OperationTracker, ProgressUpdate, TerminalProgress, TrackerReporter,
};
use crate::service::{DedupeService, Scope};
use crate::signal::ShutdownHandler;
use crate::statistics::FileStatistics;
use crate::storage::LocalStorage;

/// Run the command described by `cli`.
///
/// # Errors
///
/// Configuration, catalog, hashing and output failures. A run cancelled
/// with Ctrl+C fails with [`DedupeError::Cancelled`].
pub fn run_app(cli: Cli) -> Result<ExitCode> {
    logging::init_logging(cli.verbose, cli.quiet);

    let config = match &cli.config {
        Some(path) => Config::load_from_path(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::load(None),
    };

    match cli.command {
        Commands::Algorithms => {
            let mut stdout = io::stdout().lock();
            for name in supported_algorithms() {
                writeln!(stdout, "{name}")?;
            }
            Ok(ExitCode::Success)
        }
        Commands::Scan(args) => {
            let shutdown = signal::install_handler()?;
            run_scan(config, &args, cli.quiet, &shutdown)
        }
    }
}

fn run_scan(
    mut config: Config,
    args: &ScanArgs,
    quiet: bool,
    shutdown: &ShutdownHandler,
) -> Result<ExitCode> {
    config.merge_scan_args(args);
    config.validate()?;
    log::debug!("Effective configuration: {config:?}");

    let storage = Arc::new(
        LocalStorage::new(&args.path)
            .with_follow_symlinks(args.follow_symlinks)
            .with_shutdown_flag(shutdown.get_flag()),
    );
    let gateway = Arc::new(MemoryGateway::new());
    let tracker =
        Arc::new(OperationTracker::new(config.tracker_config()).with_gateway(gateway.clone()));
    shutdown.watch(&tracker);

    let statistics = catalog(&storage, gateway.as_ref(), &tracker, shutdown)?;

    let engine = HashEngine::with_hasher(
        storage,
        config.hash.algorithm.hasher(config.hash.buffer_size),
    )
    .with_retry_policy(config.retry_policy());
    let service = Arc::new(DedupeService::new(
        gateway,
        Arc::clone(&tracker),
        Arc::new(engine),
        config.service_settings(),
    ));
    let display = TerminalProgress::new(quiet);

    let hashing = service.spawn_hash_scope(Scope::All, args.force)?;
    let bar = display.follow(tracker.subscribe(hashing.id())?, "Hashing");
    let hashed = hashing.join();
    finish_display(bar, "Hashing");
    let hash = hashed?.report;

    let search = service.spawn_find_duplicates(Scope::All)?;
    let bar = display.follow(tracker.subscribe(search.id())?, "Grouping");
    let found = search.join();
    finish_display(bar, "Grouping");
    let outcome = found?.outcome;

    let report = ScanReport {
        algorithm: config.hash.algorithm.to_string(),
        statistics,
        hash,
        outcome,
    };
    let mut stdout = io::stdout().lock();
    match args.output {
        OutputFormat::Text => TextOutput::new(&report).write_to(&mut stdout)?,
        OutputFormat::Json => JsonOutput::new(&report).write_to(&mut stdout, true)?,
    }

    let stats = tracker.statistics();
    log::debug!(
        "{} operations tracked, {:.0}% succeeded",
        stats.total,
        stats.success_rate()
    );
    Ok(report.exit_code())
}

/// Wait for a progress display thread to draw its last frame.
fn finish_display(handle: JoinHandle<Option<ProgressUpdate>>, label: &str) {
    if handle.join().is_err() {
        log::debug!("{label} progress display panicked");
    }
}

/// Walk the directory as a tracked `file_scan` operation and store the
/// catalog. Returns statistics over the files found.
fn catalog(
    storage: &LocalStorage,
    gateway: &dyn PersistenceGateway,
    tracker: &Arc<OperationTracker>,
    shutdown: &ShutdownHandler,
) -> Result<FileStatistics> {
    let id = tracker.start(operation_types::FILE_SCAN, 0)?;
    tracker.set_metadata(id, "root", storage.root().display().to_string())?;

    let walker = storage
        .clone()
        .with_progress_callback(Arc::new(TrackerReporter::new(Arc::clone(tracker), id, "walking")));
    let files = match walker.catalog() {
        Ok(files) => files,
        Err(e) => {
            tracker.fail(id, e.to_string())?;
            return Err(DedupeError::from(e).into());
        }
    };
    if shutdown.is_shutdown_requested() {
        return Err(DedupeError::Cancelled.into());
    }

    let count = files.len() as u64;
    tracker.set_total(id, count)?;
    if let Err(e) = gateway.upsert_files(&files) {
        tracker.fail(id, e.to_string())?;
        return Err(DedupeError::from(e).into());
    }
    tracker.update(id, count, "catalog stored")?;

    let statistics = FileStatistics::from_files(&files);
    tracker.set_metadata(id, "total_size", statistics.total_size)?;
    if let Some(category) = statistics.largest_category() {
        tracker.set_metadata(id, "largest_category", category.as_str())?;
    }
    tracker.complete(id)?;
    log::info!(
        "Catalogued {} files ({} bytes) under {}",
        statistics.total_files,
        statistics.total_size,
        storage.root().display()
    );
    Ok(statistics)
}
