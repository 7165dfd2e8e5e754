//! TreeSync CLI - directory synchronization with verification
//!
//! Thin wrapper over the engine: parses flags, merges the option file,
//! wires Ctrl-C to the cancellation token, dispatches copy and/or
//! verification, and maps the outcome to the process exit code.

use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use treesync::config::{CliArgs, FileConfig, SyncOptions};
use treesync::engine::CopyEngine;
use treesync::error::Result;
use treesync::progress::{ConsoleReporter, ProgressSender};
use treesync::store::{RedbStore, StateStore};
use treesync::verify::{write_report, VerifyReport, VerifyScope};
use treesync::CancelToken;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Exit code: at least one file failed after retries
const EXIT_FILE_FAILURES: i32 = 1;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args = CliArgs::parse();
    match run(args) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(e.exit_code());
        }
    }
}

fn run(args: CliArgs) -> Result<i32> {
    let file_config = match &args.config {
        Some(path) => Some(FileConfig::load(path)?),
        None => None,
    };
    let opts = SyncOptions::resolve(&args, file_config)?;

    let cancel = CancelToken::new();
    install_signal_handler(&cancel);

    let store: Arc<dyn StateStore> = Arc::new(RedbStore::open(&opts.db_path, opts.mode)?);

    if opts.verify_only {
        let scope = if opts.verify_changed {
            VerifyScope::Changed
        } else {
            VerifyScope::All
        };
        let code = run_verification(&args, opts.clone(), Arc::clone(&store), cancel, scope)?;
        finish_store(&opts, &store)?;
        return Ok(code);
    }

    let quiet = args.quiet;
    let show_progress = args.progress && !quiet;

    let mut engine = CopyEngine::new(opts.clone(), Arc::clone(&store))?
        .with_cancel_token(cancel.clone());

    let reporter = if show_progress {
        let (sender, receiver) = ProgressSender::channel();
        engine = engine.with_progress(sender);
        Some(ConsoleReporter::spawn(receiver))
    } else {
        None
    };

    let summary = engine.copy_files();
    if let Some(reporter) = reporter {
        reporter.join();
    }
    let summary = summary?;

    if !quiet {
        print_summary(&summary);
    }

    let mut exit_code = if summary.is_success() {
        0
    } else {
        EXIT_FILE_FAILURES
    };

    if opts.verify_changed || opts.verify_all {
        let scope = if opts.verify_all {
            VerifyScope::All
        } else {
            VerifyScope::Changed
        };
        let verify_code =
            run_verification(&args, opts.clone(), Arc::clone(&store), cancel, scope)?;
        exit_code = exit_code.max(verify_code);
    }

    finish_store(&opts, &store)?;
    Ok(exit_code)
}

/// Post-run store chores: state export and a snapshot for the log
fn finish_store(opts: &SyncOptions, store: &Arc<dyn StateStore>) -> Result<()> {
    if let Some(path) = &opts.export_state {
        store.export_report(path)?;
        tracing::info!(path = %path.display(), "state exported");
    }
    let counts = store.stats_snapshot()?;
    tracing::debug!(
        total = counts.total,
        success = counts.success,
        verified = counts.verified,
        failed = counts.failed,
        mismatch = counts.mismatch,
        "store snapshot"
    );
    Ok(())
}

fn run_verification(
    args: &CliArgs,
    opts: SyncOptions,
    store: Arc<dyn StateStore>,
    cancel: CancelToken,
    scope: VerifyScope,
) -> Result<i32> {
    let final_report = opts.final_report.clone();
    let report = treesync::Verifier::new(opts, store)?
        .with_cancel_token(cancel)
        .run(scope)?;

    if let Some(path) = &final_report {
        write_report(path, &report.rows)?;
        tracing::info!(path = %path.display(), rows = report.rows.len(), "report written");
    }

    if !args.quiet {
        print_verify_summary(&report);
    }

    Ok(if report.is_clean() { 0 } else { EXIT_FILE_FAILURES })
}

fn install_signal_handler(cancel: &CancelToken) {
    let token = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        eprintln!("\nInterrupted, finishing in-flight chunks...");
        token.cancel();
    }) {
        tracing::warn!(error = %e, "could not install Ctrl-C handler");
    }
}

fn print_summary(summary: &treesync::SyncSummary) {
    println!("\n{}", console::style("=== Sync Summary ===").bold());
    println!("Session:      {}", summary.session_id);
    println!("Copied:       {}", summary.files_copied);
    println!("Skipped:      {}", summary.files_skipped);
    println!("Failed:       {}", summary.files_failed);
    println!(
        "Bytes:        {}",
        humansize::format_size(summary.bytes_copied, humansize::BINARY)
    );
    if summary.files_deleted > 0 {
        println!("Deleted:      {}", summary.files_deleted);
    }
    println!(
        "Duration:     {}",
        humantime::format_duration(round_to_millis(summary.duration))
    );
}

fn print_verify_summary(report: &VerifyReport) {
    println!("\n{}", console::style("=== Verification ===").bold());
    println!("Verified:     {}", report.verified());
    println!("Mismatched:   {}", report.mismatched());
    println!("Failed:       {}", report.failed());
    if report.skipped() > 0 {
        println!("Skipped:      {}", report.skipped());
    }
}

fn round_to_millis(d: std::time::Duration) -> std::time::Duration {
    std::time::Duration::from_millis(d.as_millis() as u64)
}
