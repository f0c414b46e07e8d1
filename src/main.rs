//! doc-stats-walker - Concurrent document statistics aggregator
//!
//! Entry point for the CLI application.

use anyhow::{Context, Result};
use clap::Parser;
use doc_stats_walker::config::{CliArgs, PipelineConfig};
use doc_stats_walker::platform::{Collaborators, Credential, PlatformSnapshot, SnapshotPlatform};
use doc_stats_walker::progress::{print_header, print_records, print_summary, ProgressReporter};
use doc_stats_walker::report::StatsReport;
use doc_stats_walker::StatsPipeline;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::process::ExitCode;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();

    let args = CliArgs::parse();
    setup_logging(args.verbose)?;

    let config = PipelineConfig::from_args(&args).context("Invalid configuration")?;
    let credential = Credential::new(
        args.token
            .clone()
            .context("No access token given (use --token or DOC_STATS_TOKEN)")?,
    );

    let mut snapshot = PlatformSnapshot::load(&args.snapshot)
        .with_context(|| format!("Failed to load snapshot {}", args.snapshot.display()))?;
    if let Some(domain) = &args.domain {
        snapshot.domain = domain.clone();
    }
    let platform = Arc::new(SnapshotPlatform::new(snapshot));
    info!(nodes = platform.node_count(), "Loaded platform snapshot");

    let show_progress = !args.quiet;
    if show_progress {
        print_header(
            args.roots.len(),
            config.worker_count,
            config.max_batch_size,
            &format!("{} calls / {}s", config.rate_limit, config.rate_period.as_secs()),
        );
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create async runtime")?;

    let pipeline = StatsPipeline::new(config, Collaborators::from_platform(platform));

    // Setup signal handler for graceful shutdown
    let shutdown_flag = pipeline.shutdown_flag();
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupt received, finishing discovered batches...");
        shutdown_flag.store(true, Ordering::SeqCst);
    })
    .context("Failed to set signal handler")?;

    let mut progress = show_progress.then(ProgressReporter::new);
    if let Some(p) = progress.as_mut() {
        p.set_status("Resolving roots...");
        p.track(pipeline.progress());
    }

    let result = runtime.block_on(pipeline.compute_statistics(&args.roots, &credential));

    let report = match result {
        Ok(report) => report,
        Err(e) => {
            if let Some(p) = progress.as_mut() {
                p.finish_and_clear();
            }
            return Err(e).context("Statistics run failed");
        }
    };

    if let Some(p) = progress.as_mut() {
        if report.summary.completed {
            p.finish("Run completed");
        } else {
            p.finish("Run interrupted");
        }
    }

    let output = args.output.as_deref();
    if let Some(path) = output {
        write_report(&report, path)?;
        info!(path = %path.display(), records = report.records.len(), "Report written");
    } else {
        print_records(&report.records, &report.summary, args.top);
    }

    if show_progress {
        let output = output.map(|p| p.display().to_string());
        print_summary(&report.summary, &report.diagnostics, output.as_deref());
    }

    if !report.is_complete() {
        info!(
            diagnostics = report.diagnostics.len(),
            "Run completed with skipped roots, subtrees or batches"
        );
    }

    Ok(())
}

fn write_report(report: &StatsReport, path: &Path) -> Result<()> {
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), report)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

fn setup_logging(verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("doc_stats_walker=debug,warn")
    } else {
        EnvFilter::new("doc_stats_walker=info,warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}
