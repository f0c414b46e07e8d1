//! Progress reporting for statistics runs
//!
//! Provides a live spinner fed from the pipeline's counters and the
//! console summary printed at the end of a run.

use crate::pipeline::PipelineProgress;
use crate::platform::types::DocumentRecord;
use crate::report::{Diagnostic, RunSummary};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Most diagnostics listed individually in the summary
const MAX_LISTED_DIAGNOSTICS: usize = 10;

/// Progress reporter that displays run status
pub struct ProgressReporter {
    bar: ProgressBar,
    stop: Arc<AtomicBool>,
    ticker: Option<JoinHandle<()>>,
}

impl ProgressReporter {
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();

        // Template is a literal; fall back to the default spinner style if it is ever rejected
        let style = ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏");
        bar.set_style(style);
        bar.enable_steady_tick(Duration::from_millis(100));

        Self {
            bar,
            stop: Arc::new(AtomicBool::new(false)),
            ticker: None,
        }
    }

    /// Refresh the message from `progress` until the reporter finishes
    pub fn track(&mut self, progress: Arc<PipelineProgress>) {
        let bar = self.bar.clone();
        let stop = Arc::clone(&self.stop);
        let started = Instant::now();

        self.ticker = Some(thread::spawn(move || {
            while !stop.load(Ordering::SeqCst) {
                bar.set_message(progress_message(&progress, started.elapsed()));
                thread::sleep(Duration::from_millis(250));
            }
        }));
    }

    /// Set a status message
    pub fn set_status(&self, status: &str) {
        self.bar.set_message(status.to_string());
    }

    /// Finish the progress display with a final message
    pub fn finish(&mut self, message: &str) {
        self.stop_ticker();
        self.bar.finish_with_message(message.to_string());
    }

    /// Finish and clear the progress display
    pub fn finish_and_clear(&mut self) {
        self.stop_ticker();
        self.bar.finish_and_clear();
    }

    fn stop_ticker(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(ticker) = self.ticker.take() {
            let _ = ticker.join();
        }
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ProgressReporter {
    fn drop(&mut self) {
        self.stop_ticker();
    }
}

fn progress_message(progress: &PipelineProgress, elapsed: Duration) -> String {
    let secs = elapsed.as_secs_f64();
    let nodes = progress.nodes_discovered();
    let rate = if secs > 0.0 { nodes as f64 / secs } else { 0.0 };

    format!(
        "Nodes: {} ({:.0}/s) | Batches: {} | Records: {} | Dropped: {}",
        format_number(nodes),
        rate,
        format_number(progress.batches_completed()),
        format_number(progress.records_joined()),
        format_number(progress.identities_dropped()),
    )
}

/// Format a number with thousands separators
fn format_number(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Print a header at the start of the run
pub fn print_header(roots: usize, workers: usize, batch_size: usize, rate: &str) {
    println!();
    println!(
        "{} {}",
        style("doc-stats-walker").cyan().bold(),
        env!("CARGO_PKG_VERSION")
    );
    println!("{}", style("─".repeat(50)).dim());
    println!("  {} {}", style("Roots:").bold(), roots);
    println!("  {} {}", style("Workers:").bold(), workers);
    println!("  {} {}", style("Batch size:").bold(), batch_size);
    println!("  {} {}", style("Rate limit:").bold(), rate);
    println!();
}

/// Print a summary of the run
pub fn print_summary(summary: &RunSummary, diagnostics: &[Diagnostic], output: Option<&str>) {
    let secs = summary.duration.as_secs_f64();

    println!();
    if summary.completed {
        println!("{}", style("Run Complete").green().bold());
    } else {
        println!("{}", style("Run Interrupted").yellow().bold());
    }
    println!("{}", style("─".repeat(50)).dim());
    println!(
        "  {} {} ({} walked, {} flat)",
        style("Roots:").bold(),
        summary.roots,
        summary.hierarchical_roots,
        summary.flat_roots
    );
    println!(
        "  {} {}",
        style("Nodes:").bold(),
        format_number(summary.nodes_discovered)
    );
    println!(
        "  {} {}",
        style("Records:").bold(),
        format_number(summary.records as u64)
    );
    println!(
        "  {} {} in {} batches",
        style("Lookups:").bold(),
        format_number(summary.remote_calls),
        summary.batches
    );
    println!(
        "  {} {:.1}s (rate wait {:.1}s)",
        style("Duration:").bold(),
        secs,
        summary.rate_wait.as_secs_f64()
    );
    if summary.dropped > 0 {
        println!(
            "  {} {}",
            style("Dropped:").yellow().bold(),
            format_number(summary.dropped as u64)
        );
    }
    if !diagnostics.is_empty() {
        println!(
            "  {} {}",
            style("Diagnostics:").yellow().bold(),
            diagnostics.len()
        );
        for diagnostic in diagnostics.iter().take(MAX_LISTED_DIAGNOSTICS) {
            println!("    {} {}", style("-").dim(), diagnostic);
        }
        if diagnostics.len() > MAX_LISTED_DIAGNOSTICS {
            println!(
                "    {}",
                style(format!("... {} more", diagnostics.len() - MAX_LISTED_DIAGNOSTICS)).dim()
            );
        }
    }
    if let Some(path) = output {
        println!("  {} {}", style("Output:").bold(), path);
    }
    println!();
}

/// Print the first `limit` ranked records
pub fn print_records(records: &[DocumentRecord], summary: &RunSummary, limit: usize) {
    if records.is_empty() {
        return;
    }

    println!(
        "{} {}",
        style(format!("Top {} by", limit.min(records.len()))).bold(),
        style(summary.rank_by).cyan()
    );
    println!("{}", style("─".repeat(50)).dim());
    for (rank, record) in records.iter().take(limit).enumerate() {
        println!(
            "{:>4}. {} {}",
            rank + 1,
            style(&record.title).bold(),
            style(format!("[{}]", record.doc_type)).dim()
        );
        println!(
            "      uv {}  pv {}  likes {}  {}",
            format_number(record.uv.max(0) as u64),
            format_number(record.pv.max(0) as u64),
            format_number(record.like_count as u64),
            style(&record.source_url).underlined()
        );
    }
    println!();
}
