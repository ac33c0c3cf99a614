use std::io::{self, Write};

use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tracing::info;

use crate::checkpoint::Checkpoint;
use crate::consensus::ConsensusCall;
use crate::fasta::CheckReport;
use crate::pipeline::{ProgressEvent, ProgressSink, RunSummary};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

/// Machine-readable results on stdout. Progress is discarded.
pub struct JsonOutput;

impl JsonOutput {
    pub fn print_summary(summary: &RunSummary) -> io::Result<()> {
        Self::print_json(summary)
    }

    pub fn print_check(report: &CheckReport) -> io::Result<()> {
        Self::print_json(report)
    }

    pub fn print_status(status: &StatusReport) -> io::Result<()> {
        Self::print_json(status)
    }

    pub fn print_calls(calls: &[ConsensusCall]) -> io::Result<()> {
        Self::print_json(&calls)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Forwards progress to the `tracing` subscriber.
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn event(&self, event: ProgressEvent) {
        match event.fraction {
            Some(fraction) => info!(progress = fraction, "{}", event.message),
            None => info!("{}", event.message),
        }
    }
}

/// Scale of the terminal progress bar; fractions map onto it.
const PROGRESS_SCALE: u64 = 1000;

/// Progress bar on stderr, for terminals.
pub struct ConsoleProgress {
    bar: ProgressBar,
}

impl ConsoleProgress {
    pub fn new() -> Self {
        let bar = ProgressBar::new(PROGRESS_SCALE);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {percent:>3}% {msg}")
            .map(|style| style.progress_chars("#>-"))
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        bar.set_style(style);
        Self::with_bar(bar)
    }

    pub fn with_bar(bar: ProgressBar) -> Self {
        Self { bar }
    }

    pub fn bar(&self) -> &ProgressBar {
        &self.bar
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl Default for ConsoleProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for ConsoleProgress {
    fn event(&self, event: ProgressEvent) {
        if let Some(fraction) = event.fraction {
            let position = (fraction.clamp(0.0, 1.0) * PROGRESS_SCALE as f64).round() as u64;
            self.bar.set_position(position);
        }
        self.bar.set_message(event.message);
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub input: String,
    pub checkpoint: Option<Checkpoint>,
    pub complete: bool,
}

pub fn print_summary_text(summary: &RunSummary) {
    let green = "\x1b[32m";
    let yellow = "\x1b[33m";
    let cyan = "\x1b[36m";
    let reset = "\x1b[0m";

    println!("{cyan}bold-digger summary ({} engine){reset}", summary.engine);
    println!(
        "{green}committed {}/{} records in {} batches this run{reset}",
        summary.records_committed, summary.total_records, summary.batches_committed
    );
    if summary.resumed_at > 0 {
        println!("{cyan}resumed at record {}{reset}", summary.resumed_at);
    }
    println!(
        "{yellow}no match: {}, fetch failures: {}, flagged: {}{reset}",
        summary.no_match, summary.fetch_failed, summary.flagged
    );
    if summary.cancelled {
        println!("{yellow}cancelled; rerun the same command to continue{reset}");
    }
}

pub fn print_check_text(report: &CheckReport, written: Option<&str>) {
    println!("checked {} records", report.records);
    if report.trimmed_ids > 0 {
        println!("{} header(s) trimmed to 99 characters", report.trimmed_ids);
    }
    if report.renamed_ids > 0 {
        println!(
            "{} trimmed header(s) collided and got a numeric suffix",
            report.renamed_ids
        );
    }
    if report.repaired_sequences > 0 {
        println!(
            "{} sequence(s) had invalid residues replaced with N",
            report.repaired_sequences
        );
    }
    match written {
        Some(path) => println!("corrected copy written to {path}"),
        None => println!("input looks fine"),
    }
}

pub fn print_status_text(status: &StatusReport) {
    match &status.checkpoint {
        None => println!("{}: no checkpoint, nothing committed yet", status.input),
        Some(checkpoint) => {
            println!(
                "{}: {}/{} records committed in {} batches (updated {})",
                status.input,
                checkpoint.records_committed,
                checkpoint.total_records,
                checkpoint.batches_committed,
                checkpoint.updated_at
            );
            if status.complete {
                println!("run complete");
            }
        }
    }
}

pub fn print_calls_text(calls: &[ConsensusCall]) {
    for call in calls {
        let name = call
            .rank_level
            .and_then(|level| call.taxonomy.at(level))
            .or(call.taxonomy.phylum.as_deref())
            .unwrap_or("No Match");
        let level = call
            .rank_level
            .map(|level| level.to_string())
            .unwrap_or_else(|| "-".to_string());
        let similarity = call
            .similarity
            .map(|value| format!("{value:.2}"))
            .unwrap_or_else(|| "-".to_string());
        let flags = call.flags.map(|flags| flags.code()).unwrap_or_default();
        println!("{}\t{level}\t{name}\t{similarity}\t{flags}", call.id);
    }
}
