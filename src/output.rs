use std::io::{self, Write};
use std::time::Duration;

use serde::Serialize;
use tracing::info;

use crate::pipeline::RunReport;
use crate::plan::JobStatus;

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Human,
    Json,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

impl ProgressEvent {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            elapsed: None,
        }
    }

    pub fn with_elapsed(message: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            message: message.into(),
            elapsed: Some(elapsed),
        }
    }
}

/// Receives phase updates from the pipeline, possibly from several worker
/// threads at once.
pub trait ProgressSink: Send + Sync {
    fn event(&self, event: ProgressEvent);
}

pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn event(&self, _event: ProgressEvent) {}
}

/// Forwards progress to the log.
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => info!(elapsed_ms = elapsed.as_millis() as u64, "{}", event.message),
            None => info!("{}", event.message),
        }
    }
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_report(report: &RunReport) -> io::Result<()> {
        Self::print_json(report)
    }

    pub fn print_commands(commands: &[String]) -> io::Result<()> {
        Self::print_json(&commands)
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

pub fn print_summary(report: &RunReport) {
    let green = "\x1b[32m";
    let yellow = "\x1b[33m";
    let cyan = "\x1b[36m";
    let red = "\x1b[31m";
    let reset = "\x1b[0m";

    println!("{cyan}bed-to-tabix summary{reset}");
    let fetched = report
        .jobs
        .iter()
        .filter(|job| job.status == JobStatus::Succeeded)
        .count();
    println!(
        "{green}Fetched chromosomes: {fetched}/{}{reset}",
        report.jobs.len()
    );
    for job in &report.jobs {
        let color = match job.status {
            JobStatus::Succeeded => green,
            JobStatus::Failed => red,
            _ => yellow,
        };
        println!(
            "{color}  #{:<3} chr{:<4} {:>5} interval(s) {:>12} bp  {} ({} attempt(s)){reset}",
            job.sequence, job.chromosome, job.intervals, job.bases, job.status, job.attempts
        );
        if let Some(error) = &job.error {
            println!("{red}       {error}{reset}");
        }
    }
    if report.succeeded {
        println!("{cyan}Output: {}{reset}", report.output);
    } else {
        for failure in &report.failures {
            println!(
                "{red}Failed: chr{} ({}){reset}",
                failure.chromosome, failure.kind
            );
        }
        if let Some(error) = &report.error {
            println!("{red}Run failed: {error}{reset}");
        }
    }
}
