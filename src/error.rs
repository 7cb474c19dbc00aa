use std::fmt;
use std::path::PathBuf;

use miette::Diagnostic;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum TabixError {
    #[error("invalid region in {source_name} line {line}: {reason}")]
    #[diagnostic(help("regions are tab-delimited chrom/start/end with 0-based half-open coordinates"))]
    InvalidRegion {
        source_name: String,
        line: usize,
        reason: String,
    },

    #[error("failed to read regions file {0}: {1}")]
    RegionsRead(PathBuf, String),

    #[error("no regions found in the input files")]
    NoRegions,

    #[error("invalid chromosome name: {0}")]
    InvalidChromosome(String),

    #[error("concurrency must be at least 1")]
    InvalidConcurrency,

    #[error("output file {0} already exists")]
    #[diagnostic(help("use --force to overwrite it or change the output filename with --out"))]
    OutputExists(PathBuf),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("required tool not found: {0}")]
    #[diagnostic(help("pass the matching --path-to-* flag or set the PATH_TO_* environment variable"))]
    MissingTool(String),

    #[error("transient fetch failure for chromosome {chromosome}: {message}")]
    TransientFetch { chromosome: String, message: String },

    #[error("fetch failed for chromosome {chromosome}: {message}")]
    FatalFetch { chromosome: String, message: String },

    #[error("fetch for chromosome {chromosome} gave up after {attempts} attempts: {message}")]
    RetriesExhausted {
        chromosome: String,
        attempts: u32,
        message: String,
    },

    #[error("{} job(s) failed: {}", .failures.len(), JobFailures(.failures))]
    FetchFailed { failures: Vec<JobFailure> },

    #[error("merge failed: {0}")]
    Merge(String),

    #[error("remote request failed: {0}")]
    Http(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl TabixError {
    /// Whether retrying the same fetch attempt can reasonably succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, TabixError::TransientFetch { .. })
    }
}

/// How a job failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Not worth retrying: bad request, access denied, missing output.
    Fatal,
    RetriesExhausted,
}

impl FailureKind {
    pub fn of(error: &TabixError) -> Self {
        match error {
            TabixError::RetriesExhausted { .. } => FailureKind::RetriesExhausted,
            _ => FailureKind::Fatal,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailureKind::Fatal => "fatal",
            FailureKind::RetriesExhausted => "retries exhausted",
        })
    }
}

/// A job that ended in `Failed`, as surfaced to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobFailure {
    pub sequence: u32,
    pub chromosome: String,
    pub kind: FailureKind,
    pub error: String,
}

struct JobFailures<'a>(&'a [JobFailure]);

impl fmt::Display for JobFailures<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, failure) in self.0.iter().enumerate() {
            if idx > 0 {
                write!(f, "; ")?;
            }
            write!(
                f,
                "chromosome {} ({}: {})",
                failure.chromosome, failure.kind, failure.error
            )?;
        }
        Ok(())
    }
}
