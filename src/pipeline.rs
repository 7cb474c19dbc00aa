use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use camino::Utf8PathBuf;
use serde::Serialize;
use tempfile::TempDir;
use tracing::info;

use crate::domain::{Chromosome, Transport};
use crate::error::{JobFailure, TabixError};
use crate::executor::{ExecutionReport, FetchExecutor, RetryPolicy, SlotPool};
use crate::fetch::{FetchRequest, RegionFetcher};
use crate::merge::{FileMerger, ResultMerger};
use crate::output::{ProgressEvent, ProgressSink};
use crate::plan::{FetchJob, JobStatus, plan_jobs};
use crate::regions::{RegionSource, merge_sources};

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub output: PathBuf,
    pub concurrency: usize,
    pub compressed: bool,
    pub transport: Transport,
    pub retry: RetryPolicy,
    pub force: bool,
    pub keep_intermediates: bool,
    /// Where per-chromosome files go. A fresh temporary directory when unset.
    pub work_dir: Option<PathBuf>,
}

impl PipelineOptions {
    pub fn new(output: PathBuf) -> Self {
        Self {
            output,
            concurrency: 6,
            compressed: true,
            transport: Transport::default(),
            retry: RetryPolicy::default(),
            force: false,
            keep_intermediates: false,
            work_dir: None,
        }
    }
}

enum WorkDir {
    Temp(TempDir),
    Fixed(PathBuf),
}

impl WorkDir {
    fn path(&self) -> &Path {
        match self {
            WorkDir::Temp(dir) => dir.path(),
            WorkDir::Fixed(path) => path,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub sequence: u32,
    pub chromosome: String,
    pub intervals: usize,
    pub bases: u64,
    pub status: JobStatus,
    pub attempts: u32,
    pub error: Option<String>,
}

impl From<&FetchJob> for JobReport {
    fn from(job: &FetchJob) -> Self {
        Self {
            sequence: job.sequence,
            chromosome: job.chromosome().to_string(),
            intervals: job.intervals.len(),
            bases: job.intervals.span(),
            status: job.status(),
            attempts: job.attempts(),
            error: job.last_error().map(str::to_string),
        }
    }
}

/// Outcome of a run, produced whether or not the run succeeded. Jobs never
/// started after a failure are reported as `pending`.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub output: Utf8PathBuf,
    pub succeeded: bool,
    pub compressed: bool,
    pub transport: Transport,
    pub concurrency: usize,
    pub started_at: String,
    pub finished_at: String,
    pub jobs: Vec<JobReport>,
    pub failures: Vec<JobFailure>,
    pub error: Option<String>,
}

/// A run that did not produce its output, with the report of how far it got.
#[derive(Debug)]
pub struct FailedRun {
    pub report: RunReport,
    pub error: TabixError,
}

/// One invocation: the planned jobs, the slot budget and the work directory.
/// Built by [`Pipeline::prepare`], which rejects bad input before anything
/// touches the network.
pub struct Pipeline {
    jobs: Vec<FetchJob>,
    slots: SlotPool,
    options: PipelineOptions,
    work_dir: WorkDir,
}

impl Pipeline {
    pub fn prepare(
        sources: &[RegionSource],
        contigs: &BTreeSet<Chromosome>,
        options: PipelineOptions,
    ) -> Result<Self, TabixError> {
        let slots = SlotPool::new(options.concurrency)?;
        if !options.force && options.output.exists() {
            return Err(TabixError::OutputExists(options.output.clone()));
        }

        let sets = merge_sources(sources, contigs)?;
        if sets.values().all(|set| set.is_empty()) {
            return Err(TabixError::NoRegions);
        }

        let work_dir = match &options.work_dir {
            Some(path) => {
                fs::create_dir_all(path).map_err(|err| TabixError::Filesystem(err.to_string()))?;
                WorkDir::Fixed(path.clone())
            }
            None => WorkDir::Temp(
                tempfile::Builder::new()
                    .prefix("bed-to-tabix-")
                    .tempdir()
                    .map_err(|err| TabixError::Filesystem(err.to_string()))?,
            ),
        };

        let jobs = plan_jobs(sets, work_dir.path());
        info!(
            jobs = jobs.len(),
            concurrency = slots.capacity(),
            work_dir = %work_dir.path().display(),
            "planned fetch jobs"
        );
        Ok(Self {
            jobs,
            slots,
            options,
            work_dir,
        })
    }

    /// Reads every input before planning, so an unreadable or malformed file
    /// fails the run up front.
    pub fn from_files(
        inputs: &[PathBuf],
        contigs: &BTreeSet<Chromosome>,
        options: PipelineOptions,
    ) -> Result<Self, TabixError> {
        let sources = inputs
            .iter()
            .map(|path| RegionSource::read(path))
            .collect::<Result<Vec<_>, _>>()?;
        Self::prepare(&sources, contigs, options)
    }

    pub fn jobs(&self) -> &[FetchJob] {
        &self.jobs
    }

    /// What each job would run, in sequence order. Nothing is fetched.
    pub fn dry_run(&self, fetcher: &dyn RegionFetcher) -> Vec<String> {
        self.jobs
            .iter()
            .map(|job| {
                fetcher.describe(&FetchRequest {
                    intervals: &job.intervals,
                    output: &job.output_path,
                    transport: self.options.transport,
                })
            })
            .collect()
    }

    /// Fetches, merges and cleans up. On failure the error comes with the
    /// report of every job, so callers can still show what happened.
    pub fn run(
        self,
        fetcher: &dyn RegionFetcher,
        merger: &dyn FileMerger,
        sink: &dyn ProgressSink,
    ) -> Result<RunReport, Box<FailedRun>> {
        let started_at = chrono::Utc::now().to_rfc3339();
        let Pipeline {
            jobs,
            slots,
            options,
            work_dir,
        } = self;

        sink.event(ProgressEvent::new(format!(
            "phase=Fetch; {} chromosome(s), {} at a time",
            jobs.len(),
            slots.capacity()
        )));
        let executor = FetchExecutor::new(fetcher, options.transport, options.retry, sink);
        let execution: ExecutionReport = executor.execute(jobs, &slots);
        sink.event(ProgressEvent::with_elapsed(
            "phase=Fetch; settled",
            execution.elapsed,
        ));

        sink.event(ProgressEvent::new("phase=Merge; assembling output"));
        let assembled = ResultMerger::new(merger, options.keep_intermediates).assemble(
            &execution,
            &options.output,
            options.compressed,
        );

        match work_dir {
            WorkDir::Temp(dir) if options.keep_intermediates => {
                let kept = dir.keep();
                info!(path = %kept.display(), "work directory kept");
            }
            WorkDir::Temp(dir) => {
                if let Err(err) = dir.close() {
                    tracing::warn!("failed to remove work directory: {err}");
                }
            }
            WorkDir::Fixed(_) => {}
        }

        let output = Utf8PathBuf::from_path_buf(options.output.clone())
            .unwrap_or_else(|path| Utf8PathBuf::from(path.to_string_lossy().to_string()));
        let report = RunReport {
            output,
            succeeded: assembled.is_ok(),
            compressed: options.compressed,
            transport: options.transport,
            concurrency: slots.capacity(),
            started_at,
            finished_at: chrono::Utc::now().to_rfc3339(),
            jobs: execution.jobs.iter().map(JobReport::from).collect(),
            failures: execution.failures(),
            error: assembled.as_ref().err().map(ToString::to_string),
        };

        match assembled {
            Ok(()) => {
                info!(output = %report.output, "run complete");
                Ok(report)
            }
            Err(error) => Err(Box::new(FailedRun { report, error })),
        }
    }
}

/// Default output path: the input names joined by `__`, without `.bed`/`.gz`,
/// in the current directory.
pub fn default_output_name(inputs: &[PathBuf], cwd: &Path, compressed: bool) -> PathBuf {
    let stem = inputs
        .iter()
        .map(|path| {
            path.file_name()
                .map(|name| {
                    let name = name.to_string_lossy();
                    let name = name.strip_suffix(".gz").unwrap_or(&name);
                    name.strip_suffix(".bed").unwrap_or(name).to_string()
                })
                .unwrap_or_default()
        })
        .collect::<Vec<_>>()
        .join("__");
    with_vcf_suffix(cwd.join(stem), compressed)
}

/// Appends `.vcf` when missing, and `.gz` for compressed output. A `.gz`
/// suffix is dropped when the output is uncompressed.
pub fn with_vcf_suffix(path: PathBuf, compressed: bool) -> PathBuf {
    let mut name = path.to_string_lossy().to_string();
    if compressed && name.ends_with(".vcf.gz") {
        return path;
    }
    if !compressed && let Some(stripped) = name.strip_suffix(".gz") {
        name = stripped.to_string();
    }
    if !name.ends_with(".vcf") {
        name.push_str(".vcf");
    }
    if compressed {
        name.push_str(".gz");
    }
    PathBuf::from(name)
}
