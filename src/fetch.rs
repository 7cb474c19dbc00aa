//! The region-fetch capability: retrieve one chromosome's intervals from the
//! remote archive into a block-compressed VCF at a given path.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::LazyLock;
use std::thread;
use std::time::{Duration, Instant};

use regex::Regex;
use reqwest::StatusCode;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use tracing::{debug, warn};

use crate::archive::RemoteArchive;
use crate::domain::{Chromosome, Transport};
use crate::error::TabixError;
use crate::regions::MergedIntervalSet;
use crate::tools::{ToolPaths, render_command};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

static FATAL_STDERR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)permission denied|access denied|not authori[sz]ed|forbidden|\b40[134]\b|not found|no such file|could not parse|invalid region|malformed",
    )
    .unwrap()
});

static TRANSIENT_STDERR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)timed?[ -]?out|connection (refused|reset|closed)|temporar|too many requests|\b429\b|\b50[0234]\b|service unavailable|network is unreachable|could not resolve|broken pipe",
    )
    .unwrap()
});

/// What one fetch attempt needs to know.
#[derive(Debug, Clone, Copy)]
pub struct FetchRequest<'a> {
    pub intervals: &'a MergedIntervalSet,
    pub output: &'a Path,
    pub transport: Transport,
}

impl FetchRequest<'_> {
    pub fn chromosome(&self) -> &Chromosome {
        self.intervals.chromosome()
    }
}

pub trait RegionFetcher: Send + Sync {
    /// Writes the requested regions to `request.output`. On error nothing
    /// should be left at that path; callers remove leftovers regardless.
    fn fetch(&self, request: &FetchRequest<'_>) -> Result<(), TabixError>;

    /// Human-readable form of what `fetch` would do, used by dry runs.
    fn describe(&self, request: &FetchRequest<'_>) -> String {
        format!(
            "fetch {} interval(s) on {} -> {}",
            request.intervals.len(),
            request.chromosome(),
            request.output.display()
        )
    }
}

/// Turns tool stderr into a transient or fatal fetch error. Anything not
/// recognised as a network or service hiccup is fatal.
pub fn classify_failure(chromosome: &Chromosome, stderr: &str) -> TabixError {
    let message = stderr.trim().to_string();
    let chromosome = chromosome.to_string();
    if !FATAL_STDERR.is_match(&message) && TRANSIENT_STDERR.is_match(&message) {
        TabixError::TransientFetch {
            chromosome,
            message,
        }
    } else {
        TabixError::FatalFetch {
            chromosome,
            message,
        }
    }
}

/// `tabix -h <remote vcf> -R <regions> | bgzip -c > <output>`
pub struct TabixFetcher {
    tools: ToolPaths,
    archive: RemoteArchive,
    attempt_timeout: Duration,
    probe: IndexProbe,
}

impl TabixFetcher {
    pub fn new(
        tools: ToolPaths,
        archive: RemoteArchive,
        attempt_timeout: Duration,
    ) -> Result<Self, TabixError> {
        Ok(Self {
            tools,
            archive,
            attempt_timeout,
            probe: IndexProbe::new()?,
        })
    }

    fn tabix_args(&self, request: &FetchRequest<'_>, regions: &Path) -> Vec<String> {
        vec![
            "-h".to_string(),
            self.archive.vcf_url(request.chromosome(), request.transport),
            "-R".to_string(),
            regions.to_string_lossy().to_string(),
        ]
    }

    fn bgzip_args() -> Vec<String> {
        vec!["-c".to_string()]
    }

    fn run_pipe(
        &self,
        request: &FetchRequest<'_>,
        regions: &Path,
        stderr_path: &Path,
    ) -> Result<(), TabixError> {
        let chromosome = request.chromosome();
        let work_dir = request.output.parent().unwrap_or(Path::new("."));
        let tabix_args = self.tabix_args(request, regions);
        debug!(
            chromosome = %chromosome,
            command = %format!(
                "{} | {}",
                render_command(&self.tools.tabix, &tabix_args),
                render_command(&self.tools.bgzip, &Self::bgzip_args())
            ),
            "running"
        );

        let filesystem = |err: std::io::Error| TabixError::Filesystem(err.to_string());
        let stderr_file = File::create(stderr_path).map_err(filesystem)?;
        let output = File::create(request.output).map_err(filesystem)?;

        // tabix downloads the remote index into its working directory.
        let mut tabix = Command::new(&self.tools.tabix)
            .args(&tabix_args)
            .current_dir(work_dir)
            .stdout(Stdio::piped())
            .stderr(stderr_file.try_clone().map_err(filesystem)?)
            .spawn()
            .map_err(|err| fatal(chromosome, format!("failed to start tabix: {err}")))?;
        let tabix_stdout = tabix
            .stdout
            .take()
            .ok_or_else(|| fatal(chromosome, "tabix stdout unavailable".to_string()))?;
        let mut bgzip = match Command::new(&self.tools.bgzip)
            .args(Self::bgzip_args())
            .stdin(tabix_stdout)
            .stdout(output)
            .stderr(stderr_file)
            .spawn()
        {
            Ok(child) => child,
            Err(err) => {
                let _ = tabix.kill();
                let _ = tabix.wait();
                return Err(fatal(chromosome, format!("failed to start bgzip: {err}")));
            }
        };

        // An unrepresentable deadline means no deadline.
        let deadline = Instant::now().checked_add(self.attempt_timeout);
        let statuses = wait_both(&mut tabix, &mut bgzip, deadline).map_err(filesystem)?;
        let Some((tabix_status, bgzip_status)) = statuses else {
            return Err(TabixError::TransientFetch {
                chromosome: chromosome.to_string(),
                message: format!(
                    "attempt timed out after {}s",
                    self.attempt_timeout.as_secs()
                ),
            });
        };

        if tabix_status.success() && bgzip_status.success() {
            return Ok(());
        }
        let stderr = fs::read_to_string(stderr_path).unwrap_or_default();
        if !tabix_status.success() {
            let message = if stderr.trim().is_empty() {
                format!("tabix exited with {tabix_status}")
            } else {
                stderr
            };
            return Err(classify_failure(chromosome, &message));
        }
        Err(fatal(
            chromosome,
            format!("bgzip exited with {bgzip_status}: {}", stderr.trim()),
        ))
    }
}

impl RegionFetcher for TabixFetcher {
    fn fetch(&self, request: &FetchRequest<'_>) -> Result<(), TabixError> {
        let chromosome = request.chromosome();
        if request.transport == Transport::Http {
            self.probe.check(
                &self.archive.index_url(chromosome, request.transport),
                chromosome,
            )?;
        }

        let regions = sidecar_path(request.output, "regions.bed");
        let stderr_path = sidecar_path(request.output, "stderr.log");
        fs::write(&regions, request.intervals.to_bed())
            .map_err(|err| TabixError::Filesystem(err.to_string()))?;

        let result = self.run_pipe(request, &regions, &stderr_path);

        remove_leftover(&regions);
        remove_leftover(&stderr_path);
        if result.is_err() {
            remove_leftover(request.output);
        }
        result
    }

    fn describe(&self, request: &FetchRequest<'_>) -> String {
        let regions = sidecar_path(request.output, "regions.bed");
        format!(
            "{} | {} > {}",
            render_command(&self.tools.tabix, &self.tabix_args(request, &regions)),
            render_command(&self.tools.bgzip, &Self::bgzip_args()),
            request.output.display()
        )
    }
}

fn sidecar_path(output: &Path, suffix: &str) -> PathBuf {
    let name = output
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    output.with_file_name(format!("{name}.{suffix}"))
}

fn remove_leftover(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => warn!(path = %path.display(), "failed to remove fetch leftover: {err}"),
    }
}

fn fatal(chromosome: &Chromosome, message: String) -> TabixError {
    TabixError::FatalFetch {
        chromosome: chromosome.to_string(),
        message,
    }
}

/// Waits for both ends of the pipe. Returns `None` after killing both if the
/// deadline passes first.
fn wait_both(
    first: &mut Child,
    second: &mut Child,
    deadline: Option<Instant>,
) -> std::io::Result<Option<(ExitStatus, ExitStatus)>> {
    let mut first_status = None;
    let mut second_status = None;
    loop {
        if first_status.is_none() {
            first_status = first.try_wait()?;
        }
        if second_status.is_none() {
            second_status = second.try_wait()?;
        }
        if let (Some(a), Some(b)) = (first_status, second_status) {
            return Ok(Some((a, b)));
        }
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            for child in [first, second] {
                let _ = child.kill();
                let _ = child.wait();
            }
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// `HEAD` check of the remote index before handing the URL to tabix, so that
/// missing files and rate limiting are classified from the HTTP status rather
/// than from tool output.
pub struct IndexProbe {
    client: Client,
}

impl IndexProbe {
    pub fn new() -> Result<Self, TabixError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("bed-to-tabix/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| TabixError::Http(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| TabixError::Http(err.to_string()))?;
        Ok(Self { client })
    }

    pub fn check(&self, url: &str, chromosome: &Chromosome) -> Result<(), TabixError> {
        match self.client.head(url).send() {
            Ok(response) => classify_status(response.status(), url, chromosome),
            Err(err) => {
                let message = format!("{url}: {err}");
                if is_retryable_error(&err) {
                    Err(TabixError::TransientFetch {
                        chromosome: chromosome.to_string(),
                        message,
                    })
                } else {
                    Err(fatal(chromosome, message))
                }
            }
        }
    }
}

fn classify_status(status: StatusCode, url: &str, chromosome: &Chromosome) -> Result<(), TabixError> {
    if status.is_success() {
        return Ok(());
    }
    let message = format!("{url} returned status {}", status.as_u16());
    if is_retryable_status(status.as_u16()) {
        Err(TabixError::TransientFetch {
            chromosome: chromosome.to_string(),
            message,
        })
    } else {
        Err(fatal(chromosome, message))
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
