use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::domain::{Chromosome, Transport};
use crate::error::{FailureKind, JobFailure, TabixError};
use crate::fetch::{FetchRequest, RegionFetcher};
use crate::output::{ProgressEvent, ProgressSink};
use crate::plan::{FetchJob, JobStatus};

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Linear backoff before the attempt following `attempt`.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }
}

/// Fixed number of run slots. A slot is held for as long as its guard lives.
#[derive(Debug)]
pub struct SlotPool {
    capacity: usize,
    in_use: Mutex<usize>,
    freed: Condvar,
}

impl SlotPool {
    pub fn new(capacity: usize) -> Result<Self, TabixError> {
        if capacity == 0 {
            return Err(TabixError::InvalidConcurrency);
        }
        Ok(Self {
            capacity,
            in_use: Mutex::new(0),
            freed: Condvar::new(),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn in_use(&self) -> usize {
        *lock(&self.in_use)
    }

    /// Blocks until a slot is free.
    pub fn acquire(&self) -> SlotGuard<'_> {
        let mut in_use = lock(&self.in_use);
        while *in_use >= self.capacity {
            in_use = self
                .freed
                .wait(in_use)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *in_use += 1;
        SlotGuard { pool: self }
    }

    fn release(&self) {
        let mut in_use = lock(&self.in_use);
        *in_use -= 1;
        self.freed.notify_one();
    }
}

#[must_use = "the slot is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct SlotGuard<'a> {
    pool: &'a SlotPool,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.pool.release();
    }
}

#[derive(Debug)]
pub enum FetchOutcome {
    Fetched(PathBuf),
    Failed(TabixError),
}

/// Terminal result of one job.
#[derive(Debug)]
pub struct FetchResult {
    pub sequence: u32,
    pub chromosome: Chromosome,
    pub outcome: FetchOutcome,
}

impl FetchResult {
    pub fn output_path(&self) -> Option<&Path> {
        match &self.outcome {
            FetchOutcome::Fetched(path) => Some(path),
            FetchOutcome::Failed(_) => None,
        }
    }

    pub fn error(&self) -> Option<&TabixError> {
        match &self.outcome {
            FetchOutcome::Fetched(_) => None,
            FetchOutcome::Failed(err) => Some(err),
        }
    }
}

/// Everything the fetch phase produced: the jobs in sequence order with their
/// final status, and one result per job that was started.
#[derive(Debug)]
pub struct ExecutionReport {
    pub jobs: Vec<FetchJob>,
    pub results: BTreeMap<u32, FetchResult>,
    pub elapsed: Duration,
}

impl ExecutionReport {
    pub fn is_success(&self) -> bool {
        self.jobs
            .iter()
            .all(|job| job.status() == JobStatus::Succeeded)
    }

    pub fn failures(&self) -> Vec<JobFailure> {
        self.results
            .values()
            .filter_map(|result| {
                result.error().map(|err| JobFailure {
                    sequence: result.sequence,
                    chromosome: result.chromosome.to_string(),
                    kind: FailureKind::of(err),
                    error: err.to_string(),
                })
            })
            .collect()
    }

    /// Output files of successful jobs, ordered by sequence.
    pub fn ordered_outputs(&self) -> Vec<PathBuf> {
        let mut outputs = self
            .results
            .values()
            .filter_map(|result| {
                result
                    .output_path()
                    .map(|path| (result.sequence, path.to_path_buf()))
            })
            .collect::<Vec<_>>();
        outputs.sort_by_key(|(sequence, _)| *sequence);
        outputs.into_iter().map(|(_, path)| path).collect()
    }
}

/// Runs fetch jobs on a bounded pool. After the first job fails no further
/// job is started; jobs already running are left to finish.
pub struct FetchExecutor<'a> {
    fetcher: &'a dyn RegionFetcher,
    transport: Transport,
    retry: RetryPolicy,
    sink: &'a dyn ProgressSink,
}

impl<'a> FetchExecutor<'a> {
    pub fn new(
        fetcher: &'a dyn RegionFetcher,
        transport: Transport,
        retry: RetryPolicy,
        sink: &'a dyn ProgressSink,
    ) -> Self {
        Self {
            fetcher,
            transport,
            retry,
            sink,
        }
    }

    pub fn execute(&self, jobs: Vec<FetchJob>, slots: &SlotPool) -> ExecutionReport {
        let start = Instant::now();
        let board = jobs.into_iter().map(Mutex::new).collect::<Vec<_>>();
        let results = Mutex::new(BTreeMap::new());
        let failed = AtomicBool::new(false);

        thread::scope(|scope| {
            for cell in &board {
                let slot = slots.acquire();
                if failed.load(Ordering::SeqCst) {
                    let job = lock(cell);
                    debug!(
                        sequence = job.sequence,
                        chromosome = %job.chromosome(),
                        "not starting job after an earlier failure"
                    );
                    break;
                }
                let (results, failed) = (&results, &failed);
                scope.spawn(move || {
                    let _slot = slot;
                    let result = self.run_job(cell);
                    if result.error().is_some() {
                        failed.store(true, Ordering::SeqCst);
                    }
                    lock(results).insert(result.sequence, result);
                });
            }
        });

        let jobs: Vec<FetchJob> = board
            .into_iter()
            .map(|cell| cell.into_inner().unwrap_or_else(PoisonError::into_inner))
            .collect();
        let skipped = jobs.iter().filter(|job| !job.status().is_terminal()).count();
        if skipped > 0 {
            info!(skipped, "jobs not started after a failure");
        }

        ExecutionReport {
            jobs,
            results: results.into_inner().unwrap_or_else(PoisonError::into_inner),
            elapsed: start.elapsed(),
        }
    }

    fn run_job(&self, cell: &Mutex<FetchJob>) -> FetchResult {
        let (sequence, intervals, output) = {
            let job = lock(cell);
            (job.sequence, job.intervals.clone(), job.output_path.clone())
        };
        let chromosome = intervals.chromosome().clone();
        let request = FetchRequest {
            intervals: &intervals,
            output: &output,
            transport: self.transport,
        };

        loop {
            let attempt = {
                let mut job = lock(cell);
                job.begin_attempt();
                job.attempts()
            };
            self.sink.event(ProgressEvent::new(format!(
                "phase=Fetch; chr{chromosome} attempt {attempt}/{}",
                self.retry.max_attempts
            )));
            let started = Instant::now();

            let result = self.fetcher.fetch(&request).and_then(|()| {
                if output.exists() {
                    Ok(())
                } else {
                    Err(TabixError::FatalFetch {
                        chromosome: chromosome.to_string(),
                        message: format!("no output written to {}", output.display()),
                    })
                }
            });

            let error = match result {
                Ok(()) => {
                    lock(cell).succeed();
                    info!(
                        sequence,
                        chromosome = %chromosome,
                        attempt,
                        latency_ms = started.elapsed().as_millis() as u64,
                        "fetched regions"
                    );
                    return FetchResult {
                        sequence,
                        chromosome,
                        outcome: FetchOutcome::Fetched(output),
                    };
                }
                Err(error) => error,
            };

            remove_partial(&output);
            let (status, error) = lock(cell).fail(error, self.retry.max_attempts);
            if status == JobStatus::Retrying {
                let delay = self.retry.delay(attempt);
                warn!(
                    chromosome = %chromosome,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "{error}; retrying"
                );
                thread::sleep(delay);
                continue;
            }

            warn!(sequence, chromosome = %chromosome, "{error}");
            self.sink
                .event(ProgressEvent::new(format!("phase=Fetch; chr{chromosome} failed")));
            return FetchResult {
                sequence,
                chromosome,
                outcome: FetchOutcome::Failed(error),
            };
        }
    }
}

fn remove_partial(path: &Path) {
    if path.exists() {
        if let Err(err) = fs::remove_file(path) {
            warn!(path = %path.display(), "failed to remove partial output: {err}");
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::output::NoProgress;

    #[test]
    fn zero_slots_is_rejected() {
        assert!(matches!(
            SlotPool::new(0),
            Err(TabixError::InvalidConcurrency)
        ));
    }

    #[test]
    fn slots_are_released_on_drop() {
        let pool = SlotPool::new(2).unwrap();
        let first = pool.acquire();
        let second = pool.acquire();
        assert_eq!(pool.in_use(), 2);
        drop(first);
        assert_eq!(pool.in_use(), 1);
        drop(second);
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    fn acquire_blocks_until_a_slot_frees() {
        let pool = Arc::new(SlotPool::new(1).unwrap());
        let held = pool.acquire();
        let acquired = Arc::new(AtomicUsize::new(0));

        thread::scope(|scope| {
            let (worker_pool, worker_acquired) = (pool.clone(), acquired.clone());
            scope.spawn(move || {
                let _slot = worker_pool.acquire();
                worker_acquired.fetch_add(1, Ordering::SeqCst);
            });
            thread::sleep(Duration::from_millis(50));
            assert_eq!(acquired.load(Ordering::SeqCst), 0);
            drop(held);
        });
        assert_eq!(acquired.load(Ordering::SeqCst), 1);
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    fn backoff_is_linear() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
        };
        assert_eq!(policy.delay(1), Duration::from_millis(100));
        assert_eq!(policy.delay(2), Duration::from_millis(200));

        let huge = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(u64::MAX),
        };
        assert_eq!(huge.delay(3), Duration::MAX);
    }

    #[test]
    fn empty_job_list_is_trivially_successful() {
        struct Unused;
        impl RegionFetcher for Unused {
            fn fetch(&self, _request: &FetchRequest<'_>) -> Result<(), TabixError> {
                unreachable!()
            }
        }
        let pool = SlotPool::new(2).unwrap();
        let executor =
            FetchExecutor::new(&Unused, Transport::Ftp, RetryPolicy::default(), &NoProgress);
        let report = executor.execute(Vec::new(), &pool);
        assert!(report.is_success());
        assert!(report.ordered_outputs().is_empty());
    }
}
