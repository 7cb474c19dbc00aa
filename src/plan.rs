use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::domain::Chromosome;
use crate::error::TabixError;
use crate::regions::MergedIntervalSet;

/// Lifecycle of a fetch job.
///
/// `Pending -> Running -> {Succeeded | Retrying -> Running | Failed}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Retrying,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Retrying => "retrying",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// One chromosome's worth of work. `sequence` is fixed at planning time and is
/// the only key used to order outputs.
#[derive(Debug, Clone)]
pub struct FetchJob {
    pub sequence: u32,
    pub intervals: MergedIntervalSet,
    pub output_path: PathBuf,
    status: JobStatus,
    attempts: u32,
    last_error: Option<String>,
}

impl FetchJob {
    pub fn new(sequence: u32, intervals: MergedIntervalSet, output_path: PathBuf) -> Self {
        Self {
            sequence,
            intervals,
            output_path,
            status: JobStatus::Pending,
            attempts: 0,
            last_error: None,
        }
    }

    pub fn chromosome(&self) -> &Chromosome {
        self.intervals.chromosome()
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// `Pending | Retrying -> Running`, counting the attempt.
    pub fn begin_attempt(&mut self) {
        debug_assert!(matches!(self.status, JobStatus::Pending | JobStatus::Retrying));
        self.status = JobStatus::Running;
        self.attempts += 1;
    }

    pub fn succeed(&mut self) {
        self.status = JobStatus::Succeeded;
        self.last_error = None;
    }

    /// Moves a running job to `Retrying` when the error is transient and the
    /// attempt budget allows it, otherwise to `Failed`. A transient error that
    /// used up the budget becomes `RetriesExhausted`; the returned error is the
    /// one recorded on the job.
    pub fn fail(&mut self, error: TabixError, max_attempts: u32) -> (JobStatus, TabixError) {
        let (status, error) = if !error.is_transient() {
            (JobStatus::Failed, error)
        } else if self.attempts < max_attempts {
            (JobStatus::Retrying, error)
        } else {
            let exhausted = TabixError::RetriesExhausted {
                chromosome: self.chromosome().to_string(),
                attempts: self.attempts,
                message: error.to_string(),
            };
            (JobStatus::Failed, exhausted)
        };
        self.status = status;
        self.last_error = Some(error.to_string());
        (status, error)
    }
}

/// One job per non-empty chromosome, numbered in genome order starting at 1.
/// Each job writes to its own file under `work_dir`.
pub fn plan_jobs(
    sets: BTreeMap<Chromosome, MergedIntervalSet>,
    work_dir: &Path,
) -> Vec<FetchJob> {
    let mut sets = sets
        .into_values()
        .filter(|set| !set.is_empty())
        .collect::<Vec<_>>();
    sets.sort_by(|a, b| a.chromosome().cmp(b.chromosome()));

    sets.into_iter()
        .enumerate()
        .map(|(idx, set)| {
            let sequence = idx as u32 + 1;
            let output_path = work_dir.join(format!("{sequence:03}.chr{}.vcf.gz", set.chromosome()));
            FetchJob::new(sequence, set, output_path)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::domain::GenomicInterval;

    fn set(name: &str) -> MergedIntervalSet {
        let chromosome: Chromosome = name.parse().unwrap();
        let interval = GenomicInterval::new(chromosome.clone(), 10, 20).unwrap();
        MergedIntervalSet::from_intervals(chromosome, [interval])
    }

    #[test]
    fn sequences_follow_genome_order() {
        let sets = ["Y", "10", "2", "MT", "X", "1"]
            .into_iter()
            .map(|name| (name.parse().unwrap(), set(name)))
            .collect::<BTreeMap<_, _>>();
        let jobs = plan_jobs(sets, Path::new("/tmp/work"));
        let order = jobs
            .iter()
            .map(|job| (job.sequence, job.chromosome().as_str().to_string()))
            .collect::<Vec<_>>();
        assert_eq!(
            order,
            vec![
                (1, "1".to_string()),
                (2, "2".to_string()),
                (3, "10".to_string()),
                (4, "X".to_string()),
                (5, "Y".to_string()),
                (6, "MT".to_string()),
            ]
        );
        assert_eq!(jobs[2].output_path, Path::new("/tmp/work/003.chr10.vcf.gz"));
        assert!(jobs.iter().all(|job| job.status() == JobStatus::Pending));
    }

    #[test]
    fn empty_sets_get_no_job() {
        let chromosome: Chromosome = "3".parse().unwrap();
        let mut sets = BTreeMap::new();
        sets.insert(
            chromosome.clone(),
            MergedIntervalSet::from_intervals(chromosome, Vec::new()),
        );
        sets.insert("4".parse().unwrap(), set("4"));
        let jobs = plan_jobs(sets, Path::new("/tmp"));
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].sequence, 1);
    }

    #[test]
    fn transient_errors_retry_until_budget() {
        let mut job = FetchJob::new(1, set("1"), PathBuf::from("/tmp/a"));
        let error = TabixError::TransientFetch {
            chromosome: "1".to_string(),
            message: "timed out".to_string(),
        };
        job.begin_attempt();
        let (status, returned) = job.fail(error, 2);
        assert_eq!(status, JobStatus::Retrying);
        assert_matches!(returned, TabixError::TransientFetch { .. });

        job.begin_attempt();
        let error = TabixError::TransientFetch {
            chromosome: "1".to_string(),
            message: "timed out".to_string(),
        };
        let (status, returned) = job.fail(error, 2);
        assert_eq!(status, JobStatus::Failed);
        assert_matches!(returned, TabixError::RetriesExhausted { attempts: 2, .. });
        assert_eq!(job.attempts(), 2);
        assert_eq!(job.last_error(), Some(returned.to_string().as_str()));
        assert!(job.last_error().is_some_and(|err| err.contains("gave up after 2 attempts")));
    }

    #[test]
    fn fatal_errors_fail_immediately() {
        let mut job = FetchJob::new(1, set("1"), PathBuf::from("/tmp/a"));
        job.begin_attempt();
        let error = TabixError::FatalFetch {
            chromosome: "1".to_string(),
            message: "permission denied".to_string(),
        };
        let (status, returned) = job.fail(error, 3);
        assert_eq!(status, JobStatus::Failed);
        assert_matches!(returned, TabixError::FatalFetch { .. });
        assert!(job.status().is_terminal());
        assert_eq!(job.attempts(), 1);
    }
}
