//! Order-preserving assembly of per-chromosome outputs into the final file.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::TabixError;
use crate::executor::ExecutionReport;
use crate::plan::JobStatus;
use crate::tools::{render_command, run_cmd};

/// The file-merge capability: concatenate VCFs in the given order.
pub trait FileMerger: Send + Sync {
    fn merge(&self, inputs: &[PathBuf], output: &Path, compressed: bool) -> Result<(), TabixError>;
}

pub struct BcftoolsMerger {
    bcftools: PathBuf,
}

impl BcftoolsMerger {
    pub fn new(bcftools: PathBuf) -> Self {
        Self { bcftools }
    }

    fn args(inputs: &[PathBuf], output: &Path, compressed: bool) -> Vec<String> {
        let mut args = vec![
            "concat".to_string(),
            "--output-type".to_string(),
            if compressed { "z" } else { "v" }.to_string(),
            "--output".to_string(),
            output.to_string_lossy().to_string(),
        ];
        args.extend(inputs.iter().map(|path| path.to_string_lossy().to_string()));
        args
    }

    pub fn describe(&self, inputs: &[PathBuf], output: &Path, compressed: bool) -> String {
        render_command(&self.bcftools, &Self::args(inputs, output, compressed))
    }
}

impl FileMerger for BcftoolsMerger {
    fn merge(&self, inputs: &[PathBuf], output: &Path, compressed: bool) -> Result<(), TabixError> {
        run_cmd(&self.bcftools, &Self::args(inputs, output, compressed)).map_err(TabixError::Merge)
    }
}

/// Acts once the fetch phase has settled: merges on success, reports on
/// failure, and removes intermediate files either way.
pub struct ResultMerger<'a> {
    merger: &'a dyn FileMerger,
    keep_intermediates: bool,
}

impl<'a> ResultMerger<'a> {
    pub fn new(merger: &'a dyn FileMerger, keep_intermediates: bool) -> Self {
        Self {
            merger,
            keep_intermediates,
        }
    }

    pub fn assemble(
        &self,
        report: &ExecutionReport,
        output: &Path,
        compressed: bool,
    ) -> Result<(), TabixError> {
        let result = if report.is_success() {
            self.write_final(&report.ordered_outputs(), output, compressed)
        } else {
            let failures = report.failures();
            for failure in &failures {
                warn!(
                    sequence = failure.sequence,
                    chromosome = %failure.chromosome,
                    kind = %failure.kind,
                    "job failed: {}",
                    failure.error
                );
            }
            Err(TabixError::FetchFailed { failures })
        };
        self.cleanup(report);
        result
    }

    fn write_final(
        &self,
        inputs: &[PathBuf],
        output: &Path,
        compressed: bool,
    ) -> Result<(), TabixError> {
        let parent = match output.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent).map_err(|err| TabixError::Filesystem(err.to_string()))?;
        let temp = tempfile::Builder::new()
            .prefix(".bed-to-tabix-")
            .suffix(if compressed { ".vcf.gz" } else { ".vcf" })
            .tempfile_in(parent)
            .map_err(|err| TabixError::Filesystem(err.to_string()))?;

        info!(inputs = inputs.len(), output = %output.display(), "merging chromosome outputs");
        self.merger.merge(inputs, temp.path(), compressed)?;
        temp.persist(output)
            .map_err(|err| TabixError::Filesystem(err.to_string()))?;
        Ok(())
    }

    /// Removal problems are logged and never change the run's result.
    fn cleanup(&self, report: &ExecutionReport) {
        if self.keep_intermediates {
            info!("keeping intermediate files");
            return;
        }
        for job in &report.jobs {
            let path = &job.output_path;
            if job.status() != JobStatus::Succeeded && !path.exists() {
                continue;
            }
            match fs::remove_file(path) {
                Ok(()) => debug!(path = %path.display(), "removed intermediate file"),
                Err(err) => warn!(path = %path.display(), "failed to remove intermediate file: {err}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bcftools_arguments_keep_input_order() {
        let merger = BcftoolsMerger::new(PathBuf::from("bcftools"));
        let inputs = vec![PathBuf::from("w/001.chr1.vcf.gz"), PathBuf::from("w/002.chr2.vcf.gz")];
        assert_eq!(
            merger.describe(&inputs, Path::new("out.vcf.gz"), true),
            "bcftools concat --output-type z --output out.vcf.gz w/001.chr1.vcf.gz w/002.chr2.vcf.gz"
        );
        assert!(
            merger
                .describe(&inputs, Path::new("out.vcf"), false)
                .contains("--output-type v")
        );
    }
}
