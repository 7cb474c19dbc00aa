use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::domain::{Chromosome, Transport};

const DEFAULT_FTP_BASE: &str = "ftp://ftp.1000genomes.ebi.ac.uk/vol1/ftp";
const DEFAULT_HTTP_BASE: &str = "http://ftp.1000genomes.ebi.ac.uk/vol1/ftp";
const RELEASE_DIR: &str = "release/20130502";

/// Where the per-chromosome indexed VCFs live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteArchive {
    #[serde(default = "default_ftp_base")]
    pub ftp_base: String,
    #[serde(default = "default_http_base")]
    pub http_base: String,
}

impl Default for RemoteArchive {
    fn default() -> Self {
        Self {
            ftp_base: default_ftp_base(),
            http_base: default_http_base(),
        }
    }
}

impl RemoteArchive {
    /// Chromosomes the archive holds a file for.
    pub fn contigs(&self) -> BTreeSet<Chromosome> {
        (1..=22)
            .map(|n| n.to_string())
            .chain(["X", "Y", "MT"].map(String::from))
            .filter_map(|name| name.parse().ok())
            .collect()
    }

    pub fn vcf_url(&self, chromosome: &Chromosome, transport: Transport) -> String {
        let base = match transport {
            Transport::Ftp => &self.ftp_base,
            Transport::Http => &self.http_base,
        };
        format!(
            "{}/{RELEASE_DIR}/{}",
            base.trim_end_matches('/'),
            vcf_file_name(chromosome)
        )
    }

    pub fn index_url(&self, chromosome: &Chromosome, transport: Transport) -> String {
        format!("{}.tbi", self.vcf_url(chromosome, transport))
    }
}

// The phase 3 release used different pipelines for the sex chromosomes and
// the mitochondrion, and the file names carry the pipeline version.
fn vcf_file_name(chromosome: &Chromosome) -> String {
    match chromosome.as_str() {
        "X" => "ALL.chrX.phase3_shapeit2_mvncall_integrated_v1b.20130502.genotypes.vcf.gz".to_string(),
        "Y" => "ALL.chrY.phase3_integrated_v2a.20130502.genotypes.vcf.gz".to_string(),
        "MT" => "ALL.chrMT.phase3_callmom-v0_4.20130502.genotypes.vcf.gz".to_string(),
        other => format!(
            "ALL.chr{other}.phase3_shapeit2_mvncall_integrated_v5a.20130502.genotypes.vcf.gz"
        ),
    }
}

fn default_ftp_base() -> String {
    DEFAULT_FTP_BASE.to_string()
}

fn default_http_base() -> String {
    DEFAULT_HTTP_BASE.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contig_set_covers_release() {
        let contigs = RemoteArchive::default().contigs();
        assert_eq!(contigs.len(), 25);
        assert!(contigs.contains(&"chrMT".parse().unwrap()));
        assert!(!contigs.contains(&"23".parse().unwrap()));
    }

    #[test]
    fn urls_follow_transport() {
        let archive = RemoteArchive::default();
        let chr7: Chromosome = "chr7".parse().unwrap();
        assert_eq!(
            archive.vcf_url(&chr7, Transport::Ftp),
            "ftp://ftp.1000genomes.ebi.ac.uk/vol1/ftp/release/20130502/ALL.chr7.phase3_shapeit2_mvncall_integrated_v5a.20130502.genotypes.vcf.gz"
        );
        let x: Chromosome = "X".parse().unwrap();
        let url = archive.index_url(&x, Transport::Http);
        assert!(url.starts_with("http://"));
        assert!(url.ends_with("integrated_v1b.20130502.genotypes.vcf.gz.tbi"));
    }
}
