use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::TabixError;

/// Canonical chromosome name: no `chr` prefix, `MT` for the mitochondrion.
///
/// Ordering is genome order: numbered chromosomes ascending, then X, Y, MT,
/// then anything else lexicographically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Chromosome(String);

impl Chromosome {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn sort_key(&self) -> (u8, u32, &str) {
        match self.0.as_str() {
            "X" => (1, 0, ""),
            "Y" => (2, 0, ""),
            "MT" => (3, 0, ""),
            other => match other.parse::<u32>() {
                Ok(number) => (0, number, ""),
                Err(_) => (4, 0, other),
            },
        }
    }
}

impl Ord for Chromosome {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

impl PartialOrd for Chromosome {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Chromosome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Chromosome {
    type Err = TabixError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let stripped = match trimmed.get(..3) {
            Some(prefix) if prefix.eq_ignore_ascii_case("chr") => &trimmed[3..],
            _ => trimmed,
        };
        if stripped.is_empty()
            || !stripped
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '_' | '.' | '-'))
        {
            return Err(TabixError::InvalidChromosome(value.to_string()));
        }

        let normalized = match stripped.to_ascii_uppercase().as_str() {
            "X" | "Y" | "MT" => stripped.to_ascii_uppercase(),
            "M" => "MT".to_string(),
            _ => match stripped.parse::<u32>() {
                Ok(number) => number.to_string(),
                Err(_) => stripped.to_string(),
            },
        };
        Ok(Self(normalized))
    }
}

impl TryFrom<String> for Chromosome {
    type Error = TabixError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Chromosome> for String {
    fn from(value: Chromosome) -> Self {
        value.0
    }
}

/// A 0-based half-open span on one chromosome. `start <= end` always holds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GenomicInterval {
    pub chromosome: Chromosome,
    pub start: u64,
    pub end: u64,
}

impl GenomicInterval {
    pub fn new(chromosome: Chromosome, start: u64, end: u64) -> Option<Self> {
        (start <= end).then_some(Self {
            chromosome,
            start,
            end,
        })
    }

    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

impl fmt::Display for GenomicInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}-{}", self.chromosome, self.start, self.end)
    }
}

/// Remote access protocol handed to the fetch capability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// Plain FTP, the archive's primary protocol.
    #[default]
    Ftp,
    /// HTTP mirror of the same tree, for networks where FTP is blocked.
    Http,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Ftp => write!(f, "ftp"),
            Transport::Http => write!(f, "http"),
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn chrom(value: &str) -> Chromosome {
        value.parse().unwrap()
    }

    #[test]
    fn normalizes_chromosome_names() {
        assert_eq!(chrom("chr1").as_str(), "1");
        assert_eq!(chrom("CHRx").as_str(), "X");
        assert_eq!(chrom("chrM").as_str(), "MT");
        assert_eq!(chrom("mt").as_str(), "MT");
        assert_eq!(chrom("07").as_str(), "7");
        assert_eq!(chrom("GL000192.1").as_str(), "GL000192.1");
    }

    #[test]
    fn rejects_malformed_names() {
        assert_matches!("".parse::<Chromosome>(), Err(TabixError::InvalidChromosome(_)));
        assert_matches!("chr".parse::<Chromosome>(), Err(TabixError::InvalidChromosome(_)));
        assert_matches!(
            "chr 1".parse::<Chromosome>(),
            Err(TabixError::InvalidChromosome(_))
        );
    }

    #[test]
    fn genome_order() {
        let mut names = ["MT", "Y", "10", "X", "2", "GL000192.1", "1", "22", "HLA-A"]
            .into_iter()
            .map(chrom)
            .collect::<Vec<_>>();
        names.sort();
        let sorted = names.iter().map(Chromosome::as_str).collect::<Vec<_>>();
        assert_eq!(
            sorted,
            vec!["1", "2", "10", "22", "X", "Y", "MT", "GL000192.1", "HLA-A"]
        );
    }

    #[test]
    fn interval_requires_ordered_bounds() {
        assert!(GenomicInterval::new(chrom("1"), 200, 100).is_none());
        let empty = GenomicInterval::new(chrom("1"), 5, 5).unwrap();
        assert!(empty.is_empty());
        assert_eq!(empty.len(), 0);
    }
}
