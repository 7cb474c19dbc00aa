//! Region-list ingestion and interval normalization.
//!
//! Input files are BED-like: tab-delimited `chrom start end [...]`, 0-based
//! half-open. Every record from every source is validated before any merging
//! happens, so a single bad line fails the whole run.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use flate2::read::MultiGzDecoder;
use tracing::debug;

use crate::domain::{Chromosome, GenomicInterval};
use crate::error::TabixError;

/// One unvalidated line of a region list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRegion {
    pub line: usize,
    pub chromosome: String,
    pub start: i64,
    pub end: i64,
}

/// All records read from one input, in file order.
#[derive(Debug, Clone)]
pub struct RegionSource {
    pub name: String,
    pub records: Vec<RawRegion>,
}

impl RegionSource {
    pub fn new(name: impl Into<String>, records: Vec<RawRegion>) -> Self {
        Self {
            name: name.into(),
            records,
        }
    }

    pub fn read(path: &Path) -> Result<Self, TabixError> {
        let file = File::open(path)
            .map_err(|err| TabixError::RegionsRead(path.to_path_buf(), err.to_string()))?;
        let name = path.display().to_string();
        let is_gzip = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("gz"))
            .unwrap_or(false);
        if is_gzip {
            Self::parse(name, BufReader::new(MultiGzDecoder::new(file)))
        } else {
            Self::parse(name, BufReader::new(file))
        }
    }

    pub fn parse<R: BufRead>(name: impl Into<String>, reader: R) -> Result<Self, TabixError> {
        let name = name.into();
        let mut records = Vec::new();
        for (idx, line) in reader.lines().enumerate() {
            let line_no = idx + 1;
            let line = line.map_err(|err| TabixError::RegionsRead(name.clone().into(), err.to_string()))?;
            let trimmed = line.trim_end_matches(['\r', '\n']);
            if should_skip_line(trimmed) {
                continue;
            }
            let mut fields = trimmed.split('\t');
            let (Some(chromosome), Some(start), Some(end)) =
                (fields.next(), fields.next(), fields.next())
            else {
                return Err(invalid(&name, line_no, "expected at least 3 tab-separated columns"));
            };
            let start = parse_coordinate(&name, line_no, "start", start)?;
            let end = parse_coordinate(&name, line_no, "end", end)?;
            records.push(RawRegion {
                line: line_no,
                chromosome: chromosome.trim().to_string(),
                start,
                end,
            });
        }
        debug!(source = %name, records = records.len(), "read region list");
        Ok(Self { name, records })
    }
}

fn should_skip_line(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.is_empty()
        || trimmed.starts_with('#')
        || trimmed.starts_with("track")
        || trimmed.starts_with("browser")
}

fn parse_coordinate(name: &str, line: usize, field: &str, value: &str) -> Result<i64, TabixError> {
    value
        .trim()
        .parse::<i64>()
        .map_err(|_| invalid(name, line, &format!("{field} is not an integer: {value:?}")))
}

fn invalid(name: &str, line: usize, reason: &str) -> TabixError {
    TabixError::InvalidRegion {
        source_name: name.to_string(),
        line,
        reason: reason.to_string(),
    }
}

/// Sorted, pairwise disjoint and non-adjacent intervals of one chromosome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedIntervalSet {
    chromosome: Chromosome,
    intervals: Vec<GenomicInterval>,
}

impl MergedIntervalSet {
    /// Builds the canonical set by sorting and sweeping. Zero-length spans
    /// select nothing and are dropped. Intervals from other chromosomes are a
    /// caller bug and are ignored.
    pub fn from_intervals(
        chromosome: Chromosome,
        intervals: impl IntoIterator<Item = GenomicInterval>,
    ) -> Self {
        let mut spans = intervals
            .into_iter()
            .filter(|interval| interval.chromosome == chromosome && !interval.is_empty())
            .map(|interval| (interval.start, interval.end))
            .collect::<Vec<_>>();
        spans.sort_unstable();

        let mut merged: Vec<GenomicInterval> = Vec::with_capacity(spans.len());
        for (start, end) in spans {
            match merged.last_mut() {
                Some(current) if start <= current.end => {
                    current.end = current.end.max(end);
                }
                _ => merged.push(GenomicInterval {
                    chromosome: chromosome.clone(),
                    start,
                    end,
                }),
            }
        }

        Self {
            chromosome,
            intervals: merged,
        }
    }

    pub fn chromosome(&self) -> &Chromosome {
        &self.chromosome
    }

    pub fn intervals(&self) -> &[GenomicInterval] {
        &self.intervals
    }

    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    /// Total bases covered.
    pub fn span(&self) -> u64 {
        self.intervals.iter().map(GenomicInterval::len).sum()
    }

    /// Tab-delimited BED text, one interval per line.
    pub fn to_bed(&self) -> String {
        self.intervals
            .iter()
            .map(|interval| format!("{}\t{}\t{}\n", interval.chromosome, interval.start, interval.end))
            .collect()
    }
}

/// Validates every record of every source against `known` contigs and merges
/// them into one canonical set per chromosome. Chromosomes whose records are
/// all zero-length do not appear in the result.
pub fn merge_sources(
    sources: &[RegionSource],
    known: &BTreeSet<Chromosome>,
) -> Result<BTreeMap<Chromosome, MergedIntervalSet>, TabixError> {
    let mut grouped: BTreeMap<Chromosome, Vec<GenomicInterval>> = BTreeMap::new();
    for source in sources {
        for record in &source.records {
            let interval = validate(&source.name, record, known)?;
            grouped
                .entry(interval.chromosome.clone())
                .or_default()
                .push(interval);
        }
    }

    Ok(grouped
        .into_iter()
        .filter_map(|(chromosome, intervals)| {
            let set = MergedIntervalSet::from_intervals(chromosome.clone(), intervals);
            if set.is_empty() {
                debug!(chromosome = %chromosome, "only zero-length regions, skipping");
                return None;
            }
            debug!(chromosome = %chromosome, intervals = set.len(), "merged regions");
            Some((chromosome, set))
        })
        .collect())
}

fn validate(
    name: &str,
    record: &RawRegion,
    known: &BTreeSet<Chromosome>,
) -> Result<GenomicInterval, TabixError> {
    if record.start < 0 || record.end < 0 {
        return Err(invalid(name, record.line, "negative coordinate"));
    }
    if record.start > record.end {
        return Err(invalid(
            name,
            record.line,
            &format!("start {} is greater than end {}", record.start, record.end),
        ));
    }
    let chromosome: Chromosome = record
        .chromosome
        .parse()
        .map_err(|_| invalid(name, record.line, &format!("malformed chromosome {:?}", record.chromosome)))?;
    if !known.contains(&chromosome) {
        return Err(invalid(
            name,
            record.line,
            &format!("unknown chromosome {:?}", record.chromosome),
        ));
    }
    Ok(GenomicInterval {
        chromosome,
        start: record.start as u64,
        end: record.end as u64,
    })
}
