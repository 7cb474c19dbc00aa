use std::fs::File;
use std::io::Write;

use assert_matches::assert_matches;
use flate2::Compression;
use flate2::write::GzEncoder;

use bed_to_tabix::archive::RemoteArchive;
use bed_to_tabix::error::TabixError;
use bed_to_tabix::regions::{RegionSource, merge_sources};

#[test]
fn reads_plain_and_gzipped_bed_files() {
    let temp = tempfile::tempdir().unwrap();
    let plain = temp.path().join("genes.bed");
    std::fs::write(&plain, "chr1\t1000\t2000\tBRCA\nchr1\t1500\t2500\n").unwrap();

    let gzipped = temp.path().join("snps.bed.gz");
    let mut encoder = GzEncoder::new(File::create(&gzipped).unwrap(), Compression::default());
    encoder
        .write_all(b"#chrom\tstart\tend\nchr1\t2500\t2600\nchrX\t10\t11\n")
        .unwrap();
    encoder.finish().unwrap();

    let sources = [
        RegionSource::read(&plain).unwrap(),
        RegionSource::read(&gzipped).unwrap(),
    ];
    assert_eq!(sources[1].records.len(), 2);

    let merged = merge_sources(&sources, &RemoteArchive::default().contigs()).unwrap();
    let chr1 = &merged[&"1".parse().unwrap()];
    assert_eq!(chr1.len(), 1);
    assert_eq!(chr1.intervals()[0].start, 1000);
    assert_eq!(chr1.intervals()[0].end, 2600);
    assert_eq!(merged[&"X".parse().unwrap()].span(), 1);
}

#[test]
fn missing_file_is_a_read_error() {
    let temp = tempfile::tempdir().unwrap();
    let err = RegionSource::read(&temp.path().join("nope.bed")).unwrap_err();
    assert_matches!(err, TabixError::RegionsRead(..));
}

#[test]
fn unknown_chromosome_names_the_record() {
    let source = RegionSource::parse("panel.bed", "chr1\t1\t2\nchrUn_gl000220\t5\t9\n".as_bytes())
        .unwrap();
    let err = merge_sources(&[source], &RemoteArchive::default().contigs()).unwrap_err();
    assert_matches!(
        err,
        TabixError::InvalidRegion { ref source_name, line: 2, ref reason }
            if source_name == "panel.bed" && reason.contains("chrUn_gl000220")
    );
}
