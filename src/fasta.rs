use std::collections::HashSet;
use std::fs::File;
use std::io;

use bio::io::fasta;
use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use serde::Serialize;

use crate::domain::SequenceRecord;
use crate::error::BoldError;

/// Longest header the identification service accepts.
pub const MAX_ID_LEN: usize = 99;

/// Anything outside the IUPAC codes the service accepts.
const INVALID_RESIDUES: &str = "[^ACGTMRWSYKVHDBXN]";

pub fn read_fasta(path: &Utf8Path) -> Result<Vec<SequenceRecord>, BoldError> {
    let file = File::open(path.as_std_path())
        .map_err(|err| BoldError::InvalidFasta(format!("{path}: {err}")))?;
    read_records(fasta::Reader::new(file))
}

/// Multi-line FASTA. The id is the header up to the first whitespace.
pub fn parse_fasta(content: &str) -> Result<Vec<SequenceRecord>, BoldError> {
    read_records(fasta::Reader::new(content.as_bytes()))
}

fn read_records<B: io::BufRead>(reader: fasta::Reader<B>) -> Result<Vec<SequenceRecord>, BoldError> {
    let mut records = Vec::new();
    let mut seen = HashSet::new();
    for (index, record) in reader.records().enumerate() {
        let record = record
            .map_err(|err| BoldError::InvalidFasta(format!("record {}: {err}", index + 1)))?;
        let id = record.id();
        if id.is_empty() {
            return Err(BoldError::InvalidFasta(format!(
                "record {} has an empty header",
                index + 1
            )));
        }
        if !seen.insert(id.to_string()) {
            return Err(BoldError::InvalidFasta(format!("duplicate id {id}")));
        }
        let sequence = std::str::from_utf8(record.seq())
            .map_err(|err| BoldError::InvalidFasta(format!("{id}: {err}")))?;
        records.push(SequenceRecord::new(id, sequence));
    }
    Ok(records)
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckReport {
    pub records: usize,
    pub trimmed_ids: usize,
    /// Trimmed ids that collided with another id and got a numeric suffix.
    pub renamed_ids: usize,
    pub repaired_sequences: usize,
    #[serde(skip)]
    pub normalized: Vec<SequenceRecord>,
}

impl CheckReport {
    pub fn is_clean(&self) -> bool {
        self.trimmed_ids == 0 && self.repaired_sequences == 0
    }
}

/// Trims long ids and replaces residues the service rejects with `N`. Ids
/// stay unique: a trimmed id that collides gets `_1`, `_2`, ... within the
/// length limit.
pub fn check_records(records: &[SequenceRecord]) -> Result<CheckReport, BoldError> {
    let invalid = Regex::new(INVALID_RESIDUES)
        .map_err(|err| BoldError::InvalidConfiguration(err.to_string()))?;

    let mut taken: HashSet<String> = records
        .iter()
        .filter(|record| record.id.chars().count() < MAX_ID_LEN)
        .map(|record| record.id.clone())
        .collect();
    let mut trimmed_ids = 0;
    let mut renamed_ids = 0;
    let mut repaired_sequences = 0;
    let mut normalized = Vec::with_capacity(records.len());

    for record in records {
        let id = if record.id.chars().count() >= MAX_ID_LEN {
            trimmed_ids += 1;
            let (id, renamed) = unique_trimmed_id(&record.id, &taken);
            if renamed {
                renamed_ids += 1;
            }
            taken.insert(id.clone());
            id
        } else {
            record.id.clone()
        };
        let upper = record.sequence.to_ascii_uppercase();
        let sequence = if invalid.is_match(&upper) {
            repaired_sequences += 1;
            invalid.replace_all(&upper, "N").into_owned()
        } else {
            upper
        };
        normalized.push(SequenceRecord::new(id, sequence));
    }

    Ok(CheckReport {
        records: records.len(),
        trimmed_ids,
        renamed_ids,
        repaired_sequences,
        normalized,
    })
}

fn unique_trimmed_id(id: &str, taken: &HashSet<String>) -> (String, bool) {
    let trimmed: String = id.chars().take(MAX_ID_LEN).collect();
    if !taken.contains(&trimmed) {
        return (trimmed, false);
    }
    let mut counter = 1usize;
    loop {
        let suffix = format!("_{counter}");
        let mut candidate: String = id.chars().take(MAX_ID_LEN - suffix.len()).collect();
        candidate.push_str(&suffix);
        if !taken.contains(&candidate) {
            return (candidate, true);
        }
        counter += 1;
    }
}

/// Two-line FASTA, written atomically.
pub fn write_fasta(path: &Utf8Path, records: &[SequenceRecord]) -> Result<(), BoldError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent,
        _ => Utf8Path::new("."),
    };
    let mut temp = tempfile::Builder::new()
        .prefix(".bold-digger-fasta")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| BoldError::Filesystem(err.to_string()))?;
    {
        let mut writer = fasta::Writer::new(temp.as_file_mut());
        for record in records {
            writer
                .write(&record.id, None, record.sequence.as_bytes())
                .map_err(|err| BoldError::Filesystem(err.to_string()))?;
        }
        writer
            .flush()
            .map_err(|err| BoldError::Filesystem(err.to_string()))?;
    }
    temp.as_file()
        .sync_all()
        .map_err(|err| BoldError::Filesystem(err.to_string()))?;
    temp.persist(path.as_std_path())
        .map_err(|err| BoldError::Filesystem(err.to_string()))?;
    Ok(())
}

/// `reads.fasta` becomes `reads_with_modifications.fasta` next to it.
pub fn modified_path(path: &Utf8Path) -> Utf8PathBuf {
    let stem = path.file_stem().unwrap_or("input");
    let name = match path.extension() {
        Some(ext) => format!("{stem}_with_modifications.{ext}"),
        None => format!("{stem}_with_modifications"),
    };
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn parses_multiline_records() {
        let records = parse_fasta(">otu1 size=12\nACGT\nacgt\n\n>otu2\nTTTT\n").unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, "otu1");
        assert_eq!(records[0].sequence, "ACGTacgt");
        assert_eq!(records[1].sequence, "TTTT");
    }

    #[test]
    fn rejects_duplicates_and_orphans() {
        assert_matches!(
            parse_fasta(">a\nAC\n>a\nGT\n"),
            Err(BoldError::InvalidFasta(_))
        );
        assert_matches!(parse_fasta("ACGT\n>a\nAC\n"), Err(BoldError::InvalidFasta(_)));
        assert_matches!(parse_fasta(">\nAC\n"), Err(BoldError::InvalidFasta(_)));
    }

    #[test]
    fn check_trims_and_repairs() {
        let long_id = "x".repeat(120);
        let records = vec![
            SequenceRecord::new(long_id, "ACGT"),
            SequenceRecord::new("ok", "acg-t?"),
            SequenceRecord::new("clean", "ACGTN"),
        ];
        let report = check_records(&records).unwrap();
        assert_eq!(report.trimmed_ids, 1);
        assert_eq!(report.repaired_sequences, 1);
        assert_eq!(report.normalized[0].id.len(), MAX_ID_LEN);
        assert_eq!(report.normalized[1].sequence, "ACGNTN");
        assert_eq!(report.normalized[2].sequence, "ACGTN");
        assert!(!report.is_clean());
    }

    #[test]
    fn trimmed_ids_stay_unique() {
        let shared = "a".repeat(110);
        let records = vec![
            SequenceRecord::new(format!("{shared}1"), "ACGT"),
            SequenceRecord::new(format!("{shared}2"), "ACGT"),
            SequenceRecord::new("short", "ACGT"),
        ];
        let report = check_records(&records).unwrap();
        assert_eq!(report.trimmed_ids, 2);
        assert_eq!(report.renamed_ids, 1);

        let ids: Vec<&str> = report.normalized.iter().map(|r| r.id.as_str()).collect();
        assert_ne!(ids[0], ids[1]);
        assert!(ids.iter().all(|id| id.chars().count() <= MAX_ID_LEN));
        assert!(ids[1].ends_with("_1"));
        assert_eq!(ids[2], "short");
    }

    #[test]
    fn written_copy_reads_back() {
        let temp = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(temp.path().join("reads.fasta")).unwrap();
        let shared = "b".repeat(120);
        let records = vec![
            SequenceRecord::new(format!("{shared}x"), "acgu"),
            SequenceRecord::new(format!("{shared}y"), "ACGT"),
        ];
        let report = check_records(&records).unwrap();
        let out = modified_path(&path);
        write_fasta(&out, &report.normalized).unwrap();

        let content = std::fs::read_to_string(out.as_std_path()).unwrap();
        assert_eq!(content.lines().count(), 4);
        let reread = read_fasta(&out).unwrap();
        assert_eq!(reread, report.normalized);
        assert_eq!(reread[0].sequence, "ACGN");
    }

    #[test]
    fn modified_path_keeps_extension() {
        assert_eq!(
            modified_path(Utf8Path::new("data/reads.fasta")),
            Utf8PathBuf::from("data/reads_with_modifications.fasta")
        );
    }
}
