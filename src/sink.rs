use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::checkpoint::SinkMark;
use crate::consensus::ConsensusCall;
use crate::domain::{CandidateHit, RankLevel, RecordHits, RecordStatus, SpecimenRecord, Taxonomy};
use crate::error::BoldError;

/// Everything one batch produced, handed to the sink in a single commit.
#[derive(Debug, Clone)]
pub struct BatchOutput {
    pub batch_index: usize,
    pub offset: usize,
    pub records: Vec<RecordHits>,
    pub calls: Vec<ConsensusCall>,
}

pub trait ResultSink {
    /// Appends the batch and returns the position after it.
    fn commit(&mut self, output: &BatchOutput) -> Result<SinkMark, BoldError>;

    /// Drops everything written after `mark`.
    fn rewind(&mut self, mark: SinkMark) -> Result<(), BoldError>;
}

/// One line of the hit table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HitRow {
    pub id: String,
    pub rank: u32,
    #[serde(flatten)]
    pub taxonomy: Taxonomy,
    pub similarity: Option<f64>,
    pub status: Option<RecordStatus>,
    pub process_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub specimen: Option<SpecimenRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub specimen_url: Option<String>,
    #[serde(default)]
    pub fetch_failed: bool,
}

impl HitRow {
    pub fn new(id: &str, hit: &CandidateHit, fetch_failed: bool) -> Self {
        Self {
            id: id.to_string(),
            rank: hit.rank,
            taxonomy: hit.taxonomy.clone(),
            similarity: hit.similarity,
            status: hit.status.clone(),
            process_id: hit.process_id.clone(),
            score: hit.score,
            e_value: hit.e_value.clone(),
            specimen: hit.specimen.clone(),
            specimen_url: hit.specimen.as_ref().and_then(SpecimenRecord::specimen_url),
            fetch_failed,
        }
    }

    pub fn into_hit(self) -> CandidateHit {
        CandidateHit {
            rank: self.rank,
            taxonomy: self.taxonomy,
            similarity: self.similarity,
            status: self.status,
            process_id: self.process_id,
            score: self.score,
            e_value: self.e_value,
            specimen: self.specimen,
        }
    }
}

/// One line of the call table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRow {
    pub id: String,
    #[serde(flatten)]
    pub taxonomy: Taxonomy,
    pub similarity: Option<f64>,
    pub threshold: Option<u8>,
    pub level: Option<RankLevel>,
    pub status: Option<RecordStatus>,
    pub process_id: Option<String>,
    pub flags: Option<String>,
    #[serde(default)]
    pub fetch_failed: bool,
}

impl From<&ConsensusCall> for CallRow {
    fn from(call: &ConsensusCall) -> Self {
        Self {
            id: call.id.clone(),
            taxonomy: call.taxonomy.clone(),
            similarity: call.similarity,
            threshold: call.threshold,
            level: call.rank_level,
            status: call.status.clone(),
            process_id: call.process_id.clone(),
            flags: call.flags.map(|flags| flags.code()),
            fetch_failed: call.fetch_failed,
        }
    }
}

/// Writes `<stem>.hits.jsonl` and `<stem>.calls.jsonl` side by side.
#[derive(Debug)]
pub struct JsonlSink {
    hits_path: Utf8PathBuf,
    calls_path: Utf8PathBuf,
    hits: File,
    calls: File,
    mark: SinkMark,
}

impl JsonlSink {
    pub fn paths(dir: &Utf8Path, stem: &str) -> (Utf8PathBuf, Utf8PathBuf) {
        (
            dir.join(format!("{stem}.hits.jsonl")),
            dir.join(format!("{stem}.calls.jsonl")),
        )
    }

    /// Opens both files positioned at `mark`. A fresh run passes the default
    /// mark, which truncates them.
    pub fn open(dir: &Utf8Path, stem: &str, mark: SinkMark) -> Result<Self, BoldError> {
        fs::create_dir_all(dir.as_std_path()).map_err(|err| BoldError::Filesystem(err.to_string()))?;
        let (hits_path, calls_path) = Self::paths(dir, stem);
        let mut sink = Self {
            hits: open_append(&hits_path)?,
            calls: open_append(&calls_path)?,
            hits_path,
            calls_path,
            mark,
        };
        sink.rewind(mark)?;
        Ok(sink)
    }

    pub fn hits_path(&self) -> &Utf8Path {
        &self.hits_path
    }

    pub fn calls_path(&self) -> &Utf8Path {
        &self.calls_path
    }

    pub fn mark(&self) -> SinkMark {
        self.mark
    }
}

impl ResultSink for JsonlSink {
    fn commit(&mut self, output: &BatchOutput) -> Result<SinkMark, BoldError> {
        let mut hit_lines = Vec::new();
        for record in &output.records {
            for hit in &record.hits {
                push_line(&mut hit_lines, &HitRow::new(&record.id, hit, record.fetch_failed))?;
            }
        }
        let mut call_lines = Vec::new();
        for call in &output.calls {
            push_line(&mut call_lines, &CallRow::from(call))?;
        }

        write_synced(&mut self.hits, &hit_lines)?;
        write_synced(&mut self.calls, &call_lines)?;
        self.mark = SinkMark {
            hits_bytes: self.mark.hits_bytes + hit_lines.len() as u64,
            calls_bytes: self.mark.calls_bytes + call_lines.len() as u64,
        };
        Ok(self.mark)
    }

    fn rewind(&mut self, mark: SinkMark) -> Result<(), BoldError> {
        truncate_to(&mut self.hits, &self.hits_path, mark.hits_bytes)?;
        truncate_to(&mut self.calls, &self.calls_path, mark.calls_bytes)?;
        self.mark = mark;
        Ok(())
    }
}

/// Reads a hit table back into per-record candidate sets, in file order.
pub fn read_hit_table(path: &Utf8Path) -> Result<Vec<RecordHits>, BoldError> {
    let file = File::open(path.as_std_path()).map_err(|err| BoldError::Filesystem(format!("{path}: {err}")))?;
    let mut records: Vec<RecordHits> = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|err| BoldError::Filesystem(err.to_string()))?;
        if line.trim().is_empty() {
            continue;
        }
        let row: HitRow = serde_json::from_str(&line).map_err(|err| {
            BoldError::InvalidConfiguration(format!("{path} line {}: {err}", index + 1))
        })?;
        let fetch_failed = row.fetch_failed;
        let same_record = records.last().is_some_and(|record| record.id == row.id);
        if let Some(record) = records.last_mut().filter(|_| same_record) {
            record.hits.push(row.into_hit());
            continue;
        }
        records.push(RecordHits {
            id: row.id.clone(),
            hits: vec![row.into_hit()],
            fetch_failed,
        });
    }
    Ok(records)
}

fn open_append(path: &Utf8Path) -> Result<File, BoldError> {
    OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(path.as_std_path())
        .map_err(|err| BoldError::Filesystem(format!("{path}: {err}")))
}

fn truncate_to(file: &mut File, path: &Utf8Path, len: u64) -> Result<(), BoldError> {
    let current = file
        .metadata()
        .map_err(|err| BoldError::Filesystem(err.to_string()))?
        .len();
    if current < len {
        return Err(BoldError::CheckpointMismatch(format!(
            "{path} has {current} bytes, checkpoint expects at least {len}"
        )));
    }
    file.set_len(len)
        .and_then(|_| file.seek(SeekFrom::Start(len)))
        .map_err(|err| BoldError::Filesystem(err.to_string()))?;
    Ok(())
}

fn push_line<T: Serialize>(buffer: &mut Vec<u8>, row: &T) -> Result<(), BoldError> {
    serde_json::to_writer(&mut *buffer, row).map_err(|err| BoldError::Filesystem(err.to_string()))?;
    buffer.push(b'\n');
    Ok(())
}

fn write_synced(file: &mut File, bytes: &[u8]) -> Result<(), BoldError> {
    file.write_all(bytes)
        .and_then(|_| file.sync_data())
        .map_err(|err| BoldError::Filesystem(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::ConsensusResolver;
    use assert_matches::assert_matches;

    fn output(id: &str) -> BatchOutput {
        let record = RecordHits {
            id: id.to_string(),
            hits: crate::parse::no_match_hits(),
            fetch_failed: false,
        };
        let call = ConsensusResolver::default().resolve(&record);
        BatchOutput {
            batch_index: 0,
            offset: 0,
            records: vec![record],
            calls: vec![call],
        }
    }

    #[test]
    fn rewind_drops_uncommitted_rows() {
        let temp = tempfile::tempdir().unwrap();
        let dir = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();

        let mut sink = JsonlSink::open(&dir, "run", SinkMark::default()).unwrap();
        let first = sink.commit(&output("otu1")).unwrap();
        sink.commit(&output("otu2")).unwrap();
        drop(sink);

        let sink = JsonlSink::open(&dir, "run", first).unwrap();
        let records = read_hit_table(sink.hits_path()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "otu1");
        assert_eq!(records[0].hits.len(), 20);

        let calls = fs::read_to_string(sink.calls_path()).unwrap();
        assert_eq!(calls.lines().count(), 1);
        assert!(calls.contains("\"status\":\"No Match\""));
    }

    #[test]
    fn mark_past_end_is_rejected() {
        let temp = tempfile::tempdir().unwrap();
        let dir = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let mark = SinkMark {
            hits_bytes: 10,
            calls_bytes: 0,
        };
        assert_matches!(
            JsonlSink::open(&dir, "run", mark),
            Err(BoldError::CheckpointMismatch(_))
        );
    }
}
