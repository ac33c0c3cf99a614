use std::fs;
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::SequenceRecord;
use crate::error::BoldError;

/// Byte lengths of the sink outputs at the last committed batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkMark {
    pub hits_bytes: u64,
    pub calls_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub input: String,
    pub total_records: usize,
    pub first_id: Option<String>,
    pub records_committed: usize,
    pub batches_committed: usize,
    #[serde(default)]
    pub sink: SinkMark,
    pub updated_at: String,
}

impl Checkpoint {
    fn fresh(input: &str, records: &[SequenceRecord]) -> Self {
        Self {
            input: input.to_string(),
            total_records: records.len(),
            first_id: records.first().map(|record| record.id.clone()),
            records_committed: 0,
            batches_committed: 0,
            sink: SinkMark::default(),
            updated_at: iso_timestamp(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.records_committed >= self.total_records
    }

    pub fn remaining(&self) -> usize {
        self.total_records.saturating_sub(self.records_committed)
    }
}

/// Durable record of how far into the input a run has committed.
#[derive(Debug)]
pub struct CheckpointLedger {
    path: Utf8PathBuf,
    state: Checkpoint,
}

impl CheckpointLedger {
    pub fn sidecar_path(input: &Utf8Path) -> Utf8PathBuf {
        Utf8PathBuf::from(format!("{input}.checkpoint.json"))
    }

    /// Loads the sidecar of `input`, or starts a fresh ledger when none exists.
    pub fn open(input: &Utf8Path, records: &[SequenceRecord]) -> Result<Self, BoldError> {
        Self::open_at(Self::sidecar_path(input), input.as_str(), records)
    }

    pub fn open_at(
        path: Utf8PathBuf,
        input: &str,
        records: &[SequenceRecord],
    ) -> Result<Self, BoldError> {
        let state = match read_checkpoint(&path)? {
            Some(existing) => {
                validate(&existing, records)?;
                debug!(
                    path = %path,
                    committed = existing.records_committed,
                    "resuming from checkpoint"
                );
                existing
            }
            None => Checkpoint::fresh(input, records),
        };
        Ok(Self { path, state })
    }

    /// Discards any sidecar of `input`, matching or not, and starts from the
    /// first record.
    pub fn open_fresh(input: &Utf8Path, records: &[SequenceRecord]) -> Result<Self, BoldError> {
        let mut ledger = Self {
            path: Self::sidecar_path(input),
            state: Checkpoint::fresh(input.as_str(), records),
        };
        ledger.reset(records)?;
        Ok(ledger)
    }

    /// Reads a sidecar without checking it against any input.
    pub fn load(input: &Utf8Path) -> Result<Option<Checkpoint>, BoldError> {
        read_checkpoint(&Self::sidecar_path(input))
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn checkpoint(&self) -> &Checkpoint {
        &self.state
    }

    pub fn records_committed(&self) -> usize {
        self.state.records_committed
    }

    /// Moves the committed boundary to `records_committed` and persists it.
    pub fn advance(&mut self, records_committed: usize, sink: SinkMark) -> Result<(), BoldError> {
        if records_committed < self.state.records_committed {
            return Err(BoldError::CheckpointMismatch(format!(
                "boundary cannot move back from {} to {records_committed}",
                self.state.records_committed
            )));
        }
        if records_committed > self.state.total_records {
            return Err(BoldError::CheckpointMismatch(format!(
                "boundary {records_committed} is past the {} input records",
                self.state.total_records
            )));
        }
        let mut next = self.state.clone();
        next.records_committed = records_committed;
        next.batches_committed += 1;
        next.sink = sink;
        next.updated_at = iso_timestamp();
        write_checkpoint(&self.path, &next)?;
        self.state = next;
        Ok(())
    }

    /// Deletes the sidecar and starts over from the first record.
    pub fn reset(&mut self, records: &[SequenceRecord]) -> Result<(), BoldError> {
        if self.path.as_std_path().exists() {
            fs::remove_file(self.path.as_std_path())
                .map_err(|err| BoldError::Filesystem(err.to_string()))?;
        }
        self.state = Checkpoint::fresh(&self.state.input, records);
        Ok(())
    }
}

fn validate(existing: &Checkpoint, records: &[SequenceRecord]) -> Result<(), BoldError> {
    if existing.total_records != records.len() {
        return Err(BoldError::CheckpointMismatch(format!(
            "checkpoint covers {} records, input has {}",
            existing.total_records,
            records.len()
        )));
    }
    let first_id = records.first().map(|record| record.id.as_str());
    if existing.first_id.as_deref() != first_id {
        return Err(BoldError::CheckpointMismatch(format!(
            "checkpoint starts at {:?}, input starts at {:?}",
            existing.first_id, first_id
        )));
    }
    if existing.records_committed > existing.total_records {
        return Err(BoldError::CheckpointMismatch(format!(
            "{} records committed out of {}",
            existing.records_committed, existing.total_records
        )));
    }
    Ok(())
}

fn read_checkpoint(path: &Utf8Path) -> Result<Option<Checkpoint>, BoldError> {
    if !path.as_std_path().exists() {
        return Ok(None);
    }
    let content =
        fs::read_to_string(path.as_std_path()).map_err(|err| BoldError::Filesystem(err.to_string()))?;
    let checkpoint = serde_json::from_str(&content)
        .map_err(|err| BoldError::CheckpointMismatch(format!("unreadable checkpoint {path}: {err}")))?;
    Ok(Some(checkpoint))
}

fn write_checkpoint(path: &Utf8Path, checkpoint: &Checkpoint) -> Result<(), BoldError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent,
        _ => Utf8Path::new("."),
    };
    fs::create_dir_all(parent.as_std_path()).map_err(|err| BoldError::Filesystem(err.to_string()))?;
    let content = serde_json::to_vec_pretty(checkpoint)
        .map_err(|err| BoldError::Filesystem(err.to_string()))?;
    let mut temp = tempfile::Builder::new()
        .prefix(".bold-digger-checkpoint")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| BoldError::Filesystem(err.to_string()))?;
    temp.write_all(&content)
        .and_then(|_| temp.as_file().sync_all())
        .map_err(|err| BoldError::Filesystem(err.to_string()))?;
    temp.persist(path.as_std_path())
        .map_err(|err| BoldError::Filesystem(err.to_string()))?;
    Ok(())
}

fn iso_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}
