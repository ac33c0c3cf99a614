use crate::domain::SequenceRecord;
use crate::error::BoldError;

/// A contiguous run of input records submitted together.
#[derive(Debug, Clone, Copy)]
pub struct Batch<'a> {
    pub index: usize,
    pub offset: usize,
    pub records: &'a [SequenceRecord],
}

impl Batch<'_> {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Offset just past the last record of this batch.
    pub fn end(&self) -> usize {
        self.offset + self.records.len()
    }

    /// Query block in the form the identification engines accept.
    pub fn query(&self) -> String {
        self.records
            .iter()
            .map(|record| format!(">{}\n{}", record.id, record.sequence))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Clone)]
pub struct SequenceBatcher<'a> {
    records: &'a [SequenceRecord],
    batch_size: usize,
    cursor: usize,
}

impl<'a> SequenceBatcher<'a> {
    pub fn new(records: &'a [SequenceRecord], batch_size: usize) -> Result<Self, BoldError> {
        if batch_size == 0 {
            return Err(BoldError::InvalidConfiguration(
                "batch size must be a positive integer".to_string(),
            ));
        }
        Ok(Self {
            records,
            batch_size,
            cursor: 0,
        })
    }

    /// Resumes batching at `offset`; earlier records are never yielded.
    pub fn starting_at(mut self, offset: usize) -> Result<Self, BoldError> {
        if offset > self.records.len() {
            return Err(BoldError::InvalidConfiguration(format!(
                "resume offset {offset} is past the end of the input ({} records)",
                self.records.len()
            )));
        }
        self.cursor = offset;
        Ok(self)
    }

    pub fn remaining(&self) -> usize {
        self.records.len() - self.cursor
    }

    pub fn batch_count(&self) -> usize {
        self.remaining().div_ceil(self.batch_size)
    }
}

impl<'a> Iterator for SequenceBatcher<'a> {
    type Item = Batch<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.records.len() {
            return None;
        }
        let end = (self.cursor + self.batch_size).min(self.records.len());
        let batch = Batch {
            index: self.cursor / self.batch_size,
            offset: self.cursor,
            records: &self.records[self.cursor..end],
        };
        self.cursor = end;
        Some(batch)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn records(n: usize) -> Vec<SequenceRecord> {
        (0..n)
            .map(|i| SequenceRecord::new(format!("OTU_{i}"), "ACGT"))
            .collect()
    }

    #[test]
    fn splits_with_short_tail() {
        let input = records(7);
        let sizes: Vec<usize> = SequenceBatcher::new(&input, 3)
            .unwrap()
            .map(|batch| batch.len())
            .collect();
        assert_eq!(sizes, vec![3, 3, 1]);
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let input = records(2);
        let err = SequenceBatcher::new(&input, 0).unwrap_err();
        assert_matches!(err, BoldError::InvalidConfiguration(_));
    }

    #[test]
    fn resume_skips_committed_records() {
        let input = records(10);
        let batcher = SequenceBatcher::new(&input, 4)
            .unwrap()
            .starting_at(4)
            .unwrap();
        assert_eq!(batcher.batch_count(), 2);
        let batches: Vec<_> = batcher.collect();
        assert_eq!(batches[0].offset, 4);
        assert_eq!(batches[0].index, 1);
        assert_eq!(batches[0].records[0].id, "OTU_4");
        assert_eq!(batches[1].end(), 10);
    }

    #[test]
    fn offset_past_end_is_rejected() {
        let input = records(3);
        let err = SequenceBatcher::new(&input, 2)
            .unwrap()
            .starting_at(4)
            .unwrap_err();
        assert_matches!(err, BoldError::InvalidConfiguration(_));
    }

    #[test]
    fn query_block_joins_records() {
        let input = records(2);
        let batch = SequenceBatcher::new(&input, 2).unwrap().next().unwrap();
        assert_eq!(batch.query(), ">OTU_0\nACGT\n>OTU_1\nACGT");
    }
}
