use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::batch::{Batch, SequenceBatcher};
use crate::checkpoint::CheckpointLedger;
use crate::consensus::{ConsensusResolver, ResolutionMethod};
use crate::domain::{CandidateHit, Engine, PageSchema, RecordHits, SequenceRecord};
use crate::error::BoldError;
use crate::fetch::{FetchStrategy, ResultFetcher, fetcher_for};
use crate::parse::{no_match_hits, parse_page};
use crate::retry::RetryPolicy;
use crate::sink::{BatchOutput, ResultSink};
use crate::specimen::SpecimenLookup;
use crate::submit::BatchSubmitter;
use crate::transport::Transport;

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub fraction: Option<f64>,
}

impl ProgressEvent {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fraction: None,
        }
    }

    pub fn fraction(stage: &str, done: usize, total: usize) -> Self {
        let fraction = if total == 0 {
            1.0
        } else {
            done as f64 / total as f64
        };
        Self {
            message: format!("phase={stage}; {done}/{total}"),
            fraction: Some(fraction),
        }
    }
}

/// Receives progress from the pipeline, possibly from several fetch threads.
pub trait ProgressSink: Send + Sync {
    fn event(&self, event: ProgressEvent);
}

/// Cooperative stop request, checked between batches.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Largest batch the service accepts in one submission. Concurrent fetching
/// runs one thread per record of a batch.
pub const MAX_BATCH_SIZE: usize = 100;

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub engine: Engine,
    pub batch_size: usize,
    pub strategy: FetchStrategy,
    pub method: ResolutionMethod,
    pub fetch_policy: RetryPolicy,
    pub submit_policy: RetryPolicy,
    /// Fetches per locator while its page stays malformed.
    pub parse_attempts: u32,
    pub specimen_lookup: bool,
}

impl PipelineOptions {
    pub fn new(engine: Engine) -> Self {
        Self {
            engine,
            batch_size: MAX_BATCH_SIZE,
            strategy: FetchStrategy::Concurrent,
            method: ResolutionMethod::Cascade,
            fetch_policy: RetryPolicy::fetch_default(),
            submit_policy: RetryPolicy::submit_default(),
            parse_attempts: 3,
            specimen_lookup: true,
        }
    }

    pub fn validate(&self) -> Result<(), BoldError> {
        if self.batch_size == 0 || self.batch_size > MAX_BATCH_SIZE {
            return Err(BoldError::InvalidConfiguration(format!(
                "batch size must be between 1 and {MAX_BATCH_SIZE}, got {}",
                self.batch_size
            )));
        }
        if self.parse_attempts == 0 {
            return Err(BoldError::InvalidConfiguration(
                "parse attempts must be at least 1".to_string(),
            ));
        }
        self.fetch_policy.validate("fetch")?;
        self.submit_policy.validate("submit")?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub engine: String,
    pub total_records: usize,
    pub resumed_at: usize,
    pub records_processed: usize,
    pub records_committed: usize,
    pub batches_committed: usize,
    pub no_match: usize,
    pub fetch_failed: usize,
    pub flagged: usize,
    pub cancelled: bool,
    pub complete: bool,
}

/// Submit, fetch, parse, resolve and commit, one batch at a time.
pub struct Pipeline<'t, T: Transport> {
    transport: &'t T,
    options: PipelineOptions,
}

impl<'t, T: Transport> Pipeline<'t, T> {
    pub fn new(transport: &'t T, options: PipelineOptions) -> Result<Self, BoldError> {
        options.validate()?;
        Ok(Self { transport, options })
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Processes every record past the ledger's boundary. Each batch is
    /// written to `sink` and then recorded in `ledger`; an error leaves both at
    /// the last committed batch.
    pub fn run(
        &self,
        records: &[SequenceRecord],
        ledger: &mut CheckpointLedger,
        sink: &mut dyn ResultSink,
        progress: &dyn ProgressSink,
        cancel: &CancelFlag,
    ) -> Result<RunSummary, BoldError> {
        let resumed_at = ledger.records_committed();
        sink.rewind(ledger.checkpoint().sink)?;

        let batcher =
            SequenceBatcher::new(records, self.options.batch_size)?.starting_at(resumed_at)?;
        let total_batches = batcher.batch_count();
        let submitter = BatchSubmitter::new(self.transport, self.options.engine);
        let fetcher = fetcher_for(
            self.options.strategy,
            self.transport,
            self.options.fetch_policy.clone(),
        );
        let resolver = ConsensusResolver::new(self.options.method);

        let mut summary = RunSummary {
            engine: self.options.engine.to_string(),
            total_records: records.len(),
            resumed_at,
            records_committed: resumed_at,
            ..RunSummary::default()
        };
        info!(
            engine = %self.options.engine,
            total = records.len(),
            resumed_at,
            batches = total_batches,
            "starting identification run"
        );

        for (done, batch) in batcher.enumerate() {
            if cancel.is_cancelled() {
                info!(committed = summary.records_committed, "run cancelled");
                summary.cancelled = true;
                break;
            }
            progress.event(ProgressEvent::message(format!(
                "phase=Submit; batch {} ({} records)",
                batch.index + 1,
                batch.len()
            )));

            let output = self.process_batch(&batch, &submitter, fetcher.as_ref(), &resolver, progress)?;
            let mark = sink.commit(&output)?;
            ledger.advance(batch.end(), mark)?;

            summary.records_processed += batch.len();
            summary.records_committed = batch.end();
            summary.batches_committed += 1;
            for call in &output.calls {
                if call.is_no_match() {
                    summary.no_match += 1;
                }
                if call.fetch_failed {
                    summary.fetch_failed += 1;
                }
                if call.flags.is_some_and(|flags| flags.any()) {
                    summary.flagged += 1;
                }
            }
            info!(
                batch = batch.index,
                committed = summary.records_committed,
                total = records.len(),
                "batch committed"
            );
            progress.event(ProgressEvent::fraction("Commit", done + 1, total_batches));
        }

        summary.complete = summary.records_committed >= records.len();
        Ok(summary)
    }

    fn process_batch(
        &self,
        batch: &Batch<'_>,
        submitter: &BatchSubmitter<'_, T>,
        fetcher: &dyn ResultFetcher,
        resolver: &ConsensusResolver,
        progress: &dyn ProgressSink,
    ) -> Result<BatchOutput, BoldError> {
        let locators = self.submit(batch, submitter)?;
        debug!(batch = batch.index, locators = locators.len(), "batch accepted");

        progress.event(ProgressEvent::message(format!(
            "phase=Fetch; batch {}",
            batch.index + 1
        )));
        let pages = fetcher.fetch_all(&locators, progress);

        let schema = self.options.engine.schema();
        let mut records: Vec<RecordHits> = batch
            .records
            .iter()
            .zip(locators.iter().zip(pages))
            .map(|(record, (locator, page))| {
                let (hits, fetch_failed) = self.parse_with_refetch(fetcher, schema, locator, page);
                RecordHits {
                    id: record.id.clone(),
                    hits,
                    fetch_failed,
                }
            })
            .collect();

        if self.options.specimen_lookup {
            let lookup = SpecimenLookup::new(self.transport, self.options.fetch_policy.clone());
            let enriched = lookup.enrich(&mut records);
            debug!(batch = batch.index, enriched, "specimen data attached");
        }

        let calls = records.iter().map(|record| resolver.resolve(record)).collect();
        Ok(BatchOutput {
            batch_index: batch.index,
            offset: batch.offset,
            records,
            calls,
        })
    }

    fn submit(
        &self,
        batch: &Batch<'_>,
        submitter: &BatchSubmitter<'_, T>,
    ) -> Result<Vec<String>, BoldError> {
        self.options
            .submit_policy
            .run(
                |_| submitter.submit(batch),
                BoldError::is_retryable,
                |attempt, err| {
                    warn!(batch = batch.index, attempt, error = %err, "submission failed; retrying");
                },
            )
            .map_err(|exhausted| {
                if exhausted.error.is_retryable() {
                    warn!(
                        batch = batch.index,
                        attempts = exhausted.attempts,
                        error = %exhausted.error,
                        "giving up on submission"
                    );
                    BoldError::TooManyBadConnections {
                        attempts: exhausted.attempts,
                    }
                } else {
                    exhausted.error
                }
            })
    }

    /// A page that stays malformed or cannot be fetched becomes a set of
    /// sentinel rows marked as a fetch failure.
    fn parse_with_refetch(
        &self,
        fetcher: &dyn ResultFetcher,
        schema: PageSchema,
        locator: &str,
        mut page: Result<String, BoldError>,
    ) -> (Vec<CandidateHit>, bool) {
        let mut attempt = 1;
        loop {
            let body = match page {
                Ok(body) => body,
                Err(err) => {
                    warn!(locator, error = %err, "result page unavailable");
                    return (no_match_hits(), true);
                }
            };
            match parse_page(&body, schema) {
                Ok(hits) => return (hits, false),
                Err(BoldError::MalformedPage(reason)) if attempt < self.options.parse_attempts => {
                    debug!(locator, attempt, reason = %reason, "malformed page; fetching again");
                    attempt += 1;
                    page = fetcher.fetch_one(locator);
                }
                Err(err) => {
                    warn!(locator, attempts = attempt, error = %err, "result page unusable");
                    return (no_match_hits(), true);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fraction_handles_empty_totals() {
        let event = ProgressEvent::fraction("Fetch", 0, 0);
        assert_eq!(event.fraction, Some(1.0));
        let event = ProgressEvent::fraction("Fetch", 1, 4);
        assert_eq!(event.fraction, Some(0.25));
        assert_eq!(event.message, "phase=Fetch; 1/4");
    }

    #[test]
    fn cancel_is_shared_between_clones() {
        let flag = CancelFlag::new();
        let clone = flag.clone();
        clone.cancel();
        assert!(flag.is_cancelled());
    }

    #[test]
    fn options_reject_zero_sizes() {
        let mut options = PipelineOptions::new(Engine::Coi);
        assert!(options.validate().is_ok());
        options.parse_attempts = 0;
        assert!(options.validate().is_err());
        options.parse_attempts = 1;
        options.batch_size = 0;
        assert!(options.validate().is_err());
    }

    #[test]
    fn options_cap_batch_size() {
        let mut options = PipelineOptions::new(Engine::Coi);
        options.batch_size = MAX_BATCH_SIZE;
        assert!(options.validate().is_ok());
        options.batch_size = MAX_BATCH_SIZE + 1;
        assert!(matches!(
            options.validate(),
            Err(BoldError::InvalidConfiguration(_))
        ));
    }
}
