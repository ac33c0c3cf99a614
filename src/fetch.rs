use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::BoldError;
use crate::pipeline::{ProgressEvent, ProgressSink};
use crate::retry::{RetryPolicy, is_retryable_status};
use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum FetchStrategy {
    Sequential,
    Concurrent,
}

/// Retrieves result pages. Output is positional: entry `i` belongs to
/// `locators[i]` whatever order the requests finished in.
pub trait ResultFetcher {
    fn fetch_all(
        &self,
        locators: &[String],
        sink: &dyn ProgressSink,
    ) -> Vec<Result<String, BoldError>>;

    fn fetch_one(&self, locator: &str) -> Result<String, BoldError>;
}

/// Single-locator fetch with the retry policy applied.
pub struct PageClient<'t, T: Transport> {
    transport: &'t T,
    policy: RetryPolicy,
}

impl<'t, T: Transport> PageClient<'t, T> {
    pub fn new(transport: &'t T, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    pub fn fetch(&self, locator: &str) -> Result<String, BoldError> {
        self.policy
            .run(
                |_| self.attempt(locator),
                BoldError::is_retryable,
                |attempt, err| {
                    warn!(locator, attempt, error = %err, "page fetch failed; retrying");
                },
            )
            .map_err(|exhausted| {
                let reason = match exhausted.error {
                    BoldError::FetchFailed { reason, .. } => reason,
                    err => err.to_string(),
                };
                BoldError::FetchFailed {
                    locator: locator.to_string(),
                    attempts: exhausted.attempts,
                    reason,
                }
            })
    }

    fn attempt(&self, locator: &str) -> Result<String, BoldError> {
        let reply = self.transport.get(locator)?;
        if is_retryable_status(reply.status) {
            return Err(BoldError::Http(format!("status {}", reply.status)));
        }
        if !reply.is_success() {
            return Err(BoldError::FetchFailed {
                locator: locator.to_string(),
                attempts: 1,
                reason: format!("status {}", reply.status),
            });
        }
        if reply.body.trim().is_empty() {
            return Err(BoldError::MalformedPage("empty body".to_string()));
        }
        Ok(reply.body)
    }
}

/// One request in flight; reports `completed/total` after every page.
pub struct SequentialFetcher<'t, T: Transport> {
    client: PageClient<'t, T>,
}

impl<'t, T: Transport> SequentialFetcher<'t, T> {
    pub fn new(transport: &'t T, policy: RetryPolicy) -> Self {
        Self {
            client: PageClient::new(transport, policy),
        }
    }
}

impl<T: Transport> ResultFetcher for SequentialFetcher<'_, T> {
    fn fetch_all(
        &self,
        locators: &[String],
        sink: &dyn ProgressSink,
    ) -> Vec<Result<String, BoldError>> {
        let total = locators.len();
        let mut pages = Vec::with_capacity(total);
        for (index, locator) in locators.iter().enumerate() {
            pages.push(self.client.fetch(locator));
            sink.event(ProgressEvent::fraction("Fetch", index + 1, total));
        }
        pages
    }

    fn fetch_one(&self, locator: &str) -> Result<String, BoldError> {
        self.client.fetch(locator)
    }
}

/// Every locator in flight at once on scoped threads sharing one transport.
/// Throttling is left to the service and surfaces as retryable statuses.
pub struct ConcurrentFetcher<'t, T: Transport> {
    client: PageClient<'t, T>,
}

impl<'t, T: Transport> ConcurrentFetcher<'t, T> {
    pub fn new(transport: &'t T, policy: RetryPolicy) -> Self {
        Self {
            client: PageClient::new(transport, policy),
        }
    }
}

impl<T: Transport> ResultFetcher for ConcurrentFetcher<'_, T> {
    fn fetch_all(
        &self,
        locators: &[String],
        sink: &dyn ProgressSink,
    ) -> Vec<Result<String, BoldError>> {
        let total = locators.len();
        let completed = AtomicUsize::new(0);
        let mut pages: Vec<Option<Result<String, BoldError>>> = Vec::with_capacity(total);
        pages.resize_with(total, || None);

        thread::scope(|scope| {
            let mut handles = Vec::with_capacity(total);
            for (index, locator) in locators.iter().enumerate() {
                let client = &self.client;
                let completed = &completed;
                handles.push((
                    index,
                    scope.spawn(move || {
                        let page = client.fetch(locator);
                        let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                        sink.event(ProgressEvent::fraction("Fetch", done, total));
                        page
                    }),
                ));
            }
            for (index, handle) in handles {
                let page = handle.join().unwrap_or_else(|_| {
                    Err(BoldError::FetchFailed {
                        locator: locators[index].clone(),
                        attempts: 0,
                        reason: "fetch thread panicked".to_string(),
                    })
                });
                pages[index] = Some(page);
            }
        });

        debug!(total, "concurrent fetch drained");
        pages
            .into_iter()
            .zip(locators)
            .map(|(page, locator)| {
                page.unwrap_or_else(|| {
                    Err(BoldError::FetchFailed {
                        locator: locator.clone(),
                        attempts: 0,
                        reason: "no result recorded".to_string(),
                    })
                })
            })
            .collect()
    }

    fn fetch_one(&self, locator: &str) -> Result<String, BoldError> {
        self.client.fetch(locator)
    }
}

pub fn fetcher_for<'t, T: Transport>(
    strategy: FetchStrategy,
    transport: &'t T,
    policy: RetryPolicy,
) -> Box<dyn ResultFetcher + 't> {
    match strategy {
        FetchStrategy::Sequential => Box::new(SequentialFetcher::new(transport, policy)),
        FetchStrategy::Concurrent => Box::new(ConcurrentFetcher::new(transport, policy)),
    }
}
