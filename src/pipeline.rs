use std::sync::Arc;
use std::time::Duration;

use indicatif::ProgressBar;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::config::{FetchPolicy, Settings};
use crate::db::Record;
use crate::error::{FetchError, FlushError, PipelineError};
use crate::fetch::Fetcher;
use crate::pages::{Frontier, Offer, PageRequest};
use crate::parser;
use crate::sink::{BatchSink, RecordStore};

/// `Idle → Running → Draining → Closed`. `Closed` is reached once per run, from any path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PipelineState {
    #[default]
    Idle,
    Running,
    Draining,
    Closed,
}

/// What one crawl did. `records_extracted == records_written` is the property that matters.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub pages_requested: usize,
    pub pages_fetched: usize,
    pub pages_failed: usize,
    pub records_extracted: usize,
    pub records_written: usize,
    pub records_unflushed: usize,
    pub flushes: usize,
    pub flush_failures: usize,
    pub links_discovered: usize,
    pub links_uncovered: usize,
    pub cancelled: bool,
    pub state: PipelineState,
}

impl RunSummary {
    pub fn is_complete(&self) -> bool {
        self.records_extracted == self.records_written
    }
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub base_url: Url,
    pub concurrency: usize,
    pub on_fetch_error: FetchPolicy,
    pub flush_retries: u32,
    pub flush_backoff: Duration,
    pub follow_pagination: bool,
    pub max_pages: u32,
}

impl TryFrom<&Settings> for PipelineOptions {
    type Error = url::ParseError;

    fn try_from(s: &Settings) -> Result<Self, Self::Error> {
        Ok(Self {
            base_url: Url::parse(&s.base_url)?,
            concurrency: s.concurrency.max(1),
            on_fetch_error: s.on_fetch_error,
            flush_retries: s.flush_retries,
            flush_backoff: Duration::from_millis(s.flush_backoff_ms),
            follow_pagination: s.follow_pagination,
            max_pages: s.max_pages(),
        })
    }
}

enum Failure {
    Fetch { offset: u32, source: FetchError },
    Flush { attempts: u32, source: FlushError },
}

/// Fetches pages, extracts records and feeds them to the sink.
///
/// Fetches run concurrently, but only this struct touches the sink, so adds and
/// flushes never interleave. The store is moved in at construction and released
/// when the run drains.
pub struct Pipeline<F: Fetcher + 'static, S: RecordStore> {
    options: PipelineOptions,
    fetcher: Arc<F>,
    sink: BatchSink<S>,
    state: PipelineState,
    summary: RunSummary,
    progress: ProgressBar,
}

impl<F: Fetcher + 'static, S: RecordStore> Pipeline<F, S> {
    pub fn new(options: PipelineOptions, fetcher: F, store: S, batch_capacity: usize) -> Self {
        Self {
            options,
            fetcher: Arc::new(fetcher),
            sink: BatchSink::new(store, batch_capacity),
            state: PipelineState::Idle,
            summary: RunSummary::default(),
            progress: ProgressBar::hidden(),
        }
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    /// Crawl `requests` to completion, then drain and close the sink.
    ///
    /// The sink is closed on every path. An error still carries the summary.
    pub async fn run(
        mut self,
        requests: Vec<PageRequest>,
        cancel: &CancellationToken,
    ) -> Result<RunSummary, PipelineError> {
        self.transition(PipelineState::Running);
        let crawled = self.crawl(requests, cancel).await;

        self.transition(PipelineState::Draining);
        let drained = match crawled {
            // Retries are spent; close still makes its one final attempt.
            Err(Failure::Flush { .. }) => self.close_sink(),
            _ => self.drain().await,
        };

        self.transition(PipelineState::Closed);
        self.progress.finish_and_clear();
        let summary = self.finish_summary();

        // A lost write outranks the fetch error that stopped the crawl.
        let outcome = match (crawled, drained) {
            (Err(Failure::Fetch { offset, source }), Err(flush)) => {
                error!("Crawl aborted at offset {}: {}", offset, source);
                Err(flush)
            }
            (crawled, drained) => crawled.and(drained),
        };

        match outcome {
            Ok(()) => {
                info!(
                    "Crawl finished: {}/{} pages, {} records extracted, {} written",
                    summary.pages_fetched,
                    summary.pages_requested,
                    summary.records_extracted,
                    summary.records_written
                );
                Ok(summary)
            }
            Err(Failure::Fetch { offset, source }) => Err(PipelineError::Fetch {
                offset,
                source,
                summary,
            }),
            Err(Failure::Flush { attempts, source }) => Err(PipelineError::Flush {
                attempts,
                source,
                summary,
            }),
        }
    }

    async fn crawl(
        &mut self,
        requests: Vec<PageRequest>,
        cancel: &CancellationToken,
    ) -> Result<(), Failure> {
        let mut frontier = Frontier::new(
            requests,
            self.options.max_pages,
            self.options.follow_pagination,
        );
        self.summary.pages_requested = frontier.scheduled();
        self.progress.set_length(frontier.scheduled() as u64);
        info!("Crawling {} pages", frontier.scheduled());

        let mut in_flight = JoinSet::new();
        loop {
            while in_flight.len() < self.options.concurrency && !cancel.is_cancelled() {
                let Some(req) = frontier.next() else { break };
                let fetcher = Arc::clone(&self.fetcher);
                let url = req.url(&self.options.base_url);
                in_flight.spawn(async move {
                    let result = fetcher.fetch(url.as_str()).await;
                    (req, url, result)
                });
            }

            let joined = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    warn!("Crawl cancelled, {} fetches in flight dropped", in_flight.len());
                    self.summary.cancelled = true;
                    in_flight.abort_all();
                    return Ok(());
                }
                joined = in_flight.join_next() => joined,
            };
            // Nothing in flight and nothing queued.
            let Some(joined) = joined else { return Ok(()) };
            self.progress.inc(1);

            let (req, url, result) = match joined {
                Ok(done) => done,
                Err(e) => {
                    error!("Fetch task failed: {}", e);
                    self.summary.pages_failed += 1;
                    continue;
                }
            };

            match result {
                Ok(body) => self.handle_page(&body, &url, &mut frontier).await?,
                Err(e) => {
                    self.summary.pages_failed += 1;
                    match self.options.on_fetch_error {
                        FetchPolicy::Skip => warn!("Skipping page at offset {}: {}", req.offset, e),
                        FetchPolicy::Abort => {
                            error!("Page at offset {} failed: {}", req.offset, e);
                            in_flight.abort_all();
                            return Err(Failure::Fetch {
                                offset: req.offset,
                                source: e,
                            });
                        }
                    }
                }
            }
        }
    }

    async fn handle_page(
        &mut self,
        body: &str,
        url: &Url,
        frontier: &mut Frontier,
    ) -> Result<(), Failure> {
        let page = parser::process_page(body, url);
        self.summary.pages_fetched += 1;
        self.summary.records_extracted += page.records.len();
        if page.records.is_empty() {
            warn!("No entries found on {}", url);
        } else {
            debug!("{} records from {}", page.records.len(), url);
        }

        for link in page.links {
            self.summary.links_discovered += 1;
            match frontier.offer(link) {
                Offer::Known => {}
                Offer::Scheduled => {
                    info!("Following pagination link to offset {}", link.offset);
                    self.summary.pages_requested += 1;
                    self.progress.inc_length(1);
                }
                Offer::Ignored => debug!("Pagination link to offset {} not crawled", link.offset),
            }
        }
        self.summary.links_uncovered = frontier.uncovered();

        for record in page.records {
            self.add(record).await?;
        }
        Ok(())
    }

    async fn add(&mut self, record: Record) -> Result<(), Failure> {
        match self.sink.add(record) {
            Ok(()) => Ok(()),
            Err(e) => self.retry_flush(e).await,
        }
    }

    /// Retry a failed flush with exponential backoff until it lands or retries run out.
    async fn retry_flush(&mut self, first: FlushError) -> Result<(), Failure> {
        let mut err = first;
        let mut attempts = 1;
        loop {
            self.summary.flush_failures += 1;
            if matches!(err, FlushError::Closed) || attempts > self.options.flush_retries {
                error!("Giving up on flush after {} attempts: {}", attempts, err);
                return Err(Failure::Flush {
                    attempts,
                    source: err,
                });
            }
            let backoff = self
                .options
                .flush_backoff
                .saturating_mul(2u32.saturating_pow(attempts - 1));
            warn!(
                "Flush of {} records failed (attempt {}/{}): {}, retrying in {:.1}s",
                self.sink.pending(),
                attempts,
                self.options.flush_retries + 1,
                err,
                backoff.as_secs_f64()
            );
            tokio::time::sleep(backoff).await;
            match self.sink.flush() {
                Ok(_) => return Ok(()),
                Err(e) => {
                    err = e;
                    attempts += 1;
                }
            }
        }
    }

    async fn drain(&mut self) -> Result<(), Failure> {
        let flushed = match self.sink.flush() {
            Ok(_) => Ok(()),
            Err(e) => self.retry_flush(e).await,
        };
        let closed = self.close_sink();
        flushed.and(closed)
    }

    fn close_sink(&mut self) -> Result<(), Failure> {
        self.sink
            .close()
            .map(|_| ())
            .map_err(|source| Failure::Flush {
                attempts: 1,
                source,
            })
    }

    fn transition(&mut self, next: PipelineState) {
        debug!("Pipeline {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    fn finish_summary(&mut self) -> RunSummary {
        self.summary.records_written = self.sink.written();
        self.summary.flushes = self.sink.flushes();
        self.summary.records_unflushed = self.sink.pending();
        self.summary.state = self.state;
        self.summary.clone()
    }
}
