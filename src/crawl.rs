// Gonimbus object storage toolkit.
// Copyright 2025 Gonimbus developers.

// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

//! The crawl pipeline: enumerate prefixes, list objects, match and
//! filter, emit object records, account progress.
//!
//! Stages are tasks connected by bounded channels, so a slow sink
//! backpressures all the way to the provider. One cancellation token
//! governs the whole job; a fatal error cancels the pipeline through a
//! single-slot error channel.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::config::CrawlConfig;
use crate::counters::{Counter, Counters, JobSummary};
use crate::errors::{Error, Result};
use crate::filter::CompiledFilter;
use crate::matcher::GlobMatcher;
use crate::output::Writer;
use crate::preflight;
use crate::provider::{ListOpts, ObjectSummary, Provider};
use crate::records::{ErrorRecord, ObjectRecord, Phase, ProgressRecord};
use crate::shard;

/// An item flowing between pipeline stages.
#[derive(Debug)]
pub(crate) struct PipelineToken {
    pub summary: ObjectSummary,
    pub prefix: String,
    pub content_type: Option<String>,
    pub metadata: Option<std::collections::BTreeMap<String, String>>,
}

/// One crawl job over one provider.
pub struct Crawler {
    provider: Arc<dyn Provider>,
    matcher: Arc<GlobMatcher>,
    filter: Arc<CompiledFilter>,
    writer: Arc<dyn Writer>,
    config: CrawlConfig,
}

impl Crawler {
    pub fn new(
        provider: Arc<dyn Provider>,
        matcher: GlobMatcher,
        filter: CompiledFilter,
        writer: Arc<dyn Writer>,
        config: CrawlConfig,
    ) -> Result<Crawler> {
        config.validate()?;
        Ok(Crawler {
            provider,
            matcher: Arc::new(matcher),
            filter: Arc::new(filter),
            writer,
            config,
        })
    }

    /// Run the job to completion or cancellation.
    ///
    /// The summary record is always the last record emitted; partial
    /// output before a cancellation or fatal error remains valid.
    pub async fn run(&self, cancel: CancellationToken) -> Result<JobSummary> {
        let started = Instant::now();
        let prefixes = self.plan_prefixes(&cancel).await?;
        debug!(?prefixes, "crawl plan ready");

        if self.config.preflight.mode > crate::config::PreflightMode::PlanOnly {
            let first_prefix = prefixes.first().map(String::as_str).unwrap_or("");
            let outcome = preflight::check_crawl(
                self.provider.as_ref(),
                first_prefix,
                &self.config.preflight,
                false,
            )
            .await;
            self.writer.preflight(&outcome.record)?;
            if let Some(err) = outcome.first_error {
                return self.finish(started, prefixes, Some(err)).await;
            }
        }

        self.writer.progress(&ProgressRecord {
            phase: Phase::Starting,
            objects_found: 0,
            objects_matched: 0,
            bytes_total: 0,
            prefix: None,
        })?;

        let counters = Arc::new(Counters::default());
        let job_cancel = cancel.child_token();
        let (fatal_tx, mut fatal_rx) = mpsc::channel::<Error>(1);

        let (prefix_tx, prefix_rx) = async_channel::bounded(prefixes.len().max(1));
        for prefix in &prefixes {
            // Capacity covers every prefix, so this cannot block.
            let _ = prefix_tx.send(prefix.clone()).await;
        }
        prefix_tx.close();

        let (list_tx, list_rx) = async_channel::bounded(self.config.channel_buffer);
        let (work_tx, work_rx) = async_channel::bounded(self.config.channel_buffer);

        let limiter = (self.config.rate_limit > 0).then(|| {
            Arc::new(
                leaky_bucket::RateLimiter::builder()
                    .max(self.config.rate_limit as usize)
                    .initial(self.config.rate_limit as usize)
                    .refill(self.config.rate_limit as usize)
                    .interval(std::time::Duration::from_secs(1))
                    .build(),
            )
        });

        let mut tasks = JoinSet::new();
        for worker in 0..self.config.concurrency {
            tasks.spawn(lister(
                worker,
                self.provider.clone(),
                prefix_rx.clone(),
                list_tx.clone(),
                limiter.clone(),
                self.writer.clone(),
                counters.clone(),
                fatal_tx.clone(),
                job_cancel.clone(),
            ));
        }
        drop(prefix_rx);
        drop(list_tx);

        tasks.spawn(match_stage(
            self.provider.clone(),
            self.matcher.clone(),
            self.filter.clone(),
            list_rx,
            work_tx,
            self.writer.clone(),
            counters.clone(),
            job_cancel.clone(),
        ));

        {
            let writer = self.writer.clone();
            let counters = counters.clone();
            let fatal_tx = fatal_tx.clone();
            let job_cancel = job_cancel.clone();
            let progress_every = self.config.progress_every;
            tasks.spawn(async move {
                write_stage(
                    work_rx,
                    writer,
                    counters,
                    fatal_tx,
                    job_cancel,
                    progress_every,
                )
                .await;
            });
        }
        drop(fatal_tx);

        while tasks.join_next().await.is_some() {}

        let failure = match fatal_rx.try_recv() {
            Ok(err) => Some(err),
            Err(_) if cancel.is_cancelled() => Some(Error::Cancelled),
            Err(_) => None,
        };
        self.finish_with_counters(started, prefixes, counters, failure)
            .await
    }

    /// Derived matcher prefixes, optionally expanded by sharding.
    async fn plan_prefixes(&self, cancel: &CancellationToken) -> Result<Vec<String>> {
        let base = self.matcher.prefixes().to_vec();
        if !self.config.sharding.enabled {
            return Ok(base);
        }
        let mut expanded = Vec::new();
        for prefix in &base {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            match shard::discover(self.provider.as_ref(), prefix, &self.config.sharding).await {
                Ok(shards) => expanded.extend(shards),
                Err(Error::ShardingUnsupported) => {
                    warn!(%prefix, "provider cannot shard, using base prefix");
                    expanded.push(prefix.clone());
                }
                Err(err) => return Err(err),
            }
            if expanded.len() >= self.config.sharding.max_shards {
                expanded.truncate(self.config.sharding.max_shards);
                break;
            }
        }
        expanded.dedup();
        Ok(expanded)
    }

    async fn finish(
        &self,
        started: Instant,
        prefixes: Vec<String>,
        failure: Option<Error>,
    ) -> Result<JobSummary> {
        self.finish_with_counters(started, prefixes, Arc::new(Counters::default()), failure)
            .await
    }

    async fn finish_with_counters(
        &self,
        started: Instant,
        prefixes: Vec<String>,
        counters: Arc<Counters>,
        failure: Option<Error>,
    ) -> Result<JobSummary> {
        if let Some(err) = &failure {
            // Best effort: the sink may be the thing that failed.
            let _ = self.writer.error(&ErrorRecord {
                code: err.code(),
                message: err.to_string(),
                key: None,
                prefix: None,
                details: None,
            });
            counters.count(Counter::Errors, 1);
        }
        let _ = self.writer.progress(&ProgressRecord {
            phase: Phase::Complete,
            objects_found: counters.get(Counter::ObjectsListed),
            objects_matched: counters.get(Counter::ObjectsMatched),
            bytes_total: counters.get(Counter::BytesTotal),
            prefix: None,
        });
        let summary = JobSummary::from_counters(&counters, started.elapsed(), prefixes);
        let emitted = self.writer.summary(&summary.to_record(false));
        match failure {
            Some(err) => Err(err),
            None => {
                emitted?;
                Ok(summary)
            }
        }
    }
}

/// List every object under prefixes pulled from the queue.
///
/// Access-denied and throttled prefixes are non-fatal: one error record,
/// and the crawl continues with the remaining prefixes. Anything else
/// tears the job down through the fatal channel.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn lister(
    worker: usize,
    provider: Arc<dyn Provider>,
    prefix_rx: async_channel::Receiver<String>,
    list_tx: async_channel::Sender<PipelineToken>,
    limiter: Option<Arc<leaky_bucket::RateLimiter>>,
    writer: Arc<dyn Writer>,
    counters: Arc<Counters>,
    fatal_tx: mpsc::Sender<Error>,
    cancel: CancellationToken,
) {
    loop {
        let prefix = tokio::select! {
            _ = cancel.cancelled() => break,
            received = prefix_rx.recv() => match received {
                Ok(prefix) => prefix,
                Err(_) => break,
            },
        };
        trace!(worker, %prefix, "listing prefix");
        let mut continuation = None;
        loop {
            if let Some(limiter) = &limiter {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = limiter.acquire_one() => {}
                }
            }
            let page = tokio::select! {
                _ = cancel.cancelled() => return,
                page = provider.list(ListOpts {
                    prefix: prefix.clone(),
                    continuation: continuation.clone(),
                    max_keys: None,
                }) => page,
            };
            match page {
                Ok(page) => {
                    for summary in page.objects {
                        let token = PipelineToken {
                            summary,
                            prefix: prefix.clone(),
                            content_type: None,
                            metadata: None,
                        };
                        tokio::select! {
                            _ = cancel.cancelled() => return,
                            sent = list_tx.send(token) => {
                                if sent.is_err() {
                                    return;
                                }
                            }
                        }
                    }
                    if !page.is_truncated {
                        break;
                    }
                    continuation = page.next_continuation;
                }
                Err(err) if err.is_access_denied() || err.is_throttled() => {
                    warn!(%prefix, %err, "prefix listing failed, continuing");
                    let record = ErrorRecord {
                        code: err.kind().code(),
                        message: err.to_string(),
                        key: None,
                        prefix: Some(prefix.clone()),
                        details: None,
                    };
                    counters.count(Counter::Errors, 1);
                    if writer.error(&record).is_err() {
                        let _ = fatal_tx.try_send(Error::OutputClosed);
                        cancel.cancel();
                        return;
                    }
                    break;
                }
                Err(err) => {
                    let _ = fatal_tx.try_send(err.into());
                    cancel.cancel();
                    return;
                }
            }
        }
        counters.count(Counter::PrefixesListed, 1);
        trace!(worker, %prefix, "prefix done");
    }
}

/// Single matcher stage: admit or reject listed objects.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn match_stage(
    provider: Arc<dyn Provider>,
    matcher: Arc<GlobMatcher>,
    filter: Arc<CompiledFilter>,
    list_rx: async_channel::Receiver<PipelineToken>,
    work_tx: async_channel::Sender<PipelineToken>,
    writer: Arc<dyn Writer>,
    counters: Arc<Counters>,
    cancel: CancellationToken,
) {
    loop {
        let mut token = tokio::select! {
            _ = cancel.cancelled() => break,
            received = list_rx.recv() => match received {
                Ok(token) => token,
                Err(_) => break,
            },
        };
        counters.count(Counter::ObjectsListed, 1);
        if !matcher.matches(&token.summary.key) {
            continue;
        }
        if !filter.is_empty() {
            if filter.needs_content_type() {
                // Enrich with a head only when the filter needs it.
                let meta = tokio::select! {
                    _ = cancel.cancelled() => break,
                    meta = provider.head(&token.summary.key) => meta,
                };
                match meta {
                    Ok(meta) => {
                        token.content_type = meta.content_type;
                        if !meta.metadata.is_empty() {
                            token.metadata = Some(meta.metadata);
                        }
                    }
                    Err(err) => {
                        counters.count(Counter::Errors, 1);
                        let _ = writer.error(&ErrorRecord {
                            code: err.kind().code(),
                            message: err.to_string(),
                            key: Some(token.summary.key.clone()),
                            prefix: Some(token.prefix.clone()),
                            details: None,
                        });
                        continue;
                    }
                }
            }
            if !filter.admits(&token.summary, token.content_type.as_deref()) {
                continue;
            }
        }
        tokio::select! {
            _ = cancel.cancelled() => break,
            sent = work_tx.send(token) => {
                if sent.is_err() {
                    break;
                }
            }
        }
    }
}

/// Single writer stage: emit object records and progress.
async fn write_stage(
    work_rx: async_channel::Receiver<PipelineToken>,
    writer: Arc<dyn Writer>,
    counters: Arc<Counters>,
    fatal_tx: mpsc::Sender<Error>,
    cancel: CancellationToken,
    progress_every: u64,
) {
    let mut matched: u64 = 0;
    loop {
        let token = tokio::select! {
            _ = cancel.cancelled() => break,
            received = work_rx.recv() => match received {
                Ok(token) => token,
                Err(_) => break,
            },
        };
        let record = ObjectRecord {
            key: token.summary.key,
            size: token.summary.size,
            etag: token.summary.etag,
            last_modified: token.summary.last_modified,
            content_type: token.content_type,
            metadata: token.metadata,
        };
        if let Err(err) = writer.object(&record) {
            let _ = fatal_tx.try_send(err);
            cancel.cancel();
            break;
        }
        counters.count(Counter::ObjectsMatched, 1);
        counters.count(Counter::BytesTotal, record.size);
        matched += 1;
        if matched % progress_every == 0 {
            let _ = writer.progress(&ProgressRecord {
                phase: Phase::Listing,
                objects_found: counters.get(Counter::ObjectsListed),
                objects_matched: matched,
                bytes_total: counters.get(Counter::BytesTotal),
                prefix: None,
            });
        }
    }
}
