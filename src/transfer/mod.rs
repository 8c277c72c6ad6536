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

//! The transfer engine: crawl-shaped enumeration plus, per matched
//! object, an existence check, dedup decision, retry-safe copy, and an
//! optional source delete in move mode.

pub mod body;
pub mod template;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::config::{
    read_only_latch, DedupStrategy, OnExists, PreflightMode, TransferConfig, TransferMode,
};
use crate::counters::{Counter, Counters, JobSummary};
use crate::crawl::{lister, match_stage, PipelineToken};
use crate::errors::{Error, ErrorCode, Result};
use crate::filter::CompiledFilter;
use crate::matcher::GlobMatcher;
use crate::output::Writer;
use crate::preflight;
use crate::records::{ErrorRecord, Phase, ProgressRecord, SkipReason, SkipRecord, TransferRecord};
use crate::shard;

use self::body::RetryBody;
use self::template::PathTemplate;

/// One transfer job between a source and a target provider.
pub struct Transferrer {
    source: Arc<dyn crate::provider::Provider>,
    target: Arc<dyn crate::provider::Provider>,
    matcher: Arc<GlobMatcher>,
    filter: Arc<CompiledFilter>,
    writer: Arc<dyn Writer>,
    template: Option<PathTemplate>,
    config: TransferConfig,
}

impl Transferrer {
    /// Validate configuration and required capabilities up front, so a
    /// misconfigured job fails before any listing starts.
    pub fn new(
        source: Arc<dyn crate::provider::Provider>,
        target: Arc<dyn crate::provider::Provider>,
        matcher: GlobMatcher,
        filter: CompiledFilter,
        writer: Arc<dyn Writer>,
        config: TransferConfig,
    ) -> Result<Transferrer> {
        config.validate()?;
        if read_only_latch(config.read_only) {
            return Err(Error::ReadOnly {
                operation: "transfer",
            });
        }
        if source.as_getter().is_none() {
            return Err(Error::MissingCapability {
                capability: "ObjectGetter",
                provider: source.tag().to_owned(),
            });
        }
        if target.as_putter().is_none() {
            return Err(Error::MissingCapability {
                capability: "ObjectPutter",
                provider: target.tag().to_owned(),
            });
        }
        if config.mode == TransferMode::Move && source.as_deleter().is_none() {
            return Err(Error::MissingCapability {
                capability: "ObjectDeleter",
                provider: source.tag().to_owned(),
            });
        }
        let template = config
            .path_template
            .as_deref()
            .map(PathTemplate::new)
            .transpose()?;
        Ok(Transferrer {
            source,
            target,
            matcher: Arc::new(matcher),
            filter: Arc::new(filter),
            writer,
            template,
            config,
        })
    }

    pub async fn run(&self, cancel: CancellationToken) -> Result<JobSummary> {
        let started = Instant::now();
        let prefixes = self.plan_prefixes(&cancel).await?;
        debug!(?prefixes, mode = ?self.config.mode, "transfer plan ready");

        if self.config.preflight.mode > PreflightMode::PlanOnly {
            let first_prefix = prefixes.first().map(String::as_str).unwrap_or("");
            let outcome = preflight::check_transfer(
                self.source.as_ref(),
                self.target.as_ref(),
                first_prefix,
                &self.config.preflight,
                self.config.read_only,
            )
            .await;
            self.writer.preflight(&outcome.record)?;
            if let Some(err) = outcome.first_error {
                return self
                    .finish(started, prefixes, Arc::new(Counters::default()), Some(err))
                    .await;
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
        // Listing keeps its own pool size, independent of the transfer
        // workers it feeds.
        for worker in 0..self.config.sharding.list_concurrency.max(1) {
            tasks.spawn(lister(
                worker,
                self.source.clone(),
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
            self.source.clone(),
            self.matcher.clone(),
            self.filter.clone(),
            list_rx,
            work_tx,
            self.writer.clone(),
            counters.clone(),
            job_cancel.clone(),
        ));

        let worker_ctx = Arc::new(WorkerCtx {
            source: self.source.clone(),
            target: self.target.clone(),
            writer: self.writer.clone(),
            counters: counters.clone(),
            template: self.template.clone(),
            mode: self.config.mode,
            on_exists: self.config.on_exists,
            dedup_enabled: self.config.dedup.enabled,
            dedup_strategy: self.config.dedup.strategy,
            max_memory: self.config.retry_buffer_max_memory_bytes,
            progress_every: self.config.progress_every,
            matched: AtomicU64::new(0),
        });
        for _ in 0..self.config.concurrency {
            let ctx = worker_ctx.clone();
            let work_rx = work_rx.clone();
            let fatal_tx = fatal_tx.clone();
            let job_cancel = job_cancel.clone();
            tasks.spawn(async move {
                loop {
                    let token = tokio::select! {
                        _ = job_cancel.cancelled() => break,
                        received = work_rx.recv() => match received {
                            Ok(token) => token,
                            Err(_) => break,
                        },
                    };
                    if let Err(fatal) = ctx.transfer_one(token).await {
                        let _ = fatal_tx.try_send(fatal);
                        job_cancel.cancel();
                        break;
                    }
                }
            });
        }
        drop(work_rx);
        drop(fatal_tx);

        while tasks.join_next().await.is_some() {}

        let failure = match fatal_rx.try_recv() {
            Ok(err) => Some(err),
            Err(_) if cancel.is_cancelled() => Some(Error::Cancelled),
            Err(_) => None,
        };
        self.finish(started, prefixes, counters, failure).await
    }

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
            match shard::discover(self.source.as_ref(), prefix, &self.config.sharding).await {
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
        counters: Arc<Counters>,
        failure: Option<Error>,
    ) -> Result<JobSummary> {
        if let Some(err) = &failure {
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
        let emitted = self.writer.summary(&summary.to_record(true));
        match failure {
            Some(err) => Err(err),
            None => {
                emitted?;
                Ok(summary)
            }
        }
    }
}

struct WorkerCtx {
    source: Arc<dyn crate::provider::Provider>,
    target: Arc<dyn crate::provider::Provider>,
    writer: Arc<dyn Writer>,
    counters: Arc<Counters>,
    template: Option<PathTemplate>,
    mode: TransferMode,
    on_exists: OnExists,
    dedup_enabled: bool,
    dedup_strategy: DedupStrategy,
    max_memory: u64,
    progress_every: u64,
    matched: AtomicU64,
}

impl WorkerCtx {
    /// Process one matched object. Per-object failures become error
    /// records; only a dead output sink is fatal.
    async fn transfer_one(&self, token: PipelineToken) -> Result<()> {
        self.counters.count(Counter::ObjectsMatched, 1);
        self.counters.count(Counter::BytesTotal, token.summary.size);
        let matched = self.matched.fetch_add(1, Ordering::Relaxed) + 1;
        if matched % self.progress_every == 0 {
            let _ = self.writer.progress(&ProgressRecord {
                phase: Phase::Listing,
                objects_found: self.counters.get(Counter::ObjectsListed),
                objects_matched: self.counters.get(Counter::ObjectsMatched),
                bytes_total: self.counters.get(Counter::BytesTotal),
                prefix: None,
            });
        }

        let source_key = token.summary.key.clone();
        let target_key = match &self.template {
            Some(template) => match template.apply(&source_key) {
                Ok(key) => key,
                Err(err) => {
                    return self.object_error(&source_key, &token.prefix, &err);
                }
            },
            None => source_key.clone(),
        };

        // Existence check, skipped entirely for overwrite.
        if self.on_exists != OnExists::Overwrite {
            match self.target.head(&target_key).await {
                Ok(existing) => {
                    let copy_over = self.handle_existing(
                        &source_key,
                        &target_key,
                        &token,
                        &existing.summary.etag,
                    )?;
                    if !copy_over {
                        return Ok(());
                    }
                    // Dedup by etag found a stale copy: replace it.
                }
                Err(err) if err.is_not_found() => {}
                Err(err) => {
                    return self.object_error(&source_key, &token.prefix, &err.into());
                }
            }
        }

        self.copy_object(&source_key, &target_key, &token).await
    }

    /// Decide what to do about an existing destination object. Returns
    /// true when the object must still be copied: dedup by etag treats a
    /// differing etag as stale, not as a duplicate.
    fn handle_existing(
        &self,
        source_key: &str,
        target_key: &str,
        token: &PipelineToken,
        target_etag: &str,
    ) -> Result<bool> {
        if self.on_exists == OnExists::Fail {
            self.counters.count(Counter::Errors, 1);
            self.writer.error(&ErrorRecord {
                code: ErrorCode::Internal,
                message: format!("destination {target_key:?} already exists"),
                key: Some(source_key.to_owned()),
                prefix: Some(token.prefix.clone()),
                details: None,
            })?;
            return Ok(false);
        }
        // on_exists = skip
        let reason = if self.dedup_enabled && self.dedup_strategy == DedupStrategy::Etag {
            if token.summary.etag != target_etag {
                return Ok(true);
            }
            SkipReason::DedupEtag
        } else if self.dedup_enabled && self.dedup_strategy == DedupStrategy::Key {
            SkipReason::DedupKey
        } else {
            SkipReason::OnExistsSkip
        };
        trace!(source_key, target_key, ?reason, "skipping");
        self.counters.count(Counter::ObjectsSkipped, 1);
        self.writer.skip(&SkipRecord {
            source_key: source_key.to_owned(),
            target_key: target_key.to_owned(),
            reason,
        })?;
        Ok(false)
    }

    async fn copy_object(
        &self,
        source_key: &str,
        target_key: &str,
        token: &PipelineToken,
    ) -> Result<()> {
        // Capabilities were checked at construction.
        let getter = self.source.as_getter().expect("source can read");
        let putter = self.target.as_putter().expect("target can write");

        let mut body = match getter.get_object(source_key).await {
            Ok(body) => body,
            Err(err) => return self.object_error(source_key, &token.prefix, &err.into()),
        };
        if body.content_length != token.summary.size {
            // A stale listing: report and move on without writing.
            let err = Error::SizeMismatch {
                key: source_key.to_owned(),
                listed: token.summary.size,
                actual: body.content_length,
            };
            return self.object_error(source_key, &token.prefix, &err);
        }

        let retry_body = match RetryBody::spool(&mut body.reader, self.max_memory).await {
            Ok(retry_body) => retry_body,
            Err(err) => return self.object_error(source_key, &token.prefix, &err),
        };

        if let Err(err) = putter
            .put_object(target_key, retry_body.as_put_body(), retry_body.size())
            .await
        {
            return self.object_error(source_key, &token.prefix, &err.into());
        }
        drop(retry_body);

        self.counters.count(Counter::ObjectsTransferred, 1);
        self.counters
            .count(Counter::BytesTransferred, token.summary.size);
        self.writer.transfer(&TransferRecord {
            source_key: source_key.to_owned(),
            target_key: target_key.to_owned(),
            bytes: token.summary.size,
        })?;

        if self.mode == TransferMode::Move {
            let deleter = self.source.as_deleter().expect("source can delete");
            if let Err(err) = deleter.delete_object(source_key).await {
                // The transfer record stands; the leftover source object
                // is reported.
                warn!(source_key, %err, "move: source delete failed");
                return self.object_error(source_key, &token.prefix, &err.into());
            }
            self.counters.count(Counter::ObjectsDeleted, 1);
        }
        Ok(())
    }

    /// Emit a per-object error record. Only a sink failure propagates.
    fn object_error(&self, key: &str, prefix: &str, err: &Error) -> Result<()> {
        warn!(key, %err, "transfer error");
        self.counters.count(Counter::Errors, 1);
        self.writer.error(&ErrorRecord {
            code: err.code(),
            message: err.to_string(),
            key: Some(key.to_owned()),
            prefix: Some(prefix.to_owned()),
            details: None,
        })?;
        Ok(())
    }
}
