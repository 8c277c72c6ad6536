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

//! Command-line entry point for Gonimbus.
//!
//! Records go to stdout (or `--output`); diagnostics go to stderr, so
//! the event stream stays machine-readable.

use std::fs::File;
use std::io::{self, Cursor, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{ArgAction, Parser, Subcommand};
use rand::distributions::Alphanumeric;
use rand::Rng;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use gonimbus::config::{
    ConnectionConfig, CrawlConfig, DedupConfig, DedupStrategy, FilterSpec, MatchConfig,
    ModifiedRangeSpec, OnExists, PreflightConfig, PreflightMode, ProbeStrategy, ShardingConfig,
    SizeRangeSpec, TransferConfig, TransferMode,
};
use gonimbus::provider::s3::S3Provider;
use gonimbus::provider::Provider;
use gonimbus::records::{StreamChunk, StreamClose, StreamOpen, StreamStatus};
use gonimbus::stream::StreamWriter;
use gonimbus::{
    CompiledFilter, Crawler, Error, GlobMatcher, JsonlWriter, ObjectUri, Transferrer, Writer,
};

#[derive(Debug, Parser)]
#[command(
    name = "gonimbus",
    about = "Structured crawl, inspection, and transfer for object storage",
    version = gonimbus::version()
)]
struct Args {
    /// Write the record stream to a file instead of stdout.
    #[arg(long, global = true)]
    output: Option<PathBuf>,

    /// Be more verbose on stderr; repeat for more detail.
    #[arg(short = 'v', global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Parser)]
struct ProviderFlags {
    #[arg(long)]
    region: Option<String>,

    /// Custom endpoint for S3-compatible services.
    #[arg(long)]
    endpoint: Option<String>,

    /// Shared credentials profile.
    #[arg(long)]
    profile: Option<String>,

    #[arg(long)]
    force_path_style: bool,

    /// Page size for list calls (1-1000).
    #[arg(long)]
    max_keys: Option<i32>,
}

impl ProviderFlags {
    fn connection(&self, uri: &ObjectUri) -> ConnectionConfig {
        ConnectionConfig {
            provider: uri.provider.clone(),
            bucket: uri.bucket.clone(),
            region: self.region.clone(),
            endpoint: self.endpoint.clone(),
            profile: self.profile.clone(),
            access_key_id: None,
            secret_access_key: None,
            force_path_style: self.force_path_style,
            max_keys: self.max_keys,
        }
    }
}

#[derive(Debug, Parser)]
struct MatchFlags {
    /// Extra include patterns in addition to the source pattern.
    #[arg(long = "include")]
    includes: Vec<String>,

    /// Exclude patterns.
    #[arg(long = "exclude")]
    excludes: Vec<String>,

    /// Also match keys with dot-segments.
    #[arg(long)]
    include_hidden: bool,
}

#[derive(Debug, Parser)]
struct FilterFlags {
    /// Minimum object size, e.g. 1KB or 5MiB.
    #[arg(long)]
    size_min: Option<String>,

    #[arg(long)]
    size_max: Option<String>,

    /// Only objects modified strictly after this date or timestamp.
    #[arg(long)]
    modified_after: Option<String>,

    #[arg(long)]
    modified_before: Option<String>,

    /// Regex applied to the full key.
    #[arg(long)]
    key_regex: Option<String>,

    /// Exact content type; implies a head per candidate object.
    #[arg(long)]
    content_type: Option<String>,
}

impl FilterFlags {
    fn spec(&self) -> FilterSpec {
        let size = (self.size_min.is_some() || self.size_max.is_some()).then(|| SizeRangeSpec {
            min: self.size_min.clone(),
            max: self.size_max.clone(),
        });
        let modified = (self.modified_after.is_some() || self.modified_before.is_some()).then(
            || ModifiedRangeSpec {
                after: self.modified_after.clone(),
                before: self.modified_before.clone(),
            },
        );
        FilterSpec {
            size,
            modified,
            key_regex: self.key_regex.clone(),
            content_type: self.content_type.clone(),
        }
    }
}

#[derive(Debug, Parser)]
struct ShardFlags {
    /// Expand prefixes by delimiter listing before crawling.
    #[arg(long)]
    shard: bool,

    #[arg(long, default_value_t = 1)]
    shard_depth: usize,

    #[arg(long, default_value_t = 64)]
    max_shards: usize,

    #[arg(long, default_value_t = 4)]
    list_concurrency: usize,
}

impl ShardFlags {
    fn config(&self) -> ShardingConfig {
        ShardingConfig {
            enabled: self.shard,
            depth: self.shard_depth,
            max_shards: self.max_shards,
            list_concurrency: self.list_concurrency,
            delimiter: "/".to_owned(),
        }
    }
}

#[derive(Debug, Parser)]
struct PreflightFlags {
    /// Preflight depth before the job runs.
    #[arg(id = "preflight_mode", long = "preflight", value_enum, default_value = "plan-only")]
    mode: PreflightModeArg,

    #[arg(long, value_enum, default_value = "multipart")]
    probe_strategy: ProbeStrategyArg,

    #[arg(long, default_value = "_gonimbus/probe/")]
    probe_prefix: String,

    /// Also probe source read permission with a random key.
    #[arg(long)]
    probe_source_read: bool,

    /// Also probe target head permission with a random key.
    #[arg(long)]
    probe_target_head: bool,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum PreflightModeArg {
    PlanOnly,
    ReadSafe,
    WriteProbe,
}

impl From<PreflightModeArg> for PreflightMode {
    fn from(arg: PreflightModeArg) -> Self {
        match arg {
            PreflightModeArg::PlanOnly => PreflightMode::PlanOnly,
            PreflightModeArg::ReadSafe => PreflightMode::ReadSafe,
            PreflightModeArg::WriteProbe => PreflightMode::WriteProbe,
        }
    }
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum ProbeStrategyArg {
    Multipart,
    PutDelete,
}

impl From<ProbeStrategyArg> for ProbeStrategy {
    fn from(arg: ProbeStrategyArg) -> Self {
        match arg {
            ProbeStrategyArg::Multipart => ProbeStrategy::Multipart,
            ProbeStrategyArg::PutDelete => ProbeStrategy::PutDelete,
        }
    }
}

impl PreflightFlags {
    fn config(&self) -> PreflightConfig {
        PreflightConfig {
            mode: self.mode.into(),
            probe_strategy: self.probe_strategy.into(),
            probe_prefix: self.probe_prefix.clone(),
            probe_source_read: self.probe_source_read,
            probe_target_head: self.probe_target_head,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Enumerate matching objects and emit object records.
    Crawl {
        /// Source: s3://bucket/prefix-or-pattern
        source: String,

        #[command(flatten)]
        provider: ProviderFlags,

        #[command(flatten)]
        matching: MatchFlags,

        #[command(flatten)]
        filters: FilterFlags,

        #[command(flatten)]
        sharding: ShardFlags,

        #[command(flatten)]
        preflight: PreflightFlags,

        /// Concurrent listing workers (1-64).
        #[arg(long, default_value_t = 4)]
        concurrency: usize,

        /// Outbound list calls per second; 0 is unlimited.
        #[arg(long, default_value_t = 0)]
        rate_limit: u32,

        #[arg(long, default_value_t = 1000)]
        progress_every: u64,

        /// Exit non-zero if any error record was emitted.
        #[arg(long)]
        strict: bool,
    },

    /// Copy or move matching objects to a target.
    Transfer {
        /// Source: s3://bucket/prefix-or-pattern
        source: String,

        /// Target: s3://bucket/prefix
        target: String,

        #[command(flatten)]
        provider: ProviderFlags,

        #[command(flatten)]
        matching: MatchFlags,

        #[command(flatten)]
        filters: FilterFlags,

        #[command(flatten)]
        sharding: ShardFlags,

        #[command(flatten)]
        preflight: PreflightFlags,

        #[arg(long, value_enum, default_value = "copy")]
        mode: TransferModeArg,

        #[arg(long, value_enum, default_value = "skip")]
        on_exists: OnExistsArg,

        /// Dedup strategy applied when the destination exists.
        #[arg(long, value_enum, default_value = "none")]
        dedup: DedupArg,

        /// Destination template: {filename}, {dir[n]}, {key}.
        #[arg(long)]
        path_template: Option<String>,

        /// Concurrent transfer workers (1-64).
        #[arg(long, default_value_t = 4)]
        concurrency: usize,

        /// Refuse all provider-mutating operations.
        #[arg(long)]
        read_only: bool,

        #[arg(long)]
        strict: bool,
    },

    /// Probe provider capabilities without running a job.
    Preflight {
        /// Source: s3://bucket/prefix
        source: String,

        /// Optional transfer target to probe as well.
        #[arg(long)]
        target: Option<String>,

        #[command(flatten)]
        provider: ProviderFlags,

        #[command(flatten)]
        preflight: PreflightFlags,

        #[arg(long)]
        read_only: bool,
    },

    /// Stream matching object bodies as a mixed-framing stream.
    Stream {
        /// Source: s3://bucket/prefix-or-pattern
        source: String,

        #[command(flatten)]
        provider: ProviderFlags,

        #[command(flatten)]
        matching: MatchFlags,

        /// Raw chunk size in bytes.
        #[arg(long, default_value_t = 1024 * 1024)]
        chunk_size: u64,
    },
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum TransferModeArg {
    Copy,
    Move,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum OnExistsArg {
    Skip,
    Overwrite,
    Fail,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum DedupArg {
    None,
    Etag,
    Key,
}

const EXIT_INVALID: u8 = 1;
const EXIT_EXTERNAL: u8 = 2;
const EXIT_CANCELLED: u8 = 3;

fn exit_code_for(err: &Error) -> u8 {
    match err {
        Error::Cancelled => EXIT_CANCELLED,
        Error::InvalidConfiguration { .. }
        | Error::Pattern { .. }
        | Error::Filter { .. }
        | Error::Template { .. }
        | Error::Uri { .. }
        | Error::ReadOnly { .. }
        | Error::MissingCapability { .. } => EXIT_INVALID,
        _ => EXIT_EXTERNAL,
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_env("GONIMBUS_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn new_job_id() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(12)
        .map(|b| (b as char).to_ascii_lowercase())
        .collect();
    format!("job-{suffix}")
}

fn open_sink(output: &Option<PathBuf>) -> io::Result<Box<dyn Write + Send>> {
    match output {
        Some(path) => Ok(Box::new(File::create(path)?)),
        None => Ok(Box::new(io::stdout())),
    }
}

/// Only the S3 provider is wired into the CLI.
fn require_s3(uri: &ObjectUri) -> Result<(), Error> {
    if uri.provider != "s3" {
        return Err(Error::Uri {
            uri: uri.to_string(),
            reason: format!("unsupported provider {:?}", uri.provider),
        });
    }
    Ok(())
}

/// Turn a URI path into the effective include set.
fn includes_for(uri: &ObjectUri, extra: &[String]) -> Vec<String> {
    let mut includes = Vec::new();
    if uri.is_pattern() {
        includes.push(uri.path.clone());
    } else if uri.is_prefix() {
        includes.push(format!("{}**", uri.path));
    } else {
        includes.push(uri.path.clone());
    }
    includes.extend_from_slice(extra);
    includes
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            error!("interrupted, cancelling");
            token.cancel();
        }
    });
    cancel
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.verbose);
    match run(args).await {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            error!("{err:#}");
            let mut source = std::error::Error::source(&err);
            while let Some(cause) = source {
                error!("  caused by: {cause}");
                source = cause.source();
            }
            ExitCode::from(exit_code_for(&err))
        }
    }
}

async fn run(args: Args) -> Result<u8, Error> {
    match args.command {
        Command::Crawl {
            source,
            provider,
            matching,
            filters,
            sharding,
            preflight,
            concurrency,
            rate_limit,
            progress_every,
            strict,
        } => {
            let uri: ObjectUri = source.parse()?;
            require_s3(&uri)?;
            let match_config = MatchConfig {
                includes: includes_for(&uri, &matching.includes),
                excludes: matching.excludes.clone(),
                include_hidden: matching.include_hidden,
            };
            let matcher = GlobMatcher::new(&match_config)?;
            let filter = CompiledFilter::new(&filters.spec())?;
            let s3 = Arc::new(S3Provider::connect(&provider.connection(&uri)).await?);
            let writer = Arc::new(JsonlWriter::new(
                open_sink(&args.output)?,
                new_job_id(),
                s3.tag(),
            ));
            let config = CrawlConfig {
                concurrency,
                rate_limit,
                progress_every,
                preflight: preflight.config(),
                sharding: sharding.config(),
                ..CrawlConfig::default()
            };
            let crawler = Crawler::new(s3, matcher, filter, writer.clone(), config)?;
            let result = crawler.run(cancel_on_ctrl_c()).await;
            writer.close()?;
            let summary = result?;
            debug!(?summary, "crawl complete");
            if strict && summary.errors > 0 {
                return Ok(EXIT_EXTERNAL);
            }
            Ok(0)
        }

        Command::Transfer {
            source,
            target,
            provider,
            matching,
            filters,
            sharding,
            preflight,
            mode,
            on_exists,
            dedup,
            path_template,
            concurrency,
            read_only,
            strict,
        } => {
            let source_uri: ObjectUri = source.parse()?;
            let target_uri: ObjectUri = target.parse()?;
            require_s3(&source_uri)?;
            require_s3(&target_uri)?;
            if !target_uri.is_prefix() {
                return Err(Error::Uri {
                    uri: target,
                    reason: "transfer target must be a bucket or prefix".to_owned(),
                });
            }
            let match_config = MatchConfig {
                includes: includes_for(&source_uri, &matching.includes),
                excludes: matching.excludes.clone(),
                include_hidden: matching.include_hidden,
            };
            let matcher = GlobMatcher::new(&match_config)?;
            let filter = CompiledFilter::new(&filters.spec())?;
            let src = Arc::new(S3Provider::connect(&provider.connection(&source_uri)).await?);
            let dst = Arc::new(S3Provider::connect(&provider.connection(&target_uri)).await?);
            let writer = Arc::new(JsonlWriter::new(
                open_sink(&args.output)?,
                new_job_id(),
                src.tag(),
            ));
            // A target prefix maps sources under it unless a template
            // says otherwise.
            let template = match (&path_template, target_uri.path.as_str()) {
                (Some(t), _) => Some(t.clone()),
                (None, "") => None,
                (None, prefix) => Some(format!("{prefix}{{key}}")),
            };
            let config = TransferConfig {
                mode: match mode {
                    TransferModeArg::Copy => TransferMode::Copy,
                    TransferModeArg::Move => TransferMode::Move,
                },
                concurrency,
                on_exists: match on_exists {
                    OnExistsArg::Skip => OnExists::Skip,
                    OnExistsArg::Overwrite => OnExists::Overwrite,
                    OnExistsArg::Fail => OnExists::Fail,
                },
                dedup: match dedup {
                    DedupArg::None => DedupConfig::default(),
                    DedupArg::Etag => DedupConfig {
                        enabled: true,
                        strategy: DedupStrategy::Etag,
                    },
                    DedupArg::Key => DedupConfig {
                        enabled: true,
                        strategy: DedupStrategy::Key,
                    },
                },
                path_template: template,
                preflight: preflight.config(),
                sharding: sharding.config(),
                read_only,
                ..TransferConfig::default()
            };
            let transferrer =
                Transferrer::new(src, dst, matcher, filter, writer.clone(), config)?;
            let result = transferrer.run(cancel_on_ctrl_c()).await;
            writer.close()?;
            let summary = result?;
            debug!(?summary, "transfer complete");
            if strict && summary.errors > 0 {
                return Ok(EXIT_EXTERNAL);
            }
            Ok(0)
        }

        Command::Preflight {
            source,
            target,
            provider,
            preflight,
            read_only,
        } => {
            let source_uri: ObjectUri = source.parse()?;
            require_s3(&source_uri)?;
            let src = Arc::new(S3Provider::connect(&provider.connection(&source_uri)).await?);
            let writer = Arc::new(JsonlWriter::new(
                open_sink(&args.output)?,
                new_job_id(),
                src.tag(),
            ));
            let config = preflight.config();
            let outcome = match target {
                Some(target) => {
                    let target_uri: ObjectUri = target.parse()?;
                    let dst =
                        Arc::new(S3Provider::connect(&provider.connection(&target_uri)).await?);
                    gonimbus::preflight::check_transfer(
                        src.as_ref(),
                        dst.as_ref(),
                        &source_uri.path,
                        &config,
                        read_only,
                    )
                    .await
                }
                None => {
                    gonimbus::preflight::check_crawl(
                        src.as_ref(),
                        &source_uri.path,
                        &config,
                        read_only,
                    )
                    .await
                }
            };
            writer.preflight(&outcome.record)?;
            writer.close()?;
            match outcome.first_error {
                Some(err) => Err(err),
                None => Ok(0),
            }
        }

        Command::Stream {
            source,
            provider,
            matching,
            chunk_size,
        } => {
            let uri: ObjectUri = source.parse()?;
            require_s3(&uri)?;
            let match_config = MatchConfig {
                includes: includes_for(&uri, &matching.includes),
                excludes: matching.excludes.clone(),
                include_hidden: matching.include_hidden,
            };
            let matcher = GlobMatcher::new(&match_config)?;
            let s3 = Arc::new(S3Provider::connect(&provider.connection(&uri)).await?);
            let writer = StreamWriter::new(open_sink(&args.output)?, new_job_id(), s3.tag());
            stream_objects(s3, &matcher, &writer, chunk_size, cancel_on_ctrl_c()).await?;
            Ok(0)
        }
    }
}

/// Enumerate matching objects and emit each body as one stream session.
async fn stream_objects(
    provider: Arc<S3Provider>,
    matcher: &GlobMatcher,
    writer: &StreamWriter<Box<dyn Write + Send>>,
    chunk_size: u64,
    cancel: CancellationToken,
) -> Result<(), Error> {
    let getter = provider.as_getter().ok_or(Error::MissingCapability {
        capability: "ObjectGetter",
        provider: provider.tag().to_owned(),
    })?;
    let mut stream_seq = 0u64;
    for prefix in matcher.prefixes() {
        let mut continuation = None;
        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let page = provider
                .list(gonimbus::provider::ListOpts {
                    prefix: prefix.clone(),
                    continuation: continuation.clone(),
                    max_keys: None,
                })
                .await?;
            for summary in page.objects {
                if !matcher.matches(&summary.key) {
                    continue;
                }
                let stream_id = format!("st-{stream_seq}");
                stream_seq += 1;
                stream_one(
                    &provider, getter, writer, &stream_id, &summary, chunk_size, &cancel,
                )
                .await?;
            }
            if !page.is_truncated {
                break;
            }
            continuation = page.next_continuation;
        }
    }
    Ok(())
}

async fn stream_one(
    provider: &Arc<S3Provider>,
    getter: &dyn gonimbus::provider::ObjectGetter,
    writer: &StreamWriter<Box<dyn Write + Send>>,
    stream_id: &str,
    summary: &gonimbus::provider::ObjectSummary,
    chunk_size: u64,
    cancel: &CancellationToken,
) -> Result<(), Error> {
    let started = std::time::Instant::now();
    let mut body = getter.get_object(&summary.key).await?;
    writer.write_open(&StreamOpen {
        stream_id: stream_id.to_owned(),
        uri: format!("{}://{}/{}", provider.tag(), provider.bucket(), summary.key),
        size: Some(body.content_length),
        etag: Some(summary.etag.clone()),
        last_modified: Some(summary.last_modified),
        content_type: None,
        range: None,
    })?;

    let mut seq = 0u64;
    let mut offset = 0u64;
    let mut status = StreamStatus::Success;
    let mut buf = vec![0u8; chunk_size as usize];
    loop {
        if cancel.is_cancelled() {
            status = StreamStatus::Cancelled;
            break;
        }
        let mut filled = 0;
        // Fill the whole chunk unless the body ends first.
        while filled < buf.len() {
            let n = body.reader.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        if filled == 0 {
            break;
        }
        writer.write_chunk(
            &StreamChunk {
                stream_id: stream_id.to_owned(),
                seq,
                nbytes: filled as u64,
                offset: Some(offset),
            },
            &mut Cursor::new(&buf[..filled]),
        )?;
        seq += 1;
        offset += filled as u64;
    }

    writer.write_close(&StreamClose {
        stream_id: stream_id.to_owned(),
        status,
        chunks: seq,
        bytes: offset,
        duration_ns: Some(started.elapsed().as_nanos() as u64),
    })?;
    Ok(())
}
