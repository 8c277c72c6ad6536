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

//! The configuration surface consumed by the core.
//!
//! Values arrive from CLI flags or a JSON job file; schema-level
//! validation of manifests lives outside this crate. Construction-time
//! checks here are the hard floor: bad values never reach a pipeline.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};

/// Environment variable that forces the read-only latch on.
pub const READ_ONLY_ENV: &str = "GONIMBUS_READ_ONLY";

/// Whether provider-mutating operations are forbidden.
///
/// The latch is the union of the configured bit and the environment
/// variable, so an operator can impose it on any invocation.
pub fn read_only_latch(configured: bool) -> bool {
    configured
        || std::env::var(READ_ONLY_ENV)
            .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
            .unwrap_or(false)
}

/// Connection settings for a provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Provider tag; only `"s3"` is built in.
    pub provider: String,
    pub bucket: String,
    pub region: Option<String>,
    /// Custom endpoint for S3-compatible services.
    pub endpoint: Option<String>,
    /// Shared credentials profile name.
    pub profile: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub force_path_style: bool,
    /// Page size for list calls; clamped to the provider's range.
    pub max_keys: Option<i32>,
}

/// Include/exclude pattern configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    pub includes: Vec<String>,
    pub excludes: Vec<String>,
    pub include_hidden: bool,
}

impl Default for MatchConfig {
    fn default() -> Self {
        MatchConfig {
            includes: vec!["**".to_owned()],
            excludes: Vec::new(),
            include_hidden: false,
        }
    }
}

/// Optional post-list filters, uncompiled.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterSpec {
    pub size: Option<SizeRangeSpec>,
    pub modified: Option<ModifiedRangeSpec>,
    pub key_regex: Option<String>,
    pub content_type: Option<String>,
}

impl FilterSpec {
    pub fn is_empty(&self) -> bool {
        self.size.is_none()
            && self.modified.is_none()
            && self.key_regex.is_none()
            && self.content_type.is_none()
    }
}

/// Inclusive size bounds with SI/IEC units, e.g. `"1KB"`, `"2MiB"`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SizeRangeSpec {
    pub min: Option<String>,
    pub max: Option<String>,
}

/// Exclusive modification bounds: ISO-8601 dates (start of day UTC) or
/// RFC 3339 timestamps.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModifiedRangeSpec {
    pub after: Option<String>,
    pub before: Option<String>,
}

/// Preflight depth. Each mode performs all checks of the modes below it.
#[derive(
    Debug, Clone, Copy, Default, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize,
)]
pub enum PreflightMode {
    #[default]
    #[serde(rename = "plan-only")]
    PlanOnly,
    #[serde(rename = "read-safe")]
    ReadSafe,
    #[serde(rename = "write-probe")]
    WriteProbe,
}

impl fmt::Display for PreflightMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PreflightMode::PlanOnly => "plan-only",
            PreflightMode::ReadSafe => "read-safe",
            PreflightMode::WriteProbe => "write-probe",
        };
        f.write_str(s)
    }
}

/// How a write probe is performed.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Serialize, Deserialize)]
pub enum ProbeStrategy {
    /// Create then immediately abort a multipart upload; nothing is
    /// materialized. Preferred.
    #[default]
    #[serde(rename = "multipart")]
    Multipart,
    /// Put a zero-byte object then delete it.
    #[serde(rename = "put-delete")]
    PutDelete,
}

impl fmt::Display for ProbeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProbeStrategy::Multipart => "multipart",
            ProbeStrategy::PutDelete => "put-delete",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreflightConfig {
    pub mode: PreflightMode,
    pub probe_strategy: ProbeStrategy,
    /// All write probes happen under this prefix.
    pub probe_prefix: String,
    /// Also probe source read permission with a random key.
    pub probe_source_read: bool,
    /// Also probe target head permission with a random key.
    pub probe_target_head: bool,
}

impl Default for PreflightConfig {
    fn default() -> Self {
        PreflightConfig {
            mode: PreflightMode::PlanOnly,
            probe_strategy: ProbeStrategy::Multipart,
            probe_prefix: "_gonimbus/probe/".to_owned(),
            probe_source_read: false,
            probe_target_head: false,
        }
    }
}

/// Settings for a crawl job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlConfig {
    /// Concurrent listing workers, 1 to 64.
    pub concurrency: usize,
    /// Capacity of the bounded queues between stages.
    pub channel_buffer: usize,
    /// Outbound list calls per second; 0 means unlimited.
    pub rate_limit: u32,
    /// Emit a progress record every this many admitted objects.
    pub progress_every: u64,
    pub preflight: PreflightConfig,
    pub sharding: ShardingConfig,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        CrawlConfig {
            concurrency: 4,
            channel_buffer: 1000,
            rate_limit: 0,
            progress_every: 1000,
            preflight: PreflightConfig::default(),
            sharding: ShardingConfig::default(),
        }
    }
}

impl CrawlConfig {
    pub fn validate(&self) -> Result<()> {
        if !(1..=64).contains(&self.concurrency) {
            return Err(Error::InvalidConfiguration {
                reason: format!("concurrency must be 1-64, got {}", self.concurrency),
            });
        }
        if self.channel_buffer == 0 {
            return Err(Error::InvalidConfiguration {
                reason: "channel_buffer must be at least 1".to_owned(),
            });
        }
        if self.progress_every == 0 {
            return Err(Error::InvalidConfiguration {
                reason: "progress_every must be at least 1".to_owned(),
            });
        }
        self.sharding.validate()
    }
}

/// Delimiter-based prefix expansion settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShardingConfig {
    pub enabled: bool,
    /// Levels of common-prefix expansion.
    pub depth: usize,
    /// Hard cap on the number of shard prefixes.
    pub max_shards: usize,
    /// Concurrent delimiter list calls during discovery, and the size of
    /// the listing worker pool during transfer.
    pub list_concurrency: usize,
    pub delimiter: String,
}

impl Default for ShardingConfig {
    fn default() -> Self {
        ShardingConfig {
            enabled: false,
            depth: 1,
            max_shards: 64,
            list_concurrency: 4,
            delimiter: "/".to_owned(),
        }
    }
}

impl ShardingConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        if self.depth == 0 || self.max_shards == 0 || self.list_concurrency == 0 {
            return Err(Error::InvalidConfiguration {
                reason: "sharding depth, max_shards, and list_concurrency must be positive"
                    .to_owned(),
            });
        }
        if self.delimiter.is_empty() {
            return Err(Error::InvalidConfiguration {
                reason: "sharding delimiter must not be empty".to_owned(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferMode {
    #[default]
    Copy,
    /// Copy, then delete the source on success.
    Move,
}

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnExists {
    #[default]
    Skip,
    Overwrite,
    Fail,
}

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DedupStrategy {
    #[default]
    Etag,
    Key,
    None,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    pub enabled: bool,
    pub strategy: DedupStrategy,
}

/// Settings for a transfer job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    pub mode: TransferMode,
    /// Concurrent transfer workers, 1 to 64.
    pub concurrency: usize,
    pub on_exists: OnExists,
    pub dedup: DedupConfig,
    /// Destination key template with `{filename}`, `{dir[n]}`, `{key}`.
    pub path_template: Option<String>,
    pub preflight: PreflightConfig,
    pub sharding: ShardingConfig,
    /// Bodies up to this size are buffered in memory; larger ones spool
    /// to a temp file.
    pub retry_buffer_max_memory_bytes: u64,
    pub channel_buffer: usize,
    pub progress_every: u64,
    pub rate_limit: u32,
    /// The read-only safety latch (see [read_only_latch]).
    pub read_only: bool,
}

impl Default for TransferConfig {
    fn default() -> Self {
        TransferConfig {
            mode: TransferMode::Copy,
            concurrency: 4,
            on_exists: OnExists::Skip,
            dedup: DedupConfig::default(),
            path_template: None,
            preflight: PreflightConfig::default(),
            sharding: ShardingConfig::default(),
            retry_buffer_max_memory_bytes: 8 * 1024 * 1024,
            channel_buffer: 1000,
            progress_every: 1000,
            rate_limit: 0,
            read_only: false,
        }
    }
}

impl TransferConfig {
    pub fn validate(&self) -> Result<()> {
        if !(1..=64).contains(&self.concurrency) {
            return Err(Error::InvalidConfiguration {
                reason: format!("concurrency must be 1-64, got {}", self.concurrency),
            });
        }
        if self.channel_buffer == 0 {
            return Err(Error::InvalidConfiguration {
                reason: "channel_buffer must be at least 1".to_owned(),
            });
        }
        if self.progress_every == 0 {
            return Err(Error::InvalidConfiguration {
                reason: "progress_every must be at least 1".to_owned(),
            });
        }
        self.sharding.validate()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn preflight_modes_are_totally_ordered() {
        assert!(PreflightMode::PlanOnly < PreflightMode::ReadSafe);
        assert!(PreflightMode::ReadSafe < PreflightMode::WriteProbe);
    }

    #[test]
    fn mode_names_on_the_wire() {
        assert_eq!(
            serde_json::to_string(&PreflightMode::WriteProbe).unwrap(),
            "\"write-probe\""
        );
        let m: PreflightMode = serde_json::from_str("\"read-safe\"").unwrap();
        assert_eq!(m, PreflightMode::ReadSafe);
    }

    #[test]
    fn crawl_concurrency_bounds() {
        let mut config = CrawlConfig::default();
        config.concurrency = 0;
        assert!(config.validate().is_err());
        config.concurrency = 65;
        assert!(config.validate().is_err());
        config.concurrency = 64;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn sharding_validation_only_when_enabled() {
        let mut config = ShardingConfig {
            depth: 0,
            ..ShardingConfig::default()
        };
        assert!(config.validate().is_ok());
        config.enabled = true;
        assert!(config.validate().is_err());
    }

    #[test]
    fn transfer_progress_cadence_must_be_positive() {
        let config = TransferConfig {
            progress_every: 0,
            ..TransferConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn transfer_config_deserializes_with_defaults() {
        let config: TransferConfig =
            serde_json::from_str(r#"{"mode": "move", "on_exists": "fail"}"#).unwrap();
        assert_eq!(config.mode, TransferMode::Move);
        assert_eq!(config.on_exists, OnExists::Fail);
        assert_eq!(config.concurrency, 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn latch_honors_configured_bit() {
        assert!(read_only_latch(true));
    }
}
