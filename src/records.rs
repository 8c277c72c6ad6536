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

//! The typed records that make up the JSONL event stream.
//!
//! Every line on the wire is an [Envelope] whose `type` tag names the
//! payload and its version, e.g. `object.v1`. Optional payload fields are
//! omitted from the JSON entirely when unset.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::errors::ErrorCode;

/// The envelope wrapped around every emitted record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Versioned record tag, e.g. `object.v1` or `stream.chunk.v1`.
    #[serde(rename = "type")]
    pub record_type: String,
    #[serde(with = "time::serde::rfc3339")]
    pub ts: OffsetDateTime,
    pub job_id: String,
    pub provider: String,
    pub data: serde_json::Value,
}

/// A record payload that can be wrapped in an [Envelope].
pub trait Payload: Serialize {
    /// Versioned type tag for the envelope.
    const TYPE: &'static str;
}

/// One matched object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ObjectRecord {
    pub key: String,
    pub size: u64,
    pub etag: String,
    #[serde(with = "time::serde::rfc3339")]
    pub last_modified: OffsetDateTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, String>>,
}

impl Payload for ObjectRecord {
    const TYPE: &'static str = "object.v1";
}

/// One reportable failure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorRecord {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl Payload for ErrorRecord {
    const TYPE: &'static str = "error.v1";
}

/// Job phase carried in progress records.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Starting,
    Listing,
    Complete,
}

/// Periodic progress snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProgressRecord {
    pub phase: Phase,
    pub objects_found: u64,
    pub objects_matched: u64,
    pub bytes_total: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

impl Payload for ProgressRecord {
    const TYPE: &'static str = "progress.v1";
}

/// Final per-job accounting; always the last record of a job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SummaryRecord {
    pub objects_listed: u64,
    pub objects_matched: u64,
    pub bytes_total: u64,
    pub errors: u64,
    /// Wall-clock duration in seconds.
    pub duration: f64,
    pub duration_human: String,
    pub prefixes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub objects_transferred: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes_transferred: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub objects_skipped: Option<u64>,
}

impl Payload for SummaryRecord {
    const TYPE: &'static str = "summary.v1";
}

/// Outcome of one capability probe.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PreflightCheckResult {
    pub capability: String,
    pub allowed: bool,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Result of a staged preflight run. Emitted even when probes fail.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PreflightRecord {
    pub mode: String,
    pub probe_strategy: String,
    pub probe_prefix: String,
    pub results: Vec<PreflightCheckResult>,
}

impl Payload for PreflightRecord {
    const TYPE: &'static str = "preflight.v1";
}

/// One successful copy or move.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransferRecord {
    pub source_key: String,
    pub target_key: String,
    pub bytes: u64,
}

impl Payload for TransferRecord {
    const TYPE: &'static str = "transfer.v1";
}

/// Why a matched object was not transferred.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub enum SkipReason {
    #[serde(rename = "dedup.etag")]
    DedupEtag,
    #[serde(rename = "dedup.key")]
    DedupKey,
    #[serde(rename = "on_exists.skip")]
    OnExistsSkip,
}

/// One deliberately skipped object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SkipRecord {
    pub source_key: String,
    pub target_key: String,
    pub reason: SkipReason,
}

impl Payload for SkipRecord {
    const TYPE: &'static str = "skip.v1";
}

/// Start of a content stream session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StreamOpen {
    pub stream_id: String,
    pub uri: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub last_modified: Option<OffsetDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Byte range as `start-end` when this stream carries a partial body.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range: Option<String>,
}

impl Payload for StreamOpen {
    const TYPE: &'static str = "stream.open.v1";
}

/// Header preceding exactly `nbytes` raw bytes on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StreamChunk {
    pub stream_id: String,
    /// Monotonic chunk sequence number, starting at 0.
    pub seq: u64,
    pub nbytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
}

impl Payload for StreamChunk {
    const TYPE: &'static str = "stream.chunk.v1";
}

/// Terminal status of a stream session.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamStatus {
    Success,
    Error,
    Cancelled,
}

/// End of a content stream session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StreamClose {
    pub stream_id: String,
    pub status: StreamStatus,
    /// Number of chunk records emitted for this stream.
    pub chunks: u64,
    /// Total payload bytes across all chunks.
    pub bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ns: Option<u64>,
}

impl Payload for StreamClose {
    const TYPE: &'static str = "stream.close.v1";
}
