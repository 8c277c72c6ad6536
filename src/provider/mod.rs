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

//! Abstraction over an object store.
//!
//! The required [Provider] contract is deliberately small: paginated
//! listing, a metadata head, and close. Everything richer is an optional
//! capability surfaced through `as_*` accessors, so call sites can
//! feature-detect what a concrete store supports.
//!
//! All providers must be `Send + Sync`; workers share one provider
//! read-only. A provider owns its network connections; the core never
//! closes a provider it did not construct.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::io::AsyncRead;

pub mod memory;
pub mod s3;

/// One object as returned by a list operation.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ObjectSummary {
    /// Full key within the bucket. Never empty for a listed object.
    pub key: String,
    /// Size in bytes.
    pub size: u64,
    /// Opaque content identifier, with surrounding quotes stripped.
    pub etag: String,
    /// Modification instant, UTC.
    pub last_modified: OffsetDateTime,
}

/// Summary plus the headers only a `head` returns.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ObjectMeta {
    pub summary: ObjectSummary,
    pub content_type: Option<String>,
    /// User metadata; keys are case-preserving and unique.
    pub metadata: BTreeMap<String, String>,
}

/// Options for one page of listing.
#[derive(Debug, Clone, Default)]
pub struct ListOpts {
    pub prefix: String,
    pub continuation: Option<String>,
    /// Requested page size; clamped to the provider's allowed range.
    pub max_keys: Option<i32>,
}

/// One page of list results, in the provider's native order.
#[derive(Debug, Default)]
pub struct ListPage {
    pub objects: Vec<ObjectSummary>,
    pub is_truncated: bool,
    pub next_continuation: Option<String>,
}

/// One page of delimiter (common prefix) listing.
#[derive(Debug, Default)]
pub struct PrefixPage {
    pub prefixes: Vec<String>,
    pub next_continuation: Option<String>,
}

/// A readable object body with its advertised length.
pub struct ObjectBody {
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
    pub content_length: u64,
}

impl fmt::Debug for ObjectBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectBody")
            .field("content_length", &self.content_length)
            .finish()
    }
}

/// A request body for `put_object`.
///
/// Both forms are rewindable, so the transport layer may retry a
/// transient failure without help from the caller. A `File` body must
/// outlive the put; the retry-safe wrapper in the transfer engine owns
/// the backing temp file.
#[derive(Debug, Clone)]
pub enum PutBody {
    Memory(Bytes),
    File(PathBuf),
}

impl PutBody {
    pub fn empty() -> PutBody {
        PutBody::Memory(Bytes::new())
    }
}

/// Required contract for any object store.
#[async_trait]
pub trait Provider: Send + Sync + fmt::Debug {
    /// Short provider tag used in records, e.g. `"s3"`.
    fn tag(&self) -> &'static str;

    /// The bucket this provider addresses.
    fn bucket(&self) -> &str;

    /// List one page of objects under a prefix.
    ///
    /// Results are in the provider's native ordering; for S3 that is
    /// UTF-8 lexicographic by key.
    async fn list(&self, opts: ListOpts) -> Result<ListPage, ProviderError>;

    /// Fetch metadata for a single key.
    async fn head(&self, key: &str) -> Result<ObjectMeta, ProviderError>;

    /// Release any connections. Idempotent.
    async fn close(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    fn as_getter(&self) -> Option<&dyn ObjectGetter> {
        None
    }

    fn as_ranger(&self) -> Option<&dyn ObjectRanger> {
        None
    }

    fn as_putter(&self) -> Option<&dyn ObjectPutter> {
        None
    }

    fn as_deleter(&self) -> Option<&dyn ObjectDeleter> {
        None
    }

    fn as_multipart(&self) -> Option<&dyn MultipartUploader> {
        None
    }

    fn as_prefix_lister(&self) -> Option<&dyn PrefixLister> {
        None
    }
}

/// Optional capability: read a whole object.
#[async_trait]
pub trait ObjectGetter: Send + Sync {
    async fn get_object(&self, key: &str) -> Result<ObjectBody, ProviderError>;
}

/// Optional capability: read a byte range (HTTP Range semantics, both
/// bounds inclusive).
#[async_trait]
pub trait ObjectRanger: Send + Sync {
    async fn get_range(
        &self,
        key: &str,
        start: u64,
        end_inclusive: u64,
    ) -> Result<ObjectBody, ProviderError>;
}

/// Optional capability: write a whole object.
#[async_trait]
pub trait ObjectPutter: Send + Sync {
    async fn put_object(&self, key: &str, body: PutBody, size: u64) -> Result<(), ProviderError>;
}

/// Optional capability: delete an object.
#[async_trait]
pub trait ObjectDeleter: Send + Sync {
    async fn delete_object(&self, key: &str) -> Result<(), ProviderError>;
}

/// Optional capability: multipart upload session control.
///
/// Preflight only ever creates and immediately aborts a session, which
/// probes write permission without materializing an object.
#[async_trait]
pub trait MultipartUploader: Send + Sync {
    async fn create_multipart_upload(&self, key: &str) -> Result<String, ProviderError>;
    async fn abort_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
    ) -> Result<(), ProviderError>;
}

/// Optional capability: delimiter listing of immediate common prefixes.
#[async_trait]
pub trait PrefixLister: Send + Sync {
    async fn list_common_prefixes(
        &self,
        prefix: &str,
        delimiter: &str,
        continuation: Option<String>,
    ) -> Result<PrefixPage, ProviderError>;
}

/// Normalized classification of provider faults.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ErrorKind {
    NotFound,
    AccessDenied,
    BucketNotFound,
    InvalidCredentials,
    Unavailable,
    Throttled,
    Other,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::NotFound => "not found",
            ErrorKind::AccessDenied => "access denied",
            ErrorKind::BucketNotFound => "bucket not found",
            ErrorKind::InvalidCredentials => "invalid credentials",
            ErrorKind::Unavailable => "provider unavailable",
            ErrorKind::Throttled => "throttled",
            ErrorKind::Other => "unclassified error",
        };
        f.write_str(s)
    }
}

/// A provider fault wrapped with the context of the call that hit it.
#[derive(Debug, Error)]
#[error("{provider} {operation} on {bucket}{}: {kind}", .key.as_deref().map(|k| format!("/{k}")).unwrap_or_default())]
pub struct ProviderError {
    operation: &'static str,
    provider: &'static str,
    bucket: String,
    key: Option<String>,
    kind: ErrorKind,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl ProviderError {
    pub fn new(provider: &'static str, operation: &'static str, bucket: &str) -> ProviderError {
        ProviderError {
            operation,
            provider,
            bucket: bucket.to_owned(),
            key: None,
            kind: ErrorKind::Other,
            source: None,
        }
    }

    pub fn key(mut self, key: impl Into<String>) -> ProviderError {
        self.key = Some(key.into());
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn with_kind(mut self, kind: ErrorKind) -> ProviderError {
        self.kind = kind;
        self
    }

    pub fn source_err(
        mut self,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> ProviderError {
        self.source = Some(Box::new(source));
        self
    }

    pub fn operation(&self) -> &'static str {
        self.operation
    }

    pub fn provider(&self) -> &'static str {
        self.provider
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn object_key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.kind, ErrorKind::NotFound | ErrorKind::BucketNotFound)
    }

    pub fn is_access_denied(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::AccessDenied | ErrorKind::InvalidCredentials
        )
    }

    pub fn is_throttled(&self) -> bool {
        self.kind == ErrorKind::Throttled
    }
}

/// Strip the quoting S3 wraps around ETag values.
pub(crate) fn strip_etag_quotes(etag: &str) -> String {
    etag.trim_matches('"').to_owned()
}

/// Clamp a requested page size into the provider's allowed range.
pub(crate) fn clamp_max_keys(requested: Option<i32>, provider_max: i32) -> i32 {
    requested.unwrap_or(provider_max).clamp(1, provider_max)
}
