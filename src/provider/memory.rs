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

//! A fully capable in-memory provider.
//!
//! This is the supported fixture for exercising pipelines without a
//! network: it pages like S3, lists common prefixes, and can inject
//! faults per prefix.

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::io::Cursor;
use std::ops::Bound;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use time::OffsetDateTime;

use super::{
    clamp_max_keys, ErrorKind, ListOpts, ListPage, MultipartUploader, ObjectBody, ObjectDeleter,
    ObjectGetter, ObjectMeta, ObjectPutter, ObjectRanger, ObjectSummary, PrefixLister, PrefixPage,
    Provider, ProviderError, PutBody,
};

const MAX_KEYS: i32 = 1000;

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    etag: String,
    last_modified: OffsetDateTime,
    content_type: Option<String>,
    metadata: BTreeMap<String, String>,
    /// When set, listings advertise this size instead of the real one,
    /// simulating a stale listing.
    listed_size: Option<u64>,
}

#[derive(Debug, Default)]
struct State {
    objects: BTreeMap<String, StoredObject>,
    denied_prefixes: Vec<(String, ErrorKind)>,
    pending_uploads: BTreeMap<String, String>,
    next_upload: u64,
}

/// In-memory object store addressing a single named bucket.
#[derive(Debug)]
pub struct MemoryProvider {
    bucket: String,
    state: Mutex<State>,
}

fn synthetic_etag(data: &[u8]) -> String {
    let mut hasher = DefaultHasher::new();
    data.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

impl MemoryProvider {
    pub fn new(bucket: impl Into<String>) -> MemoryProvider {
        MemoryProvider {
            bucket: bucket.into(),
            state: Mutex::new(State::default()),
        }
    }

    /// Store a UTF-8 object with a synthetic etag and the current time.
    pub fn put_text(&self, key: &str, text: &str) {
        self.put_full(key, Bytes::copy_from_slice(text.as_bytes()), None, None);
    }

    /// Store an object with explicit timestamp and/or content type.
    pub fn put_full(
        &self,
        key: &str,
        data: Bytes,
        last_modified: Option<OffsetDateTime>,
        content_type: Option<String>,
    ) {
        let etag = synthetic_etag(&data);
        self.state.lock().unwrap().objects.insert(
            key.to_owned(),
            StoredObject {
                etag,
                last_modified: last_modified.unwrap_or_else(OffsetDateTime::now_utc),
                content_type,
                metadata: BTreeMap::new(),
                listed_size: None,
                data,
            },
        );
    }

    /// Override the stored etag, for dedup scenarios.
    pub fn set_etag(&self, key: &str, etag: &str) {
        if let Some(obj) = self.state.lock().unwrap().objects.get_mut(key) {
            obj.etag = etag.to_owned();
        }
    }

    /// Make listings advertise a wrong size for one key, simulating a
    /// stale listing.
    pub fn set_listed_size(&self, key: &str, size: u64) {
        if let Some(obj) = self.state.lock().unwrap().objects.get_mut(key) {
            obj.listed_size = Some(size);
        }
    }

    /// Inject a fault: any list under `prefix` fails with `kind`.
    pub fn deny_prefix(&self, prefix: &str, kind: ErrorKind) {
        self.state
            .lock()
            .unwrap()
            .denied_prefixes
            .push((prefix.to_owned(), kind));
    }

    pub fn contains(&self, key: &str) -> bool {
        self.state.lock().unwrap().objects.contains_key(key)
    }

    pub fn contents(&self, key: &str) -> Option<Bytes> {
        self.state
            .lock()
            .unwrap()
            .objects
            .get(key)
            .map(|o| o.data.clone())
    }

    pub fn etag_of(&self, key: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .objects
            .get(key)
            .map(|o| o.etag.clone())
    }

    pub fn keys(&self) -> Vec<String> {
        self.state.lock().unwrap().objects.keys().cloned().collect()
    }

    pub fn pending_upload_count(&self) -> usize {
        self.state.lock().unwrap().pending_uploads.len()
    }

    fn err(&self, operation: &'static str) -> ProviderError {
        ProviderError::new("memory", operation, &self.bucket)
    }

    fn summary(key: &str, obj: &StoredObject) -> ObjectSummary {
        ObjectSummary {
            key: key.to_owned(),
            size: obj.listed_size.unwrap_or(obj.data.len() as u64),
            etag: obj.etag.clone(),
            last_modified: obj.last_modified,
        }
    }
}

#[async_trait]
impl Provider for MemoryProvider {
    fn tag(&self) -> &'static str {
        "memory"
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn list(&self, opts: ListOpts) -> Result<ListPage, ProviderError> {
        let state = self.state.lock().unwrap();
        for (denied, kind) in &state.denied_prefixes {
            if opts.prefix.starts_with(denied.as_str()) {
                return Err(self.err("list").key(&opts.prefix).with_kind(*kind));
            }
        }
        let page_size = clamp_max_keys(opts.max_keys, MAX_KEYS) as usize;
        let lower = match &opts.continuation {
            Some(token) => Bound::Excluded(token.clone()),
            None => Bound::Unbounded,
        };
        let mut objects = Vec::new();
        let mut more = false;
        for (key, obj) in state.objects.range((lower, Bound::Unbounded)) {
            if !key.starts_with(&opts.prefix) {
                // Keys are ordered, but a continuation token may sit
                // before later matches, so skip rather than stop.
                if key.as_str() > opts.prefix.as_str() && !opts.prefix.is_empty() {
                    break;
                }
                continue;
            }
            if objects.len() == page_size {
                more = true;
                break;
            }
            objects.push(Self::summary(key, obj));
        }
        let next_continuation = if more {
            objects.last().map(|o| o.key.clone())
        } else {
            None
        };
        Ok(ListPage {
            objects,
            is_truncated: more,
            next_continuation,
        })
    }

    async fn head(&self, key: &str) -> Result<ObjectMeta, ProviderError> {
        let state = self.state.lock().unwrap();
        let obj = state
            .objects
            .get(key)
            .ok_or_else(|| self.err("head").key(key).with_kind(ErrorKind::NotFound))?;
        Ok(ObjectMeta {
            summary: ObjectSummary {
                key: key.to_owned(),
                size: obj.data.len() as u64,
                etag: obj.etag.clone(),
                last_modified: obj.last_modified,
            },
            content_type: obj.content_type.clone(),
            metadata: obj.metadata.clone(),
        })
    }

    fn as_getter(&self) -> Option<&dyn ObjectGetter> {
        Some(self)
    }

    fn as_ranger(&self) -> Option<&dyn ObjectRanger> {
        Some(self)
    }

    fn as_putter(&self) -> Option<&dyn ObjectPutter> {
        Some(self)
    }

    fn as_deleter(&self) -> Option<&dyn ObjectDeleter> {
        Some(self)
    }

    fn as_multipart(&self) -> Option<&dyn MultipartUploader> {
        Some(self)
    }

    fn as_prefix_lister(&self) -> Option<&dyn PrefixLister> {
        Some(self)
    }
}

#[async_trait]
impl ObjectGetter for MemoryProvider {
    async fn get_object(&self, key: &str) -> Result<ObjectBody, ProviderError> {
        let state = self.state.lock().unwrap();
        let obj = state
            .objects
            .get(key)
            .ok_or_else(|| self.err("get").key(key).with_kind(ErrorKind::NotFound))?;
        Ok(ObjectBody {
            content_length: obj.data.len() as u64,
            reader: Box::new(Cursor::new(obj.data.clone())),
        })
    }
}

#[async_trait]
impl ObjectRanger for MemoryProvider {
    async fn get_range(
        &self,
        key: &str,
        start: u64,
        end_inclusive: u64,
    ) -> Result<ObjectBody, ProviderError> {
        let state = self.state.lock().unwrap();
        let obj = state
            .objects
            .get(key)
            .ok_or_else(|| self.err("get_range").key(key).with_kind(ErrorKind::NotFound))?;
        let len = obj.data.len() as u64;
        if start >= len || end_inclusive < start {
            return Err(self
                .err("get_range")
                .key(key)
                .with_kind(ErrorKind::Other));
        }
        let end = (end_inclusive + 1).min(len) as usize;
        let slice = obj.data.slice(start as usize..end);
        Ok(ObjectBody {
            content_length: slice.len() as u64,
            reader: Box::new(Cursor::new(slice)),
        })
    }
}

#[async_trait]
impl ObjectPutter for MemoryProvider {
    async fn put_object(&self, key: &str, body: PutBody, size: u64) -> Result<(), ProviderError> {
        let data = match body {
            PutBody::Memory(bytes) => bytes,
            PutBody::File(path) => Bytes::from(
                tokio::fs::read(&path)
                    .await
                    .map_err(|e| self.err("put").key(key).source_err(e))?,
            ),
        };
        if data.len() as u64 != size {
            return Err(self.err("put").key(key).with_kind(ErrorKind::Other));
        }
        self.put_full(key, data, None, None);
        Ok(())
    }
}

#[async_trait]
impl ObjectDeleter for MemoryProvider {
    async fn delete_object(&self, key: &str) -> Result<(), ProviderError> {
        // Deleting an absent key succeeds, as on S3.
        self.state.lock().unwrap().objects.remove(key);
        Ok(())
    }
}

#[async_trait]
impl MultipartUploader for MemoryProvider {
    async fn create_multipart_upload(&self, key: &str) -> Result<String, ProviderError> {
        let mut state = self.state.lock().unwrap();
        state.next_upload += 1;
        let upload_id = format!("upload-{}", state.next_upload);
        state
            .pending_uploads
            .insert(upload_id.clone(), key.to_owned());
        Ok(upload_id)
    }

    async fn abort_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
    ) -> Result<(), ProviderError> {
        let mut state = self.state.lock().unwrap();
        match state.pending_uploads.remove(upload_id) {
            Some(_) => Ok(()),
            None => Err(self
                .err("abort_multipart")
                .key(key)
                .with_kind(ErrorKind::NotFound)),
        }
    }
}

#[async_trait]
impl PrefixLister for MemoryProvider {
    async fn list_common_prefixes(
        &self,
        prefix: &str,
        delimiter: &str,
        _continuation: Option<String>,
    ) -> Result<PrefixPage, ProviderError> {
        let state = self.state.lock().unwrap();
        let mut prefixes: Vec<String> = Vec::new();
        for key in state.objects.keys() {
            if let Some(rest) = key.strip_prefix(prefix) {
                if let Some(at) = rest.find(delimiter) {
                    let common = format!("{prefix}{}{delimiter}", &rest[..at]);
                    if prefixes.last() != Some(&common) {
                        prefixes.push(common);
                    }
                }
            }
        }
        prefixes.dedup();
        Ok(PrefixPage {
            prefixes,
            next_continuation: None,
        })
    }
}
