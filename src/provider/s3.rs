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

//! Access to AWS S3 or a compatible object storage service.

// Exercised for real by the s3-integration test, which needs
// credentials and a bucket and so is not run by default.

use std::collections::BTreeMap;

use async_trait::async_trait;
use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::operation::abort_multipart_upload::AbortMultipartUploadError;
use aws_sdk_s3::operation::create_multipart_upload::CreateMultipartUploadError;
use aws_sdk_s3::operation::delete_object::DeleteObjectError;
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_sdk_s3::operation::head_object::HeadObjectError;
use aws_sdk_s3::operation::list_objects_v2::ListObjectsV2Error;
use aws_sdk_s3::operation::put_object::PutObjectError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use aws_types::region::Region;
use time::OffsetDateTime;
use tracing::{debug, trace};

use super::{
    clamp_max_keys, strip_etag_quotes, ErrorKind, ListOpts, ListPage, MultipartUploader,
    ObjectBody, ObjectDeleter, ObjectGetter, ObjectMeta, ObjectPutter, ObjectRanger,
    ObjectSummary, PrefixLister, PrefixPage, Provider, ProviderError, PutBody,
};
use crate::config::ConnectionConfig;

/// S3 caps list pages at 1000 keys.
const MAX_KEYS: i32 = 1000;

/// The reference provider, on the AWS SDK.
#[derive(Debug)]
pub struct S3Provider {
    client: Client,
    bucket: String,
    default_max_keys: Option<i32>,
}

impl S3Provider {
    /// Build a client for the configured bucket.
    ///
    /// Region resolution: explicit config beats the environment and
    /// shared profile chain, which beats the `us-east-1` default. With a
    /// custom endpoint no default is applied; compatible services may
    /// not want one.
    pub async fn connect(config: &ConnectionConfig) -> crate::errors::Result<S3Provider> {
        let mut loader = aws_config::from_env();
        if let Some(profile) = &config.profile {
            loader = loader.profile_name(profile);
        }
        if let Some(region) = &config.region {
            loader = loader.region(Region::new(region.clone()));
        }
        let shared = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }
        if config.force_path_style {
            builder = builder.force_path_style(true);
        }
        if let (Some(access_key), Some(secret_key)) =
            (&config.access_key_id, &config.secret_access_key)
        {
            builder = builder.credentials_provider(aws_sdk_s3::config::Credentials::new(
                access_key.clone(),
                secret_key.clone(),
                None,
                None,
                "gonimbus-config",
            ));
        }
        if shared.region().is_none() && config.endpoint.is_none() {
            builder = builder.region(Region::new("us-east-1"));
        }
        let client = Client::from_conf(builder.build());
        debug!(bucket = %config.bucket, endpoint = ?config.endpoint, "S3 client ready");
        Ok(S3Provider {
            client,
            bucket: config.bucket.clone(),
            default_max_keys: config.max_keys,
        })
    }

    fn error<E, R>(&self, operation: &'static str, source: SdkError<E, R>) -> ProviderError
    where
        E: std::error::Error + Send + Sync + 'static,
        R: std::fmt::Debug + Send + Sync + 'static,
        ErrorKind: for<'a> From<&'a E>,
    {
        debug!(s3_error = ?source, operation);
        let kind = match &source {
            SdkError::ServiceError(service_err) => ErrorKind::from(service_err.err()),
            SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) => ErrorKind::Unavailable,
            _ => ErrorKind::Other,
        };
        ProviderError::new("s3", operation, &self.bucket)
            .with_kind(kind)
            .source_err(source)
    }
}

fn to_offset_datetime(dt: aws_sdk_s3::primitives::DateTime) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp_nanos(dt.as_nanos())
        .unwrap_or(OffsetDateTime::UNIX_EPOCH)
}

#[async_trait]
impl Provider for S3Provider {
    fn tag(&self) -> &'static str {
        "s3"
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn list(&self, opts: ListOpts) -> Result<ListPage, ProviderError> {
        let mut request = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(&opts.prefix)
            .max_keys(clamp_max_keys(
                opts.max_keys.or(self.default_max_keys),
                MAX_KEYS,
            ));
        if let Some(token) = &opts.continuation {
            request = request.continuation_token(token);
        }
        let response = request
            .send()
            .await
            .map_err(|e| self.error("list", e).key(&opts.prefix))?;

        let objects = response
            .contents
            .unwrap_or_default()
            .into_iter()
            .filter_map(|object| {
                let key = object.key?;
                Some(ObjectSummary {
                    size: object.size.unwrap_or(0).max(0) as u64,
                    etag: strip_etag_quotes(object.e_tag.as_deref().unwrap_or_default()),
                    last_modified: object
                        .last_modified
                        .map(to_offset_datetime)
                        .unwrap_or(OffsetDateTime::UNIX_EPOCH),
                    key,
                })
            })
            .collect();
        trace!(prefix = %opts.prefix, truncated = ?response.is_truncated, "listed page");
        Ok(ListPage {
            objects,
            is_truncated: response.is_truncated.unwrap_or(false),
            next_continuation: response.next_continuation_token,
        })
    }

    async fn head(&self, key: &str) -> Result<ObjectMeta, ProviderError> {
        let response = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| self.error("head", e).key(key))?;
        Ok(ObjectMeta {
            summary: ObjectSummary {
                key: key.to_owned(),
                size: response.content_length.unwrap_or(0).max(0) as u64,
                etag: strip_etag_quotes(response.e_tag.as_deref().unwrap_or_default()),
                last_modified: response
                    .last_modified
                    .map(to_offset_datetime)
                    .unwrap_or(OffsetDateTime::UNIX_EPOCH),
            },
            content_type: response.content_type,
            metadata: response
                .metadata
                .unwrap_or_default()
                .into_iter()
                .collect::<BTreeMap<_, _>>(),
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
impl ObjectGetter for S3Provider {
    async fn get_object(&self, key: &str) -> Result<ObjectBody, ProviderError> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| self.error("get", e).key(key))?;
        let content_length = response
            .content_length
            .and_then(|v| u64::try_from(v).ok())
            .unwrap_or(0);
        Ok(ObjectBody {
            content_length,
            reader: Box::new(response.body.into_async_read()),
        })
    }
}

#[async_trait]
impl ObjectRanger for S3Provider {
    async fn get_range(
        &self,
        key: &str,
        start: u64,
        end_inclusive: u64,
    ) -> Result<ObjectBody, ProviderError> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .range(format!("bytes={start}-{end_inclusive}"))
            .send()
            .await
            .map_err(|e| self.error("get_range", e).key(key))?;
        let content_length = response
            .content_length
            .and_then(|v| u64::try_from(v).ok())
            .unwrap_or(0);
        Ok(ObjectBody {
            content_length,
            reader: Box::new(response.body.into_async_read()),
        })
    }
}

#[async_trait]
impl ObjectPutter for S3Provider {
    async fn put_object(&self, key: &str, body: PutBody, size: u64) -> Result<(), ProviderError> {
        let stream = match body {
            PutBody::Memory(bytes) => ByteStream::from(bytes),
            // A path-backed stream can be replayed by the SDK's own
            // retry layer.
            PutBody::File(path) => ByteStream::read_from()
                .path(&path)
                .build()
                .await
                .map_err(|e| {
                    ProviderError::new("s3", "put", &self.bucket)
                        .key(key)
                        .source_err(e)
                })?,
        };
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_length(size as i64)
            .body(stream)
            .send()
            .await
            .map_err(|e| self.error("put", e).key(key))?;
        trace!(%key, size, "wrote object");
        Ok(())
    }
}

#[async_trait]
impl ObjectDeleter for S3Provider {
    async fn delete_object(&self, key: &str) -> Result<(), ProviderError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| self.error("delete", e).key(key))?;
        trace!(%key, "deleted object");
        Ok(())
    }
}

#[async_trait]
impl MultipartUploader for S3Provider {
    async fn create_multipart_upload(&self, key: &str) -> Result<String, ProviderError> {
        let response = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| self.error("create_multipart", e).key(key))?;
        response.upload_id.ok_or_else(|| {
            ProviderError::new("s3", "create_multipart", &self.bucket)
                .key(key)
                .with_kind(ErrorKind::Other)
        })
    }

    async fn abort_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
    ) -> Result<(), ProviderError> {
        self.client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|e| self.error("abort_multipart", e).key(key))?;
        Ok(())
    }
}

#[async_trait]
impl PrefixLister for S3Provider {
    async fn list_common_prefixes(
        &self,
        prefix: &str,
        delimiter: &str,
        continuation: Option<String>,
    ) -> Result<PrefixPage, ProviderError> {
        let mut request = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .delimiter(delimiter);
        if let Some(token) = continuation {
            request = request.continuation_token(token);
        }
        let response = request
            .send()
            .await
            .map_err(|e| self.error("list_prefixes", e).key(prefix))?;
        let prefixes = response
            .common_prefixes
            .unwrap_or_default()
            .into_iter()
            .filter_map(|cp| cp.prefix)
            .collect();
        Ok(PrefixPage {
            prefixes,
            next_continuation: response.next_continuation_token,
        })
    }
}

/// Service-level codes shared across operations.
fn classify_code(code: Option<&str>) -> Option<ErrorKind> {
    match code? {
        "NoSuchKey" | "NotFound" => Some(ErrorKind::NotFound),
        "NoSuchBucket" => Some(ErrorKind::BucketNotFound),
        "AccessDenied" | "AllAccessDisabled" | "AccountProblem" => Some(ErrorKind::AccessDenied),
        "InvalidAccessKeyId" | "SignatureDoesNotMatch" | "ExpiredToken"
        | "TokenRefreshRequired" => Some(ErrorKind::InvalidCredentials),
        "SlowDown" | "Throttling" | "ThrottlingException" | "RequestLimitExceeded"
        | "TooManyRequests" => Some(ErrorKind::Throttled),
        "ServiceUnavailable" | "InternalError" => Some(ErrorKind::Unavailable),
        _ => None,
    }
}

impl From<&ListObjectsV2Error> for ErrorKind {
    fn from(source: &ListObjectsV2Error) -> Self {
        match source {
            ListObjectsV2Error::NoSuchBucket(_) => ErrorKind::BucketNotFound,
            _ => classify_code(source.meta().code()).unwrap_or(ErrorKind::Other),
        }
    }
}

impl From<&GetObjectError> for ErrorKind {
    fn from(source: &GetObjectError) -> Self {
        match source {
            GetObjectError::NoSuchKey(_) => ErrorKind::NotFound,
            _ => classify_code(source.meta().code()).unwrap_or(ErrorKind::Other),
        }
    }
}

impl From<&HeadObjectError> for ErrorKind {
    fn from(source: &HeadObjectError) -> Self {
        match source {
            HeadObjectError::NotFound(_) => ErrorKind::NotFound,
            _ => classify_code(source.meta().code()).unwrap_or(ErrorKind::Other),
        }
    }
}

impl From<&PutObjectError> for ErrorKind {
    fn from(source: &PutObjectError) -> Self {
        classify_code(source.meta().code()).unwrap_or(ErrorKind::Other)
    }
}

impl From<&DeleteObjectError> for ErrorKind {
    fn from(source: &DeleteObjectError) -> Self {
        classify_code(source.meta().code()).unwrap_or(ErrorKind::Other)
    }
}

impl From<&CreateMultipartUploadError> for ErrorKind {
    fn from(source: &CreateMultipartUploadError) -> Self {
        classify_code(source.meta().code()).unwrap_or(ErrorKind::Other)
    }
}

impl From<&AbortMultipartUploadError> for ErrorKind {
    fn from(source: &AbortMultipartUploadError) -> Self {
        match source {
            AbortMultipartUploadError::NoSuchUpload(_) => ErrorKind::NotFound,
            _ => classify_code(source.meta().code()).unwrap_or(ErrorKind::Other),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn throttling_codes_classify() {
        assert_eq!(classify_code(Some("SlowDown")), Some(ErrorKind::Throttled));
        assert_eq!(
            classify_code(Some("RequestLimitExceeded")),
            Some(ErrorKind::Throttled)
        );
        assert_eq!(
            classify_code(Some("AccessDenied")),
            Some(ErrorKind::AccessDenied)
        );
        assert_eq!(
            classify_code(Some("InvalidAccessKeyId")),
            Some(ErrorKind::InvalidCredentials)
        );
        assert_eq!(classify_code(Some("SomethingElse")), None);
        assert_eq!(classify_code(None), None);
    }
}
