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

//! Retry-safe request bodies.
//!
//! The source stream is consumed once into a rewindable form: in memory
//! up to a configured cap, otherwise spooled to a temp file. Either form
//! lets the transport layer replay the body on a transient failure. The
//! temp file is owned here and removed when the body is dropped, on
//! every exit path.

use bytes::{Bytes, BytesMut};
use tempfile::NamedTempFile;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

use crate::errors::Result;
use crate::provider::PutBody;

const READ_CHUNK: usize = 64 * 1024;

#[derive(Debug)]
enum Inner {
    Memory(Bytes),
    Spooled(NamedTempFile),
}

/// A fully buffered, rewindable request body.
#[derive(Debug)]
pub struct RetryBody {
    inner: Inner,
    size: u64,
}

impl RetryBody {
    /// Drain `reader`, keeping at most `max_memory` bytes in memory
    /// before spilling the whole payload to a temp file.
    pub async fn spool<R>(reader: &mut R, max_memory: u64) -> Result<RetryBody>
    where
        R: AsyncRead + Unpin,
    {
        let mut buf = BytesMut::new();
        loop {
            if buf.len() as u64 > max_memory {
                return Self::spill(buf, reader).await;
            }
            buf.reserve(READ_CHUNK);
            let n = reader.read_buf(&mut buf).await?;
            if n == 0 {
                let size = buf.len() as u64;
                return Ok(RetryBody {
                    inner: Inner::Memory(buf.freeze()),
                    size,
                });
            }
        }
    }

    async fn spill<R>(buffered: BytesMut, reader: &mut R) -> Result<RetryBody>
    where
        R: AsyncRead + Unpin,
    {
        let tmp = NamedTempFile::new()?;
        let mut file = tokio::fs::File::from_std(tmp.reopen()?);
        file.write_all(&buffered).await?;
        let rest = tokio::io::copy(reader, &mut file).await?;
        file.flush().await?;
        Ok(RetryBody {
            size: buffered.len() as u64 + rest,
            inner: Inner::Spooled(tmp),
        })
    }

    /// Total payload size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// True when the payload was spilled to disk.
    pub fn is_spooled(&self) -> bool {
        matches!(self.inner, Inner::Spooled(_))
    }

    /// The provider-facing body. A file-backed body stays valid until
    /// this [RetryBody] is dropped.
    pub fn as_put_body(&self) -> PutBody {
        match &self.inner {
            Inner::Memory(bytes) => PutBody::Memory(bytes.clone()),
            Inner::Spooled(tmp) => PutBody::File(tmp.path().to_path_buf()),
        }
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    #[tokio::test]
    async fn small_body_stays_in_memory() {
        let payload = b"hello world".to_vec();
        let body = RetryBody::spool(&mut payload.as_slice(), 1024)
            .await
            .unwrap();
        assert_eq!(body.size(), 11);
        assert!(!body.is_spooled());
        match body.as_put_body() {
            PutBody::Memory(bytes) => assert_eq!(&bytes[..], b"hello world"),
            other => panic!("unexpected body {other:?}"),
        }
    }

    #[tokio::test]
    async fn large_body_spills_to_disk() {
        let payload = vec![7u8; 256 * 1024];
        let body = RetryBody::spool(&mut payload.as_slice(), 1024)
            .await
            .unwrap();
        assert_eq!(body.size(), 256 * 1024);
        assert!(body.is_spooled());
        let path = match body.as_put_body() {
            PutBody::File(path) => path,
            other => panic!("unexpected body {other:?}"),
        };
        let spooled = std::fs::read(&path).unwrap();
        assert_eq!(spooled.len(), 256 * 1024);
        assert!(spooled.iter().all(|&b| b == 7));

        // Dropping the body removes the spool file.
        drop(body);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn empty_body_is_legal() {
        let body = RetryBody::spool(&mut (&[] as &[u8]), 1024).await.unwrap();
        assert_eq!(body.size(), 0);
        assert!(!body.is_spooled());
    }

    #[tokio::test]
    async fn boundary_is_inclusive() {
        // Exactly max_memory bytes stay in memory.
        let payload = vec![1u8; 100];
        let body = RetryBody::spool(&mut payload.as_slice(), 100).await.unwrap();
        assert!(!body.is_spooled());
        let payload = vec![1u8; 101];
        let body = RetryBody::spool(&mut payload.as_slice(), 100).await.unwrap();
        assert!(body.is_spooled());
    }
}
