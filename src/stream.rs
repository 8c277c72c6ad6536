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

//! Mixed-framing content stream: JSONL control records interleaved with
//! exact-length raw byte chunks.
//!
//! On the wire a session is `stream.open`, then for each chunk a
//! `stream.chunk` header line followed by exactly `nbytes` raw bytes,
//! then `stream.close`. A session is produced by a single writer;
//! interleaving sessions on one sink is not supported.

use std::io::{self, BufRead, Read, Write};
use std::sync::Mutex;

use time::OffsetDateTime;

use crate::errors::{Error, Result};
use crate::records::{Envelope, Payload, StreamChunk, StreamClose, StreamOpen};

/// Longest accepted header line in the decoder.
pub const MAX_LINE_LEN: usize = 1 << 20;

/// Encoder for the mixed-framing stream.
pub struct StreamWriter<W: Write> {
    job_id: String,
    provider: String,
    sink: Mutex<W>,
}

impl<W: Write> StreamWriter<W> {
    pub fn new(sink: W, job_id: impl Into<String>, provider: impl Into<String>) -> Self {
        StreamWriter {
            job_id: job_id.into(),
            provider: provider.into(),
            sink: Mutex::new(sink),
        }
    }

    fn line<P: Payload>(&self, payload: &P) -> Result<Vec<u8>> {
        let envelope = Envelope {
            record_type: P::TYPE.to_owned(),
            ts: OffsetDateTime::now_utc(),
            job_id: self.job_id.clone(),
            provider: self.provider.clone(),
            data: serde_json::to_value(payload)?,
        };
        let mut line = serde_json::to_vec(&envelope)?;
        line.push(b'\n');
        Ok(line)
    }

    pub fn write_open(&self, open: &StreamOpen) -> Result<()> {
        let line = self.line(open)?;
        let mut sink = self.sink.lock().unwrap();
        sink.write_all(&line)?;
        Ok(())
    }

    /// Write a chunk header and copy exactly `header.nbytes` bytes from
    /// `body`. A body that ends early leaves the stream corrupt, so it is
    /// reported as [io::ErrorKind::UnexpectedEof].
    pub fn write_chunk<R: Read>(&self, header: &StreamChunk, body: &mut R) -> Result<()> {
        let line = self.line(header)?;
        let mut sink = self.sink.lock().unwrap();
        sink.write_all(&line)?;
        let copied = io::copy(&mut (&mut *body).take(header.nbytes), &mut *sink)?;
        if copied < header.nbytes {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "chunk body ended after {copied} of {} bytes",
                    header.nbytes
                ),
            )));
        }
        Ok(())
    }

    pub fn write_close(&self, close: &StreamClose) -> Result<()> {
        let line = self.line(close)?;
        let mut sink = self.sink.lock().unwrap();
        sink.write_all(&line)?;
        sink.flush()?;
        Ok(())
    }
}

/// One decoded event: either a control record or a chunk whose body can
/// be read lazily.
#[derive(Debug)]
pub enum StreamEvent<'a, R: BufRead> {
    Record(Envelope),
    Chunk(ChunkEvent<'a, R>),
}

/// A chunk header plus a bounded reader over its raw body.
///
/// The body need not be fully read; the next call to
/// [StreamReader::next_event] drains whatever remains.
#[derive(Debug)]
pub struct ChunkEvent<'a, R: BufRead> {
    pub header: StreamChunk,
    decoder: &'a mut StreamReader<R>,
}

impl<R: BufRead> Read for ChunkEvent<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.decoder.pending == 0 || buf.is_empty() {
            return Ok(0);
        }
        let want = (buf.len() as u64).min(self.decoder.pending) as usize;
        let n = self.decoder.inner.read(&mut buf[..want])?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "stream truncated mid-chunk",
            ));
        }
        self.decoder.pending -= n as u64;
        Ok(n)
    }
}

/// Decoder for the mixed-framing stream.
#[derive(Debug)]
pub struct StreamReader<R: BufRead> {
    inner: R,
    /// Unread raw bytes of the current chunk.
    pending: u64,
    max_line_len: usize,
}

impl<R: BufRead> StreamReader<R> {
    pub fn new(inner: R) -> Self {
        StreamReader {
            inner,
            pending: 0,
            max_line_len: MAX_LINE_LEN,
        }
    }

    pub fn with_max_line_len(inner: R, max_line_len: usize) -> Self {
        StreamReader {
            inner,
            pending: 0,
            max_line_len,
        }
    }

    /// Decode the next event, or `None` at a clean end of stream.
    pub fn next_event(&mut self) -> Result<Option<StreamEvent<'_, R>>> {
        self.drain_pending()?;

        let mut line = Vec::new();
        let mut limited = (&mut self.inner).take(self.max_line_len as u64 + 1);
        let n = limited.read_until(b'\n', &mut line)?;
        if n == 0 {
            return Ok(None);
        }
        if line.last() != Some(&b'\n') {
            let kind = if line.len() > self.max_line_len {
                io::ErrorKind::InvalidData
            } else {
                io::ErrorKind::UnexpectedEof
            };
            return Err(Error::Io(io::Error::new(kind, "unterminated header line")));
        }
        line.pop();

        let envelope: Envelope = serde_json::from_slice(&line)?;
        if envelope.record_type == StreamChunk::TYPE {
            let header: StreamChunk = serde_json::from_value(envelope.data)?;
            self.pending = header.nbytes;
            Ok(Some(StreamEvent::Chunk(ChunkEvent {
                header,
                decoder: self,
            })))
        } else {
            Ok(Some(StreamEvent::Record(envelope)))
        }
    }

    /// Discard whatever the caller did not read of the current chunk.
    fn drain_pending(&mut self) -> Result<()> {
        while self.pending > 0 {
            let available = self.inner.fill_buf()?;
            if available.is_empty() {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "stream truncated mid-chunk",
                )));
            }
            let n = (available.len() as u64).min(self.pending) as usize;
            self.inner.consume(n);
            self.pending -= n as u64;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::io::Cursor;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::records::StreamStatus;

    fn open(id: &str) -> StreamOpen {
        StreamOpen {
            stream_id: id.into(),
            uri: "s3://bucket/data/a.txt".into(),
            size: Some(6),
            etag: None,
            last_modified: None,
            content_type: None,
            range: None,
        }
    }

    fn encode_session(payloads: &[&[u8]]) -> Vec<u8> {
        let mut out = Vec::new();
        {
            let writer = StreamWriter::new(&mut out, "job", "s3");
            writer.write_open(&open("st-1")).unwrap();
            let mut offset = 0;
            for (seq, body) in payloads.iter().enumerate() {
                writer
                    .write_chunk(
                        &StreamChunk {
                            stream_id: "st-1".into(),
                            seq: seq as u64,
                            nbytes: body.len() as u64,
                            offset: Some(offset),
                        },
                        &mut Cursor::new(body),
                    )
                    .unwrap();
                offset += body.len() as u64;
            }
            writer
                .write_close(&StreamClose {
                    stream_id: "st-1".into(),
                    status: StreamStatus::Success,
                    chunks: payloads.len() as u64,
                    bytes: payloads.iter().map(|p| p.len() as u64).sum(),
                    duration_ns: None,
                })
                .unwrap();
        }
        out
    }

    #[test]
    fn roundtrip_single_chunk() {
        let encoded = encode_session(&[b"abc123"]);
        let mut reader = StreamReader::new(Cursor::new(&encoded));

        match reader.next_event().unwrap().unwrap() {
            StreamEvent::Record(env) => assert_eq!(env.record_type, "stream.open.v1"),
            _ => panic!("expected open"),
        }
        match reader.next_event().unwrap().unwrap() {
            StreamEvent::Chunk(mut chunk) => {
                assert_eq!(chunk.header.seq, 0);
                assert_eq!(chunk.header.nbytes, 6);
                let mut body = Vec::new();
                chunk.read_to_end(&mut body).unwrap();
                assert_eq!(body, b"abc123");
            }
            _ => panic!("expected chunk"),
        }
        match reader.next_event().unwrap().unwrap() {
            StreamEvent::Record(env) => {
                assert_eq!(env.record_type, "stream.close.v1");
                let close: StreamClose = serde_json::from_value(env.data).unwrap();
                assert_eq!(close.chunks, 1);
                assert_eq!(close.bytes, 6);
            }
            _ => panic!("expected close"),
        }
        assert!(reader.next_event().unwrap().is_none());
    }

    #[test]
    fn unread_chunk_is_drained() {
        let encoded = encode_session(&[b"0123456789", b"xyz"]);
        let mut reader = StreamReader::new(Cursor::new(&encoded));

        // open
        reader.next_event().unwrap().unwrap();
        // First chunk: don't read the body at all.
        match reader.next_event().unwrap().unwrap() {
            StreamEvent::Chunk(chunk) => assert_eq!(chunk.header.nbytes, 10),
            _ => panic!("expected chunk"),
        }
        // Decoder must skip the 10 unread bytes and land on the next header.
        match reader.next_event().unwrap().unwrap() {
            StreamEvent::Chunk(mut chunk) => {
                assert_eq!(chunk.header.seq, 1);
                let mut body = Vec::new();
                chunk.read_to_end(&mut body).unwrap();
                assert_eq!(body, b"xyz");
            }
            _ => panic!("expected second chunk"),
        }
    }

    #[test]
    fn truncated_chunk_surfaces_unexpected_eof() {
        let mut encoded = encode_session(&[b"abcdef"]);
        // Cut the stream three bytes into the chunk body.
        let body_at = encoded
            .windows(6)
            .position(|w| w == b"abcdef")
            .unwrap();
        encoded.truncate(body_at + 3);

        let mut reader = StreamReader::new(Cursor::new(&encoded));
        reader.next_event().unwrap().unwrap(); // open
        let got = match reader.next_event() {
            Ok(Some(StreamEvent::Chunk(mut chunk))) => {
                let mut body = Vec::new();
                chunk.read_to_end(&mut body)
            }
            other => panic!("expected chunk, got {:?}", other.is_ok()),
        };
        let err = got.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn zero_byte_chunk_is_legal() {
        let encoded = encode_session(&[b""]);
        let mut reader = StreamReader::new(Cursor::new(&encoded));
        reader.next_event().unwrap().unwrap(); // open
        match reader.next_event().unwrap().unwrap() {
            StreamEvent::Chunk(mut chunk) => {
                assert_eq!(chunk.header.nbytes, 0);
                let mut body = Vec::new();
                chunk.read_to_end(&mut body).unwrap();
                assert!(body.is_empty());
            }
            _ => panic!("expected chunk"),
        }
        match reader.next_event().unwrap().unwrap() {
            StreamEvent::Record(env) => assert_eq!(env.record_type, "stream.close.v1"),
            _ => panic!("expected close"),
        }
    }

    #[test]
    fn oversized_header_line_fails_fast() {
        let mut encoded = vec![b'{'; 200];
        encoded.push(b'\n');
        let mut reader = StreamReader::with_max_line_len(Cursor::new(&encoded), 64);
        let err = reader.next_event().unwrap_err();
        match err {
            Error::Io(e) => assert_eq!(e.kind(), io::ErrorKind::InvalidData),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn short_body_on_encode_is_unexpected_eof() {
        let out = Vec::new();
        let writer = StreamWriter::new(out, "job", "s3");
        writer.write_open(&open("st-9")).unwrap();
        let err = writer
            .write_chunk(
                &StreamChunk {
                    stream_id: "st-9".into(),
                    seq: 0,
                    nbytes: 10,
                    offset: None,
                },
                &mut Cursor::new(b"abc"),
            )
            .unwrap_err();
        match err {
            Error::Io(e) => assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof),
            other => panic!("unexpected error {other:?}"),
        }
    }
}
