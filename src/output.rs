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

//! Emit typed JSONL records to a sink.
//!
//! Lines are written whole under a single mutex, so records from
//! concurrent stages never interleave. Marshaling happens outside the
//! lock. A sink that accepts a partial line is looped to completion; a
//! sink that makes no progress is an error, never a silent truncation.

use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use time::OffsetDateTime;

use crate::errors::{Error, Result};
use crate::records::{
    Envelope, ErrorRecord, ObjectRecord, Payload, PreflightRecord, ProgressRecord, SkipRecord,
    SummaryRecord, TransferRecord,
};

/// Typed emit methods for every record in the event contract.
///
/// Implementations must be safe to share across pipeline stages.
pub trait Writer: Send + Sync {
    fn object(&self, record: &ObjectRecord) -> Result<()>;
    fn error(&self, record: &ErrorRecord) -> Result<()>;
    fn progress(&self, record: &ProgressRecord) -> Result<()>;
    fn summary(&self, record: &SummaryRecord) -> Result<()>;
    fn preflight(&self, record: &PreflightRecord) -> Result<()>;
    fn transfer(&self, record: &TransferRecord) -> Result<()>;
    fn skip(&self, record: &SkipRecord) -> Result<()>;

    /// Flush and close. Emits after close fail with [Error::OutputClosed].
    fn close(&self) -> Result<()>;
}

/// The reference [Writer]: JSONL to any `io::Write` sink.
pub struct JsonlWriter<W: Write + Send> {
    job_id: String,
    provider: String,
    sink: Mutex<Sink<W>>,
}

struct Sink<W> {
    out: W,
    closed: bool,
}

impl<W: Write + Send> JsonlWriter<W> {
    pub fn new(out: W, job_id: impl Into<String>, provider: impl Into<String>) -> Self {
        JsonlWriter {
            job_id: job_id.into(),
            provider: provider.into(),
            sink: Mutex::new(Sink { out, closed: false }),
        }
    }

    fn emit<P: Payload>(&self, payload: &P) -> Result<()> {
        // Serialize before taking the lock to keep the critical section
        // to just the write.
        let envelope = Envelope {
            record_type: P::TYPE.to_owned(),
            ts: OffsetDateTime::now_utc(),
            job_id: self.job_id.clone(),
            provider: self.provider.clone(),
            data: serde_json::to_value(payload)?,
        };
        let mut line = serde_json::to_vec(&envelope)?;
        line.push(b'\n');

        let mut sink = self.sink.lock().unwrap();
        if sink.closed {
            return Err(Error::OutputClosed);
        }
        write_line(&mut sink.out, &line)?;
        Ok(())
    }
}

impl<W: Write + Send> Writer for JsonlWriter<W> {
    fn object(&self, record: &ObjectRecord) -> Result<()> {
        self.emit(record)
    }

    fn error(&self, record: &ErrorRecord) -> Result<()> {
        self.emit(record)
    }

    fn progress(&self, record: &ProgressRecord) -> Result<()> {
        self.emit(record)
    }

    fn summary(&self, record: &SummaryRecord) -> Result<()> {
        self.emit(record)
    }

    fn preflight(&self, record: &PreflightRecord) -> Result<()> {
        self.emit(record)
    }

    fn transfer(&self, record: &TransferRecord) -> Result<()> {
        self.emit(record)
    }

    fn skip(&self, record: &SkipRecord) -> Result<()> {
        self.emit(record)
    }

    fn close(&self) -> Result<()> {
        let mut sink = self.sink.lock().unwrap();
        if sink.closed {
            return Ok(());
        }
        sink.out.flush()?;
        sink.closed = true;
        Ok(())
    }
}

/// Write one whole line, looping over short writes.
///
/// A write of zero bytes with no error would loop forever, so it is
/// reported as [io::ErrorKind::WriteZero].
fn write_line<W: Write>(out: &mut W, line: &[u8]) -> io::Result<()> {
    let mut written = 0;
    while written < line.len() {
        match out.write(&line[written..]) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "sink made no progress",
                ));
            }
            Ok(n) => written += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// An in-memory sink that can be read back while a writer holds it.
#[derive(Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn new() -> SharedBuffer {
        SharedBuffer::default()
    }

    pub fn contents(&self) -> Vec<u8> {
        self.0.lock().unwrap().clone()
    }

    pub fn into_string(&self) -> String {
        String::from_utf8(self.contents()).expect("output is UTF-8")
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::io;

    use super::*;
    use crate::errors::ErrorCode;

    /// A sink that accepts at most `limit` bytes per call.
    struct Dribble {
        buf: Vec<u8>,
        limit: usize,
    }

    impl Write for Dribble {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let n = buf.len().min(self.limit);
            self.buf.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// A sink that returns `Ok(0)` forever.
    struct Stuck;

    impl Write for Stuck {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Ok(0)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn sample_error() -> ErrorRecord {
        ErrorRecord {
            code: ErrorCode::AccessDenied,
            message: "denied".into(),
            key: None,
            prefix: Some("data/".into()),
            details: None,
        }
    }

    #[test]
    fn lines_parse_and_carry_envelope() {
        let buf = SharedBuffer::new();
        let writer = JsonlWriter::new(buf.clone(), "job-7", "s3");
        writer.error(&sample_error()).unwrap();
        writer.close().unwrap();

        let out = buf.into_string();
        let line = out.lines().next().unwrap();
        let env: Envelope = serde_json::from_str(line).unwrap();
        assert_eq!(env.record_type, "error.v1");
        assert_eq!(env.job_id, "job-7");
        assert_eq!(env.provider, "s3");
        assert_eq!(env.data["code"], "ACCESS_DENIED");
        // Omitted optionals never appear.
        assert!(!line.contains("\"key\""));
    }

    #[test]
    fn short_writes_loop_to_completion() {
        let mut sink = Dribble {
            buf: Vec::new(),
            limit: 3,
        };
        let line = b"0123456789abcdef\n";
        write_line(&mut sink, line).unwrap();
        assert_eq!(sink.buf, line);
    }

    #[test]
    fn zero_progress_write_is_an_error() {
        let err = write_line(&mut Stuck, b"hello\n").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WriteZero);
    }

    #[test]
    fn emit_after_close_fails() {
        let writer = JsonlWriter::new(SharedBuffer::new(), "job", "s3");
        writer.close().unwrap();
        assert!(matches!(
            writer.error(&sample_error()),
            Err(Error::OutputClosed)
        ));
        // Closing again is fine.
        writer.close().unwrap();
    }

    #[test]
    fn concurrent_emitters_do_not_interleave() {
        use std::sync::Arc;
        let buf = SharedBuffer::new();
        let writer = Arc::new(JsonlWriter::new(buf.clone(), "job", "s3"));
        let threads: Vec<_> = (0..8)
            .map(|i| {
                let writer = writer.clone();
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        writer
                            .error(&ErrorRecord {
                                code: ErrorCode::Internal,
                                message: format!("worker {i}"),
                                key: None,
                                prefix: None,
                                details: None,
                            })
                            .unwrap();
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        let out = buf.into_string();
        let lines: Vec<_> = out.lines().collect();
        assert_eq!(lines.len(), 8 * 50);
        for line in lines {
            let env: Envelope = serde_json::from_str(line).unwrap();
            assert_eq!(env.record_type, "error.v1");
        }
    }
}
