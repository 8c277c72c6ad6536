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

//! Property tests for matching, prefixes, framing, and output.

mod common;

use std::collections::BTreeSet;
use std::io::{Cursor, Read, Write};
use std::sync::Arc;

use proptest::prelude::*;

use common::{object_keys, parse_records};
use gonimbus::config::{CrawlConfig, FilterSpec, MatchConfig};
use gonimbus::output::SharedBuffer;
use gonimbus::provider::memory::MemoryProvider;
use gonimbus::records::{Envelope, StreamChunk, StreamClose, StreamOpen, StreamStatus};
use gonimbus::stream::{StreamEvent, StreamReader, StreamWriter};
use gonimbus::{CompiledFilter, Crawler, GlobMatcher, JsonlWriter, Writer};

fn key_strategy() -> impl Strategy<Value = String> {
    proptest::collection::vec("[a-c]{1,3}", 1..4).prop_map(|mut segments| {
        // Give roughly half the keys a file-ish suffix.
        if segments.len() % 2 == 0 {
            if let Some(last) = segments.last_mut() {
                last.push_str(".txt");
            }
        }
        segments.join("/")
    })
}

fn include_pool() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("**".to_owned()),
        Just("a/**".to_owned()),
        Just("**/*.txt".to_owned()),
        Just("a/*/c".to_owned()),
        Just("b*/**".to_owned()),
    ]
}

fn exclude_pool() -> impl Strategy<Value = Vec<String>> {
    prop_oneof![
        Just(Vec::new()),
        Just(vec!["**/*.txt".to_owned()]),
        Just(vec!["a/**".to_owned(), "c/**".to_owned()]),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Emitted object records are exactly the matching subset of keys.
    #[test]
    fn crawl_emits_exactly_the_matching_keys(
        keys in proptest::collection::btree_set(key_strategy(), 0..25),
        include in include_pool(),
        excludes in exclude_pool(),
    ) {
        let config = MatchConfig {
            includes: vec![include],
            excludes,
            include_hidden: true,
        };
        let matcher = GlobMatcher::new(&config).unwrap();
        let expected: BTreeSet<String> = keys
            .iter()
            .filter(|k| matcher.matches(k))
            .cloned()
            .collect();

        let provider = MemoryProvider::new("bucket");
        for key in &keys {
            provider.put_text(key, "x");
        }
        let buf = SharedBuffer::new();
        let writer = Arc::new(JsonlWriter::new(buf.clone(), "job", "memory"));
        let crawler = Crawler::new(
            Arc::new(provider),
            GlobMatcher::new(&config).unwrap(),
            CompiledFilter::new(&FilterSpec::default()).unwrap(),
            writer,
            CrawlConfig::default(),
        )
        .unwrap();

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let summary = runtime
            .block_on(crawler.run(tokio_util::sync::CancellationToken::new()))
            .unwrap();

        let emitted: BTreeSet<String> =
            object_keys(&parse_records(&buf)).into_iter().collect();
        prop_assert_eq!(&emitted, &expected);
        prop_assert_eq!(summary.objects_matched as usize, expected.len());
        prop_assert!(summary.objects_matched <= summary.objects_listed);
    }

    /// Every matching key starts with one of the derived list prefixes.
    #[test]
    fn derived_prefixes_cover_all_matches(
        keys in proptest::collection::vec(key_strategy(), 0..40),
        include in include_pool(),
    ) {
        let matcher = GlobMatcher::new(&MatchConfig {
            includes: vec![include],
            excludes: Vec::new(),
            include_hidden: true,
        })
        .unwrap();
        for key in &keys {
            if matcher.matches(key) {
                prop_assert!(
                    matcher
                        .prefixes()
                        .iter()
                        .any(|p| key.starts_with(p.as_str())),
                    "{} not covered by {:?}",
                    key,
                    matcher.prefixes()
                );
            }
        }
    }

    /// Mixed-framing roundtrip reconstructs the byte stream exactly.
    #[test]
    fn stream_roundtrip_reconstructs_chunks(
        chunks in proptest::collection::vec(
            proptest::collection::vec(any::<u8>(), 0..512),
            0..8,
        ),
    ) {
        let mut encoded = Vec::new();
        {
            let writer = StreamWriter::new(&mut encoded, "job", "memory");
            writer
                .write_open(&StreamOpen {
                    stream_id: "st".into(),
                    uri: "memory://bucket/key".into(),
                    size: None,
                    etag: None,
                    last_modified: None,
                    content_type: None,
                    range: None,
                })
                .unwrap();
            for (seq, chunk) in chunks.iter().enumerate() {
                writer
                    .write_chunk(
                        &StreamChunk {
                            stream_id: "st".into(),
                            seq: seq as u64,
                            nbytes: chunk.len() as u64,
                            offset: None,
                        },
                        &mut Cursor::new(chunk),
                    )
                    .unwrap();
            }
            writer
                .write_close(&StreamClose {
                    stream_id: "st".into(),
                    status: StreamStatus::Success,
                    chunks: chunks.len() as u64,
                    bytes: chunks.iter().map(|c| c.len() as u64).sum(),
                    duration_ns: None,
                })
                .unwrap();
        }

        let mut reader = StreamReader::new(Cursor::new(&encoded));
        let mut rebuilt = Vec::new();
        let mut chunk_count = 0;
        let mut saw_close = false;
        while let Some(event) = reader.next_event().unwrap() {
            match event {
                StreamEvent::Chunk(mut chunk) => {
                    chunk_count += 1;
                    chunk.read_to_end(&mut rebuilt).unwrap();
                }
                StreamEvent::Record(env) => {
                    if env.record_type == "stream.close.v1" {
                        saw_close = true;
                    }
                }
            }
        }
        let expected: Vec<u8> = chunks.concat();
        prop_assert_eq!(rebuilt, expected);
        prop_assert_eq!(chunk_count, chunks.len());
        prop_assert!(saw_close);
    }

    /// Any sink that makes progress in arbitrary small steps still
    /// receives every record whole.
    #[test]
    fn short_writing_sinks_get_whole_lines(
        limits in proptest::collection::vec(1usize..7, 1..16),
        messages in proptest::collection::vec("[a-z ]{0,40}", 1..20),
    ) {
        #[derive(Clone)]
        struct Chunky {
            buf: Arc<std::sync::Mutex<Vec<u8>>>,
            limits: Vec<usize>,
            at: Arc<std::sync::Mutex<usize>>,
        }
        impl Write for Chunky {
            fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
                let mut at = self.at.lock().unwrap();
                let limit = self.limits[*at % self.limits.len()];
                *at += 1;
                let n = data.len().min(limit);
                self.buf.lock().unwrap().extend_from_slice(&data[..n]);
                Ok(n)
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let sink = Chunky {
            buf: Arc::new(std::sync::Mutex::new(Vec::new())),
            limits,
            at: Arc::new(std::sync::Mutex::new(0)),
        };
        let captured = sink.buf.clone();
        let writer = JsonlWriter::new(sink, "job", "memory");
        for message in &messages {
            writer
                .error(&gonimbus::records::ErrorRecord {
                    code: gonimbus::ErrorCode::Internal,
                    message: message.clone(),
                    key: None,
                    prefix: None,
                    details: None,
                })
                .unwrap();
        }
        writer.close().unwrap();

        let out = String::from_utf8(captured.lock().unwrap().clone()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        prop_assert_eq!(lines.len(), messages.len());
        for (line, message) in lines.iter().zip(&messages) {
            let env: Envelope = serde_json::from_str(line).unwrap();
            prop_assert_eq!(env.data["message"].as_str().unwrap(), message.as_str());
        }
    }
}
