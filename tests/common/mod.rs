// Gonimbus object storage toolkit.
// Copyright 2025 Gonimbus developers.

//! Shared helpers for black-box tests.

#![allow(dead_code)]

use gonimbus::output::SharedBuffer;
use gonimbus::records::Envelope;

/// Parse every line of the captured output back into envelopes.
pub fn parse_records(buf: &SharedBuffer) -> Vec<Envelope> {
    let out = buf.into_string();
    out.lines()
        .map(|line| serde_json::from_str(line).expect("every line parses as an envelope"))
        .collect()
}

/// The data payloads of all records with the given type tag, in order.
pub fn records_of_type(records: &[Envelope], record_type: &str) -> Vec<serde_json::Value> {
    records
        .iter()
        .filter(|r| r.record_type == record_type)
        .map(|r| r.data.clone())
        .collect()
}

/// The keys of all object records, in emission order.
pub fn object_keys(records: &[Envelope]) -> Vec<String> {
    records_of_type(records, "object.v1")
        .iter()
        .map(|data| data["key"].as_str().unwrap().to_owned())
        .collect()
}
