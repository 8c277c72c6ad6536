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

//! Structured crawl, inspection, and transfer of objects in S3 and
//! S3-compatible storage, emitting a typed JSONL event stream.

pub mod config;
pub mod counters;
pub mod crawl;
pub mod errors;
pub mod filter;
pub mod matcher;
pub(crate) mod misc;
pub mod output;
pub mod preflight;
pub mod provider;
pub mod records;
pub mod shard;
pub mod stream;
pub mod transfer;
pub mod uri;

pub use crate::counters::{Counter, Counters, JobSummary};
pub use crate::crawl::Crawler;
pub use crate::errors::{Error, ErrorCode, Result};
pub use crate::filter::CompiledFilter;
pub use crate::matcher::GlobMatcher;
pub use crate::output::{JsonlWriter, Writer};
pub use crate::provider::Provider;
pub use crate::transfer::Transferrer;
pub use crate::uri::ObjectUri;

/// Crate version string.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
