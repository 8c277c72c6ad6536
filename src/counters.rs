// Gonimbus object storage toolkit.
// Copyright 2025 Gonimbus developers.

//! Track counters of objects listed, matched, transferred, and failed.
//!
//! Pipeline stages update counters through a shared [Counters]; the final
//! [JobSummary] is read once after all stages have joined.

#![warn(missing_docs)]

use std::fmt::{self, Debug};
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering::Relaxed;
use std::time::Duration;

use itertools::Itertools;
use strum::{EnumCount, IntoEnumIterator};
use strum_macros::{EnumCount, EnumIter};

use crate::misc::duration_human;
use crate::records::SummaryRecord;

/// Counters of objects or bytes.
#[derive(Debug, Clone, Copy, Eq, PartialEq, EnumCount, EnumIter)]
pub enum Counter {
    /// Prefixes fully listed, including sharded expansions.
    PrefixesListed,
    /// Objects returned by list operations before matching.
    ObjectsListed,
    /// Objects admitted by the matcher and filters.
    ObjectsMatched,
    /// Total bytes across matched objects.
    BytesTotal,
    /// Objects copied or moved to the target.
    ObjectsTransferred,
    /// Bytes written in successful transfers.
    BytesTransferred,
    /// Objects skipped by dedup or on-exists policy.
    ObjectsSkipped,
    /// Source objects deleted after a successful move.
    ObjectsDeleted,
    /// Error records emitted.
    Errors,
}

/// Counter values, identified by a [Counter].
#[derive(Default)]
pub struct Counters {
    counters: [AtomicU64; Counter::COUNT],
}

impl Counters {
    /// Increase the value for a given counter by an amount.
    pub fn count(&self, counter: Counter, increment: u64) {
        self.counters[counter as usize].fetch_add(increment, Relaxed);
    }

    /// Get the current value of a counter.
    pub fn get(&self, counter: Counter) -> u64 {
        self.counters[counter as usize].load(Relaxed)
    }

    /// Return an iterator over counter, value pairs.
    pub fn iter(&self) -> impl Iterator<Item = (Counter, u64)> {
        Counter::iter()
            .map(move |c| (c, self.counters[c as usize].load(Relaxed)))
            .collect_vec()
            .into_iter()
    }
}

impl Debug for Counters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Counters");
        for i in Counter::iter() {
            s.field(
                &format!("{:?}", i),
                &self.counters[i as usize].load(Relaxed),
            );
        }
        s.finish()
    }
}

/// End-of-job accounting.
///
/// Invariants on a completed run: `objects_matched <= objects_listed`, and
/// `bytes_transferred` equals the byte sum of successful transfer records.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSummary {
    /// Objects seen by listing.
    pub objects_listed: u64,
    /// Objects admitted by matching and filters.
    pub objects_matched: u64,
    /// Byte sum of matched objects.
    pub bytes_total: u64,
    /// Objects transferred (zero for crawl jobs).
    pub objects_transferred: u64,
    /// Bytes transferred (zero for crawl jobs).
    pub bytes_transferred: u64,
    /// Objects skipped by policy (zero for crawl jobs).
    pub objects_skipped: u64,
    /// Error records emitted.
    pub errors: u64,
    /// Wall-clock duration of the job.
    pub duration: Duration,
    /// The list prefixes the job enumerated, ordered and unique.
    pub prefixes: Vec<String>,
}

impl JobSummary {
    /// Snapshot counters into a summary.
    pub fn from_counters(counters: &Counters, duration: Duration, prefixes: Vec<String>) -> Self {
        JobSummary {
            objects_listed: counters.get(Counter::ObjectsListed),
            objects_matched: counters.get(Counter::ObjectsMatched),
            bytes_total: counters.get(Counter::BytesTotal),
            objects_transferred: counters.get(Counter::ObjectsTransferred),
            bytes_transferred: counters.get(Counter::BytesTransferred),
            objects_skipped: counters.get(Counter::ObjectsSkipped),
            errors: counters.get(Counter::Errors),
            duration,
            prefixes,
        }
    }

    /// Render as the wire-form summary record.
    ///
    /// Transfer-only fields are omitted unless `transfer` is set, so crawl
    /// summaries never carry them.
    pub fn to_record(&self, transfer: bool) -> SummaryRecord {
        SummaryRecord {
            objects_listed: self.objects_listed,
            objects_matched: self.objects_matched,
            bytes_total: self.bytes_total,
            errors: self.errors,
            duration: self.duration.as_secs_f64(),
            duration_human: duration_human(self.duration),
            prefixes: self.prefixes.clone(),
            objects_transferred: transfer.then_some(self.objects_transferred),
            bytes_transferred: transfer.then_some(self.bytes_transferred),
            objects_skipped: transfer.then_some(self.objects_skipped),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn simple_counts() {
        let counters = Counters::default();
        counters.count(Counter::ObjectsListed, 1);
        counters.count(Counter::ObjectsListed, 2);
        counters.count(Counter::BytesTotal, 100);
        assert_eq!(counters.get(Counter::ObjectsListed), 3);
        assert_eq!(counters.get(Counter::ObjectsMatched), 0);
        assert_eq!(counters.get(Counter::BytesTotal), 100);
    }

    #[test]
    fn iter_counters() {
        let counters = Counters::default();
        counters.count(Counter::Errors, 2);
        counters.iter().for_each(|(c, v)| {
            assert_eq!(counters.get(c), v);
        });
        assert_eq!(counters.iter().count(), Counter::COUNT);
    }

    #[test]
    fn summary_record_omits_transfer_fields_for_crawl() {
        let counters = Counters::default();
        counters.count(Counter::ObjectsListed, 5);
        counters.count(Counter::ObjectsMatched, 3);
        let summary = JobSummary::from_counters(
            &counters,
            Duration::from_secs(2),
            vec!["data/".to_owned()],
        );
        let record = summary.to_record(false);
        assert_eq!(record.objects_listed, 5);
        assert_eq!(record.objects_transferred, None);
        let json = serde_json::to_string(&record).unwrap();
        assert!(!json.contains("objects_transferred"), "{json}");
    }

    #[test]
    fn summary_record_keeps_transfer_fields_for_transfer() {
        let counters = Counters::default();
        counters.count(Counter::ObjectsTransferred, 2);
        counters.count(Counter::BytesTransferred, 300);
        let summary = JobSummary::from_counters(&counters, Duration::from_millis(1500), vec![]);
        let record = summary.to_record(true);
        assert_eq!(record.objects_transferred, Some(2));
        assert_eq!(record.bytes_transferred, Some(300));
    }
}
