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

//! Post-list predicates over object summaries: size range, modification
//! window, key regex, content type.
//!
//! All inputs are validated at construction; a pipeline never sees an
//! uncompiled filter.

use regex::Regex;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime, UtcOffset};

use crate::config::FilterSpec;
use crate::errors::{Error, Result};
use crate::provider::ObjectSummary;

/// Parse a size with SI (1KB = 1000) or IEC (1KiB = 1024) units.
/// A bare number is bytes.
pub fn parse_size(input: &str) -> Result<u64> {
    let s = input.trim();
    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    let (digits, unit) = s.split_at(split);
    if digits.is_empty() {
        return Err(Error::Filter {
            reason: format!("invalid size {input:?}"),
        });
    }
    let value: u64 = digits.parse().map_err(|_| Error::Filter {
        reason: format!("invalid size {input:?}"),
    })?;
    let multiplier: u64 = match unit.trim() {
        "" | "B" => 1,
        "KB" => 1000,
        "KiB" => 1024,
        "MB" => 1_000_000,
        "MiB" => 1 << 20,
        "GB" => 1_000_000_000,
        "GiB" => 1 << 30,
        other => {
            return Err(Error::Filter {
                reason: format!("unknown size unit {other:?} in {input:?}"),
            });
        }
    };
    value.checked_mul(multiplier).ok_or_else(|| Error::Filter {
        reason: format!("size {input:?} overflows"),
    })
}

/// Parse an RFC 3339 timestamp, or an ISO-8601 date taken as start of
/// day UTC.
pub fn parse_instant(input: &str) -> Result<OffsetDateTime> {
    if let Ok(ts) = OffsetDateTime::parse(input, &Rfc3339) {
        return Ok(ts.to_offset(UtcOffset::UTC));
    }
    let date_format = format_description!("[year]-[month]-[day]");
    if let Ok(date) = Date::parse(input, &date_format) {
        return Ok(date.midnight().assume_utc());
    }
    Err(Error::Filter {
        reason: format!("invalid date or timestamp {input:?}"),
    })
}

/// A compiled filter set, applied after pattern matching.
#[derive(Debug, Default)]
pub struct CompiledFilter {
    size_min: Option<u64>,
    size_max: Option<u64>,
    after: Option<OffsetDateTime>,
    before: Option<OffsetDateTime>,
    key_regex: Option<Regex>,
    content_type: Option<String>,
}

impl CompiledFilter {
    pub fn new(spec: &FilterSpec) -> Result<CompiledFilter> {
        let mut filter = CompiledFilter::default();
        if let Some(size) = &spec.size {
            filter.size_min = size.min.as_deref().map(parse_size).transpose()?;
            filter.size_max = size.max.as_deref().map(parse_size).transpose()?;
            if let (Some(min), Some(max)) = (filter.size_min, filter.size_max) {
                if min > max {
                    return Err(Error::Filter {
                        reason: format!("size min {min} exceeds max {max}"),
                    });
                }
            }
        }
        if let Some(modified) = &spec.modified {
            filter.after = modified.after.as_deref().map(parse_instant).transpose()?;
            filter.before = modified.before.as_deref().map(parse_instant).transpose()?;
        }
        if let Some(pattern) = &spec.key_regex {
            filter.key_regex = Some(Regex::new(pattern).map_err(|e| Error::Filter {
                reason: format!("invalid key regex: {e}"),
            })?);
        }
        filter.content_type = spec.content_type.clone();
        Ok(filter)
    }

    /// True when a content-type filter is configured, so the pipeline
    /// must enrich summaries with a head before filtering.
    pub fn needs_content_type(&self) -> bool {
        self.content_type.is_some()
    }

    /// True if nothing is filtered.
    pub fn is_empty(&self) -> bool {
        self.size_min.is_none()
            && self.size_max.is_none()
            && self.after.is_none()
            && self.before.is_none()
            && self.key_regex.is_none()
            && self.content_type.is_none()
    }

    /// Apply the filter to one summary. `content_type` comes from head
    /// enrichment; an object with unknown content type never satisfies a
    /// content-type filter.
    pub fn admits(&self, summary: &ObjectSummary, content_type: Option<&str>) -> bool {
        if let Some(min) = self.size_min {
            if summary.size < min {
                return false;
            }
        }
        if let Some(max) = self.size_max {
            if summary.size > max {
                return false;
            }
        }
        // Both date bounds are strict.
        if let Some(after) = self.after {
            if summary.last_modified <= after {
                return false;
            }
        }
        if let Some(before) = self.before {
            if summary.last_modified >= before {
                return false;
            }
        }
        if let Some(regex) = &self.key_regex {
            if !regex.is_match(&summary.key) {
                return false;
            }
        }
        if let Some(want) = &self.content_type {
            match content_type {
                Some(actual) if actual == want => {}
                _ => return false,
            }
        }
        true
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use time::macros::datetime;

    use super::*;
    use crate::config::{ModifiedRangeSpec, SizeRangeSpec};

    fn summary(key: &str, size: u64, last_modified: OffsetDateTime) -> ObjectSummary {
        ObjectSummary {
            key: key.to_owned(),
            size,
            etag: "etag".to_owned(),
            last_modified,
        }
    }

    #[rstest]
    #[case("100", 100)]
    #[case("1KB", 1000)]
    #[case("1KiB", 1024)]
    #[case("2MB", 2_000_000)]
    #[case("2MiB", 2 * 1024 * 1024)]
    #[case("1GB", 1_000_000_000)]
    #[case("1GiB", 1 << 30)]
    #[case("5B", 5)]
    fn size_units(#[case] input: &str, #[case] expected: u64) {
        assert_eq!(parse_size(input).unwrap(), expected);
    }

    #[rstest]
    #[case("")]
    #[case("KB")]
    #[case("1TB")]
    #[case("-5KB")]
    #[case("1.5MB")]
    fn bad_sizes_rejected(#[case] input: &str) {
        assert!(parse_size(input).is_err(), "{input:?} should fail");
    }

    #[test]
    fn min_above_max_is_a_hard_error() {
        let spec = FilterSpec {
            size: Some(SizeRangeSpec {
                min: Some("2KB".into()),
                max: Some("1KB".into()),
            }),
            ..FilterSpec::default()
        };
        assert!(CompiledFilter::new(&spec).is_err());
    }

    #[test]
    fn size_bounds_are_inclusive() {
        let spec = FilterSpec {
            size: Some(SizeRangeSpec {
                min: Some("1KB".into()),
                max: Some("2KB".into()),
            }),
            ..FilterSpec::default()
        };
        let filter = CompiledFilter::new(&spec).unwrap();
        let when = datetime!(2024-05-01 00:00:00 UTC);
        assert!(!filter.admits(&summary("a", 999, when), None));
        assert!(filter.admits(&summary("a", 1000, when), None));
        assert!(filter.admits(&summary("a", 2000, when), None));
        assert!(!filter.admits(&summary("a", 2001, when), None));
    }

    #[test]
    fn date_parses_as_utc_midnight() {
        let instant = parse_instant("2024-05-01").unwrap();
        assert_eq!(instant, datetime!(2024-05-01 00:00:00 UTC));
    }

    #[test]
    fn rfc3339_offset_is_normalized_to_utc() {
        let instant = parse_instant("2024-05-01T02:00:00+02:00").unwrap();
        assert_eq!(instant, datetime!(2024-05-01 00:00:00 UTC));
    }

    #[test]
    fn garbage_dates_rejected() {
        assert!(parse_instant("yesterday").is_err());
        assert!(parse_instant("2024-13-01").is_err());
    }

    #[test]
    fn modified_bounds_are_strict() {
        let spec = FilterSpec {
            modified: Some(ModifiedRangeSpec {
                after: Some("2024-05-01".into()),
                before: Some("2024-06-01".into()),
            }),
            ..FilterSpec::default()
        };
        let filter = CompiledFilter::new(&spec).unwrap();
        // Exactly on either bound is excluded.
        assert!(!filter.admits(
            &summary("a", 1, datetime!(2024-05-01 00:00:00 UTC)),
            None
        ));
        assert!(filter.admits(
            &summary("a", 1, datetime!(2024-05-01 00:00:01 UTC)),
            None
        ));
        assert!(!filter.admits(
            &summary("a", 1, datetime!(2024-06-01 00:00:00 UTC)),
            None
        ));
    }

    #[test]
    fn key_regex_applies_to_full_key() {
        let spec = FilterSpec {
            key_regex: Some(r"\.parquet$".into()),
            ..FilterSpec::default()
        };
        let filter = CompiledFilter::new(&spec).unwrap();
        let when = datetime!(2024-05-01 00:00:00 UTC);
        assert!(filter.admits(&summary("data/x.parquet", 1, when), None));
        assert!(!filter.admits(&summary("data/x.csv", 1, when), None));
    }

    #[test]
    fn invalid_regex_is_a_hard_error() {
        let spec = FilterSpec {
            key_regex: Some("(unclosed".into()),
            ..FilterSpec::default()
        };
        assert!(CompiledFilter::new(&spec).is_err());
    }

    #[test]
    fn content_type_requires_enrichment() {
        let spec = FilterSpec {
            content_type: Some("text/plain".into()),
            ..FilterSpec::default()
        };
        let filter = CompiledFilter::new(&spec).unwrap();
        assert!(filter.needs_content_type());
        let when = datetime!(2024-05-01 00:00:00 UTC);
        assert!(filter.admits(&summary("a", 1, when), Some("text/plain")));
        assert!(!filter.admits(&summary("a", 1, when), Some("image/png")));
        assert!(!filter.admits(&summary("a", 1, when), None));
    }
}
