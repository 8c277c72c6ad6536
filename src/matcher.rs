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

//! Compile include/exclude glob patterns into list prefixes and an
//! admit/reject predicate over keys.
//!
//! Patterns use the doublestar dialect: `?`, `*`, `**`, `[...]`, with
//! `\` as the escape. `*` and `?` never cross a `/`; `**` does.

use globset::GlobBuilder;

use crate::config::MatchConfig;
use crate::errors::{Error, Result};

/// Characters that start a glob construct when unescaped.
pub(crate) const GLOB_CHARS: &[char] = &['*', '?', '[', '{'];

/// True if `s` contains an unescaped glob metacharacter.
pub(crate) fn is_pattern(s: &str) -> bool {
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            chars.next();
        } else if GLOB_CHARS.contains(&c) {
            return true;
        }
    }
    false
}

/// The longest literal prefix of a pattern before its first unescaped
/// metacharacter, with escapes resolved.
fn literal_prefix(pattern: &str) -> String {
    let mut out = String::new();
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some(escaped) => out.push(escaped),
                None => break,
            }
        } else if GLOB_CHARS.contains(&c) {
            break;
        } else {
            out.push(c);
        }
    }
    out
}

/// True if any segment of the key begins with a dot.
fn has_hidden_segment(key: &str) -> bool {
    key.split('/').any(|segment| segment.starts_with('.'))
}

#[derive(Debug)]
struct CompiledGlob {
    matcher: globset::GlobMatcher,
}

impl CompiledGlob {
    fn new(pattern: &str) -> Result<CompiledGlob> {
        let glob = GlobBuilder::new(pattern)
            .literal_separator(true)
            .backslash_escape(true)
            .build()
            .map_err(|source| Error::Pattern {
                pattern: pattern.to_owned(),
                source,
            })?;
        Ok(CompiledGlob {
            matcher: glob.compile_matcher(),
        })
    }

    fn is_match(&self, key: &str) -> bool {
        self.matcher.is_match(key)
    }
}

/// A compiled include/exclude pattern set.
///
/// Matching is deterministic and independent of pattern order.
#[derive(Debug)]
pub struct GlobMatcher {
    includes: Vec<CompiledGlob>,
    excludes: Vec<CompiledGlob>,
    include_hidden: bool,
    prefixes: Vec<String>,
}

impl GlobMatcher {
    /// Compile a match configuration. Any invalid pattern fails the
    /// whole construction.
    pub fn new(config: &MatchConfig) -> Result<GlobMatcher> {
        if config.includes.is_empty() {
            return Err(Error::InvalidConfiguration {
                reason: "at least one include pattern is required".to_owned(),
            });
        }
        let includes = config
            .includes
            .iter()
            .map(|p| CompiledGlob::new(p))
            .collect::<Result<Vec<_>>>()?;
        let excludes = config
            .excludes
            .iter()
            .map(|p| CompiledGlob::new(p))
            .collect::<Result<Vec<_>>>()?;
        let prefixes = derive_prefixes(&config.includes);
        Ok(GlobMatcher {
            includes,
            excludes,
            include_hidden: config.include_hidden,
            prefixes,
        })
    }

    /// The minimal literal prefixes that bound listing for this pattern
    /// set: ordered, unique, and subsumption-reduced so no key is listed
    /// twice. Excludes contribute nothing.
    pub fn prefixes(&self) -> &[String] {
        &self.prefixes
    }

    /// Admit or reject one key.
    pub fn matches(&self, key: &str) -> bool {
        if !self.include_hidden && has_hidden_segment(key) {
            return false;
        }
        self.includes.iter().any(|g| g.is_match(key))
            && !self.excludes.iter().any(|g| g.is_match(key))
    }
}

fn derive_prefixes(includes: &[String]) -> Vec<String> {
    let derived: Vec<String> = includes.iter().map(|p| literal_prefix(p)).collect();
    if derived.iter().any(|p| p.is_empty()) {
        // An unbounded include forces a full listing anyway.
        return vec![String::new()];
    }
    let mut kept: Vec<String> = Vec::new();
    for prefix in derived {
        if kept.iter().any(|k| prefix.starts_with(k.as_str())) {
            continue;
        }
        kept.retain(|k| !k.starts_with(&prefix));
        kept.push(prefix);
    }
    kept
}
