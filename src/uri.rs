// Gonimbus object storage toolkit.
// Copyright 2025 Gonimbus developers.

//! Logical object references: `<provider>://<bucket>/<key-or-pattern>`.

use std::fmt;
use std::str::FromStr;

use url::Url;

use crate::errors::Error;
use crate::matcher::is_pattern;

/// A parsed object URI such as `s3://bucket/data/**/*.txt`.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ObjectUri {
    pub provider: String,
    pub bucket: String,
    /// Key, key prefix, or glob pattern. May be empty for a whole bucket.
    pub path: String,
}

impl ObjectUri {
    /// True when the path names a prefix rather than a single object:
    /// empty, or ending in the delimiter.
    pub fn is_prefix(&self) -> bool {
        self.path.is_empty() || self.path.ends_with('/')
    }

    /// True when the path contains an unescaped glob metacharacter.
    pub fn is_pattern(&self) -> bool {
        is_pattern(&self.path)
    }
}

impl FromStr for ObjectUri {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let url = Url::parse(s).map_err(|e| Error::Uri {
            uri: s.to_owned(),
            reason: e.to_string(),
        })?;
        let bucket = url.authority().to_owned();
        if bucket.is_empty() {
            return Err(Error::Uri {
                uri: s.to_owned(),
                reason: "missing bucket".to_owned(),
            });
        }
        let path = url.path().trim_start_matches('/').to_owned();
        Ok(ObjectUri {
            provider: url.scheme().to_owned(),
            bucket,
            path,
        })
    }
}

impl fmt::Display for ObjectUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}/{}", self.provider, self.bucket, self.path)
    }
}
