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

//! Expand a base prefix into shard prefixes by breadth-first
//! common-prefix listing.
//!
//! Each level expands every parent to its immediate children under the
//! delimiter; a parent with no children passes through unchanged. Levels
//! are sorted so plans are deterministic, and the shard cap is enforced
//! both within and between levels.

use futures::stream::{self, StreamExt};
use tracing::{debug, trace};

use crate::config::ShardingConfig;
use crate::errors::{Error, Result};
use crate::provider::{PrefixLister, Provider};

/// Expand `base_prefix` according to `config`.
///
/// Fails with [Error::ShardingUnsupported] if the provider cannot list
/// common prefixes; callers that must not fail fall back to the base
/// prefix themselves.
pub async fn discover(
    provider: &dyn Provider,
    base_prefix: &str,
    config: &ShardingConfig,
) -> Result<Vec<String>> {
    let lister = provider
        .as_prefix_lister()
        .ok_or(Error::ShardingUnsupported)?;

    let mut level = vec![base_prefix.to_owned()];
    for depth in 0..config.depth {
        let mut next: Vec<String> = Vec::new();
        let mut results = stream::iter(level.iter().cloned())
            .map(|parent| async move {
                let children = list_children(lister, &parent, &config.delimiter).await;
                (parent, children)
            })
            .buffered(config.list_concurrency);

        let mut capped = false;
        while let Some((parent, children)) = results.next().await {
            let children = children?;
            if children.is_empty() {
                trace!(%parent, "no children, passes through");
                next.push(parent);
            } else {
                trace!(%parent, n = children.len(), "expanded");
                next.extend(children);
            }
            if next.len() >= config.max_shards {
                capped = true;
                break;
            }
        }
        drop(results);

        next.sort();
        next.dedup();
        next.truncate(config.max_shards);
        debug!(depth, shards = next.len(), capped, "shard level complete");
        level = next;
        if capped {
            break;
        }
    }
    Ok(level)
}

async fn list_children(
    lister: &dyn PrefixLister,
    parent: &str,
    delimiter: &str,
) -> Result<Vec<String>> {
    let mut children = Vec::new();
    let mut continuation = None;
    loop {
        let page = lister
            .list_common_prefixes(parent, delimiter, continuation)
            .await?;
        children.extend(page.prefixes);
        match page.next_continuation {
            Some(token) => continuation = Some(token),
            None => break,
        }
    }
    Ok(children)
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::provider::memory::MemoryProvider;

    fn provider_with_tree() -> MemoryProvider {
        let provider = MemoryProvider::new("bucket");
        for key in [
            "data/2024/01/a.txt",
            "data/2024/02/b.txt",
            "data/2025/01/c.txt",
            "data/top.txt",
            "logs/x.log",
        ] {
            provider.put_text(key, "contents");
        }
        provider
    }

    #[tokio::test]
    async fn depth_one_expands_to_immediate_children() {
        let provider = provider_with_tree();
        let config = ShardingConfig {
            enabled: true,
            depth: 1,
            ..ShardingConfig::default()
        };
        let shards = discover(&provider, "data/", &config).await.unwrap();
        assert_eq!(shards, ["data/2024/", "data/2025/"]);
    }

    #[tokio::test]
    async fn depth_two_recurses() {
        let provider = provider_with_tree();
        let config = ShardingConfig {
            enabled: true,
            depth: 2,
            ..ShardingConfig::default()
        };
        let shards = discover(&provider, "data/", &config).await.unwrap();
        assert_eq!(shards, ["data/2024/01/", "data/2024/02/", "data/2025/01/"]);
    }

    #[tokio::test]
    async fn childless_parent_passes_through() {
        let provider = provider_with_tree();
        let config = ShardingConfig {
            enabled: true,
            depth: 3,
            ..ShardingConfig::default()
        };
        // At depth 3 the leaves have no further delimiters, so level 3
        // carries level 2 through unchanged.
        let shards = discover(&provider, "data/", &config).await.unwrap();
        assert_eq!(shards, ["data/2024/01/", "data/2024/02/", "data/2025/01/"]);
    }

    #[tokio::test]
    async fn cap_truncates_expansion() {
        let provider = provider_with_tree();
        let config = ShardingConfig {
            enabled: true,
            depth: 2,
            max_shards: 2,
            ..ShardingConfig::default()
        };
        let shards = discover(&provider, "data/", &config).await.unwrap();
        assert_eq!(shards.len(), 2);
        for shard in &shards {
            assert!(shard.starts_with("data/"));
        }
    }

    #[tokio::test]
    async fn plans_are_deterministic() {
        let provider = provider_with_tree();
        let config = ShardingConfig {
            enabled: true,
            depth: 2,
            ..ShardingConfig::default()
        };
        let first = discover(&provider, "", &config).await.unwrap();
        let second = discover(&provider, "", &config).await.unwrap();
        assert_eq!(first, second);
    }
}
