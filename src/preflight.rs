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

//! Staged capability probes run before a job.
//!
//! Modes are totally ordered: `plan-only < read-safe < write-probe`;
//! each mode performs every check of the modes below it. The preflight
//! record is produced even when a probe fails; the caller decides
//! whether the first failure is fatal.

use tracing::debug;

use crate::config::{read_only_latch, PreflightConfig, PreflightMode, ProbeStrategy};
use crate::errors::{Error, ErrorCode};
use crate::misc::random_suffix;
use crate::provider::Provider;
use crate::records::{PreflightCheckResult, PreflightRecord};

/// The record plus the first probe failure, if any.
#[derive(Debug)]
pub struct PreflightOutcome {
    pub record: PreflightRecord,
    pub first_error: Option<Error>,
}

impl PreflightOutcome {
    fn new(config: &PreflightConfig) -> PreflightOutcome {
        PreflightOutcome {
            record: PreflightRecord {
                mode: config.mode.to_string(),
                probe_strategy: config.probe_strategy.to_string(),
                probe_prefix: config.probe_prefix.clone(),
                results: Vec::new(),
            },
            first_error: None,
        }
    }

    fn push(&mut self, result: PreflightCheckResult, error: Option<Error>) -> bool {
        let ok = result.allowed;
        self.record.results.push(result);
        if !ok && self.first_error.is_none() {
            self.first_error =
                Some(error.unwrap_or_else(|| Error::InvalidConfiguration {
                    reason: "preflight probe failed".to_owned(),
                }));
        }
        ok
    }
}

/// Probes for a crawl job against its source provider.
pub async fn check_crawl(
    source: &dyn Provider,
    first_prefix: &str,
    config: &PreflightConfig,
    read_only: bool,
) -> PreflightOutcome {
    let mut outcome = PreflightOutcome::new(config);
    if config.mode == PreflightMode::PlanOnly {
        return outcome;
    }
    if config.mode >= PreflightMode::WriteProbe {
        // Probe the write path first so a failed latch or permission is
        // cheap to discover; does not touch the provider when latched.
        if !probe_write(source, config, read_only, &mut outcome).await {
            return outcome;
        }
    }
    if !probe_source_list(source, first_prefix, &mut outcome).await {
        return outcome;
    }
    if config.probe_source_read {
        probe_source_read(source, config, &mut outcome).await;
    }
    outcome
}

/// Probes for a transfer job, fail-fast in this order: target-write (in
/// write-probe mode), source-list, source-read, target-head.
pub async fn check_transfer(
    source: &dyn Provider,
    target: &dyn Provider,
    first_prefix: &str,
    config: &PreflightConfig,
    read_only: bool,
) -> PreflightOutcome {
    let mut outcome = PreflightOutcome::new(config);
    if config.mode == PreflightMode::PlanOnly {
        return outcome;
    }
    if config.mode >= PreflightMode::WriteProbe
        && !probe_write(target, config, read_only, &mut outcome).await
    {
        return outcome;
    }
    if !probe_source_list(source, first_prefix, &mut outcome).await {
        return outcome;
    }
    if config.probe_source_read && !probe_source_read(source, config, &mut outcome).await {
        return outcome;
    }
    if config.probe_target_head {
        probe_target_head(target, config, &mut outcome).await;
    }
    outcome
}

async fn probe_source_list(
    source: &dyn Provider,
    first_prefix: &str,
    outcome: &mut PreflightOutcome,
) -> bool {
    let result = source
        .list(crate::provider::ListOpts {
            prefix: first_prefix.to_owned(),
            continuation: None,
            max_keys: Some(1),
        })
        .await;
    debug!(prefix = first_prefix, ok = result.is_ok(), "source-list probe");
    match result {
        Ok(_) => outcome.push(allowed("source-list", "list"), None),
        Err(err) => {
            let code = err.kind().code();
            outcome.push(
                denied("source-list", "list", code, err.to_string()),
                Some(err.into()),
            )
        }
    }
}

async fn probe_source_read(
    source: &dyn Provider,
    config: &PreflightConfig,
    outcome: &mut PreflightOutcome,
) -> bool {
    let Some(getter) = source.as_getter() else {
        return outcome.push(
            denied(
                "source-read",
                "get",
                ErrorCode::Internal,
                "provider does not support reads".to_owned(),
            ),
            Some(Error::MissingCapability {
                capability: "ObjectGetter",
                provider: source.tag().to_owned(),
            }),
        );
    };
    // A random key that almost certainly does not exist: NotFound still
    // proves the permission, which is all this probe wants.
    let key = format!("{}read-{}", config.probe_prefix, random_suffix(16));
    match getter.get_object(&key).await {
        Ok(_) => outcome.push(allowed("source-read", "get"), None),
        Err(err) if err.is_not_found() => outcome.push(allowed("source-read", "get"), None),
        Err(err) => {
            let code = err.kind().code();
            outcome.push(
                denied("source-read", "get", code, err.to_string()),
                Some(err.into()),
            )
        }
    }
}

async fn probe_target_head(
    target: &dyn Provider,
    config: &PreflightConfig,
    outcome: &mut PreflightOutcome,
) -> bool {
    let key = format!("{}head-{}", config.probe_prefix, random_suffix(16));
    match target.head(&key).await {
        Ok(_) => outcome.push(allowed("target-head", "head"), None),
        Err(err) if err.is_not_found() => outcome.push(allowed("target-head", "head"), None),
        Err(err) => {
            let code = err.kind().code();
            outcome.push(
                denied("target-head", "head", code, err.to_string()),
                Some(err.into()),
            )
        }
    }
}

async fn probe_write(
    target: &dyn Provider,
    config: &PreflightConfig,
    read_only: bool,
    outcome: &mut PreflightOutcome,
) -> bool {
    if read_only_latch(read_only) {
        // Hard refusal: the provider is never invoked.
        return outcome.push(
            denied(
                "target-write",
                "latch",
                ErrorCode::AccessDenied,
                "read-only latch is set".to_owned(),
            ),
            Some(Error::ReadOnly {
                operation: "write probe",
            }),
        );
    }
    let key = format!("{}write-{}", config.probe_prefix, random_suffix(16));
    match config.probe_strategy {
        ProbeStrategy::Multipart => {
            if let Some(multipart) = target.as_multipart() {
                let created = multipart.create_multipart_upload(&key).await;
                return match created {
                    Ok(upload_id) => {
                        let mut detail = None;
                        if let Err(err) = multipart.abort_multipart_upload(&key, &upload_id).await
                        {
                            // The permission is proven; the dangling
                            // upload is worth reporting.
                            detail = Some(format!("abort failed: {err}"));
                        }
                        outcome.push(
                            PreflightCheckResult {
                                capability: "target-write".to_owned(),
                                allowed: true,
                                method: "multipart-abort".to_owned(),
                                error_code: None,
                                detail,
                            },
                            None,
                        )
                    }
                    Err(err) => {
                        let code = err.kind().code();
                        outcome.push(
                            denied("target-write", "multipart-abort", code, err.to_string()),
                            Some(err.into()),
                        )
                    }
                };
            }
            // No multipart support; fall through to put-delete.
            probe_put_delete(target, &key, outcome).await
        }
        ProbeStrategy::PutDelete => probe_put_delete(target, &key, outcome).await,
    }
}

async fn probe_put_delete(
    target: &dyn Provider,
    key: &str,
    outcome: &mut PreflightOutcome,
) -> bool {
    let Some(putter) = target.as_putter() else {
        return outcome.push(
            denied(
                "target-write",
                "put-delete",
                ErrorCode::Internal,
                "provider does not support writes".to_owned(),
            ),
            Some(Error::MissingCapability {
                capability: "ObjectPutter",
                provider: target.tag().to_owned(),
            }),
        );
    };
    match putter
        .put_object(key, crate::provider::PutBody::empty(), 0)
        .await
    {
        Ok(()) => {
            let mut detail = None;
            match target.as_deleter() {
                Some(deleter) => {
                    if let Err(err) = deleter.delete_object(key).await {
                        detail = Some(format!("cleanup delete failed: {err}"));
                    }
                }
                None => detail = Some("probe object left behind: no delete support".to_owned()),
            }
            outcome.push(
                PreflightCheckResult {
                    capability: "target-write".to_owned(),
                    allowed: true,
                    method: "put-delete".to_owned(),
                    error_code: None,
                    detail,
                },
                None,
            )
        }
        Err(err) => {
            let code = err.kind().code();
            outcome.push(
                denied("target-write", "put-delete", code, err.to_string()),
                Some(err.into()),
            )
        }
    }
}

fn allowed(capability: &str, method: &str) -> PreflightCheckResult {
    PreflightCheckResult {
        capability: capability.to_owned(),
        allowed: true,
        method: method.to_owned(),
        error_code: None,
        detail: None,
    }
}

fn denied(capability: &str, method: &str, code: ErrorCode, detail: String) -> PreflightCheckResult {
    PreflightCheckResult {
        capability: capability.to_owned(),
        allowed: false,
        method: method.to_owned(),
        error_code: Some(code),
        detail: Some(detail),
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::provider::memory::MemoryProvider;
    use crate::provider::ErrorKind;

    fn config(mode: PreflightMode) -> PreflightConfig {
        PreflightConfig {
            mode,
            ..PreflightConfig::default()
        }
    }

    #[tokio::test]
    async fn plan_only_makes_no_calls() {
        let source = MemoryProvider::new("bucket");
        let outcome =
            check_crawl(&source, "data/", &config(PreflightMode::PlanOnly), false).await;
        assert!(outcome.record.results.is_empty());
        assert!(outcome.first_error.is_none());
        assert_eq!(outcome.record.mode, "plan-only");
    }

    #[tokio::test]
    async fn read_safe_lists_one_key() {
        let source = MemoryProvider::new("bucket");
        source.put_text("data/a.txt", "x");
        let outcome =
            check_crawl(&source, "data/", &config(PreflightMode::ReadSafe), false).await;
        assert_eq!(outcome.record.results.len(), 1);
        let check = &outcome.record.results[0];
        assert_eq!(check.capability, "source-list");
        assert!(check.allowed);
        assert!(outcome.first_error.is_none());
    }

    #[tokio::test]
    async fn read_safe_records_denied_listing() {
        let source = MemoryProvider::new("bucket");
        source.deny_prefix("data/", ErrorKind::AccessDenied);
        let outcome =
            check_crawl(&source, "data/", &config(PreflightMode::ReadSafe), false).await;
        let check = &outcome.record.results[0];
        assert!(!check.allowed);
        assert_eq!(check.error_code, Some(ErrorCode::AccessDenied));
        assert!(outcome.first_error.is_some());
    }

    #[tokio::test]
    async fn source_read_probe_treats_not_found_as_allowed() {
        let source = MemoryProvider::new("bucket");
        source.put_text("data/a.txt", "x");
        let mut cfg = config(PreflightMode::ReadSafe);
        cfg.probe_source_read = true;
        let outcome = check_crawl(&source, "data/", &cfg, false).await;
        assert_eq!(outcome.record.results.len(), 2);
        let read = &outcome.record.results[1];
        assert_eq!(read.capability, "source-read");
        assert!(read.allowed, "NotFound proves the permission");
    }

    #[tokio::test]
    async fn write_probe_prefers_multipart_and_leaves_nothing() {
        let source = MemoryProvider::new("src");
        source.put_text("data/a.txt", "x");
        let target = MemoryProvider::new("dst");
        let outcome = check_transfer(
            &source,
            &target,
            "data/",
            &config(PreflightMode::WriteProbe),
            false,
        )
        .await;
        assert!(outcome.first_error.is_none());
        let write = &outcome.record.results[0];
        assert_eq!(write.capability, "target-write");
        assert_eq!(write.method, "multipart-abort");
        assert!(write.allowed);
        assert_eq!(target.pending_upload_count(), 0);
        assert!(target.keys().is_empty());
    }

    #[tokio::test]
    async fn put_delete_probe_cleans_up() {
        let source = MemoryProvider::new("src");
        source.put_text("data/a.txt", "x");
        let target = MemoryProvider::new("dst");
        let mut cfg = config(PreflightMode::WriteProbe);
        cfg.probe_strategy = ProbeStrategy::PutDelete;
        let outcome = check_transfer(&source, &target, "data/", &cfg, false).await;
        let write = &outcome.record.results[0];
        assert!(write.allowed);
        assert_eq!(write.method, "put-delete");
        assert!(target.keys().is_empty(), "probe object was deleted");
    }

    #[tokio::test]
    async fn latch_refuses_write_probe_without_provider_calls() {
        let source = MemoryProvider::new("src");
        let target = MemoryProvider::new("dst");
        let outcome = check_transfer(
            &source,
            &target,
            "data/",
            &config(PreflightMode::WriteProbe),
            true,
        )
        .await;
        let write = &outcome.record.results[0];
        assert!(!write.allowed);
        assert_eq!(write.method, "latch");
        assert!(matches!(outcome.first_error, Some(Error::ReadOnly { .. })));
        // Fail-fast: no later checks ran, and the target is untouched.
        assert_eq!(outcome.record.results.len(), 1);
        assert_eq!(target.pending_upload_count(), 0);
    }

    #[tokio::test]
    async fn higher_modes_include_lower_checks() {
        let source = MemoryProvider::new("src");
        source.put_text("data/a.txt", "x");
        let target = MemoryProvider::new("dst");
        let read_safe = check_transfer(
            &source,
            &target,
            "data/",
            &config(PreflightMode::ReadSafe),
            false,
        )
        .await;
        let write_probe = check_transfer(
            &source,
            &target,
            "data/",
            &config(PreflightMode::WriteProbe),
            false,
        )
        .await;
        let read_caps: Vec<_> = read_safe
            .record
            .results
            .iter()
            .map(|r| r.capability.clone())
            .collect();
        let write_caps: Vec<_> = write_probe
            .record
            .results
            .iter()
            .map(|r| r.capability.clone())
            .collect();
        for cap in &read_caps {
            assert!(write_caps.contains(cap), "write-probe misses {cap}");
        }
        assert!(write_caps.contains(&"target-write".to_owned()));
    }
}
