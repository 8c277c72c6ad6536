// Gonimbus object storage toolkit.
// Copyright 2025 Gonimbus developers.

//! Black-box tests of the `gonimbus` binary.
//!
//! Only invocations that fail before touching a provider are exercised
//! here; live S3 behavior belongs to the integration tests.

use assert_cmd::Command;
use predicates::prelude::*;

fn gonimbus() -> Command {
    Command::cargo_bin("gonimbus").unwrap()
}

#[test]
fn version_banner() {
    gonimbus()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn help_lists_subcommands() {
    gonimbus()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("crawl"))
        .stdout(predicate::str::contains("transfer"))
        .stdout(predicate::str::contains("preflight"))
        .stdout(predicate::str::contains("stream"));
}

#[test]
fn no_subcommand_is_a_usage_error() {
    gonimbus().assert().failure().code(2);
}

#[test]
fn invalid_uri_exits_with_invalid_input() {
    gonimbus()
        .args(["crawl", "not-a-uri"])
        .assert()
        .failure()
        .code(1);
}

#[test]
fn missing_bucket_exits_with_invalid_input() {
    gonimbus()
        .args(["crawl", "s3:///no-bucket"])
        .assert()
        .failure()
        .code(1);
}

#[test]
fn unsupported_scheme_exits_with_invalid_input() {
    gonimbus()
        .args(["crawl", "gs://bucket/data/"])
        .assert()
        .failure()
        .code(1);
}

#[test]
fn invalid_glob_exits_with_invalid_input() {
    gonimbus()
        .args(["crawl", "s3://bucket/data/[unclosed"])
        .assert()
        .failure()
        .code(1);
}

#[test]
fn invalid_size_filter_exits_with_invalid_input() {
    gonimbus()
        .args(["crawl", "s3://bucket/data/", "--size-min", "a-lot"])
        .assert()
        .failure()
        .code(1);
}

#[test]
fn invalid_date_filter_exits_with_invalid_input() {
    gonimbus()
        .args([
            "crawl",
            "s3://bucket/data/",
            "--modified-after",
            "yesterday",
        ])
        .assert()
        .failure()
        .code(1);
}

#[test]
fn transfer_target_must_be_a_prefix() {
    gonimbus()
        .args([
            "transfer",
            "s3://src/data/",
            "s3://dst/single-object.txt",
        ])
        .assert()
        .failure()
        .code(1);
}

#[test]
fn bad_preflight_mode_is_a_usage_error() {
    gonimbus()
        .args(["crawl", "s3://bucket/", "--preflight", "full-send"])
        .assert()
        .failure()
        .code(2);
}
