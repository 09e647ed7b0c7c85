//! Shared helpers for the end-to-end suite.
//!
//! These tests talk to a real S3-compatible endpoint configured through
//! the environment:
//!
//! - `AWS_ACCESS_KEY` / `AWS_SECRET_KEY` — credentials
//! - `AWS_BUCKET_NAME` — an existing, disposable bucket
//! - `AWS_HOST` — optional endpoint override (`host` or `host:port`)
//! - `AWS_PROXY` — optional proxy URL
//!
//! All tests are `#[ignore]`d by default; run them with
//! `cargo test -- --ignored --test-threads=1` against a bucket whose
//! contents you do not mind losing.

#![allow(dead_code)]

use std::env;

use s3pipe::{Connection, Credentials, S3Config};

pub fn test_config() -> S3Config {
    let credentials =
        Credentials::from_env().expect("AWS_ACCESS_KEY and AWS_SECRET_KEY must be set");
    let mut config = S3Config::new(credentials);

    if let Ok(host) = env::var("AWS_HOST") {
        match host.rsplit_once(':') {
            Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => {
                config.host = name.to_string();
                config.port = port.parse().ok();
            }
            _ => config.host = host,
        }
    }

    if let Ok(proxy) = env::var("AWS_PROXY") {
        if !proxy.is_empty() {
            config.proxy = Some(proxy);
        }
    }

    config
}

pub fn bucket() -> String {
    env::var("AWS_BUCKET_NAME").expect("AWS_BUCKET_NAME must be set")
}

pub fn connection() -> Connection {
    Connection::new(test_config()).expect("connection")
}

/// Remove everything under `prefix` so a test starts from a known state.
pub fn clean_prefix(con: &mut Connection, bucket: &str, prefix: &str) {
    con.del_all(bucket, Some(prefix), None).expect("del_all");
}
