//! End-to-end tests for the pipelined path: pend/complete, cancel,
//! `wait_any` and timeouts.
//!
//! See `common/mod.rs` for the required environment.

mod common;

use std::thread::sleep;
use std::time::Duration;

use common::{bucket, connection};
use s3pipe::{wait_any, AsyncMan, Connection, PutOptions};

#[test]
#[ignore = "requires a live S3-compatible endpoint"]
fn test_pend_complete_round_trip() {
    let bucket = bucket();
    let async_man = AsyncMan::new().expect("worker");
    let mut con = connection();
    let key = "tmp-pipe/one.dat";

    con.put(&bucket, key, b"payload", &PutOptions::default())
        .expect("put");

    con.pend_get(&async_man, &bucket, key, 64, None)
        .expect("pend_get");
    assert!(con.is_async_pending());

    let (response, data) = con.complete_get().expect("complete_get");
    assert!(!con.is_async_pending());
    assert_eq!(response.loaded_content_length, 7);
    assert_eq!(data, b"payload");

    con.pend_del(&async_man, &bucket, key).expect("pend_del");
    con.complete_del().expect("complete_del");
}

#[test]
#[ignore = "requires a live S3-compatible endpoint"]
fn test_pend_put_then_get() {
    let bucket = bucket();
    let async_man = AsyncMan::new().expect("worker");
    let mut con = connection();
    let key = "tmp-pipe/two.dat";

    con.pend_put(&async_man, &bucket, key, b"pipelined", &PutOptions::default())
        .expect("pend_put");
    let put = con.complete_put().expect("complete_put");
    assert!(!put.etag.is_empty());

    let mut buffer = [0_u8; 16];
    let get = con.get(&bucket, key, &mut buffer).expect("get");
    assert_eq!(get.loaded_content_length, 9);
    assert_eq!(get.etag, put.etag);

    con.del(&bucket, key).expect("del");
}

#[test]
#[ignore = "requires a live S3-compatible endpoint"]
fn test_cancel_semantics() {
    let bucket = bucket();
    let async_man = AsyncMan::new().expect("worker");
    let mut con = connection();
    let weird_key = "tmp-pipe/weird \u{f1} key?.dat";

    con.put(&bucket, weird_key, &[0xF1], &PutOptions::default())
        .expect("put");

    con.pend_get(&async_man, &bucket, weird_key, 16, None)
        .expect("pend_get");
    assert!(con.is_async_pending());

    // Pending stays observable until completed or cancelled, no matter
    // how long the transfer has been done.
    sleep(Duration::from_millis(100));
    assert!(con.is_async_pending());

    con.cancel_async();
    assert!(!con.is_async_pending());

    // The connection is immediately reusable.
    con.pend_get(&async_man, &bucket, weird_key, 16, None)
        .expect("pend_get");
    let (response, data) = con.complete_get().expect("complete_get");
    assert_eq!(response.loaded_content_length, 1);
    assert_eq!(data, [0xF1]);

    con.del(&bucket, weird_key).expect("del");
}

#[test]
#[ignore = "requires a live S3-compatible endpoint"]
fn test_wait_any_drains_a_pool() {
    const POOL: usize = 4;

    let bucket = bucket();
    let async_man = AsyncMan::new().expect("worker");

    let mut seed = connection();
    let keys: Vec<String> = (0..POOL).map(|i| format!("tmp-pipe/pool{i}.dat")).collect();
    for (i, key) in keys.iter().enumerate() {
        seed.put(&bucket, key, format!("payload-{i}").as_bytes(), &PutOptions::default())
            .expect("put");
    }

    let mut pool: Vec<Connection> = (0..POOL).map(|_| connection()).collect();
    for (con, key) in pool.iter_mut().zip(&keys) {
        con.pend_get(&async_man, &bucket, key, 64, None)
            .expect("pend_get");
    }

    // Drain in completion order, rotating the scan start for fairness.
    let mut remaining: Vec<usize> = (0..POOL).collect();
    let mut start_from = 0;

    while !remaining.is_empty() {
        let winner = {
            let refs: Vec<&Connection> = remaining.iter().map(|&i| &pool[i]).collect();
            wait_any(&refs, start_from, Duration::from_secs(60))
                .expect("wait_any")
                .expect("no timeout expected")
        };

        let index = remaining.remove(winner);
        let (response, data) = pool[index].complete_get().expect("complete_get");
        assert_eq!(response.loaded_content_length, 9);
        assert_eq!(data, format!("payload-{index}").as_bytes());

        start_from = winner + 1;
    }

    for key in &keys {
        seed.del(&bucket, key).expect("del");
    }
}

#[test]
#[ignore = "requires a live S3-compatible endpoint"]
fn test_timeout_surfaces_as_timed_out() {
    let bucket = bucket();
    let async_man = AsyncMan::new().expect("worker");
    let mut con = connection();
    let key = "tmp-pipe/large.dat";
    let payload = vec![0x5A_u8; 5 * 1024 * 1024];

    con.put(&bucket, key, &payload, &PutOptions::default())
        .expect("put");

    con.set_timeout(Duration::from_millis(30));

    // Synchronous path.
    let mut buffer = vec![0_u8; payload.len()];
    let err = con.get(&bucket, key, &mut buffer).expect_err("should time out");
    assert!(
        err.to_string().contains("timed out"),
        "unexpected error: {err}"
    );

    // Pipelined path.
    con.pend_get(&async_man, &bucket, key, payload.len(), None)
        .expect("pend_get");
    let err = con.complete_get().expect_err("should time out");
    assert!(
        err.to_string().contains("timed out"),
        "unexpected error: {err}"
    );

    con.set_timeout(Duration::from_secs(120));
    con.del(&bucket, key).expect("del");
}
