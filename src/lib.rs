//! Pipelined client for S3-compatible object stores (Amazon S3 and the
//! Walrus variant).
//!
//! A [`Connection`] wraps one transport handle and runs one request at a
//! time: synchronously (`put`, `get`, `del`, listings, multipart uploads),
//! or pipelined through a shared [`AsyncMan`] worker (`pend_*` /
//! `complete_*`). [`wait_any`] blocks until any connection of a pool has
//! finished, so one thread can keep many requests in flight.
//!
//! ```no_run
//! use s3pipe::{AsyncMan, Connection, Credentials, PutOptions, S3Config, wait_any};
//! use std::time::Duration;
//!
//! fn main() -> s3pipe::Result<()> {
//!     let config = S3Config::new(Credentials::new("access", "secret"));
//!     let async_man = AsyncMan::new().expect("worker");
//!
//!     let mut con = Connection::new(config.clone())?;
//!     con.put("bucket", "key", b"payload", &PutOptions::default())?;
//!
//!     // Pipelined: start on several connections, wait for the first.
//!     let mut other = Connection::new(config)?;
//!     con.pend_get(&async_man, "bucket", "key", 1 << 20, None)?;
//!     other.pend_get(&async_man, "bucket", "key2", 1 << 20, None)?;
//!
//!     let winner = wait_any(&[&con, &other], 0, Duration::from_secs(60))?;
//!     if winner == Some(0) {
//!         let (response, data) = con.complete_get()?;
//!         assert_eq!(data.len() as i64, response.loaded_content_length);
//!     }
//!     Ok(())
//! }
//! ```

mod actions;
mod asyncman;
mod certs;
mod config;
mod connection;
mod credentials;
mod error;
mod request;
mod response;
mod signature;
mod tools;
mod xml;

pub use crate::actions::PutOptions;
pub use crate::asyncman::{AsyncMan, MAX_WAIT};
pub use crate::config::{S3Config, CA_CERT_IGNORE};
pub use crate::connection::{wait_any, Connection};
pub use crate::credentials::Credentials;
pub use crate::error::{Error, Result};
pub use crate::request::{GetLoader, PutUploader};
pub use crate::response::{
    S3Bucket, S3CompleteMultipartUploadResponse, S3DelResponse, S3GetResponse,
    S3InitiateMultipartUploadResponse, S3ListMultipartUploadsResponse, S3ListObjectsResponse,
    S3MultipartUpload, S3Object, S3PutResponse,
};
