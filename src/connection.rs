//! The user-facing connection.
//!
//! A connection owns one transport handle and carries at most one
//! in-flight request. Synchronous operations run to completion on the
//! calling thread; `pend_*` operations hand the request to an
//! [`AsyncMan`] worker and return immediately, to be finished later with
//! the matching `complete_*` call. A pool of connections driven through
//! [`wait_any`] pipelines many requests from a single thread.

use std::mem::take;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::runtime::{Builder, Runtime};
use tokio::task::JoinHandle;
use tracing::trace;

use crate::actions::{
    CompleteMultipartUpload, CreateBucket, DeleteObject, GetObject, InitiateMultipartUpload,
    ListBuckets, ListMultipartUploads, ListObjects, PutObject, PutOptions,
};
use crate::asyncman::{AsyncMan, Completions, MAX_WAIT};
use crate::config::S3Config;
use crate::error::{Error, Result};
use crate::request::{
    self, BodySink, BodySource, GetLoader, PutUploader, S3Request, DEFAULT_CONNECT_TIMEOUT,
    DEFAULT_TIMEOUT,
};
use crate::response::{
    ResponseDetails, ResponseStatus, S3Bucket, S3CompleteMultipartUploadResponse, S3DelResponse,
    S3GetResponse, S3InitiateMultipartUploadResponse, S3ListMultipartUploadsResponse,
    S3ListObjectsResponse, S3MultipartUpload, S3Object, S3PutResponse,
};
use crate::xml::XmlDispatch;

/// Loads a GET body into a caller-provided slice; anything past the end
/// of the slice truncates the transfer.
struct SliceLoader<'b> {
    buffer: &'b mut [u8],
    at: usize,
}

impl GetLoader for SliceLoader<'_> {
    fn on_load(&mut self, chunk: &[u8], _total_size_hint: u64) -> usize {
        let left = self.buffer.len() - self.at;
        if left == 0 {
            return 0;
        }
        let take = left.min(chunk.len());
        self.buffer[self.at..self.at + take].copy_from_slice(&chunk[..take]);
        self.at += take;
        take
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PendingKind {
    Put,
    Get,
    Del,
}

/// The single-slot in-flight request of a connection.
struct PendingRequest {
    kind: PendingKind,
    /// Key (or name) for error summaries.
    name: String,
    done: Arc<AtomicBool>,
    completions: Arc<Completions>,
    rx: mpsc::Receiver<Result<S3Request<'static>>>,
    handle: JoinHandle<()>,
}

/// One client connection to the storage service.
pub struct Connection {
    config: S3Config,
    base_url: String,
    client: reqwest::Client,
    /// Drives synchronous operations on the calling thread.
    runtime: Runtime,
    timeout: Duration,
    connect_timeout: Duration,
    async_request: Option<PendingRequest>,
}

// Normalizations shared by the sync and async completion paths.

fn finish_put(details: &mut ResponseDetails) -> Result<S3PutResponse> {
    details.handle_errors()?;
    Ok(S3PutResponse {
        etag: take(&mut details.etag),
        part_number: 0,
    })
}

fn finish_get(details: &mut ResponseDetails) -> Result<S3GetResponse> {
    // A missing key reads as success with loaded_content_length = -1;
    // Amazon reports NoSuchKey, Walrus NoSuchEntity.
    if details.status == ResponseStatus::FailureWithDetails
        && (details.error_code == "NoSuchKey" || details.error_code == "NoSuchEntity")
    {
        details.status = ResponseStatus::Success;
        details.loaded_content_length = -1;
    }

    details.handle_errors()?;

    Ok(S3GetResponse {
        loaded_content_length: details.loaded_content_length,
        is_truncated: details.is_truncated,
        etag: take(&mut details.etag),
    })
}

fn finish_del(details: &mut ResponseDetails) -> Result<S3DelResponse> {
    // Walrus reports NoSuchEntity for a missing key; Amazon deletes are
    // idempotent, so treat it as success to match.
    if details.status == ResponseStatus::FailureWithDetails
        && details.error_code == "NoSuchEntity"
    {
        details.status = ResponseStatus::Success;
    }

    details.handle_errors()?;
    Ok(S3DelResponse {})
}

impl Connection {
    /// Open a connection handle. No network traffic happens until the
    /// first operation.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the transport cannot be configured (bad proxy
    /// URL, unreadable CA file)
    pub fn new(config: S3Config) -> Result<Self> {
        let client = request::build_client(&config, DEFAULT_CONNECT_TIMEOUT)?;
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| Error::Transport(format!("cannot start runtime: {e}")))?;
        let base_url = config.base_url();

        Ok(Self {
            config,
            base_url,
            client,
            runtime,
            timeout: DEFAULT_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            async_request: None,
        })
    }

    /// Total transfer time allowed per request (default 2 minutes).
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Time allowed for connect + TLS handshake (default 30 seconds).
    /// Name resolution honors only OS-level timeouts.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the transport cannot be reconfigured
    pub fn set_connect_timeout(&mut self, connect_timeout: Duration) -> Result<()> {
        self.connect_timeout = connect_timeout;
        self.client = request::build_client(&self.config, self.connect_timeout)?;
        Ok(())
    }

    fn assert_idle(&self, op: &str) {
        assert!(
            self.async_request.is_none(),
            "cannot start {op}: an asynchronous operation is in progress; \
             complete or cancel it first"
        );
    }

    fn execute_sync(&self, req: &mut S3Request<'_>) -> Result<()> {
        self.runtime
            .block_on(request::execute(&self.client, self.timeout, req))
    }

    // ---- buckets ----

    /// Create a bucket. On Amazon the region pinned by the configured
    /// host becomes the bucket's location constraint.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the request fails
    ///
    /// # Panics
    ///
    /// Panics if an asynchronous operation is in progress
    pub fn create_bucket(&mut self, bucket: &str, make_public: bool) -> Result<()> {
        self.assert_idle("create_bucket");
        trace!(bucket, "enter create_bucket");

        let mut action = CreateBucket::new(bucket);
        action.make_public = make_public;

        let result = action
            .into_request(&self.config, &self.base_url)
            .and_then(|mut req| {
                self.execute_sync(&mut req)?;
                req.details.handle_errors()
            })
            .map_err(Error::summary("create_bucket", bucket));

        trace!(bucket, "leave create_bucket");
        result
    }

    /// Delete an empty bucket.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the request fails
    ///
    /// # Panics
    ///
    /// Panics if an asynchronous operation is in progress
    pub fn del_bucket(&mut self, bucket: &str) -> Result<()> {
        self.assert_idle("del_bucket");
        trace!(bucket, "enter del_bucket");

        let result = self
            .del_with_suffix(bucket, "", None)
            .map(|_| ())
            .map_err(Error::summary("del_bucket", bucket));

        trace!(bucket, "leave del_bucket");
        result
    }

    /// List every bucket the account owns.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the request fails
    ///
    /// # Panics
    ///
    /// Panics if an asynchronous operation is in progress
    pub fn list_all_buckets(&mut self) -> Result<Vec<S3Bucket>> {
        self.assert_idle("list_all_buckets");
        trace!("enter list_all_buckets");

        let result = ListBuckets::new()
            .into_request(&self.config, &self.base_url)
            .and_then(|mut req| {
                self.execute_sync(&mut req)?;
                req.details.handle_errors()?;
                match req.dispatch {
                    XmlDispatch::ListBuckets(consumer) => Ok(consumer.buckets),
                    _ => Err(Error::Unexpected),
                }
            })
            .map_err(Error::summary("list_all_buckets", ""));

        trace!("leave list_all_buckets");
        result
    }

    // ---- put / get / del ----

    /// Store an object from a slice.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the request fails
    ///
    /// # Panics
    ///
    /// Panics if an asynchronous operation is in progress
    pub fn put(
        &mut self,
        bucket: &str,
        key: &str,
        data: &[u8],
        options: &PutOptions,
    ) -> Result<S3PutResponse> {
        self.assert_idle("put");
        trace!(bucket, key, size = data.len(), "enter put");

        let result = PutObject::new(bucket, key, options)
            .into_request(
                &self.config,
                &self.base_url,
                BodySource::Buffer(Bytes::copy_from_slice(data)),
            )
            .and_then(|mut req| {
                self.execute_sync(&mut req)?;
                finish_put(&mut req.details)
            })
            .map_err(Error::summary("put", key));

        trace!(bucket, key, "leave put");
        result
    }

    /// Store an object from an uploader callback producing `total_size`
    /// bytes in chunks.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the request fails
    ///
    /// # Panics
    ///
    /// Panics if an asynchronous operation is in progress
    pub fn put_streamed(
        &mut self,
        bucket: &str,
        key: &str,
        uploader: &mut dyn PutUploader,
        total_size: u64,
        options: &PutOptions,
    ) -> Result<S3PutResponse> {
        self.assert_idle("put");
        trace!(bucket, key, total_size, "enter put");

        let result = PutObject::new(bucket, key, options)
            .into_request(
                &self.config,
                &self.base_url,
                BodySource::Uploader {
                    uploader,
                    total: total_size,
                },
            )
            .and_then(|mut req| {
                self.execute_sync(&mut req)?;
                finish_put(&mut req.details)
            })
            .map_err(Error::summary("put", key));

        trace!(bucket, key, "leave put");
        result
    }

    /// Fetch an object into `buffer`. A missing key is not an error: the
    /// response has `loaded_content_length == -1`. An object larger than
    /// the buffer is truncated and flagged.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the request fails
    ///
    /// # Panics
    ///
    /// Panics if an asynchronous operation is in progress
    pub fn get(&mut self, bucket: &str, key: &str, buffer: &mut [u8]) -> Result<S3GetResponse> {
        let mut loader = SliceLoader { buffer, at: 0 };
        self.get_with_loader(bucket, key, &mut loader)
    }

    /// Fetch an object through a loader callback invoked once per chunk.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the request fails
    ///
    /// # Panics
    ///
    /// Panics if an asynchronous operation is in progress
    pub fn get_with_loader(
        &mut self,
        bucket: &str,
        key: &str,
        loader: &mut dyn GetLoader,
    ) -> Result<S3GetResponse> {
        self.assert_idle("get");
        trace!(bucket, key, "enter get");

        let result = GetObject::new(bucket, key)
            .into_request(&self.config, &self.base_url, BodySink::Loader(loader))
            .and_then(|mut req| {
                self.execute_sync(&mut req)?;
                finish_get(&mut req.details)
            })
            .map_err(Error::summary("get", key));

        trace!(bucket, key, "leave get");
        result
    }

    fn del_with_suffix(
        &self,
        bucket: &str,
        key: &str,
        key_suffix: Option<String>,
    ) -> Result<S3DelResponse> {
        let mut action = DeleteObject::new(bucket, key);
        action.key_suffix = key_suffix;
        let mut req = action.into_request(&self.config, &self.base_url)?;
        self.execute_sync(&mut req)?;
        finish_del(&mut req.details)
    }

    /// Delete an object. Deleting a key that does not exist succeeds.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the request fails
    ///
    /// # Panics
    ///
    /// Panics if an asynchronous operation is in progress
    pub fn del(&mut self, bucket: &str, key: &str) -> Result<S3DelResponse> {
        self.assert_idle("del");
        trace!(bucket, key, "enter del");

        let result = self
            .del_with_suffix(bucket, key, None)
            .map_err(Error::summary("del", key));

        trace!(bucket, key, "leave del");
        result
    }

    // ---- pipelined operations ----

    fn spawn(
        &mut self,
        async_man: &AsyncMan,
        kind: PendingKind,
        name: &str,
        req: S3Request<'static>,
    ) {
        let client = self.client.clone();
        let timeout = self.timeout;
        let done = Arc::new(AtomicBool::new(false));
        let completions = async_man.completions();
        let (tx, rx) = mpsc::channel();

        let task_done = Arc::clone(&done);
        let task_completions = Arc::clone(&completions);

        let handle = async_man.handle().spawn(async move {
            let mut req = req;
            let result = request::execute(&client, timeout, &mut req)
                .await
                .map(|()| req);
            // The receiver is gone if the operation was cancelled.
            let _ = tx.send(result);
            task_done.store(true, Ordering::SeqCst);
            task_completions.notify();
        });

        self.async_request = Some(PendingRequest {
            kind,
            name: name.to_string(),
            done,
            completions,
            rx,
            handle,
        });
    }

    /// Start a pipelined PUT; finish with [`complete_put`].
    ///
    /// [`complete_put`]: Connection::complete_put
    ///
    /// # Errors
    ///
    /// Will return `Err` if the request cannot be composed
    ///
    /// # Panics
    ///
    /// Panics if another asynchronous operation is in progress
    pub fn pend_put(
        &mut self,
        async_man: &AsyncMan,
        bucket: &str,
        key: &str,
        data: &[u8],
        options: &PutOptions,
    ) -> Result<()> {
        self.assert_idle("pend_put");
        trace!(bucket, key, size = data.len(), "enter pend_put");

        let result = PutObject::new(bucket, key, options)
            .into_request(
                &self.config,
                &self.base_url,
                BodySource::Buffer(Bytes::copy_from_slice(data)),
            )
            .map(|req| self.spawn(async_man, PendingKind::Put, key, req))
            .map_err(Error::summary("pend_put", key));

        trace!(bucket, key, "leave pend_put");
        result
    }

    /// Start a pipelined GET of up to `max_size` bytes, optionally from a
    /// byte `offset`; finish with [`complete_get`].
    ///
    /// [`complete_get`]: Connection::complete_get
    ///
    /// # Errors
    ///
    /// Will return `Err` if the request cannot be composed
    ///
    /// # Panics
    ///
    /// Panics if another asynchronous operation is in progress
    pub fn pend_get(
        &mut self,
        async_man: &AsyncMan,
        bucket: &str,
        key: &str,
        max_size: usize,
        offset: Option<u64>,
    ) -> Result<()> {
        self.assert_idle("pend_get");
        trace!(bucket, key, max_size, "enter pend_get");

        let mut action = GetObject::new(bucket, key);
        if let Some(offset) = offset {
            action.range = Some((offset, offset + max_size as u64));
        }

        let result = action
            .into_request(
                &self.config,
                &self.base_url,
                BodySink::Buffer {
                    data: Vec::new(),
                    capacity: max_size,
                },
            )
            .map(|req| self.spawn(async_man, PendingKind::Get, key, req))
            .map_err(Error::summary("pend_get", key));

        trace!(bucket, key, "leave pend_get");
        result
    }

    /// Start a pipelined DELETE; finish with [`complete_del`].
    ///
    /// [`complete_del`]: Connection::complete_del
    ///
    /// # Errors
    ///
    /// Will return `Err` if the request cannot be composed
    ///
    /// # Panics
    ///
    /// Panics if another asynchronous operation is in progress
    pub fn pend_del(&mut self, async_man: &AsyncMan, bucket: &str, key: &str) -> Result<()> {
        self.assert_idle("pend_del");
        trace!(bucket, key, "enter pend_del");

        let result = DeleteObject::new(bucket, key)
            .into_request(&self.config, &self.base_url)
            .map(|req| self.spawn(async_man, PendingKind::Del, key, req))
            .map_err(Error::summary("pend_del", key));

        trace!(bucket, key, "leave pend_del");
        result
    }

    fn take_pending(&mut self, kind: PendingKind, op: &str) -> PendingRequest {
        let pending = self
            .async_request
            .take()
            .unwrap_or_else(|| panic!("{op}: no asynchronous operation is pending"));
        assert!(
            pending.kind == kind,
            "{op}: the pending operation is a different kind"
        );
        pending
    }

    fn recv_pending(pending: &PendingRequest) -> Result<S3Request<'static>> {
        // Blocks until the worker signals completion. A dropped sender
        // means the task died without a result.
        pending.rx.recv().map_err(|_| Error::Unexpected)?
    }

    /// Block until a pending PUT finishes and return its result.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the request failed
    ///
    /// # Panics
    ///
    /// Panics if no PUT is pending
    pub fn complete_put(&mut self) -> Result<S3PutResponse> {
        let pending = self.take_pending(PendingKind::Put, "complete_put");
        trace!(key = %pending.name, "enter complete_put");

        let result = Self::recv_pending(&pending)
            .and_then(|mut req| finish_put(&mut req.details))
            .map_err(Error::summary("complete_put", &pending.name));

        trace!(key = %pending.name, "leave complete_put");
        result
    }

    /// Block until a pending GET finishes; returns the response and the
    /// loaded bytes.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the request failed
    ///
    /// # Panics
    ///
    /// Panics if no GET is pending
    pub fn complete_get(&mut self) -> Result<(S3GetResponse, Vec<u8>)> {
        let pending = self.take_pending(PendingKind::Get, "complete_get");
        trace!(key = %pending.name, "enter complete_get");

        let result = Self::recv_pending(&pending)
            .and_then(|mut req| {
                let response = finish_get(&mut req.details)?;
                let data = match req.sink {
                    BodySink::Buffer { data, .. } => data,
                    _ => Vec::new(),
                };
                Ok((response, data))
            })
            .map_err(Error::summary("complete_get", &pending.name));

        trace!(key = %pending.name, "leave complete_get");
        result
    }

    /// Block until a pending DELETE finishes.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the request failed
    ///
    /// # Panics
    ///
    /// Panics if no DELETE is pending
    pub fn complete_del(&mut self) -> Result<S3DelResponse> {
        let pending = self.take_pending(PendingKind::Del, "complete_del");
        trace!(key = %pending.name, "enter complete_del");

        let result = Self::recv_pending(&pending)
            .and_then(|mut req| finish_del(&mut req.details))
            .map_err(Error::summary("complete_del", &pending.name));

        trace!(key = %pending.name, "leave complete_del");
        result
    }

    /// Abandon the in-flight request, if any, and return to idle.
    /// Idempotent and infallible; the worker stops driving the transfer
    /// at its next suspension point.
    pub fn cancel_async(&mut self) {
        if let Some(pending) = self.async_request.take() {
            trace!(key = %pending.name, "cancel_async");
            pending.handle.abort();
        }
    }

    /// True between a `pend_*` call and the matching complete or cancel.
    #[must_use]
    pub fn is_async_pending(&self) -> bool {
        self.async_request.is_some()
    }

    /// True once the worker finished the in-flight request, i.e. the
    /// matching `complete_*` call will not block.
    #[must_use]
    pub fn is_async_completed(&self) -> bool {
        self.async_request
            .as_ref()
            .is_some_and(|pending| pending.done.load(Ordering::SeqCst))
    }

    // ---- listing ----

    /// One page of a bucket listing.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the request fails
    ///
    /// # Panics
    ///
    /// Panics if an asynchronous operation is in progress
    pub fn list_objects(
        &mut self,
        bucket: &str,
        prefix: Option<&str>,
        marker: Option<&str>,
        delimiter: Option<&str>,
        max_keys: Option<u32>,
    ) -> Result<(Vec<S3Object>, S3ListObjectsResponse)> {
        self.assert_idle("list_objects");
        trace!(bucket, ?prefix, ?marker, "enter list_objects");

        // Walrus rejects an empty marker; a single space means "none".
        let marker = if self.config.is_walrus && marker.map_or(true, str::is_empty) {
            Some(" ")
        } else {
            marker
        };

        let mut action = ListObjects::new(bucket);
        action.prefix = prefix;
        action.marker = marker;
        action.delimiter = delimiter;
        action.max_keys = max_keys;

        let result = action
            .into_request(&self.config, &self.base_url)
            .and_then(|mut req| {
                self.execute_sync(&mut req)?;
                req.details.handle_errors()?;
                match req.dispatch {
                    XmlDispatch::ListObjects(consumer) => {
                        let response = S3ListObjectsResponse {
                            next_marker: consumer.next_marker().to_string(),
                            is_truncated: req.details.is_truncated,
                        };
                        Ok((consumer.objects, response))
                    }
                    _ => Err(Error::Unexpected),
                }
            })
            .map_err(Error::summary("list_objects", bucket));

        trace!(bucket, "leave list_objects");
        result
    }

    /// All pages of a bucket listing, following `next_marker` until the
    /// server stops truncating.
    ///
    /// # Errors
    ///
    /// Will return `Err` if any page fails
    ///
    /// # Panics
    ///
    /// Panics if an asynchronous operation is in progress
    pub fn list_all_objects(
        &mut self,
        bucket: &str,
        prefix: Option<&str>,
        delimiter: Option<&str>,
        max_keys_in_batch: Option<u32>,
    ) -> Result<Vec<S3Object>> {
        let mut objects = Vec::new();
        let mut marker = String::new();

        loop {
            let (mut page, response) = self.list_objects(
                bucket,
                prefix,
                (!marker.is_empty()).then_some(marker.as_str()),
                delimiter,
                max_keys_in_batch,
            )?;
            objects.append(&mut page);

            if !response.is_truncated {
                return Ok(objects);
            }
            marker = response.next_marker;
        }
    }

    /// Delete every object under `prefix`, listing and deleting in
    /// batches.
    ///
    /// # Errors
    ///
    /// Will return `Err` if any request fails
    ///
    /// # Panics
    ///
    /// Panics if an asynchronous operation is in progress
    pub fn del_all(
        &mut self,
        bucket: &str,
        prefix: Option<&str>,
        max_keys_in_batch: Option<u32>,
    ) -> Result<()> {
        loop {
            let (objects, response) =
                self.list_objects(bucket, prefix, None, None, max_keys_in_batch)?;

            for object in &objects {
                self.del(bucket, &object.key)?;
            }

            if !response.is_truncated {
                return Ok(());
            }
        }
    }

    // ---- multipart uploads ----

    fn assert_not_walrus(&self, op: &str) {
        assert!(
            !self.config.is_walrus,
            "{op}: multipart uploads are not supported by Walrus"
        );
    }

    /// Start a multipart upload; the returned upload id names it until it
    /// is completed or aborted. ACL, encryption and content type are
    /// fixed here, not on the parts.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the request fails
    ///
    /// # Panics
    ///
    /// Panics on a Walrus connection, or if an asynchronous operation is
    /// in progress
    pub fn initiate_multipart_upload(
        &mut self,
        bucket: &str,
        key: &str,
        options: &PutOptions,
    ) -> Result<S3InitiateMultipartUploadResponse> {
        self.assert_idle("initiate_multipart_upload");
        self.assert_not_walrus("initiate_multipart_upload");
        trace!(bucket, key, "enter initiate_multipart_upload");

        let result = InitiateMultipartUpload::new(bucket, key, options)
            .into_request(&self.config, &self.base_url)
            .and_then(|mut req| {
                self.execute_sync(&mut req)?;
                req.details.handle_errors()?;
                Ok(S3InitiateMultipartUploadResponse {
                    upload_id: take(&mut req.details.upload_id),
                })
            })
            .map_err(Error::summary("initiate_multipart_upload", key));

        trace!(bucket, key, "leave initiate_multipart_upload");
        result
    }

    /// Upload one part from a slice. Parts may be uploaded in any order;
    /// every part except the last must be at least 5 MiB (the server
    /// enforces this at completion). The returned response records the
    /// part number for `complete_multipart_upload`.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the request fails
    ///
    /// # Panics
    ///
    /// Panics if `part_number` is 0, on a Walrus connection, or if an
    /// asynchronous operation is in progress
    pub fn put_part(
        &mut self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: &[u8],
    ) -> Result<S3PutResponse> {
        self.assert_idle("put_part");
        self.assert_not_walrus("put_part");
        assert!(part_number >= 1, "part numbers start at 1");
        trace!(bucket, key, part_number, "enter put_part");

        // ACL and encryption were set at initiate time.
        let options = PutOptions::default();
        let result = PutObject::new(bucket, key, &options)
            .part(part_number, upload_id)
            .into_request(
                &self.config,
                &self.base_url,
                BodySource::Buffer(Bytes::copy_from_slice(data)),
            )
            .and_then(|mut req| {
                self.execute_sync(&mut req)?;
                let mut response = finish_put(&mut req.details)?;
                response.part_number = part_number;
                Ok(response)
            })
            .map_err(Error::summary("put_part", key));

        trace!(bucket, key, part_number, "leave put_part");
        result
    }

    /// Upload one part from an uploader callback.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the request fails
    ///
    /// # Panics
    ///
    /// Panics if `part_number` is 0, on a Walrus connection, or if an
    /// asynchronous operation is in progress
    pub fn put_part_streamed(
        &mut self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        uploader: &mut dyn PutUploader,
        part_size: u64,
    ) -> Result<S3PutResponse> {
        self.assert_idle("put_part");
        self.assert_not_walrus("put_part");
        assert!(part_number >= 1, "part numbers start at 1");
        trace!(bucket, key, part_number, "enter put_part");

        let options = PutOptions::default();
        let result = PutObject::new(bucket, key, &options)
            .part(part_number, upload_id)
            .into_request(
                &self.config,
                &self.base_url,
                BodySource::Uploader {
                    uploader,
                    total: part_size,
                },
            )
            .and_then(|mut req| {
                self.execute_sync(&mut req)?;
                let mut response = finish_put(&mut req.details)?;
                response.part_number = part_number;
                Ok(response)
            })
            .map_err(Error::summary("put_part", key));

        trace!(bucket, key, part_number, "leave put_part");
        result
    }

    /// Assemble the uploaded parts, in the order given, into the final
    /// object. The returned ETag is the composite one.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the request fails
    ///
    /// # Panics
    ///
    /// Panics on a Walrus connection, or if an asynchronous operation is
    /// in progress
    pub fn complete_multipart_upload(
        &mut self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[S3PutResponse],
    ) -> Result<S3CompleteMultipartUploadResponse> {
        self.assert_idle("complete_multipart_upload");
        self.assert_not_walrus("complete_multipart_upload");
        trace!(bucket, key, parts = parts.len(), "enter complete_multipart_upload");

        let result = CompleteMultipartUpload::new(bucket, key, upload_id, parts)
            .into_request(&self.config, &self.base_url)
            .and_then(|mut req| {
                self.execute_sync(&mut req)?;
                req.details.handle_errors()?;
                Ok(S3CompleteMultipartUploadResponse {
                    etag: take(&mut req.details.etag),
                })
            })
            .map_err(Error::summary("complete_multipart_upload", key));

        trace!(bucket, key, "leave complete_multipart_upload");
        result
    }

    /// Abort an in-progress upload and free its parts on the server.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the request fails
    ///
    /// # Panics
    ///
    /// Panics on a Walrus connection, or if an asynchronous operation is
    /// in progress
    pub fn abort_multipart_upload(
        &mut self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<S3DelResponse> {
        self.assert_idle("abort_multipart_upload");
        self.assert_not_walrus("abort_multipart_upload");
        trace!(bucket, key, "enter abort_multipart_upload");

        let result = self
            .del_with_suffix(bucket, key, Some(format!("?uploadId={upload_id}")))
            .map_err(Error::summary("abort_multipart_upload", key));

        trace!(bucket, key, "leave abort_multipart_upload");
        result
    }

    /// One page of the in-progress multipart uploads of a bucket.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the request fails
    ///
    /// # Panics
    ///
    /// Panics on a Walrus connection, or if an asynchronous operation is
    /// in progress
    #[allow(clippy::too_many_arguments)]
    pub fn list_multipart_uploads(
        &mut self,
        bucket: &str,
        prefix: Option<&str>,
        key_marker: Option<&str>,
        upload_id_marker: Option<&str>,
        delimiter: Option<&str>,
        max_uploads: Option<u32>,
    ) -> Result<(Vec<S3MultipartUpload>, S3ListMultipartUploadsResponse)> {
        self.assert_idle("list_multipart_uploads");
        self.assert_not_walrus("list_multipart_uploads");
        trace!(bucket, ?prefix, "enter list_multipart_uploads");

        let mut action = ListMultipartUploads::new(bucket);
        action.prefix = prefix;
        action.key_marker = key_marker;
        action.upload_id_marker = upload_id_marker;
        action.delimiter = delimiter;
        action.max_uploads = max_uploads;

        let result = action
            .into_request(&self.config, &self.base_url)
            .and_then(|mut req| {
                self.execute_sync(&mut req)?;
                req.details.handle_errors()?;
                match req.dispatch {
                    XmlDispatch::ListMultipartUploads(consumer) => {
                        let response = S3ListMultipartUploadsResponse {
                            next_key_marker: consumer.last_upload().key.clone(),
                            next_upload_id_marker: consumer.last_upload().upload_id.clone(),
                            is_truncated: req.details.is_truncated,
                        };
                        Ok((consumer.uploads, response))
                    }
                    _ => Err(Error::Unexpected),
                }
            })
            .map_err(Error::summary("list_multipart_uploads", prefix.unwrap_or("")));

        trace!(bucket, "leave list_multipart_uploads");
        result
    }

    /// All pages of the in-progress multipart uploads of a bucket.
    ///
    /// # Errors
    ///
    /// Will return `Err` if any page fails
    ///
    /// # Panics
    ///
    /// Panics on a Walrus connection, or if an asynchronous operation is
    /// in progress
    pub fn list_all_multipart_uploads(
        &mut self,
        bucket: &str,
        prefix: Option<&str>,
        delimiter: Option<&str>,
        max_uploads_in_batch: Option<u32>,
    ) -> Result<Vec<S3MultipartUpload>> {
        let mut uploads = Vec::new();
        let mut key_marker = String::new();
        let mut upload_id_marker = String::new();

        loop {
            let (mut page, response) = self.list_multipart_uploads(
                bucket,
                prefix,
                (!key_marker.is_empty()).then_some(key_marker.as_str()),
                (!upload_id_marker.is_empty()).then_some(upload_id_marker.as_str()),
                delimiter,
                max_uploads_in_batch,
            )?;
            uploads.append(&mut page);

            if !response.is_truncated {
                return Ok(uploads);
            }
            key_marker = response.next_key_marker;
            upload_id_marker = response.next_upload_id_marker;
        }
    }

    /// Abort every in-progress upload under `prefix`, listing and
    /// aborting in batches.
    ///
    /// # Errors
    ///
    /// Will return `Err` if any request fails
    ///
    /// # Panics
    ///
    /// Panics on a Walrus connection, or if an asynchronous operation is
    /// in progress
    pub fn abort_all_multipart_uploads(
        &mut self,
        bucket: &str,
        prefix: Option<&str>,
        max_uploads_in_batch: Option<u32>,
    ) -> Result<()> {
        loop {
            let (uploads, response) = self.list_multipart_uploads(
                bucket,
                prefix,
                None,
                None,
                None,
                max_uploads_in_batch,
            )?;

            for upload in &uploads {
                self.abort_multipart_upload(bucket, &upload.key, &upload.upload_id)?;
            }

            if !response.is_truncated {
                return Ok(());
            }
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        // Best-effort cancel; never blocks, never fails.
        self.cancel_async();
    }
}

/// Block until any of `cons` has a completed request, scanning fairly
/// from `start_from` modulo the pool size. Returns the index of the
/// winner, or `None` on timeout. Rotate `start_from` by the returned
/// index on each call so the pool is serviced evenly.
///
/// Every connection must have a pending request, all registered with the
/// same [`AsyncMan`].
///
/// # Errors
///
/// Will return `Err(Error::TooManyConnections)` if `cons` exceeds
/// [`MAX_WAIT`]
///
/// # Panics
///
/// Panics if a connection has no pending request
pub fn wait_any(
    cons: &[&Connection],
    start_from: usize,
    timeout: Duration,
) -> Result<Option<usize>> {
    if cons.len() > MAX_WAIT {
        return Err(Error::TooManyConnections);
    }

    if cons.is_empty() {
        return Ok(None);
    }

    let completions = {
        let first = cons[0]
            .async_request
            .as_ref()
            .expect("wait_any requires every connection to have a pending operation");
        Arc::clone(&first.completions)
    };

    let deadline = Instant::now() + timeout;

    loop {
        let seen = completions.generation();

        // Scan from start_from so an already-completed connection is
        // returned immediately and the pool is drained fairly.
        for i in 0..cons.len() {
            let index = (i + start_from) % cons.len();
            let pending = cons[index]
                .async_request
                .as_ref()
                .expect("wait_any requires every connection to have a pending operation");

            debug_assert!(
                Arc::ptr_eq(&pending.completions, &completions),
                "wait_any requires all connections to share one AsyncMan"
            );

            if pending.done.load(Ordering::SeqCst) {
                return Ok(Some(index));
            }
        }

        if !completions.wait_past(seen, deadline) {
            return Ok(None);
        }
    }
}
