//! Response classification and the typed results returned to callers.

use reqwest::header::HeaderMap;
use reqwest::StatusCode;

use crate::error::{Error, Result};

/// Classification of a response while it streams in. `FailureWithDetails`
/// is only ever reached by promotion, once the error XML yields a code.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) enum ResponseStatus {
    #[default]
    Unexpected,
    Success,
    FailureWithDetails,
    HttpFailure,
    HttpResourceNotFound,
    HttpOrAwsFailure,
}

/// Everything accumulated about one response: status line, common headers
/// and the common XML body elements.
#[derive(Debug, Default)]
pub(crate) struct ResponseDetails {
    pub status: ResponseStatus,
    pub url: String,
    /// Usually the object key; used in error summaries.
    pub name: String,

    // Common headers.
    pub http_status: String,
    pub http_date: String,
    /// -1 when the header was absent.
    pub content_length: i64,
    pub content_type: String,
    pub amazon_id: String,
    pub request_id: String,
    pub etag: String,

    // Common xml body elements.
    pub error_code: String,
    pub error_message: String,
    pub host_id: String,
    pub is_truncated: bool,
    pub upload_id: String,

    /// Bytes actually delivered to the caller's sink (GET only).
    pub loaded_content_length: i64,
}

impl ResponseDetails {
    pub(crate) fn new(url: String, name: &str) -> Self {
        Self {
            url,
            name: name.to_string(),
            content_length: -1,
            ..Self::default()
        }
    }

    /// Classify the HTTP status line. 404 and the known 4xx/5xx statuses
    /// stay provisional: the error payload may promote them to
    /// `FailureWithDetails`.
    pub(crate) fn classify(&mut self, status: StatusCode) {
        self.http_status = match status.canonical_reason() {
            Some(reason) => format!("{} {}", status.as_u16(), reason),
            None => status.as_u16().to_string(),
        };

        self.status = match status.as_u16() {
            200 | 204 | 206 => ResponseStatus::Success,
            404 => ResponseStatus::HttpResourceNotFound,
            301 | 400 | 403 | 409 | 500 | 503 => ResponseStatus::HttpOrAwsFailure,
            _ => ResponseStatus::HttpFailure,
        };
    }

    /// Copy the common headers out of the response.
    pub(crate) fn absorb_headers(&mut self, headers: &HeaderMap) {
        let text = |name: &str| -> Option<String> {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.trim().to_string())
        };

        if let Some(etag) = text("etag") {
            // Amazon quotes the ETag header, Walrus does not.
            self.etag = etag
                .strip_prefix('"')
                .and_then(|e| e.strip_suffix('"'))
                .unwrap_or(&etag)
                .to_string();
        }

        if let Some(date) = text("date") {
            self.http_date = date;
        }

        if let Some(len) = text("content-length") {
            self.content_length = len.parse().unwrap_or(-1);
        }

        if let Some(content_type) = text("content-type") {
            self.content_type = content_type;
        }

        if let Some(id) = text("x-amz-id-2") {
            self.amazon_id = id;
        }

        if let Some(id) = text("x-amz-request-id") {
            self.request_id = id;
        }
    }

    /// Map the final status onto the error taxonomy.
    pub(crate) fn handle_errors(&self) -> Result<()> {
        match self.status {
            ResponseStatus::Success => Ok(()),

            // HTTP status line missing in the response.
            ResponseStatus::Unexpected => Err(Error::Unexpected),

            ResponseStatus::HttpResourceNotFound => Err(Error::HttpResourceNotFound {
                url: self.url.clone(),
            }),

            // HttpOrAwsFailure without parsed details is a plain HTTP error.
            ResponseStatus::HttpFailure | ResponseStatus::HttpOrAwsFailure => Err(Error::Http {
                status_line: self.http_status.clone(),
            }),

            ResponseStatus::FailureWithDetails => Err(Error::Aws {
                code: self.error_code.clone(),
                message: self.error_message.clone(),
                request_id: self.request_id.clone(),
            }),
        }
    }
}

/// A bucket row from `list_all_buckets`.
#[derive(Clone, Debug, Default)]
pub struct S3Bucket {
    /// Bucket name.
    pub name: String,
    /// Bucket creation date (timestamp).
    pub creation_date: String,
}

/// An object row from `list_objects`.
#[derive(Clone, Debug)]
pub struct S3Object {
    /// The object's key. For a common-prefix row this is the prefix
    /// including its trailing delimiter.
    pub key: String,
    /// Date and time the object was last modified.
    pub last_modified: String,
    /// The entity tag, without enclosing quotes.
    pub etag: String,
    /// Size in bytes; -1 for common-prefix (directory) rows.
    pub size: i64,
    /// True for common-prefix rows produced by a delimiter listing.
    pub is_dir: bool,
}

impl Default for S3Object {
    fn default() -> Self {
        Self {
            key: String::new(),
            last_modified: String::new(),
            etag: String::new(),
            size: -1,
            is_dir: false,
        }
    }
}

/// An in-progress upload row from `list_multipart_uploads`.
#[derive(Clone, Debug, Default)]
pub struct S3MultipartUpload {
    pub key: String,
    pub upload_id: String,
    pub is_dir: bool,
}

/// Result of a `put` or `put_part`.
#[derive(Clone, Debug, Default)]
pub struct S3PutResponse {
    /// The entity tag assigned by the server, without enclosing quotes.
    pub etag: String,
    /// Part number for `put_part` results, 0 otherwise. Feed these back to
    /// `complete_multipart_upload` in the order the parts should appear.
    pub part_number: u32,
}

/// Result of a `get`.
#[derive(Clone, Debug, Default)]
pub struct S3GetResponse {
    /// Bytes delivered to the sink; -1 when the key does not exist.
    pub loaded_content_length: i64,
    /// True when the sink could not accept the whole body.
    pub is_truncated: bool,
    pub etag: String,
}

/// Result of a `del`.
#[derive(Clone, Debug, Default)]
pub struct S3DelResponse {}

/// Result of `initiate_multipart_upload`.
#[derive(Clone, Debug, Default)]
pub struct S3InitiateMultipartUploadResponse {
    pub upload_id: String,
}

/// Result of `complete_multipart_upload`.
#[derive(Clone, Debug, Default)]
pub struct S3CompleteMultipartUploadResponse {
    /// Composite entity tag of the assembled object.
    pub etag: String,
}

/// Pagination state from one `list_objects` page.
#[derive(Clone, Debug, Default)]
pub struct S3ListObjectsResponse {
    /// Marker to pass to the next call; the last key seen when the
    /// response carried no explicit `NextMarker`.
    pub next_marker: String,
    pub is_truncated: bool,
}

/// Pagination state from one `list_multipart_uploads` page.
#[derive(Clone, Debug, Default)]
pub struct S3ListMultipartUploadsResponse {
    pub next_key_marker: String,
    pub next_upload_id_marker: String,
    pub is_truncated: bool,
}
