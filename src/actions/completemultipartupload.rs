use bytes::Bytes;
use reqwest::Method;

use crate::config::S3Config;
use crate::error::Result;
use crate::request::{BodySink, BodySource, RequestParams, S3Request, CONTENT_TYPE_BINARY};
use crate::response::S3PutResponse;
use crate::xml::XmlDispatch;

/// POST `?uploadId=…` with a body listing the part numbers and ETags in
/// the order the parts make up the object.
#[derive(Debug)]
pub(crate) struct CompleteMultipartUpload<'a> {
    bucket: &'a str,
    key: &'a str,
    upload_id: &'a str,
    parts: &'a [S3PutResponse],
}

impl<'a> CompleteMultipartUpload<'a> {
    #[must_use]
    pub(crate) fn new(
        bucket: &'a str,
        key: &'a str,
        upload_id: &'a str,
        parts: &'a [S3PutResponse],
    ) -> Self {
        Self {
            bucket,
            key,
            upload_id,
            parts,
        }
    }

    fn payload(&self) -> Bytes {
        let mut body = String::with_capacity(1024);
        body.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        body.push_str("<CompleteMultipartUpload>");

        for part in self.parts {
            body.push_str("<Part>");
            body.push_str("<PartNumber>");
            body.push_str(&part.part_number.to_string());
            body.push_str("</PartNumber>");
            // The service expects the ETags quoted, the way PUT returned
            // them before the quotes were stripped.
            body.push_str("<ETag>\"");
            body.push_str(&part.etag);
            body.push_str("\"</ETag>");
            body.push_str("</Part>");
        }

        body.push_str("</CompleteMultipartUpload>");
        Bytes::from(body)
    }

    /// # Errors
    ///
    /// Will return `Err` if the request cannot be composed
    pub(crate) fn into_request(
        self,
        config: &S3Config,
        base_url: &str,
    ) -> Result<S3Request<'static>> {
        let payload = self.payload();

        S3Request::build(
            config,
            base_url,
            RequestParams {
                verb: Method::POST,
                bucket: self.bucket,
                key: Some(self.key),
                key_suffix: Some(format!("?uploadId={}", self.upload_id)),
                content_type: Some(CONTENT_TYPE_BINARY),
                ..RequestParams::default()
            },
            self.key,
            BodySource::Buffer(payload),
            BodySink::Discard,
            true,
            XmlDispatch::CompleteMultipartUpload,
        )
    }
}
