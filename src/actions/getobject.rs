use reqwest::Method;

use crate::config::S3Config;
use crate::error::Result;
use crate::request::{BodySink, BodySource, RequestParams, S3Request};
use crate::xml::XmlDispatch;

#[derive(Debug)]
pub(crate) struct GetObject<'a> {
    bucket: &'a str,
    key: &'a str,
    /// Byte range `[lo, hi)`.
    pub range: Option<(u64, u64)>,
}

impl<'a> GetObject<'a> {
    #[must_use]
    pub(crate) fn new(bucket: &'a str, key: &'a str) -> Self {
        Self {
            bucket,
            key,
            range: None,
        }
    }

    /// # Errors
    ///
    /// Will return `Err` if the request cannot be composed
    pub(crate) fn into_request<'s>(
        self,
        config: &S3Config,
        base_url: &str,
        sink: BodySink<'s>,
    ) -> Result<S3Request<'s>> {
        S3Request::build(
            config,
            base_url,
            RequestParams {
                verb: Method::GET,
                bucket: self.bucket,
                key: Some(self.key),
                range: self.range,
                ..RequestParams::default()
            },
            self.key,
            BodySource::None,
            sink,
            false,
            XmlDispatch::None,
        )
    }
}
