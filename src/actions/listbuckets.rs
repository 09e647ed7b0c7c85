use reqwest::Method;

use crate::config::S3Config;
use crate::error::Result;
use crate::request::{BodySink, BodySource, RequestParams, S3Request};
use crate::xml::{ListBucketsConsumer, XmlDispatch};

#[derive(Debug, Default)]
pub(crate) struct ListBuckets {}

impl ListBuckets {
    #[must_use]
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// # Errors
    ///
    /// Will return `Err` if the request cannot be composed
    pub(crate) fn into_request(
        self,
        config: &S3Config,
        base_url: &str,
    ) -> Result<S3Request<'static>> {
        S3Request::build(
            config,
            base_url,
            RequestParams {
                verb: Method::GET,
                ..RequestParams::default()
            },
            "",
            BodySource::None,
            BodySink::Discard,
            true,
            XmlDispatch::ListBuckets(ListBucketsConsumer::default()),
        )
    }
}
