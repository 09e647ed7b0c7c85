use reqwest::Method;

use crate::config::S3Config;
use crate::error::Result;
use crate::request::{BodySink, BodySource, RequestParams, S3Request};
use crate::xml::{ListObjectsConsumer, XmlDispatch};

#[derive(Debug, Default)]
pub(crate) struct ListObjects<'a> {
    bucket: &'a str,
    pub prefix: Option<&'a str>,
    pub marker: Option<&'a str>,
    pub delimiter: Option<&'a str>,
    pub max_keys: Option<u32>,
}

impl<'a> ListObjects<'a> {
    #[must_use]
    pub(crate) fn new(bucket: &'a str) -> Self {
        Self {
            bucket,
            ..Self::default()
        }
    }

    // Query pairs in their fixed order.
    fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::with_capacity(4);

        if let Some(delimiter) = self.delimiter {
            pairs.push(("delimiter", delimiter.to_string()));
        }

        if let Some(marker) = self.marker {
            pairs.push(("marker", marker.to_string()));
        }

        if let Some(max_keys) = self.max_keys {
            pairs.push(("max-keys", max_keys.to_string()));
        }

        if let Some(prefix) = self.prefix {
            pairs.push(("prefix", prefix.to_string()));
        }

        pairs
    }

    /// # Errors
    ///
    /// Will return `Err` if the request cannot be composed
    pub(crate) fn into_request(
        self,
        config: &S3Config,
        base_url: &str,
    ) -> Result<S3Request<'static>> {
        let query = self.query_pairs();

        S3Request::build(
            config,
            base_url,
            RequestParams {
                verb: Method::GET,
                bucket: self.bucket,
                key: Some(""),
                query,
                ..RequestParams::default()
            },
            self.prefix.unwrap_or(""),
            BodySource::None,
            BodySink::Discard,
            true,
            XmlDispatch::ListObjects(ListObjectsConsumer::new(config.is_walrus)),
        )
    }
}
