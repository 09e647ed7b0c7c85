use reqwest::Method;

use crate::config::S3Config;
use crate::error::Result;
use crate::request::{BodySink, BodySource, RequestParams, S3Request};
use crate::xml::{ListMultipartUploadsConsumer, XmlDispatch};

#[derive(Debug, Default)]
pub(crate) struct ListMultipartUploads<'a> {
    bucket: &'a str,
    pub prefix: Option<&'a str>,
    pub key_marker: Option<&'a str>,
    pub upload_id_marker: Option<&'a str>,
    pub delimiter: Option<&'a str>,
    pub max_uploads: Option<u32>,
}

impl<'a> ListMultipartUploads<'a> {
    #[must_use]
    pub(crate) fn new(bucket: &'a str) -> Self {
        Self {
            bucket,
            ..Self::default()
        }
    }

    // Query pairs in their fixed order; `?uploads` opens the query string.
    fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::with_capacity(5);

        if let Some(delimiter) = self.delimiter {
            pairs.push(("delimiter", delimiter.to_string()));
        }

        if let Some(key_marker) = self.key_marker {
            pairs.push(("key-marker", key_marker.to_string()));
        }

        if let Some(max_uploads) = self.max_uploads {
            pairs.push(("max-uploads", max_uploads.to_string()));
        }

        if let Some(prefix) = self.prefix {
            pairs.push(("prefix", prefix.to_string()));
        }

        if let Some(upload_id_marker) = self.upload_id_marker {
            pairs.push(("upload-id-marker", upload_id_marker.to_string()));
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
                key_suffix: Some("?uploads".to_string()),
                query,
                ..RequestParams::default()
            },
            self.prefix.unwrap_or(""),
            BodySource::None,
            BodySink::Discard,
            true,
            XmlDispatch::ListMultipartUploads(ListMultipartUploadsConsumer::default()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::Credentials;

    fn config() -> S3Config {
        S3Config::new(Credentials::new("access", "secret"))
    }

    #[test]
    fn test_query_order() {
        let mut action = ListMultipartUploads::new("bucket");
        action.prefix = Some("tmp/");
        action.key_marker = Some("k");
        action.upload_id_marker = Some("u");
        action.delimiter = Some("/");
        action.max_uploads = Some(5);

        let req = action
            .into_request(&config(), "https://s3.amazonaws.com/")
            .unwrap();
        assert_eq!(
            req.url,
            "https://s3.amazonaws.com/bucket/?uploads\
             &delimiter=%2F&key-marker=k&max-uploads=5&prefix=tmp%2F&upload-id-marker=u"
        );
    }

    #[test]
    fn test_no_options() {
        let req = ListMultipartUploads::new("bucket")
            .into_request(&config(), "https://s3.amazonaws.com/")
            .unwrap();
        assert_eq!(req.url, "https://s3.amazonaws.com/bucket/?uploads");
    }
}
