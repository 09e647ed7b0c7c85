use bytes::Bytes;
use reqwest::Method;

use crate::actions::PutOptions;
use crate::config::S3Config;
use crate::error::Result;
use crate::request::{BodySink, BodySource, RequestParams, S3Request, CONTENT_TYPE_BINARY};
use crate::xml::XmlDispatch;

/// POST `?uploads` with an empty body. The ACL, encryption and content
/// type of the final object are fixed here, not on the individual parts.
#[derive(Debug)]
pub(crate) struct InitiateMultipartUpload<'a> {
    bucket: &'a str,
    key: &'a str,
    options: &'a PutOptions,
}

impl<'a> InitiateMultipartUpload<'a> {
    #[must_use]
    pub(crate) fn new(bucket: &'a str, key: &'a str, options: &'a PutOptions) -> Self {
        Self {
            bucket,
            key,
            options,
        }
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
                verb: Method::POST,
                bucket: self.bucket,
                key: Some(self.key),
                key_suffix: Some("?uploads".to_string()),
                content_type: Some(
                    self.options
                        .content_type
                        .as_deref()
                        .unwrap_or(CONTENT_TYPE_BINARY),
                ),
                make_public: self.options.make_public,
                server_encrypt: self.options.server_encrypt,
                ..RequestParams::default()
            },
            self.key,
            BodySource::Buffer(Bytes::new()),
            BodySink::Discard,
            true,
            XmlDispatch::InitiateMultipartUpload,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::Credentials;

    #[test]
    fn test_url_and_dispatch() {
        let config = S3Config::new(Credentials::new("access", "secret"));
        let options = PutOptions::default();
        let req = InitiateMultipartUpload::new("bucket", "big.dat", &options)
            .into_request(&config, "https://s3.amazonaws.com/")
            .unwrap();

        assert_eq!(req.verb, Method::POST);
        assert_eq!(req.url, "https://s3.amazonaws.com/bucket/big.dat?uploads");
        assert!(req.expect_xml);
        assert!(matches!(req.dispatch, XmlDispatch::InitiateMultipartUpload));
    }
}
