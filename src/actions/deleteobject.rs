use reqwest::Method;

use crate::config::S3Config;
use crate::error::Result;
use crate::request::{BodySink, BodySource, RequestParams, S3Request};
use crate::xml::XmlDispatch;

/// DELETE on an object, a bucket (empty key), or an in-progress multipart
/// upload (`?uploadId=…` suffix).
#[derive(Debug)]
pub(crate) struct DeleteObject<'a> {
    bucket: &'a str,
    key: &'a str,
    pub key_suffix: Option<String>,
}

impl<'a> DeleteObject<'a> {
    #[must_use]
    pub(crate) fn new(bucket: &'a str, key: &'a str) -> Self {
        Self {
            bucket,
            key,
            key_suffix: None,
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
                verb: Method::DELETE,
                bucket: self.bucket,
                key: Some(self.key),
                key_suffix: self.key_suffix,
                ..RequestParams::default()
            },
            self.key,
            BodySource::None,
            BodySink::Discard,
            false,
            XmlDispatch::None,
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
    fn test_delete_object() {
        let req = DeleteObject::new("bucket", "tmp/test.dat")
            .into_request(&config(), "https://s3.amazonaws.com/")
            .unwrap();
        assert_eq!(req.verb, Method::DELETE);
        assert_eq!(req.url, "https://s3.amazonaws.com/bucket/tmp%2Ftest.dat");
    }

    #[test]
    fn test_abort_suffix() {
        let mut action = DeleteObject::new("bucket", "big.dat");
        action.key_suffix = Some("?uploadId=VXBsb2FkIElE".to_string());
        let req = action
            .into_request(&config(), "https://s3.amazonaws.com/")
            .unwrap();
        assert_eq!(
            req.url,
            "https://s3.amazonaws.com/bucket/big.dat?uploadId=VXBsb2FkIElE"
        );
    }
}
