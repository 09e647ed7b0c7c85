use bytes::Bytes;
use reqwest::Method;

use crate::config::S3Config;
use crate::error::Result;
use crate::request::{BodySink, BodySource, RequestParams, S3Request};
use crate::xml::XmlDispatch;

#[derive(Debug)]
pub(crate) struct CreateBucket<'a> {
    bucket: &'a str,
    pub make_public: bool,
}

impl<'a> CreateBucket<'a> {
    #[must_use]
    pub(crate) fn new(bucket: &'a str) -> Self {
        Self {
            bucket,
            make_public: false,
        }
    }

    /// A `LocationConstraint` body is sent when the configured host pins a
    /// region; Walrus ignores the concept and gets an empty body.
    fn payload(config: &S3Config) -> Bytes {
        let region = config.region();
        if config.is_walrus || region.is_empty() {
            return Bytes::new();
        }

        Bytes::from(format!(
            "<CreateBucketConfiguration><LocationConstraint>{region}\
             </LocationConstraint></CreateBucketConfiguration>"
        ))
    }

    /// # Errors
    ///
    /// Will return `Err` if the request cannot be composed
    pub(crate) fn into_request(
        self,
        config: &S3Config,
        base_url: &str,
    ) -> Result<S3Request<'static>> {
        let payload = Self::payload(config);

        S3Request::build(
            config,
            base_url,
            RequestParams {
                verb: Method::PUT,
                bucket: self.bucket,
                make_public: self.make_public,
                ..RequestParams::default()
            },
            self.bucket,
            BodySource::Buffer(payload),
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
    fn test_bucket_url() {
        let req = CreateBucket::new("bucket")
            .into_request(&config(), "https://s3.amazonaws.com/")
            .unwrap();
        assert_eq!(req.verb, Method::PUT);
        assert_eq!(req.url, "https://s3.amazonaws.com/bucket");
    }

    #[test]
    fn test_payload_with_region() {
        let mut cfg = config();
        cfg.host = "s3-eu-west-1.amazonaws.com".to_string();
        assert_eq!(
            CreateBucket::payload(&cfg),
            "<CreateBucketConfiguration><LocationConstraint>eu-west-1\
             </LocationConstraint></CreateBucketConfiguration>"
        );
    }

    #[test]
    fn test_payload_default_region_empty() {
        assert!(CreateBucket::payload(&config()).is_empty());
    }

    #[test]
    fn test_payload_walrus_empty() {
        let mut cfg = config();
        cfg.is_walrus = true;
        cfg.host = "s3-eu-west-1.amazonaws.com".to_string();
        assert!(CreateBucket::payload(&cfg).is_empty());
    }
}
