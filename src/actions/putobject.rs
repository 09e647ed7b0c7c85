use reqwest::Method;

use crate::actions::PutOptions;
use crate::config::S3Config;
use crate::error::Result;
use crate::request::{BodySink, BodySource, RequestParams, S3Request, CONTENT_TYPE_BINARY};
use crate::xml::XmlDispatch;

/// Whole-object PUT, or one part of a multipart upload when `part` is
/// set. Part uploads omit the ACL and encryption headers; those were
/// fixed when the upload was initiated.
#[derive(Debug)]
pub(crate) struct PutObject<'a> {
    bucket: &'a str,
    key: &'a str,
    options: &'a PutOptions,
    part: Option<(u32, &'a str)>,
}

impl<'a> PutObject<'a> {
    #[must_use]
    pub(crate) fn new(bucket: &'a str, key: &'a str, options: &'a PutOptions) -> Self {
        Self {
            bucket,
            key,
            options,
            part: None,
        }
    }

    #[must_use]
    pub(crate) fn part(mut self, part_number: u32, upload_id: &'a str) -> Self {
        self.part = Some((part_number, upload_id));
        self
    }

    /// # Errors
    ///
    /// Will return `Err` if the request cannot be composed
    pub(crate) fn into_request<'s>(
        self,
        config: &S3Config,
        base_url: &str,
        body: BodySource<'s>,
    ) -> Result<S3Request<'s>> {
        let key_suffix = self
            .part
            .map(|(part_number, upload_id)| format!("?partNumber={part_number}&uploadId={upload_id}"));

        let (make_public, server_encrypt) = if self.part.is_some() {
            (false, false)
        } else {
            (self.options.make_public, self.options.server_encrypt)
        };

        S3Request::build(
            config,
            base_url,
            RequestParams {
                verb: Method::PUT,
                bucket: self.bucket,
                key: Some(self.key),
                key_suffix,
                content_type: Some(
                    self.options
                        .content_type
                        .as_deref()
                        .unwrap_or(CONTENT_TYPE_BINARY),
                ),
                make_public,
                server_encrypt,
                ..RequestParams::default()
            },
            self.key,
            body,
            BodySink::Discard,
            false,
            XmlDispatch::None,
        )
    }
}
