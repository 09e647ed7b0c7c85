//! The single execution path every operation goes through: compose the
//! URL, sign, send, classify the response and stream the body into the
//! right handler.

use std::io;
use std::time::Duration;

use bytes::Bytes;
use futures::TryStreamExt;
use http::Version;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::header::{
    HeaderName, HeaderValue, AUTHORIZATION, CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, DATE, RANGE,
};
use reqwest::{Body, Client, Method, Proxy};
use tokio_util::io::StreamReader;
use tracing::debug;

use crate::certs;
use crate::config::{S3Config, CA_CERT_IGNORE};
use crate::error::{Error, Result};
use crate::response::{ResponseDetails, ResponseStatus};
use crate::signature::{
    self, SigningContext, ACL_HEADER_KEY, ACL_HEADER_VALUE, ENCRYPT_HEADER_KEY,
    ENCRYPT_HEADER_VALUE,
};
use crate::xml::{self, XmlDispatch};

static APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

// Without default timeouts a transfer could hang forever if the cable is
// unplugged and nothing else moves on the socket.
pub(crate) const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);
pub(crate) const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

// TCP keepalive probes let a dead connection be detected within
// start + interval * retries = 20 secs while a transfer is idle.
const TCP_KEEPALIVE_TIME: Duration = Duration::from_secs(5);
const TCP_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(5);
const TCP_KEEPALIVE_RETRIES: u32 = 3;

const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

pub(crate) const CONTENT_TYPE_BINARY: &str = "application/octet-stream";
const CONTENT_TYPE_XML: &str = "application/xml";

// Everything except unreserved characters, like the escaping the URLs
// were originally composed with. Note '/' in keys is escaped too.
const URL_ESCAPE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

pub(crate) fn escape_url(value: &str) -> String {
    utf8_percent_encode(value, URL_ESCAPE).to_string()
}

/// Append `?key=value` or `&key=value`; values are escaped, keys are not.
pub(crate) fn append_query_part(url: &mut String, key: &str, value: &str, first: &mut bool) {
    url.push(if *first { '?' } else { '&' });
    url.push_str(key);
    url.push('=');
    url.push_str(&escape_url(value));
    *first = false;
}

/// Sink for GET response bodies. The callback is invoked once per network
/// chunk, with the `Content-Length` as a total-size hint when the server
/// sent one (0 otherwise). Returning fewer bytes than offered truncates
/// the transfer; returning 0 means "no more room".
///
/// For synchronous operations the callback runs on the calling thread; it
/// must not block unreasonably or the transfer will time out.
pub trait GetLoader: Send {
    fn on_load(&mut self, chunk: &[u8], total_size_hint: u64) -> usize;
}

/// Source for PUT request bodies. The callback fills the chunk buffer and
/// returns the number of bytes produced; 0 ends the body early. The total
/// size is fixed up front and sent as `Content-Length`.
///
/// Runs on the calling thread; it must not block unreasonably.
pub trait PutUploader: Send {
    fn fill_chunk(&mut self, chunk: &mut [u8]) -> usize;
}

pub(crate) enum BodySource<'a> {
    None,
    Buffer(Bytes),
    Uploader {
        uploader: &'a mut dyn PutUploader,
        total: u64,
    },
}

pub(crate) enum BodySink<'a> {
    /// Response bytes are dropped.
    Discard,
    /// Load into an owned buffer, up to `capacity` bytes.
    Buffer { data: Vec<u8>, capacity: usize },
    Loader(&'a mut dyn GetLoader),
}

/// One in-flight request: the wire-level pieces plus the tagged plug
/// points that vary per operation.
pub(crate) struct S3Request<'a> {
    pub(crate) verb: Method,
    pub(crate) url: String,
    pub(crate) headers: Vec<(HeaderName, HeaderValue)>,
    pub(crate) body: BodySource<'a>,
    pub(crate) sink: BodySink<'a>,
    pub(crate) expect_xml: bool,
    pub(crate) dispatch: XmlDispatch,
    pub(crate) details: ResponseDetails,
}

/// Operation-specific request parameters, filled in by the modules under
/// `actions/`.
pub(crate) struct RequestParams<'r> {
    pub verb: Method,
    pub bucket: &'r str,
    pub key: Option<&'r str>,
    /// Sub-resource suffix (`?uploads`, `?uploadId=…`), appended after
    /// the key is escaped. Requires `key`.
    pub key_suffix: Option<String>,
    pub content_type: Option<&'r str>,
    pub make_public: bool,
    pub server_encrypt: bool,
    /// Query parts in the order they must appear; values are escaped at
    /// composition time.
    pub query: Vec<(&'static str, String)>,
    /// Byte range `[lo, hi)`, sent as `Range: bytes=lo-(hi-1)`.
    pub range: Option<(u64, u64)>,
}

impl Default for RequestParams<'_> {
    fn default() -> Self {
        Self {
            verb: Method::GET,
            bucket: "",
            key: None,
            key_suffix: None,
            content_type: None,
            make_public: false,
            server_encrypt: false,
            query: Vec::new(),
            range: None,
        }
    }
}

fn header_value(text: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(text)
        .map_err(|_| Error::Transport(format!("invalid header value: {text}")))
}

impl<'a> S3Request<'a> {
    /// Compose the URL, sign, and assemble the header list. `name` lands
    /// in the response details for error summaries.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn build(
        config: &S3Config,
        base_url: &str,
        params: RequestParams<'_>,
        name: &str,
        body: BodySource<'a>,
        sink: BodySink<'a>,
        expect_xml: bool,
        dispatch: XmlDispatch,
    ) -> Result<Self> {
        // Escape the key once; the sub-resource suffix is appended
        // verbatim after escaping.
        let escaped_key = params.key.map(|key| {
            let mut escaped = escape_url(key);
            if let Some(suffix) = &params.key_suffix {
                escaped.push_str(suffix);
            }
            escaped
        });

        let mut url = String::with_capacity(512);
        url.push_str(base_url);
        url.push_str(params.bucket);

        if let Some(escaped_key) = &escaped_key {
            url.push('/');
            url.push_str(escaped_key);
        }

        let mut first = params.key_suffix.is_none();
        for (key, value) in &params.query {
            append_query_part(&mut url, key, value, &mut first);
        }

        // The transport parses lazily at send time; validate now so a
        // malformed host fails the compose step instead.
        url::Url::parse(&url).map_err(|e| Error::Transport(format!("invalid URL '{url}': {e}")))?;

        let date = signature::http_date();
        let auth = signature::authorization(
            &config.credentials,
            &SigningContext {
                verb: params.verb.as_str(),
                content_md5: None,
                content_type: params.content_type,
                date: &date,
                make_public: params.make_public,
                server_encrypt: params.server_encrypt,
                is_walrus: config.is_walrus,
                bucket: params.bucket,
                key: escaped_key.as_deref(),
            },
        );

        let mut headers = Vec::with_capacity(8);

        if let Some(content_type) = params.content_type {
            headers.push((CONTENT_TYPE, header_value(content_type)?));
        }

        headers.push((DATE, header_value(&date)?));

        if params.make_public {
            headers.push((
                HeaderName::from_static(ACL_HEADER_KEY),
                HeaderValue::from_static(ACL_HEADER_VALUE),
            ));
        }

        if params.server_encrypt {
            headers.push((
                HeaderName::from_static(ENCRYPT_HEADER_KEY),
                HeaderValue::from_static(ENCRYPT_HEADER_VALUE),
            ));
        }

        if let Some((low, high)) = params.range {
            if low < high {
                headers.push((RANGE, header_value(&format!("bytes={}-{}", low, high - 1))?));
            }
        }

        headers.push((AUTHORIZATION, header_value(&auth)?));

        // The service closes the connection between requests unless
        // keep-alive is asked for explicitly.
        headers.push((CONNECTION, HeaderValue::from_static("Keep-Alive")));

        let details = ResponseDetails::new(url.clone(), name);

        Ok(Self {
            verb: params.verb,
            url,
            headers,
            body,
            sink,
            expect_xml,
            dispatch,
            details,
        })
    }
}

/// Configure one transport handle for a connection. Rebuilt only when the
/// connect-timeout changes; live connections, sessions and DNS state stay
/// inside the client between requests.
pub(crate) fn build_client(config: &S3Config, connect_timeout: Duration) -> Result<Client> {
    let mut builder = Client::builder()
        .user_agent(APP_USER_AGENT)
        .connect_timeout(connect_timeout)
        .tcp_nodelay(true)
        .tcp_keepalive(Some(TCP_KEEPALIVE_TIME))
        .tcp_keepalive_interval(Some(TCP_KEEPALIVE_INTERVAL))
        .tcp_keepalive_retries(Some(TCP_KEEPALIVE_RETRIES))
        .http1_only()
        .redirect(reqwest::redirect::Policy::none());

    if let Some(proxy) = &config.proxy {
        builder = builder.proxy(
            Proxy::all(proxy)
                .map_err(|e| Error::Transport(format!("invalid proxy '{proxy}': {e}")))?,
        );
    }

    if config.is_https {
        match config.ssl_cert_file.as_deref() {
            Some(CA_CERT_IGNORE) => {
                builder = builder.danger_accept_invalid_certs(true);
            }
            Some(path) => {
                let pem = std::fs::read(path).map_err(|e| {
                    Error::Transport(format!("cannot read CA file '{path}': {e}"))
                })?;
                let bundle = reqwest::Certificate::from_pem_bundle(&pem).map_err(|e| {
                    Error::Transport(format!("cannot parse CA file '{path}': {e}"))
                })?;
                for cert in bundle {
                    builder = builder.add_root_certificate(cert);
                }
            }
            None => {
                for pem in certs::default_ca_certs() {
                    let cert = reqwest::Certificate::from_pem(pem.as_bytes())
                        .map_err(|e| Error::Transport(format!("bad built-in root: {e}")))?;
                    builder = builder.add_root_certificate(cert);
                }
            }
        }
    }

    builder
        .build()
        .map_err(|e| Error::Transport(format!("cannot build HTTP client: {e}")))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum BodyHandler {
    Xml,
    Binary,
    Discard,
}

/// On success the operation decides XML vs binary; error statuses that
/// can carry AWS details get the XML handler when the payload looks like
/// XML, everything else is discarded.
fn select_body_handler(details: &ResponseDetails, expect_xml: bool) -> BodyHandler {
    match details.status {
        ResponseStatus::Success => {
            if expect_xml {
                BodyHandler::Xml
            } else {
                BodyHandler::Binary
            }
        }
        ResponseStatus::HttpResourceNotFound | ResponseStatus::HttpOrAwsFailure => {
            if details.content_length != 0 && details.content_type == CONTENT_TYPE_XML {
                BodyHandler::Xml
            } else {
                BodyHandler::Discard
            }
        }
        _ => BodyHandler::Discard,
    }
}

/// Drive one request to completion, streaming the body out and the
/// response in.
pub(crate) async fn execute(
    client: &Client,
    timeout: Duration,
    req: &mut S3Request<'_>,
) -> Result<()> {
    debug!(verb = %req.verb, url = %req.url, name = %req.details.name, "execute");

    let mut builder = client
        .request(req.verb.clone(), &req.url)
        .version(Version::HTTP_10)
        .timeout(timeout);

    for (name, value) in req.headers.drain(..) {
        builder = builder.header(name, value);
    }

    let response = match std::mem::replace(&mut req.body, BodySource::None) {
        BodySource::None => builder.send().await,

        BodySource::Buffer(data) => {
            builder = builder.header(CONTENT_LENGTH, data.len());
            builder.body(data).send().await
        }

        BodySource::Uploader { uploader, total } => {
            // The body stream must be 'static, so chunks travel through a
            // channel fed concurrently with the send.
            let (tx, mut rx) = tokio::sync::mpsc::channel::<io::Result<Bytes>>(2);
            let stream = futures::stream::poll_fn(move |cx| rx.poll_recv(cx));
            builder = builder.header(CONTENT_LENGTH, total);
            let send = builder.body(Body::wrap_stream(stream)).send();

            let feed = async move {
                let mut left = total;
                while left > 0 {
                    let want = UPLOAD_CHUNK_SIZE.min(usize::try_from(left).unwrap_or(usize::MAX));
                    let mut buf = vec![0_u8; want];
                    let produced = uploader.fill_chunk(&mut buf);
                    if produced == 0 {
                        break;
                    }
                    buf.truncate(produced);
                    left = left.saturating_sub(produced as u64);
                    if tx.send(Ok(Bytes::from(buf))).await.is_err() {
                        break;
                    }
                }
            };

            let (response, ()) = tokio::join!(send, feed);
            response
        }
    };

    let mut response = response.map_err(|e| Error::transport(&e))?;

    req.details.classify(response.status());
    req.details.absorb_headers(response.headers());

    debug!(
        status = %req.details.http_status,
        date = %req.details.http_date,
        amz_id = %req.details.amazon_id,
        request_id = %req.details.request_id,
        "response headers"
    );

    match select_body_handler(&req.details, req.expect_xml) {
        BodyHandler::Xml => {
            let stream = Box::pin(response.bytes_stream().map_err(io::Error::other));
            let reader = StreamReader::new(stream);
            xml::consume(reader, &mut req.dispatch, &mut req.details).await?;
        }

        BodyHandler::Binary => {
            let hint = if req.details.content_length < 0 {
                0
            } else {
                req.details.content_length as u64
            };

            while let Some(chunk) = response.chunk().await.map_err(|e| Error::transport(&e))? {
                let accepted = match &mut req.sink {
                    BodySink::Discard => chunk.len(),

                    BodySink::Buffer { data, capacity } => {
                        let room = *capacity - data.len();
                        let take = room.min(chunk.len());
                        data.extend_from_slice(&chunk[..take]);
                        take
                    }

                    BodySink::Loader(loader) => loader.on_load(&chunk, hint),
                };

                req.details.loaded_content_length += accepted as i64;

                if accepted < chunk.len() {
                    // The sink is full; stop reading and flag it.
                    req.details.is_truncated = true;
                    break;
                }
            }
        }

        BodyHandler::Discard => {
            while let Some(_chunk) =
                response.chunk().await.map_err(|e| Error::transport(&e))?
            {}
        }
    }

    debug!(
        status = ?req.details.status,
        loaded = req.details.loaded_content_length,
        truncated = req.details.is_truncated,
        host_id = %req.details.host_id,
        "request complete"
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::Credentials;

    #[test]
    fn test_escape_url() {
        assert_eq!(escape_url("tmp/folder1/test.dat"), "tmp%2Ffolder1%2Ftest.dat");
        assert_eq!(escape_url("a b+c"), "a%20b%2Bc");
        assert_eq!(escape_url("safe-chars_0.9~"), "safe-chars_0.9~");
    }

    #[test]
    fn test_append_query_part() {
        let mut url = "http://host/bucket/".to_string();
        let mut first = true;
        append_query_part(&mut url, "delimiter", "/", &mut first);
        append_query_part(&mut url, "marker", "a b", &mut first);
        assert_eq!(url, "http://host/bucket/?delimiter=%2F&marker=a%20b");
    }

    fn config() -> S3Config {
        S3Config::new(Credentials::new("access", "secret"))
    }

    fn build(params: RequestParams<'_>) -> S3Request<'static> {
        S3Request::build(
            &config(),
            "https://s3.amazonaws.com/",
            params,
            "name",
            BodySource::None,
            BodySink::Discard,
            false,
            XmlDispatch::None,
        )
        .unwrap()
    }

    #[test]
    fn test_build_object_url() {
        let req = build(RequestParams {
            verb: Method::GET,
            bucket: "bucket",
            key: Some("tmp/folder1/test.dat"),
            ..RequestParams::default()
        });
        assert_eq!(
            req.url,
            "https://s3.amazonaws.com/bucket/tmp%2Ffolder1%2Ftest.dat"
        );
    }

    #[test]
    fn test_build_key_suffix_and_query_order() {
        let req = build(RequestParams {
            verb: Method::GET,
            bucket: "bucket",
            key: Some(""),
            key_suffix: Some("?uploads".to_string()),
            query: vec![
                ("delimiter", "/".to_string()),
                ("key-marker", "k".to_string()),
                ("max-uploads", "10".to_string()),
            ],
            ..RequestParams::default()
        });
        // The suffix opens the query string, so parts continue with '&'.
        assert_eq!(
            req.url,
            "https://s3.amazonaws.com/bucket/?uploads&delimiter=%2F&key-marker=k&max-uploads=10"
        );
    }

    #[test]
    fn test_build_headers() {
        let req = build(RequestParams {
            verb: Method::PUT,
            bucket: "bucket",
            key: Some("k"),
            content_type: Some(CONTENT_TYPE_BINARY),
            make_public: true,
            server_encrypt: true,
            range: Some((0, 16)),
            ..RequestParams::default()
        });

        let names: Vec<&str> = req.headers.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(
            names,
            [
                "content-type",
                "date",
                "x-amz-acl",
                "x-amz-server-side-encryption",
                "range",
                "authorization",
                "connection"
            ]
        );

        let value = |name: &str| {
            req.headers
                .iter()
                .find(|(n, _)| n.as_str() == name)
                .map(|(_, v)| v.to_str().unwrap().to_string())
                .unwrap()
        };

        assert_eq!(value("x-amz-acl"), "public-read");
        assert_eq!(value("x-amz-server-side-encryption"), "AES256");
        assert_eq!(value("range"), "bytes=0-15");
        assert!(value("authorization").starts_with("AWS access:"));
        assert_eq!(value("connection"), "Keep-Alive");
    }

    #[test]
    fn test_empty_range_not_sent() {
        let req = build(RequestParams {
            verb: Method::GET,
            bucket: "bucket",
            key: Some("k"),
            range: Some((4, 4)),
            ..RequestParams::default()
        });
        assert!(!req.headers.iter().any(|(n, _)| *n == RANGE));
    }

    fn details(status: ResponseStatus, content_type: &str, content_length: i64) -> ResponseDetails {
        let mut d = ResponseDetails::new(String::new(), "");
        d.status = status;
        d.content_type = content_type.to_string();
        d.content_length = content_length;
        d
    }

    #[test]
    fn test_select_body_handler() {
        // Success: the operation decides.
        let d = details(ResponseStatus::Success, "", -1);
        assert_eq!(select_body_handler(&d, true), BodyHandler::Xml);
        assert_eq!(select_body_handler(&d, false), BodyHandler::Binary);

        // Error statuses that may carry details: XML when it looks like XML.
        for status in [
            ResponseStatus::HttpResourceNotFound,
            ResponseStatus::HttpOrAwsFailure,
        ] {
            let d = details(status, "application/xml", 123);
            assert_eq!(select_body_handler(&d, false), BodyHandler::Xml);

            let d = details(status, "application/xml", 0);
            assert_eq!(select_body_handler(&d, false), BodyHandler::Discard);

            let d = details(status, "text/html", 123);
            assert_eq!(select_body_handler(&d, false), BodyHandler::Discard);
        }

        // Plain HTTP failures never get a body handler.
        let d = details(ResponseStatus::HttpFailure, "application/xml", 123);
        assert_eq!(select_body_handler(&d, true), BodyHandler::Discard);
    }
}
