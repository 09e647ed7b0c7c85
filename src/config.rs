use crate::credentials::Credentials;

const DEFAULT_HOST: &str = "s3.amazonaws.com";
const DEFAULT_WALRUS_PORT: u16 = 8773;

/// Sentinel for `ssl_cert_file` that disables peer verification.
pub const CA_CERT_IGNORE: &str = "none";

/// Connection settings, fixed for the lifetime of a [`Connection`].
///
/// [`Connection`]: crate::Connection
#[derive(Clone, Debug)]
pub struct S3Config {
    pub credentials: Credentials,
    /// Endpoint host; empty means the default Amazon endpoint.
    pub host: String,
    /// Endpoint port; Walrus defaults to 8773 when unset.
    pub port: Option<u16>,
    /// Target a Walrus (Eucalyptus) service instead of Amazon S3.
    pub is_walrus: bool,
    pub is_https: bool,
    /// Proxy URL, e.g. `http://proxy:3128`.
    pub proxy: Option<String>,
    /// Path to a CA bundle file, or [`CA_CERT_IGNORE`] to disable
    /// verification. When unset the built-in roots are installed.
    pub ssl_cert_file: Option<String>,
}

impl S3Config {
    #[must_use]
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            host: String::new(),
            port: None,
            is_walrus: false,
            is_https: true,
            proxy: None,
            ssl_cert_file: None,
        }
    }

    pub(crate) fn effective_host(&self) -> &str {
        if self.host.is_empty() {
            DEFAULT_HOST
        } else {
            &self.host
        }
    }

    /// Base URL shared by every request on the connection:
    /// `scheme://host[:port][/services/Walrus]/`.
    #[must_use]
    pub fn base_url(&self) -> String {
        let mut url = String::with_capacity(64);
        url.push_str(if self.is_https { "https://" } else { "http://" });
        url.push_str(self.effective_host());

        let port = match self.port {
            None if self.is_walrus => Some(DEFAULT_WALRUS_PORT),
            other => other,
        };

        if let Some(port) = port {
            url.push(':');
            url.push_str(&port.to_string());
        }

        if self.is_walrus {
            url.push_str("/services/Walrus");
        }

        url.push('/');
        url
    }

    /// Region encoded in the host name, `s3-us-west-2.amazonaws.com` =>
    /// `us-west-2`. The default endpoint and Walrus yield an empty region.
    /// Only `create_bucket` consumes this, as a `LocationConstraint`.
    #[must_use]
    pub fn region(&self) -> String {
        if self.is_walrus {
            return String::new();
        }

        self.host
            .strip_prefix("s3-")
            .and_then(|rest| rest.find(".amazonaws.com").map(|at| rest[..at].to_string()))
            .unwrap_or_default()
    }
}
