//! Error taxonomy for the client.
//!
//! Every public operation wraps whatever failed in [`Error::Summary`] so
//! callers always see a single line of the form
//! `S3 <op> for '<key>' failed. <cause>`.

use std::error::Error as StdError;

/// Convenience result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The response carried no HTTP status, or the client reached a state
    /// it cannot classify.
    #[error("Unexpected error.")]
    Unexpected,

    /// Network-level failure reported by the HTTP client. Timeouts are
    /// reported here with a message containing `timed out`.
    #[error("{0}.")]
    Transport(String),

    /// An HTTP status the client does not handle.
    #[error("{status_line}.")]
    Http { status_line: String },

    /// A 404 without AWS error details in the body.
    #[error("HTTP resource not found: {url}.")]
    HttpResourceNotFound { url: String },

    /// A 4xx/5xx whose XML payload parsed into service error details.
    #[error("{message} (Code='{code}', RequestId='{request_id}').")]
    Aws {
        code: String,
        message: String,
        request_id: String,
    },

    /// Malformed response XML.
    #[error("Cannot parse the response.")]
    Parser,

    /// More connections passed to `wait_any` than the wait set supports.
    #[error("Too many connections passed to wait_any.")]
    TooManyConnections,

    /// Wrapper added by every public entry point.
    #[error("S3 {op} for '{key}' failed. {source}")]
    Summary {
        op: &'static str,
        key: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    pub(crate) fn summary<'a>(op: &'static str, key: &'a str) -> impl FnOnce(Error) -> Error + 'a {
        move |cause| Error::Summary {
            op,
            key: key.to_string(),
            source: Box::new(cause),
        }
    }

    /// Map an HTTP client error onto the transport kind, normalizing
    /// timeouts so their text always contains `timed out`.
    pub(crate) fn transport(err: &reqwest::Error) -> Error {
        if err.is_timeout() {
            return Error::Transport("transfer timed out".to_string());
        }

        // Flatten the source chain into one line.
        let mut text = err.to_string();
        let mut source = err.source();
        while let Some(cause) = source {
            text.push_str(": ");
            text.push_str(&cause.to_string());
            source = cause.source();
        }
        Error::Transport(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_message() {
        let err = Error::Summary {
            op: "get",
            key: "tmp/test.dat".to_string(),
            source: Box::new(Error::HttpResourceNotFound {
                url: "https://s3.amazonaws.com/b/tmp/test.dat".to_string(),
            }),
        };
        assert_eq!(
            err.to_string(),
            "S3 get for 'tmp/test.dat' failed. \
             HTTP resource not found: https://s3.amazonaws.com/b/tmp/test.dat."
        );
    }

    #[test]
    fn test_aws_message() {
        let err = Error::Aws {
            code: "NoSuchBucket".to_string(),
            message: "The specified bucket does not exist".to_string(),
            request_id: "4442587FB7D0A2F9".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "The specified bucket does not exist \
             (Code='NoSuchBucket', RequestId='4442587FB7D0A2F9')."
        );
    }

    #[test]
    fn test_summary_wrapping_helper() {
        let wrapped = Err::<(), _>(Error::Parser).map_err(Error::summary("put", "k"));
        assert_eq!(
            wrapped.unwrap_err().to_string(),
            "S3 put for 'k' failed. Cannot parse the response."
        );
    }
}
