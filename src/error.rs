use std::fmt;
use std::time::Duration;

use crate::{Response, ValidationErrors};

/// Boxed error used for hook failures and streaming body errors.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Which configuration layer produced a [`Error::Configuration`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigSide {
    /// Errors recorded while building the [`crate::Client`].
    Client,
    /// Errors recorded while building the [`crate::Request`].
    Request,
}

impl fmt::Display for ConfigSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigSide::Client => f.write_str("client"),
            ConfigSide::Request => f.write_str("request"),
        }
    }
}

/// Failure of a single round-trip through the transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Network, protocol or timeout failure reported by `reqwest`.
    #[error("{0}")]
    Http(#[source] reqwest::Error),
    /// The request context was cancelled.
    #[error("request cancelled")]
    Cancelled,
    /// The request context deadline passed.
    #[error("request deadline exceeded")]
    DeadlineExceeded,
}

impl TransportError {
    /// Returns `true` for reqwest timeouts and context deadlines.
    pub fn is_timeout(&self) -> bool {
        match self {
            TransportError::Http(err) => err.is_timeout(),
            TransportError::DeadlineExceeded => true,
            TransportError::Cancelled => false,
        }
    }
}

/// Why one attempt of a retried request did not finish the loop.
#[derive(Debug)]
pub enum AttemptCause {
    /// The retry predicate asked for another attempt after this status.
    Status { code: u16, text: String },
    /// The transport failed before a response existed.
    Transport(TransportError),
}

impl fmt::Display for AttemptCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptCause::Status { code, text } if text.is_empty() => write!(f, "status {code}"),
            AttemptCause::Status { code, text } => write!(f, "status {code} {text}"),
            AttemptCause::Transport(err) => write!(f, "transport: {err}"),
        }
    }
}

/// Structured record of one failed attempt.
#[derive(Debug)]
pub struct AttemptFailure {
    /// 1-based attempt number.
    pub attempt: usize,
    pub cause: AttemptCause,
    /// Time spent in the attempt itself, excluding backoff.
    pub elapsed: Duration,
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "attempt {}: {}", self.attempt, self.cause)
    }
}

/// Ordered per-attempt failures carried by [`Error::RetryExhausted`].
#[derive(Debug, Default)]
pub struct AttemptFailures(pub(crate) Vec<AttemptFailure>);

impl AttemptFailures {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, AttemptFailure> {
        self.0.iter()
    }

    pub fn last(&self) -> Option<&AttemptFailure> {
        self.0.last()
    }
}

impl fmt::Display for AttemptFailures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, failure) in self.0.iter().enumerate() {
            if index > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{failure}")?;
        }
        Ok(())
    }
}

/// Error type returned by this crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Deferred validation errors recorded while configuring the client or request.
    #[error("invalid {side} configuration: {errors}")]
    Configuration {
        side: ConfigSide,
        errors: ValidationErrors,
    },
    /// A constructor rejected its input outright.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Base URL, path and query could not be joined into a valid URL.
    #[error("invalid url {url:?}: {source}")]
    Url {
        url: String,
        #[source]
        source: url::ParseError,
    },
    /// The wire request could not be assembled.
    #[error("failed to build request: {0}")]
    RequestBuild(String),
    /// A before-request hook refused the request.
    #[error("before-request hook failed: {0}")]
    Hook(#[source] BoxError),
    /// Network-level failure of a request sent without retries.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    /// Every attempt allowed by the retry policy failed.
    #[error("request failed after {} attempts: {attempts}", .attempts.len())]
    RetryExhausted {
        attempts: AttemptFailures,
        last_response: Option<Box<Response>>,
    },
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("xml error: {0}")]
    Xml(#[from] quick_xml::DeError),
    /// Multipart form encoding failed.
    #[error("form-data encoding failed: {0}")]
    Form(#[source] std::io::Error),
    #[error("decode error: {0}")]
    Decode(String),
    /// Reading a streamed body failed.
    #[error("body read error: {0}")]
    Body(#[source] BoxError),
}

impl Error {
    /// Per-attempt failures when retries were exhausted.
    pub fn attempts(&self) -> Option<&AttemptFailures> {
        match self {
            Error::RetryExhausted { attempts, .. } => Some(attempts),
            _ => None,
        }
    }

    /// The response of the last attempt, if retries ended on a response.
    pub fn last_response(&self) -> Option<&Response> {
        match self {
            Error::RetryExhausted { last_response, .. } => last_response.as_deref(),
            _ => None,
        }
    }

    /// Takes the last response out of a [`Error::RetryExhausted`].
    pub fn into_last_response(self) -> Option<Response> {
        match self {
            Error::RetryExhausted { last_response, .. } => last_response.map(|boxed| *boxed),
            _ => None,
        }
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, Error::Configuration { .. } | Error::InvalidConfig(_))
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport(_))
    }
}

#[cfg(test)]
mod tests {
    use super::{AttemptCause, AttemptFailure, AttemptFailures, ConfigSide, Error, TransportError};
    use crate::validation::{ValidationError, ValidationErrors};
    use std::time::Duration;

    #[test]
    fn retry_exhausted_lists_every_attempt() {
        let attempts = AttemptFailures(vec![
            AttemptFailure {
                attempt: 1,
                cause: AttemptCause::Status {
                    code: 500,
                    text: "Internal Server Error".to_owned(),
                },
                elapsed: Duration::from_millis(3),
            },
            AttemptFailure {
                attempt: 2,
                cause: AttemptCause::Transport(TransportError::Cancelled),
                elapsed: Duration::ZERO,
            },
        ]);
        let err = Error::RetryExhausted {
            attempts,
            last_response: None,
        };

        let text = err.to_string();
        assert!(text.contains("after 2 attempts"));
        assert!(text.contains("attempt 1: status 500 Internal Server Error"));
        assert!(text.contains("attempt 2: transport: request cancelled"));
        assert!(err.into_last_response().is_none());
    }

    #[test]
    fn configuration_error_names_side() {
        let mut errors = ValidationErrors::default();
        errors.push(ValidationError::InvalidHeaderName {
            name: "bad header".to_owned(),
        });
        let err = Error::Configuration {
            side: ConfigSide::Client,
            errors,
        };

        assert!(err.is_configuration());
        assert!(err.to_string().starts_with("invalid client configuration"));
    }

    #[test]
    fn deadline_counts_as_timeout() {
        assert!(TransportError::DeadlineExceeded.is_timeout());
        assert!(!TransportError::Cancelled.is_timeout());
    }
}
