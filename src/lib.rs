//! `reqwire` builds, sends and retries HTTP requests on top of `reqwest`.
//!
//! A [`Client`] holds client-wide headers, cookies, hooks, a retry policy and
//! a [`BaseUrl`] (one fixed origin or several balanced round-robin). Each
//! [`Request`] layers its own configuration over the client's and is sent
//! with [`Request::send`]:
//! - configuration errors are collected while building and reported together
//!   before anything touches the network;
//! - a [`RetryPolicy`] re-sends with constant or exponential backoff, an
//!   optional cap and optional full jitter;
//! - the [`Response`] exposes status, headers, cookies, the request that was
//!   sent and a single-pass [`Body`].

mod base_url;
mod body;
mod client;
mod context;
mod error;
mod headers;
mod method;
pub mod mime;
mod options;
mod request;
mod response;
mod retry;
mod validation;

pub use base_url::BaseUrl;
pub use body::{Body, BodyStream, BufferedBody, UnbufferedBody};
pub use client::{AfterResponseHook, BeforeRequestHook, Client, ClientBuilder, Transport};
pub use context::{CancelHandle, Context};
pub use error::{
    AttemptCause, AttemptFailure, AttemptFailures, BoxError, ConfigSide, Error, TransportError,
};
pub use headers::{Cookie, Headers};
pub use method::Method;
pub use options::ClientOptions;
pub use request::Request;
pub use response::{Response, ResponseHeader, SentRequest, Status};
pub use retry::{default_retry_predicate, JitterStrategy, RetryPolicy, RetryPredicate};
pub use validation::{ValidationError, ValidationErrors};

pub type Result<T> = std::result::Result<T, Error>;
