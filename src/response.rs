use std::fmt;

use bytes::Bytes;
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use url::Url;

use crate::body::UnbufferedBody;
use crate::{Body, Cookie, Method, Result};

/// Response status with range and named predicates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Status(StatusCode);

impl Status {
    pub fn code(&self) -> u16 {
        self.0.as_u16()
    }

    /// Canonical reason phrase, empty for unknown codes.
    pub fn text(&self) -> &'static str {
        self.0.canonical_reason().unwrap_or("")
    }

    pub fn as_status_code(&self) -> StatusCode {
        self.0
    }

    pub fn is_informational(&self) -> bool {
        self.0.is_informational()
    }

    pub fn is_success(&self) -> bool {
        self.0.is_success()
    }

    pub fn is_redirection(&self) -> bool {
        self.0.is_redirection()
    }

    pub fn is_client_error(&self) -> bool {
        self.0.is_client_error()
    }

    pub fn is_server_error(&self) -> bool {
        self.0.is_server_error()
    }

    /// 4xx or 5xx.
    pub fn is_error(&self) -> bool {
        self.is_client_error() || self.is_server_error()
    }

    pub fn is_ok(&self) -> bool {
        self.0 == StatusCode::OK
    }

    pub fn is_not_found(&self) -> bool {
        self.0 == StatusCode::NOT_FOUND
    }

    pub fn is_unauthorized(&self) -> bool {
        self.0 == StatusCode::UNAUTHORIZED
    }

    pub fn is_forbidden(&self) -> bool {
        self.0 == StatusCode::FORBIDDEN
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.canonical_reason() {
            Some(reason) => write!(f, "{} {reason}", self.code()),
            None => write!(f, "{}", self.code()),
        }
    }
}

/// Read-only, case-insensitive view over response headers.
#[derive(Clone, Debug, Default)]
pub struct ResponseHeader(HeaderMap);

impl ResponseHeader {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(|value| value.to_str().ok())
    }

    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.0
            .get_all(name)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .collect()
    }

    /// Distinct header names, lowercased.
    pub fn keys(&self) -> Vec<&str> {
        self.0.keys().map(|name| name.as_str()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn as_map(&self) -> &HeaderMap {
        &self.0
    }
}

/// What was actually put on the wire for the attempt that produced a response.
#[derive(Clone, Debug)]
pub struct SentRequest {
    method: Method,
    url: Url,
    headers: HeaderMap,
}

impl SentRequest {
    pub(crate) fn new(method: Method, url: Url, headers: HeaderMap) -> Self {
        Self {
            method,
            url,
            headers,
        }
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }
}

/// A response whose body is still attached to the connection.
///
/// The `as_*` readers consume the body and close it, whether or not the read
/// succeeds.
#[derive(Debug)]
pub struct Response {
    status: Status,
    header: ResponseHeader,
    cookies: Vec<Cookie>,
    request: SentRequest,
    body: Body,
    attempt: usize,
}

impl Response {
    pub(crate) fn new(
        status: StatusCode,
        headers: HeaderMap,
        cookies: Vec<Cookie>,
        request: SentRequest,
        body: Body,
        attempt: usize,
    ) -> Self {
        Self {
            status: Status(status),
            header: ResponseHeader(headers),
            cookies,
            request,
            body,
            attempt,
        }
    }

    pub(crate) fn from_wire(response: reqwest::Response, request: SentRequest, attempt: usize) -> Self {
        let status = response.status();
        let headers = response.headers().clone();
        let cookies = response.cookies().map(Cookie::from).collect();
        let body = Body::Unbuffered(UnbufferedBody::from_response(response));
        Self::new(status, headers, cookies, request, body, attempt)
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn header(&self) -> &ResponseHeader {
        &self.header
    }

    pub fn cookies(&self) -> &[Cookie] {
        &self.cookies
    }

    pub fn cookie(&self, name: &str) -> Option<&Cookie> {
        self.cookies.iter().find(|cookie| cookie.name() == name)
    }

    pub fn request(&self) -> &SentRequest {
        &self.request
    }

    /// The raw body; reading it through here does not close it.
    pub fn body(&self) -> &Body {
        &self.body
    }

    /// 1-based number of the attempt that produced this response.
    pub fn attempt(&self) -> usize {
        self.attempt
    }

    pub async fn as_bytes(&self) -> Result<Bytes> {
        let result = self.body.read_bytes().await;
        self.body.close().await;
        result
    }

    pub async fn as_string(&self) -> Result<String> {
        let result = self.body.read_string().await;
        self.body.close().await;
        result
    }

    pub async fn as_json<T: DeserializeOwned>(&self) -> Result<T> {
        let result = self.body.read_json().await;
        self.body.close().await;
        result
    }

    pub async fn as_xml<T: DeserializeOwned>(&self) -> Result<T> {
        let result = self.body.read_xml().await;
        self.body.close().await;
        result
    }

    /// Releases the connection without reading the body.
    pub async fn close(&self) {
        self.body.close().await;
    }
}
