use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};

use reqwest::header::{HeaderValue, CONTENT_TYPE, COOKIE};
use serde::Serialize;
use url::Url;

use crate::base_url;
use crate::body::{encode_form_data, encode_json, encode_xml, BodyStream};
use crate::error::{AttemptCause, AttemptFailure, AttemptFailures, ConfigSide};
use crate::headers::cookie_header;
use crate::response::SentRequest;
use crate::validation::{parse_query_string, ValidationError, ValidationErrors};
use crate::{
    mime, Body, Client, Context, Cookie, Error, Headers, Method, Response, Result, RetryPolicy,
    TransportError,
};

/// A single outgoing request, built fluently and consumed by [`Request::send`].
pub struct Request {
    client: Client,
    method: Method,
    path: String,
    headers: Headers,
    cookies: Vec<Cookie>,
    query: BTreeMap<String, Vec<String>>,
    context: Context,
    body: Body,
    retry: Option<RetryPolicy>,
    errors: ValidationErrors,
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("query", &self.query)
            .field("cookies", &self.cookies.len())
            .field("body", &self.body)
            .field("retry", &self.retry)
            .field("errors", &self.errors)
            .finish_non_exhaustive()
    }
}

impl Request {
    pub(crate) fn new(client: Client, method: Method, path: String) -> Self {
        Self {
            client,
            method,
            path,
            headers: Headers::new(),
            cookies: Vec::new(),
            query: BTreeMap::new(),
            context: Context::background(),
            body: Body::empty(),
            retry: None,
            errors: ValidationErrors::new(),
        }
    }

    /// Sets a header, replacing client and earlier request values.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        if let Err(err) = self.headers.set(name, value) {
            self.errors.push(err);
        }
        self
    }

    /// Adds a header value after any client and earlier request values.
    pub fn add_header(mut self, name: &str, value: &str) -> Self {
        if let Err(err) = self.headers.add(name, value) {
            self.errors.push(err);
        }
        self
    }

    /// Sets several headers, each replacing earlier values of its name.
    pub fn headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (name, value) in headers {
            self = self.header(name.as_ref(), value.as_ref());
        }
        self
    }

    /// Adds a cookie sent after the client's cookies.
    ///
    /// Cookies added here share one `Cookie` header line with any value set
    /// through [`Request::header`].
    pub fn cookie(mut self, cookie: Cookie) -> Self {
        self.cookies.push(cookie);
        self
    }

    /// Adds several cookies in order.
    pub fn cookies(mut self, cookies: impl IntoIterator<Item = Cookie>) -> Self {
        self.cookies.extend(cookies);
        self
    }

    /// Appends a query value; repeated keys keep every value.
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.entry(key.into()).or_default().push(value.into());
        self
    }

    /// Replaces all values of a query key.
    pub fn set_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), vec![value.into()]);
        self
    }

    /// Appends every pair of a raw `a=1&b=2` query string.
    pub fn query_string(mut self, raw: &str) -> Self {
        match parse_query_string(raw) {
            Ok(pairs) => {
                for (key, value) in pairs {
                    self = self.query(key, value);
                }
            }
            Err(err) => self.errors.push(err),
        }
        self
    }

    /// Replaces the request context, which bounds every attempt and backoff wait.
    pub fn context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }

    /// Tightens the context deadline to `timeout` from now.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.context = self.context.with_timeout(timeout);
        self
    }

    /// Replaces the body. The content type is left to the caller.
    pub fn body(mut self, body: Body) -> Self {
        self.body = body;
        self
    }

    /// Sets an in-memory body that is replayed on every attempt.
    pub fn body_bytes(self, bytes: impl Into<bytes::Bytes>) -> Self {
        self.body(Body::from_bytes(bytes))
    }

    /// Sets a text body, defaulting the content type to `text/plain`.
    pub fn body_string(self, text: impl Into<String>) -> Self {
        self.body(Body::from_bytes(text.into()))
            .default_content_type(mime::TEXT_PLAIN)
    }

    /// Streams the body; it is sent once and not replayed on retries.
    pub fn body_stream(self, stream: BodyStream) -> Self {
        self.body(Body::from_stream(stream))
    }

    /// Serializes `value` as the JSON body.
    pub fn json<T: Serialize + ?Sized>(mut self, value: &T) -> Self {
        match encode_json(value) {
            Ok(encoded) => {
                self.body = Body::from_bytes(encoded);
                self.default_content_type(mime::APPLICATION_JSON)
            }
            Err(err) => {
                self.errors.push(ValidationError::BodyEncode {
                    format: "json",
                    message: err.to_string(),
                });
                self
            }
        }
    }

    /// Serializes `value` as the XML body.
    pub fn xml<T: Serialize + ?Sized>(mut self, value: &T) -> Self {
        match encode_xml(value) {
            Ok(encoded) => {
                self.body = Body::from_bytes(encoded);
                self.default_content_type(mime::APPLICATION_XML)
            }
            Err(err) => {
                self.errors.push(ValidationError::BodyEncode {
                    format: "xml",
                    message: err.to_string(),
                });
                self
            }
        }
    }

    /// Encodes `fields` as a multipart form and sets the matching content type.
    pub fn form_data<I, K, V>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        match encode_form_data(fields) {
            Ok((encoded, content_type)) => {
                self.body = Body::from_bytes(encoded);
                self.header(CONTENT_TYPE.as_str(), &content_type)
            }
            Err(err) => {
                self.errors.push(ValidationError::BodyEncode {
                    format: "form-data",
                    message: err.to_string(),
                });
                self
            }
        }
    }

    /// Overrides the client's retry policy for this request.
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    fn default_content_type(self, content_type: &str) -> Self {
        if self.headers.contains(CONTENT_TYPE.as_str()) {
            self
        } else {
            self.header(CONTENT_TYPE.as_str(), content_type)
        }
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn header_map(&self) -> &Headers {
        &self.headers
    }

    pub fn cookie_list(&self) -> &[Cookie] {
        &self.cookies
    }

    pub fn query_params(&self) -> &BTreeMap<String, Vec<String>> {
        &self.query
    }

    pub fn context_ref(&self) -> &Context {
        &self.context
    }

    /// The body as it will be sent.
    pub fn body_ref(&self) -> &Body {
        &self.body
    }

    /// The policy in effect: this request's, otherwise the client's.
    pub fn retry_policy(&self) -> Option<&RetryPolicy> {
        self.retry.as_ref().or_else(|| self.client.retry_policy())
    }

    /// Configuration errors collected so far on this request.
    pub fn errors(&self) -> &ValidationErrors {
        &self.errors
    }

    /// The client this request was created from.
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Sends the request, retrying according to the effective retry policy.
    ///
    /// Configuration, URL and build errors return before any network
    /// activity. Without an enabled policy the single outcome is returned as
    /// is. With one, a response the predicate accepts is returned whatever
    /// its status; otherwise [`Error::RetryExhausted`] carries every attempt's
    /// cause and the last response.
    pub async fn send(self) -> Result<Response> {
        self.validate()?;
        for hook in self.client.before_request_hooks() {
            hook(&self).map_err(Error::Hook)?;
        }
        let url = self.resolve_url()?;

        match self.retry_policy().filter(|policy| policy.is_enabled()) {
            Some(policy) => self.execute_with_retry(&url, policy).await,
            None => self.execute_once(&url, 1).await,
        }
    }

    fn validate(&self) -> Result<()> {
        let client_errors = self.client.errors();
        if !client_errors.is_empty() {
            #[cfg(feature = "tracing")]
            tracing::debug!(errors = %client_errors, "rejecting request: invalid client configuration");
            return Err(Error::Configuration {
                side: ConfigSide::Client,
                errors: client_errors.joined(&self.errors),
            });
        }
        if !self.errors.is_empty() {
            #[cfg(feature = "tracing")]
            tracing::debug!(errors = %self.errors, "rejecting request: invalid request configuration");
            return Err(Error::Configuration {
                side: ConfigSide::Request,
                errors: self.errors.clone(),
            });
        }
        Ok(())
    }

    fn resolve_url(&self) -> Result<Url> {
        let mut url = base_url::join(self.client.base_url().resolve(), &self.path)?;
        if !self.query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, values) in &self.query {
                for value in values {
                    pairs.append_pair(key, value);
                }
            }
        }
        Ok(url)
    }

    async fn build_wire_request(&self, url: &Url) -> Result<reqwest::Request> {
        let mut request = reqwest::Request::new(self.method.into(), url.clone());
        let mut headers = self.headers.merged_over(self.client.headers());

        // Explicit `Cookie` headers and the cookie list share one header line.
        let mut cookie_lines: Vec<String> = headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .map(str::to_owned)
            .collect();
        cookie_lines.extend(cookie_header(
            self.client.cookies().iter().chain(&self.cookies),
        ));
        if !cookie_lines.is_empty() {
            let cookie = cookie_lines.join("; ");
            let value = HeaderValue::from_str(&cookie)
                .map_err(|_| Error::RequestBuild(format!("invalid cookie header {cookie:?}")))?;
            headers.insert(COOKIE, value);
        }

        *request.headers_mut() = headers;
        *request.body_mut() = self.body.to_wire().await;
        if let Some(remaining) = self.context.remaining() {
            *request.timeout_mut() = Some(remaining);
        }
        Ok(request)
    }

    /// One round-trip through the transport, raced against the context.
    async fn execute_once(&self, url: &Url, attempt: usize) -> Result<Response> {
        if let Some(err) = self.context.err() {
            return Err(err.into());
        }
        let wire = self.build_wire_request(url).await?;
        let sent = SentRequest::new(self.method, url.clone(), wire.headers().clone());

        #[cfg(feature = "tracing")]
        tracing::debug!(method = %self.method, url = %url, attempt, "sending request");

        let result = tokio::select! {
            result = self.client.transport().send(wire) => result
                .map_err(|err| self.context.err().unwrap_or(TransportError::Http(err))),
            err = self.context.done() => Err(err),
        };
        let response = Response::from_wire(result?, sent, attempt);

        for hook in self.client.after_response_hooks() {
            hook(self, &response);
        }
        Ok(response)
    }

    async fn execute_with_retry(&self, url: &Url, policy: &RetryPolicy) -> Result<Response> {
        let max_attempts = policy.max_attempts();
        let mut failures = Vec::with_capacity(max_attempts);
        let mut last_response: Option<Response> = None;

        for index in 0..max_attempts {
            let attempt = index + 1;
            if let Some(err) = self.context.err() {
                failures.push(AttemptFailure {
                    attempt,
                    cause: AttemptCause::Transport(err),
                    elapsed: Duration::ZERO,
                });
                break;
            }

            let started = Instant::now();
            match self.execute_once(url, attempt).await {
                Ok(response) if !policy.should_retry(&response) => {
                    if let Some(previous) = last_response.take() {
                        previous.close().await;
                    }
                    return Ok(response);
                }
                Ok(response) => {
                    let status = response.status();
                    #[cfg(feature = "tracing")]
                    tracing::debug!(attempt, status = status.code(), "retry predicate matched response");
                    failures.push(AttemptFailure {
                        attempt,
                        cause: AttemptCause::Status {
                            code: status.code(),
                            text: status.text().to_owned(),
                        },
                        elapsed: started.elapsed(),
                    });
                    if let Some(previous) = last_response.replace(response) {
                        previous.close().await;
                    }
                }
                Err(Error::Transport(err)) => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(attempt, error = %err, "attempt failed at transport");
                    failures.push(AttemptFailure {
                        attempt,
                        cause: AttemptCause::Transport(err),
                        elapsed: started.elapsed(),
                    });
                    if self.context.err().is_some() {
                        break;
                    }
                }
                Err(err) => return Err(err),
            }

            if attempt == max_attempts {
                break;
            }
            let delay = policy.backoff(index);

            #[cfg(feature = "tracing")]
            tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "retrying request");

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                err = self.context.done() => {
                    failures.push(AttemptFailure {
                        attempt: attempt + 1,
                        cause: AttemptCause::Transport(err),
                        elapsed: Duration::ZERO,
                    });
                    break;
                }
            }
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(attempts = failures.len(), "retries exhausted");

        Err(Error::RetryExhausted {
            attempts: AttemptFailures(failures),
            last_response: last_response.map(Box::new),
        })
    }
}
