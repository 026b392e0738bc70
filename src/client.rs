use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use reqwest::header;

use crate::error::BoxError;
use crate::validation::{ValidationError, ValidationErrors};
use crate::{
    BaseUrl, ClientOptions, Cookie, Headers, Method, Request, Response, RetryPolicy,
};

/// Sends one wire request and returns the raw response.
///
/// Implemented for [`reqwest::Client`]; swap it out with
/// [`ClientBuilder::transport`] to route requests elsewhere.
pub trait Transport: Send + Sync {
    fn send(&self, request: reqwest::Request)
        -> BoxFuture<'_, Result<reqwest::Response, reqwest::Error>>;
}

impl Transport for reqwest::Client {
    fn send(
        &self,
        request: reqwest::Request,
    ) -> BoxFuture<'_, Result<reqwest::Response, reqwest::Error>> {
        Box::pin(self.execute(request))
    }
}

/// Runs before a request is sent; an error aborts the send.
pub type BeforeRequestHook = Arc<dyn Fn(&Request) -> Result<(), BoxError> + Send + Sync>;
/// Observes every response received, including ones that will be retried.
pub type AfterResponseHook = Arc<dyn Fn(&Request, &Response) + Send + Sync>;

/// Collects client-wide configuration.
///
/// Setters never fail; problems are recorded and reported by the first
/// [`Request::send`].
pub struct ClientBuilder {
    transport: Option<Arc<dyn Transport>>,
    options: ClientOptions,
    headers: Headers,
    cookies: Vec<Cookie>,
    base_url: BaseUrl,
    retry: Option<RetryPolicy>,
    before_request: Vec<BeforeRequestHook>,
    after_response: Vec<AfterResponseHook>,
    errors: ValidationErrors,
}

impl ClientBuilder {
    /// Starts from default options, no base URL and no retry policy.
    pub fn new() -> Self {
        Self {
            transport: None,
            options: ClientOptions::default(),
            headers: Headers::new(),
            cookies: Vec::new(),
            base_url: BaseUrl::default(),
            retry: None,
            before_request: Vec::new(),
            after_response: Vec::new(),
            errors: ValidationErrors::new(),
        }
    }

    /// Creates a builder from environment variables.
    ///
    /// Reads:
    /// - `REQWIRE_BASE_URLS`: one URL, or several comma-separated URLs for
    ///   round-robin balancing
    /// - `REQWIRE_TIMEOUT_MS`: optional request timeout
    pub fn from_env() -> std::result::Result<Self, String> {
        let raw = std::env::var("REQWIRE_BASE_URLS")
            .map_err(|_| "missing REQWIRE_BASE_URLS environment variable".to_owned())?;
        let urls: Vec<&str> = raw
            .split(',')
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .collect();
        if urls.is_empty() {
            return Err("REQWIRE_BASE_URLS is set but empty".to_owned());
        }

        let mut builder = if urls.len() == 1 {
            Self::new().base_url(urls[0])
        } else {
            Self::new().base_urls(urls)
        };

        if let Ok(timeout) = std::env::var("REQWIRE_TIMEOUT_MS") {
            let timeout_ms = timeout
                .trim()
                .parse()
                .map_err(|_| format!("REQWIRE_TIMEOUT_MS is not a number: {timeout:?}"))?;
            builder.options.timeout_ms = timeout_ms;
        }
        Ok(builder)
    }

    /// Sends every request to one base URL.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = BaseUrl::fixed(url);
        self
    }

    /// Balances requests across `urls` in round-robin order.
    pub fn base_urls<I, S>(mut self, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        match BaseUrl::round_robin(urls) {
            Ok(base_url) => self.base_url = base_url,
            Err(err) => self.errors.push(ValidationError::Other(err.to_string())),
        }
        self
    }

    /// Replaces the reqwest transport, e.g. with a test double.
    pub fn transport<T: Transport + 'static>(mut self, transport: T) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Applies timeouts, user agent and proxy for the default transport.
    pub fn options(mut self, options: ClientOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets a header on every request, replacing earlier values.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        if let Err(err) = self.headers.set(name, value) {
            self.errors.push(err);
        }
        self
    }

    /// Adds a header value on every request.
    pub fn add_header(mut self, name: &str, value: &str) -> Self {
        if let Err(err) = self.headers.add(name, value) {
            self.errors.push(err);
        }
        self
    }

    /// Sets several client headers, each replacing earlier values of its name.
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

    /// Sets `Authorization: Bearer <token>`.
    ///
    /// If the token already carries the `Bearer ` prefix it is kept as is.
    pub fn bearer_auth(self, token: impl AsRef<str>) -> Self {
        let authorization = normalize_bearer_authorization(token.as_ref());
        self.header(header::AUTHORIZATION.as_str(), &authorization)
    }

    /// Adds a cookie sent with every request.
    pub fn cookie(mut self, cookie: Cookie) -> Self {
        self.cookies.push(cookie);
        self
    }

    /// Adds several client cookies in order.
    pub fn cookies(mut self, cookies: impl IntoIterator<Item = Cookie>) -> Self {
        self.cookies.extend(cookies);
        self
    }

    /// Retry policy for requests that do not set their own.
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Registers a hook run once per [`Request::send`] before any network
    /// activity. An error aborts the send with [`Error::Hook`](crate::Error::Hook).
    ///
    /// # Example
    ///
    /// ```no_run
    /// use reqwire::ClientBuilder;
    ///
    /// let client = ClientBuilder::new()
    ///     .base_url("https://api.example.com")
    ///     .before_request(|request| {
    ///         if request.header_map().contains("x-api-key") {
    ///             Ok(())
    ///         } else {
    ///             Err("missing x-api-key".into())
    ///         }
    ///     })
    ///     .build();
    /// ```
    pub fn before_request<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Request) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.before_request.push(Arc::new(hook));
        self
    }

    /// Registers an observer called after every attempt that produced a
    /// response, including attempts that will be retried.
    pub fn after_response<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Request, &Response) + Send + Sync + 'static,
    {
        self.after_response.push(Arc::new(hook));
        self
    }

    /// Freezes the configuration into a [`Client`].
    ///
    /// Never fails: invalid headers, base URLs and proxy settings are kept and
    /// reported by the first [`Request::send`].
    ///
    /// # Example
    ///
    /// ```no_run
    /// use std::time::Duration;
    /// use reqwire::{ClientBuilder, RetryPolicy};
    ///
    /// let client = ClientBuilder::new()
    ///     .base_urls(["http://10.0.0.1:8080", "http://10.0.0.2:8080"])
    ///     .bearer_auth("my-token")
    ///     .retry(RetryPolicy::exponential_backoff(Duration::from_millis(100), 3, 2.0))
    ///     .build();
    /// ```
    pub fn build(self) -> Client {
        let ClientBuilder {
            transport,
            options,
            headers,
            cookies,
            base_url,
            retry,
            before_request,
            after_response,
            mut errors,
        } = self;

        if let Some(proxy) = &options.proxy {
            if let Err(err) = url::Url::parse(proxy) {
                errors.push(ValidationError::InvalidProxy {
                    url: proxy.clone(),
                    message: err.to_string(),
                });
            }
        }
        let transport = match transport {
            Some(transport) => transport,
            None => default_transport(&options, &mut errors),
        };

        Client {
            inner: Arc::new(ClientInner {
                transport,
                headers,
                cookies,
                base_url,
                retry,
                before_request,
                after_response,
                errors,
            }),
        }
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn default_transport(options: &ClientOptions, errors: &mut ValidationErrors) -> Arc<dyn Transport> {
    let mut builder = reqwest::Client::builder()
        .timeout(Duration::from_millis(options.timeout_ms))
        .connect_timeout(Duration::from_millis(options.connect_timeout_ms))
        .user_agent(&options.user_agent);

    if let Some(proxy) = &options.proxy {
        match reqwest::Proxy::all(proxy.as_str()) {
            Ok(proxy) => builder = builder.proxy(proxy),
            // Unparsable urls were already recorded by the caller.
            Err(err) if url::Url::parse(proxy).is_ok() => {
                errors.push(ValidationError::InvalidProxy {
                    url: proxy.clone(),
                    message: err.to_string(),
                });
            }
            Err(_) => {}
        }
    }

    match builder.build() {
        Ok(client) => Arc::new(client),
        Err(err) => {
            errors.push(ValidationError::Other(format!(
                "failed to build http client: {err}"
            )));
            Arc::new(reqwest::Client::new())
        }
    }
}

/// Shared, immutable client configuration.
///
/// Cloning is cheap; all clones share one transport and one round-robin cursor.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    transport: Arc<dyn Transport>,
    headers: Headers,
    cookies: Vec<Cookie>,
    base_url: BaseUrl,
    retry: Option<RetryPolicy>,
    before_request: Vec<BeforeRequestHook>,
    after_response: Vec<AfterResponseHook>,
    errors: ValidationErrors,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let header_names: Vec<&str> = self
            .inner
            .headers
            .as_map()
            .keys()
            .map(|name| name.as_str())
            .collect();
        f.debug_struct("Client")
            .field("base_url", &self.inner.base_url)
            .field("headers", &header_names)
            .field("cookies", &self.inner.cookies.len())
            .field("retry", &self.inner.retry)
            .field("errors", &self.inner.errors)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// A client with default options targeting a single base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        ClientBuilder::new().base_url(base_url).build()
    }

    /// Shorthand for [`ClientBuilder::new`].
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Starts a request for `path`, resolved against the base URL on send.
    ///
    /// An absolute `http(s)://` path bypasses the base URL.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use reqwire::{Client, Method};
    ///
    /// # async fn run() -> reqwire::Result<()> {
    /// let client = Client::new("https://api.example.com");
    /// let response = client
    ///     .request(Method::Get, "/users")
    ///     .query("page", "2")
    ///     .send()
    ///     .await?;
    /// println!("{}", response.status());
    /// # Ok(())
    /// # }
    /// ```
    pub fn request(&self, method: Method, path: impl Into<String>) -> Request {
        Request::new(self.clone(), method, path.into())
    }

    /// `GET path`.
    pub fn get(&self, path: impl Into<String>) -> Request {
        self.request(Method::Get, path)
    }

    /// `HEAD path`.
    pub fn head(&self, path: impl Into<String>) -> Request {
        self.request(Method::Head, path)
    }

    /// `POST path`.
    pub fn post(&self, path: impl Into<String>) -> Request {
        self.request(Method::Post, path)
    }

    /// `PUT path`.
    pub fn put(&self, path: impl Into<String>) -> Request {
        self.request(Method::Put, path)
    }

    /// `PATCH path`.
    pub fn patch(&self, path: impl Into<String>) -> Request {
        self.request(Method::Patch, path)
    }

    /// `DELETE path`.
    pub fn delete(&self, path: impl Into<String>) -> Request {
        self.request(Method::Delete, path)
    }

    /// `CONNECT path`.
    pub fn connect(&self, path: impl Into<String>) -> Request {
        self.request(Method::Connect, path)
    }

    /// `OPTIONS path`.
    pub fn options(&self, path: impl Into<String>) -> Request {
        self.request(Method::Options, path)
    }

    /// `TRACE path`.
    pub fn trace(&self, path: impl Into<String>) -> Request {
        self.request(Method::Trace, path)
    }

    /// The base URL resolver shared by every clone of this client.
    pub fn base_url(&self) -> &BaseUrl {
        &self.inner.base_url
    }

    pub fn headers(&self) -> &Headers {
        &self.inner.headers
    }

    pub fn cookies(&self) -> &[Cookie] {
        &self.inner.cookies
    }

    /// The client-wide retry policy, if any.
    pub fn retry_policy(&self) -> Option<&RetryPolicy> {
        self.inner.retry.as_ref()
    }

    /// Validation errors recorded while the client was built.
    pub fn errors(&self) -> &ValidationErrors {
        &self.inner.errors
    }

    pub(crate) fn transport(&self) -> &dyn Transport {
        self.inner.transport.as_ref()
    }

    pub(crate) fn before_request_hooks(&self) -> &[BeforeRequestHook] {
        &self.inner.before_request
    }

    pub(crate) fn after_response_hooks(&self) -> &[AfterResponseHook] {
        &self.inner.after_response
    }
}

fn normalize_bearer_authorization(token: &str) -> String {
    let trimmed = token.trim();
    let prefix = trimmed.get(..7);
    if prefix.is_some_and(|value| value.eq_ignore_ascii_case("bearer ")) {
        trimmed.to_owned()
    } else {
        format!("Bearer {trimmed}")
    }
}

#[cfg(test)]
mod tests {
    use super::{normalize_bearer_authorization, Client, ClientBuilder};
    use crate::validation::ValidationError;
    use crate::{ClientOptions, Method};

    #[test]
    fn normalize_bearer_adds_prefix_when_missing() {
        assert_eq!(
            normalize_bearer_authorization("abc123"),
            "Bearer abc123".to_owned()
        );
    }

    #[test]
    fn normalize_bearer_keeps_existing_prefix() {
        assert_eq!(
            normalize_bearer_authorization("bEaReR abc123"),
            "bEaReR abc123".to_owned()
        );
    }

    #[test]
    fn debug_redacts_header_values() {
        let client = ClientBuilder::new()
            .base_url("http://db.local")
            .bearer_auth("secret-token")
            .build();
        let debug = format!("{client:?}");
        assert!(debug.contains("authorization"));
        assert!(!debug.contains("secret-token"));
    }

    #[test]
    fn invalid_settings_are_deferred() {
        let client = ClientBuilder::new()
            .base_urls(Vec::<String>::new())
            .header("bad header", "x")
            .options(ClientOptions {
                proxy: Some("::not a proxy::".to_owned()),
                ..ClientOptions::default()
            })
            .build();

        let errors: Vec<&ValidationError> = client.errors().iter().collect();
        assert_eq!(errors.len(), 3);
        assert!(matches!(errors[0], ValidationError::Other(_)));
        assert!(matches!(errors[1], ValidationError::InvalidHeaderName { .. }));
        assert!(matches!(errors[2], ValidationError::InvalidProxy { .. }));
    }

    #[test]
    fn method_shortcuts_set_method() {
        let client = Client::new("http://api.local");
        assert_eq!(client.get("/").method(), Method::Get);
        assert_eq!(client.head("/").method(), Method::Head);
        assert_eq!(client.post("/").method(), Method::Post);
        assert_eq!(client.put("/").method(), Method::Put);
        assert_eq!(client.patch("/").method(), Method::Patch);
        assert_eq!(client.delete("/").method(), Method::Delete);
        assert_eq!(client.connect("/").method(), Method::Connect);
        assert_eq!(client.options("/").method(), Method::Options);
        assert_eq!(client.trace("/").method(), Method::Trace);
    }

    #[test]
    fn clones_share_round_robin_cursor() {
        let client = ClientBuilder::new()
            .base_urls(["http://a", "http://b"])
            .build();
        let clone = client.clone();
        assert_eq!(client.base_url().resolve(), "http://a");
        assert_eq!(clone.base_url().resolve(), "http://b");
    }
}
