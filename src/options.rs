/// Configures the default reqwest transport.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ClientOptions {
    /// Total per-request timeout in milliseconds.
    pub timeout_ms: u64,
    /// TCP connect timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// `User-Agent` sent with every request.
    pub user_agent: String,
    /// Proxy URL applied to all schemes.
    pub proxy: Option<String>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            connect_timeout_ms: 10_000,
            user_agent: format!("reqwire/{}", env!("CARGO_PKG_VERSION")),
            proxy: None,
        }
    }
}
