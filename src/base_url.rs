use std::sync::atomic::{AtomicUsize, Ordering};

use url::Url;

use crate::{Error, Result};

/// Origin a client sends its requests to.
#[derive(Debug)]
pub enum BaseUrl {
    /// Every request goes to the same URL.
    Fixed(String),
    /// Requests rotate through `urls` in registration order.
    RoundRobin { urls: Vec<String>, cursor: AtomicUsize },
}

impl BaseUrl {
    pub fn fixed(url: impl Into<String>) -> Self {
        BaseUrl::Fixed(url.into())
    }

    /// Builds a load-balanced resolver. Fails when `urls` is empty.
    pub fn round_robin<I, S>(urls: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let urls: Vec<String> = urls.into_iter().map(Into::into).collect();
        if urls.is_empty() {
            return Err(Error::InvalidConfig(
                "round-robin base url needs at least one url".to_owned(),
            ));
        }
        Ok(BaseUrl::RoundRobin {
            urls,
            cursor: AtomicUsize::new(0),
        })
    }

    /// Returns the URL for the next request.
    pub fn resolve(&self) -> &str {
        self.next().1
    }

    /// Returns the cursor snapshot used for this call along with the URL.
    pub(crate) fn next(&self) -> (usize, &str) {
        match self {
            BaseUrl::Fixed(url) => (0, url),
            BaseUrl::RoundRobin { urls, cursor } => {
                let snapshot = cursor.fetch_add(1, Ordering::Relaxed);
                (snapshot, &urls[snapshot % urls.len()])
            }
        }
    }

    pub fn urls(&self) -> &[String] {
        match self {
            BaseUrl::Fixed(url) => std::slice::from_ref(url),
            BaseUrl::RoundRobin { urls, .. } => urls,
        }
    }
}

impl Default for BaseUrl {
    fn default() -> Self {
        BaseUrl::Fixed(String::new())
    }
}

/// Joins a base URL with a request path.
///
/// An absolute `http(s)://` path or an empty base uses the path alone; an
/// empty path uses the base alone.
pub(crate) fn join(base: &str, path: &str) -> Result<Url> {
    let raw = if base.is_empty() || path.starts_with("http://") || path.starts_with("https://") {
        path.to_owned()
    } else if path.is_empty() {
        base.to_owned()
    } else {
        format!(
            "{}/{}",
            base.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    };
    Url::parse(&raw).map_err(|source| Error::Url { url: raw, source })
}
