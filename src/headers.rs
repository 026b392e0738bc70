use std::collections::HashSet;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use crate::validation::ValidationError;

/// Header multimap that remembers which keys were *set* rather than *added*.
///
/// When request headers are layered over client headers, keys the request
/// set replace the client values, keys it added are appended after them.
#[derive(Clone, Debug, Default)]
pub struct Headers {
    map: HeaderMap,
    replaced: HashSet<HeaderName>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces every value of `name` with `value`.
    pub fn set(&mut self, name: &str, value: &str) -> Result<(), ValidationError> {
        let (name, value) = parse_header(name, value)?;
        self.replaced.insert(name.clone());
        self.map.insert(name, value);
        Ok(())
    }

    /// Appends `value` to the values of `name`.
    pub fn add(&mut self, name: &str, value: &str) -> Result<(), ValidationError> {
        let (name, value) = parse_header(name, value)?;
        self.map.append(name, value);
        Ok(())
    }

    pub fn remove(&mut self, name: &str) {
        if let Ok(name) = HeaderName::from_bytes(name.as_bytes()) {
            self.map.remove(&name);
            self.replaced.remove(&name);
        }
    }

    /// First value of `name`, if it is valid UTF-8.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.map.get(name).and_then(|value| value.to_str().ok())
    }

    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.map
            .get_all(name)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }

    /// Number of values, counting repeated keys separately.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn as_map(&self) -> &HeaderMap {
        &self.map
    }

    /// Layers `self` over `base`.
    pub(crate) fn merged_over(&self, base: &Headers) -> HeaderMap {
        let mut merged = base.map.clone();
        for name in self.map.keys() {
            if self.replaced.contains(name) {
                merged.remove(name);
            }
            for value in self.map.get_all(name) {
                merged.append(name.clone(), value.clone());
            }
        }
        merged
    }
}

fn parse_header(name: &str, value: &str) -> Result<(HeaderName, HeaderValue), ValidationError> {
    let header_name =
        HeaderName::from_bytes(name.as_bytes()).map_err(|_| ValidationError::InvalidHeaderName {
            name: name.to_owned(),
        })?;
    let header_value =
        HeaderValue::from_str(value).map_err(|_| ValidationError::InvalidHeaderValue {
            name: name.to_owned(),
        })?;
    Ok((header_name, header_value))
}

/// An HTTP cookie, either configured for sending or parsed from `Set-Cookie`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cookie {
    name: String,
    value: String,
    path: Option<String>,
    domain: Option<String>,
    max_age: Option<Duration>,
    secure: bool,
    http_only: bool,
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            path: None,
            domain: None,
            max_age: None,
            secure: false,
            http_only: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub fn domain(&self) -> Option<&str> {
        self.domain.as_deref()
    }

    pub fn max_age(&self) -> Option<Duration> {
        self.max_age
    }

    pub fn secure(&self) -> bool {
        self.secure
    }

    pub fn http_only(&self) -> bool {
        self.http_only
    }
}

impl<'a> From<reqwest::cookie::Cookie<'a>> for Cookie {
    fn from(cookie: reqwest::cookie::Cookie<'a>) -> Self {
        Self {
            name: cookie.name().to_owned(),
            value: cookie.value().to_owned(),
            path: cookie.path().map(str::to_owned),
            domain: cookie.domain().map(str::to_owned),
            max_age: cookie.max_age(),
            secure: cookie.secure(),
            http_only: cookie.http_only(),
        }
    }
}

/// Renders cookies as one `Cookie` header value, in iteration order.
pub(crate) fn cookie_header<'a>(cookies: impl IntoIterator<Item = &'a Cookie>) -> Option<String> {
    let pairs: Vec<String> = cookies
        .into_iter()
        .map(|cookie| format!("{}={}", cookie.name, cookie.value))
        .collect();
    if pairs.is_empty() {
        None
    } else {
        Some(pairs.join("; "))
    }
}
