//! Deferred configuration errors.
//!
//! Builders never fail while being configured. Anything that goes wrong is
//! recorded here and reported as one [`crate::Error::Configuration`] when the
//! request is sent.

use std::fmt;

/// A single configuration problem.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("invalid proxy url {url:?}: {message}")]
    InvalidProxy { url: String, message: String },
    #[error("invalid query string {query:?}: {message}")]
    InvalidQuery { query: String, message: String },
    #[error("invalid header name {name:?}")]
    InvalidHeaderName { name: String },
    #[error("invalid value for header {name:?}")]
    InvalidHeaderValue { name: String },
    #[error("failed to encode {format} body: {message}")]
    BodyEncode {
        format: &'static str,
        message: String,
    },
    #[error("{0}")]
    Other(String),
}

/// Append-only, ordered list of [`ValidationError`]s.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ValidationErrors(Vec<ValidationError>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, error: ValidationError) {
        self.0.push(error);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ValidationError> {
        self.0.iter()
    }

    /// Returns a new list holding `self` followed by `other`.
    pub fn joined(&self, other: &ValidationErrors) -> ValidationErrors {
        let mut all = self.0.clone();
        all.extend(other.0.iter().cloned());
        ValidationErrors(all)
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, error) in self.0.iter().enumerate() {
            if index > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{error}")?;
        }
        Ok(())
    }
}

impl<'a> IntoIterator for &'a ValidationErrors {
    type Item = &'a ValidationError;
    type IntoIter = std::slice::Iter<'a, ValidationError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Parses a raw `a=1&b=2` query string into decoded pairs.
///
/// Rejects `;` separators and malformed percent escapes, which
/// `form_urlencoded` would otherwise accept silently.
pub(crate) fn parse_query_string(raw: &str) -> Result<Vec<(String, String)>, ValidationError> {
    let raw = raw.strip_prefix('?').unwrap_or(raw);
    let invalid = |message: String| ValidationError::InvalidQuery {
        query: raw.to_owned(),
        message,
    };

    if raw.contains(';') {
        return Err(invalid("invalid semicolon separator".to_owned()));
    }
    for segment in raw.split('&').filter(|segment| !segment.is_empty()) {
        check_percent_escapes(segment).map_err(invalid)?;
    }

    Ok(url::form_urlencoded::parse(raw.as_bytes())
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect())
}

fn check_percent_escapes(segment: &str) -> Result<(), String> {
    let bytes = segment.as_bytes();
    let mut index = 0;
    while index < bytes.len() {
        if bytes[index] == b'%' {
            let escape = bytes.get(index + 1..index + 3);
            match escape {
                Some([hi, lo]) if hi.is_ascii_hexdigit() && lo.is_ascii_hexdigit() => index += 3,
                _ => {
                    let end = (index + 3).min(bytes.len());
                    return Err(format!(
                        "invalid escape {:?}",
                        String::from_utf8_lossy(&bytes[index..end])
                    ));
                }
            }
        } else {
            index += 1;
        }
    }
    Ok(())
}
