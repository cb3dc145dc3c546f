//! Cross-origin resource sharing.
//!
//! A router runs in one of three modes, picked with
//! [`Router::with_default_cors`](crate::Router::with_default_cors) or
//! [`Router::with_custom_cors`](crate::Router::with_custom_cors); the last
//! call wins. When a mode is on, every request that gets past middleware
//! carries the headers below, and an `OPTIONS` request is answered as a
//! preflight (`200`, empty body) without running the handler.
//!
//! | mode | `Allow-Origin` | `Allow-Methods` | `Allow-Headers` |
//! |---|---|---|---|
//! | default | `*` | `GET, POST, PUT, DELETE, OPTIONS` | `Content-Type, Authorization` |
//! | custom | `*` | methods joined by a space | headers joined by a space |
//!
//! In custom mode an empty list leaves its header unset.

use http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    HeaderName,
};
use http::{HeaderMap, HeaderValue};
use tracing::warn;

const ANY_ORIGIN: &str = "*";
const DEFAULT_METHODS: &str = "GET, POST, PUT, DELETE, OPTIONS";
const DEFAULT_HEADERS: &str = "Content-Type, Authorization";

/// The cross-origin policy of a router.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum Cors {
    #[default]
    Off,
    Default,
    Custom { headers: Vec<String>, methods: Vec<String> },
}

impl Cors {
    pub fn custom<H, M>(headers: H, methods: M) -> Self
    where
        H: IntoIterator,
        H::Item: Into<String>,
        M: IntoIterator,
        M::Item: Into<String>,
    {
        Self::Custom {
            headers: headers.into_iter().map(Into::into).collect(),
            methods: methods.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, Self::Off)
    }

    /// Writes this policy's headers into `headers`.
    pub(crate) fn apply(&self, headers: &mut HeaderMap) {
        match self {
            Self::Off => {}
            Self::Default => {
                headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static(ANY_ORIGIN));
                headers.insert(ACCESS_CONTROL_ALLOW_METHODS, HeaderValue::from_static(DEFAULT_METHODS));
                headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static(DEFAULT_HEADERS));
            }
            Self::Custom { headers: allowed_headers, methods } => {
                headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static(ANY_ORIGIN));
                set_joined(headers, ACCESS_CONTROL_ALLOW_HEADERS, allowed_headers);
                set_joined(headers, ACCESS_CONTROL_ALLOW_METHODS, methods);
            }
        }
    }
}

fn set_joined(headers: &mut HeaderMap, name: HeaderName, values: &[String]) {
    if values.is_empty() {
        return;
    }
    match HeaderValue::from_str(&values.join(" ")) {
        Ok(value) => {
            headers.insert(name, value);
        }
        Err(_) => warn!(header = %name, "cors value is not a valid header value; skipped"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn off_writes_nothing() {
        let mut headers = HeaderMap::new();
        Cors::Off.apply(&mut headers);
        assert!(headers.is_empty());
        assert!(!Cors::Off.is_enabled());
    }

    #[test]
    fn default_sets_the_fixed_lists() {
        let mut headers = HeaderMap::new();
        Cors::Default.apply(&mut headers);
        assert_eq!(headers[ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(headers[ACCESS_CONTROL_ALLOW_METHODS], "GET, POST, PUT, DELETE, OPTIONS");
        assert_eq!(headers[ACCESS_CONTROL_ALLOW_HEADERS], "Content-Type, Authorization");
    }

    #[test]
    fn custom_joins_with_single_spaces_in_order() {
        let mut headers = HeaderMap::new();
        Cors::custom(["Content-Type", "Authorization"], ["GET"]).apply(&mut headers);
        assert_eq!(headers[ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(headers[ACCESS_CONTROL_ALLOW_METHODS], "GET");
        assert_eq!(headers[ACCESS_CONTROL_ALLOW_HEADERS], "Content-Type Authorization");
    }

    #[test]
    fn custom_skips_empty_lists() {
        let mut headers = HeaderMap::new();
        Cors::custom(Vec::<String>::new(), ["PUT", "PATCH"]).apply(&mut headers);
        assert!(headers.get(ACCESS_CONTROL_ALLOW_HEADERS).is_none());
        assert_eq!(headers[ACCESS_CONTROL_ALLOW_METHODS], "PUT PATCH");
    }
}
