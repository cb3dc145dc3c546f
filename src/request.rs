//! Inbound request state.
//!
//! The same [`Request`] backs both context variants: middleware only ever
//! sees this type, which is what lets one chain guard HTTP routes and
//! WebSocket routes alike.

use std::collections::HashMap;
use std::sync::OnceLock;

use bytes::Bytes;
use http::{HeaderMap, Uri};
use serde::de::DeserializeOwned;

use crate::error::{Error, Result};

/// An inbound request with its body already buffered.
pub struct Request {
    method: http::Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
    params: HashMap<String, String>,
    query: OnceLock<HashMap<String, String>>,
}

impl Request {
    pub(crate) fn new(
        parts: http::request::Parts,
        body: Bytes,
        params: HashMap<String, String>,
    ) -> Self {
        Self {
            method: parts.method,
            uri: parts.uri,
            headers: parts.headers,
            body,
            params,
            query: OnceLock::new(),
        }
    }

    pub fn method(&self) -> &http::Method { &self.method }
    pub fn uri(&self) -> &Uri { &self.uri }
    pub fn path(&self) -> &str { self.uri.path() }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn body(&self) -> &Bytes { &self.body }

    /// Mutable access to the request headers. Middleware uses this to hand
    /// values to whatever runs after it.
    pub fn headers_mut(&mut self) -> &mut HeaderMap { &mut self.headers }

    /// Case-insensitive header lookup. Returns the first value when the
    /// header repeats, and `None` when it is not valid visible ASCII.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// The `Host` header, falling back to the URI authority.
    pub fn host(&self) -> &str {
        self.header("host")
            .or_else(|| self.uri.authority().map(|a| a.as_str()))
            .unwrap_or("")
    }

    /// Returns a query-string parameter.
    ///
    /// The query string is parsed on the first call and cached for the rest
    /// of the request. When a key repeats, the first value wins.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.query
            .get_or_init(|| parse_query(self.uri.query().unwrap_or("")))
            .get(key)
            .map(String::as_str)
    }

    /// Returns a named path capture.
    ///
    /// For a route `/users/{id}`, `req.path_value("id")` on `/users/42`
    /// returns `Some("42")`.
    pub fn path_value(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Decodes the body as JSON.
    ///
    /// An empty body is [`Error::InvalidData`]; a malformed one surfaces the
    /// `serde_json` error unchanged.
    pub fn parse_body<T: DeserializeOwned>(&self) -> Result<T> {
        if self.body.is_empty() {
            return Err(Error::InvalidData);
        }
        Ok(serde_json::from_slice(&self.body)?)
    }
}

fn parse_query(query: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    for (k, v) in url::form_urlencoded::parse(query.as_bytes()) {
        params.entry(k.into_owned()).or_insert_with(|| v.into_owned());
    }
    params
}
