//! The hypermedia request envelope sent from the WebView to handlers.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// An HTTP-shaped request from the WebView frontend.
///
/// The `url` carries the path plus an optional query string. Headers are
/// stored with their original casing; lookup is case-insensitive.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Request {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default, with = "crate::encoding::base64_bytes")]
    pub body: Vec<u8>,
}

impl Request {
    /// Create a new request. The method is normalized to uppercase.
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into().to_uppercase(),
            url: url.into(),
            headers: HashMap::new(),
            body: Vec::new(),
        }
    }

    /// Set a request header, replacing any value stored under the same key
    /// regardless of case.
    pub fn set_header(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        self.headers.retain(|k, _| !k.eq_ignore_ascii_case(&key));
        self.headers.insert(key, value.into());
    }

    /// Builder-style variant of [`set_header`](Self::set_header).
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_header(key, value);
        self
    }

    /// Builder-style body setter.
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Look up a header value, case-insensitively.
    pub fn header(&self, key: &str) -> Option<&str> {
        if let Some(v) = self.headers.get(key) {
            return Some(v.as_str());
        }
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// The path portion of the URL (everything before the first `?`).
    pub fn path(&self) -> &str {
        match self.url.split_once('?') {
            Some((path, _)) => path,
            None => &self.url,
        }
    }

    /// The raw query string (empty when the URL has none).
    pub fn query(&self) -> &str {
        match self.url.split_once('?') {
            Some((_, query)) => query,
            None => "",
        }
    }

    /// A single decoded query parameter, or `None` when absent.
    pub fn query_value(&self, name: &str) -> Option<String> {
        url::form_urlencoded::parse(self.query().as_bytes())
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    }

    /// A single decoded field from a urlencoded form body.
    pub fn form_value(&self, name: &str) -> Option<String> {
        url::form_urlencoded::parse(&self.body)
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    }

    /// The body interpreted as UTF-8 (lossy).
    pub fn body_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// Whether this request was issued by HTMX (`HX-Request: true`).
    pub fn is_htmx(&self) -> bool {
        self.header("HX-Request") == Some("true")
    }

    /// Whether the client asked for a server-sent event stream.
    pub fn is_event_stream(&self) -> bool {
        self.header("Accept") == Some("text/event-stream")
    }
}
