//! The hypermedia response envelope returned to the WebView.
//!
//! Bodies are HTML fragments for the client to swap in, or JSON for
//! capability-style endpoints.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// An HTTP-shaped response for the WebView frontend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub status: u16,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default, with = "crate::encoding::base64_bytes")]
    pub body: Vec<u8>,
}

impl Default for Response {
    fn default() -> Self {
        Self::new(200)
    }
}

impl Response {
    /// Create an empty response with the given status code.
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: Vec::new(),
        }
    }

    /// Set a response header, replacing any value stored under the same key
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

    /// The body interpreted as UTF-8 (lossy).
    pub fn body_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// An HTML fragment response.
    pub fn html(status: u16, html: impl Into<String>) -> Self {
        let mut r = Self::new(status);
        r.body = html.into().into_bytes();
        r.set_header("Content-Type", "text/html; charset=utf-8");
        r
    }

    /// A JSON response. Serialization failures degrade to a 500.
    pub fn json<T: Serialize>(status: u16, data: &T) -> Self {
        match serde_json::to_vec(data) {
            Ok(body) => {
                let mut r = Self::new(status);
                r.body = body;
                r.set_header("Content-Type", "application/json");
                r
            }
            Err(e) => Self::error(500, &format!("JSON encoding error: {e}")),
        }
    }

    /// An error fragment the client can swap into an alert region.
    pub fn error(status: u16, message: &str) -> Self {
        Self::html(
            status,
            format!(r#"<div class="error" role="alert">{message}</div>"#),
        )
    }

    /// A redirect. HTMX clients get `HX-Redirect` with a 200 so the fragment
    /// machinery performs the navigation; everyone else gets a 302.
    pub fn redirect(url: &str, is_htmx: bool) -> Self {
        if is_htmx {
            Self::new(200).with_header("HX-Redirect", url)
        } else {
            Self::new(302).with_header("Location", url)
        }
    }

    /// An HTML response that also triggers a client-side event.
    pub fn trigger(status: u16, html: impl Into<String>, event: &str) -> Self {
        Self::html(status, html).with_header("HX-Trigger", event)
    }

    /// An HTML response that redirects the swap to a different target element.
    pub fn retarget(status: u16, html: impl Into<String>, target: &str) -> Self {
        Self::html(status, html).with_header("HX-Retarget", target)
    }

    /// An HTML response that overrides the swap strategy.
    pub fn reswap(status: u16, html: impl Into<String>, swap: &str) -> Self {
        Self::html(status, html).with_header("HX-Reswap", swap)
    }

    pub fn no_content() -> Self {
        Self::new(204)
    }

    pub fn not_found(message: &str) -> Self {
        let message = if message.is_empty() { "Not Found" } else { message };
        Self::error(404, message)
    }

    pub fn bad_request(message: &str) -> Self {
        let message = if message.is_empty() { "Bad Request" } else { message };
        Self::error(400, message)
    }

    pub fn internal_error(message: &str) -> Self {
        let message = if message.is_empty() {
            "Internal Server Error"
        } else {
            message
        };
        Self::error(500, message)
    }
}
