//! Test client for exercising dispatchers without a transport.
//!
//! Drives requests straight through the virtual HTTP adapter and wraps the
//! response in assertion helpers. Assertions panic on failure, so this is
//! meant for `#[cfg(test)]` code and integration tests.

use crate::adapter::{Dispatcher, HttpAdapter};
use irgo_core::{Request, Response};
use std::collections::HashMap;
use std::sync::Arc;

/// A client bound to one dispatcher.
///
/// Cloning (or [`with_header`](Self::with_header) / [`datastar`](Self::datastar))
/// produces an independent client; default headers on the original are not
/// affected.
#[derive(Clone)]
pub struct TestClient {
    adapter: HttpAdapter,
    headers: HashMap<String, String>,
}

impl TestClient {
    pub fn new(dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self {
            adapter: HttpAdapter::new(dispatcher),
            headers: HashMap::new(),
        }
    }

    /// A copy of this client with an extra default header.
    pub fn with_header(&self, key: &str, value: &str) -> Self {
        let mut client = self.clone();
        client.headers.insert(key.to_string(), value.to_string());
        client
    }

    /// A copy of this client that issues event-stream requests.
    pub fn datastar(&self) -> Self {
        self.with_header("Accept", "text/event-stream")
    }

    pub async fn get(&self, url: &str) -> TestResponse {
        self.execute(Request::new("GET", url)).await
    }

    pub async fn delete(&self, url: &str) -> TestResponse {
        self.execute(Request::new("DELETE", url)).await
    }

    pub async fn post(&self, url: &str, content_type: &str, body: impl Into<Vec<u8>>) -> TestResponse {
        let request = Request::new("POST", url)
            .with_header("Content-Type", content_type)
            .with_body(body);
        self.execute(request).await
    }

    /// POST an urlencoded form.
    pub async fn post_form(&self, url: &str, fields: &[(&str, &str)]) -> TestResponse {
        let mut body = url::form_urlencoded::Serializer::new(String::new());
        for (key, value) in fields {
            body.append_pair(key, value);
        }
        self.post(url, "application/x-www-form-urlencoded", body.finish())
            .await
    }

    /// Run an arbitrary request, applying the client's default headers.
    pub async fn execute(&self, mut request: Request) -> TestResponse {
        for (key, value) in &self.headers {
            if request.header(key).is_none() {
                request.set_header(key.clone(), value.clone());
            }
        }
        TestResponse(self.adapter.handle(&request).await)
    }
}

/// A response with assertion helpers. All assertions return `&Self` so they
/// chain.
pub struct TestResponse(pub Response);

impl TestResponse {
    pub fn status(&self) -> u16 {
        self.0.status
    }

    pub fn body_str(&self) -> String {
        self.0.body_str().into_owned()
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.0.header(key)
    }

    pub fn assert_status(&self, expected: u16) -> &Self {
        assert_eq!(
            self.0.status, expected,
            "expected status {expected}, got {} (body: {})",
            self.0.status,
            self.0.body_str()
        );
        self
    }

    pub fn assert_ok(&self) -> &Self {
        self.assert_status(200)
    }

    pub fn assert_created(&self) -> &Self {
        self.assert_status(201)
    }

    pub fn assert_no_content(&self) -> &Self {
        self.assert_status(204)
    }

    pub fn assert_bad_request(&self) -> &Self {
        self.assert_status(400)
    }

    pub fn assert_forbidden(&self) -> &Self {
        self.assert_status(403)
    }

    pub fn assert_not_found(&self) -> &Self {
        self.assert_status(404)
    }

    /// Accepts any 3xx status or an `HX-Redirect` header.
    pub fn assert_redirect(&self) -> &Self {
        let redirected =
            (300..400).contains(&self.0.status) || self.0.header("HX-Redirect").is_some();
        assert!(
            redirected,
            "expected a redirect, got status {} with headers {:?}",
            self.0.status, self.0.headers
        );
        self
    }

    pub fn assert_header(&self, key: &str, expected: &str) -> &Self {
        assert_eq!(
            self.0.header(key),
            Some(expected),
            "header {key} mismatch"
        );
        self
    }

    pub fn assert_html(&self) -> &Self {
        let content_type = self.0.header("Content-Type").unwrap_or("");
        assert!(
            content_type.starts_with("text/html"),
            "expected an HTML response, got Content-Type {content_type:?}"
        );
        self
    }

    pub fn assert_json(&self) -> &Self {
        let content_type = self.0.header("Content-Type").unwrap_or("");
        assert!(
            content_type.starts_with("application/json"),
            "expected a JSON response, got Content-Type {content_type:?}"
        );
        self
    }

    pub fn assert_sse(&self) -> &Self {
        let content_type = self.0.header("Content-Type").unwrap_or("");
        assert!(
            content_type.starts_with("text/event-stream"),
            "expected an event-stream response, got Content-Type {content_type:?}"
        );
        self
    }

    /// Assert the stream contains an `event: <name>` line.
    pub fn assert_sse_event(&self, name: &str) -> &Self {
        self.assert_contains(&format!("event: {name}"))
    }

    pub fn assert_contains(&self, needle: &str) -> &Self {
        let body = self.0.body_str();
        assert!(
            body.contains(needle),
            "body does not contain {needle:?}: {body}"
        );
        self
    }

    pub fn assert_contains_all(&self, needles: &[&str]) -> &Self {
        for needle in needles {
            self.assert_contains(needle);
        }
        self
    }

    pub fn contains_all(&self, needles: &[&str]) -> bool {
        let body = self.0.body_str();
        needles.iter().all(|n| body.contains(n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{DispatcherFn, ResponseSink};

    /// A tiny route table standing in for an application's routing tree.
    fn app_dispatcher() -> Arc<dyn Dispatcher> {
        Arc::new(DispatcherFn(
            |req: &Request, sink: &mut dyn ResponseSink| match (req.method.as_str(), req.path()) {
                ("GET", "/") => {
                    sink.set_header("Content-Type", "text/html; charset=utf-8");
                    sink.write(b"<h1>Welcome</h1>");
                }
                ("POST", "/users") => {
                    let name = req.form_value("name").unwrap_or_default();
                    sink.set_header("Content-Type", "text/html; charset=utf-8");
                    sink.write_status(201);
                    sink.write(format!("<div id=\"user\">{name}</div>").as_bytes());
                }
                ("GET", "/sse") if req.is_event_stream() => {
                    sink.set_header("Content-Type", "text/event-stream");
                    sink.write(b"event: patch\ndata: <div>SSE Response</div>\n\n");
                }
                ("GET", "/sse") => {
                    sink.write(b"<div>Regular Response</div>");
                }
                ("GET", "/json") => {
                    sink.set_header("Content-Type", "application/json");
                    sink.write(br#"{"status":"ok"}"#);
                }
                ("DELETE", "/delete") => {
                    sink.write_status(204);
                }
                ("GET", "/redirect") => {
                    sink.set_header("Location", "/");
                    sink.write_status(303);
                }
                _ => {
                    sink.write_status(404);
                    sink.write(b"Not Found");
                }
            },
        ))
    }

    #[tokio::test]
    async fn get_and_assertions() {
        let client = TestClient::new(app_dispatcher());
        client
            .get("/")
            .await
            .assert_ok()
            .assert_html()
            .assert_contains("Welcome");
    }

    #[tokio::test]
    async fn post_form_encodes_fields() {
        let client = TestClient::new(app_dispatcher());
        client
            .post_form("/users", &[("name", "John Doe")])
            .await
            .assert_created()
            .assert_contains("John Doe");
    }

    #[tokio::test]
    async fn datastar_client_requests_event_streams() {
        let client = TestClient::new(app_dispatcher());

        client.get("/sse").await.assert_contains("Regular Response");

        client
            .datastar()
            .get("/sse")
            .await
            .assert_sse()
            .assert_sse_event("patch")
            .assert_contains("SSE Response");
    }

    #[tokio::test]
    async fn status_assertions() {
        let client = TestClient::new(app_dispatcher());
        client.delete("/delete").await.assert_no_content();
        client.get("/missing").await.assert_not_found();
        client.get("/redirect").await.assert_redirect();
        client.get("/json").await.assert_json();
    }

    #[tokio::test]
    async fn contains_all() {
        let client = TestClient::new(app_dispatcher());
        let response = client.get("/").await;
        assert!(response.contains_all(&["h1", "Welcome"]));
        response.assert_contains_all(&["h1", "Welcome"]);
    }

    #[tokio::test]
    async fn with_header_does_not_mutate_original() {
        let client = TestClient::new(app_dispatcher());
        let custom = client.with_header("X-Custom", "value");
        assert!(custom.headers.contains_key("X-Custom"));
        assert!(!client.headers.contains_key("X-Custom"));
    }
}
