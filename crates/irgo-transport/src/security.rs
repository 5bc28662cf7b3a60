//! Security layers for the network-exposed transport.
//!
//! Each layer wraps an inner [`Dispatcher`] and rejects the request with a
//! 403 before it reaches the routing tree. Secret values are never logged.

use crate::adapter::{Dispatcher, ResponseSink};
use async_trait::async_trait;
use irgo_core::{Request, SECRET_HEADER, SECRET_QUERY_PARAM};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::warn;

/// Whether the method is safe by HTTP convention (never state-mutating).
pub fn is_safe_method(method: &str) -> bool {
    matches!(method, "GET" | "HEAD" | "OPTIONS")
}

/// Whether the request asks for a WebSocket upgrade.
pub fn is_websocket_upgrade(request: &Request) -> bool {
    let upgrade = request
        .header("Upgrade")
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"));
    let connection = request
        .header("Connection")
        .is_some_and(|v| v.to_ascii_lowercase().contains("upgrade"));
    upgrade && connection
}

fn forbidden(sink: &mut dyn ResponseSink, body: &str) {
    sink.write_status(403);
    sink.write(body.as_bytes());
}

/// Validates the `X-Irgo-Secret` header on state-changing requests.
///
/// Safe methods pass through unconditionally: GET and HEAD cannot mutate
/// state, OPTIONS is needed for CORS preflight. Paths under an exclude prefix
/// (static assets) also pass, so the WebView can load the initial page before
/// it has the secret.
pub struct SecretValidation {
    inner: Arc<dyn Dispatcher>,
    secret: String,
    exclude_paths: Vec<String>,
}

impl SecretValidation {
    pub fn new(inner: Arc<dyn Dispatcher>, secret: impl Into<String>, exclude_paths: Vec<String>) -> Self {
        Self {
            inner,
            secret: secret.into(),
            exclude_paths,
        }
    }
}

#[async_trait]
impl Dispatcher for SecretValidation {
    async fn dispatch(&self, request: &Request, sink: &mut dyn ResponseSink) {
        if is_safe_method(&request.method) {
            return self.inner.dispatch(request, sink).await;
        }
        let path = request.path();
        if self.exclude_paths.iter().any(|p| path.starts_with(p.as_str())) {
            return self.inner.dispatch(request, sink).await;
        }
        if request.header(SECRET_HEADER) != Some(self.secret.as_str()) {
            warn!(method = %request.method, path, "request rejected: missing or invalid secret");
            return forbidden(sink, "Forbidden");
        }
        self.inner.dispatch(request, sink).await
    }
}

/// Validates the `Origin` header exactly on state-changing requests.
///
/// An absent `Origin` is allowed: it indicates a same-origin request from the
/// WebView or a non-browser client, and the secret layer still authenticates
/// those. Matching is byte-exact, which closes DNS-rebinding and CSRF holes
/// that suffix patterns leave open.
pub struct StrictOrigin {
    inner: Arc<dyn Dispatcher>,
    allowed: HashSet<String>,
}

impl StrictOrigin {
    pub fn new<I, S>(inner: Arc<dyn Dispatcher>, allowed_origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            inner,
            allowed: allowed_origins.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl Dispatcher for StrictOrigin {
    async fn dispatch(&self, request: &Request, sink: &mut dyn ResponseSink) {
        if is_safe_method(&request.method) {
            return self.inner.dispatch(request, sink).await;
        }
        if let Some(origin) = request.header("Origin") {
            if !self.allowed.contains(origin) {
                warn!(method = %request.method, origin, "request rejected: invalid origin");
                return forbidden(sink, "Forbidden: invalid origin");
            }
        }
        self.inner.dispatch(request, sink).await
    }
}

/// Validates the `secret` query parameter on WebSocket upgrade requests.
///
/// The browser WebSocket API cannot set custom headers, so upgrades carry the
/// per-launch secret as `?secret=...` instead. Non-upgrade requests pass
/// through untouched.
pub struct WsSecret {
    inner: Arc<dyn Dispatcher>,
    secret: String,
}

impl WsSecret {
    pub fn new(inner: Arc<dyn Dispatcher>, secret: impl Into<String>) -> Self {
        Self {
            inner,
            secret: secret.into(),
        }
    }
}

#[async_trait]
impl Dispatcher for WsSecret {
    async fn dispatch(&self, request: &Request, sink: &mut dyn ResponseSink) {
        if !is_websocket_upgrade(request) {
            return self.inner.dispatch(request, sink).await;
        }
        if request.query_value(SECRET_QUERY_PARAM).as_deref() != Some(self.secret.as_str()) {
            warn!(path = request.path(), "websocket upgrade rejected: missing or invalid secret");
            return forbidden(sink, "Forbidden");
        }
        self.inner.dispatch(request, sink).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{DispatcherFn, HttpAdapter};
    use irgo_core::Response;

    fn ok_dispatcher() -> Arc<dyn Dispatcher> {
        Arc::new(DispatcherFn(|_: &Request, sink: &mut dyn ResponseSink| {
            sink.write(b"ok");
        }))
    }

    async fn run(dispatcher: Arc<dyn Dispatcher>, request: Request) -> Response {
        HttpAdapter::new(dispatcher).handle(&request).await
    }

    #[tokio::test]
    async fn secret_required_for_unsafe_methods() {
        let guard: Arc<dyn Dispatcher> = Arc::new(SecretValidation::new(
            ok_dispatcher(),
            "XYZ",
            vec!["/static/".to_string()],
        ));

        // Missing secret: rejected.
        let response = run(guard.clone(), Request::new("POST", "/api/foo")).await;
        assert_eq!(response.status, 403);

        // Wrong secret: rejected.
        let request = Request::new("POST", "/api/foo").with_header(SECRET_HEADER, "nope");
        assert_eq!(run(guard.clone(), request).await.status, 403);

        // Correct secret: passes.
        let request = Request::new("POST", "/api/foo").with_header(SECRET_HEADER, "XYZ");
        let response = run(guard.clone(), request).await;
        assert_eq!(response.status, 200);
        assert_eq!(response.body_str(), "ok");
    }

    #[tokio::test]
    async fn safe_methods_and_excluded_paths_bypass_secret() {
        let guard: Arc<dyn Dispatcher> = Arc::new(SecretValidation::new(
            ok_dispatcher(),
            "XYZ",
            vec!["/static/".to_string()],
        ));

        for method in ["GET", "HEAD", "OPTIONS"] {
            let response = run(guard.clone(), Request::new(method, "/api/foo")).await;
            assert_eq!(response.status, 200, "{method} should bypass");
        }

        let response = run(guard.clone(), Request::new("POST", "/static/app.js")).await;
        assert_eq!(response.status, 200);
    }

    #[tokio::test]
    async fn origin_must_match_exactly_when_present() {
        let guard: Arc<dyn Dispatcher> = Arc::new(StrictOrigin::new(
            ok_dispatcher(),
            ["http://127.0.0.1:8080"],
        ));

        // Absent origin: allowed.
        assert_eq!(run(guard.clone(), Request::new("POST", "/x")).await.status, 200);

        // Exact match: allowed.
        let request = Request::new("POST", "/x").with_header("Origin", "http://127.0.0.1:8080");
        assert_eq!(run(guard.clone(), request).await.status, 200);

        // Suffix lookalike: rejected.
        let request =
            Request::new("POST", "/x").with_header("Origin", "http://evil.example/127.0.0.1:8080");
        assert_eq!(run(guard.clone(), request).await.status, 403);

        // Safe method with a bad origin: allowed.
        let request = Request::new("GET", "/x").with_header("Origin", "http://evil.example");
        assert_eq!(run(guard.clone(), request).await.status, 200);
    }

    #[tokio::test]
    async fn ws_upgrade_requires_secret_query_param() {
        let guard: Arc<dyn Dispatcher> = Arc::new(WsSecret::new(ok_dispatcher(), "XYZ"));

        let upgrade = |url: &str| {
            Request::new("GET", url)
                .with_header("Upgrade", "WebSocket")
                .with_header("Connection", "keep-alive, Upgrade")
        };

        assert_eq!(run(guard.clone(), upgrade("/ws/chat")).await.status, 403);
        assert_eq!(
            run(guard.clone(), upgrade("/ws/chat?secret=wrong")).await.status,
            403
        );
        assert_eq!(
            run(guard.clone(), upgrade("/ws/chat?secret=XYZ")).await.status,
            200
        );

        // Non-upgrade requests pass untouched.
        let response = run(guard.clone(), Request::new("GET", "/ws/chat")).await;
        assert_eq!(response.status, 200);
    }

    #[test]
    fn upgrade_detection_is_case_insensitive() {
        let request = Request::new("GET", "/ws")
            .with_header("Upgrade", "websocket")
            .with_header("Connection", "Upgrade");
        assert!(is_websocket_upgrade(&request));

        let request = Request::new("GET", "/ws").with_header("Upgrade", "websocket");
        assert!(!is_websocket_upgrade(&request));
    }
}
