//! General-purpose dispatcher middleware.

use crate::adapter::{Dispatcher, ResponseSink};
use async_trait::async_trait;
use irgo_core::Request;
use std::sync::Arc;

/// CORS headers for browser clients during desktop debugging.
///
/// Origins are matched exactly, `"*"` allows any. Preflight `OPTIONS`
/// requests are answered directly with 204.
pub struct Cors {
    inner: Arc<dyn Dispatcher>,
    allowed_origins: Vec<String>,
}

impl Cors {
    pub fn new<I, S>(inner: Arc<dyn Dispatcher>, allowed_origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            inner,
            allowed_origins: allowed_origins.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl Dispatcher for Cors {
    async fn dispatch(&self, request: &Request, sink: &mut dyn ResponseSink) {
        if let Some(origin) = request.header("Origin") {
            let allowed = self
                .allowed_origins
                .iter()
                .any(|o| o == "*" || o == origin);
            if allowed {
                sink.set_header("Access-Control-Allow-Origin", origin);
                sink.set_header(
                    "Access-Control-Allow-Methods",
                    "GET, POST, PUT, PATCH, DELETE, OPTIONS",
                );
                sink.set_header(
                    "Access-Control-Allow-Headers",
                    "Accept, Authorization, Content-Type",
                );
                sink.set_header("Access-Control-Allow-Credentials", "true");
            }
        }

        if request.method == "OPTIONS" {
            sink.write_status(204);
            return;
        }

        self.inner.dispatch(request, sink).await
    }
}

/// Disables client caching so stale fragments never survive a reload.
pub struct NoCache {
    inner: Arc<dyn Dispatcher>,
}

impl NoCache {
    pub fn new(inner: Arc<dyn Dispatcher>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl Dispatcher for NoCache {
    async fn dispatch(&self, request: &Request, sink: &mut dyn ResponseSink) {
        sink.set_header("Cache-Control", "no-cache, no-store, must-revalidate");
        sink.set_header("Pragma", "no-cache");
        sink.set_header("Expires", "0");
        self.inner.dispatch(request, sink).await
    }
}
