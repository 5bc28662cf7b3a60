//! Virtual HTTP adapter.
//!
//! Converts a request envelope into a dispatcher invocation and collects
//! whatever the dispatcher writes into a response envelope. No network I/O:
//! the "wire" is a buffer. Event-stream responses are buffered whole; true
//! streaming belongs on the channel API.

use async_trait::async_trait;
use futures_util::FutureExt;
use irgo_core::{Request, Response};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::error;

/// Header set on responses synthesized from a dispatcher panic.
pub const ERROR_HEADER: &str = "X-Irgo-Error";

/// Where a dispatcher writes its response.
///
/// The first `write_status` wins; a body write without a prior status implies
/// 200. Headers may be set at any point before the capture is finalized.
pub trait ResponseSink: Send {
    fn set_header(&mut self, key: &str, value: &str);
    fn write_status(&mut self, status: u16);
    fn write(&mut self, chunk: &[u8]);
}

/// The single capability the transport needs from a request dispatcher: given
/// a request envelope and a response sink, write a response.
///
/// The routing tree behind this trait is opaque to the transport.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(&self, request: &Request, sink: &mut dyn ResponseSink);
}

/// Adapts a synchronous closure into a [`Dispatcher`].
pub struct DispatcherFn<F>(pub F);

#[async_trait]
impl<F> Dispatcher for DispatcherFn<F>
where
    F: Fn(&Request, &mut dyn ResponseSink) + Send + Sync,
{
    async fn dispatch(&self, request: &Request, sink: &mut dyn ResponseSink) {
        (self.0)(request, sink)
    }
}

/// Buffering [`ResponseSink`] that finalizes into a [`Response`].
#[derive(Debug, Default)]
pub struct ResponseCapture {
    status: Option<u16>,
    headers: HashMap<String, String>,
    body: Vec<u8>,
}

impl ResponseCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Finalize into a response envelope. An untouched capture becomes an
    /// empty 200.
    pub fn into_response(self) -> Response {
        Response {
            status: self.status.unwrap_or(200),
            headers: self.headers,
            body: self.body,
        }
    }
}

impl ResponseSink for ResponseCapture {
    fn set_header(&mut self, key: &str, value: &str) {
        self.headers
            .retain(|k, _| !k.eq_ignore_ascii_case(key));
        self.headers.insert(key.to_string(), value.to_string());
    }

    fn write_status(&mut self, status: u16) {
        if self.status.is_none() {
            self.status = Some(status);
        }
    }

    fn write(&mut self, chunk: &[u8]) {
        if self.status.is_none() {
            self.status = Some(200);
        }
        self.body.extend_from_slice(chunk);
    }
}

/// Invokes a dispatcher with a capturing sink and returns the collected
/// response envelope.
#[derive(Clone)]
pub struct HttpAdapter {
    dispatcher: Arc<dyn Dispatcher>,
}

impl HttpAdapter {
    pub fn new(dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self { dispatcher }
    }

    /// Run one request through the dispatcher.
    ///
    /// A dispatcher panic is caught and converted into a 500 carrying a
    /// generic body and the [`ERROR_HEADER`]; it never tears down the process
    /// and never propagates out-of-band.
    pub async fn handle(&self, request: &Request) -> Response {
        let mut capture = ResponseCapture::new();
        let outcome = AssertUnwindSafe(self.dispatcher.dispatch(request, &mut capture))
            .catch_unwind()
            .await;

        match outcome {
            Ok(()) => capture.into_response(),
            Err(panic) => {
                error!(
                    method = %request.method,
                    url = %request.url,
                    panic = %panic_message(panic.as_ref()),
                    "dispatcher panicked"
                );
                let mut response = Response::new(500);
                response.body = b"Internal Server Error".to_vec();
                response.set_header(ERROR_HEADER, "dispatcher panic");
                response
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}
