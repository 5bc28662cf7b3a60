//! Wire messages for virtual WebSocket frames.
//!
//! Inbound frames decode to [`WsRequest`], outbound envelopes encode from
//! [`WsEnvelope`]. Payloads travel as plain UTF-8 strings inside the JSON
//! frame; unknown fields on inbound frames are ignored.

use irgo_core::encoding::utf8_bytes;
use irgo_core::{IrgoError, IrgoResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// An inbound message from the client side of a channel.
///
/// `request_id` is a free-form correlation token chosen by the client; when
/// present, the session tracks the request until a reply retires it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WsRequest {
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub request_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub channel: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub target: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub format: String,
    #[serde(default, with = "utf8_bytes")]
    pub payload: Vec<u8>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub values: HashMap<String, serde_json::Value>,
}

impl WsRequest {
    /// The payload interpreted as UTF-8 (lossy).
    pub fn payload_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }

    /// A signal value from the frame's `values` map.
    pub fn value(&self, key: &str) -> Option<&serde_json::Value> {
        self.values.get(key)
    }

    /// A signal value as a string slice, when it is one.
    pub fn value_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(|v| v.as_str())
    }
}

/// Decode an inbound frame. Malformed JSON surfaces as
/// [`IrgoError::Malformed`].
pub fn parse_request(data: &[u8]) -> IrgoResult<WsRequest> {
    serde_json::from_slice(data).map_err(|e| IrgoError::Malformed(e.to_string()))
}

/// An outbound envelope queued for the client side of a channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WsEnvelope {
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(default)]
    pub channel: String,
    #[serde(default)]
    pub format: String,
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub swap: String,
    #[serde(default)]
    pub request_id: String,
    #[serde(default, with = "utf8_bytes")]
    pub payload: Vec<u8>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
}

impl WsEnvelope {
    /// An HTML fragment aimed at a target element.
    pub fn html(target: impl Into<String>, html: impl Into<String>) -> Self {
        Self {
            kind: "html".into(),
            format: "html".into(),
            target: target.into(),
            payload: html.into().into_bytes(),
            ..Default::default()
        }
    }

    /// An HTML reply correlated with a tracked request.
    pub fn reply(request_id: impl Into<String>, html: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            ..Self::html("", html)
        }
    }

    /// The payload interpreted as UTF-8 (lossy).
    pub fn payload_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}
