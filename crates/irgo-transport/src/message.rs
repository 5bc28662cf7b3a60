//! The transport-level message type.
//!
//! [`Message`] is the union of the inbound and outbound wire shapes, so
//! channel handlers deal with one type in both directions. Conversions to and
//! from the hub's wire messages are lossless for the fields each side carries.

use irgo_hub::{WsEnvelope, WsRequest};
use std::collections::HashMap;

/// A message flowing through a [`Channel`](crate::Channel).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Message {
    /// Message kind (e.g. `"html"`).
    pub kind: String,
    /// Correlation id (`request_id` on the wire).
    pub id: String,
    pub channel: String,
    pub format: String,
    pub target: String,
    pub swap: String,
    pub payload: Vec<u8>,
    pub headers: HashMap<String, String>,
    /// Client-supplied signal values (inbound only).
    pub values: HashMap<String, serde_json::Value>,
}

impl Message {
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
            id: request_id.into(),
            ..Self::html("", html)
        }
    }

    /// The payload interpreted as UTF-8 (lossy).
    pub fn payload_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

impl From<Message> for WsEnvelope {
    fn from(msg: Message) -> Self {
        WsEnvelope {
            kind: msg.kind,
            channel: msg.channel,
            format: msg.format,
            target: msg.target,
            swap: msg.swap,
            request_id: msg.id,
            payload: msg.payload,
            headers: msg.headers,
        }
    }
}

impl From<WsEnvelope> for Message {
    fn from(env: WsEnvelope) -> Self {
        Message {
            kind: env.kind,
            id: env.request_id,
            channel: env.channel,
            format: env.format,
            target: env.target,
            swap: env.swap,
            payload: env.payload,
            headers: env.headers,
            values: HashMap::new(),
        }
    }
}

impl From<WsRequest> for Message {
    fn from(req: WsRequest) -> Self {
        Message {
            kind: req.kind,
            id: req.request_id,
            channel: req.channel,
            format: req.format,
            target: req.target,
            swap: String::new(),
            payload: req.payload,
            headers: req.headers,
            values: req.values,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_round_trip() {
        let msg = Message {
            kind: "html".into(),
            id: "r1".into(),
            channel: "chat".into(),
            format: "html".into(),
            target: "#t".into(),
            swap: "beforeend".into(),
            payload: b"<li>x</li>".to_vec(),
            headers: HashMap::from([("X-A".to_string(), "1".to_string())]),
            values: HashMap::new(),
        };
        let env: WsEnvelope = msg.clone().into();
        assert_eq!(env.request_id, "r1");
        let back: Message = env.into();
        assert_eq!(back, msg);
    }

    #[test]
    fn ws_request_carries_values() {
        let req = WsRequest {
            kind: "submit".into(),
            request_id: "r2".into(),
            payload: b"p".to_vec(),
            values: HashMap::from([("n".to_string(), serde_json::json!(1))]),
            ..Default::default()
        };
        let msg: Message = req.into();
        assert_eq!(msg.id, "r2");
        assert_eq!(msg.values.get("n").and_then(|v| v.as_i64()), Some(1));
    }

    #[test]
    fn html_helper() {
        let msg = Message::html("#out", "<b>hi</b>");
        assert_eq!(msg.kind, "html");
        assert_eq!(msg.format, "html");
        assert_eq!(msg.payload_str(), "<b>hi</b>");
        assert!(Message::reply("r1", "x").id == "r1");
    }
}
