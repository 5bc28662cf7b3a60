//! Serde helpers for byte fields on JSON envelopes.
//!
//! HTTP bodies travel as base64 text so arbitrary bytes survive the JSON
//! boundary; WebSocket payloads travel as plain UTF-8 strings to match the
//! frame format the WebView side produces.

/// `Vec<u8>` ⇄ base64 string (standard alphabet).
pub mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// `Vec<u8>` ⇄ plain UTF-8 string. Non-UTF-8 bytes are replaced on encode.
pub mod utf8_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&String::from_utf8_lossy(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        Ok(String::deserialize(deserializer)?.into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Carrier {
        #[serde(with = "super::base64_bytes")]
        body: Vec<u8>,
        #[serde(with = "super::utf8_bytes")]
        payload: Vec<u8>,
    }

    #[test]
    fn round_trip() {
        let c = Carrier {
            body: vec![0x00, 0xff, 0x10, b'a'],
            payload: b"<div>hi</div>".to_vec(),
        };
        let json = serde_json::to_string(&c).unwrap();
        let back: Carrier = serde_json::from_str(&json).unwrap();
        assert_eq!(back, c);
    }

    #[test]
    fn payload_is_plain_text_on_the_wire() {
        let c = Carrier {
            body: Vec::new(),
            payload: b"hello".to_vec(),
        };
        let json = serde_json::to_string(&c).unwrap();
        assert!(json.contains(r#""payload":"hello""#));
    }
}
