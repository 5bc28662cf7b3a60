//! Transport configuration.

use serde::Deserialize;

/// Configuration shared by the transport variants.
///
/// The security fields only apply to the loopback variant; the in-process
/// variant never touches the network.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Per-launch authentication secret. Empty means "generate at start".
    #[serde(default)]
    pub secret: String,
    /// Origins allowed by the CORS and strict-origin layers.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
    /// Server port (loopback only). 0 selects an OS-assigned port.
    #[serde(default)]
    pub port: u16,
    /// Bind address. Kept on localhost so the server is never exposed.
    #[serde(default = "default_address")]
    pub address: String,
    /// Outbound queue capacity per channel.
    #[serde(default = "default_channel_buffer_size")]
    pub channel_buffer_size: usize,
    /// Path prefixes exempt from secret validation.
    #[serde(default = "default_exclude_paths")]
    pub exclude_paths: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            secret: String::new(),
            allowed_origins: Vec::new(),
            port: 0,
            address: default_address(),
            channel_buffer_size: default_channel_buffer_size(),
            exclude_paths: default_exclude_paths(),
        }
    }
}

impl Config {
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = secret.into();
        self
    }

    pub fn with_allowed_origins<I, S>(mut self, origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_origins = origins.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_channel_buffer_size(mut self, size: usize) -> Self {
        self.channel_buffer_size = size;
        self
    }
}

fn default_address() -> String {
    "127.0.0.1".to_string()
}

fn default_channel_buffer_size() -> usize {
    100
}

fn default_exclude_paths() -> Vec<String> {
    vec!["/static/".to_string()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.address, "127.0.0.1");
        assert_eq!(config.port, 0);
        assert_eq!(config.channel_buffer_size, 100);
        assert_eq!(config.exclude_paths, vec!["/static/"]);
        assert!(config.secret.is_empty());
    }

    #[test]
    fn builder_chain() {
        let config = Config::default()
            .with_port(8080)
            .with_secret("s3cret")
            .with_allowed_origins(["http://localhost:8080"])
            .with_channel_buffer_size(16);
        assert_eq!(config.port, 8080);
        assert_eq!(config.secret, "s3cret");
        assert_eq!(config.allowed_origins.len(), 1);
        assert_eq!(config.channel_buffer_size, 16);
    }

    #[test]
    fn deserializes_with_defaults() {
        let config: Config = serde_json::from_str(r#"{"port": 9001}"#).unwrap();
        assert_eq!(config.port, 9001);
        assert_eq!(config.address, "127.0.0.1");
        assert_eq!(config.channel_buffer_size, 100);
    }
}
