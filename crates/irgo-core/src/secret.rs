//! Per-launch authentication secrets.
//!
//! The loopback transport binds to localhost, so any local process could reach
//! it; a secret generated at process start and injected only into the WebView
//! keeps other processes out. The value must never be logged.

use crate::error::{IrgoError, IrgoResult};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use ring::rand::{SecureRandom, SystemRandom};

/// Header carrying the per-launch secret on state-changing requests.
pub const SECRET_HEADER: &str = "X-Irgo-Secret";

/// Query parameter carrying the secret on WebSocket upgrades, which cannot
/// set custom headers from the browser API.
pub const SECRET_QUERY_PARAM: &str = "secret";

/// Generate a per-launch secret: 32 random bytes as unpadded URL-safe base64
/// (43 characters).
pub fn generate_secret() -> IrgoResult<String> {
    let rng = SystemRandom::new();
    let mut bytes = [0u8; 32];
    rng.fill(&mut bytes)
        .map_err(|_| IrgoError::Transport("secret generation failed".into()))?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}
