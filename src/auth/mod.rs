//! Cloud token exchange for the device handshake.
//!
//! The device reports a numeric user id during the auth handshake; this
//! client trades it for a session token at the vendor's authorization
//! endpoint. One request per handshake, no caching, no automatic retry --
//! the session state machine decides whether to run the handshake again.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::cipher::WireCipher;
use crate::codec;

/// Vendor authorization endpoint; the user id is appended to the path.
const DEFAULT_BASE_URL: &str = "https://mlm.rapsodo.com/api/simulator/user/";

/// Pre-shared `Secret:` header value, stored AES-encrypted with the wire
/// cipher and recovered at client construction.
const SECRET_ENC_HEX: &str =
    "19605BE9BD42E0B3AEB20003847376012404EC9D72BB5586391F01BE03F031163242C34CD55C2C3E77D10D9A43A677A6";

/// Token-exchange response.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthResult {
    pub success: bool,
    pub user: AuthUser,
}

/// User record inside an [`AuthResult`].
#[derive(Debug, Clone, Deserialize)]
pub struct AuthUser {
    #[serde(default)]
    pub id: String,
    pub token: String,
    #[serde(default, rename = "expireDate")]
    pub expire_date: String,
}

/// Exchanges a device-reported user id for a session token.
///
/// The session depends on this seam rather than on HTTP directly.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// One token request; `None` on any failure. Never retried here.
    async fn request_token(&self, user_id: &str) -> Option<AuthResult>;
}

/// Client for the vendor's per-device session-token endpoint.
pub struct AuthClient {
    http: reqwest::Client,
    base_url: String,
    secret: String,
}

impl AuthClient {
    /// Create a client against the vendor endpoint.
    pub fn new(cipher: &WireCipher) -> Self {
        Self::with_base_url(cipher, DEFAULT_BASE_URL.to_string())
    }

    /// Create a client against a custom base URL (tests, local stubs).
    pub fn with_base_url(cipher: &WireCipher, base_url: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            http,
            base_url,
            secret: decode_secret(cipher),
        }
    }

}

#[async_trait]
impl TokenProvider for AuthClient {
    /// Any transport failure or non-success HTTP status returns `None`
    /// (logged); the caller owns retry policy.
    async fn request_token(&self, user_id: &str) -> Option<AuthResult> {
        let url = format!("{}{}", self.base_url, user_id);
        tracing::info!(user_id, "requesting session token");

        let response = match self
            .http
            .get(&url)
            .header("Secret", &self.secret)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, "token request transport failure");
                return None;
            }
        };

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(%status, "token request rejected");
            return None;
        }

        match response.json::<AuthResult>().await {
            Ok(result) => {
                tracing::info!(success = result.success, "token exchange complete");
                Some(result)
            }
            Err(e) => {
                tracing::warn!(error = %e, "token response malformed");
                None
            }
        }
    }
}

/// Recover the plaintext `Secret:` header value from its encrypted blob.
fn decode_secret(cipher: &WireCipher) -> String {
    codec::hex_to_bytes(SECRET_ENC_HEX)
        .and_then(|blob| cipher.decrypt(&blob))
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .unwrap_or_else(|| {
            tracing::error!("failed to recover auth secret");
            String::new()
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_blob_decodes_to_utf8() {
        let secret = decode_secret(&WireCipher::new());
        assert!(!secret.is_empty());
        assert!(secret.is_ascii());
    }
}
