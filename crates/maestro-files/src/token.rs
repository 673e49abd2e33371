// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use chrono::Utc;
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Signs short-lived download URLs bound to `(user, file_key)`.
///
/// Tools receive these URLs instead of raw filenames so they can fetch
/// session files without cookies.  Verification recomputes the MAC and
/// compares in constant time; expired or malformed tokens fail closed.
pub struct DownloadUrlSigner {
    secret: Vec<u8>,
    base_url: String,
    ttl_seconds: i64,
}

impl DownloadUrlSigner {
    pub const DEFAULT_TTL_SECONDS: i64 = 900;

    pub fn new(secret: impl Into<Vec<u8>>, base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            secret: secret.into(),
            base_url,
            ttl_seconds: Self::DEFAULT_TTL_SECONDS,
        }
    }

    /// Signer with a process-random secret.  URLs stop verifying across
    /// restarts, which is acceptable for their 15-minute lifetime.
    pub fn ephemeral(base_url: impl Into<String>) -> Self {
        let mut secret = [0u8; 32];
        OsRng.fill_bytes(&mut secret);
        Self::new(secret.to_vec(), base_url)
    }

    pub fn with_ttl_seconds(mut self, ttl_seconds: i64) -> Self {
        self.ttl_seconds = ttl_seconds;
        self
    }

    fn mac(&self, user_email: &str, key: &str, expires: i64) -> Vec<u8> {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("HMAC accepts any key length");
        mac.update(user_email.as_bytes());
        mac.update(b"|");
        mac.update(key.as_bytes());
        mac.update(b"|");
        mac.update(expires.to_string().as_bytes());
        mac.finalize().into_bytes().to_vec()
    }

    /// Create a tokenized download URL for a stored file.
    pub fn create_download_url(&self, user_email: &str, key: &str) -> String {
        let expires = Utc::now().timestamp() + self.ttl_seconds;
        let token = hex::encode(self.mac(user_email, key, expires));
        format!(
            "{}/files/download/{key}?expires={expires}&token={token}",
            self.base_url
        )
    }

    /// Verify a presented token.  Returns `false` on expiry, malformed hex,
    /// or MAC mismatch.
    pub fn verify(&self, user_email: &str, key: &str, expires: i64, token: &str) -> bool {
        if expires < Utc::now().timestamp() {
            return false;
        }
        let Ok(presented) = hex::decode(token) else {
            return false;
        };
        let expected = self.mac(user_email, key, expires);
        presented.len() == expected.len()
            && bool::from(presented.as_slice().ct_eq(expected.as_slice()))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
