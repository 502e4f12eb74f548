//! Webhook HMAC verification (`X-Hub-Signature` / `X-Hub-Signature-256`).
//!
//! Comparison goes through `Mac::verify_slice`, which is constant-time.

use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::Sha256;

/// Digest a platform signs webhook bodies with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureAlgorithm {
    Sha1,
    Sha256,
}

impl SignatureAlgorithm {
    /// Prefix used in the header value, e.g. `sha256=`.
    pub fn prefix(self) -> &'static str {
        match self {
            SignatureAlgorithm::Sha1 => "sha1=",
            SignatureAlgorithm::Sha256 => "sha256=",
        }
    }
}

/// Verify `signature` (hex, optionally prefixed with the algorithm) against HMAC(secret, body).
/// Returns false for empty inputs, a prefix of another algorithm, or malformed hex.
pub fn verify_signature(
    algorithm: SignatureAlgorithm,
    secret: &str,
    signature: &str,
    body: &[u8],
) -> bool {
    if secret.is_empty() || body.is_empty() {
        return false;
    }
    let signature = signature.trim();
    let digest = match signature.split_once('=') {
        Some((_, hex_part)) if signature.starts_with(algorithm.prefix()) => hex_part,
        Some(_) => return false,
        None => signature,
    };
    if digest.is_empty() {
        return false;
    }
    let Ok(expected) = hex::decode(digest) else {
        return false;
    };
    match algorithm {
        SignatureAlgorithm::Sha1 => {
            let Ok(mut mac) = Hmac::<Sha1>::new_from_slice(secret.as_bytes()) else {
                return false;
            };
            mac.update(body);
            mac.verify_slice(&expected).is_ok()
        }
        SignatureAlgorithm::Sha256 => {
            let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
                return false;
            };
            mac.update(body);
            mac.verify_slice(&expected).is_ok()
        }
    }
}

/// Compute the prefixed header value a platform would send for `body`.
pub fn sign_body(algorithm: SignatureAlgorithm, secret: &str, body: &[u8]) -> Option<String> {
    let digest = match algorithm {
        SignatureAlgorithm::Sha1 => {
            let mut mac = Hmac::<Sha1>::new_from_slice(secret.as_bytes()).ok()?;
            mac.update(body);
            hex::encode(mac.finalize().into_bytes())
        }
        SignatureAlgorithm::Sha256 => {
            let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).ok()?;
            mac.update(body);
            hex::encode(mac.finalize().into_bytes())
        }
    };
    Some(format!("{}{}", algorithm.prefix(), digest))
}
