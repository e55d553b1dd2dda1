use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Compute the canonical webhook signature: hex HMAC-SHA256 of the raw body.
pub fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Verify a webhook signature against the exact raw request bytes.
///
/// Only the canonical format is accepted: a single hex-encoded HMAC-SHA256
/// digest. Prefixed or structured header values ("sha256=...", "t=...,v1=...")
/// are rejected outright instead of being parsed heuristically. Comparison is
/// constant-time via `Mac::verify_slice`.
pub fn verify(secret: &str, body: &[u8], signature: &str) -> bool {
    let signature = signature.trim();
    if signature.is_empty() || !signature.bytes().all(|b| b.is_ascii_hexdigit()) {
        return false;
    }
    let Ok(expected) = hex::decode(signature) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-webhook-secret";

    #[test]
    fn accepts_signature_it_produced() {
        let body = br#"{"provider_reference":"TRX-1","status":"completed"}"#;
        let sig = sign(SECRET, body);
        assert!(verify(SECRET, body, &sig));
    }

    #[test]
    fn rejects_tampered_body() {
        let body = br#"{"provider_reference":"TRX-1","status":"completed"}"#;
        let sig = sign(SECRET, body);
        let tampered = br#"{"provider_reference":"TRX-1","status":"failed"}"#;
        assert!(!verify(SECRET, tampered, &sig));
    }

    #[test]
    fn rejects_wrong_secret() {
        let body = b"payload";
        let sig = sign(SECRET, body);
        assert!(!verify("other-secret", body, &sig));
    }

    #[test]
    fn rejects_non_canonical_formats() {
        let body = b"payload";
        let sig = sign(SECRET, body);
        assert!(!verify(SECRET, body, &format!("sha256={sig}")));
        assert!(!verify(SECRET, body, ""));
        assert!(!verify(SECRET, body, "not hex at all"));
        // Truncated digest must not pass either.
        assert!(!verify(SECRET, body, &sig[..32]));
    }
}
