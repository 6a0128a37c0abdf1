//! Webhook signature computation and verification

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// HMAC-SHA256 signer/verifier over raw webhook bodies.
///
/// Verification is constant-time via the Mac comparison; the raw bytes must
/// be exactly what arrived on the wire.
#[derive(Clone)]
pub struct SignatureVerifier {
    key: Vec<u8>,
}

impl SignatureVerifier {
    pub fn new(secret: &str) -> Self {
        Self { key: secret.as_bytes().to_vec() }
    }

    fn mac(&self) -> HmacSha256 {
        // HMAC accepts keys of any length
        HmacSha256::new_from_slice(&self.key).expect("hmac key")
    }

    /// Hex signature for an outbound payload
    pub fn sign(&self, payload: &[u8]) -> String {
        let mut mac = self.mac();
        mac.update(payload);
        hex::encode(mac.finalize().into_bytes())
    }

    /// Verify an inbound signature header against the raw body.
    /// Accepts an optional `sha256=` prefix.
    pub fn verify(&self, payload: &[u8], signature_header: &str) -> Result<()> {
        let hex_signature = signature_header
            .strip_prefix("sha256=")
            .unwrap_or(signature_header)
            .trim();

        let expected = hex::decode(hex_signature)
            .map_err(|_| Error::signature("signature is not valid hex"))?;

        let mut mac = self.mac();
        mac.update(payload);
        mac.verify_slice(&expected)
            .map_err(|_| Error::signature("signature mismatch"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_verify_round_trip() {
        let verifier = SignatureVerifier::new("shared-secret");
        let body = br#"{"eventType":"net.payment.capture.created"}"#;
        let signature = verifier.sign(body);
        assert!(verifier.verify(body, &signature).is_ok());
        assert!(verifier.verify(body, &format!("sha256={}", signature)).is_ok());
    }

    #[test]
    fn test_tampered_body_fails() {
        let verifier = SignatureVerifier::new("shared-secret");
        let signature = verifier.sign(b"original");
        assert!(verifier.verify(b"tampered", &signature).is_err());
    }

    #[test]
    fn test_wrong_key_fails() {
        let signer = SignatureVerifier::new("key-a");
        let verifier = SignatureVerifier::new("key-b");
        let signature = signer.sign(b"payload");
        assert!(verifier.verify(b"payload", &signature).is_err());
    }

    #[test]
    fn test_garbage_signature_fails() {
        let verifier = SignatureVerifier::new("shared-secret");
        assert!(verifier.verify(b"payload", "not-hex!").is_err());
        assert!(verifier.verify(b"payload", "").is_err());
    }
}
