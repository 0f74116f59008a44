//! Idempotency keys and HMAC-SHA256 body signatures.
//!
//! Everything here is a pure function of its inputs, so a resend of the same
//! batch or document version carries the same key and signature.

use common::{DestinationId, DocumentId, ErpOperation};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::{Result, TransportError};

type HmacSha256 = Hmac<Sha256>;

/// Key for one webhook batch: SHA-256 of `webhook:{destination}:{from}:{to}`.
pub fn webhook_idempotency_key(destination_id: DestinationId, from_seq: i64, to_seq: i64) -> String {
    sha256_hex(&format!("webhook:{destination_id}:{from_seq}:{to_seq}"))
}

/// Key for one ERP operation: SHA-256 of `erp:{document}:{operation}:{version}`.
pub fn erp_idempotency_key(document_id: DocumentId, operation: ErpOperation, version: i64) -> String {
    sha256_hex(&format!("erp:{document_id}:{operation}:{version}"))
}

/// Lowercase hex HMAC-SHA256 of `body` keyed with `secret`.
pub fn sign(secret: &str, body: &[u8]) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| TransportError::Configuration(format!("invalid signing key: {e}")))?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Checks a hex signature against `body` in constant time.
pub fn verify_signature(secret: &str, body: &[u8], signature_hex: &str) -> bool {
    let Ok(expected) = hex::decode(signature_hex) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn webhook_key_is_stable_and_batch_specific() {
        let destination = DestinationId::new();

        let key = webhook_idempotency_key(destination, 1, 2);
        assert_eq!(key, webhook_idempotency_key(destination, 1, 2));
        assert_ne!(key, webhook_idempotency_key(destination, 1, 3));
        assert_ne!(key, webhook_idempotency_key(DestinationId::new(), 1, 2));
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn erp_key_depends_on_operation_and_version() {
        let document = DocumentId::new();

        let upsert = erp_idempotency_key(document, ErpOperation::UpsertDocument, 3);
        assert_eq!(upsert, erp_idempotency_key(document, ErpOperation::UpsertDocument, 3));
        assert_ne!(upsert, erp_idempotency_key(document, ErpOperation::PostDocument, 3));
        assert_ne!(upsert, erp_idempotency_key(document, ErpOperation::UpsertDocument, 4));
    }

    #[test]
    fn known_sha256_digest() {
        assert_eq!(
            sha256_hex("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn signature_matches_rfc_4231_vector() {
        // Test case 2 of RFC 4231.
        let signature = sign("Jefe", b"what do ya want for nothing?").unwrap();
        assert_eq!(
            signature,
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn verify_accepts_own_signature_only() {
        let body = br#"{"destinationId":"d","fromSeq":1,"toSeq":2,"events":[]}"#;
        let signature = sign("s3cret", body).unwrap();

        assert!(verify_signature("s3cret", body, &signature));
        assert!(!verify_signature("other", body, &signature));
        assert!(!verify_signature("s3cret", b"tampered", &signature));
        assert!(!verify_signature("s3cret", body, "not-hex"));
    }
}
