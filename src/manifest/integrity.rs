//! Content digests for the inline manifest payload.
//!
//! The digest is computed over the escaped JSON exactly as it is embedded in
//! the page, so the client can hash the element's text content and compare.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha2::{Digest, Sha256};

/// Algorithm tag prefixed to every digest.
pub const INTEGRITY_ALGORITHM: &str = "sha256";

/// Compute `sha256-<base64>` over `payload`.
pub fn digest(payload: &str) -> String {
    let hash = Sha256::digest(payload.as_bytes());
    format!("{INTEGRITY_ALGORITHM}-{}", STANDARD.encode(hash))
}

/// Outcome of comparing a payload against its advertised digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityCheck {
    Verified,
    Mismatch { expected: String, actual: String },
    /// The advertised digest uses an algorithm this runtime can't compute.
    Unsupported { expected: String },
}

/// Recompute the digest of `payload` and compare it with `expected`.
pub fn verify(payload: &str, expected: &str) -> IntegrityCheck {
    let algorithm = expected.split_once('-').map(|(alg, _)| alg);
    if algorithm != Some(INTEGRITY_ALGORITHM) {
        return IntegrityCheck::Unsupported {
            expected: expected.to_string(),
        };
    }

    let actual = digest(payload);
    if actual == expected {
        IntegrityCheck::Verified
    } else {
        IntegrityCheck::Mismatch {
            expected: expected.to_string(),
            actual,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_of_empty_payload() {
        assert_eq!(
            digest(""),
            "sha256-47DEQpj8HBSa+/TImW+5JCeuQeRkm5NMpJWZG3hSuFU="
        );
    }

    #[test]
    fn verify_round_trip() {
        let payload = r#"{"modules":{}}"#;
        assert_eq!(verify(payload, &digest(payload)), IntegrityCheck::Verified);
    }

    #[test]
    fn verify_detects_tampering() {
        let expected = digest(r#"{"modules":{}}"#);
        match verify(r#"{"modules":{"x":"/evil.js"}}"#, &expected) {
            IntegrityCheck::Mismatch { expected: e, actual } => {
                assert_eq!(e, expected);
                assert!(actual.starts_with("sha256-"));
                assert_ne!(actual, expected);
            }
            other => panic!("Expected Mismatch, got {other:?}"),
        }
    }

    #[test]
    fn verify_rejects_unknown_algorithm() {
        assert!(matches!(
            verify("{}", "sha384-abc"),
            IntegrityCheck::Unsupported { .. }
        ));
        assert!(matches!(
            verify("{}", "garbage"),
            IntegrityCheck::Unsupported { .. }
        ));
    }
}
