//! PKCE (RFC 7636) with the S256 method
//!
//! The challenge is stored on the flow state and the authorization code; the
//! token endpoint recomputes it from the presented verifier.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// The only supported `code_challenge_method`
pub const S256: &str = "S256";

/// BASE64URL(SHA256(ASCII(code_verifier))), unpadded
pub fn s256_challenge(code_verifier: &str) -> String {
    let hash = Sha256::digest(code_verifier.as_bytes());
    base64_url::encode(&hash)
}

/// Check a verifier against the stored challenge in constant time
pub fn verify_pkce(code_verifier: &str, code_challenge: &str) -> bool {
    let computed = s256_challenge(code_verifier);
    computed.as_bytes().ct_eq(code_challenge.as_bytes()).into()
}

/// RFC 7636 Section 4.1: 43-128 characters of `[A-Za-z0-9-._~]`
pub fn validate_code_verifier(code_verifier: &str) -> bool {
    (43..=128).contains(&code_verifier.len())
        && code_verifier
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~'))
}

/// An S256 challenge is unpadded base64url: 43-128 characters of `[A-Za-z0-9-_]`
pub fn validate_code_challenge(code_challenge: &str) -> bool {
    (43..=128).contains(&code_challenge.len())
        && code_challenge
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'))
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 7636 Appendix B
    const VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
    const CHALLENGE: &str = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";

    #[test]
    fn test_rfc7636_vector() {
        assert_eq!(s256_challenge(VERIFIER), CHALLENGE);
        assert!(verify_pkce(VERIFIER, CHALLENGE));
    }

    #[test]
    fn test_wrong_verifier_rejected() {
        assert!(!verify_pkce(
            "wrong_verifier_123456789012345678901234567890",
            CHALLENGE
        ));
        assert!(!verify_pkce(VERIFIER, "abc"));
    }

    #[test]
    fn test_code_verifier_format() {
        assert!(validate_code_verifier(VERIFIER));
        assert!(!validate_code_verifier(&VERIFIER[..42]));
        assert!(!validate_code_verifier(&"a".repeat(129)));
        assert!(!validate_code_verifier(&format!("{VERIFIER}=")));
    }

    #[test]
    fn test_code_challenge_format() {
        assert!(validate_code_challenge(CHALLENGE));
        assert!(!validate_code_challenge("E9Melhoa2OwvFrEMTJguCHaoeK1t8URW"));
        assert!(!validate_code_challenge(
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw.cM"
        ));
    }
}
