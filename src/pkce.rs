//! Random secrets for the Gmail consent round-trip and for session tokens.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::Rng;
use sha2::{Digest, Sha256};

fn random_urlsafe<const N: usize>() -> String {
    let bytes: [u8; N] = rand::rng().random();
    URL_SAFE_NO_PAD.encode(bytes)
}

/// PKCE code verifier: 64 URL-safe characters (RFC 7636 allows 43-128).
#[must_use]
pub fn generate_code_verifier() -> String {
    random_urlsafe::<48>()
}

/// S256 challenge: `BASE64URL(SHA256(verifier))`.
#[must_use]
pub fn generate_code_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// Anti-forgery `state` for the consent redirect.
#[must_use]
pub fn generate_state() -> String {
    random_urlsafe::<16>()
}

/// Opaque session token (256 bits).
#[must_use]
pub fn generate_session_token() -> String {
    random_urlsafe::<32>()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_urlsafe(s: &str) -> bool {
        s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    }

    #[test]
    fn verifier_is_rfc7636_sized_and_urlsafe() {
        let v = generate_code_verifier();
        assert_eq!(v.len(), 64);
        assert!(is_urlsafe(&v), "not URL-safe: {v}");
    }

    #[test]
    fn challenge_matches_rfc7636_appendix_b() {
        assert_eq!(
            generate_code_challenge("dBjftJeZ4CVP-mB92K27uhbUJU1p1r7wW1gFWFOEjXk"),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn state_and_session_tokens_are_fresh() {
        assert_eq!(generate_state().len(), 22);
        assert_eq!(generate_session_token().len(), 43);
        assert_ne!(generate_session_token(), generate_session_token());
        assert_ne!(generate_state(), generate_state());
    }
}
