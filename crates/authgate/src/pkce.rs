//! PKCE (Proof Key for Code Exchange) implementation.
//!
//! PKCE (RFC 7636) binds an authorization request to the party that later
//! redeems the code. Each attempt also gets an opaque `state` used as the
//! transaction key.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::random::RandomSource;

/// The only challenge method this engine emits.
pub const CHALLENGE_METHOD: &str = "S256";

/// Random bytes behind a verifier; encodes to 43 characters.
const VERIFIER_BYTES: usize = 32;

/// PKCE verifier/challenge pair bound to a state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pkce {
    /// Code verifier (random string, kept secret).
    pub code_verifier: String,
    /// Code challenge (base64url SHA-256 of the verifier).
    pub code_challenge: String,
    /// Challenge method (always `S256`).
    pub code_challenge_method: String,
    /// Per-attempt opaque state.
    pub state: String,
}

impl Pkce {
    /// Generates a new PKCE triple.
    ///
    /// A caller-supplied `state` resumes a known transaction; otherwise a
    /// fresh random UUID is used.
    ///
    /// # Errors
    ///
    /// Returns an error if no secure random source is available.
    pub fn generate(random: &dyn RandomSource, state: Option<String>) -> Result<Self> {
        let code_verifier = URL_SAFE_NO_PAD.encode(random.random_bytes(VERIFIER_BYTES)?);
        let code_challenge = compute_challenge(&code_verifier);
        let state = match state {
            Some(state) => state,
            None => random_uuid(random)?,
        };

        Ok(Self {
            code_verifier,
            code_challenge,
            code_challenge_method: CHALLENGE_METHOD.to_string(),
            state,
        })
    }
}

/// Computes the S256 code challenge for a verifier.
#[must_use]
pub fn compute_challenge(verifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// Generates a v4 UUID string from the given random source.
///
/// # Errors
///
/// Returns an error if no secure random source is available.
pub fn random_uuid(random: &dyn RandomSource) -> Result<String> {
    let mut bytes = [0u8; 16];
    random.fill(&mut bytes)?;
    Ok(uuid::Builder::from_random_bytes(bytes)
        .into_uuid()
        .to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::random::SystemRandom;
    use proptest::prelude::*;

    fn is_pkce_char(c: char) -> bool {
        c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~')
    }

    #[test]
    fn test_pkce_generation() {
        let pkce = Pkce::generate(&SystemRandom::default(), None).unwrap();
        assert_eq!(pkce.code_challenge_method, "S256");
        assert_ne!(pkce.code_verifier, pkce.code_challenge);
        assert!(uuid::Uuid::parse_str(&pkce.state).is_ok());
    }

    #[test]
    fn test_caller_state_is_kept() {
        let pkce = Pkce::generate(&SystemRandom::default(), Some("123-xeab".into())).unwrap();
        assert_eq!(pkce.state, "123-xeab");
    }

    #[test]
    fn test_known_challenge() {
        // RFC 7636 appendix B
        assert_eq!(
            compute_challenge("dBjftJeZ4CVP-1mB0K1Qt4xd5Q0bL8YdL6wOwIZMOqk"),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn test_multiple_generations_unique() {
        let random = SystemRandom::default();
        let a = Pkce::generate(&random, None).unwrap();
        let b = Pkce::generate(&random, None).unwrap();
        assert_ne!(a.code_verifier, b.code_verifier);
        assert_ne!(a.state, b.state);
    }

    proptest! {
        #[test]
        fn prop_challenge_matches_verifier(_seed in any::<u64>()) {
            let pkce = Pkce::generate(&SystemRandom::default(), None).unwrap();
            prop_assert_eq!(&pkce.code_challenge, &compute_challenge(&pkce.code_verifier));
            prop_assert!((43..=128).contains(&pkce.code_verifier.len()));
            prop_assert!(pkce.code_verifier.chars().all(is_pkce_char));
        }
    }
}
