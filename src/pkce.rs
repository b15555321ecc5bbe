use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::{TryRngCore, rngs::OsRng};
use sha2::{Digest, Sha256};

use crate::AuthError;

const VERIFIER_BYTES: usize = 32;
const NONCE_BYTES: usize = 16;

#[derive(Debug, Clone)]
pub struct PkcePair {
    pub code_verifier: String,
    pub code_challenge: String,
}

impl PkcePair {
    pub fn generate() -> Result<Self, AuthError> {
        Ok(Self::from_verifier(random_string(VERIFIER_BYTES)?))
    }

    pub fn from_verifier(code_verifier: impl Into<String>) -> Self {
        let code_verifier = code_verifier.into();
        let mut hasher = Sha256::new();
        hasher.update(code_verifier.as_bytes());
        let digest = hasher.finalize();
        let code_challenge = URL_SAFE_NO_PAD.encode(digest);
        Self {
            code_verifier,
            code_challenge,
        }
    }
}

/// One-time value binding a `/signin` request to its `/callback`.
///
/// URL-safe so it survives query-string round trips without re-encoding.
pub(crate) fn generate_nonce() -> Result<String, AuthError> {
    random_string(NONCE_BYTES)
}

fn random_string(len: usize) -> Result<String, AuthError> {
    let mut bytes = vec![0u8; len];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|err| AuthError::OsRng {
            message: err.to_string(),
        })?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::{PkcePair, generate_nonce};

    #[test]
    fn generates_url_safe_pkce() {
        let pkce = PkcePair::generate().unwrap();
        for value in [&pkce.code_verifier, &pkce.code_challenge] {
            assert!(!value.contains('='), "pkce values should be unpadded");
            assert!(!value.contains('+'), "pkce values should be url safe");
            assert!(!value.contains('/'), "pkce values should be url safe");
        }
    }

    #[test]
    fn nonces_are_fresh() {
        let first = generate_nonce().unwrap();
        let second = generate_nonce().unwrap();
        assert_ne!(first, second);
        assert_eq!(first.len(), 22);
    }
}
