//! Shared-secret check for the control endpoints.
//!
//! Both sides are hashed to fixed-width digests before comparison, so the
//! comparison time depends on neither the secret's length nor the position
//! of the first differing byte.

use sha2::{Digest, Sha256};

#[derive(Clone)]
pub struct SharedSecret {
    digest: [u8; 32],
}

impl std::fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SharedSecret(<REDACTED>)")
    }
}

impl SharedSecret {
    pub fn new(secret: &str) -> Self {
        Self {
            digest: digest(secret),
        }
    }

    pub fn verify(&self, candidate: &str) -> bool {
        let other = digest(candidate);
        let diff = self
            .digest
            .iter()
            .zip(other.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b));
        diff == 0
    }
}

fn digest(s: &str) -> [u8; 32] {
    Sha256::digest(s.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_matches_only_the_exact_secret() {
        let s = SharedSecret::new("open sesame");
        assert!(s.verify("open sesame"));
        assert!(!s.verify("open sesame "));
        assert!(!s.verify("Open sesame"));
        assert!(!s.verify(""));
    }

    #[test]
    fn debug_is_redacted() {
        let s = SharedSecret::new("open sesame");
        assert!(!format!("{s:?}").contains("sesame"));
    }
}
