//! Trusted signing keys.
//!
//! Holds the ordered set of minisign public keys that metadata and binaries
//! are checked against. A signature is accepted when any one key in the set
//! validates it, so a new key can be rolled out next to the old one without
//! breaking clients that still see signatures from the previous key.

use std::fmt;

use minisign_verify::{PublicKey, Signature};
use tracing::debug;

use crate::error::UpdateError;

/// An ordered, non-empty set of minisign public keys.
pub struct TrustedKeySet {
    keys: Vec<PublicKey>,
    allow_legacy: bool,
}

impl TrustedKeySet {
    /// Decode a set of public keys.
    ///
    /// Each entry is either the two-line minisign public key box
    /// (`untrusted comment: ...` followed by the base64 key) or the bare
    /// base64 key line.
    ///
    /// `allow_legacy` accepts signatures over the raw payload in addition to
    /// the prehashed (BLAKE2b) mode.
    ///
    /// # Errors
    ///
    /// Returns `InvalidKey` if any entry fails to decode, and `ConfigError`
    /// if the set would be empty.
    pub fn from_encoded<I, S>(encoded: I, allow_legacy: bool) -> Result<Self, UpdateError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keys = encoded
            .into_iter()
            .map(|key| decode_public_key(key.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;

        if keys.is_empty() {
            return Err(UpdateError::ConfigError(
                "at least one trusted signing key is required".to_string(),
            ));
        }

        Ok(Self { keys, allow_legacy })
    }

    /// Number of keys in the set.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Always false; an empty set cannot be constructed.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Check a detached signature over `data` against every key in order,
    /// stopping at the first key that accepts it.
    ///
    /// An empty or undecodable signature is never valid.
    pub fn verify(&self, data: &[u8], signature: &str) -> bool {
        if signature.trim().is_empty() {
            debug!("empty signature rejected");
            return false;
        }

        let signature = match Signature::decode(signature) {
            Ok(signature) => signature,
            Err(e) => {
                debug!(error = %e, "signature could not be decoded");
                return false;
            }
        };

        self.keys
            .iter()
            .enumerate()
            .any(|(index, key)| match key.verify(data, &signature, self.allow_legacy) {
                Ok(()) => {
                    debug!(key_index = index, "signature accepted");
                    true
                }
                Err(e) => {
                    debug!(key_index = index, error = %e, "key did not validate signature");
                    false
                }
            })
    }
}

impl fmt::Debug for TrustedKeySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrustedKeySet")
            .field("keys", &self.keys.len())
            .field("allow_legacy", &self.allow_legacy)
            .finish()
    }
}

fn decode_public_key(encoded: &str) -> Result<PublicKey, UpdateError> {
    let trimmed = encoded.trim();
    let decoded = if trimmed.starts_with("untrusted comment:") {
        PublicKey::decode(trimmed)
    } else {
        PublicKey::from_base64(trimmed)
    };
    decoded.map_err(|e| UpdateError::InvalidKey(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::TestSigner;

    #[test]
    fn test_empty_key_set_rejected() {
        let result = TrustedKeySet::from_encoded(Vec::<String>::new(), true);
        assert!(matches!(result, Err(UpdateError::ConfigError(_))));
    }

    #[test]
    fn test_malformed_key_rejected() {
        let result = TrustedKeySet::from_encoded(["not a key"], true);
        assert!(matches!(result, Err(UpdateError::InvalidKey(_))));
    }

    #[test]
    fn test_box_and_bare_key_forms() {
        let signer = TestSigner::from_seed(3);
        let keys = TrustedKeySet::from_encoded([signer.public_key_box(), signer.public_key_line()], true)
            .unwrap();
        assert_eq!(keys.len(), 2);
        assert!(!keys.is_empty());
    }

    #[test]
    fn test_any_key_in_set_validates() {
        let trusted_a = TestSigner::from_seed(1);
        let trusted_b = TestSigner::from_seed(2);
        let keys = TrustedKeySet::from_encoded(
            [trusted_a.public_key_box(), trusted_b.public_key_box()],
            true,
        )
        .unwrap();

        let data = b"payload";
        assert!(keys.verify(data, &trusted_a.sign(data)));
        assert!(keys.verify(data, &trusted_b.sign(data)));
    }

    #[test]
    fn test_untrusted_key_rejected() {
        let trusted = TestSigner::from_seed(1);
        let outsider = TestSigner::from_seed(9);
        let keys = TrustedKeySet::from_encoded([trusted.public_key_box()], true).unwrap();

        assert!(!keys.verify(b"payload", &outsider.sign(b"payload")));
    }

    #[test]
    fn test_signature_bound_to_payload() {
        let signer = TestSigner::from_seed(1);
        let keys = TrustedKeySet::from_encoded([signer.public_key_box()], true).unwrap();

        let signature = signer.sign(b"first payload");
        assert!(!keys.verify(b"second payload", &signature));
    }

    #[test]
    fn test_empty_and_garbage_signatures_rejected() {
        let signer = TestSigner::from_seed(1);
        let keys = TrustedKeySet::from_encoded([signer.public_key_box()], true).unwrap();

        assert!(!keys.verify(b"payload", ""));
        assert!(!keys.verify(b"payload", "helloworldsignature"));
    }

    #[test]
    fn test_prehashed_signature_accepted() {
        let signer = TestSigner::from_seed(4);
        let keys = TrustedKeySet::from_encoded([signer.public_key_box()], false).unwrap();

        assert!(keys.verify(b"payload", &signer.sign_prehashed(b"payload")));
    }

    #[test]
    fn test_legacy_signature_needs_opt_in() {
        let signer = TestSigner::from_seed(4);
        let strict = TrustedKeySet::from_encoded([signer.public_key_box()], false).unwrap();
        let lenient = TrustedKeySet::from_encoded([signer.public_key_box()], true).unwrap();

        let signature = signer.sign(b"payload");
        assert!(!strict.verify(b"payload", &signature));
        assert!(lenient.verify(b"payload", &signature));
    }
}
