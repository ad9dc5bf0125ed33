//! Property-based tests for dsu-updater.
//!
//! # Properties Tested
//!
//! - Version comparison agrees with semver precedence and is antisymmetric
//! - Changing any byte of a signed binary invalidates its signature
//! - A signature from any trusted key verifies regardless of key order
//! - A signature from a key outside the set never verifies

#![cfg(test)]

use std::sync::Arc;

use proptest::prelude::*;
use semver::{Prerelease, Version};

use crate::keys::TrustedKeySet;
use crate::metadata::MetadataCodec;
use crate::testutil::{metadata_json, signed_metadata, TestSigner};
use crate::version::{is_newer, precedence};

// =============================================================================
// Generators
// =============================================================================

/// Generate a version, sometimes with a pre-release tag.
fn arb_version() -> impl Strategy<Value = Version> {
    (
        0u64..5,
        0u64..5,
        0u64..5,
        prop::option::of(prop_oneof![Just("alpha.1"), Just("beta"), Just("rc.2")]),
    )
        .prop_map(|(major, minor, patch, pre)| {
            let mut version = Version::new(major, minor, patch);
            if let Some(pre) = pre {
                version.pre = Prerelease::new(pre).unwrap();
            }
            version
        })
}

/// Generate binary content (1 byte to 4KB).
fn arb_binary() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 1..4096)
}

fn key_set(seeds: &[u8]) -> TrustedKeySet {
    TrustedKeySet::from_encoded(
        seeds.iter().map(|seed| TestSigner::from_seed(*seed).public_key_box()),
        true,
    )
    .unwrap()
}

// =============================================================================
// Version ordering
// =============================================================================

proptest! {
    #[test]
    fn prop_is_newer_matches_precedence(a in arb_version(), b in arb_version()) {
        let newer = is_newer(&a.to_string(), &b.to_string());
        prop_assert_eq!(newer, precedence(&b, &a) == std::cmp::Ordering::Greater);
    }

    #[test]
    fn prop_is_newer_is_antisymmetric(a in arb_version(), b in arb_version()) {
        let forward = is_newer(&a.to_string(), &b.to_string());
        let backward = is_newer(&b.to_string(), &a.to_string());
        prop_assert!(!(forward && backward));
        if a == b {
            prop_assert!(!forward);
        }
    }

    #[test]
    fn prop_build_metadata_never_makes_newer(v in arb_version(), build in "[a-z0-9]{1,8}") {
        let with_build = format!("{}+{}", v, build);
        prop_assert!(!is_newer(&v.to_string(), &with_build));
        prop_assert!(!is_newer(&with_build, &v.to_string()));
    }
}

// =============================================================================
// Signatures
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_tampered_binary_rejected(
        binary in arb_binary(),
        position in any::<prop::sample::Index>(),
        flip in 1u8..=255,
    ) {
        let signer = TestSigner::from_seed(3);
        let codec = MetadataCodec::new(Arc::new(key_set(&[3])));
        let json = metadata_json("2.0.0", "app-2.0.0.exe", &signer.sign(&binary), "");
        let metadata = codec.parse(&signed_metadata(&signer, &json)).unwrap();

        prop_assert!(metadata.verify_binary_bytes(&binary));

        let mut tampered = binary.clone();
        let index = position.index(tampered.len());
        tampered[index] ^= flip;
        prop_assert!(!metadata.verify_binary_bytes(&tampered));
    }

    #[test]
    fn prop_any_trusted_key_verifies(
        payload in arb_binary(),
        seeds in prop::sample::subsequence(vec![1u8, 2, 3, 4, 5], 1..=5).prop_shuffle(),
        pick in any::<prop::sample::Index>(),
        prehashed in any::<bool>(),
    ) {
        let signer = TestSigner::from_seed(seeds[pick.index(seeds.len())]);
        let signature = if prehashed {
            signer.sign_prehashed(&payload)
        } else {
            signer.sign(&payload)
        };

        prop_assert!(key_set(&seeds).verify(&payload, &signature));
    }

    #[test]
    fn prop_untrusted_key_never_verifies(
        payload in arb_binary(),
        seeds in prop::sample::subsequence(vec![1u8, 2, 3, 4, 5], 1..=5),
    ) {
        let outsider = TestSigner::from_seed(200);
        prop_assert!(!key_set(&seeds).verify(&payload, &outsider.sign(&payload)));
        prop_assert!(!key_set(&seeds).verify(&payload, &outsider.sign_prehashed(&payload)));
    }
}
