//! Version comparison and channel selection.
//!
//! Ordering follows semantic-version precedence: pre-release identifiers
//! participate, build metadata does not.

use std::cmp::Ordering;

use semver::{Prerelease, Version};

/// Channel used when the running version carries no named pre-release.
pub const DEFAULT_CHANNEL: &str = "latest";

/// Whether `candidate` is strictly newer than `current`.
///
/// Returns false if either string is not a valid semantic version.
pub fn is_newer(current: &str, candidate: &str) -> bool {
    match (Version::parse(current), Version::parse(candidate)) {
        (Ok(current), Ok(candidate)) => is_newer_version(&current, &candidate),
        _ => false,
    }
}

/// Whether `candidate` is strictly newer than `current`, ignoring build
/// metadata.
pub fn is_newer_version(current: &Version, candidate: &Version) -> bool {
    precedence(candidate, current) == Ordering::Greater
}

/// Semantic-version precedence.
///
/// `semver::Version`'s `Ord` also orders by build metadata, which precedence
/// ignores.
pub fn precedence(a: &Version, b: &Version) -> Ordering {
    (a.major, a.minor, a.patch, &a.pre).cmp(&(b.major, b.minor, b.patch, &b.pre))
}

/// Update channel for a running version.
///
/// The first pre-release identifier names the channel when it is not purely
/// numeric, so `2.1.0-beta.3` follows `beta`. Everything else follows
/// [`DEFAULT_CHANNEL`].
pub fn channel_name(version: &Version) -> String {
    channel_of(&version.pre).unwrap_or_else(|| DEFAULT_CHANNEL.to_string())
}

fn channel_of(pre: &Prerelease) -> Option<String> {
    let first = pre.as_str().split('.').next()?;
    if first.is_empty() || first.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(first.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_newer_basic() {
        assert!(is_newer("0.0.1", "0.0.2"));
        assert!(!is_newer("0.0.1", "0.0.1"));
        assert!(!is_newer("0.0.2", "0.0.1"));
    }

    #[test]
    fn test_is_newer_prerelease() {
        assert!(is_newer("0.0.1-alpha", "0.0.1"));
        assert!(is_newer("0.0.1-alpha", "0.0.1-beta"));
        assert!(!is_newer("0.0.1", "0.0.1-beta"));
        assert!(is_newer("1.0.0-beta.2", "1.0.0-beta.11"));
    }

    #[test]
    fn test_is_newer_numeric_not_lexical() {
        assert!(is_newer("0.0.9", "0.0.10"));
        assert!(is_newer("0.9.0", "0.10.0"));
        assert!(!is_newer("0.0.99999999999", "0.0.1"));
    }

    #[test]
    fn test_is_newer_invalid_versions() {
        assert!(!is_newer("0.0.1", "latest"));
        assert!(!is_newer("0.0.1", ""));
        assert!(!is_newer("garbage", "0.0.2"));
        assert!(!is_newer("0.0.1", "v0.0.2"));
    }

    #[test]
    fn test_build_metadata_ignored() {
        let current = Version::parse("1.2.3+build.1").unwrap();
        let candidate = Version::parse("1.2.3+build.2").unwrap();
        assert!(!is_newer_version(&current, &candidate));
        assert_eq!(precedence(&current, &candidate), Ordering::Equal);
    }

    #[test]
    fn test_channel_name() {
        assert_eq!(channel_name(&Version::parse("1.0.0").unwrap()), "latest");
        assert_eq!(channel_name(&Version::parse("2.1.0-beta.3").unwrap()), "beta");
        assert_eq!(channel_name(&Version::parse("2.1.0-alpha").unwrap()), "alpha");
        assert_eq!(channel_name(&Version::parse("2.1.0-7").unwrap()), "latest");
        assert_eq!(channel_name(&Version::parse("2.1.0+nightly").unwrap()), "latest");
    }
}
