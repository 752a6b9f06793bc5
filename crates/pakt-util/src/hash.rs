use sha1::{Digest, Sha1};

/// Compute the SHA-1 digest of a byte slice, returning lowercase hex.
///
/// This is the format npm registries publish as `dist.shasum`.
#[must_use]
pub fn sha1_hex(data: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Compare a computed hex digest with an expected one, ignoring case and
/// surrounding whitespace.
#[must_use]
pub fn digest_matches(actual: &str, expected: &str) -> bool {
    actual.trim().eq_ignore_ascii_case(expected.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha1_hex() {
        // Known SHA-1 of "hello world"
        assert_eq!(
            sha1_hex(b"hello world"),
            "2aae6c35c94fcfb415dbe95f408b9ce91ee846ed"
        );
    }

    #[test]
    fn test_sha1_hex_empty() {
        assert_eq!(sha1_hex(b""), "da39a3ee5e6b4b0d3255bfef95601890afd80709");
    }

    #[test]
    fn test_digest_matches_ignores_case() {
        assert!(digest_matches(
            "2aae6c35c94fcfb415dbe95f408b9ce91ee846ed",
            "2AAE6C35C94FCFB415DBE95F408B9CE91EE846ED\n"
        ));
        assert!(!digest_matches("abc", "abd"));
    }
}
