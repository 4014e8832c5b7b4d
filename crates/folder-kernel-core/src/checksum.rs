//! Heuristic change-detection checksum.
//!
//! A 32-bit rolling hash (`h * 31 + unit`) over UTF-16 code units. It is only
//! good for answering "did anything change since the last backup"; collisions
//! are possible and nothing security-relevant may depend on it.

use serde_json::Value;

/// Rolling 32-bit hash of `input`, wrapping on overflow.
#[must_use]
pub fn rolling_hash(input: &str) -> i32 {
    input
        .encode_utf16()
        .fold(0_i32, |hash, unit| hash.wrapping_shl(5).wrapping_sub(hash).wrapping_add(i32::from(unit)))
}

/// Checksum of a JSON value's compact serialization, as signed decimal text.
#[must_use]
pub fn checksum_json(value: &Value) -> String {
    rolling_hash(&value.to_string()).to_string()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn empty_input_hashes_to_zero() {
        assert_eq!(rolling_hash(""), 0);
    }

    #[test]
    fn matches_known_small_values() {
        assert_eq!(rolling_hash("a"), 97);
        assert_eq!(rolling_hash("ab"), 97 * 31 + 98);
    }

    #[test]
    fn long_input_wraps_instead_of_overflowing() {
        let text = "folder taxonomy ".repeat(200);
        assert_eq!(rolling_hash(&text), rolling_hash(&text));
    }

    #[test]
    fn checksum_tracks_content_changes() {
        let before = json!({"folders": [{"id": "a", "name": "Root"}]});
        let after = json!({"folders": [{"id": "a", "name": "Root2"}]});
        assert_eq!(checksum_json(&before), checksum_json(&before.clone()));
        assert_ne!(checksum_json(&before), checksum_json(&after));
    }
}
