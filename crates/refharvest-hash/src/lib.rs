#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **refharvest-hash** – Deterministic content hashing of raw harvester
//! payloads.
//!
//! Each harvester adapter declares a list of [`HashKey`]s naming the fields
//! of its raw payload that determine whether a reference has meaningfully
//! changed since it was last recorded. This crate turns a payload and a
//! hash-key list into a single stable digest string, independent of field
//! order in the source JSON and of list-element order for fields that don't
//! carry ordering semantics.

use refharvest_types::HashKey;
use semver::Version;
use sha2::{Digest, Sha256};

/// Digest algorithm tag prefixed to every hash this crate produces, so a
/// future algorithm change can be detected rather than silently compared
/// against hashes it didn't produce.
const ALGORITHM_TAG: &str = "sha256";

/// Compute the content digest of `payload` over `keys`, for a harvester at
/// `version`.
///
/// `version` is folded into the digest prefix so that a converter upgrade
/// invalidates every hash it previously produced, even when the raw payload
/// is byte-for-byte identical - otherwise a field the new converter version
/// extracts differently, but that happens to compare equal under the old
/// `keys`, would be classified as `unchanged` across the upgrade.
///
/// Fields are read from `payload` in the order `keys` lists them -
/// reordering `keys` changes the digest, by design, since hash keys are
/// fixed per harvester version. A field absent from `payload` is treated as
/// JSON `null`. Within a single field, if the field's value is a JSON array
/// and the corresponding `HashKey::ordered` is `false`, the array's elements
/// are sorted by their canonical JSON encoding before being folded into the
/// digest; this lets adapters treat semantically-unordered lists (e.g.
/// contributor sets arriving in source-API order) as equal regardless of
/// how the source happened to order them.
///
/// Returns a string of the form `"sha256:<64 lowercase hex chars>"`.
pub fn digest(payload: &serde_json::Value, keys: &[HashKey], version: &Version) -> String {
    let mut hasher = Sha256::new();
    hasher.update(version.to_string().as_bytes());
    hasher.update([0u8]); // separates the version prefix from the fields
    for key in keys {
        let value = payload.get(&key.name).cloned().unwrap_or(serde_json::Value::Null);
        let canonical = canonicalize(&value, key.ordered);
        hasher.update(key.name.as_bytes());
        hasher.update([0u8]); // separates the field name from its value
        hasher.update(canonical.as_bytes());
        hasher.update([0u8]); // separates this field from the next
    }
    format!("{ALGORITHM_TAG}:{}", hex::encode(hasher.finalize()))
}

/// Produce a canonical JSON string for `value`: object keys sorted
/// (`serde_json` does this by default when the `preserve_order` feature is
/// off), and, when `!ordered`, array elements sorted by their own canonical
/// encoding.
fn canonicalize(value: &serde_json::Value, ordered: bool) -> String {
    match value {
        serde_json::Value::Array(items) if !ordered => {
            let mut rendered: Vec<String> = items.iter().map(|v| canonicalize(v, ordered)).collect();
            rendered.sort();
            format!("[{}]", rendered.join(","))
        }
        serde_json::Value::Array(items) => {
            let rendered: Vec<String> = items.iter().map(|v| canonicalize(v, ordered)).collect();
            format!("[{}]", rendered.join(","))
        }
        serde_json::Value::Object(map) => {
            let mut entries: Vec<(String, String)> = map
                .iter()
                .map(|(k, v)| (k.clone(), canonicalize(v, ordered)))
                .collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let joined = entries
                .into_iter()
                .map(|(k, v)| format!("{}:{}", serde_json::Value::String(k), v))
                .collect::<Vec<_>>()
                .join(",");
            format!("{{{joined}}}")
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn v(major: u64) -> Version {
        Version::new(major, 0, 0)
    }

    #[test]
    fn same_payload_same_keys_is_stable() {
        let payload = json!({"title": "A title", "authors": ["A", "B"]});
        let keys = vec![HashKey::unordered("title"), HashKey::unordered("authors")];
        assert_eq!(digest(&payload, &keys, &v(1)), digest(&payload, &keys, &v(1)));
    }

    #[test]
    fn unordered_key_ignores_array_order() {
        let a = json!({"authors": ["A", "B"]});
        let b = json!({"authors": ["B", "A"]});
        let keys = vec![HashKey::unordered("authors")];
        assert_eq!(digest(&a, &keys, &v(1)), digest(&b, &keys, &v(1)));
    }

    #[test]
    fn ordered_key_is_sensitive_to_array_order() {
        let a = json!({"authors": ["A", "B"]});
        let b = json!({"authors": ["B", "A"]});
        let keys = vec![HashKey::ordered("authors")];
        assert_ne!(digest(&a, &keys, &v(1)), digest(&b, &keys, &v(1)));
    }

    #[test]
    fn missing_field_is_treated_as_null() {
        let a = json!({});
        let b = json!({"title": null});
        let keys = vec![HashKey::unordered("title")];
        assert_eq!(digest(&a, &keys, &v(1)), digest(&b, &keys, &v(1)));
    }

    #[test]
    fn irrelevant_field_does_not_affect_digest() {
        let a = json!({"title": "A title", "noise": 1});
        let b = json!({"title": "A title", "noise": 2});
        let keys = vec![HashKey::unordered("title")];
        assert_eq!(digest(&a, &keys, &v(1)), digest(&b, &keys, &v(1)));
    }

    #[test]
    fn different_key_order_changes_digest() {
        let payload = json!({"title": "T", "subtitle": "S"});
        let forward = vec![HashKey::unordered("title"), HashKey::unordered("subtitle")];
        let reversed = vec![HashKey::unordered("subtitle"), HashKey::unordered("title")];
        assert_ne!(digest(&payload, &forward, &v(1)), digest(&payload, &reversed, &v(1)));
    }

    #[test]
    fn different_harvester_version_changes_digest() {
        let payload = json!({"title": "A title", "authors": ["A", "B"]});
        let keys = vec![HashKey::unordered("title"), HashKey::unordered("authors")];
        let v1 = Version::new(1, 0, 0);
        let v2 = Version::new(2, 0, 0);
        assert_ne!(digest(&payload, &keys, &v1), digest(&payload, &keys, &v2));
    }

    proptest::proptest! {
        #[test]
        fn digest_is_deterministic_for_arbitrary_strings(a in ".*", b in ".*") {
            let payload = json!({"title": a, "subtitle": b});
            let keys = vec![HashKey::unordered("title"), HashKey::unordered("subtitle")];
            proptest::prop_assert_eq!(digest(&payload, &keys, &v(1)), digest(&payload, &keys, &v(1)));
        }
    }
}
