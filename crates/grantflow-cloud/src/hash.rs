//! Structural fingerprints for constraint variants
//!
//! A fingerprint is xxh3-64 over a canonical text form in which map entries
//! appear in ascending key order. xxh3 is seedless here, so fingerprints are
//! stable across processes and can be persisted in state files.

use crate::constraint::ConstraintKind;
use std::collections::HashMap;
use xxhash_rust::xxh3::xxh3_64;

/// Fixed-width structural hash
pub type Fingerprint = u64;

/// Canonical text form of a constraint variant
///
/// `<kind>-<k1>-<v1>-<k2>-<v2>-` with keys sorted ascending. An empty
/// mapping contributes nothing, so every empty variant has the same form.
///
/// Keys and values are not escaped: `{"a-b": "c"}` and `{"a": "b-c"}` share a
/// form and therefore a fingerprint, and a change between the two plans no
/// change. Escaping would alter every persisted fingerprint.
pub fn canonical_form(kind: ConstraintKind, context: &HashMap<String, String>) -> String {
    if context.is_empty() {
        return String::new();
    }

    let mut keys: Vec<&String> = context.keys().collect();
    keys.sort();

    let mut buf = String::with_capacity(kind.as_str().len() + 1);
    buf.push_str(kind.as_str());
    buf.push('-');
    for key in keys {
        buf.push_str(key);
        buf.push('-');
        buf.push_str(&context[key]);
        buf.push('-');
    }
    buf
}

/// Fingerprint a constraint variant
pub fn fingerprint(kind: ConstraintKind, context: &HashMap<String, String>) -> Fingerprint {
    hash_str(&canonical_form(kind, context))
}

pub fn hash_str(s: &str) -> Fingerprint {
    xxh3_64(s.as_bytes())
}

/// Combine member fingerprints into one, independent of input order
pub fn combine(fingerprints: impl IntoIterator<Item = Fingerprint>) -> Fingerprint {
    let mut sorted: Vec<Fingerprint> = fingerprints.into_iter().collect();
    sorted.sort_unstable();
    sorted.dedup();

    let mut bytes = Vec::with_capacity(sorted.len() * 8);
    for fp in sorted {
        bytes.extend_from_slice(&fp.to_le_bytes());
    }
    xxh3_64(&bytes)
}
