//! Content-addressed identifiers.
//!
//! Node identity is a function of what the node *is* (labels + properties),
//! relationship identity is a function of type, source-assigned endpoint ids,
//! and properties. Using source endpoint ids, not endpoint content hashes,
//! keeps relationship hashes stable across exports that re-hash endpoints.

use super::{canon, Field};
use itertools::Itertools;
use sha2::{Digest, Sha256};

/// SHA-256 over `"node:" + sorted_labels_joined_with_'+' + ":" + canonical_properties`,
/// as 64 lowercase hex characters. An empty label set renders as the empty
/// string, as does an empty property map.
pub fn node_content_hash(labels: &[String], properties: &[Field]) -> String {
    let sorted_labels = labels.iter().sorted().join("+");
    let props = canon::canonical_properties(properties);

    let mut hasher = Sha256::new();
    hasher.update(b"node:");
    hasher.update(sorted_labels.as_bytes());
    hasher.update(b":");
    hasher.update(props.as_bytes());
    hex::encode(hasher.finalize())
}

/// SHA-256 over `"rel:" + type + ":" + start_element_id + ":" + end_element_id
/// + ":" + canonical_properties`, as 64 lowercase hex characters.
pub fn relationship_identity_hash(
    rel_type: &str,
    start_element_id: &str,
    end_element_id: &str,
    properties: &[Field],
) -> String {
    let props = canon::canonical_properties(properties);

    let mut hasher = Sha256::new();
    hasher.update(b"rel:");
    hasher.update(rel_type.as_bytes());
    hasher.update(b":");
    hasher.update(start_element_id.as_bytes());
    hasher.update(b":");
    hasher.update(end_element_id.as_bytes());
    hasher.update(b":");
    hasher.update(props.as_bytes());
    hex::encode(hasher.finalize())
}
