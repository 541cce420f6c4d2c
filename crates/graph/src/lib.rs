//! The property-graph value model shared by the export engine.
//!
//! `Value` is a closed tagged union over everything a Neo4j driver can hand
//! back. Ownership moves into the union at the client boundary, so nothing
//! downstream holds driver handles alive.

mod value;
pub use value::{Field, Node, Path, Relationship, SpecialFloat, Value};

// Temporal values carry driver-supplied date/time/duration representations.
pub mod temporal;
pub use temporal::{GraphDuration, Temporal};

mod point;
pub use point::Point;

// Canonical compact JSON used as the hash pre-image.
pub mod canon;

// Deterministic content-addressed identifiers.
mod hash;
pub use hash::{node_content_hash, relationship_identity_hash};
