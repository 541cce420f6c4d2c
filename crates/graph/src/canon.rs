//! Canonical compact JSON, the pre-image of content hashes.
//!
//! The rules are fixed for all time, because the hashes are identifiers:
//! object keys sorted by Unicode code point, null-valued keys dropped,
//! integers without a decimal point, floats in shortest round-trip decimal
//! form, strings with standard JSON escaping. Arrays preserve element order
//! and recurse.

use super::{Field, Value};
use std::borrow::Cow;
use std::collections::HashSet;

/// Render a property map in canonical form. An empty map (or one that is
/// empty after null-valued keys are dropped) renders as the empty string, not
/// `{}`; a stored null property is indistinguishable from an absent one.
pub fn canonical_properties(fields: &[Field]) -> String {
    let canonical = canonical_fields(fields);
    if canonical.is_empty() {
        return String::new();
    }
    let mut out = String::with_capacity(64);
    write_object(&canonical, &mut out);
    out
}

/// Canonicalize map keys: duplicate input keys are suffixed `_1`, `_2`, … in
/// input order, null-valued entries are dropped, and the result is sorted by
/// code point.
pub fn canonical_fields(fields: &[Field]) -> Vec<(Cow<'_, str>, &Value)> {
    let mut used: HashSet<Cow<'_, str>> = HashSet::with_capacity(fields.len());
    let mut out: Vec<(Cow<'_, str>, &Value)> = Vec::with_capacity(fields.len());

    for field in fields {
        let key = dedup_key(Cow::Borrowed(field.property.as_str()), &mut used);
        if !matches!(field.value, Value::Null) {
            out.push((key, &field.value));
        }
    }
    out.sort_by(|(a, _), (b, _)| a.cmp(b));
    out
}

/// Claim a unique spelling of `key` against `used`, probing `key_1`, `key_2`,
/// … on collision. Shared by hashing and by display serialization, which both
/// promise unique keys per object.
pub fn dedup_key<'a>(key: Cow<'a, str>, used: &mut HashSet<Cow<'a, str>>) -> Cow<'a, str> {
    if used.insert(key.clone()) {
        return key;
    }
    let mut n = 1u32;
    loop {
        let candidate: Cow<'a, str> = Cow::Owned(format!("{key}_{n}"));
        if used.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

/// Append the canonical rendering of one value.
pub fn canonical_value(value: &Value, out: &mut String) {
    use std::fmt::Write;
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        Value::Int(i) => {
            let _ = write!(out, "{i}");
        }
        Value::UInt(u) => {
            let _ = write!(out, "{u}");
        }
        Value::Float(f) => {
            // Display for f64 is the shortest decimal that round-trips.
            let _ = write!(out, "{f}");
        }
        Value::Special(s) => write_escaped(s.as_str(), out),
        Value::String(s) => write_escaped(s, out),
        Value::Bytes(b) => write_escaped(&base64::encode(b), out),
        Value::Temporal(t) => write_escaped(&t.truncate_to_100ns().to_iso_string(), out),
        Value::Point(p) => {
            let _ = write!(out, "{{\"srid\":{},\"x\":{},\"y\":{}", p.srid, p.x, p.y);
            if let Some(z) = p.z {
                let _ = write!(out, ",\"z\":{z}");
            }
            out.push('}');
        }
        Value::List(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                canonical_value(item, out);
            }
            out.push(']');
        }
        Value::Map(fields) => {
            write_object(&canonical_fields(fields), out);
        }
        Value::Unrecognized(name) => {
            out.push_str("{\"_note\":\"unserializable_type\",\"_type\":");
            write_escaped(name, out);
            out.push('}');
        }
        // Graph elements cannot occur as stored properties; canonicalize to
        // their element id so the function is total.
        Value::Node(n) => write_element_ref(&n.element_id, out),
        Value::Relationship(r) => write_element_ref(&r.element_id, out),
        Value::Path(p) => {
            let id = p.nodes.first().map(|n| n.element_id.as_str()).unwrap_or("");
            write_element_ref(id, out);
        }
    }
}

fn write_object(fields: &[(Cow<'_, str>, &Value)], out: &mut String) {
    out.push('{');
    for (i, (key, value)) in fields.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        write_escaped(key, out);
        out.push(':');
        canonical_value(value, out);
    }
    out.push('}');
}

fn write_element_ref(element_id: &str, out: &mut String) {
    out.push_str("{\"element_id\":");
    write_escaped(element_id, out);
    out.push('}');
}

/// Standard JSON string escaping: quote, backslash, and control characters.
/// Everything else passes through as UTF-8.
pub fn write_escaped(s: &str, out: &mut String) {
    use std::fmt::Write;
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0c}' => out.push_str("\\f"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
}
