//! The polymorphic value serializer: a single recursive dispatch on the
//! `Value` tag with three cross-cutting limits (string, binary, collection)
//! plus a depth ceiling. Over-limit values degrade to truncation markers
//! rather than failing the record; the only hard failure is the per-record
//! byte cap, which the orchestrator recovers by rewinding the buffer.

mod path;

use crate::accum::Severity;
use crate::config::SerLimits;
use crate::jsonbuf::{JsonBuf, JsonBufError};
use graph::{canon, Node, Relationship, SpecialFloat, Value};
use sha2::{Digest, Sha256};
use std::borrow::Cow;
use std::collections::HashSet;

/// Property keys longer than this are truncated…
pub const MAX_PROPERTY_KEY_CHARS: usize = 1_000;
/// …to this many characters plus a `"..."` suffix.
pub const KEY_TRUNCATE_TO_CHARS: usize = 997;
/// Over-limit strings keep this many characters as `_prefix`.
const STRING_PREFIX_CHARS: usize = 1_000;

/// A problem observed while serializing one record. The pipeline attaches
/// entity context and feeds these into the error accumulator.
#[derive(Debug, Clone)]
pub struct Issue {
    pub severity: Severity,
    pub class: &'static str,
    pub message: String,
}

/// How deeply an embedded graph element is rendered, by nesting depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EmbedMode {
    Deep,
    Shallow,
    Reference,
}

pub struct Serializer<'a> {
    limits: &'a SerLimits,
    buf: &'a mut JsonBuf,
    issues: Vec<Issue>,
}

impl<'a> Serializer<'a> {
    pub fn new(limits: &'a SerLimits, buf: &'a mut JsonBuf) -> Self {
        Self {
            limits,
            buf,
            issues: Vec::new(),
        }
    }

    /// Issues observed since the last call; serializing the next record
    /// starts clean.
    pub fn take_issues(&mut self) -> Vec<Issue> {
        std::mem::take(&mut self.issues)
    }

    fn issue(&mut self, severity: Severity, class: &'static str, message: String) {
        self.issues.push(Issue {
            severity,
            class,
            message,
        });
    }

    /// Top-level node record.
    pub fn node_record(
        &mut self,
        node: &Node,
        content_hash: Option<&str>,
        export_id: &str,
    ) -> Result<(), JsonBufError> {
        self.buf.begin_object()?;
        self.buf.name("type")?;
        self.buf.write_string("node")?;
        self.buf.name("element_id")?;
        self.buf.write_string(&node.element_id)?;
        if let Some(hash) = content_hash {
            self.buf.name("NET_node_content_hash")?;
            self.buf.write_string(hash)?;
        }
        self.buf.name("export_id")?;
        self.buf.write_string(export_id)?;
        self.buf.name("labels")?;
        self.labels_array(&node.labels, self.limits.max_labels_per_node)?;
        self.buf.name("properties")?;
        self.object_of(&node.properties, 0, self.limits.max_nested_depth)?;
        self.buf.end_object()
    }

    /// Top-level relationship record. Endpoint content hashes are passed in
    /// from the pass-1 table; empty strings mean unresolvable (or hashing
    /// disabled).
    pub fn relationship_record(
        &mut self,
        rel: &Relationship,
        identity_hash: Option<&str>,
        start_node_content_hash: &str,
        end_node_content_hash: &str,
        export_id: &str,
    ) -> Result<(), JsonBufError> {
        self.buf.begin_object()?;
        self.buf.name("type")?;
        self.buf.write_string("relationship")?;
        self.buf.name("element_id")?;
        self.buf.write_string(&rel.element_id)?;
        if let Some(hash) = identity_hash {
            self.buf.name("NET_rel_identity_hash")?;
            self.buf.write_string(hash)?;
        }
        self.buf.name("export_id")?;
        self.buf.write_string(export_id)?;
        self.buf.name("label")?;
        self.buf.write_string(&rel.rel_type)?;
        self.buf.name("start_element_id")?;
        self.buf.write_string(&rel.start_element_id)?;
        self.buf.name("end_element_id")?;
        self.buf.write_string(&rel.end_element_id)?;
        self.buf.name("start_node_content_hash")?;
        self.buf.write_string(start_node_content_hash)?;
        self.buf.name("end_node_content_hash")?;
        self.buf.write_string(end_node_content_hash)?;
        self.buf.name("properties")?;
        self.object_of(&rel.properties, 0, self.limits.max_nested_depth)?;
        self.buf.end_object()
    }

    /// Minimal replacement record when serialization of the real one failed
    /// outright (per-record byte cap). Always a valid object.
    pub fn error_stub(
        &mut self,
        record_type: &str,
        element_id: &str,
        message: &str,
    ) -> Result<(), JsonBufError> {
        self.buf.begin_object()?;
        self.buf.name("type")?;
        self.buf.write_string(record_type)?;
        self.buf.name("element_id")?;
        self.buf.write_string(element_id)?;
        self.buf.name("_serialization_error")?;
        self.buf.write_string(message)?;
        self.buf.end_object()
    }

    /// Serialize one value at `depth`. `ceiling` is the applicable depth
    /// limit (the global one, or the tighter path property budget).
    pub fn value(&mut self, v: &Value, depth: usize, ceiling: usize) -> Result<(), JsonBufError> {
        if depth >= ceiling {
            self.issue(
                Severity::Warning,
                "depth_exceeded",
                format!("value nesting exceeds depth {ceiling}"),
            );
            self.buf.begin_object()?;
            self.buf.name("_truncated")?;
            self.buf.write_string("depth_exceeded")?;
            self.buf.name("_depth")?;
            self.buf.write_u64(depth as u64)?;
            return self.buf.end_object();
        }

        match v {
            Value::Null => self.buf.write_null(),
            Value::Bool(b) => self.buf.write_bool(*b),
            Value::Int(i) => self.buf.write_i64(*i),
            Value::UInt(u) => self.buf.write_u64(*u),
            Value::Float(f) => self.buf.write_f64(*f),
            Value::Special(s) => self.special(*s),
            Value::String(s) => self.string(s),
            Value::Bytes(b) => self.bytes(b),
            Value::Temporal(t) => self
                .buf
                .write_string(&t.truncate_to_100ns().to_iso_string()),
            Value::Point(p) => self.point(p),
            Value::List(items) => self.list(items, depth, ceiling),
            Value::Map(fields) => self.object_of(fields, depth, ceiling),
            Value::Node(node) => self.embedded_node(node, depth, ceiling),
            Value::Relationship(rel) => self.embedded_relationship(rel, depth, ceiling),
            Value::Path(p) => path::path_value(self, p, depth),
            Value::Unrecognized(name) => self.unrecognized(name),
        }
    }

    /// The catch-all for driver types the boundary could not interpret.
    fn unrecognized(&mut self, type_name: &str) -> Result<(), JsonBufError> {
        let name = if type_name.is_empty() {
            "unknown"
        } else {
            type_name
        };
        self.buf.begin_object()?;
        self.buf.name("_type")?;
        self.buf.write_string(name)?;
        self.buf.name("_note")?;
        self.buf.write_string("unserializable_type")?;
        self.buf.end_object()
    }

    fn special(&mut self, s: SpecialFloat) -> Result<(), JsonBufError> {
        self.buf.write_string(s.as_str())
    }

    fn string(&mut self, s: &str) -> Result<(), JsonBufError> {
        // A string of N bytes has at most N chars, so the cheap byte check
        // clears almost everything without counting.
        if s.len() <= self.limits.max_string_length {
            return self.buf.write_string(s);
        }
        let chars = s.chars().count();
        if chars <= self.limits.max_string_length {
            return self.buf.write_string(s);
        }

        self.issue(
            Severity::Warning,
            "string_too_long",
            format!(
                "string of {chars} chars exceeds limit {}",
                self.limits.max_string_length
            ),
        );
        let prefix_end = s
            .char_indices()
            .nth(STRING_PREFIX_CHARS)
            .map(|(i, _)| i)
            .unwrap_or(s.len());

        self.buf.begin_object()?;
        self.buf.name("_truncated")?;
        self.buf.write_string("string_too_long")?;
        self.buf.name("_length")?;
        self.buf.write_u64(chars as u64)?;
        self.buf.name("_prefix")?;
        self.buf.write_string(&s[..prefix_end])?;
        self.buf.name("_sha256")?;
        self.buf.write_string(&hex::encode(Sha256::digest(s.as_bytes())))?;
        self.buf.end_object()
    }

    fn bytes(&mut self, b: &[u8]) -> Result<(), JsonBufError> {
        if b.len() <= self.limits.max_binary_length {
            return self.buf.write_string(&base64::encode(b));
        }

        self.issue(
            Severity::Warning,
            "bytes_too_large",
            format!(
                "byte array of {} bytes exceeds limit {}",
                b.len(),
                self.limits.max_binary_length
            ),
        );
        self.buf.begin_object()?;
        self.buf.name("_truncated")?;
        self.buf.write_string("bytes_too_large")?;
        self.buf.name("_length")?;
        self.buf.write_u64(b.len() as u64)?;
        self.buf.name("_sha256")?;
        self.buf.write_string(&hex::encode(Sha256::digest(b)))?;
        self.buf.end_object()
    }

    fn point(&mut self, p: &graph::Point) -> Result<(), JsonBufError> {
        self.buf.begin_object()?;
        self.buf.name("type")?;
        self.buf.write_string("Point")?;
        self.buf.name("srid")?;
        self.buf.write_i64(p.srid as i64)?;
        self.buf.name("x")?;
        self.buf.write_f64(p.x)?;
        self.buf.name("y")?;
        self.buf.write_f64(p.y)?;
        if let Some(z) = p.z {
            self.buf.name("z")?;
            self.buf.write_f64(z)?;
        }
        self.buf.end_object()
    }

    fn list(&mut self, items: &[Value], depth: usize, ceiling: usize) -> Result<(), JsonBufError> {
        let cap = self.limits.max_collection_items;
        self.buf.begin_array()?;
        for item in items.iter().take(cap) {
            self.value(item, depth + 1, ceiling)?;
        }
        if items.len() > cap {
            self.issue(
                Severity::Warning,
                "list_too_large",
                format!("list of {} items exceeds limit {cap}", items.len()),
            );
            self.buf.begin_object()?;
            self.buf.name("_truncated")?;
            self.buf.write_string("list_too_large")?;
            self.buf.name("_total_items")?;
            self.buf.write_u64(items.len() as u64)?;
            self.buf.name("_shown_items")?;
            self.buf.write_u64(cap as u64)?;
            self.buf.end_object()?;
        }
        self.buf.end_array()
    }

    /// Emit a map (or a node/relationship property map) as a JSON object,
    /// applying key truncation, duplicate-key suffixing, and the collection
    /// cap. Entries sit one level deeper than the object itself.
    fn object_of(
        &mut self,
        fields: &[graph::Field],
        depth: usize,
        ceiling: usize,
    ) -> Result<(), JsonBufError> {
        let cap = self.limits.max_collection_items;
        let mut used: HashSet<Cow<'_, str>> = HashSet::with_capacity(fields.len().min(cap));

        self.buf.begin_object()?;
        for field in fields.iter().take(cap) {
            let key = self.property_key(&field.property);
            let key = canon::dedup_key(key, &mut used);
            self.buf.name(&key)?;
            self.value(&field.value, depth + 1, ceiling)?;
        }
        if fields.len() > cap {
            self.issue(
                Severity::Warning,
                "map_too_large",
                format!("map of {} entries exceeds limit {cap}", fields.len()),
            );
            self.buf.name(&canon::dedup_key(Cow::Borrowed("_truncated"), &mut used))?;
            self.buf.write_string("map_too_large")?;
            self.buf.name(&canon::dedup_key(Cow::Borrowed("_total_items"), &mut used))?;
            self.buf.write_u64(fields.len() as u64)?;
            self.buf.name(&canon::dedup_key(Cow::Borrowed("_shown_items"), &mut used))?;
            self.buf.write_u64(cap as u64)?;
        }
        self.buf.end_object()
    }

    fn property_key<'k>(&mut self, key: &'k str) -> Cow<'k, str> {
        // Byte length bounds char count; only suspicious keys get counted.
        if key.len() <= MAX_PROPERTY_KEY_CHARS || key.chars().count() <= MAX_PROPERTY_KEY_CHARS {
            return Cow::Borrowed(key);
        }
        self.issue(
            Severity::Warning,
            "property_key_too_long",
            format!("property key of {} chars truncated", key.chars().count()),
        );
        let end = key
            .char_indices()
            .nth(KEY_TRUNCATE_TO_CHARS)
            .map(|(i, _)| i)
            .unwrap_or(key.len());
        Cow::Owned(format!("{}...", &key[..end]))
    }

    /// Labels with validity screening: labels over the key length limit are
    /// replaced by `_invalid_label`, and the array is capped.
    fn labels_array(&mut self, labels: &[String], cap: usize) -> Result<(), JsonBufError> {
        self.buf.begin_array()?;
        for label in labels.iter().take(cap) {
            if label.chars().count() > MAX_PROPERTY_KEY_CHARS {
                self.issue(
                    Severity::Warning,
                    "invalid_label",
                    format!("label of {} chars replaced", label.chars().count()),
                );
                self.buf.write_string("_invalid_label")?;
            } else {
                self.buf.write_string(label)?;
            }
        }
        if labels.len() > cap {
            self.issue(
                Severity::Warning,
                "too_many_labels",
                format!("{} labels exceed limit {cap}", labels.len()),
            );
        }
        self.buf.end_array()
    }

    fn embed_mode(&self, depth: usize) -> EmbedMode {
        if depth < self.limits.nested_shallow_mode_depth {
            EmbedMode::Deep
        } else if depth < self.limits.nested_reference_mode_depth {
            EmbedMode::Shallow
        } else {
            EmbedMode::Reference
        }
    }

    fn embedded_node(
        &mut self,
        node: &Node,
        depth: usize,
        ceiling: usize,
    ) -> Result<(), JsonBufError> {
        let mode = self.embed_mode(depth);
        self.buf.begin_object()?;
        self.buf.name("_type")?;
        self.buf.write_string("node")?;
        self.buf.name("element_id")?;
        self.buf.write_string(&node.element_id)?;
        match mode {
            EmbedMode::Deep => {
                self.buf.name("labels")?;
                self.labels_array(&node.labels, self.limits.max_labels_per_node)?;
                self.buf.name("properties")?;
                self.object_of(&node.properties, depth + 1, ceiling)?;
            }
            EmbedMode::Shallow => {
                self.buf.name("labels")?;
                self.labels_array(&node.labels, self.limits.max_labels_per_node)?;
                self.buf.name("property_count")?;
                self.buf.write_u64(node.properties.len() as u64)?;
            }
            EmbedMode::Reference => {
                self.buf.name("labels")?;
                self.labels_array(&node.labels, self.limits.max_labels_in_reference_mode)?;
            }
        }
        self.buf.end_object()
    }

    fn embedded_relationship(
        &mut self,
        rel: &Relationship,
        depth: usize,
        ceiling: usize,
    ) -> Result<(), JsonBufError> {
        let mode = self.embed_mode(depth);
        self.buf.begin_object()?;
        self.buf.name("_type")?;
        self.buf.write_string("relationship")?;
        self.buf.name("element_id")?;
        self.buf.write_string(&rel.element_id)?;
        self.buf.name("label")?;
        self.buf.write_string(&rel.rel_type)?;
        match mode {
            EmbedMode::Deep => {
                self.buf.name("start_element_id")?;
                self.buf.write_string(&rel.start_element_id)?;
                self.buf.name("end_element_id")?;
                self.buf.write_string(&rel.end_element_id)?;
                self.buf.name("properties")?;
                self.object_of(&rel.properties, depth + 1, ceiling)?;
            }
            EmbedMode::Shallow => {
                self.buf.name("property_count")?;
                self.buf.write_u64(rel.properties.len() as u64)?;
            }
            EmbedMode::Reference => {}
        }
        self.buf.end_object()
    }
}
