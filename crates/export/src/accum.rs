//! Bounded accumulation of per-record failures.
//!
//! Serialization problems repeat: one pathological property shape usually
//! recurs across millions of records. Errors are deduplicated per batch by
//! `(kind, entity type, exception class)` and flushed as one in-band record
//! per distinct key carrying a count and a sample element id. The table is
//! bounded; past `MAX_DISTINCT_KEYS` distinct keys, further errors coalesce
//! into a single overflow bucket.

use chrono::{SecondsFormat, Utc};
use serde::Serialize;

pub const MAX_DISTINCT_KEYS: usize = 100;

/// In-band record kinds. Serialization-phase failures are warnings;
/// record-access failures, path-too-long, depth exhaustion on mandatory
/// fields, and accumulator overflow are errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Key {
    severity: Severity,
    entity: &'static str,
    class: String,
}

#[derive(Debug)]
struct Bucket {
    key: Key,
    count: u64,
    first_element_id: Option<String>,
    first_message: String,
}

#[derive(Debug, Default)]
pub struct ErrorAccumulator {
    buckets: Vec<Bucket>,
    overflow: u64,
}

/// One flushed error/warning line.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    #[serde(rename = "type")]
    pub record_type: &'static str,
    pub timestamp: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub element_id: Option<String>,
    pub count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one failure. Only the first occurrence of a key keeps its
    /// message and element id; later ones just count.
    pub fn track(
        &mut self,
        severity: Severity,
        entity: &'static str,
        class: &str,
        message: &str,
        element_id: Option<&str>,
    ) {
        if let Some(bucket) = self
            .buckets
            .iter_mut()
            .find(|b| b.key.severity == severity && b.key.entity == entity && b.key.class == class)
        {
            bucket.count += 1;
            return;
        }

        if self.buckets.len() >= MAX_DISTINCT_KEYS {
            self.overflow += 1;
            return;
        }

        self.buckets.push(Bucket {
            key: Key {
                severity,
                entity,
                class: class.to_string(),
            },
            count: 1,
            first_element_id: element_id.map(str::to_string),
            first_message: message.to_string(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty() && self.overflow == 0
    }

    /// Drain the table into one record per bucket, in first-seen order, plus
    /// an overflow record when the table spilled.
    pub fn flush(&mut self, sink: &mut Vec<ErrorRecord>) {
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);

        for bucket in self.buckets.drain(..) {
            sink.push(ErrorRecord {
                record_type: bucket.key.severity.as_str(),
                timestamp: timestamp.clone(),
                message: bucket.first_message,
                element_id: bucket.first_element_id,
                count: bucket.count,
                details: Some(serde_json::json!({
                    "entity_type": bucket.key.entity,
                    "exception_class": bucket.key.class,
                })),
            });
        }

        if self.overflow > 0 {
            sink.push(ErrorRecord {
                record_type: Severity::Error.as_str(),
                timestamp,
                message: format!(
                    "error accumulator overflow: {} further errors past {} distinct keys",
                    self.overflow, MAX_DISTINCT_KEYS
                ),
                element_id: None,
                count: self.overflow,
                details: Some(serde_json::json!({ "truncated": true })),
            });
            self.overflow = 0;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn duplicate_keys_coalesce_into_one_record() {
        let mut accum = ErrorAccumulator::new();
        accum.track(
            Severity::Warning,
            "node",
            "string_too_long",
            "string of 12000001 chars truncated",
            Some("4:db:1"),
        );
        accum.track(
            Severity::Warning,
            "node",
            "string_too_long",
            "string of 99000000 chars truncated",
            Some("4:db:2"),
        );

        let mut sink = Vec::new();
        accum.flush(&mut sink);

        assert_eq!(sink.len(), 1);
        assert_eq!(sink[0].record_type, "warning");
        assert_eq!(sink[0].count, 2);
        // First-seen context wins.
        assert_eq!(sink[0].message, "string of 12000001 chars truncated");
        assert_eq!(sink[0].element_id.as_deref(), Some("4:db:1"));
        assert!(accum.is_empty());
    }

    #[test]
    fn severity_and_entity_split_buckets() {
        let mut accum = ErrorAccumulator::new();
        accum.track(Severity::Warning, "node", "x", "m", None);
        accum.track(Severity::Error, "node", "x", "m", None);
        accum.track(Severity::Warning, "relationship", "x", "m", None);

        let mut sink = Vec::new();
        accum.flush(&mut sink);
        assert_eq!(sink.len(), 3);
    }

    #[test]
    fn overflow_past_100_distinct_keys() {
        let mut accum = ErrorAccumulator::new();
        for i in 0..MAX_DISTINCT_KEYS {
            accum.track(Severity::Warning, "node", &format!("class_{i}"), "m", None);
        }
        // The 101st distinct key and everything after coalesce.
        accum.track(Severity::Warning, "node", "class_overflow_a", "m", None);
        accum.track(Severity::Warning, "node", "class_overflow_b", "m", None);
        // Existing keys still count normally.
        accum.track(Severity::Warning, "node", "class_0", "m", None);

        let mut sink = Vec::new();
        accum.flush(&mut sink);

        assert_eq!(sink.len(), MAX_DISTINCT_KEYS + 1);
        let overflow = sink.last().unwrap();
        assert_eq!(overflow.record_type, "error");
        assert_eq!(overflow.count, 2);
        assert_eq!(
            overflow.details,
            Some(serde_json::json!({ "truncated": true }))
        );
        assert_eq!(sink[0].count, 2);
    }

    #[test]
    fn records_serialize_with_in_band_shape() {
        let mut accum = ErrorAccumulator::new();
        accum.track(Severity::Error, "relationship", "access", "boom", None);
        let mut sink = Vec::new();
        accum.flush(&mut sink);

        let line = serde_json::to_value(&sink[0]).unwrap();
        assert_eq!(line["type"], "error");
        assert_eq!(line["count"], 1);
        assert_eq!(line["message"], "boom");
        assert!(line.get("element_id").is_none());
        assert!(line["timestamp"].as_str().unwrap().ends_with('Z'));
    }
}
