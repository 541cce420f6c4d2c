//! Path serialization with size-driven degradation.
//!
//! Mode selection is by node count: `full` keeps properties, `compact` keeps
//! capped labels only, `ids_only` keeps element ids. A path longer than
//! `max_path_length` is not serialized at all. Every mode appends a
//! `sequence` array interleaving node and relationship indexes so consumers
//! never reconstruct the alternation themselves.

use super::Serializer;
use crate::accum::Severity;
use crate::jsonbuf::JsonBufError;
use graph::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PathMode {
    Full,
    Compact,
    IdsOnly,
}

impl PathMode {
    fn as_str(&self) -> &'static str {
        match self {
            PathMode::Full => "full",
            PathMode::Compact => "compact",
            PathMode::IdsOnly => "ids_only",
        }
    }
}

pub(super) fn path_value(
    ser: &mut Serializer<'_>,
    path: &Path,
    _depth: usize,
) -> Result<(), JsonBufError> {
    let n = path.nodes.len();
    let limits = ser.limits;

    if n > limits.max_path_length {
        ser.issue(
            Severity::Error,
            "path_too_long",
            format!("path of {n} nodes exceeds limit {}", limits.max_path_length),
        );
        ser.buf.begin_object()?;
        ser.buf.name("_type")?;
        ser.buf.write_string("path")?;
        ser.buf.name("_error")?;
        ser.buf.write_string("path_too_long")?;
        return ser.buf.end_object();
    }

    let mode = if n <= limits.path_full_mode_limit {
        PathMode::Full
    } else if n <= limits.path_compact_mode_limit {
        PathMode::Compact
    } else {
        PathMode::IdsOnly
    };

    if !path.is_well_formed() {
        ser.issue(
            Severity::Warning,
            "path_alternation_mismatch",
            format!(
                "path carries {} nodes but {} relationships",
                n,
                path.relationships.len()
            ),
        );
    }

    // Properties inside paths run under their own, tighter depth budget.
    let property_ceiling = limits.path_property_depth.min(limits.max_nested_depth);

    ser.buf.begin_object()?;
    ser.buf.name("_type")?;
    ser.buf.write_string("path")?;
    ser.buf.name("mode")?;
    ser.buf.write_string(mode.as_str())?;

    ser.buf.name("nodes")?;
    ser.buf.begin_array()?;
    for node in &path.nodes {
        match mode {
            PathMode::Full => {
                ser.buf.begin_object()?;
                ser.buf.name("element_id")?;
                ser.buf.write_string(&node.element_id)?;
                ser.buf.name("labels")?;
                ser.labels_array(&node.labels, limits.max_labels_per_node)?;
                ser.buf.name("properties")?;
                ser.object_of(&node.properties, 0, property_ceiling)?;
                ser.buf.end_object()?;
            }
            PathMode::Compact => {
                ser.buf.begin_object()?;
                ser.buf.name("element_id")?;
                ser.buf.write_string(&node.element_id)?;
                ser.buf.name("labels")?;
                ser.labels_array(&node.labels, limits.max_labels_in_path_compact)?;
                ser.buf.end_object()?;
            }
            PathMode::IdsOnly => {
                ser.buf.write_string(&node.element_id)?;
            }
        }
    }
    ser.buf.end_array()?;

    ser.buf.name("relationships")?;
    ser.buf.begin_array()?;
    for rel in &path.relationships {
        match mode {
            PathMode::Full => {
                ser.buf.begin_object()?;
                ser.buf.name("element_id")?;
                ser.buf.write_string(&rel.element_id)?;
                ser.buf.name("type")?;
                ser.buf.write_string(&rel.rel_type)?;
                ser.buf.name("start_element_id")?;
                ser.buf.write_string(&rel.start_element_id)?;
                ser.buf.name("end_element_id")?;
                ser.buf.write_string(&rel.end_element_id)?;
                ser.buf.name("properties")?;
                ser.object_of(&rel.properties, 0, property_ceiling)?;
                ser.buf.end_object()?;
            }
            PathMode::Compact => {
                ser.buf.begin_object()?;
                ser.buf.name("element_id")?;
                ser.buf.write_string(&rel.element_id)?;
                ser.buf.name("type")?;
                ser.buf.write_string(&rel.rel_type)?;
                ser.buf.end_object()?;
            }
            PathMode::IdsOnly => {
                ser.buf.write_string(&rel.element_id)?;
            }
        }
    }
    ser.buf.end_array()?;

    ser.buf.name("sequence")?;
    sequence(ser, n, path.relationships.len())?;

    ser.buf.end_object()
}

/// Interleave node and relationship indexes. A well-formed path emits
/// n, r, n, r, …, n; mismatched counts interleave the shared run and append
/// the remainder so every element still appears exactly once.
fn sequence(ser: &mut Serializer<'_>, nodes: usize, rels: usize) -> Result<(), JsonBufError> {
    ser.buf.begin_array()?;
    for i in 0..nodes {
        sequence_entry(ser, "node", i)?;
        if i < rels && (i < nodes - 1 || rels >= nodes) {
            sequence_entry(ser, "relationship", i)?;
        }
    }
    for j in nodes..rels {
        sequence_entry(ser, "relationship", j)?;
    }
    ser.buf.end_array()
}

fn sequence_entry(ser: &mut Serializer<'_>, kind: &str, index: usize) -> Result<(), JsonBufError> {
    ser.buf.begin_object()?;
    ser.buf.name("type")?;
    ser.buf.write_string(kind)?;
    ser.buf.name("index")?;
    ser.buf.write_u64(index as u64)?;
    ser.buf.end_object()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::SerLimits;
    use crate::jsonbuf::JsonBuf;
    use crate::ser::Issue;
    use graph::{Field, Node, Relationship, Value};
    use serde_json::json;

    fn chain(n: usize) -> Path {
        let nodes = (0..n)
            .map(|i| Node {
                element_id: format!("n{i}"),
                labels: (0..8).map(|l| format!("L{l}")).collect(),
                properties: vec![Field::new("seq", Value::Int(i as i64))],
            })
            .collect::<Vec<_>>();
        let relationships = (0..n.saturating_sub(1))
            .map(|i| Relationship {
                element_id: format!("r{i}"),
                rel_type: "NEXT".into(),
                start_element_id: format!("n{i}"),
                end_element_id: format!("n{}", i + 1),
                properties: vec![Field::new("w", Value::Float(1.5))],
            })
            .collect();
        Path {
            nodes,
            relationships,
        }
    }

    fn render_path(limits: &SerLimits, path: &Path) -> (serde_json::Value, Vec<Issue>) {
        let mut buf = JsonBuf::new(1024, limits.max_record_bytes);
        let mut ser = Serializer::new(limits, &mut buf);
        ser.value(&Value::Path(path.clone()), 1, limits.max_nested_depth)
            .unwrap();
        let issues = ser.take_issues();
        (serde_json::from_slice(buf.as_bytes()).unwrap(), issues)
    }

    fn small_limits() -> SerLimits {
        SerLimits {
            path_full_mode_limit: 3,
            path_compact_mode_limit: 10,
            max_path_length: 20,
            max_labels_in_path_compact: 5,
            ..SerLimits::default()
        }
    }

    #[test]
    fn full_mode_keeps_properties() {
        let (parsed, issues) = render_path(&small_limits(), &chain(3));
        assert_eq!(parsed["mode"], json!("full"));
        assert_eq!(parsed["nodes"][0]["properties"], json!({"seq": 0}));
        assert_eq!(parsed["relationships"][0]["type"], json!("NEXT"));
        assert_eq!(parsed["relationships"][0]["properties"], json!({"w": 1.5}));
        assert_eq!(
            parsed["sequence"].as_array().unwrap().len(),
            3 + 2
        );
        assert!(issues.is_empty());
    }

    #[test]
    fn compact_mode_drops_properties_and_caps_labels() {
        let (parsed, _) = render_path(&small_limits(), &chain(5));
        assert_eq!(parsed["mode"], json!("compact"));

        let node = &parsed["nodes"][0];
        assert!(node.get("properties").is_none());
        assert_eq!(node["labels"].as_array().unwrap().len(), 5);

        let rel = &parsed["relationships"][0];
        assert_eq!(
            rel.as_object().unwrap().keys().collect::<Vec<_>>(),
            vec!["element_id", "type"]
        );
        assert_eq!(parsed["sequence"].as_array().unwrap().len(), 5 + 4);
    }

    #[test]
    fn ids_only_mode_keeps_element_id_arrays() {
        let (parsed, _) = render_path(&small_limits(), &chain(15));
        assert_eq!(parsed["mode"], json!("ids_only"));
        assert_eq!(parsed["nodes"][0], json!("n0"));
        assert_eq!(parsed["relationships"][0], json!("r0"));
        assert_eq!(parsed["sequence"].as_array().unwrap().len(), 15 + 14);
    }

    #[test]
    fn too_long_path_is_refused() {
        let (parsed, issues) = render_path(&small_limits(), &chain(21));
        assert_eq!(
            parsed,
            json!({"_type": "path", "_error": "path_too_long"})
        );
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].class, "path_too_long");
        assert_eq!(issues[0].severity, Severity::Error);
    }

    #[test]
    fn sequence_interleaves_alternately() {
        let (parsed, _) = render_path(&small_limits(), &chain(3));
        let seq = parsed["sequence"].as_array().unwrap();
        let rendered: Vec<(String, u64)> = seq
            .iter()
            .map(|e| {
                (
                    e["type"].as_str().unwrap().to_string(),
                    e["index"].as_u64().unwrap(),
                )
            })
            .collect();
        assert_eq!(
            rendered,
            vec![
                ("node".into(), 0),
                ("relationship".into(), 0),
                ("node".into(), 1),
                ("relationship".into(), 1),
                ("node".into(), 2),
            ]
        );
    }

    #[test]
    fn mismatched_counts_serialize_best_effort() {
        let mut path = chain(3);
        path.relationships.pop();
        path.relationships.pop(); // 3 nodes, 0 relationships

        let (parsed, issues) = render_path(&small_limits(), &path);
        assert_eq!(parsed["nodes"].as_array().unwrap().len(), 3);
        assert_eq!(parsed["relationships"].as_array().unwrap().len(), 0);
        assert_eq!(parsed["sequence"].as_array().unwrap().len(), 3);
        assert!(issues
            .iter()
            .any(|i| i.class == "path_alternation_mismatch"));

        // Surplus relationships all still appear.
        let mut path = chain(2);
        path.relationships.push(Relationship {
            element_id: "extra".into(),
            rel_type: "NEXT".into(),
            start_element_id: "n1".into(),
            end_element_id: "n0".into(),
            properties: vec![],
        });
        let (parsed, issues) = render_path(&small_limits(), &path);
        assert_eq!(parsed["sequence"].as_array().unwrap().len(), 4);
        assert!(issues
            .iter()
            .any(|i| i.class == "path_alternation_mismatch"));
    }

    #[test]
    fn single_node_path() {
        let (parsed, issues) = render_path(&small_limits(), &chain(1));
        assert_eq!(parsed["mode"], json!("full"));
        assert_eq!(parsed["sequence"].as_array().unwrap().len(), 1);
        assert!(issues.is_empty());
    }
}
