//! The line-1 metadata object and its post-write patch.
//!
//! The metadata line is written first with preliminary values and padded to a
//! reserved width, then rewritten in place once final counts are known. The
//! patch must be size-exact: the reserved width never changes after the first
//! write, so the rewrite pads with trailing spaces exactly like the original.

use crate::client::ServerInfo;
use crate::config::ExportConfig;
use crate::perf::PaginationMetrics;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::io::{self, Seek, SeekFrom, Write};

pub const FORMAT_VERSION: &str = "1.0";

#[derive(Debug, Clone, Serialize)]
pub struct Metadata {
    pub format_version: &'static str,
    pub export_metadata: ExportMetadata,
    pub producer: Producer,
    pub source_system: SourceSystem,
    pub database_statistics: DatabaseStatistics,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_schema: Option<DatabaseSchema>,
    pub error_summary: ErrorSummary,
    pub supported_record_types: Vec<&'static str>,
    pub environment: Environment,
    pub security: Security,
    pub compatibility: Compatibility,
    pub compression: Compression,
    pub export_manifest: ExportManifest,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pagination_performance: Option<PaginationPerformance>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportMetadata {
    pub export_id: String,
    pub export_timestamp_utc: String,
    pub export_mode: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct Producer {
    pub name: &'static str,
    pub version: &'static str,
    pub checksum: &'static str,
    pub runtime_version: &'static str,
}

impl Producer {
    pub fn this_build() -> Self {
        Self {
            name: "n4jet",
            version: env!("CARGO_PKG_VERSION"),
            checksum: option_env!("N4JET_BUILD_CHECKSUM").unwrap_or("dev"),
            runtime_version: option_env!("N4JET_RUSTC_VERSION").unwrap_or("unknown"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceSystem {
    #[serde(rename = "type")]
    pub system_type: &'static str,
    pub version: String,
    pub edition: String,
    pub database: DatabaseRef,
}

#[derive(Debug, Clone, Serialize)]
pub struct DatabaseRef {
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DatabaseStatistics {
    #[serde(rename = "nodeCount")]
    pub node_count: u64,
    #[serde(rename = "relCount")]
    pub rel_count: u64,
    #[serde(rename = "labelCount")]
    pub label_count: u64,
    #[serde(rename = "relTypeCount")]
    pub rel_type_count: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DatabaseSchema {
    pub labels: Vec<String>,
    #[serde(rename = "relationshipTypes")]
    pub relationship_types: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ErrorSummary {
    pub error_count: u64,
    pub warning_count: u64,
    pub has_errors: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Environment {
    pub hostname: String,
    pub os: &'static str,
    pub arch: &'static str,
}

impl Environment {
    pub fn current() -> Self {
        Self {
            hostname: std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string()),
            os: std::env::consts::OS,
            arch: std::env::consts::ARCH,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Security {
    pub tls: bool,
    pub allow_insecure: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Compatibility {
    pub min_reader_version: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct Compression {
    pub codec: &'static str,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExportManifest {
    pub total_export_duration_seconds: f64,
    pub bytes_written: u64,
    pub total_lines: u64,
    pub file_statistics: Vec<FileStatistic>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_statistics_truncated: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileStatistic {
    pub label: String,
    pub record_count: u64,
    pub bytes_written: u64,
    pub export_duration_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PaginationPerformance {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nodes: Option<PaginationMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relationships: Option<PaginationMetrics>,
}

impl Metadata {
    /// The preliminary object written before any payload. Counts and the
    /// manifest are zeroed; the patch fills them in.
    pub fn preliminary(
        config: &ExportConfig,
        server: &ServerInfo,
        schema: Option<DatabaseSchema>,
        statistics: DatabaseStatistics,
        export_id: &str,
        started: DateTime<Utc>,
    ) -> Self {
        let uses_tls = config.neo4j_uri.starts_with("bolt+s")
            || config.neo4j_uri.starts_with("neo4j+s")
            || config.neo4j_uri.starts_with("https");
        Self {
            format_version: FORMAT_VERSION,
            export_metadata: ExportMetadata {
                export_id: export_id.to_string(),
                export_timestamp_utc: started.to_rfc3339_opts(SecondsFormat::Millis, true),
                export_mode: "full",
            },
            producer: Producer::this_build(),
            source_system: SourceSystem {
                system_type: "neo4j",
                version: server.version_string.clone(),
                edition: server.edition.clone(),
                database: DatabaseRef {
                    name: config.neo4j_database.clone(),
                },
            },
            database_statistics: statistics,
            database_schema: schema,
            error_summary: ErrorSummary::default(),
            supported_record_types: vec!["node", "relationship", "error", "warning"],
            environment: Environment::current(),
            security: Security {
                tls: uses_tls,
                allow_insecure: config.allow_insecure,
            },
            compatibility: Compatibility {
                min_reader_version: FORMAT_VERSION,
            },
            compression: Compression { codec: "none" },
            export_manifest: ExportManifest::default(),
            pagination_performance: None,
        }
    }
}

/// Width reserved for line 1, newline included. Sized off the preliminary
/// object plus room for the final manifest, which grows with the label count.
pub fn reserved_width(preliminary_len: usize, expected_labels: usize) -> usize {
    preliminary_len + 2048 + 192 * expected_labels.max(16)
}

/// Write the metadata as line 1, space-padded to exactly `width` bytes
/// (newline included).
pub fn write_reserved_line<W: Write>(w: &mut W, metadata: &Metadata, width: usize) -> io::Result<()> {
    let json = serde_json::to_string(metadata)?;
    if json.len() + 1 > width {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "metadata of {} bytes exceeds the reserved width {width}",
                json.len()
            ),
        ));
    }
    w.write_all(json.as_bytes())?;
    let padding = width - 1 - json.len();
    w.write_all(&b" ".repeat(padding))?;
    w.write_all(b"\n")
}

/// Rewrite line 1 in place with final values. If the final object outgrew the
/// reservation, `file_statistics` entries are dropped (largest first is not
/// needed; any drop shrinks it) and the manifest is flagged truncated rather
/// than failing the export. Returns whether statistics were dropped.
pub fn patch_reserved_line<F: Write + Seek>(
    file: &mut F,
    metadata: &mut Metadata,
    width: usize,
) -> io::Result<bool> {
    let mut truncated = false;
    loop {
        let json = serde_json::to_string(&*metadata)?;
        if json.len() + 1 <= width {
            file.seek(SeekFrom::Start(0))?;
            return write_reserved_line(file, metadata, width).map(|()| truncated);
        }
        if metadata.export_manifest.file_statistics.pop().is_none() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "final metadata of {} bytes cannot fit the reserved width {width}",
                    json.len()
                ),
            ));
        }
        metadata.export_manifest.file_statistics_truncated = Some(true);
        truncated = true;
    }
}

/// Database names keep ASCII alphanumerics and underscores, capped at 20
/// chars; anything left empty falls back to `export`.
pub fn sanitize_database_name(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .take(20)
        .collect();
    if sanitized.is_empty() {
        "export".to_string()
    } else {
        sanitized
    }
}

/// `<db>_<yyyyMMddTHHmmssZ>_<N>n_<R>r_<first8_of_export_id>.jsonl`
pub fn output_filename(
    database: &str,
    started: &DateTime<Utc>,
    nodes: u64,
    relationships: u64,
    export_id: &str,
) -> String {
    format!(
        "{}_{}_{}n_{}r_{}.jsonl",
        sanitize_database_name(database),
        started.format("%Y%m%dT%H%M%SZ"),
        nodes,
        relationships,
        &export_id[..8.min(export_id.len())],
    )
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::client::ServerVersion;
    use chrono::TimeZone;
    use std::io::Cursor;

    fn sample() -> Metadata {
        let config = ExportConfig {
            neo4j_database: "movies".to_string(),
            ..ExportConfig::default()
        };
        let server = ServerInfo {
            version: ServerVersion::V5,
            version_string: "5.19.0".to_string(),
            edition: "community".to_string(),
        };
        Metadata::preliminary(
            &config,
            &server,
            Some(DatabaseSchema {
                labels: vec!["Movie".to_string(), "Person".to_string()],
                relationship_types: vec!["ACTED_IN".to_string()],
            }),
            DatabaseStatistics {
                node_count: 10,
                rel_count: 4,
                label_count: 2,
                rel_type_count: 1,
            },
            "3b1f8a77-0000-4000-8000-000000000000",
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        )
    }

    #[test]
    fn field_names_are_exact() {
        let value = serde_json::to_value(sample()).unwrap();
        let top: Vec<&str> = value.as_object().unwrap().keys().map(|s| s.as_str()).collect();
        for expected in [
            "format_version",
            "export_metadata",
            "producer",
            "source_system",
            "database_statistics",
            "database_schema",
            "error_summary",
            "supported_record_types",
            "environment",
            "security",
            "compatibility",
            "compression",
            "export_manifest",
        ] {
            assert!(top.contains(&expected), "missing {expected}");
        }

        assert_eq!(value["source_system"]["type"], "neo4j");
        assert_eq!(value["source_system"]["database"]["name"], "movies");
        assert_eq!(value["database_statistics"]["nodeCount"], 10);
        assert_eq!(value["database_statistics"]["relCount"], 4);
        assert_eq!(value["database_statistics"]["labelCount"], 2);
        assert_eq!(value["database_statistics"]["relTypeCount"], 1);
        assert_eq!(value["database_schema"]["relationshipTypes"][0], "ACTED_IN");
        assert_eq!(value["error_summary"]["has_errors"], false);
        assert_eq!(
            value["supported_record_types"],
            serde_json::json!(["node", "relationship", "error", "warning"])
        );
        // Zeroed until the patch.
        assert_eq!(value["export_manifest"]["total_lines"], 0);
        assert!(value.get("pagination_performance").is_none());
    }

    #[test]
    fn reserved_line_is_size_exact() {
        let metadata = sample();
        let json_len = serde_json::to_string(&metadata).unwrap().len();
        let width = reserved_width(json_len, 2);

        let mut out = Vec::new();
        write_reserved_line(&mut out, &metadata, width).unwrap();
        assert_eq!(out.len(), width);
        assert_eq!(out.last(), Some(&b'\n'));

        // The padded line still parses as one JSON object.
        let line = std::str::from_utf8(&out).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(parsed["format_version"], FORMAT_VERSION);
    }

    #[test]
    fn patch_rewrites_in_place_without_moving_payload() {
        let mut metadata = sample();
        let json_len = serde_json::to_string(&metadata).unwrap().len();
        let width = reserved_width(json_len, 2);

        let mut file = Cursor::new(Vec::new());
        write_reserved_line(&mut file, &metadata, width).unwrap();
        file.write_all(b"{\"type\":\"node\"}\n").unwrap();
        let len_before = file.get_ref().len();

        metadata.database_statistics.node_count = 1;
        metadata.export_manifest.total_lines = 2;
        metadata.export_manifest.file_statistics.push(FileStatistic {
            label: "Person".to_string(),
            record_count: 1,
            bytes_written: 16,
            export_duration_ms: 3,
        });
        let truncated = patch_reserved_line(&mut file, &mut metadata, width).unwrap();
        assert!(!truncated);
        assert_eq!(file.get_ref().len(), len_before);

        let contents = String::from_utf8(file.get_ref().clone()).unwrap();
        let mut lines = contents.lines();
        let first: serde_json::Value = serde_json::from_str(lines.next().unwrap()).unwrap();
        assert_eq!(first["database_statistics"]["nodeCount"], 1);
        assert_eq!(first["export_manifest"]["total_lines"], 2);
        assert_eq!(lines.next().unwrap(), "{\"type\":\"node\"}");
    }

    #[test]
    fn patch_overflow_drops_statistics_and_flags_it() {
        let mut metadata = sample();
        let json_len = serde_json::to_string(&metadata).unwrap().len();
        // A deliberately tight reservation.
        let width = json_len + 200;

        let mut file = Cursor::new(Vec::new());
        write_reserved_line(&mut file, &metadata, width).unwrap();

        for i in 0..64 {
            metadata.export_manifest.file_statistics.push(FileStatistic {
                label: format!("Label{i}"),
                record_count: i,
                bytes_written: 1000 * i,
                export_duration_ms: i,
            });
        }
        let truncated = patch_reserved_line(&mut file, &mut metadata, width).unwrap();
        assert!(truncated);

        let contents = String::from_utf8(file.get_ref().clone()).unwrap();
        let first: serde_json::Value =
            serde_json::from_str(contents.lines().next().unwrap()).unwrap();
        assert_eq!(first["export_manifest"]["file_statistics_truncated"], true);
        assert_eq!(contents.len(), width); // the reservation never moves
    }

    #[test]
    fn database_name_sanitization() {
        assert_eq!(sanitize_database_name("movies"), "movies");
        assert_eq!(sanitize_database_name("my-db.prod"), "mydbprod");
        assert_eq!(sanitize_database_name("データベース"), "export");
        assert_eq!(sanitize_database_name(""), "export");
        assert_eq!(
            sanitize_database_name("abcdefghijklmnopqrstuvwxyz"),
            "abcdefghijklmnopqrst"
        );
        assert_eq!(sanitize_database_name("under_score_9"), "under_score_9");
    }

    #[test]
    fn filename_scheme() {
        let started = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 59).unwrap();
        let name = output_filename(
            "movies",
            &started,
            120,
            34,
            "3b1f8a77-0000-4000-8000-000000000000",
        );
        assert_eq!(name, "movies_20240501T123059Z_120n_34r_3b1f8a77.jsonl");
    }
}
