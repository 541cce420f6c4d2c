//! Two-pass export orchestration.
//!
//! Pass 1 streams nodes: each one is hashed, recorded in the endpoint table,
//! serialized, and attributed to its labels' statistics. Pass 2 streams
//! relationships, resolving endpoint content hashes from the table built in
//! pass 1. Error/warning records queue up across both passes and land in one
//! contiguous block after all data lines. The metadata line is written first
//! at a reserved width and patched in place once final counts are known; the
//! whole file exists under a temporary name until the atomic rename at the
//! end.

use crate::accum::{ErrorAccumulator, ErrorRecord, Severity};
use crate::cancel::{CancelFlag, CancelReason};
use crate::client::{GraphClient, Record, ServerInfo, ServerVersion};
use crate::config::ExportConfig;
use crate::error::ExportError;
use crate::jsonbuf::JsonBuf;
use crate::metadata::{
    self, DatabaseSchema, DatabaseStatistics, FileStatistic, Metadata, PaginationPerformance,
};
use crate::paginate::{
    self, CursorState, Entity, PaginateSpec, Query, QuerySource, Strategy, CURSOR_FIELD,
    TOTAL_FIELD,
};
use crate::perf::PerfTracker;
use crate::ser::Serializer;
use chrono::Utc;
use graph::{node_content_hash, relationship_identity_hash, Value};
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::time::{Duration, Instant};

const NODE_VAR: &str = "n";
const REL_VAR: &str = "r";

#[derive(Debug, Clone)]
pub struct ExportOutcome {
    pub file_path: PathBuf,
    pub file_name: String,
    pub nodes: u64,
    pub relationships: u64,
    pub error_records: u64,
    pub warning_records: u64,
    pub bytes_written: u64,
    pub duration: Duration,
}

#[derive(Debug, Default)]
struct LabelStat {
    count: u64,
    bytes: u64,
    first_seen_ms: Option<u64>,
    last_seen_ms: u64,
}

pub struct Exporter<'a> {
    client: &'a dyn GraphClient,
    config: &'a ExportConfig,
    cancel: CancelFlag,
}

impl<'a> Exporter<'a> {
    pub fn new(client: &'a dyn GraphClient, config: &'a ExportConfig, cancel: CancelFlag) -> Self {
        Self {
            client,
            config,
            cancel,
        }
    }

    #[tracing::instrument(skip_all, fields(database = %self.config.neo4j_database))]
    pub async fn run(&self) -> Result<ExportOutcome, ExportError> {
        self.config.validate()?;

        let started_wall = Utc::now();
        let started = Instant::now();

        let server = self.client.server_info().await?;
        tracing::info!(
            version = %server.version_string,
            edition = %server.edition,
            "connected to source"
        );

        let (schema, statistics) = if self.config.skip_schema_collection {
            (None, DatabaseStatistics::default())
        } else {
            self.collect_schema().await?
        };

        let export_id = uuid::Uuid::new_v4().to_string();
        let export_dir = &self.config.output_directory;
        std::fs::create_dir_all(export_dir)
            .map_err(|e| ExportError::filesystem("creating output directory", e))?;
        let temp = tempfile::Builder::new()
            .prefix(".n4jet-")
            .suffix(".jsonl.tmp")
            .tempfile_in(export_dir)
            .map_err(|e| ExportError::filesystem("creating temp file", e))?;
        tracing::debug!(temp = %temp.path().display(), "opened temp output file");

        let mut meta = Metadata::preliminary(
            self.config,
            &server,
            schema.clone(),
            statistics,
            &export_id,
            started_wall,
        );
        let preliminary_len = serde_json::to_string(&meta)
            .map_err(|e| ExportError::filesystem("serializing metadata", e.into()))?
            .len();
        let expected_labels = schema.as_ref().map(|s| s.labels.len()).unwrap_or(64);
        let width = metadata::reserved_width(preliminary_len, expected_labels);

        let mut buf = JsonBuf::new(
            self.config.json_buffer_size_kb * 1024,
            self.config.limits.max_record_bytes,
        );
        let mut accum = ErrorAccumulator::new();
        let mut queued_errors: Vec<ErrorRecord> = Vec::new();
        let mut endpoint_hashes: HashMap<String, String> = HashMap::new();
        let mut label_stats: BTreeMap<String, LabelStat> = BTreeMap::new();
        let mut nodes = 0u64;
        let mut relationships = 0u64;
        let mut node_perf = PerfTracker::new();
        let mut rel_perf = PerfTracker::new();
        let node_strategy: Strategy;
        let mut rel_strategy: Option<Strategy> = None;
        let mut cancelled;

        {
            let mut writer = BufWriter::new(temp.as_file());
            metadata::write_reserved_line(&mut writer, &meta, width)
                .map_err(|e| ExportError::filesystem("writing metadata line", e))?;

            // Pass 1: nodes.
            let mut progress = |entity: Entity, records: u64, total: Option<u64>| {
                tracing::info!(entity = entity.as_str(), records, total = ?total, "export progress");
            };
            let count_query = (!self.config.skip_schema_collection)
                .then_some("MATCH (n) RETURN count(n) AS total");
            let outcome = paginate::drive(
                self.client,
                self.spec(Entity::Nodes, server.version, count_query, &node_query),
                &self.cancel,
                &mut node_perf,
                Some(&mut progress),
                |mut record: Record| {
                    let node = match record.take_node(NODE_VAR) {
                        Ok(node) => node,
                        Err(err) => {
                            accum.track(
                                Severity::Error,
                                "node",
                                "record_access",
                                &err.to_string(),
                                None,
                            );
                            return Ok(());
                        }
                    };
                    let hash = self
                        .config
                        .enable_hashed_ids
                        .then(|| node_content_hash(&node.labels, &node.properties));
                    if let Some(hash) = &hash {
                        endpoint_hashes.insert(node.element_id.clone(), hash.clone());
                    }

                    let emitted = emit_record(&mut buf, self.config, "node", &node.element_id, |ser| {
                        ser.node_record(&node, hash.as_deref(), &export_id)
                    })
                    .apply(&mut accum, "node", &node.element_id);
                    if emitted == 0 {
                        return Ok(());
                    }

                    let elapsed_ms = started.elapsed().as_millis() as u64;
                    if !node.labels.is_empty() {
                        let share = emitted as u64 / node.labels.len() as u64;
                        for label in &node.labels {
                            let stat = label_stats.entry(label.clone()).or_default();
                            stat.count += 1;
                            stat.bytes += share;
                            stat.first_seen_ms.get_or_insert(elapsed_ms);
                            stat.last_seen_ms = elapsed_ms;
                        }
                    }
                    nodes += 1;
                    buf.flush_to(&mut writer)
                        .map_err(|e| ExportError::filesystem("writing node record", e))?;
                    Ok(())
                },
            )
            .await?;
            node_strategy = outcome.strategy;
            cancelled = outcome.cancelled;

            // Error/warning records from pass 1 queue up until all data lines
            // are out.
            accum.flush(&mut queued_errors);

            // Pass 2: relationships.
            if !cancelled {
                let count_query = (!self.config.skip_schema_collection)
                    .then_some("MATCH ()-[r]->() RETURN count(r) AS total");
                let outcome = paginate::drive(
                    self.client,
                    self.spec(Entity::Relationships, server.version, count_query, &rel_query),
                    &self.cancel,
                    &mut rel_perf,
                    Some(&mut progress),
                    |mut record: Record| {
                        let rel = match record.take_relationship(REL_VAR) {
                            Ok(rel) => rel,
                            Err(err) => {
                                accum.track(
                                    Severity::Error,
                                    "relationship",
                                    "record_access",
                                    &err.to_string(),
                                    None,
                                );
                                return Ok(());
                            }
                        };

                        let start_hash = resolve_endpoint(
                            self.config.enable_hashed_ids,
                            &endpoint_hashes,
                            &rel.start_element_id,
                            &rel.element_id,
                            "start",
                            &mut accum,
                        );
                        let end_hash = resolve_endpoint(
                            self.config.enable_hashed_ids,
                            &endpoint_hashes,
                            &rel.end_element_id,
                            &rel.element_id,
                            "end",
                            &mut accum,
                        );
                        let identity_hash = self.config.enable_hashed_ids.then(|| {
                            relationship_identity_hash(
                                &rel.rel_type,
                                &rel.start_element_id,
                                &rel.end_element_id,
                                &rel.properties,
                            )
                        });

                        let emitted =
                            emit_record(&mut buf, self.config, "relationship", &rel.element_id, |ser| {
                                ser.relationship_record(
                                    &rel,
                                    identity_hash.as_deref(),
                                    &start_hash,
                                    &end_hash,
                                    &export_id,
                                )
                            })
                            .apply(&mut accum, "relationship", &rel.element_id);
                        if emitted == 0 {
                            return Ok(());
                        }

                        relationships += 1;
                        buf.flush_to(&mut writer)
                            .map_err(|e| ExportError::filesystem("writing relationship record", e))?;
                        Ok(())
                    },
                )
                .await?;
                rel_strategy = Some(outcome.strategy);
                cancelled = outcome.cancelled;
            }

            accum.flush(&mut queued_errors);

            // The contiguous error/warning block after all data lines.
            for record in &queued_errors {
                let line = serde_json::to_string(record)
                    .map_err(|e| ExportError::filesystem("serializing error record", e.into()))?;
                writer
                    .write_all(line.as_bytes())
                    .and_then(|()| writer.write_all(b"\n"))
                    .map_err(|e| ExportError::filesystem("writing error record", e))?;
            }

            writer
                .flush()
                .map_err(|e| ExportError::filesystem("flushing output", e))?;
        }

        // The endpoint table exists only for the duration of one export.
        drop(endpoint_hashes);

        let error_records = queued_errors
            .iter()
            .filter(|r| r.record_type == "error")
            .count() as u64;
        let warning_records = queued_errors.len() as u64 - error_records;
        let total_lines = 1 + nodes + relationships + queued_errors.len() as u64;
        let file_len = temp
            .as_file()
            .metadata()
            .map_err(|e| ExportError::filesystem("reading temp file size", e))?
            .len();

        meta.database_statistics = DatabaseStatistics {
            node_count: nodes,
            rel_count: relationships,
            label_count: schema
                .as_ref()
                .map(|s| s.labels.len() as u64)
                .unwrap_or(label_stats.len() as u64),
            rel_type_count: schema
                .as_ref()
                .map(|s| s.relationship_types.len() as u64)
                .unwrap_or_default(),
        };
        meta.error_summary.error_count = error_records;
        meta.error_summary.warning_count = warning_records;
        meta.error_summary.has_errors = error_records > 0;
        meta.export_manifest.total_export_duration_seconds = started.elapsed().as_secs_f64();
        meta.export_manifest.bytes_written = file_len;
        meta.export_manifest.total_lines = total_lines;
        meta.export_manifest.cancelled = cancelled.then_some(true);
        meta.export_manifest.file_statistics = label_stats
            .iter()
            .map(|(label, stat)| FileStatistic {
                label: label.clone(),
                record_count: stat.count,
                bytes_written: stat.bytes,
                export_duration_ms: stat
                    .last_seen_ms
                    .saturating_sub(stat.first_seen_ms.unwrap_or(0)),
            })
            .collect();
        meta.pagination_performance = Some(PaginationPerformance {
            nodes: node_perf.metrics(node_strategy.as_str()),
            relationships: rel_strategy.and_then(|s| rel_perf.metrics(s.as_str())),
        });

        {
            let mut file: &File = temp.as_file();
            metadata::patch_reserved_line(&mut file, &mut meta, width)
                .map_err(|e| ExportError::filesystem("patching metadata line", e))?;
            file.sync_all()
                .map_err(|e| ExportError::filesystem("syncing output file", e))?;
        }

        if cancelled {
            let reason = self.cancel.reason();
            tracing::warn!(?reason, "export cancelled; deleting temp file");
            temp.close()
                .map_err(|e| ExportError::filesystem("removing temp file", e))?;
            return Err(match reason {
                Some(CancelReason::Resource(msg)) => ExportError::Resource(msg),
                _ => ExportError::Cancelled,
            });
        }

        let file_name = metadata::output_filename(
            &self.config.neo4j_database,
            &started_wall,
            nodes,
            relationships,
            &export_id,
        );
        let file_path = export_dir.join(&file_name);
        temp.persist(&file_path)
            .map_err(|e| ExportError::filesystem("renaming output file", e.error))?;

        let outcome = ExportOutcome {
            file_path,
            file_name,
            nodes,
            relationships,
            error_records,
            warning_records,
            bytes_written: file_len,
            duration: started.elapsed(),
        };
        tracing::info!(
            file = %outcome.file_path.display(),
            nodes = outcome.nodes,
            relationships = outcome.relationships,
            errors = outcome.error_records,
            warnings = outcome.warning_records,
            bytes = outcome.bytes_written,
            elapsed_s = outcome.duration.as_secs_f64(),
            "export complete"
        );
        Ok(outcome)
    }

    fn spec<'q>(
        &self,
        entity: Entity,
        version: ServerVersion,
        count_query: Option<&'q str>,
        builder: &'q (dyn Fn(ServerVersion, &CursorState<'_>, u64) -> Query + Send + Sync),
    ) -> PaginateSpec<'q> {
        PaginateSpec {
            entity,
            version,
            batch_size: self.config.batch_size,
            count_query,
            source: QuerySource::Builder(builder),
            timeout: self.config.query_timeout(),
            max_retries: self.config.max_retries,
            retry_min: self.config.retry_min(),
            retry_max: self.config.retry_max(),
        }
    }

    async fn collect_schema(
        &self,
    ) -> Result<(Option<DatabaseSchema>, DatabaseStatistics), ExportError> {
        let labels = self
            .string_column("CALL db.labels() YIELD label RETURN label", "label")
            .await?;
        let relationship_types = self
            .string_column(
                "CALL db.relationshipTypes() YIELD relationshipType RETURN relationshipType",
                "relationshipType",
            )
            .await?;
        let node_count = self.count("MATCH (n) RETURN count(n) AS total").await?;
        let rel_count = self.count("MATCH ()-[r]->() RETURN count(r) AS total").await?;
        tracing::debug!(
            labels = labels.len(),
            relationship_types = relationship_types.len(),
            node_count,
            rel_count,
            "collected schema"
        );

        let statistics = DatabaseStatistics {
            node_count,
            rel_count,
            label_count: labels.len() as u64,
            rel_type_count: relationship_types.len() as u64,
        };
        Ok((
            Some(DatabaseSchema {
                labels,
                relationship_types,
            }),
            statistics,
        ))
    }

    async fn string_column(&self, query: &str, field: &str) -> Result<Vec<String>, ExportError> {
        let mut cursor = self.client.run(query, Vec::new()).await?;
        let mut out = Vec::new();
        while let Some(record) = cursor.fetch().await? {
            if let Some(Value::String(s)) = record.get(field) {
                out.push(s.clone());
            }
        }
        cursor.consume().await?;
        Ok(out)
    }

    async fn count(&self, query: &str) -> Result<u64, ExportError> {
        let mut cursor = self.client.run(query, Vec::new()).await?;
        let total = cursor
            .fetch()
            .await?
            .and_then(|record| record.get(TOTAL_FIELD).and_then(Value::as_u64))
            .unwrap_or(0);
        cursor.consume().await?;
        Ok(total)
    }
}

/// Result of serializing one record into the buffer: the byte length on
/// success, zero when the record had to be dropped, plus the issues to track.
struct Emitted {
    bytes: usize,
    issues: Vec<crate::ser::Issue>,
    failure: Option<String>,
}

impl Emitted {
    /// Feed the collected issues into the accumulator with entity context.
    /// Returns the emitted byte length (zero if the record was dropped).
    fn apply(self, accum: &mut ErrorAccumulator, entity: &'static str, element_id: &str) -> usize {
        if let Some(message) = &self.failure {
            accum.track(
                Severity::Warning,
                entity,
                "record_too_large",
                message,
                Some(element_id),
            );
        }
        for issue in self.issues {
            accum.track(
                issue.severity,
                entity,
                issue.class,
                &issue.message,
                Some(element_id),
            );
        }
        self.bytes
    }
}

/// Serialize a record with failure isolation. On a per-record cap breach the
/// buffer rewinds and a minimal stub record (still a valid JSON object, with
/// a `_serialization_error` field) takes its place, so the export progresses
/// to the next record. Output validation re-parses the emitted line when
/// enabled.
fn emit_record(
    buf: &mut JsonBuf,
    config: &ExportConfig,
    record_type: &'static str,
    element_id: &str,
    write: impl FnOnce(&mut Serializer<'_>) -> Result<(), crate::jsonbuf::JsonBufError>,
) -> Emitted {
    let mark = buf.mark();
    let mut ser = Serializer::new(&config.limits, buf);
    let result = write(&mut ser);
    let mut issues = ser.take_issues();
    let mut failure = None;

    if let Err(err) = result {
        buf.rewind(mark);
        let message = err.to_string();
        let mut stub = Serializer::new(&config.limits, buf);
        if stub.error_stub(record_type, element_id, &message).is_err() {
            buf.rewind(mark);
        }
        failure = Some(message);
    }

    if buf.bytes_since(mark) > 0 {
        if buf.newline().is_err() {
            buf.rewind(mark);
            failure.get_or_insert_with(|| "record terminator exceeds the byte cap".to_string());
        } else if config.validate_json {
            if serde_json::from_slice::<serde::de::IgnoredAny>(buf.slice_since(mark)).is_err() {
                buf.rewind(mark);
                issues.push(crate::ser::Issue {
                    severity: Severity::Error,
                    class: "invalid_json",
                    message: "emitted record failed JSON validation".to_string(),
                });
            }
        }
    }

    Emitted {
        bytes: buf.bytes_since(mark),
        issues,
        failure,
    }
}

fn resolve_endpoint(
    hashing_enabled: bool,
    endpoint_hashes: &HashMap<String, String>,
    endpoint_element_id: &str,
    rel_element_id: &str,
    side: &'static str,
    accum: &mut ErrorAccumulator,
) -> String {
    if !hashing_enabled {
        return String::new();
    }
    match endpoint_hashes.get(endpoint_element_id) {
        Some(hash) => hash.clone(),
        None => {
            let class = match side {
                "start" => "missing_start_endpoint",
                _ => "missing_end_endpoint",
            };
            accum.track(
                Severity::Warning,
                "relationship",
                class,
                &format!("Stable ID not found for {side} node {endpoint_element_id}"),
                Some(rel_element_id),
            );
            String::new()
        }
    }
}

/// Keyset-aware node query. 4.x paginates on numeric `id()`, 5.x+ on
/// `elementId()` strings; both order ascending so the max id of a batch is
/// the next cursor.
fn node_query(version: ServerVersion, cursor: &CursorState<'_>, batch_size: u64) -> Query {
    entity_query("MATCH (n)", NODE_VAR, version, cursor, batch_size)
}

fn rel_query(version: ServerVersion, cursor: &CursorState<'_>, batch_size: u64) -> Query {
    entity_query("MATCH ()-[r]->()", REL_VAR, version, cursor, batch_size)
}

fn entity_query(
    pattern: &str,
    var: &str,
    version: ServerVersion,
    cursor: &CursorState<'_>,
    batch_size: u64,
) -> Query {
    let id_expr = if version.uses_element_ids() {
        format!("elementId({var})")
    } else {
        format!("id({var})")
    };

    match cursor {
        CursorState::Keyset(None) => Query {
            text: format!(
                "{pattern} RETURN {var}, {id_expr} AS {CURSOR_FIELD} \
                 ORDER BY {CURSOR_FIELD} ASC LIMIT $limit"
            ),
            params: vec![("limit", Value::UInt(batch_size))],
        },
        CursorState::Keyset(Some(last_id)) => Query {
            text: format!(
                "{pattern} WHERE {id_expr} > $cursor RETURN {var}, {id_expr} AS {CURSOR_FIELD} \
                 ORDER BY {CURSOR_FIELD} ASC LIMIT $limit"
            ),
            params: vec![
                ("cursor", last_id.to_value()),
                ("limit", Value::UInt(batch_size)),
            ],
        },
        CursorState::SkipLimit { skip } => Query {
            text: format!("{pattern} RETURN {var} SKIP $skip LIMIT $limit"),
            params: vec![
                ("skip", Value::UInt(*skip)),
                ("limit", Value::UInt(batch_size)),
            ],
        },
    }
}
