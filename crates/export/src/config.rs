//! Export configuration. The CLI populates this from `N4JET_*` environment
//! variables; defaults here are the authoritative ones.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub neo4j_uri: String,
    pub neo4j_user: String,
    #[serde(skip_serializing)]
    pub neo4j_password: String,
    /// Database to export; also feeds the output filename.
    pub neo4j_database: String,

    pub output_directory: PathBuf,
    pub batch_size: u64,
    pub json_buffer_size_kb: usize,

    pub max_memory_mb: u64,
    pub min_disk_gb: u64,

    pub skip_schema_collection: bool,
    pub enable_hashed_ids: bool,

    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
    pub query_timeout_seconds: u64,

    pub debug: bool,
    pub validate_json: bool,
    pub allow_insecure: bool,

    #[serde(flatten)]
    pub limits: SerLimits,
}

/// The serializer's degradation thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SerLimits {
    pub max_string_length: usize,
    pub max_binary_length: usize,
    pub max_collection_items: usize,

    pub max_path_length: usize,
    pub path_full_mode_limit: usize,
    pub path_compact_mode_limit: usize,
    pub path_property_depth: usize,

    pub max_nested_depth: usize,
    pub nested_shallow_mode_depth: usize,
    pub nested_reference_mode_depth: usize,

    pub max_labels_per_node: usize,
    pub max_labels_in_reference_mode: usize,
    pub max_labels_in_path_compact: usize,

    /// Hard cap on one serialized record. A record exceeding this fails (and
    /// is replaced by a stub), not the export.
    pub max_record_bytes: usize,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            neo4j_uri: "bolt://localhost:7687".to_string(),
            neo4j_user: "neo4j".to_string(),
            neo4j_password: String::new(),
            neo4j_database: "neo4j".to_string(),
            output_directory: PathBuf::from("."),
            batch_size: 10_000,
            json_buffer_size_kb: 16,
            max_memory_mb: 1024,
            min_disk_gb: 10,
            skip_schema_collection: false,
            enable_hashed_ids: true,
            max_retries: 5,
            retry_delay_ms: 1_000,
            max_retry_delay_ms: 30_000,
            query_timeout_seconds: 300,
            debug: false,
            validate_json: true,
            allow_insecure: false,
            limits: SerLimits::default(),
        }
    }
}

impl Default for SerLimits {
    fn default() -> Self {
        Self {
            max_string_length: 10_000_000,
            max_binary_length: 50_000_000,
            max_collection_items: 10_000,
            max_path_length: 100_000,
            path_full_mode_limit: 1_000,
            path_compact_mode_limit: 10_000,
            path_property_depth: 5,
            max_nested_depth: 10,
            nested_shallow_mode_depth: 5,
            nested_reference_mode_depth: 8,
            max_labels_per_node: 100,
            max_labels_in_reference_mode: 10,
            max_labels_in_path_compact: 5,
            max_record_bytes: 256 * 1024 * 1024,
        }
    }
}

impl ExportConfig {
    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_seconds)
    }

    pub fn retry_min(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn retry_max(&self) -> Duration {
        Duration::from_millis(self.max_retry_delay_ms)
    }

    /// Validate every field and report all problems at once.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        match url::Url::parse(&self.neo4j_uri) {
            Ok(url) => {
                let scheme = url.scheme();
                if !matches!(
                    scheme,
                    "bolt" | "bolt+s" | "neo4j" | "neo4j+s" | "http" | "https"
                ) {
                    errors.push(ConfigError::invalid(
                        "neo4j_uri",
                        format!("unsupported scheme '{scheme}'"),
                    ));
                }
            }
            Err(err) => {
                errors.push(ConfigError::invalid("neo4j_uri", err.to_string()));
            }
        }

        if self.neo4j_user.is_empty() {
            errors.push(ConfigError::invalid("neo4j_user", "must not be empty"));
        }
        if self.batch_size == 0 {
            errors.push(ConfigError::invalid("batch_size", "must be positive"));
        }
        if self.json_buffer_size_kb == 0 {
            errors.push(ConfigError::invalid(
                "json_buffer_size_kb",
                "must be positive",
            ));
        }
        if self.retry_delay_ms > self.max_retry_delay_ms {
            errors.push(ConfigError::invalid(
                "retry_delay_ms",
                format!(
                    "initial delay {}ms exceeds max_retry_delay_ms {}ms",
                    self.retry_delay_ms, self.max_retry_delay_ms
                ),
            ));
        }
        if self.query_timeout_seconds == 0 {
            errors.push(ConfigError::invalid(
                "query_timeout_seconds",
                "must be positive",
            ));
        }
        if self.output_directory.as_os_str().is_empty() {
            errors.push(ConfigError::invalid(
                "output_directory",
                "must not be empty",
            ));
        }

        errors.extend(self.limits.problems());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Aggregate(errors))
        }
    }
}

impl SerLimits {
    fn problems(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.nested_shallow_mode_depth > self.nested_reference_mode_depth {
            errors.push(ConfigError::invalid(
                "nested_shallow_mode_depth",
                "must not exceed nested_reference_mode_depth",
            ));
        }
        if self.nested_reference_mode_depth > self.max_nested_depth {
            errors.push(ConfigError::invalid(
                "nested_reference_mode_depth",
                "must not exceed max_nested_depth",
            ));
        }
        if self.path_full_mode_limit > self.path_compact_mode_limit {
            errors.push(ConfigError::invalid(
                "path_full_mode_limit",
                "must not exceed path_compact_mode_limit",
            ));
        }
        if self.path_compact_mode_limit > self.max_path_length {
            errors.push(ConfigError::invalid(
                "path_compact_mode_limit",
                "must not exceed max_path_length",
            ));
        }
        if self.max_collection_items == 0 {
            errors.push(ConfigError::invalid(
                "max_collection_items",
                "must be positive",
            ));
        }
        if self.max_record_bytes == 0 {
            errors.push(ConfigError::invalid("max_record_bytes", "must be positive"));
        }

        errors
    }
}
