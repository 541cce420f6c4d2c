//! n4jet: streaming Neo4j → JSONL exporter.
//!
//! Configuration comes from flags or `N4JET_*` environment variables; the
//! process exit code encodes the failure class (0 success, 2 connection,
//! 3 resource, 5 export, 6 config, 7 query, 130 cancelled).

mod http_client;
mod logging;
mod watchdog;

use clap::Parser;
use export::{CancelFlag, CancelReason, ExportConfig, ExportError, Exporter, SerLimits};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(name = "n4jet", version, about = "Export a Neo4j property graph to JSONL")]
struct Cli {
    /// HTTP(S) URI of the source server.
    #[arg(long, env = "N4JET_NEO4J_URI", default_value = "http://localhost:7474")]
    neo4j_uri: String,

    #[arg(long, env = "N4JET_NEO4J_USER", default_value = "neo4j")]
    neo4j_user: String,

    #[arg(long, env = "N4JET_NEO4J_PASSWORD", default_value = "", hide_env_values = true)]
    neo4j_password: String,

    /// Database to export; also feeds the output filename.
    #[arg(long, env = "N4JET_NEO4J_DATABASE", default_value = "neo4j")]
    neo4j_database: String,

    #[arg(long, env = "N4JET_OUTPUT_DIRECTORY", default_value = ".")]
    output_directory: PathBuf,

    /// Records fetched per query batch.
    #[arg(long, env = "N4JET_BATCH_SIZE", default_value_t = 10_000)]
    batch_size: u64,

    /// Initial JSON buffer capacity.
    #[arg(long, env = "N4JET_JSON_BUFFER_SIZE_KB", default_value_t = 16)]
    json_buffer_size_kb: usize,

    /// Watchdog: cancel when process memory exceeds this.
    #[arg(long, env = "N4JET_MAX_MEMORY_MB", default_value_t = 1024)]
    max_memory_mb: u64,

    /// Watchdog: cancel when free disk under the output directory drops below this.
    #[arg(long, env = "N4JET_MIN_DISK_GB", default_value_t = 10)]
    min_disk_gb: u64,

    /// Skip the pre-flight schema and count probes.
    #[arg(long, env = "N4JET_SKIP_SCHEMA_COLLECTION")]
    skip_schema_collection: bool,

    /// Include content hashes on every record.
    #[arg(long, env = "N4JET_ENABLE_HASHED_IDS", default_value_t = true, action = clap::ArgAction::Set)]
    enable_hashed_ids: bool,

    #[arg(long, env = "N4JET_MAX_RETRIES", default_value_t = 5)]
    max_retries: u32,

    #[arg(long, env = "N4JET_RETRY_DELAY_MS", default_value_t = 1_000)]
    retry_delay_ms: u64,

    #[arg(long, env = "N4JET_MAX_RETRY_DELAY_MS", default_value_t = 30_000)]
    max_retry_delay_ms: u64,

    #[arg(long, env = "N4JET_QUERY_TIMEOUT_SECONDS", default_value_t = 300)]
    query_timeout_seconds: u64,

    #[arg(long, env = "N4JET_DEBUG")]
    debug: bool,

    /// Re-parse every emitted line before committing it.
    #[arg(long, env = "N4JET_VALIDATE_JSON", default_value_t = true, action = clap::ArgAction::Set)]
    validate_json: bool,

    /// Accept invalid TLS certificates.
    #[arg(long, env = "N4JET_ALLOW_INSECURE")]
    allow_insecure: bool,

    #[arg(long, env = "N4JET_MAX_STRING_LENGTH", default_value_t = 10_000_000)]
    max_string_length: usize,

    #[arg(long, env = "N4JET_MAX_BINARY_LENGTH", default_value_t = 50_000_000)]
    max_binary_length: usize,

    #[arg(long, env = "N4JET_MAX_COLLECTION_ITEMS", default_value_t = 10_000)]
    max_collection_items: usize,

    #[arg(long, env = "N4JET_MAX_PATH_LENGTH", default_value_t = 100_000)]
    max_path_length: usize,

    #[arg(long, env = "N4JET_PATH_FULL_MODE_LIMIT", default_value_t = 1_000)]
    path_full_mode_limit: usize,

    #[arg(long, env = "N4JET_PATH_COMPACT_MODE_LIMIT", default_value_t = 10_000)]
    path_compact_mode_limit: usize,

    #[arg(long, env = "N4JET_PATH_PROPERTY_DEPTH", default_value_t = 5)]
    path_property_depth: usize,

    #[arg(long, env = "N4JET_MAX_NESTED_DEPTH", default_value_t = 10)]
    max_nested_depth: usize,

    #[arg(long, env = "N4JET_NESTED_SHALLOW_MODE_DEPTH", default_value_t = 5)]
    nested_shallow_mode_depth: usize,

    #[arg(long, env = "N4JET_NESTED_REFERENCE_MODE_DEPTH", default_value_t = 8)]
    nested_reference_mode_depth: usize,

    #[arg(long, env = "N4JET_MAX_LABELS_PER_NODE", default_value_t = 100)]
    max_labels_per_node: usize,

    #[arg(long, env = "N4JET_MAX_LABELS_IN_REFERENCE_MODE", default_value_t = 10)]
    max_labels_in_reference_mode: usize,

    #[arg(long, env = "N4JET_MAX_LABELS_IN_PATH_COMPACT", default_value_t = 5)]
    max_labels_in_path_compact: usize,

    #[command(flatten)]
    log: logging::LogArgs,
}

impl Cli {
    fn to_config(&self) -> ExportConfig {
        ExportConfig {
            neo4j_uri: self.neo4j_uri.clone(),
            neo4j_user: self.neo4j_user.clone(),
            neo4j_password: self.neo4j_password.clone(),
            neo4j_database: self.neo4j_database.clone(),
            output_directory: self.output_directory.clone(),
            batch_size: self.batch_size,
            json_buffer_size_kb: self.json_buffer_size_kb,
            max_memory_mb: self.max_memory_mb,
            min_disk_gb: self.min_disk_gb,
            skip_schema_collection: self.skip_schema_collection,
            enable_hashed_ids: self.enable_hashed_ids,
            max_retries: self.max_retries,
            retry_delay_ms: self.retry_delay_ms,
            max_retry_delay_ms: self.max_retry_delay_ms,
            query_timeout_seconds: self.query_timeout_seconds,
            debug: self.debug,
            validate_json: self.validate_json,
            allow_insecure: self.allow_insecure,
            limits: SerLimits {
                max_string_length: self.max_string_length,
                max_binary_length: self.max_binary_length,
                max_collection_items: self.max_collection_items,
                max_path_length: self.max_path_length,
                path_full_mode_limit: self.path_full_mode_limit,
                path_compact_mode_limit: self.path_compact_mode_limit,
                path_property_depth: self.path_property_depth,
                max_nested_depth: self.max_nested_depth,
                nested_shallow_mode_depth: self.nested_shallow_mode_depth,
                nested_reference_mode_depth: self.nested_reference_mode_depth,
                max_labels_per_node: self.max_labels_per_node,
                max_labels_in_reference_mode: self.max_labels_in_reference_mode,
                max_labels_in_path_compact: self.max_labels_in_path_compact,
                ..SerLimits::default()
            },
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(&cli.log, cli.debug);

    match run(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "export failed");
            ExitCode::from(err.exit_code() as u8)
        }
    }
}

async fn run(cli: &Cli) -> Result<(), ExportError> {
    let config = cli.to_config();
    config.validate()?;

    let cancel = CancelFlag::new();

    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received; finishing the current record");
            interrupt.cancel(CancelReason::Interrupt);
        }
    });

    watchdog::spawn(
        config.max_memory_mb,
        config.min_disk_gb,
        config.output_directory.clone(),
        cancel.clone(),
    );

    let client = http_client::HttpClient::new(&config)?;
    let outcome = Exporter::new(&client, &config, cancel).run().await?;
    println!("{}", outcome.file_path.display());
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn defaults_mirror_the_library_defaults() {
        let cli = Cli::parse_from(["n4jet"]);
        let config = cli.to_config();
        let reference = ExportConfig::default();
        assert_eq!(config.batch_size, reference.batch_size);
        assert_eq!(config.max_retries, reference.max_retries);
        assert_eq!(config.limits.max_string_length, reference.limits.max_string_length);
        assert_eq!(config.limits.max_nested_depth, reference.limits.max_nested_depth);
        assert!(config.enable_hashed_ids);
        assert!(config.validate_json);
    }

    #[test]
    fn flags_reach_the_limits() {
        let cli = Cli::parse_from([
            "n4jet",
            "--max-collection-items",
            "50",
            "--enable-hashed-ids",
            "false",
        ]);
        let config = cli.to_config();
        assert_eq!(config.limits.max_collection_items, 50);
        assert!(!config.enable_hashed_ids);
    }
}
