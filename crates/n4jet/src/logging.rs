//! Logging setup shared by every invocation. Logs go to stderr so the data
//! stream on stdout (if any) and shell pipelines stay clean.

use std::io::IsTerminal;
use tracing_subscriber::fmt::format::FmtSpan;

#[derive(Debug, clap::Args)]
pub struct LogArgs {
    /// The log verbosity. Can be one of trace|debug|info|warn|error|off.
    #[arg(
        long = "log.level",
        env = "N4JET_LOG_LEVEL",
        default_value = "info",
        global = true
    )]
    pub level: String,

    #[arg(long = "log.format", value_enum, global = true)]
    pub format: Option<LogFormat>,
}

/// The format for logs.
#[derive(Debug, clap::ValueEnum, Clone, Copy)]
pub enum LogFormat {
    /// One JSON object per line, for programmatic consumers.
    Json,
    /// Plain text for interactive terminals.
    Text,
}

/// Initialize logging. Panics if called twice. `debug` raises an unchanged
/// default level to `debug` without overriding an explicit choice.
pub fn init(args: &LogArgs, debug: bool) {
    let filter = if debug && args.level == "info" {
        "debug"
    } else {
        &args.level
    };
    let format = args.format.unwrap_or_else(|| {
        if std::io::stderr().is_terminal() {
            LogFormat::Text
        } else {
            LogFormat::Json
        }
    });

    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        // CLOSE span events record timing for each pass once it finishes
        // without per-entry noise.
        .with_span_events(FmtSpan::CLOSE);

    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}
