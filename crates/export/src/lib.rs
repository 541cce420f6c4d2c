//! The streaming export engine.
//!
//! The pipeline is: configuration → orchestrator → pagination driver →
//! serializer → JSON buffer → output file. Side channels feed the error
//! accumulator during serialization and the endpoint hash table between the
//! two passes. One writer task owns every mutable piece; the database client
//! is the only source of suspension.

pub mod accum;
pub mod cancel;
pub mod client;
pub mod config;
pub mod error;
pub mod jsonbuf;
pub mod metadata;
pub mod paginate;
pub mod perf;
pub mod pipeline;
pub mod ser;

pub use cancel::{CancelFlag, CancelReason};
pub use client::{ClientError, GraphClient, Record, RecordCursor, ServerInfo, ServerVersion};
pub use config::{ExportConfig, SerLimits};
pub use error::{ConfigError, ExportError};
pub use pipeline::{ExportOutcome, Exporter};
