//! The database-client boundary. The engine never talks to a driver
//! directly; it consumes these traits, and adapters convert driver errors
//! into `ClientError` variants at this seam. Inside the core, errors are
//! values.

use graph::{Node, Path, Relationship, Value};

/// Query parameters. Parameter names in the engine's own queries are static.
pub type Params = Vec<(&'static str, Value)>;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("authentication rejected: {0}")]
    Authentication(String),

    #[error("connection failure: {0}")]
    Connection(String),

    #[error("query failure: {0}")]
    Query(String),

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl ClientError {
    /// Connection failures are transient; everything else is not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClientError::Connection(_))
    }
}

#[async_trait::async_trait]
pub trait GraphClient: Send + Sync {
    /// Run a parameterized query, returning a cursor over its records.
    async fn run(&self, query: &str, params: Params) -> Result<Box<dyn RecordCursor>, ClientError>;

    /// Probe the server for its version and edition.
    async fn server_info(&self) -> Result<ServerInfo, ClientError>;
}

#[async_trait::async_trait]
pub trait RecordCursor: Send {
    /// Fetch the next record; `None` ends the stream.
    async fn fetch(&mut self) -> Result<Option<Record>, ClientError>;

    /// Discard any remaining records and return the query summary.
    async fn consume(self: Box<Self>) -> Result<Summary, ClientError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Summary {
    pub result_available_after_ms: Option<i64>,
    pub result_consumed_after_ms: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub version: ServerVersion,
    pub version_string: String,
    pub edition: String,
}

/// Major server generations the exporter distinguishes. 4.x uses numeric
/// internal ids; 5.x and later use element-id strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerVersion {
    V4,
    V5,
    V6,
    Unknown,
}

impl ServerVersion {
    pub fn parse(version: &str) -> Self {
        match version.split('.').next().and_then(|s| s.parse::<u32>().ok()) {
            Some(4) => ServerVersion::V4,
            Some(5) => ServerVersion::V5,
            Some(6) => ServerVersion::V6,
            _ => ServerVersion::Unknown,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, ServerVersion::Unknown)
    }

    /// Whether ids are element-id strings rather than numeric ids.
    pub fn uses_element_ids(&self) -> bool {
        matches!(self, ServerVersion::V5 | ServerVersion::V6)
    }
}

/// One result row. Field access consumes the row; the engine owns every
/// value it serializes.
#[derive(Debug, Clone)]
pub struct Record {
    fields: Vec<(String, Value)>,
}

#[derive(Debug, thiserror::Error)]
#[error("field '{field}' holds {found}, expected {expected}")]
pub struct AccessError {
    pub field: String,
    pub expected: &'static str,
    pub found: &'static str,
}

impl Record {
    pub fn new(fields: Vec<(String, Value)>) -> Self {
        Self { fields }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value)
    }

    /// Remove and return a field by name.
    pub fn take(&mut self, key: &str) -> Option<Value> {
        let index = self.fields.iter().position(|(name, _)| name == key)?;
        Some(self.fields.remove(index).1)
    }

    pub fn take_node(&mut self, key: &str) -> Result<Node, AccessError> {
        match self.take(key) {
            Some(Value::Node(node)) => Ok(node),
            Some(other) => Err(self.access_error(key, "node", other.type_name())),
            None => Err(self.access_error(key, "node", "nothing")),
        }
    }

    pub fn take_relationship(&mut self, key: &str) -> Result<Relationship, AccessError> {
        match self.take(key) {
            Some(Value::Relationship(rel)) => Ok(rel),
            Some(other) => Err(self.access_error(key, "relationship", other.type_name())),
            None => Err(self.access_error(key, "relationship", "nothing")),
        }
    }

    pub fn take_path(&mut self, key: &str) -> Result<Path, AccessError> {
        match self.take(key) {
            Some(Value::Path(path)) => Ok(path),
            Some(other) => Err(self.access_error(key, "path", other.type_name())),
            None => Err(self.access_error(key, "path", "nothing")),
        }
    }

    fn access_error(&self, field: &str, expected: &'static str, found: &'static str) -> AccessError {
        AccessError {
            field: field.to_string(),
            expected,
            found,
        }
    }
}
