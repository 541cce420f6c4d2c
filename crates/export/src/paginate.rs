//! The generic batched reader.
//!
//! Keyset pagination orders by id and filters `id > last_id`, so each batch
//! costs the same regardless of position; it needs a query builder and a
//! known server version. Without either, the driver falls back to SKIP/LIMIT,
//! which re-scans skipped rows and degrades quadratically — a warning says so
//! up front. A batch shorter than `batch_size` ends the drive; a full batch
//! that fails to advance the cursor would loop forever and is fatal instead.

use crate::cancel::CancelFlag;
use crate::client::{ClientError, GraphClient, Params, Record, ServerVersion};
use crate::error::ExportError;
use crate::perf::PerfTracker;
use exponential_backoff::Backoff;
use graph::Value;
use std::cmp::Ordering;
use std::fmt;
use std::time::{Duration, Instant};

/// Column the keyset query builders project the pagination id into.
pub const CURSOR_FIELD: &str = "__cursor_id";
/// Column count queries project the total into.
pub const TOTAL_FIELD: &str = "total";

const PROGRESS_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Nodes,
    Relationships,
}

impl Entity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Entity::Nodes => "Nodes",
            Entity::Relationships => "Relationships",
        }
    }

    /// The per-record entity type used by error records.
    pub fn singular(&self) -> &'static str {
        match self {
            Entity::Nodes => "node",
            Entity::Relationships => "relationship",
        }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The two id shapes sources hand out: numeric internal ids (4.x) and
/// element-id strings (5.x+). A drive must see exactly one shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeysetId {
    Numeric(i64),
    Elementish(String),
}

impl KeysetId {
    pub fn from_value(v: &Value) -> Option<KeysetId> {
        match v {
            Value::Int(i) => Some(KeysetId::Numeric(*i)),
            Value::UInt(u) => i64::try_from(*u).ok().map(KeysetId::Numeric),
            Value::String(s) => Some(KeysetId::Elementish(s.clone())),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            KeysetId::Numeric(i) => Value::Int(*i),
            KeysetId::Elementish(s) => Value::String(s.clone()),
        }
    }

    /// Same-shape comparison; `None` marks the forbidden mixed case.
    fn compare(&self, other: &KeysetId) -> Option<Ordering> {
        match (self, other) {
            (KeysetId::Numeric(a), KeysetId::Numeric(b)) => Some(a.cmp(b)),
            (KeysetId::Elementish(a), KeysetId::Elementish(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Keyset,
    SkipLimit,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Keyset => "keyset",
            Strategy::SkipLimit => "skip_limit",
        }
    }
}

/// Cursor state handed to a query builder.
#[derive(Debug)]
pub enum CursorState<'a> {
    Keyset(Option<&'a KeysetId>),
    SkipLimit { skip: u64 },
}

#[derive(Debug, Clone)]
pub struct Query {
    pub text: String,
    pub params: Params,
}

pub type QueryBuilder<'a> = &'a (dyn Fn(ServerVersion, &CursorState<'_>, u64) -> Query + Send + Sync);

pub enum QuerySource<'a> {
    /// A bare query the driver drives with SKIP/LIMIT appended.
    Static(&'a str),
    /// A version-aware builder enabling keyset pagination.
    Builder(QueryBuilder<'a>),
}

pub struct PaginateSpec<'a> {
    pub entity: Entity,
    pub version: ServerVersion,
    pub batch_size: u64,
    pub count_query: Option<&'a str>,
    pub source: QuerySource<'a>,
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_min: Duration,
    pub retry_max: Duration,
}

#[derive(Debug, Clone, Copy)]
pub struct DriveOutcome {
    pub records: u64,
    pub batches: u64,
    pub strategy: Strategy,
    pub cancelled: bool,
}

/// Progress callback: `(entity, records_processed, total_hint)`, invoked at
/// most once per 30 s of wall time.
pub type ProgressFn<'a> = &'a mut dyn FnMut(Entity, u64, Option<u64>);

pub async fn drive<F>(
    client: &dyn GraphClient,
    spec: PaginateSpec<'_>,
    cancel: &CancelFlag,
    perf: &mut PerfTracker,
    mut progress: Option<ProgressFn<'_>>,
    mut on_record: F,
) -> Result<DriveOutcome, ExportError>
where
    F: FnMut(Record) -> Result<(), ExportError>,
{
    let strategy = match (&spec.source, spec.version.is_known()) {
        (QuerySource::Builder(_), true) => Strategy::Keyset,
        _ => Strategy::SkipLimit,
    };
    if strategy == Strategy::SkipLimit {
        tracing::warn!(
            entity = spec.entity.as_str(),
            "using SKIP/LIMIT pagination; expect quadratic slowdown on large inputs"
        );
    }

    let total = match spec.count_query {
        Some(query) => fetch_total(client, query, &spec).await?,
        None => None,
    };
    tracing::debug!(
        entity = spec.entity.as_str(),
        strategy = strategy.as_str(),
        total,
        "starting paginated drive"
    );

    let mut last_id: Option<KeysetId> = None;
    let mut skip = 0u64;
    let mut records = 0u64;
    let mut batches = 0u64;
    let mut last_progress = Instant::now();
    let mut cancelled = false;

    'drive: loop {
        if cancel.is_cancelled() {
            cancelled = true;
            break;
        }

        let query = build_query(&spec, strategy, last_id.as_ref(), skip);
        let started = Instant::now();
        let batch = fetch_batch(client, &query, &spec).await?;
        perf.record_batch(started.elapsed());
        batches += 1;
        let batch_len = batch.len() as u64;
        tracing::debug!(
            entity = spec.entity.as_str(),
            batch = batches,
            rows = batch_len,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "fetched batch"
        );

        let mut max_id: Option<KeysetId> = None;
        let mut unusable = 0u64;
        let mut mixed = false;

        for record in batch {
            if strategy == Strategy::Keyset {
                match record.get(CURSOR_FIELD).and_then(KeysetId::from_value) {
                    Some(id) => match &max_id {
                        Some(current) => match id.compare(current) {
                            Some(Ordering::Greater) => max_id = Some(id),
                            Some(_) => {}
                            None => mixed = true,
                        },
                        None => max_id = Some(id),
                    },
                    None => unusable += 1,
                }
            }

            on_record(record)?;
            records += 1;

            if last_progress.elapsed() >= PROGRESS_INTERVAL {
                if let Some(cb) = progress.as_mut() {
                    cb(spec.entity, records, total);
                }
                last_progress = Instant::now();
            }

            if cancel.is_cancelled() {
                cancelled = true;
                break 'drive;
            }
        }

        if mixed {
            return Err(pagination_error(&spec, batch_len));
        }
        if batch_len < spec.batch_size {
            break;
        }

        match strategy {
            Strategy::SkipLimit => skip += spec.batch_size,
            Strategy::Keyset => {
                let advanced = match (&max_id, &last_id) {
                    (None, _) => false,
                    (Some(_), None) => true,
                    (Some(new), Some(prev)) => {
                        matches!(new.compare(prev), Some(Ordering::Greater))
                    }
                };
                if !advanced {
                    return Err(pagination_error(
                        &spec,
                        if unusable > 0 { unusable } else { batch_len },
                    ));
                }
                last_id = max_id;
            }
        }
    }

    tracing::info!(
        entity = spec.entity.as_str(),
        records,
        batches,
        cancelled,
        "drive finished"
    );
    Ok(DriveOutcome {
        records,
        batches,
        strategy,
        cancelled,
    })
}

fn pagination_error(spec: &PaginateSpec<'_>, unusable: u64) -> ExportError {
    ExportError::Pagination {
        entity: spec.entity,
        batch_size: spec.batch_size,
        unusable,
    }
}

fn build_query(
    spec: &PaginateSpec<'_>,
    strategy: Strategy,
    last_id: Option<&KeysetId>,
    skip: u64,
) -> Query {
    match (&spec.source, strategy) {
        (QuerySource::Builder(builder), Strategy::Keyset) => builder(
            spec.version,
            &CursorState::Keyset(last_id),
            spec.batch_size,
        ),
        (QuerySource::Builder(builder), Strategy::SkipLimit) => builder(
            spec.version,
            &CursorState::SkipLimit { skip },
            spec.batch_size,
        ),
        (QuerySource::Static(text), _) => Query {
            text: format!("{text} SKIP $skip LIMIT $limit"),
            params: vec![
                ("skip", Value::UInt(skip)),
                ("limit", Value::UInt(spec.batch_size)),
            ],
        },
    }
}

async fn fetch_total(
    client: &dyn GraphClient,
    query: &str,
    spec: &PaginateSpec<'_>,
) -> Result<Option<u64>, ExportError> {
    let query = Query {
        text: query.to_string(),
        params: Vec::new(),
    };
    let rows = fetch_batch(client, &query, spec).await?;
    Ok(rows
        .first()
        .and_then(|record| record.get(TOTAL_FIELD))
        .and_then(Value::as_u64))
}

/// One batch round trip under the per-query timeout, retried with jittered
/// exponential backoff for transient failures.
async fn fetch_batch(
    client: &dyn GraphClient,
    query: &Query,
    spec: &PaginateSpec<'_>,
) -> Result<Vec<Record>, ExportError> {
    let mut backoff = Backoff::new(spec.max_retries, spec.retry_min, Some(spec.retry_max));
    backoff.set_factor(2);
    backoff.set_jitter(0.1);

    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let err: ExportError = match tokio::time::timeout(spec.timeout, run_once(client, query))
            .await
        {
            Ok(Ok(records)) => return Ok(records),
            Ok(Err(client_err)) if client_err.is_retryable() => client_err.into(),
            Ok(Err(client_err)) => return Err(client_err.into()),
            Err(_elapsed) => ExportError::Timeout(spec.timeout),
        };

        match backoff.next(attempt) {
            Some(delay) => {
                tracing::warn!(
                    entity = spec.entity.as_str(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying batch"
                );
                tokio::time::sleep(delay).await;
            }
            None => return Err(err),
        }
    }
}

async fn run_once(client: &dyn GraphClient, query: &Query) -> Result<Vec<Record>, ClientError> {
    let mut cursor = client.run(&query.text, query.params.clone()).await?;
    let mut records = Vec::new();
    while let Some(record) = cursor.fetch().await? {
        records.push(record);
    }
    let summary = cursor.consume().await?;
    tracing::trace!(?summary, rows = records.len(), "consumed cursor");
    Ok(records)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::client::{RecordCursor, ServerInfo, Summary};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    enum Scripted {
        Rows(Vec<Record>),
        Fail(ClientError),
        Hang,
    }

    struct FakeClient {
        responses: Mutex<VecDeque<Scripted>>,
        queries: Mutex<Vec<Query>>,
    }

    impl FakeClient {
        fn new(responses: Vec<Scripted>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                queries: Mutex::new(Vec::new()),
            }
        }

        fn queries(&self) -> Vec<Query> {
            self.queries.lock().unwrap().clone()
        }
    }

    struct VecCursor(std::vec::IntoIter<Record>);

    #[async_trait::async_trait]
    impl RecordCursor for VecCursor {
        async fn fetch(&mut self) -> Result<Option<Record>, ClientError> {
            Ok(self.0.next())
        }
        async fn consume(self: Box<Self>) -> Result<Summary, ClientError> {
            Ok(Summary::default())
        }
    }

    #[async_trait::async_trait]
    impl GraphClient for FakeClient {
        async fn run(
            &self,
            query: &str,
            params: Params,
        ) -> Result<Box<dyn RecordCursor>, ClientError> {
            self.queries.lock().unwrap().push(Query {
                text: query.to_string(),
                params,
            });
            let next = self.responses.lock().unwrap().pop_front();
            match next {
                Some(Scripted::Rows(rows)) => Ok(Box::new(VecCursor(rows.into_iter()))),
                Some(Scripted::Fail(err)) => Err(err),
                Some(Scripted::Hang) => {
                    futures::future::pending::<()>().await;
                    unreachable!()
                }
                None => Ok(Box::new(VecCursor(Vec::new().into_iter()))),
            }
        }

        async fn server_info(&self) -> Result<ServerInfo, ClientError> {
            Ok(ServerInfo {
                version: ServerVersion::V5,
                version_string: "5.19.0".to_string(),
                edition: "community".to_string(),
            })
        }
    }

    fn row(id: i64) -> Record {
        Record::new(vec![
            ("n".to_string(), Value::Int(id * 100)),
            (CURSOR_FIELD.to_string(), Value::Int(id)),
        ])
    }

    fn row_without_cursor(id: i64) -> Record {
        Record::new(vec![("n".to_string(), Value::Int(id * 100))])
    }

    fn builder(version: ServerVersion, cursor: &CursorState<'_>, batch: u64) -> Query {
        let _ = version;
        let (text, mut params): (String, Params) = match cursor {
            CursorState::Keyset(None) => ("MATCH (n) RETURN n".to_string(), vec![]),
            CursorState::Keyset(Some(id)) => (
                "MATCH (n) WHERE id(n) > $cursor RETURN n".to_string(),
                vec![("cursor", id.to_value())],
            ),
            CursorState::SkipLimit { skip } => (
                "MATCH (n) RETURN n SKIP $skip".to_string(),
                vec![("skip", Value::UInt(*skip))],
            ),
        };
        params.push(("limit", Value::UInt(batch)));
        Query { text, params }
    }

    fn spec<'a>(source: QuerySource<'a>, version: ServerVersion, batch: u64) -> PaginateSpec<'a> {
        PaginateSpec {
            entity: Entity::Nodes,
            version,
            batch_size: batch,
            count_query: None,
            source,
            timeout: Duration::from_millis(200),
            max_retries: 2,
            retry_min: Duration::from_millis(1),
            retry_max: Duration::from_millis(5),
        }
    }

    async fn collect(
        client: &FakeClient,
        spec: PaginateSpec<'_>,
    ) -> Result<(DriveOutcome, Vec<Record>), ExportError> {
        let cancel = CancelFlag::new();
        let mut perf = PerfTracker::new();
        let mut seen = Vec::new();
        let outcome = drive(client, spec, &cancel, &mut perf, None, |record| {
            seen.push(record);
            Ok(())
        })
        .await?;
        Ok((outcome, seen))
    }

    #[tokio::test]
    async fn keyset_visits_every_record_and_advances_the_cursor() {
        let client = FakeClient::new(vec![
            Scripted::Rows(vec![row(1), row(2)]),
            Scripted::Rows(vec![row(3), row(4)]),
            Scripted::Rows(vec![row(5)]),
        ]);
        let (outcome, seen) = collect(
            &client,
            spec(QuerySource::Builder(&builder), ServerVersion::V4, 2),
        )
        .await
        .unwrap();

        assert_eq!(outcome.strategy, Strategy::Keyset);
        assert_eq!(outcome.records, 5);
        assert_eq!(outcome.batches, 3);
        assert!(!outcome.cancelled);
        assert_eq!(seen.len(), 5);

        let queries = client.queries();
        assert_eq!(queries.len(), 3);
        assert!(!queries[0].text.contains("WHERE"));
        assert_eq!(queries[1].params[0], ("cursor", Value::Int(2)));
        assert_eq!(queries[2].params[0], ("cursor", Value::Int(4)));
    }

    #[tokio::test]
    async fn unknown_version_falls_back_to_skip_limit() {
        let client = FakeClient::new(vec![
            Scripted::Rows(vec![row(1), row(2)]),
            Scripted::Rows(vec![]),
        ]);
        let (outcome, _) = collect(
            &client,
            spec(QuerySource::Builder(&builder), ServerVersion::Unknown, 2),
        )
        .await
        .unwrap();

        assert_eq!(outcome.strategy, Strategy::SkipLimit);
        let queries = client.queries();
        assert_eq!(queries[0].params[0], ("skip", Value::UInt(0)));
        assert_eq!(queries[1].params[0], ("skip", Value::UInt(2)));
    }

    #[tokio::test]
    async fn static_query_gets_skip_limit_appended() {
        let client = FakeClient::new(vec![Scripted::Rows(vec![row(1)])]);
        let (outcome, _) = collect(
            &client,
            spec(QuerySource::Static("MATCH (n) RETURN n"), ServerVersion::V5, 2),
        )
        .await
        .unwrap();

        assert_eq!(outcome.strategy, Strategy::SkipLimit);
        assert_eq!(
            client.queries()[0].text,
            "MATCH (n) RETURN n SKIP $skip LIMIT $limit"
        );
    }

    #[tokio::test]
    async fn full_batch_without_usable_cursor_is_fatal() {
        let client = FakeClient::new(vec![Scripted::Rows(vec![
            row_without_cursor(1),
            row_without_cursor(2),
        ])]);
        let err = collect(
            &client,
            spec(QuerySource::Builder(&builder), ServerVersion::V5, 2),
        )
        .await
        .unwrap_err();

        match err {
            ExportError::Pagination {
                entity,
                batch_size,
                unusable,
            } => {
                assert_eq!(entity, Entity::Nodes);
                assert_eq!(batch_size, 2);
                assert_eq!(unusable, 2);
            }
            other => panic!("expected pagination error, got {other}"),
        }
    }

    #[tokio::test]
    async fn full_batch_with_stale_cursor_is_fatal() {
        let client = FakeClient::new(vec![
            Scripted::Rows(vec![row(1), row(2)]),
            // The cursor fails to move past 2.
            Scripted::Rows(vec![row(1), row(2)]),
        ]);
        let err = collect(
            &client,
            spec(QuerySource::Builder(&builder), ServerVersion::V5, 2),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ExportError::Pagination { .. }));
    }

    #[tokio::test]
    async fn mixed_id_shapes_are_fatal() {
        let client = FakeClient::new(vec![Scripted::Rows(vec![
            row(1),
            Record::new(vec![(
                CURSOR_FIELD.to_string(),
                Value::String("5:abc:2".to_string()),
            )]),
        ])]);
        let err = collect(
            &client,
            spec(QuerySource::Builder(&builder), ServerVersion::V5, 2),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ExportError::Pagination { .. }));
    }

    #[tokio::test]
    async fn transient_failures_are_retried_with_backoff() {
        let client = FakeClient::new(vec![
            Scripted::Fail(ClientError::Connection("reset".into())),
            Scripted::Rows(vec![row(1)]),
        ]);
        let (outcome, _) = collect(
            &client,
            spec(QuerySource::Builder(&builder), ServerVersion::V5, 2),
        )
        .await
        .unwrap();
        assert_eq!(outcome.records, 1);
        assert_eq!(client.queries().len(), 2);
    }

    #[tokio::test]
    async fn non_retryable_failures_surface_immediately() {
        let client = FakeClient::new(vec![
            Scripted::Fail(ClientError::Query("syntax".into())),
            Scripted::Rows(vec![row(1)]),
        ]);
        let err = collect(
            &client,
            spec(QuerySource::Builder(&builder), ServerVersion::V5, 2),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ExportError::Query(_)));
        assert_eq!(client.queries().len(), 1);
    }

    #[tokio::test]
    async fn hanging_queries_time_out() {
        let client = FakeClient::new(vec![Scripted::Hang, Scripted::Hang, Scripted::Hang]);
        let mut s = spec(QuerySource::Builder(&builder), ServerVersion::V5, 2);
        s.timeout = Duration::from_millis(10);
        s.max_retries = 1;
        let err = collect(&client, s).await.unwrap_err();
        assert!(matches!(err, ExportError::Timeout(_)));
    }

    #[tokio::test]
    async fn cancellation_completes_the_current_record_then_stops() {
        let client = FakeClient::new(vec![
            Scripted::Rows(vec![row(1), row(2)]),
            Scripted::Rows(vec![row(3), row(4)]),
        ]);
        let cancel = CancelFlag::new();
        let mut perf = PerfTracker::new();
        let mut seen = 0u64;
        let cancel_inner = cancel.clone();
        let outcome = drive(
            &client,
            spec(QuerySource::Builder(&builder), ServerVersion::V5, 2),
            &cancel,
            &mut perf,
            None,
            |_record| {
                seen += 1;
                if seen == 1 {
                    cancel_inner.cancel(crate::cancel::CancelReason::Interrupt);
                }
                Ok(())
            },
        )
        .await
        .unwrap();

        assert!(outcome.cancelled);
        assert_eq!(outcome.records, 1);
        assert_eq!(seen, 1);
    }

    #[tokio::test]
    async fn count_query_feeds_the_total_hint() {
        let client = FakeClient::new(vec![
            Scripted::Rows(vec![Record::new(vec![(
                TOTAL_FIELD.to_string(),
                Value::Int(5),
            )])]),
            Scripted::Rows(vec![row(1)]),
        ]);
        let mut s = spec(QuerySource::Builder(&builder), ServerVersion::V5, 2);
        s.count_query = Some("MATCH (n) RETURN count(n) AS total");
        let (outcome, _) = collect(&client, s).await.unwrap();
        assert_eq!(outcome.records, 1);
        // The count query ran first.
        assert!(client.queries()[0].text.contains("count(n)"));
    }
}
