//! HTTP fetch, raw page snapshots and the event row store.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use mcal_core::{Impact, NormalizedEvent};
use reqwest::StatusCode;
use sha2::{Digest, Sha256};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, QueryBuilder, Row};
use thiserror::Error;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info_span, warn, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "mcal-storage";

#[derive(Debug, Clone)]
pub struct StoredSnapshot {
    pub content_hash: String,
    pub relative_path: PathBuf,
    pub absolute_path: PathBuf,
    pub byte_size: usize,
    pub deduplicated: bool,
}

/// Content-addressed archive of fetched calendar pages.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    root: PathBuf,
}

impl SnapshotStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sha256_hex(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }

    pub fn snapshot_relative_path(
        &self,
        fetched_at: DateTime<Utc>,
        range: &str,
        content_hash: &str,
    ) -> PathBuf {
        let day = fetched_at.format("%Y%m%d").to_string();
        PathBuf::from(day)
            .join(range)
            .join(format!("{content_hash}.html"))
    }

    /// Writes the page once per content hash. The body lands in a staging file
    /// first and is renamed into place, so a snapshot is never half-written.
    pub async fn store_page(
        &self,
        fetched_at: DateTime<Utc>,
        range: &str,
        body: &[u8],
    ) -> anyhow::Result<StoredSnapshot> {
        let content_hash = Self::sha256_hex(body);
        let relative_path = self.snapshot_relative_path(fetched_at, range, &content_hash);
        let mut snapshot = StoredSnapshot {
            absolute_path: self.root.join(&relative_path),
            relative_path,
            content_hash,
            byte_size: body.len(),
            deduplicated: true,
        };
        if fs::try_exists(&snapshot.absolute_path).await.unwrap_or(false) {
            return Ok(snapshot);
        }

        let dir = snapshot
            .absolute_path
            .parent()
            .unwrap_or(self.root.as_path())
            .to_path_buf();
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("creating snapshot directory {}", dir.display()))?;

        let staging = dir.join(format!(".{}.{}.partial", snapshot.content_hash, Uuid::new_v4()));
        fs::write(&staging, body)
            .await
            .with_context(|| format!("writing staged snapshot {}", staging.display()))?;

        if let Err(err) = fs::rename(&staging, &snapshot.absolute_path).await {
            fs::remove_file(&staging).await.ok();
            // A concurrent writer may have published the same page first.
            if fs::try_exists(&snapshot.absolute_path).await.unwrap_or(false) {
                return Ok(snapshot);
            }
            return Err(err).with_context(|| {
                format!("publishing snapshot {}", snapshot.relative_path.display())
            });
        }
        snapshot.deduplicated = false;
        Ok(snapshot)
    }
}

/// Throttling and upstream 5xx are worth another try; other statuses are final.
fn transient_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn transient_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

/// Extra attempts a calendar fetch gets and the pause before each one.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub retries: u32,
    pub first_pause: Duration,
    pub max_pause: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 1,
            first_pause: Duration::from_millis(750),
            max_pause: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Pause before retry `n` (1-based), doubling each time up to `max_pause`.
    pub fn pause_before(&self, n: u32) -> Duration {
        let doublings = n.saturating_sub(1).min(16);
        self.first_pause
            .saturating_mul(1u32 << doublings)
            .min(self.max_pause)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub retry: RetryPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
            retry: RetryPolicy::default(),
        }
    }
}

/// Calendar page fetcher: one client, a hard timeout, bounded retries.
#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    retry: RetryPolicy,
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub body: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("calendar request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("calendar page answered {status} at {url}")]
    HttpStatus { status: u16, url: String },
    #[error("calendar page at {url} was empty")]
    EmptyBody { url: String },
}

struct AttemptFailure {
    error: FetchError,
    transient: bool,
}

impl AttemptFailure {
    fn request(err: reqwest::Error) -> Self {
        Self {
            transient: transient_error(&err),
            error: FetchError::Request(err),
        }
    }
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let user_agent = config
            .user_agent
            .as_deref()
            .unwrap_or(concat!("mcal-storage/", env!("CARGO_PKG_VERSION")));
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(config.timeout)
            .connect_timeout(config.timeout.min(Duration::from_secs(10)))
            .gzip(true)
            .brotli(true)
            .build()
            .context("building calendar http client")?;
        Ok(Self {
            client,
            retry: config.retry,
        })
    }

    pub async fn fetch_bytes(&self, run_id: Uuid, url: &str) -> Result<FetchedResponse, FetchError> {
        let span = info_span!("http_fetch", %run_id, url);
        self.fetch_with_retries(url).instrument(span).await
    }

    async fn fetch_with_retries(&self, url: &str) -> Result<FetchedResponse, FetchError> {
        let mut retry = 0;
        loop {
            let failure = match self.get_once(url).await {
                Ok(page) => return Ok(page),
                Err(failure) => failure,
            };
            if !failure.transient || retry >= self.retry.retries {
                return Err(failure.error);
            }
            retry += 1;
            let pause = self.retry.pause_before(retry);
            warn!(
                error = %failure.error,
                retry,
                pause_ms = pause.as_millis() as u64,
                "calendar fetch failed; retrying"
            );
            tokio::time::sleep(pause).await;
        }
    }

    async fn get_once(&self, url: &str) -> Result<FetchedResponse, AttemptFailure> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(AttemptFailure::request)?;
        let status = resp.status();
        let final_url = resp.url().to_string();
        if !status.is_success() {
            return Err(AttemptFailure {
                transient: transient_status(status),
                error: FetchError::HttpStatus {
                    status: status.as_u16(),
                    url: final_url,
                },
            });
        }
        let body = resp.bytes().await.map_err(AttemptFailure::request)?;
        if body.iter().all(u8::is_ascii_whitespace) {
            return Err(AttemptFailure {
                transient: false,
                error: FetchError::EmptyBody { url: final_url },
            });
        }
        Ok(FetchedResponse {
            status,
            final_url,
            body: body.to_vec(),
        })
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// The whole store is unreachable; callers stop the batch.
    #[error("event store unavailable: {0}")]
    Unavailable(String),
    /// A single row could not be written or read.
    #[error("event row rejected: {0}")]
    Row(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

impl StoreError {
    pub fn is_fatal(&self) -> bool {
        match self {
            StoreError::Unavailable(_) | StoreError::Migrate(_) => true,
            StoreError::Row(_) => false,
            StoreError::Database(err) => matches!(
                err,
                sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::Io(_)
                    | sqlx::Error::Tls(_)
                    | sqlx::Error::WorkerCrashed
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEvent {
    pub id: i64,
    pub event: NormalizedEvent,
}

/// Row predicates understood by every store. Bounds are inclusive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    /// Empty means every currency.
    pub currencies: Vec<String>,
    pub impact: Option<Impact>,
}

impl EventFilter {
    pub fn between(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
            ..Default::default()
        }
    }

    pub fn matches(&self, event: &NormalizedEvent) -> bool {
        self.start.map_or(true, |s| event.date >= s)
            && self.end.map_or(true, |e| event.date <= e)
            && (self.currencies.is_empty()
                || self
                    .currencies
                    .iter()
                    .any(|c| c.eq_ignore_ascii_case(&event.currency)))
            && self.impact.map_or(true, |i| event.impact == i)
    }
}

/// Persistent row store holding the `market_calendar` table.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn find_by_date_and_name(
        &self,
        date: NaiveDate,
        event_name: &str,
    ) -> Result<Vec<StoredEvent>, StoreError>;

    async fn insert(&self, event: &NormalizedEvent) -> Result<i64, StoreError>;

    /// Rewrites impact/forecast/previous only; identity columns never change.
    async fn update_mutable(
        &self,
        id: i64,
        impact: Impact,
        forecast: &str,
        previous: &str,
    ) -> Result<(), StoreError>;

    /// Deletes rows with `date` in the inclusive range; `None` leaves a side open.
    async fn delete_range(
        &self,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<u64, StoreError>;

    /// Deletes the given row ids; unknown ids are ignored.
    async fn delete_ids(&self, ids: &[i64]) -> Result<u64, StoreError>;

    /// Rows matching `filter`, ordered by date then stored time text.
    async fn search(&self, filter: &EventFilter) -> Result<Vec<StoredEvent>, StoreError>;
}

#[derive(Debug, Default)]
struct MemoryTable {
    rows: Vec<StoredEvent>,
    next_id: i64,
}

/// Process-local store; contents vanish with the process.
#[derive(Debug, Default)]
pub struct MemoryEventStore {
    table: Mutex<MemoryTable>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.table.lock().await.rows.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn all_rows(&self) -> Vec<StoredEvent> {
        self.table.lock().await.rows.clone()
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn find_by_date_and_name(
        &self,
        date: NaiveDate,
        event_name: &str,
    ) -> Result<Vec<StoredEvent>, StoreError> {
        let table = self.table.lock().await;
        Ok(table
            .rows
            .iter()
            .filter(|r| r.event.date == date && r.event.event_name == event_name)
            .cloned()
            .collect())
    }

    async fn insert(&self, event: &NormalizedEvent) -> Result<i64, StoreError> {
        let mut table = self.table.lock().await;
        let key = event.identity_key();
        if table.rows.iter().any(|r| r.event.identity_key() == key) {
            return Err(StoreError::Row(format!(
                "duplicate identity {} {} {:?}",
                event.date, event.event_name, event.time
            )));
        }
        table.next_id += 1;
        let id = table.next_id;
        table.rows.push(StoredEvent {
            id,
            event: event.clone(),
        });
        Ok(id)
    }

    async fn update_mutable(
        &self,
        id: i64,
        impact: Impact,
        forecast: &str,
        previous: &str,
    ) -> Result<(), StoreError> {
        let mut table = self.table.lock().await;
        let row = table
            .rows
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| StoreError::Row(format!("no row with id {id}")))?;
        row.event.impact = impact;
        row.event.forecast = forecast.to_string();
        row.event.previous = previous.to_string();
        Ok(())
    }

    async fn delete_range(
        &self,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<u64, StoreError> {
        let filter = EventFilter {
            start,
            end,
            ..Default::default()
        };
        let mut table = self.table.lock().await;
        let before = table.rows.len();
        table.rows.retain(|r| !filter.matches(&r.event));
        Ok((before - table.rows.len()) as u64)
    }

    async fn delete_ids(&self, ids: &[i64]) -> Result<u64, StoreError> {
        let mut table = self.table.lock().await;
        let before = table.rows.len();
        table.rows.retain(|r| !ids.contains(&r.id));
        Ok((before - table.rows.len()) as u64)
    }

    async fn search(&self, filter: &EventFilter) -> Result<Vec<StoredEvent>, StoreError> {
        let table = self.table.lock().await;
        let mut rows = table
            .rows
            .iter()
            .filter(|r| filter.matches(&r.event))
            .cloned()
            .collect::<Vec<_>>();
        rows.sort_by(|a, b| {
            (a.event.date, &a.event.time, a.id).cmp(&(b.event.date, &b.event.time, b.id))
        });
        Ok(rows)
    }
}

/// PostgreSQL-backed store over the `market_calendar` table.
#[derive(Debug, Clone)]
pub struct PgEventStore {
    pool: PgPool,
}

const SELECT_COLUMNS: &str =
    "SELECT id, date, time, event, currency, impact, forecast, previous FROM market_calendar";

impl PgEventStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_stored(row: &sqlx::postgres::PgRow) -> Result<StoredEvent, StoreError> {
        let impact: String = row.try_get("impact")?;
        Ok(StoredEvent {
            id: row.try_get("id")?,
            event: NormalizedEvent {
                date: row.try_get("date")?,
                time: row.try_get("time")?,
                event_name: row.try_get("event")?,
                currency: row.try_get("currency")?,
                impact: Impact::from_label(&impact),
                forecast: row.try_get("forecast")?,
                previous: row.try_get("previous")?,
            },
        })
    }
}

#[async_trait]
impl EventStore for PgEventStore {
    async fn find_by_date_and_name(
        &self,
        date: NaiveDate,
        event_name: &str,
    ) -> Result<Vec<StoredEvent>, StoreError> {
        let rows = sqlx::query(&format!("{SELECT_COLUMNS} WHERE date = $1 AND event = $2"))
            .bind(date)
            .bind(event_name)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_stored).collect()
    }

    async fn insert(&self, event: &NormalizedEvent) -> Result<i64, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO market_calendar (date, time, event, currency, impact, forecast, previous)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            "#,
        )
        .bind(event.date)
        .bind(&event.time)
        .bind(&event.event_name)
        .bind(&event.currency)
        .bind(event.impact.as_str())
        .bind(&event.forecast)
        .bind(&event.previous)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(row) => Ok(row.try_get("id")?),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Err(StoreError::Row(
                format!("duplicate identity {} {}", event.date, event.event_name),
            )),
            Err(err) => Err(err.into()),
        }
    }

    async fn update_mutable(
        &self,
        id: i64,
        impact: Impact,
        forecast: &str,
        previous: &str,
    ) -> Result<(), StoreError> {
        let done = sqlx::query(
            r#"
            UPDATE market_calendar
               SET impact = $2,
                   forecast = $3,
                   previous = $4,
                   updated_at = NOW()
             WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(impact.as_str())
        .bind(forecast)
        .bind(previous)
        .execute(&self.pool)
        .await?;
        if done.rows_affected() == 0 {
            return Err(StoreError::Row(format!("no row with id {id}")));
        }
        Ok(())
    }

    async fn delete_range(
        &self,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<u64, StoreError> {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new("DELETE FROM market_calendar WHERE TRUE");
        if let Some(start) = start {
            qb.push(" AND date >= ").push_bind(start);
        }
        if let Some(end) = end {
            qb.push(" AND date <= ").push_bind(end);
        }
        let done = qb.build().execute(&self.pool).await?;
        debug!(deleted = done.rows_affected(), "cleared market_calendar rows");
        Ok(done.rows_affected())
    }

    async fn delete_ids(&self, ids: &[i64]) -> Result<u64, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let done = sqlx::query("DELETE FROM market_calendar WHERE id = ANY($1)")
            .bind(ids)
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected())
    }

    async fn search(&self, filter: &EventFilter) -> Result<Vec<StoredEvent>, StoreError> {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(SELECT_COLUMNS);
        qb.push(" WHERE TRUE");
        if let Some(start) = filter.start {
            qb.push(" AND date >= ").push_bind(start);
        }
        if let Some(end) = filter.end {
            qb.push(" AND date <= ").push_bind(end);
        }
        if !filter.currencies.is_empty() {
            let upper = filter
                .currencies
                .iter()
                .map(|c| c.to_ascii_uppercase())
                .collect::<Vec<_>>();
            qb.push(" AND upper(currency) = ANY(").push_bind(upper).push(")");
        }
        if let Some(impact) = filter.impact {
            qb.push(" AND impact = ").push_bind(impact.as_str());
        }
        qb.push(" ORDER BY date, time, id");
        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_stored).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::tempdir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn ev(date: (i32, u32, u32), time: &str, name: &str) -> NormalizedEvent {
        NormalizedEvent {
            date: NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap(),
            time: time.to_string(),
            event_name: name.to_string(),
            currency: "USD".to_string(),
            impact: Impact::High,
            forecast: String::new(),
            previous: String::new(),
        }
    }

    #[test]
    fn snapshot_paths_group_pages_by_day_and_range() {
        let store = SnapshotStore::new("/var/lib/mcal");
        let page = b"<table class=\"calendar__table\"></table>";
        let hash = SnapshotStore::sha256_hex(page);
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, SnapshotStore::sha256_hex(page));
        assert_ne!(hash, SnapshotStore::sha256_hex(b"<table></table>"));

        let fetched_at = DateTime::parse_from_rfc3339("2024-12-31T23:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let path = store.snapshot_relative_path(fetched_at, "next-month", &hash);
        assert_eq!(path, PathBuf::from(format!("20241231/next-month/{hash}.html")));
    }

    #[tokio::test]
    async fn identical_pages_are_written_once() {
        let dir = tempdir().expect("tempdir");
        let store = SnapshotStore::new(dir.path());
        let fetched_at = DateTime::parse_from_rfc3339("2024-03-04T12:00:00Z")
            .expect("ts")
            .with_timezone(&Utc);

        let first = store
            .store_page(fetched_at, "this-week", b"<html>same</html>")
            .await
            .expect("first store");
        let second = store
            .store_page(fetched_at, "this-week", b"<html>same</html>")
            .await
            .expect("second store");

        assert!(!first.deduplicated);
        assert!(second.deduplicated);
        assert_eq!(first.relative_path, second.relative_path);
        assert!(first.relative_path.starts_with("20240304/this-week"));
        assert!(first.absolute_path.exists());
    }

    #[test]
    fn calendar_fetch_retries_once_by_default() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.retries, 1);
        assert_eq!(policy.pause_before(1), Duration::from_millis(750));

        let patient = RetryPolicy {
            retries: 4,
            first_pause: Duration::from_secs(1),
            max_pause: Duration::from_secs(3),
        };
        assert_eq!(patient.pause_before(2), Duration::from_secs(2));
        assert_eq!(patient.pause_before(4), Duration::from_secs(3));
    }

    #[test]
    fn throttling_and_upstream_failures_are_transient() {
        assert!(transient_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(transient_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(!transient_status(StatusCode::NOT_FOUND));
        assert!(!transient_status(StatusCode::FORBIDDEN));
        assert!(StoreError::Unavailable("down".into()).is_fatal());
        assert!(!StoreError::Row("bad".into()).is_fatal());
    }

    /// Serves `response` to every connection and counts the requests.
    async fn canned_server(response: &'static str) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/calendar", listener.local_addr().unwrap());
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                let mut buf = [0u8; 2048];
                let _ = socket.read(&mut buf).await;
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        (url, hits)
    }

    fn quick_fetcher() -> HttpFetcher {
        HttpFetcher::new(HttpClientConfig {
            timeout: Duration::from_secs(5),
            user_agent: None,
            retry: RetryPolicy {
                first_pause: Duration::from_millis(10),
                ..RetryPolicy::default()
            },
        })
        .unwrap()
    }

    #[tokio::test]
    async fn blank_calendar_page_is_an_empty_body_error() {
        let (url, hits) = canned_server(
            "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: 4\r\nConnection: close\r\n\r\n \n\t ",
        )
        .await;
        let err = quick_fetcher().fetch_bytes(Uuid::new_v4(), &url).await.unwrap_err();
        assert!(matches!(err, FetchError::EmptyBody { .. }), "{err}");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unavailable_calendar_is_retried_once_then_reported() {
        let (url, hits) = canned_server(
            "HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;
        let err = quick_fetcher().fetch_bytes(Uuid::new_v4(), &url).await.unwrap_err();
        assert!(matches!(err, FetchError::HttpStatus { status: 503, .. }), "{err}");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn missing_calendar_page_is_not_retried() {
        let (url, hits) = canned_server(
            "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;
        let err = quick_fetcher().fetch_bytes(Uuid::new_v4(), &url).await.unwrap_err();
        assert!(matches!(err, FetchError::HttpStatus { status: 404, .. }), "{err}");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn memory_store_rejects_duplicate_identity() {
        let store = MemoryEventStore::new();
        store.insert(&ev((2024, 3, 4), "8:30am", "CPI m/m")).await.unwrap();
        let err = store
            .insert(&ev((2024, 3, 4), "8:30 AM", "CPI m/m"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Row(_)));
        store.insert(&ev((2024, 3, 4), "10:00am", "CPI m/m")).await.unwrap();
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn memory_store_updates_only_mutable_fields() {
        let store = MemoryEventStore::new();
        let id = store.insert(&ev((2024, 3, 4), "8:30am", "CPI m/m")).await.unwrap();
        store.update_mutable(id, Impact::Low, "0.3%", "0.2%").await.unwrap();
        let rows = store
            .find_by_date_and_name(NaiveDate::from_ymd_opt(2024, 3, 4).unwrap(), "CPI m/m")
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].event.impact, Impact::Low);
        assert_eq!(rows[0].event.forecast, "0.3%");
        assert_eq!(rows[0].event.time, "8:30am");
        assert!(store.update_mutable(99, Impact::Low, "", "").await.is_err());
    }

    #[tokio::test]
    async fn memory_store_filters_and_deletes_by_inclusive_range() {
        let store = MemoryEventStore::new();
        for day in 3..=6 {
            store.insert(&ev((2024, 3, day), "9:00am", "Event")).await.unwrap();
        }
        let mut eur = ev((2024, 3, 5), "9:00am", "ECB");
        eur.currency = "EUR".into();
        store.insert(&eur).await.unwrap();

        let d = |day| NaiveDate::from_ymd_opt(2024, 3, day).unwrap();
        let mut filter = EventFilter::between(d(4), d(5));
        assert_eq!(store.search(&filter).await.unwrap().len(), 3);
        filter.currencies = vec!["usd".into()];
        assert_eq!(store.search(&filter).await.unwrap().len(), 2);

        let deleted = store.delete_range(Some(d(4)), Some(d(5))).await.unwrap();
        assert_eq!(deleted, 3);
        assert_eq!(store.delete_range(None, None).await.unwrap(), 2);
        assert!(store.is_empty().await);
    }
}
