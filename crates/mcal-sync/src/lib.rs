//! Sync pipeline: fetch, extract, normalize, upsert, and the read-side projection.

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use mcal_adapters::{
    localize, normalize_record, parse_time_of_day, AdapterContext, FetchedPage, ForexFactoryAdapter,
    RowRejection, SourceAdapter, TimeCarry, FOREXFACTORY_CALENDAR_URL,
};
use mcal_core::{
    format_clock, resolve_timezone, EventView, Impact, NormalizedEvent, PipelineConfig,
    RangeSelector, RawEventRecord, UpsertStats, CANONICAL_TZ, DEFAULT_ROLLOVER_THRESHOLD_DAYS,
};
use mcal_storage::{
    EventFilter, EventStore, HttpClientConfig, HttpFetcher, MemoryEventStore, PgEventStore,
    SnapshotStore, StoreError, StoredEvent,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "mcal-sync";

pub const DEFAULT_SYNC_CRON: &str = "0 0 23 * * Thu";
pub const DEFAULT_USER_AGENT: &str = "mcal-sync/0.1";
pub const DEFAULT_WEB_PORT: u16 = 8000;

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// PostgreSQL URL; `None` selects the in-memory store.
    pub database_url: Option<String>,
    pub calendar_url: String,
    pub pipeline: PipelineConfig,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub snapshot_dir: Option<PathBuf>,
    pub scheduler_enabled: bool,
    pub sync_cron: String,
    pub web_port: u16,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            calendar_url: FOREXFACTORY_CALENDAR_URL.to_string(),
            pipeline: PipelineConfig::default(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            http_timeout_secs: 20,
            snapshot_dir: None,
            scheduler_enabled: false,
            sync_cron: DEFAULT_SYNC_CRON.to_string(),
            web_port: DEFAULT_WEB_PORT,
        }
    }
}

fn truthy(v: &str) -> bool {
    matches!(v.trim(), "1" | "true" | "TRUE" | "True" | "yes" | "on")
}

impl SyncConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup; blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let default_timezone = match var("MCAL_DEFAULT_TZ") {
            Some(name) => resolve_timezone(&name).unwrap_or_else(|| {
                warn!(timezone = %name, "unknown MCAL_DEFAULT_TZ; using default");
                defaults.pipeline.default_timezone
            }),
            None => defaults.pipeline.default_timezone,
        };

        Self {
            database_url: var("DATABASE_URL"),
            calendar_url: var("MCAL_CALENDAR_URL").unwrap_or(defaults.calendar_url),
            pipeline: PipelineConfig {
                default_timezone,
                target_currency: var("MCAL_CURRENCY")
                    .map(|c| c.trim().to_ascii_uppercase())
                    .unwrap_or(defaults.pipeline.target_currency),
                verbose: var("MCAL_VERBOSE").is_some_and(|v| truthy(&v)),
                rollover_threshold_days: var("MCAL_ROLLOVER_DAYS")
                    .and_then(|v| v.trim().parse().ok())
                    .unwrap_or(DEFAULT_ROLLOVER_THRESHOLD_DAYS),
            },
            user_agent: var("MCAL_USER_AGENT").unwrap_or(defaults.user_agent),
            http_timeout_secs: var("MCAL_HTTP_TIMEOUT_SECS")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(defaults.http_timeout_secs),
            snapshot_dir: var("MCAL_SNAPSHOT_DIR").map(PathBuf::from),
            scheduler_enabled: var("MCAL_SCHEDULER_ENABLED").is_some_and(|v| truthy(&v)),
            sync_cron: var("SYNC_CRON").unwrap_or(defaults.sync_cron),
            web_port: var("MCAL_WEB_PORT")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(defaults.web_port),
        }
    }
}

/// Opens PostgreSQL (running migrations) when configured, else an in-memory store.
pub async fn open_store(config: &SyncConfig) -> Result<Arc<dyn EventStore>> {
    match &config.database_url {
        Some(url) => {
            let store = PgEventStore::connect(url)
                .await
                .context("connecting to market calendar database")?;
            store.migrate().await.context("running migrations")?;
            Ok(Arc::new(store))
        }
        None => {
            warn!("DATABASE_URL not set; events are kept in memory for this process only");
            Ok(Arc::new(MemoryEventStore::new()))
        }
    }
}

// ---------------------------------------------------------------------------
// Batch normalization
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NormalizeReport {
    pub kept: usize,
    pub missing_name: usize,
    pub currency_filtered: usize,
    pub unparseable_date: usize,
    /// Rows that collapsed into a later row with the same identity.
    pub duplicates: usize,
}

/// Normalizes one scrape pass in page order, backfilling blank times from
/// the preceding row of the same date block, then collapses duplicate
/// identities to their last occurrence.
pub fn normalize_batch(
    raw: &[RawEventRecord],
    source_tz: Tz,
    today: NaiveDate,
    config: &PipelineConfig,
) -> (Vec<NormalizedEvent>, NormalizeReport) {
    let mut report = NormalizeReport::default();
    let mut carry = TimeCarry::new();
    let mut events = Vec::with_capacity(raw.len());

    for record in raw {
        let time_text = carry.resolve(&record.date_text, &record.time_text);
        match normalize_record(record, &time_text, source_tz, today, config) {
            Ok(event) => events.push(event),
            Err(rejection) => {
                match &rejection {
                    RowRejection::MissingName => report.missing_name += 1,
                    RowRejection::CurrencyFiltered(_) => report.currency_filtered += 1,
                    RowRejection::UnparseableDate(_) => report.unparseable_date += 1,
                }
                if matches!(rejection, RowRejection::UnparseableDate(_)) {
                    warn!(reason = %rejection, event = %record.event_name, "dropping calendar row");
                } else if config.verbose {
                    info!(reason = %rejection, event = %record.event_name, "dropping calendar row");
                } else {
                    debug!(reason = %rejection, event = %record.event_name, "dropping calendar row");
                }
            }
        }
    }

    let deduped = dedup_last_wins(events);
    report.duplicates = raw.len()
        - report.missing_name
        - report.currency_filtered
        - report.unparseable_date
        - deduped.len();
    report.kept = deduped.len();
    (deduped, report)
}

/// Keeps one event per identity: the first position, the last occurrence's values.
pub fn dedup_last_wins(events: Vec<NormalizedEvent>) -> Vec<NormalizedEvent> {
    let mut index = HashMap::with_capacity(events.len());
    let mut out: Vec<NormalizedEvent> = Vec::with_capacity(events.len());
    for event in events {
        match index.get(&event.identity_key()) {
            Some(&pos) => out[pos] = event,
            None => {
                index.insert(event.identity_key(), out.len());
                out.push(event);
            }
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Upsert
// ---------------------------------------------------------------------------

enum RowOutcome {
    Inserted,
    Unchanged,
    Updated,
}

async fn upsert_one(store: &dyn EventStore, event: &NormalizedEvent) -> Result<RowOutcome, StoreError> {
    let candidates = store.find_by_date_and_name(event.date, &event.event_name).await?;
    let key = event.time_key();
    match candidates.iter().find(|row| row.event.time_key() == key) {
        Some(row) if row.event.mutable_fields_differ(event) => {
            store
                .update_mutable(row.id, event.impact, &event.forecast, &event.previous)
                .await?;
            Ok(RowOutcome::Updated)
        }
        Some(_) => Ok(RowOutcome::Unchanged),
        None => {
            store.insert(event).await?;
            Ok(RowOutcome::Inserted)
        }
    }
}

/// Returns false when the batch must stop.
fn record_failure(stats: &mut UpsertStats, event: &NormalizedEvent, err: &StoreError) -> bool {
    if err.is_fatal() {
        error!(error = %err, event = %event.event_name, "event store unavailable; aborting batch");
        stats.aborted = true;
        false
    } else {
        warn!(error = %err, date = %event.date, event = %event.event_name, "skipping event");
        stats.skipped += 1;
        true
    }
}

/// Merge-by-identity write. Identity is `(date, event_name, time)` with the
/// time compared case- and whitespace-insensitively; only impact, forecast
/// and previous are ever rewritten.
pub async fn upsert_batch(
    store: &dyn EventStore,
    events: &[NormalizedEvent],
    config: &PipelineConfig,
) -> UpsertStats {
    let mut stats = UpsertStats {
        total: events.len(),
        ..Default::default()
    };

    for event in events {
        if !config.accepts_currency(&event.currency) {
            debug!(currency = %event.currency, event = %event.event_name, "currency filtered at upsert");
            stats.skipped += 1;
            continue;
        }
        match upsert_one(store, event).await {
            Ok(RowOutcome::Inserted) => stats.new += 1,
            Ok(RowOutcome::Unchanged) => stats.existing += 1,
            Ok(RowOutcome::Updated) => {
                stats.existing += 1;
                stats.updated += 1;
            }
            Err(err) => {
                if !record_failure(&mut stats, event, &err) {
                    break;
                }
            }
        }
    }

    info!(
        total = stats.total,
        new = stats.new,
        existing = stats.existing,
        updated = stats.updated,
        skipped = stats.skipped,
        aborted = stats.aborted,
        "upsert batch finished"
    );
    stats
}

/// A source-zone date range `[start, end]` expressed as canonical instants.
/// Rows with a clock time belong to it by instant, label and blank rows by
/// their stored date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplaceWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub from: DateTime<Utc>,
    /// Exclusive.
    pub until: DateTime<Utc>,
}

impl ReplaceWindow {
    pub fn new(start: NaiveDate, end: NaiveDate, source_tz: Tz) -> Self {
        let midnight = |day: NaiveDate| {
            let naive = day.and_time(NaiveTime::MIN);
            localize(naive, source_tz)
                .map(|local| local.with_timezone(&Utc))
                .unwrap_or_else(|| Utc.from_utc_datetime(&naive))
        };
        Self {
            start,
            end,
            from: midnight(start),
            until: midnight(end.succ_opt().unwrap_or(end)),
        }
    }

    pub fn contains(&self, event: &NormalizedEvent) -> bool {
        match canonical_instant(event) {
            Some(at) => at >= self.from && at < self.until,
            None => event.date >= self.start && event.date <= self.end,
        }
    }

    /// Stored-date span that holds every row the window can contain.
    fn stored_span(&self) -> EventFilter {
        let last = self.until - chrono::Duration::seconds(1);
        EventFilter::between(
            self.start.min(self.from.date_naive()),
            self.end.max(last.date_naive()),
        )
    }
}

fn abort_replace(
    stats: &mut UpsertStats,
    window: &ReplaceWindow,
    batch_len: usize,
    err: &StoreError,
) {
    error!(
        error = %err,
        start = %window.start,
        end = %window.end,
        "clearing range failed; nothing replaced"
    );
    stats.total = batch_len;
    stats.aborted = true;
}

/// Clear-then-replace over `window`. Events that fall outside it are merged by
/// identity instead.
pub async fn replace_range(
    store: &dyn EventStore,
    window: &ReplaceWindow,
    events: &[NormalizedEvent],
    config: &PipelineConfig,
) -> UpsertStats {
    let (in_range, outside): (Vec<_>, Vec<_>) =
        events.iter().cloned().partition(|e| window.contains(e));

    let mut stats = UpsertStats {
        total: in_range.len(),
        ..Default::default()
    };

    let stale = match store.search(&window.stored_span()).await {
        Ok(rows) => rows
            .into_iter()
            .filter(|row| window.contains(&row.event))
            .map(|row| row.id)
            .collect::<Vec<_>>(),
        Err(err) => {
            abort_replace(&mut stats, window, events.len(), &err);
            return stats;
        }
    };
    match store.delete_ids(&stale).await {
        Ok(deleted) => stats.cleared = deleted,
        Err(err) => {
            abort_replace(&mut stats, window, events.len(), &err);
            return stats;
        }
    }

    for event in &in_range {
        if !config.accepts_currency(&event.currency) {
            stats.skipped += 1;
            continue;
        }
        match store.insert(event).await {
            Ok(_) => stats.new += 1,
            Err(err) => {
                if !record_failure(&mut stats, event, &err) {
                    stats.total = events.len();
                    return stats;
                }
            }
        }
    }

    if !outside.is_empty() {
        debug!(count = outside.len(), "merging events outside the replaced range");
        let merged = upsert_batch(store, &outside, config).await;
        stats.absorb(&merged);
    }

    info!(
        start = %window.start,
        end = %window.end,
        cleared = stats.cleared,
        new = stats.new,
        "range replaced"
    );
    stats
}

// ---------------------------------------------------------------------------
// Query / projection
// ---------------------------------------------------------------------------

/// Canonical instant of a stored row, when its time is a clock time.
pub fn canonical_instant(event: &NormalizedEvent) -> Option<DateTime<Utc>> {
    let clock = parse_time_of_day(&event.time).clock()?;
    CANONICAL_TZ
        .from_local_datetime(&event.date.and_time(clock))
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

fn anchored_instant(event: &NormalizedEvent, fallback: NaiveTime) -> DateTime<Utc> {
    canonical_instant(event).unwrap_or_else(|| Utc.from_utc_datetime(&event.date.and_time(fallback)))
}

fn end_of_day() -> NaiveTime {
    NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN)
}

/// Renders a stored row in `display_tz`. Non-clock times keep their stored
/// date and text.
pub fn project_event(event: &NormalizedEvent, display_tz: Tz) -> EventView {
    let (date, time) = match canonical_instant(event) {
        Some(instant) => {
            let local = instant.with_timezone(&display_tz);
            (local.date_naive(), format_clock(local.time()))
        }
        None => (event.date, event.time.clone()),
    };
    EventView {
        date: date.format("%Y-%m-%d").to_string(),
        time,
        event: event.event_name.clone(),
        currency: event.currency.clone(),
        impact: event.impact.to_string(),
        forecast: event.forecast.clone(),
        previous: event.previous.clone(),
    }
}

fn sort_chronologically(rows: &mut [StoredEvent], fallback: NaiveTime) {
    rows.sort_by_key(|row| (anchored_instant(&row.event, fallback), row.id));
}

/// Rows in the inclusive stored-date window, chronological, projected into
/// `display_tz`. Label times (`All Day`, `Tentative`) lead their date.
pub async fn get_events(
    store: &dyn EventStore,
    filter: &EventFilter,
    display_tz: Tz,
) -> Result<Vec<EventView>, StoreError> {
    let mut rows = store.search(filter).await?;
    sort_chronologically(&mut rows, NaiveTime::MIN);
    Ok(rows.iter().map(|row| project_event(&row.event, display_tz)).collect())
}

/// Earliest High-impact event at or after `now`. Rows without a clock time
/// count as happening at the end of their date.
pub async fn next_high_impact_event(
    store: &dyn EventStore,
    display_tz: Tz,
    now: DateTime<Utc>,
) -> Result<Option<EventView>, StoreError> {
    let filter = EventFilter {
        start: Some(now.date_naive()),
        impact: Some(Impact::High),
        ..Default::default()
    };
    let mut rows = store.search(&filter).await?;
    rows.retain(|row| anchored_instant(&row.event, end_of_day()) >= now);
    sort_chronologically(&mut rows, end_of_day());
    Ok(rows.first().map(|row| project_event(&row.event, display_tz)))
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    #[default]
    Merge,
    Replace,
}

impl FromStr for SyncMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "merge" | "upsert" => Ok(SyncMode::Merge),
            "replace" | "clear" => Ok(SyncMode::Replace),
            other => anyhow::bail!("unknown sync mode {other:?}"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RangeSyncReport {
    pub run_id: Uuid,
    pub range: RangeSelector,
    pub mode: SyncMode,
    pub strategy: Option<&'static str>,
    pub source_timezone: String,
    pub extracted: usize,
    pub normalize: NormalizeReport,
    pub stats: UpsertStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct RangeOutcome {
    pub range: RangeSelector,
    pub stats: UpsertStats,
    /// Set when the range failed before anything was written.
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefreshSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub ranges: Vec<RangeOutcome>,
    pub combined: UpsertStats,
}

pub struct SyncPipeline {
    config: SyncConfig,
    http: HttpFetcher,
    adapter: Box<dyn SourceAdapter>,
    store: Arc<dyn EventStore>,
    snapshots: Option<SnapshotStore>,
    write_lock: Mutex<()>,
}

impl SyncPipeline {
    pub fn new(config: SyncConfig, store: Arc<dyn EventStore>) -> Result<Self> {
        let http = HttpFetcher::new(HttpClientConfig {
            timeout: Duration::from_secs(config.http_timeout_secs),
            user_agent: Some(config.user_agent.clone()),
            ..Default::default()
        })?;
        let adapter = Box::new(ForexFactoryAdapter::new(config.calendar_url.clone()));
        let snapshots = config.snapshot_dir.clone().map(SnapshotStore::new);
        Ok(Self {
            config,
            http,
            adapter,
            store,
            snapshots,
            write_lock: Mutex::new(()),
        })
    }

    pub fn with_adapter(mut self, adapter: Box<dyn SourceAdapter>) -> Self {
        self.adapter = adapter;
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<dyn EventStore> {
        Arc::clone(&self.store)
    }

    /// "Today" as seen on the source calendar.
    pub fn source_today(&self) -> NaiveDate {
        Utc::now()
            .with_timezone(&self.config.pipeline.default_timezone)
            .date_naive()
    }

    /// Fetches one range and writes it. A fetch failure aborts before any write.
    pub async fn fetch_events_for_range(
        &self,
        range: RangeSelector,
        mode: SyncMode,
    ) -> Result<RangeSyncReport> {
        let ctx = AdapterContext {
            run_id: Uuid::new_v4(),
            fetched_at: Utc::now(),
        };
        let span = info_span!("sync_range", run_id = %ctx.run_id, %range, source = self.adapter.source_id());
        async {
            let page = self
                .adapter
                .fetch_listing(&self.http, &ctx, range)
                .await
                .with_context(|| format!("fetching {range} calendar"))?;
            self.snapshot(&page, range).await;
            self.ingest_page(ctx.run_id, &page, range, mode, self.source_today())
                .await
        }
        .instrument(span)
        .await
    }

    async fn snapshot(&self, page: &FetchedPage, range: RangeSelector) {
        let Some(snapshots) = &self.snapshots else {
            return;
        };
        match snapshots.store_page(page.fetched_at, range.as_str(), &page.body).await {
            Ok(stored) => debug!(
                path = %stored.relative_path.display(),
                deduplicated = stored.deduplicated,
                "stored page snapshot"
            ),
            Err(err) => warn!(error = %err, "could not store page snapshot"),
        }
    }

    /// Network-free half of a sync: parse, normalize and write a fetched page.
    pub async fn ingest_page(
        &self,
        run_id: Uuid,
        page: &FetchedPage,
        range: RangeSelector,
        mode: SyncMode,
        today: NaiveDate,
    ) -> Result<RangeSyncReport> {
        let pipeline = &self.config.pipeline;
        let listing = self.adapter.parse_listing(page, pipeline);
        let extracted = listing.records.len();
        let (events, normalize) =
            normalize_batch(&listing.records, listing.source_timezone, today, pipeline);

        let stats = {
            let _guard = self.write_lock.lock().await;
            match mode {
                SyncMode::Merge => upsert_batch(self.store.as_ref(), &events, pipeline).await,
                SyncMode::Replace => {
                    let (start, end) = range.bounds(today);
                    let window = ReplaceWindow::new(start, end, listing.source_timezone);
                    replace_range(self.store.as_ref(), &window, &events, pipeline).await
                }
            }
        };

        info!(
            %range,
            strategy = listing.strategy.unwrap_or("none"),
            extracted,
            kept = normalize.kept,
            new = stats.new,
            existing = stats.existing,
            "range synced"
        );

        Ok(RangeSyncReport {
            run_id,
            range,
            mode,
            strategy: listing.strategy,
            source_timezone: listing.source_timezone.name().to_string(),
            extracted,
            normalize,
            stats,
        })
    }

    /// Merges every refresh range in turn; a failed range is reported and the
    /// rest still run.
    pub async fn refresh_all_ranges(&self) -> RefreshSummary {
        let started_at = Utc::now();
        let mut ranges = Vec::with_capacity(RangeSelector::REFRESH.len());
        let mut combined = UpsertStats::default();

        for range in RangeSelector::REFRESH {
            match self.fetch_events_for_range(range, SyncMode::Merge).await {
                Ok(report) => {
                    combined.absorb(&report.stats);
                    ranges.push(RangeOutcome {
                        range,
                        stats: report.stats,
                        error: None,
                    });
                }
                Err(err) => {
                    error!(%range, error = %format!("{err:#}"), "range refresh failed");
                    ranges.push(RangeOutcome {
                        range,
                        stats: UpsertStats::default(),
                        error: Some(format!("{err:#}")),
                    });
                }
            }
        }

        RefreshSummary {
            started_at,
            finished_at: Utc::now(),
            ranges,
            combined,
        }
    }

    /// Deletes rows in the inclusive window; open bounds extend to the ends.
    pub async fn clear_events(
        &self,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<u64, StoreError> {
        let _guard = self.write_lock.lock().await;
        let deleted = self.store.delete_range(start, end).await?;
        info!(?start, ?end, deleted, "cleared calendar events");
        Ok(deleted)
    }

    pub async fn events(&self, filter: &EventFilter, display_tz: Tz) -> Result<Vec<EventView>, StoreError> {
        get_events(self.store.as_ref(), filter, display_tz).await
    }

    pub async fn next_high_impact(
        &self,
        display_tz: Tz,
        now: DateTime<Utc>,
    ) -> Result<Option<EventView>, StoreError> {
        next_high_impact_event(self.store.as_ref(), display_tz, now).await
    }
}

/// Cron job running [`SyncPipeline::refresh_all_ranges`], when enabled.
pub async fn maybe_build_scheduler(pipeline: Arc<SyncPipeline>) -> Result<Option<JobScheduler>> {
    if !pipeline.config.scheduler_enabled {
        return Ok(None);
    }

    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let cron = pipeline.config.sync_cron.clone();
    let job = Job::new_async(cron.as_str(), move |_uuid, _l| {
        let pipeline = Arc::clone(&pipeline);
        Box::pin(async move {
            let summary = pipeline.refresh_all_ranges().await;
            info!(
                total = summary.combined.total,
                new = summary.combined.new,
                existing = summary.combined.existing,
                failed_ranges = summary.ranges.iter().filter(|r| r.error.is_some()).count(),
                "scheduled refresh finished"
            );
        })
    })
    .with_context(|| format!("creating scheduler job for cron {cron}"))?;
    sched.add(job).await.context("adding scheduler job")?;
    Ok(Some(sched))
}

pub async fn build_pipeline_from_env() -> Result<SyncPipeline> {
    let config = SyncConfig::from_env();
    let store = open_store(&config).await?;
    SyncPipeline::new(config, store)
}
