//! Calendar page extraction, time normalization and impact classification.

use std::borrow::Cow;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use mcal_core::{
    normalize_time_key, Impact, NormalizedEvent, PipelineConfig, RangeSelector, RawEventRecord,
    TimeOfDay, CANONICAL_TZ,
};
use mcal_storage::{FetchError, HttpFetcher};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "mcal-adapters";

pub const FOREXFACTORY_CALENDAR_URL: &str = "https://www.forexfactory.com/calendar";

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("{0}")]
    Message(String),
    #[error("page has no {0}")]
    StructureMissing(&'static str),
    #[error("malformed embedded data: {0}")]
    Malformed(String),
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

// ---------------------------------------------------------------------------
// Time normalization
// ---------------------------------------------------------------------------

static ISO_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{4})-(\d{1,2})-(\d{1,2})\b").expect("iso date regex"));

static MONTH_DAY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)[a-z]*\.?\s*(\d{1,2})(?:st|nd|rd|th)?\b(?:,?\s+(\d{4})\b)?",
    )
    .expect("month/day regex")
});

static TWELVE_HOUR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{1,2})(?::(\d{2}))?(am|pm)$").expect("12h regex"));

static TWENTY_FOUR_HOUR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{1,2}):(\d{2})$").expect("24h regex"));

static DAY_LABEL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^day\d+$").expect("day label regex"));

const MONTHS: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];

/// Parses a calendar date cell such as `Mon Mar 4`, `MonMar 4`, `Mar 4, 2024`
/// or `2024-03-04`.
///
/// Yearless dates are placed in `today`'s year, then moved one year forward
/// (or back) when they land more than `threshold_days` in the past (or
/// future). Weekday names are ignored.
pub fn parse_calendar_date(text: &str, today: NaiveDate, threshold_days: i64) -> Option<NaiveDate> {
    if let Some(caps) = ISO_DATE.captures(text) {
        let year = caps[1].parse().ok()?;
        let month = caps[2].parse().ok()?;
        let day = caps[3].parse().ok()?;
        return NaiveDate::from_ymd_opt(year, month, day);
    }

    let caps = MONTH_DAY.captures(text)?;
    let prefix = caps[1].to_ascii_lowercase();
    let month = MONTHS.iter().position(|m| *m == prefix)? as u32 + 1;
    let day: u32 = caps[2].parse().ok()?;

    if let Some(year) = caps.get(3).and_then(|y| y.as_str().parse::<i32>().ok()) {
        return NaiveDate::from_ymd_opt(year, month, day);
    }

    place_in_year(month, day, today, threshold_days)
}

fn place_in_year(month: u32, day: u32, today: NaiveDate, threshold_days: i64) -> Option<NaiveDate> {
    let year = today.year();
    match NaiveDate::from_ymd_opt(year, month, day) {
        Some(date) => {
            let days_past = (today - date).num_days();
            if days_past > threshold_days {
                NaiveDate::from_ymd_opt(year + 1, month, day).or(Some(date))
            } else if -days_past > threshold_days {
                NaiveDate::from_ymd_opt(year - 1, month, day).or(Some(date))
            } else {
                Some(date)
            }
        }
        // Feb 29 outside a leap year: take whichever neighbour year is closer.
        None => [year + 1, year - 1]
            .into_iter()
            .filter_map(|y| NaiveDate::from_ymd_opt(y, month, day))
            .min_by_key(|d| (today - *d).num_days().abs()),
    }
}

/// Parses a time cell. 12-hour (`8:30am`, `8:30 AM`, `8am`) and 24-hour
/// (`13:30`) clocks become [`TimeOfDay::Clock`]; `All Day`, `Tentative`,
/// `TBA` and `Day N` pass through as labels; everything else is
/// [`TimeOfDay::Unparsed`].
pub fn parse_time_of_day(text: &str) -> TimeOfDay {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return TimeOfDay::Unparsed;
    }
    let compact = normalize_time_key(trimmed);

    if let Some(caps) = TWELVE_HOUR.captures(&compact) {
        let hour: u32 = caps[1].parse().unwrap_or(0);
        let minute: u32 = caps.get(2).map_or(Some(0), |m| m.as_str().parse().ok()).unwrap_or(60);
        if (1..=12).contains(&hour) {
            let hour24 = match (&caps[3], hour) {
                ("am", 12) => 0,
                ("am", h) => h,
                ("pm", 12) => 12,
                (_, h) => h + 12,
            };
            if let Some(t) = NaiveTime::from_hms_opt(hour24, minute, 0) {
                return TimeOfDay::Clock(t);
            }
        }
        return TimeOfDay::Unparsed;
    }

    if let Some(caps) = TWENTY_FOUR_HOUR.captures(&compact) {
        let hour: u32 = caps[1].parse().unwrap_or(99);
        let minute: u32 = caps[2].parse().unwrap_or(99);
        return NaiveTime::from_hms_opt(hour, minute, 0)
            .map(TimeOfDay::Clock)
            .unwrap_or(TimeOfDay::Unparsed);
    }

    if matches!(compact.as_str(), "allday" | "tentative" | "tba" | "tbd") || DAY_LABEL.is_match(&compact) {
        return TimeOfDay::Label(trimmed.to_string());
    }

    TimeOfDay::Unparsed
}

/// Attaches `tz` to a wall-clock timestamp. Ambiguous times take the earlier
/// instant; times inside a DST gap are pushed forward an hour.
pub fn localize(naive: NaiveDateTime, tz: Tz) -> Option<DateTime<Tz>> {
    tz.from_local_datetime(&naive)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(naive + Duration::hours(1))).earliest())
}

/// Date and time expressed in [`CANONICAL_TZ`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalStamp {
    pub date: NaiveDate,
    pub time: TimeOfDay,
}

/// Moves a source-zone date/time into the canonical zone. Label and unparsed
/// times carry no instant, so their date is kept as given.
pub fn to_canonical(date: NaiveDate, time: TimeOfDay, source_tz: Tz) -> CanonicalStamp {
    let Some(clock) = time.clock() else {
        return CanonicalStamp { date, time };
    };
    match localize(date.and_time(clock), source_tz) {
        Some(local) => {
            let canonical = local.with_timezone(&CANONICAL_TZ);
            CanonicalStamp {
                date: canonical.date_naive(),
                time: TimeOfDay::Clock(canonical.time()),
            }
        }
        None => CanonicalStamp { date, time },
    }
}

/// `(date_text, time_text, source_tz)` to canonical `(date, stored time)`.
/// `None` means the date could not be placed.
pub fn normalize(
    date_text: &str,
    time_text: &str,
    source_tz: Tz,
    today: NaiveDate,
    threshold_days: i64,
) -> Option<(NaiveDate, String)> {
    let date = parse_calendar_date(date_text, today, threshold_days)?;
    let stamp = to_canonical(date, parse_time_of_day(time_text), source_tz);
    Some((stamp.date, stamp.time.to_stored()))
}

/// Backfills blank time cells with the previous row's time inside one date block.
#[derive(Debug, Default)]
pub struct TimeCarry {
    date_text: String,
    last_time: Option<String>,
}

impl TimeCarry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolve(&mut self, date_text: &str, time_text: &str) -> String {
        if self.date_text != date_text {
            self.date_text = date_text.to_string();
            self.last_time = None;
        }
        let trimmed = time_text.trim();
        if trimmed.is_empty() {
            return self.last_time.clone().unwrap_or_default();
        }
        self.last_time = Some(trimmed.to_string());
        trimmed.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RowRejection {
    #[error("event has no name")]
    MissingName,
    #[error("currency {0:?} filtered out")]
    CurrencyFiltered(String),
    #[error("unparseable date {0:?}")]
    UnparseableDate(String),
}

/// Turns one raw row into a canonical event. `time_text` is the row's time
/// after carry-forward. An upstream unix timestamp wins over the wall-clock
/// text whenever the row carries a clock time.
pub fn normalize_record(
    raw: &RawEventRecord,
    time_text: &str,
    source_tz: Tz,
    today: NaiveDate,
    config: &PipelineConfig,
) -> Result<NormalizedEvent, RowRejection> {
    let event_name = collapse_whitespace(&raw.event_name);
    if event_name.is_empty() {
        return Err(RowRejection::MissingName);
    }
    if !config.accepts_currency(&raw.currency) {
        return Err(RowRejection::CurrencyFiltered(raw.currency.clone()));
    }

    let time = parse_time_of_day(time_text);
    let from_timestamp = match (raw.timestamp, time.clock()) {
        (Some(ts), Some(_)) => DateTime::<Utc>::from_timestamp(ts, 0).map(|dt| {
            let canonical = dt.with_timezone(&CANONICAL_TZ);
            CanonicalStamp {
                date: canonical.date_naive(),
                time: TimeOfDay::Clock(canonical.time()),
            }
        }),
        _ => None,
    };
    let stamp = match from_timestamp {
        Some(stamp) => stamp,
        None => {
            let date = parse_calendar_date(&raw.date_text, today, config.rollover_threshold_days)
                .ok_or_else(|| RowRejection::UnparseableDate(raw.date_text.clone()))?;
            to_canonical(date, time, source_tz)
        }
    };

    Ok(NormalizedEvent {
        date: stamp.date,
        time: stamp.time.to_stored(),
        event_name,
        currency: raw.currency.trim().to_ascii_uppercase(),
        impact: classify_impact(&raw.impact_markup),
        forecast: collapse_whitespace(&raw.forecast_text),
        previous: collapse_whitespace(&raw.previous_text),
    })
}

// ---------------------------------------------------------------------------
// Impact classification
// ---------------------------------------------------------------------------

static IMPACT_TITLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(high|medium|low)\s+impact").expect("impact title regex"));

static IMPACT_DATA_ATTR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)data-impact(?:-name)?\s*=\s*["']?\s*([a-z0-9]+)"#).expect("impact data regex")
});

static CLASS_ATTR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)class\s*=\s*["']([^"']*)["']"#).expect("class attr regex"));

/// Maps an impact cell (markup, tooltip or structured label) to an [`Impact`].
///
/// Tooltip text wins, then a `data-impact` attribute, then colour/level
/// tokens in class names (`red`/`high`, `ora`/`orange`/`medium`,
/// `yel`/`yellow`/`low`). Never fails; no signal means `Unknown`.
pub fn classify_impact(markup: &str) -> Impact {
    if let Some(caps) = IMPACT_TITLE.captures(markup) {
        return Impact::from_label(&caps[1]);
    }

    if let Some(caps) = IMPACT_DATA_ATTR.captures(markup) {
        let level = match caps[1].to_ascii_lowercase().as_str() {
            "3" | "high" => Impact::High,
            "2" | "medium" => Impact::Medium,
            "1" | "low" => Impact::Low,
            _ => Impact::Unknown,
        };
        if level != Impact::Unknown {
            return level;
        }
    }

    let class_lists = CLASS_ATTR
        .captures_iter(markup)
        .map(|c| c[1].to_string())
        .collect::<Vec<_>>();
    let haystacks: Vec<&str> = if class_lists.is_empty() {
        vec![markup]
    } else {
        class_lists.iter().map(String::as_str).collect()
    };

    for token in haystacks.iter().flat_map(|h| h.split_whitespace()) {
        for part in token.split(['-', '_']) {
            match part.to_ascii_lowercase().as_str() {
                "red" | "high" => return Impact::High,
                "ora" | "orange" | "medium" | "med" => return Impact::Medium,
                "yel" | "yellow" | "low" => return Impact::Low,
                _ => {}
            }
        }
    }

    Impact::Unknown
}

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

static TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<[^>]*>").expect("tag regex"));

static EVENT_ID_HREF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:event|detail)=(\d+)").expect("event id regex"));

static DATA_EVENT_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"data-event-id\s*=\s*["']?(\d+)"#).expect("data event id regex"));

pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Markup fragment to plain text: tags become spaces, entities are decoded.
pub fn strip_tags(markup: &str) -> String {
    let without_tags = TAGS.replace_all(markup, " ");
    collapse_whitespace(&html_escape::decode_html_entities(&without_tags))
}

/// A single page-to-rows strategy. Implementations only keep rows whose
/// currency passes `config`.
pub trait ExtractionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn extract(
        &self,
        payload: &str,
        config: &PipelineConfig,
    ) -> Result<Vec<RawEventRecord>, AdapterError>;
}

/// Shared row bookkeeping: current date marker, time carry-forward, currency
/// filter, name check.
struct RowAssembler<'a> {
    strategy: &'static str,
    config: &'a PipelineConfig,
    current_date: Option<String>,
    carry: TimeCarry,
    records: Vec<RawEventRecord>,
    before_first_date: usize,
    nameless: usize,
}

impl<'a> RowAssembler<'a> {
    fn new(strategy: &'static str, config: &'a PipelineConfig) -> Self {
        Self {
            strategy,
            config,
            current_date: None,
            carry: TimeCarry::new(),
            records: Vec::new(),
            before_first_date: 0,
            nameless: 0,
        }
    }

    fn mark_date(&mut self, text: &str) {
        let text = collapse_whitespace(text);
        if !text.is_empty() {
            self.current_date = Some(text);
        }
    }

    /// `record.date_text` overrides the current marker when non-empty. Every
    /// row feeds the time carry, including rows the currency filter drops.
    fn push(&mut self, mut record: RawEventRecord) {
        if record.date_text.trim().is_empty() {
            match &self.current_date {
                Some(date) => record.date_text = date.clone(),
                None => {
                    self.before_first_date += 1;
                    return;
                }
            }
        }
        record.time_text = self.carry.resolve(&record.date_text, &record.time_text);
        if !self.config.accepts_currency(&record.currency) {
            return;
        }
        record.event_name = collapse_whitespace(&record.event_name);
        if record.event_name.is_empty() {
            self.nameless += 1;
            warn!(
                strategy = self.strategy,
                date = %record.date_text,
                time = %record.time_text,
                "dropping calendar row without an event name"
            );
            return;
        }
        if self.config.verbose {
            info!(strategy = self.strategy, date = %record.date_text, event = %record.event_name, "extracted row");
        }
        self.records.push(record);
    }

    fn finish(self) -> Vec<RawEventRecord> {
        if self.before_first_date > 0 {
            debug!(
                strategy = self.strategy,
                skipped = self.before_first_date,
                "skipped rows before the first date marker"
            );
        }
        self.records
    }
}

fn json_str<'a>(value: &'a JsonValue, path: &[&str]) -> Option<&'a str> {
    let mut cur = value;
    for segment in path {
        cur = cur.get(*segment)?;
    }
    cur.as_str()
}

fn json_first_str(value: &JsonValue, keys: &[&str]) -> String {
    keys.iter()
        .find_map(|k| json_str(value, &[k]).filter(|s| !s.trim().is_empty()))
        .unwrap_or_default()
        .to_string()
}

fn json_scalar_string(value: &JsonValue, key: &str) -> String {
    match value.get(key) {
        Some(JsonValue::String(s)) => s.clone(),
        Some(JsonValue::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

/// Reads the script-level `days: [...]` object the calendar page embeds.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmbeddedJsonStrategy;

static DAYS_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"["']?\bdays["']?\s*:\s*\["#).expect("days key regex"));

impl ExtractionStrategy for EmbeddedJsonStrategy {
    fn name(&self) -> &'static str {
        "embedded-json"
    }

    fn extract(
        &self,
        payload: &str,
        config: &PipelineConfig,
    ) -> Result<Vec<RawEventRecord>, AdapterError> {
        let found = DAYS_KEY
            .find(payload)
            .ok_or(AdapterError::StructureMissing("embedded days array"))?;
        let array_start = found.end() - 1;
        let slice = balanced_slice(payload, array_start)
            .ok_or_else(|| AdapterError::Malformed("unterminated days array".to_string()))?;
        let repaired = repair_json_like(slice);
        let days: JsonValue = serde_json::from_str(&repaired)
            .map_err(|e| AdapterError::Malformed(format!("days array: {e}")))?;
        let days = days
            .as_array()
            .ok_or_else(|| AdapterError::Malformed("days is not an array".to_string()))?;

        let mut rows = RowAssembler::new(self.name(), config);
        for day in days {
            rows.mark_date(&strip_tags(&json_first_str(day, &["date", "dateline_text"])));
            let Some(events) = day.get("events").and_then(JsonValue::as_array) else {
                continue;
            };
            for event in events {
                rows.push(json_event_to_record(event));
            }
        }
        Ok(rows.finish())
    }
}

fn json_event_to_record(event: &JsonValue) -> RawEventRecord {
    let impact_markup = format!(
        r#"<span title="{}" data-impact="{}" class="{}"></span>"#,
        json_first_str(event, &["impactTitle"]).replace('"', "&quot;"),
        json_first_str(event, &["impactName", "impact"]).replace('"', "&quot;"),
        json_first_str(event, &["impactClass"]).replace('"', "&quot;"),
    );
    RawEventRecord {
        date_text: strip_tags(&json_first_str(event, &["date"])),
        time_text: strip_tags(&json_first_str(event, &["timeLabel", "time"])),
        currency: json_first_str(event, &["currency", "country"]),
        event_name: strip_tags(&json_first_str(event, &["name", "title", "prefixedName"])),
        impact_markup,
        forecast_text: strip_tags(&json_first_str(event, &["forecast"])),
        previous_text: strip_tags(&json_first_str(event, &["previous"])),
        event_id: json_scalar_string(event, "id"),
        timestamp: event.get("dateline").and_then(JsonValue::as_i64),
    }
}

/// Returns the bracketed slice starting at `open` (a `[` or `{`), honouring
/// quoted strings.
pub fn balanced_slice(text: &str, open: usize) -> Option<&str> {
    let bytes = text.as_bytes();
    let opener = *bytes.get(open)?;
    if opener != b'[' && opener != b'{' {
        return None;
    }
    let mut depth = 0usize;
    let mut quote: Option<u8> = None;
    let mut escaped = false;
    for (offset, &b) in bytes[open..].iter().enumerate() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == q {
                quote = None;
            }
            continue;
        }
        match b {
            b'"' | b'\'' => quote = Some(b),
            b'[' | b'{' => depth += 1,
            b']' | b'}' => {
                depth -= 1;
                if depth == 0 {
                    return text.get(open..open + offset + 1);
                }
            }
            _ => {}
        }
    }
    None
}

/// Repairs JavaScript object literals into JSON: quotes bare keys, turns
/// single-quoted strings into double-quoted ones, drops trailing commas and
/// unescapes `\/`.
pub fn repair_json_like(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len() + 32);
    let mut last_significant: Option<char> = None;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '"' | '\'' => {
                i = copy_string_literal(&chars, i, &mut out);
                last_significant = Some('"');
            }
            ',' => {
                let next = chars[i + 1..].iter().find(|ch| !ch.is_whitespace());
                if !matches!(next, Some('}') | Some(']')) {
                    out.push(',');
                    last_significant = Some(',');
                }
                i += 1;
            }
            c if (c.is_ascii_alphabetic() || c == '_' || c == '$')
                && matches!(last_significant, Some('{') | Some(',')) =>
            {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_ascii_alphanumeric() || chars[i] == '_' || chars[i] == '$')
                {
                    i += 1;
                }
                let ident: String = chars[start..i].iter().collect();
                let is_key = chars[i..]
                    .iter()
                    .find(|ch| !ch.is_whitespace())
                    .is_some_and(|ch| *ch == ':');
                if is_key {
                    out.push('"');
                    out.push_str(&ident);
                    out.push('"');
                } else {
                    out.push_str(&ident);
                }
                last_significant = Some('a');
            }
            _ => {
                out.push(c);
                if !c.is_whitespace() {
                    last_significant = Some(c);
                }
                i += 1;
            }
        }
    }
    out
}

/// Copies the string literal starting at `start` as a JSON string; returns
/// the index just past its closing quote.
fn copy_string_literal(chars: &[char], start: usize, out: &mut String) -> usize {
    let quote = chars[start];
    out.push('"');
    let mut i = start + 1;
    while i < chars.len() {
        let c = chars[i];
        if c == '\\' && i + 1 < chars.len() {
            match chars[i + 1] {
                '/' => out.push('/'),
                '\'' => out.push('\''),
                other => {
                    out.push('\\');
                    out.push(other);
                }
            }
            i += 2;
            continue;
        }
        if c == quote {
            out.push('"');
            return i + 1;
        }
        match c {
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(c),
        }
        i += 1;
    }
    out.push('"');
    i
}

/// Walks the `calendar__table` markup with CSS selectors.
#[derive(Debug, Default, Clone, Copy)]
pub struct HtmlTableStrategy;

fn selector(css: &str) -> Result<Selector, AdapterError> {
    Selector::parse(css).map_err(|e| AdapterError::Message(e.to_string()))
}

fn element_text(element: ElementRef<'_>) -> String {
    collapse_whitespace(&element.text().collect::<Vec<_>>().join(" "))
}

fn cell_text(row: ElementRef<'_>, sel: &Selector) -> String {
    row.select(sel).next().map(element_text).unwrap_or_default()
}

impl ExtractionStrategy for HtmlTableStrategy {
    fn name(&self) -> &'static str {
        "html-table"
    }

    fn extract(
        &self,
        payload: &str,
        config: &PipelineConfig,
    ) -> Result<Vec<RawEventRecord>, AdapterError> {
        let document = Html::parse_document(payload);
        let table_sel = selector("table.calendar__table")?;
        let row_sel = selector("tr")?;
        let date_sel = selector("td.calendar__date")?;
        let currency_sel = selector("td.calendar__currency")?;
        let time_sel = selector("td.calendar__time")?;
        let event_sel = selector("td.calendar__event")?;
        let title_sel = selector(".calendar__event-title")?;
        let impact_sel = selector("td.calendar__impact")?;
        let forecast_sel = selector("td.calendar__forecast")?;
        let previous_sel = selector("td.calendar__previous")?;
        let link_sel = selector("a[href]")?;

        let table = document
            .select(&table_sel)
            .next()
            .ok_or(AdapterError::StructureMissing("calendar table"))?;

        let mut rows = RowAssembler::new(self.name(), config);
        for row in table.select(&row_sel) {
            if let Some(date_cell) = row.select(&date_sel).next() {
                rows.mark_date(&element_text(date_cell));
            }
            let is_event_row = row
                .value()
                .attr("class")
                .is_some_and(|c| c.split_whitespace().any(|cls| cls == "calendar__row"));
            let Some(event_cell) = row.select(&event_sel).next() else {
                continue;
            };
            if !is_event_row {
                continue;
            }

            let event_name = event_cell
                .select(&title_sel)
                .next()
                .map(element_text)
                .unwrap_or_else(|| element_text(event_cell));
            let event_id = row
                .value()
                .attr("data-event-id")
                .map(ToString::to_string)
                .or_else(|| {
                    event_cell
                        .select(&link_sel)
                        .next()
                        .and_then(|a| a.value().attr("href"))
                        .and_then(|href| EVENT_ID_HREF.captures(href))
                        .map(|c| c[1].to_string())
                })
                .unwrap_or_default();

            rows.push(RawEventRecord {
                date_text: String::new(),
                time_text: cell_text(row, &time_sel),
                currency: cell_text(row, &currency_sel),
                event_name,
                impact_markup: row
                    .select(&impact_sel)
                    .next()
                    .map(|cell| cell.inner_html())
                    .unwrap_or_default(),
                forecast_text: cell_text(row, &forecast_sel),
                previous_text: cell_text(row, &previous_sel),
                event_id,
                timestamp: None,
            });
        }
        Ok(rows.finish())
    }
}

/// Last resort: pattern-matches `<tr>`/`<td>` markup without a DOM, so it
/// survives unbalanced or truncated pages.
#[derive(Debug, Default, Clone, Copy)]
pub struct RegexRowStrategy;

static ROW_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<tr\b([^>]*)>(.*?)</tr>").expect("row regex"));

static CELL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)<td\b[^>]*class\s*=\s*["'][^"']*calendar__([a-z]+)[^"']*["'][^>]*>(.*?)</td>"#)
        .expect("cell regex")
});

impl ExtractionStrategy for RegexRowStrategy {
    fn name(&self) -> &'static str {
        "regex-rows"
    }

    fn extract(
        &self,
        payload: &str,
        config: &PipelineConfig,
    ) -> Result<Vec<RawEventRecord>, AdapterError> {
        let mut rows = RowAssembler::new(self.name(), config);
        let mut saw_calendar_cells = false;

        for row in ROW_RE.captures_iter(payload) {
            let attrs = &row[1];
            let mut cells: Vec<(String, &str)> = Vec::new();
            for cell in CELL_RE.captures_iter(row.get(2).map_or("", |m| m.as_str())) {
                let (Some(kind), Some(body)) = (cell.get(1), cell.get(2)) else {
                    continue;
                };
                cells.push((kind.as_str().to_ascii_lowercase(), body.as_str()));
            }
            if cells.is_empty() {
                continue;
            }
            saw_calendar_cells = true;

            let cell = |kind: &str| cells.iter().find(|(k, _)| k == kind).map(|(_, body)| *body);
            if let Some(date) = cell("date") {
                rows.mark_date(&strip_tags(date));
            }
            let Some(event_body) = cell("event") else {
                continue;
            };
            if !attrs.contains("calendar__row") {
                continue;
            }

            rows.push(RawEventRecord {
                date_text: String::new(),
                time_text: cell("time").map(strip_tags).unwrap_or_default(),
                currency: cell("currency").map(strip_tags).unwrap_or_default(),
                event_name: strip_tags(event_body),
                impact_markup: cell("impact").unwrap_or_default().to_string(),
                forecast_text: cell("forecast").map(strip_tags).unwrap_or_default(),
                previous_text: cell("previous").map(strip_tags).unwrap_or_default(),
                event_id: DATA_EVENT_ID
                    .captures(attrs)
                    .or_else(|| EVENT_ID_HREF.captures(event_body))
                    .map(|c| c[1].to_string())
                    .unwrap_or_default(),
                timestamp: None,
            });
        }

        if !saw_calendar_cells {
            return Err(AdapterError::StructureMissing("calendar cells"));
        }
        Ok(rows.finish())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    pub records: Vec<RawEventRecord>,
    /// Strategy that produced `records`; `None` when every strategy came up empty.
    pub strategy: Option<&'static str>,
}

/// Ordered fallback chain over [`ExtractionStrategy`] implementations.
pub struct Extractor {
    strategies: Vec<Box<dyn ExtractionStrategy>>,
}

impl Default for Extractor {
    fn default() -> Self {
        Self::new(vec![
            Box::new(EmbeddedJsonStrategy),
            Box::new(HtmlTableStrategy),
            Box::new(RegexRowStrategy),
        ])
    }
}

impl Extractor {
    pub fn new(strategies: Vec<Box<dyn ExtractionStrategy>>) -> Self {
        Self { strategies }
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// First non-empty strategy result wins. An all-empty chain is logged
    /// and returned as zero records, not as an error.
    pub fn extract(&self, payload: &str, config: &PipelineConfig) -> Extraction {
        for strategy in &self.strategies {
            match strategy.extract(payload, config) {
                Ok(records) if !records.is_empty() => {
                    debug!(strategy = strategy.name(), rows = records.len(), "extraction succeeded");
                    return Extraction {
                        records,
                        strategy: Some(strategy.name()),
                    };
                }
                Ok(_) => debug!(strategy = strategy.name(), "strategy found no matching rows"),
                Err(err) => debug!(strategy = strategy.name(), error = %err, "strategy failed"),
            }
        }
        warn!(
            strategies = ?self.strategy_names(),
            currency = %config.target_currency,
            "no calendar events extracted; the page format may have changed"
        );
        Extraction {
            records: Vec::new(),
            strategy: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Source adapter
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    pub url: String,
    pub body: Vec<u8>,
    pub fetched_at: DateTime<Utc>,
}

impl FetchedPage {
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterContext {
    pub run_id: Uuid,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedListing {
    pub records: Vec<RawEventRecord>,
    pub source_timezone: Tz,
    pub strategy: Option<&'static str>,
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source_id(&self) -> &'static str;

    fn listing_url(&self, range: RangeSelector) -> String;

    async fn fetch_listing(
        &self,
        http: &HttpFetcher,
        ctx: &AdapterContext,
        range: RangeSelector,
    ) -> Result<FetchedPage, AdapterError>;

    fn parse_listing(&self, page: &FetchedPage, config: &PipelineConfig) -> ParsedListing;
}

static PAGE_TIMEZONE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)["']?(?:data-)?timezone(?:_name|Name)?["']?\s*[:=]\s*["']([A-Za-z]+(?:/[A-Za-z0-9_+\-]+)+)["']"#,
    )
    .expect("page timezone regex")
});

/// IANA zone declared in page metadata, if any.
pub fn detect_timezone(payload: &str) -> Option<Tz> {
    PAGE_TIMEZONE
        .captures_iter(payload)
        .find_map(|c| c[1].parse::<Tz>().ok())
}

pub struct ForexFactoryAdapter {
    base_url: String,
    extractor: Extractor,
}

impl ForexFactoryAdapter {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            extractor: Extractor::default(),
        }
    }

    pub fn with_extractor(mut self, extractor: Extractor) -> Self {
        self.extractor = extractor;
        self
    }
}

impl Default for ForexFactoryAdapter {
    fn default() -> Self {
        Self::new(FOREXFACTORY_CALENDAR_URL)
    }
}

#[async_trait]
impl SourceAdapter for ForexFactoryAdapter {
    fn source_id(&self) -> &'static str {
        "forexfactory"
    }

    fn listing_url(&self, range: RangeSelector) -> String {
        let (key, value) = range.query_param();
        let sep = if self.base_url.contains('?') { '&' } else { '?' };
        format!("{}{sep}{key}={value}", self.base_url)
    }

    async fn fetch_listing(
        &self,
        http: &HttpFetcher,
        ctx: &AdapterContext,
        range: RangeSelector,
    ) -> Result<FetchedPage, AdapterError> {
        let url = self.listing_url(range);
        let resp = http.fetch_bytes(ctx.run_id, &url).await?;
        Ok(FetchedPage {
            url: resp.final_url,
            body: resp.body,
            fetched_at: ctx.fetched_at,
        })
    }

    fn parse_listing(&self, page: &FetchedPage, config: &PipelineConfig) -> ParsedListing {
        let text = page.text();
        let source_timezone = detect_timezone(&text).unwrap_or(config.default_timezone);
        let extraction = self.extractor.extract(&text, config);
        ParsedListing {
            records: extraction.records,
            source_timezone,
            strategy: extraction.strategy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn yearless_dates_use_current_year() {
        assert_eq!(parse_calendar_date("Mon Mar 4", d(2024, 3, 1), 300), Some(d(2024, 3, 4)));
        assert_eq!(parse_calendar_date("MonMar 4", d(2024, 3, 1), 300), Some(d(2024, 3, 4)));
        assert_eq!(parse_calendar_date("Tue March 5th", d(2024, 3, 1), 300), Some(d(2024, 3, 5)));
    }

    #[test]
    fn december_dates_seen_in_january_belong_to_last_year() {
        assert_eq!(parse_calendar_date("Mon Dec 30", d(2025, 1, 3), 300), Some(d(2024, 12, 30)));
    }

    #[test]
    fn january_dates_seen_in_december_belong_to_next_year() {
        assert_eq!(parse_calendar_date("Thu Jan 2", d(2024, 12, 28), 300), Some(d(2025, 1, 2)));
    }

    #[test]
    fn rollover_threshold_is_configurable() {
        // 60 days in the past: stays put at 300, rolls forward at 30.
        assert_eq!(parse_calendar_date("Jan 1", d(2024, 3, 1), 300), Some(d(2024, 1, 1)));
        assert_eq!(parse_calendar_date("Jan 1", d(2024, 3, 1), 30), Some(d(2025, 1, 1)));
    }

    #[test]
    fn explicit_years_skip_rollover() {
        assert_eq!(parse_calendar_date("Mar 4, 2024", d(2025, 12, 1), 300), Some(d(2024, 3, 4)));
        assert_eq!(parse_calendar_date("2024-03-04", d(2030, 1, 1), 300), Some(d(2024, 3, 4)));
    }

    #[test]
    fn leap_day_outside_leap_year_picks_nearest_leap_year() {
        assert_eq!(parse_calendar_date("Thu Feb 29", d(2023, 12, 20), 300), Some(d(2024, 2, 29)));
    }

    #[test]
    fn garbage_dates_are_rejected() {
        assert_eq!(parse_calendar_date("", d(2024, 3, 1), 300), None);
        assert_eq!(parse_calendar_date("Mon", d(2024, 3, 1), 300), None);
        assert_eq!(parse_calendar_date("Mar 45", d(2024, 3, 1), 300), None);
    }

    #[test]
    fn twelve_and_twenty_four_hour_times_parse() {
        assert_eq!(parse_time_of_day("8:30am"), TimeOfDay::Clock(t(8, 30)));
        assert_eq!(parse_time_of_day("8:30 AM"), TimeOfDay::Clock(t(8, 30)));
        assert_eq!(parse_time_of_day("12:00pm"), TimeOfDay::Clock(t(12, 0)));
        assert_eq!(parse_time_of_day("12:15am"), TimeOfDay::Clock(t(0, 15)));
        assert_eq!(parse_time_of_day("2pm"), TimeOfDay::Clock(t(14, 0)));
        assert_eq!(parse_time_of_day("13:30"), TimeOfDay::Clock(t(13, 30)));
    }

    #[test]
    fn non_clock_tokens_pass_through_or_become_unparsed() {
        assert_eq!(parse_time_of_day("All Day"), TimeOfDay::Label("All Day".into()));
        assert_eq!(parse_time_of_day(" Tentative "), TimeOfDay::Label("Tentative".into()));
        assert_eq!(parse_time_of_day("Day 2"), TimeOfDay::Label("Day 2".into()));
        assert_eq!(parse_time_of_day(""), TimeOfDay::Unparsed);
        assert_eq!(parse_time_of_day("13:30pm"), TimeOfDay::Unparsed);
        assert_eq!(parse_time_of_day("soon"), TimeOfDay::Unparsed);
    }

    #[test]
    fn conversion_to_utc_can_shift_the_date() {
        let ny = chrono_tz::America::New_York;
        assert_eq!(
            normalize("Mon Mar 4", "8:30pm", ny, d(2024, 3, 1), 300),
            Some((d(2024, 3, 5), "1:30am".to_string()))
        );
        assert_eq!(
            normalize("Mon Mar 4", "8:30am", ny, d(2024, 3, 1), 300),
            Some((d(2024, 3, 4), "1:30pm".to_string()))
        );
        assert_eq!(
            normalize("Mon Mar 4", "All Day", ny, d(2024, 3, 1), 300),
            Some((d(2024, 3, 4), "All Day".to_string()))
        );
        assert_eq!(normalize("nonsense", "8:30am", ny, d(2024, 3, 1), 300), None);
    }

    #[test]
    fn dst_gap_times_move_forward() {
        let ny = chrono_tz::America::New_York;
        // 2:30am on 2024-03-10 does not exist in New York.
        let stamp = to_canonical(d(2024, 3, 10), TimeOfDay::Clock(t(2, 30)), ny);
        assert_eq!(stamp.time, TimeOfDay::Clock(t(7, 30)));
    }

    #[test]
    fn blank_times_carry_forward_within_a_date_block() {
        let mut carry = TimeCarry::new();
        assert_eq!(carry.resolve("Mon Mar 4", "8:30am"), "8:30am");
        assert_eq!(carry.resolve("Mon Mar 4", ""), "8:30am");
        assert_eq!(carry.resolve("Mon Mar 4", "10:00am"), "10:00am");
        assert_eq!(carry.resolve("Tue Mar 5", ""), "");
    }

    #[test]
    fn timestamp_wins_over_wall_clock_text() {
        let raw = RawEventRecord {
            date_text: "Mon Mar 4".into(),
            time_text: "8:30am".into(),
            currency: "usd".into(),
            event_name: " ISM  Services PMI ".into(),
            timestamp: Some(1_709_562_600), // 2024-03-04T14:30:00Z
            ..Default::default()
        };
        let cfg = PipelineConfig::default();
        let ev = normalize_record(&raw, "8:30am", chrono_tz::UTC, d(2024, 3, 1), &cfg).unwrap();
        assert_eq!(ev.date, d(2024, 3, 4));
        assert_eq!(ev.time, "2:30pm");
        assert_eq!(ev.event_name, "ISM Services PMI");
        assert_eq!(ev.currency, "USD");
    }

    #[test]
    fn record_rejections_are_explicit() {
        let cfg = PipelineConfig::default();
        let base = RawEventRecord {
            date_text: "Mon Mar 4".into(),
            currency: "USD".into(),
            event_name: "CPI".into(),
            ..Default::default()
        };
        let ny = chrono_tz::America::New_York;

        let nameless = RawEventRecord { event_name: "  ".into(), ..base.clone() };
        assert_eq!(normalize_record(&nameless, "", ny, d(2024, 3, 1), &cfg), Err(RowRejection::MissingName));

        let eur = RawEventRecord { currency: "EUR".into(), ..base.clone() };
        assert!(matches!(
            normalize_record(&eur, "", ny, d(2024, 3, 1), &cfg),
            Err(RowRejection::CurrencyFiltered(_))
        ));

        let undated = RawEventRecord { date_text: "???".into(), ..base.clone() };
        assert!(matches!(
            normalize_record(&undated, "", ny, d(2024, 3, 1), &cfg),
            Err(RowRejection::UnparseableDate(_))
        ));

        let ev = normalize_record(&base, "whenever", ny, d(2024, 3, 1), &cfg).unwrap();
        assert_eq!(ev.time, "");
        assert_eq!(ev.impact, Impact::Unknown);
    }

    #[test]
    fn impact_prefers_tooltip_then_data_then_class() {
        assert_eq!(
            classify_impact(r#"<span title="Low Impact Expected" class="icon--ff-impact-red"></span>"#),
            Impact::Low
        );
        assert_eq!(
            classify_impact(r#"<span data-impact="3" class="icon--ff-impact-yel"></span>"#),
            Impact::High
        );
        assert_eq!(classify_impact(r#"<span class="icon icon--ff-impact-ora"></span>"#), Impact::Medium);
        assert_eq!(classify_impact(r#"<span class="impact--high"></span>"#), Impact::High);
        assert_eq!(classify_impact("icon--ff-impact-yel"), Impact::Low);
    }

    #[test]
    fn impact_without_signal_is_unknown() {
        assert_eq!(classify_impact(""), Impact::Unknown);
        assert_eq!(
            classify_impact(r#"<span title="Non-Economic" class="icon icon--ff-impact-gra"></span>"#),
            Impact::Unknown
        );
        assert_eq!(classify_impact(r#"<span data-impact="holiday"></span>"#), Impact::Unknown);
    }

    #[test]
    fn js_object_literals_are_repaired_into_json() {
        let js = r#"[{date: 'Mon Mar 4', events: [{name: "CPI, y/y", url: "https:\/\/x.test\/a", ok: true,},],},]"#;
        let repaired = repair_json_like(js);
        let value: JsonValue = serde_json::from_str(&repaired).unwrap();
        assert_eq!(value[0]["date"], "Mon Mar 4");
        assert_eq!(value[0]["events"][0]["name"], "CPI, y/y");
        assert_eq!(value[0]["events"][0]["url"], "https://x.test/a");
        assert_eq!(value[0]["events"][0]["ok"], true);
    }

    #[test]
    fn balanced_slice_ignores_brackets_inside_strings() {
        let text = r#"x = [1, "]", {"a": [2]}] trailing"#;
        let start = text.find('[').unwrap();
        assert_eq!(balanced_slice(text, start), Some(r#"[1, "]", {"a": [2]}]"#));
        assert_eq!(balanced_slice("[1, 2", 0), None);
    }

    fn table_page() -> &'static str {
        r#"<html><body><table class="calendar__table">
        <tr class="calendar__row calendar__row--day-breaker"><td class="calendar__cell" colspan="8"></td></tr>
        <tr class="calendar__row" data-event-id="100">
          <td class="calendar__cell calendar__date"><span>Mon</span> <span>Mar 4</span></td>
          <td class="calendar__cell calendar__time">8:30am</td>
          <td class="calendar__cell calendar__currency">USD</td>
          <td class="calendar__cell calendar__impact"><span title="High Impact Expected" class="icon icon--ff-impact-red"></span></td>
          <td class="calendar__cell calendar__event"><span class="calendar__event-title">Core CPI m/m</span></td>
          <td class="calendar__cell calendar__forecast">0.3%</td>
          <td class="calendar__cell calendar__previous">0.4%</td>
        </tr>
        <tr class="calendar__row">
          <td class="calendar__cell calendar__time"></td>
          <td class="calendar__cell calendar__currency">EUR</td>
          <td class="calendar__cell calendar__impact"><span class="icon icon--ff-impact-red"></span></td>
          <td class="calendar__cell calendar__event"><span class="calendar__event-title">ECB Press Conference</span></td>
        </tr>
        <tr class="calendar__row">
          <td class="calendar__cell calendar__time"></td>
          <td class="calendar__cell calendar__currency">USD</td>
          <td class="calendar__cell calendar__impact"><span class="icon icon--ff-impact-yel"></span></td>
          <td class="calendar__cell calendar__event"><a href="/calendar?event=555">CPI y/y</a></td>
        </tr>
        </table></body></html>"#
    }

    #[test]
    fn html_table_strategy_tracks_date_markers_and_filters_currency() {
        let cfg = PipelineConfig::default();
        let rows = HtmlTableStrategy.extract(table_page(), &cfg).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].date_text, "Mon Mar 4");
        assert_eq!(rows[0].event_name, "Core CPI m/m");
        assert_eq!(rows[0].event_id, "100");
        assert_eq!(rows[0].forecast_text, "0.3%");
        assert_eq!(classify_impact(&rows[0].impact_markup), Impact::High);
        assert_eq!(rows[1].date_text, "Mon Mar 4");
        assert_eq!(rows[1].time_text, "8:30am");
        assert_eq!(rows[1].event_id, "555");
        assert_eq!(rows[1].forecast_text, "");
    }

    #[test]
    fn regex_strategy_matches_table_strategy_on_clean_markup() {
        let cfg = PipelineConfig::default();
        let via_regex = RegexRowStrategy.extract(table_page(), &cfg).unwrap();
        let via_dom = HtmlTableStrategy.extract(table_page(), &cfg).unwrap();
        let names = |rows: &[RawEventRecord]| rows.iter().map(|r| r.event_name.clone()).collect::<Vec<_>>();
        assert_eq!(names(&via_regex), names(&via_dom));
        assert_eq!(via_regex[1].event_id, "555");
    }

    #[test]
    fn blank_time_follows_the_row_above_even_when_it_is_filtered() {
        let page = r#"<table class="calendar__table">
          <tr class="calendar__row">
            <td class="calendar__cell calendar__date">Mon Mar 4</td>
            <td class="calendar__cell calendar__time">8:00am</td>
            <td class="calendar__cell calendar__currency">USD</td>
            <td class="calendar__cell calendar__event">Alpha</td>
          </tr>
          <tr class="calendar__row">
            <td class="calendar__cell calendar__time">8:30am</td>
            <td class="calendar__cell calendar__currency">EUR</td>
            <td class="calendar__cell calendar__event">Euro Row</td>
          </tr>
          <tr class="calendar__row">
            <td class="calendar__cell calendar__time"></td>
            <td class="calendar__cell calendar__currency">USD</td>
            <td class="calendar__cell calendar__event">Bravo</td>
          </tr>
        </table>"#;
        let cfg = PipelineConfig::default();
        for rows in [
            RegexRowStrategy.extract(page, &cfg).unwrap(),
            HtmlTableStrategy.extract(page, &cfg).unwrap(),
        ] {
            let times = rows
                .iter()
                .map(|r| (r.event_name.as_str(), r.time_text.as_str()))
                .collect::<Vec<_>>();
            assert_eq!(times, vec![("Alpha", "8:00am"), ("Bravo", "8:30am")]);
        }
    }

    #[test]
    fn rows_before_first_date_marker_are_dropped() {
        let page = r#"<table class="calendar__table">
          <tr class="calendar__row"><td class="calendar__cell calendar__currency">USD</td><td class="calendar__cell calendar__event">Orphan</td></tr>
          <tr class="calendar__row"><td class="calendar__cell calendar__date">Tue Mar 5</td><td class="calendar__cell calendar__currency">USD</td><td class="calendar__cell calendar__event">Dated</td></tr>
        </table>"#;
        let rows = RegexRowStrategy.extract(page, &PipelineConfig::default()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].event_name, "Dated");
        assert_eq!(rows[0].date_text, "Tue Mar 5");
    }

    #[test]
    fn embedded_json_strategy_reads_days_and_events() {
        let page = r#"<script>
        window.calendarComponentStates = window.calendarComponentStates || [];
        window.calendarComponentStates[1] = {
            days: [
                {date: "<span>Mon <\/span><span>Mar 4<\/span>", events: [
                    {id: 1, name: 'ISM Services PMI', currency: 'USD', impactName: 'high', impactTitle: 'High Impact Expected', timeLabel: '10:00am', forecast: '53.0', previous: '53.4', dateline: 1709564400,},
                    {id: 2, name: 'German Trade Balance', currency: 'EUR', impactName: 'low', timeLabel: '2:00am'},
                ]},
            ],
            timezone_name: 'America/New_York',
        };
        </script>"#;
        let cfg = PipelineConfig::default();
        let rows = EmbeddedJsonStrategy.extract(page, &cfg).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].date_text, "Mon Mar 4");
        assert_eq!(rows[0].event_name, "ISM Services PMI");
        assert_eq!(rows[0].event_id, "1");
        assert_eq!(rows[0].timestamp, Some(1_709_564_400));
        assert_eq!(classify_impact(&rows[0].impact_markup), Impact::High);
        assert_eq!(detect_timezone(page), Some(chrono_tz::America::New_York));
    }

    #[test]
    fn extractor_falls_back_and_reports_strategy() {
        let cfg = PipelineConfig::default();
        let extractor = Extractor::default();
        let out = extractor.extract(table_page(), &cfg);
        assert_eq!(out.strategy, Some("html-table"));
        assert_eq!(out.records.len(), 2);

        let broken = extractor.extract("<html><body>maintenance</body></html>", &cfg);
        assert!(broken.records.is_empty());
        assert_eq!(broken.strategy, None);
    }

    #[test]
    fn listing_urls_carry_range_selector() {
        let adapter = ForexFactoryAdapter::default();
        assert_eq!(
            adapter.listing_url(RangeSelector::NextWeek),
            "https://www.forexfactory.com/calendar?week=next"
        );
        let custom = ForexFactoryAdapter::new("http://localhost/cal?lang=en");
        assert_eq!(custom.listing_url(RangeSelector::Today), "http://localhost/cal?lang=en&day=today");
    }
}
