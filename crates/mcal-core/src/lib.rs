//! Core domain model for the market calendar pipeline.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Duration, NaiveDate, NaiveTime};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "mcal-core";

/// Zone every persisted date/time is expressed in.
pub const CANONICAL_TZ: Tz = chrono_tz::UTC;

pub const DEFAULT_SOURCE_TIMEZONE: Tz = chrono_tz::America::New_York;
pub const DEFAULT_TARGET_CURRENCY: &str = "USD";
pub const DEFAULT_ROLLOVER_THRESHOLD_DAYS: i64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Impact {
    High,
    Medium,
    Low,
    #[default]
    Unknown,
}

impl Impact {
    pub fn as_str(&self) -> &'static str {
        match self {
            Impact::High => "High",
            Impact::Medium => "Medium",
            Impact::Low => "Low",
            Impact::Unknown => "Unknown",
        }
    }

    /// Lenient label lookup; anything unrecognized is `Unknown`.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "high" => Impact::High,
            "medium" | "med" => Impact::Medium,
            "low" => Impact::Low,
            _ => Impact::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownImpact(pub String);

impl fmt::Display for UnknownImpact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown impact {:?} (expected high, medium, low or unknown)", self.0)
    }
}

impl std::error::Error for UnknownImpact {}

/// Strict parse for user input; `Unknown` must be asked for by name.
impl FromStr for Impact {
    type Err = UnknownImpact;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match Impact::from_label(s) {
            Impact::Unknown if !s.trim().eq_ignore_ascii_case("unknown") => {
                Err(UnknownImpact(s.to_string()))
            }
            impact => Ok(impact),
        }
    }
}

impl fmt::Display for Impact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parsed time cell. `Unparsed` is the explicit "no usable time" sentinel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeOfDay {
    Clock(NaiveTime),
    Label(String),
    Unparsed,
}

impl TimeOfDay {
    pub fn clock(&self) -> Option<NaiveTime> {
        match self {
            TimeOfDay::Clock(t) => Some(*t),
            _ => None,
        }
    }

    /// Storage form: `8:30am` for clock times, the label verbatim, or empty.
    pub fn to_stored(&self) -> String {
        match self {
            TimeOfDay::Clock(t) => format_clock(*t),
            TimeOfDay::Label(label) => label.clone(),
            TimeOfDay::Unparsed => String::new(),
        }
    }
}

pub fn format_clock(time: NaiveTime) -> String {
    time.format("%-I:%M%P").to_string()
}

/// Case- and whitespace-insensitive form used to compare stored times.
pub fn normalize_time_key(time: &str) -> String {
    time.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Row as scraped, before any interpretation. Every field may be empty.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RawEventRecord {
    pub date_text: String,
    pub time_text: String,
    pub currency: String,
    pub event_name: String,
    pub impact_markup: String,
    pub forecast_text: String,
    pub previous_text: String,
    /// Upstream event id when the page exposes one.
    pub event_id: String,
    /// Upstream unix timestamp (seconds) when the page exposes one.
    pub timestamp: Option<i64>,
}

/// Canonical persisted unit. `date` and `time` are in [`CANONICAL_TZ`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedEvent {
    pub date: NaiveDate,
    pub time: String,
    pub event_name: String,
    pub currency: String,
    pub impact: Impact,
    pub forecast: String,
    pub previous: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdentityKey {
    pub date: NaiveDate,
    pub event_name: String,
    pub time_key: String,
}

impl NormalizedEvent {
    pub fn time_key(&self) -> String {
        normalize_time_key(&self.time)
    }

    pub fn identity_key(&self) -> IdentityKey {
        IdentityKey {
            date: self.date,
            event_name: self.event_name.clone(),
            time_key: self.time_key(),
        }
    }

    /// True when impact, forecast or previous differ from `other`.
    pub fn mutable_fields_differ(&self, other: &NormalizedEvent) -> bool {
        self.impact != other.impact
            || self.forecast != other.forecast
            || self.previous != other.previous
    }
}

/// Explicit per-invocation configuration threaded through the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Zone assumed for the scraped page when it does not declare one.
    pub default_timezone: Tz,
    pub target_currency: String,
    pub verbose: bool,
    /// Distance (days) past which a yearless date is moved to the adjacent year.
    pub rollover_threshold_days: i64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            default_timezone: DEFAULT_SOURCE_TIMEZONE,
            target_currency: DEFAULT_TARGET_CURRENCY.to_string(),
            verbose: false,
            rollover_threshold_days: DEFAULT_ROLLOVER_THRESHOLD_DAYS,
        }
    }
}

impl PipelineConfig {
    pub fn accepts_currency(&self, currency: &str) -> bool {
        currency.trim().eq_ignore_ascii_case(self.target_currency.trim())
    }
}

/// Named date windows the calendar can be fetched and displayed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RangeSelector {
    Today,
    Tomorrow,
    ThisWeek,
    NextWeek,
    ThisMonth,
    NextMonth,
}

impl RangeSelector {
    pub const ALL: [RangeSelector; 6] = [
        RangeSelector::Today,
        RangeSelector::Tomorrow,
        RangeSelector::ThisWeek,
        RangeSelector::NextWeek,
        RangeSelector::ThisMonth,
        RangeSelector::NextMonth,
    ];

    /// Ranges covered by a full refresh; day pages are subsets of these.
    pub const REFRESH: [RangeSelector; 4] = [
        RangeSelector::ThisWeek,
        RangeSelector::NextWeek,
        RangeSelector::ThisMonth,
        RangeSelector::NextMonth,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RangeSelector::Today => "today",
            RangeSelector::Tomorrow => "tomorrow",
            RangeSelector::ThisWeek => "this-week",
            RangeSelector::NextWeek => "next-week",
            RangeSelector::ThisMonth => "this-month",
            RangeSelector::NextMonth => "next-month",
        }
    }

    /// Upstream query parameter selecting this window.
    pub fn query_param(&self) -> (&'static str, &'static str) {
        match self {
            RangeSelector::Today => ("day", "today"),
            RangeSelector::Tomorrow => ("day", "tomorrow"),
            RangeSelector::ThisWeek => ("week", "this"),
            RangeSelector::NextWeek => ("week", "next"),
            RangeSelector::ThisMonth => ("month", "this"),
            RangeSelector::NextMonth => ("month", "next"),
        }
    }

    /// Inclusive `(start, end)` dates. Weeks run Monday to Sunday.
    pub fn bounds(&self, today: NaiveDate) -> (NaiveDate, NaiveDate) {
        match self {
            RangeSelector::Today => (today, today),
            RangeSelector::Tomorrow => {
                let tomorrow = today + Duration::days(1);
                (tomorrow, tomorrow)
            }
            RangeSelector::ThisWeek => week_bounds(today),
            RangeSelector::NextWeek => week_bounds(today + Duration::days(7)),
            RangeSelector::ThisMonth => month_bounds(today.year(), today.month()),
            RangeSelector::NextMonth => {
                if today.month() == 12 {
                    month_bounds(today.year() + 1, 1)
                } else {
                    month_bounds(today.year(), today.month() + 1)
                }
            }
        }
    }
}

fn week_bounds(day: NaiveDate) -> (NaiveDate, NaiveDate) {
    let start = day - Duration::days(i64::from(day.weekday().num_days_from_monday()));
    (start, start + Duration::days(6))
}

fn month_bounds(year: i32, month: u32) -> (NaiveDate, NaiveDate) {
    let start = NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(NaiveDate::MIN);
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    };
    let end = next.and_then(|d| d.pred_opt()).unwrap_or(start);
    (start, end)
}

impl fmt::Display for RangeSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownRange(pub String);

impl fmt::Display for UnknownRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown range selector: {}", self.0)
    }
}

impl std::error::Error for UnknownRange {}

impl FromStr for RangeSelector {
    type Err = UnknownRange;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s
            .trim()
            .to_ascii_lowercase()
            .replace([' ', '_'], "-");
        RangeSelector::ALL
            .into_iter()
            .find(|r| r.as_str() == key)
            .ok_or_else(|| UnknownRange(s.to_string()))
    }
}

/// Aggregate outcome of one storage batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UpsertStats {
    /// Input batch size, regardless of outcome.
    pub total: usize,
    pub new: usize,
    /// Rows whose identity was already stored.
    pub existing: usize,
    /// Subset of `existing` whose mutable fields changed.
    pub updated: usize,
    pub skipped: usize,
    /// Rows removed by a clear-then-replace pass.
    pub cleared: u64,
    /// Set when a store-wide failure stopped the batch early.
    pub aborted: bool,
}

impl UpsertStats {
    pub fn absorb(&mut self, other: &UpsertStats) {
        self.total += other.total;
        self.new += other.new;
        self.existing += other.existing;
        self.updated += other.updated;
        self.skipped += other.skipped;
        self.cleared += other.cleared;
        self.aborted |= other.aborted;
    }
}

/// Display-ready projection of a stored event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventView {
    pub date: String,
    pub time: String,
    pub event: String,
    pub currency: String,
    pub impact: String,
    pub forecast: String,
    pub previous: String,
}

/// Resolves dashboard aliases (`Eastern`, `Central`, ...) and IANA names.
pub fn resolve_timezone(name: &str) -> Option<Tz> {
    let trimmed = name.trim();
    let alias = match trimmed.to_ascii_lowercase().as_str() {
        "utc" | "gmt" => Some(chrono_tz::UTC),
        "eastern" | "us/eastern" => Some(chrono_tz::America::New_York),
        "central" | "us/central" => Some(chrono_tz::America::Chicago),
        "mountain" | "us/mountain" => Some(chrono_tz::America::Denver),
        "pacific" | "us/pacific" => Some(chrono_tz::America::Los_Angeles),
        _ => None,
    };
    alias.or_else(|| trimmed.parse::<Tz>().ok())
}
