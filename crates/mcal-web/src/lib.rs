//! Axum JSON surface over the market calendar store and sync pipeline.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{NaiveDate, Utc};
use chrono_tz::Tz;
use mcal_core::{resolve_timezone, Impact, RangeSelector};
use mcal_storage::EventFilter;
use mcal_sync::{SyncMode, SyncPipeline};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{info, warn};

pub const CRATE_NAME: &str = "mcal-web";

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<SyncPipeline>,
}

impl AppState {
    pub fn new(pipeline: Arc<SyncPipeline>) -> Self {
        Self { pipeline }
    }
}

#[derive(Debug, Default, Deserialize)]
struct EventsQuery {
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    tz: Option<String>,
    /// Comma-separated currency codes.
    currency: Option<String>,
    impact: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TzQuery {
    tz: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct SyncQuery {
    mode: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ClearQuery {
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/api/events", get(events_handler).delete(clear_handler))
        .route("/api/events/range/{range}", get(range_events_handler))
        .route("/api/events/next-high-impact", get(next_high_impact_handler))
        .route("/api/sync", post(refresh_all_handler))
        .route("/api/sync/{range}", post(sync_range_handler))
        .with_state(Arc::new(state))
}

pub async fn serve(pipeline: Arc<SyncPipeline>, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "market calendar api listening");
    axum::serve(listener, app(AppState::new(pipeline))).await?;
    Ok(())
}

fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

fn display_zone(name: Option<&str>, pipeline: &SyncPipeline) -> Result<Tz, Response> {
    match name.map(str::trim).filter(|n| !n.is_empty()) {
        None => Ok(pipeline.config().pipeline.default_timezone),
        Some(name) => resolve_timezone(name)
            .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, format!("unknown timezone {name:?}"))),
    }
}

fn parse_impact(label: &str) -> Result<Impact, Response> {
    label
        .parse::<Impact>()
        .map_err(|err| api_error(StatusCode::BAD_REQUEST, err.to_string()))
}

fn parse_range(raw: &str) -> Result<RangeSelector, Response> {
    raw.parse::<RangeSelector>()
        .map_err(|err| api_error(StatusCode::BAD_REQUEST, err.to_string()))
}

async fn healthz_handler() -> &'static str {
    "ok"
}

async fn events_handler(State(state): State<Arc<AppState>>, Query(query): Query<EventsQuery>) -> Response {
    let tz = match display_zone(query.tz.as_deref(), &state.pipeline) {
        Ok(tz) => tz,
        Err(resp) => return resp,
    };
    let impact = match query.impact.as_deref().map(parse_impact).transpose() {
        Ok(impact) => impact,
        Err(resp) => return resp,
    };
    let today = Utc::now().with_timezone(&tz).date_naive();
    let (week_start, week_end) = RangeSelector::ThisWeek.bounds(today);
    let filter = EventFilter {
        start: Some(query.start.unwrap_or(week_start)),
        end: Some(query.end.unwrap_or(week_end)),
        currencies: query
            .currency
            .as_deref()
            .map(|list| {
                list.split(',')
                    .map(|c| c.trim().to_ascii_uppercase())
                    .filter(|c| !c.is_empty())
                    .collect()
            })
            .unwrap_or_default(),
        impact,
    };

    match state.pipeline.events(&filter, tz).await {
        Ok(events) => Json(events).into_response(),
        Err(err) => api_error(StatusCode::SERVICE_UNAVAILABLE, err.to_string()),
    }
}

async fn range_events_handler(
    State(state): State<Arc<AppState>>,
    Path(range): Path<String>,
    Query(query): Query<TzQuery>,
) -> Response {
    let range = match parse_range(&range) {
        Ok(range) => range,
        Err(resp) => return resp,
    };
    let tz = match display_zone(query.tz.as_deref(), &state.pipeline) {
        Ok(tz) => tz,
        Err(resp) => return resp,
    };
    let (start, end) = range.bounds(Utc::now().with_timezone(&tz).date_naive());

    match state.pipeline.events(&EventFilter::between(start, end), tz).await {
        Ok(events) => Json(json!({
            "range": range,
            "start": start,
            "end": end,
            "timezone": tz.name(),
            "events": events,
        }))
        .into_response(),
        Err(err) => api_error(StatusCode::SERVICE_UNAVAILABLE, err.to_string()),
    }
}

async fn next_high_impact_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TzQuery>,
) -> Response {
    let tz = match display_zone(query.tz.as_deref(), &state.pipeline) {
        Ok(tz) => tz,
        Err(resp) => return resp,
    };
    match state.pipeline.next_high_impact(tz, Utc::now()).await {
        Ok(Some(event)) => Json(event).into_response(),
        Ok(None) => api_error(StatusCode::NOT_FOUND, "no upcoming high impact event"),
        Err(err) => api_error(StatusCode::SERVICE_UNAVAILABLE, err.to_string()),
    }
}

async fn sync_range_handler(
    State(state): State<Arc<AppState>>,
    Path(range): Path<String>,
    Query(query): Query<SyncQuery>,
) -> Response {
    let range = match parse_range(&range) {
        Ok(range) => range,
        Err(resp) => return resp,
    };
    let mode = match query.mode.as_deref().map(str::parse::<SyncMode>).transpose() {
        Ok(mode) => mode.unwrap_or_default(),
        Err(err) => return api_error(StatusCode::BAD_REQUEST, err.to_string()),
    };

    match state.pipeline.fetch_events_for_range(range, mode).await {
        Ok(report) => Json(report).into_response(),
        Err(err) => {
            warn!(%range, error = %format!("{err:#}"), "on-demand sync failed");
            api_error(StatusCode::BAD_GATEWAY, format!("{err:#}"))
        }
    }
}

async fn refresh_all_handler(State(state): State<Arc<AppState>>) -> Response {
    Json(state.pipeline.refresh_all_ranges().await).into_response()
}

async fn clear_handler(State(state): State<Arc<AppState>>, Query(query): Query<ClearQuery>) -> Response {
    match state.pipeline.clear_events(query.start, query.end).await {
        Ok(deleted) => Json(json!({ "deleted": deleted })).into_response(),
        Err(err) => api_error(StatusCode::SERVICE_UNAVAILABLE, err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use mcal_core::{NormalizedEvent, PipelineConfig};
    use mcal_storage::{EventStore, MemoryEventStore};
    use mcal_sync::{upsert_batch, SyncConfig};
    use serde_json::Value;
    use tower::ServiceExt;

    fn ev(date: (i32, u32, u32), time: &str, name: &str, currency: &str, impact: Impact) -> NormalizedEvent {
        NormalizedEvent {
            date: NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap(),
            time: time.to_string(),
            event_name: name.to_string(),
            currency: currency.to_string(),
            impact,
            forecast: "0.3%".to_string(),
            previous: "0.4%".to_string(),
        }
    }

    async fn seeded_app() -> (Router, Arc<MemoryEventStore>) {
        let store = Arc::new(MemoryEventStore::new());
        let mut cfg = PipelineConfig::default();
        upsert_batch(
            store.as_ref(),
            &[
                ev((2024, 3, 4), "1:30pm", "Core CPI m/m", "USD", Impact::High),
                ev((2024, 3, 5), "3:00pm", "ISM Services PMI", "USD", Impact::Medium),
                ev((2099, 1, 2), "2:00pm", "Far Future NFP", "USD", Impact::High),
            ],
            &cfg,
        )
        .await;
        cfg.target_currency = "EUR".into();
        upsert_batch(
            store.as_ref(),
            &[ev((2024, 3, 4), "9:00am", "German CPI", "EUR", Impact::High)],
            &cfg,
        )
        .await;

        let pipeline = SyncPipeline::new(SyncConfig::default(), store.clone()).unwrap();
        (app(AppState::new(Arc::new(pipeline))), store)
    }

    async fn send(app: Router, method: &str, uri: &str) -> (StatusCode, Value) {
        let resp = app
            .oneshot(Request::builder().method(method).uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        let value = serde_json::from_slice(&body).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn healthz_answers_ok() {
        let (app, _) = seeded_app().await;
        let resp = app
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn events_are_projected_into_the_requested_zone() {
        let (app, _) = seeded_app().await;
        let (status, body) = send(
            app,
            "GET",
            "/api/events?start=2024-03-04&end=2024-03-05&tz=Eastern&currency=usd",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let events = body.as_array().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["event"], "Core CPI m/m");
        assert_eq!(events[0]["time"], "8:30am");
        assert_eq!(events[0]["date"], "2024-03-04");
        assert_eq!(events[1]["impact"], "Medium");
    }

    #[tokio::test]
    async fn events_filter_by_several_currencies_and_impact() {
        let (app, _) = seeded_app().await;
        let (status, body) = send(
            app.clone(),
            "GET",
            "/api/events?start=2024-03-01&end=2024-03-31&tz=UTC&currency=USD,EUR&impact=high",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let names = body
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["event"].as_str().unwrap().to_string())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["German CPI".to_string(), "Core CPI m/m".to_string()]);

        let (status, _) = send(app, "GET", "/api/events?impact=extreme").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_timezone_and_range_are_rejected() {
        let (app, _) = seeded_app().await;
        let (status, body) = send(app.clone(), "GET", "/api/events?tz=Mars%2FOlympus").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("timezone"));

        let (status, _) = send(app, "GET", "/api/events/range/fortnight").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn range_endpoint_reports_its_bounds() {
        let (app, _) = seeded_app().await;
        let (status, body) = send(app, "GET", "/api/events/range/next-week?tz=Pacific").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["range"], "next-week");
        assert_eq!(body["timezone"], "America/Los_Angeles");
        assert!(body["events"].is_array());
    }

    #[tokio::test]
    async fn next_high_impact_finds_the_future_event() {
        let (app, store) = seeded_app().await;
        let (status, body) = send(app.clone(), "GET", "/api/events/next-high-impact?tz=UTC").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["event"], "Far Future NFP");

        store.delete_range(None, None).await.unwrap();
        let (status, _) = send(app, "GET", "/api/events/next-high-impact").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn delete_clears_the_requested_window() {
        let (app, store) = seeded_app().await;
        let (status, body) = send(app, "DELETE", "/api/events?start=2024-03-04&end=2024-03-04").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["deleted"], 2);
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn sync_rejects_bad_mode_before_fetching() {
        let (app, _) = seeded_app().await;
        let (status, body) = send(app, "POST", "/api/sync/this-week?mode=sideways").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("sideways"));
    }
}
