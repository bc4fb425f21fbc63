// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// All endpoints live under `/api/v1/` and are strictly read-only: they never
// mutate core state. Failures return `{"error": "..."}` payloads with an
// appropriate status code.
//
// CORS is configured permissively for development; tighten allowed origins
// in production.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use tower_http::cors::{Any, CorsLayer};

use crate::app_state::AppState;
use crate::types::{Signal, Timeframe};

// =============================================================================
// Router construction
// =============================================================================

/// Build the read-only REST router with CORS middleware and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/state", get(full_state))
        .route("/api/v1/prices/latest", get(latest_price))
        .route("/api/v1/prices", get(latest_prices))
        .route("/api/v1/candles", get(candles))
        .route("/api/v1/gram-candles", get(gram_candles))
        .route("/api/v1/analysis/latest", get(latest_analysis))
        .route("/api/v1/analysis/history", get(analysis_history))
        .route("/api/v1/simulations", get(simulations))
        .route("/api/v1/simulations/:id", get(simulation_status))
        .route("/api/v1/simulations/:id/positions/open", get(open_positions))
        .route(
            "/api/v1/simulations/:id/positions/closed",
            get(closed_positions),
        )
        .layer(cors)
        .with_state(state)
}

/// `{"error": "..."}` with a status code.
fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(serde_json::json!({ "error": message.into() })),
    )
        .into_response()
}

// =============================================================================
// Health & state
// =============================================================================

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "analysis_version": state.orchestrator.version(),
        "server_time": chrono::Utc::now().timestamp_millis(),
    }))
}

async fn full_state(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.build_snapshot())
}

// =============================================================================
// Prices & candles
// =============================================================================

async fn latest_price(State(state): State<Arc<AppState>>) -> Response {
    match state.tick_store.latest() {
        Some(tick) => Json(tick).into_response(),
        None => error_response(StatusCode::NOT_FOUND, "no ticks yet"),
    }
}

#[derive(Deserialize)]
struct LimitQuery {
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    100
}

async fn latest_prices(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LimitQuery>,
) -> impl IntoResponse {
    let limit = query.limit.min(5000);
    Json(state.tick_store.latest_n(limit))
}

#[derive(Deserialize)]
struct CandleQuery {
    #[serde(default = "default_interval")]
    interval: u32,
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_interval() -> u32 {
    15
}

async fn candles(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CandleQuery>,
) -> Response {
    if query.interval == 0 {
        return error_response(StatusCode::BAD_REQUEST, "interval must be positive");
    }
    Json(state.tick_store.candles(query.interval, query.limit.min(1000))).into_response()
}

async fn gram_candles(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CandleQuery>,
) -> Response {
    if query.interval == 0 {
        return error_response(StatusCode::BAD_REQUEST, "interval must be positive");
    }
    Json(
        state
            .tick_store
            .gram_candles(query.interval, query.limit.min(1000)),
    )
    .into_response()
}

// =============================================================================
// Hybrid analysis
// =============================================================================

#[derive(Deserialize)]
struct AnalysisQuery {
    timeframe: Option<String>,
}

async fn latest_analysis(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AnalysisQuery>,
) -> Response {
    let timeframe = match parse_timeframe(query.timeframe.as_deref()) {
        Ok(tf) => tf,
        Err(response) => return response,
    };

    let result = match timeframe {
        Some(tf) => state.orchestrator.latest(tf),
        None => state.orchestrator.latest_any(),
    };

    match result {
        Some(analysis) => Json(analysis).into_response(),
        None => error_response(StatusCode::NOT_FOUND, "no analysis yet"),
    }
}

#[derive(Deserialize)]
struct HistoryQuery {
    timeframe: Option<String>,
    signal: Option<String>,
    /// RFC 3339 timestamps bounding the page.
    from: Option<String>,
    to: Option<String>,
    #[serde(default = "default_page")]
    page: u32,
    #[serde(default = "default_per_page")]
    per_page: u32,
}

fn default_page() -> u32 {
    1
}

fn default_per_page() -> u32 {
    20
}

async fn analysis_history(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HistoryQuery>,
) -> Response {
    let timeframe = match parse_timeframe(query.timeframe.as_deref()) {
        Ok(tf) => tf,
        Err(response) => return response,
    };

    let signal = match query.signal.as_deref() {
        None => None,
        Some("BUY") => Some(Signal::Buy),
        Some("SELL") => Some(Signal::Sell),
        Some("HOLD") => Some(Signal::Hold),
        Some(other) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                format!("unknown signal type: {other}"),
            )
        }
    };

    let date_range = match (parse_rfc3339(query.from.as_deref()), parse_rfc3339(query.to.as_deref()))
    {
        (Ok(Some(from)), Ok(Some(to))) => Some((from, to)),
        (Ok(None), Ok(None)) => None,
        (Ok(_), Ok(_)) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                "date range needs both `from` and `to`",
            )
        }
        _ => {
            return error_response(
                StatusCode::BAD_REQUEST,
                "dates must be RFC 3339 timestamps",
            )
        }
    };

    match state.storage.hybrid_analysis_history(
        timeframe,
        query.page,
        query.per_page,
        signal,
        date_range,
    ) {
        Ok(results) => Json(results).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

fn parse_rfc3339(input: Option<&str>) -> Result<Option<chrono::DateTime<chrono::Utc>>, ()> {
    match input {
        None => Ok(None),
        Some(raw) => chrono::DateTime::parse_from_rfc3339(raw)
            .map(|t| Some(t.with_timezone(&chrono::Utc)))
            .map_err(|_| ()),
    }
}

fn parse_timeframe(input: Option<&str>) -> Result<Option<Timeframe>, Response> {
    match input {
        None => Ok(None),
        Some(raw) => Timeframe::parse(raw).map(Some).ok_or_else(|| {
            error_response(
                StatusCode::BAD_REQUEST,
                format!("unknown timeframe: {raw}"),
            )
        }),
    }
}

// =============================================================================
// Simulations
// =============================================================================

async fn simulations(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let summaries: Vec<_> = state
        .simulation_engine
        .simulation_ids()
        .into_iter()
        .filter_map(|id| state.simulation_engine.simulation_status(id))
        .collect();
    Json(summaries)
}

async fn simulation_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Response {
    match state.simulation_engine.simulation_status(id) {
        Some(summary) => Json(summary).into_response(),
        None => error_response(StatusCode::NOT_FOUND, format!("unknown simulation {id}")),
    }
}

async fn open_positions(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Response {
    match state.storage.open_positions(id) {
        Ok(positions) => Json(positions).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

#[derive(Deserialize)]
struct ClosedQuery {
    #[serde(default = "default_closed_limit")]
    limit: u32,
}

fn default_closed_limit() -> u32 {
    50
}

async fn closed_positions(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Query(query): Query<ClosedQuery>,
) -> Response {
    match state.storage.closed_positions(id, Some(query.limit.min(500))) {
        Ok(positions) => Json(positions).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}
