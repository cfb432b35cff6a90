//! HTTP Handlers for the dashboard API
//!
//! Every failure is answered with `{"detail": "..."}` and the matching status.

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use microgrid_telemetry::config::ServerConfig;
use microgrid_telemetry::observability::PrometheusExporter;
use microgrid_telemetry::services::{HealthChecker, HealthReport};
use microgrid_telemetry::types::{Alert, MeasurementSample, SeriesPoint};
use microgrid_telemetry::{QueryError, QueryFacade};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, warn};

// =============================================================================
// Application State
// =============================================================================

/// Shared application state
pub struct AppState {
    pub facade: QueryFacade,
    pub health: HealthChecker,
    pub exporter: PrometheusExporter,
    pub server: ServerConfig,
}

// =============================================================================
// Errors
// =============================================================================

/// Error response carrying a status and a `detail` message
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub detail: String,
}

impl ApiError {
    pub fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }

    fn unauthorized(detail: &str) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, detail)
    }

    /// Map a facade failure; `context` prefixes unavailability messages
    fn from_query(err: QueryError, context: &str) -> Self {
        match err {
            QueryError::Validation(msg) => Self::new(StatusCode::BAD_REQUEST, msg),
            QueryError::NotFound => {
                Self::new(StatusCode::NOT_FOUND, QueryError::NotFound.to_string())
            }
            QueryError::Unavailable(msg) => {
                error!(error = %msg, "{}", context);
                Self::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    format!("{}: {}", context, msg),
                )
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({ "detail": self.detail })),
        )
            .into_response()
    }
}

// =============================================================================
// Authentication
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
}

/// Exchange the configured credentials for the API token
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    if request.username.is_empty() || request.password.is_empty() {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "Username and password required",
        ));
    }

    if request.username != state.server.username || request.password != state.server.password {
        warn!(username = %request.username, "Rejected login");
        return Err(ApiError::unauthorized("Invalid credentials"));
    }

    Ok(Json(LoginResponse {
        token: state.server.api_token.clone(),
    }))
}

/// Require `Authorization: Bearer <api_token>`
fn authorize(headers: &HeaderMap, expected: &str) -> Result<(), ApiError> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::unauthorized("Missing token"))?;

    if token != expected {
        return Err(ApiError::unauthorized("Invalid token"));
    }
    Ok(())
}

// =============================================================================
// Dashboard Handlers
// =============================================================================

/// Latest complete measurement sample
pub async fn realtime(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<MeasurementSample>, ApiError> {
    authorize(&headers, &state.server.api_token)?;

    state
        .facade
        .realtime_snapshot()
        .await
        .map(Json)
        .map_err(|e| ApiError::from_query(e, "Realtime data unavailable"))
}

#[derive(Debug, Deserialize)]
pub struct HistoricalParams {
    #[serde(default)]
    pub metric: String,
    #[serde(default)]
    pub period: String,
}

/// Series for one metric over a fixed period
pub async fn historical(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<HistoricalParams>,
) -> Result<Json<Vec<SeriesPoint>>, ApiError> {
    authorize(&headers, &state.server.api_token)?;

    state
        .facade
        .historical_series(&params.metric, &params.period)
        .await
        .map(Json)
        .map_err(|e| ApiError::from_query(e, "Historical data unavailable"))
}

/// Retained alerts, newest first
pub async fn alerts(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<Alert>>, ApiError> {
    authorize(&headers, &state.server.api_token)?;
    Ok(Json(state.facade.alerts()))
}

// =============================================================================
// Health & Metrics Handlers
// =============================================================================

/// Health check endpoint
pub async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthReport>) {
    let report = state.health.report().await;
    let status = if report.status.is_operational() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}

/// Prometheus metrics endpoint
pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let (body, content_type) = state.exporter.export_http();
    ([(header::CONTENT_TYPE, content_type)], body)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use chrono::Utc;
    use microgrid_telemetry::config::IngestConfig;
    use microgrid_telemetry::engine::{InMemoryConnector, InMemoryEngine};
    use microgrid_telemetry::observability::{PipelineMetrics, PrometheusConfig};
    use microgrid_telemetry::services::{Dispatcher, HealthConfig, IngestionSupervisor};
    use microgrid_telemetry::transport::MemoryBroker;
    use microgrid_telemetry::types::FieldValue;
    use microgrid_telemetry::{AlertLedger, EventRouter, TimeSeriesGateway};

    struct Fixture {
        engine: Arc<InMemoryEngine>,
        ledger: Arc<AlertLedger>,
        state: Arc<AppState>,
    }

    fn fixture() -> Fixture {
        let engine = Arc::new(InMemoryEngine::new());
        let gateway = Arc::new(TimeSeriesGateway::new(Arc::new(InMemoryConnector::new(
            engine.clone(),
        ))));
        let ledger = Arc::new(AlertLedger::default());
        let metrics = Arc::new(PipelineMetrics::new().unwrap());
        let dispatcher = Arc::new(Dispatcher::new(
            EventRouter::default(),
            gateway.clone(),
            ledger.clone(),
            metrics.clone(),
        ));
        let supervisor = Arc::new(IngestionSupervisor::new(
            Arc::new(MemoryBroker::new()),
            dispatcher,
            &IngestConfig::default(),
        ));

        let state = Arc::new(AppState {
            facade: QueryFacade::new(gateway.clone(), ledger.clone()),
            health: HealthChecker::new(HealthConfig::default(), supervisor, gateway),
            exporter: PrometheusExporter::new(PrometheusConfig::default(), metrics),
            server: ServerConfig::default(),
        });
        Fixture {
            engine,
            ledger,
            state,
        }
    }

    fn bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", token)).unwrap(),
        );
        headers
    }

    fn login_request(username: &str, password: &str) -> Json<LoginRequest> {
        Json(LoginRequest {
            username: username.to_string(),
            password: password.to_string(),
        })
    }

    #[tokio::test]
    async fn test_login() {
        let f = fixture();

        let ok = login(State(f.state.clone()), login_request("user", "password"))
            .await
            .unwrap();
        assert_eq!(ok.0.token, "prototype_token");

        let empty = login(State(f.state.clone()), login_request("", "password"))
            .await
            .unwrap_err();
        assert_eq!(empty.status, StatusCode::BAD_REQUEST);

        let wrong = login(State(f.state.clone()), login_request("user", "nope"))
            .await
            .unwrap_err();
        assert_eq!(wrong.status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_token_required() {
        let f = fixture();

        let missing = alerts(State(f.state.clone()), HeaderMap::new())
            .await
            .unwrap_err();
        assert_eq!(missing.status, StatusCode::UNAUTHORIZED);
        assert_eq!(missing.detail, "Missing token");

        let invalid = alerts(State(f.state.clone()), bearer("other"))
            .await
            .unwrap_err();
        assert_eq!(invalid.detail, "Invalid token");

        assert!(alerts(State(f.state.clone()), bearer("prototype_token"))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_realtime_statuses() {
        let f = fixture();

        let err = realtime(State(f.state.clone()), bearer("prototype_token"))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        assert_eq!(err.detail, "No data available");

        let now = Utc::now();
        f.engine.insert_at("microgrid", "consumption_kW", now, FieldValue::Float(9.5));
        f.engine.insert_at("microgrid", "generation_kW", now, FieldValue::Float(11.2));
        f.engine.insert_at("microgrid", "battery_soc", now, FieldValue::Integer(76));
        let sample = realtime(State(f.state.clone()), bearer("prototype_token"))
            .await
            .unwrap();
        assert_eq!(sample.0.battery_soc, 76);

        f.engine.set_available(false);
        let err = realtime(State(f.state.clone()), bearer("prototype_token"))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(err.detail.starts_with("Realtime data unavailable: "));
    }

    #[tokio::test]
    async fn test_historical_validation() {
        let f = fixture();
        let params = HistoricalParams {
            metric: "voltage".to_string(),
            period: "24h".to_string(),
        };

        let err = historical(State(f.state.clone()), bearer("prototype_token"), Query(params))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert!(err.detail.starts_with("Invalid metric"));

        let params = HistoricalParams {
            metric: "battery_soc".to_string(),
            period: "7d".to_string(),
        };
        let points = historical(State(f.state.clone()), bearer("prototype_token"), Query(params))
            .await
            .unwrap();
        assert!(points.0.is_empty());
    }

    #[tokio::test]
    async fn test_historical_requires_period() {
        let f = fixture();
        let uri: axum::http::Uri = "/api/dashboard/historical?metric=battery_soc".parse().unwrap();
        let params: Query<HistoricalParams> = Query::try_from_uri(&uri).unwrap();
        assert!(params.period.is_empty());

        let err = historical(State(f.state.clone()), bearer("prototype_token"), params)
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert!(err.detail.starts_with("Invalid period"));
    }

    #[tokio::test]
    async fn test_alerts_listing() {
        let f = fixture();
        f.ledger.add("High temp", "2024-01-01T00:00:00Z").unwrap();

        let listed = alerts(State(f.state.clone()), bearer("prototype_token"))
            .await
            .unwrap();
        assert_eq!(listed.0.len(), 1);
        assert_eq!(listed.0[0].message, "High temp");
    }

    #[tokio::test]
    async fn test_health_reports_stopped_ingestion() {
        let f = fixture();
        let (status, report) = health(State(f.state.clone())).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(report.0.failed_checks()[0].name, "ingestion");
    }

    #[tokio::test]
    async fn test_metrics_content_type() {
        let f = fixture();
        let response = metrics(State(f.state.clone())).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap();
        assert!(content_type.starts_with("text/plain"));
    }
}
