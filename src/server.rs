//! HTTP server for the water quality dashboard.
//!
//! This module provides an HTTP server that:
//! - Serves the single-page dashboard at `/dashboard/`
//! - Answers dashboard queries via `GET /api/dashboard`
//! - Streams spreadsheet exports via `GET /api/export`
//! - Polls the upstream sensor API on a fixed interval
//!
//! # Architecture
//!
//! ```text
//! Upstream API ──→ Fetcher ──→ ReadingStore ──→ Windower ──→ Aggregator ──→ Presenter
//!                     ↑                                                        ↓
//!              [refresh tick]                                      GET /api/dashboard
//! ```

use crate::activity::{ActivityStats, SharedActivityLog};
use crate::config::Config;
use crate::core::aggregate::{AggregationWidth, BucketOrigin};
use crate::core::reading::{Field, Reading};
use crate::core::windowing::TimeRange;
use crate::dashboard::{
    build_dashboard, build_export, DashboardParams, DashboardQuery, DashboardView,
    PipelineSettings,
};
use crate::export::ExportFormat;
use crate::fetcher::{run_refresh, Fetcher, FetcherConfig};
use crate::store::{RetentionPolicy, SharedStore};
use axum::{
    extract::{Query, State},
    http::{header, Method, StatusCode},
    response::{Html, IntoResponse, Redirect, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};

const DASHBOARD_HTML: &str = include_str!("assets/dashboard.html");

const LANDING_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head><meta charset="UTF-8"><title>Water Quality Monitoring</title></head>
<body>
    <h1>Water Quality Monitoring Dashboard</h1>
    <p><a href="/dashboard/">Open the dashboard</a></p>
</body>
</html>
"#;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub host: IpAddr,
    /// Port to bind to (0 for random)
    pub port: u16,
    /// Upstream API; `None` serves whatever is already in the store
    pub fetcher: Option<FetcherConfig>,
    /// Interval of the background refresh task
    pub refresh_interval: Duration,
    /// Refresh from upstream before answering each dashboard request
    pub fetch_on_request: bool,
    /// Bucket origin and timezone
    pub settings: PipelineSettings,
}

impl ServerConfig {
    /// Create a loopback server configuration with no upstream.
    pub fn new(port: u16, settings: PipelineSettings) -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port,
            fetcher: None,
            refresh_interval: Duration::from_secs(600),
            fetch_on_request: false,
            settings,
        }
    }

    /// Set the upstream API to poll.
    pub fn with_fetcher(mut self, fetcher: FetcherConfig) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Build from the service configuration, listening on all interfaces.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let tz = config.tz()?;
        let fetcher = FetcherConfig::from_config(config)?;

        Ok(Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: config.port,
            fetcher: Some(fetcher),
            refresh_interval: config.refresh_interval,
            fetch_on_request: config.fetch_on_request,
            settings: PipelineSettings {
                origin: config.bucket_origin,
                tz,
            },
        })
    }
}

/// Shared server state
pub struct ServerState {
    store: SharedStore,
    activity: SharedActivityLog,
    fetcher: Option<Fetcher>,
    settings: PipelineSettings,
    fetch_on_request: bool,
    refresh_interval: Duration,
    /// Serializes refreshes so pipeline runs never overlap a fetch
    refresh_lock: Mutex<()>,
}

impl ServerState {
    /// Create new server state
    pub fn new(
        config: &ServerConfig,
        store: SharedStore,
        activity: SharedActivityLog,
    ) -> anyhow::Result<Self> {
        let fetcher = match config.fetcher {
            Some(ref fetcher_config) => Some(Fetcher::new(fetcher_config.clone())?),
            None => None,
        };

        Ok(Self {
            store,
            activity,
            fetcher,
            settings: config.settings,
            fetch_on_request: config.fetch_on_request,
            refresh_interval: config.refresh_interval,
            refresh_lock: Mutex::new(()),
        })
    }

    /// Pull from upstream if a fetcher is configured. Failures are logged only.
    async fn refresh(&self) {
        let Some(ref fetcher) = self.fetcher else {
            return;
        };

        let _guard = self.refresh_lock.lock().await;
        let _ = run_refresh(fetcher, &self.store, &self.activity).await;
    }

    /// Parse the query and snapshot the current readings.
    async fn query(&self, params: &DashboardParams) -> (DashboardQuery, Vec<Reading>) {
        if self.fetch_on_request {
            self.refresh().await;
        }

        let query = DashboardQuery::from_params(params, self.settings.tz);
        let readings = self.store.read().await.readings(Utc::now());
        (query, readings)
    }
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Error response
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// Parameter catalogue entry
#[derive(Serialize)]
pub struct ParameterOption {
    pub key: &'static str,
    pub name: &'static str,
    pub unit: &'static str,
    pub color: &'static str,
    pub range: [f64; 2],
}

/// Time range or aggregation choice
#[derive(Serialize)]
pub struct Choice {
    pub code: &'static str,
    pub label: &'static str,
}

/// Initial filter values
#[derive(Serialize)]
pub struct Defaults {
    pub params: Vec<&'static str>,
    pub range: &'static str,
    pub aggregation: &'static str,
}

/// Response of `GET /api/options`
#[derive(Serialize)]
pub struct OptionsResponse {
    pub parameters: Vec<ParameterOption>,
    pub time_ranges: Vec<Choice>,
    pub aggregations: Vec<Choice>,
    pub defaults: Defaults,
    pub refresh_interval_ms: u64,
}

/// Response of `GET /api/status`
#[derive(Serialize)]
pub struct StatusResponse {
    pub activity: ActivityStats,
    pub stored_readings: usize,
    pub latest_reading: Option<DateTime<Utc>>,
    pub retention: RetentionPolicy,
    pub bucket_origin: BucketOrigin,
    pub timezone: String,
    pub upstream: Option<String>,
}

/// GET /health
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// GET /
async fn index() -> Html<&'static str> {
    Html(LANDING_HTML)
}

/// GET /dashboard/
async fn dashboard_page() -> impl IntoResponse {
    (
        [(header::CACHE_CONTROL, "public, max-age=60")],
        Html(DASHBOARD_HTML),
    )
}

/// GET /api/options
async fn options(State(state): State<Arc<ServerState>>) -> Json<OptionsResponse> {
    let parameters = Field::ALL
        .iter()
        .map(|f| {
            let (lo, hi) = f.range();
            ParameterOption {
                key: f.key(),
                name: f.name(),
                unit: f.unit(),
                color: f.color(),
                range: [lo, hi],
            }
        })
        .collect();

    Json(OptionsResponse {
        parameters,
        time_ranges: TimeRange::ALL
            .iter()
            .map(|r| Choice {
                code: r.code(),
                label: r.label(),
            })
            .collect(),
        aggregations: AggregationWidth::ALL
            .iter()
            .map(|a| Choice {
                code: a.code(),
                label: a.label(),
            })
            .collect(),
        defaults: Defaults {
            params: vec![Field::Ph.key()],
            range: TimeRange::default().code(),
            aggregation: AggregationWidth::default().code(),
        },
        refresh_interval_ms: state.refresh_interval.as_millis() as u64,
    })
}

/// GET /api/dashboard
async fn dashboard_api(
    State(state): State<Arc<ServerState>>,
    Query(params): Query<DashboardParams>,
) -> Json<DashboardView> {
    let (query, readings) = state.query(&params).await;
    Json(build_dashboard(&readings, &query, &state.settings, Utc::now()))
}

/// GET /api/export
///
/// Responds with `204 No Content` when there is nothing stored.
async fn export_api(
    State(state): State<Arc<ServerState>>,
    Query(params): Query<DashboardParams>,
) -> Result<Response, (StatusCode, Json<ErrorResponse>)> {
    let (query, readings) = state.query(&params).await;
    let format = params
        .format
        .as_deref()
        .map(ExportFormat::parse)
        .unwrap_or_default();

    let document = build_export(&readings, &query, &state.settings, format, Utc::now())
        .map_err(|e| {
            tracing::error!("Export failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: format!("Export failed: {}", e),
                    code: "EXPORT_ERROR".to_string(),
                }),
            )
        })?;

    let Some(document) = document else {
        tracing::debug!("Export requested with no stored readings");
        return Ok(StatusCode::NO_CONTENT.into_response());
    };

    state.activity.record_export();
    tracing::info!("Exported {} ({} bytes)", document.file_name, document.bytes.len());

    Ok((
        [
            (header::CONTENT_TYPE, document.content_type().to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", document.file_name),
            ),
        ],
        document.bytes,
    )
        .into_response())
}

/// GET /api/status
async fn status(State(state): State<Arc<ServerState>>) -> Json<StatusResponse> {
    let store = state.store.read().await;

    Json(StatusResponse {
        activity: state.activity.stats(),
        stored_readings: store.len(),
        latest_reading: store.latest().map(|r| r.timestamp),
        retention: store.retention(),
        bucket_origin: state.settings.origin,
        timezone: state.settings.tz.name().to_string(),
        upstream: state.fetcher.as_ref().map(|f| f.url().to_string()),
    })
}

/// Build the router over shared state.
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/dashboard", get(|| async { Redirect::permanent("/dashboard/") }))
        .route("/dashboard/", get(dashboard_page))
        .route("/api/options", get(options))
        .route("/api/dashboard", get(dashboard_api))
        .route("/api/export", get(export_api))
        .route("/api/status", get(status))
        .route("/health", get(health))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET])
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Run the HTTP server and the background refresh task.
pub async fn run(
    config: ServerConfig,
    store: SharedStore,
    activity: SharedActivityLog,
) -> anyhow::Result<(SocketAddr, tokio::sync::oneshot::Sender<()>)> {
    let state = Arc::new(ServerState::new(&config, store, activity)?);
    let app = router(state.clone());

    let addr = SocketAddr::new(config.host, config.port);
    let listener = TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    tracing::info!("Water quality dashboard listening on http://{}", actual_addr);

    let refresh_task = state.fetcher.as_ref().map(|fetcher| {
        tracing::info!(
            "Polling {} every {}s",
            fetcher.url(),
            state.refresh_interval.as_secs()
        );
        let state = state.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(state.refresh_interval);
            loop {
                interval.tick().await;
                state.refresh().await;
            }
        })
    });

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                tracing::info!("Server shutdown signal received");
            })
            .await
        {
            tracing::error!("Server error: {}", e);
        }

        if let Some(task) = refresh_task {
            task.abort();
        }
    });

    Ok((actual_addr, shutdown_tx))
}
