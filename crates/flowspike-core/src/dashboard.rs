//! flowspike dashboard: HTTP query surface over a replayed flow data set
//!
//! Loads a CSV of flow records once, fits features, then advances a reveal
//! cursor on a fixed interval while the display layer polls `/visible`.
//!
//! Usage:
//!   dashboard --input flows.csv
//!   dashboard --input flows.csv --config flowspike.toml --port 5000

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use clap::Parser;
use once_cell::sync::Lazy;
use prometheus::{Counter, Encoder, Gauge, TextEncoder};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use flowspike_core::{
    PipelineConfig,
    api::{
        self, ApiResponse, SelectRequest, SharedState, TickResponse, VisibleRequest,
        create_shared_state, get_api_routes,
    },
    pipeline::Pipeline,
    series::EntityId,
};

// ============================================================================
// METRICS
// ============================================================================

pub static TICKS_TOTAL: Lazy<Counter> = Lazy::new(|| {
    let c = Counter::new("flowspike_ticks_total", "Playback ticks delivered").unwrap();
    prometheus::register(Box::new(c.clone())).unwrap();
    c
});

pub static QUERIES_TOTAL: Lazy<Counter> = Lazy::new(|| {
    let c = Counter::new("flowspike_visible_queries_total", "Visible-series queries served").unwrap();
    prometheus::register(Box::new(c.clone())).unwrap();
    c
});

pub static UNKNOWN_ENTITY_TOTAL: Lazy<Counter> = Lazy::new(|| {
    let c = Counter::new(
        "flowspike_unknown_entity_total",
        "Per-entity rejections for ids outside the loaded set",
    )
    .unwrap();
    prometheus::register(Box::new(c.clone())).unwrap();
    c
});

pub static LOADED_ENTITIES: Lazy<Gauge> = Lazy::new(|| {
    let g = Gauge::new("flowspike_loaded_entities", "Entities with a fitted series").unwrap();
    prometheus::register(Box::new(g.clone())).unwrap();
    g
});

// ============================================================================
// CLI
// ============================================================================

#[derive(Parser)]
#[command(name = "dashboard")]
#[command(about = "Replay per-entity flow volumes and serve spike-tagged series")]
struct Cli {
    /// CSV with entity_id, date, flow_count columns
    #[arg(short, long)]
    input: PathBuf,

    /// TOML pipeline configuration
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    #[arg(short, long, default_value = "5000")]
    port: u16,

    /// Override the configured tick interval
    #[arg(long)]
    tick_ms: Option<u64>,
}

// ============================================================================
// HANDLERS
// ============================================================================

/// `/visible?entities=0,1,2&cursor=9`
#[derive(Debug, Deserialize)]
struct VisibleQuery {
    entities: Option<String>,
    cursor: Option<usize>,
}

fn parse_entities(raw: &str) -> Result<Vec<EntityId>, String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<EntityId>().map_err(|_| format!("Bad entity id: {}", s)))
        .collect()
}

async fn entities_handler(State(state): State<SharedState>) -> impl IntoResponse {
    Json(api::handle_list_entities(&state))
}

async fn visible_handler(
    State(state): State<SharedState>,
    Query(query): Query<VisibleQuery>,
) -> Response {
    let entities = match query.entities.as_deref().map(parse_entities).transpose() {
        Ok(e) => e,
        Err(msg) => {
            return (StatusCode::BAD_REQUEST, Json(ApiResponse::<()>::error(&msg))).into_response();
        }
    };

    QUERIES_TOTAL.inc();
    let response = api::handle_visible(
        &state,
        VisibleRequest {
            entities,
            cursor: query.cursor,
        },
    );

    if let Some(data) = &response.data {
        let unknown = data.series.iter().filter(|s| s.error.is_some()).count();
        if unknown > 0 {
            UNKNOWN_ENTITY_TOTAL.inc_by(unknown as f64);
        }
    }

    Json(response).into_response()
}

async fn select_handler(
    State(state): State<SharedState>,
    Json(request): Json<SelectRequest>,
) -> Response {
    let response = api::handle_select(&state, request);
    let status = if response.success {
        StatusCode::OK
    } else {
        StatusCode::BAD_REQUEST
    };
    (status, Json(response)).into_response()
}

/// Advance playback, counting only ticks that moved the cursor.
fn tick(state: &SharedState, counter: &Counter) -> ApiResponse<TickResponse> {
    let response = api::handle_tick(state);
    if response.data.as_ref().is_some_and(|t| t.advanced) {
        counter.inc();
    }
    response
}

async fn tick_handler(State(state): State<SharedState>) -> impl IntoResponse {
    Json(tick(&state, &TICKS_TOTAL))
}

async fn status_handler(State(state): State<SharedState>) -> impl IntoResponse {
    Json(api::handle_status(&state))
}

async fn summary_handler(State(state): State<SharedState>) -> impl IntoResponse {
    Json(api::handle_summary(&state))
}

async fn metrics_handler() -> Response {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        warn!(error = %e, "Failed to encode metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    (StatusCode::OK, buffer).into_response()
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

// ============================================================================
// PLAYBACK TRIGGER
// ============================================================================

/// Periodic trigger standing in for the UI timer. Stops once every series
/// is fully revealed.
fn spawn_ticker(state: SharedState, interval_ms: u64) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(interval_ms));
        // the first tick of a tokio interval completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            let finished = tick(&state, &TICKS_TOTAL).data.is_none_or(|t| t.status.finished);
            if finished {
                info!("All series revealed; ticker stopped.");
                break;
            }
        }
    })
}

// ============================================================================
// MAIN
// ============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => PipelineConfig::from_toml_file(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(ms) = cli.tick_ms {
        config.tick_interval_ms = ms.max(1);
    }
    let tick_interval_ms = config.tick_interval_ms;

    let pipeline = Pipeline::from_csv(&cli.input, config)?;
    LOADED_ENTITIES.set(pipeline.list_entities().len() as f64);
    info!(
        entities = pipeline.list_entities().len(),
        max_ticks = pipeline.max_cursor(),
        "Features fitted; starting playback."
    );

    let state = create_shared_state(pipeline);
    let ticker = spawn_ticker(state.clone(), tick_interval_ms);

    let app = Router::new()
        .route("/entities", get(entities_handler))
        .route("/visible", get(visible_handler))
        .route("/status", get(status_handler))
        .route("/summary", get(summary_handler))
        .route("/select", post(select_handler))
        .route("/tick", post(tick_handler))
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .with_state(state);

    let addr = format!("{}:{}", cli.host, cli.port);
    let listener = TcpListener::bind(&addr).await?;

    info!(addr, "Dashboard listening.");
    for (method, path, desc) in get_api_routes() {
        info!("  {:4} {:10} - {}", method, path, desc);
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_err() {
                warn!("Failed to install CTRL+C handler");
                std::future::pending::<()>().await;
            }
            info!("Shutting down...");
        })
        .await?;

    ticker.abort();
    info!("Goodbye.");
    Ok(())
}
