//! Query surface for the display layer
//!
//! Framework-agnostic handlers over shared dashboard state. The `dashboard`
//! binary wires these to HTTP routes; tests call them directly.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

use crate::pipeline::{EntitySummary, Pipeline};
use crate::reveal::{Playback, RevealCursor, TaggedPoint};
use crate::series::EntityId;

/// Everything the dashboard session holds: the built pipeline, the playback
/// cursor and the current entity selection.
pub struct DashboardState {
    pub pipeline: Pipeline,
    pub playback: Playback,
    pub selection: Vec<EntityId>,
}

impl DashboardState {
    pub fn new(pipeline: Pipeline) -> Self {
        let playback = Playback::for_series_len(pipeline.config().step, pipeline.series().max_len());
        let selection = pipeline
            .config()
            .initial_selection(&pipeline.list_entities());
        Self {
            pipeline,
            playback,
            selection,
        }
    }
}

/// Thread-safe handle to dashboard state
pub type SharedState = Arc<Mutex<DashboardState>>;

pub fn create_shared_state(pipeline: Pipeline) -> SharedState {
    Arc::new(Mutex::new(DashboardState::new(pipeline)))
}

fn lock(state: &SharedState) -> MutexGuard<'_, DashboardState> {
    // state is never left half-updated, so a poisoned lock is still usable
    state.lock().unwrap_or_else(|e| e.into_inner())
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Generic API response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: &str) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitiesResponse {
    pub entities: Vec<EntityId>,
    pub selection: Vec<EntityId>,
}

/// Query for visible series. Missing fields fall back to the current
/// selection and the playback cursor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VisibleRequest {
    #[serde(default)]
    pub entities: Option<Vec<EntityId>>,
    #[serde(default)]
    pub cursor: Option<usize>,
}

/// One entity's series, or the reason it could not be served
#[derive(Debug, Clone, Serialize)]
pub struct SeriesView {
    pub entity_id: EntityId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub points: Option<Vec<TaggedPoint>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VisibleResponse {
    pub cursor: usize,
    pub max_cursor: usize,
    pub series: Vec<SeriesView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectRequest {
    pub entities: Vec<EntityId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlaybackStatus {
    pub ticks: usize,
    pub max_ticks: usize,
    pub cursor: usize,
    pub finished: bool,
    pub selection: Vec<EntityId>,
}

/// Result of one playback tick
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TickResponse {
    /// False once every series is fully revealed
    pub advanced: bool,
    #[serde(flatten)]
    pub status: PlaybackStatus,
}

impl PlaybackStatus {
    fn from_state(state: &DashboardState) -> Self {
        Self {
            ticks: state.playback.ticks(),
            max_ticks: state.playback.max_ticks(),
            cursor: state.playback.cursor().steps(),
            finished: state.playback.is_finished(),
            selection: state.selection.clone(),
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /entities
pub fn handle_list_entities(state: &SharedState) -> ApiResponse<EntitiesResponse> {
    let state = lock(state);
    ApiResponse::success(EntitiesResponse {
        entities: state.pipeline.list_entities(),
        selection: state.selection.clone(),
    })
}

/// GET /visible
pub fn handle_visible(state: &SharedState, request: VisibleRequest) -> ApiResponse<VisibleResponse> {
    let state = lock(state);

    let entities = request.entities.unwrap_or_else(|| state.selection.clone());
    let cursor = request
        .cursor
        .map(RevealCursor)
        .unwrap_or_else(|| state.playback.cursor());

    let series = state
        .pipeline
        .visible(&entities, cursor)
        .into_iter()
        .map(|view| match view.result {
            Ok(points) => SeriesView {
                entity_id: view.entity_id,
                points: Some(points),
                error: None,
            },
            Err(e) => SeriesView {
                entity_id: view.entity_id,
                points: None,
                error: Some(e.to_string()),
            },
        })
        .collect();

    ApiResponse::success(VisibleResponse {
        cursor: cursor.steps(),
        max_cursor: state.pipeline.max_cursor(),
        series,
    })
}

/// POST /select - replace the selection; features are not recomputed
pub fn handle_select(state: &SharedState, request: SelectRequest) -> ApiResponse<PlaybackStatus> {
    let mut state = lock(state);

    let unknown: Vec<EntityId> = request
        .entities
        .iter()
        .copied()
        .filter(|&id| !state.pipeline.contains(id))
        .collect();
    if !unknown.is_empty() {
        return ApiResponse::error(&format!("Unknown entities: {:?}", unknown));
    }

    debug!(selection = ?request.entities, "Selection changed");
    state.selection = request.entities;
    ApiResponse::success(PlaybackStatus::from_state(&state))
}

/// POST /tick - advance one tick; a no-op once fully revealed
pub fn handle_tick(state: &SharedState) -> ApiResponse<TickResponse> {
    let mut state = lock(state);
    let advanced = state.playback.advance();
    if advanced {
        debug!(ticks = state.playback.ticks(), "Playback advanced");
        if state.playback.is_finished() {
            info!(ticks = state.playback.ticks(), "Playback complete");
        }
    }
    ApiResponse::success(TickResponse {
        advanced,
        status: PlaybackStatus::from_state(&state),
    })
}

/// GET /status
pub fn handle_status(state: &SharedState) -> ApiResponse<PlaybackStatus> {
    let state = lock(state);
    ApiResponse::success(PlaybackStatus::from_state(&state))
}

/// GET /summary
pub fn handle_summary(state: &SharedState) -> ApiResponse<Vec<EntitySummary>> {
    let state = lock(state);
    ApiResponse::success(state.pipeline.summary())
}

/// API routes definition for documentation/integration
pub fn get_api_routes() -> Vec<(&'static str, &'static str, &'static str)> {
    vec![
        ("GET", "/entities", "List loaded entities and the selection"),
        ("GET", "/visible", "Tagged series up to the cursor"),
        ("GET", "/status", "Playback status"),
        ("GET", "/summary", "Per-entity scale and spike counts"),
        ("POST", "/select", "Replace the entity selection"),
        ("POST", "/tick", "Advance playback by one tick"),
        ("GET", "/health", "Health check"),
        ("GET", "/metrics", "Prometheus metrics"),
    ]
}
