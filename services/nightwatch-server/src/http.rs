//! REST surface (spec §6 minimum subset). Grounded on the reference
//! gateway's `main.rs` route handlers (`get_aircraft`, `get_aircraft_trail`,
//! `get_sdr_status`): plain `State<Arc<AppState>>` extractors returning
//! `Json`, with errors folded into a JSON body rather than propagated.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tracing::warn;
use uuid::Uuid;

use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/status", axum::routing::get(get_status))
        .route("/api/passes", axum::routing::get(get_passes))
        .route("/api/captures", axum::routing::get(get_captures))
        .route("/api/summary", axum::routing::get(get_summary))
        .route("/api/fft/status", axum::routing::get(get_fft_status))
        .route("/api/fft/stop", axum::routing::post(post_fft_stop))
        .route(
            "/api/fft/notch",
            axum::routing::get(get_notches).post(post_notch),
        )
        .route("/api/fft/notch/:id", axum::routing::delete(delete_notch))
        .route("/api/sstv/status", axum::routing::get(get_sstv_status))
        .route("/api/sstv/capture", axum::routing::post(post_sstv_capture))
        .route("/api/config/gain", axum::routing::post(post_config_gain))
        .route("/api/images/:name", axum::routing::get(get_image))
}

async fn get_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.statebus.get_state())
}

async fn get_passes(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.statebus.get_state().upcoming_passes)
}

#[derive(Deserialize)]
struct CapturesQuery {
    limit: Option<usize>,
}

async fn get_captures(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CapturesQuery>,
) -> impl IntoResponse {
    let limit = params.limit.unwrap_or(20);
    Json(state.recent_captures(limit))
}

async fn get_summary(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(*state.capture_totals.lock().unwrap())
}

async fn get_fft_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "running": state.fft.is_running(),
        "subscribers": state.fft.subscriber_count(),
        "config": state.fft.get_config().map(|c| json!({
            "center_freq_hz": c.center_freq_hz,
            "span_hz": c.span_hz,
            "fft_size": c.fft_size,
            "gain_db": c.gain_db,
            "update_rate_hz": c.update_rate_hz,
        })),
        "error": state.fft.get_error(),
    }))
}

async fn post_fft_stop(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.fft.stop().await;
    Json(json!({ "success": true, "running": false }))
}

async fn get_notches(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let notches: Vec<_> = state
        .fft
        .get_notches()
        .into_iter()
        .map(|n| json!({ "id": n.id, "frequency_hz": n.frequency_hz, "bandwidth_hz": n.bandwidth_hz, "enabled": n.enabled }))
        .collect();
    Json(notches)
}

#[derive(Deserialize)]
struct NotchRequest {
    frequency_hz: f64,
    bandwidth_hz: f64,
}

async fn post_notch(
    State(state): State<Arc<AppState>>,
    Json(req): Json<NotchRequest>,
) -> impl IntoResponse {
    let id = state.fft.add_notch(req.frequency_hz, req.bandwidth_hz);
    Json(json!({ "id": id }))
}

async fn delete_notch(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    state.fft.remove_notch(id);
    StatusCode::NO_CONTENT
}

async fn get_sstv_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "manualEnabled": true,
        "groundScanEnabled": state.config.sstv_ground_scan_enabled,
        "status": state.statebus.get_state().status,
    }))
}

#[derive(Deserialize)]
struct SstvCaptureRequest {
    frequency_hz: f64,
    #[serde(default = "default_sstv_duration_s")]
    duration_s: i64,
}

fn default_sstv_duration_s() -> i64 {
    150
}

async fn post_sstv_capture(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SstvCaptureRequest>,
) -> impl IntoResponse {
    let scanner = state.scanner.clone();
    let config = (*state.config).clone();
    let frequency_hz = req.frequency_hz;
    let duration_s = req.duration_s;
    tokio::spawn(async move {
        match scanner.capture_sstv_manual(frequency_hz, duration_s, &config).await {
            Ok(_) => {}
            Err(e) => warn!(error = %e, "manual sstv capture failed"),
        }
    });
    Json(json!({ "frequency_hz": frequency_hz, "duration_s": duration_s }))
}

#[derive(Deserialize)]
struct GainRequest {
    gain_db: f32,
}

async fn post_config_gain(
    State(state): State<Arc<AppState>>,
    Json(req): Json<GainRequest>,
) -> Response {
    if !(0.0..=49.0).contains(&req.gain_db) {
        return (StatusCode::BAD_REQUEST, Json(json!({ "error": "gain_db must be within [0, 49]" })))
            .into_response();
    }
    state.set_live_gain_db(req.gain_db);
    Json(json!({ "gain_db": req.gain_db })).into_response()
}

/// Path-traversal-safe file server (spec §6, P8): any `..` segment after
/// percent-decoding is rejected with 403. Axum's `Path` extractor already
/// percent-decodes, so the check runs directly against the decoded value.
async fn get_image(State(state): State<Arc<AppState>>, Path(name): Path<String>) -> Response {
    if name.split(['/', '\\']).any(|segment| segment == "..") {
        return StatusCode::FORBIDDEN.into_response();
    }

    let path = state.config.images_dir.join(&name);
    match tokio::fs::read(&path).await {
        Ok(bytes) => {
            let body = Bytes::from(bytes);
            ([(header::CONTENT_TYPE, "image/png")], body).into_response()
        }
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Kept for symmetry with the reference gateway's health endpoint; useful
/// for container liveness probes even though it isn't in §6's minimum set.
pub async fn health_check() -> &'static str {
    "OK"
}
