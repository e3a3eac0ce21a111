//! End-to-end seed tests (spec §8): real axum router, a bound TCP listener
//! for the WebSocket scenario, and `tower::ServiceExt::oneshot` for the
//! plain HTTP surface where no live socket is needed.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use nightwatch_core::{Arbiter, FftStream, NullStore, ReceiverConfig, Scheduler, StateBus, SstvScanner};
use nightwatch_server::predictor_adapter::FilePredictor;
use nightwatch_server::state::AppState;
use nightwatch_server::build_router;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tower::ServiceExt;

fn test_config() -> ReceiverConfig {
    ReceiverConfig {
        station: nightwatch_core::GeodeticPosition {
            lat_deg: 0.0,
            lon_deg: 0.0,
            alt_m: 0.0,
        },
        sdr_gain_db: 30.0,
        sdr_ppm: 0,
        sdr_sample_rate_hz: 2_000_000,
        recordings_dir: std::env::temp_dir(),
        images_dir: std::env::temp_dir(),
        min_elevation_deg: 20.0,
        min_signal_strength_db: -35.0,
        skip_signal_check: false,
        service_mode: "unattended".into(),
        log_level: "info".into(),
        web_port: 0,
        rtl_sdr_path: "rtl_sdr".into(),
        rtl_fm_path: "rtl_fm".into(),
        lrpt_decoder_path: None,
        sstv_ground_scan_enabled: false,
        sstv_scan_frequencies_hz: vec![145_800_000.0],
        sstv_idle_threshold_s: 120,
    }
}

fn build_state() -> Arc<AppState> {
    let config = Arc::new(test_config());
    let arbiter = Arbiter::new();
    let statebus = Arc::new(StateBus::new());
    let fft = FftStream::new(arbiter.clone(), statebus.clone());
    let scanner = SstvScanner::new(arbiter.clone(), statebus.clone(), fft.clone());
    let predictor = Arc::new(FilePredictor::new("/nonexistent/passes.json".into()));
    let scheduler = Arc::new(Scheduler::new(
        arbiter.clone(),
        statebus.clone(),
        fft.clone(),
        scanner.clone(),
        predictor,
        Arc::new(NullStore),
    ));
    Arc::new(AppState::new(config, statebus, arbiter, fft, scanner, scheduler))
}

/// Seed scenario 1: first message over `/ws` is `init` with `state.status
/// == "idle"`, and a subsequent broadcast is relayed to the client verbatim.
#[tokio::test]
async fn websocket_sends_init_then_relays_broadcasts() {
    let state = build_state();
    let statebus = state.statebus.clone();
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
        .await
        .expect("ws connect");

    let first = ws.next().await.expect("first message").expect("ok frame");
    let WsMessage::Text(text) = first else {
        panic!("expected text frame");
    };
    let value: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(value["type"], "init");
    assert_eq!(value["state"]["status"], "idle");

    statebus.set_status(nightwatch_core::SystemStatus::Capturing);

    let second = ws.next().await.expect("second message").expect("ok frame");
    let WsMessage::Text(text) = second else {
        panic!("expected text frame");
    };
    let value: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(value["type"], "status_change");
    assert_eq!(value["status"], "capturing");
}

/// WebSocket upgrade on any path other than `/ws` must be rejected (spec §6).
#[tokio::test]
async fn websocket_upgrade_on_other_path_is_rejected() {
    let state = build_state();
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let result = tokio_tungstenite::connect_async(format!("ws://{addr}/not-ws")).await;
    assert!(result.is_err(), "upgrade on a non-/ws path must not succeed");
}

/// P8: every `/api/images/:name` request containing a `..` segment after
/// percent-decoding returns 403, regardless of encoding.
#[tokio::test]
async fn image_path_traversal_is_rejected() {
    let state = build_state();
    let app = build_router(state);

    for raw in ["..%2Fsecret", "..", "a%2F..%2Fb"] {
        let request = axum::http::Request::builder()
            .uri(format!("/api/images/{raw}"))
            .body(axum::body::Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(
            response.status(),
            axum::http::StatusCode::FORBIDDEN,
            "traversal attempt {raw} must be rejected"
        );
    }
}

/// §6: `POST /api/config/gain` validates `gain_db` in `[0, 49]`.
#[tokio::test]
async fn gain_endpoint_rejects_out_of_range_value() {
    let state = build_state();
    let app = build_router(state);

    let request = axum::http::Request::builder()
        .method("POST")
        .uri("/api/config/gain")
        .header("content-type", "application/json")
        .body(axum::body::Body::from(r#"{"gain_db": 90.0}"#))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), axum::http::StatusCode::BAD_REQUEST);

    let request = axum::http::Request::builder()
        .method("POST")
        .uri("/api/config/gain")
        .header("content-type", "application/json")
        .body(axum::body::Body::from(r#"{"gain_db": 30.0}"#))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), axum::http::StatusCode::OK);
}
