//! WebSocket surface (spec §6): `/ws` only. Grounded on the reference
//! gateway's `ws_handler.rs` (split sender/receiver, a forwarding task plus
//! a receiving task raced with `tokio::select!`) with two upgrades the spec
//! requires: the `init` message carries the full typed snapshot instead of
//! an ad-hoc "initial"/"device_status" pair, and the subscription happens
//! *before* `init` is sent so events raised between accept and the client
//! attaching its own handlers are buffered in the subscriber's channel
//! rather than lost (design note "buffered WebSocket ingress").

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use nightwatch_core::Event;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::state::AppState;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    FftSubscribe { frequency: f64 },
    FftUnsubscribe,
}

fn event_to_json(event: Event) -> Option<serde_json::Value> {
    Some(match event {
        Event::StatusChange(status) => json!({ "type": "status_change", "status": status }),
        Event::PassStart(pass) => json!({ "type": "pass_start", "pass": pass }),
        Event::PassComplete(result) => json!({ "type": "pass_complete", "result": *result }),
        Event::Progress(progress) => json!({ "type": "progress", "progress": progress }),
        Event::ScanningFrequency { freq_hz, label } => {
            json!({ "type": "scanning_frequency", "frequency_hz": freq_hz, "label": label })
        }
        Event::FftSubscribed { running } => json!({ "type": "fft_subscribed", "running": running }),
        Event::FftUnsubscribed => json!({ "type": "fft_unsubscribed" }),
        Event::FftSlice(slice) => json!({
            "type": "fft_slice",
            "timestamp_ms": slice.timestamp_ms,
            "center_freq_hz": slice.center_freq_hz,
            "bins_db": slice.bins_db,
            "min_db": slice.min_db,
            "max_db": slice.max_db,
        }),
        Event::Error(message) => json!({ "type": "error", "message": message }),
    })
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    // Subscribe before anything else so no mutation in between is missed.
    let (subscriber_id, mut event_rx) = state.statebus.subscribe(None);
    let fft_subscriber_id = Uuid::new_v4();

    let (mut sender, mut receiver) = socket.split();

    let init = json!({
        "type": "init",
        "state": state.statebus.get_state(),
        "fft": {
            "running": state.fft.is_running(),
            "config": state.fft.get_config().map(|c| json!({
                "center_freq_hz": c.center_freq_hz,
                "span_hz": c.span_hz,
                "fft_size": c.fft_size,
                "gain_db": c.gain_db,
                "update_rate_hz": c.update_rate_hz,
            })),
            "error": state.fft.get_error(),
            "subscribers": state.fft.subscriber_count(),
        },
    });
    if sender.send(Message::Text(init.to_string())).await.is_err() {
        state.statebus.unsubscribe(subscriber_id);
        return;
    }

    let mut send_task = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            let Some(payload) = event_to_json(event) else { continue };
            if sender.send(Message::Text(payload.to_string())).await.is_err() {
                break;
            }
        }
    });

    let recv_state = state.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = receiver.next().await {
            match message {
                Message::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(ClientMessage::FftSubscribe { frequency }) => {
                        recv_state
                            .fft
                            .subscribe(fft_subscriber_id, frequency, (*recv_state.config).clone());
                    }
                    Ok(ClientMessage::FftUnsubscribe) => {
                        recv_state.fft.unsubscribe(fft_subscriber_id);
                    }
                    Err(_) => {
                        warn!(message = %text, "ws: ignoring malformed/unknown client message");
                    }
                },
                Message::Close(_) => break,
                Message::Ping(_) | Message::Pong(_) | Message::Binary(_) => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    state.fft.unsubscribe(fft_subscriber_id);
    state.statebus.unsubscribe(subscriber_id);
    debug!("ws: client disconnected");
}
