//! StateBus (spec §4.1): serializes all mutation of `SystemState` and fans
//! typed events out to subscribers. Mirrors the reference gateway's
//! `broadcast::Sender<String>` fan-out, but upgrades it in two ways the spec
//! requires and a plain `tokio::sync::broadcast` channel cannot give us:
//! typed (not pre-serialized) events, and per-subscriber bounded queues that
//! drop the *subscriber* instead of forcing every receiver to skip ahead on
//! lag (`slow_consumer`, §4.1 contract / §7 taxonomy).

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

use crate::model::{CaptureProgress, CaptureResult, DopplerInfo, Pass, SystemState, SystemStatus};

const SUBSCRIBER_QUEUE_DEPTH: usize = 256;

#[derive(Debug, Clone)]
pub enum Event {
    StatusChange(SystemStatus),
    PassStart(Pass),
    PassComplete(Box<CaptureResult>),
    Progress(CaptureProgress),
    ScanningFrequency { freq_hz: f64, label: String },
    FftSubscribed { running: bool },
    FftUnsubscribed,
    FftSlice(crate::model::FftSlice),
    Error(String),
}

/// Optional interest filter; `None` means "send me everything".
pub type EventFilter = fn(&Event) -> bool;

pub fn only_fft(event: &Event) -> bool {
    matches!(
        event,
        Event::FftSlice(_) | Event::FftSubscribed { .. } | Event::FftUnsubscribed
    )
}

struct Subscriber {
    tx: mpsc::Sender<Event>,
    filter: Option<EventFilter>,
}

struct Inner {
    state: SystemState,
    subscribers: HashMap<Uuid, Subscriber>,
}

pub struct StateBus {
    inner: Mutex<Inner>,
}

pub type SubscriberId = Uuid;

impl StateBus {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: SystemState::new(Utc::now()),
                subscribers: HashMap::new(),
            }),
        }
    }

    pub fn get_state(&self) -> SystemState {
        self.inner.lock().unwrap().state.clone()
    }

    pub fn subscribe(&self, filter: Option<EventFilter>) -> (SubscriberId, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE_DEPTH);
        let id = Uuid::new_v4();
        let mut guard = self.inner.lock().unwrap();
        guard.subscribers.insert(id, Subscriber { tx, filter });
        (id, rx)
    }

    pub fn unsubscribe(&self, id: SubscriberId) {
        self.inner.lock().unwrap().subscribers.remove(&id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().unwrap().subscribers.len()
    }

    pub fn set_status(&self, status: SystemStatus) {
        let event = {
            let mut guard = self.inner.lock().unwrap();
            guard.state.status = status;
            guard.state.last_update = Utc::now();
            Event::StatusChange(status)
        };
        self.broadcast(event);
    }

    pub fn start_pass(&self, pass: Pass) {
        let event = {
            let mut guard = self.inner.lock().unwrap();
            guard.state.status = SystemStatus::Capturing;
            guard.state.current_pass = Some(pass.clone());
            guard.state.last_update = Utc::now();
            Event::PassStart(pass)
        };
        self.broadcast(event);
    }

    pub fn complete_pass(&self, result: CaptureResult) {
        let event = {
            let mut guard = self.inner.lock().unwrap();
            guard.state.current_pass = None;
            guard.state.capture_progress = None;
            guard.state.last_update = Utc::now();
            Event::PassComplete(Box::new(result))
        };
        self.broadcast(event);
    }

    pub fn update_progress(&self, percent: f32, elapsed_s: f64, total_s: f64) {
        let progress = CaptureProgress {
            percent,
            elapsed_s,
            total_s,
        };
        let event = {
            let mut guard = self.inner.lock().unwrap();
            guard.state.capture_progress = Some(progress.clone());
            guard.state.last_update = Utc::now();
            Event::Progress(progress)
        };
        self.broadcast(event);
    }

    pub fn set_scanning_frequency(&self, freq_hz: Option<f64>, label: impl Into<String>) {
        let label = label.into();
        let event = {
            let mut guard = self.inner.lock().unwrap();
            guard.state.scanning_frequency_hz = freq_hz;
            guard.state.last_update = Utc::now();
            Event::ScanningFrequency {
                freq_hz: freq_hz.unwrap_or(0.0),
                label,
            }
        };
        self.broadcast(event);
    }

    pub fn set_upcoming_passes(&self, passes: Vec<Pass>) {
        let mut guard = self.inner.lock().unwrap();
        let now = Utc::now();
        guard.state.set_upcoming_passes(now, passes);
        guard.state.last_update = now;
    }

    pub fn set_doppler(&self, doppler: Option<DopplerInfo>) {
        let mut guard = self.inner.lock().unwrap();
        guard.state.doppler = doppler;
        guard.state.last_update = Utc::now();
    }

    pub fn set_sdr_connected(&self, connected: bool) {
        let mut guard = self.inner.lock().unwrap();
        guard.state.sdr_connected = connected;
        guard.state.last_update = Utc::now();
    }

    pub fn publish_fft_slice(&self, slice: crate::model::FftSlice) {
        self.broadcast(Event::FftSlice(slice));
    }

    pub fn publish_fft_subscribed(&self, running: bool) {
        self.broadcast(Event::FftSubscribed { running });
    }

    pub fn publish_fft_unsubscribed(&self) {
        self.broadcast(Event::FftUnsubscribed);
    }

    pub fn publish_error(&self, message: impl Into<String>) {
        self.broadcast(Event::Error(message.into()));
    }

    /// Serialized broadcast: caller holds the state mutation and the fan-out
    /// under the same critical section above, so subscribers observe events
    /// in the exact order mutations were applied (spec §4.1 / §5 ordering).
    fn broadcast(&self, event: Event) {
        let mut guard = self.inner.lock().unwrap();
        let mut dead = Vec::new();
        for (id, sub) in guard.subscribers.iter() {
            if let Some(filter) = sub.filter {
                if !filter(&event) {
                    continue;
                }
            }
            if let Err(mpsc::error::TrySendError::Full(_) | mpsc::error::TrySendError::Closed(_)) =
                sub.tx.try_send(event.clone())
            {
                warn!(subscriber = %id, "slow_consumer: dropping subscriber with full/closed queue");
                dead.push(*id);
            }
        }
        for id in dead {
            guard.subscribers.remove(&id);
        }
    }
}

impl Default for StateBus {
    fn default() -> Self {
        Self::new()
    }
}
