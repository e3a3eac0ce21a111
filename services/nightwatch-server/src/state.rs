//! Shared application state for the HTTP/WebSocket surface (spec §6),
//! mirroring the reference gateway's `AppState` (`grpc-gateway`'s
//! `db_writer`/`broadcast_tx` pair) but built on the core's typed
//! `StateBus` instead of a pre-serialized JSON broadcast channel.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use nightwatch_core::{
    Arbiter, CaptureResult, FftStream, ReceiverConfig, Scheduler, SstvScanner, StateBus,
};

const RECENT_CAPTURES_CAPACITY: usize = 50;

#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct CaptureTotals {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
}

pub struct AppState {
    pub config: Arc<ReceiverConfig>,
    pub statebus: Arc<StateBus>,
    pub arbiter: Arbiter,
    pub fft: FftStream,
    pub scanner: SstvScanner,
    pub scheduler: Arc<Scheduler>,
    /// Gain is the one `ReceiverConfig` field the REST surface may adjust
    /// post-boot (spec §6 `POST /api/config/gain`); everything else in
    /// `ReceiverConfig` stays immutable for the process lifetime (spec §3).
    pub live_gain_db: Arc<AtomicU32>,
    pub recent_captures: Arc<Mutex<VecDeque<CaptureResult>>>,
    pub capture_totals: Arc<Mutex<CaptureTotals>>,
}

impl AppState {
    pub fn new(
        config: Arc<ReceiverConfig>,
        statebus: Arc<StateBus>,
        arbiter: Arbiter,
        fft: FftStream,
        scanner: SstvScanner,
        scheduler: Arc<Scheduler>,
    ) -> Self {
        let live_gain_db = Arc::new(AtomicU32::new(config.sdr_gain_db.to_bits()));
        Self {
            config,
            statebus,
            arbiter,
            fft,
            scanner,
            scheduler,
            live_gain_db,
            recent_captures: Arc::new(Mutex::new(VecDeque::with_capacity(RECENT_CAPTURES_CAPACITY))),
            capture_totals: Arc::new(Mutex::new(CaptureTotals::default())),
        }
    }

    pub fn live_gain_db(&self) -> f32 {
        f32::from_bits(self.live_gain_db.load(Ordering::SeqCst))
    }

    pub fn set_live_gain_db(&self, gain: f32) {
        self.live_gain_db.store(gain.to_bits(), Ordering::SeqCst);
    }

    pub fn record_capture(&self, result: CaptureResult) {
        let mut totals = self.capture_totals.lock().unwrap();
        totals.total += 1;
        if result.success {
            totals.successful += 1;
        } else {
            totals.failed += 1;
        }
        drop(totals);

        let mut recent = self.recent_captures.lock().unwrap();
        if recent.len() == RECENT_CAPTURES_CAPACITY {
            recent.pop_front();
        }
        recent.push_back(result);
    }

    pub fn recent_captures(&self, limit: usize) -> Vec<CaptureResult> {
        let recent = self.recent_captures.lock().unwrap();
        recent.iter().rev().take(limit).cloned().collect()
    }
}

/// Spawns the background task that keeps `recent_captures`/`capture_totals`
/// current by observing `PassComplete` events, the way the reference
/// gateway's `ws_handler` forwards broadcasts but applied to persistent
/// state instead of a single client.
pub fn spawn_capture_ledger(state: Arc<AppState>) {
    let (_id, mut rx) = state.statebus.subscribe(None);
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if let nightwatch_core::Event::PassComplete(result) = event {
                state.record_capture(*result);
            }
        }
    });
}
