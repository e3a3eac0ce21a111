//! FftStream (spec §4.4): runs a power-spectrum producer over the arbiter,
//! broadcasts `FftSlice` values to the state bus, and maintains the FFT
//! subscriber registry.
//!
//! The producer side is spawned the same way as the recorder's source (see
//! `recorder.rs` / the reference `sdr/capture.rs`): a dedicated OS thread
//! owns a raw-IQ `rtl_sdr_path` child and an `AtomicBool` stop flag. Instead
//! of writing samples to a WAV sink, the thread windows them and runs
//! `rustfft` to produce power-spectrum bins, which is why `rustfft` and
//! `num-complex` are in the dependency set (grounded on
//! `ccustine-airjedi-desktop`'s manifest, the only pack entry doing SDR DSP
//! in Rust).

use std::collections::HashMap;
use std::io::Read;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use num_complex::Complex32;
use rustfft::FftPlanner;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::arbiter::{Arbiter, Intent, Lease, ProducerHandle};
use crate::error::CoreError;
use crate::model::{FftSlice, ReceiverConfig, SystemStatus};
use crate::statebus::StateBus;

const FFT_SIZE: usize = 2048;
const UPDATE_RATE_HZ: f64 = 30.0;
const DEBOUNCE_START: Duration = Duration::from_millis(500);
const DEBOUNCE_STOP_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy)]
pub struct FftParams {
    pub center_freq_hz: f64,
    pub span_hz: f64,
    pub fft_size: usize,
    pub gain_db: f32,
    pub update_rate_hz: f64,
}

#[derive(Debug, Clone)]
pub struct Notch {
    pub id: Uuid,
    pub frequency_hz: f64,
    pub bandwidth_hz: f64,
    pub enabled: bool,
}

struct RunningHandle {
    running_flag: Arc<AtomicBool>,
    reader_thread: Option<thread::JoinHandle<()>>,
    lease: Option<Lease>,
    params: FftParams,
}

struct Inner {
    registry: HashMap<Uuid, f64>,
    generation: u64,
    handle: Option<RunningHandle>,
    latest: Option<FftSlice>,
    notches: Vec<Notch>,
    error: Option<String>,
}

/// Shared state for the live power-spectrum stream. Cloneable handle over an
/// `Arc`, matching the pattern the arbiter and state bus both use so any
/// component (WebSocket handler, SstvScanner, Scheduler) can hold a copy.
#[derive(Clone)]
pub struct FftStream {
    arbiter: Arbiter,
    statebus: Arc<StateBus>,
    inner: Arc<Mutex<Inner>>,
}

impl FftStream {
    pub fn new(arbiter: Arbiter, statebus: Arc<StateBus>) -> Self {
        Self {
            arbiter,
            statebus,
            inner: Arc::new(Mutex::new(Inner {
                registry: HashMap::new(),
                generation: 0,
                handle: None,
                latest: None,
                notches: Vec::new(),
                error: None,
            })),
        }
    }

    /// `subscribe(subscriber_id, frequency)`: registers interest and triggers
    /// a 500 ms debounced start if policy permits (§3 I5).
    pub fn subscribe(&self, subscriber_id: Uuid, frequency_hz: f64, config: ReceiverConfig) {
        let generation = {
            let mut guard = self.inner.lock().unwrap();
            guard.registry.insert(subscriber_id, frequency_hz);
            guard.generation += 1;
            guard.generation
        };
        self.statebus
            .publish_fft_subscribed(self.is_running());

        let this = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(DEBOUNCE_START).await;
            if this.inner.lock().unwrap().generation != generation {
                return; // superseded by a later subscribe/unsubscribe.
            }
            this.maybe_start(frequency_hz, &config).await;
        });
    }

    /// `unsubscribe(subscriber_id)`: removes subscription; if the registry
    /// becomes empty, stops the stream after a brief grace period.
    pub fn unsubscribe(&self, subscriber_id: Uuid) {
        let (now_empty, generation) = {
            let mut guard = self.inner.lock().unwrap();
            guard.registry.remove(&subscriber_id);
            guard.generation += 1;
            (guard.registry.is_empty(), guard.generation)
        };
        if !now_empty {
            return;
        }
        let this = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(DEBOUNCE_STOP_GRACE).await;
            let still_empty_and_current = {
                let guard = this.inner.lock().unwrap();
                guard.generation == generation && guard.registry.is_empty()
            };
            if still_empty_and_current {
                this.stop().await;
            }
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().unwrap().registry.len()
    }

    async fn maybe_start(&self, frequency_hz: f64, config: &ReceiverConfig) {
        let status = self.statebus.get_state().status;
        if !matches!(status, SystemStatus::Idle | SystemStatus::Waiting | SystemStatus::Scanning) {
            debug!(?status, "fft_stream: policy forbids start in this status");
            return;
        }
        if self.is_running() {
            return;
        }
        let params = FftParams {
            center_freq_hz: frequency_hz,
            span_hz: config.sdr_sample_rate_hz as f64,
            fft_size: FFT_SIZE,
            gain_db: config.sdr_gain_db,
            update_rate_hz: UPDATE_RATE_HZ,
        };
        if let Err(e) = self.start(params, config).await {
            warn!(error = %e, "fft_stream: start failed");
            self.inner.lock().unwrap().error = Some(e.to_string());
        }
    }

    /// `start(params, callback) → bool` (spec §4.4): low-level entry
    /// acquiring the `fft` lease and launching the power-spectrum producer.
    pub async fn start(&self, params: FftParams, config: &ReceiverConfig) -> Result<bool, CoreError> {
        if self.is_running() {
            return Ok(false);
        }
        let lease = self.arbiter.acquire(Intent::Fft, Duration::from_secs(2)).await?;

        let running_flag = Arc::new(AtomicBool::new(true));
        let (pid_tx, pid_rx) = tokio::sync::oneshot::channel();
        let exited = Arc::new(AtomicBool::new(false));

        let statebus = self.statebus.clone();
        let sample_rate = config.sdr_sample_rate_hz;
        let rtl_sdr_path = config.rtl_sdr_path.clone();
        let thread_running = running_flag.clone();
        let thread_exited = exited.clone();
        let thread_params = params;
        let notches = self.inner.clone();

        let reader_thread = thread::Builder::new()
            .name("fft-stream".into())
            .spawn(move || {
                run_power_spectrum(
                    rtl_sdr_path,
                    sample_rate,
                    thread_params,
                    thread_running,
                    thread_exited,
                    pid_tx,
                    statebus,
                    notches,
                )
            })
            .map_err(|e| CoreError::Io(std::io::Error::other(e.to_string())))?;

        let pid = pid_rx.await.unwrap_or(0);
        if pid != 0 {
            let handle = ProducerHandle::with_exited_flag(pid, exited.clone());
            lease.attach_producer(handle);
        }

        let mut guard = self.inner.lock().unwrap();
        guard.handle = Some(RunningHandle {
            running_flag,
            reader_thread: Some(reader_thread),
            lease: Some(lease),
            params,
        });
        guard.error = None;
        drop(guard);

        self.statebus.publish_fft_subscribed(true);
        Ok(true)
    }

    /// `stop()`: terminates the producer, releases the lease.
    pub async fn stop(&self) {
        let handle = self.inner.lock().unwrap().handle.take();
        let Some(mut handle) = handle else { return };

        handle.running_flag.store(false, Ordering::SeqCst);
        if let Some(lease) = handle.lease.take() {
            lease.release().await;
        }
        if let Some(thread) = handle.reader_thread.take() {
            let _ = tokio::task::spawn_blocking(move || thread.join()).await;
        }
        self.statebus.publish_fft_unsubscribed();
    }

    pub fn is_running(&self) -> bool {
        self.inner.lock().unwrap().handle.is_some()
    }

    pub fn get_config(&self) -> Option<FftParams> {
        self.inner.lock().unwrap().handle.as_ref().map(|h| h.params)
    }

    pub fn get_error(&self) -> Option<String> {
        self.inner.lock().unwrap().error.clone()
    }

    pub fn get_latest_fft_data(&self) -> Option<FftSlice> {
        self.inner.lock().unwrap().latest.clone()
    }

    /// Peak power within a centered band around the running stream's
    /// current center frequency, used by the SstvScanner's dwell loop.
    pub fn get_peak_power_in_band(&self, band_hz_width: f64) -> Option<f64> {
        let guard = self.inner.lock().unwrap();
        let slice = guard.latest.as_ref()?;
        let half = band_hz_width / 2.0;
        let bin_count = slice.bins_db.len();
        if bin_count == 0 {
            return None;
        }
        let span = guard
            .handle
            .as_ref()
            .map(|h| h.params.span_hz)
            .unwrap_or(span_from_slice(slice));
        let hz_per_bin = span / bin_count as f64;
        let lo_bin = (((-half) / hz_per_bin) + bin_count as f64 / 2.0).max(0.0) as usize;
        let hi_bin = (((half) / hz_per_bin) + bin_count as f64 / 2.0).min(bin_count as f64 - 1.0) as usize;
        slice.bins_db[lo_bin..=hi_bin.max(lo_bin)]
            .iter()
            .copied()
            .fold(None, |acc: Option<f32>, v| Some(acc.map_or(v, |m| m.max(v))))
            .map(|v| v as f64)
    }

    pub fn add_notch(&self, frequency_hz: f64, bandwidth_hz: f64) -> Uuid {
        let id = Uuid::new_v4();
        self.inner.lock().unwrap().notches.push(Notch {
            id,
            frequency_hz,
            bandwidth_hz,
            enabled: true,
        });
        id
    }

    pub fn remove_notch(&self, id: Uuid) {
        self.inner.lock().unwrap().notches.retain(|n| n.id != id);
    }

    pub fn set_notch_enabled(&self, id: Uuid, enabled: bool) {
        if let Some(n) = self.inner.lock().unwrap().notches.iter_mut().find(|n| n.id == id) {
            n.enabled = enabled;
        }
    }

    pub fn clear_notches(&self) {
        self.inner.lock().unwrap().notches.clear();
    }

    pub fn get_notches(&self) -> Vec<Notch> {
        self.inner.lock().unwrap().notches.clone()
    }
}

fn span_from_slice(_slice: &FftSlice) -> f64 {
    // Fallback used only if the stream has already stopped by the time a
    // caller asks for the band; band lookups against a stale slice without a
    // live span are approximate by construction.
    2_000_000.0
}

#[allow(clippy::too_many_arguments)]
fn run_power_spectrum(
    rtl_sdr_path: std::path::PathBuf,
    sample_rate: u32,
    params: FftParams,
    running: Arc<AtomicBool>,
    exited: Arc<AtomicBool>,
    pid_tx: tokio::sync::oneshot::Sender<u32>,
    statebus: Arc<StateBus>,
    inner: Arc<Mutex<Inner>>,
) {
    let mut cmd = Command::new(&rtl_sdr_path);
    cmd.arg("-f")
        .arg(format!("{}", params.center_freq_hz as u64))
        .arg("-s")
        .arg(format!("{sample_rate}"))
        .arg("-g")
        .arg(format!("{}", params.gain_db))
        .arg("-")
        .stdout(Stdio::piped())
        .stderr(Stdio::null());

    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "failed to spawn fft stream producer");
            let _ = pid_tx.send(0);
            exited.store(true, Ordering::SeqCst);
            return;
        }
    };
    let _ = pid_tx.send(child.id());

    let mut stdout = match child.stdout.take() {
        Some(s) => s,
        None => {
            let _ = child.kill();
            let _ = child.wait();
            exited.store(true, Ordering::SeqCst);
            return;
        }
    };

    let mut planner = FftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(params.fft_size);
    let window = hann_window(params.fft_size);

    let mut raw = vec![0u8; params.fft_size * 2 * 4];
    let mut leftover: Vec<u8> = Vec::new();
    let mut last_emit = Instant::now() - Duration::from_secs(1);
    let emit_period = Duration::from_secs_f64(1.0 / params.update_rate_hz.max(1.0));
    let sample_counter = AtomicU64::new(0);

    while running.load(Ordering::SeqCst) {
        match stdout.read(&mut raw) {
            Ok(0) => {
                debug!("fft stream producer reached EOF");
                break;
            }
            Ok(n) => {
                leftover.extend_from_slice(&raw[..n]);
                let usable_pairs = leftover.len() / 2;
                let usable_samples = (usable_pairs / params.fft_size) * params.fft_size;
                if usable_samples == 0 {
                    continue;
                }
                let bytes_used = usable_samples * 2;
                let mut buf: Vec<Complex32> = leftover[..bytes_used]
                    .chunks_exact(2)
                    .zip(window.iter().cycle())
                    .map(|(iq, w)| {
                        let i = (iq[0] as f32 - 127.5) / 127.5 * w;
                        let q = (iq[1] as f32 - 127.5) / 127.5 * w;
                        Complex32::new(i, q)
                    })
                    .take(params.fft_size)
                    .collect();
                leftover.drain(..bytes_used);
                sample_counter.fetch_add(usable_samples as u64, Ordering::Relaxed);

                if buf.len() < params.fft_size {
                    continue;
                }
                fft.process(&mut buf);

                if last_emit.elapsed() < emit_period {
                    continue;
                }
                last_emit = Instant::now();

                let mut bins_db: Vec<f32> = buf
                    .iter()
                    .map(|c| 10.0 * (c.norm_sqr() / params.fft_size as f32).max(1e-12).log10())
                    .collect();
                fft_shift(&mut bins_db);
                apply_notches(&mut bins_db, &inner, params);

                let (min_db, max_db) = bins_db.iter().fold((f32::MAX, f32::MIN), |(mn, mx), &v| {
                    (mn.min(v), mx.max(v))
                });
                let slice = FftSlice {
                    timestamp_ms: chrono::Utc::now().timestamp_millis(),
                    center_freq_hz: params.center_freq_hz,
                    bins_db,
                    min_db,
                    max_db,
                };
                inner.lock().unwrap().latest = Some(slice.clone());
                statebus.publish_fft_slice(slice);
            }
            Err(e) => {
                error!(error = %e, "error reading fft stream producer stdout");
                break;
            }
        }
    }

    let _ = child.kill();
    let _ = child.wait();
    exited.store(true, Ordering::SeqCst);
}

fn hann_window(size: usize) -> Vec<f32> {
    (0..size)
        .map(|n| {
            0.5 * (1.0
                - (2.0 * std::f32::consts::PI * n as f32 / (size as f32 - 1.0)).cos())
        })
        .collect()
}

fn fft_shift(bins: &mut [f32]) {
    let mid = bins.len() / 2;
    bins.rotate_left(mid);
}

fn apply_notches(bins: &mut [f32], inner: &Arc<Mutex<Inner>>, params: FftParams) {
    let notches = inner.lock().unwrap().notches.clone();
    if notches.is_empty() {
        return;
    }
    let bin_count = bins.len();
    let hz_per_bin = params.span_hz / bin_count as f64;
    for notch in notches.iter().filter(|n| n.enabled) {
        let offset_hz = notch.frequency_hz - params.center_freq_hz;
        let center_bin = (offset_hz / hz_per_bin) + bin_count as f64 / 2.0;
        let half_width_bins = (notch.bandwidth_hz / 2.0 / hz_per_bin).max(1.0);
        let lo = (center_bin - half_width_bins).max(0.0) as usize;
        let hi = ((center_bin + half_width_bins) as usize).min(bin_count.saturating_sub(1));
        for bin in bins.iter_mut().take(hi + 1).skip(lo) {
            *bin = -200.0;
        }
    }
}
