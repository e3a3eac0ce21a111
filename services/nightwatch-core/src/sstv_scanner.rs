//! SstvScanner (spec §4.5): during long enough idle periods, dwell on each
//! configured ground SSTV frequency, watch for a carrier via the FftStream,
//! and seize the SDR to record if one is found.
//!
//! Singleton/cancellation semantics follow the design note "ad-hoc
//! singletons for `isScanning`... Strategy: make the running instance a
//! value owned by the Scheduler; cancellation is a shared atomic flag."

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::arbiter::Arbiter;
use crate::error::CoreError;
use crate::fft_stream::{FftParams, FftStream};
use crate::model::{
    CaptureResult, DemodVariant, ReceiverConfig, Satellite, SignalKind, SignalParameters,
    SystemStatus,
};
use crate::recorder::record_pass;
use crate::statebus::StateBus;

const DWELL_PER_FREQUENCY: Duration = Duration::from_secs(20);
const DWELL_SAMPLE_PERIOD: Duration = Duration::from_millis(500);
const SSTV_BAND_HALF_WIDTH_HZ: f64 = 5_000.0;
const SSTV_CAPTURE_DURATION: Duration = Duration::from_secs(150);
const POST_DETECTION_USB_RELEASE: Duration = Duration::from_secs(1);

/// A single running scan, owned by whoever started it (typically the
/// Scheduler between passes). `stop()` flips a shared flag the dwell loop
/// observes at its next poll point.
#[derive(Clone)]
pub struct ScanHandle {
    cancel: Arc<AtomicBool>,
}

impl ScanHandle {
    pub fn stop(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }
}

pub struct SstvScanner {
    arbiter: Arbiter,
    statebus: Arc<StateBus>,
    fft: FftStream,
    in_flight: Arc<AtomicBool>,
}

fn manual_satellite(frequency_hz: f64) -> Satellite {
    Satellite {
        name: format!("Manual {:.3} MHz", frequency_hz / 1_000_000.0),
        catalog_id: 0,
        center_freq_hz: frequency_hz,
        signal_kind: SignalKind::Sstv,
        signal_params: SignalParameters {
            bandwidth_hz: 40_000.0,
            sample_rate_hz: 48_000,
            demod_variant: DemodVariant::Fm,
        },
        enabled: true,
    }
}

impl SstvScanner {
    pub fn new(arbiter: Arbiter, statebus: Arc<StateBus>, fft: FftStream) -> Self {
        Self {
            arbiter,
            statebus,
            fft,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    /// `scan_for_sstv(frequencies, config, overall_timeout) → Option<ScanHandle>`:
    /// singleton semantics — a concurrent call while one scan is already in
    /// flight returns `None` immediately rather than queuing.
    pub fn start_scan(
        &self,
        frequencies_hz: Vec<f64>,
        config: ReceiverConfig,
        overall_timeout: Duration,
    ) -> Option<ScanHandle> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return None;
        }

        let cancel = Arc::new(AtomicBool::new(false));
        let handle = ScanHandle { cancel: cancel.clone() };

        let this = self.clone_for_task();
        tokio::spawn(async move {
            this.run_dwell_loop(frequencies_hz, config, overall_timeout, cancel).await;
        });

        Some(handle)
    }

    fn clone_for_task(&self) -> Self {
        Self {
            arbiter: self.arbiter.clone(),
            statebus: self.statebus.clone(),
            fft: self.fft.clone(),
            in_flight: self.in_flight.clone(),
        }
    }

    async fn run_dwell_loop(
        &self,
        frequencies_hz: Vec<f64>,
        config: ReceiverConfig,
        overall_timeout: Duration,
        cancel: Arc<AtomicBool>,
    ) {
        let deadline = tokio::time::Instant::now() + overall_timeout;
        self.statebus.set_status(SystemStatus::Scanning);

        let result = self.dwell(frequencies_hz, &config, deadline, &cancel).await;

        // Finally: on any exit path, if status is still scanning, reset to idle.
        if self.statebus.get_state().status == SystemStatus::Scanning {
            self.statebus.set_status(SystemStatus::Idle);
        }
        self.in_flight.store(false, Ordering::SeqCst);

        if let Some(detected_freq) = result {
            info!(freq_hz = detected_freq, "sstv scanner: carrier detected, capture already run");
        }
    }

    /// One pass over the frequency list; returns `Some(freq)` if a capture
    /// was triggered (for logging), `None` if nothing was detected or the
    /// scan was cancelled/timed out.
    async fn dwell(
        &self,
        frequencies_hz: Vec<f64>,
        config: &ReceiverConfig,
        deadline: tokio::time::Instant,
        cancel: &Arc<AtomicBool>,
    ) -> Option<f64> {
        for freq_hz in frequencies_hz {
            if cancel.load(Ordering::SeqCst) || tokio::time::Instant::now() >= deadline {
                return None;
            }

            self.statebus
                .set_scanning_frequency(Some(freq_hz), format!("{:.3} MHz", freq_hz / 1_000_000.0));

            self.fft.stop().await;
            let params = FftParams {
                center_freq_hz: freq_hz,
                span_hz: config.sdr_sample_rate_hz as f64,
                fft_size: 2048,
                gain_db: config.sdr_gain_db,
                update_rate_hz: 30.0,
            };
            if self.fft.start(params, config).await.is_err() {
                continue;
            }

            let dwell_deadline = tokio::time::Instant::now() + DWELL_PER_FREQUENCY;
            let mut detected = false;
            while tokio::time::Instant::now() < dwell_deadline {
                if cancel.load(Ordering::SeqCst) || tokio::time::Instant::now() >= deadline {
                    self.fft.stop().await;
                    return None;
                }
                // P7: threshold used directly, no fudge — a strict `>` guards
                // the historical -5 dB regression.
                if let Some(peak_db) = self.fft.get_peak_power_in_band(SSTV_BAND_HALF_WIDTH_HZ * 2.0) {
                    if peak_db > config.min_signal_strength_db {
                        detected = true;
                        break;
                    }
                }
                tokio::time::sleep(DWELL_SAMPLE_PERIOD).await;
            }

            if detected {
                self.fft.stop().await;
                tokio::time::sleep(POST_DETECTION_USB_RELEASE).await;
                match self.capture_sstv(freq_hz, SSTV_CAPTURE_DURATION, config).await {
                    Ok(result) => {
                        self.statebus.complete_pass(result);
                    }
                    Err(e) => {
                        warn!(error = %e, "sstv scanner: capture failed");
                    }
                }
                return Some(freq_hz);
            }
        }
        self.fft.stop().await;
        None
    }

    /// `capture_sstv(freq, duration)`: records and decodes a manual or
    /// scanner-detected SSTV transmission as a virtual satellite pass.
    pub async fn capture_sstv(
        &self,
        frequency_hz: f64,
        duration: Duration,
        config: &ReceiverConfig,
    ) -> Result<CaptureResult, CoreError> {
        let satellite = manual_satellite(frequency_hz);
        let start = chrono::Utc::now();
        self.statebus.set_status(SystemStatus::Capturing);

        let wav_path = record_pass(&self.arbiter, &satellite, duration, config, |elapsed, total| {
            self.statebus.update_progress((elapsed / total * 100.0) as f32, elapsed, total);
        })
        .await;

        let wav_path = match wav_path {
            Ok(p) => p,
            Err(e) => {
                let result = CaptureResult {
                    satellite,
                    recording_path: None,
                    image_paths: vec![],
                    start,
                    end: chrono::Utc::now(),
                    peak_signal_db: None,
                    success: false,
                    error: Some(e.kind().to_string()),
                };
                self.statebus.set_status(SystemStatus::Idle);
                return Ok(result);
            }
        };

        self.statebus.set_status(SystemStatus::Decoding);
        let decoded = crate::sstv::decode_wav_to_png(&wav_path, &config.images_dir);
        let (image_paths, peak_signal_db, error) = match decoded {
            Ok(outcome) => (vec![outcome.image_path], Some(outcome.diagnostics.overall_brightness as f64), None),
            Err(e) => (vec![], None, Some(e.kind().to_string())),
        };

        self.statebus.set_status(SystemStatus::Idle);

        Ok(CaptureResult {
            satellite,
            recording_path: Some(wav_path),
            image_paths,
            start,
            end: chrono::Utc::now(),
            peak_signal_db,
            success: error.is_none(),
            error,
        })
    }

    /// `capture_sstv_manual` (spec §8 scenario 6): an operator-triggered
    /// one-off capture outside the dwell loop.
    pub async fn capture_sstv_manual(
        &self,
        frequency_hz: f64,
        duration_s: i64,
        config: &ReceiverConfig,
    ) -> Result<CaptureResult, CoreError> {
        self.capture_sstv(frequency_hz, Duration::from_secs(duration_s.max(0) as u64), config)
            .await
    }
}

impl Clone for SstvScanner {
    fn clone(&self) -> Self {
        self.clone_for_task()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::GeodeticPosition;

    fn dummy_config() -> ReceiverConfig {
        ReceiverConfig {
            station: GeodeticPosition { lat_deg: 0.0, lon_deg: 0.0, alt_m: 0.0 },
            sdr_gain_db: 30.0,
            sdr_ppm: 0,
            sdr_sample_rate_hz: 2_000_000,
            recordings_dir: "/tmp".into(),
            images_dir: "/tmp".into(),
            min_elevation_deg: 20.0,
            min_signal_strength_db: -35.0,
            skip_signal_check: false,
            service_mode: "unattended".into(),
            log_level: "info".into(),
            web_port: 8080,
            rtl_sdr_path: "rtl_sdr".into(),
            rtl_fm_path: "rtl_fm".into(),
            lrpt_decoder_path: None,
            sstv_ground_scan_enabled: true,
            sstv_scan_frequencies_hz: vec![145_800_000.0],
            sstv_idle_threshold_s: 120,
        }
    }

    #[test]
    fn manual_satellite_has_expected_name_and_kind() {
        let sat = manual_satellite(145_800_000.0);
        assert_eq!(sat.name, "Manual 145.800 MHz");
        assert_eq!(sat.signal_kind, SignalKind::Sstv);
    }

    #[tokio::test]
    async fn concurrent_start_scan_returns_none_while_in_flight() {
        let arbiter = Arbiter::new();
        let statebus = Arc::new(StateBus::new());
        let fft = FftStream::new(arbiter.clone(), statebus.clone());
        let scanner = SstvScanner::new(arbiter, statebus, fft);

        let first = scanner.start_scan(vec![145_800_000.0], dummy_config(), Duration::from_millis(50));
        assert!(first.is_some());
        let second = scanner.start_scan(vec![145_800_000.0], dummy_config(), Duration::from_millis(50));
        assert!(second.is_none(), "singleton semantics: concurrent scan must return None");

        first.unwrap().stop();
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    #[tokio::test]
    async fn scan_resets_status_to_idle_on_timeout() {
        let arbiter = Arbiter::new();
        let statebus = Arc::new(StateBus::new());
        let fft = FftStream::new(arbiter.clone(), statebus.clone());
        let scanner = SstvScanner::new(arbiter, statebus.clone(), fft);

        scanner.start_scan(vec![145_800_000.0], dummy_config(), Duration::from_millis(50));
        tokio::time::sleep(Duration::from_millis(900)).await;
        assert_eq!(statebus.get_state().status, SystemStatus::Idle);
    }
}
