//! Scheduler (spec §4.6): given predicted passes, waits for each, captures
//! it, and publishes results. The only component that orchestrates all the
//! others; never runs two passes concurrently (hardware invariant I1).

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::arbiter::Arbiter;
use crate::fft_stream::FftStream;
use crate::model::{CaptureResult, Pass, ReceiverConfig, SystemStatus};
use crate::predictor::Predictor;
use crate::recorder::record_pass;
use crate::sstv::decode_wav_to_png;
use crate::sstv_scanner::SstvScanner;
use crate::statebus::StateBus;
use crate::store::Store;

/// Safety margin subtracted from a scanner's bounded run time so it always
/// finishes (and releases the arbiter) before the pass it must yield to.
const SCANNER_SAFETY_MARGIN: Duration = Duration::from_secs(5);
const USB_RELEASE_WAIT: Duration = Duration::from_secs(1);
const DEVICE_BUSY_RETRY_COOLDOWN: Duration = Duration::from_secs(2);

pub struct Scheduler {
    arbiter: Arbiter,
    statebus: Arc<StateBus>,
    fft: FftStream,
    scanner: SstvScanner,
    predictor: Arc<dyn Predictor>,
    store: Arc<dyn Store>,
}

impl Scheduler {
    pub fn new(
        arbiter: Arbiter,
        statebus: Arc<StateBus>,
        fft: FftStream,
        scanner: SstvScanner,
        predictor: Arc<dyn Predictor>,
        store: Arc<dyn Store>,
    ) -> Self {
        Self {
            arbiter,
            statebus,
            fft,
            scanner,
            predictor,
            store,
        }
    }

    /// `run_scheduler(passes, config) -> [CaptureResult]` (spec §4.6.3):
    /// sequential, never parallel; a failed pass doesn't abort the list.
    pub async fn run_scheduler(&self, passes: Vec<Pass>, config: &ReceiverConfig) -> Vec<CaptureResult> {
        let now = chrono::Utc::now();
        let mut pending: Vec<Pass> = passes.into_iter().filter(|p| !p.is_past(now)).collect();
        pending.sort_by_key(|p| p.aos);
        self.statebus.set_upcoming_passes(pending.clone());

        let mut results = Vec::with_capacity(pending.len());
        for pass in pending.drain(..) {
            self.wait_for_pass(&pass, config).await;
            let result = self.capture_pass(&pass, config).await;
            if !result.success {
                warn!(satellite = %pass.satellite.name, error = ?result.error, "capture_pass failed");
            }
            results.push(result);

            let remaining: Vec<Pass> = self
                .statebus
                .get_state()
                .upcoming_passes
                .into_iter()
                .filter(|p| p.aos > pass.aos)
                .collect();
            self.statebus.set_upcoming_passes(remaining);
        }
        results
    }

    /// `wait_for_pass(pass, config)` (spec §4.6.1): opportunistically runs
    /// the SSTV scanner while waiting, bounded so it always yields before
    /// `pre_pass_lead`.
    pub async fn wait_for_pass(&self, pass: &Pass, config: &ReceiverConfig) {
        let now = chrono::Utc::now();
        if pass.aos <= now {
            return;
        }
        self.statebus.set_status(SystemStatus::Waiting);

        let idle_threshold = chrono::Duration::seconds(config.sstv_idle_threshold_s);
        let time_to_aos = pass.aos - now;
        let pre_pass_lead = chrono::Duration::seconds(2);

        let scan_handle = if time_to_aos >= idle_threshold && config.sstv_ground_scan_enabled {
            let scan_budget = (time_to_aos - pre_pass_lead - SCANNER_SAFETY_MARGIN)
                .to_std()
                .unwrap_or(Duration::ZERO);
            if scan_budget.is_zero() {
                None
            } else {
                self.scanner.start_scan(
                    config.sstv_scan_frequencies_hz.clone(),
                    config.clone(),
                    scan_budget,
                )
            }
        } else {
            None
        };

        let wake_at = pass.aos - pre_pass_lead;
        let sleep_for = (wake_at - chrono::Utc::now()).to_std().unwrap_or(Duration::ZERO);
        tokio::time::sleep(sleep_for).await;

        if let Some(handle) = scan_handle {
            handle.stop();
        }
    }

    /// `capture_pass(pass, config) -> CaptureResult` (spec §4.6.2).
    pub async fn capture_pass(&self, pass: &Pass, config: &ReceiverConfig) -> CaptureResult {
        let start = chrono::Utc::now();

        if self.fft.is_running() {
            self.fft.stop().await;
            tokio::time::sleep(USB_RELEASE_WAIT).await;
        }

        if !config.skip_signal_check {
            if self.predictor.satellite_frequency(&pass.satellite).is_none() {
                let result = CaptureResult {
                    satellite: pass.satellite.clone(),
                    recording_path: None,
                    image_paths: vec![],
                    start,
                    end: chrono::Utc::now(),
                    peak_signal_db: None,
                    success: false,
                    error: Some(crate::error::CoreError::SignalTooWeak.kind().to_string()),
                };
                self.statebus.complete_pass(result.clone());
                return result;
            }
        }

        self.statebus.start_pass(pass.clone());

        let statebus = self.statebus.clone();
        let duration = Duration::from_secs(pass.duration_s.max(0) as u64);
        let mut wav_path = record_pass(&self.arbiter, &pass.satellite, duration, config, move |elapsed, total| {
            let percent = if total > 0.0 { (elapsed / total * 100.0) as f32 } else { 0.0 };
            statebus.update_progress(percent, elapsed, total);
        })
        .await;

        // §7: device_busy is retried once after the cooldown before the
        // pass is given up on.
        if matches!(wav_path, Err(crate::error::CoreError::DeviceBusy | crate::error::CoreError::AcquireTimeout)) {
            tokio::time::sleep(DEVICE_BUSY_RETRY_COOLDOWN).await;
            let statebus = self.statebus.clone();
            wav_path = record_pass(&self.arbiter, &pass.satellite, duration, config, move |elapsed, total| {
                let percent = if total > 0.0 { (elapsed / total * 100.0) as f32 } else { 0.0 };
                statebus.update_progress(percent, elapsed, total);
            })
            .await;
        }

        let wav_path = match wav_path {
            Ok(p) => p,
            Err(e) => {
                let result = CaptureResult {
                    satellite: pass.satellite.clone(),
                    recording_path: None,
                    image_paths: vec![],
                    start,
                    end: chrono::Utc::now(),
                    peak_signal_db: None,
                    success: false,
                    error: Some(e.kind().to_string()),
                };
                self.statebus.complete_pass(result.clone());
                return result;
            }
        };

        self.statebus.set_status(SystemStatus::Decoding);
        let decoded = match pass.satellite.signal_kind {
            crate::model::SignalKind::Sstv => decode_wav_to_png(&wav_path, &config.images_dir),
            crate::model::SignalKind::Lrpt => self.run_lrpt_decoder(&wav_path, config),
        };

        let (image_paths, peak_signal_db, error) = match decoded {
            Ok(outcome) => (vec![outcome.image_path], Some(outcome.diagnostics.overall_brightness), None),
            Err(e) => {
                info!(satellite = %pass.satellite.name, error = %e, "decode produced no image");
                (vec![], None, Some(crate::error::CoreError::DecodeFailed.kind().to_string()))
            }
        };

        let result = CaptureResult {
            satellite: pass.satellite.clone(),
            recording_path: Some(wav_path),
            image_paths,
            start,
            end: chrono::Utc::now(),
            peak_signal_db,
            success: error.is_none(),
            error,
        };

        if let Err(e) = self.store.save_capture(&result).await {
            warn!(error = %e, "store_unavailable: capture result not persisted");
        }

        self.statebus.set_status(SystemStatus::Idle);
        self.statebus.complete_pass(result.clone());
        result
    }

    /// LRPT demodulation is out of scope (spec §1): invoked as an external
    /// program on the recorded IQ file, mirroring how the reference capture
    /// service shells out to `rtl_adsb` rather than reimplementing decode.
    fn run_lrpt_decoder(
        &self,
        wav_path: &std::path::Path,
        config: &ReceiverConfig,
    ) -> Result<crate::sstv::DecodeOutcome, crate::error::CoreError> {
        let Some(decoder_path) = &config.lrpt_decoder_path else {
            return Err(crate::error::CoreError::DecodeFailed);
        };
        let stem = wav_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "capture".to_string());
        let image_path = config.images_dir.join(format!("{stem}.png"));

        let status = std::process::Command::new(decoder_path)
            .arg(wav_path)
            .arg(&image_path)
            .status()
            .map_err(crate::error::CoreError::Io)?;

        if !status.success() || !image_path.exists() {
            return Err(crate::error::CoreError::DecodeFailed);
        }

        Ok(crate::sstv::DecodeOutcome {
            image_path,
            diagnostics: crate::sstv::quality::assess(
                "LRPT".to_string(),
                0,
                0.0,
                &[],
                1,
                1,
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DemodVariant, GeodeticPosition, Satellite, SignalKind, SignalParameters};
    use crate::store::NullStore;
    use async_trait::async_trait;
    use std::sync::Mutex;

    fn dummy_config() -> ReceiverConfig {
        ReceiverConfig {
            station: GeodeticPosition { lat_deg: 0.0, lon_deg: 0.0, alt_m: 0.0 },
            sdr_gain_db: 30.0,
            sdr_ppm: 0,
            sdr_sample_rate_hz: 48_000,
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
            sstv_ground_scan_enabled: false,
            sstv_scan_frequencies_hz: vec![],
            sstv_idle_threshold_s: 120,
        }
    }

    fn dummy_satellite() -> Satellite {
        Satellite {
            name: "NOAA 19".into(),
            catalog_id: 33591,
            center_freq_hz: 137_100_000.0,
            signal_kind: SignalKind::Sstv,
            signal_params: SignalParameters {
                bandwidth_hz: 40_000.0,
                sample_rate_hz: 48_000,
                demod_variant: DemodVariant::Fm,
            },
            enabled: true,
        }
    }

    struct AlwaysWeakPredictor;
    #[async_trait]
    impl Predictor for AlwaysWeakPredictor {
        async fn upcoming_passes(&self, _now: chrono::DateTime<chrono::Utc>, _horizon: chrono::Duration) -> Vec<Pass> {
            vec![]
        }
        fn satellite_frequency(&self, _satellite: &Satellite) -> Option<f64> {
            None
        }
    }

    struct AlwaysStrongPredictor;
    #[async_trait]
    impl Predictor for AlwaysStrongPredictor {
        async fn upcoming_passes(&self, _now: chrono::DateTime<chrono::Utc>, _horizon: chrono::Duration) -> Vec<Pass> {
            vec![]
        }
        fn satellite_frequency(&self, satellite: &Satellite) -> Option<f64> {
            Some(satellite.center_freq_hz)
        }
    }

    fn build_scheduler(predictor: Arc<dyn Predictor>) -> Scheduler {
        let arbiter = Arbiter::new();
        let statebus = Arc::new(StateBus::new());
        let fft = FftStream::new(arbiter.clone(), statebus.clone());
        let scanner = SstvScanner::new(arbiter.clone(), statebus.clone(), fft.clone());
        Scheduler::new(arbiter, statebus, fft, scanner, predictor, Arc::new(NullStore))
    }

    #[tokio::test]
    async fn signal_too_weak_skips_recorder_and_broadcasts_failure() {
        let scheduler = build_scheduler(Arc::new(AlwaysWeakPredictor));
        let pass = Pass {
            satellite: dummy_satellite(),
            aos: chrono::Utc::now() - chrono::Duration::seconds(1),
            los: chrono::Utc::now() + chrono::Duration::minutes(5),
            max_elevation_deg: 45.0,
            max_elevation_at: chrono::Utc::now(),
            duration_s: 2,
        };
        let config = dummy_config();

        let (_id, mut rx) = scheduler.statebus.subscribe(None);
        let result = scheduler.capture_pass(&pass, &config).await;

        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("signal_too_weak"));
        assert!(result.recording_path.is_none());

        let mut saw_pass_complete = false;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, crate::statebus::Event::PassComplete(_)) {
                saw_pass_complete = true;
            }
        }
        assert!(saw_pass_complete, "complete_pass must still broadcast on signal_too_weak");
    }

    #[tokio::test]
    async fn run_scheduler_skips_passes_whose_los_is_in_the_past() {
        let scheduler = build_scheduler(Arc::new(AlwaysStrongPredictor));
        let now = chrono::Utc::now();
        let past_pass = Pass {
            satellite: dummy_satellite(),
            aos: now - chrono::Duration::minutes(20),
            los: now - chrono::Duration::minutes(10),
            max_elevation_deg: 10.0,
            max_elevation_at: now - chrono::Duration::minutes(15),
            duration_s: 60,
        };
        let config = dummy_config();
        let results = scheduler.run_scheduler(vec![past_pass], &config).await;
        assert!(results.is_empty(), "P3: past passes are never processed");
    }

    #[tokio::test]
    async fn upcoming_passes_shrink_monotonically_across_iterations() {
        let scheduler = build_scheduler(Arc::new(AlwaysWeakPredictor));
        let now = chrono::Utc::now();
        let seen_lengths = Arc::new(Mutex::new(Vec::new()));

        let first = Pass {
            satellite: dummy_satellite(),
            aos: now - chrono::Duration::seconds(1),
            los: now + chrono::Duration::minutes(1),
            max_elevation_deg: 30.0,
            max_elevation_at: now,
            duration_s: 1,
        };
        let second = Pass {
            aos: now + chrono::Duration::minutes(2),
            los: now + chrono::Duration::minutes(3),
            ..first.clone()
        };

        seen_lengths.lock().unwrap().push(2);
        let _ = scheduler.run_scheduler(vec![second, first], &dummy_config()).await;
        let state = scheduler.statebus.get_state();
        assert!(state.upcoming_passes.is_empty());
    }
}
