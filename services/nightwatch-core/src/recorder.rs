//! Recorder (spec §4.3): writes a WAV file of a pass by piping an IQ/demod
//! source process into a WAV sink.
//!
//! The source is spawned and read exactly the way the reference capture
//! service's `SdrCapture::start` does it: a dedicated OS thread owns a
//! `std::process::Command` child, reads its stdout in a blocking loop, and
//! is torn down via a shared `AtomicBool` (`sdr/capture.rs`). The sink here
//! is the WAV encoder itself: `ReceiverConfig` only names `rtl_sdr_path` and
//! `rtl_fm_path` as external programs, so rather than inventing an unnamed
//! second external binary, the sink runs in-process via `hound` on the same
//! reader thread (noted in the grounding ledger).

use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::arbiter::{Arbiter, Intent, Lease, ProducerHandle};
use crate::error::CoreError;
use crate::model::{DemodVariant, ReceiverConfig, Satellite, SignalKind};

const SOURCE_READ_BUFFER: usize = 64 * 1024;

/// Resolved source command and WAV sink parameters for a satellite's signal
/// kind, per the table in spec §4.3.
struct PipelineSpec {
    program: PathBuf,
    args: Vec<String>,
    sink_sample_rate_hz: u32,
    sink_channels: u16,
    /// Raw `u8` IQ pairs need conversion to signed 16-bit before they reach
    /// the WAV sink; FM-demodulated sources already arrive as signed 16-bit.
    raw_u8_iq: bool,
}

fn pipeline_for(satellite: &Satellite, config: &ReceiverConfig) -> PipelineSpec {
    match (satellite.signal_kind, satellite.signal_params.demod_variant) {
        (SignalKind::Lrpt, DemodVariant::BasebandIq) => PipelineSpec {
            program: config.rtl_sdr_path.clone(),
            args: vec![
                "-f".into(),
                format!("{}", satellite.center_freq_hz as u64),
                "-s".into(),
                "1024000".into(),
                "-g".into(),
                format!("{}", config.sdr_gain_db),
                "-p".into(),
                format!("{}", config.sdr_ppm),
                "-".into(),
            ],
            sink_sample_rate_hz: 1_024_000,
            sink_channels: 2,
            raw_u8_iq: true,
        },
        (SignalKind::Sstv, _) => PipelineSpec {
            program: config.rtl_fm_path.clone(),
            args: vec![
                "-f".into(),
                format!("{}", satellite.center_freq_hz as u64),
                "-s".into(),
                "48000".into(),
                "-g".into(),
                format!("{}", config.sdr_gain_db),
                "-p".into(),
                format!("{}", config.sdr_ppm),
                "-E".into(),
                "dc".into(),
                "-A".into(),
                "fast".into(),
                "-".into(),
            ],
            sink_sample_rate_hz: 48_000,
            sink_channels: 1,
            raw_u8_iq: false,
        },
        (_, DemodVariant::Fm) => PipelineSpec {
            program: config.rtl_fm_path.clone(),
            args: vec![
                "-f".into(),
                format!("{}", satellite.center_freq_hz as u64),
                "-s".into(),
                format!("{}", config.sdr_sample_rate_hz),
                "-g".into(),
                format!("{}", config.sdr_gain_db),
                "-p".into(),
                format!("{}", config.sdr_ppm),
                "-E".into(),
                "deemp".into(),
                "-".into(),
            ],
            sink_sample_rate_hz: config.sdr_sample_rate_hz,
            sink_channels: 1,
            raw_u8_iq: false,
        },
        (_, DemodVariant::BasebandIq) => PipelineSpec {
            program: config.rtl_sdr_path.clone(),
            args: vec![
                "-f".into(),
                format!("{}", satellite.center_freq_hz as u64),
                "-s".into(),
                format!("{}", config.sdr_sample_rate_hz),
                "-g".into(),
                format!("{}", config.sdr_gain_db),
                "-p".into(),
                format!("{}", config.sdr_ppm),
                "-".into(),
            ],
            sink_sample_rate_hz: config.sdr_sample_rate_hz,
            sink_channels: 2,
            raw_u8_iq: true,
        },
    }
}

fn output_path(satellite: &Satellite, config: &ReceiverConfig, start: DateTime<Utc>) -> PathBuf {
    let filename = format!(
        "{}_{}.wav",
        satellite.slug(),
        start.format("%Y-%m-%dT%H-%M-%SZ")
    );
    config.recordings_dir.join(filename)
}

/// A recording in progress (spec §3 RecordingSession). Dropping this without
/// calling `stop()` still releases the arbiter lease (via `Lease`'s own
/// `Drop`), but leaves the WAV sink thread running until it hits end of
/// stream on its own; callers should always `stop()` explicitly.
pub struct RecordingSession {
    pub output_path: PathBuf,
    pub start_time: DateTime<Utc>,
    running: Arc<AtomicBool>,
    exited: Arc<AtomicBool>,
    reader_thread: Option<thread::JoinHandle<()>>,
    lease: Option<Lease>,
}

impl RecordingSession {
    /// `start(satellite, config) → session` (spec §4.3): acquires the
    /// `record` lease, spawns the source→sink pipeline, and returns
    /// immediately with a handle the caller polls/stops.
    pub async fn start(
        arbiter: &Arbiter,
        satellite: &Satellite,
        config: &ReceiverConfig,
    ) -> Result<Self, CoreError> {
        let lease = arbiter.acquire(Intent::Record, Duration::from_secs(5)).await?;
        let start_time = Utc::now();
        let path = output_path(satellite, config, start_time);
        let spec = pipeline_for(satellite, config);

        let running = Arc::new(AtomicBool::new(true));
        let exited = Arc::new(AtomicBool::new(false));
        let (pid_tx, pid_rx) = tokio::sync::oneshot::channel();

        let thread_path = path.clone();
        let thread_running = running.clone();
        let thread_exited = exited.clone();
        let reader_thread = thread::Builder::new()
            .name("recorder-pipeline".into())
            .spawn(move || run_pipeline(spec, thread_path, thread_running, thread_exited, pid_tx))
            .map_err(|e| CoreError::Io(std::io::Error::other(e.to_string())))?;

        let pid = pid_rx
            .await
            .map_err(|_| CoreError::Io(std::io::Error::other("recorder pipeline exited before reporting its pid")))?;
        let handle = ProducerHandle::with_exited_flag(pid, exited.clone());
        lease.attach_producer(handle);

        Ok(Self {
            output_path: path,
            start_time,
            running,
            exited,
            reader_thread: Some(reader_thread),
            lease: Some(lease),
        })
    }

    /// **Pipeline shutdown** (spec §4.3): stop the source first so USB is
    /// released promptly, let the sink flush and exit, then release the
    /// arbiter lease last.
    pub async fn stop(mut self) -> Result<PathBuf, CoreError> {
        self.running.store(false, Ordering::SeqCst);

        if let Some(lease) = self.lease.take() {
            lease.release().await;
        }

        if let Some(handle) = self.reader_thread.take() {
            let _ = tokio::task::spawn_blocking(move || handle.join()).await;
        }

        Ok(self.output_path.clone())
    }

    pub fn producer_died(&self) -> bool {
        self.exited.load(Ordering::SeqCst) && self.running.load(Ordering::SeqCst)
    }
}

/// `record_pass(satellite, duration, config, on_progress) → path` (spec
/// §4.3): convenience wrapper that starts, polls at 1 Hz, stops at duration.
pub async fn record_pass<F>(
    arbiter: &Arbiter,
    satellite: &Satellite,
    duration: Duration,
    config: &ReceiverConfig,
    mut on_progress: F,
) -> Result<PathBuf, CoreError>
where
    F: FnMut(f64, f64),
{
    let session = RecordingSession::start(arbiter, satellite, config).await?;
    let total_s = duration.as_secs_f64();
    let mut elapsed = Duration::ZERO;
    let tick = Duration::from_secs(1);

    while elapsed < duration {
        if session.producer_died() {
            warn!("recorder: producer died mid-pass");
            let _ = session.stop().await;
            return Err(CoreError::ProducerDied);
        }
        let step = tick.min(duration - elapsed);
        tokio::time::sleep(step).await;
        elapsed += step;
        on_progress(elapsed.as_secs_f64(), total_s);
    }

    session.stop().await
}

/// Runs entirely on a dedicated OS thread (grounded on `run_capture` in the
/// reference `sdr/capture.rs`): spawns the source process, reports its pid
/// back to the async caller, then blocks reading stdout until `running`
/// flips false or the child reaches EOF, writing samples to the WAV sink as
/// they arrive.
fn run_pipeline(
    spec: PipelineSpec,
    path: PathBuf,
    running: Arc<AtomicBool>,
    exited: Arc<AtomicBool>,
    pid_tx: tokio::sync::oneshot::Sender<u32>,
) {
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(program = %spec.program.display(), error = %e, "failed to spawn recorder source");
            let _ = pid_tx.send(0);
            exited.store(true, Ordering::SeqCst);
            return;
        }
    };

    let _ = pid_tx.send(child.id());

    if let Some(stderr) = child.stderr.take() {
        thread::spawn(move || log_stderr(stderr));
    }

    let mut stdout = match child.stdout.take() {
        Some(s) => s,
        None => {
            let _ = child.kill();
            let _ = child.wait();
            exited.store(true, Ordering::SeqCst);
            return;
        }
    };

    let wav_spec = hound::WavSpec {
        channels: spec.sink_channels,
        sample_rate: spec.sink_sample_rate_hz,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = match hound::WavWriter::create(&path, wav_spec) {
        Ok(w) => w,
        Err(e) => {
            error!(path = %path.display(), error = %e, "failed to create WAV sink");
            let _ = child.kill();
            let _ = child.wait();
            exited.store(true, Ordering::SeqCst);
            return;
        }
    };

    let mut buffer = vec![0u8; SOURCE_READ_BUFFER];
    let mut leftover = Vec::new();
    info!(path = %path.display(), program = %spec.program.display(), "recorder pipeline started");

    while running.load(Ordering::SeqCst) {
        match stdout.read(&mut buffer) {
            Ok(0) => {
                info!("recorder source reached EOF");
                break;
            }
            Ok(n) => {
                leftover.extend_from_slice(&buffer[..n]);
                write_samples(&mut writer, &mut leftover, spec.raw_u8_iq);
            }
            Err(e) => {
                error!(error = %e, "error reading recorder source stdout");
                break;
            }
        }
    }

    let _ = child.kill();
    let _ = child.wait();
    exited.store(true, Ordering::SeqCst);

    if let Err(e) = writer.finalize() {
        error!(path = %path.display(), error = %e, "failed to finalize WAV sink");
    }
}

/// Converts buffered bytes into WAV samples, consuming complete samples and
/// leaving any trailing partial sample in `leftover` for the next read.
fn write_samples(writer: &mut hound::WavWriter<std::io::BufWriter<std::fs::File>>, leftover: &mut Vec<u8>, raw_u8_iq: bool) {
    if raw_u8_iq {
        // u8 IQ pairs (unsigned, centered at 128) -> signed 16-bit.
        let usable = leftover.len() - (leftover.len() % 2);
        for pair in leftover[..usable].chunks_exact(2) {
            for &byte in pair {
                let centered = byte as i16 - 128;
                let sample = centered * 256;
                if writer.write_sample(sample).is_err() {
                    return;
                }
            }
        }
        leftover.drain(..usable);
    } else {
        // Source already emits signed 16-bit little-endian samples.
        let usable = leftover.len() - (leftover.len() % 2);
        for pair in leftover[..usable].chunks_exact(2) {
            let sample = i16::from_le_bytes([pair[0], pair[1]]);
            if writer.write_sample(sample).is_err() {
                return;
            }
        }
        leftover.drain(..usable);
    }
}

fn log_stderr(stderr: impl std::io::Read) {
    let mut reader = std::io::BufReader::new(stderr);
    let mut line = String::new();
    while std::io::BufRead::read_line(&mut reader, &mut line).unwrap_or(0) > 0 {
        if !line.trim().is_empty() {
            info!(source = "recorder-pipeline", "{}", line.trim());
        }
        line.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{GeodeticPosition, SignalParameters};

    fn dummy_config() -> ReceiverConfig {
        ReceiverConfig {
            station: GeodeticPosition { lat_deg: 0.0, lon_deg: 0.0, alt_m: 0.0 },
            sdr_gain_db: 30.0,
            sdr_ppm: 0,
            sdr_sample_rate_hz: 48_000,
            recordings_dir: PathBuf::from("/tmp"),
            images_dir: PathBuf::from("/tmp"),
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

    fn dummy_satellite(kind: SignalKind, variant: DemodVariant) -> Satellite {
        Satellite {
            name: "NOAA 19".into(),
            catalog_id: 33591,
            center_freq_hz: 137_100_000.0,
            signal_kind: kind,
            signal_params: SignalParameters {
                bandwidth_hz: 40_000.0,
                sample_rate_hz: 48_000,
                demod_variant: variant,
            },
            enabled: true,
        }
    }

    #[test]
    fn filename_policy_matches_slug_and_iso8601() {
        let config = dummy_config();
        let satellite = dummy_satellite(SignalKind::Sstv, DemodVariant::Fm);
        let start = chrono::DateTime::parse_from_rfc3339("2026-03-01T12:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let path = output_path(&satellite, &config, start);
        assert_eq!(path, PathBuf::from("/tmp/noaa-19_2026-03-01T12-30-00Z.wav"));
    }

    #[test]
    fn lrpt_pipeline_uses_raw_sdr_source_at_native_rate() {
        let config = dummy_config();
        let satellite = dummy_satellite(SignalKind::Lrpt, DemodVariant::BasebandIq);
        let spec = pipeline_for(&satellite, &config);
        assert_eq!(spec.sink_sample_rate_hz, 1_024_000);
        assert_eq!(spec.sink_channels, 2);
        assert!(spec.raw_u8_iq);
        assert_eq!(spec.program, PathBuf::from("rtl_sdr"));
    }

    #[test]
    fn sstv_pipeline_uses_fm_demod_at_48k_mono() {
        let config = dummy_config();
        let satellite = dummy_satellite(SignalKind::Sstv, DemodVariant::Fm);
        let spec = pipeline_for(&satellite, &config);
        assert_eq!(spec.sink_sample_rate_hz, 48_000);
        assert_eq!(spec.sink_channels, 1);
        assert!(!spec.raw_u8_iq);
        assert_eq!(spec.program, PathBuf::from("rtl_fm"));
    }

    #[test]
    fn u8_iq_conversion_centers_and_scales_to_i16() {
        let config = dummy_config();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.wav");
        let wav_spec = hound::WavSpec {
            channels: 2,
            sample_rate: 1_024_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, wav_spec).unwrap();
        let mut leftover = vec![128u8, 128u8, 255u8, 0u8];
        write_samples(&mut writer, &mut leftover, true);
        writer.finalize().unwrap();
        assert!(leftover.is_empty());
        let _ = config;
    }
}
