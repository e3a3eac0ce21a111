//! Data model (spec §3). Plain data types shared across components; no
//! behavior lives here beyond small derived helpers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    Lrpt,
    Sstv,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DemodVariant {
    Fm,
    BasebandIq,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalParameters {
    pub bandwidth_hz: f64,
    pub sample_rate_hz: u32,
    pub demod_variant: DemodVariant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Satellite {
    pub name: String,
    pub catalog_id: u32,
    pub center_freq_hz: f64,
    pub signal_kind: SignalKind,
    pub signal_params: SignalParameters,
    pub enabled: bool,
}

impl Satellite {
    /// `<satellite-name-slug>` used by the recorder's filename policy (spec §4.3).
    pub fn slug(&self) -> String {
        self.name
            .to_lowercase()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
            .collect::<String>()
            .split('-')
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("-")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pass {
    pub satellite: Satellite,
    pub aos: DateTime<Utc>,
    pub los: DateTime<Utc>,
    pub max_elevation_deg: f64,
    pub max_elevation_at: DateTime<Utc>,
    pub duration_s: i64,
}

impl Pass {
    pub fn is_past(&self, now: DateTime<Utc>) -> bool {
        self.los <= now
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeodeticPosition {
    pub lat_deg: f64,
    pub lon_deg: f64,
    pub alt_m: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiverConfig {
    pub station: GeodeticPosition,
    pub sdr_gain_db: f32,
    pub sdr_ppm: i32,
    pub sdr_sample_rate_hz: u32,
    pub recordings_dir: PathBuf,
    pub images_dir: PathBuf,
    pub min_elevation_deg: f64,
    pub min_signal_strength_db: f64,
    pub skip_signal_check: bool,
    pub service_mode: String,
    pub log_level: String,
    pub web_port: u16,
    pub rtl_sdr_path: PathBuf,
    pub rtl_fm_path: PathBuf,
    pub lrpt_decoder_path: Option<PathBuf>,
    pub sstv_ground_scan_enabled: bool,
    pub sstv_scan_frequencies_hz: Vec<f64>,
    pub sstv_idle_threshold_s: i64,
}

#[derive(Debug, Clone)]
pub struct FftSlice {
    pub timestamp_ms: i64,
    pub center_freq_hz: f64,
    pub bins_db: Vec<f32>,
    pub min_db: f32,
    pub max_db: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemStatus {
    Idle,
    Waiting,
    Scanning,
    Capturing,
    Decoding,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureProgress {
    pub percent: f32,
    pub elapsed_s: f64,
    pub total_s: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DopplerInfo {
    pub current_hz: f64,
    pub min_hz: f64,
    pub max_hz: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureResult {
    pub satellite: Satellite,
    pub recording_path: Option<PathBuf>,
    pub image_paths: Vec<PathBuf>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub peak_signal_db: Option<f64>,
    pub success: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemState {
    pub status: SystemStatus,
    pub current_pass: Option<Pass>,
    pub next_pass: Option<Pass>,
    pub upcoming_passes: Vec<Pass>,
    pub capture_progress: Option<CaptureProgress>,
    pub doppler: Option<DopplerInfo>,
    pub scanning_frequency_hz: Option<f64>,
    pub sdr_connected: bool,
    pub last_update: DateTime<Utc>,
}

impl SystemState {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            status: SystemStatus::Idle,
            current_pass: None,
            next_pass: None,
            upcoming_passes: Vec::new(),
            capture_progress: None,
            doppler: None,
            scanning_frequency_hz: None,
            sdr_connected: false,
            last_update: now,
        }
    }

    /// Invariant I3: strictly AOS-sorted, never containing a past pass.
    pub fn set_upcoming_passes(&mut self, now: DateTime<Utc>, mut passes: Vec<Pass>) {
        passes.retain(|p| !p.is_past(now));
        passes.sort_by_key(|p| p.aos);
        self.next_pass = passes.first().cloned();
        self.upcoming_passes = passes;
    }
}
