//! Concrete `Predictor` adapter. TLE fetching and SGP4 propagation are out
//! of scope (spec §1: "treat as a library returning pass tuples") so this
//! crate never computes an orbit; it reads passes a real predictor already
//! computed from a JSON file on disk, the same arm's-length relationship
//! the reference capture service has with its own external `rtl_adsb`
//! decoder process.
//!
//! File format: a JSON array of objects shaped like [`model::Pass`], reread
//! on every call so an external scheduler (cron job, sidecar process) can
//! refresh it without restarting the server.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nightwatch_core::{CoreError, Pass, Predictor, Satellite};
use tracing::warn;

pub struct FilePredictor {
    passes_file: PathBuf,
}

impl FilePredictor {
    pub fn new(passes_file: PathBuf) -> Self {
        Self { passes_file }
    }

    fn read_passes(&self) -> Result<Vec<Pass>, CoreError> {
        if !self.passes_file.exists() {
            return Ok(Vec::new());
        }
        let raw = std::fs::read_to_string(&self.passes_file)?;
        serde_json::from_str(&raw)
            .map_err(|e| CoreError::ConfigInvalid(format!("{}: {e}", self.passes_file.display())))
    }
}

#[async_trait]
impl Predictor for FilePredictor {
    async fn upcoming_passes(&self, now: DateTime<Utc>, horizon: chrono::Duration) -> Vec<Pass> {
        let passes = match self.read_passes() {
            Ok(passes) => passes,
            Err(e) => {
                warn!(error = %e, path = %self.passes_file.display(), "predictor: failed to read passes file");
                return Vec::new();
            }
        };
        let cutoff = now + horizon;
        let mut pending: Vec<Pass> = passes
            .into_iter()
            .filter(|p| p.aos >= now && p.aos <= cutoff && p.satellite.enabled)
            .collect();
        pending.sort_by_key(|p| p.aos);
        pending
    }

    /// Doppler-corrected frequency tracking is the predictor's job and out
    /// of scope here; the adapter reports the satellite's nominal center
    /// frequency as "currently trackable", deferring any real unavailability
    /// detection (no ephemeris, satellite below horizon) to the file no
    /// longer listing the pass at all.
    fn satellite_frequency(&self, satellite: &Satellite) -> Option<f64> {
        if satellite.center_freq_hz > 0.0 {
            Some(satellite.center_freq_hz)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nightwatch_core::{DemodVariant, SignalKind, SignalParameters};
    use std::io::Write;

    fn sample_satellite() -> Satellite {
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

    #[tokio::test]
    async fn missing_file_yields_no_passes() {
        let predictor = FilePredictor::new(PathBuf::from("/nonexistent/passes.json"));
        let passes = predictor
            .upcoming_passes(Utc::now(), chrono::Duration::hours(6))
            .await;
        assert!(passes.is_empty());
    }

    #[tokio::test]
    async fn reads_and_filters_passes_within_horizon() {
        let now = Utc::now();
        let in_range = Pass {
            satellite: sample_satellite(),
            aos: now + chrono::Duration::minutes(10),
            los: now + chrono::Duration::minutes(20),
            max_elevation_deg: 40.0,
            max_elevation_at: now + chrono::Duration::minutes(15),
            duration_s: 600,
        };
        let out_of_range = Pass {
            aos: now + chrono::Duration::hours(10),
            los: now + chrono::Duration::hours(10) + chrono::Duration::minutes(10),
            ..in_range.clone()
        };

        let mut file = tempfile::NamedTempFile::new().unwrap();
        let json = serde_json::to_string(&vec![in_range.clone(), out_of_range]).unwrap();
        file.write_all(json.as_bytes()).unwrap();

        let predictor = FilePredictor::new(file.path().to_path_buf());
        let passes = predictor
            .upcoming_passes(now, chrono::Duration::hours(1))
            .await;
        assert_eq!(passes.len(), 1);
        assert_eq!(passes[0].aos, in_range.aos);
    }

    #[test]
    fn satellite_frequency_rejects_non_positive_frequency() {
        let predictor = FilePredictor::new(PathBuf::from("/nonexistent/passes.json"));
        let mut sat = sample_satellite();
        sat.center_freq_hz = 0.0;
        assert!(predictor.satellite_frequency(&sat).is_none());
    }
}
