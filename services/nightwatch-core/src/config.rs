//! Configuration loading (spec §3 ReceiverConfig, SPEC_FULL §D).
//!
//! Follows the reference capture service's `Config::from_env` style but
//! returns `CoreError::ConfigInvalid` instead of silently defaulting or
//! panicking on a malformed value — §7 requires `config_invalid` to be the
//! only fatal error kind, which means validation has to happen up front.

use std::path::PathBuf;

use crate::error::CoreError;
use crate::model::{GeodeticPosition, ReceiverConfig};

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> Result<T, CoreError> {
    match env_var(name) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| CoreError::ConfigInvalid(format!("{name}={raw} is not valid"))),
    }
}

fn parse_bool(name: &str, default: bool) -> Result<bool, CoreError> {
    match env_var(name) {
        None => Ok(default),
        Some(raw) => match raw.to_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            _ => Err(CoreError::ConfigInvalid(format!(
                "{name}={raw} is not a valid bool"
            ))),
        },
    }
}

fn parse_range(name: &str, default: f64, min: f64, max: f64) -> Result<f64, CoreError> {
    let v: f64 = parse_env(name, default)?;
    if !v.is_finite() || v < min || v > max {
        return Err(CoreError::ConfigInvalid(format!(
            "{name}={v} out of range [{min}, {max}]"
        )));
    }
    Ok(v)
}

impl ReceiverConfig {
    pub fn from_env() -> Result<Self, CoreError> {
        let station = GeodeticPosition {
            lat_deg: parse_env("STATION_LAT", 0.0)?,
            lon_deg: parse_env("STATION_LON", 0.0)?,
            alt_m: parse_env("STATION_ALT_M", 0.0)?,
        };

        let sdr_gain_db = parse_range("SDR_GAIN", 30.0, 0.0, 49.0)? as f32;
        let sdr_ppm: i32 = parse_env("SDR_PPM", 0)?;
        let sdr_sample_rate_hz: u32 = parse_env("SDR_SAMPLE_RATE", 1_024_000)?;
        if sdr_sample_rate_hz == 0 {
            return Err(CoreError::ConfigInvalid(
                "SDR_SAMPLE_RATE must be > 0".into(),
            ));
        }

        let recordings_dir: PathBuf = env_var("RECORDINGS_DIR")
            .ok_or_else(|| CoreError::ConfigInvalid("RECORDINGS_DIR is required".into()))?
            .into();
        let images_dir: PathBuf = env_var("IMAGES_DIR")
            .ok_or_else(|| CoreError::ConfigInvalid("IMAGES_DIR is required".into()))?
            .into();

        let min_elevation_deg = parse_range("MIN_ELEVATION_DEG", 20.0, 0.0, 90.0)?;
        let min_signal_strength_db: f64 = parse_env("MIN_SIGNAL_STRENGTH_DB", -35.0)?;
        let skip_signal_check = parse_bool("SKIP_SIGNAL_CHECK", false)?;
        let service_mode = env_var("SERVICE_MODE").unwrap_or_else(|| "unattended".to_string());
        let log_level = env_var("LOG_LEVEL").unwrap_or_else(|| "info".to_string());
        if !["trace", "debug", "info", "warn", "error"].contains(&log_level.as_str()) {
            return Err(CoreError::ConfigInvalid(format!(
                "LOG_LEVEL={log_level} is not a recognized level"
            )));
        }

        let web_port: u16 = parse_env("WEB_PORT", 8080)?;

        let rtl_sdr_path: PathBuf = env_var("RTL_SDR_PATH")
            .unwrap_or_else(|| "rtl_sdr".to_string())
            .into();
        let rtl_fm_path: PathBuf = env_var("RTL_FM_PATH")
            .unwrap_or_else(|| "rtl_fm".to_string())
            .into();
        let lrpt_decoder_path = env_var("LRPT_DECODER_PATH").map(PathBuf::from);

        let sstv_ground_scan_enabled = parse_bool("SSTV_GROUND_SCAN_ENABLED", true)?;
        let sstv_scan_frequencies_hz = match env_var("SSTV_SCAN_FREQUENCIES_HZ") {
            None => vec![145_800_000.0],
            Some(raw) => {
                let mut freqs = Vec::new();
                for part in raw.split(',') {
                    let hz: f64 = part.trim().parse().map_err(|_| {
                        CoreError::ConfigInvalid(format!(
                            "SSTV_SCAN_FREQUENCIES_HZ contains invalid entry '{part}'"
                        ))
                    })?;
                    if hz <= 0.0 {
                        return Err(CoreError::ConfigInvalid(
                            "SSTV_SCAN_FREQUENCIES_HZ entries must be > 0".into(),
                        ));
                    }
                    freqs.push(hz);
                }
                freqs
            }
        };
        let sstv_idle_threshold_s: i64 = parse_env("SSTV_IDLE_THRESHOLD_S", 120)?;
        if sstv_idle_threshold_s <= 0 {
            return Err(CoreError::ConfigInvalid(
                "SSTV_IDLE_THRESHOLD_S must be > 0".into(),
            ));
        }

        Ok(ReceiverConfig {
            station,
            sdr_gain_db,
            sdr_ppm,
            sdr_sample_rate_hz,
            recordings_dir,
            images_dir,
            min_elevation_deg,
            min_signal_strength_db,
            skip_signal_check,
            service_mode,
            log_level,
            web_port,
            rtl_sdr_path,
            rtl_fm_path,
            lrpt_decoder_path,
            sstv_ground_scan_enabled,
            sstv_scan_frequencies_hz,
            sstv_idle_threshold_s,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn with_env<F: FnOnce()>(vars: &[(&str, &str)], f: F) {
        let _guard = ENV_LOCK.lock().unwrap();
        for (k, v) in vars {
            std::env::set_var(k, v);
        }
        f();
        for (k, _) in vars {
            std::env::remove_var(k);
        }
    }

    #[test]
    fn rejects_gain_out_of_range() {
        with_env(
            &[
                ("RECORDINGS_DIR", "/tmp/rec"),
                ("IMAGES_DIR", "/tmp/img"),
                ("SDR_GAIN", "90"),
            ],
            || {
                let result = ReceiverConfig::from_env();
                assert!(matches!(result, Err(CoreError::ConfigInvalid(_))));
            },
        );
    }

    #[test]
    fn accepts_minimal_valid_config() {
        with_env(
            &[("RECORDINGS_DIR", "/tmp/rec"), ("IMAGES_DIR", "/tmp/img")],
            || {
                let cfg = ReceiverConfig::from_env().expect("valid config");
                assert_eq!(cfg.web_port, 8080);
                assert!(!cfg.skip_signal_check);
            },
        );
    }

    #[test]
    fn requires_recordings_dir() {
        with_env(&[("IMAGES_DIR", "/tmp/img")], || {
            std::env::remove_var("RECORDINGS_DIR");
            let result = ReceiverConfig::from_env();
            assert!(matches!(result, Err(CoreError::ConfigInvalid(_))));
        });
    }
}
