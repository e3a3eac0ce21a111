//! SstvDecoder (spec §4.7): decodes a WAV recording into a PNG image plus a
//! diagnostics record. Pure CPU consumer of a completed WAV file — no SDR,
//! no arbiter, no state bus; the scheduler and scanner both call
//! `decode_wav_to_png` once a `RecordingSession` has finished.
//!
//! Pipeline: `wav::read_wav` -> `dsp::instantaneous_frequency` ->
//! `vis::find_vis_header` -> `modes::lookup` -> `scan::scan_image` ->
//! `png::encode_rgb8`, with `quality::assess` running over the final RGB
//! buffer.

pub mod dsp;
pub mod modes;
pub mod png;
pub mod quality;
pub mod scan;
pub mod vis;
pub mod wav;

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::CoreError;
use quality::Diagnostics;

pub struct DecodeOutcome {
    pub image_path: PathBuf,
    pub diagnostics: Diagnostics,
}

/// Runs the full §4.7 pipeline against a WAV recording, writing the
/// resulting PNG into `images_dir` and returning its path plus diagnostics.
/// Every failure mode listed in §4.7 ("Failure modes") maps to a
/// `CoreError` variant; callers (scheduler, scanner) treat any `Err` as "no
/// image produced" and continue, per that section's contract.
pub fn decode_wav_to_png(wav_path: &Path, images_dir: &Path) -> Result<DecodeOutcome, CoreError> {
    let audio = wav::read_wav(wav_path)?;

    let freq = dsp::instantaneous_frequency(&audio.samples, audio.sample_rate_hz);

    let header = vis::find_vis_header(&freq, audio.sample_rate_hz).ok_or(CoreError::NoVisFound)?;

    let mode = modes::lookup(header.code).ok_or(CoreError::UnknownMode(header.code))?;

    // Frequency calibration (step 5): the two known leader tones give a
    // direct estimate of the constant offset to subtract from everything
    // that follows.
    let offset_hz = ((header.leader_1900_hz - 1900.0) + (header.leader_1200_hz - 1200.0)) / 2.0;
    let calibrated: Vec<f64> = freq.iter().map(|f| f - offset_hz).collect();

    let scanned = scan::scan_image(&calibrated, header.end_sample, audio.sample_rate_hz, mode);

    let diagnostics = quality::assess(
        mode.name.to_string(),
        header.code,
        offset_hz,
        &scanned.rgb,
        scanned.lines_decoded,
        mode.height,
    );

    if diagnostics.verdict == quality::Verdict::Junk {
        warn!(mode = mode.name, lines_decoded = scanned.lines_decoded, "sstv decode produced junk-quality image");
    }

    let png_bytes = png::encode_rgb8(scanned.width, scanned.height, &scanned.rgb);

    let stem = wav_path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "capture".to_string());
    let image_path = images_dir.join(format!("{stem}.png"));
    std::fs::write(&image_path, &png_bytes)?;

    info!(
        path = %image_path.display(),
        mode = mode.name,
        verdict = ?diagnostics.verdict,
        "sstv decode complete"
    );

    Ok(DecodeOutcome {
        image_path,
        diagnostics,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_test_wav(path: &Path, samples: &[i16], sample_rate_hz: u32) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: sample_rate_hz,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for &s in samples {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn missing_vis_header_reports_no_vis_found() {
        let dir = tempfile::tempdir().unwrap();
        let wav_path = dir.path().join("noise.wav");
        let samples: Vec<i16> = (0..48_000).map(|i| ((i % 17) as i16) * 500).collect();
        write_test_wav(&wav_path, &samples, 48_000);

        let result = decode_wav_to_png(&wav_path, dir.path());
        assert!(matches!(result, Err(CoreError::NoVisFound)));
    }

    #[test]
    fn non_mono_wav_is_rejected_before_vis_search() {
        let dir = tempfile::tempdir().unwrap();
        let wav_path = dir.path().join("stereo.wav");
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 48_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&wav_path, spec).unwrap();
        for _ in 0..100 {
            writer.write_sample(0i16).unwrap();
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();

        let result = decode_wav_to_png(&wav_path, dir.path());
        assert!(matches!(result, Err(CoreError::UnsupportedWav(_))));
        let _ = Write::flush(&mut std::io::sink());
    }
}
