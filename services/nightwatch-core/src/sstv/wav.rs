//! WAV parsing for the decoder input (spec §4.7 step 1). Rejects anything
//! that isn't mono 16-bit PCM at a sane sample rate up front, the same way
//! `config.rs` front-loads validation so later stages can assume well-formed
//! input.

use std::path::Path;

use crate::error::CoreError;

pub struct PcmAudio {
    pub samples: Vec<i16>,
    pub sample_rate_hz: u32,
}

pub fn read_wav(path: &Path) -> Result<PcmAudio, CoreError> {
    let reader = hound::WavReader::open(path)?;
    let spec = reader.spec();

    if spec.channels != 1 {
        return Err(CoreError::UnsupportedWav(format!(
            "expected mono, found {} channels",
            spec.channels
        )));
    }
    if spec.bits_per_sample != 16 || spec.sample_format != hound::SampleFormat::Int {
        return Err(CoreError::UnsupportedWav(
            "expected 16-bit signed PCM".to_string(),
        ));
    }
    if spec.sample_rate < 11_000 {
        return Err(CoreError::UnsupportedWav(format!(
            "sample rate {} Hz below the 11 kHz floor",
            spec.sample_rate
        )));
    }

    let samples: Vec<i16> = reader.into_samples::<i16>().collect::<Result<_, _>>()?;
    if samples.is_empty() {
        return Err(CoreError::Truncated("WAV contains no samples".to_string()));
    }

    Ok(PcmAudio {
        samples,
        sample_rate_hz: spec.sample_rate,
    })
}
