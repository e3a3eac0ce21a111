//! Instantaneous-frequency demodulation (spec §4.7 step 2): build the
//! analytic signal via an FFT-domain Hilbert transform, then differentiate
//! phase between consecutive samples and scale to Hz.
//!
//! Grounded on the same `rustfft`/`num-complex` pairing `fft_stream.rs` uses
//! for the live waterfall; here the FFT runs once over the whole recording
//! rather than per-window, since the decoder works offline against a
//! completed WAV file.

use num_complex::Complex64;
use rustfft::FftPlanner;

pub fn instantaneous_frequency(samples: &[i16], sample_rate_hz: u32) -> Vec<f64> {
    let analytic = analytic_signal(samples);
    phase_to_frequency(&analytic, sample_rate_hz)
}

fn analytic_signal(samples: &[i16]) -> Vec<Complex64> {
    let n = samples.len();
    let mut buf: Vec<Complex64> = samples
        .iter()
        .map(|&s| Complex64::new(s as f64 / 32768.0, 0.0))
        .collect();

    let mut planner = FftPlanner::<f64>::new();
    let fft = planner.plan_fft_forward(n);
    fft.process(&mut buf);

    // Hilbert transform in the frequency domain: double the positive
    // frequencies, zero the negative ones, keep DC and Nyquist as-is.
    let half = n / 2;
    for (i, bin) in buf.iter_mut().enumerate() {
        if i == 0 || (n % 2 == 0 && i == half) {
            // leave unchanged
        } else if i < half || (n % 2 != 0 && i == half) {
            *bin *= 2.0;
        } else {
            *bin = Complex64::new(0.0, 0.0);
        }
    }

    let ifft = planner.plan_fft_inverse(n);
    ifft.process(&mut buf);
    let scale = 1.0 / n as f64;
    for bin in buf.iter_mut() {
        *bin *= scale;
    }
    buf
}

fn phase_to_frequency(analytic: &[Complex64], sample_rate_hz: u32) -> Vec<f64> {
    let mut freqs = Vec::with_capacity(analytic.len());
    if analytic.is_empty() {
        return freqs;
    }
    freqs.push(0.0);
    for pair in analytic.windows(2) {
        let diff = pair[1] * pair[0].conj();
        let phase_diff = diff.arg();
        let hz = (phase_diff / (2.0 * std::f64::consts::PI)) * sample_rate_hz as f64;
        freqs.push(hz.abs());
    }
    freqs
}

/// Average frequency over an inclusive-start, exclusive-end sample window,
/// clamped to the slice bounds. Used throughout VIS/line detection to
/// measure tone duration windows without re-deriving bounds checks everywhere.
pub fn window_average(freq: &[f64], start: usize, end: usize) -> f64 {
    let end = end.min(freq.len());
    if start >= end {
        return 0.0;
    }
    let slice = &freq[start..end];
    slice.iter().sum::<f64>() / slice.len() as f64
}

pub fn ms_to_samples(ms: f64, sample_rate_hz: u32) -> usize {
    ((ms / 1000.0) * sample_rate_hz as f64).round() as usize
}
