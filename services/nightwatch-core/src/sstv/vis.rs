//! VIS (Vertical Interval Signaling) leader detection (spec §4.7 step 3).
//!
//! SSTV begins: 1900 Hz for 300 ms, 1200 Hz break for 10 ms, 1900 Hz for
//! 300 ms, a 1200 Hz start bit, 8 bits at 30 ms each (7 data bits LSB-first
//! plus an even parity bit), then a 1200 Hz stop bit. Logical 1 = 1300 Hz,
//! logical 0 = 1100 Hz; the 1100/1300 midpoint (1200 Hz) is a safe bit
//! threshold even before frequency calibration has run.

use super::dsp::window_average;

const TONE_1900_MS: f64 = 300.0;
const TONE_BREAK_MS: f64 = 10.0;
const START_BIT_MS: f64 = 30.0;
const DATA_BIT_MS: f64 = 30.0;
const STOP_BIT_MS: f64 = 30.0;
const SEARCH_WINDOW_S: f64 = 10.0;
const SEARCH_STEP_MS: f64 = 10.0;
const TONE_TOLERANCE_HZ: f64 = 120.0;

pub struct VisHeader {
    /// Sample index immediately after the stop bit.
    pub end_sample: usize,
    /// 7-bit VIS mode code.
    pub code: u8,
    /// Average of the two leader-tone measurements, used by calibration.
    pub leader_1900_hz: f64,
    pub leader_1200_hz: f64,
}

fn ms_samples(ms: f64, sample_rate_hz: u32) -> usize {
    super::dsp::ms_to_samples(ms, sample_rate_hz)
}

fn close_to(avg: f64, target: f64) -> bool {
    (avg - target).abs() <= TONE_TOLERANCE_HZ
}

/// Attempts to decode a VIS header starting at exactly `start`. Returns
/// `None` if any segment doesn't match the expected tone.
fn try_decode_at(freq: &[f64], start: usize, sample_rate_hz: u32) -> Option<VisHeader> {
    let mut cursor = start;

    let lead1 = ms_samples(TONE_1900_MS, sample_rate_hz);
    let avg_lead1 = window_average(freq, cursor, cursor + lead1);
    if !close_to(avg_lead1, 1900.0) {
        return None;
    }
    cursor += lead1;

    let brk = ms_samples(TONE_BREAK_MS, sample_rate_hz);
    let avg_brk = window_average(freq, cursor, cursor + brk);
    if !close_to(avg_brk, 1200.0) {
        return None;
    }
    cursor += brk;

    let lead2 = ms_samples(TONE_1900_MS, sample_rate_hz);
    let avg_lead2 = window_average(freq, cursor, cursor + lead2);
    if !close_to(avg_lead2, 1900.0) {
        return None;
    }
    cursor += lead2;

    let start_bit = ms_samples(START_BIT_MS, sample_rate_hz);
    let avg_start = window_average(freq, cursor, cursor + start_bit);
    if !close_to(avg_start, 1200.0) {
        return None;
    }
    cursor += start_bit;

    let bit_len = ms_samples(DATA_BIT_MS, sample_rate_hz);
    let mut code: u8 = 0;
    let mut parity_sum = 0u32;
    for bit_index in 0..8 {
        let avg = window_average(freq, cursor, cursor + bit_len);
        let bit = if avg > 1200.0 { 1u8 } else { 0u8 };
        cursor += bit_len;
        if bit_index < 7 {
            code |= bit << bit_index;
            parity_sum += bit as u32;
        } else if (parity_sum + bit as u32) % 2 != 0 {
            // Even-parity mismatch: tolerated (§4.7 failure modes are about
            // absence of a header, not a corrupted single bit), but callers
            // may want to surface this via a warning in the future.
        }
    }

    let stop_bit = ms_samples(STOP_BIT_MS, sample_rate_hz);
    let avg_stop = window_average(freq, cursor, cursor + stop_bit);
    if !close_to(avg_stop, 1200.0) {
        return None;
    }
    cursor += stop_bit;

    Some(VisHeader {
        end_sample: cursor,
        code,
        leader_1900_hz: (avg_lead1 + avg_lead2) / 2.0,
        leader_1200_hz: (avg_brk + avg_start) / 2.0,
    })
}

/// Searches the first ~10 s of `freq` for a VIS leader, stepping in 10 ms
/// increments (spec §4.7 step 3). Returns the first match.
pub fn find_vis_header(freq: &[f64], sample_rate_hz: u32) -> Option<VisHeader> {
    let step = ms_samples(SEARCH_STEP_MS, sample_rate_hz).max(1);
    let search_limit = ms_samples(SEARCH_WINDOW_S * 1000.0, sample_rate_hz).min(freq.len());

    let mut cursor = 0;
    while cursor < search_limit {
        if let Some(header) = try_decode_at(freq, cursor, sample_rate_hz) {
            return Some(header);
        }
        cursor += step;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Synthesizes a noise-free VIS header's instantaneous-frequency trace
    /// for a given mode code, the inverse of `try_decode_at`.
    fn synth_vis(code: u8, sample_rate_hz: u32) -> Vec<f64> {
        let mut freq = Vec::new();
        let mut push_tone = |hz: f64, ms: f64| {
            let n = ms_samples(ms, sample_rate_hz);
            freq.extend(std::iter::repeat(hz).take(n));
        };
        push_tone(1900.0, TONE_1900_MS);
        push_tone(1200.0, TONE_BREAK_MS);
        push_tone(1900.0, TONE_1900_MS);
        push_tone(1200.0, START_BIT_MS);
        let mut parity = 0u32;
        for bit_index in 0..7 {
            let bit = (code >> bit_index) & 1;
            parity += bit as u32;
            push_tone(if bit == 1 { 1300.0 } else { 1100.0 }, DATA_BIT_MS);
        }
        let parity_bit = parity % 2;
        push_tone(if parity_bit == 1 { 1300.0 } else { 1100.0 }, DATA_BIT_MS);
        push_tone(1200.0, STOP_BIT_MS);
        freq
    }

    #[test]
    fn decodes_robot36_vis_code() {
        let sample_rate_hz = 48_000;
        let freq = synth_vis(0x08, sample_rate_hz);
        let header = find_vis_header(&freq, sample_rate_hz).expect("header found");
        assert_eq!(header.code, 0x08);
        assert_eq!(header.end_sample, freq.len());
    }

    #[test]
    fn returns_none_for_pure_noise() {
        let sample_rate_hz = 48_000;
        let freq: Vec<f64> = (0..sample_rate_hz as usize * 2)
            .map(|i| 1500.0 + (i % 7) as f64 * 3.0)
            .collect();
        assert!(find_vis_header(&freq, sample_rate_hz).is_none());
    }

    #[test]
    fn finds_header_after_leading_silence() {
        let sample_rate_hz = 48_000;
        let mut freq = vec![0.0; ms_samples(500.0, sample_rate_hz)];
        freq.extend(synth_vis(0x3C, sample_rate_hz));
        let header = find_vis_header(&freq, sample_rate_hz).expect("header found");
        assert_eq!(header.code, 0x3C);
    }
}
