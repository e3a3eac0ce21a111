//! Quality assessment (spec §4.7 step 9): per-channel/overall brightness,
//! non-fatal warnings, and a verdict.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Good,
    Acceptable,
    Weak,
    Junk,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostics {
    pub detected_mode: String,
    pub vis_code: u8,
    pub frequency_offset_hz: f64,
    pub channel_averages: Vec<f64>,
    pub overall_brightness: f64,
    pub verdict: Verdict,
    pub warnings: Vec<String>,
    pub lines_decoded: usize,
    pub lines_expected: usize,
}

pub fn assess(
    detected_mode: String,
    vis_code: u8,
    frequency_offset_hz: f64,
    rgb: &[[u8; 3]],
    lines_decoded: usize,
    lines_expected: usize,
) -> Diagnostics {
    let pixel_count = rgb.len().max(1);
    let mut sums = [0u64; 3];
    let mut clipped = [0u64; 3];
    for pixel in rgb {
        for c in 0..3 {
            sums[c] += pixel[c] as u64;
            if pixel[c] == 255 {
                clipped[c] += 1;
            }
        }
    }
    let channel_averages: Vec<f64> = sums.iter().map(|&s| s as f64 / pixel_count as f64).collect();
    let overall_brightness = channel_averages.iter().sum::<f64>() / 3.0;

    let mut warnings = Vec::new();
    let clip_fraction = clipped.iter().copied().max().unwrap_or(0) as f64 / pixel_count as f64;
    if clip_fraction > 0.05 {
        warnings.push("clipped".to_string());
    }
    if overall_brightness < 40.0 {
        warnings.push("dark".to_string());
    }
    if overall_brightness > 220.0 {
        warnings.push("washed".to_string());
    }
    if frequency_offset_hz.abs() > 100.0 {
        warnings.push("frequency_offset_large".to_string());
    }
    let decoded_fraction = if lines_expected == 0 {
        1.0
    } else {
        lines_decoded as f64 / lines_expected as f64
    };
    if decoded_fraction < 0.8 {
        warnings.push("short_signal".to_string());
    }

    let verdict = if decoded_fraction < 0.4 {
        Verdict::Junk
    } else if warnings.is_empty() && (60.0..=180.0).contains(&overall_brightness) {
        Verdict::Good
    } else if warnings.len() <= 1 {
        Verdict::Acceptable
    } else {
        Verdict::Weak
    };

    Diagnostics {
        detected_mode,
        vis_code,
        frequency_offset_hz,
        channel_averages,
        overall_brightness,
        verdict,
        warnings,
        lines_decoded,
        lines_expected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_mid_gray_image_is_good() {
        let rgb = vec![[120u8, 120, 120]; 320 * 240];
        let diag = assess("Robot 36".into(), 0x08, 5.0, &rgb, 240, 240);
        assert_eq!(diag.verdict, Verdict::Good);
        assert!(diag.warnings.is_empty());
    }

    #[test]
    fn dark_image_warns_and_is_not_good() {
        let rgb = vec![[5u8, 5, 5]; 320 * 240];
        let diag = assess("Robot 36".into(), 0x08, 5.0, &rgb, 240, 240);
        assert!(diag.warnings.contains(&"dark".to_string()));
        assert_ne!(diag.verdict, Verdict::Good);
    }

    #[test]
    fn mostly_undecoded_image_is_junk() {
        let rgb = vec![[120u8, 120, 120]; 320 * 240];
        let diag = assess("Robot 36".into(), 0x08, 5.0, &rgb, 50, 240);
        assert_eq!(diag.verdict, Verdict::Junk);
    }

    #[test]
    fn large_frequency_offset_warns() {
        let rgb = vec![[120u8, 120, 120]; 320 * 240];
        let diag = assess("Robot 36".into(), 0x08, 150.0, &rgb, 240, 240);
        assert!(diag.warnings.contains(&"frequency_offset_large".to_string()));
    }
}
