//! VIS-code-to-mode-parameter table (spec §4.7 step 4). Each entry names a
//! line layout family (`Layout`) with the sync/porch/channel durations a
//! real SSTV mode publishes, generalized just enough that `scan.rs` can
//! drive all three families with one pass.

#[derive(Debug, Clone, Copy)]
pub enum Layout {
    /// Robot-family: Y every line; chroma either full (72) or time-shared
    /// between R-Y and B-Y on alternating lines (36).
    RobotYuv {
        sync_ms: f64,
        porch_ms: f64,
        y_ms: f64,
        chroma_ms: f64,
        sep_ms: f64,
        full_chroma_each_line: bool,
    },
    /// Martin/Scottie-family: three full-width channels per line in GBR
    /// order, each preceded by a short separator/porch pulse.
    GbrThreeChannel {
        sync_ms: f64,
        porch_ms: f64,
        channel_ms: f64,
        sep_ms: f64,
    },
    /// PD-family: one sync+porch per *pair* of output lines, scanning
    /// Y1, Cr, Cb, Y2 (4:2:0 luma/chroma subsampling across the pair).
    Pd420 {
        sync_ms: f64,
        porch_ms: f64,
        channel_ms: f64,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct ModeSpec {
    pub code: u8,
    pub name: &'static str,
    pub width: usize,
    pub height: usize,
    pub layout: Layout,
}

pub const MODES: &[ModeSpec] = &[
    ModeSpec {
        code: 0x08,
        name: "Robot 36",
        width: 320,
        height: 240,
        layout: Layout::RobotYuv {
            sync_ms: 9.0,
            porch_ms: 3.0,
            y_ms: 88.0,
            chroma_ms: 44.0,
            sep_ms: 4.5,
            full_chroma_each_line: false,
        },
    },
    ModeSpec {
        code: 0x0C,
        name: "Robot 72",
        width: 320,
        height: 240,
        layout: Layout::RobotYuv {
            sync_ms: 9.0,
            porch_ms: 3.0,
            y_ms: 138.0,
            chroma_ms: 69.0,
            sep_ms: 4.5,
            full_chroma_each_line: true,
        },
    },
    ModeSpec {
        code: 0x2C,
        name: "Martin M1",
        width: 320,
        height: 256,
        layout: Layout::GbrThreeChannel {
            sync_ms: 4.862,
            porch_ms: 0.572,
            channel_ms: 146.432,
            sep_ms: 0.572,
        },
    },
    ModeSpec {
        code: 0x28,
        name: "Martin M2",
        width: 320,
        height: 256,
        layout: Layout::GbrThreeChannel {
            sync_ms: 4.862,
            porch_ms: 0.572,
            channel_ms: 73.216,
            sep_ms: 0.572,
        },
    },
    ModeSpec {
        code: 0x3C,
        name: "Scottie S1",
        width: 320,
        height: 256,
        layout: Layout::GbrThreeChannel {
            sync_ms: 9.0,
            porch_ms: 1.5,
            channel_ms: 138.240,
            sep_ms: 1.5,
        },
    },
    ModeSpec {
        code: 0x38,
        name: "Scottie S2",
        width: 320,
        height: 256,
        layout: Layout::GbrThreeChannel {
            sync_ms: 9.0,
            porch_ms: 1.5,
            channel_ms: 88.064,
            sep_ms: 1.5,
        },
    },
    ModeSpec {
        code: 0x63,
        name: "PD-90",
        width: 320,
        height: 240,
        layout: Layout::Pd420 {
            sync_ms: 20.0,
            porch_ms: 2.08,
            channel_ms: 170.240,
        },
    },
    ModeSpec {
        code: 0x5F,
        name: "PD-120",
        width: 640,
        height: 496,
        layout: Layout::Pd420 {
            sync_ms: 20.0,
            porch_ms: 2.08,
            channel_ms: 121.600,
        },
    },
    ModeSpec {
        code: 0x62,
        name: "PD-160",
        width: 512,
        height: 400,
        layout: Layout::Pd420 {
            sync_ms: 20.0,
            porch_ms: 2.08,
            channel_ms: 195.584,
        },
    },
    ModeSpec {
        code: 0x60,
        name: "PD-180",
        width: 640,
        height: 496,
        layout: Layout::Pd420 {
            sync_ms: 20.0,
            porch_ms: 2.08,
            channel_ms: 183.040,
        },
    },
    ModeSpec {
        code: 0x61,
        name: "PD-240",
        width: 640,
        height: 496,
        layout: Layout::Pd420 {
            sync_ms: 20.0,
            porch_ms: 2.08,
            channel_ms: 244.480,
        },
    },
    ModeSpec {
        code: 0x5E,
        name: "PD-290",
        width: 800,
        height: 616,
        layout: Layout::Pd420 {
            sync_ms: 20.0,
            porch_ms: 2.08,
            channel_ms: 228.800,
        },
    },
];

pub fn lookup(code: u8) -> Option<&'static ModeSpec> {
    MODES.iter().find(|m| m.code == code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_finds_robot36() {
        let mode = lookup(0x08).expect("robot 36 present");
        assert_eq!(mode.name, "Robot 36");
        assert_eq!((mode.width, mode.height), (320, 240));
    }

    #[test]
    fn unknown_code_returns_none() {
        assert!(lookup(0x7F).is_none());
    }

    #[test]
    fn all_listed_modes_present() {
        let names: Vec<&str> = MODES.iter().map(|m| m.name).collect();
        for expected in [
            "Robot 36", "Robot 72", "Martin M1", "Martin M2", "Scottie S1", "Scottie S2",
            "PD-90", "PD-120", "PD-160", "PD-180", "PD-240", "PD-290",
        ] {
            assert!(names.contains(&expected), "missing mode {expected}");
        }
    }
}
