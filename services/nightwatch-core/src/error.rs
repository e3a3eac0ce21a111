//! Error taxonomy (spec §7). Recoverable kinds are returned as typed results;
//! only `ConfigInvalid` is meant to abort the process.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("SDR busy: lease already held")]
    DeviceBusy,

    #[error("SDR producer process exited unexpectedly")]
    ProducerDied,

    #[error("signal too weak to attempt capture")]
    SignalTooWeak,

    #[error("decoder produced no image")]
    DecodeFailed,

    #[error("subscriber outbound queue overflowed, dropping subscriber")]
    SlowConsumer,

    #[error("unrecognized SSTV VIS mode code {0:#04x}")]
    UnknownMode(u8),

    #[error("no SSTV VIS header found in recording")]
    NoVisFound,

    #[error("capture result store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("unsupported WAV file: {0}")]
    UnsupportedWav(String),

    #[error("WAV/PNG truncated or malformed: {0}")]
    Truncated(String),

    #[error("arbiter acquire timed out waiting for lease")]
    AcquireTimeout,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("wav codec error: {0}")]
    Wav(#[from] hound::Error),
}

impl CoreError {
    /// Stable machine-readable kind, as enumerated in spec §7's taxonomy table.
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::DeviceBusy => "device_busy",
            CoreError::ProducerDied => "producer_died",
            CoreError::SignalTooWeak => "signal_too_weak",
            CoreError::DecodeFailed => "decode_failed",
            CoreError::SlowConsumer => "slow_consumer",
            CoreError::UnknownMode(_) => "unknown_mode",
            CoreError::NoVisFound => "no_vis_found",
            CoreError::StoreUnavailable(_) => "store_unavailable",
            CoreError::ConfigInvalid(_) => "config_invalid",
            CoreError::UnsupportedWav(_) => "unsupported_wav",
            CoreError::Truncated(_) => "truncated",
            CoreError::AcquireTimeout => "device_busy",
            CoreError::Io(_) => "io_error",
            CoreError::Wav(_) => "io_error",
        }
    }
}

/// Helper used by recorder/decoder paths that need to report a path alongside an error.
#[derive(Debug, Error)]
#[error("{path:?}: {source}")]
pub struct PathError {
    pub path: PathBuf,
    #[source]
    pub source: CoreError,
}
