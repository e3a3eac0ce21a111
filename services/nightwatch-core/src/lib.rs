//! Core orchestration library for the Night Watch ground-station controller:
//! pass scheduling, SDR device arbitration, the capture/decode pipeline, the
//! shared state bus, and the SSTV image decoder. The binary crate
//! (`nightwatch-server`) wires these into an HTTP/WebSocket surface.

pub mod arbiter;
pub mod config;
pub mod error;
pub mod fft_stream;
pub mod model;
pub mod predictor;
pub mod recorder;
pub mod scheduler;
pub mod sstv;
pub mod sstv_scanner;
pub mod statebus;
pub mod store;

pub use arbiter::{Arbiter, Intent, Lease, ProducerHandle};
pub use error::CoreError;
pub use fft_stream::FftStream;
pub use model::{
    CaptureProgress, CaptureResult, DemodVariant, DopplerInfo, FftSlice, GeodeticPosition, Pass,
    ReceiverConfig, Satellite, SignalKind, SignalParameters, SystemState, SystemStatus,
};
pub use predictor::Predictor;
pub use scheduler::Scheduler;
pub use sstv_scanner::SstvScanner;
pub use statebus::{Event, StateBus};
pub use store::{NullStore, Store};
