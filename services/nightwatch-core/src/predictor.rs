//! The TLE/SGP4 predictor is an external collaborator (spec §1): this crate
//! only depends on its contract, never its implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::model::{Pass, Satellite};

#[async_trait]
pub trait Predictor: Send + Sync {
    /// Passes starting from `now` up to `now + horizon`, AOS-sorted.
    async fn upcoming_passes(&self, now: DateTime<Utc>, horizon: chrono::Duration) -> Vec<Pass>;

    /// The Doppler-corrected downlink frequency currently expected for
    /// `satellite`, if the predictor can compute one right now. Returning
    /// `None` is what drives `capture_pass`'s `signal_too_weak` short-circuit
    /// when `skip_signal_check` is unset (spec §4.6 step 2).
    fn satellite_frequency(&self, satellite: &Satellite) -> Option<f64>;
}
