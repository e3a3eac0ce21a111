//! Persistent storage is an external collaborator (spec §1): an opaque
//! key-value store reachable only through `save_capture`/`save_images`.

use std::path::Path;

use async_trait::async_trait;

use crate::error::CoreError;
use crate::model::CaptureResult;

#[async_trait]
pub trait Store: Send + Sync {
    async fn save_capture(&self, result: &CaptureResult) -> Result<(), CoreError>;
    async fn save_images(&self, paths: &[&Path]) -> Result<(), CoreError>;
}

/// A `Store` that never fails and discards everything, used where the
/// reference project would run "without DB" (see the gateway's fallback to
/// `DbWriter::new_dummy()` when the real database is unreachable).
pub struct NullStore;

#[async_trait]
impl Store for NullStore {
    async fn save_capture(&self, _result: &CaptureResult) -> Result<(), CoreError> {
        Ok(())
    }

    async fn save_images(&self, _paths: &[&Path]) -> Result<(), CoreError> {
        Ok(())
    }
}
