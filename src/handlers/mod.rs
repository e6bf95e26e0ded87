//! HTTP handlers and the shared state they run over.

pub mod event_handlers;
pub mod health_handlers;

use std::path::PathBuf;
use std::sync::Arc;

use crate::services::processor::EventProcessor;

/// State shared by every handler: the processing pipeline (which owns the
/// store and the ledger) plus the storage root for readiness probes.
#[derive(Clone)]
pub struct AppState {
    pub processor: Arc<EventProcessor>,
    pub storage_root: PathBuf,
}
