//! Defines routes for the thumbnail service.
//!
//! ## Structure
//! - `POST /`                — storage notification entry point (one image
//!   per event, idempotent per object version)
//! - `POST /upload/{bucket}` — multipart form-upload variant, writes under
//!   the `resized` layout
//! - `GET  /healthz`         — liveness
//! - `GET  /readyz`          — readiness (storage-root disk check)
//!
//! The router carries shared state (`AppState`) to all handlers.

use crate::handlers::{
    AppState,
    event_handlers::{notify, upload_form},
    health_handlers::{healthz, readyz},
};
use axum::{
    Router,
    routing::{get, post},
};

/// Build and return the router for the whole HTTP surface.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // processing endpoints
        .route("/", post(notify))
        .route("/upload/{bucket}", post(upload_form))
}
