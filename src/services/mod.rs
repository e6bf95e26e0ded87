//! Service layer: the blob gateway, the idempotency ledger, the image
//! transform, and the two drivers (per-event orchestration, batch drain).

pub mod batch;
pub mod gateway;
pub mod ledger;
pub mod processor;
pub mod thumbnail;
