//! Core data types for the thumbnail service.
//!
//! These are the values that cross module boundaries: the decoded
//! notification triple, the idempotency key/record pair, and destination
//! naming. They serialize naturally as JSON via `serde` where they reach
//! the wire.

pub mod event;
pub mod record;
