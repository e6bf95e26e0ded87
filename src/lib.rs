//! Thumbnail service: turns notifications about newly-stored images into
//! bounded 100x100 thumbnails uploaded next to the source, at most once per
//! object version. Ships two binaries over this library: `thumbnailer`
//! (event-triggered HTTP mode) and `thumb-batch` (cooperative batch mode).

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
