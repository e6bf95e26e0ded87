use anyhow::{Context, Result};
use clap::Parser;
use std::env;
use thiserror::Error;

use crate::models::record::DestinationLayout;

/// Configuration for the event-mode HTTP server.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub layout: DestinationLayout,
}

/// Command-line + environment configuration for the server binary.
#[derive(Parser, Debug)]
#[command(author, version, about = "Thumbnail service — event-triggered HTTP mode")]
pub struct ServeArgs {
    /// Host to bind to (overrides THUMBNAILER_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides THUMBNAILER_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Root directory of the local object store (overrides THUMBNAILER_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Destination layout for notification-driven thumbnails: `root` or
    /// `resized` (overrides THUMBNAILER_DEST_LAYOUT)
    #[arg(long)]
    pub dest_layout: Option<String>,
}

impl AppConfig {
    /// Parse environment variables + CLI args into an AppConfig.
    pub fn from_env_and_args() -> Result<Self> {
        let args = ServeArgs::parse();

        // --- Environment fallback ---
        let env_host = env::var("THUMBNAILER_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = match env::var("THUMBNAILER_PORT") {
            Ok(value) => value
                .parse::<u16>()
                .with_context(|| format!("parsing THUMBNAILER_PORT value `{}`", value))?,
            Err(env::VarError::NotPresent) => 8080,
            Err(err) => return Err(err).context("reading THUMBNAILER_PORT"),
        };
        let env_storage =
            env::var("THUMBNAILER_STORAGE_DIR").unwrap_or_else(|_| "./data/objects".into());
        let env_layout = env::var("THUMBNAILER_DEST_LAYOUT").unwrap_or_else(|_| "root".into());

        // --- Merge ---
        let layout = args
            .dest_layout
            .unwrap_or(env_layout)
            .parse::<DestinationLayout>()
            .map_err(anyhow::Error::msg)
            .context("parsing destination layout")?;

        Ok(Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            layout,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Configuration failures that must terminate a batch worker with exit
/// code 2 before any item is attempted.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("INPUT_FOLDER is required and must be an fs:// store path")]
    MissingInput,
    #[error("`{0}` is not a store path; expected fs://bucket[/prefix]")]
    NotAStorePath(String),
    #[error("unsupported store scheme `{0}`; only fs:// is available")]
    UnsupportedScheme(String),
    #[error("task count must be >= 1, got {0}")]
    BadTaskCount(i64),
    #[error("task index {index} out of range for task count {count}")]
    TaskIndexOutOfRange { index: i64, count: i64 },
}

/// Configuration for the batch worker binary.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub bucket: String,
    pub prefix: String,
    pub task_index: usize,
    pub task_count: usize,
    pub storage_dir: String,
    pub layout: DestinationLayout,
}

/// Command-line + environment configuration for the batch binary.
#[derive(Parser, Debug)]
#[command(author, version, about = "Thumbnail service — cooperative batch mode")]
pub struct BatchArgs {
    /// Store path to drain, fs://bucket[/prefix] (overrides INPUT_FOLDER)
    #[arg(long)]
    pub input: Option<String>,

    /// 0-based index of this worker (overrides TASK_INDEX)
    #[arg(long)]
    pub task_index: Option<i64>,

    /// Total number of workers (overrides TASK_COUNT)
    #[arg(long)]
    pub task_count: Option<i64>,

    /// Root directory of the local object store (overrides THUMBNAILER_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Destination layout: `root` or `resized` (overrides THUMBNAILER_DEST_LAYOUT)
    #[arg(long)]
    pub dest_layout: Option<String>,
}

impl BatchConfig {
    pub fn from_env_and_args() -> Result<Self, ConfigError> {
        let args = BatchArgs::parse();
        Self::resolve(args)
    }

    /// Validation split from `Parser::parse` so tests can drive it directly.
    pub fn resolve(args: BatchArgs) -> Result<Self, ConfigError> {
        let input = args
            .input
            .or_else(|| env::var("INPUT_FOLDER").ok())
            .ok_or(ConfigError::MissingInput)?;
        let (bucket, prefix) = parse_store_path(&input)?;

        let task_index = args
            .task_index
            .or_else(|| env_i64("TASK_INDEX"))
            .unwrap_or(0);
        let task_count = args
            .task_count
            .or_else(|| env_i64("TASK_COUNT"))
            .unwrap_or(1);
        if task_count <= 0 {
            return Err(ConfigError::BadTaskCount(task_count));
        }
        if task_index < 0 || task_index >= task_count {
            return Err(ConfigError::TaskIndexOutOfRange {
                index: task_index,
                count: task_count,
            });
        }

        let storage_dir = args
            .storage_dir
            .or_else(|| env::var("THUMBNAILER_STORAGE_DIR").ok())
            .unwrap_or_else(|| "./data/objects".into());
        let layout = args
            .dest_layout
            .or_else(|| env::var("THUMBNAILER_DEST_LAYOUT").ok())
            .unwrap_or_else(|| "root".into())
            .parse::<DestinationLayout>()
            .unwrap_or(DestinationLayout::Root);

        Ok(Self {
            bucket,
            prefix,
            task_index: task_index as usize,
            task_count: task_count as usize,
            storage_dir,
            layout,
        })
    }
}

fn env_i64(name: &str) -> Option<i64> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}

/// Split `fs://bucket[/prefix]` into (bucket, prefix). The prefix comes back
/// without leading or trailing slashes and may be empty.
pub fn parse_store_path(path: &str) -> Result<(String, String), ConfigError> {
    let (scheme, rest) = path
        .split_once("://")
        .ok_or_else(|| ConfigError::NotAStorePath(path.to_string()))?;
    if scheme != "fs" {
        return Err(ConfigError::UnsupportedScheme(scheme.to_string()));
    }

    let (bucket, prefix) = match rest.split_once('/') {
        Some((bucket, prefix)) => (bucket, prefix.trim_end_matches('/')),
        None => (rest, ""),
    };
    if bucket.is_empty() {
        return Err(ConfigError::NotAStorePath(path.to_string()));
    }
    Ok((bucket.to_string(), prefix.to_string()))
}
