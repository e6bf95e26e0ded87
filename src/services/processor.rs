//! Single-notification orchestration.
//!
//! `handle` runs the full pipeline for one inbound notification: decode the
//! payload, claim the (bucket, object, generation) key, download, render the
//! thumbnail on the blocking pool, upload, and settle the ledger. Every
//! failure after a successful claim is recorded into the ledger with a
//! tagged reason before it surfaces to the caller, so the key never stays
//! `Processing` once this call returns. The claimed-path pipeline runs on a
//! detached task: dropping the request future (a client disconnect) does
//! not stop in-flight work and cannot strand the claim.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::models::event::{MissingFields, ObjectRef, decode_event};
use crate::models::record::{DestinationLayout, IdempotencyKey, IdempotencyRecord, basename, timestamp_folder};
use crate::services::gateway::{ObjectStore, StoreError};
use crate::services::ledger::{ClaimOutcome, IdempotencyLedger};
use crate::services::thumbnail::{Thumbnail, ThumbnailError, ThumbnailSpec, render_thumbnail};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// This call did the work.
    Processed {
        key: IdempotencyKey,
        uploaded_to: String,
        uploaded_at: DateTime<Utc>,
    },
    /// A previous notification already completed this key; answered from the
    /// cached record with no store traffic.
    AlreadyProcessed {
        key: IdempotencyKey,
        uploaded_to: String,
        uploaded_at: DateTime<Utc>,
    },
    /// Another in-flight call holds the claim.
    InProgress { key: IdempotencyKey },
    /// The key failed earlier and stays failed until a new generation.
    PreviouslyFailed { key: IdempotencyKey, error: String },
}

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error(transparent)]
    MissingFields(#[from] MissingFields),
    #[error("failed to download object: {0}")]
    Download(StoreError),
    #[error("source is not a valid image: {0}")]
    InvalidImage(String),
    #[error("failed to create thumbnail: {0}")]
    Thumbnail(String),
    #[error("failed to upload thumbnail: {0}")]
    Upload(StoreError),
}

#[derive(Clone)]
pub struct EventProcessor {
    store: Arc<dyn ObjectStore>,
    ledger: Arc<IdempotencyLedger>,
    spec: ThumbnailSpec,
    layout: DestinationLayout,
}

impl EventProcessor {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        ledger: Arc<IdempotencyLedger>,
        spec: ThumbnailSpec,
        layout: DestinationLayout,
    ) -> Self {
        Self {
            store,
            ledger,
            spec,
            layout,
        }
    }

    pub fn ledger(&self) -> &IdempotencyLedger {
        &self.ledger
    }

    /// Process one decoded notification data record.
    pub async fn handle(&self, data: &Value) -> Result<ProcessOutcome, ProcessError> {
        // Decode failures never reach the ledger; no key can be computed.
        let object_ref = decode_event(data)?;
        let key = object_ref.idempotency_key();

        match self.ledger.claim_or_inspect(&key) {
            ClaimOutcome::Claimed => {}
            ClaimOutcome::Existing(IdempotencyRecord::Completed {
                destination,
                completed_at,
            }) => {
                info!(%key, destination, "duplicate notification answered from ledger");
                return Ok(ProcessOutcome::AlreadyProcessed {
                    key,
                    uploaded_to: destination,
                    uploaded_at: completed_at,
                });
            }
            ClaimOutcome::Existing(IdempotencyRecord::Processing) => {
                return Ok(ProcessOutcome::InProgress { key });
            }
            ClaimOutcome::Existing(IdempotencyRecord::Failed { error }) => {
                return Ok(ProcessOutcome::PreviouslyFailed { key, error });
            }
        }

        // Claim held from here on: every exit must settle the record. The
        // pipeline runs on a detached task and the handler merely awaits
        // it, so a dropped request future (client disconnect) cannot leave
        // the key stuck Processing.
        let worker = self.clone();
        let task = tokio::spawn(worker.process_claimed(object_ref, key.clone()));
        match task.await {
            Ok(result) => result,
            Err(err) => {
                // The pipeline task panicked; settle the claim so the key
                // is not wedged for the life of the process.
                let reason = format!("processing task failed: {err}");
                self.ledger.fail(&key, &format!("thumbnail_error: {reason}"));
                warn!(%key, error = %err, "processing task failed");
                Err(ProcessError::Thumbnail(reason))
            }
        }
    }

    /// Claimed-key pipeline: download, render, upload, settle the ledger.
    /// Takes `self` by value so the future owns everything it needs and can
    /// outlive the request that started it.
    async fn process_claimed(
        self,
        object_ref: ObjectRef,
        key: IdempotencyKey,
    ) -> Result<ProcessOutcome, ProcessError> {
        let bytes = match self.store.download(&object_ref.bucket, &object_ref.object).await {
            Ok(bytes) => bytes,
            Err(err) => {
                self.ledger.fail(&key, &format!("download_error: {err}"));
                warn!(%key, error = %err, "download failed");
                return Err(ProcessError::Download(err));
            }
        };

        let destination = match self
            .render_and_upload(&object_ref.bucket, &object_ref.object, bytes, self.layout)
            .await
        {
            Ok(destination) => destination,
            Err(err) => {
                self.ledger.fail(&key, &failure_tag(&err));
                warn!(%key, error = %err, "processing failed");
                return Err(err);
            }
        };

        let uploaded_at = Utc::now();
        self.ledger.complete(&key, &destination, uploaded_at);
        info!(%key, destination, "thumbnail uploaded");
        Ok(ProcessOutcome::Processed {
            key,
            uploaded_to: destination,
            uploaded_at,
        })
    }

    /// Render a thumbnail for `object` and upload it under `layout`,
    /// returning the `<bucket>/<folder>/<basename>` destination path. The
    /// timestamp folder is computed fresh here, once per call.
    ///
    /// Shared by the notification path and the direct form-upload route,
    /// which has no generation and therefore no ledger interaction.
    pub async fn render_and_upload(
        &self,
        bucket: &str,
        object: &str,
        bytes: Bytes,
        layout: DestinationLayout,
    ) -> Result<String, ProcessError> {
        let thumb = self.render_blocking(object.to_string(), bytes).await?;

        let folder = timestamp_folder(Utc::now());
        let dest_object = layout.object_name(&folder, basename(object));
        let content_type = thumb.content_type();
        self.store
            .upload(bucket, &dest_object, Bytes::from(thumb.bytes), content_type)
            .await
            .map_err(ProcessError::Upload)?;
        Ok(format!("{bucket}/{dest_object}"))
    }

    /// Decode/resize/encode are CPU-bound and blocking; run them off the
    /// async runtime (the request keeps waiting on the result).
    async fn render_blocking(
        &self,
        object: String,
        bytes: Bytes,
    ) -> Result<Thumbnail, ProcessError> {
        let spec = self.spec.clone();
        let rendered = tokio::task::spawn_blocking(move || render_thumbnail(&bytes, &object, &spec))
            .await
            .map_err(|err| ProcessError::Thumbnail(format!("render task failed: {err}")))?;
        rendered.map_err(|err| match err {
            ThumbnailError::InvalidImage(source) => ProcessError::InvalidImage(source.to_string()),
            ThumbnailError::EncodeFailed(source) => ProcessError::Thumbnail(source.to_string()),
        })
    }
}

/// Machine-readable reason tag recorded into a `Failed` ledger record.
fn failure_tag(err: &ProcessError) -> String {
    match err {
        ProcessError::Download(source) => format!("download_error: {source}"),
        ProcessError::InvalidImage(detail) => format!("invalid_image: {detail}"),
        ProcessError::Thumbnail(detail) => format!("thumbnail_error: {detail}"),
        ProcessError::Upload(source) => format!("upload_error: {source}"),
        ProcessError::MissingFields(fields) => fields.to_string(),
    }
}
