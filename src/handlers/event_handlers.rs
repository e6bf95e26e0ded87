//! HTTP handlers for thumbnail processing.
//!
//! `POST /` takes a storage notification (CloudEvent envelope or bare data
//! record) and runs the idempotent pipeline. `POST /upload/{bucket}` is the
//! form-upload variant: the image arrives in the request itself, goes
//! through the same transform, and lands under the `resized` layout — no
//! generation, so no ledger involvement.

use axum::{
    Json,
    body::Bytes,
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};

use crate::{
    errors::AppError,
    handlers::AppState,
    models::event::envelope_data,
    models::record::DestinationLayout,
    services::processor::{ProcessError, ProcessOutcome},
};

/// `POST /` — process one storage notification.
pub async fn notify(State(state): State<AppState>, body: Bytes) -> Response {
    let payload: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(err) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "error": "invalid cloudevent",
                    "details": err.to_string(),
                })),
            )
                .into_response();
        }
    };

    match state.processor.handle(envelope_data(&payload)).await {
        Ok(outcome) => outcome_response(outcome),
        Err(err) => error_response(err),
    }
}

fn outcome_response(outcome: ProcessOutcome) -> Response {
    match outcome {
        ProcessOutcome::Processed {
            key,
            uploaded_to,
            uploaded_at,
        } => (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "idempotency_key": key.to_string(),
                "uploaded_to": uploaded_to,
                "uploaded_at": uploaded_at.to_rfc3339(),
            })),
        )
            .into_response(),
        ProcessOutcome::AlreadyProcessed {
            key,
            uploaded_to,
            uploaded_at,
        } => (
            StatusCode::OK,
            Json(json!({
                "status": "already_processed",
                "idempotency_key": key.to_string(),
                "uploaded_to": uploaded_to,
                "uploaded_at": uploaded_at.to_rfc3339(),
            })),
        )
            .into_response(),
        ProcessOutcome::InProgress { key } => (
            StatusCode::CONFLICT,
            Json(json!({
                "status": "processing",
                "idempotency_key": key.to_string(),
                "message": "this object version is being processed, retry later",
            })),
        )
            .into_response(),
        ProcessOutcome::PreviouslyFailed { key, error } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "error": "failed",
                "idempotency_key": key.to_string(),
                "details": error,
            })),
        )
            .into_response(),
    }
}

fn error_response(err: ProcessError) -> Response {
    let (status, body) = match err {
        ProcessError::MissingFields(missing) => (
            StatusCode::BAD_REQUEST,
            json!({
                "error": "missing required CloudEvent fields",
                "required": missing.missing,
            }),
        ),
        ProcessError::InvalidImage(details) => (
            StatusCode::BAD_REQUEST,
            json!({"error": "source is not a valid image", "details": details}),
        ),
        ProcessError::Download(source) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({"error": "failed to download object", "details": source.to_string()}),
        ),
        ProcessError::Thumbnail(details) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({"error": "failed to create thumbnail", "details": details}),
        ),
        ProcessError::Upload(source) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({"error": "failed to upload thumbnail", "details": source.to_string()}),
        ),
    };
    (status, Json(body)).into_response()
}

/// `POST /upload/{bucket}` — thumbnail a file sent as multipart form data.
pub async fn upload_form(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::bad_request(format!("invalid multipart body: {err}")))?
    {
        let Some(file_name) = field.file_name().map(str::to_string) else {
            continue;
        };
        let data = field
            .bytes()
            .await
            .map_err(|err| AppError::bad_request(format!("could not read upload: {err}")))?;

        let uploaded_to = state
            .processor
            .render_and_upload(&bucket, &file_name, data, DestinationLayout::Resized)
            .await
            .map_err(|err| match err {
                ProcessError::InvalidImage(details) => {
                    AppError::bad_request(format!("source is not a valid image: {details}"))
                }
                other => AppError::internal(other.to_string()),
            })?;

        return Ok((
            StatusCode::OK,
            Json(json!({"status": "ok", "uploaded_to": uploaded_to})),
        )
            .into_response());
    }

    Err(AppError::bad_request("no file field in multipart body"))
}
