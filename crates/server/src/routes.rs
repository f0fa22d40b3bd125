use std::time::Duration;

use axum::{
    extract::{rejection::JsonRejection, Query, State},
    Json,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use slipwise_core::Transaction;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::info;

use crate::error::{ApiError, ApiResult};
use crate::AppState;

/// Name reported by `Check` when the caller gives none.
pub const SERVICE_NAME: &str = "slipwise";

// ── Request / response bodies ────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct CheckQuery {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CheckResponse {
    pub healthy: bool,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct ExtractTextRequest {
    /// Base64-encoded image bytes.
    #[serde(default)]
    pub image_data: String,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExtractTextResponse {
    pub extracted_text: String,
}

#[derive(Debug, Deserialize)]
pub struct BuildFromTextRequest {
    #[serde(default)]
    pub text_to_analyze: String,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct BuildFromImageRequest {
    #[serde(default)]
    pub image_data: String,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

// ── Per-request cancellation ─────────────────────────────────────────────────

/// Cancellation for one request. The token fires when the optional
/// deadline passes or when the handler future is dropped (client gone).
struct RequestScope {
    cancel: CancellationToken,
    _guard: DropGuard,
}

impl RequestScope {
    fn new(timeout_ms: Option<u64>) -> Self {
        let cancel = CancellationToken::new();
        if let Some(ms) = timeout_ms {
            let deadline = cancel.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = deadline.cancelled() => {}
                    _ = tokio::time::sleep(Duration::from_millis(ms)) => deadline.cancel(),
                }
            });
        }
        Self {
            _guard: cancel.clone().drop_guard(),
            cancel,
        }
    }
}

fn decode_image(image_data: &str) -> ApiResult<Vec<u8>> {
    STANDARD
        .decode(image_data.trim())
        .map_err(|e| ApiError::BadRequest(format!("image_data is not valid base64: {e}")))
}

// ── Handlers ─────────────────────────────────────────────────────────────────

/// `GET /v1/check`
pub async fn check(Query(query): Query<CheckQuery>) -> Json<CheckResponse> {
    let name = query
        .name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .unwrap_or(SERVICE_NAME);
    info!(name, "health check");
    Json(CheckResponse {
        healthy: true,
        message: format!("OK: {name}"),
    })
}

/// `POST /v1/extract-text-from-image`
pub async fn extract_text_from_image(
    State(state): State<AppState>,
    payload: Result<Json<ExtractTextRequest>, JsonRejection>,
) -> ApiResult<Json<ExtractTextResponse>> {
    let Json(req) = payload?;
    let image = decode_image(&req.image_data)?;
    info!(image_bytes = image.len(), "extract text from image");

    let scope = RequestScope::new(req.timeout_ms);
    let extracted_text = state.pipeline.extract_text(&image, &scope.cancel).await?;
    Ok(Json(ExtractTextResponse { extracted_text }))
}

/// `POST /v1/build-transaction-from-text`
pub async fn build_transaction_from_text(
    State(state): State<AppState>,
    payload: Result<Json<BuildFromTextRequest>, JsonRejection>,
) -> ApiResult<Json<Transaction>> {
    let Json(req) = payload?;
    info!(
        chars = req.text_to_analyze.len(),
        categories = req.categories.len(),
        "build transaction from text"
    );

    let scope = RequestScope::new(req.timeout_ms);
    let tx = state
        .pipeline
        .build_from_text(&req.text_to_analyze, &req.categories, &scope.cancel)
        .await?;
    Ok(Json(tx))
}

/// `POST /v1/build-transaction-from-image`
pub async fn build_transaction_from_image(
    State(state): State<AppState>,
    payload: Result<Json<BuildFromImageRequest>, JsonRejection>,
) -> ApiResult<Json<Transaction>> {
    let Json(req) = payload?;
    let image = decode_image(&req.image_data)?;
    info!(
        image_bytes = image.len(),
        categories = req.categories.len(),
        "build transaction from image"
    );

    let scope = RequestScope::new(req.timeout_ms);
    let tx = state
        .pipeline
        .process(&image, &req.categories, &scope.cancel)
        .await?;
    Ok(Json(tx))
}
