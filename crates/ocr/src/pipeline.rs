use std::sync::Arc;
use std::time::Instant;

use slipwise_core::Transaction;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::normalize::normalize;
use crate::recognizer::{OcrBackend, RecognitionError};
use crate::structuring::{StructuringError, TextToTransaction};

/// Concurrent recognition calls allowed per process unless configured otherwise.
pub const DEFAULT_MAX_CONCURRENT: usize = 3;

/// Stable caller-facing label for a pipeline failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    CallerInputError,
    UpstreamUnavailable,
    MalformedUpstreamResponse,
    Cancelled,
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorClass::CallerInputError => write!(f, "caller_input_error"),
            ErrorClass::UpstreamUnavailable => write!(f, "upstream_unavailable"),
            ErrorClass::MalformedUpstreamResponse => write!(f, "malformed_upstream_response"),
            ErrorClass::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid input: {0}")]
    CallerInput(&'static str),
    #[error(transparent)]
    Recognition(#[from] RecognitionError),
    #[error(transparent)]
    Structuring(#[from] StructuringError),
    #[error("Cancelled while waiting for a recognition slot")]
    Cancelled,
}

impl PipelineError {
    pub fn class(&self) -> ErrorClass {
        match self {
            PipelineError::CallerInput(_) => ErrorClass::CallerInputError,
            PipelineError::Cancelled
            | PipelineError::Recognition(RecognitionError::Cancelled)
            | PipelineError::Structuring(StructuringError::Cancelled) => ErrorClass::Cancelled,
            PipelineError::Recognition(RecognitionError::MalformedResponse(_))
            | PipelineError::Structuring(StructuringError::Malformed(_)) => {
                ErrorClass::MalformedUpstreamResponse
            }
            PipelineError::Recognition(_) | PipelineError::Structuring(_) => {
                ErrorClass::UpstreamUnavailable
            }
        }
    }
}

/// Orchestrates: permit → recognize → normalize → structure.
///
/// Recognition calls are gated by a counting semaphore shared by every
/// request through this pipeline; everything else is request-local.
pub struct ReceiptPipeline<R: OcrBackend> {
    recognizer: R,
    structurer: Arc<dyn TextToTransaction>,
    permits: Arc<Semaphore>,
}

impl<R: OcrBackend> ReceiptPipeline<R> {
    pub fn new(recognizer: R, structurer: Arc<dyn TextToTransaction>) -> Self {
        Self {
            recognizer,
            structurer,
            permits: Arc::new(Semaphore::new(DEFAULT_MAX_CONCURRENT)),
        }
    }

    pub fn with_max_concurrent(mut self, permits: usize) -> Self {
        self.permits = Arc::new(Semaphore::new(permits.max(1)));
        self
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Raw recognized text for an image.
    pub async fn extract_text(
        &self,
        image: &[u8],
        cancel: &CancellationToken,
    ) -> Result<String, PipelineError> {
        if image.is_empty() {
            return Err(PipelineError::CallerInput("image_data is empty"));
        }
        self.recognize(image, cancel).await
    }

    /// Structure caller-supplied text; recognition is skipped entirely.
    pub async fn build_from_text(
        &self,
        text: &str,
        categories: &[String],
        cancel: &CancellationToken,
    ) -> Result<Transaction, PipelineError> {
        if text.trim().is_empty() {
            return Err(PipelineError::CallerInput("text_to_analyze is empty"));
        }
        self.structure(text, categories, cancel).await
    }

    /// Full image → transaction run. Empty recognized text is not an error;
    /// it yields the structurer's defaults.
    pub async fn process(
        &self,
        image: &[u8],
        categories: &[String],
        cancel: &CancellationToken,
    ) -> Result<Transaction, PipelineError> {
        if image.is_empty() {
            return Err(PipelineError::CallerInput("image_data is empty"));
        }
        let text = self.recognize(image, cancel).await?;
        self.structure(&text, categories, cancel).await
    }

    async fn recognize(
        &self,
        image: &[u8],
        cancel: &CancellationToken,
    ) -> Result<String, PipelineError> {
        // Dropped on every exit path, which returns the slot to the pool.
        let _permit = tokio::select! {
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
            // The pool is never closed, so acquire only fails on shutdown.
            permit = self.permits.acquire() => permit.map_err(|_| PipelineError::Cancelled)?,
        };

        let started = Instant::now();
        match self.recognizer.recognize(image, cancel).await {
            Ok(text) => {
                info!(
                    image_bytes = image.len(),
                    chars = text.chars().count(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "image recognized"
                );
                Ok(text)
            }
            Err(e) => {
                warn!(
                    error = %e,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "recognition failed"
                );
                Err(e.into())
            }
        }
    }

    async fn structure(
        &self,
        text: &str,
        categories: &[String],
        cancel: &CancellationToken,
    ) -> Result<Transaction, PipelineError> {
        let normalized = normalize(text);
        debug!(
            raw_chars = text.len(),
            normalized_chars = normalized.len(),
            "text normalized"
        );
        let tx = self
            .structurer
            .to_transaction(&normalized, categories, cancel)
            .await?;
        debug!(items = tx.items.len(), date = %tx.date, "transaction built");
        Ok(tx)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
