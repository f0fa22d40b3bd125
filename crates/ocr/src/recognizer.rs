use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::types::{FailureKind, RecognitionParams, RecognitionResponse, RetryPolicy};

pub const DEFAULT_RECOGNITION_URL: &str = "https://api.opentyphoon.ai/v1/ocr";

/// Longest slice of an error body kept in error messages.
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Error)]
pub enum RecognitionError {
    #[error("Recognition service returned HTTP {status} ({kind}): {message}")]
    Rejected {
        kind: FailureKind,
        status: u16,
        message: String,
    },
    #[error("Recognition request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Malformed recognition response: {0}")]
    MalformedResponse(#[from] serde_json::Error),
    #[error("Recognition cancelled by caller")]
    Cancelled,
}

impl RecognitionError {
    pub fn rejected(status: u16, message: impl Into<String>) -> Self {
        RecognitionError::Rejected {
            kind: FailureKind::from_status(status),
            status,
            message: message.into(),
        }
    }

    /// Transport failures, malformed bodies and cancellation are all fatal.
    pub fn kind(&self) -> FailureKind {
        match self {
            RecognitionError::Rejected { kind, .. } => *kind,
            _ => FailureKind::Fatal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

/// Abstraction over an image-to-text service.
/// Implementations accept raw image bytes and return the recognized text;
/// an empty string is a valid result.
#[async_trait]
pub trait OcrBackend: Send + Sync {
    async fn recognize(
        &self,
        image_bytes: &[u8],
        cancel: &CancellationToken,
    ) -> Result<String, RecognitionError>;
}

#[async_trait]
impl<T: OcrBackend + ?Sized> OcrBackend for Box<T> {
    async fn recognize(
        &self,
        image_bytes: &[u8],
        cancel: &CancellationToken,
    ) -> Result<String, RecognitionError> {
        (**self).recognize(image_bytes, cancel).await
    }
}

// ── Mock backend (always available, used for tests) ───────────────────────────

/// Returns a pre-set string, for exercising the pipeline without a recognition service.
pub struct MockRecognizer {
    pub text: String,
}

impl MockRecognizer {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

#[async_trait]
impl OcrBackend for MockRecognizer {
    async fn recognize(
        &self,
        _image_bytes: &[u8],
        cancel: &CancellationToken,
    ) -> Result<String, RecognitionError> {
        if cancel.is_cancelled() {
            return Err(RecognitionError::Cancelled);
        }
        Ok(self.text.clone())
    }
}

// ── Remote backend ────────────────────────────────────────────────────────────

/// Multipart upload client for the remote recognition endpoint, with
/// classified retries.
pub struct RemoteRecognizer {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    params: RecognitionParams,
    retry: RetryPolicy,
}

impl RemoteRecognizer {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, RecognitionError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(20)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;
        Ok(Self::with_client(client, base_url, api_key))
    }

    pub fn with_client(
        client: reqwest::Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
            params: RecognitionParams::default(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_params(mut self, params: RecognitionParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// A fresh form per attempt; multipart bodies are consumed on send.
    fn build_form(&self, image_bytes: &[u8]) -> Result<Form, RecognitionError> {
        let file = Part::bytes(image_bytes.to_vec())
            .file_name("image.jpg")
            .mime_str("image/jpeg")?;
        let form = self
            .params
            .form_fields()
            .into_iter()
            .fold(Form::new().part("file", file), |form, (name, value)| {
                form.text(name, value)
            });
        Ok(form)
    }

    async fn attempt(&self, image_bytes: &[u8]) -> Result<String, RecognitionError> {
        let form = self.build_form(image_bytes)?;
        let response = self
            .client
            .post(&self.base_url)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        let body = response.bytes().await?;

        if !status.is_success() {
            let message = String::from_utf8_lossy(&body);
            let message: String = message.chars().take(MAX_ERROR_BODY).collect();
            return Err(RecognitionError::rejected(status.as_u16(), message));
        }

        let reply: RecognitionResponse = serde_json::from_slice(&body)?;
        Ok(reply.text())
    }
}

#[async_trait]
impl OcrBackend for RemoteRecognizer {
    async fn recognize(
        &self,
        image_bytes: &[u8],
        cancel: &CancellationToken,
    ) -> Result<String, RecognitionError> {
        let text =
            retry_classified(&self.retry, cancel, |_| self.attempt(image_bytes)).await?;
        info!(chars = text.chars().count(), "recognition succeeded");
        Ok(text)
    }
}

/// Run `attempt` until it succeeds, fails fatally, or the policy runs out.
///
/// Both the attempt itself and the backoff waits race the cancellation
/// token. On exhaustion the last classified failure is returned.
pub(crate) async fn retry_classified<F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut attempt: F,
) -> Result<String, RecognitionError>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<String, RecognitionError>>,
{
    let mut index = 0;
    loop {
        let outcome = tokio::select! {
            _ = cancel.cancelled() => return Err(RecognitionError::Cancelled),
            outcome = attempt(index) => outcome,
        };

        let err = match outcome {
            Ok(text) => {
                debug!(attempt = index + 1, "recognition attempt succeeded");
                return Ok(text);
            }
            Err(err) => err,
        };

        if !err.is_retryable() {
            warn!(attempt = index + 1, error = %err, "recognition failed, not retrying");
            return Err(err);
        }

        let Some(wait) = policy.backoff(index) else {
            warn!(
                attempts = policy.max_attempts(),
                error = %err,
                "recognition retries exhausted"
            );
            return Err(err);
        };

        warn!(
            attempt = index + 1,
            kind = %err.kind(),
            wait_ms = wait.as_millis() as u64,
            "recognition attempt failed, backing off"
        );

        tokio::select! {
            _ = cancel.cancelled() => return Err(RecognitionError::Cancelled),
            _ = tokio::time::sleep(wait) => {}
        }
        index += 1;
    }
}
