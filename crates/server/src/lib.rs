//! HTTP/JSON front end for the receipt pipeline.
//!
//! One route per RPC operation: `Check`, `ExtractTextFromImage`,
//! `BuildTransactionFromText` and `BuildTransactionFromImage`.

use std::sync::Arc;

use anyhow::Result;
use axum::{
    body::Body,
    extract::DefaultBodyLimit,
    http::Request,
    routing::{get, post},
    Router,
};
use slipwise_ocr::structuring::LlmStructurer;
use slipwise_ocr::{HeuristicExtractor, OcrBackend, ReceiptPipeline, RemoteRecognizer, TextToTransaction};
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing::info;
use uuid::Uuid;

pub mod config;
pub mod error;
pub mod routes;
pub mod telemetry;

use config::{Config, StructurerKind};

pub type Pipeline = ReceiptPipeline<Box<dyn OcrBackend>>;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
}

impl AppState {
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
        }
    }

    /// Wire the recognizer and the configured structurer.
    pub fn from_config(config: &Config) -> Result<Self> {
        let rec = &config.recognition;
        let recognizer = RemoteRecognizer::new(&rec.base_url, &rec.api_key, rec.timeout())?
            .with_params(rec.params.clone())
            .with_retry_policy(rec.retry_policy());

        let structurer: Arc<dyn TextToTransaction> = match config.structuring.backend {
            StructurerKind::Rules => Arc::new(HeuristicExtractor::new()),
            StructurerKind::Llm => {
                let client = reqwest::Client::builder().timeout(rec.timeout()).build()?;
                Arc::new(LlmStructurer::new(
                    client,
                    &config.structuring.base_url,
                    &config.structuring.model,
                ))
            }
        };

        info!(
            recognition_url = %rec.base_url,
            structurer = ?config.structuring.backend,
            max_concurrent = rec.max_concurrent,
            attempts = rec.retry_policy().max_attempts(),
            "pipeline configured"
        );

        let pipeline = ReceiptPipeline::new(Box::new(recognizer) as Box<dyn OcrBackend>, structurer)
            .with_max_concurrent(rec.max_concurrent);
        Ok(Self::new(pipeline))
    }
}

/// Build application router
pub fn build_router(state: AppState, body_limit: usize) -> Router {
    Router::new()
        .route("/v1/check", get(routes::check))
        .route(
            "/v1/extract-text-from-image",
            post(routes::extract_text_from_image),
        )
        .route(
            "/v1/build-transaction-from-text",
            post(routes::build_transaction_from_text),
        )
        .route(
            "/v1/build-transaction-from-image",
            post(routes::build_transaction_from_image),
        )
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(
            TraceLayer::new_for_http().make_span_with(|req: &Request<Body>| {
                tracing::info_span!(
                    "request",
                    id = %Uuid::new_v4(),
                    method = %req.method(),
                    path = %req.uri().path(),
                )
            }),
        )
        .with_state(state)
}
