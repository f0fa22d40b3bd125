//! `RemoteRecognizer` against a local HTTP server that plays back a script
//! of status codes and bodies.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    routing::post,
    Router,
};
use serde_json::json;
use slipwise_ocr::{
    CancellationToken, FailureKind, OcrBackend, RecognitionError, RemoteRecognizer, RetryPolicy,
};

struct Script {
    /// Replies in call order; the last one repeats.
    replies: Vec<(u16, String)>,
    calls: AtomicUsize,
    last_body: Mutex<Vec<u8>>,
    last_auth: Mutex<Option<String>>,
}

impl Script {
    fn new(replies: Vec<(u16, String)>) -> Arc<Self> {
        Arc::new(Self {
            replies,
            calls: AtomicUsize::new(0),
            last_body: Mutex::new(Vec::new()),
            last_auth: Mutex::new(None),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn ok(content: &str) -> (u16, String) {
    let body = json!({
        "results": [
            { "message": { "choices": [ { "message": { "content": content } } ] } }
        ]
    });
    (200, body.to_string())
}

fn status(code: u16) -> (u16, String) {
    (code, format!("error {code}"))
}

async fn handle(
    State(script): State<Arc<Script>>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, String) {
    let i = script.calls.fetch_add(1, Ordering::SeqCst);
    *script.last_body.lock().unwrap() = body.to_vec();
    *script.last_auth.lock().unwrap() = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let (code, reply) = script.replies[i.min(script.replies.len() - 1)].clone();
    (StatusCode::from_u16(code).unwrap(), reply)
}

/// Start the scripted server and return its OCR endpoint URL.
async fn serve(script: Arc<Script>) -> String {
    let app = Router::new().route("/v1/ocr", post(handle)).with_state(script);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/v1/ocr")
}

fn recognizer(url: String, backoffs_ms: &[u64]) -> RemoteRecognizer {
    RemoteRecognizer::with_client(reqwest::Client::new(), url, "test-key")
        .with_retry_policy(RetryPolicy::from_millis(backoffs_ms))
}

#[tokio::test]
async fn rate_limited_three_times_then_succeeds() {
    let script = Script::new(vec![status(429), status(429), status(429), ok("fourth")]);
    let r = recognizer(serve(script.clone()).await, &[5, 5, 5]);
    let cancel = CancellationToken::new();

    let text = r.recognize(b"jpeg", &cancel).await.unwrap();

    assert_eq!(text, "fourth");
    assert_eq!(script.calls(), 4);
}

#[tokio::test]
async fn bad_request_fails_without_retry() {
    let script = Script::new(vec![status(400), ok("never")]);
    let r = recognizer(serve(script.clone()).await, &[5, 5, 5]);
    let cancel = CancellationToken::new();

    let err = r.recognize(b"jpeg", &cancel).await.unwrap_err();

    assert_eq!(script.calls(), 1);
    assert_eq!(err.kind(), FailureKind::Fatal);
    match err {
        RecognitionError::Rejected { status, message, .. } => {
            assert_eq!(status, 400);
            assert_eq!(message, "error 400");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn server_errors_exhaust_retries() {
    let script = Script::new(vec![status(500), status(502), status(503)]);
    let r = recognizer(serve(script.clone()).await, &[5, 5, 5]);
    let cancel = CancellationToken::new();

    let err = r.recognize(b"jpeg", &cancel).await.unwrap_err();

    assert_eq!(script.calls(), 4);
    assert!(matches!(err, RecognitionError::Rejected { status: 503, .. }));
    assert_eq!(err.kind(), FailureKind::ServerUnavailable);
}

#[tokio::test]
async fn malformed_body_is_not_retried() {
    let script = Script::new(vec![(200, "<html>oops</html>".to_string())]);
    let r = recognizer(serve(script.clone()).await, &[5, 5, 5]);
    let cancel = CancellationToken::new();

    let err = r.recognize(b"jpeg", &cancel).await.unwrap_err();

    assert_eq!(script.calls(), 1);
    assert!(matches!(err, RecognitionError::MalformedResponse(_)));
}

#[tokio::test]
async fn prefers_embedded_natural_text() {
    let content = json!({ "natural_text": "BIG C\nMilk 30.00" }).to_string();
    let script = Script::new(vec![ok(&content)]);
    let r = recognizer(serve(script).await, &[]);
    let cancel = CancellationToken::new();

    assert_eq!(r.recognize(b"jpeg", &cancel).await.unwrap(), "BIG C\nMilk 30.00");
}

#[tokio::test]
async fn empty_results_are_empty_text() {
    let script = Script::new(vec![(200, r#"{"results":[]}"#.to_string())]);
    let r = recognizer(serve(script).await, &[]);
    let cancel = CancellationToken::new();

    assert_eq!(r.recognize(b"jpeg", &cancel).await.unwrap(), "");
}

#[tokio::test]
async fn upload_carries_image_params_and_credentials() {
    let script = Script::new(vec![ok("done")]);
    let r = recognizer(serve(script.clone()).await, &[]);
    let cancel = CancellationToken::new();

    r.recognize(b"\xFF\xD8raw-image-bytes", &cancel).await.unwrap();

    let body = script.last_body.lock().unwrap().clone();
    let body = String::from_utf8_lossy(&body);
    assert!(body.contains(r#"name="file"; filename="image.jpg""#));
    assert!(body.contains("raw-image-bytes"));
    assert!(body.contains(r#"name="model""#));
    assert!(body.contains("typhoon-ocr"));
    assert!(body.contains(r#"name="repetition_penalty""#));
    assert!(!body.contains(r#"name="pages""#));
    assert_eq!(
        script.last_auth.lock().unwrap().as_deref(),
        Some("Bearer test-key")
    );
}

#[tokio::test]
async fn cancellation_during_backoff_returns_promptly() {
    let script = Script::new(vec![status(503)]);
    let r = recognizer(serve(script.clone()).await, &[60_000]);
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let err = r.recognize(b"jpeg", &cancel).await.unwrap_err();

    assert!(matches!(err, RecognitionError::Cancelled));
    assert_eq!(script.calls(), 1);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn connection_failure_is_fatal() {
    // Bind then drop to get a port with nothing listening.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let r = recognizer(format!("http://{addr}/v1/ocr"), &[5, 5, 5]);
    let cancel = CancellationToken::new();

    let err = r.recognize(b"jpeg", &cancel).await.unwrap_err();
    assert!(matches!(err, RecognitionError::Transport(_)));
    assert!(!err.is_retryable());
}
