use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Scalar form fields sent alongside the image on every recognition upload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RecognitionParams {
    pub model: String,
    pub task_type: String,
    pub max_tokens: u32,
    pub temperature: f64,
    pub top_p: f64,
    pub repetition_penalty: f64,
    /// Page subset for multi-page documents; omitted from the form when empty.
    pub pages: Vec<u32>,
}

impl Default for RecognitionParams {
    fn default() -> Self {
        Self {
            model: "typhoon-ocr".to_string(),
            task_type: "default".to_string(),
            max_tokens: 16000,
            temperature: 0.1,
            top_p: 0.6,
            repetition_penalty: 1.2,
            pages: Vec::new(),
        }
    }
}

impl RecognitionParams {
    /// Form fields in the order they are written to the multipart body.
    pub fn form_fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            ("model", self.model.clone()),
            ("task_type", self.task_type.clone()),
            ("max_tokens", self.max_tokens.to_string()),
            ("temperature", self.temperature.to_string()),
            ("top_p", self.top_p.to_string()),
            ("repetition_penalty", self.repetition_penalty.to_string()),
        ];
        if !self.pages.is_empty() {
            let pages = self
                .pages
                .iter()
                .map(u32::to_string)
                .collect::<Vec<_>>()
                .join(",");
            fields.push(("pages", format!("[{pages}]")));
        }
        fields
    }
}

/// Ordered backoff waits between recognition attempts.
/// `backoffs.len() + 1` is the maximum number of attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    backoffs: Vec<Duration>,
}

impl RetryPolicy {
    pub fn new(backoffs: Vec<Duration>) -> Self {
        Self { backoffs }
    }

    pub fn from_millis(millis: &[u64]) -> Self {
        Self::new(millis.iter().copied().map(Duration::from_millis).collect())
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self::new(Vec::new())
    }

    pub fn max_attempts(&self) -> usize {
        self.backoffs.len() + 1
    }

    /// Wait before the attempt following `attempt`, or `None` when retries are exhausted.
    pub fn backoff(&self, attempt: usize) -> Option<Duration> {
        self.backoffs.get(attempt).copied()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(vec![
            Duration::from_secs(2),
            Duration::from_secs(5),
            Duration::from_secs(30),
        ])
    }
}

/// Classification of a failed recognition attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    RateLimited,
    ServerUnavailable,
    Fatal,
}

impl FailureKind {
    pub fn from_status(status: u16) -> Self {
        match status {
            429 => FailureKind::RateLimited,
            500..=599 => FailureKind::ServerUnavailable,
            _ => FailureKind::Fatal,
        }
    }

    pub fn is_retryable(self) -> bool {
        !matches!(self, FailureKind::Fatal)
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::RateLimited => write!(f, "rate_limited"),
            FailureKind::ServerUnavailable => write!(f, "server_unavailable"),
            FailureKind::Fatal => write!(f, "fatal"),
        }
    }
}

// ── Wire view of the recognition reply ────────────────────────────────────────
//
// Only the path `results[0].message.choices[0].message.content` is modelled;
// every other field of the reply is ignored.

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecognitionResponse {
    #[serde(default)]
    pub results: Vec<RecognitionResult>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecognitionResult {
    #[serde(default)]
    pub message: Option<RecognitionMessage>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecognitionMessage {
    #[serde(default)]
    pub choices: Vec<RecognitionChoice>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecognitionChoice {
    #[serde(default)]
    pub message: ChoiceMessage,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChoiceMessage {
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Deserialize)]
struct EmbeddedText {
    natural_text: Option<String>,
}

impl RecognitionResponse {
    /// Text of the first choice of the first result.
    ///
    /// Content that is itself a JSON object with a non-empty `natural_text`
    /// field yields that field; anything else is returned verbatim. A reply
    /// with no results or empty content yields an empty string.
    pub fn text(&self) -> String {
        let content = self
            .results
            .first()
            .and_then(|r| r.message.as_ref())
            .and_then(|m| m.choices.first())
            .and_then(|c| c.message.content.as_deref())
            .unwrap_or("");

        if content.is_empty() {
            return String::new();
        }

        match serde_json::from_str::<EmbeddedText>(content) {
            Ok(EmbeddedText { natural_text: Some(t) }) if !t.is_empty() => t,
            _ => content.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(content: &str) -> RecognitionResponse {
        let body = serde_json::json!({
            "total_pages": 1,
            "results": [{
                "filename": "image.jpg",
                "success": true,
                "message": {
                    "id": "x",
                    "choices": [{ "index": 0, "message": { "role": "assistant", "content": content } }],
                    "usage": { "total_tokens": 12 }
                }
            }]
        });
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn text_prefers_embedded_natural_text() {
        let r = reply(r#"{"natural_text": "BIG C\nTotal 120.00"}"#);
        assert_eq!(r.text(), "BIG C\nTotal 120.00");
    }

    #[test]
    fn text_returns_plain_content_verbatim() {
        let r = reply("7-ELEVEN\nMilk 25.00");
        assert_eq!(r.text(), "7-ELEVEN\nMilk 25.00");
    }

    #[test]
    fn text_keeps_json_without_natural_text() {
        let r = reply(r#"{"other": 1}"#);
        assert_eq!(r.text(), r#"{"other": 1}"#);
    }

    #[test]
    fn empty_results_yield_empty_text() {
        let r: RecognitionResponse = serde_json::from_str(r#"{"results": []}"#).unwrap();
        assert_eq!(r.text(), "");
        let r: RecognitionResponse =
            serde_json::from_str(r#"{"results": [{"message": null}]}"#).unwrap();
        assert_eq!(r.text(), "");
    }

    #[test]
    fn failure_kind_from_status() {
        assert_eq!(FailureKind::from_status(429), FailureKind::RateLimited);
        assert_eq!(FailureKind::from_status(503), FailureKind::ServerUnavailable);
        assert_eq!(FailureKind::from_status(500), FailureKind::ServerUnavailable);
        assert_eq!(FailureKind::from_status(400), FailureKind::Fatal);
        assert_eq!(FailureKind::from_status(404), FailureKind::Fatal);
        assert!(!FailureKind::Fatal.is_retryable());
        assert!(FailureKind::RateLimited.is_retryable());
    }

    #[test]
    fn retry_policy_attempt_count() {
        let p = RetryPolicy::default();
        assert_eq!(p.max_attempts(), 4);
        assert_eq!(p.backoff(0), Some(Duration::from_secs(2)));
        assert_eq!(p.backoff(3), None);
        assert_eq!(RetryPolicy::none().max_attempts(), 1);
    }

    #[test]
    fn pages_field_only_when_present() {
        let mut params = RecognitionParams::default();
        assert!(params.form_fields().iter().all(|(k, _)| *k != "pages"));
        params.pages = vec![1, 3];
        let pages = params.form_fields().into_iter().find(|(k, _)| *k == "pages");
        assert_eq!(pages.unwrap().1, "[1,3]");
    }
}
