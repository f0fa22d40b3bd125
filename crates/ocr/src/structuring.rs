use async_trait::async_trait;
use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use slipwise_core::{Transaction, TransactionItem};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::extract::HeuristicExtractor;

#[derive(Debug, Error)]
pub enum StructuringError {
    #[error("Structuring service unavailable: {0}")]
    Unavailable(String),
    #[error("Structuring service returned an unusable reply: {0}")]
    Malformed(String),
    #[error("Structuring cancelled by caller")]
    Cancelled,
}

impl From<reqwest::Error> for StructuringError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            StructuringError::Malformed(e.to_string())
        } else {
            StructuringError::Unavailable(e.to_string())
        }
    }
}

/// Turns normalized receipt text into a [`Transaction`].
///
/// The pipeline only depends on this capability, so the rule-based
/// extractor and a language-model service can be swapped at wiring time.
#[async_trait]
pub trait TextToTransaction: Send + Sync {
    async fn to_transaction(
        &self,
        text: &str,
        categories: &[String],
        cancel: &CancellationToken,
    ) -> Result<Transaction, StructuringError>;
}

#[async_trait]
impl TextToTransaction for HeuristicExtractor {
    async fn to_transaction(
        &self,
        text: &str,
        categories: &[String],
        _cancel: &CancellationToken,
    ) -> Result<Transaction, StructuringError> {
        Ok(self.extract(text, categories))
    }
}

// ── Language-model backed structurer ─────────────────────────────────────────

pub const DEFAULT_LLM_URL: &str = "http://127.0.0.1:11434";
pub const DEFAULT_LLM_MODEL: &str = "receipt-structurer";

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: String,
    stream: bool,
    format: &'static str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

/// What the model is asked to produce. Dates stay strings so that an
/// unparseable date degrades to today's date instead of failing the reply.
#[derive(Debug, Deserialize)]
struct ModelTransaction {
    #[serde(default)]
    title: String,
    #[serde(default)]
    date: String,
    #[serde(default)]
    items: Vec<TransactionItem>,
}

/// Client for an Ollama-compatible `/api/generate` endpoint, used in
/// non-streaming JSON mode.
pub struct LlmStructurer {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl LlmStructurer {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
        }
    }

    async fn generate(&self, prompt: String) -> Result<String, StructuringError> {
        let request = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            format: "json",
        };
        let url = format!("{}/api/generate", self.base_url);

        let response = self.client.post(&url).json(&request).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(StructuringError::Unavailable(format!("HTTP {status}: {body}")));
        }

        let reply: GenerateResponse = response.json().await?;
        Ok(reply.response)
    }
}

#[async_trait]
impl TextToTransaction for LlmStructurer {
    async fn to_transaction(
        &self,
        text: &str,
        categories: &[String],
        cancel: &CancellationToken,
    ) -> Result<Transaction, StructuringError> {
        let prompt = build_prompt(text, categories);
        debug!(model = %self.model, prompt_chars = prompt.len(), "requesting structured transaction");

        let raw = tokio::select! {
            _ = cancel.cancelled() => return Err(StructuringError::Cancelled),
            raw = self.generate(prompt) => raw?,
        };

        parse_model_reply(&raw, Local::now().date_naive()).inspect_err(|e| {
            warn!(error = %e, "structuring reply rejected");
        })
    }
}

pub fn build_prompt(text: &str, categories: &[String]) -> String {
    format!("Categories Available: {categories:?}\nOCR Text:\n{text}")
}

/// Decode the model's text into a transaction whose invariants hold.
fn parse_model_reply(raw: &str, today: NaiveDate) -> Result<Transaction, StructuringError> {
    let json = outermost_object(raw)
        .ok_or_else(|| StructuringError::Malformed(format!("no JSON object in reply: {raw:.120}")))?;
    let model: ModelTransaction =
        serde_json::from_str(json).map_err(|e| StructuringError::Malformed(e.to_string()))?;

    let date = NaiveDate::parse_from_str(model.date.trim(), "%Y-%m-%d").unwrap_or(today);
    Ok(Transaction {
        title: model.title,
        date,
        items: model.items,
    }
    .conform())
}

/// Slice from the first `{` to the last `}`; models sometimes wrap JSON in
/// prose or markdown fences.
fn outermost_object(s: &str) -> Option<&str> {
    let start = s.find('{')?;
    let end = s.rfind('}')?;
    (end > start).then(|| &s[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use slipwise_core::{Money, TITLE_PLACEHOLDER, UNCATEGORIZED};

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 30).unwrap()
    }

    #[test]
    fn prompt_lists_categories_then_text() {
        let p = build_prompt("Latte 65.00", &["Food".to_string(), "Transport".to_string()]);
        assert_eq!(p, "Categories Available: [\"Food\", \"Transport\"]\nOCR Text:\nLatte 65.00");
    }

    #[test]
    fn parses_fenced_reply() {
        let raw = "```json\n{\"title\":\"Cafe Amazon\",\"date\":\"2024-03-01\",\
                   \"items\":[{\"title\":\"Latte\",\"price\":65,\"category\":\"Food\"}]}\n```";
        let tx = parse_model_reply(raw, today()).unwrap();
        assert_eq!(tx.title, "Cafe Amazon");
        assert_eq!(tx.date, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
        assert_eq!(tx.items[0].price, Money::from_cents(6500));
        assert_eq!(tx.items[0].quantity, 1);
    }

    #[test]
    fn reply_is_conformed() {
        let raw = r#"{"date":"01/03/2024","items":[{"title":"","price":-5,"category":""}]}"#;
        let tx = parse_model_reply(raw, today()).unwrap();
        assert_eq!(tx.title, TITLE_PLACEHOLDER);
        assert_eq!(tx.date, today());
        assert!(tx.items[0].price.is_zero());
        assert_eq!(tx.items[0].category, UNCATEGORIZED);
    }

    #[test]
    fn missing_item_fields_take_defaults() {
        let raw = r#"{"title":"7-Eleven","items":[{"title":"Water"}]}"#;
        let tx = parse_model_reply(raw, today()).unwrap();
        assert_eq!(tx.date, today());
        assert!(tx.items[0].price.is_zero());
        assert_eq!(tx.items[0].quantity, 1);
        assert_eq!(tx.items[0].category, UNCATEGORIZED);
    }

    #[test]
    fn non_json_reply_is_malformed() {
        assert!(matches!(
            parse_model_reply("I cannot help with that", today()),
            Err(StructuringError::Malformed(_))
        ));
        assert!(matches!(
            parse_model_reply("{ not json }", today()),
            Err(StructuringError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn heuristic_extractor_implements_capability() {
        let extractor = HeuristicExtractor::with_today(today());
        let cancel = CancellationToken::new();
        let tx = extractor
            .to_transaction("Shop\nTea 20.00", &[], &cancel)
            .await
            .unwrap();
        assert_eq!(tx.title, "Shop");
        assert_eq!(tx.items.len(), 1);
    }
}
