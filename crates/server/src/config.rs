//! Process configuration.
//!
//! Read once at startup from a TOML file (`SLIPWISE_CONFIG`, default
//! `slipwise.toml`), then overridden by environment variables. A missing
//! file is not an error; every setting has a default except the
//! recognition API key.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use slipwise_ocr::recognizer::DEFAULT_RECOGNITION_URL;
use slipwise_ocr::structuring::{DEFAULT_LLM_MODEL, DEFAULT_LLM_URL};
use slipwise_ocr::{RecognitionParams, RetryPolicy, DEFAULT_MAX_CONCURRENT};

pub const DEFAULT_CONFIG_PATH: &str = "slipwise.toml";
pub const DEFAULT_BIND: &str = "0.0.0.0:50051";
pub const DEFAULT_BODY_LIMIT: usize = 20 * 1024 * 1024;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub recognition: RecognitionConfig,
    pub structuring: StructuringConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub body_limit_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            body_limit_bytes: DEFAULT_BODY_LIMIT,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecognitionConfig {
    pub base_url: String,
    /// Usually supplied through `OPENTYPHOON_API_KEY` rather than the file.
    pub api_key: String,
    pub timeout_secs: u64,
    pub backoff_ms: Vec<u64>,
    pub max_concurrent: usize,
    #[serde(flatten)]
    pub params: RecognitionParams,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_RECOGNITION_URL.to_string(),
            api_key: String::new(),
            timeout_secs: 60,
            backoff_ms: vec![2_000, 5_000, 30_000],
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            params: RecognitionParams::default(),
        }
    }
}

impl RecognitionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from_millis(&self.backoff_ms)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StructurerKind {
    #[default]
    Rules,
    Llm,
}

impl std::str::FromStr for StructurerKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rules" => Ok(StructurerKind::Rules),
            "llm" => Ok(StructurerKind::Llm),
            other => bail!("unknown structurer backend {other:?} (expected \"rules\" or \"llm\")"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StructuringConfig {
    pub backend: StructurerKind,
    pub base_url: String,
    pub model: String,
}

impl Default for StructuringConfig {
    fn default() -> Self {
        Self {
            backend: StructurerKind::Rules,
            base_url: DEFAULT_LLM_URL.to_string(),
            model: DEFAULT_LLM_MODEL.to_string(),
        }
    }
}

impl Config {
    /// File named by `SLIPWISE_CONFIG`, then process environment overrides.
    pub fn load() -> Result<Self> {
        let path = std::env::var("SLIPWISE_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
        let mut config = Self::from_file(Path::new(&path))?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(raw) => Self::from_toml(&raw)
                .with_context(|| format!("invalid config file {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e).with_context(|| format!("cannot read config file {}", path.display())),
        }
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Apply overrides from `var`; empty values are ignored.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        let var = |key: &str| var(key).filter(|v| !v.trim().is_empty());

        if let Some(bind) = var("SLIPWISE_BIND") {
            self.server.bind = bind;
        }
        if let Some(key) = var("OPENTYPHOON_API_KEY") {
            self.recognition.api_key = key;
        }
        if let Some(url) = var("SLIPWISE_RECOGNITION_URL") {
            self.recognition.base_url = url;
        }
        if let Some(backend) = var("SLIPWISE_STRUCTURER") {
            self.structuring.backend = backend.parse()?;
        }
        if let Some(url) = var("SLIPWISE_LLM_URL") {
            self.structuring.base_url = url;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.recognition.api_key.trim().is_empty() {
            bail!("recognition API key is not set (OPENTYPHOON_API_KEY)");
        }
        if self.recognition.max_concurrent == 0 {
            bail!("recognition.max_concurrent must be at least 1");
        }
        if self.server.body_limit_bytes == 0 {
            bail!("server.body_limit_bytes must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_file() {
        let c = Config::from_file(Path::new("/nonexistent/slipwise.toml")).unwrap();
        assert_eq!(c.server.bind, DEFAULT_BIND);
        assert_eq!(c.server.body_limit_bytes, DEFAULT_BODY_LIMIT);
        assert_eq!(c.recognition.base_url, DEFAULT_RECOGNITION_URL);
        assert_eq!(c.recognition.retry_policy(), RetryPolicy::default());
        assert_eq!(c.recognition.max_concurrent, 3);
        assert_eq!(c.recognition.params, RecognitionParams::default());
        assert_eq!(c.structuring.backend, StructurerKind::Rules);
    }

    #[test]
    fn parses_partial_toml() {
        let c = Config::from_toml(
            r#"
            [server]
            bind = "127.0.0.1:8080"

            [recognition]
            backoff_ms = [10, 20]
            max_concurrent = 5
            temperature = 0
            pages = [1, 2]

            [structuring]
            backend = "llm"
            model = "qwen2.5"
            "#,
        )
        .unwrap();

        assert_eq!(c.server.bind, "127.0.0.1:8080");
        assert_eq!(c.server.body_limit_bytes, DEFAULT_BODY_LIMIT);
        assert_eq!(c.recognition.retry_policy().max_attempts(), 3);
        assert_eq!(c.recognition.max_concurrent, 5);
        assert_eq!(c.recognition.params.temperature, 0.0);
        assert_eq!(c.recognition.params.pages, vec![1, 2]);
        assert_eq!(c.recognition.params.model, "typhoon-ocr");
        assert_eq!(c.structuring.backend, StructurerKind::Llm);
        assert_eq!(c.structuring.model, "qwen2.5");
        assert_eq!(c.structuring.base_url, DEFAULT_LLM_URL);
    }

    #[test]
    fn rejects_unknown_backend_in_file() {
        assert!(Config::from_toml("[structuring]\nbackend = \"magic\"").is_err());
    }

    #[test]
    fn env_overrides_file() {
        let mut c = Config::from_toml("[server]\nbind = \"127.0.0.1:1\"").unwrap();
        c.apply_env(env(&[
            ("SLIPWISE_BIND", "0.0.0.0:9000"),
            ("OPENTYPHOON_API_KEY", "secret"),
            ("SLIPWISE_RECOGNITION_URL", "http://localhost:9/ocr"),
            ("SLIPWISE_STRUCTURER", "LLM"),
            ("SLIPWISE_LLM_URL", "http://gpu:11434"),
        ]))
        .unwrap();

        assert_eq!(c.server.bind, "0.0.0.0:9000");
        assert_eq!(c.recognition.api_key, "secret");
        assert_eq!(c.recognition.base_url, "http://localhost:9/ocr");
        assert_eq!(c.structuring.backend, StructurerKind::Llm);
        assert_eq!(c.structuring.base_url, "http://gpu:11434");
        assert!(c.validate().is_ok());
    }

    #[test]
    fn empty_env_values_are_ignored() {
        let mut c = Config::default();
        c.apply_env(env(&[("SLIPWISE_BIND", "  ")])).unwrap();
        assert_eq!(c.server.bind, DEFAULT_BIND);
    }

    #[test]
    fn bad_structurer_env_is_an_error() {
        let mut c = Config::default();
        assert!(c.apply_env(env(&[("SLIPWISE_STRUCTURER", "gpt")])).is_err());
    }

    #[test]
    fn api_key_is_required() {
        let err = Config::default().validate().unwrap_err();
        assert!(err.to_string().contains("OPENTYPHOON_API_KEY"));
    }

    #[test]
    fn zero_permits_rejected() {
        let mut c = Config::default();
        c.recognition.api_key = "k".into();
        c.recognition.max_concurrent = 0;
        assert!(c.validate().is_err());
    }
}
