use crate::config::NarratorConfig;
use crate::errors::TriageError;
use crate::logging::append_run_log;
use crate::narrator::{build_prompt, parse_narration, prompt_fingerprint, NarratedResult, Narrator};
use crate::report::Report;
use crate::types::NarratorKind;
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::{Duration, Instant};

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

/// Narrator backed by an Ollama-compatible `/api/generate` endpoint.
#[derive(Debug, Clone)]
pub struct OllamaNarrator {
    pub endpoint: String,
    pub model: String,
    pub temperature: f64,
    pub timeout: Duration,
}

impl OllamaNarrator {
    pub fn from_config(cfg: &NarratorConfig) -> Self {
        Self {
            endpoint: cfg.endpoint.clone(),
            model: cfg.model.clone(),
            temperature: cfg.temperature,
            timeout: Duration::from_secs(cfg.timeout_seconds),
        }
    }

    fn generate_url(&self) -> String {
        format!("{}/api/generate", self.endpoint.trim_end_matches('/'))
    }

    fn generate(&self, prompt: &str) -> Result<String, TriageError> {
        let client = build_http_client(self.timeout)?;
        let url = self.generate_url();
        let payload = json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": { "temperature": self.temperature },
        });

        let response = client
            .post(&url)
            .json(&payload)
            .send()
            .map_err(|e| TriageError::Narrator(format!("request to {url} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(TriageError::Narrator(format!(
                "{url} returned {status}: {}",
                truncate(&body, 320)
            )));
        }

        let body: GenerateResponse = response
            .json()
            .map_err(|e| TriageError::Narrator(format!("invalid response from {url}: {e}")))?;
        Ok(body.response)
    }
}

impl Narrator for OllamaNarrator {
    fn kind(&self) -> NarratorKind {
        NarratorKind::Ollama
    }

    fn summarize(&self, report: &Report) -> Result<NarratedResult, TriageError> {
        let prompt = build_prompt(report)?;
        append_run_log(
            "info",
            "narrator.request.sent",
            json!({
                "url": self.generate_url(),
                "model": self.model,
                "timeout_seconds": self.timeout.as_secs(),
                "prompt_sha256": prompt_fingerprint(&prompt),
            }),
        );

        let started = Instant::now();
        let answer = match self.generate(&prompt) {
            Ok(answer) => answer,
            Err(err) => {
                append_run_log(
                    "error",
                    "narrator.request.failed",
                    json!({
                        "error": err.to_string(),
                        "elapsed_ms": started.elapsed().as_millis() as u64,
                    }),
                );
                return Err(err);
            }
        };
        append_run_log(
            "info",
            "narrator.response.received",
            json!({
                "elapsed_ms": started.elapsed().as_millis() as u64,
                "response_bytes": answer.len(),
            }),
        );
        Ok(parse_narration(&answer))
    }
}

fn build_http_client(timeout: Duration) -> Result<Client, TriageError> {
    let mut builder = Client::builder().timeout(timeout);
    let allow_system_proxy = std::env::var("LOGTRIAGE_USE_SYSTEM_PROXY")
        .map(|value| matches!(value.as_str(), "1" | "true" | "yes"))
        .unwrap_or(false);
    if !allow_system_proxy {
        builder = builder.no_proxy();
    }
    builder
        .build()
        .map_err(|e| TriageError::Narrator(format!("failed to build HTTP client: {e}")))
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push_str("...");
    out
}
