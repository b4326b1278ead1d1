// src/llm/ollama.rs
// Ollama client via the OpenAI-compatible endpoint (local, no auth)

use crate::llm::client::LlmClient;
use crate::{DevlogError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

/// Ollama API client. Consolidation wants deterministic output, so requests
/// go out at low temperature and without streaming.
pub struct OllamaClient {
    base_url: String,
    model: String,
    http: reqwest::Client,
}

impl OllamaClient {
    pub fn new(base_url: String, model: String) -> Self {
        // The config may carry the endpoint with or without a /v1 suffix or
        // trailing slash; requests append the full completion path themselves
        let trimmed = base_url.trim_end_matches('/');
        let base_url = trimmed.strip_suffix("/v1").unwrap_or(trimmed).to_string();

        let client = Self {
            base_url,
            model,
            http: reqwest::Client::new(),
        };
        if !client.is_loopback() {
            warn!(
                base_url = %client.base_url,
                "Ollama endpoint is not local; session prompts will leave this machine"
            );
        }
        client
    }

    /// Whether the configured endpoint resolves to this machine. Unparsable
    /// URLs pass: they fail loudly at request time instead of warning here.
    fn is_loopback(&self) -> bool {
        let Ok(parsed) = url::Url::parse(&self.base_url) else {
            return true;
        };
        match parsed.host() {
            None => true,
            Some(url::Host::Domain(host)) => host.eq_ignore_ascii_case("localhost"),
            Some(url::Host::Ipv4(ip)) => ip.is_loopback(),
            Some(url::Host::Ipv6(ip)) => ip.is_loopback(),
        }
    }

    pub fn from_config(config: &crate::config::GlobalConfig) -> Self {
        Self::new(config.ollama_base_url.clone(), config.ollama_model.clone())
    }

    fn extract_content(body: ChatResponse) -> Result<String> {
        body.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| DevlogError::Llm("empty completion from Ollama".into()))
    }
}

#[async_trait]
impl LlmClient for OllamaClient {
    async fn generate(&self, prompt: &str, timeout: Duration) -> Result<String> {
        let start = Instant::now();
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: 0.1,
            stream: false,
        };
        let url = format!("{}/v1/chat/completions", self.base_url);
        debug!(model = %self.model, prompt_len = prompt.len(), "Sending Ollama request");

        let send = self.http.post(&url).json(&request).send();
        let response = tokio::time::timeout(timeout, send)
            .await
            .map_err(|_| {
                DevlogError::Llm(format!(
                    "Ollama request timed out after {}s",
                    timeout.as_secs()
                ))
            })??
            .error_for_status()?;

        let body: ChatResponse = tokio::time::timeout(
            timeout.saturating_sub(start.elapsed()),
            response.json(),
        )
        .await
        .map_err(|_| {
            DevlogError::Llm(format!(
                "Ollama response read timed out after {}s",
                timeout.as_secs()
            ))
        })??;

        let content = Self::extract_content(body)?;
        info!(
            model = %self.model,
            duration_ms = start.elapsed().as_millis() as u64,
            response_len = content.len(),
            "Ollama completion finished"
        );
        Ok(content)
    }

    async fn health(&self) -> bool {
        let probe = self.http.get(&self.base_url).send();
        match tokio::time::timeout(Duration::from_secs(2), probe).await {
            Ok(Ok(response)) => response.status().is_success(),
            _ => false,
        }
    }

    fn model_name(&self) -> String {
        self.model.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base_url: &str) -> OllamaClient {
        OllamaClient::new(base_url.into(), "qwen2.5-coder:7b".into())
    }

    #[test]
    fn test_new_strips_v1_suffix_and_trailing_slashes() {
        for raw in [
            "http://localhost:11434",
            "http://localhost:11434/",
            "http://localhost:11434/v1",
            "http://localhost:11434/v1/",
        ] {
            assert_eq!(client(raw).base_url, "http://localhost:11434");
        }
    }

    #[test]
    fn test_client_keeps_model_name() {
        let client = OllamaClient::new("http://localhost:11434".into(), "mistral".into());
        assert_eq!(client.model_name(), "mistral");
    }

    #[test]
    fn test_loopback_endpoints_detected() {
        for local in [
            "http://localhost:11434",
            "http://LOCALHOST:11434",
            "http://127.0.0.1:11434",
            "http://[::1]:11434",
        ] {
            assert!(client(local).is_loopback(), "{local} should count as local");
        }
    }

    #[test]
    fn test_remote_endpoints_detected() {
        for remote in ["http://10.0.0.7:11434", "https://models.internal.example"] {
            assert!(!client(remote).is_loopback(), "{remote} should count as remote");
        }
    }

    #[test]
    fn test_extract_content_from_chat_response() {
        let body: ChatResponse = serde_json::from_str(
            r#"{"choices": [{"message": {"content": "{\"action\": \"skip\"}"}}]}"#,
        )
        .unwrap();
        assert_eq!(
            OllamaClient::extract_content(body).unwrap(),
            "{\"action\": \"skip\"}"
        );
    }

    #[test]
    fn test_extract_content_empty_is_error() {
        let body: ChatResponse =
            serde_json::from_str(r#"{"choices": [{"message": {"content": ""}}]}"#).unwrap();
        assert!(OllamaClient::extract_content(body).is_err());

        let body: ChatResponse = serde_json::from_str(r#"{"choices": []}"#).unwrap();
        assert!(OllamaClient::extract_content(body).is_err());
    }
}
