//! Abstraction over the text-generation backend.
//!
//! The core only needs `generate(system, hint, user) -> text` with a
//! per-call deadline. The default implementation speaks the OpenAI-compatible
//! `/v1/chat/completions` wire format, which also covers local inference
//! servers (Ollama, LM Studio) via `MODEL_BASE_URL`. All wire types stay
//! private to this module.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Default per-request deadline for agent turns.
pub const GENERATE_DEADLINE: Duration = Duration::from_secs(30);

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1/chat/completions";
const DEFAULT_MODEL: &str = "gpt-4o-mini";
const MAX_OUTPUT_TOKENS: u32 = 1200;

#[async_trait]
pub trait ModelGateway: Send + Sync {
    /// Produce a completion for one agent turn. Implementations must honor
    /// `deadline`; callers treat any error as "use the fallback reply".
    async fn generate(
        &self,
        system_prompt: &str,
        workspace_hint: Option<&str>,
        user_message: &str,
        deadline: Duration,
    ) -> Result<String>;
}

pub struct OpenAiGateway {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    temperature: f32,
}

impl OpenAiGateway {
    pub fn new(base_url: String, model: String, api_key: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(GENERATE_DEADLINE)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url,
            model,
            api_key,
            temperature: 0.7,
        })
    }

    /// Build the gateway from the environment, or `None` when no backend is
    /// configured (agents then answer with canned fallbacks).
    ///
    /// - `OPENAI_API_KEY` — bearer token; optional for keyless local servers
    /// - `MODEL_BASE_URL` — full chat-completions URL override
    /// - `MODEL_NAME` — model identifier
    pub fn from_env() -> Option<Arc<dyn ModelGateway>> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty());
        let base_url = std::env::var("MODEL_BASE_URL")
            .ok()
            .filter(|u| !u.trim().is_empty());

        if api_key.is_none() && base_url.is_none() {
            return None;
        }

        let base_url = base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let model = std::env::var("MODEL_NAME")
            .ok()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        match Self::new(base_url, model, api_key) {
            Ok(gateway) => Some(Arc::new(gateway)),
            Err(e) => {
                eprintln!("[gateway] failed to initialize model client: {e:#}");
                None
            }
        }
    }

    fn build_request(
        &self,
        system_prompt: &str,
        workspace_hint: Option<&str>,
        user_message: &str,
    ) -> ChatRequest {
        let mut messages = vec![ChatMessage {
            role: "system",
            content: system_prompt.to_string(),
        }];
        if let Some(hint) = workspace_hint {
            messages.push(ChatMessage {
                role: "system",
                content: hint.to_string(),
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: user_message.to_string(),
        });

        ChatRequest {
            model: self.model.clone(),
            messages,
            temperature: self.temperature,
            max_tokens: MAX_OUTPUT_TOKENS,
        }
    }
}

#[async_trait]
impl ModelGateway for OpenAiGateway {
    async fn generate(
        &self,
        system_prompt: &str,
        workspace_hint: Option<&str>,
        user_message: &str,
        deadline: Duration,
    ) -> Result<String> {
        let payload = self.build_request(system_prompt, workspace_hint, user_message);

        let mut request = self.client.post(&self.base_url).json(&payload);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = tokio::time::timeout(deadline, request.send())
            .await
            .map_err(|_| anyhow!("model request exceeded {:?} deadline", deadline))?
            .context("model request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("model backend returned {}: {}", status, body.trim()));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .context("failed to parse model response")?;
        let text = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default();
        Ok(text.trim().to_string())
    }
}

// ── Wire types ────────────────────────────────────────────────────────

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_carries_system_hint_and_user_messages() {
        let gateway = OpenAiGateway::new(
            "http://localhost:11434/v1/chat/completions".to_string(),
            "llama3".to_string(),
            None,
        )
        .unwrap();
        let request = gateway.build_request("be helpful", Some("stay in ./"), "hello");

        assert_eq!(request.messages.len(), 3);
        assert_eq!(request.messages[0].role, "system");
        assert_eq!(request.messages[1].content, "stay in ./");
        assert_eq!(request.messages[2].role, "user");

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "llama3");
        assert_eq!(json["max_tokens"], 1200);
    }

    #[test]
    fn hint_is_omitted_when_absent() {
        let gateway = OpenAiGateway::new("u".to_string(), "m".to_string(), None).unwrap();
        let request = gateway.build_request("sys", None, "msg");
        assert_eq!(request.messages.len(), 2);
    }

    #[test]
    fn response_parsing_takes_first_choice() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":" hi there "}}]}"#;
        let parsed: ChatResponse = serde_json::from_str(body).unwrap();
        let text = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default();
        assert_eq!(text.trim(), "hi there");
    }
}
