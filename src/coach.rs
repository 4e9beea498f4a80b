//! Prompt coach: critique and rewrite of a user-authored prompt.
//!
//! Runs through the same model gateway as the agents, with a tighter
//! deadline. Offline (no gateway) it degrades to echoing the prompt back
//! with a canned analysis line.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::errors::CoreError;
use crate::gateway::ModelGateway;

const COACH_DEADLINE: Duration = Duration::from_secs(15);

const COACH_SYSTEM_PROMPT: &str = "You are Clippy, a friendly but direct prompt coach.\n\
You must respond strictly with a compact JSON object matching:\n\
{\"analysis\":\"one sentence critique\",\"improved_prompt\":\"rewritten prompt\"}\n\
Keep the improved prompt actionable and under 120 words.";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoachResult {
    pub analysis: String,
    pub improved_prompt: String,
}

pub async fn improve_prompt(
    gateway: Option<&Arc<dyn ModelGateway>>,
    prompt: &str,
) -> Result<CoachResult, CoreError> {
    let cleaned = prompt.trim();
    if cleaned.is_empty() {
        return Err(CoreError::PromptRequired);
    }

    let gateway = match gateway {
        Some(gateway) => gateway,
        None => return Ok(fallback_result(cleaned)),
    };

    let output = gateway
        .generate(COACH_SYSTEM_PROMPT, None, cleaned, COACH_DEADLINE)
        .await
        .context("prompt coach failed")?;
    let payload = output.trim();
    if payload.is_empty() {
        return Ok(fallback_result(cleaned));
    }

    let mut parsed: CoachResult = serde_json::from_str(payload)
        .context("failed to parse coach response")
        .map_err(CoreError::Other)?;

    if parsed.analysis.trim().is_empty() {
        parsed.analysis =
            "Clippy couldn't find anything to change, but here's a quick tidy-up.".to_string();
    }
    if parsed.improved_prompt.trim().is_empty() {
        parsed.improved_prompt = cleaned.to_string();
    } else {
        parsed.improved_prompt = parsed.improved_prompt.trim().to_string();
    }

    Ok(parsed)
}

fn fallback_result(original: &str) -> CoachResult {
    CoachResult {
        analysis: "Clippy is offline, so here's your original prompt.".to_string(),
        improved_prompt: original.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;

    struct CannedGateway(String);

    #[async_trait]
    impl ModelGateway for CannedGateway {
        async fn generate(
            &self,
            _system_prompt: &str,
            _workspace_hint: Option<&str>,
            _user_message: &str,
            _deadline: Duration,
        ) -> Result<String> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn empty_prompt_is_rejected() {
        let err = improve_prompt(None, "   ").await.unwrap_err();
        assert!(matches!(err, CoreError::PromptRequired));
    }

    #[tokio::test]
    async fn offline_coach_echoes_prompt() {
        let result = improve_prompt(None, "write a thing").await.unwrap();
        assert_eq!(result.improved_prompt, "write a thing");
        assert!(result.analysis.contains("offline"));
    }

    #[tokio::test]
    async fn parses_strict_json_reply() {
        let gateway: Arc<dyn ModelGateway> = Arc::new(CannedGateway(
            r#"{"analysis":"too vague","improved_prompt":"write a haiku about rust"}"#.to_string(),
        ));
        let result = improve_prompt(Some(&gateway), "write poem").await.unwrap();
        assert_eq!(result.analysis, "too vague");
        assert_eq!(result.improved_prompt, "write a haiku about rust");
    }

    #[tokio::test]
    async fn blank_fields_are_backfilled() {
        let gateway: Arc<dyn ModelGateway> = Arc::new(CannedGateway(
            r#"{"analysis":"","improved_prompt":"  "}"#.to_string(),
        ));
        let result = improve_prompt(Some(&gateway), "original").await.unwrap();
        assert!(result.analysis.contains("tidy-up"));
        assert_eq!(result.improved_prompt, "original");
    }

    #[tokio::test]
    async fn non_json_reply_is_an_error() {
        let gateway: Arc<dyn ModelGateway> =
            Arc::new(CannedGateway("sure, here you go!".to_string()));
        assert!(improve_prompt(Some(&gateway), "x").await.is_err());
    }

    #[tokio::test]
    async fn empty_reply_falls_back() {
        let gateway: Arc<dyn ModelGateway> = Arc::new(CannedGateway("  ".to_string()));
        let result = improve_prompt(Some(&gateway), "keep me").await.unwrap();
        assert_eq!(result.improved_prompt, "keep me");
    }
}
