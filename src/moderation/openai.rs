//! OpenAI chat-completions adapter for the text evaluator.
//!
//! The policy prompt rides as the system message and the context prompt as
//! the user message; the assistant is expected to reply with the strict
//! JSON object that `verdict::parse_raw_verdict` consumes.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::evaluator::TextEvaluator;
use crate::error::{EvaluatorError, EvaluatorResult};

const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";
const DEFAULT_MODEL: &str = "gpt-4o";
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Evaluator backed by the OpenAI chat-completions API.
pub struct OpenAiEvaluator {
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl OpenAiEvaluator {
    pub fn new(api_key: String) -> Self {
        Self::with_model(api_key, DEFAULT_MODEL)
    }

    pub fn with_model(api_key: String, model: &str) -> Self {
        Self {
            api_key,
            model: model.to_string(),
            client: reqwest::Client::builder()
                .timeout(HTTP_TIMEOUT)
                .build()
                .expect("Failed to create HTTP client"),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }
}

#[async_trait]
impl TextEvaluator for OpenAiEvaluator {
    async fn evaluate(
        &self,
        policy_prompt: &str,
        context_prompt: &str,
    ) -> EvaluatorResult<String> {
        if !self.is_configured() {
            return Err(EvaluatorError::NotConfigured("OPENAI_API_KEY".to_string()));
        }

        let request_body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": policy_prompt},
                {"role": "user", "content": context_prompt}
            ],
            "temperature": 0.3,
            "max_tokens": 200
        });

        let response = self
            .client
            .post(OPENAI_CHAT_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request_body)
            .send()
            .await
            .map_err(|e| EvaluatorError::RequestFailed(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EvaluatorError::RequestFailed(format!(
                "OpenAI API error ({}): {}",
                status, body
            )));
        }

        let resp_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| EvaluatorError::MalformedResponse(e.to_string()))?;

        let content = resp_json["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or("")
            .to_string();

        debug!(model = %self.model, chars = content.len(), "evaluator reply received");
        Ok(content)
    }
}
