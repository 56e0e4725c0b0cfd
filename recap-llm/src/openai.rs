use crate::error::{Result, SummarizeError};
use crate::types::Usage;
use serde::{Deserialize, Serialize};

const OPENAI_CHAT_COMPLETIONS_URL: &str = "https://api.openai.com/v1/chat/completions";

#[derive(Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
}

pub struct Completion {
    pub text: String,
    pub usage: Option<Usage>,
}

impl OpenAiClient {
    pub fn new(http: reqwest::Client, api_key: &str, model: &str) -> Self {
        Self {
            http,
            api_key: api_key.to_string(),
            model: model.to_string(),
        }
    }

    #[tracing::instrument(level = "info", skip_all)]
    pub async fn complete(
        &self,
        system: &str,
        user: &str,
        max_output_tokens: u32,
    ) -> Result<Completion> {
        let req = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatRequestMessage {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                ChatRequestMessage {
                    role: "user".to_string(),
                    content: user.to_string(),
                },
            ],
            max_tokens: max_output_tokens,
            temperature: 0.2,
        };

        let response = self
            .http
            .post(OPENAI_CHAT_COMPLETIONS_URL)
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(classify_status(status, &body));
        }

        let parsed: ChatResponse = serde_json::from_str(&body)?;
        let choice = parsed.choices.into_iter().next().ok_or_else(|| {
            SummarizeError::ResponseFormat("completion response had no choices".to_string())
        })?;
        let text = choice.message.content.trim().to_string();
        if text.is_empty() {
            return Err(SummarizeError::ResponseFormat(
                "completion content was empty".to_string(),
            ));
        }

        Ok(Completion {
            text,
            usage: parsed.usage.map(|u| Usage {
                prompt_tokens: u.prompt_tokens.unwrap_or(0),
                completion_tokens: u.completion_tokens.unwrap_or(0),
            }),
        })
    }
}

fn classify_status(status: reqwest::StatusCode, body: &str) -> SummarizeError {
    let detail = format!("status={status} body={body}");
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        SummarizeError::RateLimited(detail)
    } else if status == reqwest::StatusCode::REQUEST_TIMEOUT {
        SummarizeError::Timeout(detail)
    } else if status.is_server_error() {
        SummarizeError::Server(detail)
    } else {
        SummarizeError::BadRequest(detail)
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatRequestMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatRequestMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: Option<u32>,
    #[serde(default)]
    completion_tokens: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification_matches_retry_semantics() {
        assert!(classify_status(reqwest::StatusCode::TOO_MANY_REQUESTS, "").is_retryable());
        assert!(classify_status(reqwest::StatusCode::INTERNAL_SERVER_ERROR, "").is_retryable());
        assert!(classify_status(reqwest::StatusCode::BAD_GATEWAY, "").is_retryable());
        assert!(classify_status(reqwest::StatusCode::REQUEST_TIMEOUT, "").is_retryable());
        assert!(!classify_status(reqwest::StatusCode::BAD_REQUEST, "").is_retryable());
        assert!(!classify_status(reqwest::StatusCode::UNAUTHORIZED, "").is_retryable());
    }
}
