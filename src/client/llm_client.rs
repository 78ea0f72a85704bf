//! llm_client.rs
//!
//! Non-streaming chat-completion client. Speaks either the OpenAI-compatible
//! `/chat/completions` shape (bearer token) or an Azure OpenAI deployment
//! (`api-key` header, `api-version` query parameter).

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::{LlmConfig, LlmFlavor};

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server returned {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("completion contained no message")]
    EmptyResponse,
}

pub struct LlmClient {
    http: reqwest::Client,
    config: LlmConfig,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { http, config })
    }

    fn completions_url(&self) -> String {
        match &self.config.flavor {
            LlmFlavor::OpenAi => format!("{}/chat/completions", self.config.endpoint),
            LlmFlavor::Azure { api_version } => format!(
                "{}/openai/deployments/{}/chat/completions?api-version={}",
                self.config.endpoint, self.config.model, api_version
            ),
        }
    }

    /// Sends a single user message and returns the assistant's reply.
    pub async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        let body = ChatRequest {
            // Azure selects the model by deployment in the URL.
            model: match self.config.flavor {
                LlmFlavor::OpenAi => Some(self.config.model.as_str()),
                LlmFlavor::Azure { .. } => None,
            },
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            stream: false,
        };

        let url = self.completions_url();
        debug!(%url, prompt_chars = prompt.len(), "requesting completion");
        let req = self.http.post(&url).json(&body);
        let req = match self.config.flavor {
            LlmFlavor::OpenAi => req.bearer_auth(&self.config.api_key),
            LlmFlavor::Azure { .. } => req.header("api-key", &self.config.api_key),
        };

        let resp = req.send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(LlmError::Status { status, body });
        }

        let parsed: ChatResponse = resp.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(LlmError::EmptyResponse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, http::HeaderMap, routing::post};
    use serde_json::{Value, json};
    use std::time::Duration;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{addr}")
    }

    fn config(endpoint: String, flavor: LlmFlavor) -> LlmConfig {
        LlmConfig {
            endpoint,
            api_key: "k".into(),
            model: "gpt-4o".into(),
            flavor,
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn builds_urls_per_flavor() {
        let c = LlmClient::new(config("http://localhost:1234/v1".into(), LlmFlavor::OpenAi)).unwrap();
        assert_eq!(c.completions_url(), "http://localhost:1234/v1/chat/completions");

        let c = LlmClient::new(config(
            "https://demo.openai.azure.com".into(),
            LlmFlavor::Azure {
                api_version: "2024-06-01".into(),
            },
        ))
        .unwrap();
        assert_eq!(
            c.completions_url(),
            "https://demo.openai.azure.com/openai/deployments/gpt-4o/chat/completions?api-version=2024-06-01"
        );
    }

    #[tokio::test]
    async fn returns_first_choice_content() {
        let app = Router::new().route(
            "/chat/completions",
            post(|headers: HeaderMap, Json(body): Json<Value>| async move {
                assert_eq!(headers.get("authorization").unwrap(), "Bearer k");
                assert_eq!(body["model"], "gpt-4o");
                assert_eq!(body["messages"][0]["role"], "user");
                Json(json!({"choices": [{"index": 0, "message": {"role": "assistant", "content": "- Dune"}}]}))
            }),
        );
        let c = LlmClient::new(config(serve(app).await, LlmFlavor::OpenAi)).unwrap();
        assert_eq!(c.complete("recommend a book").await.unwrap(), "- Dune");
    }

    #[tokio::test]
    async fn empty_choices_is_an_error() {
        let app = Router::new().route(
            "/chat/completions",
            post(|| async { Json(json!({"choices": []})) }),
        );
        let c = LlmClient::new(config(serve(app).await, LlmFlavor::OpenAi)).unwrap();
        assert!(matches!(c.complete("q").await, Err(LlmError::EmptyResponse)));
    }
}
