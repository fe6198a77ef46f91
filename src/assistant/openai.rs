//! OpenAI Assistants (v2) client over reqwest.

use super::types::{ListOrder, ListResponse, MessageRole, ObjectId, Run, SessionMessage};
use super::{AssistantResult, AssistantSessions};
use crate::SessionId;
use crate::error::AssistantError;

use anyhow::Context as _;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Default Assistants API base URL.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

const ASSISTANTS_BETA: &str = "assistants=v2";
const MAX_ERROR_BODY_CHARS: usize = 400;

/// HTTP client for the OpenAI Assistants API.
#[derive(Clone)]
pub struct OpenAiAssistantClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OpenAiAssistantClient {
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        request_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .context("failed to build assistant HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, format!("{}/{}", self.base_url, path))
            .bearer_auth(&self.api_key)
            .header("OpenAI-Beta", ASSISTANTS_BETA)
    }

    async fn send<T: DeserializeOwned>(
        &self,
        operation: &str,
        request: reqwest::RequestBuilder,
    ) -> AssistantResult<T> {
        let response = request
            .send()
            .await
            .map_err(|error| AssistantError::Request {
                operation: operation.to_string(),
                detail: error.to_string(),
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| AssistantError::Request {
                operation: operation.to_string(),
                detail: format!("failed to read response body: {error}"),
            })?;

        if !status.is_success() {
            return Err(AssistantError::Api {
                operation: operation.to_string(),
                status: status.as_u16(),
                message: api_error_message(&body),
            });
        }

        serde_json::from_str(&body).map_err(|error| AssistantError::Decode {
            operation: operation.to_string(),
            detail: format!("{error}; body: {}", truncate_for_error(&body, MAX_ERROR_BODY_CHARS)),
        })
    }
}

impl std::fmt::Debug for OpenAiAssistantClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiAssistantClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl AssistantSessions for OpenAiAssistantClient {
    async fn create_session(&self) -> AssistantResult<SessionId> {
        let created: ObjectId = self
            .send(
                "create thread",
                self.request(reqwest::Method::POST, "threads")
                    .json(&serde_json::json!({})),
            )
            .await?;
        Ok(SessionId::new(created.id))
    }

    async fn append_message(
        &self,
        session: &SessionId,
        role: MessageRole,
        text: &str,
    ) -> AssistantResult<()> {
        let body = serde_json::json!({
            "role": role.as_str(),
            "content": text,
        });
        let _: serde_json::Value = self
            .send(
                "create message",
                self.request(reqwest::Method::POST, &format!("threads/{session}/messages"))
                    .json(&body),
            )
            .await?;
        Ok(())
    }

    async fn start_run(&self, session: &SessionId, assistant_id: &str) -> AssistantResult<Run> {
        self.send(
            "create run",
            self.request(reqwest::Method::POST, &format!("threads/{session}/runs"))
                .json(&serde_json::json!({ "assistant_id": assistant_id })),
        )
        .await
    }

    async fn retrieve_run(&self, session: &SessionId, run_id: &str) -> AssistantResult<Run> {
        self.send(
            "retrieve run",
            self.request(reqwest::Method::GET, &format!("threads/{session}/runs/{run_id}")),
        )
        .await
    }

    async fn cancel_run(&self, session: &SessionId, run_id: &str) -> AssistantResult<Run> {
        self.send(
            "cancel run",
            self.request(
                reqwest::Method::POST,
                &format!("threads/{session}/runs/{run_id}/cancel"),
            ),
        )
        .await
    }

    async fn list_messages(
        &self,
        session: &SessionId,
        order: ListOrder,
        run_id: Option<&str>,
    ) -> AssistantResult<Vec<SessionMessage>> {
        let mut query = vec![("order", order.as_str().to_string())];
        if let Some(run_id) = run_id {
            query.push(("run_id", run_id.to_string()));
        }
        let listed: ListResponse<SessionMessage> = self
            .send(
                "list messages",
                self.request(reqwest::Method::GET, &format!("threads/{session}/messages"))
                    .query(&query),
            )
            .await?;
        Ok(listed.data)
    }
}

/// Pull `error.message` out of an API error body, falling back to the raw body.
fn api_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| value["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| truncate_for_error(body, MAX_ERROR_BODY_CHARS).to_string())
}

fn truncate_for_error(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}
