//! Assistants-style REST client.

use super::{
    MessageRole, ReasoningService, RequiredToolCall, RunStatus, RunStatusReport, ThreadMessage,
    ToolCallOutput,
};
use crate::config::HttpServiceConfig;
use crate::errors::ServiceError;
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

/// [`ReasoningService`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpReasoningService {
    http: reqwest::Client,
    config: HttpServiceConfig,
}

impl HttpReasoningService {
    /// Creates a client.
    pub fn new(config: HttpServiceConfig) -> Result<Self, ServiceError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| ServiceError::Network(e.to_string()))?;
        Ok(Self { http, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.base_url.trim_end_matches('/'))
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Value, ServiceError> {
        let mut request = request
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("content-type", "application/json");
        if let Some(beta) = &self.config.beta_header {
            request = request.header("OpenAI-Beta", beta);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ServiceError::Network(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ServiceError::RateLimited);
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let text = text.chars().take(200).collect::<String>();
            return Err(ServiceError::Api {
                status: status.as_u16(),
                message: text,
            });
        }

        response
            .json()
            .await
            .map_err(|e| ServiceError::Decode(e.to_string()))
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value, ServiceError> {
        debug!(path, "Reasoning service POST");
        self.send(self.http.post(self.url(path)).json(&body)).await
    }

    async fn get(&self, path: &str) -> Result<Value, ServiceError> {
        debug!(path, "Reasoning service GET");
        self.send(self.http.get(self.url(path))).await
    }
}

#[async_trait]
impl ReasoningService for HttpReasoningService {
    async fn create_thread(&self) -> Result<String, ServiceError> {
        let body = self.post("/threads", json!({})).await?;
        string_field(&body, "id")
    }

    async fn post_message(&self, thread_id: &str, content: &str) -> Result<(), ServiceError> {
        self.post(
            &format!("/threads/{thread_id}/messages"),
            json!({"role": "user", "content": content}),
        )
        .await?;
        Ok(())
    }

    async fn create_run(&self, thread_id: &str, assistant_id: &str) -> Result<String, ServiceError> {
        let body = self
            .post(
                &format!("/threads/{thread_id}/runs"),
                json!({"assistant_id": assistant_id}),
            )
            .await?;
        string_field(&body, "id")
    }

    async fn get_run_status(
        &self,
        thread_id: &str,
        run_id: &str,
    ) -> Result<RunStatusReport, ServiceError> {
        let body = self
            .get(&format!("/threads/{thread_id}/runs/{run_id}"))
            .await?;
        parse_run_status(&body)
    }

    async fn submit_tool_outputs(
        &self,
        thread_id: &str,
        run_id: &str,
        outputs: Vec<ToolCallOutput>,
    ) -> Result<(), ServiceError> {
        self.post(
            &format!("/threads/{thread_id}/runs/{run_id}/submit_tool_outputs"),
            json!({ "tool_outputs": outputs }),
        )
        .await?;
        Ok(())
    }

    async fn cancel_run(&self, thread_id: &str, run_id: &str) -> Result<(), ServiceError> {
        self.post(
            &format!("/threads/{thread_id}/runs/{run_id}/cancel"),
            json!({}),
        )
        .await?;
        Ok(())
    }

    async fn list_messages(&self, thread_id: &str) -> Result<Vec<ThreadMessage>, ServiceError> {
        let body = self
            .get(&format!("/threads/{thread_id}/messages?order=asc"))
            .await?;
        parse_messages(&body)
    }
}

fn string_field(body: &Value, field: &str) -> Result<String, ServiceError> {
    body[field]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| ServiceError::MissingField(field.to_string()))
}

/// Decodes a run object.
fn parse_run_status(body: &Value) -> Result<RunStatusReport, ServiceError> {
    let status: RunStatus = serde_json::from_value(body["status"].clone())
        .map_err(|e| ServiceError::Decode(format!("run status: {e}")))?;

    let mut report = RunStatusReport::new(status);

    if let Some(calls) = body["required_action"]["submit_tool_outputs"]["tool_calls"].as_array() {
        for call in calls {
            report.required_calls.push(RequiredToolCall::new(
                string_field(call, "id")?,
                call["function"]["name"]
                    .as_str()
                    .ok_or_else(|| ServiceError::MissingField("function.name".into()))?,
                call["function"]["arguments"].as_str().unwrap_or("{}"),
            ));
        }
    }

    let last_error = &body["last_error"];
    if !last_error.is_null() {
        let message = last_error["message"].as_str().unwrap_or_default();
        let code = last_error["code"].as_str().unwrap_or_default();
        report.error_detail = Some(match (code.is_empty(), message.is_empty()) {
            (false, false) => format!("{code}: {message}"),
            (true, false) => message.to_string(),
            (false, true) => code.to_string(),
            (true, true) => last_error.to_string(),
        });
    }

    Ok(report)
}

/// Decodes a message list, flattening text content parts.
fn parse_messages(body: &Value) -> Result<Vec<ThreadMessage>, ServiceError> {
    let data = body["data"]
        .as_array()
        .ok_or_else(|| ServiceError::MissingField("data".into()))?;

    data.iter()
        .map(|m| {
            let role = match m["role"].as_str() {
                Some("assistant") => MessageRole::Assistant,
                _ => MessageRole::User,
            };
            let content = match &m["content"] {
                Value::String(s) => s.clone(),
                Value::Array(parts) => parts
                    .iter()
                    .filter_map(|p| p["text"]["value"].as_str())
                    .collect::<Vec<_>>()
                    .join("\n"),
                _ => String::new(),
            };
            Ok(ThreadMessage {
                id: string_field(m, "id")?,
                role,
                content,
                created_at: m["created_at"].as_i64().unwrap_or_default(),
            })
        })
        .collect()
}
