use async_trait::async_trait;
use serde_json::{json, Map, Value};

use super::{api_model, ChatRequest, ChatResponse, ModelClient};
use crate::errors::InvocationError;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiClient {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAiClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Any OpenAI-compatible chat completions endpoint.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn body(request: &ChatRequest) -> Value {
        let mut messages = Vec::new();
        if let Some(system) = &request.system {
            messages.push(json!({ "role": "system", "content": system }));
        }
        messages.push(json!({ "role": "user", "content": request.user }));

        let mut body = Map::new();
        body.insert("model".into(), json!(api_model(&request.model, "openai")));
        body.insert("messages".into(), Value::Array(messages));
        let p = &request.parameters;
        if let Some(t) = p.temperature {
            body.insert("temperature".into(), json!(t));
        }
        if let Some(m) = p.max_tokens {
            body.insert("max_tokens".into(), json!(m));
        }
        if let Some(top_p) = p.top_p {
            body.insert("top_p".into(), json!(top_p));
        }
        for (k, v) in &p.extra {
            body.insert(k.clone(), json!(v));
        }
        Value::Object(body)
    }
}

pub(crate) fn parse_completion(json: &Value) -> Result<ChatResponse, InvocationError> {
    let text = json
        .pointer("/choices/0/message/content")
        .and_then(|v| v.as_str())
        .ok_or_else(|| {
            InvocationError::MalformedResponse("OpenAI response missing content".into())
        })?
        .to_string();
    let usage = |field: &str| {
        json.pointer(&format!("/usage/{field}"))
            .and_then(|v| v.as_u64())
            .unwrap_or(0)
    };
    Ok(ChatResponse {
        text,
        input_tokens: usage("prompt_tokens"),
        output_tokens: usage("completion_tokens"),
    })
}

#[async_trait]
impl ModelClient for OpenAiClient {
    async fn invoke(&self, request: &ChatRequest) -> Result<ChatResponse, InvocationError> {
        let url = format!("{}/chat/completions", self.base_url);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&Self::body(request))
            .send()
            .await
            .map_err(|e| InvocationError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let error_text = resp.text().await.unwrap_or_default();
            if status.as_u16() == 401 || status.as_u16() == 403 {
                return Err(InvocationError::auth("openai", &request.model, error_text));
            }
            return Err(InvocationError::Provider {
                provider: "openai".into(),
                status: status.as_u16(),
                message: error_text,
            });
        }

        let json: Value = resp
            .json()
            .await
            .map_err(|e| InvocationError::MalformedResponse(e.to_string()))?;
        parse_completion(&json)
    }

    fn provider_name(&self) -> &'static str {
        "openai"
    }
}
