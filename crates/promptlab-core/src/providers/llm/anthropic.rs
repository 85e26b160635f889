use async_trait::async_trait;
use serde_json::{json, Map, Value};

use super::{api_model, ChatRequest, ChatResponse, ModelClient};
use crate::errors::InvocationError;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";
// The messages API requires max_tokens.
const DEFAULT_MAX_TOKENS: u32 = 1024;

pub struct AnthropicClient {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl AnthropicClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn body(request: &ChatRequest) -> Value {
        let p = &request.parameters;
        let mut body = Map::new();
        body.insert("model".into(), json!(api_model(&request.model, "anthropic")));
        body.insert(
            "max_tokens".into(),
            json!(p.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS)),
        );
        if let Some(system) = &request.system {
            body.insert("system".into(), json!(system));
        }
        body.insert(
            "messages".into(),
            json!([{ "role": "user", "content": request.user }]),
        );
        if let Some(t) = p.temperature {
            body.insert("temperature".into(), json!(t));
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

pub(crate) fn parse_message(json: &Value) -> Result<ChatResponse, InvocationError> {
    let blocks = json
        .get("content")
        .and_then(|v| v.as_array())
        .ok_or_else(|| {
            InvocationError::MalformedResponse("Anthropic response missing content".into())
        })?;
    let text: String = blocks
        .iter()
        .filter(|b| b.get("type").and_then(|t| t.as_str()) == Some("text"))
        .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
        .collect();
    let usage = |field: &str| {
        json.pointer(&format!("/usage/{field}"))
            .and_then(|v| v.as_u64())
            .unwrap_or(0)
    };
    Ok(ChatResponse {
        text,
        input_tokens: usage("input_tokens"),
        output_tokens: usage("output_tokens"),
    })
}

#[async_trait]
impl ModelClient for AnthropicClient {
    async fn invoke(&self, request: &ChatRequest) -> Result<ChatResponse, InvocationError> {
        let url = format!("{}/messages", self.base_url);
        let resp = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&Self::body(request))
            .send()
            .await
            .map_err(|e| InvocationError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let error_text = resp.text().await.unwrap_or_default();
            if status.as_u16() == 401 || status.as_u16() == 403 {
                return Err(InvocationError::auth("anthropic", &request.model, error_text));
            }
            return Err(InvocationError::Provider {
                provider: "anthropic".into(),
                status: status.as_u16(),
                message: error_text,
            });
        }

        let json: Value = resp
            .json()
            .await
            .map_err(|e| InvocationError::MalformedResponse(e.to_string()))?;
        parse_message(&json)
    }

    fn provider_name(&self) -> &'static str {
        "anthropic"
    }
}
