//! Model-invocation capability: one trait, HTTP clients behind it, and a prefix router.

pub mod anthropic;
pub mod fake;
pub mod openai;
pub mod router;

pub use router::ProviderRouter;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info_span, Instrument};

use crate::errors::{CallError, InvocationError};
use crate::model::ModelParameters;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub system: Option<String>,
    pub user: String,
    pub parameters: ModelParameters,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub text: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn invoke(&self, request: &ChatRequest) -> Result<ChatResponse, InvocationError>;

    fn provider_name(&self) -> &'static str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallRole {
    Primary,
    Judge,
}

impl CallRole {
    pub fn as_str(self) -> &'static str {
        match self {
            CallRole::Primary => "primary",
            CallRole::Judge => "judge",
        }
    }
}

/// Runs one call under `limit`. Dropping the inner future on expiry aborts the in-flight request.
pub async fn invoke_with_timeout(
    client: &dyn ModelClient,
    request: &ChatRequest,
    limit: Duration,
    role: CallRole,
) -> Result<ChatResponse, CallError> {
    let span = info_span!(
        "promptlab.invoke",
        "gen_ai.request.model" = request.model.as_str(),
        "promptlab.provider" = client.provider_name(),
        "promptlab.role" = role.as_str(),
        "gen_ai.usage.input_tokens" = tracing::field::Empty,
        "gen_ai.usage.output_tokens" = tracing::field::Empty,
        "error" = tracing::field::Empty
    );

    let outcome = tokio::time::timeout(limit, client.invoke(request))
        .instrument(span.clone())
        .await;

    match outcome {
        Ok(Ok(response)) => {
            span.record("gen_ai.usage.input_tokens", response.input_tokens);
            span.record("gen_ai.usage.output_tokens", response.output_tokens);
            Ok(response)
        }
        Ok(Err(e)) => {
            span.record("error", e.to_string().as_str());
            Err(CallError::Invocation(e))
        }
        Err(_) => {
            let after_ms = limit.as_millis() as u64;
            span.record("error", "timeout");
            Err(CallError::Timeout { after_ms })
        }
    }
}

/// Model id as the provider's API expects it, without our routing prefix.
pub(crate) fn api_model<'a>(model: &'a str, prefix: &str) -> &'a str {
    model
        .strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix('/'))
        .unwrap_or(model)
}
