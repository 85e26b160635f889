use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::anthropic::AnthropicClient;
use super::openai::OpenAiClient;
use super::{ChatRequest, ChatResponse, ModelClient};
use crate::errors::InvocationError;

const OPENAI_PREFIXES: &[&str] = &["openai/", "gpt-", "o1", "o3", "o4"];
const ANTHROPIC_PREFIXES: &[&str] = &["anthropic/", "claude-"];

/// Maps model ids to clients by longest matching prefix. An empty prefix is a catch-all.
#[derive(Clone, Default)]
pub struct ProviderRouter {
    routes: Vec<(String, Arc<dyn ModelClient>)>,
}

impl ProviderRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, prefix: impl Into<String>, client: Arc<dyn ModelClient>) -> Self {
        self.routes.push((prefix.into(), client));
        self
    }

    pub fn fallback(self, client: Arc<dyn ModelClient>) -> Self {
        self.route("", client)
    }

    /// OpenAI and Anthropic model families, keyed from `OPENAI_API_KEY` / `ANTHROPIC_API_KEY`.
    /// A family whose key is unset still routes, and every call fails with an auth hint.
    pub fn from_env() -> Self {
        let openai: Arc<dyn ModelClient> = match std::env::var("OPENAI_API_KEY") {
            Ok(key) if !key.is_empty() => {
                let client = OpenAiClient::new(key);
                match std::env::var("OPENAI_BASE_URL") {
                    Ok(url) if !url.is_empty() => Arc::new(client.with_base_url(url)),
                    _ => Arc::new(client),
                }
            }
            _ => Arc::new(MissingCredentials("openai")),
        };
        let anthropic: Arc<dyn ModelClient> = match std::env::var("ANTHROPIC_API_KEY") {
            Ok(key) if !key.is_empty() => Arc::new(AnthropicClient::new(key)),
            _ => Arc::new(MissingCredentials("anthropic")),
        };

        let mut router = Self::new();
        for prefix in OPENAI_PREFIXES {
            router = router.route(*prefix, openai.clone());
        }
        for prefix in ANTHROPIC_PREFIXES {
            router = router.route(*prefix, anthropic.clone());
        }
        router
    }

    pub fn resolve(&self, model: &str) -> Result<Arc<dyn ModelClient>, InvocationError> {
        let hit = self
            .routes
            .iter()
            .filter(|(prefix, _)| model.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len());
        match hit {
            Some((prefix, client)) => {
                debug!(
                    model,
                    prefix = prefix.as_str(),
                    provider = client.provider_name(),
                    "resolved model"
                );
                Ok(client.clone())
            }
            None => Err(InvocationError::NoProvider {
                model: model.to_string(),
            }),
        }
    }
}

struct MissingCredentials(&'static str);

#[async_trait]
impl ModelClient for MissingCredentials {
    async fn invoke(&self, request: &ChatRequest) -> Result<ChatResponse, InvocationError> {
        Err(InvocationError::auth(self.0, &request.model, "no API key configured"))
    }

    fn provider_name(&self) -> &'static str {
        self.0
    }
}
