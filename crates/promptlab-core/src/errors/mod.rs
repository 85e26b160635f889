//! Error taxonomy.
//!
//! Two scopes:
//! - run-scoped errors (`ConfigError`, `EngineError`, `StoreError`) are returned to the caller;
//! - item-scoped errors (`RenderError`, `InvocationError`, `MatchError`, timeouts) are folded
//!   into an [`ItemError`] on the affected `RunResult` and never abort sibling items.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Problems with a definition or with engine settings, detected before any work starts.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("definition name is required")]
    MissingName,

    #[error("definition '{0}' has an empty prompt template")]
    MissingTemplate(String),

    #[error("definition '{0}' has no test cases")]
    NoTestCases(String),

    #[error("invalid match mode '{mode}'. Must be one of: {valid}")]
    UnknownMatchMode { mode: String, valid: String },

    #[error("no models requested and definition '{0}' has no default model")]
    NoModels(String),

    #[error("invalid settings: {0}")]
    InvalidSettings(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RenderError {
    #[error("variable '{name}' not found in inputs")]
    MissingVariable { name: String },
}

/// Failure reported by a model provider or the transport underneath it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InvocationError {
    #[error("no provider registered for model '{model}'")]
    NoProvider { model: String },

    #[error("Authentication failed: {hint}. Original error: {message}")]
    Auth {
        provider: String,
        hint: String,
        message: String,
    },

    #[error("{provider} API error (status {status}): {message}")]
    Provider {
        provider: String,
        status: u16,
        message: String,
    },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed provider response: {0}")]
    MalformedResponse(String),
}

impl InvocationError {
    /// Authentication failure with a hint naming the credential for the model's provider family.
    pub fn auth(provider: &str, model: &str, message: impl Into<String>) -> Self {
        Self::Auth {
            provider: provider.to_string(),
            hint: auth_hint(model),
            message: message.into(),
        }
    }
}

fn auth_hint(model: &str) -> String {
    let m = model.to_ascii_lowercase();
    let var = if m.starts_with("gpt-") || m.starts_with("openai/") || m.starts_with("o1") {
        Some("OPENAI_API_KEY")
    } else if m.starts_with("claude-") || m.starts_with("anthropic/") {
        Some("ANTHROPIC_API_KEY")
    } else if m.starts_with("gemini") || m.starts_with("google/") {
        Some("GOOGLE_API_KEY")
    } else if m.starts_with("command") || m.starts_with("cohere/") {
        Some("COHERE_API_KEY")
    } else {
        None
    };
    match var {
        Some(v) => format!("Set {} environment variable", v),
        None => format!("Check your API key for model {}", model),
    }
}

/// A single model call that either failed or ran past its ceiling.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CallError {
    #[error(transparent)]
    Invocation(#[from] InvocationError),

    #[error("Timeout after {after_ms}ms")]
    Timeout { after_ms: u64 },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum JudgeError {
    #[error("semantic judge unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("judge call failed: {0}")]
    Call(#[from] CallError),

    #[error("unrecognized judge reply '{reply}' (expected YES or NO)")]
    Unrecognized { reply: String },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MatchError {
    #[error("Invalid regex pattern '{pattern}': {message}")]
    Pattern { pattern: String, message: String },

    #[error(transparent)]
    Judge(#[from] JudgeError),
}

/// Per-result error annotation. Serialized with the result in the run store.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ItemError {
    #[error("rendering error: {message}")]
    Rendering {
        variable: Option<String>,
        message: String,
    },

    #[error("{message}")]
    Invocation { message: String },

    #[error("Timeout after {after_ms}ms")]
    Timeout { after_ms: u64 },

    #[error("Invalid regex pattern '{pattern}': {message}")]
    Pattern { pattern: String, message: String },

    #[error("semantic judge error: {message}")]
    Judge { message: String },

    #[error("cancelled before completion")]
    Cancelled,
}

impl ItemError {
    pub fn kind(&self) -> &'static str {
        match self {
            ItemError::Rendering { .. } => "rendering",
            ItemError::Invocation { .. } => "invocation",
            ItemError::Timeout { .. } => "timeout",
            ItemError::Pattern { .. } => "pattern",
            ItemError::Judge { .. } => "judge",
            ItemError::Cancelled => "cancelled",
        }
    }
}

impl From<RenderError> for ItemError {
    fn from(e: RenderError) -> Self {
        let message = e.to_string();
        let RenderError::MissingVariable { name } = e;
        ItemError::Rendering {
            variable: Some(name),
            message,
        }
    }
}

impl From<InvocationError> for ItemError {
    fn from(e: InvocationError) -> Self {
        ItemError::Invocation {
            message: e.to_string(),
        }
    }
}

impl From<CallError> for ItemError {
    fn from(e: CallError) -> Self {
        match e {
            CallError::Invocation(inner) => inner.into(),
            CallError::Timeout { after_ms } => ItemError::Timeout { after_ms },
        }
    }
}

impl From<MatchError> for ItemError {
    fn from(e: MatchError) -> Self {
        match e {
            MatchError::Pattern { pattern, message } => ItemError::Pattern { pattern, message },
            MatchError::Judge(inner) => ItemError::Judge {
                message: inner.to_string(),
            },
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("run not found: {run_id}")]
    NotFound { run_id: String },

    #[error("run already stored: {run_id}")]
    Duplicate { run_id: String },

    #[error("corrupt record for run {run_id}: {detail}")]
    Corrupt { run_id: String, detail: String },

    #[error("store connection poisoned")]
    Poisoned,

    #[error("failed to prepare store location {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("none of the requested models can be served: {}", .models.join(", "))]
    NoRunnableModels { models: Vec<String> },

    #[error(transparent)]
    Store(#[from] StoreError),
}
