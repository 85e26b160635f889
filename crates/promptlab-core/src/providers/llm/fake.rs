use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{ChatRequest, ChatResponse, ModelClient};
use crate::errors::InvocationError;

#[derive(Debug, Clone)]
enum Action {
    Reply(String),
    Fail(InvocationError),
    Hang,
}

#[derive(Debug, Clone)]
enum Trigger {
    PromptContains(String),
    Model(String),
}

impl Trigger {
    fn matches(&self, request: &ChatRequest) -> bool {
        match self {
            Trigger::PromptContains(needle) => {
                request.user.contains(needle.as_str())
                    || request
                        .system
                        .as_deref()
                        .is_some_and(|s| s.contains(needle.as_str()))
            }
            Trigger::Model(model) => &request.model == model,
        }
    }
}

/// Scripted client for tests. Rules are checked in insertion order; the first hit wins.
#[derive(Debug)]
pub struct FakeClient {
    default_reply: String,
    rules: Vec<(Trigger, Action)>,
    delays: Vec<(Trigger, Duration)>,
    base_delay: Duration,
    usage: Option<(u64, u64)>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    requests: Mutex<Vec<ChatRequest>>,
}

impl FakeClient {
    pub fn new(default_reply: impl Into<String>) -> Self {
        Self {
            default_reply: default_reply.into(),
            rules: Vec::new(),
            delays: Vec::new(),
            base_delay: Duration::ZERO,
            usage: None,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn reply_when(mut self, prompt_contains: &str, reply: impl Into<String>) -> Self {
        self.rules.push((
            Trigger::PromptContains(prompt_contains.to_string()),
            Action::Reply(reply.into()),
        ));
        self
    }

    pub fn reply_for_model(mut self, model: &str, reply: impl Into<String>) -> Self {
        self.rules
            .push((Trigger::Model(model.to_string()), Action::Reply(reply.into())));
        self
    }

    pub fn fail_when(mut self, prompt_contains: &str, error: InvocationError) -> Self {
        self.rules.push((
            Trigger::PromptContains(prompt_contains.to_string()),
            Action::Fail(error),
        ));
        self
    }

    pub fn fail_for_model(mut self, model: &str, error: InvocationError) -> Self {
        self.rules
            .push((Trigger::Model(model.to_string()), Action::Fail(error)));
        self
    }

    /// Calls whose prompt contains `prompt_contains` never complete.
    pub fn hang_when(mut self, prompt_contains: &str) -> Self {
        self.rules.push((
            Trigger::PromptContains(prompt_contains.to_string()),
            Action::Hang,
        ));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn delay_when(mut self, prompt_contains: &str, delay: Duration) -> Self {
        self.delays
            .push((Trigger::PromptContains(prompt_contains.to_string()), delay));
        self
    }

    /// Fixed token usage per call. Without it, usage is a whitespace word count.
    pub fn with_usage(mut self, input_tokens: u64, output_tokens: u64) -> Self {
        self.usage = Some((input_tokens, output_tokens));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of calls observed in flight at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    fn action_for(&self, request: &ChatRequest) -> Action {
        self.rules
            .iter()
            .find(|(trigger, _)| trigger.matches(request))
            .map(|(_, action)| action.clone())
            .unwrap_or_else(|| Action::Reply(self.default_reply.clone()))
    }

    fn delay_for(&self, request: &ChatRequest) -> Duration {
        self.delays
            .iter()
            .find(|(trigger, _)| trigger.matches(request))
            .map(|(_, d)| *d)
            .unwrap_or(self.base_delay)
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn word_count(text: &str) -> u64 {
    text.split_whitespace().count() as u64
}

#[async_trait]
impl ModelClient for FakeClient {
    async fn invoke(&self, request: &ChatRequest) -> Result<ChatResponse, InvocationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut log) = self.requests.lock() {
            log.push(request.clone());
        }
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        let delay = self.delay_for(request);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let text = match self.action_for(request) {
            Action::Reply(text) => text,
            Action::Fail(e) => return Err(e),
            Action::Hang => std::future::pending::<String>().await,
        };
        let (input_tokens, output_tokens) = self.usage.unwrap_or_else(|| {
            let prompt_words =
                word_count(&request.user) + request.system.as_deref().map_or(0, word_count);
            (prompt_words, word_count(&text))
        });
        Ok(ChatResponse {
            text,
            input_tokens,
            output_tokens,
        })
    }

    fn provider_name(&self) -> &'static str {
        "fake"
    }
}
