//! The `promptlab.invoke` span carries the model, provider, role and, once the call settles,
//! either usage or the error.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use promptlab_core::errors::InvocationError;
use promptlab_core::model::ModelParameters;
use promptlab_core::providers::llm::fake::FakeClient;
use promptlab_core::providers::llm::{invoke_with_timeout, CallRole, ChatRequest};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::MakeWriter;

#[derive(Clone, Default)]
struct Capture {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl Capture {
    fn output(&self) -> String {
        String::from_utf8(self.buf.lock().unwrap().clone()).unwrap()
    }

    /// Fields of the last closed `promptlab.invoke` span.
    fn closed_span(&self) -> serde_json::Map<String, serde_json::Value> {
        self.output()
            .lines()
            .rev()
            .filter_map(|line| serde_json::from_str::<serde_json::Value>(line.trim()).ok())
            .find_map(|v| {
                v.get("span")
                    .and_then(|s| s.as_object())
                    .filter(|s| s.get("name").and_then(|n| n.as_str()) == Some("promptlab.invoke"))
                    .cloned()
            })
            .unwrap_or_default()
    }
}

impl std::io::Write for Capture {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buf.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for Capture {
    type Writer = Capture;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn capture() -> (Capture, tracing::subscriber::DefaultGuard) {
    let writer = Capture::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(writer.clone())
        .json()
        .with_span_events(FmtSpan::CLOSE)
        .finish();
    (writer, tracing::subscriber::set_default(subscriber))
}

fn request(model: &str, user: &str) -> ChatRequest {
    ChatRequest {
        model: model.to_string(),
        system: None,
        user: user.to_string(),
        parameters: ModelParameters::default(),
    }
}

#[tokio::test]
async fn successful_call_records_usage() {
    let (writer, _guard) = capture();
    let client = FakeClient::new("Paris").with_usage(42, 7);

    let response = invoke_with_timeout(
        &client,
        &request("gpt-4o-mini", "Capital of France?"),
        Duration::from_secs(1),
        CallRole::Primary,
    )
    .await
    .unwrap();
    assert_eq!(response.text, "Paris");

    let span = writer.closed_span();
    assert_eq!(span.get("gen_ai.request.model").and_then(|v| v.as_str()), Some("gpt-4o-mini"));
    assert_eq!(span.get("promptlab.provider").and_then(|v| v.as_str()), Some("fake"));
    assert_eq!(span.get("promptlab.role").and_then(|v| v.as_str()), Some("primary"));
    assert_eq!(span.get("gen_ai.usage.input_tokens").and_then(|v| v.as_u64()), Some(42));
    assert_eq!(span.get("gen_ai.usage.output_tokens").and_then(|v| v.as_u64()), Some(7));
    assert!(span.get("error").is_none());
}

#[tokio::test]
async fn prompt_text_stays_out_of_the_span() {
    let (writer, _guard) = capture();
    let client = FakeClient::new("ok");

    invoke_with_timeout(
        &client,
        &request("gpt-4o-mini", "customer secret 1234"),
        Duration::from_secs(1),
        CallRole::Primary,
    )
    .await
    .unwrap();

    assert!(!writer.output().contains("customer secret 1234"));
}

#[tokio::test]
async fn judge_timeout_is_recorded_as_error() {
    let (writer, _guard) = capture();
    let client = FakeClient::new("YES").hang_when("Expected");

    let err = invoke_with_timeout(
        &client,
        &request("gpt-4o-mini", "Expected: Paris"),
        Duration::from_millis(20),
        CallRole::Judge,
    )
    .await
    .unwrap_err();
    assert_eq!(err.to_string(), "Timeout after 20ms");

    let span = writer.closed_span();
    assert_eq!(span.get("promptlab.role").and_then(|v| v.as_str()), Some("judge"));
    assert_eq!(span.get("error").and_then(|v| v.as_str()), Some("timeout"));
    assert!(span.get("gen_ai.usage.input_tokens").is_none());
}

#[tokio::test]
async fn provider_failure_is_recorded_as_error() {
    let (writer, _guard) = capture();
    let client = FakeClient::new("unused").fail_when(
        "France",
        InvocationError::Provider {
            provider: "fake".into(),
            status: 503,
            message: "overloaded".into(),
        },
    );

    invoke_with_timeout(
        &client,
        &request("claude-3-5-haiku", "Capital of France?"),
        Duration::from_secs(1),
        CallRole::Primary,
    )
    .await
    .unwrap_err();

    let error = writer.closed_span().get("error").and_then(|v| v.as_str()).map(String::from);
    assert!(error.as_deref().is_some_and(|e| e.contains("overloaded")), "{error:?}");
}
