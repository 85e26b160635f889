//! LLM-judged `semantic` matching.

mod prompt;
mod verdict;

pub use verdict::parse_verdict;

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::cost::PriceTable;
use crate::errors::JudgeError;
use crate::matcher::MatchReport;
use crate::model::{JudgeTrace, ModelParameters};
use crate::providers::llm::{invoke_with_timeout, CallRole, ChatRequest, ModelClient};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JudgeSettings {
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
}

impl Default for JudgeSettings {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            temperature: 0.0,
            max_tokens: 10,
        }
    }
}

pub struct JudgeVerdict {
    pub result: Result<MatchReport, JudgeError>,
    pub trace: JudgeTrace,
}

pub struct Judge {
    settings: JudgeSettings,
    client: Arc<dyn ModelClient>,
    prices: Arc<PriceTable>,
    call_timeout: Duration,
}

impl Judge {
    pub fn new(
        settings: JudgeSettings,
        client: Arc<dyn ModelClient>,
        prices: Arc<PriceTable>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            settings,
            client,
            prices,
            call_timeout,
        }
    }

    /// Asks the judge model whether `actual` conveys the meaning of `expected`.
    /// The trace is filled whenever the call returned, even if the reply is unusable.
    pub async fn judge(&self, expected: &str, actual: &str) -> JudgeVerdict {
        let request = ChatRequest {
            model: self.settings.model.clone(),
            system: None,
            user: prompt::build_prompt(expected, actual),
            parameters: ModelParameters {
                temperature: Some(self.settings.temperature),
                max_tokens: Some(self.settings.max_tokens),
                ..Default::default()
            },
        };

        let mut trace = JudgeTrace {
            model: self.settings.model.clone(),
            ..Default::default()
        };

        let started = Instant::now();
        let response = invoke_with_timeout(
            self.client.as_ref(),
            &request,
            self.call_timeout,
            CallRole::Judge,
        )
        .await;
        trace.latency_ms = started.elapsed().as_millis() as u64;

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                return JudgeVerdict {
                    result: Err(JudgeError::Call(e)),
                    trace,
                }
            }
        };

        trace.input_tokens = response.input_tokens;
        trace.output_tokens = response.output_tokens;
        trace.cost = self.prices.estimate(
            &self.settings.model,
            response.input_tokens,
            response.output_tokens,
        );
        let reply = response.text.trim().to_string();
        trace.reply = Some(reply.clone());

        let result = parse_verdict(&reply).map(|outcome| MatchReport {
            outcome,
            details: Some(format!(
                "LLM evaluation ({}): {}",
                self.settings.model,
                reply.to_uppercase()
            )),
        });
        JudgeVerdict { result, trace }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cost::ModelRate;
    use crate::errors::CallError;
    use crate::matcher::MatchOutcome;
    use crate::providers::llm::fake::FakeClient;

    fn judge_with(client: FakeClient) -> Judge {
        let prices = PriceTable::new(ModelRate::ZERO).with_rate(
            "gpt-4o-mini",
            ModelRate {
                input_per_mtok: 1_000_000.0,
                output_per_mtok: 2_000_000.0,
            },
        );
        Judge::new(
            JudgeSettings::default(),
            Arc::new(client),
            Arc::new(prices),
            Duration::from_millis(200),
        )
    }

    #[tokio::test]
    async fn yes_reply_passes_and_is_priced() {
        let judge = judge_with(FakeClient::new("Yes.").with_usage(3, 1));
        let v = judge.judge("blue", "azure").await;
        let report = v.result.unwrap();
        assert_eq!(report.outcome, MatchOutcome::Pass);
        assert_eq!(
            report.details.as_deref(),
            Some("LLM evaluation (gpt-4o-mini): YES.")
        );
        assert_eq!(v.trace.input_tokens, 3);
        assert_eq!(v.trace.output_tokens, 1);
        assert!((v.trace.cost - 5.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn request_uses_judge_settings() {
        let client = Arc::new(FakeClient::new("NO"));
        let judge = Judge::new(
            JudgeSettings::default(),
            client.clone(),
            Arc::new(PriceTable::builtin()),
            Duration::from_secs(1),
        );
        let v = judge.judge("cat", "dog").await;
        assert_eq!(v.result.unwrap().outcome, MatchOutcome::Fail);

        let seen = client.requests();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].model, "gpt-4o-mini");
        assert_eq!(seen[0].parameters.temperature, Some(0.0));
        assert_eq!(seen[0].parameters.max_tokens, Some(10));
        assert!(seen[0].user.contains("Expected: cat"));
    }

    #[tokio::test]
    async fn unparseable_reply_is_error_but_still_accounted() {
        let judge = judge_with(FakeClient::new("Possibly").with_usage(7, 2));
        let v = judge.judge("a", "b").await;
        assert!(matches!(v.result, Err(JudgeError::Unrecognized { .. })));
        assert_eq!(v.trace.input_tokens, 7);
        assert_eq!(v.trace.reply.as_deref(), Some("Possibly"));
    }

    #[tokio::test]
    async fn stalled_judge_times_out() {
        let judge = judge_with(FakeClient::new("YES").hang_when("Expected"));
        let v = judge.judge("a", "b").await;
        assert!(matches!(
            v.result,
            Err(JudgeError::Call(CallError::Timeout { after_ms: 200 }))
        ));
    }
}
