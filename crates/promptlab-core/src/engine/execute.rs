use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::cost::PriceTable;
use crate::errors::{InvocationError, ItemError, RenderError};
use crate::matcher::Matcher;
use crate::model::{Outcome, PromptDefinition, RunResult, RunStatus, TestCase};
use crate::providers::llm::{invoke_with_timeout, CallRole, ChatRequest, ModelClient};
use crate::template::Template;

/// Read-only state shared by every worker of one run.
pub(crate) struct ItemContext {
    pub(crate) definition: PromptDefinition,
    pub(crate) prompt: Template,
    pub(crate) system: Option<Template>,
    pub(crate) models: Vec<String>,
    pub(crate) clients: Vec<Result<Arc<dyn ModelClient>, InvocationError>>,
    pub(crate) prices: Arc<PriceTable>,
    pub(crate) matcher: Matcher,
    pub(crate) call_timeout: Duration,
}

impl ItemContext {
    pub(crate) fn item_count(&self) -> usize {
        self.definition.test_cases.len() * self.models.len()
    }

    /// Slot index to (test case index, model index). Test-case major.
    fn position(&self, index: usize) -> (usize, usize) {
        (index / self.models.len(), index % self.models.len())
    }

    fn render(&self, case: &TestCase) -> Result<(Option<String>, String), RenderError> {
        let system = match &self.system {
            Some(t) => Some(t.render(&case.inputs)?),
            None => None,
        };
        Ok((system, self.prompt.render(&case.inputs)?))
    }

    fn pending(&self, case_idx: usize, model_idx: usize) -> RunResult {
        let case = &self.definition.test_cases[case_idx];
        RunResult::pending(
            case_idx,
            &self.models[model_idx],
            case,
            self.definition.effective_mode(case),
        )
    }

    /// Stand-in for a slot that never received a result.
    pub(crate) fn unfinished(&self, index: usize, status: RunStatus) -> RunResult {
        let (case_idx, model_idx) = self.position(index);
        let error = match status {
            RunStatus::Aborted => ItemError::Cancelled,
            RunStatus::Completed => ItemError::Invocation {
                message: "worker stopped before recording a result".to_string(),
            },
        };
        self.pending(case_idx, model_idx).failed(error)
    }
}

fn fail(result: RunResult, error: ItemError) -> RunResult {
    warn!(
        test_case = result.test_case_idx,
        model = result.model.as_str(),
        kind = error.kind(),
        error = %error,
        "item failed"
    );
    result.failed(error)
}

/// Render, invoke, match, price. Every failure lands on the returned result.
pub(crate) async fn execute_item(ctx: &ItemContext, index: usize) -> RunResult {
    let (case_idx, model_idx) = ctx.position(index);
    let case = &ctx.definition.test_cases[case_idx];
    let model = ctx.models[model_idx].as_str();
    let mode = ctx.definition.effective_mode(case);
    let mut result = ctx.pending(case_idx, model_idx);

    let (system, user) = match ctx.render(case) {
        Ok(rendered) => rendered,
        Err(e) => return fail(result, e.into()),
    };
    result.rendered_prompt = Some(user.clone());

    let client = match &ctx.clients[model_idx] {
        Ok(client) => client.clone(),
        Err(e) => return fail(result, e.clone().into()),
    };

    let request = ChatRequest {
        model: model.to_string(),
        system,
        user,
        parameters: ctx.definition.effective_parameters(case),
    };
    let started = Instant::now();
    let response =
        invoke_with_timeout(client.as_ref(), &request, ctx.call_timeout, CallRole::Primary).await;
    result.latency_ms = started.elapsed().as_millis() as u64;

    let response = match response {
        Ok(r) => r,
        Err(e) => return fail(result, e.into()),
    };
    result.input_tokens = response.input_tokens;
    result.output_tokens = response.output_tokens;
    result.cost = ctx
        .prices
        .estimate(model, response.input_tokens, response.output_tokens);

    let evaluation = ctx.matcher.evaluate(mode, &case.expected, &response.text).await;
    result.response = Some(response.text);

    if let Some(trace) = evaluation.judge {
        result.input_tokens += trace.input_tokens;
        result.output_tokens += trace.output_tokens;
        result.cost += trace.cost;
        result.judge = Some(trace);
    }

    match evaluation.result {
        Ok(report) => {
            result.outcome = if report.passed() {
                Outcome::Pass
            } else {
                Outcome::Fail
            };
            result.match_details = report.details;
            debug!(
                test_case = case_idx,
                model,
                mode = mode.as_str(),
                outcome = result.outcome.as_str(),
                latency_ms = result.latency_ms,
                "item finished"
            );
            result
        }
        Err(e) => fail(result, e.into()),
    }
}
