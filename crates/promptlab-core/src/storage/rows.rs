//! Conversions between sealed runs and table rows.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Row;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::errors::StoreError;
use crate::model::{MatchMode, Outcome, RunResult, RunStatus, RunSummary, RunTotals};

pub(crate) const RUN_COLUMNS: &str = "id, created_at, finished_at, definition_name, \
     definition_hash, models_json, status, result_count, match_count, error_count, \
     input_tokens, output_tokens, total_cost";

pub(crate) const RESULT_COLUMNS: &str = "slot, test_case_idx, model, inputs_json, \
     rendered_prompt, expected, response, match_mode, outcome, match_details, input_tokens, \
     output_tokens, cost, latency_ms, error_json, judge_json";

pub(crate) fn timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(run_id: &str, raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| corrupt(run_id, format!("bad timestamp '{}': {}", raw, e)))
}

fn corrupt(run_id: &str, detail: impl Into<String>) -> StoreError {
    StoreError::Corrupt {
        run_id: run_id.to_string(),
        detail: detail.into(),
    }
}

pub(crate) fn to_json<T: Serialize>(run_id: &str, value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|e| corrupt(run_id, e.to_string()))
}

fn from_json<T: DeserializeOwned>(run_id: &str, column: &str, raw: &str) -> Result<T, StoreError> {
    serde_json::from_str(raw).map_err(|e| corrupt(run_id, format!("{}: {}", column, e)))
}

fn opt_json<T: DeserializeOwned>(
    run_id: &str,
    column: &str,
    raw: Option<String>,
) -> Result<Option<T>, StoreError> {
    match raw {
        Some(s) if !s.trim().is_empty() => from_json(run_id, column, &s).map(Some),
        _ => Ok(None),
    }
}

/// Raw `runs` row, decoded in a second step so JSON and enum failures map to `Corrupt`.
pub(crate) struct RunRow {
    id: String,
    created_at: String,
    finished_at: String,
    definition_name: String,
    definition_hash: String,
    models_json: String,
    status: String,
    result_count: i64,
    match_count: i64,
    error_count: i64,
    input_tokens: i64,
    output_tokens: i64,
    total_cost: f64,
}

impl RunRow {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            created_at: row.get(1)?,
            finished_at: row.get(2)?,
            definition_name: row.get(3)?,
            definition_hash: row.get(4)?,
            models_json: row.get(5)?,
            status: row.get(6)?,
            result_count: row.get(7)?,
            match_count: row.get(8)?,
            error_count: row.get(9)?,
            input_tokens: row.get(10)?,
            output_tokens: row.get(11)?,
            total_cost: row.get(12)?,
        })
    }

    pub(crate) fn into_summary(self) -> Result<(RunSummary, DateTime<Utc>), StoreError> {
        let id = self.id;
        let status = RunStatus::parse(&self.status)
            .ok_or_else(|| corrupt(&id, format!("unknown status '{}'", self.status)))?;
        let created_at = parse_timestamp(&id, &self.created_at)?;
        let finished_at = parse_timestamp(&id, &self.finished_at)?;
        let models: Vec<String> = from_json(&id, "models_json", &self.models_json)?;
        let totals = RunTotals {
            results: self.result_count as usize,
            matches: self.match_count as usize,
            errors: self.error_count as usize,
            input_tokens: self.input_tokens as u64,
            output_tokens: self.output_tokens as u64,
            cost: self.total_cost,
        };
        Ok((
            RunSummary {
                id,
                definition_name: self.definition_name,
                definition_hash: self.definition_hash,
                models,
                created_at,
                status,
                totals,
            },
            finished_at,
        ))
    }
}

pub(crate) struct ResultRow {
    pub(crate) slot: i64,
    pub(crate) test_case_idx: i64,
    pub(crate) model: String,
    pub(crate) inputs_json: String,
    pub(crate) rendered_prompt: Option<String>,
    pub(crate) expected: String,
    pub(crate) response: Option<String>,
    pub(crate) match_mode: String,
    pub(crate) outcome: String,
    pub(crate) match_details: Option<String>,
    pub(crate) input_tokens: i64,
    pub(crate) output_tokens: i64,
    pub(crate) cost: f64,
    pub(crate) latency_ms: i64,
    pub(crate) error_json: Option<String>,
    pub(crate) judge_json: Option<String>,
}

impl ResultRow {
    pub(crate) fn from_result(
        run_id: &str,
        slot: usize,
        r: &RunResult,
    ) -> Result<Self, StoreError> {
        Ok(Self {
            slot: slot as i64,
            test_case_idx: r.test_case_idx as i64,
            model: r.model.clone(),
            inputs_json: to_json(run_id, &r.inputs)?,
            rendered_prompt: r.rendered_prompt.clone(),
            expected: r.expected.clone(),
            response: r.response.clone(),
            match_mode: r.match_mode.as_str().to_string(),
            outcome: r.outcome.as_str().to_string(),
            match_details: r.match_details.clone(),
            input_tokens: r.input_tokens as i64,
            output_tokens: r.output_tokens as i64,
            cost: r.cost,
            latency_ms: r.latency_ms as i64,
            error_json: r.error.as_ref().map(|e| to_json(run_id, e)).transpose()?,
            judge_json: r.judge.as_ref().map(|j| to_json(run_id, j)).transpose()?,
        })
    }

    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            slot: row.get(0)?,
            test_case_idx: row.get(1)?,
            model: row.get(2)?,
            inputs_json: row.get(3)?,
            rendered_prompt: row.get(4)?,
            expected: row.get(5)?,
            response: row.get(6)?,
            match_mode: row.get(7)?,
            outcome: row.get(8)?,
            match_details: row.get(9)?,
            input_tokens: row.get(10)?,
            output_tokens: row.get(11)?,
            cost: row.get(12)?,
            latency_ms: row.get(13)?,
            error_json: row.get(14)?,
            judge_json: row.get(15)?,
        })
    }

    pub(crate) fn into_result(self, run_id: &str) -> Result<RunResult, StoreError> {
        let match_mode: MatchMode = self
            .match_mode
            .parse()
            .map_err(|_| corrupt(run_id, format!("unknown match mode '{}'", self.match_mode)))?;
        let outcome = Outcome::parse(&self.outcome)
            .ok_or_else(|| corrupt(run_id, format!("unknown outcome '{}'", self.outcome)))?;
        Ok(RunResult {
            test_case_idx: self.test_case_idx as usize,
            model: self.model,
            inputs: from_json(run_id, "inputs_json", &self.inputs_json)?,
            rendered_prompt: self.rendered_prompt,
            expected: self.expected,
            response: self.response,
            match_mode,
            outcome,
            match_details: self.match_details,
            input_tokens: self.input_tokens as u64,
            output_tokens: self.output_tokens as u64,
            cost: self.cost,
            latency_ms: self.latency_ms as u64,
            error: opt_json(run_id, "error_json", self.error_json)?,
            judge: opt_json(run_id, "judge_json", self.judge_json)?,
        })
    }
}
