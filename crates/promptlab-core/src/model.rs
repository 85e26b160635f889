use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{ConfigError, ItemError};

/// Variable name to value. Strings render raw, anything else renders as JSON text.
pub type Inputs = BTreeMap<String, serde_json::Value>;

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    #[default]
    Exact,
    Contains,
    StartsWith,
    Regex,
    Semantic,
}

impl MatchMode {
    pub const ALL: [MatchMode; 5] = [
        MatchMode::Exact,
        MatchMode::Contains,
        MatchMode::StartsWith,
        MatchMode::Regex,
        MatchMode::Semantic,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MatchMode::Exact => "exact",
            MatchMode::Contains => "contains",
            MatchMode::StartsWith => "starts_with",
            MatchMode::Regex => "regex",
            MatchMode::Semantic => "semantic",
        }
    }

    pub fn valid_names() -> String {
        Self::ALL
            .iter()
            .map(|m| m.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for MatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MatchMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| ConfigError::UnknownMatchMode {
                mode: s.to_string(),
                valid: Self::valid_names(),
            })
    }
}

/// Sampling parameters. Unset fields fall through to the provider's own defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, f64>,
}

impl ModelParameters {
    /// Field-by-field merge where `overrides` wins.
    pub fn merged_with(&self, overrides: &ModelParameters) -> ModelParameters {
        let mut extra = self.extra.clone();
        extra.extend(overrides.extra.iter().map(|(k, v)| (k.clone(), *v)));
        ModelParameters {
            temperature: overrides.temperature.or(self.temperature),
            max_tokens: overrides.max_tokens.or(self.max_tokens),
            top_p: overrides.top_p.or(self.top_p),
            extra,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.temperature.is_none()
            && self.max_tokens.is_none()
            && self.top_p.is_none()
            && self.extra.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    #[serde(default)]
    pub inputs: Inputs,
    pub expected: String,
    /// Overrides the definition-level mode for this case only.
    #[serde(default, rename = "match", skip_serializing_if = "Option::is_none")]
    pub match_mode: Option<MatchMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<ModelParameters>,
}

impl TestCase {
    pub fn new(expected: impl Into<String>) -> Self {
        Self {
            expected: expected.into(),
            ..Self::default()
        }
    }

    pub fn with_input(
        mut self,
        name: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.inputs.insert(name.into(), value.into());
        self
    }

    pub fn with_mode(mut self, mode: MatchMode) -> Self {
        self.match_mode = Some(mode);
        self
    }

    pub fn with_parameters(mut self, parameters: ModelParameters) -> Self {
        self.parameters = Some(parameters);
        self
    }
}

/// A named prompt template plus its test cases. Read-only during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default, rename = "match")]
    pub match_mode: MatchMode,
    #[serde(default, skip_serializing_if = "ModelParameters::is_empty")]
    pub parameters: ModelParameters,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub prompt: String,
    #[serde(default)]
    pub test_cases: Vec<TestCase>,
}

impl PromptDefinition {
    pub fn new(name: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            model: default_model(),
            match_mode: MatchMode::default(),
            parameters: ModelParameters::default(),
            system: None,
            prompt: prompt.into(),
            test_cases: Vec::new(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_mode(mut self, mode: MatchMode) -> Self {
        self.match_mode = mode;
        self
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_parameters(mut self, parameters: ModelParameters) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_case(mut self, case: TestCase) -> Self {
        self.test_cases.push(case);
        self
    }

    pub fn effective_mode(&self, case: &TestCase) -> MatchMode {
        case.match_mode.unwrap_or(self.match_mode)
    }

    pub fn effective_parameters(&self, case: &TestCase) -> ModelParameters {
        match &case.parameters {
            Some(overrides) => self.parameters.merged_with(overrides),
            None => self.parameters.clone(),
        }
    }

    pub fn uses_semantic(&self) -> bool {
        self.test_cases
            .iter()
            .any(|c| self.effective_mode(c) == MatchMode::Semantic)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Pass,
    Fail,
    Error,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Pass => "pass",
            Outcome::Fail => "fail",
            Outcome::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pass" => Some(Outcome::Pass),
            "fail" => Some(Outcome::Fail),
            "error" => Some(Outcome::Error),
            _ => None,
        }
    }
}

/// Accounting for the secondary judge call of a semantic match.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JudgeTrace {
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply: Option<String>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: f64,
    pub latency_ms: u64,
}

/// Outcome of one (test case, model) execution.
///
/// `input_tokens`, `output_tokens` and `cost` include the judge call when one was made;
/// `judge` keeps the judge's share separately.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub test_case_idx: usize,
    pub model: String,
    pub inputs: Inputs,
    pub rendered_prompt: Option<String>,
    pub expected: String,
    pub response: Option<String>,
    pub match_mode: MatchMode,
    pub outcome: Outcome,
    pub match_details: Option<String>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: f64,
    pub latency_ms: u64,
    pub error: Option<ItemError>,
    pub judge: Option<JudgeTrace>,
}

impl RunResult {
    /// Blank result for a slot; the caller fills in whatever stages ran.
    pub fn pending(test_case_idx: usize, model: &str, case: &TestCase, mode: MatchMode) -> Self {
        Self {
            test_case_idx,
            model: model.to_string(),
            inputs: case.inputs.clone(),
            rendered_prompt: None,
            expected: case.expected.clone(),
            response: None,
            match_mode: mode,
            outcome: Outcome::Error,
            match_details: None,
            input_tokens: 0,
            output_tokens: 0,
            cost: 0.0,
            latency_ms: 0,
            error: None,
            judge: None,
        }
    }

    pub fn failed(mut self, error: ItemError) -> Self {
        self.outcome = Outcome::Error;
        self.error = Some(error);
        self
    }

    pub fn passed(&self) -> bool {
        self.outcome == Outcome::Pass
    }

    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunTotals {
    pub results: usize,
    pub matches: usize,
    pub errors: usize,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: f64,
}

impl RunTotals {
    pub fn from_results(results: &[RunResult]) -> Self {
        results.iter().fold(Self::default(), |mut acc, r| {
            acc.results += 1;
            if r.passed() {
                acc.matches += 1;
            }
            if r.outcome == Outcome::Error {
                acc.errors += 1;
            }
            acc.input_tokens += r.input_tokens;
            acc.output_tokens += r.output_tokens;
            acc.cost += r.cost;
            acc
        })
    }

    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    /// Matches as a fraction of results, 0.0 for an empty run.
    pub fn match_rate(&self) -> f64 {
        if self.results == 0 {
            0.0
        } else {
            self.matches as f64 / self.results as f64
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Aborted,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Completed => "completed",
            RunStatus::Aborted => "aborted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "completed" => Some(RunStatus::Completed),
            "aborted" => Some(RunStatus::Aborted),
            _ => None,
        }
    }
}

/// Sortable, collision-resistant run id: `20240131T094501123Z-1a2b3c4d`.
pub fn new_run_id(now: DateTime<Utc>) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", now.format("%Y%m%dT%H%M%S%3fZ"), &suffix[..8])
}

/// A run that has started but not yet been sealed. Only sealed runs reach the store.
/// Timestamps are kept at millisecond precision, the precision the store persists.
#[derive(Debug, Clone)]
pub struct RunDraft {
    id: String,
    definition_name: String,
    definition_hash: String,
    models: Vec<String>,
    created_at: DateTime<Utc>,
}

impl RunDraft {
    pub fn new(
        definition_name: impl Into<String>,
        definition_hash: impl Into<String>,
        models: Vec<String>,
    ) -> Self {
        let created_at = Utc::now().trunc_subsecs(3);
        Self {
            id: new_run_id(created_at),
            definition_name: definition_name.into(),
            definition_hash: definition_hash.into(),
            models,
            created_at,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn seal(self, results: Vec<RunResult>, status: RunStatus) -> Run {
        let totals = RunTotals::from_results(&results);
        Run {
            id: self.id,
            definition_name: self.definition_name,
            definition_hash: self.definition_hash,
            models: self.models,
            created_at: self.created_at,
            finished_at: Utc::now().trunc_subsecs(3),
            status,
            totals,
            results,
        }
    }
}

/// A sealed run. Immutable: totals always agree with `results`, including after
/// deserialization, where any serialized totals are recomputed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "SealedRun")]
pub struct Run {
    id: String,
    definition_name: String,
    definition_hash: String,
    models: Vec<String>,
    created_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    status: RunStatus,
    totals: RunTotals,
    results: Vec<RunResult>,
}

#[derive(Deserialize)]
struct SealedRun {
    id: String,
    definition_name: String,
    definition_hash: String,
    models: Vec<String>,
    created_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    status: RunStatus,
    results: Vec<RunResult>,
}

impl From<SealedRun> for Run {
    fn from(raw: SealedRun) -> Self {
        Run {
            totals: RunTotals::from_results(&raw.results),
            id: raw.id,
            definition_name: raw.definition_name,
            definition_hash: raw.definition_hash,
            models: raw.models,
            created_at: raw.created_at,
            finished_at: raw.finished_at,
            status: raw.status,
            results: raw.results,
        }
    }
}

impl Run {
    /// Rebuilds a sealed run from persisted parts.
    pub(crate) fn restore(
        summary: RunSummary,
        finished_at: DateTime<Utc>,
        results: Vec<RunResult>,
    ) -> Self {
        let totals = RunTotals::from_results(&results);
        Run {
            id: summary.id,
            definition_name: summary.definition_name,
            definition_hash: summary.definition_hash,
            models: summary.models,
            created_at: summary.created_at,
            finished_at,
            status: summary.status,
            totals,
            results,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn definition_name(&self) -> &str {
        &self.definition_name
    }

    pub fn definition_hash(&self) -> &str {
        &self.definition_hash
    }

    pub fn models(&self) -> &[String] {
        &self.models
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn finished_at(&self) -> DateTime<Utc> {
        self.finished_at
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn totals(&self) -> &RunTotals {
        &self.totals
    }

    pub fn results(&self) -> &[RunResult] {
        &self.results
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            id: self.id.clone(),
            definition_name: self.definition_name.clone(),
            definition_hash: self.definition_hash.clone(),
            models: self.models.clone(),
            created_at: self.created_at,
            status: self.status,
            totals: self.totals.clone(),
        }
    }
}

/// Listing view of a stored run, without its results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub id: String,
    pub definition_name: String,
    pub definition_hash: String,
    pub models: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub status: RunStatus,
    pub totals: RunTotals,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn match_mode_parse_lists_valid_modes() {
        assert_eq!("starts_with".parse::<MatchMode>().unwrap(), MatchMode::StartsWith);
        let err = "fuzzy".parse::<MatchMode>().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("fuzzy"));
        assert!(msg.contains("exact, contains, starts_with, regex, semantic"), "{msg}");
    }

    #[test]
    fn case_parameters_override_field_by_field() {
        let def = PromptDefinition::new("p", "hi").with_parameters(ModelParameters {
            temperature: Some(0.2),
            max_tokens: Some(100),
            ..Default::default()
        });
        let case = TestCase::new("x").with_parameters(ModelParameters {
            max_tokens: Some(5),
            extra: BTreeMap::from([("presence_penalty".to_string(), 0.5)]),
            ..Default::default()
        });
        let p = def.effective_parameters(&case);
        assert_eq!(p.temperature, Some(0.2));
        assert_eq!(p.max_tokens, Some(5));
        assert_eq!(p.extra.get("presence_penalty"), Some(&0.5));
    }

    #[test]
    fn case_mode_overrides_definition_mode() {
        let def = PromptDefinition::new("p", "hi").with_mode(MatchMode::Contains);
        assert_eq!(def.effective_mode(&TestCase::new("a")), MatchMode::Contains);
        assert_eq!(
            def.effective_mode(&TestCase::new("a").with_mode(MatchMode::Regex)),
            MatchMode::Regex
        );
    }

    #[test]
    fn run_id_is_sortable_by_creation_time() {
        let early = DateTime::parse_from_rfc3339("2024-01-31T09:45:01.123Z")
            .unwrap()
            .with_timezone(&Utc);
        let late = early + chrono::Duration::milliseconds(1);
        let a = new_run_id(early);
        let b = new_run_id(late);
        assert!(a.starts_with("20240131T094501123Z-"), "{a}");
        assert_eq!(a.len(), "20240131T094501123Z-".len() + 8);
        assert!(a < b);
        assert_ne!(new_run_id(early), new_run_id(early));
    }

    #[test]
    fn sealed_totals_agree_with_results() {
        let case = TestCase::new("ok");
        let mut pass = RunResult::pending(0, "m", &case, MatchMode::Exact);
        pass.outcome = Outcome::Pass;
        pass.input_tokens = 10;
        pass.output_tokens = 2;
        pass.cost = 0.5;
        let err = RunResult::pending(1, "m", &case, MatchMode::Exact).failed(ItemError::Cancelled);

        let run =
            RunDraft::new("p", "h", vec!["m".into()]).seal(vec![pass, err], RunStatus::Aborted);
        let t = run.totals();
        assert_eq!(t.results, 2);
        assert_eq!(t.matches, 1);
        assert_eq!(t.errors, 1);
        assert_eq!(t.total_tokens(), 12);
        assert!((t.match_rate() - 0.5).abs() < f64::EPSILON);
        assert_eq!(run.status(), RunStatus::Aborted);
        assert!(run.finished_at() >= run.created_at());
    }

    #[test]
    fn definition_deserializes_match_key() {
        let json = serde_json::json!({
            "name": "greet",
            "prompt": "Say hi to {{name}}",
            "match": "contains",
            "test_cases": [
                {"inputs": {"name": "Ada"}, "expected": "Ada", "match": "exact"}
            ]
        });
        let def: PromptDefinition = serde_json::from_value(json).unwrap();
        assert_eq!(def.model, DEFAULT_MODEL);
        assert_eq!(def.match_mode, MatchMode::Contains);
        assert_eq!(def.test_cases[0].match_mode, Some(MatchMode::Exact));
    }

    #[test]
    fn deserialized_run_recomputes_its_totals() {
        let case = TestCase::new("Paris");
        let mut hit = RunResult::pending(0, "m1", &case, MatchMode::Exact);
        hit.outcome = Outcome::Pass;
        let miss = RunResult::pending(0, "m2", &case, MatchMode::Exact);
        let run = RunDraft::new("capitals", "0123456789abcdef", vec!["m1".into(), "m2".into()])
            .seal(vec![hit, miss], RunStatus::Completed);

        let mut json = serde_json::to_value(&run).unwrap();
        json["totals"]["matches"] = serde_json::json!(99);
        json["totals"]["results"] = serde_json::json!(0);
        let back: Run = serde_json::from_value(json).unwrap();

        assert_eq!(back.totals().results, 2);
        assert_eq!(back.totals().matches, 1);
        assert_eq!(back, run);
    }
}
