//! Response matching.
//!
//! `exact`, `contains` and `starts_with` compare trimmed, lowercased text on both sides.
//! `regex` treats `expected` as a pattern searched case-insensitively with multi-line
//! anchors. `semantic` goes through the [`Judge`](crate::judge::Judge).

use regex::RegexBuilder;

use crate::errors::{JudgeError, MatchError};
use crate::judge::Judge;
use crate::model::{JudgeTrace, MatchMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOutcome {
    Pass,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchReport {
    pub outcome: MatchOutcome,
    pub details: Option<String>,
}

impl MatchReport {
    fn from_bool(matched: bool) -> Self {
        Self {
            outcome: if matched {
                MatchOutcome::Pass
            } else {
                MatchOutcome::Fail
            },
            details: None,
        }
    }

    pub fn passed(&self) -> bool {
        self.outcome == MatchOutcome::Pass
    }
}

/// Deterministic modes only; `semantic` needs a [`Matcher`] with a judge.
pub fn evaluate(mode: MatchMode, expected: &str, actual: &str) -> Result<MatchReport, MatchError> {
    let norm = |s: &str| s.trim().to_lowercase();
    match mode {
        MatchMode::Exact => Ok(MatchReport::from_bool(norm(actual) == norm(expected))),
        MatchMode::Contains => Ok(MatchReport::from_bool(norm(actual).contains(&norm(expected)))),
        MatchMode::StartsWith => Ok(MatchReport::from_bool(
            norm(actual).starts_with(&norm(expected)),
        )),
        MatchMode::Regex => regex_search(expected, actual),
        MatchMode::Semantic => Err(MatchError::Judge(JudgeError::Unavailable {
            reason: "no judge configured".to_string(),
        })),
    }
}

fn regex_search(pattern: &str, actual: &str) -> Result<MatchReport, MatchError> {
    let re = RegexBuilder::new(pattern)
        .case_insensitive(true)
        .multi_line(true)
        .build()
        .map_err(|e| MatchError::Pattern {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })?;
    Ok(match re.find(actual) {
        Some(m) => MatchReport {
            outcome: MatchOutcome::Pass,
            details: Some(format!("Matched: '{}'", m.as_str())),
        },
        None => MatchReport {
            outcome: MatchOutcome::Fail,
            details: Some("No match found".to_string()),
        },
    })
}

/// Result of one evaluation plus the judge accounting, present whenever a judge call was made
/// (including failed ones).
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub result: Result<MatchReport, MatchError>,
    pub judge: Option<JudgeTrace>,
}

/// Dispatches every mode. Shared read-only by all workers of a run.
pub struct Matcher {
    judge: Result<Judge, JudgeError>,
}

impl Matcher {
    pub fn with_judge(judge: Judge) -> Self {
        Self { judge: Ok(judge) }
    }

    /// A matcher whose `semantic` evaluations fail with `reason`.
    pub fn without_judge(reason: impl Into<String>) -> Self {
        Self {
            judge: Err(JudgeError::Unavailable {
                reason: reason.into(),
            }),
        }
    }

    pub async fn evaluate(&self, mode: MatchMode, expected: &str, actual: &str) -> Evaluation {
        if mode != MatchMode::Semantic {
            return Evaluation {
                result: evaluate(mode, expected, actual),
                judge: None,
            };
        }
        match &self.judge {
            Ok(judge) => {
                let verdict = judge.judge(expected, actual).await;
                Evaluation {
                    result: verdict.result.map_err(MatchError::from),
                    judge: Some(verdict.trace),
                }
            }
            Err(unavailable) => Evaluation {
                result: Err(MatchError::Judge(unavailable.clone())),
                judge: None,
            },
        }
    }
}
