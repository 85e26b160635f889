use crate::errors::JudgeError;
use crate::matcher::MatchOutcome;

/// Reduces a judge reply to pass/fail. Only the first word counts, after trimming quotes
/// and punctuation and uppercasing.
pub fn parse_verdict(reply: &str) -> Result<MatchOutcome, JudgeError> {
    let word: String = reply
        .split_whitespace()
        .next()
        .unwrap_or("")
        .trim_matches(|c: char| !c.is_alphanumeric())
        .to_uppercase();

    match word.as_str() {
        "YES" | "Y" | "TRUE" | "PASS" => Ok(MatchOutcome::Pass),
        "NO" | "N" | "FALSE" | "FAIL" => Ok(MatchOutcome::Fail),
        _ => Err(JudgeError::Unrecognized {
            reply: reply.trim().to_string(),
        }),
    }
}
