//! `{{ variable }}` substitution.
//!
//! Grammar: a placeholder opens with `{{`, holds one identifier (letters, digits, `_`)
//! optionally padded with whitespace, and closes with `}}`. Everything else is literal,
//! including a `{{` that does not open a placeholder (`{{"label": "x"}}`, `{{}}`, an
//! unterminated `{{name`). Substitution is single-pass; a substituted value is never re-scanned.

use std::borrow::Cow;

use crate::errors::RenderError;
use crate::model::Inputs;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Var(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    segments: Vec<Segment>,
    literal_braces: Vec<usize>,
}

impl Template {
    pub fn parse(source: &str) -> Self {
        let mut segments = Vec::new();
        let mut literal_braces: Vec<usize> = Vec::new();
        let mut literal = String::new();
        let mut last_stray: Option<usize> = None;
        let mut pos = 0;

        while let Some(found) = source[pos..].find("{{") {
            let start = pos + found;
            literal.push_str(&source[pos..start]);

            let body = &source[start + 2..];
            let var = body
                .find("}}")
                .map(|end| (end, body[..end].trim()))
                .filter(|(_, name)| is_identifier(name));
            match var {
                Some((end, name)) => {
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Var(name.to_string()));
                    pos = start + 2 + end + 2;
                }
                None => {
                    // A run of braces is reported once, at its first `{{`.
                    if last_stray.map_or(true, |last| last + 1 != start) {
                        literal_braces.push(start);
                    }
                    last_stray = Some(start);
                    literal.push('{');
                    pos = start + 1;
                }
            }
        }
        literal.push_str(&source[pos..]);
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }
        Self {
            segments,
            literal_braces,
        }
    }

    /// Byte offsets of `{{` sequences that did not open a placeholder and stay literal.
    pub fn literal_braces(&self) -> &[usize] {
        &self.literal_braces
    }

    /// Referenced variable names, first occurrence order, without repeats.
    pub fn variables(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::new();
        for seg in &self.segments {
            if let Segment::Var(name) = seg {
                if !seen.contains(&name.as_str()) {
                    seen.push(name);
                }
            }
        }
        seen
    }

    pub fn render(&self, inputs: &Inputs) -> Result<String, RenderError> {
        let mut out = String::new();
        for seg in &self.segments {
            match seg {
                Segment::Literal(text) => out.push_str(text),
                Segment::Var(name) => {
                    let value = inputs
                        .get(name)
                        .ok_or_else(|| RenderError::MissingVariable { name: name.clone() })?;
                    out.push_str(&value_text(value));
                }
            }
        }
        Ok(out)
    }
}

/// Parse and render in one step.
pub fn render(source: &str, inputs: &Inputs) -> Result<String, RenderError> {
    Template::parse(source).render(inputs)
}

fn is_identifier(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_alphanumeric() || c == '_')
}

fn value_text(value: &serde_json::Value) -> Cow<'_, str> {
    match value {
        serde_json::Value::String(s) => Cow::Borrowed(s),
        other => Cow::Owned(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn inputs(pairs: &[(&str, serde_json::Value)]) -> Inputs {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn renders_variables_and_whitespace_forms() {
        let vars = inputs(&[("text", json!("Hello")), ("lang", json!("French"))]);
        assert_eq!(
            render("Translate {{text}} to {{ lang }}", &vars).unwrap(),
            "Translate Hello to French"
        );
    }

    #[test]
    fn missing_variable_names_the_variable() {
        let vars = inputs(&[("text", json!("Hello"))]);
        let err = render("Translate {{text}} to {{lang}}", &vars).unwrap_err();
        assert_eq!(
            err,
            RenderError::MissingVariable {
                name: "lang".into()
            }
        );
    }

    #[test]
    fn no_placeholders_is_identity() {
        let src = "plain text with { single } braces";
        assert_eq!(render(src, &Inputs::new()).unwrap(), src);
    }

    #[test]
    fn non_string_values_render_as_json() {
        let vars = inputs(&[("n", json!(3)), ("flag", json!(true)), ("list", json!([1, 2]))]);
        assert_eq!(render("{{n}} {{flag}} {{list}}", &vars).unwrap(), "3 true [1,2]");
    }

    #[test]
    fn substituted_values_are_not_rescanned() {
        let vars = inputs(&[("a", json!("{{b}}")), ("b", json!("nope"))]);
        assert_eq!(render("x {{a}} y", &vars).unwrap(), "x {{b}} y");
    }

    #[test]
    fn repeated_variables_are_listed_once() {
        let t = Template::parse("{{a}} {{ b }} {{a}}");
        assert_eq!(t.variables(), vec!["a", "b"]);
    }

    #[test]
    fn braces_that_are_not_placeholders_stay_literal() {
        let vars = inputs(&[("text", json!("great film"))]);
        assert_eq!(
            render(r#"Classify {{text}}. Reply as JSON like {{"label": "x"}}"#, &vars).unwrap(),
            r#"Classify great film. Reply as JSON like {{"label": "x"}}"#
        );
        assert_eq!(render("hello {{name", &vars).unwrap(), "hello {{name");
        assert_eq!(render("{{}} and {{ two words }}", &vars).unwrap(), "{{}} and {{ two words }}");
    }

    #[test]
    fn literal_braces_are_located() {
        let t = Template::parse(r#"Classify {{text}} as {{"label": "x"}} or {{"#);
        assert_eq!(t.variables(), vec!["text"]);
        assert_eq!(t.literal_braces(), &[21, 41]);
        assert!(Template::parse("{{a}} {{ b }}").literal_braces().is_empty());
    }

    #[test]
    fn innermost_placeholder_in_a_brace_run_still_substitutes() {
        let vars = inputs(&[("x", json!("1"))]);
        let t = Template::parse("{{{x}}}");
        assert_eq!(t.literal_braces(), &[0]);
        assert_eq!(t.render(&vars).unwrap(), "{1}");
    }
}
