use serde::Serialize;

use crate::errors::ConfigError;
use crate::model::PromptDefinition;
use crate::template::Template;

/// Non-fatal finding: the affected items will fail individually at render time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Lint {
    /// 1-based, as shown to users. `None` for findings about the definition itself.
    pub test_case: Option<usize>,
    pub message: String,
}

/// A definition that passed validation, with its templates already parsed.
#[derive(Debug, Clone)]
pub struct CheckedDefinition {
    pub prompt: Template,
    pub system: Option<Template>,
    pub lints: Vec<Lint>,
}

pub fn check_definition(def: &PromptDefinition) -> Result<CheckedDefinition, ConfigError> {
    if def.name.trim().is_empty() {
        return Err(ConfigError::MissingName);
    }
    if def.prompt.trim().is_empty() {
        return Err(ConfigError::MissingTemplate(def.name.clone()));
    }
    if def.test_cases.is_empty() {
        return Err(ConfigError::NoTestCases(def.name.clone()));
    }

    let prompt = Template::parse(&def.prompt);
    let system = def.system.as_deref().map(Template::parse);
    let templates = || {
        std::iter::once(("prompt", &prompt)).chain(system.as_ref().map(|t| ("system", t)))
    };

    let mut lints = Vec::new();
    for (location, template) in templates() {
        for offset in template.literal_braces() {
            lints.push(Lint {
                test_case: None,
                message: format!(
                    "'{{{{' at byte {} of {} template is not a placeholder and is sent as \
                     literal text",
                    offset, location
                ),
            });
        }
    }
    for (idx, case) in def.test_cases.iter().enumerate() {
        for (location, template) in templates() {
            for var in template.variables() {
                if !case.inputs.contains_key(var) {
                    lints.push(Lint {
                        test_case: Some(idx + 1),
                        message: format!(
                            "missing input variable '{}' used in {} template",
                            var, location
                        ),
                    });
                }
            }
        }
    }

    Ok(CheckedDefinition {
        prompt,
        system,
        lints,
    })
}

/// Lints only, for callers that validate without running.
pub fn validate_definition(def: &PromptDefinition) -> Result<Vec<Lint>, ConfigError> {
    check_definition(def).map(|c| c.lints)
}
