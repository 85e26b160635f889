use sha2::{Digest, Sha256};

use crate::model::PromptDefinition;

pub fn sha256_hex(s: &str) -> String {
    let mut h = Sha256::new();
    h.update(s.as_bytes());
    hex::encode(h.finalize())
}

/// Short stable hash of everything that shapes a run's results: templates, match modes,
/// parameters, test cases and the model list. Descriptions do not count.
///
/// Map-valued fields are `BTreeMap`s, so their JSON is key-sorted and stable.
pub fn definition_hash(def: &PromptDefinition, models: &[String]) -> String {
    let mut parts = Vec::new();
    parts.push(format!("name={}", def.name));
    parts.push(format!("prompt={}", def.prompt));
    parts.push(format!("system={}", def.system.as_deref().unwrap_or("")));
    parts.push(format!("match={}", def.match_mode));
    parts.push(format!(
        "parameters={}",
        serde_json::to_string(&def.parameters).unwrap_or_default()
    ));
    parts.push(format!("models={}", models.join(",")));
    for (i, case) in def.test_cases.iter().enumerate() {
        parts.push(format!(
            "case{}={}",
            i,
            serde_json::to_string(case).unwrap_or_default()
        ));
    }

    let digest = sha256_hex(&parts.join("\n"));
    digest[..16].to_string()
}
