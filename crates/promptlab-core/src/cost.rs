//! Token pricing. Advisory only: an unknown model is priced at the default rate.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// USD per one million tokens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelRate {
    pub input_per_mtok: f64,
    pub output_per_mtok: f64,
}

impl ModelRate {
    pub const ZERO: ModelRate = ModelRate {
        input_per_mtok: 0.0,
        output_per_mtok: 0.0,
    };

    pub const fn new(input_per_mtok: f64, output_per_mtok: f64) -> Self {
        Self {
            input_per_mtok,
            output_per_mtok,
        }
    }

    pub fn cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        (input_tokens as f64 * self.input_per_mtok + output_tokens as f64 * self.output_per_mtok)
            / 1_000_000.0
    }
}

impl Default for ModelRate {
    fn default() -> Self {
        Self::ZERO
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceTable {
    #[serde(default)]
    pub default: ModelRate,
    #[serde(default)]
    pub models: BTreeMap<String, ModelRate>,
}

impl PriceTable {
    pub fn new(default: ModelRate) -> Self {
        Self {
            default,
            models: BTreeMap::new(),
        }
    }

    /// A few well-known models, unknown ones free.
    pub fn builtin() -> Self {
        Self::new(ModelRate::ZERO)
            .with_rate("gpt-4o", ModelRate::new(2.50, 10.00))
            .with_rate("gpt-4o-mini", ModelRate::new(0.15, 0.60))
            .with_rate("gpt-4.1", ModelRate::new(2.00, 8.00))
            .with_rate("gpt-4.1-mini", ModelRate::new(0.40, 1.60))
            .with_rate("claude-3-5-sonnet", ModelRate::new(3.00, 15.00))
            .with_rate("claude-3-5-haiku", ModelRate::new(0.80, 4.00))
    }

    pub fn with_rate(mut self, model: impl Into<String>, rate: ModelRate) -> Self {
        self.models.insert(model.into(), rate);
        self
    }

    /// Lookup order: exact id, id without a `provider/` prefix, longest table key the id
    /// starts with (dated snapshots such as `gpt-4o-2024-08-06`), then the default.
    pub fn rate_for(&self, model: &str) -> ModelRate {
        if let Some(rate) = self.models.get(model) {
            return *rate;
        }
        let bare = model.split_once('/').map_or(model, |(_, rest)| rest);
        if let Some(rate) = self.models.get(bare) {
            return *rate;
        }
        let prefixed = self
            .models
            .iter()
            .filter(|(key, _)| bare.starts_with(key.as_str()))
            .max_by_key(|(key, _)| key.len());
        match prefixed {
            Some((_, rate)) => *rate,
            None => {
                debug!(model, "no price entry, using default rate");
                self.default
            }
        }
    }

    pub fn estimate(&self, model: &str, input_tokens: u64, output_tokens: u64) -> f64 {
        self.rate_for(model).cost(input_tokens, output_tokens)
    }
}
