use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use super::execute::{execute_item, ItemContext};
use super::slots::ResultSlots;
use crate::cost::PriceTable;
use crate::errors::{ConfigError, EngineError};
use crate::fingerprint::definition_hash;
use crate::judge::{Judge, JudgeSettings};
use crate::matcher::Matcher;
use crate::model::{PromptDefinition, Run, RunDraft, RunStatus};
use crate::providers::llm::ProviderRouter;
use crate::storage::Store;
use crate::validate::check_definition;

pub const DEFAULT_CONCURRENCY: usize = 3;
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSettings {
    /// Upper bound on model calls in flight at once.
    pub concurrency: usize,
    /// Per-call ceiling, applied to primary and judge calls alike.
    pub call_timeout: Duration,
    /// Wall-clock ceiling for the whole run.
    pub run_timeout: Option<Duration>,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            run_timeout: None,
        }
    }
}

impl RunSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::InvalidSettings(
                "concurrency must be at least 1".into(),
            ));
        }
        if self.call_timeout.is_zero() {
            return Err(ConfigError::InvalidSettings(
                "call timeout must be positive".into(),
            ));
        }
        if self.run_timeout.is_some_and(|d| d.is_zero()) {
            return Err(ConfigError::InvalidSettings(
                "run timeout must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct Runner {
    router: Arc<ProviderRouter>,
    prices: Arc<PriceTable>,
    judge: JudgeSettings,
    settings: RunSettings,
}

impl Runner {
    pub fn new(router: ProviderRouter) -> Self {
        Self {
            router: Arc::new(router),
            prices: Arc::new(PriceTable::builtin()),
            judge: JudgeSettings::default(),
            settings: RunSettings::default(),
        }
    }

    pub fn with_prices(mut self, prices: PriceTable) -> Self {
        self.prices = Arc::new(prices);
        self
    }

    pub fn with_settings(mut self, settings: RunSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_judge(mut self, judge: JudgeSettings) -> Self {
        self.judge = judge;
        self
    }

    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    pub async fn run(
        &self,
        definition: &PromptDefinition,
        models: &[String],
    ) -> Result<Run, EngineError> {
        self.run_until(definition, models, std::future::pending::<()>())
            .await
    }

    /// Like [`Runner::run`], but `cancel` completing aborts the run. An aborted run is still
    /// sealed and returned, with unfinished slots marked cancelled.
    pub async fn run_until<F>(
        &self,
        definition: &PromptDefinition,
        models: &[String],
        cancel: F,
    ) -> Result<Run, EngineError>
    where
        F: Future<Output = ()>,
    {
        self.settings.validate()?;
        let checked = check_definition(definition)?;
        for lint in &checked.lints {
            warn!(
                definition = definition.name.as_str(),
                test_case = lint.test_case,
                "{}",
                lint.message
            );
        }

        let models = normalize_models(definition, models)?;
        let clients: Vec<_> = models.iter().map(|m| self.router.resolve(m)).collect();
        if clients.iter().all(Result::is_err) {
            return Err(EngineError::NoRunnableModels { models });
        }
        for (model, client) in models.iter().zip(&clients) {
            if let Err(e) = client {
                warn!(model = model.as_str(), error = %e, "model cannot be served");
            }
        }

        let draft = RunDraft::new(
            definition.name.clone(),
            definition_hash(definition, &models),
            models.clone(),
        );
        let ctx = Arc::new(ItemContext {
            definition: definition.clone(),
            prompt: checked.prompt,
            system: checked.system,
            matcher: self.matcher_for(definition),
            models,
            clients,
            prices: self.prices.clone(),
            call_timeout: self.settings.call_timeout,
        });

        let total = ctx.item_count();
        let parallel = self.settings.concurrency.min(total).max(1);
        info!(
            run_id = draft.id(),
            definition = definition.name.as_str(),
            models = ?ctx.models,
            items = total,
            concurrency = parallel,
            "starting run"
        );

        let slots = Arc::new(ResultSlots::new(total));
        let sem = Arc::new(Semaphore::new(parallel));
        let mut join_set = JoinSet::new();

        let run_timeout = self.settings.run_timeout;
        let status = {
            let work = schedule(&ctx, &slots, &sem, &mut join_set);
            let ceiling = async {
                match run_timeout {
                    Some(limit) => tokio::time::sleep(limit).await,
                    None => std::future::pending::<()>().await,
                }
            };
            tokio::select! {
                () = work => RunStatus::Completed,
                () = ceiling => {
                    warn!(run_id = draft.id(), "run ceiling reached, aborting remaining items");
                    RunStatus::Aborted
                }
                () = cancel => {
                    warn!(run_id = draft.id(), "run cancelled");
                    RunStatus::Aborted
                }
            }
        };
        join_set.shutdown().await;

        let results = slots.take(|index| ctx.unfinished(index, status));
        let run = draft.seal(results, status);
        let totals = run.totals();
        info!(
            run_id = run.id(),
            status = status.as_str(),
            results = totals.results,
            matches = totals.matches,
            errors = totals.errors,
            tokens = totals.total_tokens(),
            cost = totals.cost,
            "run sealed"
        );
        Ok(run)
    }

    /// Runs and persists. The run is saved whether it completed or was aborted.
    pub async fn run_and_save(
        &self,
        store: &Store,
        definition: &PromptDefinition,
        models: &[String],
    ) -> Result<Run, EngineError> {
        let run = self.run(definition, models).await?;
        store.save(&run)?;
        Ok(run)
    }

    fn matcher_for(&self, definition: &PromptDefinition) -> Matcher {
        if !definition.uses_semantic() {
            return Matcher::without_judge("definition has no semantic test cases");
        }
        match self.router.resolve(&self.judge.model) {
            Ok(client) => Matcher::with_judge(Judge::new(
                self.judge.clone(),
                client,
                self.prices.clone(),
                self.settings.call_timeout,
            )),
            Err(e) => {
                warn!(
                    judge_model = self.judge.model.as_str(),
                    error = %e,
                    "semantic judge unavailable"
                );
                Matcher::without_judge(e.to_string())
            }
        }
    }
}

async fn schedule(
    ctx: &Arc<ItemContext>,
    slots: &Arc<ResultSlots>,
    sem: &Arc<Semaphore>,
    join_set: &mut JoinSet<()>,
) {
    for index in 0..ctx.item_count() {
        let Ok(permit) = sem.clone().acquire_owned().await else {
            break;
        };
        let ctx = ctx.clone();
        let slots = slots.clone();
        join_set.spawn(async move {
            let _permit = permit;
            let result = execute_item(&ctx, index).await;
            slots.fill(index, result);
        });
    }
    while let Some(joined) = join_set.join_next().await {
        if let Err(e) = joined {
            warn!(error = %e, "worker task failed");
        }
    }
}

/// Empty means the definition's default model. Blank ids are skipped, repeats collapsed.
fn normalize_models(
    definition: &PromptDefinition,
    requested: &[String],
) -> Result<Vec<String>, ConfigError> {
    let source: Vec<&str> = if requested.is_empty() {
        vec![definition.model.as_str()]
    } else {
        requested.iter().map(String::as_str).collect()
    };
    let mut models: Vec<String> = Vec::new();
    for m in source.into_iter().map(str::trim).filter(|m| !m.is_empty()) {
        if !models.iter().any(|seen| seen == m) {
            models.push(m.to_string());
        }
    }
    if models.is_empty() {
        return Err(ConfigError::NoModels(definition.name.clone()));
    }
    Ok(models)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def() -> PromptDefinition {
        PromptDefinition::new("d", "hi").with_model("gpt-4o-mini")
    }

    #[test]
    fn empty_request_uses_default_model() {
        assert_eq!(normalize_models(&def(), &[]).unwrap(), vec!["gpt-4o-mini"]);
    }

    #[test]
    fn duplicates_collapse_first_wins() {
        let req = vec!["b".to_string(), "a".into(), " b ".into(), "".into()];
        assert_eq!(normalize_models(&def(), &req).unwrap(), vec!["b", "a"]);
    }

    #[test]
    fn no_model_anywhere_is_config_error() {
        let d = def().with_model("");
        assert!(matches!(
            normalize_models(&d, &[]),
            Err(ConfigError::NoModels(_))
        ));
    }

    #[test]
    fn settings_reject_zero_values() {
        let bad = RunSettings {
            concurrency: 0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
        let bad = RunSettings {
            call_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
        assert!(RunSettings::default().validate().is_ok());
    }
}
