//! Interpreter - Execute Effects using a Provider
//!
//! Creates and updates run in waves: every effect whose dependencies have
//! been published runs concurrently with the rest of its wave, and its
//! reported attributes are published before the next wave is formed.
//! Deletes run afterwards, one at a time, in plan order.

use futures::future::join_all;

use crate::effect::Effect;
use crate::output::{OutputError, Resolution};
use crate::plan::Plan;
use crate::provider::{Provider, ProviderError, ProviderResult};
use crate::resource::{Resource, ResourceId, State};

/// Result of executing each Effect
#[derive(Debug)]
pub enum EffectOutcome {
    /// Create succeeded
    Created { state: State },
    /// Update succeeded
    Updated { state: State },
    /// Delete succeeded
    Deleted,
    /// Skipped (e.g., dry-run)
    Skipped { reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    /// Pending effects wait on bindings that nothing in the plan will publish
    #[error("No effect can make progress; still pending: {}", pending.join(", "))]
    Stalled { pending: Vec<String> },

    #[error(transparent)]
    Publish(#[from] OutputError),
}

/// Result of executing the entire Plan
#[derive(Debug, Default)]
pub struct ApplyResult {
    pub outcomes: Vec<(ResourceId, Result<EffectOutcome, ProviderError>)>,
    pub success_count: usize,
    pub failure_count: usize,
}

impl ApplyResult {
    pub fn is_success(&self) -> bool {
        self.failure_count == 0
    }

    fn record(&mut self, id: ResourceId, outcome: ProviderResult<EffectOutcome>) {
        match &outcome {
            Ok(EffectOutcome::Skipped { .. }) => {}
            Ok(_) => self.success_count += 1,
            Err(_) => self.failure_count += 1,
        }
        self.outcomes.push((id, outcome));
    }

    /// States of created or updated resources
    pub fn states(&self) -> impl Iterator<Item = &State> {
        self.outcomes.iter().filter_map(|(_, outcome)| match outcome {
            Ok(EffectOutcome::Created { state } | EffectOutcome::Updated { state }) => Some(state),
            _ => None,
        })
    }

    pub fn deleted(&self) -> impl Iterator<Item = &ResourceId> {
        self.outcomes.iter().filter_map(|(id, outcome)| match outcome {
            Ok(EffectOutcome::Deleted) => Some(id),
            _ => None,
        })
    }
}

/// Interpreter configuration
#[derive(Debug, Clone, Default)]
pub struct InterpreterConfig {
    /// If true, skip actual side effects
    pub dry_run: bool,
    /// Continue on error
    pub continue_on_error: bool,
}

/// Interpreter that executes Effects using a Provider
pub struct Interpreter<P: Provider> {
    provider: P,
    config: InterpreterConfig,
}

impl<P: Provider> Interpreter<P> {
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            config: InterpreterConfig::default(),
        }
    }

    pub fn with_config(mut self, config: InterpreterConfig) -> Self {
        self.config = config;
        self
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Execute a Plan. `resolution` must already hold the attributes of
    /// resources the plan does not touch; see [`crate::differ::baseline`].
    pub async fn apply(
        &self,
        plan: &Plan,
        resolution: &mut Resolution,
    ) -> Result<ApplyResult, ApplyError> {
        let mut result = ApplyResult::default();

        if self.config.dry_run {
            for effect in plan.effects() {
                result.record(
                    effect.resource_id().clone(),
                    Ok(EffectOutcome::Skipped {
                        reason: "dry-run mode".to_string(),
                    }),
                );
            }
            return Ok(result);
        }

        let (deletes, mut pending): (Vec<&Effect>, Vec<&Effect>) =
            plan.effects().iter().partition(|e| e.is_delete());

        let mut wave = 0;
        while !pending.is_empty() {
            let (ready, blocked): (Vec<&Effect>, Vec<&Effect>) =
                pending.into_iter().partition(|e| {
                    e.dependencies()
                        .iter()
                        .all(|binding| resolution.is_published(binding))
                });

            if ready.is_empty() {
                if result.failure_count > 0 {
                    for effect in blocked {
                        result.record(
                            effect.resource_id().clone(),
                            Ok(EffectOutcome::Skipped {
                                reason: "a dependency failed".to_string(),
                            }),
                        );
                    }
                    break;
                }
                return Err(ApplyError::Stalled {
                    pending: blocked
                        .iter()
                        .map(|e| e.resource_id().to_string())
                        .collect(),
                });
            }

            wave += 1;
            log::info!("wave {}: {} effect(s)", wave, ready.len());

            let outcomes = {
                let published: &Resolution = resolution;
                join_all(ready.iter().map(|e| self.execute_effect(e, published))).await
            };

            for (effect, outcome) in ready.into_iter().zip(outcomes) {
                let id = effect.resource_id().clone();
                match &outcome {
                    Ok(EffectOutcome::Created { state } | EffectOutcome::Updated { state }) => {
                        resolution.publish(id.to_string(), state.published_attributes())?;
                    }
                    Err(e) => log::warn!("{} failed: {}", id, e),
                    _ => {}
                }
                result.record(id, outcome);
            }

            if !result.is_success() && !self.config.continue_on_error {
                return Ok(result);
            }
            pending = blocked;
        }

        for effect in deletes {
            let outcome = self.execute_effect(effect, resolution).await;
            let failed = outcome.is_err();
            if let Err(e) = &outcome {
                log::warn!("{} failed: {}", effect.resource_id(), e);
            }
            result.record(effect.resource_id().clone(), outcome);
            if failed && !self.config.continue_on_error {
                break;
            }
        }

        Ok(result)
    }

    /// Execute a single Effect
    async fn execute_effect(
        &self,
        effect: &Effect,
        resolution: &Resolution,
    ) -> ProviderResult<EffectOutcome> {
        log::debug!("{}", effect);

        match effect {
            Effect::Create(resource) => {
                let resolved = resolve(resource, resolution)?;
                let state = self.provider.create(&resolved).await?;
                Ok(EffectOutcome::Created { state })
            }
            Effect::Update { id, from, to } => {
                let resolved = resolve(to, resolution)?;
                let identifier = from.identifier.as_deref().unwrap_or("");
                let mut state = self.provider.update(id, identifier, from, &resolved).await?;
                if state.identifier.is_none() {
                    state.identifier = from.identifier.clone();
                }
                Ok(EffectOutcome::Updated { state })
            }
            Effect::Delete { id, identifier } => {
                self.provider.delete(id, identifier).await?;
                Ok(EffectOutcome::Deleted)
            }
        }
    }
}

fn resolve(resource: &Resource, resolution: &Resolution) -> ProviderResult<Resource> {
    resource
        .resolve(resolution)
        .map_err(|e| ProviderError::new(e.to_string()).for_resource(resource.id.clone()))
}
