use std::sync::Arc;

use log::{debug, warn};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::cache::{ClearReport, DistributedCache, TieredCache};
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::context::EvaluationContext;
use crate::error::EvaluationError;
use crate::eval::{EvaluationResult, Pipeline};
use crate::flag::{FlagConfiguration, FlagScope, OFF_VARIATION};
use crate::mode::EvaluationMode;
use crate::provider::ConfigurationProvider;
use crate::store::FlagRepository;

/// FlagEvaluator is the entry point for hosting code: it resolves a flag's configuration
/// through the caches and runs it through the evaluation pipeline.
///
/// Storage and cache outages never escape as errors. A flag whose configuration cannot be
/// loaded evaluates as disabled, with the cause in [EvaluationResult::reason]. The only errors
/// returned are [EvaluationError::Cancelled] and [EvaluationError::MissingSubject].
///
/// Methods without a scope suffix evaluate [FlagScope::Global] flags.
pub struct FlagEvaluator {
    provider: ConfigurationProvider,
    pipeline: Pipeline,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl FlagEvaluator {
    pub fn new(
        repository: Arc<dyn FlagRepository>,
        distributed: Arc<dyn DistributedCache>,
        config: EngineConfig,
    ) -> Self {
        let cache = TieredCache::new(distributed, &config);
        Self {
            provider: ConfigurationProvider::new(repository, cache, &config),
            pipeline: Pipeline::standard(),
            clock: Arc::new(SystemClock),
            config,
        }
    }

    /// Replaces the clock used when a context does not pin its evaluation instant.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_pipeline(mut self, pipeline: Pipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    pub fn provider(&self) -> &ConfigurationProvider {
        &self.provider
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub async fn evaluate(
        &self,
        flag_key: &str,
        context: &EvaluationContext,
        cancel: &CancellationToken,
    ) -> Result<EvaluationResult, EvaluationError> {
        self.evaluate_in_scope(flag_key, &FlagScope::Global, context, cancel)
            .await
    }

    pub async fn evaluate_in_scope(
        &self,
        flag_key: &str,
        scope: &FlagScope,
        context: &EvaluationContext,
        cancel: &CancellationToken,
    ) -> Result<EvaluationResult, EvaluationError> {
        let default_mode = self.config.provisioning.default_mode;
        let (result, _) = self
            .evaluate_detail(flag_key, scope, default_mode, context, cancel)
            .await?;
        Ok(result)
    }

    /// Like [FlagEvaluator::evaluate_in_scope], but a flag missing from the repository is
    /// registered with `default_mode` instead of the engine-wide provisioning default, and the
    /// result reflects that mode.
    pub async fn evaluate_with_default_mode(
        &self,
        flag_key: &str,
        scope: &FlagScope,
        default_mode: EvaluationMode,
        context: &EvaluationContext,
        cancel: &CancellationToken,
    ) -> Result<EvaluationResult, EvaluationError> {
        let (result, _) = self
            .evaluate_detail(flag_key, scope, default_mode, context, cancel)
            .await?;
        Ok(result)
    }

    pub async fn is_enabled(
        &self,
        flag_key: &str,
        context: &EvaluationContext,
        cancel: &CancellationToken,
    ) -> Result<bool, EvaluationError> {
        self.is_enabled_in_scope(flag_key, &FlagScope::Global, context, cancel)
            .await
    }

    pub async fn is_enabled_in_scope(
        &self,
        flag_key: &str,
        scope: &FlagScope,
        context: &EvaluationContext,
        cancel: &CancellationToken,
    ) -> Result<bool, EvaluationError> {
        let result = self
            .evaluate_in_scope(flag_key, scope, context, cancel)
            .await?;
        Ok(result.is_enabled)
    }

    /// Returns the payload of the variation served to `context`, converted to `T`.
    ///
    /// Falls back to `default` when the flag is disabled, when the served variation has no
    /// payload in the flag's variation table, or when the payload is not a `T`.
    pub async fn get_variation<T: DeserializeOwned>(
        &self,
        flag_key: &str,
        default: T,
        context: &EvaluationContext,
        cancel: &CancellationToken,
    ) -> Result<T, EvaluationError> {
        self.get_variation_in_scope(flag_key, &FlagScope::Global, default, context, cancel)
            .await
    }

    pub async fn get_variation_in_scope<T: DeserializeOwned>(
        &self,
        flag_key: &str,
        scope: &FlagScope,
        default: T,
        context: &EvaluationContext,
        cancel: &CancellationToken,
    ) -> Result<T, EvaluationError> {
        let default_mode = self.config.provisioning.default_mode;
        let (result, config) = self
            .evaluate_detail(flag_key, scope, default_mode, context, cancel)
            .await?;
        let config = match config {
            Some(config) if result.is_enabled => config,
            _ => return Ok(default),
        };

        let value = match config.variations().get(&result.variation) {
            Some(value) => value,
            None => {
                debug!(
                    "flag {} has no payload for variation {}",
                    flag_key, result.variation
                );
                return Ok(default);
            }
        };
        Ok(value.to_typed().unwrap_or(default))
    }

    /// Drops a flag from both cache tiers so the next evaluation reloads it.
    pub async fn invalidate(&self, flag_key: &str, scope: &FlagScope) {
        self.provider.invalidate(flag_key, scope).await;
    }

    pub async fn clear_cache(&self) -> ClearReport {
        self.provider.clear_all().await
    }

    async fn evaluate_detail(
        &self,
        flag_key: &str,
        scope: &FlagScope,
        default_mode: EvaluationMode,
        context: &EvaluationContext,
        cancel: &CancellationToken,
    ) -> Result<(EvaluationResult, Option<Arc<FlagConfiguration>>), EvaluationError> {
        let resolution = match self
            .provider
            .resolve(flag_key, scope, default_mode, cancel)
            .await
        {
            Ok(resolution) => resolution,
            Err(EvaluationError::Repository(e)) => {
                warn!("configuration of flag {} unavailable: {:#}", flag_key, e);
                let result = EvaluationResult::disabled(
                    OFF_VARIATION,
                    format!("Configuration unavailable: {}", e),
                )
                .with_metadata("flagKey", flag_key);
                return Ok((result, None));
            }
            Err(e) => return Err(e),
        };

        let config = resolution.configuration().clone();
        let at = context.evaluated_at().unwrap_or_else(|| self.clock.now());
        let result = self
            .pipeline
            .evaluate(&config, context, at)?
            .unwrap_or_else(|| {
                EvaluationResult::disabled(config.default_variation(), "No evaluator applies")
            })
            .with_metadata("flagKey", flag_key)
            .with_metadata("source", resolution.source());

        Ok((result, Some(config)))
    }
}
