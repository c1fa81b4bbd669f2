use std::sync::Arc;

use log::{debug, warn};
use tokio_util::sync::CancellationToken;

use crate::cache::{ClearReport, TieredCache};
use crate::config::{EngineConfig, ProvisioningConfig};
use crate::error::EvaluationError;
use crate::flag::{FlagConfiguration, FlagScope};
use crate::mode::EvaluationMode;
use crate::store::FlagRepository;

/// Where a resolved configuration came from.
#[derive(Clone, Debug, PartialEq)]
pub enum Resolution {
    /// Found in the local or distributed cache.
    Cached(Arc<FlagConfiguration>),
    /// Loaded from the repository and written to both cache tiers.
    Loaded(Arc<FlagConfiguration>),
    /// Not configured anywhere; a minimal configuration was registered in the repository.
    Provisioned(Arc<FlagConfiguration>),
    /// Not configured anywhere and provisioning is disabled.
    Default(Arc<FlagConfiguration>),
}

impl Resolution {
    pub fn configuration(&self) -> &Arc<FlagConfiguration> {
        match self {
            Resolution::Cached(c)
            | Resolution::Loaded(c)
            | Resolution::Provisioned(c)
            | Resolution::Default(c) => c,
        }
    }

    /// Short name recorded in evaluation metadata.
    pub fn source(&self) -> &'static str {
        match self {
            Resolution::Cached(_) => "cache",
            Resolution::Loaded(_) => "store",
            Resolution::Provisioned(_) => "provisioned",
            Resolution::Default(_) => "default",
        }
    }
}

/// ConfigurationProvider resolves flag configurations cache-aside: local tier, then distributed
/// tier, then the repository.
///
/// Flags that exist nowhere are registered in the repository with the caller's default mode so
/// that later lookups find them. The registration is best effort and a failure never fails
/// the lookup. The provisional configuration itself is not cached, so an operator's edits
/// become visible as soon as they are stored.
pub struct ConfigurationProvider {
    repository: Arc<dyn FlagRepository>,
    cache: TieredCache,
    provisioning: ProvisioningConfig,
}

impl ConfigurationProvider {
    pub fn new(repository: Arc<dyn FlagRepository>, cache: TieredCache, config: &EngineConfig) -> Self {
        Self {
            repository,
            cache,
            provisioning: config.provisioning.clone(),
        }
    }

    pub fn cache(&self) -> &TieredCache {
        &self.cache
    }

    /// Resolves the configuration of `flag_key` in `scope`.
    ///
    /// Returns [EvaluationError::Cancelled] as soon as `cancel` fires; a cancelled lookup
    /// writes nothing to either cache tier. Repository failures are returned as
    /// [EvaluationError::Repository].
    pub async fn resolve(
        &self,
        flag_key: &str,
        scope: &FlagScope,
        default_mode: EvaluationMode,
        cancel: &CancellationToken,
    ) -> Result<Resolution, EvaluationError> {
        if cancel.is_cancelled() {
            return Err(EvaluationError::Cancelled);
        }

        let cached = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(EvaluationError::Cancelled),
            cached = self.cache.get(scope, flag_key) => cached,
        };
        if let Some(config) = cached {
            return Ok(Resolution::Cached(config));
        }

        let loaded = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(EvaluationError::Cancelled),
            loaded = self.repository.get_configuration(flag_key, scope) => {
                loaded.map_err(EvaluationError::Repository)?
            }
        };

        if let Some(config) = loaded {
            if cancel.is_cancelled() {
                return Err(EvaluationError::Cancelled);
            }
            debug!("loaded flag {} ({}) from the repository", flag_key, scope);
            let config = Arc::new(config);
            self.cache.set(scope, config.clone()).await;
            return Ok(Resolution::Loaded(config));
        }

        let config = Arc::new(FlagConfiguration::new(flag_key, default_mode));
        if !self.provisioning.enabled {
            return Ok(Resolution::Default(config));
        }

        let provisioned = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(EvaluationError::Cancelled),
            created = self.repository.create_flag(
                flag_key,
                scope,
                default_mode,
                flag_key,
                "Registered automatically on first evaluation",
            ) => created,
        };
        match provisioned {
            Ok(()) => debug!("provisioned flag {} ({}) in mode {:?}", flag_key, scope, default_mode),
            Err(e) => warn!("could not provision flag {} ({}): {:#}", flag_key, scope, e),
        }
        Ok(Resolution::Provisioned(config))
    }

    /// Drops `flag_key` in `scope` from both cache tiers.
    pub async fn invalidate(&self, flag_key: &str, scope: &FlagScope) {
        self.cache.remove(scope, flag_key).await;
    }

    pub async fn clear_all(&self) -> ClearReport {
        self.cache.clear_all().await
    }
}
