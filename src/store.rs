use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::flag::{FlagConfiguration, FlagScope};
use crate::mode::EvaluationMode;

/// FlagRepository is the backing store that owns flag configurations.
///
/// Identical flag keys in different scopes are distinct records. A configuration that does not
/// exist is `Ok(None)`, not an error.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FlagRepository: Send + Sync {
    /// Retrieve the configuration of `flag_key` in `scope`.
    async fn get_configuration(
        &self,
        flag_key: &str,
        scope: &FlagScope,
    ) -> anyhow::Result<Option<FlagConfiguration>>;

    /// Register a new flag in `scope` whose only mode is `initial_mode`.
    async fn create_flag(
        &self,
        flag_key: &str,
        scope: &FlagScope,
        initial_mode: EvaluationMode,
        name: &str,
        description: &str,
    ) -> anyhow::Result<()>;
}

/// InMemoryRepository keeps configurations in a map. Useful for tests and for hosts that load
/// all flags up front.
#[derive(Default)]
pub struct InMemoryRepository {
    flags: RwLock<HashMap<(FlagScope, String), FlagConfiguration>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the configuration for `config.key` in `scope`.
    pub async fn upsert(&self, scope: FlagScope, config: FlagConfiguration) {
        let mut flags = self.flags.write().await;
        flags.insert((scope, config.key.clone()), config);
    }

    pub async fn remove(&self, flag_key: &str, scope: &FlagScope) -> bool {
        let mut flags = self.flags.write().await;
        flags.remove(&(scope.clone(), flag_key.to_string())).is_some()
    }

    pub async fn len(&self) -> usize {
        self.flags.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.flags.read().await.is_empty()
    }
}

#[async_trait]
impl FlagRepository for InMemoryRepository {
    async fn get_configuration(
        &self,
        flag_key: &str,
        scope: &FlagScope,
    ) -> anyhow::Result<Option<FlagConfiguration>> {
        let flags = self.flags.read().await;
        Ok(flags.get(&(scope.clone(), flag_key.to_string())).cloned())
    }

    async fn create_flag(
        &self,
        flag_key: &str,
        scope: &FlagScope,
        initial_mode: EvaluationMode,
        name: &str,
        description: &str,
    ) -> anyhow::Result<()> {
        let mut flags = self.flags.write().await;
        let key = (scope.clone(), flag_key.to_string());
        if flags.contains_key(&key) {
            anyhow::bail!("flag {} already exists in scope {}", flag_key, scope);
        }

        let mut config = FlagConfiguration::new(flag_key, initial_mode);
        config.name = name.to_string();
        config.description = description.to_string();
        flags.insert(key, config);
        Ok(())
    }
}
