use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::OrchestratorConfig;
use crate::models::{CoreError, CoreErrorKind, CoreResult};
use crate::resource_manager::{InMemoryResourceManager, ResourceManager};

pub const IN_MEMORY_RESOURCE_MANAGER: &str = "in_memory";

pub type ResourceManagerFactory =
    Box<dyn Fn(&OrchestratorConfig) -> CoreResult<Arc<dyn ResourceManager>> + Send + Sync>;

/// Resource manager implementations selectable by name from configuration.
pub struct ResourceManagerRegistry {
    factories: BTreeMap<String, ResourceManagerFactory>,
}

impl ResourceManagerRegistry {
    pub fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        factory: impl Fn(&OrchestratorConfig) -> CoreResult<Arc<dyn ResourceManager>>
        + Send
        + Sync
        + 'static,
    ) {
        self.factories.insert(name.into(), Box::new(factory));
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    pub fn build(&self, config: &OrchestratorConfig) -> CoreResult<Arc<dyn ResourceManager>> {
        let factory = self.factories.get(&config.resource_manager).ok_or_else(|| {
            CoreError::new(
                CoreErrorKind::InvalidInput,
                format!(
                    "unknown resource manager '{}'; known: [{}]",
                    config.resource_manager,
                    self.names().collect::<Vec<_>>().join(", ")
                ),
            )
        })?;
        factory(config)
    }
}

impl Default for ResourceManagerRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(IN_MEMORY_RESOURCE_MANAGER, |config| {
            let manager: Arc<dyn ResourceManager> =
                Arc::new(InMemoryResourceManager::new(config.all_resource_pools()));
            Ok(manager)
        });
        registry
    }
}
