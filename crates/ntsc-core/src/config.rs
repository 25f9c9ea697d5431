use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::models::{CoreError, CoreErrorKind, CoreResult};
use crate::resource_manager::registry::IN_MEMORY_RESOURCE_MANAGER;

pub const DEFAULT_TERMINATED_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);
pub const DEFAULT_RESOURCE_POOL: &str = "default";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OrchestratorConfig {
    /// How long a terminated task stays queryable before it is dropped from the registry.
    #[serde(with = "duration_secs")]
    pub terminated_retention: Duration,
    pub default_resource_pool: String,
    /// Additional pools the in-memory resource manager should know about.
    pub resource_pools: Vec<String>,
    pub priority_limit: Option<i32>,
    pub resource_manager: String,
    pub database_path: Option<PathBuf>,
    pub log_filter: Option<String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            terminated_retention: DEFAULT_TERMINATED_RETENTION,
            default_resource_pool: DEFAULT_RESOURCE_POOL.to_string(),
            resource_pools: Vec::new(),
            priority_limit: None,
            resource_manager: IN_MEMORY_RESOURCE_MANAGER.to_string(),
            database_path: None,
            log_filter: None,
        }
    }
}

impl OrchestratorConfig {
    pub fn from_json_str(raw: &str) -> CoreResult<Self> {
        serde_json::from_str(raw).map_err(|error| {
            CoreError::new(
                CoreErrorKind::InvalidInput,
                format!("invalid orchestrator config: {error}"),
            )
        })
    }

    pub fn load(path: impl AsRef<Path>) -> CoreResult<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|error| {
            CoreError::new(
                CoreErrorKind::InvalidInput,
                format!("failed to read config '{}': {error}", path.display()),
            )
        })?;
        Self::from_json_str(&raw)
    }

    /// Every pool the deployment serves, default pool first.
    pub fn all_resource_pools(&self) -> Vec<String> {
        let mut pools = vec![self.default_resource_pool.clone()];
        for pool in &self.resource_pools {
            if !pools.contains(pool) {
                pools.push(pool.clone());
            }
        }
        pools
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
