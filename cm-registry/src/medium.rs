//! The medium registry (`spec.md` §3, §4 dependency level 1): a small,
//! named set of storage tiers. Grounded on the teacher's `ChunkStore`
//! (`pbs-datastore/src/chunk_store.rs`) in spirit — a small, named,
//! admin-managed collection guarded by invariants on creation — but holding
//! tier metadata instead of filesystem state, since chunk bytes themselves
//! are out of scope (`spec.md` §1).

use std::collections::HashMap;

use cm_api_types::{ChunkManagerError, MediumIndex, Result};
use cm_config::MediumRegistryConfig;

pub const DEFAULT_STORE_MEDIUM: &str = "default";
pub const DEFAULT_CACHE_MEDIUM: &str = "cache";

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct MediumConfig {
    /// Hard cap on replicas sharing one rack for this medium; `None` means
    /// fall back to `PlacementConfig::default_max_replicas_per_rack`.
    pub max_replicas_per_rack: Option<u32>,
    pub accepts_writes: bool,
}

impl Default for MediumConfig {
    fn default() -> Self {
        MediumConfig {
            max_replicas_per_rack: None,
            accepts_writes: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Medium {
    pub index: MediumIndex,
    pub name: String,
    pub priority: u8,
    pub cache: bool,
    pub transient: bool,
    pub config: MediumConfig,
}

impl Medium {
    /// Cache media never participate in replication decisions (`spec.md`
    /// §3): their replicas are tracked but never counted toward RF.
    pub fn counts_toward_replication(&self) -> bool {
        !self.cache
    }
}

#[derive(Debug, Default)]
pub struct MediumRegistry {
    by_index: HashMap<MediumIndex, Medium>,
    by_name: HashMap<String, MediumIndex>,
    next_index: MediumIndex,
    config: MediumRegistryConfig,
}

impl MediumRegistry {
    /// Bootstraps the registry with the built-in "default" store and cache
    /// media, which destruction always refuses (`spec.md` §3 Lifecycle).
    pub fn bootstrap(config: MediumRegistryConfig) -> Self {
        let mut reg = MediumRegistry {
            by_index: HashMap::new(),
            by_name: HashMap::new(),
            next_index: 0,
            config,
        };
        reg.create(DEFAULT_STORE_MEDIUM, 0, false, false, MediumConfig::default())
            .expect("bootstrap default store medium");
        reg.create(DEFAULT_CACHE_MEDIUM, 0, true, false, MediumConfig::default())
            .expect("bootstrap default cache medium");
        reg
    }

    pub fn create(
        &mut self,
        name: &str,
        priority: u8,
        cache: bool,
        transient: bool,
        config: MediumConfig,
    ) -> Result<MediumIndex> {
        if self.by_name.contains_key(name) {
            return Err(ChunkManagerError::invalid_argument(format!(
                "medium name '{name}' already in use"
            )));
        }
        if self.by_index.len() as u32 >= self.config.max_medium_count {
            return Err(ChunkManagerError::invalid_argument(
                "medium count at MaxMediumCount",
            ));
        }
        if priority > 10 {
            return Err(ChunkManagerError::invalid_argument(
                "medium priority out of range 0..10",
            ));
        }

        let index = self.next_index;
        self.next_index = self
            .next_index
            .checked_add(1)
            .ok_or_else(|| ChunkManagerError::internal("medium index space exhausted"))?;

        self.by_index.insert(
            index,
            Medium {
                index,
                name: name.to_string(),
                priority,
                cache,
                transient,
                config,
            },
        );
        self.by_name.insert(name.to_string(), index);
        Ok(index)
    }

    /// Refuses to destroy either built-in medium (`spec.md` §3 Lifecycle).
    pub fn destroy(&mut self, index: MediumIndex) -> Result<()> {
        let medium = self
            .by_index
            .get(&index)
            .ok_or(ChunkManagerError::NoSuchMedium(index))?;
        if medium.name == DEFAULT_STORE_MEDIUM || medium.name == DEFAULT_CACHE_MEDIUM {
            return Err(ChunkManagerError::invalid_argument(
                "cannot destroy a built-in medium",
            ));
        }
        let name = medium.name.clone();
        self.by_index.remove(&index);
        self.by_name.remove(&name);
        Ok(())
    }

    pub fn get(&self, index: MediumIndex) -> Result<&Medium> {
        self.by_index
            .get(&index)
            .ok_or(ChunkManagerError::NoSuchMedium(index))
    }

    pub fn by_name(&self, name: &str) -> Result<&Medium> {
        let index = self
            .by_name
            .get(name)
            .ok_or_else(|| ChunkManagerError::invalid_argument(format!("unknown medium '{name}'")))?;
        self.get(*index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Medium> {
        self.by_index.values()
    }

    pub fn default_store_index(&self) -> MediumIndex {
        self.by_name[DEFAULT_STORE_MEDIUM]
    }

    pub fn default_cache_index(&self) -> MediumIndex {
        self.by_name[DEFAULT_CACHE_MEDIUM]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_creates_builtins_and_refuses_their_destruction() {
        let mut reg = MediumRegistry::bootstrap(MediumRegistryConfig::default());
        let default_idx = reg.default_store_index();
        assert!(reg.by_name(DEFAULT_STORE_MEDIUM).is_ok());
        assert!(reg.by_name(DEFAULT_CACHE_MEDIUM).is_ok());
        assert!(reg.destroy(default_idx).is_err());
    }

    #[test]
    fn duplicate_name_rejected() {
        let mut reg = MediumRegistry::bootstrap(MediumRegistryConfig::default());
        let err = reg.create(DEFAULT_STORE_MEDIUM, 0, false, false, MediumConfig::default());
        assert!(err.is_err());
    }

    #[test]
    fn max_medium_count_enforced() {
        let mut reg = MediumRegistry::bootstrap(MediumRegistryConfig { max_medium_count: 3 });
        // 2 built-ins already exist; one more fits, the next should fail.
        reg.create("ssd", 5, false, false, MediumConfig::default())
            .expect("third medium fits");
        let err = reg.create("hdd", 5, false, false, MediumConfig::default());
        assert!(err.is_err());
    }
}
