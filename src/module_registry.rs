//! Registry of backend modules, used to resolve menu labels to permissions.
//!
//! The list is fetched from `GET /admin/modules`, kept in memory and persisted
//! to the durable store as `{data, timestamp, ttl}` so a new process can skip
//! the fetch while the entry is fresh. Concurrent loads share one fetch. A
//! failed fetch falls back to whatever was cached last, stale or not, and
//! finally to an empty list; the menu filter treats an empty registry as
//! "no access".

use crate::{
    cache::{spawn_shared, SharedFetch},
    config::CoreConfig,
    error::Result,
    menu::normalize_label,
    permission::{Action, Permission},
    storage::{read_json, write_json, KeyValueStore},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, sync::Arc, time::Duration};

/// A backend module descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    /// Backend identifier, referenced by `parent_id`.
    #[serde(default)]
    pub id: Option<u64>,
    /// Stable key.
    pub name: String,
    /// Human label, matched case-insensitively against menu labels.
    pub display_name: String,
    /// Permission string required to view the module.
    pub read_permission: String,
    /// Grouping used by the admin screens.
    #[serde(default)]
    pub category: String,
    /// Parent module, if any.
    #[serde(default)]
    pub parent_id: Option<u64>,
}

impl ModuleDescriptor {
    /// Create a descriptor with no id, category or parent.
    pub fn new(
        name: impl Into<String>,
        display_name: impl Into<String>,
        read_permission: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            name: name.into(),
            display_name: display_name.into(),
            read_permission: read_permission.into(),
            category: String::new(),
            parent_id: None,
        }
    }

    /// Set the category.
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    /// Parsed read permission, if the string is well formed.
    pub fn read_permission(&self) -> Option<Permission> {
        Permission::parse(&self.read_permission).ok()
    }

    /// The `"<module>.edit"` counterpart of the read permission.
    ///
    /// `None` when the read permission is malformed, which makes the module
    /// read-only.
    pub fn write_permission(&self) -> Option<Permission> {
        let read = self.read_permission()?;
        Permission::new(read.module(), Action::Edit).ok()
    }
}

/// Remote collaborator that lists modules.
#[async_trait]
pub trait ModuleSource: Send + Sync {
    /// Fetch the full module list.
    async fn fetch_modules(&self) -> Result<Vec<ModuleDescriptor>>;
}

/// Persisted shape of the module list cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedModules {
    data: Vec<ModuleDescriptor>,
    /// Milliseconds since the Unix epoch.
    timestamp: i64,
    /// Milliseconds.
    ttl: u64,
}

impl PersistedModules {
    fn fetched_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.timestamp)
    }
}

#[derive(Default)]
struct RegistryState {
    modules: Arc<Vec<ModuleDescriptor>>,
    by_display_name: HashMap<String, usize>,
    by_name: HashMap<String, usize>,
    fetched_at: Option<DateTime<Utc>>,
    in_flight: Option<SharedFetch<Arc<Vec<ModuleDescriptor>>>>,
    /// Bumped by `clear`; a fetch started before then is not adopted.
    generation: u64,
}

impl RegistryState {
    fn adopt(&mut self, modules: Vec<ModuleDescriptor>, fetched_at: DateTime<Utc>) {
        self.by_display_name.clear();
        self.by_name.clear();
        for (idx, module) in modules.iter().enumerate() {
            // First occurrence wins on duplicate display names.
            self.by_display_name
                .entry(normalize_label(&module.display_name))
                .or_insert(idx);
            self.by_name.entry(module.name.clone()).or_insert(idx);
        }
        self.modules = Arc::new(modules);
        self.fetched_at = Some(fetched_at);
    }
}

/// Holds the module list and answers lookups by display name.
pub struct ModuleRegistry {
    source: Arc<dyn ModuleSource>,
    store: Arc<dyn KeyValueStore>,
    ttl: Duration,
    cache_key: Arc<str>,
    state: Arc<RwLock<RegistryState>>,
}

impl ModuleRegistry {
    /// Create a registry. Nothing is fetched until [`load`](Self::load).
    pub fn new(
        source: Arc<dyn ModuleSource>,
        store: Arc<dyn KeyValueStore>,
        config: &CoreConfig,
    ) -> Self {
        Self {
            source,
            store,
            ttl: config.module_registry_ttl,
            cache_key: Arc::from(config.module_cache_key.as_str()),
            state: Arc::new(RwLock::new(RegistryState::default())),
        }
    }

    /// Return the module list, fetching it when missing, expired or forced.
    ///
    /// Never fails: on fetch failure the last cached list (even stale) is
    /// returned, else an empty list.
    pub async fn load(&self, force_refresh: bool) -> Arc<Vec<ModuleDescriptor>> {
        if !force_refresh {
            if let Some(modules) = self.fresh_in_memory() {
                log::debug!("Module registry hit ({} modules)", modules.len());
                return modules;
            }
            if let Some(modules) = self.adopt_persisted(true) {
                log::debug!("Module registry restored {} modules from durable store", modules.len());
                return modules;
            }
        }

        let request = {
            let mut state = self.state.write();
            match &state.in_flight {
                Some(in_flight) => {
                    log::debug!("Joining in-flight module list fetch");
                    in_flight.clone()
                }
                None => {
                    let request = self.start_fetch(state.generation);
                    state.in_flight = Some(request.clone());
                    request
                }
            }
        };

        match request.await {
            Ok(modules) => modules,
            Err(e) => {
                log::warn!("Module list fetch failed, falling back to cached copy: {e}");
                let in_memory = {
                    let state = self.state.read();
                    state.fetched_at.map(|_| Arc::clone(&state.modules))
                };
                in_memory
                    .or_else(|| self.adopt_persisted(false))
                    .unwrap_or_default()
            }
        }
    }

    /// Find a module by display name (trimmed, case-insensitive, exact).
    pub fn find_by_display_name(&self, name: &str) -> Option<ModuleDescriptor> {
        let state = self.state.read();
        state
            .by_display_name
            .get(&normalize_label(name))
            .map(|&idx| state.modules[idx].clone())
    }

    /// Find a module by its stable key.
    pub fn find_by_name(&self, name: &str) -> Option<ModuleDescriptor> {
        let state = self.state.read();
        state.by_name.get(name).map(|&idx| state.modules[idx].clone())
    }

    /// Current module list without fetching.
    pub fn modules(&self) -> Arc<Vec<ModuleDescriptor>> {
        Arc::clone(&self.state.read().modules)
    }

    /// Whether no modules are known.
    pub fn is_empty(&self) -> bool {
        self.state.read().modules.is_empty()
    }

    /// Whether a module list has been adopted at all.
    pub fn is_loaded(&self) -> bool {
        self.state.read().fetched_at.is_some()
    }

    fn start_fetch(&self, generation: u64) -> SharedFetch<Arc<Vec<ModuleDescriptor>>> {
        let source = Arc::clone(&self.source);
        let store = Arc::clone(&self.store);
        let cache_key = Arc::clone(&self.cache_key);
        let ttl = self.ttl;
        let state = Arc::downgrade(&self.state);

        spawn_shared(async move {
            let outcome = source.fetch_modules().await;
            let Some(state) = state.upgrade() else {
                return outcome.map(Arc::new);
            };
            let mut state = state.write();
            if state.generation != generation {
                log::debug!("Discarding module list fetched before the registry was cleared");
                return outcome.map(Arc::new);
            }
            state.in_flight = None;

            let modules = outcome?;
            let now = Utc::now();
            persist(store.as_ref(), &cache_key, ttl, &modules, now);
            state.adopt(modules, now);
            log::info!("Module registry loaded {} modules", state.modules.len());
            Ok(Arc::clone(&state.modules))
        })
    }

    /// Drop the in-memory list and its persisted copy. A fetch still in
    /// flight is detached and its result discarded.
    pub fn clear(&self) {
        {
            let mut state = self.state.write();
            let generation = state.generation + 1;
            *state = RegistryState {
                generation,
                ..RegistryState::default()
            };
        }
        if let Err(e) = self.store.remove(&self.cache_key) {
            log::warn!("Failed to remove persisted module list: {e}");
        }
        log::debug!("Module registry cleared");
    }

    fn is_fresh(fetched_at: DateTime<Utc>, ttl: Duration) -> bool {
        let age = Utc::now().signed_duration_since(fetched_at);
        match age.to_std() {
            Ok(age) => age < ttl,
            // Timestamp in the future: clock skew, treat as fresh.
            Err(_) => true,
        }
    }

    fn fresh_in_memory(&self) -> Option<Arc<Vec<ModuleDescriptor>>> {
        let state = self.state.read();
        let fetched_at = state.fetched_at?;
        Self::is_fresh(fetched_at, self.ttl).then(|| Arc::clone(&state.modules))
    }

    fn adopt_persisted(&self, require_fresh: bool) -> Option<Arc<Vec<ModuleDescriptor>>> {
        let persisted: PersistedModules = match read_json(self.store.as_ref(), &self.cache_key) {
            Ok(Some(persisted)) => persisted,
            Ok(None) => return None,
            Err(e) => {
                log::warn!("Failed to read persisted module list: {e}");
                return None;
            }
        };
        let fetched_at = persisted.fetched_at()?;
        if require_fresh && !Self::is_fresh(fetched_at, Duration::from_millis(persisted.ttl)) {
            return None;
        }
        let mut state = self.state.write();
        state.adopt(persisted.data, fetched_at);
        Some(Arc::clone(&state.modules))
    }

}

fn persist(
    store: &dyn KeyValueStore,
    cache_key: &str,
    ttl: Duration,
    modules: &[ModuleDescriptor],
    fetched_at: DateTime<Utc>,
) {
    let entry = PersistedModules {
        data: modules.to_vec(),
        timestamp: fetched_at.timestamp_millis(),
        ttl: u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX),
    };
    if let Err(e) = write_json(store, cache_key, &entry) {
        log::warn!("Failed to persist module list: {e}");
    }
}

impl std::fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("ModuleRegistry")
            .field("modules", &state.modules.len())
            .field("fetched_at", &state.fetched_at)
            .field("ttl", &self.ttl)
            .finish()
    }
}
