//! Reference data shared by every screen.
//!
//! One [`CachedResourceStore`] per [`ResourceKind`] plus the
//! department-scoped position cache. The dropdown collections use the long
//! reference-data TTL; positions by department use the shorter one.

use crate::{
    cache::{CachedResourceStore, ResourceSource},
    config::CoreConfig,
    error::Result,
    keyed_cache::{KeyedResourceStore, KeyedSource},
    transport::{paths, RestClient},
};
use futures::future::join_all;
use serde_json::Value;
use std::{fmt, sync::Arc};

/// The shared reference collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Employees,
    Departments,
    Positions,
    WorkLocations,
    GrantStructure,
}

impl ResourceKind {
    /// Every kind, in a stable order.
    pub const ALL: [ResourceKind; 5] = [
        ResourceKind::Employees,
        ResourceKind::Departments,
        ResourceKind::Positions,
        ResourceKind::WorkLocations,
        ResourceKind::GrantStructure,
    ];

    /// Backend collection path.
    pub fn path(&self) -> &'static str {
        match self {
            ResourceKind::Employees => paths::EMPLOYEES,
            ResourceKind::Departments => paths::DEPARTMENTS,
            ResourceKind::Positions => paths::POSITIONS,
            ResourceKind::WorkLocations => paths::WORK_LOCATIONS,
            ResourceKind::GrantStructure => paths::GRANT_STRUCTURE,
        }
    }

    /// Name used in logs and metrics.
    pub fn name(&self) -> &'static str {
        match self {
            ResourceKind::Employees => "employees",
            ResourceKind::Departments => "departments",
            ResourceKind::Positions => "positions",
            ResourceKind::WorkLocations => "work_locations",
            ResourceKind::GrantStructure => "grant_structure",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Caches for all shared reference data.
#[derive(Clone)]
pub struct SharedDataStore {
    employees: CachedResourceStore<Value>,
    departments: CachedResourceStore<Value>,
    positions: CachedResourceStore<Value>,
    work_locations: CachedResourceStore<Value>,
    grant_structure: CachedResourceStore<Value>,
    positions_by_department: KeyedResourceStore<u64, Value>,
}

impl SharedDataStore {
    /// Stores backed by the REST endpoints of `client`.
    pub fn new(client: &RestClient, config: &CoreConfig) -> Self {
        Self::with_sources(
            |kind| Arc::new(client.resource(kind.path())) as Arc<dyn ResourceSource<Value>>,
            Arc::new(client.department_positions()),
            config,
        )
    }

    /// Stores backed by arbitrary sources.
    pub fn with_sources<F>(
        mut source_for: F,
        department_positions: Arc<dyn KeyedSource<u64, Value>>,
        config: &CoreConfig,
    ) -> Self
    where
        F: FnMut(ResourceKind) -> Arc<dyn ResourceSource<Value>>,
    {
        let ttl = config.reference_data_ttl;
        let mut store = |kind: ResourceKind| CachedResourceStore::new(kind.name(), ttl, source_for(kind));
        Self {
            employees: store(ResourceKind::Employees),
            departments: store(ResourceKind::Departments),
            positions: store(ResourceKind::Positions),
            work_locations: store(ResourceKind::WorkLocations),
            grant_structure: store(ResourceKind::GrantStructure),
            positions_by_department: KeyedResourceStore::new(
                "positions_by_department",
                config.department_positions_ttl,
                department_positions,
            ),
        }
    }

    /// The store for `kind`.
    pub fn store(&self, kind: ResourceKind) -> &CachedResourceStore<Value> {
        match kind {
            ResourceKind::Employees => &self.employees,
            ResourceKind::Departments => &self.departments,
            ResourceKind::Positions => &self.positions,
            ResourceKind::WorkLocations => &self.work_locations,
            ResourceKind::GrantStructure => &self.grant_structure,
        }
    }

    /// The department-scoped position store.
    pub fn department_positions_store(&self) -> &KeyedResourceStore<u64, Value> {
        &self.positions_by_department
    }

    /// Cached or freshly fetched data for `kind`.
    pub async fn fetch(&self, kind: ResourceKind) -> Result<Arc<Value>> {
        self.store(kind).fetch(false).await
    }

    /// Force a fetch of `kind`.
    pub async fn refresh(&self, kind: ResourceKind) -> Result<Arc<Value>> {
        self.store(kind).fetch(true).await
    }

    /// Fetch several kinds concurrently.
    pub async fn preload(&self, kinds: &[ResourceKind]) -> Vec<(ResourceKind, Result<Arc<Value>>)> {
        let results = join_all(kinds.iter().map(|&kind| self.fetch(kind))).await;
        kinds.iter().copied().zip(results).collect()
    }

    /// Positions for a department. `Ok(None)` if a newer selection
    /// superseded this request.
    pub async fn positions_for_department(
        &self,
        department_id: u64,
        force: bool,
    ) -> Result<Option<Arc<Value>>> {
        self.positions_by_department.fetch(department_id, force).await
    }

    /// Discard cached data for `kind`.
    pub fn invalidate(&self, kind: ResourceKind) {
        self.store(kind).invalidate();
    }

    /// Discard cached positions for one department.
    pub fn invalidate_department(&self, department_id: u64) {
        self.positions_by_department.invalidate(&department_id);
    }

    /// Discard every cached collection. In-flight requests are untouched.
    pub fn invalidate_all(&self) {
        for kind in ResourceKind::ALL {
            self.invalidate(kind);
        }
        self.positions_by_department.invalidate_all();
        log::debug!("Invalidated all shared data");
    }

    /// Discard every cached collection and detach or cancel every request
    /// in flight, so nothing fetched before the call is ever stored. Used
    /// when the signed-in user changes.
    pub fn reset(&self) {
        for kind in ResourceKind::ALL {
            self.store(kind).reset();
        }
        self.positions_by_department.reset();
        log::debug!("Reset all shared data");
    }
}

impl fmt::Debug for SharedDataStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("SharedDataStore");
        for kind in ResourceKind::ALL {
            debug.field(kind.name(), &self.store(kind).is_loaded());
        }
        debug
            .field("departments_cached", &self.positions_by_department.len())
            .finish()
    }
}
