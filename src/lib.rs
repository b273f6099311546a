//! # HRMS Core
//!
//! Client-side core of an HR management system: permission-driven menu
//! filtering and deduplicating TTL caches for the reference data every
//! screen shares, plus the session lifecycle that feeds them.
//!
//! ## Features
//!
//! - Menu visibility and read/write access levels from a permission set
//! - Static allow-lists for a fixed set of legacy roles
//! - Module registry cached in memory and in a durable key-value store
//! - At most one in-flight request per cached resource, shared by all callers
//! - Department-scoped cache whose newer requests cancel older ones
//! - Session persistence with proactive token refresh
//! - Cross-tab synchronization of permissions, profile and logout
//! - Optional reqwest transport with retry and backoff (`http` feature)
//!
//! ## Quick Start
//!
//! ```rust
//! use hrms_core::{
//!     AccessLevel, CoreConfig, MemoryStorage, MenuNode, ModuleDescriptor, ModuleRegistry,
//!     ModuleSource, PermissionMenuFilter, PermissionSet, Result, RoleMenuConfig,
//! };
//! use std::sync::Arc;
//!
//! struct StaticModules;
//!
//! #[async_trait::async_trait]
//! impl ModuleSource for StaticModules {
//!     async fn fetch_modules(&self) -> Result<Vec<ModuleDescriptor>> {
//!         Ok(vec![ModuleDescriptor::new("employees", "Employee List", "employee.read")])
//!     }
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let config = CoreConfig::default();
//! let registry = ModuleRegistry::new(
//!     Arc::new(StaticModules),
//!     Arc::new(MemoryStorage::new()),
//!     &config,
//! );
//! registry.load(false).await;
//!
//! let permissions = PermissionSet::from_strings(["employee.read"]);
//! let roles = RoleMenuConfig::standard();
//! let filter = PermissionMenuFilter::new(&registry, &permissions, None, &roles);
//!
//! assert_eq!(filter.access_level("Employee List"), AccessLevel::Read);
//! assert_eq!(filter.access_level("Payroll Runs"), AccessLevel::None);
//!
//! let menu = filter.filter_tree(&[
//!     MenuNode::new("Dashboard", "/"),
//!     MenuNode::new("Employee List", "/employees"),
//!     MenuNode::new("Payroll Runs", "/payroll"),
//! ]);
//! assert_eq!(menu.len(), 2);
//! # }
//! ```
//!
//! ## Audit Logging
//!
//! When the `audit` feature is enabled, the crate can install a logger for
//! its `log` output:
//!
//! ```rust
//! use hrms_core::init_audit_logger;
//!
//! // Initialize logging (must be called early in program execution)
//! init_audit_logger();
//!
//! // Configure log level through RUST_LOG environment variable:
//! // RUST_LOG=info,hrms_core=debug
//! ```
//!
//! The following events are logged:
//! - Cache hits, misses, joined requests and cancellations (debug)
//! - Login, logout, token and permission refreshes (info)
//! - Failed fetches and fallbacks to cached data (warn)
//!

/// Install `env_logger`. Calling it more than once is harmless.
#[cfg(feature = "audit")]
pub fn init_audit_logger() {
    let _ = env_logger::try_init();
}

pub mod cache;
pub mod config;
pub mod envelope;
pub mod error;
pub mod keyed_cache;
pub mod menu;
pub mod menu_filter;
pub mod metrics;
pub mod module_registry;
pub mod permission;
pub mod role_config;
pub mod session;
pub mod shared_data;
pub mod storage;
pub mod sync;
pub mod transport;


// Re-export main types for convenience
pub use crate::{
    cache::{CachedResourceStore, ResourceSource},
    config::CoreConfig,
    envelope::{ApiEnvelope, ApiResponse, Pagination},
    error::{Error, Result},
    keyed_cache::{KeyedResourceStore, KeyedSource},
    menu::{AccessLevel, FilteredNode, FilteredSection, MenuNode, MenuSection},
    menu_filter::PermissionMenuFilter,
    metrics::{CacheMetrics, FilterMetrics},
    module_registry::{ModuleDescriptor, ModuleRegistry, ModuleSource},
    permission::{Action, Permission, PermissionSet, PermissionSummary},
    role_config::RoleMenuConfig,
    session::{AuthApi, AuthSession, Credentials, LoginResponse, SessionState},
    shared_data::{ResourceKind, SharedDataStore},
    storage::{KeyValueStore, MemoryStorage},
    sync::{PermissionUpdateQueue, SyncChannel, SyncListener, SyncMessage},
    transport::{RestClient, RetryPolicy, Transport},
};

#[cfg(feature = "persistence")]
pub use crate::storage::FileStorage;

#[cfg(feature = "http")]
pub use crate::transport::HttpTransport;
