//! Permission-driven menu visibility.
//!
//! [`PermissionMenuFilter`] decides, for the current session, which menu
//! labels are visible and whether they are editable, and prunes a menu tree
//! down to what the user may see.
//!
//! # Resolution
//!
//! 1. `Dashboard` is always visible.
//! 2. A role with an entry in the [`RoleMenuConfig`] sees exactly its
//!    allow-list.
//! 3. Any other role resolves the label to a module through the
//!    [`ModuleRegistry`] and needs that module's read permission.
//!
//! Missing data is missing access: an unknown label, an empty permission set
//! or a registry that has not loaded yet all resolve to
//! [`AccessLevel::None`]. Nothing here returns an error.
//!
//! # Parent fallback
//!
//! While filtering a tree, a child whose own label resolves to no access and
//! that has no module of its own is re-resolved against the nearest ancestor
//! label, so submenus inherit their parent's permission when the backend has
//! no granular permission for them.

use crate::{
    menu::{AccessLevel, FilteredNode, FilteredSection, MenuNode, MenuSection},
    metrics::FilterMetrics,
    module_registry::{ModuleDescriptor, ModuleRegistry},
    permission::{Permission, PermissionSet},
    role_config::{RoleMenuConfig, RoleMenuEntry},
};

/// Label that is visible to every authenticated user.
pub const DASHBOARD_LABEL: &str = "Dashboard";

fn is_dashboard(label: &str) -> bool {
    label.trim().eq_ignore_ascii_case(DASHBOARD_LABEL)
}

/// Menu visibility for one session.
///
/// Borrows the registry, permissions and role table; build a new filter when
/// any of them changes.
pub struct PermissionMenuFilter<'a> {
    registry: &'a ModuleRegistry,
    permissions: &'a PermissionSet,
    legacy_role: Option<&'a RoleMenuEntry>,
    metrics: Option<&'a FilterMetrics>,
}

impl<'a> PermissionMenuFilter<'a> {
    /// Create a filter for a session.
    ///
    /// `role` only matters when it has an entry in `role_config`.
    pub fn new(
        registry: &'a ModuleRegistry,
        permissions: &'a PermissionSet,
        role: Option<&str>,
        role_config: &'a RoleMenuConfig,
    ) -> Self {
        Self {
            registry,
            permissions,
            legacy_role: role.and_then(|r| role_config.entry(r)),
            metrics: None,
        }
    }

    /// Record visibility decisions into `metrics`.
    pub fn with_metrics(mut self, metrics: &'a FilterMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Whether the session uses a static role allow-list.
    pub fn is_legacy(&self) -> bool {
        self.legacy_role.is_some()
    }

    /// Whether `label` may be shown.
    pub fn can_view_menu(&self, label: &str) -> bool {
        let visible = self.view_by_label(label);
        if let Some(metrics) = self.metrics {
            metrics.record_check(visible);
        }
        visible
    }

    /// Whether `label` may be shown and edited.
    pub fn can_edit_menu(&self, label: &str) -> bool {
        self.can_view_menu(label) && self.edit_by_label(label)
    }

    /// Access level for `label`.
    pub fn access_level(&self, label: &str) -> AccessLevel {
        if !self.can_view_menu(label) {
            AccessLevel::None
        } else if self.edit_by_label(label) {
            AccessLevel::Write
        } else {
            AccessLevel::Read
        }
    }

    /// Prune a list of menus; nodes with no access are removed.
    pub fn filter_tree(&self, menus: &[MenuNode]) -> Vec<FilteredNode> {
        menus
            .iter()
            .filter_map(|node| self.filter_node(node, None))
            .collect()
    }

    /// Prune sections; sections with no surviving menu are dropped.
    pub fn filter_sections(&self, sections: &[MenuSection]) -> Vec<FilteredSection> {
        sections
            .iter()
            .filter_map(|section| {
                let menus = self.filter_tree(&section.menus);
                if menus.is_empty() {
                    log::debug!("Dropping empty menu section '{}'", section.title);
                    None
                } else {
                    Some(FilteredSection {
                        title: section.title.clone(),
                        menus,
                    })
                }
            })
            .collect()
    }

    fn filter_node(&self, node: &MenuNode, inherited: Option<&str>) -> Option<FilteredNode> {
        let has_module = self.module_for(&node.label).is_some();
        let own = self.access_level(&node.label);
        let effective = match inherited {
            // Legacy roles are a closed allow-list; only module-driven
            // access inherits from the parent.
            Some(parent)
                if self.legacy_role.is_none()
                    && !own.is_visible()
                    && !has_module
                    && !is_dashboard(&node.label) =>
            {
                let fallback = self.access_level(parent);
                if fallback.is_visible() {
                    log::debug!(
                        "Menu '{}' has no module, inheriting '{}' from '{}'",
                        node.label,
                        fallback,
                        parent
                    );
                }
                fallback
            }
            _ => own,
        };

        if node.is_leaf() {
            return effective.is_visible().then(|| FilteredNode {
                label: node.label.clone(),
                route: node.route.clone(),
                access: effective,
                children: Vec::new(),
            });
        }

        // Children fall back to the nearest ancestor that has a module, or to
        // this node's label when no ancestor does.
        let child_context = if has_module || inherited.is_none() {
            node.label.as_str()
        } else {
            inherited.unwrap_or(node.label.as_str())
        };
        let children: Vec<FilteredNode> = node
            .sub_menus
            .iter()
            .filter_map(|child| self.filter_node(child, Some(child_context)))
            .collect();

        if children.is_empty() && !(has_module && effective.is_visible()) {
            return None;
        }

        let access = if has_module && effective.is_visible() {
            effective
        } else {
            AccessLevel::Read
        };
        Some(FilteredNode {
            label: node.label.clone(),
            route: node.route.clone(),
            access,
            children,
        })
    }

    fn module_for(&self, label: &str) -> Option<ModuleDescriptor> {
        self.registry.find_by_display_name(label)
    }

    fn view_by_label(&self, label: &str) -> bool {
        if is_dashboard(label) {
            return true;
        }

        if let Some(entry) = self.legacy_role {
            return entry.allows(label);
        }

        // Fail closed until the registry has modules.
        if self.registry.is_empty() {
            return false;
        }

        match self.module_for(label) {
            Some(module) => match module.read_permission() {
                Some(required) => self.permissions.contains(&required),
                None => {
                    log::warn!(
                        "Module '{}' has malformed read permission '{}'",
                        module.name,
                        module.read_permission
                    );
                    false
                }
            },
            None => false,
        }
    }

    fn edit_by_label(&self, label: &str) -> bool {
        let Some(required) = self
            .module_for(label)
            .and_then(|module| module.write_permission())
        else {
            return false;
        };
        self.holds_edit(&required)
    }

    fn holds_edit(&self, required: &Permission) -> bool {
        if self.permissions.contains(required) {
            return true;
        }
        self.legacy_role
            .map(|entry| entry.grants(required))
            .unwrap_or(false)
    }
}

impl std::fmt::Debug for PermissionMenuFilter<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionMenuFilter")
            .field("permissions", &self.permissions.len())
            .field("legacy", &self.is_legacy())
            .field("registry", self.registry)
            .finish()
    }
}
