//! Static menu allow-lists for the fixed set of legacy roles.
//!
//! A role listed here sees exactly the labels in its allow-list. Its seed
//! permissions (which may be `module.*` wildcards) decide edit access on top
//! of whatever the session holds. Roles not listed take the dynamic,
//! module-based path in the menu filter.

use crate::{
    error::Result,
    menu::normalize_label,
    permission::{Permission, PermissionSet},
};
use std::collections::{HashMap, HashSet};

/// Allow-list and seed permissions for one legacy role.
#[derive(Debug, Clone, Default)]
pub struct RoleMenuEntry {
    menus: HashSet<String>,
    permissions: PermissionSet,
}

impl RoleMenuEntry {
    /// Whether `label` (trimmed, case-insensitive) is allowed.
    pub fn allows(&self, label: &str) -> bool {
        self.menus.contains(&normalize_label(label))
    }

    /// Seed permissions, wildcards included.
    pub fn permissions(&self) -> &PermissionSet {
        &self.permissions
    }

    /// Whether the seed permissions cover `required`.
    pub fn grants(&self, required: &Permission) -> bool {
        self.permissions.grants(required)
    }
}

/// Role name (case-insensitive) to [`RoleMenuEntry`].
#[derive(Debug, Clone, Default)]
pub struct RoleMenuConfig {
    roles: HashMap<String, RoleMenuEntry>,
}

impl RoleMenuConfig {
    /// An empty table: every role takes the dynamic path.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a role with its allowed labels and seed permissions.
    pub fn with_role<L, P>(mut self, role: &str, labels: L, permissions: P) -> Result<Self>
    where
        L: IntoIterator,
        L::Item: AsRef<str>,
        P: IntoIterator,
        P::Item: AsRef<str>,
    {
        let menus = labels
            .into_iter()
            .map(|label| normalize_label(label.as_ref()))
            .collect();
        let permissions = permissions
            .into_iter()
            .map(|p| Permission::parse(p.as_ref()))
            .collect::<Result<PermissionSet>>()?;
        self.roles
            .insert(normalize_label(role), RoleMenuEntry { menus, permissions });
        Ok(self)
    }

    /// Look up a role.
    pub fn entry(&self, role: &str) -> Option<&RoleMenuEntry> {
        self.roles.get(&normalize_label(role))
    }

    /// Whether the role has a static entry.
    pub fn is_legacy_role(&self, role: &str) -> bool {
        self.entry(role).is_some()
    }

    /// Names of all configured roles.
    pub fn roles(&self) -> impl Iterator<Item = &str> {
        self.roles.keys().map(String::as_str)
    }

    /// The hand-maintained table for the built-in roles.
    pub fn standard() -> Self {
        const EMPLOYEES: &[&str] = &["Employees", "Employee List", "Add Employee", "Departments", "Positions", "Work Locations"];
        const LEAVE: &[&str] = &["Leave Management", "Leave Requests", "Leave Types", "Leave Balances"];
        const PAYROLL: &[&str] = &["Payroll", "Payroll Runs", "Payslips"];
        const GRANTS: &[&str] = &["Grants", "Grant List", "Grant Structure"];
        const TRAINING: &[&str] = &["Training", "Training Programs", "Employee Training"];
        const TRAVEL: &[&str] = &["Travel Requests"];
        const ADMIN: &[&str] = &["Administration", "User Management", "Roles & Permissions", "Modules"];
        const SELF_SERVICE: &[&str] = &["My Profile"];
        const ASSISTANT_EMPLOYEES: &[&str] = &["Employees", "Employee List", "Add Employee"];
        const ASSISTANT_TRAINING: &[&str] = &["Training", "Training Programs"];
        const OWN_LEAVE: &[&str] = &["Leave Management", "Leave Requests"];

        let all = |groups: &[&[&'static str]]| -> Vec<&'static str> {
            groups.iter().flat_map(|g| g.iter().copied()).collect()
        };

        let build = || -> Result<Self> {
            Self::new()
                .with_role(
                    "admin",
                    all(&[EMPLOYEES, LEAVE, PAYROLL, GRANTS, TRAINING, TRAVEL, ADMIN, SELF_SERVICE]),
                    [
                        "employee.*", "department.*", "position.*", "leave.*", "payroll.*",
                        "grant.*", "training.*", "travel.*", "admin.*",
                    ],
                )?
                .with_role(
                    "hr-manager",
                    all(&[EMPLOYEES, LEAVE, PAYROLL, GRANTS, TRAINING, TRAVEL, SELF_SERVICE]),
                    [
                        "employee.*", "department.*", "position.*", "leave.*", "payroll.*",
                        "grant.*", "training.*", "travel.*",
                    ],
                )?
                .with_role(
                    "hr-assistant",
                    all(&[ASSISTANT_EMPLOYEES, LEAVE, ASSISTANT_TRAINING, TRAVEL, SELF_SERVICE]),
                    ["employee.*", "leave.read", "leave.edit", "training.read", "travel.*"],
                )?
                .with_role(
                    "employee",
                    all(&[OWN_LEAVE, TRAVEL, SELF_SERVICE]),
                    ["leave.read", "travel.read"],
                )
        };

        // Only reachable if one of the literals above is malformed.
        build().unwrap_or_else(|e| {
            log::error!("Built-in role table is invalid: {e}");
            Self::new()
        })
    }
}
