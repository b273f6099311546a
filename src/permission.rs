//! Permission definitions and validation.
//!
//! Permissions travel over the wire as `"<module>.<action>"` strings. They are
//! parsed once into a structured [`Permission`] so that wildcard handling is a
//! match on [`Action`] rather than prefix matching on raw strings.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

/// The action half of a permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Action {
    /// View access.
    Read,
    /// Modify access.
    Edit,
    /// Any action on the module; only honoured by the legacy role table.
    Wildcard,
}

impl Action {
    /// The wire spelling of the action.
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Read => "read",
            Action::Edit => "edit",
            Action::Wildcard => "*",
        }
    }
}

impl FromStr for Action {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "read" => Ok(Action::Read),
            "edit" => Ok(Action::Edit),
            "*" => Ok(Action::Wildcard),
            other => Err(Error::InvalidPermission(format!(
                "unknown action '{other}', expected 'read', 'edit' or '*'"
            ))),
        }
    }
}

/// A permission grants an action on a module.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Permission {
    module: String,
    action: Action,
}

impl Permission {
    /// Create a permission, validating the module name.
    pub fn new(module: impl Into<String>, action: Action) -> Result<Self> {
        let module = module.into();
        validate_module(&module)?;
        Ok(Self { module, action })
    }

    /// Read permission on a module.
    pub fn read(module: impl Into<String>) -> Result<Self> {
        Self::new(module, Action::Read)
    }

    /// Edit permission on a module.
    pub fn edit(module: impl Into<String>) -> Result<Self> {
        Self::new(module, Action::Edit)
    }

    /// Wildcard permission on a module (`"module.*"`).
    pub fn wildcard(module: impl Into<String>) -> Result<Self> {
        Self::new(module, Action::Wildcard)
    }

    /// The module this permission applies to.
    pub fn module(&self) -> &str {
        &self.module
    }

    /// The action this permission grants.
    pub fn action(&self) -> Action {
        self.action
    }

    /// Whether this permission, used as a pattern, covers `required`.
    ///
    /// A wildcard covers every action on the same module; anything else must
    /// match exactly.
    pub fn matches(&self, required: &Permission) -> bool {
        if self.module != required.module {
            return false;
        }
        self.action == Action::Wildcard || self.action == required.action
    }

    /// Parse a permission from `"module.action"`.
    pub fn parse(permission_str: &str) -> Result<Self> {
        let trimmed = permission_str.trim();
        let Some((module, action)) = trimmed.split_once('.') else {
            return Err(Error::InvalidPermission(format!(
                "Permission must be in format 'module.action', got: '{permission_str}'"
            )));
        };
        if action.contains('.') {
            return Err(Error::InvalidPermission(format!(
                "Permission has more than one '.': '{permission_str}'"
            )));
        }
        let action: Action = action.parse()?;
        Self::new(module, action)
    }
}

fn validate_module(module: &str) -> Result<()> {
    if module.trim().is_empty() {
        return Err(Error::InvalidPermission("module cannot be empty".to_string()));
    }
    if module.contains('\0') || module.contains('.') || module.chars().any(char::is_whitespace) {
        return Err(Error::InvalidPermission(format!(
            "module contains invalid characters: '{module}'"
        )));
    }
    Ok(())
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.module, self.action.as_str())
    }
}

impl FromStr for Permission {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Permission {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Permission> for String {
    fn from(permission: Permission) -> Self {
        permission.to_string()
    }
}

/// Per-module grant flags as returned by the permission summary endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleGrant {
    /// Read flag.
    #[serde(default)]
    pub read: bool,
    /// Edit flag.
    #[serde(default)]
    pub edit: bool,
}

/// `{ <module_name>: { read, edit } }` from `GET /me/permissions`.
pub type PermissionSummary = BTreeMap<String, ModuleGrant>;

/// A set of permissions. Order is irrelevant and duplicates collapse.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionSet {
    permissions: HashSet<Permission>,
}

impl PermissionSet {
    /// Create a new empty permission set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set from wire strings, skipping (and logging) malformed ones.
    pub fn from_strings<I, S>(strings: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self::new();
        for s in strings {
            match Permission::parse(s.as_ref()) {
                Ok(permission) => set.add(permission),
                Err(e) => log::warn!("Skipping malformed permission '{}': {e}", s.as_ref()),
            }
        }
        set
    }

    /// Flatten a permission summary into `"module.read"` / `"module.edit"`.
    pub fn from_summary(summary: &PermissionSummary) -> Self {
        let mut set = Self::new();
        for (module, grant) in summary {
            if grant.read {
                match Permission::read(module.as_str()) {
                    Ok(p) => set.add(p),
                    Err(e) => log::warn!("Skipping module '{module}' in summary: {e}"),
                }
            }
            if grant.edit {
                if let Ok(p) = Permission::edit(module.as_str()) {
                    set.add(p);
                }
            }
        }
        set
    }

    /// Add a permission to the set.
    pub fn add(&mut self, permission: Permission) {
        self.permissions.insert(permission);
    }

    /// Remove a permission from the set.
    pub fn remove(&mut self, permission: &Permission) {
        self.permissions.remove(permission);
    }

    /// Exact membership; wildcards in the set are not expanded.
    pub fn contains(&self, permission: &Permission) -> bool {
        self.permissions.contains(permission)
    }

    /// Exact membership for a wire string. Malformed strings are never held.
    pub fn contains_str(&self, permission: &str) -> bool {
        Permission::parse(permission)
            .map(|p| self.contains(&p))
            .unwrap_or(false)
    }

    /// Whether any permission in the set, used as a pattern, covers `required`.
    pub fn grants(&self, required: &Permission) -> bool {
        self.permissions.iter().any(|p| p.matches(required))
    }

    /// Iterate over the permissions.
    pub fn iter(&self) -> impl Iterator<Item = &Permission> {
        self.permissions.iter()
    }

    /// Wire strings in sorted order, for persistence and broadcast.
    pub fn to_strings(&self) -> Vec<String> {
        let mut strings: Vec<String> = self.permissions.iter().map(Permission::to_string).collect();
        strings.sort();
        strings
    }

    /// Get the number of permissions in the set.
    pub fn len(&self) -> usize {
        self.permissions.len()
    }

    /// Check if the permission set is empty.
    pub fn is_empty(&self) -> bool {
        self.permissions.is_empty()
    }

    /// Merge another permission set into this one.
    pub fn merge(&mut self, other: PermissionSet) {
        self.permissions.extend(other.permissions);
    }
}

impl FromIterator<Permission> for PermissionSet {
    fn from_iter<I: IntoIterator<Item = Permission>>(iter: I) -> Self {
        Self {
            permissions: iter.into_iter().collect(),
        }
    }
}

impl From<Vec<Permission>> for PermissionSet {
    fn from(permissions: Vec<Permission>) -> Self {
        permissions.into_iter().collect()
    }
}

impl IntoIterator for PermissionSet {
    type Item = Permission;
    type IntoIter = std::collections::hash_set::IntoIter<Permission>;

    fn into_iter(self) -> Self::IntoIter {
        self.permissions.into_iter()
    }
}

impl<'a> IntoIterator for &'a PermissionSet {
    type Item = &'a Permission;
    type IntoIter = std::collections::hash_set::Iter<'a, Permission>;

    fn into_iter(self) -> Self::IntoIter {
        self.permissions.iter()
    }
}
