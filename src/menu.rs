//! Menu tree descriptors and filtered output.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Access granted to a menu node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    /// Not visible; the node is omitted from filtered output.
    None,
    /// Visible, read-only.
    Read,
    /// Visible and editable.
    Write,
}

impl AccessLevel {
    /// Whether the node may be shown at all.
    pub fn is_visible(&self) -> bool {
        !matches!(self, AccessLevel::None)
    }

    /// Whether the node may be edited.
    pub fn can_edit(&self) -> bool {
        matches!(self, AccessLevel::Write)
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AccessLevel::None => "none",
            AccessLevel::Read => "read",
            AccessLevel::Write => "write",
        };
        f.write_str(s)
    }
}

/// A menu, submenu or sub-submenu entry.
///
/// Deserializes both `subMenus` and the deeper `subMenusTwo` into `sub_menus`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuNode {
    /// Label shown to the user; matched against module display names.
    pub label: String,
    /// Route the entry navigates to.
    #[serde(default)]
    pub route: String,
    /// Ordered children.
    #[serde(
        rename = "subMenus",
        alias = "subMenusTwo",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub sub_menus: Vec<MenuNode>,
}

impl MenuNode {
    /// Create a leaf node.
    pub fn new(label: impl Into<String>, route: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            route: route.into(),
            sub_menus: Vec::new(),
        }
    }

    /// Append a child node.
    pub fn with_child(mut self, child: MenuNode) -> Self {
        self.sub_menus.push(child);
        self
    }

    /// Whether the node has no children.
    pub fn is_leaf(&self) -> bool {
        self.sub_menus.is_empty()
    }
}

/// A top-level group of menus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuSection {
    /// Section heading.
    pub title: String,
    /// Menus in display order.
    #[serde(default)]
    pub menus: Vec<MenuNode>,
}

impl MenuSection {
    /// Create an empty section.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            menus: Vec::new(),
        }
    }

    /// Append a menu.
    pub fn with_menu(mut self, menu: MenuNode) -> Self {
        self.menus.push(menu);
        self
    }
}

/// A menu node that survived filtering, annotated with its access level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilteredNode {
    /// Label shown to the user.
    pub label: String,
    /// Route the entry navigates to.
    pub route: String,
    /// Never [`AccessLevel::None`].
    pub access: AccessLevel,
    /// Surviving children in original order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<FilteredNode>,
}

impl FilteredNode {
    /// Find a node by label anywhere in this subtree.
    pub fn find(&self, label: &str) -> Option<&FilteredNode> {
        if self.label == label {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(label))
    }
}

/// A section with at least one surviving menu.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilteredSection {
    /// Section heading.
    pub title: String,
    /// Surviving menus in original order.
    pub menus: Vec<FilteredNode>,
}

impl FilteredSection {
    /// Find a node by label anywhere in this section.
    pub fn find(&self, label: &str) -> Option<&FilteredNode> {
        self.menus.iter().find_map(|menu| menu.find(label))
    }
}

/// Normalize a label or display name for comparison: trimmed, lowercase.
pub fn normalize_label(label: &str) -> String {
    label.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_level_ordering() {
        assert!(AccessLevel::None < AccessLevel::Read);
        assert!(AccessLevel::Read < AccessLevel::Write);
        assert!(!AccessLevel::None.is_visible());
        assert!(AccessLevel::Read.is_visible());
        assert!(AccessLevel::Write.can_edit());
        assert_eq!(AccessLevel::Write.to_string(), "write");
    }

    #[test]
    fn test_menu_deserializes_both_child_keys() {
        let json = r#"{
            "label": "Employees",
            "route": "/employees",
            "subMenus": [
                {
                    "label": "Employee List",
                    "route": "/employees/list",
                    "subMenusTwo": [{ "label": "Archived", "route": "/employees/archived" }]
                }
            ]
        }"#;
        let node: MenuNode = serde_json::from_str(json).unwrap();
        assert_eq!(node.sub_menus.len(), 1);
        assert_eq!(node.sub_menus[0].sub_menus[0].label, "Archived");
        assert!(node.sub_menus[0].sub_menus[0].is_leaf());
    }

    #[test]
    fn test_normalize_label() {
        assert_eq!(normalize_label("  Employee List "), "employee list");
    }
}
