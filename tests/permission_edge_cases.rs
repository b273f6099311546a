//! Edge case tests for permission strings and the role allow-lists.

use hrms_core::{
    permission::ModuleGrant, Action, Error, Permission, PermissionSet, PermissionSummary,
    RoleMenuConfig,
};

#[test]
fn test_malformed_permission_strings_are_rejected() {
    let malformed = vec![
        "",
        ".",
        "employee",
        "employee.",
        ".read",
        "employee.read.extra",
        "employee..read",
        "employee.write",
        "employee:read",
        "emp loyee.read",
        "employee\0.read",
        "employee.READ",
    ];

    for input in malformed {
        match Permission::parse(input) {
            Err(Error::InvalidPermission(_)) => {}
            other => panic!("'{}' should be rejected, got {other:?}", input.escape_debug()),
        }
    }
}

#[test]
fn test_surrounding_whitespace_is_tolerated() {
    let permission = Permission::parse("  leave.edit\n").unwrap();
    assert_eq!(permission.module(), "leave");
    assert_eq!(permission.action(), Action::Edit);
    assert_eq!(permission.to_string(), "leave.edit");
}

#[test]
fn test_wire_strings_skip_malformed_entries() {
    let set = PermissionSet::from_strings(["employee.read", "garbage", "payroll.edit", "employee.read"]);
    assert_eq!(set.len(), 2);
    assert!(set.contains_str("employee.read"));
    assert!(set.contains_str("payroll.edit"));
    assert!(!set.contains_str("garbage"));
}

#[test]
fn test_wildcard_never_satisfies_exact_membership() {
    let set = PermissionSet::from_strings(["employee.*"]);
    let read = Permission::read("employee").unwrap();

    assert!(!set.contains(&read), "dynamic path uses exact membership");
    assert!(set.grants(&read), "legacy path honours wildcards");
    assert!(!set.grants(&Permission::read("employees").unwrap()), "no prefix matching");
}

#[test]
fn test_permission_set_serde_is_a_plain_string_array() {
    let set = PermissionSet::from_strings(["leave.read", "leave.edit"]);
    let json = serde_json::to_value(&set).unwrap();
    let mut strings: Vec<String> = serde_json::from_value(json.clone()).unwrap();
    strings.sort();
    assert_eq!(strings, vec!["leave.edit", "leave.read"]);

    let back: PermissionSet = serde_json::from_value(json).unwrap();
    assert_eq!(back, set);
    assert!(serde_json::from_str::<PermissionSet>(r#"["leave"]"#).is_err());
}

#[test]
fn test_summary_with_no_flags_grants_nothing() {
    let mut summary = PermissionSummary::new();
    summary.insert("travel".into(), ModuleGrant::default());
    summary.insert("training".into(), ModuleGrant { read: false, edit: true });

    let set = PermissionSet::from_summary(&summary);
    assert_eq!(set.to_strings(), vec!["training.edit".to_string()]);
}

#[test]
fn test_role_lookup_is_case_and_whitespace_insensitive() {
    let roles = RoleMenuConfig::standard();
    assert!(roles.is_legacy_role(" ADMIN "));
    assert!(roles.entry("Hr-Assistant").unwrap().allows("ADD EMPLOYEE"));
    assert!(!roles.entry("hr-assistant").unwrap().allows("Payroll"));
    assert!(!roles.is_legacy_role("super-admin"));
}

#[test]
fn test_custom_role_table() {
    let roles = RoleMenuConfig::new()
        .with_role("auditor", ["Payroll", "Payslips"], ["payroll.read"])
        .unwrap();
    let auditor = roles.entry("auditor").unwrap();
    assert!(auditor.allows("payslips"));
    assert!(!auditor.grants(&Permission::edit("payroll").unwrap()));
    assert!(roles.entry("admin").is_none());
}
