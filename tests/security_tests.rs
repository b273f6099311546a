//! Session and cross-tab tests: access must never outlive the session, and
//! one user's tab must never act on another user's messages.

mod common;

use common::{hr_modules, FakeBackend};
use hrms_core::{
    sync::PermissionUpdate, transport::paths, AccessLevel, AuthSession, CoreConfig, Credentials,
    KeyValueStore, MemoryStorage, ModuleRegistry, PermissionMenuFilter, ResourceKind, RestClient,
    RoleMenuConfig, SharedDataStore, SyncChannel, SyncListener, SyncMessage,
};
use serde_json::json;
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

struct Tab {
    storage: Arc<MemoryStorage>,
    session: AuthSession,
}

fn open_tab(backend: &Arc<FakeBackend>, channel: SyncChannel) -> Tab {
    let client = RestClient::new(backend.transport());
    let config = CoreConfig::default();
    let storage = Arc::new(MemoryStorage::new());
    let registry = Arc::new(ModuleRegistry::new(
        Arc::new(client.clone()),
        storage.clone(),
        &config,
    ));
    let shared = Arc::new(SharedDataStore::new(&client, &config));
    let session = AuthSession::new(
        Arc::new(client),
        storage.clone(),
        registry,
        shared,
        channel,
        config,
    );
    Tab { storage, session }
}

fn backend_for(user_id: u64) -> Arc<FakeBackend> {
    let backend = FakeBackend::new();
    backend.raw(
        paths::LOGIN,
        json!({"success": true, "expires_in": 3600, "user": {"id": user_id, "role": "recruiter"}}),
    );
    backend.raw(paths::LOGOUT, json!({"success": true}));
    backend.ok(paths::MY_PERMISSIONS, json!({"employee": {"read": true, "edit": true}}));
    backend.ok(paths::MODULES, hr_modules());
    backend.ok(paths::EMPLOYEES, json!([{"id": 1}]));
    backend
}

fn credentials() -> Credentials {
    Credentials::new("hr@example.com", "secret")
}

#[tokio::test]
async fn test_logout_revokes_menu_access_and_cached_data() {
    let backend = backend_for(42);
    let tab = open_tab(&backend, SyncChannel::open("hrms-auth-sync", 16));
    tab.session.login(&credentials()).await.unwrap();
    tab.session.registry().load(false).await;
    tab.session.shared_data().fetch(ResourceKind::Employees).await.unwrap();

    let roles = RoleMenuConfig::standard();
    let permissions = tab.session.permissions();
    let filter = PermissionMenuFilter::new(tab.session.registry(), &permissions, None, &roles);
    assert_eq!(filter.access_level("Employee List"), AccessLevel::Write);

    tab.session.logout().await.unwrap();

    let permissions = tab.session.permissions();
    let filter = PermissionMenuFilter::new(tab.session.registry(), &permissions, None, &roles);
    assert_eq!(filter.access_level("Employee List"), AccessLevel::None);
    assert!(filter.can_view_menu("Dashboard"));
    assert!(tab.storage.keys().unwrap().is_empty());

    // A new session refetches instead of reusing the previous account's data.
    tab.session.login(&credentials()).await.unwrap();
    tab.session.shared_data().fetch(ResourceKind::Employees).await.unwrap();
    assert_eq!(backend.calls_to(paths::EMPLOYEES), 2);
}

#[tokio::test(start_paused = true)]
async fn test_requests_in_flight_at_logout_do_not_repopulate() {
    let backend = backend_for(42);
    backend.slow(paths::EMPLOYEES, Duration::from_secs(2));
    backend.slow(paths::MODULES, Duration::from_secs(2));
    let tab = open_tab(&backend, SyncChannel::open("hrms-auth-sync", 16));
    tab.session.login(&credentials()).await.unwrap();

    let shared = Arc::clone(tab.session.shared_data());
    let employees = tokio::spawn(async move { shared.fetch(ResourceKind::Employees).await });
    let registry = Arc::clone(tab.session.registry());
    let modules = tokio::spawn(async move { registry.load(false).await });
    while backend.calls_to(paths::EMPLOYEES) == 0 || backend.calls_to(paths::MODULES) == 0 {
        tokio::task::yield_now().await;
    }

    tab.session.logout().await.unwrap();
    let _ = employees.await.unwrap();
    let _ = modules.await.unwrap();

    assert!(!tab.session.shared_data().store(ResourceKind::Employees).is_loaded());
    assert!(!tab.session.registry().is_loaded());
    assert!(tab.session.registry().is_empty());
    assert!(tab.storage.keys().unwrap().is_empty());
}

#[tokio::test]
async fn test_logout_propagates_to_other_tabs_of_same_user() {
    let backend = backend_for(42);
    let bus = SyncChannel::open("hrms-auth-sync", 16);
    let tab_a = open_tab(&backend, bus.join());
    let tab_b = open_tab(&backend, bus.join());
    tab_a.session.login(&credentials()).await.unwrap();
    tab_b.session.login(&credentials()).await.unwrap();

    let listener = SyncListener::new(
        bus.join().subscribe(),
        Arc::new(tab_b.session.clone()),
        Duration::from_millis(500),
    );
    let mut inbox = bus.subscribe();

    tab_a.session.logout().await.unwrap();
    let message = inbox.recv().await.unwrap();
    assert_eq!(message, SyncMessage::Logout { user_id: "42".into() });

    assert!(listener.dispatch(message).await);
    assert!(tab_b.session.state().is_none());
    assert!(tab_b.storage.keys().unwrap().is_empty());
}

#[tokio::test]
async fn test_messages_for_another_user_are_ignored() {
    let backend = backend_for(42);
    let bus = SyncChannel::open("hrms-auth-sync", 16);
    let tab = open_tab(&backend, bus.join());
    tab.session.login(&credentials()).await.unwrap();

    let listener = SyncListener::new(
        bus.join().subscribe(),
        Arc::new(tab.session.clone()),
        Duration::from_millis(500),
    );

    assert!(!listener.dispatch(SyncMessage::Logout { user_id: "7".into() }).await);
    assert!(
        !listener
            .dispatch(SyncMessage::PermissionUpdate {
                permissions: vec!["payroll.read".into(), "payroll.edit".into()],
                version: 99,
                user_id: "7".into(),
            })
            .await
    );
    assert!(tab.session.state().is_some());
    assert!(!tab.session.permissions().contains_str("payroll.read"));
}

#[tokio::test(start_paused = true)]
async fn test_permission_updates_converge_across_tabs() {
    let backend = backend_for(42);
    let bus = SyncChannel::open("hrms-auth-sync", 16);
    let tab_a = open_tab(&backend, bus.join());
    let tab_b = open_tab(&backend, bus.join());
    tab_a.session.login(&credentials()).await.unwrap();
    tab_b.session.login(&credentials()).await.unwrap();

    let shutdown = CancellationToken::new();
    let listener_task = SyncListener::new(
        bus.join().subscribe(),
        Arc::new(tab_b.session.clone()),
        Duration::from_millis(500),
    )
    .spawn(shutdown.clone());

    backend.ok(
        paths::MY_PERMISSIONS,
        json!({"employee": {"read": true, "edit": false}, "leave": {"read": true, "edit": true}}),
    );
    tab_a.session.refresh_permissions().await.unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!tab_b.session.permissions().contains_str("leave.read"), "still debouncing");

    tokio::time::sleep(Duration::from_secs(1)).await;
    let permissions = tab_b.session.permissions();
    assert!(permissions.contains_str("leave.edit"));
    assert!(!permissions.contains_str("employee.edit"));
    assert_eq!(permissions, tab_a.session.permissions());

    // A stale replay does not roll the permissions back.
    let stale = tab_b
        .session
        .apply_remote_permissions(PermissionUpdate {
            permissions: vec!["employee.edit".into()],
            version: 1,
            origin: Uuid::nil(),
        })
        .unwrap();
    assert!(!stale);

    shutdown.cancel();
    listener_task.await.unwrap();
}

#[tokio::test]
async fn test_restored_session_requires_unexpired_token() {
    let backend = backend_for(42);
    let tab = open_tab(&backend, SyncChannel::open("hrms-auth-sync", 16));
    tab.storage.set("user", r#"{"id": 42}"#).unwrap();
    tab.storage.set("permissions", r#"["payroll.edit"]"#).unwrap();
    tab.storage.set("tokenExpiration", "2001-01-01T00:00:00Z").unwrap();

    assert!(!tab.session.restore().unwrap());
    assert!(tab.session.permissions().is_empty());
    assert!(tab.session.is_expired());
    assert!(tab.storage.get("permissions").unwrap().is_none());
}
