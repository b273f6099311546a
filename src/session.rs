//! Authenticated session lifecycle.
//!
//! [`AuthSession`] owns the process-wide `{user, permissions,
//! tokenExpiration}` state. It is the only component that mutates the
//! permission set. The session is persisted to the durable store, refreshed
//! proactively before the token expires, and mirrored to other tabs through
//! the [`SyncChannel`].

use crate::{
    config::CoreConfig,
    error::{Error, Result},
    module_registry::ModuleRegistry,
    permission::{PermissionSet, PermissionSummary},
    shared_data::SharedDataStore,
    storage::{read_json, write_json, KeyValueStore},
    sync::{PermissionUpdate, SyncChannel, SyncHandler, SyncMessage},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    sync::{Arc, Weak},
    time::Duration,
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Durable-store keys for the persisted session.
pub mod keys {
    pub const USER: &str = "user";
    pub const USER_ROLE: &str = "userRole";
    pub const PERMISSIONS: &str = "permissions";
    pub const TOKEN_EXPIRATION: &str = "tokenExpiration";

    pub const ALL: [&str; 4] = [USER, USER_ROLE, PERMISSIONS, TOKEN_EXPIRATION];
}

/// Token lifetime assumed when the backend omits `expires_in`.
pub const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(60 * 60);

/// Login form payload.
#[derive(Debug, Clone, Serialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

/// Body of the login and refresh endpoints. The credential itself travels
/// in an HttpOnly cookie and never appears here.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct LoginResponse {
    #[serde(default)]
    pub user: Option<Value>,
    /// Token lifetime in seconds.
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub message: Option<String>,
}

impl LoginResponse {
    /// Reject an explicit `success: false`.
    pub fn into_result(self) -> Result<Self> {
        if self.success == Some(false) {
            return Err(Error::Api {
                message: self
                    .message
                    .unwrap_or_else(|| "authentication failed".to_string()),
                errors: Vec::new(),
            });
        }
        Ok(self)
    }

    fn lifetime(&self) -> Duration {
        self.expires_in
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TOKEN_LIFETIME)
    }
}

/// Authentication endpoints of the backend.
#[async_trait]
pub trait AuthApi: Send + Sync {
    async fn login(&self, credentials: &Credentials) -> Result<LoginResponse>;
    async fn logout(&self) -> Result<()>;
    async fn refresh(&self) -> Result<LoginResponse>;
    /// `{ module: { read, edit } }` for the current user.
    async fn permission_summary(&self) -> Result<PermissionSummary>;
}

/// A snapshot of the signed-in session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    /// Opaque user record as returned by the backend.
    pub user: Value,
    pub role: Option<String>,
    pub permissions: PermissionSet,
    pub token_expiration: DateTime<Utc>,
}

impl SessionState {
    /// `user.id`, as a string whether the backend sent a number or a string.
    pub fn user_id(&self) -> Option<String> {
        user_id_of(&self.user)
    }

    /// Whether the token has expired at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.token_expiration
    }

    /// Time left on the token at `now`, zero once expired.
    pub fn remaining_at(&self, now: DateTime<Utc>) -> Duration {
        (self.token_expiration - now).to_std().unwrap_or(Duration::ZERO)
    }
}

fn user_id_of(user: &Value) -> Option<String> {
    match user.get("id")? {
        Value::String(id) => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

/// `user.role`, or the first entry of `user.roles` (string or `{name}`).
fn role_of(user: &Value) -> Option<String> {
    if let Some(role) = user.get("role").and_then(Value::as_str) {
        return Some(role.to_string());
    }
    let first = user.get("roles")?.as_array()?.first()?;
    first
        .as_str()
        .or_else(|| first.get("name").and_then(Value::as_str))
        .map(str::to_string)
}

/// Permissions embedded in the user record, used when the summary endpoint
/// is unavailable at login.
fn permissions_of(user: &Value) -> PermissionSet {
    user.get("permissions")
        .and_then(Value::as_array)
        .map(|items| PermissionSet::from_strings(items.iter().filter_map(Value::as_str)))
        .unwrap_or_default()
}

/// When to refresh a token with `remaining` lifetime.
///
/// `lead` before expiry; immediately when less than `lead` but more than
/// `min_remaining` is left; never when less than that is left.
pub fn refresh_delay(remaining: Duration, lead: Duration, min_remaining: Duration) -> Option<Duration> {
    if remaining > lead {
        Some(remaining - lead)
    } else if remaining > min_remaining {
        Some(Duration::ZERO)
    } else {
        None
    }
}

struct SessionInner {
    api: Arc<dyn AuthApi>,
    storage: Arc<dyn KeyValueStore>,
    registry: Arc<ModuleRegistry>,
    shared_data: Arc<SharedDataStore>,
    channel: SyncChannel,
    config: CoreConfig,
    state: RwLock<Option<SessionState>>,
    /// Last applied permission version and the tab that produced it.
    permission_version: Mutex<(u64, Uuid)>,
    refresh_timer: Mutex<Option<CancellationToken>>,
}

/// The authenticated session. Clones share state.
#[derive(Clone)]
pub struct AuthSession {
    inner: Arc<SessionInner>,
}

impl AuthSession {
    /// Create a signed-out session.
    pub fn new(
        api: Arc<dyn AuthApi>,
        storage: Arc<dyn KeyValueStore>,
        registry: Arc<ModuleRegistry>,
        shared_data: Arc<SharedDataStore>,
        channel: SyncChannel,
        config: CoreConfig,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                api,
                storage,
                registry,
                shared_data,
                channel,
                config,
                state: RwLock::new(None),
                permission_version: Mutex::new((0, Uuid::nil())),
                refresh_timer: Mutex::new(None),
            }),
        }
    }

    /// Sign in and establish the session.
    pub async fn login(&self, credentials: &Credentials) -> Result<SessionState> {
        let response = self.inner.api.login(credentials).await?;
        let user = response.user.clone().unwrap_or(Value::Null);

        let permissions = match self.inner.api.permission_summary().await {
            Ok(summary) => PermissionSet::from_summary(&summary),
            Err(e) => {
                log::warn!("Permission summary unavailable at login, using user record: {e}");
                permissions_of(&user)
            }
        };

        let state = SessionState {
            role: role_of(&user),
            token_expiration: expiration_after(response.lifetime()),
            user,
            permissions,
        };
        self.adopt(state.clone());
        log::info!(
            "Logged in user {:?} with role {:?} and {} permission(s)",
            state.user_id(),
            state.role,
            state.permissions.len()
        );
        Ok(state)
    }

    /// Sign out locally, tell the backend, and tell other tabs.
    ///
    /// Local state is cleared even if the backend call fails.
    pub async fn logout(&self) -> Result<()> {
        let user_id = self.user_id();
        if let Err(e) = self.inner.api.logout().await {
            log::warn!("Backend logout failed, clearing local session anyway: {e}");
        }
        self.clear_local();
        if let Some(user_id) = user_id {
            self.inner
                .channel
                .publish(&SyncMessage::Logout { user_id })?;
        }
        log::info!("Logged out");
        Ok(())
    }

    /// Renew the token now and reschedule the proactive refresh.
    ///
    /// A 401 from the backend ends the session.
    pub async fn refresh_token(&self) -> Result<DateTime<Utc>> {
        let expiration = self.renew_token().await?;
        self.schedule_refresh();
        Ok(expiration)
    }

    async fn renew_token(&self) -> Result<DateTime<Utc>> {
        if self.inner.state.read().is_none() {
            return Err(Error::NotAuthenticated);
        }
        let response = match self.inner.api.refresh().await {
            Ok(response) => response,
            Err(e) => {
                if matches!(e, Error::Transport { status: Some(401), .. }) {
                    log::warn!("Token refresh rejected, ending session");
                    self.clear_local();
                } else {
                    log::warn!("Token refresh failed: {e}");
                }
                return Err(e);
            }
        };

        let expiration = expiration_after(response.lifetime());
        {
            let mut state = self.inner.state.write();
            let Some(state) = state.as_mut() else {
                return Err(Error::NotAuthenticated);
            };
            state.token_expiration = expiration;
            if let Some(user) = response.user {
                state.user = user;
            }
        }
        self.persist();
        log::info!("Token refreshed, expires at {expiration}");
        Ok(expiration)
    }

    /// Re-read permissions from the backend and broadcast them.
    ///
    /// On failure the previous permission set stays in place.
    pub async fn refresh_permissions(&self) -> Result<PermissionSet> {
        let user_id = self.user_id().ok_or(Error::NotAuthenticated)?;
        let summary = self.inner.api.permission_summary().await?;
        let permissions = PermissionSet::from_summary(&summary);

        let version = {
            let mut applied = self.inner.permission_version.lock();
            *applied = (applied.0 + 1, self.inner.channel.origin());
            applied.0
        };
        self.set_permissions(permissions.clone())?;
        self.inner.channel.publish(&SyncMessage::PermissionUpdate {
            permissions: permissions.to_strings(),
            version,
            user_id,
        })?;
        Ok(permissions)
    }

    /// Apply a permission update from another tab. Returns whether it was
    /// applied.
    ///
    /// Updates are ordered by version, then by the id of the tab that sent
    /// them, so tabs that publish the same version concurrently all settle
    /// on the same one. Updates not newer than the last applied are ignored.
    pub fn apply_remote_permissions(&self, update: PermissionUpdate) -> Result<bool> {
        {
            let mut applied = self.inner.permission_version.lock();
            let incoming = (update.version, update.origin);
            if incoming <= *applied {
                log::debug!(
                    "Ignoring permission update v{} (have v{})",
                    update.version,
                    applied.0
                );
                return Ok(false);
            }
            *applied = incoming;
        }
        self.set_permissions(PermissionSet::from_strings(&update.permissions))?;
        Ok(true)
    }

    fn set_permissions(&self, permissions: PermissionSet) -> Result<()> {
        {
            let mut state = self.inner.state.write();
            let state = state.as_mut().ok_or(Error::NotAuthenticated)?;
            state.permissions = permissions;
        }
        self.persist();
        Ok(())
    }

    /// Merge a profile change into the user record and broadcast it.
    pub fn update_profile(&self, update_type: &str, data: Value) -> Result<()> {
        let user_id = self.user_id().ok_or(Error::NotAuthenticated)?;
        self.apply_profile(&data)?;
        self.inner.channel.publish(&SyncMessage::ProfileUpdate {
            update_type: update_type.to_string(),
            data,
            user_id,
        })?;
        Ok(())
    }

    fn apply_profile(&self, data: &Value) -> Result<()> {
        {
            let mut state = self.inner.state.write();
            let state = state.as_mut().ok_or(Error::NotAuthenticated)?;
            match (&mut state.user, data) {
                (Value::Object(user), Value::Object(changes)) => {
                    for (key, value) in changes {
                        user.insert(key.clone(), value.clone());
                    }
                }
                (user, data) => *user = data.clone(),
            }
            state.role = role_of(&state.user).or(state.role.take());
        }
        self.persist();
        Ok(())
    }

    /// Reload a persisted session. Returns whether a live session was
    /// restored; an expired one is discarded.
    pub fn restore(&self) -> Result<bool> {
        let storage = self.inner.storage.as_ref();
        let (Some(user), Some(expiration)) = (
            read_json::<Value>(storage, keys::USER)?,
            storage.get(keys::TOKEN_EXPIRATION)?,
        ) else {
            return Ok(false);
        };

        let token_expiration = match DateTime::parse_from_rfc3339(&expiration) {
            Ok(at) => at.with_timezone(&Utc),
            Err(e) => {
                log::warn!("Discarding persisted session with bad expiration '{expiration}': {e}");
                self.remove_persisted();
                return Ok(false);
            }
        };
        if Utc::now() >= token_expiration {
            log::info!("Persisted session expired at {token_expiration}, discarding");
            self.remove_persisted();
            return Ok(false);
        }

        let permissions: Vec<String> = read_json(storage, keys::PERMISSIONS)?.unwrap_or_default();
        let state = SessionState {
            role: storage.get(keys::USER_ROLE)?.or_else(|| role_of(&user)),
            permissions: PermissionSet::from_strings(&permissions),
            user,
            token_expiration,
        };
        log::info!("Restored session for user {:?}", state.user_id());
        *self.inner.state.write() = Some(state);
        self.schedule_refresh();
        Ok(true)
    }

    /// Drop all local session state without contacting the backend or
    /// other tabs.
    pub fn clear_local(&self) {
        self.cancel_refresh();
        *self.inner.state.write() = None;
        *self.inner.permission_version.lock() = (0, Uuid::nil());
        self.remove_persisted();
        self.inner.registry.clear();
        self.inner.shared_data.reset();
    }

    /// Whether there is no session or its token has expired.
    pub fn is_expired(&self) -> bool {
        self.inner
            .state
            .read()
            .as_ref()
            .map_or(true, |state| state.is_expired_at(Utc::now()))
    }

    /// Whether a live session exists.
    pub fn is_authenticated(&self) -> bool {
        !self.is_expired()
    }

    /// Current session snapshot.
    pub fn state(&self) -> Option<SessionState> {
        self.inner.state.read().clone()
    }

    /// Current permission set; empty when signed out.
    pub fn permissions(&self) -> PermissionSet {
        self.inner
            .state
            .read()
            .as_ref()
            .map(|state| state.permissions.clone())
            .unwrap_or_default()
    }

    /// Current role.
    pub fn role(&self) -> Option<String> {
        self.inner.state.read().as_ref().and_then(|s| s.role.clone())
    }

    /// Current user id.
    pub fn user_id(&self) -> Option<String> {
        self.inner.state.read().as_ref().and_then(SessionState::user_id)
    }

    /// The module registry cleared on logout.
    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.inner.registry
    }

    /// Shared reference data cleared on logout.
    pub fn shared_data(&self) -> &Arc<SharedDataStore> {
        &self.inner.shared_data
    }

    /// Whether a proactive refresh is scheduled.
    pub fn has_refresh_scheduled(&self) -> bool {
        self.inner
            .refresh_timer
            .lock()
            .as_ref()
            .is_some_and(|token| !token.is_cancelled())
    }

    fn adopt(&self, state: SessionState) {
        *self.inner.state.write() = Some(state);
        self.persist();
        self.schedule_refresh();
    }

    fn persist(&self) {
        let Some(state) = self.state() else {
            return;
        };
        let storage = self.inner.storage.as_ref();
        let outcome = write_json(storage, keys::USER, &state.user)
            .and_then(|_| write_json(storage, keys::PERMISSIONS, &state.permissions.to_strings()))
            .and_then(|_| storage.set(keys::TOKEN_EXPIRATION, &state.token_expiration.to_rfc3339()))
            .and_then(|_| match &state.role {
                Some(role) => storage.set(keys::USER_ROLE, role),
                None => storage.remove(keys::USER_ROLE).map(|_| ()),
            });
        if let Err(e) = outcome {
            log::warn!("Failed to persist session: {e}");
        }
    }

    fn remove_persisted(&self) {
        for key in keys::ALL {
            if let Err(e) = self.inner.storage.remove(key) {
                log::warn!("Failed to remove persisted '{key}': {e}");
            }
        }
    }

    fn cancel_refresh(&self) {
        if let Some(token) = self.inner.refresh_timer.lock().take() {
            token.cancel();
        }
    }

    /// Replace any scheduled refresh with one for the current expiration.
    fn schedule_refresh(&self) {
        let cancel = CancellationToken::new();
        if let Some(previous) = self.inner.refresh_timer.lock().replace(cancel.clone()) {
            previous.cancel();
        }
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(refresh_loop(Arc::downgrade(&self.inner), cancel));
            }
            Err(_) => log::warn!("No async runtime, proactive token refresh disabled"),
        }
    }

    fn next_refresh_delay(&self) -> Option<Duration> {
        let remaining = self.inner.state.read().as_ref()?.remaining_at(Utc::now());
        refresh_delay(
            remaining,
            self.inner.config.token_refresh_lead,
            self.inner.config.token_refresh_min_remaining,
        )
    }
}

fn expiration_after(lifetime: Duration) -> DateTime<Utc> {
    let lifetime = chrono::Duration::from_std(lifetime).unwrap_or(chrono::Duration::MAX);
    Utc::now()
        .checked_add_signed(lifetime)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Sleeps until the next refresh is due, renews, and repeats.
async fn refresh_loop(session: Weak<SessionInner>, cancel: CancellationToken) {
    let mut renewed = false;
    loop {
        let delay = {
            let Some(inner) = session.upgrade() else {
                return;
            };
            AuthSession { inner }.next_refresh_delay()
        };
        let Some(delay) = delay else {
            log::debug!("Token too close to expiry, no refresh scheduled");
            return;
        };
        if renewed && delay.is_zero() {
            log::warn!("Token lifetime is shorter than the refresh lead, stopping proactive refresh");
            return;
        }

        log::debug!("Token refresh scheduled in {delay:?}");
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }

        let Some(inner) = session.upgrade() else {
            return;
        };
        if let Err(e) = (AuthSession { inner }).renew_token().await {
            log::warn!("Proactive token refresh failed: {e}");
            return;
        }
        renewed = true;
    }
}

impl std::fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSession")
            .field("user_id", &self.user_id())
            .field("role", &self.role())
            .field("expired", &self.is_expired())
            .finish()
    }
}

#[async_trait]
impl SyncHandler for AuthSession {
    fn local_user_id(&self) -> Option<String> {
        self.user_id()
    }

    async fn on_permission_update(&self, update: PermissionUpdate) -> Result<()> {
        self.apply_remote_permissions(update).map(|_| ())
    }

    async fn on_profile_update(&self, update_type: &str, data: &Value) -> Result<()> {
        log::debug!("Applying {update_type} profile update from another tab");
        self.apply_profile(data)
    }

    async fn on_logout(&self) -> Result<()> {
        log::info!("Logged out from another tab");
        self.clear_local();
        Ok(())
    }
}
