//! Cross-tab session synchronization.
//!
//! Every open client ("tab") holds a [`SyncChannel`] handle on one named
//! broadcast bus. Messages are typed [`SyncMessage`]s carried as JSON, so the
//! wire shape matches `{type: "PERMISSION_UPDATE", ...}`. A handle never
//! receives its own messages.
//!
//! [`SyncListener`] drives a [`SyncHandler`] from a channel, dropping
//! messages addressed to another user. Permission updates go through a
//! [`PermissionUpdateQueue`], which debounces bursts and applies updates one
//! at a time in arrival order.

use crate::{
    config::CoreConfig,
    error::{Error, Result},
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{collections::VecDeque, sync::Arc, time::Duration};
use tokio::{
    sync::{broadcast, mpsc},
    task::JoinHandle,
};
use tokio_util::sync::{CancellationToken, DropGuard};
use uuid::Uuid;

/// A message exchanged between tabs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncMessage {
    /// The sender's permission set changed.
    #[serde(rename_all = "camelCase")]
    PermissionUpdate {
        permissions: Vec<String>,
        version: u64,
        user_id: String,
    },
    /// The sender updated part of the user profile.
    #[serde(rename_all = "camelCase")]
    ProfileUpdate {
        update_type: String,
        data: Value,
        user_id: String,
    },
    /// The sender logged out.
    #[serde(rename_all = "camelCase")]
    Logout { user_id: String },
}

impl SyncMessage {
    /// The user the message concerns.
    pub fn user_id(&self) -> &str {
        match self {
            SyncMessage::PermissionUpdate { user_id, .. }
            | SyncMessage::ProfileUpdate { user_id, .. }
            | SyncMessage::Logout { user_id } => user_id,
        }
    }

    /// Wire name of the message type.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncMessage::PermissionUpdate { .. } => "PERMISSION_UPDATE",
            SyncMessage::ProfileUpdate { .. } => "PROFILE_UPDATE",
            SyncMessage::Logout { .. } => "LOGOUT",
        }
    }
}

#[derive(Debug, Clone)]
struct Frame {
    origin: Uuid,
    payload: Arc<str>,
}

/// One tab's handle on the broadcast bus.
///
/// [`join`](Self::join) creates a handle for another tab on the same bus.
#[derive(Debug, Clone)]
pub struct SyncChannel {
    name: Arc<str>,
    origin: Uuid,
    sender: broadcast::Sender<Frame>,
}

impl SyncChannel {
    /// Open a new bus.
    pub fn open(name: impl Into<String>, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            name: Arc::from(name.into()),
            origin: Uuid::new_v4(),
            sender,
        }
    }

    /// Open a bus using the configured name and capacity.
    pub fn from_config(config: &CoreConfig) -> Self {
        Self::open(config.channel_name.clone(), config.channel_capacity)
    }

    /// A handle for another tab on the same bus.
    pub fn join(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            origin: Uuid::new_v4(),
            sender: self.sender.clone(),
        }
    }

    /// Channel name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// This handle's origin id.
    pub fn origin(&self) -> Uuid {
        self.origin
    }

    /// Broadcast `message` to every other handle. Returns how many
    /// subscribers (including this handle's own) were reached.
    pub fn publish(&self, message: &SyncMessage) -> Result<usize> {
        let payload = serde_json::to_string(message)?;
        let frame = Frame {
            origin: self.origin,
            payload: Arc::from(payload),
        };
        // No subscribers is not an error: there may be no other tab open.
        let reached = self.sender.send(frame).unwrap_or(0);
        log::debug!(
            "Published {} on '{}' to {reached} subscriber(s)",
            message.kind(),
            self.name
        );
        Ok(reached)
    }

    /// Subscribe to messages from other handles.
    pub fn subscribe(&self) -> SyncReceiver {
        SyncReceiver {
            name: Arc::clone(&self.name),
            origin: self.origin,
            receiver: self.sender.subscribe(),
        }
    }
}

/// Receiving side of a [`SyncChannel`] handle.
#[derive(Debug)]
pub struct SyncReceiver {
    name: Arc<str>,
    origin: Uuid,
    receiver: broadcast::Receiver<Frame>,
}

impl SyncReceiver {
    /// Next message from another handle, or `None` once the bus is closed.
    ///
    /// Own messages and undecodable frames are skipped.
    pub async fn recv(&mut self) -> Option<SyncMessage> {
        self.recv_with_origin().await.map(|(_, message)| message)
    }

    /// Like [`recv`](Self::recv), also returning the sender's origin id.
    pub async fn recv_with_origin(&mut self) -> Option<(Uuid, SyncMessage)> {
        loop {
            match self.receiver.recv().await {
                Ok(frame) if frame.origin == self.origin => continue,
                Ok(frame) => match serde_json::from_str(&frame.payload) {
                    Ok(message) => return Some((frame.origin, message)),
                    Err(e) => log::warn!("Dropping undecodable message on '{}': {e}", self.name),
                },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::warn!("Receiver on '{}' lagged, {skipped} message(s) lost", self.name);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// A permission update awaiting application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionUpdate {
    pub permissions: Vec<String>,
    pub version: u64,
    /// Origin id of the sending handle; orders updates with equal versions.
    pub origin: Uuid,
}

/// Reacts to messages from other tabs.
#[async_trait]
pub trait SyncHandler: Send + Sync + 'static {
    /// Id of the locally signed-in user, if any.
    fn local_user_id(&self) -> Option<String>;

    /// Apply another tab's permission update.
    async fn on_permission_update(&self, update: PermissionUpdate) -> Result<()>;

    /// Apply another tab's profile change.
    async fn on_profile_update(&self, update_type: &str, data: &Value) -> Result<()>;

    /// Another tab logged the user out.
    async fn on_logout(&self) -> Result<()>;
}

/// Debounced, strictly serial queue of permission updates.
///
/// Updates wait until no new one has arrived for the debounce period, then
/// are applied one at a time in arrival order. Updates arriving while one is
/// being applied are queued behind it. Dropping the queue stops the worker.
#[derive(Debug)]
pub struct PermissionUpdateQueue {
    sender: mpsc::UnboundedSender<PermissionUpdate>,
    worker: JoinHandle<()>,
    _shutdown: DropGuard,
}

impl PermissionUpdateQueue {
    /// Start the worker. Must be called inside a tokio runtime.
    pub fn spawn(handler: Arc<dyn SyncHandler>, debounce: Duration) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let worker = tokio::spawn(Self::run(handler, receiver, debounce, shutdown.clone()));
        Self {
            sender,
            worker,
            _shutdown: shutdown.drop_guard(),
        }
    }

    /// Enqueue an update.
    pub fn push(&self, update: PermissionUpdate) -> Result<()> {
        self.sender.send(update).map_err(|_| Error::Cancelled)
    }

    /// Whether the worker has stopped.
    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    async fn run(
        handler: Arc<dyn SyncHandler>,
        mut receiver: mpsc::UnboundedReceiver<PermissionUpdate>,
        debounce: Duration,
        shutdown: CancellationToken,
    ) {
        let mut pending = VecDeque::new();
        loop {
            let first = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return,
                update = receiver.recv() => match update {
                    Some(update) => update,
                    None => return,
                },
            };
            pending.push_back(first);

            // Quiet period: restart the timer on every arrival.
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => return,
                    update = receiver.recv() => match update {
                        Some(update) => pending.push_back(update),
                        None => break,
                    },
                    _ = tokio::time::sleep(debounce) => break,
                }
            }

            log::debug!("Applying {} queued permission update(s)", pending.len());
            while let Some(update) = pending.pop_front() {
                let version = update.version;
                if let Err(e) = handler.on_permission_update(update).await {
                    log::warn!("Permission update v{version} failed: {e}");
                }
                if shutdown.is_cancelled() {
                    return;
                }
                // Anything that arrived meanwhile joins the back of the line.
                while let Ok(update) = receiver.try_recv() {
                    pending.push_back(update);
                }
            }
        }
    }
}

/// Feeds messages from a [`SyncReceiver`] to a [`SyncHandler`].
pub struct SyncListener {
    receiver: SyncReceiver,
    handler: Arc<dyn SyncHandler>,
    updates: PermissionUpdateQueue,
}

impl SyncListener {
    /// Create a listener. Must be called inside a tokio runtime.
    pub fn new(receiver: SyncReceiver, handler: Arc<dyn SyncHandler>, debounce: Duration) -> Self {
        let updates = PermissionUpdateQueue::spawn(Arc::clone(&handler), debounce);
        Self {
            receiver,
            handler,
            updates,
        }
    }

    /// Handle one message of unknown origin. Returns whether it was
    /// addressed to the local user.
    pub async fn dispatch(&self, message: SyncMessage) -> bool {
        self.dispatch_from(Uuid::nil(), message).await
    }

    /// Handle one message sent by the handle `origin`.
    pub async fn dispatch_from(&self, origin: Uuid, message: SyncMessage) -> bool {
        let local = self.handler.local_user_id();
        if local.as_deref() != Some(message.user_id()) {
            return false;
        }

        let kind = message.kind();
        let outcome = match message {
            SyncMessage::PermissionUpdate {
                permissions,
                version,
                ..
            } => self.updates.push(PermissionUpdate {
                permissions,
                version,
                origin,
            }),
            SyncMessage::ProfileUpdate {
                update_type, data, ..
            } => self.handler.on_profile_update(&update_type, &data).await,
            SyncMessage::Logout { .. } => self.handler.on_logout().await,
        };
        if let Err(e) = outcome {
            log::warn!("Handling {kind} from another tab failed: {e}");
        }
        true
    }

    /// Run until the bus closes or `shutdown` fires.
    pub async fn run(mut self, shutdown: CancellationToken) {
        loop {
            let (origin, message) = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                frame = self.receiver.recv_with_origin() => match frame {
                    Some(frame) => frame,
                    None => break,
                },
            };
            self.dispatch_from(origin, message).await;
        }
        log::debug!("Sync listener on '{}' stopped", self.receiver.name);
    }

    /// Run on a background task.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}
