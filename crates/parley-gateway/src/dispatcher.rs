use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use parley_types::ErrorKind;
use parley_types::events::{ChannelEvent, RelayEvent};

use crate::registry::ChannelRegistry;

/// Who is responsible for fanning out confirmed mutations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RelayMode {
    /// The mutating client re-sends the REST result as a relay command.
    #[default]
    Client,
    /// The REST layer publishes on success; client relay commands are ignored.
    Server,
}

impl RelayMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Server => "server",
        }
    }
}

impl fmt::Display for RelayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RelayMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "client" => Ok(Self::Client),
            "server" => Ok(Self::Server),
            other => Err(format!("unknown relay mode '{}'", other)),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RelayError {
    #[error("Connection has not joined group {group_id}")]
    NotJoined { group_id: Uuid },

    #[error("Message belongs to group {found}, not {expected}")]
    GroupMismatch { expected: Uuid, found: Uuid },
}

impl RelayError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::ValidationFailed
    }
}

/// Manages connected channel clients and fans relay events out to them.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    mode: RelayMode,

    /// Registry and per-connection senders share one lock so that fan-out to a
    /// channel happens in the order relays are accepted.
    state: Mutex<DispatchState>,
}

#[derive(Default)]
struct DispatchState {
    registry: ChannelRegistry,
    connections: HashMap<Uuid, ConnectionHandle>,
}

struct ConnectionHandle {
    user_id: Uuid,
    tx: mpsc::UnboundedSender<ChannelEvent>,
}

impl DispatchState {
    /// Enqueue `event` for every subscriber of `group_id` that `skip` does not
    /// exclude. Subscribers whose queue is closed are dropped from the registry.
    fn fan_out(
        &mut self,
        group_id: Uuid,
        event: &ChannelEvent,
        skip: impl Fn(Uuid, &ConnectionHandle) -> bool,
    ) -> usize {
        let mut delivered = 0;
        let mut dead = Vec::new();

        for connection_id in self.registry.subscribers(group_id) {
            let Some(handle) = self.connections.get(&connection_id) else {
                dead.push(connection_id);
                continue;
            };
            if skip(connection_id, handle) {
                continue;
            }
            if handle.tx.send(event.clone()).is_ok() {
                delivered += 1;
            } else {
                dead.push(connection_id);
            }
        }

        for connection_id in dead {
            warn!(
                "Pruning dead connection {} from group {}",
                connection_id, group_id
            );
            self.connections.remove(&connection_id);
            self.registry.leave_all(connection_id);
        }

        delivered
    }

    fn deliver(
        &mut self,
        group_id: Uuid,
        relay: RelayEvent,
        skip: impl Fn(Uuid, &ConnectionHandle) -> bool,
    ) -> usize {
        let closes = matches!(relay, RelayEvent::GroupDeleted);
        let kind = relay.kind();
        let event = relay.into_event(group_id);

        let delivered = self.fan_out(group_id, &event, skip);
        debug!("{} in group {} delivered to {}", kind, group_id, delivered);

        if closes {
            let removed = self.registry.close_channel(group_id);
            info!(
                "Closed channel {} ({} subscribers removed)",
                group_id,
                removed.len()
            );
        }
        delivered
    }
}

impl Dispatcher {
    pub fn new(mode: RelayMode) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                mode,
                state: Mutex::new(DispatchState::default()),
            }),
        }
    }

    pub fn relay_mode(&self) -> RelayMode {
        self.inner.mode
    }

    /// Register a new connection for `user_id`. Returns (connection_id, receiver).
    pub async fn register(&self, user_id: Uuid) -> (Uuid, mpsc::UnboundedReceiver<ChannelEvent>) {
        let connection_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .state
            .lock()
            .await
            .connections
            .insert(connection_id, ConnectionHandle { user_id, tx });
        (connection_id, rx)
    }

    /// Drop a connection and leave every channel it joined. Safe to call twice.
    pub async fn unregister(&self, connection_id: Uuid) {
        let mut state = self.inner.state.lock().await;
        state.connections.remove(&connection_id);
        let left = state.registry.leave_all(connection_id);
        if !left.is_empty() {
            debug!("Connection {} left {} channels", connection_id, left.len());
        }
    }

    pub async fn join(&self, connection_id: Uuid, group_id: Uuid) -> bool {
        self.inner
            .state
            .lock()
            .await
            .registry
            .join(connection_id, group_id)
    }

    pub async fn leave(&self, connection_id: Uuid, group_id: Uuid) -> bool {
        self.inner
            .state
            .lock()
            .await
            .registry
            .leave(connection_id, group_id)
    }

    /// Fan a client relay out to the other subscribers of the channel. The
    /// sender must be joined, and add/edit payloads must belong to the channel.
    pub async fn relay(
        &self,
        from: Uuid,
        group_id: Uuid,
        relay: RelayEvent,
    ) -> Result<usize, RelayError> {
        if let Some(message) = relay.message() {
            if message.group_id != group_id {
                return Err(RelayError::GroupMismatch {
                    expected: group_id,
                    found: message.group_id,
                });
            }
        }

        let mut state = self.inner.state.lock().await;
        if !state.registry.is_subscribed(from, group_id) {
            return Err(RelayError::NotJoined { group_id });
        }
        Ok(state.deliver(group_id, relay, |id, _| id == from))
    }

    /// Server-side publish. Connections of `exclude_user` are skipped since
    /// that user already has the REST result.
    pub async fn publish(&self, group_id: Uuid, relay: RelayEvent, exclude_user: Option<Uuid>) -> usize {
        let mut state = self.inner.state.lock().await;
        state.deliver(group_id, relay, |_, handle| Some(handle.user_id) == exclude_user)
    }

    /// Unsubscribe every connection of `user_id` from a channel, telling each
    /// one it has left. Used when a member loses access to a private group.
    pub async fn evict_user(&self, group_id: Uuid, user_id: Uuid) -> usize {
        let mut state = self.inner.state.lock().await;
        let targets: Vec<Uuid> = state
            .registry
            .subscribers(group_id)
            .into_iter()
            .filter(|id| state.connections.get(id).is_some_and(|h| h.user_id == user_id))
            .collect();
        for connection_id in &targets {
            state.registry.leave(*connection_id, group_id);
            if let Some(handle) = state.connections.get(connection_id) {
                let _ = handle.tx.send(ChannelEvent::Left { group_id });
            }
        }
        targets.len()
    }

    /// Send an event to a single connection. Returns false if it is gone.
    pub async fn send_to(&self, connection_id: Uuid, event: ChannelEvent) -> bool {
        let state = self.inner.state.lock().await;
        state
            .connections
            .get(&connection_id)
            .is_some_and(|handle| handle.tx.send(event).is_ok())
    }

    pub async fn channel_count(&self) -> usize {
        self.inner.state.lock().await.registry.channel_count()
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.state.lock().await.connections.len()
    }

    pub async fn subscribers(&self, group_id: Uuid) -> Vec<Uuid> {
        self.inner.state.lock().await.registry.subscribers(group_id)
    }
}
