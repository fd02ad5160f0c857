use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use parley_core::{Engine, EngineError};
use parley_types::ErrorKind;
use parley_types::events::{ChannelCommand, ChannelEvent, RelayEvent};

use crate::dispatcher::{Dispatcher, RelayMode};

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Handle a channel connection whose identity token was already verified at
/// the HTTP upgrade. Sends `Ready`, then runs until either side closes.
pub async fn handle_connection(socket: WebSocket, dispatcher: Dispatcher, engine: Engine, user_id: Uuid) {
    let (mut sender, mut receiver) = socket.split();
    let (connection_id, mut rx) = dispatcher.register(user_id).await;

    info!("{} connected to channel gateway as {}", user_id, connection_id);

    let ready = ChannelEvent::Ready {
        connection_id,
        user_id,
    };
    if send_event(&mut sender, &ready).await.is_err() {
        dispatcher.unregister(connection_id).await;
        return;
    }

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward queued events to the client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                event = rx.recv() => {
                    let Some(event) = event else { break };
                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from the client
    let dispatcher_recv = dispatcher.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<ChannelCommand>(&text) {
                    Ok(cmd) => {
                        handle_command(&dispatcher_recv, &engine, connection_id, user_id, cmd).await;
                    }
                    Err(e) => {
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            user_id,
                            connection_id,
                            e,
                            truncate(&text, 200)
                        );
                        dispatcher_recv
                            .send_to(
                                connection_id,
                                ChannelEvent::error(ErrorKind::ValidationFailed, format!("Malformed command: {}", e)),
                            )
                            .await;
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    dispatcher.unregister(connection_id).await;
    info!("{} ({}) disconnected from channel gateway", user_id, connection_id);
}

async fn send_event(
    sender: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    event: &ChannelEvent,
) -> Result<(), ()> {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            warn!("Failed to serialize channel event: {}", e);
            return Ok(());
        }
    };
    sender.send(Message::Text(text.into())).await.map_err(|_| ())
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Run an engine call on the blocking pool.
async fn blocking<T, F>(engine: &Engine, f: F) -> Result<T, EngineError>
where
    T: Send + 'static,
    F: FnOnce(Engine) -> Result<T, EngineError> + Send + 'static,
{
    let engine = engine.clone();
    tokio::task::spawn_blocking(move || f(engine))
        .await
        .map_err(|e| EngineError::from(anyhow::anyhow!("engine task failed: {}", e)))?
}

async fn handle_command(
    dispatcher: &Dispatcher,
    engine: &Engine,
    connection_id: Uuid,
    user_id: Uuid,
    cmd: ChannelCommand,
) {
    let reply = match cmd {
        ChannelCommand::JoinGroup { group_id } => {
            match join_group(dispatcher, engine, connection_id, user_id, group_id).await {
                Ok(()) => {
                    info!("{} ({}) joined group {}", user_id, connection_id, group_id);
                    ChannelEvent::Joined { group_id }
                }
                Err(e) => {
                    warn!("{} ({}) join of {} rejected: {}", user_id, connection_id, group_id, e);
                    ChannelEvent::error(e.kind(), e.to_string())
                }
            }
        }

        ChannelCommand::LeaveGroup { group_id } => {
            dispatcher.leave(connection_id, group_id).await;
            info!("{} ({}) left group {}", user_id, connection_id, group_id);
            ChannelEvent::Left { group_id }
        }

        relay_cmd => {
            if dispatcher.relay_mode() == RelayMode::Server {
                debug!(
                    "{} ({}) relay command ignored; server publishes mutations",
                    user_id, connection_id
                );
                return;
            }
            let Some((group_id, relay)) = relay_cmd.into_relay() else {
                return;
            };
            match relay_from_client(dispatcher, engine, connection_id, group_id, relay).await {
                Ok(()) => return,
                Err(event) => event,
            }
        }
    };

    dispatcher.send_to(connection_id, reply).await;
}

/// Subscribe after an access check, then check again. A membership removal
/// that commits between the first check and the subscribe would otherwise miss
/// this connection when it evicts the user's subscriptions.
async fn join_group(
    dispatcher: &Dispatcher,
    engine: &Engine,
    connection_id: Uuid,
    user_id: Uuid,
    group_id: Uuid,
) -> Result<(), EngineError> {
    blocking(engine, move |e| e.authorize_view(group_id, user_id)).await?;
    dispatcher.join(connection_id, group_id).await;
    confirm_join(dispatcher, engine, connection_id, user_id, group_id).await
}

/// Re-run the access check for a live subscription and drop it if access is
/// gone.
async fn confirm_join(
    dispatcher: &Dispatcher,
    engine: &Engine,
    connection_id: Uuid,
    user_id: Uuid,
    group_id: Uuid,
) -> Result<(), EngineError> {
    let check = blocking(engine, move |engine| engine.authorize_view(group_id, user_id)).await;
    if let Err(e) = check {
        dispatcher.leave(connection_id, group_id).await;
        return Err(e);
    }
    Ok(())
}

/// Check and fan out a client relay. On rejection returns the `Error` event to
/// send back to the relaying connection.
async fn relay_from_client(
    dispatcher: &Dispatcher,
    engine: &Engine,
    connection_id: Uuid,
    group_id: Uuid,
    relay: RelayEvent,
) -> Result<(), ChannelEvent> {
    if relay == RelayEvent::GroupDeleted {
        match blocking(engine, move |e| e.group_exists(group_id)).await {
            Ok(false) => {}
            Ok(true) => {
                warn!("GroupDeleted relay for live group {} rejected", group_id);
                return Err(ChannelEvent::error(
                    ErrorKind::ValidationFailed,
                    format!("Group {} still exists", group_id),
                ));
            }
            Err(e) => return Err(ChannelEvent::error(e.kind(), e.to_string())),
        }
    }

    let kind = relay.kind();
    match dispatcher.relay(connection_id, group_id, relay).await {
        Ok(delivered) => {
            debug!(
                "{} relay from {} to group {} reached {} peers",
                kind, connection_id, group_id, delivered
            );
            Ok(())
        }
        Err(e) => {
            warn!("{} relay from {} rejected: {}", kind, connection_id, e);
            Err(ChannelEvent::error(e.kind(), e.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use parley_db::Database;
    use parley_types::Visibility;

    use super::*;

    fn engine() -> Engine {
        Engine::new(Arc::new(Database::open_in_memory().unwrap()))
    }

    #[tokio::test]
    async fn join_requires_view_access() {
        let (engine, dispatcher) = (engine(), Dispatcher::new(RelayMode::Client));
        let (owner, outsider) = (Uuid::new_v4(), Uuid::new_v4());
        let group = engine.create_group("team", Visibility::Private, owner).unwrap();

        let (conn, _rx) = dispatcher.register(outsider).await;
        let err = join_group(&dispatcher, &engine, conn, outsider, group.id)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
        assert!(dispatcher.subscribers(group.id).await.is_empty());

        let (conn, _rx) = dispatcher.register(owner).await;
        join_group(&dispatcher, &engine, conn, owner, group.id).await.unwrap();
        assert_eq!(dispatcher.subscribers(group.id).await, vec![conn]);
    }

    #[tokio::test]
    async fn subscription_is_dropped_when_access_is_lost_mid_join() {
        let (engine, dispatcher) = (engine(), Dispatcher::new(RelayMode::Client));
        let (owner, member) = (Uuid::new_v4(), Uuid::new_v4());
        let group = engine.create_group("team", Visibility::Private, owner).unwrap();
        engine.add_member(group.id, member, owner).unwrap();

        // The first check passed; the removal and its eviction land before the
        // subscription exists.
        let (conn, _rx) = dispatcher.register(member).await;
        engine.authorize_view(group.id, member).unwrap();
        engine.remove_member(group.id, member, owner).unwrap();
        assert_eq!(dispatcher.evict_user(group.id, member).await, 0);
        dispatcher.join(conn, group.id).await;

        let err = confirm_join(&dispatcher, &engine, conn, member, group.id)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
        assert!(dispatcher.subscribers(group.id).await.is_empty());
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("short", 200), "short");
    }
}
