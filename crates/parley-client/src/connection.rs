use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};
use uuid::Uuid;

use parley_types::events::{ChannelCommand, ChannelEvent, RelayEvent};

use crate::error::{ClientError, ClientResult};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How long `connect` waits for the server's `Ready` event.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Joined(Uuid),
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => f.write_str("disconnected"),
            Self::Connecting => f.write_str("connecting"),
            Self::Connected => f.write_str("connected"),
            Self::Joined(group_id) => write!(f, "joined to {}", group_id),
        }
    }
}

/// One viewer's live connection to a single group channel.
///
/// `Disconnected -> Connecting -> Connected -> Joined(group) -> Disconnected`.
/// Calls that do not fit the current state fail with
/// [`ClientError::InvalidState`] and send nothing.
pub struct ChannelConnection {
    url: String,
    state: ConnectionState,
    connection_id: Option<Uuid>,
    sink: Option<SplitSink<WsStream, Message>>,
    events: Option<mpsc::UnboundedReceiver<ChannelEvent>>,
    /// Events that arrived while `join_group` waited for its acknowledgement.
    pending: VecDeque<ChannelEvent>,
    reader: Option<JoinHandle<()>>,
}

impl ChannelConnection {
    /// `base_url` is the server's `ws://` or `wss://` root.
    pub fn new(base_url: &str, token: &str) -> Self {
        Self {
            url: format!("{}/channel?token={}", base_url.trim_end_matches('/'), token),
            state: ConnectionState::Disconnected,
            connection_id: None,
            sink: None,
            events: None,
            pending: VecDeque::new(),
            reader: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Server-assigned id, known once connected.
    pub fn connection_id(&self) -> Option<Uuid> {
        self.connection_id
    }

    pub async fn connect(&mut self) -> ClientResult<()> {
        if self.state != ConnectionState::Disconnected {
            return Err(self.invalid("connect"));
        }
        self.state = ConnectionState::Connecting;

        match self.open().await {
            Ok(()) => {
                self.state = ConnectionState::Connected;
                Ok(())
            }
            Err(e) => {
                warn!("Channel connect failed: {}", e);
                self.state = ConnectionState::Disconnected;
                Err(e)
            }
        }
    }

    async fn open(&mut self) -> ClientResult<()> {
        let (mut ws, _) = connect_async(self.url.as_str()).await?;

        let ready = tokio::time::timeout(HANDSHAKE_TIMEOUT, async {
            while let Some(frame) = ws.next().await {
                if let Message::Text(text) = frame? {
                    return match serde_json::from_str::<ChannelEvent>(text.as_str()) {
                        Ok(ChannelEvent::Ready { connection_id, .. }) => Ok(connection_id),
                        Ok(other) => Err(ClientError::Protocol(format!(
                            "expected Ready, got {:?}",
                            other
                        ))),
                        Err(e) => Err(ClientError::Protocol(e.to_string())),
                    };
                }
            }
            Err::<Uuid, _>(ClientError::ConnectionFailed(
                "closed before handshake".to_string(),
            ))
        })
        .await
        .map_err(|_| ClientError::ConnectionFailed("handshake timed out".to_string()))??;

        let (sink, mut stream) = ws.split();
        let (tx, rx) = mpsc::unbounded_channel();
        let reader = tokio::spawn(async move {
            while let Some(Ok(frame)) = stream.next().await {
                match frame {
                    Message::Text(text) => match serde_json::from_str::<ChannelEvent>(text.as_str()) {
                        Ok(event) => {
                            if tx.send(event).is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!("Unreadable channel event: {}", e),
                    },
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            debug!("Channel reader finished");
        });

        info!("Channel connected as {}", ready);
        self.connection_id = Some(ready);
        self.sink = Some(sink);
        self.events = Some(rx);
        self.reader = Some(reader);
        Ok(())
    }

    /// Subscribe to a group's channel and wait for the server to acknowledge.
    pub async fn join_group(&mut self, group_id: Uuid) -> ClientResult<()> {
        if self.state != ConnectionState::Connected {
            return Err(self.invalid("join a group"));
        }
        self.send(&ChannelCommand::JoinGroup { group_id }).await?;

        loop {
            let event = self.recv().await?;
            match event {
                ChannelEvent::Joined { group_id: joined } if joined == group_id => {
                    self.state = ConnectionState::Joined(group_id);
                    return Ok(());
                }
                ChannelEvent::Error { kind, message } => {
                    return Err(ClientError::Rejected { kind, message });
                }
                other => self.pending.push_back(other),
            }
        }
    }

    pub async fn leave_group(&mut self) -> ClientResult<()> {
        let ConnectionState::Joined(group_id) = self.state else {
            return Err(self.invalid("leave a group"));
        };
        self.send(&ChannelCommand::LeaveGroup { group_id }).await?;
        self.state = ConnectionState::Connected;
        Ok(())
    }

    /// Fire-and-forget: forward a confirmed mutation to the joined group's
    /// other viewers.
    pub async fn relay(&mut self, event: RelayEvent) -> ClientResult<()> {
        let ConnectionState::Joined(group_id) = self.state else {
            return Err(self.invalid("relay"));
        };
        self.send(&event.into_command(group_id)).await
    }

    /// Next event pushed by the server. Fails with `ConnectionFailed` once the
    /// connection is gone.
    pub async fn next_event(&mut self) -> ClientResult<ChannelEvent> {
        if let Some(event) = self.pending.pop_front() {
            return Ok(event);
        }
        if self.events.is_none() {
            return Err(self.invalid("receive events"));
        }
        self.recv().await
    }

    /// Close the connection. Safe to call in any state, any number of times.
    pub async fn disconnect(&mut self) {
        if let Some(mut sink) = self.sink.take() {
            let _ = sink.send(Message::Close(None)).await;
            let _ = sink.close().await;
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.events = None;
        self.pending.clear();
        self.connection_id = None;
        if self.state != ConnectionState::Disconnected {
            info!("Channel disconnected");
        }
        self.state = ConnectionState::Disconnected;
    }

    async fn send(&mut self, cmd: &ChannelCommand) -> ClientResult<()> {
        let text = serde_json::to_string(cmd).map_err(|e| ClientError::Protocol(e.to_string()))?;
        let Some(sink) = self.sink.as_mut() else {
            return Err(self.invalid("send"));
        };
        let sent = sink.send(Message::text(text)).await;
        if let Err(e) = sent {
            self.disconnect().await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn recv(&mut self) -> ClientResult<ChannelEvent> {
        let next = match self.events.as_mut() {
            Some(rx) => rx.recv().await,
            None => None,
        };
        match next {
            Some(event) => {
                self.follow_server(&event);
                Ok(event)
            }
            None => {
                self.disconnect().await;
                Err(ClientError::ConnectionFailed("connection closed".to_string()))
            }
        }
    }

    /// The server ends a subscription on its own when the group is deleted or
    /// the user is removed from it; fall back to `Connected` when that happens.
    fn follow_server(&mut self, event: &ChannelEvent) {
        let ConnectionState::Joined(joined) = self.state else {
            return;
        };
        match event {
            ChannelEvent::ReceiveGroupDeleted { group_id } | ChannelEvent::Left { group_id }
                if *group_id == joined =>
            {
                debug!("Server ended subscription to group {}", joined);
                self.state = ConnectionState::Connected;
            }
            _ => {}
        }
    }

    fn invalid(&self, action: &'static str) -> ClientError {
        ClientError::InvalidState {
            action,
            state: self.state.to_string(),
        }
    }
}

impl Drop for ChannelConnection {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use parley_types::ErrorKind;

    use super::*;

    #[tokio::test]
    async fn commands_require_the_right_state() {
        let mut conn = ChannelConnection::new("ws://127.0.0.1:1", "token");
        assert_eq!(conn.state(), ConnectionState::Disconnected);

        let err = conn.join_group(Uuid::new_v4()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationFailed);
        let err = conn
            .relay(RelayEvent::MessageDeleted { message_id: Uuid::new_v4() })
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::InvalidState { .. }));
        assert!(conn.leave_group().await.is_err());
        assert!(conn.next_event().await.is_err());

        conn.disconnect().await;
        conn.disconnect().await;
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn unreachable_server_is_connection_failed() {
        // Port 1 is privileged and not listening in test environments.
        let mut conn = ChannelConnection::new("ws://127.0.0.1:1", "token");
        let err = conn.connect().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConnectionFailed);
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn url_includes_token() {
        let conn = ChannelConnection::new("ws://localhost:3000/", "abc.def");
        assert_eq!(conn.url, "ws://localhost:3000/channel?token=abc.def");
    }
}
