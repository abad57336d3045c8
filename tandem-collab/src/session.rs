//! One WebSocket connection.
//!
//! ```text
//!   socket ──► reader loop ──decode──► HubHandle (commands)
//!                                           │
//!   socket ◄── writer task ◄── outbound ◄───┘ (frames, bounded)
//!                    └── ping every heartbeat interval
//! ```
//!
//! The reader never writes to the socket. Everything the client receives,
//! including error replies, is routed through the hub and the outbound
//! queue, so frames reach the client in the order the hub produced them.

use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use percent_encoding::percent_decode_str;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use uuid::Uuid;

use crate::error::CollabError;
use crate::hub::HubHandle;
use crate::presence::PermissionLevel;
use crate::protocol::{Command, Frame, ProtocolError, UserId};

/// Who a connection belongs to. Established once at upgrade time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: UserId,
    pub username: String,
    pub permission: PermissionLevel,
}

impl Identity {
    /// Parse `userId=7&username=alice&permission=viewer` from an upgrade URL.
    ///
    /// `userId` is required. `username` defaults to `user-<id>` and
    /// `permission` to editor.
    pub fn from_query(query: &str) -> Result<Self, ProtocolError> {
        let mut user_id = None;
        let mut username = None;
        let mut permission = PermissionLevel::default();

        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            // Query strings encode spaces as '+'.
            let spaced = value.replace('+', " ");
            let value = percent_decode_str(&spaced)
                .decode_utf8()
                .map_err(|_| ProtocolError::InvalidIdentity(format!("'{value}' is not UTF-8")))?
                .into_owned();
            match key {
                "userId" | "user_id" => {
                    let id = value
                        .parse::<UserId>()
                        .map_err(|_| ProtocolError::InvalidIdentity(format!("bad user id '{value}'")))?;
                    user_id = Some(id);
                }
                "username" if !value.is_empty() => username = Some(value),
                "permission" => {
                    permission = PermissionLevel::parse(&value)
                        .ok_or_else(|| ProtocolError::InvalidIdentity(format!("unknown permission '{value}'")))?;
                }
                _ => {}
            }
        }

        let user_id = user_id.ok_or_else(|| ProtocolError::InvalidIdentity("missing userId".to_string()))?;
        Ok(Self {
            user_id,
            username: username.unwrap_or_else(|| format!("user-{user_id}")),
            permission,
        })
    }
}

/// Result of handing a frame to a client's outbound queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    /// Queue full; the frame is lost for this client only.
    Dropped,
    /// Writer has gone away.
    Closed,
}

/// Hub-side handle to a connected client.
///
/// Cloning shares the same outbound queue. The writer task exits once every
/// clone has been dropped.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    identity: Identity,
    session_id: Uuid,
    outbound: mpsc::Sender<Frame>,
}

impl ClientHandle {
    /// Create a handle with a fresh session id and a bounded outbound queue.
    pub fn new(identity: Identity, capacity: usize) -> (Self, mpsc::Receiver<Frame>) {
        let (outbound, rx) = mpsc::channel(capacity.max(1));
        let handle = Self {
            identity,
            session_id: Uuid::new_v4(),
            outbound,
        };
        (handle, rx)
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn user_id(&self) -> UserId {
        self.identity.user_id
    }

    pub fn username(&self) -> &str {
        &self.identity.username
    }

    pub fn permission(&self) -> PermissionLevel {
        self.identity.permission
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Queue a frame without waiting.
    pub fn deliver(&self, frame: Frame) -> Delivery {
        match self.outbound.try_send(frame) {
            Ok(()) => Delivery::Queued,
            Err(mpsc::error::TrySendError::Full(_)) => Delivery::Dropped,
            Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Closed,
        }
    }
}

/// Per-connection settings.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub heartbeat_interval: Duration,
    pub max_frame_size: usize,
    pub outbound_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(45),
            max_frame_size: 64 * 1024,
            outbound_capacity: 256,
        }
    }
}

/// Drive one upgraded connection until either side closes.
pub async fn run_session<S>(ws: WebSocketStream<S>, identity: Identity, hub: HubHandle, config: SessionConfig)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (client, outbound) = ClientHandle::new(identity, config.outbound_capacity);
    let user_id = client.user_id();
    let session_id = client.session_id();

    let (sink, mut stream) = ws.split();
    let mut writer = tokio::spawn(write_loop(sink, outbound, config.heartbeat_interval));

    if hub.register(client).is_err() {
        log::warn!("Hub unavailable, dropping session for user {user_id}");
        writer.abort();
        return;
    }
    log::info!("Session {session_id} opened for user {user_id}");

    let mut writer_done = false;
    loop {
        tokio::select! {
            msg = stream.next() => {
                let forwarded = match msg {
                    Some(Ok(Message::Text(text))) => forward(&hub, user_id, session_id, text.as_str(), config.max_frame_size),
                    Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                        Ok(text) => forward(&hub, user_id, session_id, text, config.max_frame_size),
                        Err(_) => hub.reject(user_id, session_id, ProtocolError::Decode("binary frame is not UTF-8".to_string())),
                    },
                    Some(Ok(Message::Close(_))) | None => break,
                    // Pings are answered by tungstenite; pongs need no action.
                    Some(Ok(_)) => Ok(()),
                    Some(Err(e)) => {
                        log::debug!("Read error for user {user_id}: {e}");
                        break;
                    }
                };
                if forwarded.is_err() {
                    log::warn!("Hub stopped while session {session_id} was active");
                    break;
                }
            }
            _ = &mut writer => {
                writer_done = true;
                break;
            }
        }
    }

    let _ = hub.disconnect(user_id, session_id);
    if !writer_done {
        // The hub drops its handles on disconnect, which ends the writer.
        let _ = writer.await;
    }
    log::info!("Session {session_id} closed for user {user_id}");
}

fn forward(
    hub: &HubHandle,
    user_id: UserId,
    session_id: Uuid,
    text: &str,
    max_frame_size: usize,
) -> Result<(), CollabError> {
    if text.len() > max_frame_size {
        return hub.reject(
            user_id,
            session_id,
            ProtocolError::FrameTooLarge {
                size: text.len(),
                max: max_frame_size,
            },
        );
    }
    match Command::decode(text) {
        Ok(command) => hub.submit(user_id, session_id, command),
        Err(e) => hub.reject(user_id, session_id, e),
    }
}

async fn write_loop<S>(
    mut sink: SplitSink<WebSocketStream<S>, Message>,
    mut outbound: mpsc::Receiver<Frame>,
    heartbeat_interval: Duration,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut heartbeat = tokio::time::interval(heartbeat_interval.max(Duration::from_millis(1)));
    heartbeat.tick().await;

    loop {
        tokio::select! {
            frame = outbound.recv() => match frame {
                Some(frame) => {
                    if let Err(e) = sink.send(Message::text(frame.to_string())).await {
                        log::debug!("Write failed: {e}");
                        break;
                    }
                }
                None => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            },
            _ = heartbeat.tick() => {
                if sink.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
        }
    }

    let _ = sink.close().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(user_id: UserId) -> Identity {
        Identity {
            user_id,
            username: "u".into(),
            permission: PermissionLevel::Editor,
        }
    }

    #[test]
    fn test_identity_from_full_query() {
        let id = Identity::from_query("userId=7&username=Ada%20L&permission=viewer").unwrap();
        assert_eq!(id.user_id, 7);
        assert_eq!(id.username, "Ada L");
        assert_eq!(id.permission, PermissionLevel::Viewer);
    }

    #[test]
    fn test_identity_defaults() {
        let id = Identity::from_query("user_id=3&token=abc").unwrap();
        assert_eq!(id.username, "user-3");
        assert_eq!(id.permission, PermissionLevel::Editor);
    }

    #[test]
    fn test_identity_rejects_missing_or_bad_values() {
        assert!(matches!(
            Identity::from_query("username=x"),
            Err(ProtocolError::InvalidIdentity(_))
        ));
        assert!(Identity::from_query("").is_err());
        assert!(Identity::from_query("userId=abc").is_err());
        assert!(Identity::from_query("userId=1&permission=root").is_err());
        assert!(Identity::from_query("userId=1&username=%C3").is_err());
    }

    #[test]
    fn test_identity_decodes_query_escapes() {
        let id = Identity::from_query("userId=2&username=a+b%2Bc").unwrap();
        assert_eq!(id.username, "a b+c");
        let id = Identity::from_query("userId=2&username=%C3%A9").unwrap();
        assert_eq!(id.username, "é");
        assert!(Identity::from_query("userId=2&username=%FF").is_err());
    }

    #[test]
    fn test_session_ids_are_unique() {
        let (a, _ra) = ClientHandle::new(identity(1), 1);
        let (b, _rb) = ClientHandle::new(identity(1), 1);
        assert_ne!(a.session_id(), b.session_id());
    }

    #[test]
    fn test_deliver_reports_full_and_closed() {
        let (client, mut rx) = ClientHandle::new(identity(1), 1);
        assert_eq!(client.deliver(Frame::from("a")), Delivery::Queued);
        assert_eq!(client.deliver(Frame::from("b")), Delivery::Dropped);
        assert_eq!(&*rx.try_recv().unwrap(), "a");
        drop(rx);
        assert_eq!(client.deliver(Frame::from("c")), Delivery::Closed);
    }
}
