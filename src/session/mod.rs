//! Live connection registry.
//!
//! Every connected socket owns exactly one [`Session`]. The registry is owned
//! by the hub task and is the only place sessions are created or destroyed.

mod fingerprint;

use std::{collections::HashMap, sync::Arc};

use axum::extract::ws::Utf8Bytes;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::{
    mpsc::{
        self,
        error::{TryRecvError, TrySendError},
    },
    watch,
};
use tracing::{debug, warn};

use crate::{
    moderation::{ModerationRecord, ModerationStore},
    protocol::{Outbound, UserSummary},
};

pub use fingerprint::{fingerprint, parse_user_agent, ClientInfo};

pub type SessionId = String;

/// Per-socket outbound queue depth. A client that falls this far behind starts
/// losing frames instead of stalling the hub.
pub const OUTBOX_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Viewer,
    Moderator,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Viewer => "viewer",
            Role::Moderator => "moderator",
            Role::Admin => "admin",
        }
    }

    /// Parses a role as stored in the accounts table. Unknown values fall back
    /// to viewer.
    pub fn from_stored(value: &str) -> Role {
        match value {
            "admin" => Role::Admin,
            "moderator" => Role::Moderator,
            _ => Role::Viewer,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Frame {
    Text(Utf8Bytes),
    Close,
}

/// Close request, carried beside the bounded queue so a backlogged socket
/// still learns it must go.
#[derive(Debug, Clone, Default)]
struct CloseRequest {
    requested: bool,
    /// Sent after whatever is already queued, just before the close frame.
    farewell: Option<Utf8Bytes>,
}

/// Sending half of a socket's outbound queue.
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::Sender<Frame>,
    close: Arc<watch::Sender<CloseRequest>>,
}

impl Outbox {
    pub fn channel() -> (Outbox, OutboxReceiver) {
        let (tx, frames) = mpsc::channel(OUTBOX_CAPACITY);
        let (close, closing) = watch::channel(CloseRequest::default());
        let outbox = Outbox { tx, close: Arc::new(close) };
        (outbox, OutboxReceiver { frames, closing, state: ReadState::Open { watching: true } })
    }

    pub fn push(&self, frame: Frame) -> Result<(), TrySendError<Frame>> {
        self.tx.try_send(frame)
    }

    /// Serializes and queues one message outside the registry, for sockets
    /// that never got a session.
    pub fn send(&self, message: &Outbound) -> bool {
        encode(message).is_some_and(|text| self.push(Frame::Text(text)).is_ok())
    }

    /// Asks the socket writer to flush what is queued and close. Never blocked
    /// by a full queue.
    pub fn close(&self) {
        self.close.send_modify(|request| request.requested = true);
    }

    /// Like [`Outbox::close`], with `message` delivered last.
    pub fn close_with(&self, message: &Outbound) {
        let farewell = encode(message);
        self.close.send_modify(|request| {
            request.requested = true;
            request.farewell = farewell;
        });
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[derive(Debug)]
enum ReadState {
    Open { watching: bool },
    Flushing { farewell: Option<Utf8Bytes> },
    Done,
}

/// Receiving half, drained by the socket writer.
#[derive(Debug)]
pub struct OutboxReceiver {
    frames: mpsc::Receiver<Frame>,
    closing: watch::Receiver<CloseRequest>,
    state: ReadState,
}

impl OutboxReceiver {
    /// Next frame to write. Once a close is requested, the frames already
    /// queued are yielded, then the farewell, then [`Frame::Close`], then
    /// `None`.
    pub async fn recv(&mut self) -> Option<Frame> {
        loop {
            match std::mem::replace(&mut self.state, ReadState::Done) {
                ReadState::Done => return None,
                ReadState::Flushing { farewell } => {
                    if let Ok(frame) = self.frames.try_recv() {
                        self.state = ReadState::Flushing { farewell };
                        return Some(frame);
                    }
                    return Some(match farewell {
                        Some(text) => {
                            self.state = ReadState::Flushing { farewell: None };
                            Frame::Text(text)
                        }
                        None => Frame::Close,
                    });
                }
                ReadState::Open { watching } => {
                    tokio::select! {
                        biased;
                        request = self.closing.wait_for(|request| request.requested), if watching => {
                            self.state = match request.map(|request| request.farewell.clone()) {
                                Ok(farewell) => ReadState::Flushing { farewell },
                                // every outbox is gone; the frame queue ends on its own
                                Err(_) => ReadState::Open { watching: false },
                            };
                        }
                        frame = self.frames.recv() => {
                            self.state = ReadState::Open { watching };
                            if frame.is_none() {
                                self.state = ReadState::Done;
                            }
                            return frame;
                        }
                    }
                }
            }
        }
    }

    pub fn try_recv(&mut self) -> Result<Frame, TryRecvError> {
        self.frames.try_recv()
    }
}

/// What the socket layer knows about a new connection.
#[derive(Debug)]
pub struct Connection {
    pub address: String,
    pub user_agent: String,
    pub outbox: Outbox,
}

#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    pub address: String,
    pub user_agent: String,
    pub client: ClientInfo,
    pub fingerprint: String,
    pub username: Option<String>,
    pub role: Role,
    /// Set by a successful `main_auth`; independent of the role.
    pub authenticated: bool,
    pub page: String,
    /// Stream key of the stream scope the session is in; `None` is global.
    pub current_stream: Option<String>,
    pub connected_at: OffsetDateTime,
    pub last_activity: OffsetDateTime,
    seq: u64,
    outbox: Outbox,
}

impl Session {
    pub fn display_name(&self) -> &str {
        self.username.as_deref().unwrap_or("Anonyme")
    }

    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    pub fn summary(&self) -> UserSummary {
        UserSummary {
            id: self.id.clone(),
            username: self.display_name().to_owned(),
            ip: self.address.clone(),
            connect_time: self.connected_at,
            last_activity: self.last_activity,
            page: self.page.clone(),
            role: self.role,
        }
    }
}

/// Returned by [`SessionRegistry::register`] when the connection is banned.
/// No session exists; the caller notifies and closes `outbox`.
#[derive(Debug)]
pub struct Rejected {
    pub ban: ModerationRecord,
    pub outbox: Outbox,
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<SessionId, Session>,
    next_seq: u64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        conn: Connection,
        moderation: &ModerationStore,
        now: OffsetDateTime,
    ) -> Result<&Session, Rejected> {
        let fingerprint = fingerprint(&conn.address, &conn.user_agent);
        if let Some(ban) = moderation.is_banned(&fingerprint, &conn.address, now) {
            return Err(Rejected { ban: ban.clone(), outbox: conn.outbox });
        }

        let id = loop {
            let candidate = hex::encode(rand::random::<[u8; 16]>());
            if !self.sessions.contains_key(&candidate) {
                break candidate;
            }
        };

        self.next_seq += 1;
        let session = Session {
            id: id.clone(),
            client: parse_user_agent(&conn.user_agent),
            fingerprint,
            address: conn.address,
            user_agent: conn.user_agent,
            username: None,
            role: Role::Viewer,
            authenticated: false,
            page: "unknown".to_owned(),
            current_stream: None,
            connected_at: now,
            last_activity: now,
            seq: self.next_seq,
            outbox: conn.outbox,
        };

        Ok(self.sessions.entry(id).or_insert(session))
    }

    /// Records activity, optionally moving the session to another page.
    pub fn touch(&mut self, id: &str, page: Option<&str>, now: OffsetDateTime) -> bool {
        let Some(session) = self.sessions.get_mut(id) else {
            return false;
        };
        session.last_activity = now;
        if let Some(page) = page {
            session.page = page.to_owned();
        }
        true
    }

    pub fn remove(&mut self, id: &str) -> Option<Session> {
        self.sessions.remove(id)
    }

    pub fn get(&self, id: &str) -> Option<&Session> {
        self.sessions.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Session> {
        self.sessions.get_mut(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Sessions ordered most-recently-connected first.
    pub fn list(&self) -> Vec<&Session> {
        let mut sessions: Vec<_> = self.sessions.values().collect();
        sessions.sort_by(|a, b| b.seq.cmp(&a.seq));
        sessions
    }

    pub fn presence(&self) -> Vec<UserSummary> {
        self.list().into_iter().map(Session::summary).collect()
    }

    /// Resolves a moderation target by session id or username. When several
    /// sessions match, the longest-connected one wins.
    pub fn find_target(&self, id: Option<&str>, username: Option<&str>) -> Option<&Session> {
        self.list().into_iter().rev().find(|session| {
            id.is_some_and(|id| session.id == id)
                || username.is_some_and(|name| session.username.as_deref() == Some(name))
        })
    }

    /// Sessions whose socket writer has gone away.
    pub fn closed(&self) -> Vec<SessionId> {
        self.sessions
            .values()
            .filter(|session| session.outbox.is_closed())
            .map(|session| session.id.clone())
            .collect()
    }

    pub fn send(&self, id: &str, message: &Outbound) -> bool {
        let (Some(session), Some(text)) = (self.sessions.get(id), encode(message)) else {
            return false;
        };
        deliver(session, text)
    }

    pub fn broadcast(&self, message: &Outbound) -> usize {
        self.send_to(self.sessions.keys(), message)
    }

    /// Best-effort fan-out: a failing recipient is logged and skipped.
    pub fn send_to<'a>(&self, ids: impl IntoIterator<Item = &'a SessionId>, message: &Outbound) -> usize {
        let Some(text) = encode(message) else {
            return 0;
        };
        let mut delivered = 0;
        for id in ids {
            if let Some(session) = self.sessions.get(id) {
                if deliver(session, text.clone()) {
                    delivered += 1;
                }
            }
        }
        debug!(kind = message.kind(), delivered, "fan-out");
        delivered
    }
}

fn encode(message: &Outbound) -> Option<Utf8Bytes> {
    match serde_json::to_string(message) {
        Ok(text) => Some(text.into()),
        Err(error) => {
            warn!(kind = message.kind(), %error, "failed to serialize outbound message");
            None
        }
    }
}

fn deliver(session: &Session, text: Utf8Bytes) -> bool {
    match session.outbox.push(Frame::Text(text)) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            warn!(session_id = %session.id, "outbound queue full, dropping frame");
            false
        }
        Err(TrySendError::Closed(_)) => {
            debug!(session_id = %session.id, "outbound queue closed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::moderation::ModerationStore;
    use time::macros::datetime;

    const NOW: OffsetDateTime = datetime!(2025-03-01 12:00 UTC);

    fn connect(registry: &mut SessionRegistry, address: &str) -> (SessionId, OutboxReceiver) {
        let (outbox, rx) = Outbox::channel();
        let conn = Connection { address: address.into(), user_agent: "test-agent".into(), outbox };
        let id = registry.register(conn, &ModerationStore::new(), NOW).unwrap().id.clone();
        (id, rx)
    }

    fn text(frame: Frame) -> String {
        match frame {
            Frame::Text(text) => text.as_str().to_owned(),
            Frame::Close => panic!("expected text frame"),
        }
    }

    #[test]
    fn register_assigns_unique_ids_and_fingerprints() {
        let mut registry = SessionRegistry::new();
        let (a, _ra) = connect(&mut registry, "10.0.0.1");
        let (b, _rb) = connect(&mut registry, "10.0.0.2");
        assert_ne!(a, b);
        assert_eq!(registry.len(), 2);
        let session = registry.get(&a).unwrap();
        assert_eq!(session.fingerprint, fingerprint("10.0.0.1", "test-agent"));
        assert_eq!(session.role, Role::Viewer);
        assert_eq!(session.display_name(), "Anonyme");
    }

    #[test]
    fn banned_connection_is_rejected_without_a_session() {
        let mut registry = SessionRegistry::new();
        let mut moderation = ModerationStore::new();
        moderation.ban(&fingerprint("10.0.0.9", "test-agent"), None, Some("10.0.0.9"), None, None, None, NOW);

        let (outbox, _rx) = Outbox::channel();
        let conn = Connection { address: "10.0.0.9".into(), user_agent: "test-agent".into(), outbox };
        let rejected = registry.register(conn, &moderation, NOW).unwrap_err();
        assert_eq!(rejected.ban.address.as_deref(), Some("10.0.0.9"));
        assert!(registry.is_empty());
    }

    #[test]
    fn list_is_most_recent_first() {
        let mut registry = SessionRegistry::new();
        let (a, _ra) = connect(&mut registry, "10.0.0.1");
        let (b, _rb) = connect(&mut registry, "10.0.0.2");
        let (c, _rc) = connect(&mut registry, "10.0.0.3");
        let ids: Vec<_> = registry.list().iter().map(|s| s.id.clone()).collect();
        assert_eq!(ids, [c, b, a]);
    }

    #[test]
    fn find_target_prefers_id_then_oldest_username_match() {
        let mut registry = SessionRegistry::new();
        let (a, _ra) = connect(&mut registry, "10.0.0.1");
        let (b, _rb) = connect(&mut registry, "10.0.0.2");
        registry.get_mut(&a).unwrap().username = Some("bob".into());
        registry.get_mut(&b).unwrap().username = Some("bob".into());

        assert_eq!(registry.find_target(Some(&b), None).unwrap().id, b);
        assert_eq!(registry.find_target(None, Some("bob")).unwrap().id, a);
        assert!(registry.find_target(Some("nope"), Some("alice")).is_none());
    }

    #[test]
    fn touch_updates_activity_and_page() {
        let mut registry = SessionRegistry::new();
        let (a, _ra) = connect(&mut registry, "10.0.0.1");
        let later = datetime!(2025-03-01 12:05 UTC);
        assert!(registry.touch(&a, Some("streams"), later));
        let session = registry.get(&a).unwrap();
        assert_eq!(session.last_activity, later);
        assert_eq!(session.page, "streams");
        assert!(!registry.touch("missing", None, later));
    }

    #[test]
    fn broadcast_skips_closed_recipients() {
        let mut registry = SessionRegistry::new();
        let (_a, mut ra) = connect(&mut registry, "10.0.0.1");
        let (_b, rb) = connect(&mut registry, "10.0.0.2");
        drop(rb);

        let delivered = registry.broadcast(&Outbound::UserCount { count: 2 });
        assert_eq!(delivered, 1);
        assert_eq!(text(ra.try_recv().unwrap()), r#"{"type":"user_count","count":2}"#);
        assert_eq!(registry.closed().len(), 1);
    }

    #[tokio::test]
    async fn close_gets_through_a_full_queue() {
        let (outbox, mut rx) = Outbox::channel();
        let mut pushed = 0;
        while outbox.send(&Outbound::UserCount { count: pushed }) {
            pushed += 1;
        }
        assert_eq!(pushed, OUTBOX_CAPACITY);

        let farewell = Outbound::Banned { message: "bye".into(), ban_info: None };
        outbox.close_with(&farewell);

        let mut texts = 0;
        let last_text = loop {
            match rx.recv().await.unwrap() {
                Frame::Text(text) => {
                    texts += 1;
                    if texts == OUTBOX_CAPACITY + 1 {
                        break text;
                    }
                }
                Frame::Close => panic!("closed before the farewell"),
            }
        };
        assert!(last_text.as_str().contains(r#""type":"banned""#));
        assert!(matches!(rx.recv().await, Some(Frame::Close)));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn close_without_farewell_flushes_then_closes() {
        let (outbox, mut rx) = Outbox::channel();
        assert!(outbox.send(&Outbound::UserCount { count: 1 }));
        outbox.close();
        assert!(matches!(rx.recv().await, Some(Frame::Text(_))));
        assert!(matches!(rx.recv().await, Some(Frame::Close)));
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn remove_returns_the_session() {
        let mut registry = SessionRegistry::new();
        let (a, _ra) = connect(&mut registry, "10.0.0.1");
        assert_eq!(registry.remove(&a).unwrap().id, a);
        assert!(registry.remove(&a).is_none());
        assert!(registry.is_empty());
    }
}
