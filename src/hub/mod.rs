//! The hub task.
//!
//! One task owns the session registry, moderation state, chat scopes and the
//! stream catalog. Sockets, HTTP handlers and timers talk to it through a
//! [`HubHandle`]; handlers run one event at a time and never await, so state
//! is never observed half-updated. Storage and webhook I/O is handed off to
//! spawned tasks.

mod catalog;
mod commands;
pub mod timers;
pub mod ws;

use std::{collections::HashMap, sync::Arc, time::Duration};

use anyhow::{anyhow, Context};
use serde::Serialize;
use time::OffsetDateTime;
use tokio::{
    sync::{mpsc, oneshot},
    task::{AbortHandle, JoinHandle},
    time::Instant,
};
use tracing::{debug, info, warn};

use crate::{
    auth::{AccountResolution, Credentials},
    error::HubError,
    moderation::ModerationStore,
    notify::{Notification, NotificationSink},
    protocol::{Inbound, Outbound},
    scopes::ScopeRouter,
    session::{Connection, SessionId, SessionRegistry},
    store::{Store, Write, Writer},
    streams::{DetectReply, DetectRequest, StreamCatalog, StreamDetails, StreamEntry, StreamListing, IDLE_THRESHOLD},
};

const EVENT_QUEUE_CAPACITY: usize = 1024;

/// Delays and periods used by the hub. Tests shrink these.
#[derive(Debug, Clone)]
pub struct Timings {
    /// Wait after a stop notification before the entry is removed.
    pub stream_grace: Duration,
    /// Wait after a start notification before probing the stream output.
    pub start_check_delay: Duration,
    /// Time a banned client gets to read its notice before being cut off.
    pub ban_close_delay: Duration,
    /// A live stream with no viewers this long after its start is dropped by the sweep.
    pub stream_idle: Duration,
    pub sweep_interval: Duration,
    pub stats_interval: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Timings {
            stream_grace: Duration::from_secs(30),
            start_check_delay: Duration::from_secs(5),
            ban_close_delay: Duration::from_secs(1),
            stream_idle: IDLE_THRESHOLD,
            sweep_interval: Duration::from_secs(5 * 60),
            stats_interval: Duration::from_secs(30 * 60),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub success: bool,
    pub connected_users: usize,
    pub active_streams: usize,
    pub global_chat_messages: usize,
    pub stream_chat_messages: usize,
    /// Seconds since the hub started.
    pub uptime: f64,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

#[derive(Debug)]
pub enum HubEvent {
    Connect {
        conn: Connection,
        reply: oneshot::Sender<Option<SessionId>>,
    },
    Inbound {
        session_id: SessionId,
        message: Inbound,
    },
    Disconnect {
        session_id: SessionId,
    },
    AccountResolved {
        session_id: SessionId,
        resolution: AccountResolution,
    },
    Detect {
        request: DetectRequest,
        reply: oneshot::Sender<DetectReply>,
    },
    ListStreams {
        reply: oneshot::Sender<Vec<StreamListing>>,
    },
    StreamDetails {
        stream_key: String,
        reply: oneshot::Sender<Option<StreamDetails>>,
    },
    Status {
        reply: oneshot::Sender<StatusReport>,
    },
    TestStream {
        reply: oneshot::Sender<StreamEntry>,
    },
    GraceElapsed {
        stream_key: String,
    },
    /// Closes a session's socket and drops the session.
    Evict {
        session_id: SessionId,
        /// Delivered right before the close frame.
        farewell: Option<Outbound>,
    },
    Sweep,
    Stats,
    Shutdown,
}

/// Cloneable sender side of the hub.
#[derive(Debug, Clone)]
pub struct HubHandle {
    events: mpsc::Sender<HubEvent>,
}

impl HubHandle {
    /// Registers a connection. `None` means it was refused (banned); its
    /// outbox is already closing with the refusal notice as farewell.
    pub async fn connect(&self, conn: Connection) -> Option<SessionId> {
        let (reply, rx) = oneshot::channel();
        self.events.send(HubEvent::Connect { conn, reply }).await.ok()?;
        rx.await.ok().flatten()
    }

    pub async fn inbound(&self, session_id: &str, message: Inbound) {
        self.post(HubEvent::Inbound { session_id: session_id.to_owned(), message }).await;
    }

    pub async fn disconnect(&self, session_id: &str) {
        self.post(HubEvent::Disconnect { session_id: session_id.to_owned() }).await;
    }

    pub async fn detect(&self, request: DetectRequest) -> anyhow::Result<DetectReply> {
        self.request(|reply| HubEvent::Detect { request, reply }).await
    }

    pub async fn streams(&self) -> anyhow::Result<Vec<StreamListing>> {
        self.request(|reply| HubEvent::ListStreams { reply }).await
    }

    pub async fn stream(&self, stream_key: &str) -> anyhow::Result<Option<StreamDetails>> {
        let stream_key = stream_key.to_owned();
        self.request(|reply| HubEvent::StreamDetails { stream_key, reply }).await
    }

    /// Creates a live stream entry without an ingest server behind it.
    pub async fn test_stream(&self) -> anyhow::Result<StreamEntry> {
        self.request(|reply| HubEvent::TestStream { reply }).await
    }

    pub async fn status(&self) -> anyhow::Result<StatusReport> {
        self.request(|reply| HubEvent::Status { reply }).await
    }

    pub async fn sweep(&self) {
        self.post(HubEvent::Sweep).await;
    }

    pub async fn shutdown(&self) {
        self.post(HubEvent::Shutdown).await;
    }

    async fn post(&self, event: HubEvent) {
        if self.events.send(event).await.is_err() {
            debug!("hub stopped, event dropped");
        }
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> HubEvent) -> anyhow::Result<T> {
        let (reply, rx) = oneshot::channel();
        self.events
            .send(make(reply))
            .await
            .map_err(|_| anyhow!("hub is not running"))?;
        rx.await.context("hub dropped the request")
    }
}

/// Everything the hub needs at startup.
pub struct HubParts {
    pub credentials: Credentials,
    pub store: Arc<dyn Store>,
    pub sink: Arc<dyn NotificationSink>,
    pub moderation: ModerationStore,
    pub timings: Timings,
}

pub struct Hub {
    sessions: SessionRegistry,
    moderation: ModerationStore,
    scopes: ScopeRouter,
    streams: StreamCatalog,
    credentials: Credentials,
    store: Arc<dyn Store>,
    writer: Writer,
    sink: Arc<dyn NotificationSink>,
    http: reqwest::Client,
    start_checks: HashMap<String, AbortHandle>,
    /// Pending removals of ended streams, by stream key.
    grace_timers: HashMap<String, AbortHandle>,
    /// Weak so the loop ends once every [`HubHandle`] is gone.
    events: mpsc::WeakSender<HubEvent>,
    timings: Timings,
    started_at: Instant,
}

impl Hub {
    /// Starts the hub, its store writer and its periodic timers.
    pub fn spawn(parts: HubParts) -> (HubHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let (writer, _) = Writer::spawn(parts.store.clone());

        timers::spawn_periodic(tx.downgrade(), parts.timings.sweep_interval, || HubEvent::Sweep);
        timers::spawn_periodic(tx.downgrade(), parts.timings.stats_interval, || HubEvent::Stats);

        let hub = Hub {
            sessions: SessionRegistry::new(),
            moderation: parts.moderation,
            scopes: ScopeRouter::new(),
            streams: StreamCatalog::new(),
            credentials: parts.credentials,
            store: parts.store,
            writer,
            sink: parts.sink,
            http: reqwest::Client::new(),
            start_checks: HashMap::new(),
            grace_timers: HashMap::new(),
            events: tx.downgrade(),
            timings: parts.timings,
            started_at: Instant::now(),
        };

        let task = tokio::spawn(hub.run(rx));
        (HubHandle { events: tx }, task)
    }

    async fn run(mut self, mut rx: mpsc::Receiver<HubEvent>) {
        info!("hub started");
        while let Some(event) = rx.recv().await {
            if !self.handle(event) {
                break;
            }
        }

        for timer in self.start_checks.values().chain(self.grace_timers.values()) {
            timer.abort();
        }
        for session in self.sessions.list() {
            session.outbox().close();
        }
        info!(sessions = self.sessions.len(), "hub stopped");
    }

    /// Returns false when the hub should stop.
    fn handle(&mut self, event: HubEvent) -> bool {
        let now = OffsetDateTime::now_utc();
        match event {
            HubEvent::Connect { conn, reply } => {
                let _ = reply.send(self.connect(conn, now));
            }
            HubEvent::Inbound { session_id, message } => self.dispatch(&session_id, message, now),
            HubEvent::Disconnect { session_id } => self.disconnect(&session_id, now),
            HubEvent::AccountResolved { session_id, resolution } => {
                self.account_resolved(&session_id, resolution, now)
            }
            HubEvent::Detect { request, reply } => {
                let _ = reply.send(self.detect(request, now));
            }
            HubEvent::ListStreams { reply } => {
                let _ = reply.send(self.list_streams());
            }
            HubEvent::StreamDetails { stream_key, reply } => {
                let _ = reply.send(self.stream_details(&stream_key));
            }
            HubEvent::Status { reply } => {
                let _ = reply.send(self.status(now));
            }
            HubEvent::TestStream { reply } => {
                let _ = reply.send(self.create_test_stream(now));
            }
            HubEvent::GraceElapsed { stream_key } => self.grace_elapsed(&stream_key),
            HubEvent::Evict { session_id, farewell } => self.evict(&session_id, farewell, now),
            HubEvent::Sweep => self.sweep(now),
            HubEvent::Stats => self.stats(),
            HubEvent::Shutdown => return false,
        }
        true
    }

    fn status(&self, now: OffsetDateTime) -> StatusReport {
        StatusReport {
            success: true,
            connected_users: self.sessions.len(),
            active_streams: self.streams.len(),
            global_chat_messages: self.scopes.message_count(&crate::scopes::ScopeKey::Global),
            stream_chat_messages: self.scopes.stream_message_count(),
            uptime: self.started_at.elapsed().as_secs_f64(),
            timestamp: now,
        }
    }

    fn persist(&self, write: Write) {
        self.writer.submit(write);
    }

    fn notify(&self, notification: Notification) {
        let sink = self.sink.clone();
        tokio::spawn(async move {
            if let Err(error) = sink.notify(&notification).await.map_err(HubError::from) {
                warn!(kind = notification.kind(), %error, "notification not delivered");
            }
        });
    }

    /// Posts `event` back to the hub after `delay`. Aborting the handle
    /// before then cancels it.
    fn post_after(&self, delay: Duration, event: HubEvent) -> AbortHandle {
        let events = self.events.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(events) = events.upgrade() {
                let _ = events.send(event).await;
            }
        })
        .abort_handle()
    }

    /// Sends the presence count and list to every session.
    fn broadcast_presence(&self) {
        self.sessions.broadcast(&Outbound::UserCount { count: self.sessions.len() });
        self.sessions.broadcast(&Outbound::UserList { users: self.sessions.presence() });
    }
}
