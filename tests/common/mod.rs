#![allow(dead_code)]

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use serde_json::Value;
use streamhub::{
    auth::Credentials,
    config::Config,
    error::SinkError,
    hub::{Hub, HubHandle, HubParts, Timings},
    moderation::ModerationStore,
    notify::{Notification, NotificationSink},
    protocol::Inbound,
    session::{Connection, Frame, Outbox, OutboxReceiver},
    store::SqliteStore,
};

pub const FIREFOX: &str = "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0";
const RECV_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Default)]
pub struct RecordingSink {
    pub seen: Mutex<Vec<Notification>>,
}

impl RecordingSink {
    pub fn kinds(&self) -> Vec<&'static str> {
        self.seen.lock().unwrap().iter().map(Notification::kind).collect()
    }

    /// Notifications are delivered from spawned tasks; poll until `kind` shows up.
    pub async fn wait_for(&self, kind: &str) {
        let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
        while !self.kinds().contains(&kind) {
            assert!(tokio::time::Instant::now() < deadline, "no {kind} notification");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn notify(&self, notification: &Notification) -> Result<(), SinkError> {
        self.seen.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

pub struct TestHub {
    pub hub: HubHandle,
    pub sink: Arc<RecordingSink>,
    pub store: Arc<SqliteStore>,
}

pub fn timings() -> Timings {
    Timings {
        stream_grace: Duration::from_millis(100),
        start_check_delay: Duration::from_millis(50),
        ban_close_delay: Duration::from_millis(20),
        stream_idle: Duration::from_secs(3600),
        sweep_interval: Duration::from_secs(3600),
        stats_interval: Duration::from_secs(3600),
    }
}

pub async fn start() -> TestHub {
    start_with(ModerationStore::new()).await
}

pub async fn start_with(moderation: ModerationStore) -> TestHub {
    launch(memory_store().await, moderation, timings())
}

pub async fn start_with_timings(timings: Timings) -> TestHub {
    launch(memory_store().await, ModerationStore::new(), timings)
}

pub async fn memory_store() -> SqliteStore {
    SqliteStore::connect("sqlite::memory:").await.unwrap()
}

pub fn launch(store: SqliteStore, moderation: ModerationStore, timings: Timings) -> TestHub {
    let store = Arc::new(store);
    let sink = Arc::new(RecordingSink::default());
    let (hub, _task) = Hub::spawn(HubParts {
        credentials: Credentials::from_config(&Config::default()),
        store: store.clone(),
        sink: sink.clone(),
        moderation,
        timings,
    });
    TestHub { hub, sink, store }
}

impl TestHub {
    pub async fn connect(&self, address: &str) -> Client {
        self.try_connect(address).await.expect("connection refused")
    }

    pub async fn try_connect(&self, address: &str) -> Option<Client> {
        let (outbox, rx) = Outbox::channel();
        let conn = Connection { address: address.into(), user_agent: FIREFOX.into(), outbox };
        let id = self.hub.connect(conn).await?;
        Some(Client { id, rx, hub: self.hub.clone() })
    }

    /// Rows of `chat_messages` with this id. Writes land asynchronously, so
    /// poll until the count equals `expected`.
    pub async fn wait_for_chat_rows(&self, id: &str, expected: i64) {
        let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
        loop {
            let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM chat_messages WHERE id = ?")
                .bind(id)
                .fetch_one(self.store.pool())
                .await
                .unwrap();
            if count == expected {
                return;
            }
            assert!(tokio::time::Instant::now() < deadline, "chat row {id}: {count} rows, wanted {expected}");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Returns once every event queued before it has been handled.
    pub async fn settle(&self) {
        self.hub.status().await.unwrap();
    }
}

pub struct Client {
    pub id: String,
    rx: OutboxReceiver,
    hub: HubHandle,
}

impl Client {
    pub async fn send(&self, value: Value) {
        let message: Inbound = serde_json::from_value(value).unwrap();
        self.hub.inbound(&self.id, message).await;
    }

    pub async fn disconnect(self) {
        self.hub.disconnect(&self.id).await;
    }

    /// Next frame of type `kind`, skipping others.
    pub async fn expect(&mut self, kind: &str) -> Value {
        loop {
            let frame = tokio::time::timeout(RECV_TIMEOUT, self.rx.recv())
                .await
                .unwrap_or_else(|_| panic!("timed out waiting for {kind}"))
                .unwrap_or_else(|| panic!("outbox closed while waiting for {kind}"));
            if let Frame::Text(text) = frame {
                let value: Value = serde_json::from_str(text.as_str()).unwrap();
                if value["type"] == kind {
                    return value;
                }
            }
        }
    }

    /// Waits for the hub to close this connection.
    pub async fn expect_close(&mut self) {
        loop {
            let frame = tokio::time::timeout(RECV_TIMEOUT, self.rx.recv())
                .await
                .expect("timed out waiting for close");
            match frame {
                Some(Frame::Close) | None => return,
                Some(Frame::Text(_)) => continue,
            }
        }
    }

    /// Types of the text frames received until the connection is closed.
    pub async fn frames_until_close(&mut self) -> Vec<String> {
        let mut kinds = Vec::new();
        loop {
            let frame = tokio::time::timeout(RECV_TIMEOUT, self.rx.recv())
                .await
                .expect("timed out waiting for close");
            match frame {
                Some(Frame::Text(text)) => {
                    let value: Value = serde_json::from_str(text.as_str()).unwrap();
                    kinds.push(value["type"].as_str().unwrap_or_default().to_owned());
                }
                Some(Frame::Close) | None => return kinds,
            }
        }
    }

    /// Drops the receiving end, as a socket writer that died would.
    pub fn abandon(self) -> String {
        self.id
    }

    /// Types of every frame already queued.
    pub fn drain(&mut self) -> Vec<String> {
        let mut kinds = Vec::new();
        while let Ok(frame) = self.rx.try_recv() {
            if let Frame::Text(text) = frame {
                let value: Value = serde_json::from_str(text.as_str()).unwrap();
                kinds.push(value["type"].as_str().unwrap_or_default().to_owned());
            }
        }
        kinds
    }
}
