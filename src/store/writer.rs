use std::sync::Arc;

use time::OffsetDateTime;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, warn};

use crate::{error::StoreError, moderation::ModerationRecord, protocol::ChatMessage};

use super::{with_retry, AuditEntry, SessionSnapshot, Store};

pub const WRITE_QUEUE_CAPACITY: usize = 1024;

/// A state change to mirror into the store.
#[derive(Debug, Clone)]
pub enum Write {
    UpsertSession(SessionSnapshot),
    RemoveSession(String),
    InsertMessage(ChatMessage),
    DeleteMessage(String),
    InsertModeration(ModerationRecord),
    ExpireBans {
        fingerprint: String,
        address: Option<String>,
        at: OffsetDateTime,
    },
    ExpireMutes {
        fingerprint: String,
        at: OffsetDateTime,
    },
    DeleteExpiredMutes {
        before: OffsetDateTime,
    },
    Audit(AuditEntry),
}

impl Write {
    pub fn label(&self) -> &'static str {
        match self {
            Write::UpsertSession(_) => "upsert_session",
            Write::RemoveSession(_) => "remove_session",
            Write::InsertMessage(_) => "insert_message",
            Write::DeleteMessage(_) => "delete_message",
            Write::InsertModeration(_) => "insert_moderation",
            Write::ExpireBans { .. } => "expire_bans",
            Write::ExpireMutes { .. } => "expire_mutes",
            Write::DeleteExpiredMutes { .. } => "delete_expired_mutes",
            Write::Audit(_) => "append_audit",
        }
    }

    async fn apply(&self, store: &dyn Store) -> Result<(), StoreError> {
        match self {
            Write::UpsertSession(snapshot) => store.upsert_session(snapshot).await,
            Write::RemoveSession(id) => store.remove_session(id).await,
            Write::InsertMessage(message) => store.insert_message(message).await,
            Write::DeleteMessage(id) => store.delete_message(id).await,
            Write::InsertModeration(record) => store.insert_moderation(record).await,
            Write::ExpireBans { fingerprint, address, at } => {
                store.expire_bans(fingerprint, address.as_deref(), *at).await.map(drop)
            }
            Write::ExpireMutes { fingerprint, at } => store.expire_mutes(fingerprint, *at).await.map(drop),
            Write::DeleteExpiredMutes { before } => store.delete_expired_mutes(*before).await.map(drop),
            Write::Audit(entry) => store.append_audit(entry).await,
        }
    }
}

/// Handle to the write-behind queue. Writes are applied one at a time in
/// submission order.
#[derive(Debug, Clone)]
pub struct Writer {
    tx: mpsc::Sender<Write>,
}

impl Writer {
    pub fn spawn(store: Arc<dyn Store>) -> (Writer, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<Write>(WRITE_QUEUE_CAPACITY);
        let task = tokio::spawn(async move {
            while let Some(write) = rx.recv().await {
                let label = write.label();
                match with_retry(label, || write.apply(store.as_ref())).await {
                    Ok(()) => debug!(op = label, "store write applied"),
                    Err(error) => warn!(op = label, %error, "store unavailable, change kept in memory only"),
                }
            }
            debug!("store writer stopped");
        });
        (Writer { tx }, task)
    }

    /// Queues a write without waiting. A full queue drops the write.
    pub fn submit(&self, write: Write) {
        if let Err(error) = self.tx.try_send(write) {
            warn!(op = error.into_inner().label(), "store write queue unavailable, dropping write");
        }
    }
}
