//! Operational notifications for humans watching the platform.
//!
//! Delivery is fire-and-forget: the hub hands a [`Notification`] to a spawned
//! task and never learns whether it arrived.

mod webhook;

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::{error::SinkError, session::ClientInfo};

pub use webhook::WebhookSink;

/// Who an event is about.
#[derive(Debug, Clone, PartialEq)]
pub struct Subject {
    pub username: String,
    pub ip: String,
    pub client: ClientInfo,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    UserConnected {
        subject: Subject,
        page: String,
        connect_time: OffsetDateTime,
    },
    UserDisconnected {
        subject: Subject,
        session_duration: String,
    },
    UserMuted {
        subject: Subject,
        /// Minutes; `None` when permanent.
        duration: Option<i64>,
        count: u32,
        expires_at: Option<OffsetDateTime>,
        reason: Option<String>,
    },
    UserBanned {
        subject: Subject,
        permanent: bool,
        reason: Option<String>,
    },
    UserUnmuted {
        fingerprint: String,
        lifted: usize,
        actor: String,
    },
    UserUnbanned {
        fingerprint: String,
        ip: Option<String>,
        lifted: usize,
        actor: String,
    },
    MessageDeleted {
        author: String,
        ip: String,
        moderator: String,
        message: String,
    },
    ServerStats {
        active_users: usize,
        total_messages: usize,
        muted_users: usize,
        uptime_minutes: u64,
    },
}

impl Notification {
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::UserConnected { .. } => "user_connected",
            Notification::UserDisconnected { .. } => "user_disconnected",
            Notification::UserMuted { .. } => "user_muted",
            Notification::UserBanned { .. } => "user_banned",
            Notification::UserUnmuted { .. } => "user_unmuted",
            Notification::UserUnbanned { .. } => "user_unbanned",
            Notification::MessageDeleted { .. } => "message_deleted",
            Notification::ServerStats { .. } => "server_stats",
        }
    }
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<(), SinkError>;
}

/// Used when no webhook is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

#[async_trait]
impl NotificationSink for NullSink {
    async fn notify(&self, _notification: &Notification) -> Result<(), SinkError> {
        Ok(())
    }
}
