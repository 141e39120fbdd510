use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tracing::debug;

use crate::error::SinkError;

use super::{Notification, NotificationSink, Subject};

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);
const DELETED_PREVIEW_CHARS: usize = 100;

const ORANGE: u32 = 0xf59e0b;
const RED: u32 = 0xef4444;
const GREEN: u32 = 0x10b981;
const LIGHT_GREEN: u32 = 0x22c55e;
const GRAY: u32 = 0x6b7280;
const BLUE: u32 = 0x3b82f6;

/// Posts Discord-style embeds to a webhook URL.
#[derive(Debug, Clone)]
pub struct WebhookSink {
    url: String,
    client: reqwest::Client,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder().timeout(WEBHOOK_TIMEOUT).build()?;
        Ok(WebhookSink { url: url.into(), client })
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    async fn notify(&self, notification: &Notification) -> Result<(), SinkError> {
        let payload = json!({ "embeds": [embed(notification, OffsetDateTime::now_utc())] });
        let response = self.client.post(&self.url).json(&payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SinkError::Status(status.as_u16()));
        }
        debug!(kind = notification.kind(), "webhook notification delivered");
        Ok(())
    }
}

fn field(name: &str, value: impl Into<String>, inline: bool) -> Value {
    json!({ "name": name, "value": value.into(), "inline": inline })
}

fn subject_fields(subject: &Subject) -> Vec<Value> {
    vec![
        field("User", &subject.username, true),
        field("IP", &subject.ip, true),
        field("System", format!("{} ({})", subject.client.os, subject.client.device_type), true),
        field("Browser", subject.client.browser, true),
    ]
}

fn rfc3339(at: OffsetDateTime) -> String {
    at.format(&Rfc3339).unwrap_or_else(|_| at.to_string())
}

fn preview(message: &str) -> String {
    if message.chars().count() > DELETED_PREVIEW_CHARS {
        let cut: String = message.chars().take(DELETED_PREVIEW_CHARS).collect();
        format!("{cut}...")
    } else {
        message.to_owned()
    }
}

/// Builds the embed object for one notification.
pub(crate) fn embed(notification: &Notification, now: OffsetDateTime) -> Value {
    let (title, color, footer, fields) = match notification {
        Notification::UserConnected { subject, page, connect_time } => {
            let mut fields = subject_fields(subject);
            fields.push(field("Page", page, true));
            fields.push(field("Connected at", rfc3339(*connect_time), false));
            ("🟢 New connection", LIGHT_GREEN, "Connections", fields)
        }
        Notification::UserDisconnected { subject, session_duration } => {
            let mut fields = subject_fields(subject);
            fields.push(field("Session duration", session_duration, true));
            ("🔴 Disconnected", RED, "Connections", fields)
        }
        Notification::UserMuted { subject, duration, count, expires_at, reason } => {
            let mut fields = subject_fields(subject);
            let duration = duration.map_or_else(|| "permanent".to_owned(), |m| format!("{m} minutes"));
            fields.push(field("Duration", duration, true));
            fields.push(field("Infraction #", count.to_string(), true));
            fields.push(field("Expires", expires_at.map_or_else(|| "never".to_owned(), rfc3339), false));
            fields.push(field("Reason", reason.as_deref().unwrap_or("inappropriate behaviour"), false));
            ("🔇 User muted", ORANGE, "Moderation", fields)
        }
        Notification::UserBanned { subject, permanent, reason } => {
            let mut fields = subject_fields(subject);
            fields.push(field("Type", if *permanent { "permanent ban" } else { "temporary ban" }, true));
            fields.push(field("Reason", reason.as_deref().unwrap_or("repeated infractions"), false));
            ("🚫 User banned", RED, "Moderation", fields)
        }
        Notification::UserUnmuted { fingerprint, lifted, actor } => (
            "🔊 User unmuted",
            GREEN,
            "Moderation",
            vec![
                field("Fingerprint", fingerprint, true),
                field("Mutes lifted", lifted.to_string(), true),
                field("By", actor, true),
            ],
        ),
        Notification::UserUnbanned { fingerprint, ip, lifted, actor } => (
            "✅ User unbanned",
            GREEN,
            "Moderation",
            vec![
                field("Fingerprint", fingerprint, true),
                field("IP", ip.as_deref().unwrap_or("n/a"), true),
                field("Bans lifted", lifted.to_string(), true),
                field("By", actor, true),
            ],
        ),
        Notification::MessageDeleted { author, ip, moderator, message } => (
            "🗑️ Message deleted",
            GRAY,
            "Chat moderation",
            vec![
                field("Author", author, true),
                field("IP", ip, true),
                field("Moderator", moderator, true),
                field("Message", preview(message), false),
            ],
        ),
        Notification::ServerStats { active_users, total_messages, muted_users, uptime_minutes } => (
            "📊 Server statistics",
            BLUE,
            "Statistics",
            vec![
                field("Connected users", active_users.to_string(), true),
                field("Messages", total_messages.to_string(), true),
                field("Muted users", muted_users.to_string(), true),
                field("Uptime", format!("{uptime_minutes} minutes"), true),
            ],
        ),
    };

    json!({
        "title": title,
        "color": color,
        "fields": fields,
        "timestamp": rfc3339(now),
        "footer": { "text": format!("streamhub - {footer}") },
    })
}
