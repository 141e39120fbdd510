//! Wire records. Every frame is a JSON object tagged by `type`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use crate::{
    auth::{AuthContext, AuthRequest},
    moderation::ModerationRecord,
    session::Role,
    streams::StreamEntry,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub username: String,
    pub message: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub role: Role,
    pub is_system: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    pub ip: String,
    pub fingerprint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_key: Option<String>,
}

/// The client-authored part of a chat message. Identity, role and timing are
/// filled in by the hub.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatDraft {
    #[serde(default)]
    pub message: String,
    pub username: Option<String>,
    pub color: Option<String>,
    #[serde(default)]
    pub is_system: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdminAction {
    MuteUser,
    BanUser,
}

impl AdminAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdminAction::MuteUser => "mute_user",
            AdminAction::BanUser => "ban_user",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdminCommand {
    ListBanned,
    ListMuted,
    UnbanUser,
    UnmuteUser,
    ClearExpiredMutes,
    #[serde(other)]
    Unknown,
}

impl AdminCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdminCommand::ListBanned => "list_banned",
            AdminCommand::ListMuted => "list_muted",
            AdminCommand::UnbanUser => "unban_user",
            AdminCommand::UnmuteUser => "unmute_user",
            AdminCommand::ClearExpiredMutes => "clear_expired_mutes",
            AdminCommand::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CommandParams {
    pub fingerprint: Option<String>,
    pub ip: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Inbound {
    UserInfo {
        username: Option<String>,
        page: Option<String>,
    },
    ChatMessage {
        message: ChatDraft,
        stream_key: Option<String>,
    },
    JoinGlobalChat,
    LeaveGlobalChat,
    JoinStream {
        stream_key: String,
    },
    LeaveStream,
    Authenticate(AuthRequest),
    Login {
        username: String,
        password: String,
    },
    Register {
        username: String,
        password: String,
    },
    DeleteMessage {
        message_id: String,
        stream_key: Option<String>,
    },
    AdminAction {
        action: AdminAction,
        target_user_id: Option<String>,
        target_username: Option<String>,
        reason: Option<String>,
        /// Ban length; absent means permanent.
        duration_minutes: Option<i64>,
    },
    AdminCommand {
        command: AdminCommand,
        #[serde(default)]
        params: CommandParams,
    },
}

impl Inbound {
    pub fn kind(&self) -> &'static str {
        match self {
            Inbound::UserInfo { .. } => "user_info",
            Inbound::ChatMessage { .. } => "chat_message",
            Inbound::JoinGlobalChat => "join_global_chat",
            Inbound::LeaveGlobalChat => "leave_global_chat",
            Inbound::JoinStream { .. } => "join_stream",
            Inbound::LeaveStream => "leave_stream",
            Inbound::Authenticate(_) => "authenticate",
            Inbound::Login { .. } => "login",
            Inbound::Register { .. } => "register",
            Inbound::DeleteMessage { .. } => "delete_message",
            Inbound::AdminAction { .. } => "admin_action",
            Inbound::AdminCommand { .. } => "admin_command",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: String,
    pub username: String,
    pub ip: String,
    #[serde(with = "time::serde::rfc3339")]
    pub connect_time: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub last_activity: OffsetDateTime,
    pub page: String,
    pub role: Role,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSummary {
    pub id: String,
    pub username: String,
    pub role: Role,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BanInfo {
    pub reason: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub banned_at: OffsetDateTime,
    pub permanent: bool,
}

impl From<&ModerationRecord> for BanInfo {
    fn from(record: &ModerationRecord) -> Self {
        BanInfo {
            reason: record.reason.clone(),
            banned_at: record.created_at,
            permanent: record.is_permanent(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Outbound {
    UserCount {
        count: usize,
    },
    UserList {
        users: Vec<UserSummary>,
    },
    ActiveStreams {
        streams: Vec<StreamEntry>,
    },
    ChatMessage {
        message: ChatMessage,
    },
    AuthResponse {
        success: bool,
        role: Role,
        message: String,
        context: AuthContext,
    },
    LoginResponse {
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        user: Option<AccountSummary>,
        message: String,
    },
    RegisterResponse {
        success: bool,
        message: String,
    },
    Banned {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        ban_info: Option<BanInfo>,
    },
    Muted {
        message: String,
        /// Minutes; `null` when permanent.
        duration: Option<i64>,
        mute_count: u32,
    },
    MuteNotification {
        message: String,
        /// `null` when permanent.
        remaining_seconds: Option<i64>,
    },
    GlobalChatJoined {
        success: bool,
        chat_history: Vec<ChatMessage>,
    },
    StreamJoined {
        success: bool,
        stream: StreamEntry,
        chat_history: Vec<ChatMessage>,
        stream_key: String,
    },
    StreamUpdated {
        stream: StreamEntry,
        stream_key: String,
    },
    StreamDetected {
        stream: StreamEntry,
        stream_key: String,
    },
    StreamEnded {
        stream: StreamEntry,
        stream_key: String,
    },
    StreamRemoved {
        stream_key: String,
    },
    MessageDeleted {
        message_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        stream_key: Option<String>,
    },
    AdminResponse {
        success: bool,
        command: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
        message: String,
    },
}

impl Outbound {
    pub fn kind(&self) -> &'static str {
        match self {
            Outbound::UserCount { .. } => "user_count",
            Outbound::UserList { .. } => "user_list",
            Outbound::ActiveStreams { .. } => "active_streams",
            Outbound::ChatMessage { .. } => "chat_message",
            Outbound::AuthResponse { .. } => "auth_response",
            Outbound::LoginResponse { .. } => "login_response",
            Outbound::RegisterResponse { .. } => "register_response",
            Outbound::Banned { .. } => "banned",
            Outbound::Muted { .. } => "muted",
            Outbound::MuteNotification { .. } => "mute_notification",
            Outbound::GlobalChatJoined { .. } => "global_chat_joined",
            Outbound::StreamJoined { .. } => "stream_joined",
            Outbound::StreamUpdated { .. } => "stream_updated",
            Outbound::StreamDetected { .. } => "stream_detected",
            Outbound::StreamEnded { .. } => "stream_ended",
            Outbound::StreamRemoved { .. } => "stream_removed",
            Outbound::MessageDeleted { .. } => "message_deleted",
            Outbound::AdminResponse { .. } => "admin_response",
        }
    }

    pub fn admin(command: &str, success: bool, message: impl Into<String>, data: Option<Value>) -> Self {
        Outbound::AdminResponse {
            success,
            command: command.to_owned(),
            data,
            message: message.into(),
        }
    }
}

/// `Xm Ys` when at least a minute, otherwise `Ys`.
pub fn format_duration(duration: time::Duration) -> String {
    let total = duration.whole_seconds().max(0);
    let (minutes, seconds) = (total / 60, total % 60);
    if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}
