//! Inbound message handling.

use serde_json::json;
use time::{Duration, OffsetDateTime};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    auth::{accounts, authorize, AccountResolution, AuthOutcome, AuthRequest, Privileged},
    error::HubError,
    moderation::mute_duration,
    notify::{Notification, Subject},
    protocol::{
        format_duration, AccountSummary, AdminAction, AdminCommand, ChatDraft, ChatMessage, CommandParams, Inbound,
        Outbound,
    },
    scopes::ScopeKey,
    session::{Connection, Rejected, Role, Session, SessionId},
    store::{AuditEntry, SessionSnapshot, Write},
};

use super::{Hub, HubEvent};

pub const MAX_MESSAGE_CHARS: usize = 500;
pub const MAX_USERNAME_CHARS: usize = 32;
const ANONYMOUS: &str = "Anonyme";

fn privileged(message: &Inbound) -> Option<Privileged> {
    match message {
        Inbound::DeleteMessage { .. } => Some(Privileged::DeleteMessage),
        Inbound::AdminAction { .. } => Some(Privileged::AdminAction),
        Inbound::AdminCommand { .. } => Some(Privileged::AdminCommand),
        _ => None,
    }
}

fn subject(session: &Session) -> Subject {
    Subject {
        username: session.display_name().to_owned(),
        ip: session.address.clone(),
        client: session.client.clone(),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_owned()).filter(|v| !v.is_empty())
}

impl Hub {
    pub(super) fn connect(&mut self, conn: Connection, now: OffsetDateTime) -> Option<SessionId> {
        let address = conn.address.clone();
        let session = match self.sessions.register(conn, &self.moderation, now) {
            Ok(session) => session,
            Err(Rejected { ban, outbox }) => {
                info!(%address, fingerprint = %ban.fingerprint, "refused banned connection");
                outbox.close_with(&Outbound::Banned {
                    message: "You are banned from this platform.".to_owned(),
                    ban_info: Some((&ban).into()),
                });
                return None;
            }
        };

        let session_id = session.id.clone();
        let snapshot = SessionSnapshot::from(session);
        info!(session_id, %address, fingerprint = %snapshot.fingerprint, "session connected");
        self.persist(Write::UpsertSession(snapshot));

        self.sessions.send(&session_id, &Outbound::ActiveStreams { streams: self.streams.list() });
        self.broadcast_presence();
        Some(session_id)
    }

    pub(super) fn disconnect(&mut self, session_id: &str, now: OffsetDateTime) {
        // leave every scope before anything else iterates a viewer set
        let left = self.scopes.unsubscribe_all(session_id);
        let Some(session) = self.sessions.remove(session_id) else {
            return;
        };

        for (scope, count) in left {
            if let ScopeKey::Stream(stream_key) = scope {
                self.viewers_changed(&stream_key, count);
            }
        }

        self.persist(Write::RemoveSession(session.id.clone()));
        self.broadcast_presence();

        let duration = format_duration(now - session.connected_at);
        info!(session_id, %duration, "session disconnected");
        if session.username.is_some() {
            self.notify(Notification::UserDisconnected { subject: subject(&session), session_duration: duration });
        }
    }

    /// Closes the session's socket, whatever is still queued on it, and
    /// forgets the session.
    pub(super) fn evict(&mut self, session_id: &str, farewell: Option<Outbound>, now: OffsetDateTime) {
        let Some(session) = self.sessions.get(session_id) else {
            return;
        };
        match &farewell {
            Some(message) => session.outbox().close_with(message),
            None => session.outbox().close(),
        }
        info!(session_id, "session evicted");
        self.disconnect(session_id, now);
    }

    pub(super) fn dispatch(&mut self, session_id: &str, message: Inbound, now: OffsetDateTime) {
        if !self.sessions.touch(session_id, None, now) {
            debug!(session_id, kind = message.kind(), "message for unknown session");
            return;
        }
        let kind = message.kind();
        debug!(session_id, kind, "inbound");

        if let Some(operation) = privileged(&message) {
            let role = self.sessions.get(session_id).map_or(Role::Viewer, |s| s.role);
            if let Err(error) = authorize(operation, role) {
                self.reject(session_id, kind, error);
                return;
            }
        }

        let result = match message {
            Inbound::UserInfo { username, page } => self.user_info(session_id, username, page, now),
            Inbound::ChatMessage { message, stream_key } => self.chat_message(session_id, message, stream_key, now),
            Inbound::JoinGlobalChat => self.join_global_chat(session_id),
            Inbound::LeaveGlobalChat => self.leave_global_chat(session_id),
            Inbound::JoinStream { stream_key } => self.join_stream(session_id, stream_key, now),
            Inbound::LeaveStream => self.leave_stream(session_id),
            Inbound::Authenticate(request) => self.authenticate(session_id, request),
            Inbound::Login { username, password } => self.login(session_id, username, password, now),
            Inbound::Register { username, password } => self.register(session_id, username, password, now),
            Inbound::DeleteMessage { message_id, stream_key } => {
                self.delete_message(session_id, message_id, stream_key, now)
            }
            Inbound::AdminAction { action, target_user_id, target_username, reason, duration_minutes } => self
                .admin_action(
                    session_id,
                    action,
                    target_user_id.as_deref(),
                    target_username.as_deref(),
                    reason.as_deref(),
                    duration_minutes,
                    now,
                ),
            Inbound::AdminCommand { command, params } => self.admin_command(session_id, command, params, now),
        };

        if let Err(error) = result {
            self.reject(session_id, kind, error);
        }
    }

    /// Privileged operations get a generic `admin_response`; everything else
    /// is only logged.
    fn reject(&self, session_id: &str, kind: &'static str, error: HubError) {
        match &error {
            HubError::StoreUnavailable(_) | HubError::SinkUnavailable(_) => {
                warn!(session_id, kind, %error, "operation degraded")
            }
            _ => debug!(session_id, kind, %error, "inbound rejected"),
        }

        let reply = match error {
            HubError::Authorization => "permission denied".to_owned(),
            HubError::NotFound(_) | HubError::Validation(_) => error.to_string(),
            _ => return,
        };
        if matches!(kind, "delete_message" | "admin_action" | "admin_command") {
            self.sessions.send(session_id, &Outbound::admin(kind, false, reply, None));
        }
    }

    fn session(&self, session_id: &str) -> Result<&Session, HubError> {
        self.sessions.get(session_id).ok_or(HubError::NotFound("session"))
    }

    fn session_mut(&mut self, session_id: &str) -> Result<&mut Session, HubError> {
        self.sessions.get_mut(session_id).ok_or(HubError::NotFound("session"))
    }

    fn user_info(
        &mut self,
        session_id: &str,
        username: Option<String>,
        page: Option<String>,
        now: OffsetDateTime,
    ) -> Result<(), HubError> {
        let username = non_empty(username);
        if username.as_ref().is_some_and(|name| name.chars().count() > MAX_USERNAME_CHARS) {
            return Err(HubError::Validation(format!("username longer than {MAX_USERNAME_CHARS} characters")));
        }

        let session = self.session_mut(session_id)?;
        if username.is_some() {
            session.username = username;
        }
        if let Some(page) = non_empty(page) {
            session.page = page;
        }

        let session = self.session(session_id)?;
        self.persist(Write::UpsertSession(SessionSnapshot::from(session)));
        if session.username.is_some() {
            self.notify(Notification::UserConnected {
                subject: subject(session),
                page: session.page.clone(),
                connect_time: now,
            });
        }
        self.sessions.broadcast(&Outbound::UserList { users: self.sessions.presence() });
        Ok(())
    }

    fn chat_message(
        &mut self,
        session_id: &str,
        draft: ChatDraft,
        stream_key: Option<String>,
        now: OffsetDateTime,
    ) -> Result<(), HubError> {
        let session = self.session(session_id)?;

        let body = draft.message.trim();
        if body.is_empty() {
            return Err(HubError::Validation("empty message".to_owned()));
        }
        if body.chars().count() > MAX_MESSAGE_CHARS {
            return Err(HubError::Validation(format!("message longer than {MAX_MESSAGE_CHARS} characters")));
        }

        if self.moderation.is_banned(&session.fingerprint, &session.address, now).is_some() {
            debug!(session_id, fingerprint = %session.fingerprint, "banned sender awaiting eviction");
            return Ok(());
        }

        if let Some(mute) = self.moderation.is_muted(&session.fingerprint, now) {
            let remaining = mute.remaining(now);
            let message = match remaining {
                Some(left) => format!("You are muted for another {}.", format_duration(left)),
                None => "You are permanently muted.".to_owned(),
            };
            debug!(session_id, fingerprint = %session.fingerprint, "muted sender");
            self.sessions.send(
                session_id,
                &Outbound::MuteNotification {
                    message,
                    remaining_seconds: remaining.map(|left| left.whole_seconds().max(1)),
                },
            );
            return Ok(());
        }

        let scope = ScopeKey::from_stream(non_empty(stream_key).as_deref().or(session.current_stream.as_deref()));
        if !self.scopes.contains(&scope) {
            return Err(HubError::NotFound("stream"));
        }

        let message = ChatMessage {
            id: Uuid::now_v7().to_string(),
            username: session
                .username
                .clone()
                .or_else(|| non_empty(draft.username))
                .unwrap_or_else(|| ANONYMOUS.to_owned()),
            message: body.to_owned(),
            timestamp: now,
            role: session.role,
            is_system: draft.is_system && session.role == Role::Admin,
            color: draft.color,
            ip: session.address.clone(),
            fingerprint: session.fingerprint.clone(),
            stream_key: scope.stream_key().map(str::to_owned),
        };

        self.persist(Write::InsertMessage(message.clone()));
        let delivered = self.scopes.publish(&scope, message, &self.sessions);
        debug!(session_id, stream_key = scope.stream_key(), delivered, "chat message published");
        Ok(())
    }

    fn join_global_chat(&mut self, session_id: &str) -> Result<(), HubError> {
        self.session(session_id)?;
        self.leave_current_stream(session_id);
        self.scopes.subscribe(&ScopeKey::Global, session_id);
        self.sessions.send(
            session_id,
            &Outbound::GlobalChatJoined { success: true, chat_history: self.scopes.history(&ScopeKey::Global) },
        );
        Ok(())
    }

    fn leave_global_chat(&mut self, session_id: &str) -> Result<(), HubError> {
        self.session(session_id)?;
        self.scopes.unsubscribe(&ScopeKey::Global, session_id);
        Ok(())
    }

    fn join_stream(&mut self, session_id: &str, stream_key: String, now: OffsetDateTime) -> Result<(), HubError> {
        let stream_key = stream_key.trim().to_owned();
        if stream_key.is_empty() {
            return Err(HubError::Validation("missing stream key".to_owned()));
        }
        if self.session(session_id)?.current_stream.as_deref() != Some(stream_key.as_str()) {
            self.leave_current_stream(session_id);
        }
        self.scopes.unsubscribe(&ScopeKey::Global, session_id);

        let scope = ScopeKey::Stream(stream_key.clone());
        let (_, created) = self.streams.join_implicit(&stream_key, now);
        if created {
            info!(%stream_key, "stream created by first viewer");
        }
        let count = self.scopes.subscribe(&scope, session_id);
        self.session_mut(session_id)?.current_stream = Some(stream_key.clone());

        if let Some(stream) = self.streams.update_viewer_count(&stream_key, count).cloned() {
            self.sessions.send(
                session_id,
                &Outbound::StreamJoined {
                    success: true,
                    stream: stream.clone(),
                    chat_history: self.scopes.history(&scope),
                    stream_key: stream_key.clone(),
                },
            );
            self.sessions.broadcast(&Outbound::StreamUpdated { stream, stream_key });
        }
        Ok(())
    }

    fn leave_stream(&mut self, session_id: &str) -> Result<(), HubError> {
        self.session(session_id)?;
        if self.leave_current_stream(session_id).is_some() {
            self.scopes.subscribe(&ScopeKey::Global, session_id);
        }
        Ok(())
    }

    /// Unsubscribes the session from its stream scope, if any, and publishes
    /// the new viewer count. Returns the stream key it left.
    fn leave_current_stream(&mut self, session_id: &str) -> Option<String> {
        let stream_key = self.sessions.get_mut(session_id)?.current_stream.take()?;
        if let Some(count) = self.scopes.unsubscribe(&ScopeKey::Stream(stream_key.clone()), session_id) {
            self.viewers_changed(&stream_key, count);
        }
        Some(stream_key)
    }

    pub(super) fn viewers_changed(&mut self, stream_key: &str, count: usize) {
        if let Some(stream) = self.streams.update_viewer_count(stream_key, count).cloned() {
            self.sessions
                .broadcast(&Outbound::StreamUpdated { stream, stream_key: stream_key.to_owned() });
        }
    }

    fn authenticate(&mut self, session_id: &str, request: AuthRequest) -> Result<(), HubError> {
        let context = request.context();
        let outcome = self.credentials.check(&request);
        let session = self.session_mut(session_id)?;
        let previous = session.role;

        let (success, message) = match outcome {
            AuthOutcome::Authenticated => {
                session.authenticated = true;
                (true, "access granted".to_owned())
            }
            AuthOutcome::Granted(role) => {
                session.role = role;
                (true, format!("{} access granted", role.as_str()))
            }
            AuthOutcome::Denied => (false, "authentication failed".to_owned()),
        };
        let role = session.role;

        if success {
            info!(session_id, ?context, role = role.as_str(), "authenticated");
        } else {
            warn!(session_id, ?context, "authentication failed");
        }
        self.sessions.send(session_id, &Outbound::AuthResponse { success, role, message, context });
        if role != previous {
            self.sessions.broadcast(&Outbound::UserList { users: self.sessions.presence() });
        }
        Ok(())
    }

    fn credentials_from(username: String, password: String) -> Result<(String, String), HubError> {
        let username = username.trim().to_owned();
        if username.is_empty() || password.is_empty() {
            return Err(HubError::Validation("username and password are required".to_owned()));
        }
        if username.chars().count() > MAX_USERNAME_CHARS {
            return Err(HubError::Validation(format!("username longer than {MAX_USERNAME_CHARS} characters")));
        }
        Ok((username, password))
    }

    fn login(&mut self, session_id: &str, username: String, password: String, now: OffsetDateTime) -> Result<(), HubError> {
        self.session(session_id)?;
        let (username, password) = match Self::credentials_from(username, password) {
            Ok(credentials) => credentials,
            Err(error) => {
                self.sessions.send(
                    session_id,
                    &Outbound::LoginResponse { success: false, user: None, message: error.to_string() },
                );
                return Ok(());
            }
        };

        let store = self.store.clone();
        self.resolve_account(session_id, async move { accounts::login(store.as_ref(), &username, &password, now).await });
        Ok(())
    }

    fn register(
        &mut self,
        session_id: &str,
        username: String,
        password: String,
        now: OffsetDateTime,
    ) -> Result<(), HubError> {
        self.session(session_id)?;
        let (username, password) = match Self::credentials_from(username, password) {
            Ok(credentials) => credentials,
            Err(error) => {
                self.sessions
                    .send(session_id, &Outbound::RegisterResponse { success: false, message: error.to_string() });
                return Ok(());
            }
        };

        let store = self.store.clone();
        self.resolve_account(session_id, async move {
            accounts::register(store.as_ref(), &username, &password, now).await
        });
        Ok(())
    }

    /// Runs an account lookup off the hub and posts the result back.
    fn resolve_account(
        &self,
        session_id: &str,
        lookup: impl std::future::Future<Output = AccountResolution> + Send + 'static,
    ) {
        let events = self.events.clone();
        let session_id = session_id.to_owned();
        tokio::spawn(async move {
            let resolution = lookup.await;
            if let Some(events) = events.upgrade() {
                let _ = events.send(HubEvent::AccountResolved { session_id, resolution }).await;
            }
        });
    }

    pub(super) fn account_resolved(&mut self, session_id: &str, resolution: AccountResolution, now: OffsetDateTime) {
        let Some(session) = self.sessions.get_mut(session_id) else {
            debug!(session_id, "account resolved after disconnect");
            return;
        };

        match resolution {
            AccountResolution::Login(Ok(Some(account))) => {
                session.username = Some(account.username.clone());
                session.role = account.role;
                info!(session_id, username = %account.username, "logged in");
                let user = AccountSummary { id: account.id, username: account.username, role: account.role };
                self.sessions.send(
                    session_id,
                    &Outbound::LoginResponse { success: true, user: Some(user), message: "login successful".to_owned() },
                );
                self.sessions.broadcast(&Outbound::UserList { users: self.sessions.presence() });
            }
            AccountResolution::Login(Ok(None)) => {
                self.sessions.send(
                    session_id,
                    &Outbound::LoginResponse {
                        success: false,
                        user: None,
                        message: "invalid username or password".to_owned(),
                    },
                );
            }
            AccountResolution::Login(Err(error)) => {
                self.reject(session_id, "login", HubError::from(error));
                self.sessions.send(
                    session_id,
                    &Outbound::LoginResponse { success: false, user: None, message: "login unavailable".to_owned() },
                );
            }
            AccountResolution::Register(Ok(Some(account))) => {
                info!(session_id, username = %account.username, "account registered");
                let entry = AuditEntry::by(session, "register", format!("account {}", account.username), now);
                self.persist(Write::Audit(entry));
                self.sessions.send(
                    session_id,
                    &Outbound::RegisterResponse { success: true, message: "account created".to_owned() },
                );
            }
            AccountResolution::Register(Ok(None)) => {
                self.sessions.send(
                    session_id,
                    &Outbound::RegisterResponse { success: false, message: "username already taken".to_owned() },
                );
            }
            AccountResolution::Register(Err(error)) => {
                self.reject(session_id, "register", HubError::from(error));
                self.sessions.send(
                    session_id,
                    &Outbound::RegisterResponse { success: false, message: "registration unavailable".to_owned() },
                );
            }
        }
    }

    fn delete_message(
        &mut self,
        session_id: &str,
        message_id: String,
        stream_key: Option<String>,
        now: OffsetDateTime,
    ) -> Result<(), HubError> {
        let moderator = self.session(session_id)?;
        let scope = ScopeKey::from_stream(non_empty(stream_key).as_deref().or(moderator.current_stream.as_deref()));
        let moderator_name = moderator.display_name().to_owned();
        let audit = AuditEntry::by(moderator, "delete_message", format!("message {message_id}"), now);

        // the id may have aged out of history but still be stored
        let removed = self.scopes.delete_message(&scope, &message_id);
        info!(
            session_id,
            %message_id,
            stream_key = scope.stream_key(),
            in_history = removed.is_some(),
            "message deleted"
        );
        self.persist(Write::DeleteMessage(message_id.clone()));
        self.persist(Write::Audit(audit));

        let event = Outbound::MessageDeleted { message_id, stream_key: scope.stream_key().map(str::to_owned) };
        match scope {
            ScopeKey::Global => self.sessions.broadcast(&event),
            ScopeKey::Stream(_) => self.sessions.send_to(&self.scopes.viewers(&scope), &event),
        };

        if let Some(removed) = removed {
            self.notify(Notification::MessageDeleted {
                author: removed.username,
                ip: removed.ip,
                moderator: moderator_name,
                message: removed.message,
            });
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn admin_action(
        &mut self,
        session_id: &str,
        action: AdminAction,
        target_id: Option<&str>,
        target_username: Option<&str>,
        reason: Option<&str>,
        duration_minutes: Option<i64>,
        now: OffsetDateTime,
    ) -> Result<(), HubError> {
        let actor = self.session(session_id)?;
        let actor_name = actor.display_name().to_owned();
        let audit_actor = AuditEntry::by(actor, action.as_str(), String::new(), now);

        let target = self
            .sessions
            .find_target(target_id, target_username)
            .ok_or(HubError::NotFound("target user"))?;
        let (target_id, fingerprint, address, username) = (
            target.id.clone(),
            target.fingerprint.clone(),
            target.address.clone(),
            target.username.clone(),
        );
        let target_subject = subject(target);

        let (reply, data) = match action {
            AdminAction::MuteUser => {
                let (record, count) = self.moderation.mute(
                    &fingerprint,
                    username.as_deref(),
                    Some(&address),
                    reason,
                    Some(&actor_name),
                    now,
                );
                let minutes = mute_duration(count).minutes();
                info!(session_id, %target_id, %fingerprint, count, ?minutes, "user muted");
                self.persist(Write::InsertModeration(record.clone()));

                let message = match minutes {
                    Some(minutes) => format!("You have been muted for {minutes} minutes."),
                    None => "You have been permanently muted.".to_owned(),
                };
                self.sessions
                    .send(&target_id, &Outbound::Muted { message, duration: minutes, mute_count: count });
                self.notify(Notification::UserMuted {
                    subject: target_subject,
                    duration: minutes,
                    count,
                    expires_at: record.expires_at,
                    reason: record.reason.clone(),
                });
                (
                    format!("user muted (infraction #{count})"),
                    json!({ "fingerprint": fingerprint, "muteCount": count, "duration": minutes }),
                )
            }
            AdminAction::BanUser => {
                let expires_at = duration_minutes
                    .filter(|minutes| *minutes > 0)
                    .map(|minutes| now + Duration::minutes(minutes));
                let record = self.moderation.ban(
                    &fingerprint,
                    username.as_deref(),
                    Some(&address),
                    reason,
                    Some(&actor_name),
                    expires_at,
                    now,
                );
                info!(session_id, %target_id, %fingerprint, permanent = record.is_permanent(), "user banned");
                self.persist(Write::InsertModeration(record.clone()));

                let notice = Outbound::Banned {
                    message: "You have been banned from this platform.".to_owned(),
                    ban_info: Some((&record).into()),
                };
                // a backlogged client gets the notice with the close instead
                let farewell = (!self.sessions.send(&target_id, &notice)).then_some(notice);
                self.post_after(
                    self.timings.ban_close_delay,
                    HubEvent::Evict { session_id: target_id.clone(), farewell },
                );
                self.notify(Notification::UserBanned {
                    subject: target_subject,
                    permanent: record.is_permanent(),
                    reason: record.reason.clone(),
                });
                ("user banned".to_owned(), json!({ "fingerprint": fingerprint, "permanent": record.is_permanent() }))
            }
        };

        self.persist(Write::Audit(AuditEntry {
            details: Some(format!("{} {}", fingerprint, reason.unwrap_or("-"))),
            ..audit_actor
        }));
        self.sessions.send(session_id, &Outbound::admin(action.as_str(), true, reply, Some(data)));
        Ok(())
    }

    fn admin_command(
        &mut self,
        session_id: &str,
        command: AdminCommand,
        params: CommandParams,
        now: OffsetDateTime,
    ) -> Result<(), HubError> {
        let admin = self.session(session_id)?;
        let admin_name = admin.display_name().to_owned();
        let audit = |details: String| AuditEntry::by(admin, command.as_str(), details, now);
        let name = command.as_str();

        let (reply, writes, notification) = match command {
            AdminCommand::ListBanned => {
                let bans = self.moderation.active_bans(now);
                let message = format!("{} active ban(s)", bans.len());
                (Outbound::admin(name, true, message, serde_json::to_value(&bans).ok()), vec![], None)
            }
            AdminCommand::ListMuted => {
                let mutes = self.moderation.active_mutes(now);
                let message = format!("{} active mute(s)", mutes.len());
                (Outbound::admin(name, true, message, serde_json::to_value(&mutes).ok()), vec![], None)
            }
            AdminCommand::UnbanUser => {
                let fingerprint = non_empty(params.fingerprint)
                    .ok_or_else(|| HubError::Validation("fingerprint is required".to_owned()))?;
                let address = non_empty(params.ip);
                let entry = audit(format!("{fingerprint} {}", address.as_deref().unwrap_or("-")));
                let lifted = self.moderation.unban(&fingerprint, address.as_deref(), now);
                info!(session_id, %fingerprint, lifted, "bans lifted");
                (
                    Outbound::admin(name, true, format!("{lifted} ban(s) lifted"), None),
                    vec![
                        Write::ExpireBans { fingerprint: fingerprint.clone(), address: address.clone(), at: now },
                        Write::Audit(entry),
                    ],
                    Some(Notification::UserUnbanned { fingerprint, ip: address, lifted, actor: admin_name }),
                )
            }
            AdminCommand::UnmuteUser => {
                let fingerprint = non_empty(params.fingerprint)
                    .ok_or_else(|| HubError::Validation("fingerprint is required".to_owned()))?;
                let entry = audit(fingerprint.clone());
                let lifted = self.moderation.unmute(&fingerprint, now);
                info!(session_id, %fingerprint, lifted, "mutes lifted");
                (
                    Outbound::admin(name, true, format!("{lifted} mute(s) lifted"), None),
                    vec![Write::ExpireMutes { fingerprint: fingerprint.clone(), at: now }, Write::Audit(entry)],
                    Some(Notification::UserUnmuted { fingerprint, lifted, actor: admin_name }),
                )
            }
            AdminCommand::ClearExpiredMutes => {
                let entry = audit(String::new());
                let cleared = self.moderation.sweep_expired_mutes(now);
                info!(session_id, cleared, "expired mutes cleared");
                (
                    Outbound::admin(name, true, format!("{cleared} expired mute(s) cleared"), None),
                    vec![
                        Write::DeleteExpiredMutes { before: now },
                        Write::Audit(AuditEntry { details: Some(format!("{cleared} cleared")), ..entry }),
                    ],
                    None,
                )
            }
            AdminCommand::Unknown => (Outbound::admin(name, false, "unknown command", None), vec![], None),
        };

        for write in writes {
            self.persist(write);
        }
        if let Some(notification) = notification {
            self.notify(notification);
        }
        self.sessions.send(session_id, &reply);
        Ok(())
    }
}
