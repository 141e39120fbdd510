//! Periodic maintenance.

use std::time::Duration;

use time::OffsetDateTime;
use tokio::{sync::mpsc, task::JoinHandle, time::MissedTickBehavior};
use tracing::{debug, info};

use crate::{
    notify::Notification,
    scopes::ScopeKey,
    store::Write,
};

use super::{Hub, HubEvent};

/// Posts `make()` to the hub every `period`, starting one period from now.
/// Stops once the hub is gone.
pub fn spawn_periodic(
    events: mpsc::WeakSender<HubEvent>,
    period: Duration,
    make: fn() -> HubEvent,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let Some(events) = events.upgrade() else {
                break;
            };
            if events.send(make()).await.is_err() {
                break;
            }
        }
        debug!("periodic timer stopped");
    })
}

impl Hub {
    /// Clears expired mutes, drops streams idle since their start, and
    /// forgets sessions whose socket is gone.
    pub(super) fn sweep(&mut self, now: OffsetDateTime) {
        let cleared = self.moderation.sweep_expired_mutes(now);
        self.persist(Write::DeleteExpiredMutes { before: now });

        let stale = self.streams.stale(now, self.timings.stream_idle, |key| {
            self.scopes.viewer_count(&ScopeKey::Stream(key.to_owned()))
        });
        for stream_key in &stale {
            self.streams.remove(stream_key);
            self.drop_stream_scope(stream_key);
        }

        let closed = self.sessions.closed();
        for session_id in &closed {
            self.disconnect(session_id, now);
        }

        info!(cleared, streams = stale.len(), sessions = closed.len(), "sweep finished");
    }

    pub(super) fn stats(&self) {
        let now = OffsetDateTime::now_utc();
        self.notify(Notification::ServerStats {
            active_users: self.sessions.len(),
            total_messages: self.scopes.message_count(&ScopeKey::Global),
            muted_users: self.moderation.active_mutes(now).len(),
            uptime_minutes: self.started_at.elapsed().as_secs() / 60,
        });
    }
}
