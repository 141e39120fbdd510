//! Stream lifecycle driven by the ingest side channel.

use std::time::Duration;

use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::{
    protocol::Outbound,
    scopes::ScopeKey,
    streams::{DetectAction, DetectReply, DetectRequest, StreamDetails, StreamEntry, StreamListing, StreamMetadata},
};

use super::{Hub, HubEvent};

const START_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

impl Hub {
    pub(super) fn detect(&mut self, request: DetectRequest, now: OffsetDateTime) -> DetectReply {
        let stream_key = request
            .stream_key
            .map(|key| key.trim().to_owned())
            .filter(|key| !key.is_empty())
            .unwrap_or_else(|| format!("stream_{}", now.unix_timestamp_nanos() / 1_000_000));
        let scope = ScopeKey::Stream(stream_key.clone());

        match request.action {
            DetectAction::Start => {
                self.cancel_grace_timer(&stream_key);
                self.scopes.ensure_scope(&scope);
                let viewers = self.scopes.viewer_count(&scope);
                let hls_url = request.metadata.hls_url.clone();
                let stream = self.streams.notify_start(&stream_key, request.metadata, viewers, now).clone();
                info!(%stream_key, "stream started");

                self.sessions
                    .broadcast(&Outbound::StreamDetected { stream, stream_key: stream_key.clone() });
                if let Some(url) = hls_url {
                    self.schedule_start_check(&stream_key, url);
                }
                DetectReply { success: true, message: format!("stream {stream_key} started"), stream_key }
            }
            DetectAction::Stop => {
                self.cancel_start_check(&stream_key);
                match self.streams.notify_stop(&stream_key).cloned() {
                    Some(stream) => {
                        info!(%stream_key, "stream ended");
                        self.sessions
                            .broadcast(&Outbound::StreamEnded { stream, stream_key: stream_key.clone() });
                        self.cancel_grace_timer(&stream_key);
                        let timer = self.post_after(
                            self.timings.stream_grace,
                            HubEvent::GraceElapsed { stream_key: stream_key.clone() },
                        );
                        self.grace_timers.insert(stream_key.clone(), timer);
                    }
                    None => debug!(%stream_key, "stop for unknown stream"),
                }
                DetectReply { success: true, message: format!("stream {stream_key} stopped"), stream_key }
            }
        }
    }

    pub(super) fn grace_elapsed(&mut self, stream_key: &str) {
        self.grace_timers.remove(stream_key);
        if self.streams.remove_if_ended(stream_key).is_some() {
            info!(stream_key, "ended stream removed");
            self.drop_stream_scope(stream_key);
        }
    }

    /// Tears down the scope of a stream whose entry is gone and sends its
    /// remaining viewers back to the global scope.
    pub(super) fn drop_stream_scope(&mut self, stream_key: &str) {
        self.cancel_start_check(stream_key);
        self.cancel_grace_timer(stream_key);
        let viewers = self.scopes.remove_scope(&ScopeKey::Stream(stream_key.to_owned()));
        for session_id in &viewers {
            if let Some(session) = self.sessions.get_mut(session_id) {
                if session.current_stream.as_deref() == Some(stream_key) {
                    session.current_stream = None;
                }
            }
            self.scopes.subscribe(&ScopeKey::Global, session_id);
        }
        self.sessions.broadcast(&Outbound::StreamRemoved { stream_key: stream_key.to_owned() });
    }

    fn schedule_start_check(&mut self, stream_key: &str, url: String) {
        self.start_checks.retain(|_, check| !check.is_finished());

        let http = self.http.clone();
        let delay = self.timings.start_check_delay;
        let key = stream_key.to_owned();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match http.get(&url).timeout(START_CHECK_TIMEOUT).send().await {
                Ok(response) if response.status().is_success() => info!(stream_key = %key, "stream output available"),
                Ok(response) => {
                    warn!(stream_key = %key, status = response.status().as_u16(), "stream output not available")
                }
                Err(error) => warn!(stream_key = %key, %error, "stream output check failed"),
            }
        });

        if let Some(previous) = self.start_checks.insert(stream_key.to_owned(), task.abort_handle()) {
            previous.abort();
        }
    }

    fn cancel_start_check(&mut self, stream_key: &str) {
        if let Some(check) = self.start_checks.remove(stream_key) {
            check.abort();
            debug!(stream_key, "start check cancelled");
        }
    }

    fn cancel_grace_timer(&mut self, stream_key: &str) {
        if let Some(timer) = self.grace_timers.remove(stream_key) {
            timer.abort();
            debug!(stream_key, "grace timer cancelled");
        }
    }

    /// Creates a live entry under a fresh `test-stream-<millis>` key, as if
    /// the ingest server had reported it.
    pub(super) fn create_test_stream(&mut self, now: OffsetDateTime) -> StreamEntry {
        let stream_key = format!("test-stream-{}", now.unix_timestamp_nanos() / 1_000_000);
        let scope = ScopeKey::Stream(stream_key.clone());
        self.scopes.ensure_scope(&scope);
        let metadata = StreamMetadata {
            title: Some(format!("Test stream - {stream_key}")),
            description: Some("Test stream created automatically".to_owned()),
            thumbnail: None,
            rtmp_url: Some(format!("rtmp://localhost:1935/live/{stream_key}")),
            hls_url: Some(format!("http://localhost:8000/live/{stream_key}.m3u8")),
        };
        let viewers = self.scopes.viewer_count(&scope);
        let stream = self.streams.notify_start(&stream_key, metadata, viewers, now).clone();
        info!(%stream_key, "test stream created");

        self.sessions
            .broadcast(&Outbound::StreamDetected { stream: stream.clone(), stream_key });
        stream
    }

    pub(super) fn list_streams(&self) -> Vec<StreamListing> {
        self.streams
            .list()
            .into_iter()
            .map(|stream| {
                let scope = ScopeKey::Stream(stream.key.clone());
                StreamListing {
                    chat_message_count: self.scopes.message_count(&scope),
                    viewer_count: self.scopes.viewer_count(&scope),
                    stream,
                }
            })
            .collect()
    }

    pub(super) fn stream_details(&self, stream_key: &str) -> Option<StreamDetails> {
        let stream = self.streams.get(stream_key)?.clone();
        Some(StreamDetails { chat_history: self.scopes.history(&ScopeKey::Stream(stream_key.to_owned())), stream })
    }
}
