//! Catalog of known streams.
//!
//! Entries come from the ingest pipeline (`start`/`stop` notifications) or
//! implicitly from the first viewer joining an unknown key.

pub mod http;

use std::{collections::HashMap, time::Duration};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::protocol::ChatMessage;

pub const PLACEHOLDER_THUMBNAIL: &str =
    "https://images.pexels.com/photos/1763075/pexels-photo-1763075.jpeg?auto=compress&cs=tinysrgb&w=800&h=450&dpr=1";

/// Default age (measured from start time) past which a viewerless stream is
/// swept.
pub const IDLE_THRESHOLD: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamEntry {
    pub key: String,
    pub title: String,
    pub description: String,
    pub thumbnail: String,
    #[serde(with = "time::serde::rfc3339")]
    pub start_time: OffsetDateTime,
    pub viewers: usize,
    pub is_live: bool,
    pub auto_detected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rtmp_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hls_url: Option<String>,
}

/// Optional metadata carried by an ingest start notification.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamMetadata {
    pub title: Option<String>,
    pub description: Option<String>,
    pub thumbnail: Option<String>,
    pub rtmp_url: Option<String>,
    pub hls_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectAction {
    Start,
    Stop,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectRequest {
    pub action: DetectAction,
    pub stream_key: Option<String>,
    #[serde(flatten)]
    pub metadata: StreamMetadata,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectReply {
    pub success: bool,
    pub message: String,
    pub stream_key: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamListing {
    #[serde(flatten)]
    pub stream: StreamEntry,
    pub chat_message_count: usize,
    pub viewer_count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamDetails {
    pub stream: StreamEntry,
    pub chat_history: Vec<ChatMessage>,
}

#[derive(Debug, Default)]
pub struct StreamCatalog {
    streams: HashMap<String, StreamEntry>,
}

impl StreamCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upserts a live, auto-detected entry. `viewers` is the stream scope's
    /// current subscriber count.
    pub fn notify_start(
        &mut self,
        key: &str,
        metadata: StreamMetadata,
        viewers: usize,
        now: OffsetDateTime,
    ) -> &StreamEntry {
        let entry = StreamEntry {
            key: key.to_owned(),
            title: metadata.title.unwrap_or_else(|| format!("Detected stream - {key}")),
            description: metadata
                .description
                .unwrap_or_else(|| "Stream detected automatically via RTMP".to_owned()),
            thumbnail: metadata.thumbnail.unwrap_or_else(|| PLACEHOLDER_THUMBNAIL.to_owned()),
            start_time: now,
            viewers,
            is_live: true,
            auto_detected: true,
            rtmp_url: metadata.rtmp_url,
            hls_url: metadata.hls_url,
        };
        self.streams.insert(key.to_owned(), entry);
        &self.streams[key]
    }

    /// Marks the entry not live. The entry stays queryable until removed.
    pub fn notify_stop(&mut self, key: &str) -> Option<&StreamEntry> {
        let entry = self.streams.get_mut(key)?;
        entry.is_live = false;
        Some(entry)
    }

    /// Returns the entry for `key`, creating a default live entry if absent.
    /// The flag is true when the entry was created.
    pub fn join_implicit(&mut self, key: &str, now: OffsetDateTime) -> (&StreamEntry, bool) {
        let created = !self.streams.contains_key(key);
        let entry = self.streams.entry(key.to_owned()).or_insert_with(|| StreamEntry {
            key: key.to_owned(),
            title: format!("Stream {key}"),
            description: "Stream created automatically".to_owned(),
            thumbnail: PLACEHOLDER_THUMBNAIL.to_owned(),
            start_time: now,
            viewers: 0,
            is_live: true,
            auto_detected: false,
            rtmp_url: None,
            hls_url: None,
        });
        (entry, created)
    }

    pub fn update_viewer_count(&mut self, key: &str, count: usize) -> Option<&StreamEntry> {
        let entry = self.streams.get_mut(key)?;
        entry.viewers = count;
        Some(entry)
    }

    pub fn get(&self, key: &str) -> Option<&StreamEntry> {
        self.streams.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<StreamEntry> {
        self.streams.remove(key)
    }

    /// Removes the entry only if it is still ended, so a stream restarted
    /// during its grace delay survives.
    pub fn remove_if_ended(&mut self, key: &str) -> Option<StreamEntry> {
        match self.streams.get(key) {
            Some(entry) if !entry.is_live => self.streams.remove(key),
            _ => None,
        }
    }

    /// Keys of entries with no viewers whose start time is more than `idle`
    /// ago.
    pub fn stale(
        &self,
        now: OffsetDateTime,
        idle: Duration,
        viewers: impl Fn(&str) -> usize,
    ) -> Vec<String> {
        let mut keys: Vec<_> = self
            .streams
            .values()
            .filter(|entry| viewers(&entry.key) == 0 && now - entry.start_time > idle)
            .map(|entry| entry.key.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Entries ordered by start time, oldest first.
    pub fn list(&self) -> Vec<StreamEntry> {
        let mut entries: Vec<_> = self.streams.values().cloned().collect();
        entries.sort_by(|a, b| a.start_time.cmp(&b.start_time).then_with(|| a.key.cmp(&b.key)));
        entries
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}
