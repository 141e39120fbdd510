//! Chat scopes: the global room plus one room per stream key.
//!
//! Each scope keeps the last [`HISTORY_LIMIT`] messages in publish order and
//! the set of sessions subscribed to it.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::{
    protocol::{ChatMessage, Outbound},
    session::{SessionId, SessionRegistry},
};

pub const HISTORY_LIMIT: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ScopeKey {
    Global,
    Stream(String),
}

impl ScopeKey {
    pub fn from_stream(stream_key: Option<&str>) -> Self {
        match stream_key {
            Some(key) => ScopeKey::Stream(key.to_owned()),
            None => ScopeKey::Global,
        }
    }

    pub fn stream_key(&self) -> Option<&str> {
        match self {
            ScopeKey::Global => None,
            ScopeKey::Stream(key) => Some(key),
        }
    }
}

#[derive(Debug, Default)]
struct Scope {
    history: VecDeque<ChatMessage>,
    viewers: HashSet<SessionId>,
}

#[derive(Debug)]
pub struct ScopeRouter {
    scopes: HashMap<ScopeKey, Scope>,
}

impl Default for ScopeRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl ScopeRouter {
    pub fn new() -> Self {
        let mut scopes = HashMap::new();
        scopes.insert(ScopeKey::Global, Scope::default());
        ScopeRouter { scopes }
    }

    pub fn ensure_scope(&mut self, key: &ScopeKey) {
        self.scopes.entry(key.clone()).or_default();
    }

    pub fn contains(&self, key: &ScopeKey) -> bool {
        self.scopes.contains_key(key)
    }

    /// Adds the session to the scope's viewer set, creating the scope if
    /// needed. Returns the new viewer count.
    pub fn subscribe(&mut self, key: &ScopeKey, session_id: &str) -> usize {
        let scope = self.scopes.entry(key.clone()).or_default();
        scope.viewers.insert(session_id.to_owned());
        scope.viewers.len()
    }

    /// Returns the new viewer count if the session was subscribed.
    pub fn unsubscribe(&mut self, key: &ScopeKey, session_id: &str) -> Option<usize> {
        let scope = self.scopes.get_mut(key)?;
        scope.viewers.remove(session_id).then(|| scope.viewers.len())
    }

    /// Drops the session from every scope. Returns each scope it left with the
    /// remaining viewer count.
    pub fn unsubscribe_all(&mut self, session_id: &str) -> Vec<(ScopeKey, usize)> {
        self.scopes
            .iter_mut()
            .filter_map(|(key, scope)| {
                scope
                    .viewers
                    .remove(session_id)
                    .then(|| (key.clone(), scope.viewers.len()))
            })
            .collect()
    }

    pub fn is_subscribed(&self, key: &ScopeKey, session_id: &str) -> bool {
        self.scopes
            .get(key)
            .is_some_and(|scope| scope.viewers.contains(session_id))
    }

    pub fn viewer_count(&self, key: &ScopeKey) -> usize {
        self.scopes.get(key).map_or(0, |scope| scope.viewers.len())
    }

    pub fn viewers(&self, key: &ScopeKey) -> Vec<SessionId> {
        self.scopes
            .get(key)
            .map(|scope| scope.viewers.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Appends to the scope's history, evicting the oldest entry past the
    /// limit, then fans out to every subscriber. Returns how many subscribers
    /// the message reached.
    pub fn publish(&mut self, key: &ScopeKey, message: ChatMessage, sessions: &SessionRegistry) -> usize {
        let scope = self.scopes.entry(key.clone()).or_default();
        scope.history.push_back(message.clone());
        while scope.history.len() > HISTORY_LIMIT {
            scope.history.pop_front();
        }
        sessions.send_to(&scope.viewers, &Outbound::ChatMessage { message })
    }

    /// Removes a message from the scope's history.
    pub fn delete_message(&mut self, key: &ScopeKey, message_id: &str) -> Option<ChatMessage> {
        let history = &mut self.scopes.get_mut(key)?.history;
        let index = history.iter().position(|message| message.id == message_id)?;
        history.remove(index)
    }

    /// Chronological history, oldest first.
    pub fn history(&self, key: &ScopeKey) -> Vec<ChatMessage> {
        self.scopes
            .get(key)
            .map(|scope| scope.history.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn message_count(&self, key: &ScopeKey) -> usize {
        self.scopes.get(key).map_or(0, |scope| scope.history.len())
    }

    /// Total messages held across stream scopes.
    pub fn stream_message_count(&self) -> usize {
        self.scopes
            .iter()
            .filter(|(key, _)| **key != ScopeKey::Global)
            .map(|(_, scope)| scope.history.len())
            .sum()
    }

    /// Drops a stream scope with its history. Returns the sessions that were
    /// still subscribed. The global scope cannot be removed.
    pub fn remove_scope(&mut self, key: &ScopeKey) -> Vec<SessionId> {
        if *key == ScopeKey::Global {
            return Vec::new();
        }
        self.scopes
            .remove(key)
            .map(|scope| scope.viewers.into_iter().collect())
            .unwrap_or_default()
    }
}
