//! Bans and mutes keyed by fingerprint and address.
//!
//! The hub holds the authoritative copy in memory (loaded from the store at
//! startup) and mirrors every change to the store write-behind, so checks on
//! the connect and chat paths never wait on I/O.

mod policy;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

pub use policy::{mute_duration, MuteDuration, MUTE_ESCALATION};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModerationKind {
    Ban,
    Mute,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModerationRecord {
    pub kind: ModerationKind,
    pub fingerprint: String,
    #[serde(rename = "ip")]
    pub address: Option<String>,
    pub username: Option<String>,
    pub reason: Option<String>,
    pub actor: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// `None` is permanent.
    #[serde(with = "time::serde::rfc3339::option")]
    pub expires_at: Option<OffsetDateTime>,
    /// 1-based mute number for this fingerprint; 0 for bans.
    pub infraction: u32,
}

impl ModerationRecord {
    pub fn is_active(&self, now: OffsetDateTime) -> bool {
        self.expires_at.is_none_or(|expires_at| expires_at > now)
    }

    pub fn is_permanent(&self) -> bool {
        self.expires_at.is_none()
    }

    /// Time left before expiry, `None` when permanent.
    pub fn remaining(&self, now: OffsetDateTime) -> Option<Duration> {
        self.expires_at.map(|expires_at| (expires_at - now).max(Duration::ZERO))
    }

    fn matches_ban(&self, fingerprint: &str, address: Option<&str>) -> bool {
        self.fingerprint == fingerprint
            || address.is_some_and(|address| self.address.as_deref() == Some(address))
    }
}

#[derive(Debug, Default)]
pub struct ModerationStore {
    bans: Vec<ModerationRecord>,
    mutes: Vec<ModerationRecord>,
    /// Mutes ever issued per fingerprint. Survives the expired-mute sweep.
    infractions: HashMap<String, u32>,
}

impl ModerationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds the store from persisted records, oldest first.
    pub fn from_records(records: impl IntoIterator<Item = ModerationRecord>) -> Self {
        let mut store = Self::new();
        for record in records {
            match record.kind {
                ModerationKind::Ban => store.bans.push(record),
                ModerationKind::Mute => {
                    let count = store.infractions.entry(record.fingerprint.clone()).or_default();
                    *count = (*count + 1).max(record.infraction);
                    store.mutes.push(record);
                }
            }
        }
        store
    }

    /// Most recent active ban on either the fingerprint or the address.
    pub fn is_banned(&self, fingerprint: &str, address: &str, now: OffsetDateTime) -> Option<&ModerationRecord> {
        self.bans
            .iter()
            .rev()
            .find(|ban| ban.is_active(now) && ban.matches_ban(fingerprint, Some(address)))
    }

    /// Most recent active mute on the fingerprint.
    pub fn is_muted(&self, fingerprint: &str, now: OffsetDateTime) -> Option<&ModerationRecord> {
        self.mutes
            .iter()
            .rev()
            .find(|mute| mute.is_active(now) && mute.fingerprint == fingerprint)
    }

    pub fn infractions(&self, fingerprint: &str) -> u32 {
        self.infractions.get(fingerprint).copied().unwrap_or(0)
    }

    /// Issues the next mute for `fingerprint`, escalating its duration with
    /// the number of mutes it has ever received.
    pub fn mute(
        &mut self,
        fingerprint: &str,
        username: Option<&str>,
        address: Option<&str>,
        reason: Option<&str>,
        actor: Option<&str>,
        now: OffsetDateTime,
    ) -> (ModerationRecord, u32) {
        let count = self.infractions.entry(fingerprint.to_owned()).or_default();
        *count += 1;
        let infraction = *count;

        let record = ModerationRecord {
            kind: ModerationKind::Mute,
            fingerprint: fingerprint.to_owned(),
            address: address.map(str::to_owned),
            username: username.map(str::to_owned),
            reason: Some(
                reason
                    .map(str::to_owned)
                    .unwrap_or_else(|| format!("automatic mute (infraction #{infraction})")),
            ),
            actor: actor.map(str::to_owned),
            created_at: now,
            expires_at: mute_duration(infraction).as_duration().map(|duration| now + duration),
            infraction,
        };
        self.mutes.push(record.clone());
        (record, infraction)
    }

    pub fn ban(
        &mut self,
        fingerprint: &str,
        username: Option<&str>,
        address: Option<&str>,
        reason: Option<&str>,
        actor: Option<&str>,
        expires_at: Option<OffsetDateTime>,
        now: OffsetDateTime,
    ) -> ModerationRecord {
        let record = ModerationRecord {
            kind: ModerationKind::Ban,
            fingerprint: fingerprint.to_owned(),
            address: address.map(str::to_owned),
            username: username.map(str::to_owned),
            reason: Some(reason.unwrap_or("administrative ban").to_owned()),
            actor: actor.map(str::to_owned),
            created_at: now,
            expires_at,
            infraction: 0,
        };
        self.bans.push(record.clone());
        record
    }

    /// Soft-expires every active ban on the fingerprint or address. Returns
    /// how many records were lifted.
    pub fn unban(&mut self, fingerprint: &str, address: Option<&str>, now: OffsetDateTime) -> usize {
        let mut lifted = 0;
        for ban in &mut self.bans {
            if ban.is_active(now) && ban.matches_ban(fingerprint, address) {
                ban.expires_at = Some(now);
                lifted += 1;
            }
        }
        lifted
    }

    pub fn unmute(&mut self, fingerprint: &str, now: OffsetDateTime) -> usize {
        let mut lifted = 0;
        for mute in &mut self.mutes {
            if mute.is_active(now) && mute.fingerprint == fingerprint {
                mute.expires_at = Some(now);
                lifted += 1;
            }
        }
        lifted
    }

    /// Hard-deletes mutes whose expiry has passed.
    pub fn sweep_expired_mutes(&mut self, now: OffsetDateTime) -> usize {
        let before = self.mutes.len();
        self.mutes.retain(|mute| mute.is_active(now));
        before - self.mutes.len()
    }

    /// Active bans, most recent first.
    pub fn active_bans(&self, now: OffsetDateTime) -> Vec<ModerationRecord> {
        self.bans.iter().rev().filter(|ban| ban.is_active(now)).cloned().collect()
    }

    /// Active mutes, most recent first.
    pub fn active_mutes(&self, now: OffsetDateTime) -> Vec<ModerationRecord> {
        self.mutes.iter().rev().filter(|mute| mute.is_active(now)).cloned().collect()
    }
}
