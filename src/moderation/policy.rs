use time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuteDuration {
    Minutes(i64),
    Permanent,
}

impl MuteDuration {
    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            MuteDuration::Minutes(minutes) => Some(Duration::minutes(*minutes)),
            MuteDuration::Permanent => None,
        }
    }

    pub fn minutes(&self) -> Option<i64> {
        match self {
            MuteDuration::Minutes(minutes) => Some(*minutes),
            MuteDuration::Permanent => None,
        }
    }
}

/// Mute lengths by infraction, in order. Infractions past the end reuse the
/// last entry.
pub const MUTE_ESCALATION: [MuteDuration; 5] = [
    MuteDuration::Minutes(5),
    MuteDuration::Minutes(15),
    MuteDuration::Minutes(30),
    MuteDuration::Minutes(60),
    MuteDuration::Permanent,
];

/// Mute length for the `infraction`-th mute (1-based) of a fingerprint.
pub fn mute_duration(infraction: u32) -> MuteDuration {
    let index = (infraction.saturating_sub(1) as usize).min(MUTE_ESCALATION.len() - 1);
    MUTE_ESCALATION[index]
}
