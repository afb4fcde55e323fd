use std::fmt;

use tracing::info;

use crate::{
    common::types::{ChannelId, GuildId, UserId},
    queue::{MergePolicy, ShutdownReason},
};

/// Human-readable status notifications about a session.
#[derive(Debug, Clone, PartialEq)]
pub enum HistoryEntry {
    EffectApplied {
        effect: String,
        requester: Option<UserId>,
    },
    EffectRemoved {
        effect: String,
        requester: Option<UserId>,
    },
    LoadFailed {
        track: String,
        retrying: bool,
        removed: bool,
    },
    TrackStuck {
        track: String,
        threshold_ms: u64,
    },
    TrackException {
        track: String,
        message: String,
    },
    NodeMigrated {
        from: String,
        to: Option<String>,
    },
    Enqueued {
        admitted: usize,
        skipped_resolvers: usize,
        limit_reached: bool,
        requester: Option<UserId>,
    },
    Imported {
        imported: usize,
        invalid: usize,
        dropped: usize,
        policy: MergePolicy,
    },
    VoiceMoved {
        from: ChannelId,
        to: ChannelId,
    },
    Stopped {
        reason: ShutdownReason,
    },
    RestartRequested,
}

impl fmt::Display for HistoryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EffectApplied { effect, requester } => match requester {
                Some(user) => write!(f, "Effect {effect} applied by {user}"),
                None => write!(f, "Effect {effect} applied"),
            },
            Self::EffectRemoved { effect, requester } => match requester {
                Some(user) => write!(f, "Effect {effect} removed by {user}"),
                None => write!(f, "Effect {effect} removed"),
            },
            Self::LoadFailed {
                track,
                retrying,
                removed,
            } => {
                write!(f, "Failed to load {track}")?;
                if *retrying {
                    write!(f, ", retrying")
                } else if *removed {
                    write!(f, ", removed from the queue")
                } else {
                    Ok(())
                }
            }
            Self::TrackStuck {
                track,
                threshold_ms,
            } => write!(f, "{track} got stuck for {threshold_ms}ms"),
            Self::TrackException { track, message } => {
                write!(f, "Playback of {track} failed: {message}")
            }
            Self::NodeMigrated { from, to } => match to {
                Some(to) => write!(f, "Moved from node {from} to {to}"),
                None => write!(f, "No node available to move away from {from}"),
            },
            Self::Enqueued {
                admitted,
                skipped_resolvers,
                limit_reached,
                ..
            } => {
                write!(f, "Enqueued {admitted} track(s)")?;
                if *limit_reached {
                    write!(
                        f,
                        ", queue limit reached ({skipped_resolvers} request(s) skipped)"
                    )?;
                }
                Ok(())
            }
            Self::Imported {
                imported,
                invalid,
                dropped,
                policy,
            } => write!(
                f,
                "Imported {imported} track(s) ({policy:?}), {invalid} invalid, {dropped} over the limit"
            ),
            Self::VoiceMoved { from, to } => write!(f, "Moved from channel {from} to {to}"),
            Self::Stopped { reason } => write!(f, "Stopped: {reason}"),
            Self::RestartRequested => write!(f, "Connection lost, restarting"),
        }
    }
}

/// Fire-and-forget sink for [`HistoryEntry`] values.
pub trait HistorySink: Send + Sync {
    fn record(&self, guild_id: &GuildId, entry: HistoryEntry);
}

/// Writes history entries to the log under the `history` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingHistory;

impl HistorySink for TracingHistory {
    fn record(&self, guild_id: &GuildId, entry: HistoryEntry) {
        info!(target: "history", guild = %guild_id, "{}", entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(
            HistoryEntry::LoadFailed {
                track: "Song".into(),
                retrying: true,
                removed: false,
            }
            .to_string(),
            "Failed to load Song, retrying"
        );
        assert_eq!(
            HistoryEntry::Enqueued {
                admitted: 3,
                skipped_resolvers: 7,
                limit_reached: true,
                requester: None,
            }
            .to_string(),
            "Enqueued 3 track(s), queue limit reached (7 request(s) skipped)"
        );
        assert_eq!(
            HistoryEntry::Stopped {
                reason: ShutdownReason::Requested,
            }
            .to_string(),
            "Stopped: requested"
        );
    }
}
