use std::{fmt, sync::Arc, time::Duration};

use async_trait::async_trait;

use crate::{
    common::types::UserId,
    protocol::{PlayerUpdateTrack, Track, TrackEncoded},
};

/// Warms up whatever a track needs before it is played (stream URLs,
/// metadata lookups, ...).
#[async_trait]
pub trait Prefetch: Send + Sync {
    async fn prefetch(&self);
}

/// What a queue entry points at.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackReference {
    /// A track the node has already resolved.
    Track(Track),
    /// An identifier or URI the node resolves when it is played.
    Identifier(String),
}

/// One entry of the queue, or the session's current track.
#[derive(Clone)]
pub struct QueueItem {
    reference: TrackReference,
    requester: Option<UserId>,
    prefetch: Option<Arc<dyn Prefetch>>,
}

impl QueueItem {
    pub fn from_track(track: Track) -> Self {
        let requester = track
            .user_data
            .get("requester")
            .and_then(|v| v.as_u64())
            .map(UserId);
        Self {
            reference: TrackReference::Track(track),
            requester,
            prefetch: None,
        }
    }

    pub fn from_identifier(identifier: impl Into<String>) -> Self {
        Self {
            reference: TrackReference::Identifier(identifier.into()),
            requester: None,
            prefetch: None,
        }
    }

    pub fn with_requester(mut self, requester: Option<UserId>) -> Self {
        self.requester = requester;
        self
    }

    pub fn with_prefetch(mut self, prefetch: Arc<dyn Prefetch>) -> Self {
        self.prefetch = Some(prefetch);
        self
    }

    pub fn reference(&self) -> &TrackReference {
        &self.reference
    }

    pub fn track(&self) -> Option<&Track> {
        match &self.reference {
            TrackReference::Track(track) => Some(track),
            TrackReference::Identifier(_) => None,
        }
    }

    pub fn requester(&self) -> Option<UserId> {
        self.requester
    }

    pub fn prefetch(&self) -> Option<Arc<dyn Prefetch>> {
        self.prefetch.clone()
    }

    /// Identity used to match node reports against queue entries.
    pub fn identity(&self) -> &str {
        match &self.reference {
            TrackReference::Track(track) => &track.info.identifier,
            TrackReference::Identifier(identifier) => identifier,
        }
    }

    pub fn title(&self) -> &str {
        match &self.reference {
            TrackReference::Track(track) if !track.info.title.is_empty() => &track.info.title,
            _ => self.identity(),
        }
    }

    pub fn duration(&self) -> Option<Duration> {
        self.track().and_then(Track::duration)
    }

    /// Whether `track`, as reported by the node, is this entry.
    pub fn matches(&self, track: &Track) -> bool {
        match &self.reference {
            TrackReference::Track(own) => {
                own.info.identifier == track.info.identifier
                    || (!own.encoded.is_empty() && own.encoded == track.encoded)
            }
            TrackReference::Identifier(identifier) => {
                *identifier == track.info.identifier
                    || track.info.uri.as_deref() == Some(identifier.as_str())
            }
        }
    }

    pub fn same_entry(&self, other: &QueueItem) -> bool {
        self.identity() == other.identity()
    }

    /// Swaps a lazy reference for the node's resolved track, keeping the
    /// requester and prefetch hook.
    pub fn resolved(mut self, track: Track) -> Self {
        self.reference = TrackReference::Track(track);
        self
    }

    pub(crate) fn to_update_track(&self) -> PlayerUpdateTrack {
        let user_data = self
            .requester
            .map(|user| serde_json::json!({ "requester": user.0 }));
        match &self.reference {
            TrackReference::Track(track) => PlayerUpdateTrack {
                encoded: Some(TrackEncoded::Set(if track.encoded.is_empty() {
                    track.encode()
                } else {
                    track.encoded.clone()
                })),
                identifier: None,
                user_data,
            },
            TrackReference::Identifier(identifier) => PlayerUpdateTrack {
                encoded: None,
                identifier: Some(identifier.clone()),
                user_data,
            },
        }
    }
}

impl fmt::Debug for QueueItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueItem")
            .field("reference", &self.reference)
            .field("requester", &self.requester)
            .field("prefetch", &self.prefetch.is_some())
            .finish()
    }
}

impl From<Track> for QueueItem {
    fn from(track: Track) -> Self {
        Self::from_track(track)
    }
}
