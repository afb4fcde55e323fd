use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::{common::types::ChannelId, protocol::VoiceState};

/// Playback state of a session.
///
/// Never stored on its own: it is always derived from the destroyed flag,
/// the paused flag and whether a track is current.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PlaybackState {
    NotPlaying,
    Playing,
    Paused,
    Destroyed,
}

impl PlaybackState {
    pub fn derive(destroyed: bool, paused: bool, has_track: bool) -> Self {
        if destroyed {
            Self::Destroyed
        } else if !has_track {
            Self::NotPlaying
        } else if paused {
            Self::Paused
        } else {
            Self::Playing
        }
    }

    /// Playing or paused.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Playing | Self::Paused)
    }
}

/// Voice credentials, assembled from the two halves the chat gateway sends
/// independently.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VoiceCredentials {
    pub token: Option<String>,
    pub endpoint: Option<String>,
    pub channel_id: Option<ChannelId>,
    pub session_id: Option<String>,
}

impl VoiceCredentials {
    /// The wire payload, once both halves are present and non-empty.
    pub fn complete(&self) -> Option<VoiceState> {
        let non_empty = |s: &Option<String>| s.as_ref().filter(|v| !v.is_empty()).cloned();
        Some(VoiceState {
            token: non_empty(&self.token)?,
            endpoint: non_empty(&self.endpoint)?,
            session_id: non_empty(&self.session_id)?,
            channel_id: Some(self.channel_id?.to_string()),
        })
    }
}

/// Transition of the voice channel the session is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceChange {
    Connected(ChannelId),
    Moved { from: ChannelId, to: ChannelId },
    Disconnected { from: ChannelId },
}

/// Last position report from the node, extrapolated locally.
#[derive(Debug, Clone, Copy)]
pub struct PositionSync {
    synced_at: Instant,
    raw_offset: Duration,
}

impl PositionSync {
    pub fn new(offset: Duration) -> Self {
        Self {
            synced_at: Instant::now(),
            raw_offset: offset,
        }
    }

    pub fn raw_offset(&self) -> Duration {
        self.raw_offset
    }

    /// `raw_offset + (now - synced_at)` while running, frozen otherwise.
    pub fn extrapolate(&self, running: bool) -> Duration {
        if running {
            self.raw_offset + self.synced_at.elapsed()
        } else {
            self.raw_offset
        }
    }
}

impl Default for PositionSync {
    fn default() -> Self {
        Self::new(Duration::ZERO)
    }
}
