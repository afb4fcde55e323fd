use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};

use super::LoopingState;
use crate::{
    common::types::{ChannelId, GuildId},
    effects::EffectSnapshot,
    player::{PlaybackState, QueueItem, TrackReference},
    protocol::Track,
};

/// One flattened queue entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum ExportedTrack {
    /// A resolved track in the node's encoded form.
    Encoded(String),
    /// A reference the node resolves when played.
    Identifier(String),
}

impl ExportedTrack {
    pub fn from_item(item: &QueueItem) -> Self {
        match item.reference() {
            TrackReference::Track(track) if !track.encoded.is_empty() => {
                Self::Encoded(track.encoded.clone())
            }
            TrackReference::Track(track) => Self::Encoded(track.encode()),
            TrackReference::Identifier(identifier) => Self::Identifier(identifier.clone()),
        }
    }

    /// `None` if the encoded form does not decode.
    pub fn to_item(&self) -> Option<QueueItem> {
        match self {
            Self::Encoded(encoded) => Track::decode(encoded).map(QueueItem::from_track),
            Self::Identifier(identifier) => Some(QueueItem::from_identifier(identifier.clone())),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistExport {
    pub tracks: Vec<ExportedTrack>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_index: Option<usize>,
    /// Live position within the current track, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset_ms: Option<u64>,
}

impl PlaylistExport {
    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}

/// What [`super::QueuePlayer::export_playlist`] includes besides the tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportOptions {
    pub include_index: bool,
    pub include_offset: bool,
}

impl ExportOptions {
    pub const TRACKS_ONLY: Self = Self {
        include_index: false,
        include_offset: false,
    };

    pub const ALL_DATA: Self = Self {
        include_index: true,
        include_offset: true,
    };
}

/// How an imported playlist is merged into the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MergePolicy {
    /// Stop playback, clear the queue, then load.
    Replace,
    /// Append without touching playback.
    JustAdd,
    /// Append, then jump to the exported index and offset.
    #[default]
    JumpTo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportSummary {
    pub imported: usize,
    /// Entries that did not decode.
    pub invalid: usize,
    /// Entries that did not fit under the queue limit.
    pub dropped: usize,
    /// Where playback resumed, if the import started playback.
    pub resumed_at: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ShutdownReason {
    Requested,
    Idle,
    Restart,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Self::Requested => "requested",
            Self::Idle => "idle",
            Self::Restart => "restart",
        };
        f.write_str(reason)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ShutdownParams {
    /// Hand the snapshot to the store.
    pub save_snapshot: bool,
    /// Store a copy of the playlist and reference it from the snapshot.
    pub store_playlist: bool,
}

/// Resumable state of a player, captured right before it was torn down.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerSnapshot {
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    pub position_ms: u64,
    pub state: PlaybackState,
    pub effects: Vec<EffectSnapshot>,
    /// 0-200 percent.
    pub volume: u16,
    pub looping: LoopingState,
    pub playlist: PlaylistExport,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stored_playlist: Option<String>,
    pub reason: ShutdownReason,
    /// Unix timestamp in milliseconds.
    pub created_at: u64,
}
