use async_trait::async_trait;

use crate::{
    common::types::{AnyResult, ChannelId, GuildId},
    queue::{PlayerSnapshot, PlaylistExport},
};

/// Direct access to the chat platform's voice connection, used when the node
/// cannot tear the player down itself.
#[async_trait]
pub trait VoiceTransport: Send + Sync {
    async fn disconnect(&self, guild_id: &GuildId) -> AnyResult<()>;
}

/// The system hosting players; asked to bring a session back after the node
/// or the voice transport tore it down on its own.
pub trait SessionHost: Send + Sync {
    fn request_restart(&self, guild_id: &GuildId, channel_id: Option<ChannelId>);
}

/// Persistence for shutdown snapshots.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Stores a copy of the playlist and returns a reference to it.
    async fn store_playlist(&self, guild_id: &GuildId, playlist: &PlaylistExport)
    -> AnyResult<String>;

    async fn save_snapshot(&self, snapshot: &PlayerSnapshot) -> AnyResult<()>;
}
