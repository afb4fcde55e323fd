pub mod engine;
pub mod playlist;
pub mod snapshot;
pub mod window;

pub use engine::{Admission, Collaborators, QueuePlayer};
pub use playlist::{Playlist, QueueChange};
pub use snapshot::*;
pub use window::{QueueWindow, WindowEntry};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{common::types::AnyResult, player::QueueItem};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LoopingState {
    #[default]
    Off,
    /// Repeat the current track.
    One,
    /// Wrap around at the end of the queue.
    All,
}

/// Produces the entries for one enqueue request, such as a search or a
/// playlist URL. Resolvers run one at a time, in order.
#[async_trait]
pub trait TrackResolver: Send + Sync {
    async fn resolve(&self) -> AnyResult<Vec<QueueItem>>;
}
