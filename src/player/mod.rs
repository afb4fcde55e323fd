pub mod constants;
pub mod filters;
pub mod item;
pub mod notifier;
pub mod session;
pub mod state;

pub use filters::FilterSet;
pub use item::{Prefetch, QueueItem, TrackReference};
pub use notifier::{
    EventHub, StateChange, StateNotifier, Subscription, VolumeChange, percent_to_volume,
    volume_to_percent,
};
pub use session::{
    PlayOptions, PlayTarget, PlayerSession, SeekOrigin, SessionEvent, TrackEndTicket, TrackLookup,
};
pub use state::*;

use tokio_util::sync::CancellationToken;

use crate::common::{PlayerError, PlayerResult};

/// Fails with [`PlayerError::Cancelled`] once `cancel` has fired.
pub(crate) fn ensure_not_cancelled(cancel: &CancellationToken) -> PlayerResult<()> {
    if cancel.is_cancelled() {
        Err(PlayerError::Cancelled)
    } else {
        Ok(())
    }
}
