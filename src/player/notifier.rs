use futures::Stream;
use parking_lot::Mutex;

use super::state::PlaybackState;

/// Highest fractional volume the node is asked for.
pub const MAX_VOLUME: f32 = 1.5;

/// Highest volume on the percent scale exposed to callers.
pub const MAX_VOLUME_PERCENT: u16 = 200;

/// Maps a 0-200 percentage onto the node's fractional scale. Out-of-range
/// input is clamped.
pub fn percent_to_volume(percent: i32) -> f32 {
    let percent = percent.clamp(0, MAX_VOLUME_PERCENT as i32);
    percent as f32 / MAX_VOLUME_PERCENT as f32 * MAX_VOLUME
}

pub fn volume_to_percent(volume: f32) -> u16 {
    let percent = (volume / MAX_VOLUME * MAX_VOLUME_PERCENT as f32).round();
    percent.clamp(0.0, MAX_VOLUME_PERCENT as f32) as u16
}

/// A publish/subscribe channel. Subscribers that dropped their
/// [`Subscription`] are pruned on the next publish.
pub struct EventHub<T> {
    subscribers: Mutex<Vec<flume::Sender<T>>>,
}

impl<T> Default for EventHub<T> {
    fn default() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }
}

impl<T: Clone> EventHub<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Subscription<T> {
        let (tx, rx) = flume::unbounded();
        self.subscribers.lock().push(tx);
        Subscription { rx }
    }

    pub fn publish(&self, value: T) {
        self.subscribers
            .lock()
            .retain(|tx| tx.send(value.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

/// Receiving end of an [`EventHub`]. Dropping it deregisters.
pub struct Subscription<T> {
    rx: flume::Receiver<T>,
}

impl<T> Subscription<T> {
    pub async fn recv(&self) -> Option<T> {
        self.rx.recv_async().await.ok()
    }

    pub fn try_recv(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Everything published since the last call.
    pub fn drain(&self) -> Vec<T> {
        self.rx.try_iter().collect()
    }
}

impl<T: Send + 'static> Subscription<T> {
    /// Ends once the publisher is dropped.
    pub fn into_stream(self) -> impl Stream<Item = T> + Send + 'static {
        self.rx.into_stream()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChange {
    pub previous: PlaybackState,
    pub current: PlaybackState,
}

/// Volumes on the 0-200 percent scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeChange {
    pub previous: u16,
    pub current: u16,
}

/// Republishes state and volume transitions of a session.
pub struct StateNotifier {
    state: EventHub<StateChange>,
    volume: EventHub<VolumeChange>,
    last_state: Mutex<PlaybackState>,
}

impl StateNotifier {
    pub fn new() -> Self {
        Self {
            state: EventHub::new(),
            volume: EventHub::new(),
            last_state: Mutex::new(PlaybackState::NotPlaying),
        }
    }

    pub fn subscribe_state(&self) -> Subscription<StateChange> {
        self.state.subscribe()
    }

    pub fn subscribe_volume(&self) -> Subscription<VolumeChange> {
        self.volume.subscribe()
    }

    /// Publishes a [`StateChange`] if `current` differs from the last state seen.
    /// `Destroyed` is terminal: nothing is published after it.
    pub(crate) fn observe_state(&self, current: PlaybackState) {
        let previous = {
            let mut last = self.last_state.lock();
            if *last == current || *last == PlaybackState::Destroyed {
                return;
            }
            std::mem::replace(&mut *last, current)
        };
        self.state.publish(StateChange { previous, current });
    }

    pub(crate) fn observe_volume(&self, previous: f32, current: f32) {
        let previous = volume_to_percent(previous);
        let current = volume_to_percent(current);
        if previous != current {
            self.volume.publish(VolumeChange { previous, current });
        }
    }
}

impl Default for StateNotifier {
    fn default() -> Self {
        Self::new()
    }
}
