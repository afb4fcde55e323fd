use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{
    constants::{FATAL_CLOSE_CODES, NODE_VOLUME_UNITY},
    ensure_not_cancelled,
    filters::FilterSet,
    item::QueueItem,
    notifier::{EventHub, MAX_VOLUME, StateNotifier, Subscription, percent_to_volume, volume_to_percent},
    state::{PlaybackState, PositionSync, VoiceChange, VoiceCredentials},
};
use crate::{
    common::{
        PlayerError, PlayerResult,
        types::{ChannelId, GuildId, SessionId},
    },
    configs::PlayerConfig,
    host::VoiceTransport,
    node::AudioNode,
    protocol::{
        EndTime, NodeEvent, PlayerState, PlayerUpdate, PlayerUpdateTrack, Track, TrackEndReason,
        TrackException, VoiceServerUpdate, VoiceStateUpdate,
    },
};

/// What to play.
#[derive(Debug, Clone)]
pub enum PlayTarget {
    Item(QueueItem),
    Track(Track),
    Identifier(String),
    Uri(String),
}

impl PlayTarget {
    pub(crate) fn into_item(self) -> QueueItem {
        match self {
            Self::Item(item) => item,
            Self::Track(track) => QueueItem::from_track(track),
            Self::Identifier(identifier) | Self::Uri(identifier) => {
                QueueItem::from_identifier(identifier)
            }
        }
    }
}

impl From<QueueItem> for PlayTarget {
    fn from(item: QueueItem) -> Self {
        Self::Item(item)
    }
}

impl From<Track> for PlayTarget {
    fn from(track: Track) -> Self {
        Self::Track(track)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PlayOptions {
    pub start_position: Option<Duration>,
    pub end_time: Option<Duration>,
    /// Leave the node's current track alone if one is playing.
    pub no_replace: bool,
}

impl PlayOptions {
    pub fn at(start_position: Duration) -> Self {
        Self {
            start_position: Some(start_position),
            ..Self::default()
        }
    }
}

/// Reference point for [`PlayerSession::seek`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekOrigin {
    Begin,
    Forward,
    Backward,
    /// Offset counted back from the end of the track.
    End,
}

/// Looks up a queue entry for a track the node reports as started.
pub trait TrackLookup: Send + Sync {
    fn lookup(&self, track: &Track) -> Option<QueueItem>;
}

/// Reconciled session notifications, published after the raw node event has
/// been applied to the session.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    TrackStarted {
        item: QueueItem,
    },
    TrackEnded {
        track: Track,
        reason: TrackEndReason,
        /// The end belongs to a track a newer play or stop already replaced.
        superseded: bool,
    },
    TrackException {
        track: Track,
        exception: TrackException,
    },
    TrackStuck {
        track: Track,
        threshold: Duration,
    },
    Voice(VoiceChange),
    TransportClosed {
        code: u16,
        reason: String,
        by_remote: bool,
    },
    Destroyed,
}

/// A track end that arrived but whose state transition has not been applied
/// yet. Upper layers react to the end between
/// [`PlayerSession::begin_track_end`] and [`PlayerSession::finish_track_end`].
#[derive(Debug, Clone)]
pub struct TrackEndTicket {
    version: u64,
    reason: TrackEndReason,
    track: Track,
    item: Option<QueueItem>,
    stale: bool,
}

impl TrackEndTicket {
    pub fn reason(&self) -> TrackEndReason {
        self.reason
    }

    pub fn track(&self) -> &Track {
        &self.track
    }

    /// The queue entry that ended, if the session still knew it.
    pub fn item(&self) -> Option<&QueueItem> {
        self.item.as_ref()
    }

    /// Pre-empted by a play/stop, or about a track that is no longer current.
    pub fn is_superseded(&self) -> bool {
        self.reason.is_preempted() || self.stale
    }
}

struct SessionInner {
    channel_id: ChannelId,
    current: Option<QueueItem>,
    pending_next: Option<QueueItem>,
    paused: bool,
    position: PositionSync,
    volume: f32,
    voice: VoiceCredentials,
    node_connected: bool,
    ping: i64,
}

/// One remote playback session bound to a guild's voice channel.
pub struct PlayerSession {
    id: SessionId,
    guild_id: GuildId,
    node: RwLock<Arc<dyn AudioNode>>,
    voice_transport: Arc<dyn VoiceTransport>,
    inner: Mutex<SessionInner>,
    filters: FilterSet,
    notifier: StateNotifier,
    events: EventHub<SessionEvent>,
    version: AtomicU64,
    destroyed: AtomicBool,
    lookup: RwLock<Option<Arc<dyn TrackLookup>>>,
}

fn millis(duration: Duration) -> u64 {
    duration.as_millis() as u64
}

fn node_volume(volume: f32) -> i32 {
    (volume * NODE_VOLUME_UNITY).round() as i32
}

impl PlayerSession {
    pub fn new(
        guild_id: GuildId,
        channel_id: ChannelId,
        node: Arc<dyn AudioNode>,
        voice_transport: Arc<dyn VoiceTransport>,
        config: &PlayerConfig,
    ) -> Arc<Self> {
        let id = SessionId::generate();
        debug!(
            "[{}] new session {} on node {} (channel {})",
            guild_id,
            id,
            node.name(),
            channel_id
        );
        Arc::new(Self {
            id,
            guild_id,
            node: RwLock::new(node),
            voice_transport,
            inner: Mutex::new(SessionInner {
                channel_id,
                current: None,
                pending_next: None,
                paused: false,
                position: PositionSync::default(),
                volume: percent_to_volume(config.default_volume as i32),
                voice: VoiceCredentials::default(),
                node_connected: false,
                ping: -1,
            }),
            filters: FilterSet::new(),
            notifier: StateNotifier::new(),
            events: EventHub::new(),
            version: AtomicU64::new(0),
            destroyed: AtomicBool::new(false),
            lookup: RwLock::new(None),
        })
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn guild_id(&self) -> &GuildId {
        &self.guild_id
    }

    /// The channel the session was created for, or last moved to.
    pub fn channel_id(&self) -> ChannelId {
        self.inner.lock().channel_id
    }

    pub fn node_name(&self) -> String {
        self.node.read().name().to_string()
    }

    pub fn state(&self) -> PlaybackState {
        let destroyed = self.destroyed.load(Ordering::Acquire);
        let inner = self.inner.lock();
        PlaybackState::derive(destroyed, inner.paused, inner.current.is_some())
    }

    pub fn current_item(&self) -> Option<QueueItem> {
        self.inner.lock().current.clone()
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// Voice credentials are complete and the node reports its player as connected.
    pub fn is_connected(&self) -> bool {
        let inner = self.inner.lock();
        inner.node_connected && inner.voice.complete().is_some()
    }

    pub fn ping(&self) -> i64 {
        self.inner.lock().ping
    }

    /// Live position, extrapolated from the last sync.
    pub fn position(&self) -> Duration {
        let destroyed = self.is_destroyed();
        let inner = self.inner.lock();
        let Some(current) = &inner.current else {
            return Duration::ZERO;
        };
        let position = inner.position.extrapolate(!inner.paused && !destroyed);
        current
            .duration()
            .map_or(position, |duration| position.min(duration))
    }

    /// Volume on the node's fractional scale.
    pub fn volume(&self) -> f32 {
        self.inner.lock().volume
    }

    pub fn volume_percent(&self) -> u16 {
        volume_to_percent(self.volume())
    }

    pub fn filters(&self) -> &FilterSet {
        &self.filters
    }

    pub fn notifier(&self) -> &StateNotifier {
        &self.notifier
    }

    pub fn subscribe(&self) -> Subscription<SessionEvent> {
        self.events.subscribe()
    }

    pub fn set_track_lookup(&self, lookup: Arc<dyn TrackLookup>) {
        *self.lookup.write() = Some(lookup);
    }

    pub fn ensure_alive(&self) -> PlayerResult<()> {
        if self.is_destroyed() {
            Err(PlayerError::Destroyed)
        } else {
            Ok(())
        }
    }

    fn publish_state(&self) {
        self.notifier.observe_state(self.state());
    }

    /// Sends one update to the node. Cancellation and liveness are checked
    /// right before the request goes out.
    async fn send(&self, update: PlayerUpdate, cancel: &CancellationToken) -> PlayerResult<()> {
        ensure_not_cancelled(cancel)?;
        self.ensure_alive()?;
        let node = self.node.read().clone();
        debug!("[{}] -> {}: {:?}", self.guild_id, node.name(), update);
        node.update_player(&self.guild_id, update)
            .await
            .map_err(PlayerError::Connectivity)
    }

    /// Starts playing `target`, replacing whatever is playing.
    pub async fn play(
        &self,
        target: impl Into<PlayTarget>,
        options: PlayOptions,
        cancel: &CancellationToken,
    ) -> PlayerResult<()> {
        ensure_not_cancelled(cancel)?;
        self.ensure_alive()?;

        let item = PlayTarget::into_item(target.into());
        let update = PlayerUpdate {
            track: Some(item.to_update_track()),
            position: options.start_position.map(millis),
            end_time: options.end_time.map(|end| EndTime::Set(millis(end))),
            paused: Some(false),
            no_replace: options.no_replace,
            ..PlayerUpdate::default()
        };

        ensure_not_cancelled(cancel)?;
        self.ensure_alive()?;
        let version = {
            let mut inner = self.inner.lock();
            inner.pending_next = Some(item.clone());
            self.version.fetch_add(1, Ordering::AcqRel) + 1
        };

        let node = self.node.read().clone();
        debug!(
            "[{}] play {} (version {}) on {}",
            self.guild_id,
            item.identity(),
            version,
            node.name()
        );
        if let Err(e) = node.update_player(&self.guild_id, update).await {
            let mut inner = self.inner.lock();
            if self.version.load(Ordering::Acquire) == version {
                inner.pending_next = None;
            }
            return Err(PlayerError::Connectivity(e));
        }

        {
            let mut inner = self.inner.lock();
            let superseded = self.version.load(Ordering::Acquire) != version;
            let kept_by_node = options.no_replace && inner.current.is_some();
            if !superseded && !kept_by_node && !self.is_destroyed() {
                let already_started = inner
                    .current
                    .as_ref()
                    .is_some_and(|current| current.same_entry(&item));
                if !already_started {
                    inner.current = Some(item);
                    inner.position = PositionSync::new(options.start_position.unwrap_or_default());
                }
                inner.paused = false;
            }
        }
        self.publish_state();
        Ok(())
    }

    pub async fn pause(&self, cancel: &CancellationToken) -> PlayerResult<()> {
        self.set_paused(true, cancel).await
    }

    pub async fn resume(&self, cancel: &CancellationToken) -> PlayerResult<()> {
        self.set_paused(false, cancel).await
    }

    async fn set_paused(&self, paused: bool, cancel: &CancellationToken) -> PlayerResult<()> {
        self.send(
            PlayerUpdate {
                paused: Some(paused),
                ..PlayerUpdate::default()
            },
            cancel,
        )
        .await?;

        {
            let mut inner = self.inner.lock();
            if inner.paused != paused {
                let running = !inner.paused && inner.current.is_some();
                let position = inner.position.extrapolate(running);
                inner.position = PositionSync::new(position);
                inner.paused = paused;
            }
        }
        self.publish_state();
        Ok(())
    }

    /// Stops the current track. The node answers with a `Stopped` end, which
    /// is ignored since this call already cleared the state.
    pub async fn stop(&self, cancel: &CancellationToken) -> PlayerResult<()> {
        ensure_not_cancelled(cancel)?;
        self.ensure_alive()?;
        let (pending, version) = {
            let mut inner = self.inner.lock();
            let pending = inner.pending_next.take();
            (pending, self.version.fetch_add(1, Ordering::AcqRel) + 1)
        };

        let sent = self
            .send(
                PlayerUpdate {
                    track: Some(PlayerUpdateTrack::stop()),
                    ..PlayerUpdate::default()
                },
                cancel,
            )
            .await;
        if let Err(e) = sent {
            let mut inner = self.inner.lock();
            if self.version.load(Ordering::Acquire) == version && inner.pending_next.is_none() {
                inner.pending_next = pending;
            }
            return Err(e);
        }

        {
            let mut inner = self.inner.lock();
            inner.current = None;
            inner.paused = false;
            inner.position = PositionSync::default();
        }
        self.publish_state();
        Ok(())
    }

    /// Seeks within the current track. Returns the position sent to the node.
    pub async fn seek(
        &self,
        offset: Duration,
        origin: SeekOrigin,
        cancel: &CancellationToken,
    ) -> PlayerResult<Duration> {
        let current = self.position();
        let duration = self.current_item().and_then(|item| item.duration());

        let target = match origin {
            SeekOrigin::Begin => offset,
            SeekOrigin::Forward => current + offset,
            SeekOrigin::Backward => current.saturating_sub(offset),
            SeekOrigin::End => duration.map_or(offset, |d| d.saturating_sub(offset)),
        };
        let target = duration.map_or(target, |d| target.min(d));

        self.send(
            PlayerUpdate {
                position: Some(millis(target)),
                ..PlayerUpdate::default()
            },
            cancel,
        )
        .await?;

        self.inner.lock().position = PositionSync::new(target);
        Ok(target)
    }

    /// Sets the volume on the node's fractional scale, clamped to `[0, 1.5]`.
    pub async fn set_volume(&self, volume: f32, cancel: &CancellationToken) -> PlayerResult<()> {
        let volume = if volume.is_nan() {
            0.0
        } else {
            volume.clamp(0.0, MAX_VOLUME)
        };

        self.send(
            PlayerUpdate {
                volume: Some(node_volume(volume)),
                ..PlayerUpdate::default()
            },
            cancel,
        )
        .await?;

        let previous = std::mem::replace(&mut self.inner.lock().volume, volume);
        self.notifier.observe_volume(previous, volume);
        Ok(())
    }

    /// Pushes the filter set to the node if it changed since the last commit.
    pub async fn commit_filters(&self, cancel: &CancellationToken) -> PlayerResult<bool> {
        ensure_not_cancelled(cancel)?;
        self.ensure_alive()?;
        if !self.filters.take_dirty() {
            return Ok(false);
        }

        let update = PlayerUpdate {
            filters: Some(self.filters.snapshot()),
            ..PlayerUpdate::default()
        };
        if let Err(e) = self.send(update, cancel).await {
            self.filters.mark_dirty();
            return Err(e);
        }
        Ok(true)
    }

    /// Tears the session down. Only the first caller does the work and gets `true`.
    ///
    /// If the node cannot release the player, the voice connection is closed
    /// directly instead.
    pub async fn destroy(&self) -> bool {
        if self
            .destroyed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        {
            let mut inner = self.inner.lock();
            inner.current = None;
            inner.pending_next = None;
            inner.paused = false;
            self.version.fetch_add(1, Ordering::AcqRel);
        }
        self.publish_state();
        self.events.publish(SessionEvent::Destroyed);

        let node = self.node.read().clone();
        if let Err(e) = node.destroy_player(&self.guild_id).await {
            warn!(
                "[{}] node {} could not destroy the player: {}; closing voice directly",
                self.guild_id,
                node.name(),
                e
            );
            if let Err(e) = self.voice_transport.disconnect(&self.guild_id).await {
                error!("[{}] voice disconnect failed: {}", self.guild_id, e);
            }
        }

        info!("[{}] session {} destroyed", self.guild_id, self.id);
        true
    }

    /// Moves the session to `node`, replaying voice, volume, filters and the
    /// current track at its live position.
    pub async fn migrate(
        &self,
        node: Arc<dyn AudioNode>,
        cancel: &CancellationToken,
    ) -> PlayerResult<()> {
        ensure_not_cancelled(cancel)?;
        self.ensure_alive()?;

        let previous = std::mem::replace(&mut *self.node.write(), node.clone());
        if let Err(e) = previous.destroy_player(&self.guild_id).await {
            warn!(
                "[{}] could not release player on {} while migrating: {}",
                self.guild_id,
                previous.name(),
                e
            );
        }

        let filters = self.filters.snapshot();
        let update = {
            let mut inner = self.inner.lock();
            let running = !inner.paused && inner.current.is_some();
            let position = inner.position.extrapolate(running);
            inner.position = PositionSync::new(position);
            inner.pending_next = inner.current.clone();
            self.version.fetch_add(1, Ordering::AcqRel);
            PlayerUpdate {
                track: inner.current.as_ref().map(QueueItem::to_update_track),
                position: inner.current.as_ref().map(|_| millis(position)),
                volume: Some(node_volume(inner.volume)),
                paused: Some(inner.paused),
                filters: Some(filters),
                voice: inner.voice.complete(),
                ..PlayerUpdate::default()
            }
        };
        self.filters.take_dirty();
        self.send(update, cancel).await?;

        info!(
            "[{}] migrated from node {} to {}",
            self.guild_id,
            previous.name(),
            node.name()
        );
        Ok(())
    }

    pub fn on_player_update(&self, state: &PlayerState) {
        let mut inner = self.inner.lock();
        inner.position = PositionSync::new(Duration::from_millis(state.position));
        inner.node_connected = state.connected;
        inner.ping = state.ping;
    }

    /// Applies a track start. The reported track is matched against the
    /// pending play first, then the lookup hook, and only then turned into a
    /// fresh entry.
    pub fn on_track_started(&self, track: Track) -> QueueItem {
        let pending = {
            let mut inner = self.inner.lock();
            match inner.pending_next.take() {
                Some(pending) if pending.matches(&track) => Some(pending),
                other => {
                    inner.pending_next = other;
                    None
                }
            }
        };

        let item = match pending {
            Some(pending) => pending.resolved(track),
            None => {
                let lookup = self.lookup.read().clone();
                match lookup.and_then(|hook| hook.lookup(&track)) {
                    Some(found) => found.resolved(track),
                    None => QueueItem::from_track(track),
                }
            }
        };

        {
            let mut inner = self.inner.lock();
            inner.current = Some(item.clone());
            inner.position = PositionSync::default();
        }
        debug!("[{}] track started: {}", self.guild_id, item.identity());
        self.publish_state();
        self.events.publish(SessionEvent::TrackStarted { item: item.clone() });
        item
    }

    /// First half of track-end handling: captures the version and reports the
    /// end to subscribers.
    pub fn begin_track_end(&self, track: Track, reason: TrackEndReason) -> TrackEndTicket {
        let (version, item, stale) = {
            let inner = self.inner.lock();
            let version = self.version.load(Ordering::Acquire);
            let pending = inner.pending_next.as_ref().filter(|p| p.matches(&track));
            let current = inner.current.as_ref().filter(|c| c.matches(&track));
            match pending.or(current) {
                Some(item) => (version, Some(item.clone()), false),
                None => (version, None, inner.current.is_some()),
            }
        };

        debug!(
            "[{}] track ended: {} ({:?}, version {})",
            self.guild_id, track.info.identifier, reason, version
        );
        self.events.publish(SessionEvent::TrackEnded {
            track: track.clone(),
            reason,
            superseded: reason.is_preempted() || stale,
        });

        TrackEndTicket {
            version,
            reason,
            track,
            item,
            stale,
        }
    }

    /// Second half of track-end handling: moves to `NotPlaying` unless a newer
    /// play or stop happened since the ticket was taken.
    pub fn finish_track_end(&self, ticket: TrackEndTicket) -> bool {
        if ticket.is_superseded() {
            return false;
        }

        let cleared = {
            let mut inner = self.inner.lock();
            if self.version.load(Ordering::Acquire) != ticket.version {
                false
            } else {
                inner.current = None;
                inner.pending_next = None;
                inner.paused = false;
                inner.position = PositionSync::default();
                self.version.fetch_add(1, Ordering::AcqRel);
                true
            }
        };
        if cleared {
            self.publish_state();
        }
        cleared
    }

    pub fn on_track_exception(&self, track: Track, exception: TrackException) {
        warn!(
            "[{}] exception while playing {}: {}",
            self.guild_id,
            track.info.identifier,
            exception.message.as_deref().unwrap_or(&exception.cause)
        );
        self.events
            .publish(SessionEvent::TrackException { track, exception });
    }

    pub fn on_track_stuck(&self, track: Track, threshold_ms: u64) {
        warn!(
            "[{}] track {} stuck for {}ms",
            self.guild_id, track.info.identifier, threshold_ms
        );
        self.events.publish(SessionEvent::TrackStuck {
            track,
            threshold: Duration::from_millis(threshold_ms),
        });
    }

    /// Handles the node's voice websocket closing. Returns whether the session
    /// was torn down because of it.
    pub async fn on_transport_closed(&self, code: u16, reason: String, by_remote: bool) -> bool {
        warn!(
            "[{}] voice websocket closed: {} {} (by remote: {})",
            self.guild_id, code, reason, by_remote
        );
        self.events.publish(SessionEvent::TransportClosed {
            code,
            reason,
            by_remote,
        });
        if FATAL_CLOSE_CODES.contains(&code) {
            self.destroy().await
        } else {
            false
        }
    }

    /// Records the server half of the voice credentials. Returns whether
    /// complete credentials were pushed to the node.
    pub async fn on_voice_server(
        &self,
        update: VoiceServerUpdate,
        cancel: &CancellationToken,
    ) -> PlayerResult<bool> {
        ensure_not_cancelled(cancel)?;
        self.ensure_alive()?;
        let credentials = {
            let mut inner = self.inner.lock();
            inner.voice.token = Some(update.token);
            inner.voice.endpoint = update.endpoint;
            inner.voice.complete()
        };

        match credentials {
            Some(voice) => {
                self.send(
                    PlayerUpdate {
                        voice: Some(voice),
                        ..PlayerUpdate::default()
                    },
                    cancel,
                )
                .await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Records the state half of the voice credentials. Leaving the channel
    /// destroys the session.
    pub async fn on_voice_state(
        &self,
        update: VoiceStateUpdate,
        cancel: &CancellationToken,
    ) -> PlayerResult<Option<VoiceChange>> {
        ensure_not_cancelled(cancel)?;
        self.ensure_alive()?;
        let (change, credentials) = {
            let mut inner = self.inner.lock();
            let previous = inner.voice.channel_id;
            inner.voice.session_id = Some(update.session_id);
            inner.voice.channel_id = update.channel_id;
            if let Some(channel_id) = update.channel_id {
                inner.channel_id = channel_id;
            }
            let change = match (previous, update.channel_id) {
                (Some(from), None) => Some(VoiceChange::Disconnected { from }),
                (None, Some(to)) => Some(VoiceChange::Connected(to)),
                (Some(from), Some(to)) if from != to => Some(VoiceChange::Moved { from, to }),
                _ => None,
            };
            (change, inner.voice.complete())
        };

        if let Some(change) = change {
            info!("[{}] voice: {:?}", self.guild_id, change);
            self.events.publish(SessionEvent::Voice(change));
            if matches!(change, VoiceChange::Disconnected { .. }) {
                self.destroy().await;
                return Ok(Some(change));
            }
        }

        if let Some(voice) = credentials {
            self.send(
                PlayerUpdate {
                    voice: Some(voice),
                    ..PlayerUpdate::default()
                },
                cancel,
            )
            .await?;
        }
        Ok(change)
    }

    /// Applies a node event with no upper layer reacting in between.
    pub async fn handle_event(&self, event: NodeEvent) {
        match event {
            NodeEvent::TrackStart { track, .. } => {
                self.on_track_started(track);
            }
            NodeEvent::TrackEnd { track, reason, .. } => {
                let ticket = self.begin_track_end(track, reason);
                self.finish_track_end(ticket);
            }
            NodeEvent::TrackException {
                track, exception, ..
            } => self.on_track_exception(track, exception),
            NodeEvent::TrackStuck {
                track,
                threshold_ms,
                ..
            } => self.on_track_stuck(track, threshold_ms),
            NodeEvent::WebSocketClosed {
                code,
                reason,
                by_remote,
                ..
            } => {
                self.on_transport_closed(code, reason, by_remote).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        protocol::TrackEncoded,
        testing::{MockNode, MockVoice, session_on, track},
    };

    struct FixedLookup(QueueItem);

    impl TrackLookup for FixedLookup {
        fn lookup(&self, track: &Track) -> Option<QueueItem> {
            self.0.matches(track).then(|| self.0.clone())
        }
    }

    #[tokio::test]
    async fn test_play_bumps_version_and_state() {
        let node = MockNode::new("main");
        let (session, _) = session_on(node.clone());
        let cancel = CancellationToken::new();

        let mut last = session.version();
        for id in ["a", "b", "c"] {
            session
                .play(track(id, 60_000), PlayOptions::default(), &cancel)
                .await
                .unwrap();
            assert!(session.version() > last);
            last = session.version();
        }
        assert_eq!(session.state(), PlaybackState::Playing);
        assert_eq!(session.current_item().unwrap().identity(), "c");
        assert_eq!(node.played(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_preempted_end_keeps_state() {
        let (session, _) = session_on(MockNode::new("main"));
        let cancel = CancellationToken::new();
        session
            .play(track("a", 60_000), PlayOptions::default(), &cancel)
            .await
            .unwrap();

        for reason in [TrackEndReason::Replaced, TrackEndReason::Stopped] {
            let ticket = session.begin_track_end(track("a", 60_000), reason);
            assert!(ticket.is_superseded());
            assert!(!session.finish_track_end(ticket));
            assert_eq!(session.state(), PlaybackState::Playing);
            assert_eq!(session.current_item().unwrap().identity(), "a");
        }
    }

    #[tokio::test]
    async fn test_genuine_end_clears_current() {
        let (session, _) = session_on(MockNode::new("main"));
        let cancel = CancellationToken::new();
        let states = session.notifier().subscribe_state();
        session
            .play(track("a", 60_000), PlayOptions::default(), &cancel)
            .await
            .unwrap();

        session
            .handle_event(NodeEvent::TrackEnd {
                guild_id: session.guild_id().clone(),
                track: track("a", 60_000),
                reason: TrackEndReason::Finished,
            })
            .await;

        assert_eq!(session.state(), PlaybackState::NotPlaying);
        assert!(session.current_item().is_none());
        let seen: Vec<PlaybackState> = states.drain().into_iter().map(|c| c.current).collect();
        assert_eq!(seen, vec![PlaybackState::Playing, PlaybackState::NotPlaying]);
    }

    #[tokio::test]
    async fn test_end_superseded_by_newer_play() {
        let (session, _) = session_on(MockNode::new("main"));
        let cancel = CancellationToken::new();
        session
            .play(track("a", 60_000), PlayOptions::default(), &cancel)
            .await
            .unwrap();

        let ticket = session.begin_track_end(track("a", 60_000), TrackEndReason::Finished);
        assert!(!ticket.is_superseded());
        session
            .play(track("b", 60_000), PlayOptions::default(), &cancel)
            .await
            .unwrap();

        assert!(!session.finish_track_end(ticket));
        assert_eq!(session.state(), PlaybackState::Playing);
        assert_eq!(session.current_item().unwrap().identity(), "b");
    }

    #[tokio::test]
    async fn test_stale_end_for_old_track_is_ignored() {
        let (session, _) = session_on(MockNode::new("main"));
        let cancel = CancellationToken::new();
        session
            .play(track("b", 60_000), PlayOptions::default(), &cancel)
            .await
            .unwrap();
        session.on_track_started(track("b", 60_000));

        let ticket = session.begin_track_end(track("a", 60_000), TrackEndReason::Finished);
        assert!(ticket.is_superseded());
        assert!(!session.finish_track_end(ticket));
        assert_eq!(session.current_item().unwrap().identity(), "b");
    }

    #[tokio::test]
    async fn test_load_failure_before_ack_matches_pending() {
        let (session, _) = session_on(MockNode::new("main"));
        let cancel = CancellationToken::new();
        session
            .play(track("a", 60_000), PlayOptions::default(), &cancel)
            .await
            .unwrap();
        session.on_track_started(track("a", 60_000));

        // a play for "b" is pending; its failure must not look stale
        session.inner.lock().pending_next = Some(QueueItem::from_track(track("b", 1000)));
        let ticket = session.begin_track_end(track("b", 1000), TrackEndReason::LoadFailed);
        assert!(!ticket.is_superseded());
        assert_eq!(ticket.item().unwrap().identity(), "b");
    }

    #[tokio::test]
    async fn test_track_start_prefers_pending_then_lookup_then_fresh() {
        let (session, _) = session_on(MockNode::new("main"));
        let cancel = CancellationToken::new();
        let looked_up =
            QueueItem::from_track(track("a", 60_000)).with_requester(Some(crate::common::UserId(7)));
        session.set_track_lookup(Arc::new(FixedLookup(looked_up)));

        let pending =
            QueueItem::from_identifier("a").with_requester(Some(crate::common::UserId(3)));
        session
            .play(pending, PlayOptions::default(), &cancel)
            .await
            .unwrap();

        let started = session.on_track_started(track("a", 60_000));
        assert_eq!(started.requester(), Some(crate::common::UserId(3)));
        assert!(started.track().is_some(), "lazy entry resolved by the start");

        // pending consumed: same report now goes through the lookup hook
        let started = session.on_track_started(track("a", 60_000));
        assert_eq!(started.requester(), Some(crate::common::UserId(7)));

        // unknown to both: built from the report
        let started = session.on_track_started(track("z", 1000));
        assert_eq!(started.requester(), None);
        assert_eq!(started.identity(), "z");
        assert_eq!(session.current_item().unwrap().identity(), "z");
    }

    #[tokio::test]
    async fn test_voice_credentials_pushed_once_complete() {
        let node = MockNode::new("main");
        let (session, _) = session_on(node.clone());
        let cancel = CancellationToken::new();
        let events = session.subscribe();

        let pushed = session
            .on_voice_server(
                VoiceServerUpdate {
                    token: "token".into(),
                    endpoint: Some("endpoint".into()),
                },
                &cancel,
            )
            .await
            .unwrap();
        assert!(!pushed);
        assert!(node.updates().is_empty());

        let change = session
            .on_voice_state(
                VoiceStateUpdate {
                    channel_id: Some(ChannelId(1)),
                    session_id: "voice-session".into(),
                },
                &cancel,
            )
            .await
            .unwrap();
        assert_eq!(change, Some(VoiceChange::Connected(ChannelId(1))));
        let voice = node.updates().last().and_then(|u| u.voice.clone()).unwrap();
        assert_eq!(voice.session_id, "voice-session");
        assert_eq!(voice.channel_id.as_deref(), Some("1"));

        let change = session
            .on_voice_state(
                VoiceStateUpdate {
                    channel_id: Some(ChannelId(2)),
                    session_id: "voice-session".into(),
                },
                &cancel,
            )
            .await
            .unwrap();
        assert_eq!(
            change,
            Some(VoiceChange::Moved {
                from: ChannelId(1),
                to: ChannelId(2)
            })
        );
        assert_eq!(session.channel_id(), ChannelId(2));

        let voice_events: Vec<VoiceChange> = events
            .drain()
            .into_iter()
            .filter_map(|e| match e {
                SessionEvent::Voice(change) => Some(change),
                _ => None,
            })
            .collect();
        assert_eq!(voice_events.len(), 2);
    }

    #[tokio::test]
    async fn test_leaving_channel_destroys_session() {
        let node = MockNode::new("main");
        let (session, _) = session_on(node.clone());
        let cancel = CancellationToken::new();
        session
            .on_voice_state(
                VoiceStateUpdate {
                    channel_id: Some(ChannelId(1)),
                    session_id: "s".into(),
                },
                &cancel,
            )
            .await
            .unwrap();

        let change = session
            .on_voice_state(
                VoiceStateUpdate {
                    channel_id: None,
                    session_id: "s".into(),
                },
                &cancel,
            )
            .await
            .unwrap();
        assert_eq!(
            change,
            Some(VoiceChange::Disconnected { from: ChannelId(1) })
        );
        assert_eq!(session.state(), PlaybackState::Destroyed);
        assert_eq!(node.destroy_count(), 1);
    }

    #[tokio::test]
    async fn test_filter_commit_only_when_dirty() {
        let node = MockNode::new("main");
        let (session, _) = session_on(node.clone());
        let cancel = CancellationToken::new();

        assert!(!session.commit_filters(&cancel).await.unwrap());
        session
            .filters()
            .set(crate::protocol::FilterValue::Volume(0.5));
        assert!(session.commit_filters(&cancel).await.unwrap());
        assert!(!session.commit_filters(&cancel).await.unwrap());

        session.filters().clear(crate::protocol::FilterKind::Karaoke);
        assert!(!session.commit_filters(&cancel).await.unwrap());

        let filter_updates = node
            .updates()
            .into_iter()
            .filter(|u| u.filters.is_some())
            .count();
        assert_eq!(filter_updates, 1);
    }

    #[tokio::test]
    async fn test_failed_commit_stays_dirty() {
        let node = MockNode::new("main");
        let (session, _) = session_on(node.clone());
        let cancel = CancellationToken::new();
        session
            .filters()
            .set(crate::protocol::FilterValue::Volume(0.5));

        node.fail_updates(true);
        assert!(session.commit_filters(&cancel).await.is_err());
        assert!(session.filters().is_dirty());

        node.fail_updates(false);
        assert!(session.commit_filters(&cancel).await.unwrap());
    }

    #[tokio::test]
    async fn test_destroy_once_with_voice_fallback() {
        let node = MockNode::new("main");
        node.fail_destroy(true);
        let (session, voice) = session_on(node.clone());
        let cancel = CancellationToken::new();

        let (first, second) = tokio::join!(session.destroy(), session.destroy());
        assert!(first ^ second);
        assert_eq!(node.destroy_count(), 1);
        assert_eq!(voice.disconnects(), 1);
        assert_eq!(session.state(), PlaybackState::Destroyed);

        let err = session
            .play(track("a", 1000), PlayOptions::default(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, PlayerError::Destroyed));
        assert!(matches!(
            session.pause(&cancel).await,
            Err(PlayerError::Destroyed)
        ));
    }

    #[tokio::test]
    async fn test_destroy_without_fallback_when_node_cooperates() {
        let node = MockNode::new("main");
        let (session, voice) = session_on(node.clone());
        assert!(session.destroy().await);
        assert_eq!(voice.disconnects(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_sends_nothing() {
        let node = MockNode::new("main");
        let (session, _) = session_on(node.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = session
            .play(track("a", 1000), PlayOptions::default(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, PlayerError::Cancelled));
        assert!(node.updates().is_empty());
        assert_eq!(session.version(), 0);
    }

    #[tokio::test]
    async fn test_pause_resume_and_seek() {
        let node = MockNode::new("main");
        let (session, _) = session_on(node.clone());
        let cancel = CancellationToken::new();
        session
            .play(track("a", 60_000), PlayOptions::at(Duration::from_secs(10)), &cancel)
            .await
            .unwrap();

        session.pause(&cancel).await.unwrap();
        assert_eq!(session.state(), PlaybackState::Paused);
        let frozen = session.position();
        assert!(frozen >= Duration::from_secs(10));
        assert_eq!(session.position(), frozen);

        let target = session
            .seek(Duration::from_secs(5), SeekOrigin::End, &cancel)
            .await
            .unwrap();
        assert_eq!(target, Duration::from_secs(55));
        let target = session
            .seek(Duration::from_secs(120), SeekOrigin::Begin, &cancel)
            .await
            .unwrap();
        assert_eq!(target, Duration::from_secs(60));

        session.resume(&cancel).await.unwrap();
        assert_eq!(session.state(), PlaybackState::Playing);
    }

    #[tokio::test]
    async fn test_stop_clears_and_sends_null_track() {
        let node = MockNode::new("main");
        let (session, _) = session_on(node.clone());
        let cancel = CancellationToken::new();
        session
            .play(track("a", 60_000), PlayOptions::default(), &cancel)
            .await
            .unwrap();
        session.stop(&cancel).await.unwrap();

        assert_eq!(session.state(), PlaybackState::NotPlaying);
        let last = node.updates().last().cloned().unwrap();
        assert_eq!(
            last.track.and_then(|t| t.encoded),
            Some(TrackEncoded::Clear)
        );
    }

    #[tokio::test]
    async fn test_failed_stop_keeps_pending_play() {
        let node = MockNode::new("main");
        let (session, _) = session_on(node.clone());
        let cancel = CancellationToken::new();
        session
            .play(track("a", 60_000), PlayOptions::default(), &cancel)
            .await
            .unwrap();

        node.fail_updates(true);
        assert!(session.stop(&cancel).await.is_err());
        assert_eq!(session.state(), PlaybackState::Playing);
        assert_eq!(
            session
                .inner
                .lock()
                .pending_next
                .as_ref()
                .map(|p| p.identity().to_string()),
            Some("a".to_string())
        );

        node.fail_updates(false);
        let item = session.on_track_started(track("a", 60_000));
        assert_eq!(item.identity(), "a");
        assert!(session.inner.lock().pending_next.is_none());
    }

    #[tokio::test]
    async fn test_volume_is_clamped_and_published() {
        let node = MockNode::new("main");
        let (session, _) = session_on(node.clone());
        let cancel = CancellationToken::new();
        let volumes = session.notifier().subscribe_volume();

        session.set_volume(9.0, &cancel).await.unwrap();
        assert_eq!(session.volume(), MAX_VOLUME);
        assert_eq!(node.updates().last().unwrap().volume, Some(150));
        assert_eq!(volumes.drain().last().unwrap().current, 200);
    }

    #[tokio::test]
    async fn test_fatal_close_destroys() {
        let node = MockNode::new("main");
        let (session, _) = session_on(node.clone());
        assert!(
            !session
                .on_transport_closed(1006, "abnormal".into(), false)
                .await
        );
        assert!(!session.is_destroyed());
        assert!(
            session
                .on_transport_closed(4014, "Disconnected".into(), true)
                .await
        );
        assert!(session.is_destroyed());
    }

    #[tokio::test]
    async fn test_migrate_replays_on_new_node() {
        let old = MockNode::new("old");
        let new = MockNode::new("new");
        let (session, _) = session_on(old.clone());
        let cancel = CancellationToken::new();
        session
            .play(track("a", 60_000), PlayOptions::default(), &cancel)
            .await
            .unwrap();

        session.migrate(new.clone(), &cancel).await.unwrap();
        assert_eq!(session.node_name(), "new");
        assert_eq!(old.destroy_count(), 1);
        assert_eq!(new.played(), vec!["a"]);
        let update = new.updates().last().cloned().unwrap();
        assert!(update.filters.is_some());
        assert!(update.volume.is_some());
    }
}
