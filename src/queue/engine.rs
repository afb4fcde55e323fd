use std::{sync::Arc, time::Duration};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    ExportOptions, ExportedTrack, ImportSummary, LoopingState, MergePolicy, PlayerSnapshot,
    Playlist, PlaylistExport, ShutdownParams, ShutdownReason, TrackResolver,
};
use crate::{
    common::{
        PlayerError, PlayerResult,
        types::{ChannelId, GuildId, UserId},
    },
    configs::{Config, PlayerConfig},
    effects::{Effect, EffectUse, EffectsAggregator, SnapshotSource},
    history::{HistoryEntry, HistorySink},
    host::{SessionHost, SnapshotStore, VoiceTransport},
    node::{AudioNode, NodePool},
    player::{
        EventHub, PlayOptions, PlayTarget, PlaybackState, PlayerSession, QueueItem, SeekOrigin,
        Subscription, TrackEndTicket, VoiceChange, ensure_not_cancelled, percent_to_volume,
    },
    protocol::{
        IncomingMessage, NodeEvent, Track, TrackEndReason, VoiceServerUpdate, VoiceStateUpdate,
    },
};

/// Everything outside the player it talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub pool: Arc<dyn NodePool>,
    pub voice: Arc<dyn VoiceTransport>,
    pub host: Arc<dyn SessionHost>,
    pub store: Arc<dyn SnapshotStore>,
    pub history: Arc<dyn HistorySink>,
}

/// Outcome of [`QueuePlayer::try_enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub admitted: usize,
    /// Resolvers never run because the queue filled up first.
    pub skipped_resolvers: usize,
    pub limit_reached: bool,
}

#[derive(Default)]
struct FailureState {
    consecutive: u32,
    last_failed: Option<String>,
}

/// A session with a queue: looping, admission, and recovery from failed
/// loads on top of [`PlayerSession`].
pub struct QueuePlayer {
    session: Arc<PlayerSession>,
    effects: EffectsAggregator,
    playlist: Arc<Playlist>,
    looping: Mutex<LoopingState>,
    looping_changes: EventHub<LoopingState>,
    admission: tokio::sync::Mutex<()>,
    failures: Mutex<FailureState>,
    lifetime: CancellationToken,
    config: PlayerConfig,
    pool: Arc<dyn NodePool>,
    store: Arc<dyn SnapshotStore>,
    history: Arc<dyn HistorySink>,
}

impl QueuePlayer {
    pub fn new(
        guild_id: GuildId,
        channel_id: ChannelId,
        node: Arc<dyn AudioNode>,
        config: &Config,
        collaborators: Collaborators,
    ) -> Arc<Self> {
        let Collaborators {
            pool,
            voice,
            host,
            store,
            history,
        } = collaborators;

        let session = PlayerSession::new(guild_id, channel_id, node, voice, &config.player);
        let playlist = Arc::new(Playlist::new(config.queue.max_tracks));
        session.set_track_lookup(playlist.clone());
        let effects =
            EffectsAggregator::new(session.clone(), &config.effects, host, history.clone());

        Arc::new(Self {
            session,
            effects,
            playlist,
            looping: Mutex::new(LoopingState::Off),
            looping_changes: EventHub::new(),
            admission: tokio::sync::Mutex::new(()),
            failures: Mutex::new(FailureState::default()),
            lifetime: CancellationToken::new(),
            config: config.player.clone(),
            pool,
            store,
            history,
        })
    }

    pub fn session(&self) -> &Arc<PlayerSession> {
        &self.session
    }

    pub fn effects(&self) -> &EffectsAggregator {
        &self.effects
    }

    pub fn playlist(&self) -> &Arc<Playlist> {
        &self.playlist
    }

    pub fn guild_id(&self) -> &GuildId {
        self.session.guild_id()
    }

    pub fn looping(&self) -> LoopingState {
        *self.looping.lock()
    }

    pub fn set_looping(&self, looping: LoopingState) {
        let previous = std::mem::replace(&mut *self.looping.lock(), looping);
        if previous != looping {
            self.looping_changes.publish(looping);
        }
    }

    pub fn subscribe_looping(&self) -> Subscription<LoopingState> {
        self.looping_changes.subscribe()
    }

    fn record(&self, entry: HistoryEntry) {
        self.history.record(self.session.guild_id(), entry);
    }

    /// Plays `target` right away, queued right after the current entry.
    pub async fn play(
        &self,
        target: impl Into<PlayTarget>,
        options: PlayOptions,
        cancel: &CancellationToken,
    ) -> PlayerResult<()> {
        ensure_not_cancelled(cancel)?;
        self.session.ensure_alive()?;
        let item = PlayTarget::into_item(target.into());

        let previous = self.playlist.current_index();
        let at = self
            .playlist
            .insert(previous.map(|i| i + 1), vec![item.clone()])?;
        self.playlist.set_index(Some(at));
        if let Err(e) = self.session.play(item, options, cancel).await {
            self.playlist.remove(at);
            self.playlist.set_index(previous);
            return Err(e);
        }
        Ok(())
    }

    pub async fn pause(&self, cancel: &CancellationToken) -> PlayerResult<()> {
        self.session.pause(cancel).await
    }

    pub async fn resume(&self, cancel: &CancellationToken) -> PlayerResult<()> {
        self.session.resume(cancel).await
    }

    pub async fn stop(&self, cancel: &CancellationToken) -> PlayerResult<()> {
        self.session.stop(cancel).await
    }

    pub async fn seek(
        &self,
        offset: Duration,
        origin: SeekOrigin,
        cancel: &CancellationToken,
    ) -> PlayerResult<Duration> {
        self.session.seek(offset, origin, cancel).await
    }

    /// Sets the volume on the 0-200 percent scale. Out-of-range values are clamped.
    pub async fn set_volume(&self, percent: i32, cancel: &CancellationToken) -> PlayerResult<()> {
        self.session
            .set_volume(percent_to_volume(percent), cancel)
            .await
    }

    pub async fn apply_effect(
        &self,
        effect: Effect,
        requester: Option<UserId>,
        cancel: &CancellationToken,
    ) -> PlayerResult<EffectUse> {
        self.effects.apply(effect, requester, cancel).await
    }

    pub async fn remove_effect(
        &self,
        effect_use: &EffectUse,
        requester: Option<UserId>,
        cancel: &CancellationToken,
    ) -> PlayerResult<bool> {
        self.effects.remove(effect_use, requester, cancel).await
    }

    /// Moves `count` entries forward (backward if negative) and plays the
    /// entry there. Returns whether anything started playing.
    ///
    /// With [`LoopingState::One`] an unforced skip replays the current entry.
    /// `force` wraps around both ends of the queue; [`LoopingState::All`]
    /// wraps past the end only.
    pub async fn skip(
        &self,
        count: isize,
        force: bool,
        cancel: &CancellationToken,
    ) -> PlayerResult<bool> {
        self.skip_inner(count, force, true, cancel).await
    }

    /// Goes back one entry. Never wraps.
    pub async fn back(&self, cancel: &CancellationToken) -> PlayerResult<bool> {
        self.skip_inner(-1, false, false, cancel).await
    }

    async fn skip_inner(
        &self,
        count: isize,
        force: bool,
        honor_repeat_one: bool,
        cancel: &CancellationToken,
    ) -> PlayerResult<bool> {
        ensure_not_cancelled(cancel)?;
        self.session.ensure_alive()?;

        if honor_repeat_one && !force && self.looping() == LoopingState::One {
            let current = self
                .playlist
                .current()
                .or_else(|| self.session.current_item());
            if let Some(item) = current {
                self.session
                    .play(item, PlayOptions::default(), cancel)
                    .await?;
                return Ok(true);
            }
        }

        let len = self.playlist.len() as isize;
        if len == 0 {
            return Ok(false);
        }

        let previous = self.playlist.current_index();
        let mut target = previous.map_or(-1, |i| i as isize) + count;
        if (force || self.looping() == LoopingState::All) && target > len - 1 {
            target = 0;
        }
        if force && target < 0 {
            target = len - 1;
        }
        let Some(item) = usize::try_from(target)
            .ok()
            .and_then(|i| self.playlist.get(i))
        else {
            return Ok(false);
        };

        self.playlist.set_index(Some(target as usize));
        if let Err(e) = self
            .session
            .play(item, PlayOptions::default(), cancel)
            .await
        {
            self.playlist.set_index(previous);
            return Err(e);
        }
        Ok(true)
    }

    /// Jumps to the entry at `index` and plays it.
    pub async fn jump_to(&self, index: usize, cancel: &CancellationToken) -> PlayerResult<bool> {
        ensure_not_cancelled(cancel)?;
        self.session.ensure_alive()?;
        let Some(item) = self.playlist.get(index) else {
            return Ok(false);
        };
        self.playlist.set_index(Some(index));
        self.session
            .play(item, PlayOptions::default(), cancel)
            .await?;
        Ok(true)
    }

    pub fn remove(&self, index: usize) -> Option<QueueItem> {
        self.playlist.remove(index)
    }

    pub fn clear(&self) {
        self.playlist.clear();
    }

    pub fn shuffle(&self) {
        self.playlist.shuffle();
    }

    /// Queues `items` as a whole, or none of them if they do not all fit.
    pub async fn enqueue(
        &self,
        items: Vec<QueueItem>,
        position: Option<usize>,
        cancel: &CancellationToken,
    ) -> PlayerResult<()> {
        ensure_not_cancelled(cancel)?;
        self.session.ensure_alive()?;
        if items.is_empty() {
            return Err(PlayerError::NotFound);
        }

        let _admission = self.admission.lock().await;
        let idle = self.session.state() == PlaybackState::NotPlaying;
        let at = self.playlist.insert(position, items)?;
        self.start_if_idle(idle, at, cancel).await;
        self.prefetch_upcoming();
        Ok(())
    }

    /// Runs `resolvers` in order and queues what they produce, tagged with
    /// `requester`, until the queue is full.
    ///
    /// Admission batches are serialized against each other. Failing
    /// resolvers are skipped. Fails with [`PlayerError::NotFound`] if
    /// nothing was admitted.
    pub async fn try_enqueue(
        &self,
        resolvers: Vec<Box<dyn TrackResolver>>,
        requester: Option<UserId>,
        position: Option<usize>,
        cancel: &CancellationToken,
    ) -> PlayerResult<Admission> {
        ensure_not_cancelled(cancel)?;
        self.session.ensure_alive()?;
        let _admission = self.admission.lock().await;

        let total = resolvers.len();
        let mut remaining = self.playlist.remaining();
        let mut admitted = Vec::new();
        let mut invoked = 0;
        let mut limit_reached = false;

        for resolver in resolvers {
            if remaining == 0 {
                limit_reached = true;
                break;
            }
            ensure_not_cancelled(cancel)?;
            invoked += 1;

            let items = match resolver.resolve().await {
                Ok(items) => items,
                Err(e) => {
                    warn!("[{}] resolver failed: {}", self.guild_id(), e);
                    continue;
                }
            };
            for item in items {
                if remaining == 0 {
                    limit_reached = true;
                    break;
                }
                let tag = requester.or(item.requester());
                admitted.push(item.with_requester(tag));
                remaining -= 1;
            }
        }

        if admitted.is_empty() {
            return Err(PlayerError::NotFound);
        }

        let idle = self.session.state() == PlaybackState::NotPlaying;
        let (at, count) = self.playlist.insert_fitting(position, admitted);
        if count == 0 {
            return Err(PlayerError::QueueFull {
                limit: self.playlist.capacity(),
            });
        }
        self.start_if_idle(idle, at, cancel).await;
        self.prefetch_upcoming();

        let admission = Admission {
            admitted: count,
            skipped_resolvers: total - invoked,
            limit_reached,
        };
        self.record(HistoryEntry::Enqueued {
            admitted: admission.admitted,
            skipped_resolvers: admission.skipped_resolvers,
            limit_reached,
            requester,
        });
        Ok(admission)
    }

    /// Starts the entry at `at` if the session was idle. A failed start is
    /// logged and leaves the cursor where it was; the entries stay queued.
    async fn start_if_idle(&self, idle: bool, at: usize, cancel: &CancellationToken) {
        if !idle {
            return;
        }
        let Some(item) = self.playlist.get(at) else {
            return;
        };
        let previous = self.playlist.current_index();
        self.playlist.set_index(Some(at));
        if let Err(e) = self
            .session
            .play(item, PlayOptions::default(), cancel)
            .await
        {
            warn!("[{}] could not start the queue: {}", self.guild_id(), e);
            self.playlist.set_index(previous);
        }
    }

    /// Warms up the entry after the current one, if it can.
    fn prefetch_upcoming(&self) {
        let Some(prefetch) = self.playlist.upcoming().and_then(|item| item.prefetch()) else {
            return;
        };
        let lifetime = self.lifetime.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = lifetime.cancelled() => {}
                _ = prefetch.prefetch() => {}
            }
        });
    }

    pub fn export_playlist(&self, options: ExportOptions) -> PlaylistExport {
        let (items, index) = self.playlist.snapshot();
        let current_index = if options.include_index && !items.is_empty() {
            index.map(|i| i.min(items.len() - 1))
        } else {
            None
        };
        let offset_ms = (options.include_offset && self.session.current_item().is_some())
            .then(|| self.session.position().as_millis() as u64);

        PlaylistExport {
            tracks: items.iter().map(ExportedTrack::from_item).collect(),
            current_index,
            offset_ms,
        }
    }

    /// Loads an exported playlist under the queue limit.
    ///
    /// An offset past the end of the resumed track starts it from the
    /// beginning instead.
    pub async fn import_playlist(
        &self,
        export: &PlaylistExport,
        policy: MergePolicy,
        requester: Option<UserId>,
        cancel: &CancellationToken,
    ) -> PlayerResult<ImportSummary> {
        ensure_not_cancelled(cancel)?;
        self.session.ensure_alive()?;
        let _admission = self.admission.lock().await;

        let mut invalid = 0;
        let items: Vec<QueueItem> = export
            .tracks
            .iter()
            .filter_map(|track| {
                let item = track.to_item();
                if item.is_none() {
                    invalid += 1;
                }
                item
            })
            .map(|item| item.with_requester(requester))
            .collect();
        if items.is_empty() {
            return Err(PlayerError::NotFound);
        }
        let valid = items.len();

        if policy == MergePolicy::Replace {
            if self.session.state().is_active() {
                self.session.stop(cancel).await?;
            }
            self.playlist.clear();
        }

        let idle = self.session.state() == PlaybackState::NotPlaying;
        let (at, imported) = self.playlist.insert_fitting(None, items);
        if imported == 0 {
            return Err(PlayerError::QueueFull {
                limit: self.playlist.capacity(),
            });
        }

        let target = match (policy, export.current_index) {
            (MergePolicy::JustAdd, _) => None,
            (_, Some(index)) => Some((at + index.min(imported - 1), export.offset_ms)),
            (MergePolicy::Replace, None) => Some((at, None)),
            (MergePolicy::JumpTo, None) => idle.then_some((at, None)),
        };

        let mut resumed_at = None;
        if let Some((index, offset_ms)) = target {
            if let Some(item) = self.playlist.get(index) {
                let offset = offset_ms.map(Duration::from_millis).unwrap_or_default();
                let offset = match item.duration() {
                    Some(duration) if offset > duration => Duration::ZERO,
                    _ => offset,
                };
                self.playlist.set_index(Some(index));
                self.session
                    .play(item, PlayOptions::at(offset), cancel)
                    .await?;
                resumed_at = Some(offset);
            }
        }

        let summary = ImportSummary {
            imported,
            invalid,
            dropped: valid - imported,
            resumed_at,
        };
        info!(
            "[{}] imported {} track(s) ({:?}), {} invalid, {} dropped",
            self.guild_id(),
            summary.imported,
            policy,
            summary.invalid,
            summary.dropped
        );
        self.record(HistoryEntry::Imported {
            imported,
            invalid,
            dropped: summary.dropped,
            policy,
        });
        Ok(summary)
    }

    /// Tears the player down, returning its resumable state. Only the first
    /// of concurrent calls does so; the others fail with
    /// [`PlayerError::Destroyed`].
    pub async fn shutdown(
        &self,
        reason: ShutdownReason,
        params: ShutdownParams,
        cancel: &CancellationToken,
    ) -> PlayerResult<PlayerSnapshot> {
        ensure_not_cancelled(cancel)?;
        let mut snapshot = self.effects.shutdown(reason, self).await?;
        self.lifetime.cancel();

        if params.store_playlist {
            match self
                .store
                .store_playlist(self.guild_id(), &snapshot.playlist)
                .await
            {
                Ok(reference) => snapshot.stored_playlist = Some(reference),
                Err(e) => warn!("[{}] could not store playlist: {}", self.guild_id(), e),
            }
        }
        if params.save_snapshot {
            if let Err(e) = self.store.save_snapshot(&snapshot).await {
                warn!("[{}] could not save snapshot: {}", self.guild_id(), e);
            }
        }

        self.record(HistoryEntry::Stopped { reason });
        Ok(snapshot)
    }

    /// Brings back volume, looping, effects and queue from a snapshot.
    pub async fn restore(
        &self,
        snapshot: &PlayerSnapshot,
        cancel: &CancellationToken,
    ) -> PlayerResult<ImportSummary> {
        self.set_volume(snapshot.volume as i32, cancel).await?;
        self.set_looping(snapshot.looping);
        for effect in &snapshot.effects {
            let Some(preset) = Effect::by_name(&effect.name) else {
                warn!("[{}] unknown effect {} in snapshot", self.guild_id(), effect.name);
                continue;
            };
            if let Err(e) = self.effects.apply(preset, effect.requester, cancel).await {
                warn!(
                    "[{}] could not restore effect {}: {}",
                    self.guild_id(),
                    effect.name,
                    e
                );
            }
        }
        self.import_playlist(&snapshot.playlist, MergePolicy::Replace, None, cancel)
            .await
    }

    /// Feeds one message from the node's event channel into the player.
    pub async fn handle_message(&self, message: IncomingMessage) {
        match message {
            IncomingMessage::PlayerUpdate { guild_id, state } => {
                if guild_id == *self.guild_id() {
                    self.session.on_player_update(&state);
                }
            }
            IncomingMessage::Event { event } => self.handle_event(event).await,
            IncomingMessage::Ready { .. } | IncomingMessage::Other => {}
        }
    }

    pub async fn handle_event(&self, event: NodeEvent) {
        if event.guild_id() != self.guild_id() {
            return;
        }
        let cancel = self.lifetime.child_token();

        match event {
            NodeEvent::TrackStart { track, .. } => {
                let item = self.session.on_track_started(track);
                if let Some(track) = item.track() {
                    self.playlist.reconcile(track);
                }
            }
            NodeEvent::TrackEnd { track, reason, .. } => {
                self.on_track_end(track, reason, &cancel).await;
            }
            NodeEvent::TrackException {
                track, exception, ..
            } => {
                let message = exception
                    .message
                    .clone()
                    .unwrap_or_else(|| exception.cause.clone());
                self.record(HistoryEntry::TrackException {
                    track: track.info.title.clone(),
                    message,
                });
                self.session.on_track_exception(track, exception);
            }
            NodeEvent::TrackStuck {
                track,
                threshold_ms,
                ..
            } => {
                self.record(HistoryEntry::TrackStuck {
                    track: track.info.title.clone(),
                    threshold_ms,
                });
                self.session.on_track_stuck(track, threshold_ms);
            }
            NodeEvent::WebSocketClosed {
                code,
                reason,
                by_remote,
                ..
            } => {
                if self
                    .session
                    .on_transport_closed(code, reason, by_remote)
                    .await
                {
                    self.on_torn_down();
                }
            }
        }
    }

    pub async fn on_voice_server(
        &self,
        update: VoiceServerUpdate,
        cancel: &CancellationToken,
    ) -> PlayerResult<bool> {
        self.session.on_voice_server(update, cancel).await
    }

    pub async fn on_voice_state(
        &self,
        update: VoiceStateUpdate,
        cancel: &CancellationToken,
    ) -> PlayerResult<Option<VoiceChange>> {
        let change = self.session.on_voice_state(update, cancel).await?;
        match change {
            Some(VoiceChange::Moved { from, to }) => {
                self.record(HistoryEntry::VoiceMoved { from, to });
            }
            Some(VoiceChange::Disconnected { .. }) => self.on_torn_down(),
            _ => {}
        }
        Ok(change)
    }

    /// The session was destroyed by something other than [`Self::shutdown`].
    fn on_torn_down(&self) {
        if self.effects.on_session_destroyed() {
            self.lifetime.cancel();
        }
    }

    async fn on_track_end(&self, track: Track, reason: TrackEndReason, cancel: &CancellationToken) {
        let ticket = self.session.begin_track_end(track, reason);
        if ticket.is_superseded() {
            return;
        }

        let load_failed = reason == TrackEndReason::LoadFailed;
        if load_failed {
            if self.on_load_failed(&ticket, cancel).await {
                return;
            }
        } else {
            self.failures.lock().consecutive = 0;
        }

        let moved = if reason.may_start_next() {
            match self.skip_inner(1, false, !load_failed, cancel).await {
                Ok(moved) => moved,
                Err(e) => {
                    warn!("[{}] could not advance the queue: {}", self.guild_id(), e);
                    false
                }
            }
        } else {
            false
        };
        if !moved {
            self.session.finish_track_end(ticket);
        }
    }

    /// Retries a failed load once from where it stopped, and drops it from
    /// the queue if it fails again. Too many failures in a row move the
    /// session to another node. Returns whether the track is being retried.
    async fn on_load_failed(&self, ticket: &TrackEndTicket, cancel: &CancellationToken) -> bool {
        let item = ticket
            .item()
            .cloned()
            .unwrap_or_else(|| QueueItem::from_track(ticket.track().clone()));
        let identity = item.identity().to_string();

        let (migrate, repeated) = {
            let mut failures = self.failures.lock();
            failures.consecutive += 1;
            let migrate = failures.consecutive > self.config.migrate_after_failures;
            if migrate {
                failures.consecutive = 0;
            }
            let repeated = failures.last_failed.as_deref() == Some(identity.as_str());
            failures.last_failed = if repeated {
                None
            } else {
                Some(identity.clone())
            };
            (migrate, repeated)
        };

        if migrate {
            self.migrate_node(cancel).await;
        }

        if repeated {
            if let Some(index) = self.playlist.find(ticket.track()) {
                self.playlist.remove(index);
            }
            self.record(HistoryEntry::LoadFailed {
                track: item.title().to_string(),
                retrying: false,
                removed: true,
            });
            return false;
        }

        self.record(HistoryEntry::LoadFailed {
            track: item.title().to_string(),
            retrying: true,
            removed: false,
        });
        let position = self.session.position();
        debug!(
            "[{}] retrying {} at {:?}",
            self.guild_id(),
            identity,
            position
        );
        match self
            .session
            .play(item, PlayOptions::at(position), cancel)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                warn!("[{}] retry of {} failed: {}", self.guild_id(), identity, e);
                false
            }
        }
    }

    async fn migrate_node(&self, cancel: &CancellationToken) {
        let from = self.session.node_name();
        let Some(node) = self.pool.pick_alternate(&from) else {
            warn!("[{}] no alternate node to move to from {}", self.guild_id(), from);
            self.record(HistoryEntry::NodeMigrated { from, to: None });
            return;
        };

        let to = node.name().to_string();
        match self.session.migrate(node, cancel).await {
            Ok(()) => self.record(HistoryEntry::NodeMigrated { from, to: Some(to) }),
            Err(e) => warn!(
                "[{}] could not move from node {} to {}: {}",
                self.guild_id(),
                from,
                to,
                e
            ),
        }
    }
}

impl SnapshotSource for QueuePlayer {
    fn capture(&self, reason: ShutdownReason) -> PlayerSnapshot {
        PlayerSnapshot {
            looping: self.looping(),
            playlist: self.export_playlist(ExportOptions::ALL_DATA),
            ..self.effects.capture(reason)
        }
    }
}
