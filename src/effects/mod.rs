pub mod presets;

use std::{
    collections::HashSet,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    common::{
        PlayerError, PlayerResult,
        types::{UserId, now_ms},
    },
    configs::EffectsConfig,
    history::{HistoryEntry, HistorySink},
    host::SessionHost,
    player::{PlayerSession, ensure_not_cancelled},
    protocol::{FilterKind, FilterValue},
    queue::{LoopingState, PlayerSnapshot, PlaylistExport, ShutdownReason},
};

/// A named bundle of filter blocks.
#[derive(Debug, Clone, PartialEq)]
pub struct Effect {
    name: String,
    contributions: Vec<FilterValue>,
}

impl Effect {
    pub fn new(name: impl Into<String>, contributions: Vec<FilterValue>) -> Self {
        Self {
            name: name.into(),
            contributions,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn contributions(&self) -> &[FilterValue] {
        &self.contributions
    }

    /// Looks up a built-in effect, ignoring case.
    pub fn by_name(name: &str) -> Option<Self> {
        presets::catalogue()
            .into_iter()
            .find(|effect| effect.name.eq_ignore_ascii_case(name))
    }
}

/// One applied effect. Handed back by [`EffectsAggregator::apply`] and used
/// to remove it again.
#[derive(Debug, Clone)]
pub struct EffectUse {
    id: u64,
    requester: Option<UserId>,
    effect: Effect,
}

impl EffectUse {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn requester(&self) -> Option<UserId> {
        self.requester
    }

    pub fn effect(&self) -> &Effect {
        &self.effect
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectSnapshot {
    pub name: String,
    pub requester: Option<UserId>,
}

/// Produces the resumable state of a player right before it is torn down.
pub trait SnapshotSource: Send + Sync {
    fn capture(&self, reason: ShutdownReason) -> PlayerSnapshot;
}

#[derive(Default)]
struct EffectsState {
    uses: Vec<EffectUse>,
    /// Filter kinds currently written by effects. Everything else in the
    /// session's filter set was set directly and is left alone.
    owned: HashSet<FilterKind>,
}

/// Composes active effects into the session's filter set and owns the
/// shutdown/teardown split of the session lifecycle.
pub struct EffectsAggregator {
    session: Arc<PlayerSession>,
    state: Mutex<EffectsState>,
    next_id: AtomicU64,
    max_active: usize,
    host: Arc<dyn SessionHost>,
    history: Arc<dyn HistorySink>,
    shutdown_requested: AtomicBool,
}

impl EffectsAggregator {
    pub fn new(
        session: Arc<PlayerSession>,
        config: &EffectsConfig,
        host: Arc<dyn SessionHost>,
        history: Arc<dyn HistorySink>,
    ) -> Self {
        Self {
            session,
            state: Mutex::new(EffectsState::default()),
            next_id: AtomicU64::new(1),
            max_active: config.max_active,
            host,
            history,
            shutdown_requested: AtomicBool::new(false),
        }
    }

    pub fn session(&self) -> &Arc<PlayerSession> {
        &self.session
    }

    pub fn max_active(&self) -> usize {
        self.max_active
    }

    pub fn active(&self) -> Vec<EffectUse> {
        self.state.lock().uses.clone()
    }

    pub fn snapshot(&self) -> Vec<EffectSnapshot> {
        self.state
            .lock()
            .uses
            .iter()
            .map(|u| EffectSnapshot {
                name: u.effect.name.clone(),
                requester: u.requester,
            })
            .collect()
    }

    /// Rebuilds the effect-owned part of the filter set. For a kind several
    /// effects contribute, the one applied first wins.
    fn compose(&self, state: &mut EffectsState) {
        let mut filters = self.session.filters().snapshot();
        for kind in state.owned.drain() {
            filters.clear(kind);
        }

        let mut seen = HashSet::new();
        for effect_use in &state.uses {
            for value in &effect_use.effect.contributions {
                if seen.insert(value.kind()) {
                    filters.set(value.clone());
                }
            }
        }
        state.owned = seen;
        self.session.filters().replace(filters);
    }

    /// Applies `effect` on top of the active ones.
    ///
    /// Fails with [`PlayerError::EffectLimit`] without touching anything if
    /// the limit is already reached. If the node rejects the new filters the
    /// effect is taken off again.
    pub async fn apply(
        &self,
        effect: Effect,
        requester: Option<UserId>,
        cancel: &CancellationToken,
    ) -> PlayerResult<EffectUse> {
        ensure_not_cancelled(cancel)?;
        self.session.ensure_alive()?;
        let effect_use = {
            let mut state = self.state.lock();
            if state.uses.len() >= self.max_active {
                return Err(PlayerError::EffectLimit {
                    limit: self.max_active,
                });
            }
            let effect_use = EffectUse {
                id: self.next_id.fetch_add(1, Ordering::Relaxed),
                requester,
                effect,
            };
            state.uses.push(effect_use.clone());
            self.compose(&mut state);
            effect_use
        };

        if let Err(e) = self.session.commit_filters(cancel).await {
            let mut state = self.state.lock();
            state.uses.retain(|u| u.id != effect_use.id);
            self.compose(&mut state);
            return Err(e);
        }

        debug!(
            "[{}] effect {} applied ({} active)",
            self.session.guild_id(),
            effect_use.effect.name,
            self.state.lock().uses.len()
        );
        self.history.record(
            self.session.guild_id(),
            HistoryEntry::EffectApplied {
                effect: effect_use.effect.name.clone(),
                requester,
            },
        );
        Ok(effect_use)
    }

    /// Removes a previously applied effect. Returns `false` if it was not
    /// active, or if `requester` is given and someone else applied it.
    ///
    /// A failed commit leaves the filter set dirty so the next commit retries it.
    pub async fn remove(
        &self,
        effect_use: &EffectUse,
        requester: Option<UserId>,
        cancel: &CancellationToken,
    ) -> PlayerResult<bool> {
        ensure_not_cancelled(cancel)?;
        self.session.ensure_alive()?;
        {
            let mut state = self.state.lock();
            let Some(index) = state.uses.iter().position(|u| u.id == effect_use.id) else {
                return Ok(false);
            };
            let owner = state.uses[index].requester;
            if requester.is_some() && owner.is_some() && owner != requester {
                return Ok(false);
            }
            state.uses.remove(index);
            self.compose(&mut state);
        }

        self.session.commit_filters(cancel).await?;
        self.history.record(
            self.session.guild_id(),
            HistoryEntry::EffectRemoved {
                effect: effect_use.effect.name.clone(),
                requester,
            },
        );
        Ok(true)
    }

    /// Removes every active effect. Returns how many there were.
    pub async fn clear(&self, cancel: &CancellationToken) -> PlayerResult<usize> {
        ensure_not_cancelled(cancel)?;
        self.session.ensure_alive()?;
        let removed = {
            let mut state = self.state.lock();
            let removed = std::mem::take(&mut state.uses);
            self.compose(&mut state);
            removed
        };
        self.session.commit_filters(cancel).await?;
        Ok(removed.len())
    }

    /// Claims the one teardown of this session for a local shutdown. Fails
    /// with [`PlayerError::Destroyed`] if a shutdown or restart already did.
    pub fn begin_shutdown(&self) -> PlayerResult<()> {
        self.shutdown_requested
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| PlayerError::Destroyed)
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::Acquire)
    }

    /// Captures a snapshot through `source`, then destroys the session.
    pub async fn shutdown(
        &self,
        reason: ShutdownReason,
        source: &dyn SnapshotSource,
    ) -> PlayerResult<PlayerSnapshot> {
        self.session.ensure_alive()?;
        self.begin_shutdown()?;

        let snapshot = source.capture(reason);
        self.session.destroy().await;
        info!("[{}] shut down ({})", self.session.guild_id(), reason);
        Ok(snapshot)
    }

    /// Called once the session reached `Destroyed`. If nobody asked for it,
    /// the host is asked to bring the session back.
    pub fn on_session_destroyed(&self) -> bool {
        if self
            .shutdown_requested
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        let guild_id = self.session.guild_id();
        warn!("[{}] session torn down remotely, requesting restart", guild_id);
        self.host
            .request_restart(guild_id, Some(self.session.channel_id()));
        self.history.record(guild_id, HistoryEntry::RestartRequested);
        true
    }
}

impl SnapshotSource for EffectsAggregator {
    fn capture(&self, reason: ShutdownReason) -> PlayerSnapshot {
        PlayerSnapshot {
            guild_id: self.session.guild_id().clone(),
            channel_id: self.session.channel_id(),
            position_ms: self.session.position().as_millis() as u64,
            state: self.session.state(),
            effects: self.snapshot(),
            volume: self.session.volume_percent(),
            looping: LoopingState::Off,
            playlist: PlaylistExport::default(),
            stored_playlist: None,
            reason,
            created_at: now_ms(),
        }
    }
}
