//! Fakes for the player's collaborators.

use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::{
    common::types::{AnyResult, ChannelId, GuildId},
    configs::{Config, PlayerConfig},
    history::{HistoryEntry, HistorySink},
    host::{SessionHost, SnapshotStore, VoiceTransport},
    node::{AudioNode, StaticNodePool},
    player::{PlayerSession, Prefetch, QueueItem},
    protocol::{PlayerUpdate, Track, TrackEncoded, TrackInfo},
    queue::{Collaborators, PlayerSnapshot, PlaylistExport, QueuePlayer, TrackResolver},
};

pub fn track(id: &str, length_ms: u64) -> Track {
    Track::new(TrackInfo {
        identifier: id.to_string(),
        is_seekable: true,
        author: "tester".to_string(),
        length: length_ms,
        title: id.to_string(),
        source_name: "http".to_string(),
        ..TrackInfo::default()
    })
}

pub struct MockNode {
    name: String,
    connected: AtomicBool,
    fail_updates: AtomicBool,
    fail_destroy: AtomicBool,
    updates: Mutex<Vec<PlayerUpdate>>,
    destroys: AtomicUsize,
}

impl MockNode {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            connected: AtomicBool::new(true),
            fail_updates: AtomicBool::new(false),
            fail_destroy: AtomicBool::new(false),
            updates: Mutex::new(Vec::new()),
            destroys: AtomicUsize::new(0),
        })
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }

    pub fn fail_destroy(&self, fail: bool) {
        self.fail_destroy.store(fail, Ordering::SeqCst);
    }

    pub fn updates(&self) -> Vec<PlayerUpdate> {
        self.updates.lock().clone()
    }

    /// Identifiers of every track the node was told to play, in order.
    pub fn played(&self) -> Vec<String> {
        self.updates()
            .into_iter()
            .filter_map(|update| {
                let track = update.track?;
                match (track.identifier, track.encoded) {
                    (Some(identifier), _) => Some(identifier),
                    (None, Some(TrackEncoded::Set(encoded))) => {
                        Track::decode(&encoded).map(|t| t.info.identifier)
                    }
                    _ => None,
                }
            })
            .collect()
    }

    pub fn destroy_count(&self) -> usize {
        self.destroys.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AudioNode for MockNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn update_player(&self, _guild_id: &GuildId, update: PlayerUpdate) -> AnyResult<()> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err("node unreachable".into());
        }
        self.updates.lock().push(update);
        Ok(())
    }

    async fn destroy_player(&self, _guild_id: &GuildId) -> AnyResult<()> {
        self.destroys.fetch_add(1, Ordering::SeqCst);
        if self.fail_destroy.load(Ordering::SeqCst) {
            return Err("node unreachable".into());
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MockVoice {
    disconnects: AtomicUsize,
}

impl MockVoice {
    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VoiceTransport for MockVoice {
    async fn disconnect(&self, _guild_id: &GuildId) -> AnyResult<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct MockHost {
    restarts: Mutex<Vec<(GuildId, Option<ChannelId>)>>,
}

impl MockHost {
    pub fn restarts(&self) -> Vec<(GuildId, Option<ChannelId>)> {
        self.restarts.lock().clone()
    }
}

impl SessionHost for MockHost {
    fn request_restart(&self, guild_id: &GuildId, channel_id: Option<ChannelId>) {
        self.restarts.lock().push((guild_id.clone(), channel_id));
    }
}

#[derive(Default)]
pub struct MemoryStore {
    playlists: Mutex<Vec<PlaylistExport>>,
    snapshots: Mutex<Vec<PlayerSnapshot>>,
}

impl MemoryStore {
    pub fn snapshots(&self) -> Vec<PlayerSnapshot> {
        self.snapshots.lock().clone()
    }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn store_playlist(
        &self,
        _guild_id: &GuildId,
        playlist: &PlaylistExport,
    ) -> AnyResult<String> {
        let mut playlists = self.playlists.lock();
        playlists.push(playlist.clone());
        Ok(format!("playlist-{}", playlists.len()))
    }

    async fn save_snapshot(&self, snapshot: &PlayerSnapshot) -> AnyResult<()> {
        self.snapshots.lock().push(snapshot.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingHistory {
    entries: Mutex<Vec<HistoryEntry>>,
}

impl RecordingHistory {
    pub fn entries(&self) -> Vec<HistoryEntry> {
        self.entries.lock().clone()
    }
}

impl HistorySink for RecordingHistory {
    fn record(&self, _guild_id: &GuildId, entry: HistoryEntry) {
        self.entries.lock().push(entry);
    }
}

/// Resolves to a fixed list of tracks, or fails.
pub struct StaticResolver {
    ids: Option<Vec<String>>,
}

impl StaticResolver {
    pub fn boxed(ids: &[&str]) -> Box<dyn TrackResolver> {
        Box::new(Self {
            ids: Some(ids.iter().map(|id| id.to_string()).collect()),
        })
    }

    pub fn failing() -> Box<dyn TrackResolver> {
        Box::new(Self { ids: None })
    }
}

#[async_trait]
impl TrackResolver for StaticResolver {
    async fn resolve(&self) -> AnyResult<Vec<QueueItem>> {
        let ids = self.ids.as_ref().ok_or("no matches")?;
        Ok(ids
            .iter()
            .map(|id| QueueItem::from_track(track(id, 60_000)))
            .collect())
    }
}

/// Like [`StaticResolver`], but yields to the runtime before every track.
pub struct YieldingResolver {
    ids: Vec<String>,
}

impl YieldingResolver {
    pub fn boxed(ids: &[&str]) -> Box<dyn TrackResolver> {
        Box::new(Self {
            ids: ids.iter().map(|id| id.to_string()).collect(),
        })
    }
}

#[async_trait]
impl TrackResolver for YieldingResolver {
    async fn resolve(&self) -> AnyResult<Vec<QueueItem>> {
        let mut items = Vec::with_capacity(self.ids.len());
        for id in &self.ids {
            tokio::task::yield_now().await;
            items.push(QueueItem::from_track(track(id, 60_000)));
        }
        Ok(items)
    }
}

#[derive(Default)]
pub struct CountingPrefetch {
    count: AtomicUsize,
    done: Notify,
}

impl CountingPrefetch {
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub async fn wait(&self) {
        if self.count() == 0 {
            self.done.notified().await;
        }
    }
}

#[async_trait]
impl Prefetch for CountingPrefetch {
    async fn prefetch(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
        self.done.notify_one();
    }
}

/// A session on `node` for guild "1" in channel 1.
pub fn session_on(node: Arc<MockNode>) -> (Arc<PlayerSession>, Arc<MockVoice>) {
    let voice = Arc::new(MockVoice::default());
    let session = PlayerSession::new(
        GuildId::from("1"),
        ChannelId(1),
        node,
        voice.clone(),
        &PlayerConfig::default(),
    );
    (session, voice)
}

/// A queue player on node "main" with every collaborator faked.
pub struct Harness {
    pub player: Arc<QueuePlayer>,
    pub node: Arc<MockNode>,
    pub pool: Arc<StaticNodePool>,
    pub host: Arc<MockHost>,
    pub store: Arc<MemoryStore>,
    pub history: Arc<RecordingHistory>,
}

impl Harness {
    pub fn new(max_tracks: usize) -> Self {
        let node = MockNode::new("main");
        let pool = Arc::new(StaticNodePool::new());
        pool.register(node.clone());
        let host = Arc::new(MockHost::default());
        let store = Arc::new(MemoryStore::default());
        let history = Arc::new(RecordingHistory::default());

        let mut config = Config::default();
        config.queue.max_tracks = max_tracks;
        let player = QueuePlayer::new(
            GuildId::from("1"),
            ChannelId(1),
            node.clone(),
            &config,
            Collaborators {
                pool: pool.clone(),
                voice: Arc::new(MockVoice::default()),
                host: host.clone(),
                store: store.clone(),
                history: history.clone(),
            },
        );

        Self {
            player,
            node,
            pool,
            host,
            store,
            history,
        }
    }
}
