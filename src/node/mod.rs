use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use rand::seq::SliceRandom;

use crate::{
    common::types::{AnyResult, GuildId},
    protocol::PlayerUpdate,
};

/// A remote audio node hosting players.
///
/// Only the request side of the node protocol lives here; events come back
/// through [`crate::queue::QueuePlayer::handle_message`].
#[async_trait]
pub trait AudioNode: Send + Sync {
    fn name(&self) -> &str;

    /// Whether the node's event channel is currently up.
    fn is_connected(&self) -> bool;

    async fn update_player(&self, guild_id: &GuildId, update: PlayerUpdate) -> AnyResult<()>;

    async fn destroy_player(&self, guild_id: &GuildId) -> AnyResult<()>;
}

/// Nodes a session may be moved to.
pub trait NodePool: Send + Sync {
    fn nodes(&self) -> Vec<Arc<dyn AudioNode>>;

    /// Picks any connected node other than `current`, at random.
    fn pick_alternate(&self, current: &str) -> Option<Arc<dyn AudioNode>> {
        let candidates: Vec<Arc<dyn AudioNode>> = self
            .nodes()
            .into_iter()
            .filter(|n| n.name() != current && n.is_connected())
            .collect();
        candidates.choose(&mut rand::thread_rng()).cloned()
    }
}

/// A [`NodePool`] over a fixed, name-keyed set of nodes.
#[derive(Default)]
pub struct StaticNodePool {
    nodes: DashMap<String, Arc<dyn AudioNode>>,
}

impl StaticNodePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, node: Arc<dyn AudioNode>) {
        tracing::debug!("Registered node {}", node.name());
        self.nodes.insert(node.name().to_string(), node);
    }

    pub fn remove(&self, name: &str) -> Option<Arc<dyn AudioNode>> {
        self.nodes.remove(name).map(|(_, node)| node)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn AudioNode>> {
        self.nodes.get(name).map(|n| n.value().clone())
    }
}

impl NodePool for StaticNodePool {
    fn nodes(&self) -> Vec<Arc<dyn AudioNode>> {
        self.nodes.iter().map(|n| n.value().clone()).collect()
    }
}
