use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PlayerConfig {
    /// Volume a fresh session starts with, on the 0-200 percent scale.
    #[serde(default = "default_volume")]
    pub default_volume: u16,
    /// Consecutive load failures tolerated before the session is moved to
    /// another node.
    #[serde(default = "default_migrate_after_failures")]
    pub migrate_after_failures: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct QueueConfig {
    #[serde(default = "default_max_tracks")]
    pub max_tracks: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EffectsConfig {
    #[serde(default = "default_max_active")]
    pub max_active: usize,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            default_volume: default_volume(),
            migrate_after_failures: default_migrate_after_failures(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_tracks: default_max_tracks(),
        }
    }
}

impl Default for EffectsConfig {
    fn default() -> Self {
        Self {
            max_active: default_max_active(),
        }
    }
}

fn default_volume() -> u16 {
    100
}

fn default_migrate_after_failures() -> u32 {
    2
}

fn default_max_tracks() -> usize {
    1000
}

fn default_max_active() -> usize {
    5
}
