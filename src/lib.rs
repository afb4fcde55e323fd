pub mod common;
pub mod configs;
pub mod effects;
pub mod history;
pub mod host;
pub mod node;
pub mod player;
pub mod protocol;
pub mod queue;

#[cfg(test)]
pub(crate) mod testing;

pub use common::{ErrorKind, PlayerError, PlayerResult};
pub use configs::Config;
pub use queue::{Collaborators, QueuePlayer};
