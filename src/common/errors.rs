use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::types::AnyError;

/// Exception severity levels reported by the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Severity {
    Common,
    Suspicious,
    Fault,
}

/// Broad classes of [`PlayerError`], for callers that only care about the category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A capacity limit was hit (effects or queue).
    Usage,
    /// Nothing could be resolved.
    NotFound,
    /// The session was already destroyed.
    State,
    /// The node could not be reached.
    Connectivity,
    /// The caller cancelled before the operation started.
    Cancelled,
}

/// Errors surfaced by the player runtime.
///
/// Load failures, stuck tracks and mid-play exceptions never show up here;
/// they are absorbed by the queue's recovery policy.
#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("effect limit reached: at most {limit} effects can be active at once")]
    EffectLimit { limit: usize },

    #[error("queue is full: at most {limit} tracks can be queued")]
    QueueFull { limit: usize },

    #[error("no tracks found")]
    NotFound,

    #[error("player has been destroyed")]
    Destroyed,

    #[error("audio node unreachable: {0}")]
    Connectivity(#[source] AnyError),

    #[error("operation cancelled")]
    Cancelled,
}

impl PlayerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::EffectLimit { .. } | Self::QueueFull { .. } => ErrorKind::Usage,
            Self::NotFound => ErrorKind::NotFound,
            Self::Destroyed => ErrorKind::State,
            Self::Connectivity(_) => ErrorKind::Connectivity,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }
}

pub type PlayerResult<T> = std::result::Result<T, PlayerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(PlayerError::EffectLimit { limit: 5 }.kind(), ErrorKind::Usage);
        assert_eq!(PlayerError::QueueFull { limit: 10 }.kind(), ErrorKind::Usage);
        assert_eq!(PlayerError::NotFound.kind(), ErrorKind::NotFound);
        assert_eq!(PlayerError::Destroyed.kind(), ErrorKind::State);
        assert_eq!(
            PlayerError::Connectivity("refused".into()).kind(),
            ErrorKind::Connectivity
        );
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            PlayerError::EffectLimit { limit: 5 }.to_string(),
            "effect limit reached: at most 5 effects can be active at once"
        );
        assert_eq!(
            PlayerError::Connectivity("connection refused".into()).to_string(),
            "audio node unreachable: connection refused"
        );
    }
}
