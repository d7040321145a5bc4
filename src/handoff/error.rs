// ABOUTME: Error types for the cross-window credential handoff

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HandoffError {
    #[error("no acknowledgment after {attempts} credential posts")]
    Exhausted { attempts: u32 },

    #[error("no credentials received within {0:?}")]
    TimedOut(Duration),

    #[error("opener window went away")]
    PeerClosed,

    #[error("failed to open session window: {0}")]
    Launch(String),

    #[error("malformed handoff message: {0}")]
    Message(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
