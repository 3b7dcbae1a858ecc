// Error types shared by the store layer and the audio handle.
//
// Store errors never reach the UI: the service catches them, logs them and
// falls back to local data. Playback errors only ever force the player back
// into the paused state.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("backend request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("backend is not configured")]
    NotConfigured,

    #[error("local store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlaybackError {
    #[error("no audio output device available")]
    NoDevice,

    #[error("no audio source assigned")]
    NoSource,

    #[error("failed to load audio: {0}")]
    Load(String),

    #[error("audio decode failed: {0}")]
    Decode(String),

    #[error("playback rejected: {0}")]
    Rejected(String),
}

pub type StoreResult<T> = Result<T, StoreError>;
