//! Error kinds shared by sources, sequence providers and playback.

use thiserror::Error;

pub type Result<T, E = ChimeError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ChimeError {
    /// Source location unreachable, or nothing playable found there.
    #[error("listing {location} failed: {reason}")]
    Listing {
        location: String,
        reason: String,
        status: Option<u16>,
    },

    /// Clip missing or its transfer failed.
    #[error("fetching clip {clip} failed: {reason}")]
    Fetch {
        clip: String,
        reason: String,
        status: Option<u16>,
    },

    /// Transcoder exited non-zero or could not run.
    #[error("processing failed: {0}")]
    Processing(String),

    /// Player exited non-zero or reported an open failure.
    #[error("playback failed: {0}")]
    Playback(String),

    #[error("no clips available")]
    EmptyPool,

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("unknown pool {0}")]
    UnknownPool(String),

    /// Pool is configured but has no successful listing yet.
    #[error("pool {0} is unavailable")]
    PoolUnavailable(String),

    #[error("volume {0} out of range 0-100")]
    InvalidVolume(u32),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ChimeError {
    pub fn listing(location: impl Into<String>, reason: impl ToString) -> Self {
        ChimeError::Listing {
            location: location.into(),
            reason: reason.to_string(),
            status: None,
        }
    }

    pub fn fetch(clip: impl Into<String>, reason: impl ToString) -> Self {
        ChimeError::Fetch {
            clip: clip.into(),
            reason: reason.to_string(),
            status: None,
        }
    }

    /// HTTP status carried by a remote failure, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            ChimeError::Listing { status, .. } | ChimeError::Fetch { status, .. } => *status,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_only_on_remote_errors() {
        let err = ChimeError::Fetch {
            clip: "/a.mp3".to_string(),
            reason: "HTTP 404".to_string(),
            status: Some(404),
        };
        assert_eq!(err.status(), Some(404));
        assert_eq!(ChimeError::EmptyPool.status(), None);
        assert_eq!(ChimeError::fetch("/b.mp3", "gone").status(), None);
    }
}
