//! Strategies choosing which clips one trigger plays.

pub mod queue_random;
pub mod time_announcement;

pub use queue_random::QueueRandom;
pub use time_announcement::{Clock, LocalClock, TimeAnnouncement};

use futures::stream::BoxStream;
use std::sync::Arc;

use crate::error::{ChimeError, Result};
use crate::types::ClipId;

/// Clips for one trigger, in play order. May pause between items.
pub type ClipSequence = BoxStream<'static, ClipId>;

pub trait SequenceProvider: Send + Sync {
    /// Strategy name as written in pool configuration.
    fn name(&self) -> &'static str;

    /// Replace the working clip list with a fresh listing.
    fn set_clips(&self, clips: &[ClipId]) -> Result<()>;

    /// Sequence for the next trigger. Consumed once.
    fn next_sequence(&self) -> Result<ClipSequence>;
}

/// Look up a strategy by its configured name.
pub fn build_sequence_provider(name: &str) -> Result<Box<dyn SequenceProvider>> {
    match name {
        QueueRandom::NAME => Ok(Box::new(QueueRandom::new())),
        TimeAnnouncement::NAME => Ok(Box::new(TimeAnnouncement::new(Arc::new(LocalClock)))),
        other => Err(ChimeError::Configuration(format!(
            "unknown sequence strategy {other:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_by_name() {
        assert_eq!(build_sequence_provider("QueueRandom").unwrap().name(), "QueueRandom");
        assert_eq!(build_sequence_provider("Zeitansage").unwrap().name(), "Zeitansage");
        assert!(matches!(
            build_sequence_provider("Shuffle"),
            Err(ChimeError::Configuration(_))
        ));
    }
}
