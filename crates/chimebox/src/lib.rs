//! Plays sound pools on command.
//!
//! A pool is a group of clips behind one location (a directory or a WebDAV
//! collection). Each trigger asks the pool's sequence provider which clips
//! to play, fetches them through the pool's provider chain and hands them to
//! an external player.
//!
//! ```text
//! trigger -> Orchestrator -> SequenceProvider -> [cache -> normalize -> source] -> player
//!                  |
//!                  +-> StateReporter ("on" / "off")
//! ```

pub mod error;
pub mod orchestrator;
pub mod player;
pub mod process;
pub mod reporter;
pub mod sequence;
pub mod source;
pub mod telemetry;
pub mod types;
pub mod volume;
pub mod web;

pub use error::{ChimeError, Result};
pub use orchestrator::{
    Orchestrator, PoolRuntime, PoolSnapshot, RefreshSummary, RetryPolicy, TriggerOutcome,
};
pub use player::{Player, ProcessPlayer};
pub use reporter::{PoolState, StateBoard, StateReporter};
pub use sequence::{build_sequence_provider, ClipSequence, SequenceProvider};
pub use source::SoundSource;
pub use types::ClipId;
pub use volume::{VolumeControl, VolumeState, VolumeTarget};
