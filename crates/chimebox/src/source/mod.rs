//! Sound sources and the filters that wrap them.
//!
//! A pool's provider chain is built from the innermost source outwards:
//!
//! ```text
//! CachingFilter -> NormalizingFilter -> FileSource | WebDavSource
//! ```
//!
//! Every stage implements [`SoundSource`], so the orchestrator never needs to
//! know which stages a pool was configured with.

pub mod cache;
pub mod factory;
pub mod file;
pub mod normalize;
pub mod webdav;

pub use cache::CachingFilter;
pub use factory::build_chain;
pub use file::FileSource;
pub use normalize::{NormalizingFilter, Transcoder};
pub use webdav::WebDavSource;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;
use crate::types::ClipId;

#[async_trait]
pub trait SoundSource: Send + Sync {
    /// Enumerate every clip at the configured location.
    async fn list_clips(&self) -> Result<Vec<ClipId>>;

    /// Retrieve the encoded bytes of one clip.
    async fn fetch_clip(&self, clip: &ClipId) -> Result<Bytes>;

    /// Prepare to serve `clips`. Only caching stages do real work here;
    /// filters forward to their inner stage.
    async fn populate(&self, _clips: &[ClipId]) -> Result<()> {
        Ok(())
    }

    /// Release held handles. Called once at pool teardown.
    async fn close(&self) {}

    /// Short label for logs.
    fn describe(&self) -> String;
}
