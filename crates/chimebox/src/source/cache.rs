//! In-memory clip cache in front of a source chain.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tokio::sync::Mutex;

use super::SoundSource;
use crate::error::Result;
use crate::types::ClipId;

/// Default parallel fetches while populating.
pub const DEFAULT_POPULATE_CONCURRENCY: usize = 8;

/// Serves clips from memory once populated.
///
/// Entries are never evicted: a clip removed from the location stays cached
/// until the pool is dropped.
pub struct CachingFilter {
    inner: Box<dyn SoundSource>,
    entries: DashMap<ClipId, Bytes>,
    /// One lock per clip so the inner chain never fetches the same id twice
    /// at once.
    loading: DashMap<ClipId, Arc<Mutex<()>>>,
    concurrency: usize,
}

impl CachingFilter {
    pub fn new(inner: Box<dyn SoundSource>, concurrency: usize) -> Self {
        Self {
            inner,
            entries: DashMap::new(),
            loading: DashMap::new(),
            concurrency: concurrency.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, clip: &ClipId) -> bool {
        self.entries.contains_key(clip)
    }

    fn cached(&self, clip: &ClipId) -> Option<Bytes> {
        self.entries.get(clip).map(|entry| entry.value().clone())
    }

    /// Fetch through the inner chain unless another task already stored it.
    async fn load(&self, clip: &ClipId) -> Result<Bytes> {
        let lock = self
            .loading
            .entry(clip.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let result = {
            let _guard = lock.lock().await;
            match self.cached(clip) {
                Some(bytes) => Ok(bytes),
                None => self.fetch_and_store(clip).await,
            }
        };

        // a later loader may already have installed a fresh lock
        self.loading
            .remove_if(clip, |_, current| Arc::ptr_eq(current, &lock));
        result
    }

    async fn fetch_and_store(&self, clip: &ClipId) -> Result<Bytes> {
        let bytes = self.inner.fetch_clip(clip).await?;
        self.entries.insert(clip.clone(), bytes.clone());
        Ok(bytes)
    }
}

#[async_trait]
impl SoundSource for CachingFilter {
    async fn list_clips(&self) -> Result<Vec<ClipId>> {
        self.inner.list_clips().await
    }

    async fn fetch_clip(&self, clip: &ClipId) -> Result<Bytes> {
        if let Some(bytes) = self.cached(clip) {
            return Ok(bytes);
        }

        tracing::warn!(clip = %clip, "cache miss, clip was not populated for the current listing");
        self.load(clip).await
    }

    async fn populate(&self, clips: &[ClipId]) -> Result<()> {
        self.inner.populate(clips).await?;

        let missing: Vec<ClipId> = clips
            .iter()
            .filter(|c| !self.contains(c))
            .cloned()
            .collect();
        if missing.is_empty() {
            return Ok(());
        }

        tracing::info!(
            source = %self.inner.describe(),
            missing = missing.len(),
            total = clips.len(),
            "populating clip cache"
        );

        let failures = stream::iter(missing)
            .map(|clip| async move {
                let result = self.load(&clip).await;
                (clip, result)
            })
            .buffer_unordered(self.concurrency)
            .filter_map(|(clip, result)| async move {
                match result {
                    Ok(_) => None,
                    Err(e) => {
                        tracing::error!(clip = %clip, error = %e, "failed to cache clip");
                        Some(clip)
                    }
                }
            })
            .count()
            .await;

        tracing::info!(cached = self.len(), failures, "clip cache populated");
        Ok(())
    }

    async fn close(&self) {
        self.inner.close().await;
        self.entries.clear();
        self.loading.clear();
    }

    fn describe(&self) -> String {
        format!("cache({})", self.inner.describe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChimeError;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct CountingSource {
        fetches: Arc<AtomicUsize>,
        broken: HashSet<String>,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl SoundSource for CountingSource {
        async fn list_clips(&self) -> Result<Vec<ClipId>> {
            Ok(vec![ClipId::new("a"), ClipId::new("b")])
        }

        async fn fetch_clip(&self, clip: &ClipId) -> Result<Bytes> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.broken.contains(clip.as_str()) {
                return Err(ChimeError::fetch(clip.as_str(), "broken"));
            }
            Ok(Bytes::from(format!("bytes of {clip}")))
        }

        fn describe(&self) -> String {
            "counting".to_string()
        }
    }

    fn ids(names: &[&str]) -> Vec<ClipId> {
        names.iter().map(|n| ClipId::new(*n)).collect()
    }

    #[tokio::test]
    async fn test_populated_clips_never_hit_inner_again() {
        let fetches = Arc::new(AtomicUsize::new(0));
        let cache = CachingFilter::new(
            Box::new(CountingSource {
                fetches: fetches.clone(),
                ..Default::default()
            }),
            DEFAULT_POPULATE_CONCURRENCY,
        );
        let clips = ids(&["a", "b", "c", "d", "e"]);

        cache.populate(&clips).await.unwrap();
        let after_populate = fetches.load(Ordering::SeqCst);
        assert_eq!(after_populate, 5);
        assert!(cache.loading.is_empty());

        for clip in &clips {
            let bytes = cache.fetch_clip(clip).await.unwrap();
            assert_eq!(bytes, Bytes::from(format!("bytes of {clip}")));
        }
        assert_eq!(fetches.load(Ordering::SeqCst), after_populate);
    }

    #[tokio::test]
    async fn test_populate_skips_failures_and_cached_entries() {
        let fetches = Arc::new(AtomicUsize::new(0));
        let cache = CachingFilter::new(
            Box::new(CountingSource {
                fetches: fetches.clone(),
                broken: HashSet::from(["b".to_string()]),
                delay: None,
            }),
            2,
        );

        cache.populate(&ids(&["a", "b", "c"])).await.unwrap();
        assert_eq!(cache.len(), 2);
        assert!(!cache.contains(&ClipId::new("b")));

        // only the failed clip is retried
        cache.populate(&ids(&["a", "b", "c"])).await.unwrap();
        assert_eq!(fetches.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_miss_fetches_and_stores() {
        let fetches = Arc::new(AtomicUsize::new(0));
        let cache = CachingFilter::new(
            Box::new(CountingSource {
                fetches: fetches.clone(),
                ..Default::default()
            }),
            4,
        );

        let clip = ClipId::new("late");
        cache.fetch_clip(&clip).await.unwrap();
        cache.fetch_clip(&clip).await.unwrap();

        assert_eq!(fetches.load(Ordering::SeqCst), 1);
        assert!(cache.contains(&clip));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_misses_fetch_once() {
        let fetches = Arc::new(AtomicUsize::new(0));
        let cache = Arc::new(CachingFilter::new(
            Box::new(CountingSource {
                fetches: fetches.clone(),
                broken: HashSet::new(),
                delay: Some(Duration::from_millis(50)),
            }),
            4,
        ));
        let clip = ClipId::new("shared");

        let (a, b) = tokio::join!(cache.fetch_clip(&clip), cache.fetch_clip(&clip));

        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
        assert!(cache.loading.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_error_is_not_cached() {
        let cache = CachingFilter::new(
            Box::new(CountingSource {
                broken: HashSet::from(["x".to_string()]),
                ..Default::default()
            }),
            1,
        );

        let err = cache.fetch_clip(&ClipId::new("x")).await.unwrap_err();
        assert!(matches!(err, ChimeError::Fetch { .. }));
        assert!(cache.is_empty());
        assert!(cache.loading.is_empty());
    }
}
