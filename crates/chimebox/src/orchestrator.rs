//! Trigger handling, retrying playback and background refresh.
//!
//! Each pool plays at most one sequence at a time. A trigger that arrives
//! while its pool is busy is dropped, not queued.

use chimeconf::ChimeConfig;
use futures::stream::StreamExt;
use futures::FutureExt;
use serde::Serialize;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::error::{ChimeError, Result};
use crate::player::{Player, ProcessPlayer};
use crate::reporter::{PoolState, StateReporter};
use crate::sequence::{build_sequence_provider, SequenceProvider};
use crate::source::{build_chain, SoundSource};
use crate::types::ClipId;
use crate::volume::{VolumeControl, VolumeState, VolumeTarget};

/// How often a failed sequence is retried from its first clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_millis(100),
        }
    }
}

/// Runtime state of one pool.
pub struct PoolRuntime {
    id: String,
    name: String,
    source: Box<dyn SoundSource>,
    sequence: Box<dyn SequenceProvider>,
    clips: RwLock<Vec<ClipId>>,
    playing: AtomicBool,
    available: AtomicBool,
}

impl PoolRuntime {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        source: Box<dyn SoundSource>,
        sequence: Box<dyn SequenceProvider>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            source,
            sequence,
            clips: RwLock::new(Vec::new()),
            playing: AtomicBool::new(false),
            available: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    /// True once a listing has succeeded.
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    pub fn clips(&self) -> Vec<ClipId> {
        self.clips
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Re-list, fill the cache and hand the listing to the sequence provider.
    ///
    /// On failure the previous listing stays in effect.
    pub async fn refresh(&self) -> Result<usize> {
        let started = Instant::now();
        let clips = self.source.list_clips().await?;
        if clips.is_empty() {
            return Err(ChimeError::EmptyPool);
        }

        self.source.populate(&clips).await?;
        self.sequence.set_clips(&clips)?;

        let count = clips.len();
        *self.clips.write().unwrap_or_else(PoisonError::into_inner) = clips;
        self.available.store(true, Ordering::SeqCst);

        tracing::info!(
            pool = %self.id,
            clips = count,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "pool refreshed"
        );
        Ok(count)
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            identifier: self.id.clone(),
            name: self.name.clone(),
            sequence: self.sequence.name().to_string(),
            source: self.source.describe(),
            state: if self.is_playing() {
                PoolState::On
            } else {
                PoolState::Off
            },
            available: self.is_available(),
            clips: self.clips.read().unwrap_or_else(PoisonError::into_inner).len(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolSnapshot {
    pub identifier: String,
    pub name: String,
    pub sequence: String,
    pub source: String,
    pub state: PoolState,
    pub available: bool,
    pub clips: usize,
}

/// Result of one refresh pass over every pool.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RefreshSummary {
    pub refreshed: Vec<String>,
    pub failed: BTreeMap<String, String>,
}

pub enum TriggerOutcome {
    /// Playback task spawned; the handle resolves after the "off" report.
    Started(JoinHandle<()>),
    AlreadyPlaying,
}

/// Clears the playing flag however the playback task ends.
struct PlayingGuard(Arc<PoolRuntime>);

impl Drop for PlayingGuard {
    fn drop(&mut self) {
        self.0.playing.store(false, Ordering::SeqCst);
    }
}

pub struct Orchestrator {
    pools: BTreeMap<String, Arc<PoolRuntime>>,
    player: Arc<dyn Player>,
    reporter: Arc<dyn StateReporter>,
    volume: Arc<VolumeControl>,
    retry: RetryPolicy,
    tasks: TaskTracker,
}

impl Orchestrator {
    pub fn new(
        pools: Vec<PoolRuntime>,
        player: Arc<dyn Player>,
        reporter: Arc<dyn StateReporter>,
        volume: Arc<VolumeControl>,
    ) -> Self {
        Self {
            pools: pools
                .into_iter()
                .map(|pool| (pool.id.clone(), Arc::new(pool)))
                .collect(),
            player,
            reporter,
            volume,
            retry: RetryPolicy::default(),
            tasks: TaskTracker::new(),
        }
    }

    /// Build every pool's chain and sequence provider. Any malformed pool
    /// fails the whole setup.
    pub fn from_config(config: &ChimeConfig, reporter: Arc<dyn StateReporter>) -> Result<Self> {
        let mut pools = Vec::with_capacity(config.pools.len());
        for pool in &config.pools {
            let source = build_chain(pool, &config.infra.tools, &config.infra.refresh)?;
            let sequence = build_sequence_provider(&pool.sequence)?;
            pools.push(PoolRuntime::new(&pool.identifier, &pool.name, source, sequence));
        }

        let volume = Arc::new(VolumeControl::new(
            &config.volume,
            config.pools.iter().map(|p| p.identifier.clone()),
        ));
        let player = Arc::new(ProcessPlayer::from_config(&config.infra.tools));

        Ok(Self::new(pools, player, reporter, volume))
    }

    pub fn pool(&self, id: &str) -> Option<&Arc<PoolRuntime>> {
        self.pools.get(id)
    }

    pub fn snapshots(&self) -> Vec<PoolSnapshot> {
        self.pools.values().map(|pool| pool.snapshot()).collect()
    }

    pub fn volume(&self) -> &VolumeControl {
        &self.volume
    }

    /// Start playback for `pool_id` unless it is already playing.
    ///
    /// Must be called from within the runtime; playback continues on a
    /// tracked task.
    pub fn on_trigger(&self, pool_id: &str) -> Result<TriggerOutcome> {
        let pool = self
            .pools
            .get(pool_id)
            .ok_or_else(|| ChimeError::UnknownPool(pool_id.to_string()))?;

        if !pool.is_available() {
            return Err(ChimeError::PoolUnavailable(pool_id.to_string()));
        }

        if pool
            .playing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::info!(pool = %pool_id, "already playing, trigger ignored");
            return Ok(TriggerOutcome::AlreadyPlaying);
        }

        let guard = PlayingGuard(pool.clone());
        let player = self.player.clone();
        let reporter = self.reporter.clone();
        let volume = self.volume.clone();
        let retry = self.retry;

        let handle = self.tasks.spawn(async move {
            let pool = guard.0.clone();
            reporter.report_state(pool.id(), PoolState::On).await;

            let started = Instant::now();
            let outcome = AssertUnwindSafe(play_with_retry(&pool, player.as_ref(), &volume, retry))
                .catch_unwind()
                .await;

            match outcome {
                Ok(Ok(attempts)) => tracing::info!(
                    pool = %pool.id(),
                    attempts,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "playback finished"
                ),
                Ok(Err(e)) => tracing::error!(pool = %pool.id(), error = %e, "playback failed"),
                Err(_) => tracing::error!(pool = %pool.id(), "playback panicked"),
            }

            reporter.report_state(pool.id(), PoolState::Off).await;
            drop(guard);
        });

        Ok(TriggerOutcome::Started(handle))
    }

    pub async fn on_volume_set(&self, target: VolumeTarget, percent: u32) -> Result<VolumeState> {
        let state = self.volume.set_percent(&target, percent)?;
        self.reporter.report_volume(&target, state).await;
        Ok(state)
    }

    pub async fn on_mute_set(&self, target: VolumeTarget, muted: bool) -> Result<VolumeState> {
        let state = self.volume.set_muted(&target, muted)?;
        self.reporter.report_volume(&target, state).await;
        Ok(state)
    }

    /// Publish the idle state of every pool and the starting volume.
    pub async fn report_initial_state(&self) {
        for pool in self.pools.values() {
            self.reporter.report_state(pool.id(), PoolState::Off).await;
        }
        match self.volume.mode() {
            chimeconf::VolumeMode::Device => {
                self.reporter
                    .report_volume(&VolumeTarget::Device, self.volume.device())
                    .await;
            }
            chimeconf::VolumeMode::Pool => {
                for (id, state) in self.volume.pools() {
                    self.reporter.report_volume(&VolumeTarget::Pool(id), state).await;
                }
            }
        }
    }

    /// Refresh every pool in turn. One pool failing does not stop the rest.
    pub async fn refresh_all(&self) -> RefreshSummary {
        let mut summary = RefreshSummary::default();
        for (id, pool) in &self.pools {
            match pool.refresh().await {
                Ok(_) => summary.refreshed.push(id.clone()),
                Err(e) => {
                    tracing::error!(pool = %id, error = %e, "pool refresh failed");
                    summary.failed.insert(id.clone(), e.to_string());
                }
            }
        }
        summary
    }

    /// Re-list every pool each `period` until `cancel` fires.
    pub fn spawn_refresh_loop(
        self: &Arc<Self>,
        period: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let orchestrator = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        tracing::info!("checking for new clips");
                        tokio::select! {
                            summary = orchestrator.refresh_all() => {
                                tracing::debug!(
                                    refreshed = summary.refreshed.len(),
                                    failed = summary.failed.len(),
                                    "refresh pass complete"
                                );
                            }
                            _ = cancel.cancelled() => break,
                        }
                    }
                    _ = cancel.cancelled() => break,
                }
            }
            tracing::info!("refresh loop stopped");
        })
    }

    /// Wait up to `grace` for running playbacks, then release every source.
    pub async fn shutdown(&self, grace: Duration) {
        self.tasks.close();
        if tokio::time::timeout(grace, self.tasks.wait()).await.is_err() {
            tracing::warn!(
                running = self.tasks.len(),
                "playback still running after grace period"
            );
        }

        for pool in self.pools.values() {
            pool.source.close().await;
        }
        tracing::info!("pools closed");
    }
}

/// Play the pool's next sequence, starting over on any failure.
///
/// Every attempt asks the sequence provider again, so a time announcement is
/// recomputed for the moment of the retry. Returns the number of attempts used.
async fn play_with_retry(
    pool: &PoolRuntime,
    player: &dyn Player,
    volume: &VolumeControl,
    retry: RetryPolicy,
) -> Result<u32> {
    let mut attempt = 0;

    loop {
        attempt += 1;

        match play_sequence(pool, player, volume).await {
            Ok(()) => return Ok(attempt),
            Err(e) if attempt < retry.attempts => {
                tracing::warn!(pool = %pool.id(), attempt, error = %e, "playback failed, retrying");
                tokio::time::sleep(retry.backoff).await;
            }
            Err(e) => return Err(e),
        }
    }
}

async fn play_sequence(pool: &PoolRuntime, player: &dyn Player, volume: &VolumeControl) -> Result<()> {
    let mut sequence = pool.sequence.next_sequence()?;

    while let Some(clip) = sequence.next().await {
        let started = Instant::now();
        let audio = pool.source.fetch_clip(&clip).await?;
        tracing::debug!(
            pool = %pool.id(),
            clip = %clip,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "clip fetched"
        );
        player.play(&clip, audio, volume.effective_for(pool.id())).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_retry_policy() {
        let retry = RetryPolicy::default();
        assert_eq!(retry.attempts, 3);
        assert_eq!(retry.backoff, Duration::from_millis(100));
    }
}
