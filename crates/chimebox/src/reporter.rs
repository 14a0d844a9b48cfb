//! Outbound state reports.
//!
//! Whatever carries triggers in (the HTTP surface here, a message bus
//! elsewhere) implements [`StateReporter`] to learn when pools start and stop
//! playing and when volume changes.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::volume::{VolumeState, VolumeTarget};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolState {
    On,
    Off,
}

impl PoolState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PoolState::On => "on",
            PoolState::Off => "off",
        }
    }
}

impl fmt::Display for PoolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[async_trait]
pub trait StateReporter: Send + Sync {
    async fn report_state(&self, pool: &str, state: PoolState);

    async fn report_volume(&self, target: &VolumeTarget, volume: VolumeState);
}

/// Keeps the latest report per pool and per volume target.
#[derive(Debug, Default)]
pub struct StateBoard {
    states: DashMap<String, PoolState>,
    volumes: DashMap<String, VolumeState>,
}

impl StateBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, pool: &str) -> Option<PoolState> {
        self.states.get(pool).map(|s| *s.value())
    }

    pub fn volume(&self, target: &VolumeTarget) -> Option<VolumeState> {
        self.volumes.get(&target.to_string()).map(|v| *v.value())
    }

    pub fn states(&self) -> Vec<(String, PoolState)> {
        let mut states: Vec<_> = self
            .states
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        states.sort_by(|a, b| a.0.cmp(&b.0));
        states
    }
}

#[async_trait]
impl StateReporter for StateBoard {
    async fn report_state(&self, pool: &str, state: PoolState) {
        let previous = self.states.insert(pool.to_string(), state);
        if previous != Some(state) {
            tracing::info!(pool, state = %state, "pool state");
        }
    }

    async fn report_volume(&self, target: &VolumeTarget, volume: VolumeState) {
        self.volumes.insert(target.to_string(), volume);
        tracing::info!(
            volume_target = %target,
            percent = volume.percent,
            muted = volume.muted,
            "volume state"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_board_keeps_latest() {
        let board = StateBoard::new();

        board.report_state("bell", PoolState::On).await;
        board.report_state("bell", PoolState::Off).await;
        board.report_state("time", PoolState::On).await;
        board
            .report_volume(&VolumeTarget::Device, VolumeState::new(40))
            .await;

        assert_eq!(board.state("bell"), Some(PoolState::Off));
        assert_eq!(
            board.states(),
            vec![
                ("bell".to_string(), PoolState::Off),
                ("time".to_string(), PoolState::On)
            ]
        );
        assert_eq!(board.volume(&VolumeTarget::Device).map(|v| v.percent), Some(40));
        assert_eq!(board.state("other"), None);
    }

    #[test]
    fn test_state_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&PoolState::On).unwrap(), "\"on\"");
    }
}
