//! Runtime volume state, per device or per pool.

use chimeconf::{VolumeConfig, VolumeMode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, PoisonError};

use crate::error::{ChimeError, Result};

/// Stored level plus a mute overlay; unmuting restores `percent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeState {
    pub percent: u8,
    pub muted: bool,
}

impl VolumeState {
    pub fn new(percent: u8) -> Self {
        Self {
            percent: percent.min(100),
            muted: false,
        }
    }

    /// Level handed to the player.
    pub fn effective(&self) -> u8 {
        if self.muted {
            0
        } else {
            self.percent
        }
    }
}

/// Which volume a change applies to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VolumeTarget {
    Device,
    Pool(String),
}

impl fmt::Display for VolumeTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VolumeTarget::Device => f.write_str("device"),
            VolumeTarget::Pool(id) => write!(f, "pool {id}"),
        }
    }
}

pub struct VolumeControl {
    mode: VolumeMode,
    device: Mutex<VolumeState>,
    pools: Mutex<HashMap<String, VolumeState>>,
}

impl VolumeControl {
    pub fn new<I, S>(config: &VolumeConfig, pool_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let initial = VolumeState::new(config.default_percent);
        let pools = match config.mode {
            VolumeMode::Pool => pool_ids.into_iter().map(|id| (id.into(), initial)).collect(),
            VolumeMode::Device => HashMap::new(),
        };

        Self {
            mode: config.mode,
            device: Mutex::new(initial),
            pools: Mutex::new(pools),
        }
    }

    pub fn mode(&self) -> VolumeMode {
        self.mode
    }

    /// Volume the player should use for `pool`.
    pub fn effective_for(&self, pool: &str) -> u8 {
        match self.mode {
            VolumeMode::Device => self.device().effective(),
            VolumeMode::Pool => self
                .pools
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get(pool)
                .map(VolumeState::effective)
                .unwrap_or(0),
        }
    }

    pub fn device(&self) -> VolumeState {
        *self.device.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, target: &VolumeTarget) -> Result<VolumeState> {
        self.check_mode(target)?;
        match target {
            VolumeTarget::Device => Ok(self.device()),
            VolumeTarget::Pool(id) => self
                .pools
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get(id)
                .copied()
                .ok_or_else(|| ChimeError::UnknownPool(id.clone())),
        }
    }

    /// Every pool's state, empty in device mode.
    pub fn pools(&self) -> HashMap<String, VolumeState> {
        self.pools
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_percent(&self, target: &VolumeTarget, percent: u32) -> Result<VolumeState> {
        let percent = u8::try_from(percent)
            .ok()
            .filter(|p| *p <= 100)
            .ok_or(ChimeError::InvalidVolume(percent))?;
        self.update(target, |state| state.percent = percent)
    }

    pub fn set_muted(&self, target: &VolumeTarget, muted: bool) -> Result<VolumeState> {
        self.update(target, |state| state.muted = muted)
    }

    fn update(
        &self,
        target: &VolumeTarget,
        change: impl FnOnce(&mut VolumeState),
    ) -> Result<VolumeState> {
        self.check_mode(target)?;
        let updated = match target {
            VolumeTarget::Device => {
                let mut state = self.device.lock().unwrap_or_else(PoisonError::into_inner);
                change(&mut state);
                *state
            }
            VolumeTarget::Pool(id) => {
                let mut pools = self.pools.lock().unwrap_or_else(PoisonError::into_inner);
                let state = pools
                    .get_mut(id)
                    .ok_or_else(|| ChimeError::UnknownPool(id.clone()))?;
                change(state);
                *state
            }
        };

        tracing::info!(
            volume_target = %target,
            percent = updated.percent,
            muted = updated.muted,
            "volume changed"
        );
        Ok(updated)
    }

    fn check_mode(&self, target: &VolumeTarget) -> Result<()> {
        match (self.mode, target) {
            (VolumeMode::Device, VolumeTarget::Device)
            | (VolumeMode::Pool, VolumeTarget::Pool(_)) => Ok(()),
            (mode, target) => Err(ChimeError::Configuration(format!(
                "volume for {target} cannot be set in {} mode",
                mode.as_str()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(mode: VolumeMode) -> VolumeConfig {
        VolumeConfig {
            mode,
            default_percent: 60,
        }
    }

    #[test]
    fn test_mute_overlays_percent() {
        let volume = VolumeControl::new(&config(VolumeMode::Device), ["a"]);

        volume.set_percent(&VolumeTarget::Device, 35).unwrap();
        volume.set_muted(&VolumeTarget::Device, true).unwrap();
        assert_eq!(volume.effective_for("a"), 0);
        assert_eq!(volume.device().percent, 35);

        volume.set_muted(&VolumeTarget::Device, false).unwrap();
        assert_eq!(volume.effective_for("a"), 35);
    }

    #[test]
    fn test_out_of_range_rejected() {
        let volume = VolumeControl::new(&config(VolumeMode::Device), Vec::<String>::new());

        assert!(matches!(
            volume.set_percent(&VolumeTarget::Device, 101),
            Err(ChimeError::InvalidVolume(101))
        ));
        assert!(matches!(
            volume.set_percent(&VolumeTarget::Device, 70_000),
            Err(ChimeError::InvalidVolume(70_000))
        ));
        assert_eq!(volume.device().percent, 60);
    }

    #[test]
    fn test_pool_mode_tracks_each_pool() {
        let volume = VolumeControl::new(&config(VolumeMode::Pool), ["bell", "time"]);

        volume
            .set_percent(&VolumeTarget::Pool("bell".to_string()), 10)
            .unwrap();

        assert_eq!(volume.effective_for("bell"), 10);
        assert_eq!(volume.effective_for("time"), 60);
        assert!(matches!(
            volume.set_percent(&VolumeTarget::Pool("nope".to_string()), 10),
            Err(ChimeError::UnknownPool(_))
        ));
    }

    #[test]
    fn test_wrong_mode_target_rejected() {
        let device = VolumeControl::new(&config(VolumeMode::Device), ["bell"]);
        assert!(matches!(
            device.set_percent(&VolumeTarget::Pool("bell".to_string()), 10),
            Err(ChimeError::Configuration(_))
        ));

        let pooled = VolumeControl::new(&config(VolumeMode::Pool), ["bell"]);
        assert!(matches!(
            pooled.set_muted(&VolumeTarget::Device, true),
            Err(ChimeError::Configuration(_))
        ));
    }
}
