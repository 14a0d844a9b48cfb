//! Sound pool and volume configuration.

use serde::{Deserialize, Serialize};

/// Name of the default sequence strategy.
pub const DEFAULT_SEQUENCE: &str = "QueueRandom";

/// One independently triggerable group of clips.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Display name.
    pub name: String,

    /// Stable identifier used to address the pool.
    pub identifier: String,

    /// Clip location: `file:///path` or `http(s)://user:pass@host/path`.
    pub uri: String,

    /// Sequence strategy: `QueueRandom` or `Zeitansage`.
    #[serde(default = "PoolConfig::default_sequence")]
    pub sequence: String,

    /// Run clips through loudness normalization.
    #[serde(default)]
    pub normalize: bool,

    /// Keep all clip bytes in memory.
    #[serde(default = "PoolConfig::default_cache")]
    pub cache: bool,
}

impl PoolConfig {
    fn default_sequence() -> String {
        DEFAULT_SEQUENCE.to_string()
    }

    fn default_cache() -> bool {
        true
    }

    /// Minimal pool with default strategy and caching.
    pub fn new(identifier: impl Into<String>, uri: impl Into<String>) -> Self {
        let identifier = identifier.into();
        Self {
            name: identifier.clone(),
            identifier,
            uri: uri.into(),
            sequence: Self::default_sequence(),
            normalize: false,
            cache: Self::default_cache(),
        }
    }
}

/// Whether volume is a single device setting or tracked per pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolumeMode {
    Device,
    Pool,
}

impl VolumeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            VolumeMode::Device => "device",
            VolumeMode::Pool => "pool",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeConfig {
    #[serde(default = "VolumeConfig::default_mode")]
    pub mode: VolumeMode,

    /// Starting volume, 0-100.
    #[serde(default = "VolumeConfig::default_percent")]
    pub default_percent: u8,
}

impl VolumeConfig {
    fn default_mode() -> VolumeMode {
        VolumeMode::Device
    }

    fn default_percent() -> u8 {
        100
    }
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            mode: Self::default_mode(),
            default_percent: Self::default_percent(),
        }
    }
}
