//! Infrastructure configuration - things that cannot change at runtime.

use serde::{Deserialize, Serialize};

/// Control surface bind address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BindConfig {
    /// HTTP address for triggers, volume and health endpoints.
    /// Default: 0.0.0.0:8085
    #[serde(default = "BindConfig::default_http_addr")]
    pub http_addr: String,
}

impl BindConfig {
    fn default_http_addr() -> String {
        "0.0.0.0:8085".to_string()
    }
}

impl Default for BindConfig {
    fn default() -> Self {
        Self {
            http_addr: Self::default_http_addr(),
        }
    }
}

/// Telemetry and observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// OTLP gRPC endpoint for OpenTelemetry. Empty disables export.
    #[serde(default)]
    pub otlp_endpoint: String,

    /// Log level (trace, debug, info, warn, error).
    /// Default: info
    #[serde(default = "TelemetryConfig::default_log_level")]
    pub log_level: String,
}

impl TelemetryConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            otlp_endpoint: String::new(),
            log_level: Self::default_log_level(),
        }
    }
}

/// How clip bytes are handed to the player process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerInput {
    /// Write to a temporary file and pass its path.
    File,
    /// Pipe the bytes into the player's stdin.
    Stdin,
}

impl PlayerInput {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlayerInput::File => "file",
            PlayerInput::Stdin => "stdin",
        }
    }
}

/// External programs and their time limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Player executable (ffplay compatible).
    #[serde(default = "ToolsConfig::default_player")]
    pub player: String,

    /// Transcoder executable (ffmpeg compatible), used for normalization.
    #[serde(default = "ToolsConfig::default_transcoder")]
    pub transcoder: String,

    #[serde(default = "ToolsConfig::default_player_input")]
    pub player_input: PlayerInput,

    /// Container format normalized clips are re-encoded to.
    #[serde(default = "ToolsConfig::default_encode_format")]
    pub encode_format: String,

    /// Upper bound for a single player run.
    /// Default: 600
    #[serde(default = "ToolsConfig::default_player_timeout_secs")]
    pub player_timeout_secs: u64,

    /// Upper bound for a single transcoder run.
    /// Default: 120
    #[serde(default = "ToolsConfig::default_transcoder_timeout_secs")]
    pub transcoder_timeout_secs: u64,

    /// Upper bound for a remote listing or fetch.
    /// Default: 60
    #[serde(default = "ToolsConfig::default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
}

impl ToolsConfig {
    fn default_player() -> String {
        "ffplay".to_string()
    }

    fn default_transcoder() -> String {
        "ffmpeg".to_string()
    }

    fn default_player_input() -> PlayerInput {
        PlayerInput::File
    }

    fn default_encode_format() -> String {
        "mp3".to_string()
    }

    fn default_player_timeout_secs() -> u64 {
        600
    }

    fn default_transcoder_timeout_secs() -> u64 {
        120
    }

    fn default_fetch_timeout_secs() -> u64 {
        60
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            player: Self::default_player(),
            transcoder: Self::default_transcoder(),
            player_input: Self::default_player_input(),
            encode_format: Self::default_encode_format(),
            player_timeout_secs: Self::default_player_timeout_secs(),
            transcoder_timeout_secs: Self::default_transcoder_timeout_secs(),
            fetch_timeout_secs: Self::default_fetch_timeout_secs(),
        }
    }
}

/// Background re-listing of every pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshConfig {
    /// Seconds between refresh passes.
    /// Default: 600
    #[serde(default = "RefreshConfig::default_interval_secs")]
    pub interval_secs: u64,

    /// Parallel fetches while filling a pool cache.
    /// Default: 8
    #[serde(default = "RefreshConfig::default_populate_concurrency")]
    pub populate_concurrency: usize,
}

impl RefreshConfig {
    fn default_interval_secs() -> u64 {
        600
    }

    fn default_populate_concurrency() -> usize {
        8
    }
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval_secs: Self::default_interval_secs(),
            populate_concurrency: Self::default_populate_concurrency(),
        }
    }
}

/// Complete infrastructure configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct InfraConfig {
    #[serde(default)]
    pub bind: BindConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,

    #[serde(default)]
    pub tools: ToolsConfig,

    #[serde(default)]
    pub refresh: RefreshConfig,
}
