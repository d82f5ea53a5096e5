//! Bridge configuration file – reads/writes `~/.actbridge/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use actbridge_runtime::BridgeConfig;
use actbridge_types::BridgeError;
use serde::{Deserialize, Serialize};

/// Largest per-channel bus buffer the CLI will allocate.
pub const MAX_EVENT_BUS_CAPACITY: usize = 65_536;

/// Persisted CLI configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CliConfig {
    /// How long the startup probe waits for the legacy action server.
    #[serde(default = "default_probe_timeout_ms")]
    pub server_probe_timeout_ms: u64,

    /// Abort a goal the legacy server has not finished after this long.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal_timeout_secs: Option<u64>,

    /// `host:port` of the WebSocket event monitor.  Disabled when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitor_addr: Option<String>,

    /// Buffered events per bus channel.
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,

    /// Delay between Fibonacci steps of the simulated legacy server.
    #[serde(default = "default_demo_step_ms")]
    pub demo_step_ms: u64,
}

fn default_probe_timeout_ms() -> u64 {
    1_000
}
fn default_event_bus_capacity() -> usize {
    256
}
fn default_demo_step_ms() -> u64 {
    500
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            server_probe_timeout_ms: default_probe_timeout_ms(),
            goal_timeout_secs: None,
            monitor_addr: None,
            event_bus_capacity: default_event_bus_capacity(),
            demo_step_ms: default_demo_step_ms(),
        }
    }
}

impl CliConfig {
    /// Runtime configuration for serving `action_name`.
    pub fn bridge_config(&self, action_name: &str) -> BridgeConfig {
        let mut config = BridgeConfig::new(action_name);
        config.server_probe_timeout = Duration::from_millis(self.server_probe_timeout_ms);
        config.goal_timeout = self.goal_timeout_secs.map(Duration::from_secs);
        config
    }

    /// `event_bus_capacity` clamped to `1..=MAX_EVENT_BUS_CAPACITY`.
    pub fn event_bus_capacity(&self) -> usize {
        self.event_bus_capacity.clamp(1, MAX_EVENT_BUS_CAPACITY)
    }

    pub fn demo_step(&self) -> Duration {
        Duration::from_millis(self.demo_step_ms)
    }
}

/// Return the path to `~/.actbridge/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".actbridge").join("config.toml")
}

/// Load the config from `path`, applying `ACTBRIDGE_*` overrides.
/// Returns `None` if the file does not exist.
pub fn load_from(path: &Path) -> Result<Option<CliConfig>, BridgeError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|e| {
        BridgeError::Config(format!("failed to read config at {}: {e}", path.display()))
    })?;
    let mut cfg: CliConfig = toml::from_str(&raw)
        .map_err(|e| BridgeError::Config(format!("failed to parse config: {e}")))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `ACTBRIDGE_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `ACTBRIDGE_PROBE_TIMEOUT_MS` | `server_probe_timeout_ms` |
/// | `ACTBRIDGE_GOAL_TIMEOUT_SECS` | `goal_timeout_secs` |
/// | `ACTBRIDGE_MONITOR_ADDR` | `monitor_addr` |
/// | `ACTBRIDGE_STEP_MS` | `demo_step_ms` |
///
/// Values that fail to parse are ignored.
pub fn apply_env_overrides(cfg: &mut CliConfig) {
    if let Ok(v) = std::env::var("ACTBRIDGE_PROBE_TIMEOUT_MS")
        && let Ok(ms) = v.parse::<u64>()
    {
        cfg.server_probe_timeout_ms = ms;
    }
    if let Ok(v) = std::env::var("ACTBRIDGE_GOAL_TIMEOUT_SECS")
        && let Ok(secs) = v.parse::<u64>()
    {
        cfg.goal_timeout_secs = Some(secs);
    }
    if let Ok(v) = std::env::var("ACTBRIDGE_MONITOR_ADDR")
        && !v.trim().is_empty()
    {
        cfg.monitor_addr = Some(v.trim().to_string());
    }
    if let Ok(v) = std::env::var("ACTBRIDGE_STEP_MS")
        && let Ok(ms) = v.parse::<u64>()
    {
        cfg.demo_step_ms = ms;
    }
}

/// Save the config to `path`, creating the parent directory if necessary.
pub fn save_to(cfg: &CliConfig, path: &Path) -> Result<(), BridgeError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            BridgeError::Config(format!("failed to create config directory: {e}"))
        })?;
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| BridgeError::Config(format!("failed to serialize config: {e}")))?;
    fs::write(path, raw).map_err(|e| {
        BridgeError::Config(format!("failed to write config at {}: {e}", path.display()))
    })
}
