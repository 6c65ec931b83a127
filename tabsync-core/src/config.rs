//! Session timing configuration.

use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Time between presence rounds
    pub presence_interval: Duration,
    /// How long a presence round collects replies
    pub probe_window: Duration,
    /// Delay before a "typing" indicator is withdrawn automatically
    pub typing_timeout: Duration,
    /// Cadence of the chat expiry sweep
    pub sweep_interval: Duration,
    /// Envelope TTL: how long a broadcast is replayed to new contexts
    pub envelope_ttl: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            presence_interval: Duration::from_millis(3_000),
            probe_window: Duration::from_millis(300),
            typing_timeout: Duration::from_millis(3_000),
            sweep_interval: Duration::from_millis(1_000),
            envelope_ttl: Some(Duration::from_millis(250)),
        }
    }
}

/// On-disk form: milliseconds, every field optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ConfigFile {
    presence_interval_ms: Option<u64>,
    probe_window_ms: Option<u64>,
    typing_timeout_ms: Option<u64>,
    sweep_interval_ms: Option<u64>,
    /// 0 disables replay to late subscribers.
    envelope_ttl_ms: Option<u64>,
}

impl ConfigFile {
    fn apply(self, mut config: SessionConfig) -> SessionConfig {
        let ms = Duration::from_millis;
        if let Some(v) = self.presence_interval_ms {
            config.presence_interval = ms(v.max(1));
        }
        if let Some(v) = self.probe_window_ms {
            config.probe_window = ms(v);
        }
        if let Some(v) = self.typing_timeout_ms {
            config.typing_timeout = ms(v);
        }
        if let Some(v) = self.sweep_interval_ms {
            config.sweep_interval = ms(v.max(1));
        }
        if let Some(v) = self.envelope_ttl_ms {
            config.envelope_ttl = (v > 0).then(|| ms(v));
        }
        config
    }
}

/// Parse a JSON config. Unknown fields are ignored.
pub fn parse_config(json: &str) -> Result<SessionConfig, serde_json::Error> {
    let file: ConfigFile = serde_json::from_str(json)?;
    Ok(file.apply(SessionConfig::default()))
}

/// Load a config file, falling back to defaults when it is missing or invalid.
pub fn load_config(path: impl AsRef<Path>) -> SessionConfig {
    let path = path.as_ref();
    match fs::read_to_string(path) {
        Ok(content) => match parse_config(&content) {
            Ok(config) => config,
            Err(err) => {
                log::warn!("Failed to parse config file {}: {err}", path.display());
                SessionConfig::default()
            }
        },
        Err(err) => {
            log::info!("Config file {} not readable ({err}); using defaults", path.display());
            SessionConfig::default()
        }
    }
}
