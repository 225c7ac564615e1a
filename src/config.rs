// Addressing defaults, serial settings and connection configuration
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

// TMCL addressing
pub const DEFAULT_HOST_ID: u8 = 2;
pub const DEFAULT_MODULE_ID: u8 = 1;

// Serial port defaults
pub const DEFAULT_BAUDRATE: u32 = 115_200;

// Reply timeout for one request/reply exchange
pub const DEFAULT_TIMEOUT_MS: u64 = 5_000;

/// Connection settings, loadable from a JSON file.
///
/// Missing keys fall back to the defaults above; the CLI overrides individual
/// values with its flags.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConnectionConfig {
    /// Serial port name, e.g. `/dev/ttyACM0` or `COM3`
    pub port: Option<String>,
    /// `host:port` of a TMCL-over-TCP bridge
    pub tcp: Option<String>,
    pub baudrate: u32,
    pub host_id: u8,
    pub module_id: u8,
    pub timeout_ms: u64,
    /// Log every frame at info level
    pub debug: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            port: None,
            tcp: None,
            baudrate: DEFAULT_BAUDRATE,
            host_id: DEFAULT_HOST_ID,
            module_id: DEFAULT_MODULE_ID,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            debug: false,
        }
    }
}

/// Error loading a configuration file
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Cannot read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration in {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

impl ConnectionConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}
