//! Connection configuration.
//!
//! A [`DeviceConfig`] describes how to reach a device and how commands are
//! retried. It is stored as JSON; every field has a default so a config file
//! only needs the values that differ.
//!
//! ```json
//! {
//!   "transport": { "type": "udp", "remote_addr": "192.168.1.1", "remote_port": 1234, "local_port": 1235 },
//!   "ecom": { "num_trials": 5 }
//! }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EComError, EComResult};

/// Default number of attempts per command.
pub const DEFAULT_CMD_NUM_TRIALS: u32 = 3;

/// Default time to wait for a reply, in milliseconds.
pub const DEFAULT_CMD_TIMEOUT_MS: u64 = 500;

/// Command retry settings of a handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EComConfig {
    /// Attempts per command, at least 1
    pub num_trials: u32,
    /// Time to wait for a reply on each attempt, at least 1 ms
    pub default_timeout_ms: u64,
}

impl EComConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn validate(&self) -> EComResult<()> {
        if self.num_trials == 0 {
            return Err(EComError::Config("num_trials must be at least 1".into()));
        }
        if self.default_timeout_ms == 0 {
            return Err(EComError::Config(
                "default_timeout_ms must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

impl Default for EComConfig {
    fn default() -> Self {
        Self {
            num_trials: DEFAULT_CMD_NUM_TRIALS,
            default_timeout_ms: DEFAULT_CMD_TIMEOUT_MS,
        }
    }
}

/// Serial port settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    pub port: String,
    pub baud_rate: u32,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 115_200,
        }
    }
}

/// UDP socket settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UdpConfig {
    /// Device IP address or host name
    pub remote_addr: String,
    /// Device port that receives commands
    pub remote_port: u16,
    /// Local port the device sends to
    pub local_port: u16,
    /// Drop datagrams that do not come from the remote address and port
    pub connected_mode: bool,
    /// Allow a broadcast remote address
    pub allow_broadcast: bool,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            remote_addr: "192.168.1.1".to_string(),
            remote_port: 1234,
            local_port: 1235,
            connected_mode: true,
            allow_broadcast: false,
        }
    }
}

/// Link used to reach the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransportConfig {
    Serial(SerialConfig),
    Udp(UdpConfig),
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::Serial(SerialConfig::default())
    }
}

/// Complete description of a device connection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub transport: TransportConfig,
    pub ecom: EComConfig,
}

impl DeviceConfig {
    pub fn validate(&self) -> EComResult<()> {
        match &self.transport {
            TransportConfig::Serial(serial) => {
                if serial.port.is_empty() {
                    return Err(EComError::Config("serial port path is empty".into()));
                }
                if serial.baud_rate == 0 {
                    return Err(EComError::Config("baud rate must be non-zero".into()));
                }
            }
            TransportConfig::Udp(udp) => {
                if udp.remote_addr.is_empty() {
                    return Err(EComError::Config("remote address is empty".into()));
                }
                if udp.remote_port == 0 {
                    return Err(EComError::Config("remote port must be non-zero".into()));
                }
            }
        }
        self.ecom.validate()
    }

    /// Load and validate a JSON configuration file.
    pub fn load_from_file(path: &Path) -> EComResult<Self> {
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)
            .map_err(|e| EComError::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Save to a JSON file.
    pub fn save_to_file(&self, path: &Path) -> EComResult<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| EComError::Config(e.to_string()))?;
        std::fs::write(path, json)?;
        Ok(())
    }
}
