//! Command line arguments shared by the bundled tools.

use std::path::PathBuf;

use clap::Args;

use crate::config::{DeviceConfig, SerialConfig, TransportConfig, UdpConfig};
use crate::error::EComResult;

/// How to reach the device.
///
/// Either `--config` with a JSON [`DeviceConfig`], `--serial`, or `--udp`.
/// Without any of them the default serial port is used.
#[derive(Args, Debug, Clone)]
pub struct ConnectionArgs {
    /// JSON device configuration file
    #[arg(long, conflicts_with_all = ["serial", "udp"])]
    pub config: Option<PathBuf>,

    /// Serial port path
    #[arg(long, conflicts_with = "udp")]
    pub serial: Option<String>,

    /// Serial baud rate
    #[arg(long, default_value_t = 115_200)]
    pub baud: u32,

    /// Device IP address (UDP)
    #[arg(long)]
    pub udp: Option<String>,

    /// Device UDP port receiving commands
    #[arg(long, default_value_t = 1234)]
    pub remote_port: u16,

    /// Local UDP port receiving device output
    #[arg(long, default_value_t = 1235)]
    pub local_port: u16,

    /// Allow a broadcast device address
    #[arg(long)]
    pub broadcast: bool,

    /// Accept datagrams from any host
    #[arg(long)]
    pub unconnected: bool,
}

impl ConnectionArgs {
    /// Build the device configuration described by the arguments.
    pub fn device_config(&self) -> EComResult<DeviceConfig> {
        if let Some(path) = &self.config {
            return DeviceConfig::load_from_file(path);
        }

        let transport = match (&self.serial, &self.udp) {
            (_, Some(addr)) => TransportConfig::Udp(UdpConfig {
                remote_addr: addr.clone(),
                remote_port: self.remote_port,
                local_port: self.local_port,
                connected_mode: !self.unconnected,
                allow_broadcast: self.broadcast,
            }),
            (Some(port), None) => TransportConfig::Serial(SerialConfig {
                port: port.clone(),
                baud_rate: self.baud,
            }),
            (None, None) => TransportConfig::Serial(SerialConfig {
                baud_rate: self.baud,
                ..SerialConfig::default()
            }),
        };

        let config = DeviceConfig {
            transport,
            ..DeviceConfig::default()
        };
        config.validate()?;
        Ok(config)
    }
}
