//! Save, restore or reboot a device.

use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use sbgecom::cli::ConnectionArgs;
use sbgecom::commands::{settings_action, SettingsAction};
use sbgecom::{open_transport, EComHandle};
use tracing::{info, warn};

/// Apply a settings action
#[derive(Parser, Debug)]
#[command(name = "sbg_settings")]
#[command(about = "Save or restore the settings of an SBG Systems device, or reboot it")]
#[command(version)]
struct Args {
    #[command(flatten)]
    connection: ConnectionArgs,

    /// reboot-only, save-settings or restore-default-settings
    action: SettingsAction,

    /// Attempts before giving up
    #[arg(long)]
    trials: Option<u32>,

    /// Time to wait for the ACK of each attempt, in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let mut config = args.connection.device_config()?;
    if let Some(trials) = args.trials {
        config.ecom.num_trials = trials;
    }
    if let Some(timeout_ms) = args.timeout_ms {
        config.ecom.default_timeout_ms = timeout_ms;
    }

    let transport = open_transport(&config.transport)?;
    info!("Connected to {}", transport.name());

    let mut handle = EComHandle::with_config(transport, &config.ecom)?;
    info!(
        "Sending {} ({} trials, {:?} timeout)",
        args.action,
        handle.num_trials(),
        handle.cmd_default_timeout()
    );

    if let Err(e) = handle.purge_incoming() {
        warn!("Input not fully purged: {}", e);
    }

    settings_action(&mut handle, args.action)?;
    info!("Device acknowledged {}", args.action);

    // Give the device time to flush its output before it reboots
    std::thread::sleep(Duration::from_millis(100));
    Ok(())
}
