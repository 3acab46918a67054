//! Print every log a device sends.
//!
//! Diagnostic messages and NMEA sentences are printed in full; other logs are
//! summarized by class, ID and size. A per-log count is printed on exit.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::Parser;
use sbgecom::cli::ConnectionArgs;
use sbgecom::{open_transport, EComHandle, LogData, MsgClass};
use tracing::{debug, info, warn};

/// Listen to an sbgECom device
#[derive(Parser, Debug)]
#[command(name = "sbg_listen")]
#[command(about = "Print the output logs of an SBG Systems device")]
#[command(version)]
struct Args {
    #[command(flatten)]
    connection: ConnectionArgs,

    /// Listening time in seconds (0 = until interrupted)
    #[arg(short, long, default_value = "10")]
    duration: u64,
}

fn class_name(msg_class: u8) -> String {
    MsgClass::from_u8(msg_class)
        .map(|c| c.to_string())
        .unwrap_or_else(|| format!("{msg_class:#04x}"))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let config = args.connection.device_config()?;
    let transport = open_transport(&config.transport)?;
    info!("Listening on {}", transport.name());

    let mut handle = EComHandle::with_config(transport, &config.ecom)?;

    let counts: Arc<Mutex<BTreeMap<(u8, u8), u64>>> = Arc::default();
    let counter = Arc::clone(&counts);
    handle.set_receive_log_callback(move |msg_class, msg_id, data| {
        if let Ok(mut counts) = counter.lock() {
            *counts.entry((msg_class, msg_id)).or_default() += 1;
        }

        match data {
            LogData::Diag(diag) => info!(
                "[{:>10} us] {} {}: {}",
                diag.timestamp_us, diag.diag_type, diag.error_code, diag.message
            ),
            LogData::Nmea(sentence) => info!("{}", sentence),
            LogData::Raw(payload) => debug!(
                "{} / {:#04x}: {} bytes",
                class_name(msg_class),
                msg_id,
                payload.len()
            ),
        }
    });

    let start = Instant::now();
    let limit = Duration::from_secs(args.duration);

    while args.duration == 0 || start.elapsed() < limit {
        if let Err(e) = handle.handle() {
            warn!("Receive error: {}", e);
        }
        thread::sleep(Duration::from_millis(1));
    }

    let stats = handle.protocol().stats();
    info!(
        "Frames: {}, checksum errors: {}, framing errors: {}",
        stats.frames, stats.checksum_errors, stats.framing_errors
    );
    if let Ok(counts) = counts.lock() {
        for ((msg_class, msg_id), count) in counts.iter() {
            info!("{:>16} / {:#04x}: {}", class_name(*msg_class), msg_id, count);
        }
    }

    Ok(())
}
