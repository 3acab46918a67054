//! Parse a raw capture of sbgECom traffic and summarize its content.
//!
//! Usage: sbg_parse_dump <capture.bin> [--verbose]

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use sbgecom::{EComError, FileTransport, LogData, LogRegistry, MsgClass, Protocol};

/// Summarize an sbgECom capture file
#[derive(Parser, Debug)]
#[command(name = "sbg_parse_dump")]
#[command(about = "Count the frames and errors in an sbgECom capture")]
struct Args {
    /// Capture file holding raw device output
    input: PathBuf,

    /// Print every decoded frame
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let transport = FileTransport::replay(&args.input)
        .with_context(|| format!("opening {}", args.input.display()))?;
    let mut protocol = Protocol::new(transport);
    let registry = LogRegistry::default();

    let mut counts: BTreeMap<(u8, u8), (u64, u64)> = BTreeMap::new();

    loop {
        match protocol.receive_frame(Duration::ZERO) {
            Ok(frame) => {
                let entry = counts.entry((frame.msg_class, frame.msg_id)).or_default();
                entry.0 += 1;
                entry.1 += frame.payload.len() as u64;

                if args.verbose {
                    match registry.decode(frame.msg_class, frame.msg_id, &frame.payload) {
                        Ok(LogData::Diag(diag)) => println!(
                            "DIAG   {} {} {}",
                            diag.diag_type, diag.error_code, diag.message
                        ),
                        Ok(LogData::Nmea(sentence)) => println!("NMEA   {sentence}"),
                        _ => println!(
                            "FRAME  {:#04x}/{:#04x} {} bytes",
                            frame.msg_class,
                            frame.msg_id,
                            frame.payload.len()
                        ),
                    }
                }
            }
            Err(EComError::NotReady) if protocol.transport().is_eof() => break,
            Err(EComError::NotReady) => continue,
            Err(e) => return Err(e.into()),
        }
    }

    println!("{:<16} {:>6} {:>10} {:>12}", "class", "id", "frames", "bytes");
    for ((msg_class, msg_id), (frames, bytes)) in &counts {
        let class = MsgClass::from_u8(*msg_class)
            .map(|c| c.to_string())
            .unwrap_or_else(|| format!("{msg_class:#04x}"));
        println!("{class:<16} {msg_id:>#6x} {frames:>10} {bytes:>12}");
    }

    let stats = protocol.stats();
    println!();
    println!("Valid frames:       {}", stats.frames);
    println!("Checksum errors:    {}", stats.checksum_errors);
    println!("Framing errors:     {}", stats.framing_errors);
    println!("Aborted transfers:  {}", stats.aborted_transfers);

    Ok(())
}
