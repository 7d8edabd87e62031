//! `fpm`: command-line interface for the FPM multiplier IP.
//!
//! ```text
//! USAGE:
//!   fpm discover                       List UIO devices and u-dma-bufs
//!   fpm encode <value>                 Value -> Q8.24 word
//!   fpm decode <word>                  Q8.24 word -> value
//!   fpm sim [--latency-us N] <req>...  Run requests on the simulated backend
//!   fpm run [--udmabuf NAME] <req>...  Run requests on hardware
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fpm_chip::codec;
use fpm_driver::{
    ChannelResource, DeviceManager, DriverConfig, FpmDevice, FpmError, OutboundSequencing,
    SimConfig, SimPlatform, UioPlatform,
};
use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fpm", about = "FPM fixed-point multiplier CLI", version)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// List UIO devices and coherent buffers.
    Discover {
        /// sysfs mount point.
        #[arg(long, default_value = "/sys")]
        sysfs: PathBuf,
    },
    /// Encode a value as a Q8.24 word.
    Encode {
        /// Value in [-128, 128).
        #[arg(allow_negative_numbers = true)]
        value: f64,
    },
    /// Decode a Q8.24 word.
    Decode {
        /// Word, `0x` hex or decimal.
        #[arg(value_parser = parse_word)]
        word: u32,
    },
    /// Run requests against the simulated backend.
    Sim {
        /// Completion latency of every channel, in microseconds.
        #[arg(long, default_value_t = 0)]
        latency_us: u64,
        /// Send both operands through one buffer word.
        #[arg(long)]
        shared_slot: bool,
        /// Requests, e.g. "2.0, 2.0".
        #[arg(required = true, allow_hyphen_values = true)]
        requests: Vec<String>,
    },
    /// Run requests against the hardware.
    Run {
        /// u-dma-buf name.
        #[arg(long, default_value = fpm_chip::ip::UDMABUF_NAME)]
        udmabuf: String,
        /// Requests, e.g. "2.0, 2.0".
        #[arg(required = true, allow_hyphen_values = true)]
        requests: Vec<String>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Cmd::Discover { sysfs } => cmd_discover(&sysfs)?,
        Cmd::Encode { value } => cmd_encode(value)?,
        Cmd::Decode { word } => cmd_decode(word),
        Cmd::Sim {
            latency_us,
            shared_slot,
            requests,
        } => cmd_sim(latency_us, shared_slot, &requests)?,
        Cmd::Run { udmabuf, requests } => cmd_run(&udmabuf, &requests)?,
    }

    Ok(())
}

fn parse_word(raw: &str) -> std::result::Result<u32, String> {
    let parsed = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => raw.parse(),
    };
    parsed.map_err(|e| format!("invalid word '{raw}': {e}"))
}

fn cmd_discover(sysfs: &std::path::Path) -> Result<()> {
    let mgr = DeviceManager::discover_in(sysfs, std::path::Path::new("/dev"))?;

    println!("UIO devices: {}", mgr.device_count());
    println!();

    for device in mgr.devices() {
        let role = ChannelResource::reference_set()
            .into_iter()
            .find(|r| r.base == device.map_addr)
            .map_or_else(|| "-".to_string(), |r| r.role.to_string());
        println!("[uio{}] {}", device.index, device.name);
        println!(
            "     map0  {:#010x} + {:#x}   role {role}",
            device.map_addr, device.map_size
        );
    }

    println!();
    if mgr.buffers().is_empty() {
        println!("No u-dma-buf found");
    }
    for buffer in mgr.buffers() {
        println!(
            "u-dma-buf {}  phys {:#010x}  {} bytes",
            buffer.name, buffer.phys_addr, buffer.size
        );
    }

    Ok(())
}

fn cmd_encode(value: f64) -> Result<()> {
    let word = codec::checked_encode(value).with_context(|| {
        format!(
            "{value} is outside the representable range [{}, {}]",
            codec::MIN_VALUE,
            codec::MAX_MAGNITUDE
        )
    })?;
    println!("{word:#010x}");
    Ok(())
}

fn cmd_decode(word: u32) {
    println!("{}", codec::decode(word));
}

fn cmd_sim(latency_us: u64, shared_slot: bool, requests: &[String]) -> Result<()> {
    let mut platform = SimPlatform::new(
        SimConfig::default().with_uniform_latency(Duration::from_micros(latency_us)),
    );
    let mut config = DriverConfig::from_env();
    if shared_slot {
        config = config.with_outbound_sequencing(OutboundSequencing::SharedSlot);
    }

    let mut device = FpmDevice::attach(&mut platform, &ChannelResource::reference_set(), config)?;
    run_requests(&mut device, requests)
}

fn cmd_run(udmabuf: &str, requests: &[String]) -> Result<()> {
    let mut platform = UioPlatform::new()
        .context("FPM hardware not found (are the DMA blocks bound to uio_pdrv_genirq?)")?
        .with_udmabuf(udmabuf);

    let mut device = FpmDevice::attach(
        &mut platform,
        &ChannelResource::reference_set(),
        DriverConfig::from_env(),
    )?;
    run_requests(&mut device, requests)
}

/// Write every request, draining a full batch before retrying
fn run_requests(device: &mut FpmDevice, requests: &[String]) -> Result<()> {
    for request in requests {
        match device.write(request.as_bytes()) {
            Ok(_) => {}
            Err(FpmError::QueueFull { .. }) => {
                tracing::info!("Batch full, draining before {request:?}");
                drain(device)?;
                device.write(request.as_bytes())?;
            }
            Err(e) => return Err(e).with_context(|| format!("request {request:?}")),
        }
    }
    drain(device)?;

    println!(
        "\n{} cycle(s) completed",
        device.controller().cycles_completed()
    );
    Ok(())
}

fn drain(device: &mut FpmDevice) -> Result<()> {
    let mut text = String::new();
    device.read_to_string(&mut text)?;

    for line in text.lines() {
        let value = line
            .rsplit("0x")
            .next()
            .and_then(|hex| u32::from_str_radix(hex, 16).ok())
            .map(codec::decode);
        match value {
            Some(value) => println!("{line}   ({value})"),
            None => println!("{line}"),
        }
    }
    Ok(())
}
