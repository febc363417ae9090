//! trackpoint-midbutton daemon
//!
//! Grabs the trackpoint, emulates a middle button on a virtual copy of
//! it, and forwards everything else.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use tracing::info;
use tracing_subscriber::EnvFilter;
use trackpoint_midbutton::device::{self, GrabbedDevice, VirtualSink};
use trackpoint_midbutton::driver::Driver;
use trackpoint_midbutton::emulator::Emulator;
use trackpoint_midbutton::settings::Settings;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Source device node (skips discovery)
    #[arg(short, long)]
    device: Option<PathBuf>,

    /// Settings file (defaults to ~/.config/trackpoint-midbutton/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the left deadline in milliseconds
    #[arg(long)]
    left_deadline_ms: Option<u64>,

    /// Override the right deadline in milliseconds
    #[arg(long)]
    right_deadline_ms: Option<u64>,

    /// List input devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // RUST_LOG wins; otherwise DEBUG in the environment or -v enables debug output.
    let default_level = if args.verbose || std::env::var_os("DEBUG").is_some() {
        "debug"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let mut settings = Settings::load(args.config.as_deref())?;
    if let Some(ms) = args.left_deadline_ms {
        settings.left_deadline_ms = ms;
    }
    if let Some(ms) = args.right_deadline_ms {
        settings.right_deadline_ms = ms;
    }
    let timings = settings.timings()?;

    if args.list_devices {
        for iface in device::list_input_interfaces(&settings.device_names) {
            println!(
                "{}{}: '{}' [left_right={} middle={} rel={} abs={}]",
                if iface.is_candidate { "* " } else { "  " },
                iface.path.display(),
                iface.name,
                iface.caps.left_right,
                iface.caps.middle,
                iface.caps.relative,
                iface.caps.absolute
            );
        }
        return Ok(());
    }

    info!("trackpoint-midbutton starting...");

    let preferred = args.device.or_else(|| settings.device.as_ref().map(PathBuf::from));
    let source_path = device::select_source_device(preferred.as_deref(), &settings.device_names)
        .context("Can't detect input device (use --device or set `device` in the settings file)")?;

    let source = GrabbedDevice::open(&source_path)?;
    info!("Using {:?} as input device", source.path());
    let sink = VirtualSink::create(&source)?;

    let stop = Arc::new(AtomicBool::new(false));
    let stop_handler = stop.clone();
    ctrlc::set_handler(move || stop_handler.store(true, Ordering::Relaxed))
        .context("Failed to install signal handler")?;

    let mut driver = Driver::new(source, sink, Emulator::new(timings), stop);
    driver.run()?;

    info!("trackpoint-midbutton shutting down");
    Ok(())
}
