//! busfs CLI entry point.
//!
//! Grounded on the teacher's `main.rs`: `clap` derive command surface,
//! `env_logger` file-sink logging, `signal-hook`-driven graceful shutdown,
//! a panic hook, and `mimalloc` as the global allocator.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;

use busfs::config::Config;
use busfs::fs::BusFs;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Parser)]
#[command(name = "busfs", version, about = "A publish/subscribe ring-buffer filesystem")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Mounts the filesystem at `mountpoint`.
    Mount {
        mountpoint: PathBuf,
        /// Real backing directory for metadata pass-through.
        #[arg(long)]
        realfs: Option<PathBuf>,
        /// Slots per bus ring.
        #[arg(long)]
        ring_size: Option<usize>,
        /// Bytes per slot.
        #[arg(long)]
        slot_capacity: Option<usize>,
        /// Stay in the foreground instead of daemonizing.
        #[arg(short, long)]
        foreground: bool,
    },
    /// Prints the resolved configuration as JSON.
    Config,
}

fn main() -> Result<()> {
    install_panic_hook();
    let cli = Cli::parse();
    let config = Config::load();
    init_logging(&config)?;

    match cli.command {
        Commands::Mount {
            mountpoint,
            realfs,
            ring_size,
            slot_capacity,
            foreground,
        } => run_mount(config, mountpoint, realfs, ring_size, slot_capacity, foreground),
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn run_mount(
    mut config: Config,
    mountpoint: PathBuf,
    realfs: Option<PathBuf>,
    ring_size: Option<usize>,
    slot_capacity: Option<usize>,
    foreground: bool,
) -> Result<()> {
    if let Some(realfs) = realfs {
        config.realfs = realfs;
    }
    if let Some(ring_size) = ring_size {
        config.ring_size = ring_size;
    }
    if let Some(slot_capacity) = slot_capacity {
        config.slot_capacity = slot_capacity;
    }

    config
        .ensure_realfs()
        .with_context(|| format!("creating real backing directory {:?}", config.realfs))?;

    log::info!(
        "mounting busfs at {:?} (realfs={:?}, ring_size={}, slot_capacity={})",
        mountpoint,
        config.realfs,
        config.ring_size,
        config.slot_capacity
    );

    let shutdown = Arc::new(AtomicBool::new(false));
    for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM, signal_hook::consts::SIGHUP] {
        signal_hook::flag::register(signal, Arc::clone(&shutdown))
            .context("registering shutdown signal handler")?;
    }

    let options = vec![
        fuser::MountOption::FSName("busfs".to_string()),
        fuser::MountOption::AutoUnmount,
    ];
    let fs = BusFs::new(config);
    let session = fuser::spawn_mount2(fs, &mountpoint, &options)
        .with_context(|| format!("mounting busfs at {mountpoint:?}"))?;

    if foreground {
        log::info!("running in foreground, press Ctrl-C to unmount");
    }

    while !shutdown.load(Ordering::Relaxed) {
        std::thread::sleep(std::time::Duration::from_millis(200));
    }

    log::info!("shutdown signal received, unmounting");
    drop(session);
    Ok(())
}

fn init_logging(config: &Config) -> Result<()> {
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&config.logfile)
        .with_context(|| format!("opening log file {:?}", config.logfile))?;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Pipe(Box::new(log_file)))
        .format_timestamp_millis()
        .init();

    Ok(())
}

fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        log::error!("panic: {info}");
        default_hook(info);
    }));
}
