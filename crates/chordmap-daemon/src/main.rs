//! chordmap daemon
//!
//! Grabs keyboards and rewrites key combinations according to the
//! configuration, optionally depending on the focused window.

mod device;
mod device_manager;
mod error;
mod event;
mod held;
mod hotplug;
mod injector;
mod mapping;
mod matcher;
mod niri_ipc;
mod relay;
mod window;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tracing_subscriber::EnvFilter;

use crate::device_manager::DeviceManager;
use crate::hotplug::{HotplugEvent, HotplugMonitor};
use crate::window::FocusCache;

#[derive(Parser, Debug)]
#[command(name = "chordmapd")]
#[command(about = "Key combination remapping daemon")]
struct Args {
    /// Path to configuration file (default: ./chordmap.json, then ~/.config/chordmap/config.json)
    #[arg(short, long)]
    config: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let (config_path, config) = chordmap_config::load_config(args.config.as_deref())
        .context("Failed to load configuration")?;

    tracing::info!(
        "Loaded {} mapping(s) in {} entr{} from {}",
        config.mapping_count(),
        config.entries.len(),
        if config.entries.len() == 1 { "y" } else { "ies" },
        config_path.display()
    );

    injector::check_uinput_access()?;

    let focus = FocusCache::new();
    let tracker = niri_ipc::spawn_focus_tracker(focus.clone());

    let mut manager = DeviceManager::new(Arc::new(config), Arc::new(focus));
    let started = manager.start_all().context("Failed to enumerate input devices")?;
    if started == 0 {
        tracing::warn!("No configured keyboard found; waiting for devices to be plugged in");
    }

    let mut hotplug = match HotplugMonitor::new() {
        Ok(monitor) => Some(monitor),
        Err(e) => {
            tracing::warn!("Hot-plug monitoring unavailable: {}", e);
            None
        }
    };

    let mut sigint = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

    tracing::info!("chordmap daemon running");

    loop {
        tokio::select! {
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT");
                break;
            }
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM");
                break;
            }
            Some(event) = next_hotplug(&mut hotplug) => {
                manager.handle_hotplug(event).await;
            }
            Some(path) = manager.reap_next(), if manager.has_tasks() => {
                tracing::debug!("Forgot device at {}", path.display());
            }
        }
    }

    tracing::info!("Shutting down...");
    manager.shutdown_all().await;
    if let Some(tracker) = tracker {
        tracker.abort();
    }

    Ok(())
}

async fn next_hotplug(monitor: &mut Option<HotplugMonitor>) -> Option<HotplugEvent> {
    match monitor {
        Some(monitor) => monitor.next().await,
        None => std::future::pending().await,
    }
}
