//! chordmap CLI
//!
//! Configuration and diagnostics tool for chordmap.

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};

use chordmap_config::{is_known_key_code, key_name, KeyboardSelector};
use clap::{Parser, Subcommand};
use evdev::{Device, EventType, Key};
use miette::{miette, IntoDiagnostic, WrapErr};
use nix::unistd::AccessFlags;

#[derive(Parser, Debug)]
#[command(name = "chordmap")]
#[command(about = "Key combination remapper tools")]
#[command(version)]
struct Cli {
    /// Path to configuration file (default: ./chordmap.json, then ~/.config/chordmap/config.json)
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate the configuration file and print the compiled mappings
    Validate,

    /// List available input devices
    Devices,

    /// Print raw key events of one device
    Events {
        /// Device name, phys address, path, or event number (e.g. 3 or event3)
        device: String,
    },

    /// Print the focused window's class and title (for writing filters)
    Window,
}

fn main() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Validate => cmd_validate(cli.config.as_deref()),
        Commands::Devices => cmd_devices(),
        Commands::Events { device } => cmd_events(&device),
        Commands::Window => cmd_window(),
    }
}

fn cmd_validate(config: Option<&str>) -> miette::Result<()> {
    let (path, config) = chordmap_config::load_config(config)?;

    println!("Configuration is valid: {}", path.display());
    println!("  Mappings: {}", config.mapping_count());

    for entry in &config.entries {
        match &entry.keyboards {
            KeyboardSelector::All => println!("\n  All keyboards:"),
            KeyboardSelector::Named(ids) => println!("\n  Keyboards {}:", ids.join(", ")),
        }
        for mapping in &entry.mappings {
            println!("    {}", mapping);
        }
    }

    Ok(())
}

fn is_keyboard(device: &Device) -> bool {
    device.supported_events().contains(EventType::KEY)
        && device
            .supported_keys()
            .map(|keys| keys.contains(Key::KEY_A))
            .unwrap_or(false)
}

/// Open every `/dev/input/event*` node we can, sorted by path.
fn input_devices() -> miette::Result<Vec<(PathBuf, Device)>> {
    let mut devices = Vec::new();

    for entry in std::fs::read_dir("/dev/input")
        .into_diagnostic()
        .wrap_err("Failed to read /dev/input")?
    {
        let path = entry.into_diagnostic()?.path();
        let is_event_node = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with("event"))
            .unwrap_or(false);
        if !is_event_node {
            continue;
        }

        match Device::open(&path) {
            Ok(device) => devices.push((path, device)),
            Err(e) => tracing::debug!("Could not open {}: {}", path.display(), e),
        }
    }

    devices.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(devices)
}

fn cmd_devices() -> miette::Result<()> {
    let devices = input_devices()?;
    if devices.is_empty() {
        println!("No readable input devices. Are you in the 'input' group?");
        return Ok(());
    }

    println!("Available input devices:\n");
    for (path, device) in &devices {
        let device_type = if is_keyboard(device) { "keyboard" } else { "other" };

        println!("  {} [{}]", device.name().unwrap_or("Unknown"), device_type);
        println!("    Path: {}", path.display());
        println!("    Phys: {}", device.physical_path().unwrap_or("-"));
        println!();
    }

    Ok(())
}

/// Whether `id` names the device by name, phys, path, node name or event number.
fn matches_identifier(id: &str, path: &Path, name: Option<&str>, phys: Option<&str>) -> bool {
    let node = path.file_name().and_then(|n| n.to_str());

    Some(id) == name
        || Some(id) == phys
        || Path::new(id) == path
        || Some(id) == node
        || (!id.is_empty()
            && id.bytes().all(|b| b.is_ascii_digit())
            && node == Some(format!("event{}", id).as_str()))
}

fn cmd_events(id: &str) -> miette::Result<()> {
    let (path, mut device) = input_devices()?
        .into_iter()
        .find(|(path, device)| matches_identifier(id, path, device.name(), device.physical_path()))
        .ok_or_else(|| miette!("No readable input device matches '{}'", id))?;

    nix::unistd::access(path.as_path(), AccessFlags::R_OK)
        .into_diagnostic()
        .wrap_err_with(|| format!("No read access to {}", path.display()))?;

    println!(
        "Reading key events from '{}' ({}). Press Ctrl+C to stop.",
        device.name().unwrap_or("Unknown"),
        path.display()
    );

    loop {
        for event in device.fetch_events().into_diagnostic()? {
            if event.event_type() != EventType::KEY {
                continue;
            }
            println!("{}", describe_key_event(event.code(), event.value()));
        }
    }
}

fn describe_key_event(code: u16, value: i32) -> String {
    let state = match value {
        0 => "up",
        1 => "down",
        2 => "repeat",
        _ => "?",
    };

    if is_known_key_code(code) {
        format!("{:<16} code={:<4} {}", key_name(Key::new(code)), code, state)
    } else {
        format!("{:<16} code={:<4} {}", "<unknown>", code, state)
    }
}

fn cmd_window() -> miette::Result<()> {
    let socket_path = std::env::var_os("NIRI_SOCKET")
        .map(PathBuf::from)
        .ok_or_else(|| miette!("NIRI_SOCKET environment variable not set - is niri running?"))?;

    let mut socket = UnixStream::connect(&socket_path)
        .into_diagnostic()
        .wrap_err_with(|| format!("Failed to connect to niri socket at {}", socket_path.display()))?;

    let request = serde_json::to_string(&niri_ipc::Request::FocusedWindow).into_diagnostic()?;
    socket.write_all(request.as_bytes()).into_diagnostic()?;
    socket.write_all(b"\n").into_diagnostic()?;
    socket.flush().into_diagnostic()?;

    let mut line = String::new();
    BufReader::new(&socket)
        .read_line(&mut line)
        .into_diagnostic()
        .wrap_err("Failed to read niri reply")?;

    match focused_window(&line)? {
        Some((class, title)) => {
            println!("class: {}", class);
            println!("title: {}", title);
        }
        None => println!("No window is focused"),
    }

    Ok(())
}

/// Extract `(class, title)` from a niri reply to `FocusedWindow`.
fn focused_window(reply_line: &str) -> miette::Result<Option<(String, String)>> {
    let reply: niri_ipc::Reply = serde_json::from_str(reply_line)
        .into_diagnostic()
        .wrap_err("Unexpected reply from niri")?;

    match reply.map_err(|message| miette!("Niri returned error: {}", message))? {
        niri_ipc::Response::FocusedWindow(window) => Ok(window.map(|w| {
            (
                w.app_id.unwrap_or_default(),
                w.title.unwrap_or_default(),
            )
        })),
        other => Err(miette!("Unexpected response to FocusedWindow: {:?}", other)),
    }
}
