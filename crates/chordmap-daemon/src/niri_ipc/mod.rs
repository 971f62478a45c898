//! Niri compositor integration
//!
//! The daemon only needs to know which window has focus. It subscribes to
//! niri's event stream on `$NIRI_SOCKET` and mirrors the window list and
//! focus into a [`FocusCache`](crate::window::FocusCache).
//!
//! ## Protocol
//!
//! Clients send one JSON `Request` per line and receive one JSON `Reply`
//! per line. After `Request::EventStream` is acknowledged with
//! `Ok(Handled)` the connection carries only `Event` lines; the first
//! ones describe the current state (the full window list included).

mod error;
mod events;
mod tracker;

use std::path::PathBuf;

pub use error::NiriError;
pub use tracker::spawn_focus_tracker;

/// Environment variable name for the niri socket path
const NIRI_SOCKET_ENV: &str = "NIRI_SOCKET";

/// Discover the niri IPC socket path from the environment.
pub fn get_socket_path() -> Result<PathBuf, NiriError> {
    let socket_path = std::env::var_os(NIRI_SOCKET_ENV)
        .map(PathBuf::from)
        .ok_or(NiriError::SocketNotSet)?;

    if !socket_path.exists() {
        return Err(NiriError::SocketNotFound { path: socket_path });
    }

    Ok(socket_path)
}
