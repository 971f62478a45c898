//! Focus tracking from the niri event stream

use std::path::PathBuf;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::events::{NiriEventStream, DEFAULT_MAX_RETRIES};
use super::{get_socket_path, NiriError};
use crate::window::{FocusCache, WindowInfo};

fn window_info(window: &niri_ipc::Window) -> WindowInfo {
    WindowInfo::new(
        window.app_id.clone().unwrap_or_default(),
        window.title.clone().unwrap_or_default(),
    )
}

/// Keeps a [`FocusCache`] in sync with the compositor.
#[derive(Debug, Clone)]
pub struct FocusTracker {
    cache: FocusCache,
    socket_path: PathBuf,
    max_retries: u32,
}

impl FocusTracker {
    pub fn new(cache: FocusCache, socket_path: PathBuf) -> Self {
        Self {
            cache,
            socket_path,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    #[cfg(test)]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Apply one compositor event to the cache.
    pub fn apply(&self, event: niri_ipc::Event) {
        match event {
            niri_ipc::Event::WindowsChanged { windows } => {
                let focused = windows.iter().find(|w| w.is_focused).map(|w| w.id);
                debug!(count = windows.len(), focused = ?focused, "Window list replaced");
                self.cache
                    .replace_windows(windows.iter().map(|w| (w.id, window_info(w))), focused);
            }
            niri_ipc::Event::WindowOpenedOrChanged { window } => {
                self.cache
                    .upsert_window(window.id, window_info(&window), window.is_focused);
            }
            niri_ipc::Event::WindowClosed { id } => self.cache.remove_window(id),
            niri_ipc::Event::WindowFocusChanged { id } => {
                debug!(id = ?id, "Window focus changed");
                self.cache.set_focus(id);
            }
            _ => {}
        }
    }

    /// Follow the event stream until reconnecting is no longer possible.
    ///
    /// The cache reports the window context as unavailable whenever the
    /// stream is down.
    pub async fn run(self) -> Result<(), NiriError> {
        let mut stream =
            NiriEventStream::connect_with_retry(&self.socket_path, self.max_retries).await?;
        info!(path = %self.socket_path.display(), "Tracking focused window via niri");

        loop {
            match stream.next_event().await {
                Ok(event) => self.apply(event),
                Err(e @ NiriError::DeserializeFailed(_)) => {
                    debug!("Ignoring niri event: {}", e);
                }
                Err(e) if e.is_disconnect() => {
                    self.cache.disconnect();
                    warn!("Niri event stream lost ({}). Attempting to reconnect...", e);

                    match NiriEventStream::connect_with_retry(&self.socket_path, self.max_retries)
                        .await
                    {
                        Ok(new_stream) => {
                            info!("Niri event stream reconnected");
                            stream = new_stream;
                        }
                        Err(e) => return Err(e),
                    }
                }
                Err(e) => {
                    self.cache.disconnect();
                    return Err(e);
                }
            }
        }
    }
}

/// Start tracking focus in the background.
///
/// Returns `None` when niri is not reachable at all; window filters then
/// never match and unfiltered mappings keep working.
pub fn spawn_focus_tracker(cache: FocusCache) -> Option<JoinHandle<()>> {
    let socket_path = match get_socket_path() {
        Ok(path) => path,
        Err(e) => {
            warn!("{}. Window filters are disabled.", e);
            return None;
        }
    };

    let tracker = FocusTracker::new(cache, socket_path);
    Some(tokio::spawn(async move {
        if let Err(e) = tracker.run().await {
            warn!(
                "Niri IPC unavailable: {}. Window filters are disabled; \
                 the daemon keeps running without them.",
                e
            );
        }
    }))
}
