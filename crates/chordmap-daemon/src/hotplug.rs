//! Input device hot-plug monitoring via udev

use std::io;
use std::path::{Path, PathBuf};

use tokio_stream::StreamExt;
use tokio_udev::{AsyncMonitorSocket, EventType, MonitorBuilder};

use crate::device::is_event_node;

/// An event node appeared or disappeared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HotplugEvent {
    Add { devnode: PathBuf },
    Remove { devnode: PathBuf },
}

impl HotplugEvent {
    /// Map a udev event to a hot-plug event; only event nodes count.
    pub fn from_udev(event_type: EventType, devnode: Option<&Path>) -> Option<Self> {
        let devnode = devnode.filter(|p| is_event_node(p))?.to_path_buf();
        match event_type {
            EventType::Add => Some(HotplugEvent::Add { devnode }),
            EventType::Remove => Some(HotplugEvent::Remove { devnode }),
            _ => None,
        }
    }
}

/// udev monitor on the `input` subsystem.
pub struct HotplugMonitor {
    socket: AsyncMonitorSocket,
}

impl HotplugMonitor {
    pub fn new() -> io::Result<Self> {
        let socket = MonitorBuilder::new()?.match_subsystem("input")?.listen()?;
        Ok(Self {
            socket: AsyncMonitorSocket::new(socket)?,
        })
    }

    /// Wait for the next add/remove of an event node.
    ///
    /// Returns `None` when the monitor socket is closed.
    pub async fn next(&mut self) -> Option<HotplugEvent> {
        loop {
            match self.socket.next().await? {
                Ok(event) => {
                    if let Some(hotplug) = HotplugEvent::from_udev(event.event_type(), event.devnode()) {
                        tracing::debug!(event = ?hotplug, "Hotplug event");
                        return Some(hotplug);
                    }
                }
                Err(e) => {
                    tracing::warn!("udev monitor error: {}", e);
                }
            }
        }
    }
}
