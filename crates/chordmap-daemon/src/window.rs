//! Focused window context
//!
//! The matcher asks a [`WindowContext`] for the focused window's class and
//! title only when a filtered mapping is a candidate. [`FocusCache`] is the
//! process-wide implementation: a snapshot kept current by the compositor
//! event stream, so a query never crosses a focus change it has been told
//! about and never blocks on IPC.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use thiserror::Error;

/// Class and title of a window.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WindowInfo {
    /// Application class (the compositor's app_id)
    pub class: String,
    pub title: String,
}

impl WindowInfo {
    pub fn new(class: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            title: title.into(),
        }
    }
}

/// The focused window could not be determined.
///
/// Filtered mappings are treated as unsatisfied; unfiltered ones still apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ContextQueryError {
    #[error("window context unavailable (compositor IPC not connected)")]
    Unavailable,
    #[error("no window is focused")]
    NoFocusedWindow,
}

/// Source of the focused window's class and title.
pub trait WindowContext: Send + Sync {
    fn query(&self) -> Result<WindowInfo, ContextQueryError>;
}

/// A window context that never knows the focused window.
#[cfg(test)]
#[derive(Debug, Clone, Copy, Default)]
pub struct NoWindowContext;

#[cfg(test)]
impl WindowContext for NoWindowContext {
    fn query(&self) -> Result<WindowInfo, ContextQueryError> {
        Err(ContextQueryError::Unavailable)
    }
}

#[derive(Debug, Default)]
struct FocusState {
    connected: bool,
    windows: HashMap<u64, WindowInfo>,
    focused: Option<u64>,
}

/// Shared snapshot of the compositor's windows and focus.
#[derive(Debug, Clone, Default)]
pub struct FocusCache {
    inner: Arc<RwLock<FocusState>>,
}

impl FocusCache {
    /// A cache that reports `Unavailable` until the first window list arrives.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole window list (after connect or a full refresh).
    pub fn replace_windows(
        &self,
        windows: impl IntoIterator<Item = (u64, WindowInfo)>,
        focused: Option<u64>,
    ) {
        self.update(|state| {
            state.connected = true;
            state.windows = windows.into_iter().collect();
            state.focused = focused;
        });
    }

    /// Add or update one window, optionally making it the focused one.
    pub fn upsert_window(&self, id: u64, info: WindowInfo, focused: bool) {
        self.update(|state| {
            state.windows.insert(id, info);
            if focused {
                state.focused = Some(id);
            } else if state.focused == Some(id) {
                state.focused = None;
            }
        });
    }

    pub fn remove_window(&self, id: u64) {
        self.update(|state| {
            state.windows.remove(&id);
            if state.focused == Some(id) {
                state.focused = None;
            }
        });
    }

    pub fn set_focus(&self, id: Option<u64>) {
        self.update(|state| state.focused = id);
    }

    /// Forget everything; queries report `Unavailable` until reconnected.
    pub fn disconnect(&self) {
        self.update(|state| *state = FocusState::default());
    }

    fn update(&self, f: impl FnOnce(&mut FocusState)) {
        match self.inner.write() {
            Ok(mut state) => f(&mut state),
            Err(poisoned) => {
                tracing::warn!("Focus cache lock poisoned, resetting");
                let mut state = poisoned.into_inner();
                *state = FocusState::default();
                f(&mut state);
            }
        }
    }
}

impl WindowContext for FocusCache {
    fn query(&self) -> Result<WindowInfo, ContextQueryError> {
        let state = self
            .inner
            .read()
            .map_err(|_| ContextQueryError::Unavailable)?;

        if !state.connected {
            return Err(ContextQueryError::Unavailable);
        }

        state
            .focused
            .and_then(|id| state.windows.get(&id))
            .cloned()
            .ok_or(ContextQueryError::NoFocusedWindow)
    }
}
