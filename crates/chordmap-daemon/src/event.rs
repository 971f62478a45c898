//! Key transitions and the source/sink seams of the relay loop

use std::fmt;
use std::future::Future;

use chordmap_config::{is_known_key_code, key_name};
use evdev::{EventType, InputEvent, Key};
use thiserror::Error;

use crate::error::DeviceError;

/// Event value constants for key events.
pub mod event_value {
    pub const RELEASE: i32 = 0;
    pub const PRESS: i32 = 1;
    pub const REPEAT: i32 = 2;
}

/// Direction of a key transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyKind {
    Pressed,
    Released,
    /// Kernel autorepeat of a key that is held down
    Repeated,
}

/// A single key transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyEvent {
    pub key: Key,
    pub kind: KeyKind,
}

impl KeyEvent {
    pub fn press(key: Key) -> Self {
        Self {
            key,
            kind: KeyKind::Pressed,
        }
    }

    pub fn release(key: Key) -> Self {
        Self {
            key,
            kind: KeyKind::Released,
        }
    }

    pub fn repeat(key: Key) -> Self {
        Self {
            key,
            kind: KeyKind::Repeated,
        }
    }

    /// The evdev value for this transition.
    pub fn value(&self) -> i32 {
        match self.kind {
            KeyKind::Released => event_value::RELEASE,
            KeyKind::Pressed => event_value::PRESS,
            KeyKind::Repeated => event_value::REPEAT,
        }
    }

    pub fn to_input_event(self) -> InputEvent {
        InputEvent::new(EventType::KEY, self.key.code(), self.value())
    }
}

impl fmt::Display for KeyEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let arrow = match self.kind {
            KeyKind::Pressed => "down",
            KeyKind::Released => "up",
            KeyKind::Repeated => "repeat",
        };
        write!(f, "{} {}", key_name(self.key), arrow)
    }
}

/// An input event referencing a key code outside the kernel key range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("unknown key code {code}")]
pub struct UnknownKeyCode {
    pub code: u16,
}

/// Turn a raw input event into a key transition.
///
/// Non-key events and key events with an unexpected value yield
/// `Ok(None)`; the relay forwards the former on its own.
pub fn classify(event: &InputEvent) -> Result<Option<KeyEvent>, UnknownKeyCode> {
    if event.event_type() != EventType::KEY {
        return Ok(None);
    }

    let code = event.code();
    if !is_known_key_code(code) {
        return Err(UnknownKeyCode { code });
    }

    let key = Key::new(code);
    let kind = match event.value() {
        event_value::PRESS => KeyKind::Pressed,
        event_value::RELEASE => KeyKind::Released,
        event_value::REPEAT => KeyKind::Repeated,
        _ => return Ok(None),
    };

    Ok(Some(KeyEvent { key, kind }))
}

/// Where raw input events of one physical keyboard come from.
pub trait KeySource {
    /// Wait for the next raw event. Errors are fatal to the device.
    fn next_event(&mut self) -> impl Future<Output = Result<InputEvent, DeviceError>> + Send;
}

/// Where the key transitions of one keyboard are written to.
pub trait KeySink {
    /// Write transitions in order, each followed by its own SYN_REPORT.
    fn emit(&mut self, events: &[KeyEvent]) -> Result<(), DeviceError>;

    /// Write one frame of non-key events (pointer motion, wheel, switches)
    /// unchanged, terminated by a single SYN_REPORT.
    fn forward(&mut self, frame: &[InputEvent]) -> Result<(), DeviceError>;
}

impl KeySource for evdev::EventStream {
    async fn next_event(&mut self) -> Result<InputEvent, DeviceError> {
        evdev::EventStream::next_event(self)
            .await
            .map_err(|source| DeviceError::Read {
                name: self.device().name().unwrap_or("Unknown").to_string(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_key_events() {
        let press = InputEvent::new(EventType::KEY, Key::KEY_L.code(), 1);
        let release = InputEvent::new(EventType::KEY, Key::KEY_L.code(), 0);
        let repeat = InputEvent::new(EventType::KEY, Key::KEY_L.code(), 2);

        assert_eq!(classify(&press), Ok(Some(KeyEvent::press(Key::KEY_L))));
        assert_eq!(classify(&release), Ok(Some(KeyEvent::release(Key::KEY_L))));
        assert_eq!(classify(&repeat), Ok(Some(KeyEvent::repeat(Key::KEY_L))));
    }

    #[test]
    fn test_classify_ignores_non_key_events() {
        let syn = InputEvent::new(EventType::SYNCHRONIZATION, 0, 0);
        let msc = InputEvent::new(EventType::MISC, 4, 0x70026);
        assert_eq!(classify(&syn), Ok(None));
        assert_eq!(classify(&msc), Ok(None));
    }

    #[test]
    fn test_classify_unknown_code() {
        let reserved = InputEvent::new(EventType::KEY, 0, 1);
        let too_high = InputEvent::new(EventType::KEY, 0x300, 1);
        assert_eq!(classify(&reserved), Err(UnknownKeyCode { code: 0 }));
        assert_eq!(classify(&too_high), Err(UnknownKeyCode { code: 0x300 }));
    }

    #[test]
    fn test_classify_unexpected_value() {
        let odd = InputEvent::new(EventType::KEY, Key::KEY_A.code(), 7);
        assert_eq!(classify(&odd), Ok(None));
    }

    #[test]
    fn test_to_input_event() {
        let ev = KeyEvent::repeat(Key::KEY_RIGHT).to_input_event();
        assert_eq!(ev.event_type(), EventType::KEY);
        assert_eq!(ev.code(), Key::KEY_RIGHT.code());
        assert_eq!(ev.value(), 2);
    }

    #[test]
    fn test_display() {
        assert_eq!(KeyEvent::press(Key::KEY_LEFTALT).to_string(), "leftalt down");
        assert_eq!(KeyEvent::release(Key::KEY_L).to_string(), "l up");
    }
}
