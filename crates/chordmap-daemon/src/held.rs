//! Held-key bookkeeping
//!
//! [`HeldState`] mirrors the physical keyboard: which keys are down, in
//! press order. [`OutputLedger`] mirrors the virtual device: which keys
//! this process has pressed there and whether each one stands for a
//! physical key or was synthesized for a substitution.

use std::collections::BTreeSet;

use chordmap_config::Modifier;
use evdev::Key;

/// Physically held keys of one keyboard, in press order, without duplicates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeldState {
    keys: Vec<Key>,
}

impl HeldState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a press. Returns false if the key was already held.
    pub fn press(&mut self, key: Key) -> bool {
        if self.keys.contains(&key) {
            return false;
        }
        self.keys.push(key);
        true
    }

    /// Record a release. Returns false if the key was not held.
    pub fn release(&mut self, key: Key) -> bool {
        match self.keys.iter().position(|&k| k == key) {
            Some(idx) => {
                self.keys.remove(idx);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, key: Key) -> bool {
        self.keys.contains(&key)
    }

    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    /// Logical modifiers currently held; left and right collapse.
    pub fn modifiers(&self) -> BTreeSet<Modifier> {
        self.keys.iter().filter_map(|&k| Modifier::from_key(k)).collect()
    }

    pub fn has_modifiers(&self) -> bool {
        self.keys.iter().any(|&k| Modifier::from_key(k).is_some())
    }

    pub fn has_non_modifiers(&self) -> bool {
        self.keys.iter().any(|&k| Modifier::from_key(k).is_none())
    }

    pub fn clear(&mut self) {
        self.keys.clear();
    }
}

/// Why a key is down on the virtual device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Forwarded from the physical key of the same code
    Physical,
    /// Pressed on behalf of a substitution
    Synthetic,
}

/// Keys this process holds down on the virtual device, in press order.
#[derive(Debug, Clone, Default)]
pub struct OutputLedger {
    down: Vec<(Key, Origin)>,
}

impl OutputLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_down(&self, key: Key) -> bool {
        self.down.iter().any(|&(k, _)| k == key)
    }

    pub fn origin(&self, key: Key) -> Option<Origin> {
        self.down.iter().find(|&&(k, _)| k == key).map(|&(_, o)| o)
    }

    pub fn press(&mut self, key: Key, origin: Origin) {
        if !self.is_down(key) {
            self.down.push((key, origin));
        }
    }

    pub fn release(&mut self, key: Key) {
        self.down.retain(|&(k, _)| k != key);
    }

    pub fn set_origin(&mut self, key: Key, origin: Origin) {
        if let Some(entry) = self.down.iter_mut().find(|(k, _)| *k == key) {
            entry.1 = origin;
        }
    }

    /// Modifier keys down on the virtual device, in press order.
    pub fn modifier_keys(&self) -> Vec<Key> {
        self.down
            .iter()
            .map(|&(k, _)| k)
            .filter(|&k| Modifier::from_key(k).is_some())
            .collect()
    }

    /// The first key down that stands for the given logical modifier.
    pub fn key_for_modifier(&self, modifier: Modifier) -> Option<Key> {
        self.down
            .iter()
            .map(|&(k, _)| k)
            .find(|&k| Modifier::from_key(k) == Some(modifier))
    }

    #[cfg(test)]
    pub fn keys(&self) -> Vec<Key> {
        self.down.iter().map(|&(k, _)| k).collect()
    }

    /// Forget every key, returning them in reverse press order.
    pub fn drain_reverse(&mut self) -> Vec<Key> {
        let mut keys: Vec<Key> = self.down.drain(..).map(|(k, _)| k).collect();
        keys.reverse();
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_press_is_idempotent() {
        let mut held = HeldState::new();
        assert!(held.press(Key::KEY_A));
        assert!(!held.press(Key::KEY_A));
        assert_eq!(held.keys(), &[Key::KEY_A]);
    }

    #[test]
    fn test_release_of_unheld_key_is_noop() {
        let mut held = HeldState::new();
        held.press(Key::KEY_A);
        assert!(!held.release(Key::KEY_B));
        assert_eq!(held.keys(), &[Key::KEY_A]);
        assert!(held.release(Key::KEY_A));
        assert!(held.keys().is_empty());
    }

    #[test]
    fn test_modifiers_collapse_sides() {
        let mut held = HeldState::new();
        held.press(Key::KEY_LEFTALT);
        held.press(Key::KEY_RIGHTALT);
        held.press(Key::KEY_RIGHTSHIFT);
        held.press(Key::KEY_L);

        assert_eq!(
            held.modifiers(),
            BTreeSet::from([Modifier::Shift, Modifier::Alt])
        );
        assert!(held.has_modifiers());
        assert!(held.has_non_modifiers());

        held.release(Key::KEY_LEFTALT);
        assert!(held.modifiers().contains(&Modifier::Alt));
        held.release(Key::KEY_RIGHTALT);
        assert!(!held.modifiers().contains(&Modifier::Alt));
    }

    #[test]
    fn test_ledger_tracks_origin_and_order() {
        let mut ledger = OutputLedger::new();
        ledger.press(Key::KEY_LEFTALT, Origin::Physical);
        ledger.press(Key::KEY_LEFTCTRL, Origin::Synthetic);
        ledger.press(Key::KEY_C, Origin::Synthetic);
        ledger.press(Key::KEY_C, Origin::Physical);

        assert_eq!(ledger.origin(Key::KEY_C), Some(Origin::Synthetic));
        assert_eq!(
            ledger.modifier_keys(),
            vec![Key::KEY_LEFTALT, Key::KEY_LEFTCTRL]
        );
        assert_eq!(
            ledger.key_for_modifier(Modifier::Ctrl),
            Some(Key::KEY_LEFTCTRL)
        );

        ledger.set_origin(Key::KEY_LEFTALT, Origin::Synthetic);
        assert_eq!(ledger.origin(Key::KEY_LEFTALT), Some(Origin::Synthetic));

        ledger.release(Key::KEY_LEFTCTRL);
        assert_eq!(
            ledger.drain_reverse(),
            vec![Key::KEY_C, Key::KEY_LEFTALT]
        );
        assert!(ledger.keys().is_empty());
    }
}
