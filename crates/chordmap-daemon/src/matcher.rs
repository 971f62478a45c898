//! Key combination matching
//!
//! # State Machine
//!
//! One [`Matcher`] runs per physical keyboard. Every key transition is
//! classified (see [`EventClass`]) and looked up in [`TRANSITIONS`], a
//! total table keyed by `(state, class)` that yields the next state and
//! the [`Step`] to run.
//!
//! ```text
//!                  modifier press               key press (mapping)
//!  ┌──────────┐ ─────────────────► ┌─────────┐ ────────────────► ┌─────────┐
//!  │   INIT   │                    │ PRE_MOD │                   │ MATCHED │
//!  └──────────┘ ◄───────────────── └─────────┘ ─────┐            └─────────┘
//!    │      ▲    last modifier up        ▲          │ key press       │  ▲
//!    │      │                            │          │ (no mapping)    │  │
//!    │ key  │ last key up                │          ▼                 ▼  │
//!    │ press│ (no modifier held)         │       ┌───────────┐  key press│
//!    ▼      │                            │       │ UNMATCHED │ ◄────────┘ │
//!  ┌─────────────┐  last key up          │       └───────────┘ ───────────┘
//!  │ PRESSED_KEY │ ──────────────────────┘
//!  └─────────────┘  (modifier held)
//! ```
//!
//! MATCHED and UNMATCHED return to INIT when the last modifier is released.
//!
//! ## Modifier Buffering
//!
//! A modifier press is held back while the held modifier set can still
//! grow into a configured source combination. It is flushed (forwarded)
//! as soon as that is no longer possible or a key is passed through, is
//! consumed when a mapping matches, and is replayed as a tap when
//! released unused. With no mappings nothing is ever held back.
//!
//! ## Output Bookkeeping
//!
//! The [`OutputLedger`] records every key down on the virtual device, so
//! a key is never pressed twice without a release, releases are only
//! sent for keys that are down, and [`Matcher::release_all`] can lift
//! everything on shutdown. At most one substitution is active; starting
//! another one, or passing a key through, ends the current one first.

use std::sync::Arc;

use chordmap_config::{Combination, Modifier};
use evdev::Key;

use crate::event::{KeyEvent, KeyKind};
use crate::held::{HeldState, Origin, OutputLedger};
use crate::mapping::MappingTable;
use crate::window::WindowContext;

/// Matcher states.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum MatcherState {
    /// Nothing of interest held
    #[default]
    PreMatchInit,
    /// A non-modifier key went down first; combinations are not evaluated
    PreMatchPressedKey,
    /// Modifiers are held, waiting for a trigger key
    PreMatchPressedModifier,
    /// The last trigger press was substituted
    Matched,
    /// The last trigger press was passed through
    Unmatched,
}

/// Classification of a key transition against the held state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventClass {
    ModifierPress,
    /// A modifier went up while another modifier is still held
    ModifierRelease,
    /// The last held modifier went up
    LastModifierRelease,
    KeyPress,
    /// A non-modifier went up while another non-modifier is still held
    KeyRelease,
    /// The last held non-modifier went up
    LastKeyRelease,
    Repeat,
}

/// Where a transition leads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Stay,
    State(MatcherState),
    /// PRE_MOD if a modifier is still held, INIT otherwise
    Settle,
    /// MATCHED or UNMATCHED depending on the lookup
    Verdict,
}

/// What a transition does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Buffer or forward a modifier press
    Hold,
    /// Forward a key press
    Passthrough,
    /// Look the combination up and substitute or forward
    Evaluate,
    /// Resolve a release against buffered, consumed and emitted keys
    Release,
    /// Forward or rewrite an autorepeat
    Repeat,
}

#[derive(Debug, Clone, Copy)]
pub struct Transition {
    pub from: MatcherState,
    pub on: EventClass,
    pub to: Target,
    pub step: Step,
}

const fn row(from: MatcherState, on: EventClass, to: Target, step: Step) -> Transition {
    Transition { from, on, to, step }
}

use EventClass::*;
use MatcherState::*;

/// The complete transition table.
pub static TRANSITIONS: &[Transition] = &[
    row(PreMatchInit, ModifierPress, Target::State(PreMatchPressedModifier), Step::Hold),
    row(PreMatchInit, ModifierRelease, Target::Stay, Step::Release),
    row(PreMatchInit, LastModifierRelease, Target::Stay, Step::Release),
    row(PreMatchInit, KeyPress, Target::State(PreMatchPressedKey), Step::Passthrough),
    row(PreMatchInit, KeyRelease, Target::Stay, Step::Release),
    row(PreMatchInit, LastKeyRelease, Target::Settle, Step::Release),
    row(PreMatchInit, Repeat, Target::Stay, Step::Repeat),
    //
    row(PreMatchPressedKey, ModifierPress, Target::Stay, Step::Hold),
    row(PreMatchPressedKey, ModifierRelease, Target::Stay, Step::Release),
    row(PreMatchPressedKey, LastModifierRelease, Target::Stay, Step::Release),
    row(PreMatchPressedKey, KeyPress, Target::Stay, Step::Passthrough),
    row(PreMatchPressedKey, KeyRelease, Target::Stay, Step::Release),
    row(PreMatchPressedKey, LastKeyRelease, Target::Settle, Step::Release),
    row(PreMatchPressedKey, Repeat, Target::Stay, Step::Repeat),
    //
    row(PreMatchPressedModifier, ModifierPress, Target::Stay, Step::Hold),
    row(PreMatchPressedModifier, ModifierRelease, Target::Stay, Step::Release),
    row(PreMatchPressedModifier, LastModifierRelease, Target::State(PreMatchInit), Step::Release),
    row(PreMatchPressedModifier, KeyPress, Target::Verdict, Step::Evaluate),
    row(PreMatchPressedModifier, KeyRelease, Target::Stay, Step::Release),
    row(PreMatchPressedModifier, LastKeyRelease, Target::Stay, Step::Release),
    row(PreMatchPressedModifier, Repeat, Target::Stay, Step::Repeat),
    //
    row(Matched, ModifierPress, Target::Stay, Step::Hold),
    row(Matched, ModifierRelease, Target::Stay, Step::Release),
    row(Matched, LastModifierRelease, Target::State(PreMatchInit), Step::Release),
    row(Matched, KeyPress, Target::Verdict, Step::Evaluate),
    row(Matched, KeyRelease, Target::Stay, Step::Release),
    row(Matched, LastKeyRelease, Target::Stay, Step::Release),
    row(Matched, Repeat, Target::Stay, Step::Repeat),
    //
    row(Unmatched, ModifierPress, Target::Stay, Step::Hold),
    row(Unmatched, ModifierRelease, Target::Stay, Step::Release),
    row(Unmatched, LastModifierRelease, Target::State(PreMatchInit), Step::Release),
    row(Unmatched, KeyPress, Target::Verdict, Step::Evaluate),
    row(Unmatched, KeyRelease, Target::Stay, Step::Release),
    row(Unmatched, LastKeyRelease, Target::Stay, Step::Release),
    row(Unmatched, Repeat, Target::Stay, Step::Repeat),
];

/// Find the transition for a state and event class.
pub fn transition(from: MatcherState, on: EventClass) -> Option<&'static Transition> {
    TRANSITIONS.iter().find(|t| t.from == from && t.on == on)
}

/// A substitution whose trigger key is still held.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ActiveSubstitution {
    trigger: Key,
    dst: Combination,
    /// Physical modifiers lifted on the virtual device for this substitution
    suspended: Vec<Key>,
}

/// Per-keyboard combination matcher.
pub struct Matcher {
    table: Arc<MappingTable>,
    context: Arc<dyn WindowContext>,
    state: MatcherState,
    held: HeldState,
    output: OutputLedger,
    /// Buffered modifier presses, in press order
    pending: Vec<Key>,
    /// Modifiers swallowed by a match; never emitted
    consumed: Vec<Key>,
    active: Option<ActiveSubstitution>,
    /// Held trigger keys of ended substitutions; their release is dropped
    swallowed: Vec<Key>,
}

impl Matcher {
    pub fn new(table: Arc<MappingTable>, context: Arc<dyn WindowContext>) -> Self {
        Self {
            table,
            context,
            state: MatcherState::default(),
            held: HeldState::new(),
            output: OutputLedger::new(),
            pending: Vec::new(),
            consumed: Vec::new(),
            active: None,
            swallowed: Vec::new(),
        }
    }

    /// Process one key transition and return the transitions to emit.
    pub fn process(&mut self, event: KeyEvent) -> Vec<KeyEvent> {
        let Some(class) = self.classify(event) else {
            tracing::trace!(event = %event, "Ignored (duplicate press or release of unheld key)");
            return Vec::new();
        };

        let Some(t) = transition(self.state, class) else {
            tracing::error!(state = ?self.state, class = ?class, "No transition defined, dropping event");
            return Vec::new();
        };

        let mut out = Vec::new();
        let matched = match t.step {
            Step::Hold => {
                self.hold(event.key, &mut out);
                false
            }
            Step::Passthrough => {
                self.passthrough(event.key, &mut out);
                false
            }
            Step::Evaluate => self.evaluate(event.key, &mut out),
            Step::Release => {
                self.release(event.key, &mut out);
                false
            }
            Step::Repeat => {
                self.repeat(event.key, &mut out);
                false
            }
        };

        let next = match t.to {
            Target::Stay => self.state,
            Target::State(state) => state,
            Target::Settle if self.held.has_modifiers() => PreMatchPressedModifier,
            Target::Settle => PreMatchInit,
            Target::Verdict if matched => Matched,
            Target::Verdict => Unmatched,
        };

        if next != self.state {
            tracing::debug!(from = ?self.state, to = ?next, event = %event, "State transition");
        }
        self.state = next;

        tracing::trace!(event = %event, output = ?out, "Processed");
        out
    }

    /// Lift every key this matcher holds down on the virtual device and reset.
    pub fn release_all(&mut self) -> Vec<KeyEvent> {
        let out: Vec<KeyEvent> = self
            .output
            .drain_reverse()
            .into_iter()
            .map(KeyEvent::release)
            .collect();

        self.held.clear();
        self.pending.clear();
        self.consumed.clear();
        self.swallowed.clear();
        self.active = None;
        self.state = PreMatchInit;
        out
    }

    /// Update the held state and classify; `None` for no-op events.
    fn classify(&mut self, event: KeyEvent) -> Option<EventClass> {
        let is_modifier = Modifier::from_key(event.key).is_some();

        match event.kind {
            KeyKind::Repeated => Some(Repeat),
            KeyKind::Pressed => {
                if !self.held.press(event.key) {
                    return None;
                }
                Some(if is_modifier { ModifierPress } else { KeyPress })
            }
            KeyKind::Released => {
                if !self.held.release(event.key) {
                    return None;
                }
                Some(match (is_modifier, is_modifier && self.held.has_modifiers()) {
                    (true, true) => ModifierRelease,
                    (true, false) => LastModifierRelease,
                    (false, _) if self.held.has_non_modifiers() => KeyRelease,
                    (false, _) => LastKeyRelease,
                })
            }
        }
    }

    fn hold(&mut self, key: Key, out: &mut Vec<KeyEvent>) {
        if self.table.could_match(&self.held.modifiers()) {
            tracing::debug!(key = ?key, "Buffering modifier");
            self.pending.push(key);
            return;
        }

        self.flush(false, out);
        self.press(key, Origin::Physical, out);
    }

    fn passthrough(&mut self, key: Key, out: &mut Vec<KeyEvent>) {
        self.end_substitution(true, out);
        self.flush(true, out);
        self.press(key, Origin::Physical, out);
    }

    /// Returns true if a mapping matched.
    fn evaluate(&mut self, key: Key, out: &mut Vec<KeyEvent>) -> bool {
        let combo = Combination {
            modifiers: self.held.modifiers(),
            key,
        };

        let dst = self
            .table
            .resolve(&combo, self.context.as_ref())
            .map(|m| m.dst.clone());

        match dst {
            Some(dst) => {
                tracing::debug!("Matched {} -> {}", combo, dst);
                self.substitute(key, dst, out);
                true
            }
            None => {
                tracing::debug!("No mapping for {}, passing through", combo);
                self.passthrough(key, out);
                false
            }
        }
    }

    fn substitute(&mut self, trigger: Key, dst: Combination, out: &mut Vec<KeyEvent>) {
        let mut suspended = self.end_substitution(false, out);
        self.consumed.append(&mut self.pending);

        for key in self.output.modifier_keys().into_iter().rev() {
            let needed = Modifier::from_key(key).is_some_and(|m| dst.modifiers.contains(&m));
            if !needed {
                if self.output.origin(key) == Some(Origin::Physical) && !suspended.contains(&key) {
                    suspended.push(key);
                }
                self.lift(key, out);
            }
        }

        for &modifier in &dst.modifiers {
            if self.output.key_for_modifier(modifier).is_none() {
                self.press(modifier.to_key(), Origin::Synthetic, out);
            }
        }

        self.lift(dst.key, out);
        self.press(dst.key, Origin::Synthetic, out);

        self.active = Some(ActiveSubstitution {
            trigger,
            dst,
            suspended,
        });
    }

    /// End the active substitution, if any.
    ///
    /// With `restore`, lifted physical modifiers still held go back down and
    /// an empty list is returned; otherwise they are returned to the caller.
    fn end_substitution(&mut self, restore: bool, out: &mut Vec<KeyEvent>) -> Vec<Key> {
        let Some(active) = self.active.take() else {
            return Vec::new();
        };

        self.lift(active.dst.key, out);
        for key in self.output.modifier_keys().into_iter().rev() {
            if self.output.origin(key) == Some(Origin::Synthetic) {
                self.lift(key, out);
            }
        }

        if self.held.contains(active.trigger) {
            self.swallowed.push(active.trigger);
        }

        let still_held: Vec<Key> = active
            .suspended
            .into_iter()
            .filter(|&k| self.held.contains(k))
            .collect();

        if !restore {
            return still_held;
        }
        for key in still_held {
            self.press(key, Origin::Physical, out);
        }
        Vec::new()
    }

    /// Forward buffered (and optionally consumed) modifiers in press order.
    fn flush(&mut self, include_consumed: bool, out: &mut Vec<KeyEvent>) {
        let keys: Vec<Key> = self
            .held
            .keys()
            .iter()
            .copied()
            .filter(|k| {
                self.pending.contains(k) || (include_consumed && self.consumed.contains(k))
            })
            .collect();

        self.pending.clear();
        if include_consumed {
            self.consumed.clear();
        }
        for key in keys {
            self.press(key, Origin::Physical, out);
        }
    }

    fn release(&mut self, key: Key, out: &mut Vec<KeyEvent>) {
        if let Some(active) = self.active.as_mut() {
            active.suspended.retain(|&k| k != key);
        }

        if let Some(idx) = self.pending.iter().position(|&k| k == key) {
            self.pending.remove(idx);
            if !self.output.is_down(key) {
                tracing::debug!(key = ?key, "Replaying unused modifier as a tap");
                out.push(KeyEvent::press(key));
                out.push(KeyEvent::release(key));
            }
            return;
        }

        if let Some(idx) = self.consumed.iter().position(|&k| k == key) {
            self.consumed.remove(idx);
            return;
        }

        if self.active.as_ref().is_some_and(|a| a.trigger == key) {
            self.end_substitution(true, out);
            return;
        }

        if let Some(idx) = self.swallowed.iter().position(|&k| k == key) {
            self.swallowed.remove(idx);
            return;
        }

        if self.is_needed_by_active(key) {
            tracing::debug!(key = ?key, "Deferring modifier release until substitution ends");
            self.output.set_origin(key, Origin::Synthetic);
            return;
        }

        self.lift(key, out);
    }

    fn repeat(&mut self, key: Key, out: &mut Vec<KeyEvent>) {
        if !self.held.contains(key) {
            return;
        }

        if let Some(active) = &self.active {
            if active.trigger == key {
                if self.output.is_down(active.dst.key) {
                    out.push(KeyEvent::repeat(active.dst.key));
                }
                return;
            }
        }

        if self.output.origin(key) == Some(Origin::Physical) {
            out.push(KeyEvent::repeat(key));
        }
    }

    /// Whether `key` is the virtual-device key backing a modifier the
    /// active substitution's destination needs.
    fn is_needed_by_active(&self, key: Key) -> bool {
        let (Some(active), Some(modifier)) = (&self.active, Modifier::from_key(key)) else {
            return false;
        };
        active.dst.modifiers.contains(&modifier)
            && self.output.key_for_modifier(modifier) == Some(key)
    }

    fn press(&mut self, key: Key, origin: Origin, out: &mut Vec<KeyEvent>) {
        if !self.output.is_down(key) {
            self.output.press(key, origin);
            out.push(KeyEvent::press(key));
        }
    }

    fn lift(&mut self, key: Key, out: &mut Vec<KeyEvent>) {
        if self.output.is_down(key) {
            self.output.release(key);
            out.push(KeyEvent::release(key));
        }
    }
}

#[cfg(test)]
impl Matcher {
    pub fn state(&self) -> MatcherState {
        self.state
    }

    pub fn held(&self) -> &HeldState {
        &self.held
    }

    /// Keys currently down on the virtual device, in press order.
    pub fn emitted_keys(&self) -> Vec<Key> {
        self.output.keys()
    }
}
