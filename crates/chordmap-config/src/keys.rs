//! Key names, modifiers and key combinations
//!
//! A [`Combination`] is a set of logical [`Modifier`]s plus exactly one
//! non-modifier trigger key, written in the configuration as `+`-joined
//! names such as `"alt+shift+l"`.
//!
//! ## Modifier Normalization
//!
//! Left and right variants collapse to one logical modifier:
//! - `KEY_LEFTCTRL` / `KEY_RIGHTCTRL` -> `Modifier::Ctrl`
//! - `KEY_LEFTSHIFT` / `KEY_RIGHTSHIFT` -> `Modifier::Shift`
//! - `KEY_LEFTALT` / `KEY_RIGHTALT` -> `Modifier::Alt`
//! - `KEY_LEFTMETA` / `KEY_RIGHTMETA` -> `Modifier::Meta`
//!
//! `KEY_CAPSLOCK` is a modifier of its own (`Modifier::CapsLock`), so
//! `caps_lock+h` is a valid combination. A lone caps lock tap still
//! reaches the session.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use evdev::Key;

/// Highest key code the kernel defines (`KEY_MAX`).
pub const KEY_CODE_MAX: u16 = 0x2ff;

/// Returns true if `code` belongs to the kernel key code range.
///
/// Code 0 is `KEY_RESERVED` and never produced by a real key.
pub fn is_known_key_code(code: u16) -> bool {
    (1..=KEY_CODE_MAX).contains(&code)
}

/// Normalized modifier key representation.
///
/// The derived ordering (Ctrl, Shift, Alt, Meta, CapsLock) is the order in
/// which destination modifiers are pressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Modifier {
    /// Control key (left or right)
    Ctrl,
    /// Shift key (left or right)
    Shift,
    /// Alt key (left or right)
    Alt,
    /// Meta/Super/Windows key (left or right)
    Meta,
    /// Caps lock
    CapsLock,
}

impl Modifier {
    /// All logical modifiers, in press order.
    pub const ALL: [Modifier; 5] = [
        Modifier::Ctrl,
        Modifier::Shift,
        Modifier::Alt,
        Modifier::Meta,
        Modifier::CapsLock,
    ];

    /// Check if an evdev key is a modifier and return its normalized form.
    pub fn from_key(key: Key) -> Option<Self> {
        match key {
            Key::KEY_LEFTCTRL | Key::KEY_RIGHTCTRL => Some(Modifier::Ctrl),
            Key::KEY_LEFTSHIFT | Key::KEY_RIGHTSHIFT => Some(Modifier::Shift),
            Key::KEY_LEFTALT | Key::KEY_RIGHTALT => Some(Modifier::Alt),
            Key::KEY_LEFTMETA | Key::KEY_RIGHTMETA => Some(Modifier::Meta),
            Key::KEY_CAPSLOCK => Some(Modifier::CapsLock),
            _ => None,
        }
    }

    /// Parse a modifier name (case-insensitive, `-` and `_` interchangeable).
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().replace('-', "_").as_str() {
            "ctrl" | "control" | "left_ctrl" | "right_ctrl" | "lctrl" | "rctrl" | "leftctrl"
            | "rightctrl" => Some(Modifier::Ctrl),
            "shift" | "left_shift" | "right_shift" | "lshift" | "rshift" | "leftshift"
            | "rightshift" => Some(Modifier::Shift),
            "alt" | "left_alt" | "right_alt" | "lalt" | "ralt" | "leftalt" | "rightalt" => {
                Some(Modifier::Alt)
            }
            "meta" | "super" | "win" | "windows" | "mod" | "left_meta" | "right_meta" | "lmeta"
            | "rmeta" | "leftmeta" | "rightmeta" => Some(Modifier::Meta),
            "caps_lock" | "capslock" | "caps" => Some(Modifier::CapsLock),
            _ => None,
        }
    }

    /// The key emitted on the virtual device for this modifier (left variant).
    pub fn to_key(self) -> Key {
        match self {
            Modifier::Ctrl => Key::KEY_LEFTCTRL,
            Modifier::Shift => Key::KEY_LEFTSHIFT,
            Modifier::Alt => Key::KEY_LEFTALT,
            Modifier::Meta => Key::KEY_LEFTMETA,
            Modifier::CapsLock => Key::KEY_CAPSLOCK,
        }
    }
}

impl fmt::Display for Modifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Modifier::Ctrl => write!(f, "ctrl"),
            Modifier::Shift => write!(f, "shift"),
            Modifier::Alt => write!(f, "alt"),
            Modifier::Meta => write!(f, "meta"),
            Modifier::CapsLock => write!(f, "caps_lock"),
        }
    }
}

/// Returns true if `key` is a modifier key (either side, or caps lock).
pub fn is_modifier(key: Key) -> bool {
    Modifier::from_key(key).is_some()
}

/// Lowercase display name of a key without the `KEY_` prefix (`KEY_L` -> `l`).
///
/// Codes the kernel leaves unnamed are shown as `code_<n>`.
pub fn key_name(key: Key) -> String {
    let debug = format!("{:?}", key);
    if debug.starts_with("unknown") {
        return format!("code_{}", key.code());
    }
    debug
        .strip_prefix("KEY_")
        .unwrap_or(&debug)
        .to_lowercase()
}

/// A set of modifiers plus one trigger key.
///
/// Modifier order is irrelevant: `alt+shift+l` equals `shift+alt+l`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Combination {
    /// Logical modifiers that must be held
    pub modifiers: BTreeSet<Modifier>,
    /// The non-modifier key that completes the combination
    pub key: Key,
}

impl Combination {
    /// Create a combination with no modifiers.
    pub fn new(key: Key) -> Self {
        Self {
            modifiers: BTreeSet::new(),
            key,
        }
    }

    /// Create a combination with the given modifiers.
    pub fn with_modifiers(modifiers: impl IntoIterator<Item = Modifier>, key: Key) -> Self {
        Self {
            modifiers: modifiers.into_iter().collect(),
            key,
        }
    }
}

impl fmt::Display for Combination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for modifier in &self.modifiers {
            write!(f, "{}+", modifier)?;
        }
        write!(f, "{}", key_name(self.key))
    }
}

impl FromStr for Combination {
    type Err = CombinationParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_combination(s)
    }
}

/// Error type for combination parsing failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CombinationParseError {
    /// The original input string that failed to parse
    pub input: String,
    /// What went wrong
    pub reason: CombinationParseReason,
}

/// The specific reason a combination string was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CombinationParseReason {
    Empty,
    EmptyComponent,
    UnknownKey(String),
    DuplicateModifier(Modifier),
    MultipleTriggers(String),
    NoTrigger,
}

impl fmt::Display for CombinationParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid combination '{}': ", self.input)?;
        match &self.reason {
            CombinationParseReason::Empty => write!(f, "empty input"),
            CombinationParseReason::EmptyComponent => write!(f, "empty component"),
            CombinationParseReason::UnknownKey(key) => write!(f, "unknown key '{}'", key),
            CombinationParseReason::DuplicateModifier(m) => write!(f, "duplicate modifier {}", m),
            CombinationParseReason::MultipleTriggers(key) => write!(
                f,
                "expected exactly one non-modifier key, got '{}' after already finding one",
                key
            ),
            CombinationParseReason::NoTrigger => {
                write!(f, "no trigger key found (only modifiers specified)")
            }
        }
    }
}

impl std::error::Error for CombinationParseError {}

/// Parse a `+`-joined combination string such as `"alt+shift+l"`.
///
/// Components are case-insensitive and may be padded with whitespace.
/// Exactly one component must be a non-modifier key.
pub fn parse_combination(input: &str) -> Result<Combination, CombinationParseError> {
    let input = input.trim();
    let fail = |reason| CombinationParseError {
        input: input.to_string(),
        reason,
    };

    if input.is_empty() {
        return Err(fail(CombinationParseReason::Empty));
    }

    let parts: Vec<&str> = input.split('+').map(str::trim).collect();
    if parts.iter().any(|p| p.is_empty()) {
        return Err(fail(CombinationParseReason::EmptyComponent));
    }

    let mut modifiers = BTreeSet::new();
    let mut trigger: Option<Key> = None;

    for part in parts {
        let modifier =
            Modifier::from_name(part).or_else(|| parse_key(part).and_then(Modifier::from_key));
        if let Some(modifier) = modifier {
            if !modifiers.insert(modifier) {
                return Err(fail(CombinationParseReason::DuplicateModifier(modifier)));
            }
            continue;
        }

        let key = parse_key(part)
            .ok_or_else(|| fail(CombinationParseReason::UnknownKey(part.to_string())))?;
        if trigger.replace(key).is_some() {
            return Err(fail(CombinationParseReason::MultipleTriggers(part.to_string())));
        }
    }

    match trigger {
        Some(key) => Ok(Combination { modifiers, key }),
        None => Err(fail(CombinationParseReason::NoTrigger)),
    }
}

/// Parse a single key name to an evdev key.
///
/// Accepts a small alias table, then any kernel key name with or without
/// the `KEY_` prefix (`l`, `right`, `f13`, `KEY_VOLUMEUP`).
pub fn parse_key(name: &str) -> Option<Key> {
    let name = name.trim();
    let symbol = match name {
        "=" => Some(Key::KEY_EQUAL),
        "-" => Some(Key::KEY_MINUS),
        "[" => Some(Key::KEY_LEFTBRACE),
        "]" => Some(Key::KEY_RIGHTBRACE),
        ";" => Some(Key::KEY_SEMICOLON),
        "'" => Some(Key::KEY_APOSTROPHE),
        "`" => Some(Key::KEY_GRAVE),
        "\\" => Some(Key::KEY_BACKSLASH),
        "," => Some(Key::KEY_COMMA),
        "." => Some(Key::KEY_DOT),
        "/" => Some(Key::KEY_SLASH),
        _ => None,
    };
    if symbol.is_some() {
        return symbol;
    }

    let upper = name.to_uppercase().replace('-', "_");
    let alias = match upper.as_str() {
        "ESCAPE" => Some(Key::KEY_ESC),
        "RETURN" => Some(Key::KEY_ENTER),
        "CAPS_LOCK" | "CAPS" => Some(Key::KEY_CAPSLOCK),
        "NUM_LOCK" => Some(Key::KEY_NUMLOCK),
        "SCROLL_LOCK" => Some(Key::KEY_SCROLLLOCK),
        "DEL" => Some(Key::KEY_DELETE),
        "INS" => Some(Key::KEY_INSERT),
        "PGUP" | "PAGE_UP" => Some(Key::KEY_PAGEUP),
        "PGDN" | "PGDOWN" | "PAGE_DOWN" => Some(Key::KEY_PAGEDOWN),
        "EQUALS" => Some(Key::KEY_EQUAL),
        "LBRACE" => Some(Key::KEY_LEFTBRACE),
        "RBRACE" => Some(Key::KEY_RIGHTBRACE),
        "PERIOD" => Some(Key::KEY_DOT),
        _ => None,
    };
    if alias.is_some() {
        return alias;
    }

    let kernel_name = if upper.starts_with("KEY_") {
        upper
    } else {
        format!("KEY_{}", upper)
    };
    Key::from_str(&kernel_name).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_kernel_names() {
        assert_eq!(parse_key("l"), Some(Key::KEY_L));
        assert_eq!(parse_key("right"), Some(Key::KEY_RIGHT));
        assert_eq!(parse_key("F13"), Some(Key::KEY_F13));
        assert_eq!(parse_key("KEY_VOLUMEUP"), Some(Key::KEY_VOLUMEUP));
        assert_eq!(parse_key("key_a"), Some(Key::KEY_A));
        assert_eq!(parse_key("5"), Some(Key::KEY_5));
    }

    #[test]
    fn test_parse_key_aliases() {
        assert_eq!(parse_key("Escape"), Some(Key::KEY_ESC));
        assert_eq!(parse_key("esc"), Some(Key::KEY_ESC));
        assert_eq!(parse_key("Return"), Some(Key::KEY_ENTER));
        assert_eq!(parse_key("caps_lock"), Some(Key::KEY_CAPSLOCK));
        assert_eq!(parse_key("PgDn"), Some(Key::KEY_PAGEDOWN));
        assert_eq!(parse_key("["), Some(Key::KEY_LEFTBRACE));
        assert_eq!(parse_key("/"), Some(Key::KEY_SLASH));
        assert_eq!(parse_key("-"), Some(Key::KEY_MINUS));
    }

    #[test]
    fn test_parse_key_unknown() {
        assert_eq!(parse_key("UnknownKey"), None);
        assert_eq!(parse_key("KEY_NOTAKEY123"), None);
        assert_eq!(parse_key(""), None);
    }

    #[test]
    fn test_modifier_from_key_normalizes_sides() {
        assert_eq!(Modifier::from_key(Key::KEY_LEFTCTRL), Some(Modifier::Ctrl));
        assert_eq!(Modifier::from_key(Key::KEY_RIGHTCTRL), Some(Modifier::Ctrl));
        assert_eq!(Modifier::from_key(Key::KEY_RIGHTALT), Some(Modifier::Alt));
        assert_eq!(Modifier::from_key(Key::KEY_RIGHTMETA), Some(Modifier::Meta));
        assert_eq!(Modifier::from_key(Key::KEY_CAPSLOCK), Some(Modifier::CapsLock));
        assert_eq!(Modifier::from_key(Key::KEY_NUMLOCK), None);
        assert_eq!(Modifier::from_key(Key::KEY_A), None);
    }

    #[test]
    fn test_modifier_names() {
        assert_eq!(Modifier::from_name("Ctrl"), Some(Modifier::Ctrl));
        assert_eq!(Modifier::from_name("right_ctrl"), Some(Modifier::Ctrl));
        assert_eq!(Modifier::from_name("left-alt"), Some(Modifier::Alt));
        assert_eq!(Modifier::from_name("super"), Some(Modifier::Meta));
        assert_eq!(Modifier::from_name("win"), Some(Modifier::Meta));
        assert_eq!(Modifier::from_name("caps_lock"), Some(Modifier::CapsLock));
        assert_eq!(Modifier::from_name("CapsLock"), Some(Modifier::CapsLock));
        assert_eq!(Modifier::from_name("l"), None);
    }

    #[test]
    fn test_parse_combination_basic() {
        let combo = parse_combination("alt+shift+l").unwrap();
        assert_eq!(
            combo.modifiers,
            BTreeSet::from([Modifier::Alt, Modifier::Shift])
        );
        assert_eq!(combo.key, Key::KEY_L);
    }

    #[test]
    fn test_parse_combination_order_and_case_independent() {
        let a = parse_combination("Shift + ALT + L").unwrap();
        let b = parse_combination("alt+shift+l").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_parse_combination_without_modifiers() {
        let combo = parse_combination("right").unwrap();
        assert!(combo.modifiers.is_empty());
        assert_eq!(combo.key, Key::KEY_RIGHT);
    }

    #[test]
    fn test_parse_combination_side_variants_collapse() {
        let combo = parse_combination("right_ctrl+c").unwrap();
        assert_eq!(combo, parse_combination("ctrl+c").unwrap());
    }

    #[test]
    fn test_parse_combination_errors() {
        let reason = |s: &str| parse_combination(s).unwrap_err().reason;

        assert_eq!(reason(""), CombinationParseReason::Empty);
        assert_eq!(reason("alt+"), CombinationParseReason::EmptyComponent);
        assert_eq!(reason("+l"), CombinationParseReason::EmptyComponent);
        assert_eq!(reason("alt+shift"), CombinationParseReason::NoTrigger);
        assert_eq!(
            reason("alt+left_alt+l"),
            CombinationParseReason::DuplicateModifier(Modifier::Alt)
        );
        assert_eq!(
            reason("alt+l+k"),
            CombinationParseReason::MultipleTriggers("k".to_string())
        );
        assert_eq!(
            reason("alt+bogus"),
            CombinationParseReason::UnknownKey("bogus".to_string())
        );
    }

    #[test]
    fn test_parse_combination_kernel_modifier_names() {
        let combo = parse_combination("KEY_RIGHTALT+l").unwrap();
        assert_eq!(combo, parse_combination("alt+l").unwrap());
        assert_eq!(
            parse_combination("KEY_LEFTCTRL").unwrap_err().reason,
            CombinationParseReason::NoTrigger
        );
    }

    #[test]
    fn test_parse_combination_caps_lock_modifier() {
        let combo = parse_combination("caps_lock+h").unwrap();
        assert_eq!(combo.modifiers, BTreeSet::from([Modifier::CapsLock]));
        assert_eq!(combo.key, Key::KEY_H);
        assert_eq!(combo, parse_combination("KEY_CAPSLOCK+h").unwrap());
        assert_eq!(combo.to_string(), "caps_lock+h");
        assert_eq!(
            parse_combination("caps_lock").unwrap_err().reason,
            CombinationParseReason::NoTrigger
        );
    }

    #[test]
    fn test_key_name() {
        assert_eq!(key_name(Key::KEY_L), "l");
        assert_eq!(key_name(Key::KEY_VOLUMEUP), "volumeup");
        assert_eq!(key_name(Key::BTN_LEFT), "btn_left");
        // 0x2fe sits inside the key range but has no kernel name
        assert_eq!(key_name(Key::new(0x2fe)), "code_766");
    }

    #[test]
    fn test_combination_display() {
        let combo = parse_combination("shift+ctrl+right").unwrap();
        assert_eq!(combo.to_string(), "ctrl+shift+right");
        assert_eq!(Combination::new(Key::KEY_ESC).to_string(), "esc");
    }

    #[test]
    fn test_known_key_code_range() {
        assert!(!is_known_key_code(0));
        assert!(is_known_key_code(Key::KEY_A.code()));
        assert!(is_known_key_code(KEY_CODE_MAX));
        assert!(!is_known_key_code(KEY_CODE_MAX + 1));
    }
}
