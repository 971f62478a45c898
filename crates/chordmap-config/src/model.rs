//! Configuration data model

use std::fmt;

use crate::filter::WindowFilter;
use crate::keys::Combination;

/// Root configuration structure: an ordered list of entries.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub entries: Vec<KeyboardEntry>,
}

/// Which keyboards an entry applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyboardSelector {
    /// `keyboards` omitted: every keyboard device
    All,
    /// Device names, phys addresses or device node paths
    Named(Vec<String>),
}

impl KeyboardSelector {
    /// Whether a device with the given identifiers is selected.
    pub fn selects(&self, name: &str, phys: Option<&str>, path: &str) -> bool {
        match self {
            KeyboardSelector::All => true,
            KeyboardSelector::Named(ids) => ids
                .iter()
                .any(|id| id == name || Some(id.as_str()) == phys || id == path),
        }
    }
}

/// One configuration entry: a keyboard selector plus its mappings.
#[derive(Debug, Clone)]
pub struct KeyboardEntry {
    pub keyboards: KeyboardSelector,
    pub mappings: Vec<Mapping>,
}

/// A single source to destination combination mapping.
#[derive(Debug, Clone)]
pub struct Mapping {
    pub src: Combination,
    pub dst: Combination,
    pub filter: Option<WindowFilter>,
}

impl fmt::Display for Mapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.src, self.dst)?;
        if let Some(filter) = &self.filter {
            write!(f, " [{}]", filter)?;
        }
        Ok(())
    }
}

impl Config {
    /// Mappings applying to one keyboard, concatenated in file order.
    pub fn mappings_for(&self, name: &str, phys: Option<&str>, path: &str) -> Vec<Mapping> {
        self.entries
            .iter()
            .filter(|entry| entry.keyboards.selects(name, phys, path))
            .flat_map(|entry| entry.mappings.iter().cloned())
            .collect()
    }

    /// Whether any entry selects the given keyboard.
    pub fn selects(&self, name: &str, phys: Option<&str>, path: &str) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.keyboards.selects(name, phys, path))
    }

    /// Total number of mappings across all entries.
    pub fn mapping_count(&self) -> usize {
        self.entries.iter().map(|e| e.mappings.len()).sum()
    }
}
