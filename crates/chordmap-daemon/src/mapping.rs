//! Per-keyboard mapping table and lookup

use std::collections::{BTreeSet, HashMap};

use chordmap_config::{Combination, Mapping, Modifier};
use evdev::Key;

use crate::window::{WindowContext, WindowInfo};

/// The compiled mappings of one keyboard, indexed by source combination.
#[derive(Debug, Clone, Default)]
pub struct MappingTable {
    mappings: Vec<Mapping>,
    /// Source combination -> mapping indices in configuration order
    index: HashMap<Combination, Vec<usize>>,
    /// Distinct source modifier sets
    source_modifiers: Vec<BTreeSet<Modifier>>,
}

impl MappingTable {
    pub fn new(mappings: Vec<Mapping>) -> Self {
        let mut index: HashMap<Combination, Vec<usize>> = HashMap::new();
        let mut source_modifiers: Vec<BTreeSet<Modifier>> = Vec::new();

        for (idx, mapping) in mappings.iter().enumerate() {
            index.entry(mapping.src.clone()).or_default().push(idx);
            if !source_modifiers.contains(&mapping.src.modifiers) {
                source_modifiers.push(mapping.src.modifiers.clone());
            }
        }

        Self {
            mappings,
            index,
            source_modifiers,
        }
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    /// Whether the held modifiers can still grow into some source combination.
    pub fn could_match(&self, held: &BTreeSet<Modifier>) -> bool {
        self.source_modifiers.iter().any(|src| held.is_subset(src))
    }

    /// Keys the virtual device must be able to emit for the destinations.
    pub fn destination_keys(&self) -> impl Iterator<Item = Key> + '_ {
        self.mappings.iter().flat_map(|m| {
            m.dst
                .modifiers
                .iter()
                .map(|modifier| modifier.to_key())
                .chain(std::iter::once(m.dst.key))
        })
    }

    /// Find the mapping for a combination.
    ///
    /// Candidates are tried in configuration order; the first one without a
    /// filter, or whose filter accepts the focused window, wins. The window
    /// context is queried at most once, and only if a filtered candidate is
    /// reached. A failed query skips every filtered candidate.
    pub fn resolve(&self, combo: &Combination, context: &dyn WindowContext) -> Option<&Mapping> {
        let candidates = self.index.get(combo)?;
        let mut window: Option<Option<WindowInfo>> = None;

        for &idx in candidates {
            let mapping = &self.mappings[idx];
            let Some(filter) = &mapping.filter else {
                return Some(mapping);
            };

            let focused = window.get_or_insert_with(|| match context.query() {
                Ok(info) => {
                    tracing::debug!(class = %info.class, title = %info.title, "Queried focused window");
                    Some(info)
                }
                Err(e) => {
                    tracing::debug!("Skipping filtered mappings for {}: {}", combo, e);
                    None
                }
            });

            if let Some(info) = focused {
                if filter.matches(&info.class, &info.title) {
                    return Some(mapping);
                }
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chordmap_config::{parse_combination, FilterMode, WindowFilter};
    use regex::Regex;

    use crate::window::ContextQueryError;

    struct FakeWindow {
        result: Result<WindowInfo, ContextQueryError>,
        queries: AtomicUsize,
    }

    impl FakeWindow {
        fn focused(class: &str, title: &str) -> Self {
            Self {
                result: Ok(WindowInfo::new(class, title)),
                queries: Default::default(),
            }
        }

        fn failing(err: ContextQueryError) -> Self {
            Self {
                result: Err(err),
                queries: Default::default(),
            }
        }

        fn query_count(&self) -> usize {
            self.queries.load(Ordering::SeqCst)
        }
    }

    impl WindowContext for FakeWindow {
        fn query(&self) -> Result<WindowInfo, ContextQueryError> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            self.result.clone()
        }
    }

    fn mapping(src: &str, dst: &str, filter: Option<(FilterMode, &str)>) -> Mapping {
        Mapping {
            src: parse_combination(src).unwrap(),
            dst: parse_combination(dst).unwrap(),
            filter: filter.map(|(mode, class)| {
                WindowFilter::new(mode, Some(Regex::new(class).unwrap()), None)
            }),
        }
    }

    fn combo(s: &str) -> Combination {
        parse_combination(s).unwrap()
    }

    #[test]
    fn test_resolve_unfiltered() {
        let table = MappingTable::new(vec![mapping("alt+l", "right", None)]);
        let window = FakeWindow::focused("x", "y");

        let found = table.resolve(&combo("alt+l"), &window).unwrap();
        assert_eq!(found.dst, combo("right"));
        assert!(table.resolve(&combo("alt+k"), &window).is_none());
        assert_eq!(window.query_count(), 0);
    }

    #[test]
    fn test_modifier_set_must_match_exactly() {
        let table = MappingTable::new(vec![
            mapping("alt+l", "right", None),
            mapping("alt+shift+l", "shift+right", None),
        ]);
        let window = FakeWindow::focused("x", "y");

        assert_eq!(
            table.resolve(&combo("alt+shift+l"), &window).unwrap().dst,
            combo("shift+right")
        );
        assert_eq!(
            table.resolve(&combo("alt+l"), &window).unwrap().dst,
            combo("right")
        );
        assert!(table.resolve(&combo("ctrl+alt+l"), &window).is_none());
    }

    #[test]
    fn test_filtered_falls_back_to_unfiltered() {
        let table = MappingTable::new(vec![
            mapping("alt+z", "ctrl+z", Some((FilterMode::Match, "Foo"))),
            mapping("alt+z", "ctrl+shift+z", None),
        ]);

        let other = FakeWindow::focused("Bar", "");
        assert_eq!(
            table.resolve(&combo("alt+z"), &other).unwrap().dst,
            combo("ctrl+shift+z")
        );

        let foo = FakeWindow::focused("Foo", "");
        assert_eq!(
            table.resolve(&combo("alt+z"), &foo).unwrap().dst,
            combo("ctrl+z")
        );
    }

    #[test]
    fn test_first_listed_wins() {
        let table = MappingTable::new(vec![
            mapping("alt+z", "a", None),
            mapping("alt+z", "b", None),
        ]);
        let window = FakeWindow::focused("x", "y");
        for _ in 0..3 {
            assert_eq!(table.resolve(&combo("alt+z"), &window).unwrap().dst, combo("a"));
        }
    }

    #[test]
    fn test_unfiltered_before_filtered_skips_query() {
        let table = MappingTable::new(vec![
            mapping("alt+z", "a", None),
            mapping("alt+z", "b", Some((FilterMode::Match, "x"))),
        ]);
        let window = FakeWindow::focused("x", "y");
        assert_eq!(table.resolve(&combo("alt+z"), &window).unwrap().dst, combo("a"));
        assert_eq!(window.query_count(), 0);
    }

    #[test]
    fn test_query_failure_skips_filtered_only() {
        let table = MappingTable::new(vec![
            mapping("alt+c", "ctrl+c", Some((FilterMode::MatchNot, "(?i)^alacritty"))),
            mapping("alt+v", "ctrl+v", Some((FilterMode::Match, "firefox"))),
            mapping("alt+v", "ctrl+shift+v", None),
        ]);

        for err in [ContextQueryError::Unavailable, ContextQueryError::NoFocusedWindow] {
            let window = FakeWindow::failing(err);
            assert!(table.resolve(&combo("alt+c"), &window).is_none());
            assert_eq!(
                table.resolve(&combo("alt+v"), &window).unwrap().dst,
                combo("ctrl+shift+v")
            );
        }
    }

    #[test]
    fn test_window_queried_once_per_lookup() {
        let table = MappingTable::new(vec![
            mapping("alt+z", "a", Some((FilterMode::Match, "one"))),
            mapping("alt+z", "b", Some((FilterMode::Match, "two"))),
            mapping("alt+z", "c", Some((FilterMode::Match, "three"))),
        ]);
        let window = FakeWindow::focused("three", "");
        assert_eq!(table.resolve(&combo("alt+z"), &window).unwrap().dst, combo("c"));
        assert_eq!(window.query_count(), 1);
    }

    #[test]
    fn test_match_not_excludes_window() {
        let table = MappingTable::new(vec![mapping(
            "alt+c",
            "ctrl+c",
            Some((FilterMode::MatchNot, "(?i)^alacritty")),
        )]);
        assert!(table
            .resolve(&combo("alt+c"), &FakeWindow::focused("Alacritty", ""))
            .is_none());
        assert!(table
            .resolve(&combo("alt+c"), &FakeWindow::focused("firefox", ""))
            .is_some());
    }

    #[test]
    fn test_could_match() {
        let table = MappingTable::new(vec![
            mapping("alt+shift+l", "shift+right", None),
            mapping("ctrl+j", "down", None),
        ]);

        assert!(table.could_match(&BTreeSet::from([Modifier::Alt])));
        assert!(table.could_match(&BTreeSet::from([Modifier::Shift])));
        assert!(table.could_match(&BTreeSet::from([Modifier::Alt, Modifier::Shift])));
        assert!(table.could_match(&BTreeSet::from([Modifier::Ctrl])));
        assert!(!table.could_match(&BTreeSet::from([Modifier::Meta])));
        assert!(!table.could_match(&BTreeSet::from([Modifier::Ctrl, Modifier::Alt])));
        assert!(!MappingTable::default().could_match(&BTreeSet::from([Modifier::Alt])));
    }

    #[test]
    fn test_destination_keys() {
        let table = MappingTable::new(vec![mapping("alt+c", "ctrl+shift+c", None)]);
        let keys: Vec<Key> = table.destination_keys().collect();
        assert_eq!(keys, vec![Key::KEY_LEFTCTRL, Key::KEY_LEFTSHIFT, Key::KEY_C]);
    }
}
