//! JSON configuration parser

use std::path::{Path, PathBuf};

use regex::Regex;
use serde::Deserialize;

use crate::error::{ConfigError, UnknownKeyInfo};
use crate::filter::{FilterMode, WindowFilter};
use crate::keys::{parse_combination, parse_key, Combination, Modifier};
use crate::model::*;

/// Config file looked up in the working directory
pub const LOCAL_CONFIG: &str = "chordmap.json";
/// Per-user config file
pub const USER_CONFIG: &str = "~/.config/chordmap/config.json";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawEntry {
    keyboards: Option<Vec<String>>,
    #[serde(default)]
    mappings: Vec<RawMapping>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawMapping {
    src: String,
    dst: String,
    #[serde(rename = "match")]
    match_all: Option<RawFilter>,
    match_or: Option<RawFilter>,
    match_not: Option<RawFilter>,
    match_not_or: Option<RawFilter>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawFilter {
    class: Option<String>,
    title: Option<String>,
}

/// Convert a 1-indexed line and column to a byte offset
fn line_col_to_offset(source: &str, line: usize, column: usize) -> usize {
    let line_start: usize = source
        .split_inclusive('\n')
        .take(line.saturating_sub(1))
        .map(str::len)
        .sum();
    (line_start + column.saturating_sub(1)).min(source.len())
}

/// Locate the configuration file.
///
/// An explicit path (tilde-expanded) wins and must exist. Otherwise the
/// first existing of `./chordmap.json` and `~/.config/chordmap/config.json`.
pub fn find_config(explicit: Option<&str>) -> Result<PathBuf, ConfigError> {
    let candidates = match explicit {
        Some(path) => vec![PathBuf::from(shellexpand::tilde(path).into_owned())],
        None => vec![
            PathBuf::from(LOCAL_CONFIG),
            PathBuf::from(shellexpand::tilde(USER_CONFIG).into_owned()),
        ],
    };
    find_first_existing(candidates)
}

fn find_first_existing(candidates: Vec<PathBuf>) -> Result<PathBuf, ConfigError> {
    match candidates.iter().find(|p| p.is_file()) {
        Some(path) => Ok(path.clone()),
        None => Err(ConfigError::NotFound { tried: candidates }),
    }
}

/// Find and parse the configuration in one step.
pub fn load_config(explicit: Option<&str>) -> Result<(PathBuf, Config), ConfigError> {
    let path = find_config(explicit)?;
    let config = parse_config(&path)?;
    Ok((path, config))
}

/// Parse a configuration file from the given path
pub fn parse_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_config_str(&content)
}

/// Parse configuration from a string
pub fn parse_config_str(content: &str) -> Result<Config, ConfigError> {
    let raw: Vec<RawEntry> = serde_json::from_str(content).map_err(|e| {
        let offset = line_col_to_offset(content, e.line(), e.column());
        let len = usize::from(offset < content.len());
        ConfigError::Parse {
            src: content.to_string(),
            span: miette::SourceSpan::from((offset, len)),
            source: e,
        }
    })?;

    let mut config = Config::default();
    let mut unknown_keys = Vec::new();

    for (entry_idx, raw_entry) in raw.into_iter().enumerate() {
        let keyboards = parse_keyboards(entry_idx, raw_entry.keyboards)?;

        if raw_entry.mappings.is_empty() {
            tracing::warn!("Config entry {} has no mappings, skipping", entry_idx);
            continue;
        }

        let mut mappings = Vec::with_capacity(raw_entry.mappings.len());
        for (mapping_idx, raw_mapping) in raw_entry.mappings.into_iter().enumerate() {
            let at = Position {
                entry: entry_idx,
                mapping: mapping_idx,
            };

            let src = compile_combination(&raw_mapping.src, at, &mut unknown_keys)?;
            let dst = compile_combination(&raw_mapping.dst, at, &mut unknown_keys)?;
            let filter = compile_filter(&raw_mapping, at)?;

            if let (Some(src), Some(dst)) = (src, dst) {
                if src.modifiers.is_empty() {
                    return Err(ConfigError::InvalidCombination {
                        entry: at.entry,
                        mapping: at.mapping,
                        reason: format!(
                            "source combination '{}' needs at least one modifier",
                            raw_mapping.src
                        ),
                    });
                }
                mappings.push(Mapping { src, dst, filter });
            }
        }

        config.entries.push(KeyboardEntry {
            keyboards,
            mappings,
        });
    }

    // Report every unknown key of the file together
    if !unknown_keys.is_empty() {
        return Err(ConfigError::UnknownKey { keys: unknown_keys });
    }

    Ok(config)
}

#[derive(Debug, Clone, Copy)]
struct Position {
    entry: usize,
    mapping: usize,
}

fn parse_keyboards(
    entry: usize,
    keyboards: Option<Vec<String>>,
) -> Result<KeyboardSelector, ConfigError> {
    let Some(keyboards) = keyboards else {
        return Ok(KeyboardSelector::All);
    };

    if keyboards.is_empty() {
        return Err(ConfigError::Invalid {
            message: format!(
                "entry {} has an empty 'keyboards' list; omit the field to select every keyboard",
                entry
            ),
        });
    }
    if keyboards.iter().any(|k| k.trim().is_empty()) {
        return Err(ConfigError::Invalid {
            message: format!("entry {} has an empty keyboard identifier", entry),
        });
    }

    Ok(KeyboardSelector::Named(keyboards))
}

/// Parse one combination, recording unknown key names instead of failing.
///
/// Returns `Ok(None)` when unknown keys were recorded.
fn compile_combination(
    input: &str,
    at: Position,
    unknown_keys: &mut Vec<UnknownKeyInfo>,
) -> Result<Option<Combination>, ConfigError> {
    let unknown: Vec<UnknownKeyInfo> = input
        .split('+')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .filter(|part| Modifier::from_name(part).is_none() && parse_key(part).is_none())
        .map(|part| UnknownKeyInfo {
            key: part.to_string(),
            combination: input.to_string(),
            entry: at.entry,
            mapping: at.mapping,
        })
        .collect();

    if !unknown.is_empty() {
        unknown_keys.extend(unknown);
        return Ok(None);
    }

    parse_combination(input)
        .map(Some)
        .map_err(|e| ConfigError::InvalidCombination {
            entry: at.entry,
            mapping: at.mapping,
            reason: e.to_string(),
        })
}

fn compile_filter(raw: &RawMapping, at: Position) -> Result<Option<WindowFilter>, ConfigError> {
    let present: Vec<(FilterMode, &RawFilter)> = [
        (FilterMode::Match, raw.match_all.as_ref()),
        (FilterMode::MatchOr, raw.match_or.as_ref()),
        (FilterMode::MatchNot, raw.match_not.as_ref()),
        (FilterMode::MatchNotOr, raw.match_not_or.as_ref()),
    ]
    .into_iter()
    .filter_map(|(mode, filter)| filter.map(|f| (mode, f)))
    .collect();

    let (mode, filter) = match present.as_slice() {
        [] => return Ok(None),
        [single] => *single,
        many => {
            let fields: Vec<&str> = many.iter().map(|(m, _)| m.field_name()).collect();
            return Err(ConfigError::Invalid {
                message: format!(
                    "entry {}, mapping {} has more than one filter ({}); use exactly one",
                    at.entry,
                    at.mapping,
                    fields.join(", ")
                ),
            });
        }
    };

    if filter.class.is_none() && filter.title.is_none() {
        return Err(ConfigError::Invalid {
            message: format!(
                "entry {}, mapping {}: '{}' needs a 'class' or 'title' pattern",
                at.entry, at.mapping, mode
            ),
        });
    }

    let class = compile_pattern("class", filter.class.as_deref(), at)?;
    let title = compile_pattern("title", filter.title.as_deref(), at)?;
    Ok(Some(WindowFilter::new(mode, class, title)))
}

fn compile_pattern(
    field: &'static str,
    pattern: Option<&str>,
    at: Position,
) -> Result<Option<Regex>, ConfigError> {
    pattern
        .map(|p| {
            Regex::new(p).map_err(|source| ConfigError::InvalidPattern {
                field,
                pattern: p.to_string(),
                entry: at.entry,
                mapping: at.mapping,
                source,
            })
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use evdev::Key;
    use std::io::Write;

    #[test]
    fn test_parse_basic_config() {
        let config = r#"
            [
                {
                    "keyboards": ["AT Translated Set 2 keyboard"],
                    "mappings": [
                        {"src": "alt+l", "dst": "right"},
                        {"src": "alt+shift+l", "dst": "shift+right"}
                    ]
                }
            ]
        "#;

        let result = parse_config_str(config).unwrap();
        assert_eq!(result.entries.len(), 1);
        let entry = &result.entries[0];
        assert_eq!(
            entry.keyboards,
            KeyboardSelector::Named(vec!["AT Translated Set 2 keyboard".to_string()])
        );
        assert_eq!(entry.mappings.len(), 2);
        assert_eq!(entry.mappings[0].src.key, Key::KEY_L);
        assert_eq!(entry.mappings[0].dst, Combination::new(Key::KEY_RIGHT));
        assert!(entry.mappings[1].dst.modifiers.contains(&Modifier::Shift));
    }

    #[test]
    fn test_keyboards_omitted_selects_all() {
        let config = r#"[{"mappings": [{"src": "alt+h", "dst": "left"}]}]"#;
        let result = parse_config_str(config).unwrap();
        assert_eq!(result.entries[0].keyboards, KeyboardSelector::All);
    }

    #[test]
    fn test_filters_compile() {
        let config = r#"
            [{
                "mappings": [
                    {"src": "alt+c", "dst": "ctrl+c", "match_not": {"class": "(?i)^alacritty"}},
                    {"src": "alt+v", "dst": "ctrl+v", "match_or": {"class": "firefox", "title": "GitHub"}},
                    {"src": "alt+x", "dst": "ctrl+x"}
                ]
            }]
        "#;

        let result = parse_config_str(config).unwrap();
        let mappings = &result.entries[0].mappings;

        let f0 = mappings[0].filter.as_ref().unwrap();
        assert_eq!(f0.mode, FilterMode::MatchNot);
        assert!(!f0.matches("Alacritty", ""));

        let f1 = mappings[1].filter.as_ref().unwrap();
        assert_eq!(f1.mode, FilterMode::MatchOr);
        assert!(f1.title.is_some());

        assert!(mappings[2].filter.is_none());
    }

    #[test]
    fn test_multiple_unknown_keys_all_reported() {
        let config = r#"
            [
                {"mappings": [{"src": "alt+BadKey1", "dst": "BadKey2"}]},
                {"mappings": [{"src": "ctrl+l", "dst": "shift+BadKey3"}]}
            ]
        "#;

        let err = parse_config_str(config).unwrap_err();
        match err {
            ConfigError::UnknownKey { keys } => {
                let names: Vec<&str> = keys.iter().map(|k| k.key.as_str()).collect();
                assert_eq!(names, vec!["BadKey1", "BadKey2", "BadKey3"]);
                assert_eq!(keys[2].entry, 1);
                assert_eq!(keys[2].combination, "shift+BadKey3");
            }
            _ => panic!("Expected UnknownKey error, got: {:?}", err),
        }
    }

    #[test]
    fn test_source_without_modifier_rejected() {
        let config = r#"[{"mappings": [{"src": "f13", "dst": "esc"}]}]"#;
        let err = parse_config_str(config).unwrap_err();
        match err {
            ConfigError::InvalidCombination { entry, mapping, reason } => {
                assert_eq!((entry, mapping), (0, 0));
                assert!(reason.contains("modifier"));
            }
            _ => panic!("Expected InvalidCombination error, got: {:?}", err),
        }
    }

    #[test]
    fn test_combination_without_trigger_rejected() {
        let config = r#"[{"mappings": [{"src": "alt+shift", "dst": "right"}]}]"#;
        assert!(matches!(
            parse_config_str(config),
            Err(ConfigError::InvalidCombination { .. })
        ));
    }

    #[test]
    fn test_multiple_filters_rejected() {
        let config = r#"
            [{"mappings": [{
                "src": "alt+c", "dst": "ctrl+c",
                "match": {"class": "a"}, "match_not": {"class": "b"}
            }]}]
        "#;
        match parse_config_str(config).unwrap_err() {
            ConfigError::Invalid { message } => {
                assert!(message.contains("match, match_not"));
            }
            err => panic!("Expected Invalid error, got: {:?}", err),
        }
    }

    #[test]
    fn test_filter_without_patterns_rejected() {
        let config = r#"[{"mappings": [{"src": "alt+c", "dst": "ctrl+c", "match": {}}]}]"#;
        assert!(matches!(
            parse_config_str(config),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn test_invalid_regex_rejected() {
        let config =
            r#"[{"mappings": [{"src": "alt+c", "dst": "ctrl+c", "match": {"title": "(unclosed"}}]}]"#;
        match parse_config_str(config).unwrap_err() {
            ConfigError::InvalidPattern { field, pattern, .. } => {
                assert_eq!(field, "title");
                assert_eq!(pattern, "(unclosed");
            }
            err => panic!("Expected InvalidPattern error, got: {:?}", err),
        }
    }

    #[test]
    fn test_empty_keyboard_list_rejected() {
        let config = r#"[{"keyboards": [], "mappings": [{"src": "alt+c", "dst": "ctrl+c"}]}]"#;
        assert!(matches!(
            parse_config_str(config),
            Err(ConfigError::Invalid { .. })
        ));

        let config = r#"[{"keyboards": [" "], "mappings": [{"src": "alt+c", "dst": "ctrl+c"}]}]"#;
        assert!(matches!(
            parse_config_str(config),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn test_entry_without_mappings_skipped() {
        let config = r#"
            [
                {"keyboards": ["kbd"]},
                {"mappings": [{"src": "alt+l", "dst": "right"}]}
            ]
        "#;
        let result = parse_config_str(config).unwrap();
        assert_eq!(result.entries.len(), 1);
        assert_eq!(result.entries[0].keyboards, KeyboardSelector::All);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let config = r#"[{"mappings": [{"src": "alt+l", "dst": "right", "macro": "x"}]}]"#;
        assert!(matches!(
            parse_config_str(config),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_syntax_error_points_at_location() {
        let config = "[\n  {\"mappings\": [}\n]";
        match parse_config_str(config).unwrap_err() {
            ConfigError::Parse { span, src, .. } => {
                assert_eq!(src, config);
                assert_eq!(&config[span.offset()..span.offset() + 1], "}");
            }
            err => panic!("Expected Parse error, got: {:?}", err),
        }
    }

    #[test]
    fn test_line_col_to_offset() {
        let source = "ab\ncde\nf";
        assert_eq!(line_col_to_offset(source, 1, 1), 0);
        assert_eq!(line_col_to_offset(source, 2, 2), 4);
        assert_eq!(line_col_to_offset(source, 3, 1), 7);
        assert_eq!(line_col_to_offset(source, 9, 9), source.len());
    }

    #[test]
    fn test_minimal_valid_config() {
        let result = parse_config_str("[]").unwrap();
        assert!(result.entries.is_empty());
    }

    #[test]
    fn test_parse_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"[{{"mappings": [{{"src": "alt+j", "dst": "down"}}]}}]"#).unwrap();

        let config = parse_config(file.path()).unwrap();
        assert_eq!(config.mapping_count(), 1);
    }

    #[test]
    fn test_find_config_explicit_path() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let path = file.path().to_str().unwrap();

        assert_eq!(find_config(Some(path)).unwrap(), file.path());
    }

    #[test]
    fn test_find_config_explicit_missing() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.json");

        match find_config(Some(missing.to_str().unwrap())).unwrap_err() {
            ConfigError::NotFound { tried } => assert_eq!(tried, vec![missing]),
            err => panic!("Expected NotFound error, got: {:?}", err),
        }
    }

    #[test]
    fn test_find_first_existing_order() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first.json");
        let second = dir.path().join("second.json");
        std::fs::write(&second, "[]").unwrap();

        let found = find_first_existing(vec![first.clone(), second.clone()]).unwrap();
        assert_eq!(found, second);

        std::fs::write(&first, "[]").unwrap();
        let found = find_first_existing(vec![first.clone(), second]).unwrap();
        assert_eq!(found, first);
    }

    #[test]
    fn test_tilde_expansion_in_explicit_path() {
        let err = find_config(Some("~/definitely-missing-chordmap.json")).unwrap_err();
        match err {
            ConfigError::NotFound { tried } => {
                assert!(!tried[0].to_string_lossy().starts_with('~'));
            }
            err => panic!("Expected NotFound error, got: {:?}", err),
        }
    }
}
