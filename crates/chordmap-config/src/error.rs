use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

/// A key name in the configuration that does not resolve to a kernel key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownKeyInfo {
    /// The offending key name
    pub key: String,
    /// The combination string it appeared in
    pub combination: String,
    /// Index of the config entry (0-based)
    pub entry: usize,
    /// Index of the mapping inside that entry (0-based)
    pub mapping: usize,
}

impl std::fmt::Display for UnknownKeyInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "'{}' in \"{}\" (entry {}, mapping {})",
            self.key, self.combination, self.entry, self.mapping
        )
    }
}

#[derive(Error, Diagnostic, Debug)]
pub enum ConfigError {
    #[error("Failed to parse JSON")]
    #[diagnostic(code(chordmap::config::parse_error))]
    Parse {
        #[source_code]
        src: String,
        #[label("here")]
        span: miette::SourceSpan,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid configuration: {message}")]
    #[diagnostic(code(chordmap::config::invalid))]
    Invalid { message: String },

    #[error("Unknown key(s): {}", format_unknown_keys(.keys))]
    #[diagnostic(
        code(chordmap::config::unknown_key),
        help("use a kernel key name with or without the KEY_ prefix, e.g. \"l\", \"right\", \"KEY_VOLUMEUP\"")
    )]
    UnknownKey { keys: Vec<UnknownKeyInfo> },

    #[error("Invalid combination in entry {entry}, mapping {mapping}: {reason}")]
    #[diagnostic(code(chordmap::config::invalid_combination))]
    InvalidCombination {
        entry: usize,
        mapping: usize,
        reason: String,
    },

    #[error("Invalid {field} pattern '{pattern}' in entry {entry}, mapping {mapping}")]
    #[diagnostic(code(chordmap::config::invalid_pattern))]
    InvalidPattern {
        field: &'static str,
        pattern: String,
        entry: usize,
        mapping: usize,
        #[source]
        source: regex::Error,
    },

    #[error("No configuration file found (tried: {})", format_paths(.tried))]
    #[diagnostic(
        code(chordmap::config::not_found),
        help("pass --config PATH or create one of the listed files")
    )]
    NotFound { tried: Vec<PathBuf> },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn format_unknown_keys(keys: &[UnknownKeyInfo]) -> String {
    keys.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn format_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
