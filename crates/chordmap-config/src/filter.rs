//! Window filters restricting a mapping to certain focused windows

use std::fmt;

use regex::Regex;

/// How the class and title patterns of a filter combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMode {
    /// Every present pattern matches
    Match,
    /// At least one present pattern matches
    MatchOr,
    /// No present pattern matches
    MatchNot,
    /// At least one present pattern does not match
    MatchNotOr,
}

impl FilterMode {
    /// The configuration field name for this mode.
    pub fn field_name(self) -> &'static str {
        match self {
            FilterMode::Match => "match",
            FilterMode::MatchOr => "match_or",
            FilterMode::MatchNot => "match_not",
            FilterMode::MatchNotOr => "match_not_or",
        }
    }
}

impl fmt::Display for FilterMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.field_name())
    }
}

/// A compiled window filter.
///
/// Patterns are unanchored: `Regex::is_match` searches anywhere in the
/// value, so `"lacritt"` matches `"Alacritty"`.
#[derive(Debug, Clone)]
pub struct WindowFilter {
    pub mode: FilterMode,
    pub class: Option<Regex>,
    pub title: Option<Regex>,
}

impl WindowFilter {
    pub fn new(mode: FilterMode, class: Option<Regex>, title: Option<Regex>) -> Self {
        Self { mode, class, title }
    }

    /// Evaluate the filter against a focused window's class and title.
    ///
    /// Only present patterns take part. A filter without any pattern is
    /// satisfied in every mode.
    pub fn matches(&self, class: &str, title: &str) -> bool {
        let results: Vec<bool> = [
            self.class.as_ref().map(|re| re.is_match(class)),
            self.title.as_ref().map(|re| re.is_match(title)),
        ]
        .into_iter()
        .flatten()
        .collect();

        if results.is_empty() {
            return true;
        }

        match self.mode {
            FilterMode::Match => results.iter().all(|&m| m),
            FilterMode::MatchOr => results.iter().any(|&m| m),
            FilterMode::MatchNot => results.iter().all(|&m| !m),
            FilterMode::MatchNotOr => results.iter().any(|&m| !m),
        }
    }
}

impl fmt::Display for WindowFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {{", self.mode)?;
        if let Some(class) = &self.class {
            write!(f, " class: {:?}", class.as_str())?;
        }
        if let Some(title) = &self.title {
            write!(f, " title: {:?}", title.as_str())?;
        }
        write!(f, " }}")
    }
}
