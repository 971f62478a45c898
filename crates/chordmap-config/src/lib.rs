//! Configuration parsing for chordmap
//!
//! This crate handles parsing the JSON configuration file into key
//! combinations, window filters and per-keyboard mapping lists.

mod error;
mod filter;
mod keys;
mod model;
mod parser;

pub use error::{ConfigError, UnknownKeyInfo};
pub use filter::{FilterMode, WindowFilter};
pub use keys::*;
pub use model::*;
pub use parser::{find_config, load_config, parse_config, parse_config_str, LOCAL_CONFIG, USER_CONFIG};
