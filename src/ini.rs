//! INI Document Module
//!
//! Reads the key-value configuration document into a [`RawConfig`]. The
//! reader knows nothing about which sections or options are required; that
//! is the job of [`crate::config::validate`].
//!
//! ## Accepted Syntax
//!
//! ```text
//! ; comment
//! [DEFAULT]
//! timeout = 30
//!
//! [server]
//! address: ftp.example.com
//! dir = /incoming
//!     continued on the next line
//! ```
//!
//! - Section names are case-sensitive, option names are not.
//! - `[DEFAULT]` options are visible from every other section.
//! - Repeated sections merge; a repeated option keeps its last value.

use std::collections::BTreeMap;
use std::path::Path;

use thiserror::Error;

/// Name of the section whose options act as fallbacks for all others
pub const DEFAULT_SECTION: &str = "DEFAULT";

/// Errors raised while reading a configuration document
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("line {line}: option outside of any section")]
    OptionBeforeSection { line: usize },

    #[error("line {line}: unterminated section header")]
    UnterminatedHeader { line: usize },

    #[error("line {line}: empty section name")]
    EmptySectionName { line: usize },

    #[error("line {line}: expected `key = value`, got {content:?}")]
    Malformed { line: usize, content: String },
}

/// A parsed but unvalidated configuration document
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawConfig {
    defaults: BTreeMap<String, String>,
    sections: BTreeMap<String, BTreeMap<String, String>>,
}

impl RawConfig {
    /// Read and parse a document from disk
    pub fn load(path: &Path) -> Result<Self, ParseError> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// Parse a document from text
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let mut config = RawConfig::default();
        let mut current: Option<String> = None;
        // (section, option) of the most recent assignment, for continuation lines
        let mut last_option: Option<(String, String)> = None;

        for (index, raw_line) in text.lines().enumerate() {
            let line = index + 1;
            let trimmed = raw_line.trim();

            if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') {
                continue;
            }

            let indented = raw_line.starts_with(' ') || raw_line.starts_with('\t');
            if indented {
                if let Some((section, option)) = &last_option {
                    if let Some(value) = config.options_mut(section).get_mut(option) {
                        value.push('\n');
                        value.push_str(trimmed);
                    }
                    continue;
                }
            }

            if let Some(rest) = trimmed.strip_prefix('[') {
                let name = rest
                    .strip_suffix(']')
                    .ok_or(ParseError::UnterminatedHeader { line })?
                    .trim();
                if name.is_empty() {
                    return Err(ParseError::EmptySectionName { line });
                }
                if name != DEFAULT_SECTION {
                    config.sections.entry(name.to_string()).or_default();
                }
                current = Some(name.to_string());
                last_option = None;
                continue;
            }

            let (key, value) =
                split_assignment(trimmed).ok_or_else(|| ParseError::Malformed {
                    line,
                    content: trimmed.to_string(),
                })?;

            let section = current
                .clone()
                .ok_or(ParseError::OptionBeforeSection { line })?;
            let key = key.to_lowercase();

            config
                .options_mut(&section)
                .insert(key.clone(), value.to_string());
            last_option = Some((section, key));
        }

        Ok(config)
    }

    /// Whether the document declares `section` (`DEFAULT` never counts)
    pub fn has_section(&self, section: &str) -> bool {
        self.sections.contains_key(section)
    }

    /// Whether `option` is visible in `section`, directly or through `DEFAULT`
    pub fn has_option(&self, section: &str, option: &str) -> bool {
        self.get(section, option).is_some()
    }

    /// Look up an option, falling back to `DEFAULT` when the section declares it
    pub fn get(&self, section: &str, option: &str) -> Option<&str> {
        let options = self.sections.get(section)?;
        let key = option.to_lowercase();
        options
            .get(&key)
            .or_else(|| self.defaults.get(&key))
            .map(String::as_str)
    }

    fn options_mut(&mut self, section: &str) -> &mut BTreeMap<String, String> {
        if section == DEFAULT_SECTION {
            &mut self.defaults
        } else {
            self.sections.entry(section.to_string()).or_default()
        }
    }
}

/// Split `key = value` / `key: value` on whichever delimiter comes first
fn split_assignment(line: &str) -> Option<(&str, &str)> {
    let position = line.find(['=', ':'])?;
    let key = line[..position].trim();
    if key.is_empty() {
        return None;
    }
    Some((key, line[position + 1..].trim()))
}
