//! Configuration Validator Module
//!
//! Turns a [`RawConfig`] into an immutable [`Settings`] value, or explains
//! every reason it cannot.
//!
//! Validation runs in three passes:
//!
//! 1. **Structure**: every required section and option must be present.
//!    All gaps are collected before anything is reported.
//! 2. **Values**: only once the structure is complete, typed options are
//!    parsed (`timeout`, plus the optional `port`, `tls` and `insecure`).
//!    Again every defect is collected.
//! 3. **Directories**: the hot folder, then the cold folder, must exist.
//!    The first missing directory ends validation on its own.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;
use thiserror::Error;

use crate::ini::RawConfig;

/// Section holding the local folders
pub const FOLDERS_SECTION: &str = "folders";

/// Section holding the remote endpoint
pub const SERVER_SECTION: &str = "server";

/// Required sections and their required options, in reporting order
pub const CONFIG_LAYOUT: &[(&str, &[&str])] = &[
    (FOLDERS_SECTION, &["hotfolder", "coldfolder"]),
    (
        SERVER_SECTION,
        &["address", "dir", "username", "password", "timeout"],
    ),
];

/// Port used when neither `address` nor `port` names one
pub const DEFAULT_FTP_PORT: u16 = 21;

/// One missing or invalid configuration item
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigDefect {
    MissingSection { section: String },
    MissingOption { section: String, option: String },
    InvalidTimeout { value: String },
    NonPositiveTimeout { value: String },
    InvalidPort { value: String },
    InvalidTlsMode { value: String },
    InvalidBoolean { option: String, value: String },
}

impl fmt::Display for ConfigDefect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingSection { section } => write!(f, "Missing section {}", section),
            Self::MissingOption { section, option } => {
                write!(f, "Missing option {} in section {}", option, section)
            }
            Self::InvalidTimeout { value } => {
                write!(f, "Option timeout in section server is not a number: {:?}", value)
            }
            Self::NonPositiveTimeout { value } => write!(
                f,
                "Option timeout in section server must be a positive number of seconds: {:?}",
                value
            ),
            Self::InvalidPort { value } => {
                write!(f, "Invalid port in section server: {:?}", value)
            }
            Self::InvalidTlsMode { value } => write!(
                f,
                "Option tls in section server must be \"none\" or \"explicit\": {:?}",
                value
            ),
            Self::InvalidBoolean { option, value } => write!(
                f,
                "Option {} in section server is not a boolean: {:?}",
                option, value
            ),
        }
    }
}

/// Why a configuration could not become [`Settings`]
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Incomplete configuration ({} defect(s))", .0.len())]
    Defects(Vec<ConfigDefect>),

    #[error("Hotfolder {0:?} does not exist.")]
    HotDirMissing(PathBuf),

    #[error("Coldfolder {0:?} does not exist.")]
    ColdDirMissing(PathBuf),
}

/// Control-channel security
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TlsMode {
    /// Plain FTP
    #[default]
    None,
    /// `AUTH TLS` upgrade after the greeting (FTPES)
    Explicit,
}

/// Everything needed to open a session to the remote endpoint
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub timeout: Duration,
    pub tls: TlsMode,
    pub ca_file: Option<PathBuf>,
    pub insecure: bool,
}

impl ServerSettings {
    /// `host:port`, bracketing IPv6 literals
    pub fn socket_addr(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// Validated, immutable run settings
#[derive(Debug, Clone)]
pub struct Settings {
    hot_dir: PathBuf,
    cold_dir: PathBuf,
    server: ServerSettings,
    server_dir: String,
    username: String,
    password: SecretString,
}

impl Settings {
    pub fn hot_dir(&self) -> &Path {
        &self.hot_dir
    }

    pub fn cold_dir(&self) -> &Path {
        &self.cold_dir
    }

    pub fn server(&self) -> &ServerSettings {
        &self.server
    }

    pub fn server_dir(&self) -> &str {
        &self.server_dir
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &SecretString {
        &self.password
    }

    /// Remote path a file is stored under: `dir + "/" + name`, verbatim
    pub fn remote_path(&self, name: &str) -> String {
        format!("{}/{}", self.server_dir, name)
    }
}

/// Validate a parsed document into [`Settings`]
pub fn validate(raw: &RawConfig) -> Result<Settings, ConfigError> {
    let defects = structural_defects(raw);
    if !defects.is_empty() {
        return Err(ConfigError::Defects(defects));
    }

    let mut defects = Vec::new();
    let server = parse_server(raw, &mut defects);
    if !defects.is_empty() {
        return Err(ConfigError::Defects(defects));
    }
    let Some(server) = server else {
        return Err(ConfigError::Defects(defects));
    };

    let hot_dir = PathBuf::from(require(raw, FOLDERS_SECTION, "hotfolder"));
    let cold_dir = PathBuf::from(require(raw, FOLDERS_SECTION, "coldfolder"));

    if !hot_dir.is_dir() {
        return Err(ConfigError::HotDirMissing(hot_dir));
    }
    if !cold_dir.is_dir() {
        return Err(ConfigError::ColdDirMissing(cold_dir));
    }

    Ok(Settings {
        hot_dir,
        cold_dir,
        server,
        server_dir: require(raw, SERVER_SECTION, "dir").to_string(),
        username: require(raw, SERVER_SECTION, "username").to_string(),
        password: SecretString::new(require(raw, SERVER_SECTION, "password").to_string()),
    })
}

/// Every missing section and option, in layout order
pub fn structural_defects(raw: &RawConfig) -> Vec<ConfigDefect> {
    let mut defects = Vec::new();
    for (section, options) in CONFIG_LAYOUT {
        if !raw.has_section(section) {
            defects.push(ConfigDefect::MissingSection {
                section: section.to_string(),
            });
            continue;
        }
        for option in *options {
            if !raw.has_option(section, option) {
                defects.push(ConfigDefect::MissingOption {
                    section: section.to_string(),
                    option: option.to_string(),
                });
            }
        }
    }
    defects
}

// Only called after the structural pass proved the option present.
fn require<'a>(raw: &'a RawConfig, section: &str, option: &str) -> &'a str {
    raw.get(section, option).unwrap_or_default()
}

fn parse_server(raw: &RawConfig, defects: &mut Vec<ConfigDefect>) -> Option<ServerSettings> {
    let timeout = parse_timeout(require(raw, SERVER_SECTION, "timeout"), defects);

    let address = require(raw, SERVER_SECTION, "address");
    let (host, address_port) = split_host_port(address);
    let address_port = match address_port {
        Some(value) => parse_port(value, defects),
        None => None,
    };
    let port = match raw.get(SERVER_SECTION, "port") {
        Some(value) => parse_port(value, defects),
        None => Some(address_port.unwrap_or(DEFAULT_FTP_PORT)),
    };

    let tls = match raw.get(SERVER_SECTION, "tls").map(str::trim) {
        None => Some(TlsMode::None),
        Some(value) => match value.to_ascii_lowercase().as_str() {
            "" | "none" | "off" => Some(TlsMode::None),
            "explicit" => Some(TlsMode::Explicit),
            _ => {
                defects.push(ConfigDefect::InvalidTlsMode {
                    value: value.to_string(),
                });
                None
            }
        },
    };

    let insecure = match raw.get(SERVER_SECTION, "insecure") {
        None => Some(false),
        Some(value) => parse_bool(value).or_else(|| {
            defects.push(ConfigDefect::InvalidBoolean {
                option: "insecure".to_string(),
                value: value.to_string(),
            });
            None
        }),
    };

    let ca_file = raw
        .get(SERVER_SECTION, "ca_file")
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from);

    Some(ServerSettings {
        host: host.to_string(),
        port: port?,
        timeout: timeout?,
        tls: tls?,
        ca_file,
        insecure: insecure?,
    })
}

fn parse_timeout(value: &str, defects: &mut Vec<ConfigDefect>) -> Option<Duration> {
    let seconds: f64 = match value.trim().parse() {
        Ok(seconds) => seconds,
        Err(_) => {
            defects.push(ConfigDefect::InvalidTimeout {
                value: value.to_string(),
            });
            return None;
        }
    };

    if !(seconds.is_finite() && seconds > 0.0) {
        defects.push(ConfigDefect::NonPositiveTimeout {
            value: value.to_string(),
        });
        return None;
    }

    match Duration::try_from_secs_f64(seconds) {
        Ok(duration) if !duration.is_zero() => Some(duration),
        _ => {
            defects.push(ConfigDefect::InvalidTimeout {
                value: value.to_string(),
            });
            None
        }
    }
}

fn parse_port(value: &str, defects: &mut Vec<ConfigDefect>) -> Option<u16> {
    match value.trim().parse::<u16>() {
        Ok(port) if port != 0 => Some(port),
        _ => {
            defects.push(ConfigDefect::InvalidPort {
                value: value.to_string(),
            });
            None
        }
    }
}

/// Booleans the way INI files usually spell them
fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "yes" | "true" | "on" => Some(true),
        "0" | "no" | "false" | "off" => Some(false),
        _ => None,
    }
}

/// Split `host`, `host:port` or `[v6]:port`; a bare IPv6 literal has no port
fn split_host_port(address: &str) -> (&str, Option<&str>) {
    let address = address.trim();
    if let Some(rest) = address.strip_prefix('[') {
        if let Some((host, tail)) = rest.split_once(']') {
            return (host, tail.strip_prefix(':'));
        }
    }
    match address.split_once(':') {
        Some((host, port)) if !port.contains(':') => (host, Some(port)),
        _ => (address, None),
    }
}
