//! FTP Pusher
//!
//! Moves files from a local "hot" folder to an FTP server, then archives
//! each confirmed upload into a local "cold" folder. A file that fails to
//! upload stays where it is, so running the tool again retries it.
//!
//! ## Features
//! - INI configuration with every defect reported at once
//! - Passive-mode binary uploads over plain FTP or explicit FTPS
//! - Stable exit codes for schedulers (0, 1, 2, 3, 4, 5, 10)
//! - Clean stop on Ctrl-C: the file in flight stays in the hot folder
//!
//! ## Usage
//!
//! ```bash
//! ftp-pusher pusher.ini        # summary at the end
//! ftp-pusher -q pusher.ini     # problems only
//! ftp-pusher -v pusher.ini     # FTP conversation, password redacted
//! ```
//!
//! ```ini
//! [folders]
//! hotfolder = /data/outgoing
//! coldfolder = /data/sent
//!
//! [server]
//! address = ftp.example.com
//! dir = /incoming
//! username = pusher
//! password = secret
//! timeout = 30
//! ```

pub mod client;
pub mod config;
pub mod exit;
pub mod ini;
pub mod protocol;
pub mod runner;
pub mod session;
pub mod tls;

pub use client::{FtpClient, FtpSession};
pub use config::{validate, ConfigError, Settings};
pub use exit::ExitStatus;
pub use ini::RawConfig;
pub use runner::{RunError, RunOutcome, Runner};
pub use session::{RemoteSession, Transport};
pub use tls::ClientTlsConfig;
