//! Transfer Session Runner
//!
//! Pushes every file in the hot folder through one remote session and
//! archives each confirmed upload into the cold folder.
//!
//! ## Per-file Flow
//!
//! ```text
//!   snapshot hot folder (sorted by name)
//!            |
//!     empty? +--yes--> done, session never opened
//!            |
//!   connect + login  (failure: fatal, RunError)
//!            |
//!   for each file -----------------------------+
//!     store hot/name -> dir/name               |
//!       failed:  failed += 1, file stays       |
//!       ok:      move hot/name -> cold/name    |
//!                  ok:     uploaded += 1       |
//!                  failed: archive_failed += 1 |
//!     interrupted: stop, file stays -----------+
//!            |
//!   quit (errors ignored)
//! ```
//!
//! Interruption is raced against the connect, the login and every transfer,
//! and takes priority over a step that completes in the same instant. An
//! interrupted connect has no session yet, so its socket is just dropped; an
//! interrupted login still sends `QUIT`. The archive move itself is
//! never interrupted, so a file is always either in the hot folder or in
//! the cold folder.

use std::ffi::OsString;
use std::fmt;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::fs::{self, File};
use tokio::io::BufReader;
use tracing::{debug, error, info, warn};

use crate::config::Settings;
use crate::protocol::SessionError;
use crate::session::{RemoteSession, SessionState, Transport};

/// Conditions that end a run before any file can be handled
#[derive(Error, Debug)]
pub enum RunError {
    #[error("Failed to list hot folder {path:?}: {source}")]
    Snapshot {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Connection failed: {0}")]
    Connect(#[source] SessionError),

    #[error("Login failed: {0}")]
    Auth(#[source] SessionError),
}

/// Totals for one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOutcome {
    /// Transferred and moved to the cold folder
    pub uploaded: usize,
    /// Transfer failed; left in the hot folder
    pub failed: usize,
    /// Transferred, but the move to the cold folder failed; left in the hot folder
    pub archive_failed: usize,
    /// The user stopped the run
    pub interrupted: bool,
}

impl RunOutcome {
    pub fn summary(&self) -> String {
        let mut summary = format!(
            "Uploaded files: {}, failed files: {}",
            self.uploaded, self.failed
        );
        if self.archive_failed > 0 {
            summary.push_str(&format!(", not archived: {}", self.archive_failed));
        }
        summary
    }
}

/// One entry of the hot-folder snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTask {
    pub name: OsString,
    pub source: PathBuf,
    pub destination: PathBuf,
}

impl FileTask {
    fn new(name: OsString, settings: &Settings) -> Self {
        Self {
            source: settings.hot_dir().join(&name),
            destination: settings.cold_dir().join(&name),
            name,
        }
    }

    pub fn display_name(&self) -> String {
        self.name.to_string_lossy().into_owned()
    }
}

impl fmt::Display for FileTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name.to_string_lossy())
    }
}

/// Why a single upload did not happen
#[derive(Error, Debug)]
enum UploadError {
    #[error("cannot read {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{path:?} is not a regular file")]
    NotAFile { path: PathBuf },

    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Runs the upload-and-archive workflow for validated settings
pub struct Runner<T: Transport> {
    settings: Settings,
    transport: T,
}

impl<T: Transport> Runner<T> {
    pub fn new(settings: Settings, transport: T) -> Self {
        Self {
            settings,
            transport,
        }
    }

    /// Upload and archive everything currently in the hot folder
    ///
    /// `shutdown` resolves when the user asks the run to stop. The session,
    /// once opened, is closed on every path out of this function.
    pub async fn run<S>(&self, shutdown: S) -> Result<RunOutcome, RunError>
    where
        S: Future<Output = ()>,
    {
        let tasks = snapshot(&self.settings).await?;
        let mut outcome = RunOutcome::default();

        if tasks.is_empty() {
            info!("No files to upload.");
            return Ok(outcome);
        }
        debug!("{} file(s) in hot folder", tasks.len());

        tokio::pin!(shutdown);

        let connected = tokio::select! {
            biased;
            _ = &mut shutdown => None,
            result = self.transport.connect(self.settings.server()) => Some(result),
        };
        let Some(connected) = connected else {
            warn!("Interrupted by user.");
            outcome.interrupted = true;
            return Ok(outcome);
        };
        let mut session = connected.map_err(RunError::Connect)?;

        info!("🔑 Logging in as {}...", self.settings.username());
        let logged_in = tokio::select! {
            biased;
            _ = &mut shutdown => None,
            result = session.login(
                self.settings.username(),
                self.settings.password(),
            ) => Some(result),
        };
        match logged_in {
            None => {
                warn!("Interrupted by user.");
                close(&mut session).await;
                outcome.interrupted = true;
                return Ok(outcome);
            }
            Some(Err(e)) => {
                close(&mut session).await;
                return Err(RunError::Auth(e));
            }
            Some(Ok(())) => {}
        }

        info!(
            "Starting to upload files to {}{}",
            self.settings.server().host,
            self.settings.server_dir()
        );

        for task in &tasks {
            info!("⬆️  Uploading {}...", task);

            let stored = tokio::select! {
                biased;
                _ = &mut shutdown => None,
                result = self.upload(&mut session, task) => Some(result),
            };

            match stored {
                None => {
                    warn!("Interrupted by user.");
                    outcome.interrupted = true;
                    break;
                }
                Some(Err(e)) => {
                    warn!("❌ {}: upload failed: {}", task, e);
                    outcome.failed += 1;
                }
                Some(Ok(bytes)) => {
                    info!("✅ {} uploaded ({} bytes)", task, bytes);
                    debug!("Moving {:?} to {:?}", task.source, task.destination);
                    match archive(&task.source, &task.destination).await {
                        Ok(()) => {
                            info!("📦 {} moved to {:?}", task, self.settings.cold_dir());
                            outcome.uploaded += 1;
                        }
                        Err(e) => {
                            error!(
                                "{} was uploaded but could not be moved to {:?}: {}",
                                task, task.destination, e
                            );
                            outcome.archive_failed += 1;
                        }
                    }
                }
            }
        }

        close(&mut session).await;
        Ok(outcome)
    }

    async fn upload(&self, session: &mut T::Session, task: &FileTask) -> Result<u64, UploadError> {
        let read_error = |source| UploadError::Read {
            path: task.source.clone(),
            source,
        };

        let file = File::open(&task.source).await.map_err(read_error)?;
        let metadata = file.metadata().await.map_err(read_error)?;
        if !metadata.is_file() {
            return Err(UploadError::NotAFile {
                path: task.source.clone(),
            });
        }

        let remote_path = self.settings.remote_path(&task.display_name());
        let mut reader = BufReader::new(file);
        Ok(session
            .store(&remote_path, &mut reader, metadata.len())
            .await?)
    }
}

/// Names in the hot folder at this instant, sorted so one run's order is reproducible
async fn snapshot(settings: &Settings) -> Result<Vec<FileTask>, RunError> {
    let path = settings.hot_dir();
    let snapshot_error = |source| RunError::Snapshot {
        path: path.to_path_buf(),
        source,
    };

    let mut entries = fs::read_dir(path).await.map_err(snapshot_error)?;
    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(snapshot_error)? {
        names.push(entry.file_name());
    }
    names.sort();

    Ok(names
        .into_iter()
        .map(|name| FileTask::new(name, settings))
        .collect())
}

/// Move `source` to `destination`, copying when a rename is not possible
///
/// On failure the source is left where it was, and nothing that was already
/// in the cold folder is deleted.
pub async fn archive(source: &Path, destination: &Path) -> io::Result<()> {
    let rename_error = match fs::rename(source, destination).await {
        Ok(()) => return Ok(()),
        Err(e) => e,
    };
    debug!("Rename failed ({}), copying instead", rename_error);
    copy_into_place(source, destination).await
}

/// Copy next to `destination` under a staging name, rename the copy into
/// place, then drop the source
///
/// Only the staging file is ever cleaned up. If the source cannot be removed
/// the file ends up in both folders.
async fn copy_into_place(source: &Path, destination: &Path) -> io::Result<()> {
    let staging = staging_path(destination);

    if let Err(e) = fs::copy(source, &staging).await {
        let _ = fs::remove_file(&staging).await;
        return Err(e);
    }
    if let Err(e) = fs::rename(&staging, destination).await {
        let _ = fs::remove_file(&staging).await;
        return Err(e);
    }
    fs::remove_file(source).await
}

fn staging_path(destination: &Path) -> PathBuf {
    let mut name = OsString::from(".");
    name.push(destination.file_name().unwrap_or_default());
    name.push(".part");
    destination.with_file_name(name)
}

/// Best-effort release: the run's outcome is settled before this point
async fn close<S: RemoteSession>(session: &mut S) {
    if session.state() == SessionState::Closed {
        return;
    }
    if let Err(e) = session.quit().await {
        debug!("Ignoring error while closing session: {}", e);
    }
}
