//! Transfer Session Abstraction
//!
//! The runner only needs four things from the remote end: connect,
//! authenticate, store a named byte stream, and close. [`Transport`] and
//! [`RemoteSession`] describe exactly that, so the upload loop does not
//! depend on the wire protocol.
//!
//! ## Lifecycle
//!
//! ```text
//! Unconnected --connect--> Connected --login--> Authenticated --quit--> Closed
//!      |                       |                     |  ^
//!      +---- failure: fatal ---+                     +--+ store (0..n)
//! ```
//!
//! Failures before `Authenticated` end the run. Once authenticated, a
//! failed `store` leaves the state untouched.

#![allow(async_fn_in_trait)]

use std::fmt;

use secrecy::SecretString;
use tokio::io::AsyncRead;

use crate::config::ServerSettings;
use crate::protocol::SessionError;

/// Where a session is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unconnected,
    Connected,
    Authenticated,
    Closed,
}

impl SessionState {
    pub fn name(self) -> &'static str {
        match self {
            Self::Unconnected => "unconnected",
            Self::Connected => "connected",
            Self::Authenticated => "authenticated",
            Self::Closed => "closed",
        }
    }

    /// Fail unless the session is in `expected`
    pub fn require(self, expected: SessionState) -> Result<(), SessionError> {
        if self == expected {
            Ok(())
        } else {
            Err(SessionError::State {
                expected: expected.name(),
                actual: self.name(),
            })
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Opens sessions to the remote endpoint
pub trait Transport {
    type Session: RemoteSession;

    /// Unconnected -> Connected
    async fn connect(&self, server: &ServerSettings) -> Result<Self::Session, SessionError>;
}

/// One connection to the remote endpoint
pub trait RemoteSession {
    fn state(&self) -> SessionState;

    /// Connected -> Authenticated
    async fn login(&mut self, username: &str, password: &SecretString)
        -> Result<(), SessionError>;

    /// Store everything `source` yields under `remote_path`; returns the byte count
    ///
    /// `size` is the expected length, used for progress reporting only.
    async fn store<R>(
        &mut self,
        remote_path: &str,
        source: &mut R,
        size: u64,
    ) -> Result<u64, SessionError>
    where
        R: AsyncRead + Unpin + Send;

    /// Any state -> Closed, best effort
    async fn quit(&mut self) -> Result<(), SessionError>;
}
