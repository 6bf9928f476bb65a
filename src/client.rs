//! FTP Client Module
//!
//! [`FtpClient`] opens control connections; [`FtpSession`] drives one of
//! them through login, any number of `STOR` uploads, and `QUIT`.
//!
//! Uploads are binary and use passive mode: before each file the client
//! sends `TYPE I`, asks for a data address with `PASV`, connects to it,
//! issues `STOR`, streams the file and closes the data connection, which
//! marks end-of-file for the server. The server's final `226` reply is the
//! transport-level confirmation that the file arrived.
//!
//! With `tls = explicit` the control connection is upgraded right after
//! the greeting (`AUTH TLS`, `PBSZ 0`, `PROT P`) and every data connection
//! is wrapped with the same client configuration.

use std::net::IpAddr;

use indicatif::{ProgressBar, ProgressStyle};
use secrecy::{ExposeSecret, SecretString};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, info};

use crate::config::{ServerSettings, TlsMode};
use crate::protocol::{
    parse_pasv_reply, with_timeout, BoxedStream, ControlChannel, SessionError, CHUNK_SIZE,
};
use crate::session::{RemoteSession, SessionState, Transport};
use crate::tls::ClientTlsConfig;

/// Opens FTP sessions
pub struct FtpClient {
    show_progress: bool,
}

impl FtpClient {
    /// Create a client; `show_progress` draws a progress bar per upload
    pub fn new(show_progress: bool) -> Self {
        Self { show_progress }
    }
}

impl Transport for FtpClient {
    type Session = FtpSession;

    async fn connect(&self, server: &ServerSettings) -> Result<FtpSession, SessionError> {
        let addr = server.socket_addr();
        info!("🔗 Connecting to {}...", addr);

        let tcp = with_timeout(server.timeout, "Connecting", async {
            TcpStream::connect(&addr)
                .await
                .map_err(|source| SessionError::Connect {
                    addr: addr.clone(),
                    source,
                })
        })
        .await?;
        tcp.set_nodelay(true).ok();
        let peer = tcp.peer_addr()?.ip();

        let mut control = ControlChannel::new(Box::new(tcp), server.timeout);
        let banner = control.read_reply().await?;
        if !banner.is_completion() {
            return Err(SessionError::Rejected {
                command: "connection".to_string(),
                reply: banner,
            });
        }
        debug!("Server greeting: {}", banner.message());

        let tls = match server.tls {
            TlsMode::None => None,
            TlsMode::Explicit => {
                let tls = client_tls_config(server)?;
                control = secure_control_channel(control, &tls).await?;
                info!("🔐 TLS connection established");
                Some(tls)
            }
        };

        Ok(FtpSession {
            control,
            peer,
            tls,
            state: SessionState::Connected,
            show_progress: self.show_progress,
        })
    }
}

/// An open FTP control connection
pub struct FtpSession {
    control: ControlChannel,
    peer: IpAddr,
    tls: Option<ClientTlsConfig>,
    state: SessionState,
    show_progress: bool,
}

impl RemoteSession for FtpSession {
    fn state(&self) -> SessionState {
        self.state
    }

    async fn login(
        &mut self,
        username: &str,
        password: &SecretString,
    ) -> Result<(), SessionError> {
        self.state.require(SessionState::Connected)?;

        let mut reply = self.control.execute(&format!("USER {}", username)).await?;
        if reply.code == 331 {
            reply = self
                .control
                .execute(&format!("PASS {}", password.expose_secret()))
                .await?;
        }
        // 332 asks for ACCT, which has no place in the configuration
        if !reply.is_completion() {
            return Err(SessionError::Auth(reply));
        }

        self.state = SessionState::Authenticated;
        debug!("Logged in as {}", username);
        Ok(())
    }

    async fn store<R>(
        &mut self,
        remote_path: &str,
        source: &mut R,
        size: u64,
    ) -> Result<u64, SessionError>
    where
        R: AsyncRead + Unpin + Send,
    {
        self.state.require(SessionState::Authenticated)?;

        // A refused mode fails this file, not the session
        self.control.expect_completion("TYPE I").await?;
        let pasv = self.control.expect_completion("PASV").await?;
        let data_addr = parse_pasv_reply(&pasv, self.peer)?;
        debug!("Data connection to {}", data_addr);

        let timeout = self.control.timeout();
        let data = with_timeout(timeout, "Opening data connection", async {
            Ok(TcpStream::connect(data_addr).await?)
        })
        .await?;

        let command = format!("STOR {}", remote_path);
        let opened = self.control.execute(&command).await?;
        if !opened.is_preliminary() && !opened.is_completion() {
            return Err(SessionError::Rejected {
                command: "STOR".to_string(),
                reply: opened,
            });
        }

        let sent = match self.open_data_stream(data).await {
            Ok(mut stream) => self.send_data(&mut stream, source, size).await,
            Err(e) => Err(e),
        };

        // The data connection is closed by now; collect the verdict either
        // way so the next command does not read this transfer's reply.
        let verdict = if opened.is_preliminary() {
            self.control.read_reply().await.map(Some)
        } else {
            Ok(None)
        };

        let bytes = sent?;
        match verdict? {
            Some(reply) if !reply.is_completion() => Err(SessionError::Rejected {
                command: "STOR".to_string(),
                reply,
            }),
            _ => Ok(bytes),
        }
    }

    async fn quit(&mut self) -> Result<(), SessionError> {
        let previous = std::mem::replace(&mut self.state, SessionState::Closed);
        if previous == SessionState::Closed {
            return Ok(());
        }

        let reply = self.control.execute("QUIT").await?;
        debug!("Session closed: {}", reply);
        Ok(())
    }
}

impl FtpSession {
    async fn open_data_stream(&self, tcp: TcpStream) -> Result<BoxedStream, SessionError> {
        match &self.tls {
            None => Ok(Box::new(tcp)),
            Some(tls) => {
                let connector = TlsConnector::from(tls.config.clone());
                let stream = with_timeout(self.control.timeout(), "Data TLS handshake", async {
                    connector
                        .connect(tls.server_name.clone(), tcp)
                        .await
                        .map_err(|e| SessionError::Tls(e.to_string()))
                })
                .await?;
                Ok(Box::new(stream))
            }
        }
    }

    /// Copy `source` into the data connection and close it
    async fn send_data<R>(
        &self,
        stream: &mut BoxedStream,
        source: &mut R,
        size: u64,
    ) -> Result<u64, SessionError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let timeout = self.control.timeout();
        let pb = if self.show_progress {
            create_progress_bar(size)
        } else {
            ProgressBar::hidden()
        };

        let mut buffer = vec![0u8; CHUNK_SIZE];
        let mut bytes_sent: u64 = 0;

        loop {
            let bytes_read = source.read(&mut buffer).await?;
            if bytes_read == 0 {
                break;
            }

            with_timeout(timeout, "Sending file data", async {
                Ok(stream.write_all(&buffer[..bytes_read]).await?)
            })
            .await?;

            bytes_sent += bytes_read as u64;
            pb.set_position(bytes_sent);
        }

        with_timeout(timeout, "Closing data connection", async {
            Ok(stream.shutdown().await?)
        })
        .await?;

        pb.finish_and_clear();
        Ok(bytes_sent)
    }
}

fn client_tls_config(server: &ServerSettings) -> Result<ClientTlsConfig, SessionError> {
    let config = if server.insecure {
        ClientTlsConfig::insecure(&server.host)
    } else {
        ClientTlsConfig::new(server.ca_file.as_deref(), &server.host)
    };
    config.map_err(|e| SessionError::Tls(format!("{:#}", e)))
}

/// `AUTH TLS` and protect the data channel (RFC 4217)
async fn secure_control_channel(
    mut control: ControlChannel,
    tls: &ClientTlsConfig,
) -> Result<ControlChannel, SessionError> {
    control.expect_completion("AUTH TLS").await?;

    let timeout = control.timeout();
    let stream = control.into_inner();
    let connector = TlsConnector::from(tls.config.clone());
    let stream = with_timeout(timeout, "TLS handshake", async {
        connector
            .connect(tls.server_name.clone(), stream)
            .await
            .map_err(|e| SessionError::Tls(e.to_string()))
    })
    .await?;

    let mut control = ControlChannel::new(Box::new(stream), timeout);
    control.expect_completion("PBSZ 0").await?;
    control.expect_completion("PROT P").await?;
    Ok(control)
}

/// Create progress bar for transfers
fn create_progress_bar(total_size: u64) -> ProgressBar {
    let pb = ProgressBar::new(total_size);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    pb.set_style(style);
    pb
}
