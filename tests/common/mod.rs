//! Scripted in-process FTP server for integration tests
//!
//! Speaks just enough RFC 959 for the pusher: `USER`, `PASS`, `TYPE`,
//! `PASV`, `STOR` and `QUIT`, plus `AUTH TLS`, `PBSZ` and `PROT` when a
//! certificate is configured. Stored files are kept in memory.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};

use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;

trait Stream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Stream for T {}

/// What the server accepts and refuses
#[derive(Clone)]
pub struct ServerOptions {
    pub username: String,
    pub password: String,
    /// Remote paths answered with `550`
    pub reject: HashSet<String>,
    /// Answer `TYPE` with `504`
    pub refuse_binary: bool,
    /// Enables `AUTH TLS`
    pub tls: Option<TlsAcceptor>,
}

impl ServerOptions {
    /// Accept `AUTH TLS` with a fresh self-signed certificate for `127.0.0.1`
    ///
    /// Returns the options and the certificate PEM for the client's `ca_file`.
    pub fn with_tls() -> (Self, String) {
        let key_pair = rcgen::KeyPair::generate().expect("generate key");
        let params =
            rcgen::CertificateParams::new(vec!["127.0.0.1".to_string()]).expect("cert params");
        let cert = params.self_signed(&key_pair).expect("self-sign");

        let cert_der: CertificateDer<'static> = cert.der().clone();
        let key_der = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));

        let config = rustls::ServerConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .expect("protocol versions")
        .with_no_client_auth()
        .with_single_cert(vec![cert_der], key_der)
        .expect("server certificate");

        let options = Self {
            tls: Some(TlsAcceptor::from(Arc::new(config))),
            ..Self::default()
        };
        (options, cert.pem())
    }
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            username: "pusher".to_string(),
            password: "secret".to_string(),
            reject: HashSet::new(),
            refuse_binary: false,
            tls: None,
        }
    }
}

/// Everything the server saw
#[derive(Default)]
pub struct ServerLog {
    pub files: BTreeMap<String, Vec<u8>>,
    pub commands: Vec<String>,
}

pub struct FakeFtpServer {
    pub addr: SocketAddr,
    log: Arc<Mutex<ServerLog>>,
    handle: JoinHandle<()>,
}

impl FakeFtpServer {
    pub async fn start(options: ServerOptions) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind control listener");
        let addr = listener.local_addr().expect("local addr");
        let log = Arc::new(Mutex::new(ServerLog::default()));

        let shared = log.clone();
        let handle = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let options = options.clone();
                let log = shared.clone();
                tokio::spawn(async move {
                    let _ = handle_connection(stream, options, log).await;
                });
            }
        });

        Self { addr, log, handle }
    }

    pub fn files(&self) -> BTreeMap<String, Vec<u8>> {
        self.log.lock().unwrap().files.clone()
    }

    /// Command verbs in the order received, e.g. `["USER", "PASS", ...]`
    pub fn verbs(&self) -> Vec<String> {
        self.log
            .lock()
            .unwrap()
            .commands
            .iter()
            .map(|line| line.split(' ').next().unwrap_or_default().to_string())
            .collect()
    }
}

impl Drop for FakeFtpServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn handle_connection(
    stream: TcpStream,
    options: ServerOptions,
    log: Arc<Mutex<ServerLog>>,
) -> std::io::Result<()> {
    let mut control: BufReader<Box<dyn Stream>> = BufReader::new(Box::new(stream));
    control.get_mut().write_all(b"220 Fake FTP ready\r\n").await?;

    let mut user = String::new();
    let mut logged_in = false;
    let mut protected = false;
    let mut passive: Option<TcpListener> = None;

    loop {
        let mut line = String::new();
        if control.read_line(&mut line).await? == 0 {
            return Ok(());
        }
        let line = line.trim_end_matches(['\r', '\n']).to_string();
        log.lock().unwrap().commands.push(line.clone());

        let (verb, arg) = match line.split_once(' ') {
            Some((verb, arg)) => (verb.to_ascii_uppercase(), arg.to_string()),
            None => (line.to_ascii_uppercase(), String::new()),
        };

        let reply = match verb.as_str() {
            "AUTH" => match &options.tls {
                Some(acceptor) => {
                    control.get_mut().write_all(b"234 Proceed with negotiation\r\n").await?;
                    let plain = control.into_inner();
                    let secured = acceptor.accept(plain).await?;
                    control = BufReader::new(Box::new(secured));
                    continue;
                }
                None => "502 TLS not available".to_string(),
            },
            "PBSZ" => "200 PBSZ=0".to_string(),
            "PROT" => {
                protected = arg.eq_ignore_ascii_case("P");
                "200 Protection level set".to_string()
            }
            "USER" => {
                user = arg;
                "331 Password required".to_string()
            }
            "PASS" => {
                if user == options.username && arg == options.password {
                    logged_in = true;
                    "230 Logged in".to_string()
                } else {
                    "530 Login incorrect".to_string()
                }
            }
            "TYPE" if logged_in && options.refuse_binary => {
                "504 Type not supported".to_string()
            }
            "TYPE" if logged_in => "200 Type set".to_string(),
            "PASV" if logged_in => {
                let listener = TcpListener::bind("127.0.0.1:0").await?;
                let port = listener.local_addr()?.port();
                passive = Some(listener);
                format!(
                    "227 Entering Passive Mode (127,0,0,1,{},{})",
                    port >> 8,
                    port & 0xff
                )
            }
            "STOR" if logged_in => match passive.take() {
                None => "425 Use PASV first".to_string(),
                Some(_) if options.reject.contains(&arg) => {
                    "550 Permission denied".to_string()
                }
                Some(listener) => {
                    control.get_mut().write_all(b"150 Opening data connection\r\n").await?;
                    let (tcp, _) = listener.accept().await?;
                    let mut data: Box<dyn Stream> = match (&options.tls, protected) {
                        (Some(acceptor), true) => Box::new(acceptor.accept(tcp).await?),
                        _ => Box::new(tcp),
                    };
                    let mut content = Vec::new();
                    data.read_to_end(&mut content).await?;
                    log.lock().unwrap().files.insert(arg, content);
                    "226 Transfer complete".to_string()
                }
            },
            "QUIT" => {
                control.get_mut().write_all(b"221 Goodbye\r\n").await?;
                return Ok(());
            }
            _ if !logged_in => "530 Please login with USER and PASS".to_string(),
            _ => "502 Command not implemented".to_string(),
        };

        control
            .get_mut()
            .write_all(format!("{}\r\n", reply).as_bytes())
            .await?;
    }
}

/// INI text for a server on `addr` with the default credentials
pub fn config_text(hot: &Path, cold: &Path, addr: SocketAddr, password: &str) -> String {
    format!(
        "[folders]\n\
         hotfolder = {}\n\
         coldfolder = {}\n\
         \n\
         [server]\n\
         address = {}\n\
         dir = /incoming\n\
         username = pusher\n\
         password = {}\n\
         timeout = 5\n",
        hot.display(),
        cold.display(),
        addr,
        password
    )
}

/// A listener that accepts connections but never greets
///
/// Keep the listener alive for as long as the address is in use.
pub async fn silent_listener() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind silent listener");
    let addr = listener.local_addr().expect("local addr");
    (listener, addr)
}

/// A local address nothing is listening on
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind probe listener");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);
    addr
}
