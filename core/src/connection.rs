//! Connection targets and transports

use crate::{Error, Result};
use std::fmt;
use std::sync::Arc;
use tokio::net::TcpStream;

/// Default plain-text port
pub const DEFAULT_PORT: u16 = 6667;
/// Conventional TLS port; connecting to it turns TLS on unless told otherwise
pub const DEFAULT_TLS_PORT: u16 = 6697;
/// Real name sent in the USER command when none is configured
pub const DEFAULT_REALNAME: &str = "Chatbot";

/// Immutable description of the server a connection talks to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectInfo {
    /// Server host name
    pub host: String,
    /// Server port
    pub port: u16,
    /// Candidate nicknames, tried in order
    pub nicks: Vec<String>,
    /// Login user name
    pub user: String,
    /// Real name sent during registration
    pub realname: String,
    /// Optional server password
    pub password: Option<String>,
    /// Whether the transport is wrapped in TLS
    pub tls: bool,
}

impl ConnectInfo {
    /// Create connection info, failing if the nickname list is empty
    ///
    /// A missing port defaults to 6667, and TLS is enabled iff the port is 6697.
    pub fn new(
        host: impl Into<String>,
        port: Option<u16>,
        nicks: Vec<String>,
        user: impl Into<String>,
    ) -> Result<Self> {
        let host = host.into();
        let user = user.into();

        if host.is_empty() {
            return Err(Error::ConnectInfo("server host is empty".to_string()));
        }
        if nicks.is_empty() || nicks.iter().any(|n| n.is_empty() || n.contains(' ')) {
            return Err(Error::ConnectInfo(format!(
                "{} needs at least one valid nickname",
                host
            )));
        }
        if user.is_empty() {
            return Err(Error::ConnectInfo(format!("{} needs a user name", host)));
        }

        let port = port.unwrap_or(DEFAULT_PORT);
        Ok(Self {
            host,
            port,
            nicks,
            user,
            realname: DEFAULT_REALNAME.to_string(),
            password: None,
            tls: port == DEFAULT_TLS_PORT,
        })
    }

    /// Set the server password
    pub fn with_password(mut self, password: Option<String>) -> Self {
        self.password = password.filter(|p| !p.is_empty());
        self
    }

    /// Force TLS on or off
    pub fn with_tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        self
    }

    /// Set the real name
    pub fn with_realname(mut self, realname: impl Into<String>) -> Self {
        self.realname = realname.into();
        self
    }
}

impl fmt::Display for ConnectInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)?;
        if self.tls {
            write!(f, " (tls)")?;
        }
        Ok(())
    }
}

/// Open a transport to the server described by `info`
pub async fn connect(info: &ConnectInfo) -> Result<Box<dyn ConnectionStream>> {
    tracing::debug!("Connecting to {}", info);
    let tcp = TcpStream::connect((info.host.as_str(), info.port)).await?;
    tcp.set_nodelay(true)?;

    if !info.tls {
        return Ok(Box::new(tcp));
    }

    let name = rustls::ServerName::try_from(info.host.as_str())
        .map_err(|e| Error::Connection(format!("Invalid TLS server name {}: {}", info.host, e)))?;
    let stream = tls_connector()
        .connect(name, tcp)
        .await
        .map_err(|e| Error::Connection(format!("TLS handshake with {} failed: {}", info.host, e)))?;

    tracing::debug!("TLS established with {}", info);
    Ok(Box::new(stream))
}

fn tls_connector() -> tokio_rustls::TlsConnector {
    let mut roots = rustls::RootCertStore::empty();
    roots.add_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.iter().map(|ta| {
        rustls::OwnedTrustAnchor::from_subject_spki_name_constraints(
            ta.subject,
            ta.spki,
            ta.name_constraints,
        )
    }));

    let config = rustls::ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(roots)
        .with_no_client_auth();

    tokio_rustls::TlsConnector::from(Arc::new(config))
}

/// Trait for connection streams (TCP, TLS, or in-memory)
pub trait ConnectionStream: Send {
    fn split(self: Box<Self>) -> (Box<dyn ConnectionReadHalf>, Box<dyn ConnectionWriteHalf>);
}

/// Trait for connection read half
pub trait ConnectionReadHalf: Send + tokio::io::AsyncRead + Unpin {}

/// Trait for connection write half
pub trait ConnectionWriteHalf: Send + tokio::io::AsyncWrite + Unpin {}

impl<T> ConnectionReadHalf for tokio::io::ReadHalf<T> where T: tokio::io::AsyncRead + Send {}
impl<T> ConnectionWriteHalf for tokio::io::WriteHalf<T> where T: tokio::io::AsyncWrite + Send {}

impl ConnectionStream for TcpStream {
    fn split(self: Box<Self>) -> (Box<dyn ConnectionReadHalf>, Box<dyn ConnectionWriteHalf>) {
        let (read, write) = tokio::io::split(*self);
        (Box::new(read), Box::new(write))
    }
}

impl ConnectionStream for tokio_rustls::client::TlsStream<TcpStream> {
    fn split(self: Box<Self>) -> (Box<dyn ConnectionReadHalf>, Box<dyn ConnectionWriteHalf>) {
        let (read, write) = tokio::io::split(*self);
        (Box::new(read), Box::new(write))
    }
}

// In-memory pipe, used to drive a session without a server
impl ConnectionStream for tokio::io::DuplexStream {
    fn split(self: Box<Self>) -> (Box<dyn ConnectionReadHalf>, Box<dyn ConnectionWriteHalf>) {
        let (read, write) = tokio::io::split(*self);
        (Box::new(read), Box::new(write))
    }
}
