//! Plain TCP and TLS streams behind a single `Read + Write` type.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection, RootCertStore, StreamOwned};

use crate::error::FetchError;

/// URL scheme understood by the fetcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    /// Parse a URL scheme, rejecting anything but `http` and `https`.
    pub fn parse(scheme: &str) -> Result<Self, FetchError> {
        match scheme {
            "http" => Ok(Scheme::Http),
            "https" => Ok(Scheme::Https),
            other => Err(FetchError::UnsupportedScheme(other.to_string())),
        }
    }

    pub fn default_port(self) -> u16 {
        match self {
            Scheme::Http => 80,
            Scheme::Https => 443,
        }
    }
}

/// Build the client TLS configuration with the Mozilla root store.
pub fn default_tls_config() -> Result<Arc<ClientConfig>, FetchError> {
    let roots = RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    };

    let config =
        ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()
            .map_err(|e| FetchError::Tls(e.to_string()))?
            .with_root_certificates(roots)
            .with_no_client_auth();

    Ok(Arc::new(config))
}

/// A connected socket, either plain or wrapped in TLS.
pub(crate) enum Transport {
    Plain(TcpStream),
    Tls(Box<StreamOwned<ClientConnection, TcpStream>>),
}

impl Transport {
    /// Open a connection, using `timeout` as the connect deadline and as the
    /// initial read/write stall timeout.
    ///
    /// For `https` the TLS handshake is completed before returning so that
    /// handshake failures are reported as [`FetchError::Tls`].
    pub fn connect(
        scheme: Scheme,
        host: &str,
        port: u16,
        timeout: Duration,
        tls: Option<&Arc<ClientConfig>>,
    ) -> Result<Self, FetchError> {
        let connect_error = |message: String| FetchError::Connect {
            host: host.to_string(),
            port,
            message,
        };

        let addrs = (host, port)
            .to_socket_addrs()
            .map_err(|e| connect_error(e.to_string()))?;

        let mut last_error = String::from("no addresses resolved");
        let mut stream = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(s) => {
                    stream = Some(s);
                    break;
                }
                Err(e) => last_error = e.to_string(),
            }
        }
        let mut tcp = stream.ok_or_else(|| connect_error(last_error))?;

        tcp.set_nodelay(true)
            .and_then(|_| tcp.set_read_timeout(Some(timeout)))
            .and_then(|_| tcp.set_write_timeout(Some(timeout)))
            .map_err(|e| connect_error(e.to_string()))?;

        match scheme {
            Scheme::Http => Ok(Transport::Plain(tcp)),
            Scheme::Https => {
                let config = tls.ok_or_else(|| FetchError::Tls("no TLS configuration".into()))?;
                let name = ServerName::try_from(host.to_string())
                    .map_err(|e| FetchError::Tls(e.to_string()))?;
                let mut conn = ClientConnection::new(Arc::clone(config), name)
                    .map_err(|e| FetchError::Tls(e.to_string()))?;

                while conn.is_handshaking() {
                    conn.complete_io(&mut tcp).map_err(|e| match e.kind() {
                        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => {
                            FetchError::Timeout(timeout)
                        }
                        _ => FetchError::Tls(e.to_string()),
                    })?;
                }

                Ok(Transport::Tls(Box::new(StreamOwned::new(conn, tcp))))
            }
        }
    }

    fn tcp(&self) -> &TcpStream {
        match self {
            Transport::Plain(tcp) => tcp,
            Transport::Tls(stream) => stream.get_ref(),
        }
    }

    /// Update the rolling stall timeout for subsequent reads and writes.
    pub fn set_timeout(&self, timeout: Duration) -> io::Result<()> {
        let tcp = self.tcp();
        tcp.set_read_timeout(Some(timeout))?;
        tcp.set_write_timeout(Some(timeout))
    }

    /// Check whether the peer still holds the connection open.
    ///
    /// A plain stream with unread bytes is not reusable: they belong to no
    /// request we sent. A TLS stream may legitimately hold post-handshake
    /// records such as session tickets.
    pub fn is_alive(&self) -> bool {
        let tcp = self.tcp();
        if tcp.set_nonblocking(true).is_err() {
            return false;
        }

        let mut probe = [0u8; 1];
        let alive = match tcp.peek(&mut probe) {
            Ok(0) => false,
            Ok(_) => matches!(self, Transport::Tls(_)),
            Err(e) => e.kind() == io::ErrorKind::WouldBlock,
        };

        tcp.set_nonblocking(false).is_ok() && alive
    }

    /// Close the connection, sending a TLS close_notify when applicable.
    pub fn shutdown(&mut self) {
        if let Transport::Tls(stream) = self {
            stream.conn.send_close_notify();
            let _ = stream.flush();
        }
        let _ = self.tcp().shutdown(Shutdown::Both);
    }
}

impl Read for Transport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Transport::Plain(tcp) => tcp.read(buf),
            Transport::Tls(stream) => stream.read(buf),
        }
    }
}

impl Write for Transport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Transport::Plain(tcp) => tcp.write(buf),
            Transport::Tls(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Transport::Plain(tcp) => tcp.flush(),
            Transport::Tls(stream) => stream.flush(),
        }
    }
}
