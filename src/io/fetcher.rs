//! Keep-alive tile fetcher.
//!
//! [`TileFetcher`] issues one `GET` at a time over a single socket and keeps
//! that socket open between calls. Consecutive tiles from the same server
//! reuse the connection, which saves a TCP and TLS handshake per tile.
//!
//! # Protocol
//!
//! ```text
//! fetch(url, timeout)
//!   1. parse scheme/host/port/path
//!   2. reuse socket if scheme+host+port match and the peer is still there,
//!      otherwise reconnect (timeout = connect deadline)
//!   3. send GET with `Connection: keep-alive`
//!   4. read status line + headers, each read bounded by the stall timeout
//!   5. allocate exactly Content-Length bytes and stream the body in
//!   6. drop the socket on error or on `Connection: close`
//! ```
//!
//! The stall timeout is rolling: it bounds the gap between two successful
//! reads, not the total duration of the call.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::header::{
    HeaderName, HeaderValue, CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, TRANSFER_ENCODING,
};
use http::{HeaderMap, StatusCode};
use rustls::ClientConfig;
use tracing::{debug, trace};

use super::buffer::MemoryBuffer;
use super::transport::{default_tls_config, Scheme, Transport};
use crate::error::FetchError;

/// Stall timeout used when the caller does not supply one.
pub const DEFAULT_STALL_TIMEOUT: Duration = Duration::from_secs(5);

/// User agent sent with every request.
pub const DEFAULT_USER_AGENT: &str = concat!("osm-tiles/", env!("CARGO_PKG_VERSION"));

/// The only content type accepted from a tile server.
pub const PNG_CONTENT_TYPE: &str = "image/png";

/// Largest body accepted from a tile server. A 512 px RGBA tile stored
/// without compression is 1 MiB, so anything above this is not a tile.
pub const MAX_BODY_SIZE: usize = 16 * 1024 * 1024;

/// Maximum length of a single status or header line.
const MAX_HEADER_LINE: usize = 8 * 1024;

/// Maximum number of header lines in one response.
const MAX_HEADER_LINES: usize = 100;

/// Smallest timeout handed to the socket; a zero timeout is rejected by the OS.
const MIN_TIMEOUT: Duration = Duration::from_millis(1);

// =============================================================================
// Request Target
// =============================================================================

/// Connection-relevant parts of a tile URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestTarget {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
    /// Path plus query string, always starting with `/`
    pub path: String,
}

impl RequestTarget {
    /// Split a URL into scheme, host, port, and request path.
    pub fn parse(url: &str) -> Result<Self, FetchError> {
        let parsed =
            url::Url::parse(url).map_err(|e| FetchError::InvalidUrl(format!("{url}: {e}")))?;

        let scheme = Scheme::parse(parsed.scheme())?;
        let host = parsed
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| FetchError::InvalidUrl(format!("{url}: missing host")))?
            .to_string();
        let port = parsed.port().unwrap_or_else(|| scheme.default_port());

        let mut path = parsed.path().to_string();
        if path.is_empty() {
            path.push('/');
        }
        if let Some(query) = parsed.query() {
            path.push('?');
            path.push_str(query);
        }

        Ok(Self {
            scheme,
            host,
            port,
            path,
        })
    }

    /// Value of the `Host` header; the port is omitted when it is the default.
    pub fn host_header(&self) -> String {
        if self.port == self.scheme.default_port() {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    fn same_endpoint(&self, conn: &Connection) -> bool {
        self.scheme == conn.scheme && self.port == conn.port && self.host == conn.host
    }
}

// =============================================================================
// Response Head
// =============================================================================

/// Parsed status line and headers of an accepted response.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub content_length: usize,
    /// Server asked to close the connection after this response
    pub close: bool,
}

/// Read and validate the status line and headers.
///
/// Rejects any status other than 200, chunked bodies, a missing or zero
/// `Content-Length`, and any `Content-Type` other than `image/png`.
pub fn read_response_head<R: BufRead>(
    reader: &mut R,
    timeout: Duration,
) -> Result<ResponseHead, FetchError> {
    let status_line = read_line(reader, timeout)?;
    trace!("<< {}", status_line);

    let mut parts = status_line.split_whitespace();
    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/") {
        return Err(FetchError::MalformedStatus(status_line));
    }
    let status = parts
        .next()
        .and_then(|code| StatusCode::from_bytes(code.as_bytes()).ok())
        .ok_or_else(|| FetchError::MalformedStatus(status_line.clone()))?;
    if status != StatusCode::OK {
        return Err(FetchError::HttpStatus(status));
    }

    let mut headers = HeaderMap::new();
    let mut terminated = false;
    for _ in 0..MAX_HEADER_LINES {
        let line = read_line(reader, timeout)?;
        if line.is_empty() {
            terminated = true;
            break;
        }
        trace!("<< {}", line);

        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        match (
            HeaderName::from_bytes(name.trim().as_bytes()),
            HeaderValue::from_str(value.trim()),
        ) {
            (Ok(name), Ok(value)) => {
                headers.append(name, value);
            }
            _ => trace!("Skipping unparsable header line"),
        }
    }
    if !terminated {
        return Err(FetchError::HeaderTooLong);
    }

    if header_has_token(&headers, &TRANSFER_ENCODING, "chunked") {
        return Err(FetchError::ChunkedUnsupported);
    }

    let content_length = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<usize>().ok())
        .filter(|&len| len > 0)
        .ok_or(FetchError::MissingContentLength)?;
    if content_length > MAX_BODY_SIZE {
        return Err(FetchError::Allocation(content_length));
    }

    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let mime = content_type.split(';').next().unwrap_or_default().trim();
    if !mime.eq_ignore_ascii_case(PNG_CONTENT_TYPE) {
        return Err(FetchError::WrongContentType(content_type.to_string()));
    }

    let close = header_has_token(&headers, &CONNECTION, "close")
        || (version == "HTTP/1.0" && !header_has_token(&headers, &CONNECTION, "keep-alive"));

    Ok(ResponseHead {
        status,
        headers,
        content_length,
        close,
    })
}

/// Stream exactly `content_length` bytes into a freshly allocated buffer.
pub fn read_body<R: Read>(
    reader: &mut R,
    content_length: usize,
    timeout: Duration,
) -> Result<Bytes, FetchError> {
    let mut buffer =
        MemoryBuffer::allocate(content_length).map_err(|_| FetchError::Allocation(content_length))?;

    let dest = buffer.as_mut_slice();
    let mut filled = 0;
    while filled < content_length {
        match reader.read(&mut dest[filled..]) {
            Ok(0) => return Err(FetchError::ConnectionClosed),
            Ok(n) => {
                filled += n;
                trace!("Read {} bytes, total {}/{}", n, filled, content_length);
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(map_io_error(e, timeout)),
        }
    }

    Ok(buffer.freeze())
}

fn read_line<R: BufRead>(reader: &mut R, timeout: Duration) -> Result<String, FetchError> {
    let mut line = Vec::new();
    let read = reader
        .by_ref()
        .take(MAX_HEADER_LINE as u64)
        .read_until(b'\n', &mut line)
        .map_err(|e| map_io_error(e, timeout))?;

    if read == 0 {
        return Err(FetchError::ConnectionClosed);
    }
    if line.last() != Some(&b'\n') {
        return Err(if line.len() >= MAX_HEADER_LINE {
            FetchError::HeaderTooLong
        } else {
            FetchError::ConnectionClosed
        });
    }

    Ok(String::from_utf8_lossy(&line).trim().to_string())
}

fn header_has_token(headers: &HeaderMap, name: &HeaderName, token: &str) -> bool {
    headers
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|t| t.trim().eq_ignore_ascii_case(token))
}

fn map_io_error(e: io::Error, timeout: Duration) -> FetchError {
    match e.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => FetchError::Timeout(timeout),
        io::ErrorKind::UnexpectedEof
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe => FetchError::ConnectionClosed,
        _ => FetchError::Io(e.to_string()),
    }
}

// =============================================================================
// Tile Fetcher
// =============================================================================

struct Connection {
    scheme: Scheme,
    host: String,
    port: u16,
    stream: BufReader<Transport>,
}

/// Reusable single-connection HTTP/1.1 client for tile downloads.
///
/// Not shareable between threads; each worker owns one.
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
/// use osm_tiles::io::TileFetcher;
///
/// let mut fetcher = TileFetcher::new();
/// let png = fetcher.fetch("https://tile.openstreetmap.org/5/16/10.png", Some(Duration::from_secs(2)))?;
/// println!("{} bytes", png.len());
/// # Ok::<(), osm_tiles::FetchError>(())
/// ```
pub struct TileFetcher {
    connection: Option<Connection>,
    tls: Option<Arc<ClientConfig>>,
    user_agent: String,
    connections_opened: u64,
}

impl TileFetcher {
    pub fn new() -> Self {
        Self::with_user_agent(DEFAULT_USER_AGENT)
    }

    pub fn with_user_agent(user_agent: impl Into<String>) -> Self {
        Self {
            connection: None,
            tls: None,
            user_agent: user_agent.into(),
            connections_opened: 0,
        }
    }

    /// Use a caller-provided TLS configuration instead of the built-in
    /// Mozilla root store.
    pub fn with_tls_config(mut self, config: Arc<ClientConfig>) -> Self {
        self.tls = Some(config);
        self
    }

    /// Number of sockets opened over the fetcher's lifetime.
    pub fn connections_opened(&self) -> u64 {
        self.connections_opened
    }

    /// Whether a socket is currently held open.
    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Close the current socket, if any.
    pub fn disconnect(&mut self) {
        if let Some(mut conn) = self.connection.take() {
            debug!("Closing connection to {}:{}", conn.host, conn.port);
            conn.stream.get_mut().shutdown();
        }
    }

    /// Download `url` and return its body.
    ///
    /// `timeout` is the connect deadline and the rolling stall timeout;
    /// `None` means [`DEFAULT_STALL_TIMEOUT`]. On any protocol or socket
    /// error the connection is torn down.
    pub fn fetch(&mut self, url: &str, timeout: Option<Duration>) -> Result<Bytes, FetchError> {
        let timeout = timeout.unwrap_or(DEFAULT_STALL_TIMEOUT).max(MIN_TIMEOUT);
        let target = RequestTarget::parse(url)?;

        let reused = self.ensure_connection(&target, timeout)?;
        let mut result = self.exchange(&target, timeout);

        // A reused socket can be closed by the server between our liveness
        // probe and the request; give it one fresh connection.
        if reused && matches!(result, Err(FetchError::ConnectionClosed)) {
            debug!("Kept-alive connection to {} went stale, reconnecting", target.host);
            self.disconnect();
            self.ensure_connection(&target, timeout)?;
            result = self.exchange(&target, timeout);
        }

        match result {
            Ok((body, close)) => {
                if close {
                    debug!("Server requested Connection: close");
                    self.disconnect();
                }
                Ok(body)
            }
            Err(e) => {
                if e.poisons_connection() {
                    self.disconnect();
                }
                Err(e)
            }
        }
    }

    /// Make sure a live socket to `target` exists. Returns `true` when an
    /// existing socket was reused.
    fn ensure_connection(
        &mut self,
        target: &RequestTarget,
        timeout: Duration,
    ) -> Result<bool, FetchError> {
        if let Some(conn) = self.connection.as_ref().filter(|c| target.same_endpoint(c)) {
            // Bytes left over from the previous response would be read as
            // the next status line.
            let unread = conn.stream.buffer().len();
            if unread > 0 {
                debug!("Dropping connection with {} unread byte(s)", unread);
            } else if conn.stream.get_ref().is_alive() {
                debug!("Reusing connection to {}:{}", conn.host, conn.port);
                return Ok(true);
            }
        }
        self.disconnect();

        let tls = match target.scheme {
            Scheme::Https => Some(self.tls_config()?),
            Scheme::Http => None,
        };

        debug!("Connecting to {}:{}", target.host, target.port);
        let transport = Transport::connect(
            target.scheme,
            &target.host,
            target.port,
            timeout,
            tls.as_ref(),
        )?;
        self.connections_opened += 1;

        self.connection = Some(Connection {
            scheme: target.scheme,
            host: target.host.clone(),
            port: target.port,
            stream: BufReader::new(transport),
        });
        Ok(false)
    }

    fn tls_config(&mut self) -> Result<Arc<ClientConfig>, FetchError> {
        if let Some(config) = &self.tls {
            return Ok(Arc::clone(config));
        }
        let config = default_tls_config()?;
        self.tls = Some(Arc::clone(&config));
        Ok(config)
    }

    /// Send one request on the current connection and read the response.
    fn exchange(
        &mut self,
        target: &RequestTarget,
        timeout: Duration,
    ) -> Result<(Bytes, bool), FetchError> {
        let conn = self.connection.as_mut().ok_or(FetchError::ConnectionClosed)?;
        conn.stream
            .get_ref()
            .set_timeout(timeout)
            .map_err(|e| FetchError::Io(e.to_string()))?;

        let request = format!(
            "GET {} HTTP/1.1\r\nHost: {}\r\nUser-Agent: {}\r\nAccept: {}\r\nConnection: keep-alive\r\n\r\n",
            target.path,
            target.host_header(),
            self.user_agent,
            PNG_CONTENT_TYPE,
        );
        trace!(">> GET {}", target.path);

        let socket = conn.stream.get_mut();
        socket
            .write_all(request.as_bytes())
            .and_then(|_| socket.flush())
            .map_err(|e| map_io_error(e, timeout))?;

        let head = read_response_head(&mut conn.stream, timeout)?;
        let body = read_body(&mut conn.stream, head.content_length, timeout)?;

        Ok((body, head.close))
    }
}

impl Default for TileFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TileFetcher {
    fn drop(&mut self) {
        self.disconnect();
    }
}

// =============================================================================
// Tests
// =============================================================================
