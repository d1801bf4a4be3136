//! Test utilities for integration tests.
//!
//! This module provides a small blocking HTTP(S) server that answers every
//! request through a handler closure, plus helpers for generating PNG tiles
//! and pointing a provider at the server.
//!
//! The TLS fixtures under `tests/fixtures/` are a P-256 test CA and a leaf
//! certificate for `127.0.0.1` signed by it, generated with `openssl req`
//! and `openssl x509 -req` and stored as DER.

use std::io::{BufRead, BufReader, Cursor, Read, Write};
use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use image::{ImageFormat, Rgb, RgbImage};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::{ClientConfig, RootCertStore, ServerConfig, ServerConnection, StreamOwned};

use osm_tiles::tile::{rgb565, TileProvider};

const TEST_CA_CERT: &[u8] = include_bytes!("../fixtures/test-ca.der");
const TEST_SERVER_CERT: &[u8] = include_bytes!("../fixtures/test-server.der");
const TEST_SERVER_KEY: &[u8] = include_bytes!("../fixtures/test-server.key.der");

// =============================================================================
// Canned Replies
// =============================================================================

/// What the test server writes back for one request.
#[derive(Debug, Clone)]
pub struct Reply {
    bytes: Vec<u8>,
    close_after: bool,
    stall_after: Option<Duration>,
}

impl Reply {
    /// `200 OK` with a PNG body on a kept-alive connection.
    pub fn png(body: Vec<u8>) -> Self {
        Self::ok_with_headers(body, "")
    }

    /// `200 OK` with a PNG body, then the server closes the connection.
    pub fn png_closing(body: Vec<u8>) -> Self {
        let mut reply = Self::ok_with_headers(body, "Connection: close\r\n");
        reply.close_after = true;
        reply
    }

    /// Bodiless status reply, e.g. `404 Not Found`.
    pub fn status(code: u16, reason: &str) -> Self {
        Self::raw(format!("HTTP/1.1 {code} {reason}\r\nContent-Length: 0\r\n\r\n").into_bytes())
    }

    /// Arbitrary bytes written as-is.
    pub fn raw(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            close_after: false,
            stall_after: None,
        }
    }

    /// Write the bytes, go silent for `stall`, then close.
    pub fn stalled(bytes: Vec<u8>, stall: Duration) -> Self {
        Self {
            bytes,
            close_after: true,
            stall_after: Some(stall),
        }
    }

    fn ok_with_headers(body: Vec<u8>, extra: &str) -> Self {
        let mut bytes = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: image/png\r\nContent-Length: {}\r\n{}\r\n",
            body.len(),
            extra
        )
        .into_bytes();
        bytes.extend_from_slice(&body);
        Self::raw(bytes)
    }
}

// =============================================================================
// Test Server
// =============================================================================

type Handler = dyn Fn(&str) -> Reply + Send + Sync;

/// HTTP/1.1 server on an ephemeral localhost port.
///
/// Each connection is served on its own thread and may carry many requests.
pub struct TestServer {
    addr: SocketAddr,
    scheme: &'static str,
    connections: Arc<AtomicUsize>,
    paths: Arc<Mutex<Vec<String>>>,
}

impl TestServer {
    pub fn start<F>(handler: F) -> Self
    where
        F: Fn(&str) -> Reply + Send + Sync + 'static,
    {
        Self::spawn(handler, None)
    }

    /// Same as [`TestServer::start`], but every connection speaks TLS with
    /// the test certificate. Clients trust it through [`test_tls_config`].
    pub fn start_tls<F>(handler: F) -> Self
    where
        F: Fn(&str) -> Reply + Send + Sync + 'static,
    {
        Self::spawn(handler, Some(server_tls_config()))
    }

    fn spawn<F>(handler: F, tls: Option<Arc<ServerConfig>>) -> Self
    where
        F: Fn(&str) -> Reply + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let handler: Arc<Handler> = Arc::new(handler);
        let connections = Arc::new(AtomicUsize::new(0));
        let paths = Arc::new(Mutex::new(Vec::new()));

        let server = Self {
            addr,
            scheme: if tls.is_some() { "https" } else { "http" },
            connections: Arc::clone(&connections),
            paths: Arc::clone(&paths),
        };

        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                connections.fetch_add(1, Ordering::SeqCst);
                let handler = Arc::clone(&handler);
                let paths = Arc::clone(&paths);
                let tls = tls.clone();
                thread::spawn(move || match tls {
                    Some(config) => {
                        let Ok(conn) = ServerConnection::new(config) else { return };
                        let stream = StreamOwned::new(conn, stream);
                        serve_connection(stream, handler.as_ref(), &paths);
                    }
                    None => serve_connection(stream, handler.as_ref(), &paths),
                });
            }
        });

        server
    }

    /// Serve a PNG of `tile_size` pixels for every `/{z}/{x}/{y}.png`.
    pub fn tiles(tile_size: u32) -> Self {
        Self::start(move |path| match parse_tile_path(path) {
            Some((z, x, y)) => Reply::png(png_tile(tile_size, tile_color(x, y, z))),
            None => Reply::status(404, "Not Found"),
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}://{}{}", self.scheme, self.addr, path)
    }

    /// Number of TCP connections accepted so far.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Paths requested so far, in arrival order.
    pub fn requested_paths(&self) -> Vec<String> {
        self.paths.lock().unwrap().clone()
    }

    pub fn requests(&self) -> usize {
        self.paths.lock().unwrap().len()
    }

    /// A provider whose template points at this server.
    pub fn provider(&self, tile_size: u32) -> TileProvider {
        TileProvider {
            name: "Local".to_string(),
            url_template: self.url("/{z}/{x}/{y}.png"),
            attribution: "test".to_string(),
            requires_api_key: false,
            api_key: String::new(),
            min_zoom: 0,
            max_zoom: 19,
            tile_size,
        }
    }
}

fn serve_connection<S: Read + Write>(stream: S, handler: &Handler, paths: &Mutex<Vec<String>>) {
    let mut reader = BufReader::new(stream);

    loop {
        let mut request_line = String::new();
        match reader.read_line(&mut request_line) {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
        loop {
            let mut header = String::new();
            match reader.read_line(&mut header) {
                Ok(0) | Err(_) => return,
                Ok(_) if header.trim().is_empty() => break,
                Ok(_) => {}
            }
        }

        let path = request_line.split_whitespace().nth(1).unwrap_or("/").to_string();
        paths.lock().unwrap().push(path.clone());

        let reply = handler(&path);
        let writer = reader.get_mut();
        if writer.write_all(&reply.bytes).and_then(|_| writer.flush()).is_err() {
            return;
        }
        if let Some(stall) = reply.stall_after {
            thread::sleep(stall);
        }
        if reply.close_after {
            return;
        }
    }
}

// =============================================================================
// TLS
// =============================================================================

fn server_tls_config() -> Arc<ServerConfig> {
    let cert = CertificateDer::from(TEST_SERVER_CERT.to_vec());
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(TEST_SERVER_KEY.to_vec()));

    let config =
        ServerConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()
            .unwrap()
            .with_no_client_auth()
            .with_single_cert(vec![cert], key)
            .unwrap();
    Arc::new(config)
}

/// Client configuration that trusts only the test CA.
pub fn test_tls_config() -> Arc<ClientConfig> {
    let mut roots = RootCertStore::empty();
    roots.add(CertificateDer::from(TEST_CA_CERT.to_vec())).unwrap();

    let config =
        ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()
            .unwrap()
            .with_root_certificates(roots)
            .with_no_client_auth();
    Arc::new(config)
}

// =============================================================================
// Tiles
// =============================================================================

/// Encode a solid `size` x `size` PNG.
pub fn png_tile(size: u32, color: [u8; 3]) -> Vec<u8> {
    let img = RgbImage::from_pixel(size, size, Rgb(color));
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png).unwrap();
    buf.into_inner()
}

/// Distinct color for each tile the server hands out.
pub fn tile_color(x: u32, y: u32, z: u8) -> [u8; 3] {
    [
        (x.wrapping_mul(40) % 256) as u8,
        (y.wrapping_mul(40) % 256) as u8,
        z.wrapping_mul(10),
    ]
}

/// RGB565 value a slot holds after decoding the tile at `(x, y, z)`.
pub fn tile_pixel(x: u32, y: u32, z: u8) -> u16 {
    let [r, g, b] = tile_color(x, y, z);
    rgb565(r, g, b)
}

/// Split `/{z}/{x}/{y}.png` into its indices.
pub fn parse_tile_path(path: &str) -> Option<(u8, u32, u32)> {
    let mut parts = path.trim_start_matches('/').split('/');
    let z = parts.next()?.parse().ok()?;
    let x = parts.next()?.parse().ok()?;
    let y = parts.next()?.strip_suffix(".png")?.parse().ok()?;
    Some((z, x, y))
}
