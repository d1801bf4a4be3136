//! Tile fetcher integration tests.
//!
//! Tests verify:
//! - Bodies are returned with exactly Content-Length bytes
//! - Keep-alive connections are reused across requests
//! - `Connection: close`, stalls and protocol errors tear the socket down
//! - The same holds over TLS, and untrusted certificates are rejected

use std::time::{Duration, Instant};

use http::StatusCode;

use osm_tiles::io::TileFetcher;
use osm_tiles::FetchError;

use super::test_utils::{png_tile, test_tls_config, Reply, TestServer};

const TIMEOUT: Duration = Duration::from_millis(500);

fn hundred_bytes() -> Vec<u8> {
    (0..100u8).collect()
}

// =============================================================================
// Successful Fetches
// =============================================================================

#[test]
fn test_fetch_returns_exact_body() {
    let server = TestServer::start(|_| Reply::png(hundred_bytes()));
    let mut fetcher = TileFetcher::new();

    let body = fetcher.fetch(&server.url("/5/16/10.png"), Some(TIMEOUT)).unwrap();

    assert_eq!(body.len(), 100);
    assert_eq!(&body[..], &hundred_bytes()[..]);
    assert_eq!(server.requested_paths(), vec!["/5/16/10.png".to_string()]);
}

#[test]
fn test_keep_alive_reuses_connection() {
    let server = TestServer::start(|_| Reply::png(png_tile(8, [1, 2, 3])));
    let mut fetcher = TileFetcher::new();

    for i in 0..3 {
        let url = server.url(&format!("/1/{i}/0.png"));
        fetcher.fetch(&url, Some(TIMEOUT)).unwrap();
    }

    assert_eq!(server.requests(), 3);
    assert_eq!(server.connections(), 1);
    assert_eq!(fetcher.connections_opened(), 1);
    assert!(fetcher.is_connected());
}

#[test]
fn test_connection_close_forces_reconnect() {
    let server = TestServer::start(|_| Reply::png_closing(hundred_bytes()));
    let mut fetcher = TileFetcher::new();

    fetcher.fetch(&server.url("/a.png"), Some(TIMEOUT)).unwrap();
    assert!(!fetcher.is_connected());

    fetcher.fetch(&server.url("/b.png"), Some(TIMEOUT)).unwrap();
    assert_eq!(fetcher.connections_opened(), 2);
    assert_eq!(server.connections(), 2);
}

#[test]
fn test_bytes_past_content_length_force_reconnect() {
    let server = TestServer::start(|_| {
        let mut bytes =
            b"HTTP/1.1 200 OK\r\nContent-Type: image/png\r\nContent-Length: 100\r\n\r\n".to_vec();
        bytes.extend_from_slice(&[1u8; 110]);
        Reply::raw(bytes)
    });
    let mut fetcher = TileFetcher::new();

    let first = fetcher.fetch(&server.url("/a.png"), Some(TIMEOUT)).unwrap();
    assert_eq!(first.len(), 100);

    let second = fetcher.fetch(&server.url("/b.png"), Some(TIMEOUT)).unwrap();
    assert_eq!(second.len(), 100);
    assert!(second.iter().all(|&b| b == 1));

    assert_eq!(fetcher.connections_opened(), 2);
    assert_eq!(server.connections(), 2);
}

#[test]
fn test_different_host_reconnects() {
    let first = TestServer::start(|_| Reply::png(hundred_bytes()));
    let second = TestServer::start(|_| Reply::png(hundred_bytes()));
    let mut fetcher = TileFetcher::new();

    fetcher.fetch(&first.url("/a.png"), Some(TIMEOUT)).unwrap();
    fetcher.fetch(&second.url("/b.png"), Some(TIMEOUT)).unwrap();

    assert_eq!(fetcher.connections_opened(), 2);
    assert_eq!(first.connections(), 1);
    assert_eq!(second.connections(), 1);
}

// =============================================================================
// Failures
// =============================================================================

#[test]
fn test_stalled_body_times_out_and_drops_socket() {
    let mut partial =
        b"HTTP/1.1 200 OK\r\nContent-Type: image/png\r\nContent-Length: 100\r\n\r\n".to_vec();
    partial.extend_from_slice(&[0u8; 10]);
    let server =
        TestServer::start(move |_| Reply::stalled(partial.clone(), Duration::from_secs(2)));

    let mut fetcher = TileFetcher::new();
    let timeout = Duration::from_millis(150);
    let start = Instant::now();
    let result = fetcher.fetch(&server.url("/slow.png"), Some(timeout));

    assert!(matches!(result, Err(FetchError::Timeout(t)) if t == timeout));
    assert!(start.elapsed() < Duration::from_secs(2));
    assert!(!fetcher.is_connected());
}

#[test]
fn test_http_error_status() {
    let server = TestServer::start(|_| Reply::status(404, "Not Found"));
    let mut fetcher = TileFetcher::new();

    let result = fetcher.fetch(&server.url("/missing.png"), Some(TIMEOUT));
    assert!(matches!(
        result,
        Err(FetchError::HttpStatus(StatusCode::NOT_FOUND))
    ));
    assert!(!fetcher.is_connected());
}

#[test]
fn test_wrong_content_type() {
    let server = TestServer::start(|_| {
        Reply::raw(b"HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: 2\r\n\r\nhi".to_vec())
    });
    let mut fetcher = TileFetcher::new();

    let result = fetcher.fetch(&server.url("/x.png"), Some(TIMEOUT));
    assert!(matches!(result, Err(FetchError::WrongContentType(t)) if t == "text/html"));
}

#[test]
fn test_chunked_rejected() {
    let server = TestServer::start(|_| {
        Reply::raw(
            b"HTTP/1.1 200 OK\r\nContent-Type: image/png\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n0\r\n\r\n"
                .to_vec(),
        )
    });
    let mut fetcher = TileFetcher::new();

    let result = fetcher.fetch(&server.url("/x.png"), Some(TIMEOUT));
    assert!(matches!(result, Err(FetchError::ChunkedUnsupported)));
}

#[test]
fn test_missing_content_length() {
    let server = TestServer::start(|_| {
        Reply::raw(b"HTTP/1.1 200 OK\r\nContent-Type: image/png\r\n\r\n".to_vec())
    });
    let mut fetcher = TileFetcher::new();

    let result = fetcher.fetch(&server.url("/x.png"), Some(TIMEOUT));
    assert!(matches!(result, Err(FetchError::MissingContentLength)));
}

#[test]
fn test_recovers_after_error() {
    let server = TestServer::start(|path| {
        if path == "/bad.png" {
            Reply::status(500, "Internal Server Error")
        } else {
            Reply::png(hundred_bytes())
        }
    });
    let mut fetcher = TileFetcher::new();

    assert!(fetcher.fetch(&server.url("/bad.png"), Some(TIMEOUT)).is_err());
    let body = fetcher.fetch(&server.url("/good.png"), Some(TIMEOUT)).unwrap();

    assert_eq!(body.len(), 100);
    assert_eq!(fetcher.connections_opened(), 2);
}

#[test]
fn test_connection_refused() {
    // Bind then drop to get a port nothing listens on.
    let addr = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap();
    let mut fetcher = TileFetcher::new();

    let result = fetcher.fetch(&format!("http://{addr}/x.png"), Some(TIMEOUT));
    assert!(matches!(result, Err(FetchError::Connect { .. })));
    assert!(!fetcher.is_connected());
}

// =============================================================================
// TLS
// =============================================================================

#[test]
fn test_https_keep_alive_reuses_connection() {
    let tile = png_tile(8, [10, 20, 30]);
    let expected = tile.clone();
    let server = TestServer::start_tls(move |_| Reply::png(tile.clone()));
    let mut fetcher = TileFetcher::new().with_tls_config(test_tls_config());

    for i in 0..3 {
        let url = server.url(&format!("/2/{i}/1.png"));
        assert!(url.starts_with("https://127.0.0.1:"));
        let body = fetcher.fetch(&url, Some(TIMEOUT)).unwrap();
        assert_eq!(&body[..], &expected[..]);
    }

    assert_eq!(server.requests(), 3);
    assert_eq!(server.connections(), 1);
    assert_eq!(fetcher.connections_opened(), 1);
    assert!(fetcher.is_connected());
}

#[test]
fn test_https_connection_close_forces_reconnect() {
    let server = TestServer::start_tls(|_| Reply::png_closing(hundred_bytes()));
    let mut fetcher = TileFetcher::new().with_tls_config(test_tls_config());

    let body = fetcher.fetch(&server.url("/a.png"), Some(TIMEOUT)).unwrap();
    assert_eq!(&body[..], &hundred_bytes()[..]);
    assert!(!fetcher.is_connected());

    fetcher.fetch(&server.url("/b.png"), Some(TIMEOUT)).unwrap();
    assert_eq!(fetcher.connections_opened(), 2);
    assert_eq!(server.connections(), 2);
}

#[test]
fn test_https_untrusted_certificate() {
    let server = TestServer::start_tls(|_| Reply::png(hundred_bytes()));
    // Mozilla roots do not include the test CA.
    let mut fetcher = TileFetcher::new();

    let result = fetcher.fetch(&server.url("/a.png"), Some(TIMEOUT));
    assert!(matches!(result, Err(FetchError::Tls(_))));
    assert!(!fetcher.is_connected());
    assert_eq!(server.requests(), 0);
}
