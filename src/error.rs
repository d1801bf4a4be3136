use std::time::Duration;

use thiserror::Error;

/// Errors raised by the tile fetcher while talking to a tile server.
///
/// Every variant is local to the tile being fetched; none of them abort a
/// batch.
#[derive(Debug, Error)]
pub enum FetchError {
    /// URL could not be parsed or has no host
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Only `http` and `https` are supported
    #[error("Unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    /// TCP connect failed or timed out
    #[error("Connection to {host}:{port} failed: {message}")]
    Connect {
        host: String,
        port: u16,
        message: String,
    },

    /// TLS configuration or handshake error
    #[error("TLS error: {0}")]
    Tls(String),

    /// Socket read/write error
    #[error("I/O error: {0}")]
    Io(String),

    /// No data arrived within the stall timeout
    #[error("Timeout: no data received within {} ms", .0.as_millis())]
    Timeout(Duration),

    /// Peer closed the connection before the response was complete
    #[error("Connection closed by peer")]
    ConnectionClosed,

    /// Malformed status line
    #[error("Malformed status line: {0}")]
    MalformedStatus(String),

    /// Status other than 200
    #[error("HTTP error: {0}")]
    HttpStatus(http::StatusCode),

    /// Header line exceeded the size limit or too many header lines
    #[error("Response header too long")]
    HeaderTooLong,

    /// Content-Length header missing, unparsable, or zero
    #[error("Missing or invalid Content-Length")]
    MissingContentLength,

    /// Chunked transfer encoding is not supported
    #[error("Chunked transfer encoding is not supported")]
    ChunkedUnsupported,

    /// Content-Type is not `image/png`
    #[error("Unexpected Content-Type: {0}")]
    WrongContentType(String),

    /// Response body is larger than a tile can be, or its buffer could not
    /// be allocated
    #[error("Buffer allocation of {0} bytes failed")]
    Allocation(usize),
}

impl FetchError {
    /// Whether the socket must be discarded after this error.
    ///
    /// Status and header-level rejections leave the stream in an unknown
    /// position, so everything except URL errors tears the connection down.
    pub fn poisons_connection(&self) -> bool {
        !matches!(
            self,
            FetchError::InvalidUrl(_) | FetchError::UnsupportedScheme(_)
        )
    }
}

/// Errors raised while decoding a PNG tile into a slot buffer.
#[derive(Debug, Clone, Error)]
pub enum DecodeError {
    /// The PNG decoder rejected the data
    #[error("PNG decode failed: {0}")]
    Image(String),

    /// Decoded image does not match the provider's tile size
    #[error("Tile size mismatch: expected {expected}x{expected}, got {width}x{height}")]
    SizeMismatch { expected: u32, width: u32, height: u32 },

    /// Destination buffer is smaller than the decoded image
    #[error("Destination buffer too small: need {needed} pixels, have {available}")]
    BufferTooSmall { needed: usize, available: usize },
}

/// Per-tile failure reported by a worker.
#[derive(Debug, Error)]
pub enum TileError {
    #[error("Fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("Decode failed: {0}")]
    Decode(#[from] DecodeError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),
}

/// Errors related to sizing the tile cache.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// Cache capacity must be at least one slot
    #[error("Cache capacity must be greater than 0")]
    ZeroCapacity,

    /// A slot buffer could not be allocated; the cache was left empty
    #[error("Tile cache allocation failed: {requested} slots of {tile_size}x{tile_size} pixels")]
    Allocation { requested: usize, tile_size: u32 },
}

/// Errors rejected by the viewport projector before any I/O.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProjectionError {
    /// Width or height is zero
    #[error("Viewport dimensions must be non-zero, got {width}x{height}")]
    ZeroViewport { width: u32, height: u32 },

    /// Tile size is zero
    #[error("Tile size must be non-zero")]
    ZeroTileSize,

    /// Zoom exceeds the representable grid
    #[error("Invalid zoom level: {0}")]
    InvalidZoom(u8),

    /// Longitude or latitude is NaN or infinite
    #[error("Invalid coordinate: lon={lon}, lat={lat}")]
    InvalidCoordinate { lon: f64, lat: f64 },
}

/// Errors in a tile provider definition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// URL template lacks a required placeholder
    #[error("URL template for '{name}' is missing the {placeholder} placeholder")]
    MissingPlaceholder {
        name: String,
        placeholder: &'static str,
    },

    /// Zoom bounds are inverted or out of range
    #[error("Invalid zoom range for '{name}': min {min_zoom}, max {max_zoom}")]
    InvalidZoomRange {
        name: String,
        min_zoom: u8,
        max_zoom: u8,
    },

    /// Tile size of zero
    #[error("Invalid tile size for '{name}': {tile_size}")]
    InvalidTileSize { name: String, tile_size: u32 },

    /// Provider needs an API key but none was configured
    #[error("Provider '{0}' requires an API key")]
    MissingApiKey(String),

    /// Index into the provider table is out of range
    #[error("Unknown provider index {index} (have {available})")]
    UnknownIndex { index: usize, available: usize },
}

/// Errors that abort a whole fetch-map call.
///
/// Only configuration and allocation problems end up here; per-tile
/// failures are absorbed by the worker pool and rendered as background.
#[derive(Debug, Error)]
pub enum MapError {
    #[error("Projection error: {0}")]
    Projection(#[from] ProjectionError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Requested zoom outside the provider's range
    #[error("Zoom {zoom} outside provider range {min_zoom}..={max_zoom}")]
    ZoomOutOfRange { zoom: u8, min_zoom: u8, max_zoom: u8 },

    /// Map surface pixels could not be allocated
    #[error("Map surface allocation of {width}x{height} failed")]
    SurfaceAllocation { width: u32, height: u32 },

    /// Worker threads could not be started
    #[error("Failed to start tile workers: {0}")]
    WorkerSpawn(String),
}
