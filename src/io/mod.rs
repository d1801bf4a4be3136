//! Network I/O for tile downloads.
//!
//! - [`TileFetcher`]: single-connection keep-alive HTTP/1.1 client
//! - [`MemoryBuffer`]: fallible, exactly-sized body allocation
//! - [`read_response_head`] / [`read_body`]: the response parser, usable
//!   over any buffered reader

mod buffer;
mod fetcher;
mod transport;

pub use buffer::MemoryBuffer;
pub use fetcher::{
    read_body, read_response_head, RequestTarget, ResponseHead, TileFetcher, DEFAULT_STALL_TIMEOUT,
    DEFAULT_USER_AGENT, MAX_BODY_SIZE, PNG_CONTENT_TYPE,
};
pub use transport::{default_tls_config, Scheme};
