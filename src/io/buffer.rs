//! Owned byte buffer for transient network payloads.
//!
//! A response body is read into a buffer sized exactly to its
//! `Content-Length`. Allocation goes through `try_reserve_exact`, so a
//! request the allocator refuses comes back as an error instead of aborting
//! the process. With memory overcommit a huge reservation can still succeed
//! and only fail once the pages are touched, so callers cap the length
//! before allocating (the fetcher rejects bodies above `MAX_BODY_SIZE`).

use std::collections::TryReserveError;

use bytes::Bytes;

/// Fixed-size byte buffer with fallible allocation.
///
/// The buffer is zero-initialised on creation and never grows. Dropping it
/// frees the memory; [`MemoryBuffer::freeze`] hands the bytes over to a
/// cheaply cloneable [`Bytes`] without copying.
///
/// # Example
///
/// ```
/// use osm_tiles::io::MemoryBuffer;
///
/// let mut buffer = MemoryBuffer::allocate(512).unwrap();
/// assert_eq!(buffer.len(), 512);
/// buffer.as_mut_slice()[0] = 0x89;
/// let bytes = buffer.freeze();
/// assert_eq!(bytes[0], 0x89);
/// ```
#[derive(Debug)]
pub struct MemoryBuffer {
    data: Vec<u8>,
}

impl MemoryBuffer {
    /// Allocate a buffer of exactly `size` bytes.
    ///
    /// Returns the allocator error when the memory is not available.
    pub fn allocate(size: usize) -> Result<Self, TryReserveError> {
        let mut data = Vec::new();
        data.try_reserve_exact(size)?;
        data.resize(size, 0);
        Ok(Self { data })
    }

    /// Size of the buffer in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the buffer holds zero bytes.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Raw pointer to the first byte, for handing to decoders that take a
    /// pointer and a length.
    pub fn as_ptr(&self) -> *const u8 {
        self.data.as_ptr()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Convert into immutable shared bytes.
    pub fn freeze(self) -> Bytes {
        Bytes::from(self.data)
    }
}
