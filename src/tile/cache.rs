//! Fixed-capacity cache of decoded tiles.
//!
//! This module provides the working set of tile slots a map view renders
//! from. The cache holds roughly one screen's worth of tiles; slots are
//! allocated once and then reused by reassigning their identity.
//!
//! # Slot State
//!
//! Each [`TileSlot`] carries:
//! - Identity: tile X, tile Y, zoom
//! - `valid`: the pixel buffer holds the tile named by the identity
//! - `busy`: a worker currently owns the pixel buffer
//!
//! `busy` is an atomic token acquired with compare-and-swap, so a slot can
//! never be handed to two fetches at once even if several threads select
//! eviction victims.
//!
//! # Eviction
//!
//! No recency is tracked. [`TileCache::find_unused`] returns the first
//! non-busy slot, in slot order, that the current viewport does not need.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::CacheError;
use crate::tile::projection::TileCoord;

// =============================================================================
// Tile Key
// =============================================================================

/// Identity of a tile: column, row, and zoom level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileKey {
    pub x: u32,
    pub y: u32,
    pub z: u8,
}

impl TileKey {
    pub fn new(x: u32, y: u32, z: u8) -> Self {
        Self { x, y, z }
    }
}

// =============================================================================
// Tile Slot
// =============================================================================

/// Contents of a slot, guarded by the slot's lock.
#[derive(Debug)]
pub struct SlotData {
    key: Option<TileKey>,
    valid: bool,
    pixels: Vec<u16>,
}

impl SlotData {
    pub fn key(&self) -> Option<TileKey> {
        self.key
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// RGB565 pixels, row-major, `tile_size * tile_size` long.
    pub fn pixels(&self) -> &[u16] {
        &self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut [u16] {
        &mut self.pixels
    }

    pub fn set_valid(&mut self, valid: bool) {
        self.valid = valid;
    }
}

/// One cache slot owning a tile-sized pixel buffer.
#[derive(Debug)]
pub struct TileSlot {
    busy: AtomicBool,
    data: RwLock<SlotData>,
}

impl TileSlot {
    fn allocate(pixel_count: usize) -> Option<Self> {
        let mut pixels = Vec::new();
        pixels.try_reserve_exact(pixel_count).ok()?;
        pixels.resize(pixel_count, 0);

        Some(Self {
            busy: AtomicBool::new(false),
            data: RwLock::new(SlotData {
                key: None,
                valid: false,
                pixels,
            }),
        })
    }

    /// Whether a fetch currently owns this slot.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Take the busy token. Returns `false` if another owner holds it.
    pub fn try_acquire(&self) -> bool {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Hand the busy token back.
    pub fn release(&self) {
        self.busy.store(false, Ordering::Release);
    }

    /// Shared access to the slot contents.
    ///
    /// A poisoned lock is recovered: `valid` is only set after a complete
    /// decode, so a panic mid-write leaves the slot invalid, not torn.
    pub fn read(&self) -> RwLockReadGuard<'_, SlotData> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Exclusive access to the slot contents.
    pub fn write(&self) -> RwLockWriteGuard<'_, SlotData> {
        self.data.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn key(&self) -> Option<TileKey> {
        self.read().key
    }

    pub fn is_valid(&self) -> bool {
        self.read().valid
    }

    /// Whether the slot holds a valid copy of `key`.
    pub fn holds(&self, key: TileKey) -> bool {
        let data = self.read();
        data.valid && data.key == Some(key)
    }

    /// Give the slot a new identity. Contents become invalid until filled.
    pub fn assign(&self, key: TileKey) {
        let mut data = self.write();
        data.key = Some(key);
        data.valid = false;
    }

    /// Mark the contents as not matching the identity.
    pub fn invalidate(&self) {
        self.write().valid = false;
    }
}

// =============================================================================
// Tile Cache
// =============================================================================

/// Fixed set of tile slots sized to the viewport.
///
/// The slot count never changes during a fetch; [`TileCache::resize`]
/// replaces every slot.
///
/// # Example
///
/// ```
/// use osm_tiles::tile::{TileCache, TileKey};
///
/// let mut cache = TileCache::new(256);
/// cache.resize(6).unwrap();
/// assert_eq!(cache.capacity(), 6);
/// assert!(cache.find(TileKey::new(16, 10, 5)).is_none());
/// ```
#[derive(Debug)]
pub struct TileCache {
    slots: Vec<Arc<TileSlot>>,
    tile_size: u32,
}

impl TileCache {
    /// Create an empty cache for tiles of `tile_size` x `tile_size` pixels.
    pub fn new(tile_size: u32) -> Self {
        Self {
            slots: Vec::new(),
            tile_size,
        }
    }

    /// Create a cache with `capacity` allocated slots.
    pub fn with_capacity(capacity: usize, tile_size: u32) -> Result<Self, CacheError> {
        let mut cache = Self::new(tile_size);
        cache.resize(capacity)?;
        Ok(cache)
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    pub fn slots(&self) -> &[Arc<TileSlot>] {
        &self.slots
    }

    /// Number of slots currently holding a valid tile.
    pub fn valid_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_valid()).count()
    }

    /// Discard every slot and allocate `capacity` fresh ones.
    ///
    /// All-or-nothing: if any slot cannot be allocated the cache is left
    /// empty. A zero capacity is rejected without touching the cache.
    pub fn resize(&mut self, capacity: usize) -> Result<(), CacheError> {
        if capacity == 0 {
            return Err(CacheError::ZeroCapacity);
        }

        self.slots = Vec::new();

        let allocation_error = CacheError::Allocation {
            requested: capacity,
            tile_size: self.tile_size,
        };
        let edge = self.tile_size as usize;
        let pixel_count = edge.checked_mul(edge).ok_or_else(|| allocation_error.clone())?;

        let mut slots = Vec::new();
        slots
            .try_reserve_exact(capacity)
            .map_err(|_| allocation_error.clone())?;
        for _ in 0..capacity {
            let slot = TileSlot::allocate(pixel_count).ok_or_else(|| allocation_error.clone())?;
            slots.push(Arc::new(slot));
        }

        self.slots = slots;
        Ok(())
    }

    /// Switch to a new tile size and reallocate `capacity` slots.
    pub fn reset(&mut self, capacity: usize, tile_size: u32) -> Result<(), CacheError> {
        self.tile_size = tile_size;
        self.resize(capacity)
    }

    /// Free every slot.
    pub fn clear(&mut self) {
        self.slots.clear();
    }

    /// Mark every slot invalid, keeping the allocations.
    pub fn invalidate_all(&self) {
        for slot in &self.slots {
            slot.invalidate();
        }
    }

    /// Find the slot holding a valid copy of `key`.
    pub fn find(&self, key: TileKey) -> Option<Arc<TileSlot>> {
        self.slots.iter().find(|slot| slot.holds(key)).cloned()
    }

    /// Select an eviction victim and mark it busy.
    ///
    /// Skips busy slots and slots holding a valid tile that appears in
    /// `required` at `zoom`. The first remaining slot in slot order wins.
    /// Returns `None` when every free slot is still needed.
    pub fn find_unused(&self, required: &[TileCoord], zoom: u8) -> Option<Arc<TileSlot>> {
        let needed: HashSet<(u32, i64)> = required.iter().map(|t| (t.x, t.y)).collect();

        for slot in &self.slots {
            if slot.is_busy() {
                continue;
            }

            let in_use = {
                let data = slot.read();
                match data.key {
                    Some(key) if data.valid && key.z == zoom => {
                        needed.contains(&(key.x, i64::from(key.y)))
                    }
                    _ => false,
                }
            };

            if !in_use && slot.try_acquire() {
                return Some(Arc::clone(slot));
            }
        }

        None
    }
}

// =============================================================================
// Tests
// =============================================================================
