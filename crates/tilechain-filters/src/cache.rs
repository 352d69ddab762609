//! Per-resolution-level tile store with optional LRU eviction.
//!
//! A [`TileCache`] holds fixed-size cache tiles keyed by their origin on a
//! grid anchored at `(0, 0)`. Its bounds are the level's bounding rectangle
//! stretched to that grid. Tiles are shared [`TileRef`]s, so handing one
//! out never copies pixel data.

use std::collections::{HashMap, VecDeque};

use tilechain_core::{IPoint, IRect, ISize, TileRef};

/// Counters reported by a store or summed over a filter's stores.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cached tiles
    pub tiles: usize,
    /// Bytes held by cached tiles
    pub bytes: u64,
    /// Lookups served from the store
    pub hits: u64,
    /// Lookups that missed
    pub misses: u64,
}

impl CacheStats {
    /// Hit ratio in `[0, 1]`, 0 when nothing was looked up.
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 { 0.0 } else { self.hits as f64 / total as f64 }
    }
}

impl std::ops::AddAssign for CacheStats {
    fn add_assign(&mut self, rhs: Self) {
        self.tiles += rhs.tiles;
        self.bytes += rhs.bytes;
        self.hits += rhs.hits;
        self.misses += rhs.misses;
    }
}

/// Tiles of one resolution level.
#[derive(Debug, Clone)]
pub struct TileCache {
    tile_size: ISize,
    bounds: IRect,
    tiles: HashMap<IPoint, TileRef>,
    /// Access order for eviction (front = oldest).
    access_order: VecDeque<IPoint>,
    total_bytes: u64,
    budget: Option<u64>,
    hits: u64,
    misses: u64,
}

impl TileCache {
    /// Creates an empty store; `bounds` is stretched to the tile grid.
    pub fn new(bounds: IRect, tile_size: ISize) -> Self {
        Self {
            tile_size,
            bounds: bounds.stretch_to_tile(tile_size),
            tiles: HashMap::new(),
            access_order: VecDeque::new(),
            total_bytes: 0,
            budget: None,
            hits: 0,
            misses: 0,
        }
    }

    /// Limits the store to `bytes`; `None` is unbounded.
    pub fn with_budget(mut self, bytes: Option<u64>) -> Self {
        self.set_budget(bytes);
        self
    }

    /// Changes the byte budget, evicting as needed.
    pub fn set_budget(&mut self, bytes: Option<u64>) {
        self.budget = bytes;
        self.evict_to(0);
    }

    /// Cache-tile size.
    #[inline]
    pub fn tile_size(&self) -> ISize {
        self.tile_size
    }

    /// Tile-aligned bounds.
    #[inline]
    pub fn bounds(&self) -> IRect {
        self.bounds
    }

    /// Looks up the tile at `origin`, counting a hit or a miss.
    pub fn get(&mut self, origin: IPoint) -> Option<TileRef> {
        match self.tiles.get(&origin) {
            Some(tile) => {
                let tile = TileRef::clone(tile);
                self.hits += 1;
                if self.budget.is_some() {
                    self.touch(origin);
                }
                Some(tile)
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Whether a tile is stored at `origin`. Does not touch counters.
    pub fn contains(&self, origin: IPoint) -> bool {
        self.tiles.contains_key(&origin)
    }

    /// Stores `tile` at its origin.
    ///
    /// Tiles whose origin falls outside the bounds, or that alone exceed
    /// the budget, are not stored. Returns whether the tile was stored.
    pub fn insert(&mut self, tile: TileRef) -> bool {
        let origin = tile.origin();
        if !self.bounds.contains(origin.x, origin.y) {
            return false;
        }
        let size = tile.size_in_bytes() as u64;
        if self.budget.is_some_and(|b| size > b) {
            return false;
        }
        self.remove(origin);
        self.evict_to(size);
        self.tiles.insert(origin, tile);
        self.access_order.push_back(origin);
        self.total_bytes += size;
        true
    }

    /// Removes the tile at `origin`.
    pub fn remove(&mut self, origin: IPoint) -> Option<TileRef> {
        let tile = self.tiles.remove(&origin)?;
        self.total_bytes = self.total_bytes.saturating_sub(tile.size_in_bytes() as u64);
        self.access_order.retain(|o| *o != origin);
        Some(tile)
    }

    /// Drops every tile. Counters are kept.
    pub fn flush(&mut self) {
        self.tiles.clear();
        self.access_order.clear();
        self.total_bytes = 0;
    }

    /// Number of stored tiles.
    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    /// Returns `true` if no tile is stored.
    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// Bytes held by stored tiles.
    pub fn size_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Current counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            tiles: self.tiles.len(),
            bytes: self.total_bytes,
            hits: self.hits,
            misses: self.misses,
        }
    }

    fn touch(&mut self, origin: IPoint) {
        self.access_order.retain(|o| *o != origin);
        self.access_order.push_back(origin);
    }

    /// Evicts oldest tiles until `incoming` more bytes fit the budget.
    fn evict_to(&mut self, incoming: u64) {
        let Some(budget) = self.budget else { return };
        while self.total_bytes + incoming > budget {
            let Some(oldest) = self.access_order.pop_front() else { break };
            if let Some(tile) = self.tiles.remove(&oldest) {
                self.total_bytes = self.total_bytes.saturating_sub(tile.size_in_bytes() as u64);
            }
        }
    }
}
