#![forbid(unsafe_code)]

//! LRU cache of rasterized glyphs keyed by codepoint.
//!
//! Rasterization dominates render time for short status lines, and the
//! same few dozen codepoints repeat frame after frame. Font backends keep
//! one [`GlyphCache`] behind a `RefCell` and hand out shared [`Rc`]
//! handles, so a glyph evicted mid-render stays alive until the render
//! drops its placements.
//!
//! Misses are cached too: a codepoint the font cannot draw is remembered
//! as `None` and not looked up again.
//!
//! # Example
//! ```
//! use wtw_text::glyph_cache::GlyphCache;
//!
//! let mut cache = GlyphCache::new(8);
//! let first = cache.get_or_insert_with('a' as u32, |_| None);
//! assert!(first.is_none());
//! let again = cache.get_or_insert_with('a' as u32, |_| unreachable!());
//! assert!(again.is_none());
//! assert_eq!(cache.stats().hits, 1);
//! ```

use std::hash::BuildHasherDefault;
use std::num::NonZeroUsize;
use std::rc::Rc;

use lru::LruCache;
use rustc_hash::FxHasher;

use crate::font::Glyph;

/// Default cache capacity in glyphs.
pub const DEFAULT_GLYPH_CAPACITY: usize = 1024;

/// Statistics about cache performance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Current number of entries.
    pub size: usize,
    /// Maximum capacity.
    pub capacity: usize,
}

impl CacheStats {
    /// Hit rate (0.0 to 1.0).
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

type Entry = Option<Rc<Glyph>>;

/// Codepoint-keyed glyph cache with LRU eviction.
#[derive(Debug)]
pub struct GlyphCache {
    cache: LruCache<u32, Entry, BuildHasherDefault<FxHasher>>,
    hits: u64,
    misses: u64,
}

impl GlyphCache {
    /// Create a cache holding up to `capacity` glyphs (at least one).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: LruCache::with_hasher(capacity, BuildHasherDefault::default()),
            hits: 0,
            misses: 0,
        }
    }

    /// Cached glyph for `codepoint`, rasterizing with `raster` on a miss.
    pub fn get_or_insert_with<F>(&mut self, codepoint: u32, raster: F) -> Entry
    where
        F: FnOnce(u32) -> Entry,
    {
        if let Some(entry) = self.cache.get(&codepoint) {
            self.hits += 1;
            return entry.clone();
        }
        self.misses += 1;
        let entry = raster(codepoint);
        self.cache.put(codepoint, entry.clone());
        entry
    }

    /// Whether `codepoint` has an entry (hit or remembered miss).
    #[must_use]
    pub fn contains(&self, codepoint: u32) -> bool {
        self.cache.contains(&codepoint)
    }

    /// Drop every entry. Outstanding handles stay valid.
    pub fn clear(&mut self) {
        self.cache.clear();
    }

    /// Cache statistics.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            size: self.cache.len(),
            capacity: self.cache.cap().get(),
        }
    }
}

impl Default for GlyphCache {
    fn default() -> Self {
        Self::new(DEFAULT_GLYPH_CAPACITY)
    }
}
