//! Persistent tile cache with partial-match compositing.
//!
//! Each source owns one `TileCacheStore` rooted at its own directory. Tiles
//! are grouped per projection in a subdirectory named after the projection.
//! The index of all entries is guarded by a single coarse mutex. Decoded
//! images are kept in a bounded moka cache so repeated hits skip the disk.

use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::{Cursor, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use image::{DynamicImage, ImageFormat, RgbaImage};
use moka::sync::Cache;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::composite::{self, Placement};
use super::entry::{tile_filename, CacheEntry, MatchTolerances};
use super::error::CacheError;
use super::index::{read_index, write_index, EntryRecord, IndexFile, ProjectionRecord, INDEX_FILE};
use super::CacheStats;
use crate::imaging;
use crate::projection::{EastNorth, Projection, ProjectionBounds};

/// Default budget for decoded images held in memory (64 MB).
pub const DEFAULT_MEMORY_SIZE: u64 = 64 * 1024 * 1024;

/// How long a "no tile" answer is trusted before the tile is asked for again.
pub const DEFAULT_NO_TILE_MAX_AGE: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Stores between automatic index saves.
pub const INDEX_SAVE_INTERVAL: u64 = 64;

/// Result of a cache lookup.
#[derive(Debug, Clone)]
pub enum CachedTile {
    Image(Arc<DynamicImage>),
    /// The server has no imagery here; don't ask again.
    NoTile,
}

/// What to store for a tile.
#[derive(Debug, Clone, Copy)]
pub enum TileData<'a> {
    /// Bytes exactly as the server sent them.
    Encoded(&'a [u8]),
    /// A decoded image, stored as PNG.
    Image(&'a DynamicImage),
    NoTile,
}

/// Construction options for [`TileCacheStore`].
#[derive(Debug, Clone)]
pub struct CacheOptions {
    pub tile_size: u32,
    pub memory_size: u64,
    pub tolerances: MatchTolerances,
    /// Disk limit; least recently used tiles are evicted past it.
    pub max_size: Option<u64>,
    pub no_tile_max_age: Duration,
}

impl CacheOptions {
    pub fn new(tile_size: u32) -> Self {
        Self {
            tile_size,
            memory_size: DEFAULT_MEMORY_SIZE,
            tolerances: MatchTolerances::default(),
            max_size: None,
            no_tile_max_age: DEFAULT_NO_TILE_MAX_AGE,
        }
    }

    pub fn with_max_size(mut self, bytes: u64) -> Self {
        self.max_size = Some(bytes);
        self
    }

    pub fn with_no_tile_max_age(mut self, age: Duration) -> Self {
        self.no_tile_max_age = age;
        self
    }

    pub fn with_memory_size(mut self, bytes: u64) -> Self {
        self.memory_size = bytes;
        self
    }

    pub fn with_tolerances(mut self, tolerances: MatchTolerances) -> Self {
        self.tolerances = tolerances;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(super) struct MemoryKey {
    pub entry: u64,
    pub force_alpha: bool,
}

#[derive(Debug)]
pub(super) struct ProjectionEntries {
    pub directory: String,
    pub entries: Vec<CacheEntry>,
}

#[derive(Debug, Default)]
pub(super) struct CacheState {
    /// Keyed by projection code.
    pub projections: HashMap<String, ProjectionEntries>,
    pub total_size: u64,
    pub size_dirty: bool,
    pub next_id: u64,
    /// Stores since the index was last written.
    pub unsaved: u64,
}

#[derive(Debug, Default)]
pub(super) struct Counters {
    pub exact_hits: AtomicU64,
    pub exact_misses: AtomicU64,
    pub partial_hits: AtomicU64,
    pub partial_misses: AtomicU64,
}

impl Counters {
    fn record(hit: bool, hits: &AtomicU64, misses: &AtomicU64) {
        if hit {
            hits.fetch_add(1, Ordering::Relaxed);
        } else {
            misses.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Disk-backed tile cache for one source.
pub struct TileCacheStore {
    pub(super) root: PathBuf,
    pub(super) tile_size: u32,
    pub(super) tolerances: MatchTolerances,
    pub(super) max_size: Option<u64>,
    pub(super) state: Mutex<CacheState>,
    pub(super) memory: Cache<MemoryKey, Arc<DynamicImage>>,
    pub(super) counters: Counters,
}

impl std::fmt::Debug for TileCacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileCacheStore")
            .field("root", &self.root)
            .field("tile_size", &self.tile_size)
            .finish_non_exhaustive()
    }
}

impl TileCacheStore {
    /// Open (or create) the cache under `root`.
    ///
    /// An index written for a different tile size is discarded together
    /// with its files. Files no index entry references are removed, as are
    /// no-tile markers older than `options.no_tile_max_age`.
    ///
    /// The index is written every [`INDEX_SAVE_INTERVAL`] stores and when
    /// the store is dropped.
    pub fn open(root: impl Into<PathBuf>, options: CacheOptions) -> Result<Self, CacheError> {
        let root = root.into();
        fs::create_dir_all(&root)?;

        let memory = Cache::builder()
            .weigher(|_key: &MemoryKey, image: &Arc<DynamicImage>| -> u32 { image_weight(image) })
            .max_capacity(options.memory_size)
            .build();

        let store = Self {
            root,
            tile_size: options.tile_size,
            tolerances: options.tolerances,
            max_size: options.max_size,
            state: Mutex::new(CacheState::default()),
            memory,
            counters: Counters::default(),
        };
        store.load_index()?;
        store.remove_unreferenced()?;
        store.expire_no_tile_markers(options.no_tile_max_age);
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    pub fn tolerances(&self) -> MatchTolerances {
        self.tolerances
    }

    /// Tile size recorded in the index under `root`, if there is one.
    ///
    /// Lets tools open an existing cache without discarding it over a
    /// tile-size mismatch.
    pub fn indexed_tile_size(root: &Path) -> Result<Option<u32>, CacheError> {
        Ok(read_index(&root.join(INDEX_FILE))?.map(|index| index.tile_size))
    }

    fn load_index(&self) -> Result<(), CacheError> {
        let index = match read_index(&self.root.join(INDEX_FILE)) {
            Ok(index) => index,
            Err(CacheError::Index(e)) => {
                warn!(root = %self.root.display(), error = %e, "Unreadable cache index, starting empty");
                None
            }
            Err(e) => return Err(e),
        };

        let mut state = self.state.lock();
        *state = CacheState {
            size_dirty: true,
            ..CacheState::default()
        };

        let Some(index) = index else {
            return Ok(());
        };
        if index.tile_size != self.tile_size {
            info!(
                root = %self.root.display(),
                cached = index.tile_size,
                requested = self.tile_size,
                "Tile size changed, discarding cache"
            );
            return Ok(());
        }

        for record in index.projections {
            let mut entries = Vec::with_capacity(record.entries.len());
            for e in record.entries {
                if !(e.pixels_per_unit.is_finite() && e.pixels_per_unit > 0.0) {
                    continue;
                }
                let filename = if e.no_tile { None } else { e.filename };
                if filename.is_none() && !e.no_tile {
                    continue;
                }
                entries.push(CacheEntry::new(
                    state.next_id,
                    self.tile_size,
                    e.pixels_per_unit,
                    e.east,
                    e.north,
                    filename,
                    e.last_used,
                    e.last_modified,
                ));
                state.next_id += 1;
            }
            state.projections.insert(
                record.code,
                ProjectionEntries {
                    directory: record.directory,
                    entries,
                },
            );
        }
        state.total_size = index.total_file_size;
        state.size_dirty = false;
        debug!(root = %self.root.display(), entries = state.next_id, "Loaded cache index");
        Ok(())
    }

    /// Persist the index. The total size is recomputed first if it is dirty.
    pub fn save_index(&self) -> Result<(), CacheError> {
        let index = {
            let mut state = self.state.lock();
            self.refresh_total_size(&mut state);

            let mut projections: Vec<ProjectionRecord> = state
                .projections
                .iter()
                .filter(|(_, p)| !p.entries.is_empty())
                .map(|(code, p)| ProjectionRecord {
                    code: code.clone(),
                    directory: p.directory.clone(),
                    entries: p
                        .entries
                        .iter()
                        .map(|e| EntryRecord {
                            pixels_per_unit: e.pixels_per_unit,
                            east: e.east,
                            north: e.north,
                            filename: e.filename.clone(),
                            no_tile: e.is_no_tile(),
                            last_used: e.last_used,
                            last_modified: e.last_modified,
                        })
                        .collect(),
                })
                .collect();
            projections.sort_by(|a, b| a.code.cmp(&b.code));

            state.unsaved = 0;
            IndexFile {
                tile_size: self.tile_size,
                total_file_size: state.total_size,
                projections,
            }
        };
        write_index(&self.root.join(INDEX_FILE), &index)
    }

    /// Total bytes of all cached files.
    pub fn total_size(&self) -> u64 {
        let mut state = self.state.lock();
        self.refresh_total_size(&mut state);
        state.total_size
    }

    pub(super) fn refresh_total_size(&self, state: &mut CacheState) {
        if !state.size_dirty {
            return;
        }
        state.total_size = state
            .projections
            .values()
            .flat_map(|p| {
                let dir = self.root.join(&p.directory);
                p.entries
                    .iter()
                    .filter_map(move |e| e.filename.as_ref().map(|f| dir.join(f)))
            })
            .map(|path| file_len(&path))
            .sum();
        state.size_dirty = false;
    }

    /// Look up the tile at exactly this scale and origin.
    ///
    /// With `force_alpha` the image is returned with an alpha channel.
    pub fn exact_match(
        &self,
        projection: &dyn Projection,
        pixels_per_unit: f64,
        east: f64,
        north: f64,
        force_alpha: bool,
    ) -> Option<CachedTile> {
        let found = self.touch_exact(projection.code(), pixels_per_unit, east, north);
        let result = match found {
            None => None,
            Some((_, None)) => Some(CachedTile::NoTile),
            Some((id, Some(path))) => self
                .load_image(id, &path, force_alpha)
                .map(CachedTile::Image),
        };
        Counters::record(
            result.is_some(),
            &self.counters.exact_hits,
            &self.counters.exact_misses,
        );
        result
    }

    fn touch_exact(
        &self,
        code: &str,
        pixels_per_unit: f64,
        east: f64,
        north: f64,
    ) -> Option<(u64, Option<PathBuf>)> {
        let epsilon = self.tolerances.match_epsilon;
        let mut state = self.state.lock();
        let projection = state.projections.get_mut(code)?;
        let dir = self.root.join(&projection.directory);
        let entry = projection
            .entries
            .iter_mut()
            .find(|e| e.matches(pixels_per_unit, east, north, epsilon))?;
        entry.last_used = now_millis();
        Some((entry.id, entry.filename.as_ref().map(|f| dir.join(f))))
    }

    /// Compose a tile from cached tiles of nearby scales that overlap it.
    ///
    /// Tiles closest to the requested scale are drawn last so they win.
    /// Returns `None` when nothing could be drawn.
    pub fn partial_match(
        &self,
        projection: &dyn Projection,
        pixels_per_unit: f64,
        east: f64,
        north: f64,
    ) -> Option<RgbaImage> {
        let candidates = self.partial_candidates(projection.code(), pixels_per_unit, east, north);

        let mut canvas = RgbaImage::new(self.tile_size, self.tile_size);
        let mut drawn = false;
        for (id, path, placement) in candidates {
            if let Some(image) = self.load_image(id, &path, false) {
                drawn |=
                    composite::draw_scaled(&mut canvas, &image, pixels_per_unit, east, north, placement);
            }
        }

        Counters::record(
            drawn,
            &self.counters.partial_hits,
            &self.counters.partial_misses,
        );
        drawn.then_some(canvas)
    }

    fn partial_candidates(
        &self,
        code: &str,
        pixels_per_unit: f64,
        east: f64,
        north: f64,
    ) -> Vec<(u64, PathBuf, Placement)> {
        let span = f64::from(self.tile_size) / pixels_per_unit;
        let area = ProjectionBounds::new(
            EastNorth::new(east, north),
            EastNorth::new(east + span, north + span),
        )
        .shrink(span * self.tolerances.border_ratio);
        let min_scale = pixels_per_unit / self.tolerances.scale_window;
        let max_scale = pixels_per_unit * self.tolerances.scale_window;
        let now = now_millis();

        let mut state = self.state.lock();
        let Some(projection) = state.projections.get_mut(code) else {
            return Vec::new();
        };
        let dir = self.root.join(&projection.directory);

        let mut found: Vec<(u64, PathBuf, Placement)> = projection
            .entries
            .iter_mut()
            .filter(|e| {
                e.pixels_per_unit >= min_scale
                    && e.pixels_per_unit <= max_scale
                    && e.bounds.intersects(&area)
            })
            .filter_map(|e| {
                let file = e.filename.as_ref()?;
                e.last_used = now;
                Some((
                    e.id,
                    dir.join(file),
                    Placement {
                        pixels_per_unit: e.pixels_per_unit,
                        east: e.east,
                        north: e.north,
                    },
                ))
            })
            .collect();

        let distance = |p: &Placement| (p.pixels_per_unit / pixels_per_unit).ln().abs();
        found.sort_by(|(_, _, a), (_, _, b)| {
            distance(b)
                .total_cmp(&distance(a))
                .then(a.pixels_per_unit.total_cmp(&b.pixels_per_unit))
        });
        found
    }

    /// Store a tile, overwriting any entry already at this scale and origin.
    ///
    /// Files are replaced by rename, so concurrent readers see either the
    /// old or the new tile. An overwritten entry gets a new id. When the
    /// total size passes the configured limit, least recently used entries
    /// are evicted.
    pub fn store(
        &self,
        data: TileData<'_>,
        projection: &dyn Projection,
        pixels_per_unit: f64,
        east: f64,
        north: f64,
    ) -> Result<(), CacheError> {
        let payload: Option<(Cow<'_, [u8]>, &'static str)> = match data {
            TileData::Encoded(bytes) => Some((
                Cow::Borrowed(bytes),
                imaging::extension_for(imaging::sniff_format(bytes)),
            )),
            TileData::Image(image) => Some((Cow::Owned(encode_png(image)?), "png")),
            TileData::NoTile => None,
        };

        let code = projection.code();
        let epsilon = self.tolerances.match_epsilon;
        let now = now_millis();

        let mut guard = self.state.lock();
        let state = &mut *guard;
        let record = state
            .projections
            .entry(code.to_string())
            .or_insert_with(|| ProjectionEntries {
                directory: projection.cache_directory_name(),
                entries: Vec::new(),
            });
        let dir = self.root.join(&record.directory);

        let existing = record
            .entries
            .iter()
            .position(|e| e.matches(pixels_per_unit, east, north, epsilon));
        let id = state.next_id;
        state.next_id += 1;
        let (replaced, previous) = match existing {
            Some(i) => (
                Some(record.entries[i].id),
                record.entries[i].filename.clone(),
            ),
            None => (None, None),
        };
        let old_size = previous.as_ref().map_or(0, |f| file_len(&dir.join(f)));

        let filename = match &payload {
            None => {
                if let Some(previous) = &previous {
                    remove_file_if_exists(&dir.join(previous))?;
                }
                None
            }
            Some((bytes, extension)) => {
                let name = match previous {
                    Some(previous) => previous,
                    None => {
                        let taken: HashSet<&str> = record
                            .entries
                            .iter()
                            .filter_map(|e| e.filename.as_deref())
                            .collect();
                        tile_filename(projection, pixels_per_unit, east, north, extension, &taken)
                    }
                };
                fs::create_dir_all(&dir)?;
                write_atomic(&dir.join(&name), bytes)?;
                Some(name)
            }
        };
        let new_size = payload.as_ref().map_or(0, |(bytes, _)| bytes.len() as u64);
        state.total_size = state.total_size.saturating_sub(old_size) + new_size;

        match existing {
            Some(i) => {
                let entry = &mut record.entries[i];
                entry.id = id;
                entry.filename = filename;
                entry.last_used = now;
                entry.last_modified = now;
            }
            None => record.entries.push(CacheEntry::new(
                id,
                self.tile_size,
                pixels_per_unit,
                east,
                north,
                filename,
                now,
                now,
            )),
        }
        state.unsaved += 1;
        let over_limit = self.max_size.filter(|&limit| state.total_size > limit);
        let save_due = state.unsaved >= INDEX_SAVE_INTERVAL;
        drop(guard);

        if let Some(replaced) = replaced {
            self.invalidate_memory(replaced);
        }
        debug!(
            projection = code,
            pixels_per_unit,
            east,
            north,
            bytes = new_size,
            "Stored tile"
        );

        if let Some(limit) = over_limit {
            if let Err(e) = self.evict_to_limit(limit) {
                warn!(root = %self.root.display(), error = %e, "Eviction after store failed");
            }
        }
        if save_due {
            if let Err(e) = self.save_index() {
                warn!(root = %self.root.display(), error = %e, "Failed to save cache index");
            }
        }
        Ok(())
    }

    /// Current counters and sizes.
    pub fn stats(&self) -> CacheStats {
        self.memory.run_pending_tasks();
        let mut state = self.state.lock();
        self.refresh_total_size(&mut state);

        let (entries, no_tile_markers) = state
            .projections
            .values()
            .flat_map(|p| p.entries.iter())
            .fold((0, 0), |(all, markers), e| {
                (all + 1, markers + usize::from(e.is_no_tile()))
            });

        CacheStats {
            entries,
            no_tile_markers,
            total_bytes: state.total_size,
            memory_images: self.memory.entry_count(),
            memory_bytes: self.memory.weighted_size(),
            exact_hits: self.counters.exact_hits.load(Ordering::Relaxed),
            exact_misses: self.counters.exact_misses.load(Ordering::Relaxed),
            partial_hits: self.counters.partial_hits.load(Ordering::Relaxed),
            partial_misses: self.counters.partial_misses.load(Ordering::Relaxed),
        }
    }

    fn load_image(&self, id: u64, path: &Path, force_alpha: bool) -> Option<Arc<DynamicImage>> {
        let key = MemoryKey {
            entry: id,
            force_alpha,
        };
        if let Some(image) = self.memory.get(&key) {
            return Some(image);
        }

        match read_image(path) {
            Ok(image) => {
                let image = if force_alpha && !image.color().has_alpha() {
                    DynamicImage::ImageRgba8(image.to_rgba8())
                } else {
                    image
                };
                let image = Arc::new(image);
                self.memory.insert(key, Arc::clone(&image));
                Some(image)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Pruning unusable cache entry");
                self.prune(id, path);
                None
            }
        }
    }

    /// Drop an entry whose file is missing or corrupt.
    ///
    /// Does nothing if the entry was overwritten since `id` was read; the
    /// file then belongs to the newer entry.
    fn prune(&self, id: u64, path: &Path) {
        let removed = {
            let mut state = self.state.lock();
            let mut removed = false;
            for projection in state.projections.values_mut() {
                let before = projection.entries.len();
                projection.entries.retain(|e| e.id != id);
                removed |= projection.entries.len() != before;
            }
            if removed {
                state.size_dirty = true;
                state.unsaved += 1;
            }
            removed
        };
        if !removed {
            debug!(path = %path.display(), "Entry replaced meanwhile, not pruning");
            return;
        }
        self.invalidate_memory(id);
        if let Err(e) = remove_file_if_exists(path) {
            debug!(path = %path.display(), error = %e, "Could not remove pruned file");
        }
    }

    pub(super) fn invalidate_memory(&self, id: u64) {
        for force_alpha in [false, true] {
            self.memory.invalidate(&MemoryKey {
                entry: id,
                force_alpha,
            });
        }
    }
}

impl Drop for TileCacheStore {
    fn drop(&mut self) {
        if let Err(e) = self.save_index() {
            warn!(root = %self.root.display(), error = %e, "Failed to save cache index on close");
        }
    }
}

/// Write `bytes` next to `path` and rename over it.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), CacheError> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, bytes)?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}

fn read_image(path: &Path) -> Result<DynamicImage, CacheError> {
    let bytes = fs::read(path)?;
    imaging::decode(&bytes).map_err(|e| CacheError::Corruption {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

fn encode_png(image: &DynamicImage) -> Result<Vec<u8>, CacheError> {
    let mut buffer = Vec::new();
    image.write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)?;
    Ok(buffer)
}

fn image_weight(image: &DynamicImage) -> u32 {
    let bytes = u64::from(image.width())
        * u64::from(image.height())
        * u64::from(image.color().bytes_per_pixel());
    bytes.min(u64::from(u32::MAX)) as u32
}

pub(super) fn file_len(path: &Path) -> u64 {
    fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

pub(super) fn remove_file_if_exists(path: &Path) -> Result<(), CacheError> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
        _ => Ok(()),
    }
}

pub(super) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projection::WebMercator;
    use image::Rgba;
    use tempfile::TempDir;

    const PPU: f64 = 0.5;

    fn png(size: u32, color: [u8; 4]) -> Vec<u8> {
        let image = DynamicImage::ImageRgba8(RgbaImage::from_pixel(size, size, Rgba(color)));
        encode_png(&image).unwrap()
    }

    fn open(dir: &TempDir, tile_size: u32) -> TileCacheStore {
        TileCacheStore::open(dir.path(), CacheOptions::new(tile_size)).unwrap()
    }

    fn pixel(tile: CachedTile) -> [u8; 4] {
        match tile {
            CachedTile::Image(image) => image.to_rgba8().get_pixel(0, 0).0,
            CachedTile::NoTile => panic!("expected image"),
        }
    }

    #[test]
    fn test_exact_match_after_store() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir, 16);

        let bytes = png(16, [200, 10, 10, 255]);
        store
            .store(TileData::Encoded(&bytes), &WebMercator, PPU, 1000.0, 2000.0)
            .unwrap();

        let tile = store.exact_match(&WebMercator, PPU, 1000.0, 2000.0, false).unwrap();
        assert_eq!(pixel(tile), [200, 10, 10, 255]);
        assert!(store.exact_match(&WebMercator, PPU, 1032.0, 2000.0, false).is_none());
    }

    #[test]
    fn test_second_store_overwrites() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir, 16);

        let first = png(16, [1, 1, 1, 255]);
        let second = png(16, [2, 2, 2, 255]);
        store.store(TileData::Encoded(&first), &WebMercator, PPU, 0.0, 0.0).unwrap();
        // Warm the memory cache so a stale image would be visible.
        store.exact_match(&WebMercator, PPU, 0.0, 0.0, false).unwrap();
        store.store(TileData::Encoded(&second), &WebMercator, PPU, 0.0, 0.0).unwrap();

        let tile = store.exact_match(&WebMercator, PPU, 0.0, 0.0, false).unwrap();
        assert_eq!(pixel(tile), [2, 2, 2, 255]);

        let stats = store.stats();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.total_bytes, second.len() as u64);
    }

    #[test]
    fn test_no_tile_marker() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir, 16);

        store.store(TileData::NoTile, &WebMercator, PPU, 0.0, 0.0).unwrap();
        assert!(matches!(
            store.exact_match(&WebMercator, PPU, 0.0, 0.0, false),
            Some(CachedTile::NoTile)
        ));
        assert_eq!(store.stats().no_tile_markers, 1);
    }

    #[test]
    fn test_decoded_image_stored_as_png() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir, 16);

        let image = DynamicImage::ImageRgba8(RgbaImage::from_pixel(16, 16, Rgba([5, 6, 7, 255])));
        store.store(TileData::Image(&image), &WebMercator, PPU, 0.0, 0.0).unwrap();

        let files: Vec<_> = fs::read_dir(dir.path().join("epsg_3857"))
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with(".png"));
    }

    #[test]
    fn test_force_alpha_adds_channel() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir, 16);

        let rgb = DynamicImage::ImageRgb8(image::RgbImage::from_pixel(16, 16, image::Rgb([9, 9, 9])));
        store.store(TileData::Image(&rgb), &WebMercator, PPU, 0.0, 0.0).unwrap();

        match store.exact_match(&WebMercator, PPU, 0.0, 0.0, true).unwrap() {
            CachedTile::Image(image) => assert!(image.color().has_alpha()),
            CachedTile::NoTile => panic!("expected image"),
        }
    }

    #[test]
    fn test_missing_file_self_heals() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir, 16);

        let bytes = png(16, [1, 2, 3, 255]);
        store.store(TileData::Encoded(&bytes), &WebMercator, PPU, 0.0, 0.0).unwrap();
        for file in fs::read_dir(dir.path().join("epsg_3857")).unwrap() {
            fs::remove_file(file.unwrap().path()).unwrap();
        }

        assert!(store.exact_match(&WebMercator, PPU, 0.0, 0.0, false).is_none());
        let stats = store.stats();
        assert_eq!(stats.entries, 0);
        assert_eq!(stats.total_bytes, 0);
    }

    #[test]
    fn test_corrupt_file_self_heals() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir, 16);

        let bytes = png(16, [1, 2, 3, 255]);
        store.store(TileData::Encoded(&bytes), &WebMercator, PPU, 0.0, 0.0).unwrap();
        for file in fs::read_dir(dir.path().join("epsg_3857")).unwrap() {
            fs::write(file.unwrap().path(), b"garbage").unwrap();
        }

        assert!(store.exact_match(&WebMercator, PPU, 0.0, 0.0, false).is_none());
        assert_eq!(store.stats().entries, 0);
    }

    #[test]
    fn test_partial_match_composites_finer_tiles() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir, 16);

        // Request: 16px at 0.5 px/unit covers 0..32 units. Store the finer
        // tile covering its south-west quarter (0..16 units at 1 px/unit).
        let red = png(16, [255, 0, 0, 255]);
        store.store(TileData::Encoded(&red), &WebMercator, 1.0, 0.0, 0.0).unwrap();

        let composed = store.partial_match(&WebMercator, PPU, 0.0, 0.0).unwrap();
        assert_eq!(composed.get_pixel(2, 13).0, [255, 0, 0, 255]);
        assert_eq!(composed.get_pixel(13, 2).0, [0, 0, 0, 0]);
    }

    #[test]
    fn test_partial_match_prefers_closest_scale() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir, 16);

        let coarse = png(16, [0, 0, 255, 255]);
        let exact = png(16, [0, 255, 0, 255]);
        store.store(TileData::Encoded(&coarse), &WebMercator, 0.25, 0.0, 0.0).unwrap();
        store.store(TileData::Encoded(&exact), &WebMercator, PPU, 0.0, 0.0).unwrap();

        let composed = store.partial_match(&WebMercator, PPU, 0.0, 0.0).unwrap();
        assert!(composed.pixels().all(|p| p.0 == [0, 255, 0, 255]));
    }

    #[test]
    fn test_partial_match_outside_scale_window() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir, 16);

        // 8x finer, bounds overlap the request but the scale is too far off.
        let fine = png(16, [255, 0, 0, 255]);
        store.store(TileData::Encoded(&fine), &WebMercator, 4.0, 0.0, 0.0).unwrap();

        assert!(store.partial_match(&WebMercator, PPU, 0.0, 0.0).is_none());
        let stats = store.stats();
        assert_eq!(stats.partial_misses, 1);
        assert_eq!(stats.partial_hits, 0);
    }

    #[test]
    fn test_partial_match_ignores_touching_neighbour() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir, 16);

        // Same scale, directly east: only the shared edge touches.
        let east = png(16, [255, 0, 0, 255]);
        store.store(TileData::Encoded(&east), &WebMercator, PPU, 32.0, 0.0).unwrap();

        assert!(store.partial_match(&WebMercator, PPU, 0.0, 0.0).is_none());
    }

    #[test]
    fn test_index_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let bytes = png(16, [7, 7, 7, 255]);
        {
            let store = open(&dir, 16);
            store.store(TileData::Encoded(&bytes), &WebMercator, PPU, 64.0, 64.0).unwrap();
            store.store(TileData::NoTile, &WebMercator, PPU, 96.0, 64.0).unwrap();
            store.save_index().unwrap();
        }

        let store = open(&dir, 16);
        assert!(matches!(
            store.exact_match(&WebMercator, PPU, 64.0, 64.0, false),
            Some(CachedTile::Image(_))
        ));
        assert!(matches!(
            store.exact_match(&WebMercator, PPU, 96.0, 64.0, false),
            Some(CachedTile::NoTile)
        ));
        assert_eq!(store.total_size(), bytes.len() as u64);
    }

    #[test]
    fn test_index_saved_on_drop() {
        let dir = TempDir::new().unwrap();
        let bytes = png(16, [7, 7, 7, 255]);
        {
            let store = open(&dir, 16);
            store.store(TileData::Encoded(&bytes), &WebMercator, PPU, 0.0, 0.0).unwrap();
        }

        let store = open(&dir, 16);
        assert!(matches!(
            store.exact_match(&WebMercator, PPU, 0.0, 0.0, false),
            Some(CachedTile::Image(_))
        ));
        assert_eq!(fs::read_dir(dir.path().join("epsg_3857")).unwrap().count(), 1);
    }

    #[test]
    fn test_index_saved_periodically() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir, 16);

        for i in 0..INDEX_SAVE_INTERVAL {
            store
                .store(TileData::NoTile, &WebMercator, PPU, i as f64 * 32.0, 0.0)
                .unwrap();
        }

        let index = read_index(&dir.path().join(INDEX_FILE)).unwrap().unwrap();
        let saved: usize = index.projections.iter().map(|p| p.entries.len()).sum();
        assert_eq!(saved as u64, INDEX_SAVE_INTERVAL);
    }

    #[test]
    fn test_store_evicts_past_max_size() {
        let dir = TempDir::new().unwrap();
        let options = CacheOptions::new(16).with_max_size(2000);
        let store = TileCacheStore::open(dir.path(), options).unwrap();

        let data = vec![0u8; 1000];
        for i in 0..3 {
            store
                .store(TileData::Encoded(&data), &WebMercator, PPU, f64::from(i) * 32.0, 0.0)
                .unwrap();
        }

        assert_eq!(store.total_size(), 2000);
        assert_eq!(store.stats().entries, 2);
        assert!(store.exact_match(&WebMercator, PPU, 0.0, 0.0, false).is_none());
    }

    #[test]
    fn test_overwrite_replaces_file_whole() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir, 16);

        let first = png(16, [1, 1, 1, 255]);
        let second = png(16, [2, 2, 2, 255]);
        store.store(TileData::Encoded(&first), &WebMercator, PPU, 0.0, 0.0).unwrap();
        let (old_id, path) = store
            .touch_exact("EPSG:3857", PPU, 0.0, 0.0)
            .map(|(id, path)| (id, path.unwrap()))
            .unwrap();
        store.store(TileData::Encoded(&second), &WebMercator, PPU, 0.0, 0.0).unwrap();

        assert_eq!(fs::read(&path).unwrap(), second);
        assert_eq!(fs::read_dir(dir.path().join("epsg_3857")).unwrap().count(), 1);

        // A reader that saw the first version and failed must not drop the second.
        store.prune(old_id, &path);
        assert!(path.exists());
        let tile = store.exact_match(&WebMercator, PPU, 0.0, 0.0, false).unwrap();
        assert_eq!(pixel(tile), [2, 2, 2, 255]);
    }

    #[test]
    fn test_tile_size_change_discards_cache() {
        let dir = TempDir::new().unwrap();
        {
            let store = open(&dir, 16);
            let bytes = png(16, [7, 7, 7, 255]);
            store.store(TileData::Encoded(&bytes), &WebMercator, PPU, 0.0, 0.0).unwrap();
            store.save_index().unwrap();
        }

        assert_eq!(TileCacheStore::indexed_tile_size(dir.path()).unwrap(), Some(16));
        let store = open(&dir, 32);
        assert!(store.exact_match(&WebMercator, PPU, 0.0, 0.0, false).is_none());
        assert!(!dir.path().join("epsg_3857").exists());
        assert_eq!(store.total_size(), 0);
    }

    #[test]
    fn test_corrupt_index_starts_empty() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(INDEX_FILE), b"{broken").unwrap();

        let store = open(&dir, 16);
        assert_eq!(store.stats().entries, 0);
    }
}
