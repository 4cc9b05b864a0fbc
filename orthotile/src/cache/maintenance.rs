//! Housekeeping for the tile cache: small-file cleanup, orphan removal,
//! size-bounded eviction and memory trimming.

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, warn};

use super::error::CacheError;
use super::store::{file_len, now_millis, remove_file_if_exists, MemoryKey, TileCacheStore};
use crate::projection::{Projection, ProjectionBounds};

/// Outcome of a maintenance pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub entries_removed: usize,
    pub files_deleted: usize,
    pub bytes_freed: u64,
}

impl fmt::Display for MaintenanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} entries removed, {} files deleted, {} bytes freed",
            self.entries_removed, self.files_deleted, self.bytes_freed
        )
    }
}

impl TileCacheStore {
    /// Delete every cached file whose size is at or below `threshold` bytes,
    /// along with its entry. Servers often answer blank areas with tiny
    /// uniform images.
    pub fn clean_small_files(&self, threshold: u64) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();
        let mut removed_ids = Vec::new();

        {
            let mut state = self.state.lock();
            for projection in state.projections.values_mut() {
                let dir = self.root.join(&projection.directory);
                let mut kept = Vec::with_capacity(projection.entries.len());
                for entry in projection.entries.drain(..) {
                    let Some(path) = entry.filename.as_ref().map(|f| dir.join(f)) else {
                        kept.push(entry);
                        continue;
                    };
                    let len = match fs::metadata(&path) {
                        Ok(meta) => meta.len(),
                        Err(_) => {
                            removed_ids.push(entry.id);
                            report.entries_removed += 1;
                            continue;
                        }
                    };
                    if len > threshold {
                        kept.push(entry);
                    } else if let Err(e) = remove_file_if_exists(&path) {
                        warn!(path = %path.display(), error = %e, "Could not delete small file");
                        kept.push(entry);
                    } else {
                        removed_ids.push(entry.id);
                        report.entries_removed += 1;
                        report.files_deleted += 1;
                        report.bytes_freed += len;
                    }
                }
                projection.entries = kept;
            }
            if report.entries_removed > 0 {
                state.size_dirty = true;
                state.unsaved += 1;
            }
        }

        for id in removed_ids {
            self.invalidate_memory(id);
        }
        info!(root = %self.root.display(), threshold, %report, "Cleaned small cache files");
        report
    }

    /// Delete files and projection directories that no entry references.
    pub fn remove_unreferenced(&self) -> Result<MaintenanceReport, CacheError> {
        let mut report = MaintenanceReport::default();

        let referenced: Vec<(String, HashSet<String>)> = {
            let state = self.state.lock();
            state
                .projections
                .values()
                .filter(|p| !p.entries.is_empty())
                .map(|p| {
                    let files = p.entries.iter().filter_map(|e| e.filename.clone()).collect();
                    (p.directory.clone(), files)
                })
                .collect()
        };

        for dir_entry in fs::read_dir(&self.root)? {
            let dir_entry = dir_entry?;
            let path = dir_entry.path();
            if !dir_entry.file_type()?.is_dir() {
                continue;
            }
            let name = dir_entry.file_name().to_string_lossy().into_owned();

            match referenced.iter().find(|(dir, _)| *dir == name) {
                None => {
                    let (files, bytes) = directory_usage(&path)?;
                    fs::remove_dir_all(&path)?;
                    debug!(dir = %path.display(), files, "Removed unreferenced cache directory");
                    report.files_deleted += files;
                    report.bytes_freed += bytes;
                }
                Some((_, files)) => {
                    for file in fs::read_dir(&path)? {
                        let file = file?;
                        let file_name = file.file_name().to_string_lossy().into_owned();
                        if file.file_type()?.is_file() && !files.contains(&file_name) {
                            let len = file_len(&file.path());
                            fs::remove_file(file.path())?;
                            report.files_deleted += 1;
                            report.bytes_freed += len;
                        }
                    }
                }
            }
        }

        if report.files_deleted > 0 {
            self.state.lock().size_dirty = true;
            info!(root = %self.root.display(), %report, "Removed unreferenced cache files");
        }
        Ok(report)
    }

    /// Remove least-recently-used entries until the files fit in `max_bytes`.
    ///
    /// No-tile markers take part in the same order, so markers used less
    /// recently than an evicted tile go with it. A file that can't be
    /// deleted is skipped; the first such error is returned after the index
    /// has been updated for everything that was removed.
    pub fn evict_to_limit(&self, max_bytes: u64) -> Result<MaintenanceReport, CacheError> {
        let mut report = MaintenanceReport::default();
        let mut removed_ids = Vec::new();
        let mut first_error = None;

        {
            let mut state = self.state.lock();
            self.refresh_total_size(&mut state);
            if state.total_size <= max_bytes {
                return Ok(report);
            }

            let mut candidates: Vec<(i64, u64, Option<PathBuf>)> = state
                .projections
                .values()
                .flat_map(|p| {
                    let dir = self.root.join(&p.directory);
                    p.entries
                        .iter()
                        .map(move |e| (e.last_used, e.id, e.filename.as_ref().map(|f| dir.join(f))))
                })
                .collect();
            candidates.sort_by_key(|(last_used, id, _)| (*last_used, *id));

            let mut total = state.total_size;
            for (_, id, path) in candidates {
                if total <= max_bytes {
                    break;
                }
                let Some(path) = path else {
                    removed_ids.push(id);
                    report.entries_removed += 1;
                    continue;
                };
                let len = file_len(&path);
                if let Err(e) = remove_file_if_exists(&path) {
                    warn!(path = %path.display(), error = %e, "Could not evict cache file");
                    first_error.get_or_insert(e);
                    continue;
                }
                total = total.saturating_sub(len);
                removed_ids.push(id);
                report.entries_removed += 1;
                report.files_deleted += 1;
                report.bytes_freed += len;
            }

            let removed: HashSet<u64> = removed_ids.iter().copied().collect();
            for projection in state.projections.values_mut() {
                projection.entries.retain(|e| !removed.contains(&e.id));
            }
            state.total_size = total;
            if first_error.is_some() {
                state.size_dirty = true;
            }
            if !removed.is_empty() {
                state.unsaved += 1;
            }
        }

        for id in removed_ids {
            self.invalidate_memory(id);
        }
        info!(root = %self.root.display(), max_bytes, %report, "Evicted cache entries");
        match first_error {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    /// Forget no-tile markers not used for `max_age`, so those tiles are
    /// requested again.
    pub fn expire_no_tile_markers(&self, max_age: Duration) -> MaintenanceReport {
        let max_age_ms = i64::try_from(max_age.as_millis()).unwrap_or(i64::MAX);
        let cutoff = now_millis().saturating_sub(max_age_ms);
        let mut report = MaintenanceReport::default();

        let mut state = self.state.lock();
        for projection in state.projections.values_mut() {
            let before = projection.entries.len();
            projection
                .entries
                .retain(|e| !(e.is_no_tile() && e.last_used < cutoff));
            report.entries_removed += before - projection.entries.len();
        }
        if report.entries_removed > 0 {
            state.unsaved += 1;
            debug!(root = %self.root.display(), %report, "Expired no-tile markers");
        }
        report
    }

    /// Drop decoded images from memory unless their tile intersects one of
    /// `areas` in `projection`. Returns the number of images dropped.
    pub fn retain_memory_area(
        &self,
        projection: &dyn Projection,
        areas: &[ProjectionBounds],
    ) -> usize {
        let keep: HashSet<u64> = {
            let state = self.state.lock();
            state
                .projections
                .get(projection.code())
                .map(|p| {
                    p.entries
                        .iter()
                        .filter(|e| areas.iter().any(|area| e.bounds.intersects(area)))
                        .map(|e| e.id)
                        .collect()
                })
                .unwrap_or_default()
        };

        let stale: Vec<MemoryKey> = self
            .memory
            .iter()
            .filter(|(key, _)| !keep.contains(&key.entry))
            .map(|(key, _)| *key)
            .collect();
        for key in &stale {
            self.memory.invalidate(key);
        }
        debug!(kept = keep.len(), dropped = stale.len(), "Trimmed in-memory tiles");
        stale.len()
    }
}

fn directory_usage(path: &Path) -> Result<(usize, u64), CacheError> {
    let mut files = 0;
    let mut bytes = 0;
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            let (f, b) = directory_usage(&entry.path())?;
            files += f;
            bytes += b;
        } else {
            files += 1;
            bytes += file_len(&entry.path());
        }
    }
    Ok((files, bytes))
}
