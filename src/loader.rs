// This file is part of the shakmaty-syzygy library.
// Copyright (C) 2017-2022 Niklas Fiekas <niklas.fiekas@backscattering.de>
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <http://www.gnu.org/licenses/>.

//! Lazy loading with double-checked locking (spec §4.E/§9): `LazyTable` is
//! the reusable building block behind every WDL table slot in the
//! registry, giving a lock-free fast path once a table has been parsed and
//! mapped, and a mutex-guarded slow path the first time it is needed.
//!
//! A DTZ table is not kept behind a `LazyTable`: DTZ tables are evicted
//! under memory pressure (spec §4.E "bounded LRU"), so they live in
//! [`DtzCache`] instead, a small fixed-capacity, front-moved-on-hit cache
//! mirroring Cfish's `DTZ_table[DTZ_ENTRIES]`.

use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex, OnceLock,
    },
};

use arrayvec::ArrayVec;

use crate::{
    errors::{throw, ProbeError, SyzygyError, SyzygyResult},
    filesystem::{locate_and_map, TableFile},
    material::Material,
    table::DtzTable,
    types::{Metric, Syzygy},
};

/// `DTZ_ENTRIES` in Cfish: the DTZ LRU's fixed capacity.
const DTZ_ENTRIES: usize = 64;

/// Lazily parses and memory-maps a single WDL table, exactly once, behind
/// an acquire/release-ordered readiness flag (spec §9's double-checked
/// locking resolution). Readers that observe `ready == true` take a
/// lock-free path; the first reader to observe `false` takes the mutex,
/// re-checks, and — if still not ready — loads the table and publishes it.
pub struct LazyTable {
    ready: AtomicBool,
    lock: Mutex<()>,
    mmap: OnceLock<TableFile>,
}

impl LazyTable {
    pub fn new() -> LazyTable {
        LazyTable {
            ready: AtomicBool::new(false),
            lock: Mutex::new(()),
            mmap: OnceLock::new(),
        }
    }

    /// Returns the backing bytes for this table, loading them from
    /// `directories` on first access. `directories`/`name` are only
    /// consulted on the slow path.
    pub fn get_or_load(
        &self,
        directories: &[PathBuf],
        material: &Material,
        suffix: &str,
    ) -> Result<&[u8], ProbeError> {
        if !self.ready.load(Ordering::Acquire) {
            let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            if !self.ready.load(Ordering::Relaxed) {
                let file = load_table_file(directories, material, suffix)?;
                let _ = self.mmap.set(file);
                self.ready.store(true, Ordering::Release);
            }
        }
        Ok(self.mmap.get().expect("ready implies mmap is set"))
    }
}

impl Default for LazyTable {
    fn default() -> LazyTable {
        LazyTable::new()
    }
}

fn load_table_file(
    directories: &[PathBuf],
    material: &Material,
    suffix: &str,
) -> Result<TableFile, ProbeError> {
    let name = material.to_string();
    let mirrored = material.flip().to_string();
    match locate_and_map(directories, &name, suffix).or_else(|| locate_and_map(directories, &mirrored, suffix)) {
        Some(result) => result,
        None => {
            log::warn!("table file for {material} ({suffix}) disappeared after registry scan");
            throw!()
        }
    }
}

/// One DTZ table held live in the bounded cache, plus the parsed header
/// metadata needed to re-derive a [`DtzTable`] view over its bytes.
struct DtzSlot {
    material: Material,
    file: TableFile,
}

/// Fixed-capacity, move-to-front DTZ cache (spec §4.E), mirroring Cfish's
/// `DTZ_table[DTZ_ENTRIES]`: on a hit the matching slot is promoted to the
/// front; on a miss the oldest (last) slot is evicted to make room.
pub struct DtzCache {
    slots: Mutex<ArrayVec<DtzSlot, DTZ_ENTRIES>>,
}

impl DtzCache {
    pub fn new() -> DtzCache {
        DtzCache {
            slots: Mutex::new(ArrayVec::new()),
        }
    }

    /// Runs `f` with the memory-mapped bytes for `material`'s DTZ table,
    /// loading (and caching) it first if necessary.
    pub fn with_table<S: Syzygy, R>(
        &self,
        directories: &[PathBuf],
        material: &Material,
        f: impl FnOnce(&DtzTable<'_>) -> ProbeResultLike<R>,
    ) -> SyzygyResult<R> {
        let normalized = material.into_normalized();
        let mut slots = self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(pos) = slots.iter().position(|slot| slot.material == normalized) {
            let slot = slots.remove(pos);
            slots.insert(0, slot);
        } else {
            let name = normalized.to_string();
            let mirrored = normalized.flip().to_string();
            let file = match locate_and_map(directories, &name, S::DTZ_SUFFIX) {
                Some(result) => result.map_err(|error| to_syzygy_error(Metric::Dtz, normalized, error))?,
                None => match locate_and_map(directories, &mirrored, S::DTZ_SUFFIX) {
                    Some(result) => result.map_err(|error| to_syzygy_error(Metric::Dtz, normalized, error))?,
                    None => {
                        return Err(SyzygyError::MissingTable {
                            metric: Metric::Dtz,
                            material: normalized,
                        })
                    }
                },
            };
            if slots.is_full() {
                slots.pop();
            }
            slots.insert(0, DtzSlot { material: normalized, file });
        }

        let bytes: &[u8] = &slots[0].file;
        let table = DtzTable::new::<S>(bytes).map_err(|error| to_syzygy_error(Metric::Dtz, normalized, error))?;
        f(&table).map_err(|error| to_syzygy_error(Metric::Dtz, normalized, error))
    }
}

impl Default for DtzCache {
    fn default() -> DtzCache {
        DtzCache::new()
    }
}

pub type ProbeResultLike<T> = Result<T, ProbeError>;

fn to_syzygy_error(metric: Metric, material: Material, error: ProbeError) -> SyzygyError {
    SyzygyError::ProbeFailed {
        metric,
        material,
        error: Box::new(error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lazy_table_reports_missing_file_as_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let lazy = LazyTable::new();
        let material = Material::default();
        let result = lazy.get_or_load(&[dir.path().to_path_buf()], &material, "rtbw");
        assert!(result.is_err());
    }

    #[test]
    fn dtz_cache_reports_missing_table_as_syzygy_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = DtzCache::new();
        let material = Material::default();
        let result = cache.with_table::<shakmaty::Chess, ()>(&[dir.path().to_path_buf()], &material, |_| Ok(()));
        assert!(matches!(result, Err(SyzygyError::MissingTable { .. })));
    }
}
