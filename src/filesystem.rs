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

//! File & memory-map layer (spec §4.A): locate, open, and memory-map table
//! files. Release is a pure unmap, which happens automatically when the
//! [`Mmap`](memmap2::Mmap) inside [`TableFile`] is dropped.

use std::{
    fs::File,
    ops::Deref,
    path::{Path, PathBuf},
};

use memmap2::Mmap;

use crate::errors::ProbeError;

/// An open, memory-mapped table file. Derefs to the raw bytes. The mapping
/// is released (unmapped) when this value is dropped.
#[derive(Debug)]
pub struct TableFile {
    mmap: Mmap,
}

impl TableFile {
    fn open(path: &Path) -> Result<TableFile, ProbeError> {
        let file = File::open(path)?;
        // Safety: we treat the mapped file as foreign read-only data. If it
        // is truncated or modified concurrently by another process, reads
        // may observe torn or stale bytes, but never out-of-bounds memory:
        // all accesses below go through bounds-checked slice indexing.
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(TableFile { mmap })
    }
}

impl Deref for TableFile {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.mmap
    }
}

/// Tries each `{name}.{suffix}` in each configured directory, in order, and
/// maps the first file found. Returns `None` ("table absent", spec §4.A) if
/// no directory has the file, rather than an error: a missing table is a
/// normal, expected outcome (most material combinations are not present in
/// any given Syzygy installation).
pub fn locate_and_map(
    directories: &[PathBuf],
    name: &str,
    suffix: &str,
) -> Option<Result<TableFile, ProbeError>> {
    for dir in directories {
        let path = dir.join(format!("{name}.{suffix}"));
        match File::open(&path) {
            Ok(_) => return Some(TableFile::open(&path)),
            Err(_) => continue,
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_table_is_absent_not_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let result = locate_and_map(&[dir.path().to_path_buf()], "KQvKR", "rtbw");
        assert!(result.is_none());
    }

    #[test]
    fn locates_file_in_second_directory() {
        let empty = tempfile::tempdir().expect("tempdir");
        let populated = tempfile::tempdir().expect("tempdir");
        std::fs::write(populated.path().join("KQvKR.rtbw"), [0u8; 16]).expect("write");

        let dirs = vec![empty.path().to_path_buf(), populated.path().to_path_buf()];
        let result = locate_and_map(&dirs, "KQvKR", "rtbw");
        assert!(matches!(result, Some(Ok(_))));
    }
}
