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

//! Table registry & hasher (spec §4.D): a fixed-size hash table mapping a
//! material key to the (lazily loaded) table for that material, built once
//! by walking the configured search directories at startup.

use std::path::{Path, PathBuf};

use arrayvec::ArrayVec;
use shakmaty::{Color, Piece, Role};

use crate::{loader::LazyTable, material::Material};

/// `TB_HASH_BITS` in the Cfish reference: the registry has `1 << 12`
/// buckets.
const TB_HASH_BITS: u32 = 12;

/// `HSHMAX`: maximum number of distinct material keys that may collide into
/// the same bucket. Five is the value Cfish ships, sized for the real
/// distribution of 6-piece material signatures.
const HSHMAX: usize = 5;

/// One hash bucket slot: a material key plus the lazily-loaded table for
/// it. `symmetric`/`mirrored` record which of the two table perspectives
/// this slot's `key` actually refers to (spec invariant 5: a symmetric
/// material signature is stored once, not twice).
pub struct Slot {
    pub key: u64,
    pub material: Material,
    pub tables: LazyTable,
}

/// The full table registry: `1 << TB_HASH_BITS` buckets, each a small
/// fixed-capacity probe chain (spec §4.D "linear-probe the bucket").
pub struct Registry {
    buckets: Vec<ArrayVec<Slot, HSHMAX>>,
    max_cardinality: u32,
}

fn bucket_index(key: u64) -> usize {
    (key >> (64 - TB_HASH_BITS)) as usize
}

/// Parses a `"KQPvKRP"`-style material string into a [`Material`], the
/// inverse of [`Material`]'s `Display` impl. Returns `None` for filenames
/// that are not well-formed material signatures (e.g. `"readme"`), which
/// the registry builder treats as a skip, not a hard error (spec §4.D
/// "each file's canonical key ... from the filename").
fn parse_material_str(name: &str) -> Option<Material> {
    use std::iter::FromIterator;

    let (white, black) = name.split_once('v')?;
    if white.is_empty() || black.is_empty() {
        return None;
    }
    let mut pieces = Vec::with_capacity(name.len() - 1);
    for (half, color) in [(white, Color::White), (black, Color::Black)] {
        for ch in half.chars() {
            let role = match ch {
                'K' => Role::King,
                'Q' => Role::Queen,
                'R' => Role::Rook,
                'B' => Role::Bishop,
                'N' => Role::Knight,
                'P' => Role::Pawn,
                _ => return None,
            };
            pieces.push(Piece { color, role });
        }
    }
    Some(Material::from_iter(pieces))
}

impl Registry {
    /// Walks `directories`, recognizing `{material}.rtbw`/`{material}.rtbz`
    /// files, and inserts a bucket slot for each distinct material key
    /// found (plus its mirror, spec §4.D), without yet loading any table
    /// contents (loading is deferred to [`crate::loader::LazyTable`]).
    pub fn build(directories: &[PathBuf]) -> Registry {
        let mut registry = Registry {
            buckets: (0..(1usize << TB_HASH_BITS)).map(|_| ArrayVec::new()).collect(),
            max_cardinality: 0,
        };

        for dir in directories {
            let entries = match std::fs::read_dir(dir) {
                Ok(entries) => entries,
                Err(error) => {
                    log::warn!("could not read syzygy directory {}: {error}", dir.display());
                    continue;
                }
            };
            for entry in entries.flatten() {
                registry.consider_path(&entry.path());
            }
        }

        registry
    }

    fn consider_path(&mut self, path: &Path) {
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            return;
        };
        let Some(ext) = path.extension().and_then(|s| s.to_str()) else {
            return;
        };
        if ext != "rtbw" && ext != "rtbz" {
            return;
        }
        let Some(material) = parse_material_str(stem) else {
            log::warn!("skipping file with unrecognized material signature: {stem}");
            return;
        };

        self.max_cardinality = self.max_cardinality.max(material.count());
        self.insert(material);
        if !material.is_symmetric() {
            self.insert(material.flip());
        }
    }

    fn insert(&mut self, material: Material) {
        let key = material.unique_key();
        let bucket = &mut self.buckets[bucket_index(key)];
        if bucket.iter().any(|slot| slot.key == key) {
            return;
        }
        if bucket.is_full() {
            log::warn!(
                "registry bucket overflow (> {HSHMAX} entries) for material {material}; dropping"
            );
            return;
        }
        bucket.push(Slot {
            key,
            material,
            tables: LazyTable::new(),
        });
    }

    /// Looks up the registry slot for `material`'s key, if any table for
    /// that material combination was found on disk.
    pub fn get(&self, material: &Material) -> Option<&Slot> {
        let key = material.unique_key();
        self.buckets[bucket_index(key)].iter().find(|slot| slot.key == key)
    }

    /// `TB_MaxCardinality`: the largest piece count among all tables found.
    pub fn max_cardinality(&self) -> u32 {
        self.max_cardinality
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_material_strings() {
        let m = parse_material_str("KQPvKR").expect("parses");
        assert_eq!(m.to_string(), "KQPvKR");
    }

    #[test]
    fn rejects_malformed_material_strings() {
        assert!(parse_material_str("readme").is_none());
        assert!(parse_material_str("KQPvKX").is_none());
    }

    #[test]
    fn empty_directory_yields_empty_registry() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = Registry::build(&[dir.path().to_path_buf()]);
        assert_eq!(registry.max_cardinality(), 0);
        assert!(registry.get(&Material::default()).is_none());
    }
}
