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

//! Probe Syzygy tablebases: WDL (win/draw/loss) and DTZ (distance-to-zero)
//! values, plus a root move filter for engines that want tablebase-perfect
//! play at the root.
//!
//! [`Tablebase`] owns the registry of discovered table files and the bounded
//! DTZ cache; build one with [`Tablebase::new`] pointing at the directories
//! that hold `.rtbw`/`.rtbz` files, then call [`Tablebase::probe_wdl`],
//! [`Tablebase::probe_dtz`], or [`Tablebase::root_probe_dtz`].

#![warn(missing_debug_implementations)]

mod errors;
mod filesystem;
mod index;
mod loader;
mod material;
mod probe;
mod registry;
mod root;
mod table;
mod types;

use std::{fmt, path::PathBuf};

use shakmaty::Position;

pub use crate::{
    errors::{ProbeError, SyzygyError, SyzygyResult},
    loader::DtzCache,
    material::{Material, MaterialSide},
    registry::Registry,
    root::{root_probe_dtz, root_probe_wdl, RootMove},
    types::{Metric, Syzygy, Wdl},
};

/// A set of tablebases discovered under the given directories (spec §4.D
/// "table registry", built once at startup) plus the bounded DTZ cache that
/// backs repeated probing (spec §4.E).
pub struct Tablebase {
    directories: Vec<PathBuf>,
    registry: Registry,
    dtz_cache: DtzCache,
}

impl fmt::Debug for Tablebase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tablebase")
            .field("directories", &self.directories)
            .field("max_cardinality", &self.registry.max_cardinality())
            .finish()
    }
}

impl Tablebase {
    /// Enumerates `directories` for `.rtbw`/`.rtbz` files and builds the
    /// registry (spec's `init_tables`). No table contents are read yet —
    /// tables are mapped lazily on first probe (spec §4.E).
    pub fn new(directories: Vec<PathBuf>) -> Tablebase {
        let registry = Registry::build(&directories);
        Tablebase {
            directories,
            registry,
            dtz_cache: DtzCache::new(),
        }
    }

    /// `TB_MaxCardinality`: the largest piece count among all tables found.
    pub fn max_cardinality(&self) -> u32 {
        self.registry.max_cardinality()
    }

    /// Probes the WDL value of `pos` from the point of view of the side to
    /// move, resolving captures so the reported value already accounts for
    /// en passant rights the stored table is indifferent to (spec §4.F).
    pub fn probe_wdl<P>(&self, pos: &P) -> SyzygyResult<Wdl>
    where
        P: Position + Clone + Syzygy,
    {
        probe::probe_wdl(&self.registry, &self.directories, pos)
    }

    /// Probes the signed DTZ ply count of `pos` (spec §4.G), following the
    /// shortcut ladder of captures/winning pawn pushes before falling back
    /// to the stored table.
    pub fn probe_dtz<P>(&self, pos: &P) -> SyzygyResult<i32>
    where
        P: Position + Clone + Syzygy,
    {
        probe::probe_dtz(&self.registry, &self.dtz_cache, &self.directories, pos)
    }

    /// Filters `pos`'s legal moves down to those that preserve its DTZ
    /// outcome under the 50-move rule (spec §4.H). `history` is the caller's
    /// own position-key history, newest first, consulted only for the
    /// repetition check; `plies_from_null` bounds how far back that check
    /// looks.
    pub fn root_probe_dtz<P>(
        &self,
        pos: &P,
        history: &[u64],
        plies_from_null: u32,
    ) -> SyzygyResult<Vec<RootMove>>
    where
        P: Position + Clone + Syzygy,
    {
        root::root_probe_dtz(&self.registry, &self.dtz_cache, &self.directories, pos, history, plies_from_null)
    }

    /// WDL-only root filter fallback (spec's `root_probe_wdl`), for use when
    /// no DTZ table covers the root material.
    pub fn root_probe_wdl<P>(&self, pos: &P) -> SyzygyResult<Vec<(shakmaty::Move, Wdl)>>
    where
        P: Position + Clone + Syzygy,
    {
        root::root_probe_wdl(&self.registry, &self.directories, pos)
    }
}
