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

//! Material signatures: the multiset of pieces on the board, independent of
//! square, used as the primary key for table lookup (spec §3 "Material key").

use std::{cmp::Ordering, fmt, iter::FromIterator};

use shakmaty::{Board, Color, Piece, Role};

/// Per-piece-type contribution to the 64-bit material key. Mirrors
/// Cfish's `mat_key[16]` table (`calc_key` in `tbprobe.c`): arbitrary but
/// fixed per-(color, role) primes so that the sum over a material
/// combination is (for all practical table sizes) collision-free.
const PIECE_KEY: [u64; 6] = [
    // Pawn, Knight, Bishop, Rook, Queen, King
    1,
    0x0002_0000_0000_0000,
    0x0000_0004_0000_0000,
    0x0000_0000_0008_0000,
    0x0000_0000_0000_1000,
    0x0000_0000_0001_0000,
];

fn role_key(role: Role) -> u64 {
    PIECE_KEY[role as usize - 1]
}

/// Piece counts for a single color, indexed by [`Role`].
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Hash)]
pub struct MaterialSide {
    pawns: u8,
    knights: u8,
    bishops: u8,
    rooks: u8,
    queens: u8,
    kings: u8,
}

impl MaterialSide {
    pub fn count_of(&self, role: Role) -> u8 {
        match role {
            Role::Pawn => self.pawns,
            Role::Knight => self.knights,
            Role::Bishop => self.bishops,
            Role::Rook => self.rooks,
            Role::Queen => self.queens,
            Role::King => self.kings,
        }
    }

    fn count_of_mut(&mut self, role: Role) -> &mut u8 {
        match role {
            Role::Pawn => &mut self.pawns,
            Role::Knight => &mut self.knights,
            Role::Bishop => &mut self.bishops,
            Role::Rook => &mut self.rooks,
            Role::Queen => &mut self.queens,
            Role::King => &mut self.kings,
        }
    }

    pub fn count(&self) -> u32 {
        u32::from(self.pawns)
            + u32::from(self.knights)
            + u32::from(self.bishops)
            + u32::from(self.rooks)
            + u32::from(self.queens)
            + u32::from(self.kings)
    }

    pub fn has_pawns(&self) -> bool {
        self.pawns > 0
    }

    /// Number of distinct piece *types* present, ignoring the king.
    pub fn unique_non_king_roles(&self) -> u32 {
        [
            self.pawns,
            self.knights,
            self.bishops,
            self.rooks,
            self.queens,
        ]
        .iter()
        .filter(|&&n| n > 0)
        .count() as u32
    }

    fn key(&self) -> u64 {
        role_key(Role::Pawn) * u64::from(self.pawns)
            + role_key(Role::Knight) * u64::from(self.knights)
            + role_key(Role::Bishop) * u64::from(self.bishops)
            + role_key(Role::Rook) * u64::from(self.rooks)
            + role_key(Role::Queen) * u64::from(self.queens)
            + role_key(Role::King) * u64::from(self.kings)
    }

    /// Characters in descending "value" order, e.g. `"KQP"`, matching
    /// Cfish's `prt_str`.
    fn push_str(&self, out: &mut String) {
        for _ in 0..self.kings {
            out.push('K');
        }
        for _ in 0..self.queens {
            out.push('Q');
        }
        for _ in 0..self.rooks {
            out.push('R');
        }
        for _ in 0..self.bishops {
            out.push('B');
        }
        for _ in 0..self.knights {
            out.push('N');
        }
        for _ in 0..self.pawns {
            out.push('P');
        }
    }
}

/// A material signature: the pieces held by each color, independent of
/// square or move order.
///
/// `Material` is the primary key used to locate a table on disk (via its
/// `Display` impl, e.g. `"KQPvKRP"`) and in the in-memory registry (via
/// [`Material::unique_key`]).
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Hash)]
pub struct Material {
    pub white: MaterialSide,
    pub black: MaterialSide,
}

impl FromIterator<Piece> for Material {
    fn from_iter<T: IntoIterator<Item = Piece>>(iter: T) -> Material {
        let mut material = Material::default();
        for piece in iter {
            let side = match piece.color {
                Color::White => &mut material.white,
                Color::Black => &mut material.black,
            };
            *side.count_of_mut(piece.role) += 1;
        }
        material
    }
}

impl Material {
    pub fn from_board(board: &Board) -> Material {
        Material::from_iter(board.pieces().map(|(_, piece)| piece))
    }

    pub fn flip(&self) -> Material {
        Material {
            white: self.black,
            black: self.white,
        }
    }

    pub fn count(&self) -> u32 {
        self.white.count() + self.black.count()
    }

    pub fn has_pawns(&self) -> bool {
        self.white.has_pawns() || self.black.has_pawns()
    }

    /// Whether both sides hold the exact same multiset of pieces, in which
    /// case only a single stored perspective is needed (spec invariant 5).
    pub fn is_symmetric(&self) -> bool {
        self.white == self.black
    }

    /// Number of unique non-king piece roles, counted across *both* sides,
    /// used by the indexer to choose the leading group size (spec §4.C,
    /// Cfish's `pieces_cp` grouping).
    pub fn unique_pieces(&self) -> u32 {
        let mut roles = 0u8;
        for (i, role) in Role::ALL.iter().enumerate() {
            if *role == Role::King {
                continue;
            }
            if self.white.count_of(*role) > 0 || self.black.count_of(*role) > 0 {
                roles |= 1 << i;
            }
        }
        roles.count_ones()
    }

    /// The 64-bit material key (spec §3 "Material key"). Satisfies
    /// `key(pos) == key(mirror(pos))` iff `is_symmetric()`.
    pub fn unique_key(&self) -> u64 {
        self.white.key() + self.black.key()
    }

    /// Normalizes so that the stronger side (by key) comes first; used when
    /// reporting errors so `"KPvK"` and `"KvKP"` read the same regardless of
    /// which side the caller queried.
    pub fn into_normalized(self) -> Material {
        if self.white.key() >= self.black.key() {
            self
        } else {
            self.flip()
        }
    }
}

impl fmt::Display for Material {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = String::with_capacity(16);
        self.white.push_str(&mut s);
        s.push('v');
        self.black.push_str(&mut s);
        f.write_str(&s)
    }
}

impl PartialOrd for Material {
    fn partial_cmp(&self, other: &Material) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Material {
    fn cmp(&self, other: &Material) -> Ordering {
        self.unique_key().cmp(&other.unique_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn side(pawns: u8, knights: u8, bishops: u8, rooks: u8, queens: u8, kings: u8) -> MaterialSide {
        MaterialSide {
            pawns,
            knights,
            bishops,
            rooks,
            queens,
            kings,
        }
    }

    #[test]
    fn display_matches_syzygy_naming() {
        let m = Material {
            white: side(1, 0, 0, 0, 1, 1), // KQP
            black: side(0, 0, 0, 1, 0, 1), // KR
        };
        assert_eq!(m.to_string(), "KQPvKR");
    }

    #[test]
    fn mirrored_material_has_same_key_iff_symmetric() {
        let symmetric = Material {
            white: side(1, 0, 0, 0, 0, 1),
            black: side(1, 0, 0, 0, 0, 1),
        };
        assert!(symmetric.is_symmetric());
        assert_eq!(symmetric.unique_key(), symmetric.flip().unique_key());

        let asymmetric = Material {
            white: side(0, 0, 0, 0, 1, 1),
            black: side(0, 0, 0, 1, 0, 1),
        };
        assert!(!asymmetric.is_symmetric());
        assert_ne!(asymmetric.unique_key(), asymmetric.flip().unique_key());
    }

    #[test]
    fn qvr_key_mirrors_rvq() {
        // "Material key for Q+K vs R+P equals that of R+P vs Q+K mirrored"
        let qk_vs_rp = Material {
            white: side(0, 0, 0, 0, 1, 1),
            black: side(1, 0, 0, 1, 0, 1),
        };
        let rp_vs_qk = qk_vs_rp.flip();
        assert_eq!(qk_vs_rp.unique_key(), rp_vs_qk.flip().unique_key());
        assert_ne!(qk_vs_rp.unique_key(), rp_vs_qk.unique_key());
    }
}
