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

use std::{fmt, ops::Neg};

use shakmaty::{Chess, Color, Outcome};

/// A chess variant with Syzygy support.
pub trait Syzygy {
    const WDL_SUFFIX: &'static str;
    const DTZ_SUFFIX: &'static str;
    const WDL_MAGIC: [u8; 4];
    const DTZ_MAGIC: [u8; 4];
    const PAWNLESS_WDL_MAGIC: [u8; 4];
    const PAWNLESS_DTZ_MAGIC: [u8; 4];
    /// Whether each side always has exactly one king.
    const ONE_KING: bool;
    /// Whether kings are allowed to stand adjacent (variants with a
    /// different king-safety rule use a larger KK map).
    const CONNECTED_KINGS: bool;
    const CAPTURES_COMPULSORY: bool;
}

impl Syzygy for Chess {
    const WDL_SUFFIX: &'static str = "rtbw";
    const DTZ_SUFFIX: &'static str = "rtbz";
    const WDL_MAGIC: [u8; 4] = [0x71, 0xe8, 0x23, 0x5d];
    const DTZ_MAGIC: [u8; 4] = [0xd7, 0x66, 0x0c, 0xa5];
    const PAWNLESS_WDL_MAGIC: [u8; 4] = [0x71, 0xe8, 0x23, 0x5d];
    const PAWNLESS_DTZ_MAGIC: [u8; 4] = [0xd7, 0x66, 0x0c, 0xa5];
    const ONE_KING: bool = true;
    const CONNECTED_KINGS: bool = false;
    const CAPTURES_COMPULSORY: bool = false;
}

/// Which kind of table a probe or error refers to.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Metric {
    Wdl,
    Dtz,
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Metric::Wdl => "WDL",
            Metric::Dtz => "DTZ",
        })
    }
}

/// Win/Draw/Loss value from the point of view of the side to move.
///
/// `CursedWin`/`BlessedLoss` mean the result flips under the 50-move rule:
/// the position is won/lost in the sense of perfect chess, but a draw can
/// be forced before the stronger side can convert.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[repr(i8)]
pub enum Wdl {
    Loss = -2,
    BlessedLoss = -1,
    Draw = 0,
    CursedWin = 1,
    Win = 2,
}

impl Wdl {
    /// Builds a `Wdl` from a position's [`Outcome`] from the point of view
    /// of `pov`. Used for the `KvK`/stalemate fast paths that never touch a
    /// table (spec §8 "Boundary behaviors").
    pub fn from_outcome(outcome: Outcome, pov: Color) -> Wdl {
        match outcome {
            Outcome::Draw => Wdl::Draw,
            Outcome::Decisive { winner } if winner == pov => Wdl::Win,
            Outcome::Decisive { .. } => Wdl::Loss,
        }
    }

    /// Decodes the raw byte stored in a WDL table (`0..=4`).
    pub fn from_wdl_table_byte(byte: u8) -> Option<Wdl> {
        Some(match byte {
            0 => Wdl::Loss,
            1 => Wdl::BlessedLoss,
            2 => Wdl::Draw,
            3 => Wdl::CursedWin,
            4 => Wdl::Win,
            _ => return None,
        })
    }

    pub fn signum(self) -> i8 {
        (self as i8).signum()
    }

    /// `wdl_to_dtz[]` in Cfish's `tbprobe.c`: the DTZ value to report when
    /// the position's exact ply count is already pinned down by a capture,
    /// en passant capture, or winning pawn move (spec §4.G steps 1-2).
    pub fn to_dtz_before_zeroing(self) -> i32 {
        match self {
            Wdl::Loss => -1,
            Wdl::BlessedLoss => -101,
            Wdl::Draw => 0,
            Wdl::CursedWin => 101,
            Wdl::Win => 1,
        }
    }
}

impl Neg for Wdl {
    type Output = Wdl;

    fn neg(self) -> Wdl {
        match self {
            Wdl::Loss => Wdl::Win,
            Wdl::BlessedLoss => Wdl::CursedWin,
            Wdl::Draw => Wdl::Draw,
            Wdl::CursedWin => Wdl::BlessedLoss,
            Wdl::Win => Wdl::Loss,
        }
    }
}

impl From<Wdl> for i8 {
    #[inline]
    fn from(wdl: Wdl) -> i8 {
        wdl as i8
    }
}

impl From<Wdl> for i32 {
    #[inline]
    fn from(wdl: Wdl) -> i32 {
        wdl as i8 as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negation_is_an_involution() {
        for wdl in [Wdl::Loss, Wdl::BlessedLoss, Wdl::Draw, Wdl::CursedWin, Wdl::Win] {
            assert_eq!(-(-wdl), wdl);
        }
    }

    #[test]
    fn win_and_loss_negate_to_each_other() {
        assert_eq!(-Wdl::Win, Wdl::Loss);
        assert_eq!(-Wdl::CursedWin, Wdl::BlessedLoss);
    }
}
