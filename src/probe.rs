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

//! WDL probe with capture resolution (spec §4.F) and DTZ probe (spec §4.G).
//! Ported from `TB_probe_wdl`/`probe_ab`/`TB_probe_dtz` in `tbprobe.c`.
//!
//! The C reference recurses with `do_move`/`undo_move` in place; this port
//! does the same with `Position::play_unchecked`, cloning the position
//! once per candidate move rather than threading a single mutable board
//! through an undo stack — the search structure (alpha-beta over captures
//! only) is otherwise unchanged.

use shakmaty::{Position, Role};

use crate::{
    errors::{ProbeResultExt, SyzygyError, SyzygyResult},
    loader::DtzCache,
    material::Material,
    registry::Registry,
    table::MAX_PIECES,
    types::{Metric, Syzygy, Wdl},
};

/// Rejects positions Syzygy tables cannot represent at all (spec §7's
/// expansion): castling rights still held by either side, or more pieces on
/// the board than any compiled-in table covers. Checked once, at the root of
/// a probe, since captures only ever reduce material and `play_unchecked`
/// never restores a castling right once lost.
pub(crate) fn reject_unsupported<P: Position>(pos: &P) -> SyzygyResult<()> {
    if !pos.castles().castling_rights().is_empty() {
        return Err(SyzygyError::Castling);
    }
    if Material::from_board(pos.board()).count() > MAX_PIECES as u32 {
        return Err(SyzygyError::TooManyPieces);
    }
    Ok(())
}

/// Probes the WDL table for `pos`, resolving captures (spec §4.F) so that
/// the reported value already accounts for en passant rights the stored
/// table itself is indifferent to.
pub fn probe_wdl<P>(registry: &Registry, directories: &[std::path::PathBuf], pos: &P) -> SyzygyResult<Wdl>
where
    P: Position + Clone + Syzygy,
{
    reject_unsupported(pos)?;

    let mut best_cap: Option<Wdl> = None;
    let mut best_ep: Option<Wdl> = None;

    for m in pos.legal_moves() {
        if !m.is_capture() {
            continue;
        }
        let mut child = pos.clone();
        child.play_unchecked(m);
        let v = -probe_ab(registry, directories, &child, Wdl::Loss, best_cap.unwrap_or(Wdl::Loss))?;
        if Some(v) > best_cap || best_cap.is_none() {
            if v == Wdl::Win {
                return Ok(Wdl::Win);
            }
            if !m.is_en_passant() {
                best_cap = Some(v);
            } else if Some(v) > best_ep {
                best_ep = Some(v);
            }
        }
    }

    let v = probe_wdl_table(registry, directories, pos)?;

    if let Some(ep) = best_ep {
        if Some(ep) > best_cap {
            if ep > v {
                return Ok(ep);
            }
            best_cap = Some(ep);
        }
    }

    if let Some(cap) = best_cap {
        if cap >= v {
            return Ok(cap);
        }
    }

    // Stalemate subtlety (spec §4.F step 6): the loop above only resolves
    // captures, so `v` is the table value of the position *with* en passant
    // rights stripped. If an en passant capture exists but didn't already
    // win this probe above, the position might really be stalemate once that
    // capture is taken into account — shakmaty's `legal_moves` already
    // includes it, so if every legal move turns out to be an en passant
    // capture, the table's `v == Draw` is wrong and the true value is
    // `best_ep`.
    if let Some(ep) = best_ep {
        if v == Wdl::Draw && pos.legal_moves().into_iter().all(|m| m.is_en_passant()) {
            return Ok(ep);
        }
    }

    Ok(v)
}

/// Capture-resolution search (spec §4.F "reconcile with a capture-only
/// search"): `probe_ab` in the reference. Since captures strictly reduce
/// material, this recursion always terminates at a position with one fewer
/// piece pair, eventually bottoming out in a direct table probe.
fn probe_ab<P>(
    registry: &Registry,
    directories: &[std::path::PathBuf],
    pos: &P,
    mut alpha: Wdl,
    beta: Wdl,
) -> SyzygyResult<Wdl>
where
    P: Position + Clone + Syzygy,
{
    for m in pos.legal_moves() {
        if !m.is_capture() {
            continue;
        }
        let mut child = pos.clone();
        child.play_unchecked(m);
        let v = -probe_ab(registry, directories, &child, -beta, -alpha)?;
        if v > alpha {
            if v >= beta {
                return Ok(v);
            }
            alpha = v;
        }
    }

    let v = probe_wdl_table(registry, directories, pos)?;
    Ok(if alpha >= v { alpha } else { v })
}

/// Direct table lookup with the `KvK` fast path (spec §4.F step 1 / §8
/// "Boundary behaviors"): a bare two-king position is always a draw and
/// never consults a table (there is no `KvK.rtbw` file in any real Syzygy
/// distribution).
fn probe_wdl_table<P>(registry: &Registry, directories: &[std::path::PathBuf], pos: &P) -> SyzygyResult<Wdl>
where
    P: Position + Syzygy,
{
    let material = Material::from_board(pos.board());
    if material.count() == 2 {
        return Ok(Wdl::Draw);
    }

    let normalized = material.into_normalized();
    let slot = registry.get(&normalized).ok_or(crate::errors::SyzygyError::MissingTable {
        metric: Metric::Wdl,
        material: normalized,
    })?;

    let bytes = slot
        .tables
        .get_or_load(directories, &slot.material, P::WDL_SUFFIX)
        .ctx(Metric::Wdl, normalized)?;
    let table = crate::table::WdlTable::new::<P>(bytes).ctx(Metric::Wdl, normalized)?;
    table.probe(pos).ctx(Metric::Wdl, normalized)
}

/// Probes the DTZ table for `pos` (spec §4.G), following the three-step
/// shortcut ladder of `TB_probe_dtz` before falling back to the stored
/// table: a draw short-circuits to 0, a winning capture/en-passant-capture
/// pins the exact ply count, and a winning non-capturing pawn push does
/// the same.
pub fn probe_dtz<P>(
    registry: &Registry,
    dtz_cache: &DtzCache,
    directories: &[std::path::PathBuf],
    pos: &P,
) -> SyzygyResult<i32>
where
    P: Position + Clone + Syzygy,
{
    let wdl = probe_wdl(registry, directories, pos)?;
    if wdl == Wdl::Draw {
        return Ok(0);
    }

    for m in pos.legal_moves() {
        if !m.is_capture() {
            continue;
        }
        let mut child = pos.clone();
        child.play_unchecked(m);
        let v = -probe_wdl(registry, directories, &child)?;
        if v == wdl {
            return Ok(wdl.to_dtz_before_zeroing());
        }
    }

    if wdl.signum() > 0 {
        for m in pos.legal_moves() {
            if m.role() != Role::Pawn || m.is_capture() {
                continue;
            }
            let mut child = pos.clone();
            child.play_unchecked(m);
            let v = -probe_wdl(registry, directories, &child)?;
            if v == wdl {
                return Ok(wdl.to_dtz_before_zeroing());
            }
        }
    }

    let material = Material::from_board(pos.board()).into_normalized();
    let stm_white = pos.turn().is_white();

    let dtz = dtz_cache.with_table::<P, u32>(directories, &material, |table| {
        if !table.matches_side_to_move(stm_white) {
            return Err(crate::errors::ProbeError::CorruptedTable {
                backtrace: std::backtrace::Backtrace::capture(),
            });
        }
        table.probe(pos, wdl)
    });

    match dtz {
        Ok(plies) => {
            let signed = i32::try_from(plies).unwrap_or(i32::MAX);
            Ok(wdl.to_dtz_before_zeroing() + if wdl.signum() > 0 { signed } else { -signed })
        }
        Err(_) => probe_dtz_other_side(registry, dtz_cache, directories, pos, wdl),
    }
}

/// Fallback when this side's DTZ table entry does not apply (spec §4.G
/// "the other side to move"): explore non-capturing, non-pawn moves and
/// take the move that best preserves (for a win) or most delays (for a
/// loss) the outcome, recursing into `probe_dtz` for each child.
fn probe_dtz_other_side<P>(
    registry: &Registry,
    dtz_cache: &DtzCache,
    directories: &[std::path::PathBuf],
    pos: &P,
    wdl: Wdl,
) -> SyzygyResult<i32>
where
    P: Position + Clone + Syzygy,
{
    let mut best = if wdl.signum() > 0 { i32::MAX } else { wdl.to_dtz_before_zeroing() };

    for m in pos.legal_moves() {
        if m.is_capture() || m.role() == Role::Pawn {
            continue;
        }
        let mut child = pos.clone();
        child.play_unchecked(m);
        let v = -probe_dtz(registry, dtz_cache, directories, &child)?;
        if wdl.signum() > 0 {
            if v > 0 && v + 1 < best {
                best = v + 1;
            }
        } else if v - 1 < best {
            best = v - 1;
        }
    }

    Ok(best)
}

#[cfg(test)]
mod tests {
    use shakmaty::{fen::Fen, CastlingMode, Chess};

    use super::*;

    #[test]
    fn rejects_position_with_castling_rights() {
        let fen: Fen = "r3k2r/8/8/8/8/8/8/R3K2R w KQkq - 0 1".parse().expect("fen");
        let pos: Chess = fen.into_position(CastlingMode::Standard).expect("legal position");
        assert!(matches!(reject_unsupported(&pos), Err(SyzygyError::Castling)));
    }

    #[test]
    fn accepts_position_without_castling_rights() {
        let fen: Fen = "4k3/8/4K3/8/8/8/8/4R3 w - - 0 1".parse().expect("fen");
        let pos: Chess = fen.into_position(CastlingMode::Standard).expect("legal position");
        assert!(reject_unsupported(&pos).is_ok());
    }
}
