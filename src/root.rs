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

//! Root move filter (spec §4.H): reduces a root move list to the moves that
//! preserve the position's DTZ/WDL outcome under the 50-move rule, ported
//! from `TB_root_probe`/`TB_root_probe_wdl` in `tbprobe.c`.
//!
//! The C reference's `has_repeated` walks the engine's previous-state chain
//! via pointer arithmetic; the caller here supplies the equivalent as a
//! plain `&[u64]` of position keys, newest first, and this module only scans
//! it — the engine, not this crate, owns position-key history.

use shakmaty::{Move, Position};

use crate::{
    errors::SyzygyResult,
    loader::DtzCache,
    probe::{probe_dtz, probe_wdl, reject_unsupported},
    registry::Registry,
    types::{Syzygy, Wdl},
};

/// One root move annotated with the signed DTZ value (spec §6's sign
/// convention) of the position it leads to, from the root side's point of
/// view.
#[derive(Debug, Clone, Copy)]
pub struct RootMove {
    pub m: Move,
    pub dtz: i32,
}

/// Spec's "Repetition check": true iff any position key recurs within the
/// last `plies_from_null` plies of `history` (newest first).
fn has_repeated(history: &[u64], plies_from_null: u32) -> bool {
    let window = &history[..history.len().min(plies_from_null as usize)];
    window.iter().enumerate().any(|(i, key)| window[i + 1..].contains(key))
}

/// Filters and scores root moves using DTZ (spec §4.H). Returns the moves
/// that preserve the root's outcome under the 50-move rule, each annotated
/// with its resulting DTZ; an empty result does not imply filtering failed —
/// callers that need "probe failed, fall back to search" should inspect the
/// `SyzygyResult` instead, per spec's "if any probe fails, return not
/// filtered".
pub fn root_probe_dtz<P>(
    registry: &Registry,
    dtz_cache: &DtzCache,
    directories: &[std::path::PathBuf],
    pos: &P,
    history: &[u64],
    plies_from_null: u32,
) -> SyzygyResult<Vec<RootMove>>
where
    P: Position + Clone + Syzygy,
{
    let cnt50 = pos.halfmoves();
    let dtz_root = probe_dtz(registry, dtz_cache, directories, pos)?;

    let mut root_moves = Vec::new();
    for m in pos.legal_moves() {
        let mut child = pos.clone();
        child.play_unchecked(m);

        // A pawn move or capture resets the 50-move counter, which maps the
        // child into a fresh DTZ subregion; WDL alone pins the exact value
        // there (spec §4.G step 1/2's `wdl_to_dtz`).
        let mut v = if child.halfmoves() == 0 {
            (-probe_wdl(registry, directories, &child)?).to_dtz_before_zeroing()
        } else {
            let child_dtz = probe_dtz(registry, dtz_cache, directories, &child)?;
            match child_dtz.signum() {
                1 => -child_dtz - 1,
                -1 => -child_dtz + 1,
                _ => 0,
            }
        };

        // Mate-in-1 fixup (spec §4.H): a move giving check into a position
        // with no legal replies is a forced mate in one regardless of what
        // the table (which does not store terminal positions) would
        // otherwise suggest. The check and reply count are both properties
        // of the child the move leads to, not of the root.
        if child.is_check() && dtz_root == 1 && child.legal_moves().is_empty() {
            v = 1;
        }

        root_moves.push(RootMove { m, dtz: v });
    }

    let repeated = has_repeated(history, plies_from_null);
    Ok(filter_root_moves(root_moves, dtz_root, cnt50, repeated))
}

fn filter_root_moves(moves: Vec<RootMove>, dtz_root: i32, cnt50: u32, repeated: bool) -> Vec<RootMove> {
    if moves.is_empty() {
        return moves;
    }

    match dtz_root.signum() {
        1 => {
            let best = moves.iter().filter(|rm| rm.dtz > 0).map(|rm| rm.dtz).min().unwrap_or(i32::MAX);
            let mut max_dtz_allowed = best;
            if !repeated {
                let relaxed = 99 - cnt50 as i32;
                if relaxed > max_dtz_allowed {
                    max_dtz_allowed = relaxed;
                }
            }
            moves.into_iter().filter(|rm| rm.dtz > 0 && rm.dtz <= max_dtz_allowed).collect()
        }
        -1 => {
            let best = moves.iter().map(|rm| rm.dtz).max().unwrap_or(i32::MIN);
            if -best * 2 + cnt50 as i32 < 100 {
                moves
            } else {
                moves.into_iter().filter(|rm| rm.dtz == best).collect()
            }
        }
        _ => moves.into_iter().filter(|rm| rm.dtz == 0).collect(),
    }
}

/// WDL-only fallback (spec's `root_probe_wdl`), used when no DTZ table
/// covers the root material: scores each root move by the WDL of the
/// position it leads to and keeps those achieving the best outcome.
pub fn root_probe_wdl<P>(
    registry: &Registry,
    directories: &[std::path::PathBuf],
    pos: &P,
) -> SyzygyResult<Vec<(Move, Wdl)>>
where
    P: Position + Clone + Syzygy,
{
    reject_unsupported(pos)?;

    let mut scored = Vec::new();
    for m in pos.legal_moves() {
        let mut child = pos.clone();
        child.play_unchecked(m);
        let v = -probe_wdl(registry, directories, &child)?;
        scored.push((m, v));
    }

    let best = scored.iter().map(|&(_, v)| v).max().unwrap_or(Wdl::Loss);
    Ok(scored.into_iter().filter(|&(_, v)| v == best).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn has_repeated_detects_duplicate_key_within_window() {
        let history = [1u64, 2, 3, 2, 5];
        assert!(has_repeated(&history, 4));
        assert!(!has_repeated(&history, 2));
    }

    #[test]
    fn has_repeated_ignores_keys_outside_window() {
        let history = [1u64, 2, 3, 1];
        assert!(!has_repeated(&history, 3));
        assert!(has_repeated(&history, 4));
    }

    #[test]
    fn empty_root_move_list_filters_to_empty() {
        assert!(filter_root_moves(Vec::new(), 5, 0, false).is_empty());
    }

    #[test]
    fn drawing_root_keeps_only_drawing_moves() {
        let moves = vec![
            RootMove { m: dummy_move(), dtz: 0 },
            RootMove { m: dummy_move(), dtz: 3 },
        ];
        let kept = filter_root_moves(moves, 0, 0, false);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].dtz, 0);
    }

    #[test]
    fn losing_root_keeps_all_moves_when_budget_is_plentiful() {
        let moves = vec![
            RootMove { m: dummy_move(), dtz: -10 },
            RootMove { m: dummy_move(), dtz: -40 },
        ];
        let kept = filter_root_moves(moves, -10, 0, false);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn losing_root_keeps_only_best_delay_when_budget_is_tight() {
        let moves = vec![
            RootMove { m: dummy_move(), dtz: -10 },
            RootMove { m: dummy_move(), dtz: -40 },
        ];
        let kept = filter_root_moves(moves, -10, 90, false);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].dtz, -10);
    }

    fn dummy_move() -> Move {
        use shakmaty::{Role, Square};
        Move::Normal {
            role: Role::King,
            from: Square::E1,
            capture: None,
            to: Square::E2,
            promotion: None,
        }
    }
}
