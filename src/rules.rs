//! Move legality, capture, group bookkeeping, and ko.
//!
//! This module owns every transition that adds to the move ledger, plus the
//! terminal transitions a player or a clock can trigger while the game is
//! being played:
//! - [`place_stone`] and [`pass`] append moves
//! - [`resign`], [`cancel_game`] and [`finish_on_time`] end the game
//!
//! Undo lives in [`crate::undo`], scoring in [`crate::territory`].

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::board::{Cell, Color, Point};
use crate::error::GameError;
use crate::game::{Entry, Game, GameStatus, Group, Ko, Move};
use crate::territory::enter_finishing;

/// Why a placement was ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IllegalMove {
    OffBoard,
    /// Point is not empty
    Occupied,
    /// Point is barred by a ko
    Ko,
    /// Stone would have no liberties and capture nothing
    Suicide,
}

/// Result of a move attempt that did not raise an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    Played { captured: usize },
    /// Nothing changed.
    Ignored(IllegalMove),
    /// The mover's clock had already run out; the game is now over.
    OutOfTime,
}

fn check_turn(game: &Game, color: Color) -> Result<(), GameError> {
    if game.to_move() != color {
        return Err(GameError::NotYourTurn);
    }
    Ok(())
}

/// Place a stone for `color` at `pt`.
///
/// Illegal placements (occupied, suicide, ko) leave the game untouched and
/// report [`MoveOutcome::Ignored`].
///
/// Filling a liberty of your own groups is self-kill only when it is the last
/// liberty of every adjacent own group, since the stone merges them all into
/// one. A single group with liberties elsewhere keeps the move legal.
pub fn place_stone(
    game: &mut Game,
    color: Color,
    pt: Point,
    now: DateTime<Utc>,
) -> Result<MoveOutcome, GameError> {
    if !matches!(game.status, GameStatus::Waiting | GameStatus::Started) {
        return Err(GameError::wrong_phase(game.status, "place a stone"));
    }
    check_turn(game, color)?;

    let remaining = game.time_remaining_ms(color, now);
    if remaining < 0 {
        finish_on_time(game, color, now);
        return Ok(MoveOutcome::OutOfTime);
    }

    if !game.board.contains(pt) {
        return Ok(MoveOutcome::Ignored(IllegalMove::OffBoard));
    }
    if !game.board.get(pt).is_empty() {
        return Ok(MoveOutcome::Ignored(IllegalMove::Occupied));
    }

    let own_cell = Cell::from(color);
    let liberties: Vec<Point> = game
        .board
        .neighbors(pt)
        .filter(|&n| game.board.get(n).is_empty())
        .collect();
    let suicide = !game.board.neighbors(pt).any(|n| game.board.get(n) == own_cell);

    // Groups touching `pt` are exactly the live groups holding it as a liberty.
    let adjacent: Vec<usize> = game
        .groups
        .iter()
        .enumerate()
        .filter(|(_, g)| g.is_active() && g.has_liberty(pt))
        .map(|(i, _)| i)
        .collect();
    let (own, opponent): (Vec<usize>, Vec<usize>) = adjacent
        .iter()
        .copied()
        .partition(|&i| game.groups[i].color == color);

    let only_liberty_is = |i: usize| game.groups[i].active_liberties().all(|l| l == pt);
    let captured: Vec<usize> = opponent.into_iter().filter(|&i| only_liberty_is(i)).collect();
    let kills_own = !own.is_empty() && own.iter().all(|&i| only_liberty_is(i));
    let ko_blocked = game.is_ko_blocked(pt);

    if liberties.is_empty() && (suicide || kills_own) && (captured.is_empty() || ko_blocked) {
        let reason = if captured.is_empty() {
            IllegalMove::Suicide
        } else {
            IllegalMove::Ko
        };
        debug!(game_id = %game.id, %color, ?pt, ?reason, "ignoring illegal move");
        return Ok(MoveOutcome::Ignored(reason));
    }

    let m = game.moves.len();
    game.side_mut(color).time_remaining_ms = remaining;
    game.board.set(pt, own_cell);
    game.moves.push(Move {
        player: color,
        point: Some(pt),
        created_at: now,
    });
    // A pending request refers to the move just superseded.
    game.undo_request = None;

    let mut removed: Vec<Point> = Vec::new();
    for &i in &captured {
        let group = &mut game.groups[i];
        for stone in group.stones.iter_mut().filter(|s| s.is_active()) {
            stone.removed_at = Some(m);
            removed.push(stone.point);
        }
        group.removed_at = Some(m);
    }
    for &p in &removed {
        game.board.set(p, Cell::Empty);
    }
    game.side_mut(color).score += removed.len() as i32;

    for &i in &adjacent {
        for lib in game.groups[i].liberties.iter_mut() {
            if lib.point == pt && lib.is_active() {
                lib.removed_at = Some(m);
            }
        }
    }

    join_groups(game, color, pt, &own, &liberties, m);

    // Captured points become liberties of every bordering group of the mover.
    for &c in &removed {
        for n in game.board.neighbors(c) {
            if game.board.get(n) != own_cell {
                continue;
            }
            let i = game
                .group_at(n)
                .expect("active stone must belong to an active group");
            if !game.groups[i].has_liberty(c) {
                game.groups[i].liberties.push(Entry::new(c, m));
            }
        }
    }

    lift_kos(game, m);
    // Also requires the stone to touch no own stone, beyond the one-capture rule.
    if removed.len() == 1 && liberties.is_empty() && suicide {
        register_ko(game, removed[0], m);
    }

    if game.status == GameStatus::Waiting {
        game.status = GameStatus::Started;
        game.started_at = Some(now);
        info!(game_id = %game.id, "game started");
    }
    debug!(game_id = %game.id, %color, ?pt, captured = removed.len(), "stone placed");
    Ok(MoveOutcome::Played {
        captured: removed.len(),
    })
}

/// Attach the stone at `pt` to the mover's groups in `own`.
fn join_groups(
    game: &mut Game,
    color: Color,
    pt: Point,
    own: &[usize],
    liberties: &[Point],
    m: usize,
) {
    match own {
        [] => {
            game.groups.push(Group {
                color,
                stones: vec![Entry::new(pt, m)],
                liberties: liberties.iter().map(|&l| Entry::new(l, m)).collect(),
                created_at: m,
                removed_at: None,
                is_dead: false,
            });
        }
        [i] => {
            let group = &mut game.groups[*i];
            group.stones.push(Entry::new(pt, m));
            for &l in liberties {
                if !group.has_liberty(l) {
                    group.liberties.push(Entry::new(l, m));
                }
            }
        }
        many => {
            let mut stones: Vec<Entry> = Vec::new();
            let mut libs: Vec<Entry> = Vec::new();
            for &i in many {
                let old = &mut game.groups[i];
                stones.extend(old.stones.iter().filter(|s| s.is_active()).cloned());
                for lib in old.liberties.iter().filter(|l| l.is_active()) {
                    if !libs.iter().any(|e| e.point == lib.point) {
                        libs.push(lib.clone());
                    }
                }
                old.removed_at = Some(m);
            }
            stones.push(Entry::new(pt, m));
            for &l in liberties {
                if !libs.iter().any(|e| e.point == l) {
                    libs.push(Entry::new(l, m));
                }
            }
            game.groups.push(Group {
                color,
                stones,
                liberties: libs,
                created_at: m,
                removed_at: None,
                is_dead: false,
            });
        }
    }
}

/// A ko only bars the move right after it was created.
fn lift_kos(game: &mut Game, m: usize) {
    for ko in game.kos.iter_mut().filter(|k| !k.allowed) {
        ko.allowed = true;
        ko.allowed_at.push(m);
    }
}

fn register_ko(game: &mut Game, pt: Point, m: usize) {
    match game.kos.iter_mut().find(|k| k.point == pt) {
        Some(ko) => {
            ko.allowed = false;
            ko.created_at.push(m);
        }
        None => game.kos.push(Ko {
            point: pt,
            allowed: false,
            created_at: vec![m],
            allowed_at: Vec::new(),
        }),
    }
    debug!(game_id = %game.id, ?pt, "ko registered");
}

/// Pass for `color`. A second consecutive pass opens the finishing phase.
pub fn pass(game: &mut Game, color: Color, now: DateTime<Utc>) -> Result<MoveOutcome, GameError> {
    if game.status != GameStatus::Started {
        return Err(GameError::wrong_phase(game.status, "pass"));
    }
    check_turn(game, color)?;

    let remaining = game.time_remaining_ms(color, now);
    if remaining < 0 {
        finish_on_time(game, color, now);
        return Ok(MoveOutcome::OutOfTime);
    }

    let m = game.moves.len();
    game.side_mut(color).time_remaining_ms = remaining;
    game.moves.push(Move {
        player: color,
        point: None,
        created_at: now,
    });
    game.undo_request = None;
    lift_kos(game, m);
    debug!(game_id = %game.id, %color, "pass");

    if game.ends_with_two_passes() {
        enter_finishing(game);
    }
    Ok(MoveOutcome::Played { captured: 0 })
}

/// Resign for `color`. Returns the winner.
pub fn resign(game: &mut Game, color: Color, now: DateTime<Utc>) -> Result<Color, GameError> {
    if game.status != GameStatus::Started {
        return Err(GameError::wrong_phase(game.status, "resign"));
    }
    game.status = GameStatus::resigned_by(color);
    game.finished_at = Some(now);
    game.undo_request = None;
    game.note(format!("{color} resigned, {} wins", color.opponent()), now);
    info!(game_id = %game.id, %color, "resigned");
    Ok(color.opponent())
}

/// End the game because `loser`'s clock ran out. Returns the winner.
pub fn finish_on_time(game: &mut Game, loser: Color, now: DateTime<Utc>) -> Color {
    let winner = loser.opponent();
    game.status = GameStatus::won_by(winner);
    game.finished_at = Some(now);
    game.undo_request = None;
    game.note(format!("{loser} ran out of time, {winner} wins"), now);
    info!(game_id = %game.id, %loser, "out of time");
    winner
}

/// Abandon a game before the caller has committed to it.
///
/// A waiting game may always be cancelled; a started one only while the
/// caller has not placed a move yet.
pub fn cancel_game(game: &mut Game, color: Color, now: DateTime<Utc>) -> Result<(), GameError> {
    let allowed = match game.status {
        GameStatus::Waiting => true,
        GameStatus::Started => game.moves.iter().all(|m| m.player != color),
        _ => false,
    };
    if !allowed {
        return Err(GameError::wrong_phase(game.status, "cancel the game"));
    }
    game.status = GameStatus::cancelled_by(color);
    game.finished_at = Some(now);
    game.undo_request = None;
    game.note(format!("game cancelled by {color}"), now);
    info!(game_id = %game.id, %color, "game cancelled by player");
    Ok(())
}

/// Cancel a game nobody started in time.
pub fn expire_waiting(game: &mut Game, now: DateTime<Utc>) -> bool {
    if game.status != GameStatus::Waiting || now < game.waiting_ends_at {
        return false;
    }
    game.status = GameStatus::Cancelled;
    game.finished_at = Some(now);
    game.note("game cancelled: no move was played in time", now);
    info!(game_id = %game.id, "waiting game expired");
    true
}
