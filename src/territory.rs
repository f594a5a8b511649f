//! End-of-game scoring and the finishing-phase negotiation.
//!
//! After two passes, groups short of two liberties are marked dead and every
//! empty region is credited to the color that alone borders it. Players then
//! flip whatever they disagree with and confirm.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::board::{Board, Color, Point};
use crate::error::GameError;
use crate::game::{EmptyGroup, Game, GameStatus, RegionOwner};

/// Split every empty point into maximal connected regions.
///
/// Breadth-first, so board size never affects stack depth.
pub fn find_empty_groups(board: &Board) -> Vec<EmptyGroup> {
    let size = board.size;
    let mut visited = vec![false; size * size];
    let mut regions = Vec::new();

    for start in board.points() {
        if visited[start.0 * size + start.1] || !board.get(start).is_empty() {
            continue;
        }
        visited[start.0 * size + start.1] = true;

        let mut points = Vec::new();
        let mut border: Option<RegionOwner> = None;
        let mut queue = VecDeque::from([start]);
        while let Some(pt) = queue.pop_front() {
            points.push(pt);
            for n in board.neighbors(pt) {
                match board.get(n).color() {
                    None => {
                        let i = n.0 * size + n.1;
                        if !visited[i] {
                            visited[i] = true;
                            queue.push_back(n);
                        }
                    }
                    Some(c) => {
                        border = match border {
                            None => Some(RegionOwner::Captured(c)),
                            Some(RegionOwner::Captured(prev)) if prev == c => border,
                            _ => Some(RegionOwner::Neutral),
                        };
                    }
                }
            }
        }
        regions.push(EmptyGroup {
            points,
            captured_by: border.unwrap_or(RegionOwner::Unbordered),
        });
    }
    regions
}

/// Enter `finishing` after the second consecutive pass.
pub fn enter_finishing(game: &mut Game) {
    game.status = GameStatus::Finishing;
    game.black.old_score = game.black.score;
    game.white.old_score = game.white.score;

    let mut dead = Vec::new();
    for group in game.groups.iter_mut().filter(|g| g.is_active()) {
        if group.liberty_count() < 2 {
            group.is_dead = true;
            dead.push((group.color, group.stone_count()));
        }
    }
    for (color, stones) in dead {
        game.side_mut(color.opponent()).score += stones as i32;
    }

    game.empty_groups = find_empty_groups(&game.board);
    for region in &game.empty_groups {
        if let RegionOwner::Captured(c) = region.captured_by {
            let n = region.points.len() as i32;
            match c {
                Color::Black => game.black.score += n,
                Color::White => game.white.score += n,
            }
        }
    }
    info!(
        game_id = %game.id,
        black = game.black.score,
        white = game.white.score,
        "entered finishing"
    );
}

fn require_finishing(game: &Game, action: &'static str) -> Result<(), GameError> {
    if game.status != GameStatus::Finishing {
        return Err(GameError::wrong_phase(game.status, action));
    }
    Ok(())
}

/// Flip the owner of the region at `pt`, or the life of the group at `pt`.
pub fn negate_selection(game: &mut Game, pt: Point) -> Result<(), GameError> {
    require_finishing(game, "change the score")?;
    if !game.board.contains(pt) {
        return Err(GameError::IllegalSelection(format!("{pt:?} is off the board")));
    }

    if game.board.get(pt).is_empty() {
        let region = game
            .empty_groups
            .iter_mut()
            .find(|r| r.points.contains(&pt))
            .expect("every empty point belongs to a region while finishing");
        let RegionOwner::Captured(owner) = region.captured_by else {
            return Err(GameError::IllegalSelection(format!(
                "region at {pt:?} is {:?}",
                region.captured_by
            )));
        };
        region.captured_by = RegionOwner::Captured(owner.opponent());
        let n = region.points.len() as i32;
        game.side_mut(owner).score -= n;
        game.side_mut(owner.opponent()).score += n;
        debug!(game_id = %game.id, ?pt, from = %owner, "region flipped");
    } else {
        let i = game
            .group_at(pt)
            .expect("active stone must belong to an active group");
        let group = &mut game.groups[i];
        group.is_dead = !group.is_dead;
        let (color, dead, n) = (group.color, group.is_dead, group.stone_count() as i32);
        let scorer = game.side_mut(color.opponent());
        if dead {
            scorer.score += n;
        } else {
            scorer.score -= n;
        }
        debug!(game_id = %game.id, ?pt, %color, dead, "group toggled");
    }

    game.black.confirmed = false;
    game.white.confirmed = false;
    Ok(())
}

/// Return to play, discarding everything scored in the finishing phase.
pub fn cancel_finishing(game: &mut Game, now: DateTime<Utc>) -> Result<(), GameError> {
    require_finishing(game, "resume play")?;
    game.status = GameStatus::Started;
    for color in [Color::Black, Color::White] {
        let side = game.side_mut(color);
        side.score = side.old_score;
        side.confirmed = false;
    }
    for group in &mut game.groups {
        group.is_dead = false;
    }
    game.empty_groups.clear();

    // Time spent negotiating is not charged to the player to move.
    let credit = game.elapsed_since_last_move(now);
    let to_move = game.to_move();
    game.side_mut(to_move).time_remaining_ms += credit;
    info!(game_id = %game.id, "finishing cancelled");
    Ok(())
}

/// Record `color`'s agreement. Returns the winner once both sides agree.
///
/// Equal scores go to White.
pub fn confirm_finishing(
    game: &mut Game,
    color: Color,
    now: DateTime<Utc>,
) -> Result<Option<Color>, GameError> {
    require_finishing(game, "confirm the score")?;
    game.side_mut(color).confirmed = true;
    if !(game.black.confirmed && game.white.confirmed) {
        return Ok(None);
    }

    let winner = if game.black.score > game.white.score {
        Color::Black
    } else {
        Color::White
    };
    game.status = GameStatus::won_by(winner);
    game.finished_at = Some(now);
    let text = format!(
        "{winner} wins {} to {}",
        game.side(winner).score,
        game.side(winner.opponent()).score
    );
    game.note(text, now);
    info!(game_id = %game.id, %winner, "game scored");
    Ok(Some(winner))
}
