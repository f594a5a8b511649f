//! Single-step rollback and the undo negotiation.
//!
//! Requests cost an undo right up front, whatever the answer. Only the player
//! who made the last move may ask, and only their opponent may answer.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use crate::board::{Cell, Color};
use crate::error::GameError;
use crate::game::{Game, GameStatus, UndoRequest};

/// Pop the last ledger entry and rewind everything it did.
///
/// Returns `false` when the ledger is empty.
pub fn undo_last_move(game: &mut Game, now: DateTime<Utc>) -> bool {
    let Some(mv) = game.moves.pop() else {
        return false;
    };
    let m = game.moves.len();
    let mover = mv.player;
    let opponent = mover.opponent();

    // The mover gets back the time they spent on the popped move.
    let credit = game.elapsed_since_last_move(now);
    game.side_mut(mover).time_remaining_ms += credit;
    if game.moves.is_empty() {
        game.status = GameStatus::Waiting;
        game.started_at = None;
    }

    if let Some(pt) = mv.point {
        game.board.set(pt, Cell::Empty);

        for group in &mut game.groups {
            for lib in group.liberties.iter_mut() {
                if lib.removed_at == Some(m) {
                    lib.removed_at = None;
                }
            }
        }

        game.groups.retain(|g| !(g.color == mover && g.created_at == m));

        let mut restored = 0;
        for group in &mut game.groups {
            if group.color == mover {
                if group.removed_at == Some(m) {
                    group.removed_at = None;
                }
                group.stones.retain(|s| s.created_at != m);
                group.liberties.retain(|l| l.created_at != m);
            } else if group.removed_at == Some(m) {
                for stone in group.stones.iter_mut() {
                    if stone.removed_at == Some(m) {
                        stone.removed_at = None;
                        game.board.set(stone.point, Cell::from(opponent));
                        restored += 1;
                    }
                }
                group.removed_at = None;
            }
        }
        game.side_mut(mover).score -= restored;
    }

    for ko in &mut game.kos {
        if ko.allowed_at.last() == Some(&m) {
            ko.allowed_at.pop();
            ko.allowed = false;
        }
        if ko.created_at.last() == Some(&m) {
            ko.created_at.pop();
            ko.allowed = true;
        }
    }
    game.kos.retain(|k| !k.created_at.is_empty());

    debug!(game_id = %game.id, %mover, point = ?mv.point, "move undone");
    true
}

/// Ask to take back the last move, which must be `color`'s.
pub fn request_undo(
    game: &mut Game,
    color: Color,
    undo_window: Duration,
    now: DateTime<Utc>,
) -> Result<(), GameError> {
    if game.status != GameStatus::Started {
        return Err(GameError::wrong_phase(game.status, "request an undo"));
    }
    if game.undo_request.is_some() {
        return Err(GameError::wrong_phase(game.status, "request a second undo"));
    }
    if game.moves.last().map(|m| m.player) != Some(color) {
        return Err(GameError::NotYourTurn);
    }
    let side = game.side_mut(color);
    if side.undo_rights == 0 {
        return Err(GameError::NoUndoRights);
    }
    side.undo_rights -= 1;
    game.undo_request = Some(UndoRequest {
        requested_by: color,
        requested_at: now,
        request_ends_at: now + undo_window,
    });
    info!(game_id = %game.id, %color, "undo requested");
    Ok(())
}

fn take_request(
    game: &mut Game,
    answering: Color,
    action: &'static str,
) -> Result<(), GameError> {
    if game.status != GameStatus::Started {
        return Err(GameError::wrong_phase(game.status, action));
    }
    match &game.undo_request {
        None => Err(GameError::NoUndoRequest),
        Some(req) if req.requested_by == answering => Err(GameError::NotYourTurn),
        Some(_) => {
            game.undo_request = None;
            Ok(())
        }
    }
}

/// Grant the opponent's request and roll back their last move.
pub fn accept_undo(game: &mut Game, color: Color, now: DateTime<Utc>) -> Result<(), GameError> {
    take_request(game, color, "accept an undo")?;
    undo_last_move(game, now);
    info!(game_id = %game.id, %color, "undo accepted");
    Ok(())
}

pub fn reject_undo(game: &mut Game, color: Color) -> Result<(), GameError> {
    take_request(game, color, "reject an undo")?;
    info!(game_id = %game.id, %color, "undo rejected");
    Ok(())
}

/// Drop a request nobody answered in time. Returns whether one was dropped.
pub fn expire_undo_request(game: &mut Game, now: DateTime<Utc>) -> bool {
    match &game.undo_request {
        Some(req) if req.request_ends_at <= now => {
            game.undo_request = None;
            info!(game_id = %game.id, "undo request timed out");
            true
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::ids::{GameId, PlayerId};
    use crate::rules::{MoveOutcome, pass, place_stone};
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    fn setup_game(moves: &[(usize, usize)]) -> Game {
        let mut game = Game::new(
            GameId::new(),
            PlayerId::new(),
            PlayerId::new(),
            9,
            &Settings::default(),
            t0(),
        )
        .unwrap();
        for (i, &pt) in moves.iter().enumerate() {
            let at = t0() + Duration::seconds(i as i64 * 3);
            let color = game.to_move();
            let outcome = place_stone(&mut game, color, pt, at).unwrap();
            assert!(matches!(outcome, MoveOutcome::Played { .. }));
        }
        game
    }

    fn window() -> Duration {
        Duration::seconds(30)
    }

    #[test]
    fn test_undo_only_move_returns_to_waiting() {
        let before = setup_game(&[]);
        let mut game = before.clone();
        place_stone(&mut game, Color::Black, (4, 4), t0()).unwrap();
        assert!(undo_last_move(&mut game, t0()));
        assert_eq!(game, before);
        assert!(!undo_last_move(&mut game, t0()));
    }

    #[test]
    fn test_undo_capture_round_trip() {
        let before = setup_game(&[(4, 4), (4, 5), (3, 5), (0, 0), (5, 5), (0, 8)]);
        let mut game = before.clone();
        let now = t0() + Duration::seconds(40);
        place_stone(&mut game, Color::Black, (4, 6), now).unwrap();
        assert_eq!(game.black.score, 1);
        undo_last_move(&mut game, now);
        assert_eq!(game, before);
    }

    #[test]
    fn test_undo_merge_round_trip() {
        let before = setup_game(&[(4, 3), (0, 0), (4, 5), (0, 8)]);
        let mut game = before.clone();
        let now = t0() + Duration::seconds(20);
        place_stone(&mut game, Color::Black, (4, 4), now).unwrap();
        undo_last_move(&mut game, now);
        assert_eq!(game, before);
    }

    #[test]
    fn test_undo_ko_round_trip() {
        let before = setup_game(&[
            (0, 1),
            (0, 2),
            (1, 0),
            (1, 3),
            (2, 1),
            (2, 2),
            (8, 8),
            (1, 1),
        ]);
        let mut game = before.clone();
        let now = t0() + Duration::seconds(30);
        place_stone(&mut game, Color::Black, (1, 2), now).unwrap();
        assert!(game.is_ko_blocked((1, 1)));

        let after_capture = game.clone();
        place_stone(&mut game, Color::White, (6, 6), now).unwrap();
        assert!(!game.is_ko_blocked((1, 1)));
        undo_last_move(&mut game, now);
        assert_eq!(game, after_capture);

        undo_last_move(&mut game, now);
        assert_eq!(game, before);
    }

    #[test]
    fn test_undo_pass_round_trip() {
        let before = setup_game(&[(4, 4)]);
        let mut game = before.clone();
        let now = t0() + Duration::seconds(9);
        pass(&mut game, Color::White, now).unwrap();
        undo_last_move(&mut game, now);
        assert_eq!(game, before);
    }

    #[test]
    fn test_undo_credits_clock() {
        let mut game = setup_game(&[(4, 4)]);
        let start = game.white.time_remaining_ms;
        place_stone(&mut game, Color::White, (3, 3), t0() + Duration::seconds(10)).unwrap();
        assert_eq!(game.white.time_remaining_ms, start - 10_000);
        undo_last_move(&mut game, t0() + Duration::seconds(15));
        // Think time is refunded, the wait for the answer is not charged.
        assert_eq!(game.white.time_remaining_ms, start + 5_000);
    }

    #[test]
    fn test_request_consumes_right_even_when_rejected() {
        let mut game = setup_game(&[(4, 4), (3, 3)]);
        request_undo(&mut game, Color::White, window(), t0()).unwrap();
        assert_eq!(game.white.undo_rights, 2);
        reject_undo(&mut game, Color::Black).unwrap();
        assert_eq!(game.white.undo_rights, 2);
        assert_eq!(game.moves.len(), 2);
        assert!(game.undo_request.is_none());
    }

    #[test]
    fn test_only_last_mover_may_request() {
        let mut game = setup_game(&[(4, 4), (3, 3)]);
        let err = request_undo(&mut game, Color::Black, window(), t0()).unwrap_err();
        assert!(matches!(err, GameError::NotYourTurn));
        assert_eq!(game.black.undo_rights, 3);
    }

    #[test]
    fn test_rights_run_out() {
        let mut game = setup_game(&[(4, 4), (3, 3)]);
        for _ in 0..3 {
            request_undo(&mut game, Color::White, window(), t0()).unwrap();
            reject_undo(&mut game, Color::Black).unwrap();
        }
        let err = request_undo(&mut game, Color::White, window(), t0()).unwrap_err();
        assert!(matches!(err, GameError::NoUndoRights));
    }

    #[test]
    fn test_requester_cannot_answer() {
        let mut game = setup_game(&[(4, 4), (3, 3)]);
        request_undo(&mut game, Color::White, window(), t0()).unwrap();
        assert!(matches!(
            accept_undo(&mut game, Color::White, t0()),
            Err(GameError::NotYourTurn)
        ));
        assert!(matches!(
            reject_undo(&mut Game::clone(&game), Color::Black),
            Ok(())
        ));
        accept_undo(&mut game, Color::Black, t0()).unwrap();
        assert_eq!(game.moves.len(), 1);
        assert_eq!(game.to_move(), Color::White);
        assert!(matches!(
            accept_undo(&mut game, Color::Black, t0()),
            Err(GameError::NoUndoRequest)
        ));
    }

    #[test]
    fn test_request_expires() {
        let mut game = setup_game(&[(4, 4), (3, 3)]);
        request_undo(&mut game, Color::White, window(), t0()).unwrap();
        assert!(!expire_undo_request(&mut game, t0() + Duration::seconds(29)));
        assert!(expire_undo_request(&mut game, t0() + Duration::seconds(30)));
        assert!(game.undo_request.is_none());
        assert_eq!(game.moves.len(), 2);
    }
}
