//! Game record: board, move ledger, groups, kos, and per-side state.
//!
//! Stones and liberties are never deleted while a game is live. Each entry
//! carries the ledger index of the move that created it and, once gone, the
//! index of the move that removed it. Undo walks those indices back.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::board::{Board, Color, Point};
use crate::config::Settings;
use crate::constants::{BOARD_SIZES, UNDO_RIGHTS};
use crate::error::GameError;
use crate::ids::{GameId, PlayerId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameStatus {
    Waiting,
    Started,
    Finishing,
    BlackWon,
    WhiteWon,
    BlackResigned,
    WhiteResigned,
    Cancelled,
    CancelledByBlack,
    CancelledByWhite,
}

impl GameStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(
            self,
            GameStatus::Waiting | GameStatus::Started | GameStatus::Finishing
        )
    }

    /// Winner of a decided game.
    pub fn winner(self) -> Option<Color> {
        match self {
            GameStatus::BlackWon | GameStatus::WhiteResigned => Some(Color::Black),
            GameStatus::WhiteWon | GameStatus::BlackResigned => Some(Color::White),
            _ => None,
        }
    }

    pub fn won_by(color: Color) -> Self {
        match color {
            Color::Black => GameStatus::BlackWon,
            Color::White => GameStatus::WhiteWon,
        }
    }

    pub fn resigned_by(color: Color) -> Self {
        match color {
            Color::Black => GameStatus::BlackResigned,
            Color::White => GameStatus::WhiteResigned,
        }
    }

    pub fn cancelled_by(color: Color) -> Self {
        match color {
            Color::Black => GameStatus::CancelledByBlack,
            Color::White => GameStatus::CancelledByWhite,
        }
    }
}

impl fmt::Display for GameStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GameStatus::Waiting => "waiting",
            GameStatus::Started => "started",
            GameStatus::Finishing => "finishing",
            GameStatus::BlackWon => "black_won",
            GameStatus::WhiteWon => "white_won",
            GameStatus::BlackResigned => "black_resigned",
            GameStatus::WhiteResigned => "white_resigned",
            GameStatus::Cancelled => "cancelled",
            GameStatus::CancelledByBlack => "cancelled_by_black",
            GameStatus::CancelledByWhite => "cancelled_by_white",
        };
        f.write_str(s)
    }
}

/// One ledger entry. `point: None` is a pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Move {
    pub player: Color,
    pub point: Option<Point>,
    pub created_at: DateTime<Utc>,
}

impl Move {
    pub fn is_pass(&self) -> bool {
        self.point.is_none()
    }
}

/// A stone or liberty with its ledger lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub point: Point,
    pub created_at: usize,
    pub removed_at: Option<usize>,
}

impl Entry {
    pub fn new(point: Point, created_at: usize) -> Self {
        Self {
            point,
            created_at,
            removed_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.removed_at.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub color: Color,
    pub stones: Vec<Entry>,
    pub liberties: Vec<Entry>,
    pub created_at: usize,
    pub removed_at: Option<usize>,
    /// Marked dead during the finishing phase.
    pub is_dead: bool,
}

impl Group {
    pub fn is_active(&self) -> bool {
        self.removed_at.is_none()
    }

    pub fn active_stones(&self) -> impl Iterator<Item = Point> + '_ {
        self.stones.iter().filter(|e| e.is_active()).map(|e| e.point)
    }

    pub fn active_liberties(&self) -> impl Iterator<Item = Point> + '_ {
        self.liberties.iter().filter(|e| e.is_active()).map(|e| e.point)
    }

    pub fn has_stone(&self, pt: Point) -> bool {
        self.active_stones().any(|p| p == pt)
    }

    pub fn has_liberty(&self, pt: Point) -> bool {
        self.active_liberties().any(|p| p == pt)
    }

    pub fn stone_count(&self) -> usize {
        self.active_stones().count()
    }

    pub fn liberty_count(&self) -> usize {
        self.active_liberties().count()
    }
}

/// A point where recapture is forbidden for one move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ko {
    pub point: Point,
    pub allowed: bool,
    /// Moves that (re)registered this ko.
    pub created_at: Vec<usize>,
    /// Moves that lifted it again.
    pub allowed_at: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Side {
    pub player: PlayerId,
    pub score: i32,
    /// Score before the finishing phase began.
    pub old_score: i32,
    /// Stored clock in milliseconds, as of this side's last move.
    pub time_remaining_ms: i64,
    pub undo_rights: u8,
    pub confirmed: bool,
}

impl Side {
    fn new(player: PlayerId, time_ms: i64) -> Self {
        Self {
            player,
            score: 0,
            old_score: 0,
            time_remaining_ms: time_ms,
            undo_rights: UNDO_RIGHTS,
            confirmed: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UndoRequest {
    pub requested_by: Color,
    pub requested_at: DateTime<Utc>,
    pub request_ends_at: DateTime<Utc>,
}

/// Who a territory region is credited to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionOwner {
    Captured(Color),
    /// Bordered by both colors.
    Neutral,
    /// Touches no stone at all.
    Unbordered,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmptyGroup {
    pub points: Vec<Point>,
    pub captured_by: RegionOwner,
}

/// System chat line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub text: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Game {
    pub id: GameId,
    pub status: GameStatus,
    pub board: Board,
    pub moves: Vec<Move>,
    pub groups: Vec<Group>,
    pub kos: Vec<Ko>,
    pub black: Side,
    pub white: Side,
    pub undo_request: Option<UndoRequest>,
    pub empty_groups: Vec<EmptyGroup>,
    pub notes: Vec<Note>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub waiting_ends_at: DateTime<Utc>,
}

impl Game {
    pub fn new(
        id: GameId,
        black: PlayerId,
        white: PlayerId,
        size: usize,
        settings: &Settings,
        now: DateTime<Utc>,
    ) -> Result<Self, GameError> {
        if !BOARD_SIZES.contains(&size) {
            return Err(GameError::InvalidBoardSize(size));
        }
        let time_ms = settings.main_time.num_milliseconds();
        Ok(Self {
            id,
            status: GameStatus::Waiting,
            board: Board::new(size),
            moves: Vec::new(),
            groups: Vec::new(),
            kos: Vec::new(),
            black: Side::new(black, time_ms),
            white: Side::new(white, time_ms),
            undo_request: None,
            empty_groups: Vec::new(),
            notes: Vec::new(),
            created_at: now,
            started_at: None,
            finished_at: None,
            waiting_ends_at: now + settings.waiting_timeout,
        })
    }

    pub fn size(&self) -> usize {
        self.board.size
    }

    pub fn side(&self, color: Color) -> &Side {
        match color {
            Color::Black => &self.black,
            Color::White => &self.white,
        }
    }

    pub fn side_mut(&mut self, color: Color) -> &mut Side {
        match color {
            Color::Black => &mut self.black,
            Color::White => &mut self.white,
        }
    }

    pub fn player(&self, color: Color) -> PlayerId {
        self.side(color).player
    }

    /// Color seated for `player`, if they play in this game.
    pub fn color_of(&self, player: PlayerId) -> Option<Color> {
        if self.black.player == player {
            Some(Color::Black)
        } else if self.white.player == player {
            Some(Color::White)
        } else {
            None
        }
    }

    pub fn to_move(&self) -> Color {
        self.moves
            .last()
            .map_or(Color::Black, |m| m.player.opponent())
    }

    pub fn last_move_at(&self) -> Option<DateTime<Utc>> {
        self.moves.last().map(|m| m.created_at)
    }

    /// Milliseconds since the last ledger entry; zero before the first move.
    pub fn elapsed_since_last_move(&self, now: DateTime<Utc>) -> i64 {
        self.last_move_at()
            .map_or(0, |t| (now - t).num_milliseconds())
    }

    /// Clock of `color` as seen at `now`. Only the side to move is running.
    pub fn time_remaining_ms(&self, color: Color, now: DateTime<Utc>) -> i64 {
        let stored = self.side(color).time_remaining_ms;
        if self.status == GameStatus::Started && self.to_move() == color {
            stored - self.elapsed_since_last_move(now)
        } else {
            stored
        }
    }

    pub fn ends_with_two_passes(&self) -> bool {
        let n = self.moves.len();
        n >= 2 && self.moves[n - 1].is_pass() && self.moves[n - 2].is_pass()
    }

    /// Index of the live group holding a stone at `pt`.
    pub fn group_at(&self, pt: Point) -> Option<usize> {
        self.groups
            .iter()
            .position(|g| g.is_active() && g.has_stone(pt))
    }

    /// Whether `pt` is currently barred by a ko.
    pub fn is_ko_blocked(&self, pt: Point) -> bool {
        self.kos.iter().any(|k| k.point == pt && !k.allowed)
    }

    pub fn note(&mut self, text: impl Into<String>, now: DateTime<Utc>) {
        self.notes.push(Note {
            text: text.into(),
            created_at: now,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    fn new_game(size: usize) -> Result<Game, GameError> {
        Game::new(
            GameId::new(),
            PlayerId::new(),
            PlayerId::new(),
            size,
            &Settings::default(),
            t0(),
        )
    }

    #[test]
    fn test_new_game_defaults() {
        let game = new_game(9).unwrap();
        assert_eq!(game.status, GameStatus::Waiting);
        assert_eq!(game.to_move(), Color::Black);
        assert_eq!(game.black.undo_rights, UNDO_RIGHTS);
        assert_eq!(game.waiting_ends_at - game.created_at, chrono::Duration::minutes(20));
    }

    #[test]
    fn test_rejects_odd_board_size() {
        assert!(matches!(new_game(10), Err(GameError::InvalidBoardSize(10))));
    }

    #[test]
    fn test_color_of() {
        let game = new_game(13).unwrap();
        assert_eq!(game.color_of(game.black.player), Some(Color::Black));
        assert_eq!(game.color_of(game.white.player), Some(Color::White));
        assert_eq!(game.color_of(PlayerId::new()), None);
    }

    #[test]
    fn test_status_winner() {
        assert_eq!(GameStatus::WhiteResigned.winner(), Some(Color::Black));
        assert_eq!(GameStatus::WhiteWon.winner(), Some(Color::White));
        assert_eq!(GameStatus::Cancelled.winner(), None);
        assert!(GameStatus::CancelledByBlack.is_terminal());
        assert!(!GameStatus::Finishing.is_terminal());
    }
}
