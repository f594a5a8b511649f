//! Logistic Elo update applied when a game is decided.

use serde::{Deserialize, Serialize};

use crate::board::Color;
use crate::constants::K_FACTOR;
use crate::ids::Player;

/// Expected score of a player rated `rating` against `opponent`.
pub fn expected_score(rating: f64, opponent: f64) -> f64 {
    1.0 / (1.0 + 10_f64.powf((opponent - rating) / 400.0))
}

/// Rating movement for both sides of one game.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RatingChange {
    pub black: f64,
    pub white: f64,
}

/// Deltas for a decisive game: the winner scores 1, the loser 0.
pub fn rating_change(black_elo: f64, white_elo: f64, winner: Color) -> RatingChange {
    let expected_black = expected_score(black_elo, white_elo);
    let actual_black = if winner == Color::Black { 1.0 } else { 0.0 };
    let black = K_FACTOR * (actual_black - expected_black);
    let white = K_FACTOR * ((1.0 - actual_black) - (1.0 - expected_black));
    RatingChange { black, white }
}

/// Apply the result to both player records.
pub fn apply_result(black: &mut Player, white: &mut Player, winner: Color) -> RatingChange {
    let change = rating_change(black.elo, white.elo, winner);
    black.elo += change.black;
    white.elo += change.white;
    change
}
