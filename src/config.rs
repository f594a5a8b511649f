//! Runtime settings shared by the service, matcher, and sweeper.

use chrono::Duration;

use crate::constants::{
    BOARD_SIZES, DEFAULT_BOARD_SIZE, DEFAULT_MAIN_TIME_SECS, TICK_PERIOD_MS,
    UNDO_REQUEST_TIMEOUT_SECS, WAITING_TIMEOUT_SECS,
};
use crate::error::GameError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Clock each side starts with.
    pub main_time: Duration,
    /// Lifetime of a game that never received a first move.
    pub waiting_timeout: Duration,
    /// Lifetime of an unanswered undo request.
    pub undo_timeout: Duration,
    /// Period between matcher and sweeper ticks.
    pub tick_period: std::time::Duration,
    /// Board size for players without a preference.
    pub board_size: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            main_time: Duration::seconds(DEFAULT_MAIN_TIME_SECS),
            waiting_timeout: Duration::seconds(WAITING_TIMEOUT_SECS),
            undo_timeout: Duration::seconds(UNDO_REQUEST_TIMEOUT_SECS),
            tick_period: std::time::Duration::from_millis(TICK_PERIOD_MS),
            board_size: DEFAULT_BOARD_SIZE,
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<(), GameError> {
        if !BOARD_SIZES.contains(&self.board_size) {
            return Err(GameError::InvalidBoardSize(self.board_size));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.undo_timeout, Duration::seconds(30));
    }

    #[test]
    fn test_rejects_unsupported_board() {
        let settings = Settings {
            board_size: 15,
            ..Settings::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(GameError::InvalidBoardSize(15))
        ));
    }
}
