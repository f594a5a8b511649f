//! Constants for board geometry, clocks, matchmaking, and rating.
//!
//! Timing values here are defaults; [`crate::config::Settings`] carries the
//! values actually used at runtime.

// =============================================================================
// Board Geometry
// =============================================================================

/// Board sizes a game may be created with.
pub const BOARD_SIZES: [usize; 3] = [9, 13, 19];

/// Board size used when a player expresses no preference.
pub const DEFAULT_BOARD_SIZE: usize = 19;

// =============================================================================
// Clocks
// =============================================================================

/// Main time allotted to each side, in seconds.
pub const DEFAULT_MAIN_TIME_SECS: i64 = 30 * 60;

/// How long a freshly matched game may sit in `waiting` before it is cancelled.
pub const WAITING_TIMEOUT_SECS: i64 = 20 * 60;

/// How long an undo request stays open before it is auto-rejected.
pub const UNDO_REQUEST_TIMEOUT_SECS: i64 = 30;

/// Period of the matcher and sweeper ticks, in milliseconds.
pub const TICK_PERIOD_MS: u64 = 1000;

// =============================================================================
// Undo
// =============================================================================

/// Undo requests each side may make per game.
pub const UNDO_RIGHTS: u8 = 3;

// =============================================================================
// Matchmaking
// =============================================================================

/// Minimum wait (seconds, both sides) for a given elo gap, as
/// `(gap upper bound exclusive, wait)`. Gaps past the last bound need
/// [`MATCH_MAX_WAIT_SECS`].
pub const MATCH_TOLERANCE: [(f64, i64); 5] = [
    (25.0, 0),
    (50.0, 60),
    (100.0, 120),
    (150.0, 180),
    (250.0, 240),
];

/// Wait required for any elo gap of 250 or more.
pub const MATCH_MAX_WAIT_SECS: i64 = 300;

// =============================================================================
// Rating
// =============================================================================

/// Elo K-factor.
pub const K_FACTOR: f64 = 50.0;

/// Rating given to new players.
pub const STARTING_ELO: f64 = 1200.0;
