//! Go Arena: rules engine, matchmaking and clocks for online Go.
//!
//! Games are plain values mutated by free functions; history is an
//! append-only ledger with tombstones, so the last move can always be
//! rewound exactly. A thin async service layer wraps the engine with
//! per-game locking, persistence and event fan-out.
//!
//! ## Modules
//!
//! - [`constants`] - Board sizes, timers, match table, rating constants
//! - [`board`] - Stone grid and colors
//! - [`game`] - Game record: ledger, groups, kos, clocks
//! - [`rules`] - Placement, capture, ko, pass, resign
//! - [`undo`] - Exact rewind and the undo negotiation
//! - [`territory`] - Region flood fill, dead groups, scoring
//! - [`rating`] - Elo updates
//! - [`service`] - Locked load/mutate/save entry points
//! - [`matchmaking`] - Queue and periodic pairing
//! - [`sweeper`] - Periodic expiry of games, clocks and undo requests
//!
//! ## Example
//!
//! ```
//! use chrono::Utc;
//! use go_arena::board::Color;
//! use go_arena::config::Settings;
//! use go_arena::game::{Game, GameStatus};
//! use go_arena::ids::{GameId, PlayerId};
//! use go_arena::rules::{MoveOutcome, place_stone};
//!
//! let now = Utc::now();
//! let mut game = Game::new(
//!     GameId::new(),
//!     PlayerId::new(),
//!     PlayerId::new(),
//!     9,
//!     &Settings::default(),
//!     now,
//! )
//! .unwrap();
//!
//! let outcome = place_stone(&mut game, Color::Black, (4, 4), now).unwrap();
//! assert_eq!(outcome, MoveOutcome::Played { captured: 0 });
//! assert_eq!(game.status, GameStatus::Started);
//!
//! // Occupied points are ignored, not errors.
//! let outcome = place_stone(&mut game, Color::White, (4, 4), now).unwrap();
//! assert!(matches!(outcome, MoveOutcome::Ignored(_)));
//! ```

pub mod board;
pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod game;
pub mod ids;
pub mod locks;
pub mod matchmaking;
pub mod rating;
pub mod rules;
pub mod service;
pub mod store;
pub mod sweeper;
pub mod telemetry;
pub mod territory;
pub mod undo;
