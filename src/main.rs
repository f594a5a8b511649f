//! Go Arena command line.
//!
//! ## Usage
//!
//! - `go-arena` or `go-arena demo` - Play a short capture through the service and print the board
//! - `go-arena simulate --players 8 --seconds 30` - Random bots against the matcher and sweeper

use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::Result;
use chrono::{Duration, Utc};
use clap::{Args, Parser, Subcommand};
use tokio::time::Instant;
use tracing::{debug, info};

use go_arena::config::Settings;
use go_arena::constants::{
    DEFAULT_BOARD_SIZE, DEFAULT_MAIN_TIME_SECS, STARTING_ELO, TICK_PERIOD_MS,
    UNDO_REQUEST_TIMEOUT_SECS, WAITING_TIMEOUT_SECS,
};
use go_arena::error::GameError;
use go_arena::events::{Channel, LocalHub};
use go_arena::game::GameStatus;
use go_arena::ids::{GameId, Player, PlayerId};
use go_arena::matchmaking::{Matchmaker, Preferences};
use go_arena::service::GameService;
use go_arena::store::{GameStore, InMemoryStore};
use go_arena::sweeper::Sweeper;
use go_arena::telemetry;

/// Go Arena: rules engine, matchmaking and clocks for online Go
#[derive(Parser)]
#[command(name = "go-arena")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    settings: SettingsArgs,

    /// Default log filter when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    log: String,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Play a single capture through the game service and print the board
    Demo,
    /// Run random bots through matchmaking and play
    Simulate {
        #[arg(long, default_value_t = 8)]
        players: usize,
        #[arg(long, default_value_t = 30)]
        seconds: u64,
    },
}

#[derive(Args)]
struct SettingsArgs {
    /// Matcher and sweeper period in milliseconds
    #[arg(long, global = true, default_value_t = TICK_PERIOD_MS)]
    tick_ms: u64,
    /// Seconds a game may wait for its first move
    #[arg(long, global = true, default_value_t = WAITING_TIMEOUT_SECS)]
    waiting_secs: i64,
    /// Seconds an undo request stays open
    #[arg(long, global = true, default_value_t = UNDO_REQUEST_TIMEOUT_SECS)]
    undo_secs: i64,
    /// Main time per side in seconds
    #[arg(long, global = true, default_value_t = DEFAULT_MAIN_TIME_SECS)]
    main_time_secs: i64,
    /// Board size when players have no preference (9, 13 or 19)
    #[arg(long, global = true, default_value_t = DEFAULT_BOARD_SIZE)]
    board_size: usize,
}

impl SettingsArgs {
    fn to_settings(&self) -> Result<Settings, GameError> {
        let settings = Settings {
            main_time: Duration::seconds(self.main_time_secs),
            waiting_timeout: Duration::seconds(self.waiting_secs),
            undo_timeout: Duration::seconds(self.undo_secs),
            tick_period: StdDuration::from_millis(self.tick_ms),
            board_size: self.board_size,
        };
        settings.validate()?;
        Ok(settings)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    telemetry::init_tracing(&cli.log, cli.json);
    let settings = cli.settings.to_settings()?;

    match cli.command {
        Some(Commands::Simulate { players, seconds }) => {
            run_simulation(settings, players, seconds).await
        }
        Some(Commands::Demo) | None => run_demo(settings).await,
    }
}

async fn run_demo(settings: Settings) -> Result<()> {
    println!("Go Arena\n");

    let service = GameService::new(
        Arc::new(InMemoryStore::new()),
        Arc::new(LocalHub::default()),
        settings,
    );
    let black = Player::new("black");
    let white = Player::new("white");
    service.register_player(&black).await?;
    service.register_player(&white).await?;
    let game = service.create_game(black.id, white.id, 9, Utc::now()).await?;

    let moves = [
        (black.id, (4, 4)),
        (white.id, (4, 5)),
        (black.id, (3, 5)),
        (white.id, (0, 0)),
        (black.id, (5, 5)),
        (white.id, (0, 8)),
        (black.id, (4, 6)),
    ];
    for (player, pt) in moves {
        service.place_stone(game.id, player, pt).await?;
    }

    let game = service.game(game.id).await?;
    println!("{}", game.board);
    println!(
        "Moves: {}  Black captures: {}  White captures: {}",
        game.moves.len(),
        game.black.score,
        game.white.score
    );
    Ok(())
}

async fn run_simulation(settings: Settings, players: usize, seconds: u64) -> Result<()> {
    let store = Arc::new(InMemoryStore::new());
    let hub = Arc::new(LocalHub::default());
    let service = Arc::new(GameService::new(store.clone(), hub.clone(), settings));
    let matchmaker = Matchmaker::new(service.clone());
    let sweeper = Sweeper::new(service.clone()).spawn();

    let mut roster = Vec::with_capacity(players);
    for i in 0..players {
        let elo = STARTING_ELO + fastrand::f64() * 20.0 - 10.0;
        let player = Player::new(format!("bot-{i}")).with_elo(elo);
        service.register_player(&player).await?;
        roster.push(player.id);
    }
    info!(players, seconds, "simulation started");

    let deadline = Instant::now() + StdDuration::from_secs(seconds);
    while Instant::now() < deadline {
        for &id in &roster {
            let player = service.player(id).await?;
            match player.active_game {
                Some(game_id) => bot_turn(&service, id, game_id).await,
                None if !matchmaker.is_queued(id) => {
                    hub.join(id, Channel::Searching);
                    matchmaker.enqueue(&player, Preferences::default(), Utc::now())?;
                }
                None => {}
            }
        }
        tokio::time::sleep(StdDuration::from_millis(20)).await;
    }
    sweeper.abort();

    let finished = store
        .game_ids_with_status(&[
            GameStatus::BlackWon,
            GameStatus::WhiteWon,
            GameStatus::BlackResigned,
            GameStatus::WhiteResigned,
        ])
        .await?;
    println!("Finished games: {}", finished.len());
    println!("Still queued: {}", matchmaker.len());
    let mut ratings = Vec::with_capacity(roster.len());
    for id in roster {
        let player = service.player(id).await?;
        ratings.push((player.username, player.elo));
    }
    ratings.sort_by(|a, b| b.1.total_cmp(&a.1));
    for (name, elo) in ratings {
        println!("{name:>8} {elo:7.1}");
    }
    Ok(())
}

/// One random action for `player` if it is theirs to take. Passing grows
/// likelier as the board fills.
async fn bot_turn(service: &GameService, player: PlayerId, game_id: GameId) {
    let result = async {
        let game = service.game(game_id).await?;
        let Some(color) = game.color_of(player) else {
            return Ok(());
        };
        match game.status {
            GameStatus::Waiting | GameStatus::Started if game.to_move() == color => {
                let size = game.size();
                if fastrand::usize(..size * size) < game.moves.len() {
                    service.pass(game_id, player).await?;
                } else {
                    let pt = (fastrand::usize(..size), fastrand::usize(..size));
                    service.place_stone(game_id, player, pt).await?;
                }
            }
            GameStatus::Finishing if !game.side(color).confirmed => {
                service.confirm_finishing(game_id, player).await?;
            }
            _ => {}
        }
        Ok::<_, GameError>(())
    }
    .await;

    if let Err(err) = result {
        debug!(player_id = %player, game_id = %game_id, error = %err.user_message(), "bot action refused");
    }
}
