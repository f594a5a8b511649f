//! Periodic expiry of waiting games, running clocks and undo requests.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::GameError;
use crate::events::{Channel, GameEvent};
use crate::game::GameStatus;
use crate::ids::GameId;
use crate::rules;
use crate::service::GameService;
use crate::undo;

/// What a single game sweep did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sweep {
    Cancelled,
    TimedOut,
    UndoExpired,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub cancelled: usize,
    pub timed_out: usize,
    pub undo_expired: usize,
}

impl SweepReport {
    fn record(&mut self, sweep: Sweep) {
        match sweep {
            Sweep::Cancelled => self.cancelled += 1,
            Sweep::TimedOut => self.timed_out += 1,
            Sweep::UndoExpired => self.undo_expired += 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

pub struct Sweeper {
    service: Arc<GameService>,
}

impl Sweeper {
    pub fn new(service: Arc<GameService>) -> Self {
        Self { service }
    }

    /// Run [`Sweeper::tick_at`] every tick period until the handle is aborted.
    pub fn spawn(self) -> JoinHandle<()> {
        let period = self.service.settings().tick_period;
        tokio::spawn(async move {
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                self.tick_at(Utc::now()).await;
            }
        })
    }

    /// One pass over every live game. Each game is locked only while it is
    /// being swept.
    pub async fn tick_at(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();
        let ids = match self
            .service
            .store()
            .game_ids_with_status(&[GameStatus::Waiting, GameStatus::Started])
            .await
        {
            Ok(ids) => ids,
            Err(err) => {
                warn!(%err, "sweeper could not list games");
                return report;
            }
        };

        for id in ids {
            match self.sweep_game(id, now).await {
                Ok(Some(sweep)) => {
                    report.record(sweep);
                    if sweep != Sweep::UndoExpired {
                        self.service.locks().release(id);
                    }
                }
                Ok(None) => {}
                Err(err) => warn!(game_id = %id, %err, "sweep failed"),
            }
        }
        if !report.is_empty() {
            debug!(?report, "sweep done");
        }
        report
    }

    async fn sweep_game(&self, id: GameId, now: DateTime<Utc>) -> Result<Option<Sweep>, GameError> {
        let service = &self.service;
        let _guard = service.locks().lock(id).await;
        // The game may have moved on since it was listed.
        let Some(mut game) = service.store().load_game(id).await? else {
            return Ok(None);
        };

        match game.status {
            GameStatus::Waiting => {
                if !rules::expire_waiting(&mut game, now) {
                    return Ok(None);
                }
                service.store().save_game(&game).await?;
                service.conclude(&game).await?;
                Ok(Some(Sweep::Cancelled))
            }
            GameStatus::Started => {
                let mover = game.to_move();
                if game.time_remaining_ms(mover, now) < 0 {
                    rules::finish_on_time(&mut game, mover, now);
                    service.store().save_game(&game).await?;
                    service.conclude(&game).await?;
                    return Ok(Some(Sweep::TimedOut));
                }
                if !undo::expire_undo_request(&mut game, now) {
                    return Ok(None);
                }
                service.store().save_game(&game).await?;
                service.hub().publish(
                    &Channel::Game(id),
                    GameEvent::UndoRejected {
                        game_id: id,
                        timed_out: true,
                    },
                );
                info!(game_id = %id, "undo request auto-rejected");
                Ok(Some(Sweep::UndoExpired))
            }
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::Color;
    use crate::config::Settings;
    use crate::events::LocalHub;
    use crate::ids::{Player, PlayerId};
    use crate::store::InMemoryStore;
    use chrono::Duration;

    struct Fixture {
        service: Arc<GameService>,
        sweeper: Sweeper,
        black: PlayerId,
        white: PlayerId,
    }

    async fn setup() -> Fixture {
        let service = Arc::new(GameService::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(LocalHub::default()),
            Settings::default(),
        ));
        let black = Player::new("hon");
        let white = Player::new("inbo");
        service.register_player(&black).await.unwrap();
        service.register_player(&white).await.unwrap();
        Fixture {
            sweeper: Sweeper::new(service.clone()),
            service,
            black: black.id,
            white: white.id,
        }
    }

    #[tokio::test]
    async fn test_waiting_game_expires() {
        let f = setup().await;
        let created = Utc::now();
        let game = f
            .service
            .create_game(f.black, f.white, 9, created)
            .await
            .unwrap();

        let early = f.sweeper.tick_at(created + Duration::minutes(19)).await;
        assert!(early.is_empty());

        let report = f.sweeper.tick_at(created + Duration::minutes(20)).await;
        assert_eq!(report.cancelled, 1);
        let game = f.service.game(game.id).await.unwrap();
        assert_eq!(game.status, GameStatus::Cancelled);
        assert!(!game.notes.is_empty());
        let black = f.service.player(f.black).await.unwrap();
        assert_eq!(black.active_game, None);
    }

    #[tokio::test]
    async fn test_flag_falls_for_side_to_move() {
        let f = setup().await;
        let game = f
            .service
            .create_game(f.black, f.white, 9, Utc::now())
            .await
            .unwrap();
        f.service.place_stone(game.id, f.black, (4, 4)).await.unwrap();

        let main_time = f.service.settings().main_time;
        let report = f
            .sweeper
            .tick_at(Utc::now() + main_time + Duration::seconds(1))
            .await;
        assert_eq!(report.timed_out, 1);

        let game = f.service.game(game.id).await.unwrap();
        assert_eq!(game.status.winner(), Some(Color::Black));
        let black = f.service.player(f.black).await.unwrap();
        let white = f.service.player(f.white).await.unwrap();
        assert!(black.elo > white.elo);
    }

    #[tokio::test]
    async fn test_undo_request_auto_rejected() {
        let f = setup().await;
        let game = f
            .service
            .create_game(f.black, f.white, 9, Utc::now())
            .await
            .unwrap();
        f.service.place_stone(game.id, f.black, (4, 4)).await.unwrap();
        f.service.request_undo(game.id, f.black).await.unwrap();

        let report = f.sweeper.tick_at(Utc::now() + Duration::seconds(31)).await;
        assert_eq!(report.undo_expired, 1);
        let game = f.service.game(game.id).await.unwrap();
        assert!(game.undo_request.is_none());
        assert_eq!(game.status, GameStatus::Started);
        assert_eq!(game.black.undo_rights, 2);
    }
}
